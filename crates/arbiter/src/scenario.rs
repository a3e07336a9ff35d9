//! Scripted replays of onboarding and submission traffic
//!
//! A scenario is a TOML file of steps, each scheduled at an offset from the
//! start of the run:
//!
//! ```toml
//! name = "two-xapps"
//!
//! [[steps]]
//! action = "onboard"
//! at_ms = 0
//! agent = "xApp1"
//!
//! [[steps]]
//! action = "submit"
//! at_ms = 2000
//! agent = "xApp2"
//! node_id = "gnbd_001_001_00019b_0"
//! sub_entity_id = 0
//! min_ratio = 3
//! max_ratio = 6
//! ```
//!
//! `timestamp_ms` on a submit step pins the request timestamp to an offset
//! from the scenario start instead of the time the step runs, which models an
//! agent with a skewed clock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};
use xapp_arbiter_common::{
    ArbiterError, ArbiterResult, EngineConfig, EngineEvent, Request, TargetKey,
};

use crate::engine::{ArbiterEngine, Disposition};
use crate::notifier::{FanoutNotifier, Notifier, RecordingNotifier};
use crate::sink::Sink;

/// Largest skew a submit step may pin its timestamp to: one year either way.
pub const MAX_TIMESTAMP_OFFSET_MS: i64 = 365 * 86_400_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Overrides the engine configuration for this run.
    #[serde(default)]
    pub engine: Option<EngineConfig>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    Onboard {
        at_ms: u64,
        agent: String,
    },
    Submit {
        at_ms: u64,
        agent: String,
        node_id: String,
        sub_entity_id: u64,
        min_ratio: i32,
        max_ratio: i32,
        #[serde(default)]
        timestamp_ms: Option<i64>,
    },
}

impl Step {
    pub fn at_ms(&self) -> u64 {
        match self {
            Self::Onboard { at_ms, .. } | Self::Submit { at_ms, .. } => *at_ms,
        }
    }
}

/// What a single step did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StepReport {
    Onboarded {
        agent: String,
        first_time: bool,
    },
    Submitted {
        request: Request,
        disposition: Disposition,
    },
    Rejected {
        step: usize,
        error: String,
    },
}

#[derive(Debug, Clone)]
pub struct ScenarioRun {
    pub steps: Vec<StepReport>,
    pub events: Vec<EngineEvent>,
    /// Buffered requests still pending when the run gave up waiting.
    pub dropped: Vec<Request>,
}

impl Scenario {
    pub fn from_file(path: impl AsRef<Path>) -> ArbiterResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ArbiterError::scenario(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ArbiterResult<Self> {
        let scenario: Scenario = toml::from_str(content)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn validate(&self) -> ArbiterResult<()> {
        if self.steps.is_empty() {
            return Err(ArbiterError::scenario(format!(
                "scenario '{}' has no steps",
                self.name
            )));
        }
        if let Some(index) = self
            .steps
            .windows(2)
            .position(|pair| pair[1].at_ms() < pair[0].at_ms())
        {
            return Err(ArbiterError::scenario(format!(
                "step {} is scheduled before step {}",
                index + 1,
                index
            )));
        }
        if let Some(index) = self.steps.iter().position(|step| {
            matches!(step, Step::Submit { timestamp_ms: Some(offset), .. }
                if offset.unsigned_abs() > MAX_TIMESTAMP_OFFSET_MS.unsigned_abs())
        }) {
            return Err(ArbiterError::scenario(format!(
                "step {} pins its timestamp more than {}ms from the scenario start",
                index, MAX_TIMESTAMP_OFFSET_MS
            )));
        }
        if let Some(engine) = &self.engine {
            engine.validate()?;
        }
        Ok(())
    }

    /// Two xApps steering the same UE on one E2 node: xApp2 asks for an
    /// overlapping range two seconds after xApp1 and is deferred.
    pub fn demo() -> Self {
        const NODE: &str = "gnbd_001_001_00019b_0";
        let submit = |at_ms, agent: &str, min_ratio, max_ratio| Step::Submit {
            at_ms,
            agent: agent.to_string(),
            node_id: NODE.to_string(),
            sub_entity_id: 0,
            min_ratio,
            max_ratio,
            timestamp_ms: None,
        };
        Self {
            name: "demo".to_string(),
            description: Some("Two xApps competing for the PRB ratio of UE 0".to_string()),
            engine: None,
            steps: vec![
                Step::Onboard {
                    at_ms: 0,
                    agent: "xApp1".to_string(),
                },
                submit(0, "xApp1", 1, 5),
                Step::Onboard {
                    at_ms: 1_000,
                    agent: "xApp2".to_string(),
                },
                submit(2_000, "xApp2", 3, 6),
                submit(9_000, "xApp1", 12, 12),
            ],
        }
    }

    /// Replay the steps against a fresh engine and wait for every buffered
    /// request to fire.
    pub async fn run(
        &self,
        config: &EngineConfig,
        sink: Arc<dyn Sink>,
        notifier: Arc<dyn Notifier>,
    ) -> ArbiterResult<ScenarioRun> {
        self.validate()?;
        let config = self.engine.clone().unwrap_or_else(|| config.clone());
        let settle = config.buffer_delay() + config.sink_timeout() + Duration::from_secs(1);

        let recorder = RecordingNotifier::new();
        let notifier = FanoutNotifier::new(vec![
            Arc::new(recorder.clone()) as Arc<dyn Notifier>,
            notifier,
        ]);
        let engine = ArbiterEngine::new(config, sink, Arc::new(notifier));

        info!("Replaying scenario '{}' ({} steps)", self.name, self.steps.len());
        let started = Instant::now();
        let origin = engine.now();

        let mut reports = Vec::with_capacity(self.steps.len());
        for (index, step) in self.steps.iter().enumerate() {
            tokio::time::sleep_until(started + Duration::from_millis(step.at_ms())).await;
            let report = match run_step(&engine, step, origin).await {
                Ok(report) => report,
                Err(e) if e.is_caller_error() => {
                    warn!("Step {} rejected: {}", index, e);
                    StepReport::Rejected {
                        step: index,
                        error: e.to_string(),
                    }
                }
                Err(e) => return Err(e),
            };
            reports.push(report);
        }

        if !engine.wait_idle(settle).await {
            warn!("Scenario '{}' finished with buffered requests pending", self.name);
        }
        let dropped = engine.shutdown().await;

        Ok(ScenarioRun {
            steps: reports,
            events: recorder.events(),
            dropped,
        })
    }
}

async fn run_step(
    engine: &ArbiterEngine,
    step: &Step,
    origin: DateTime<Utc>,
) -> ArbiterResult<StepReport> {
    match step {
        Step::Onboard { agent, .. } => {
            let first_time = engine.onboard(agent.as_str()).await?;
            Ok(StepReport::Onboarded {
                agent: agent.clone(),
                first_time,
            })
        }
        Step::Submit {
            agent,
            node_id,
            sub_entity_id,
            min_ratio,
            max_ratio,
            timestamp_ms,
            ..
        } => {
            let timestamp = match timestamp_ms {
                Some(offset) => chrono::Duration::try_milliseconds(*offset)
                    .and_then(|skew| origin.checked_add_signed(skew))
                    .ok_or_else(|| {
                        ArbiterError::scenario(format!("timestamp offset {}ms out of range", offset))
                    })?,
                None => engine.now(),
            };
            let outcome = engine
                .submit(
                    agent.as_str(),
                    TargetKey::new(node_id.as_str(), *sub_entity_id),
                    *min_ratio,
                    *max_ratio,
                    timestamp,
                )
                .await?;
            Ok(StepReport::Submitted {
                request: outcome.request,
                disposition: outcome.disposition,
            })
        }
    }
}
