//! Sinks enact arbitrated decisions on the managed node
//!
//! The engine only sees the [`Sink`] trait. Pushing a PRB quota to a real RAN
//! node is the job of a control-plane client implementing it.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tracing::info;
use xapp_arbiter_common::{Request, SinkConfig, SinkResult};

#[async_trait]
pub trait Sink: Send + Sync {
    /// Apply a decision. Errors are logged by the engine and never retried there.
    async fn apply(&self, request: &Request) -> SinkResult<()>;
}

/// Logs decisions without enacting them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

#[async_trait]
impl Sink for LoggingSink {
    async fn apply(&self, request: &Request) -> SinkResult<()> {
        info!(
            target: "decision",
            "Applying ratio {} from {} to node {} for ue {}",
            request.bounds, request.agent_id, request.target.node_id, request.target.sub_entity_id
        );
        Ok(())
    }
}

/// Keeps every applied request in memory.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    applied: Arc<Mutex<Vec<Request>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn applied(&self) -> Vec<Request> {
        self.applied.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    async fn apply(&self, request: &Request) -> SinkResult<()> {
        self.applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct DecisionRecord<'a> {
    applied_at: chrono::DateTime<Utc>,
    #[serde(flatten)]
    request: &'a Request,
}

/// Appends every applied decision to a JSON-lines file.
#[derive(Debug)]
pub struct DecisionLogSink {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl DecisionLogSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Sink for DecisionLogSink {
    async fn apply(&self, request: &Request) -> SinkResult<()> {
        let mut line = serde_json::to_string(&DecisionRecord {
            applied_at: Utc::now(),
            request,
        })?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Forwards each decision to several sinks; the first error wins.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn Sink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn Sink>>) -> Self {
        Self { sinks }
    }

    /// Logging sink, plus a decision file when `decision_log` is set.
    pub fn from_config(config: &SinkConfig) -> Self {
        let mut sink = Self::new(vec![Arc::new(LoggingSink) as Arc<dyn Sink>]);
        if let Some(path) = &config.decision_log {
            info!("Recording applied decisions to {}", path.display());
            sink.push(Arc::new(DecisionLogSink::new(path)));
        }
        sink
    }

    pub fn push(&mut self, sink: Arc<dyn Sink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl Sink for FanoutSink {
    async fn apply(&self, request: &Request) -> SinkResult<()> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.apply(request).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
