//! Common test utilities for engine testing

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use std::sync::{Arc, Once};
use std::time::Duration;
use xapp_arbiter::{ArbiterEngine, RecordingNotifier, RecordingSink, TokioClock};
use xapp_arbiter_common::{EngineConfig, EventKind, Request, TargetKey};

static INIT: Once = Once::new();

pub const NODE: &str = "gnbd_001_001_00019b_0";

/// Initialize logging for tests
pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_test_writer()
            .try_init();
    });
}

pub fn origin() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

/// Wall time `ms` milliseconds after the harness origin.
pub fn at(ms: i64) -> DateTime<Utc> {
    origin() + chrono::Duration::milliseconds(ms)
}

pub fn ue(sub_entity_id: u64) -> TargetKey {
    TargetKey::new(NODE, sub_entity_id)
}

/// An engine on tokio's clock anchored at [`origin`], with recording
/// collaborators. Build it inside a paused runtime.
pub struct Harness {
    pub engine: ArbiterEngine,
    pub sink: RecordingSink,
    pub notifier: RecordingNotifier,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        init_test_logging();
        let sink = RecordingSink::new();
        let notifier = RecordingNotifier::new();
        let engine = ArbiterEngine::with_clock(
            config,
            Arc::new(TokioClock::anchored_at(origin())),
            Arc::new(sink.clone()),
            Arc::new(notifier.clone()),
        );
        Self {
            engine,
            sink,
            notifier,
        }
    }

    /// Move virtual time forward, letting due timers run.
    pub async fn advance_ms(&self, ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.notifier.kinds()
    }

    pub fn conflicts(&self) -> usize {
        self.kinds()
            .iter()
            .filter(|kind| matches!(kind, EventKind::ConflictDetected { .. }))
            .count()
    }

    /// Requests carried by `Applied` events, with their deferred flag.
    pub fn applied(&self) -> Vec<(Request, bool)> {
        self.kinds()
            .into_iter()
            .filter_map(|kind| match kind {
                EventKind::Applied { request, deferred } => Some((request, deferred)),
                _ => None,
            })
            .collect()
    }

    pub fn deferred_applies_of(&self, request: &Request) -> usize {
        self.applied()
            .iter()
            .filter(|(applied, deferred)| *deferred && applied.id == request.id)
            .count()
    }
}
