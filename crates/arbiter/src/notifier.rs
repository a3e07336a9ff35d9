//! Best-effort mirrors of engine state changes
//!
//! Notifiers are observability only. They must not block, and their failures
//! never change an arbitration outcome.

use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, info};
use xapp_arbiter_common::{EngineEvent, EventKind, NotifyError, NotifyResult};

pub trait Notifier: Send + Sync {
    fn notify(&self, event: &EngineEvent) -> NotifyResult<()>;
}

/// Writes every event to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, event: &EngineEvent) -> NotifyResult<()> {
        match &event.kind {
            EventKind::AgentOnboarded { agent_id } => {
                info!(target: "events", "xApp {} onboarded", agent_id)
            }
            EventKind::ConflictDetected {
                first_agent,
                second_agent,
                target,
            } => info!(
                target: "events",
                "Conflict detected between {} and {} on {}",
                first_agent, second_agent, target
            ),
            EventKind::Applied { request, deferred } => info!(
                target: "events",
                "Applied {} (deferred: {})",
                request, deferred
            ),
            EventKind::Buffered {
                request, fire_at, ..
            } => info!(
                target: "events",
                "Buffered {} until {}",
                request, fire_at
            ),
            EventKind::Held { request } => {
                info!(target: "events", "Held {} for a follow-up pass", request)
            }
        }
        Ok(())
    }
}

/// Keeps every event in memory, in emission order.
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
    events: Arc<Mutex<Vec<EngineEvent>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().into_iter().map(|event| event.kind).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: &EngineEvent) -> NotifyResult<()> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
        Ok(())
    }
}

/// Fans events out to subscribers over a tokio broadcast channel.
pub struct BroadcastNotifier {
    sender: broadcast::Sender<EngineEvent>,
}

impl BroadcastNotifier {
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, event: &EngineEvent) -> NotifyResult<()> {
        self.sender
            .send(event.clone())
            .map(|receivers| debug!("Event {} delivered to {} subscribers", event.kind, receivers))
            .map_err(|_| NotifyError::NoSubscribers)
    }
}

/// Delivers each event to every inner notifier; the first error wins.
#[derive(Clone, Default)]
pub struct FanoutNotifier {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    pub fn push(&mut self, notifier: Arc<dyn Notifier>) {
        self.notifiers.push(notifier);
    }
}

impl Notifier for FanoutNotifier {
    fn notify(&self, event: &EngineEvent) -> NotifyResult<()> {
        let mut first_error = None;
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(event) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
