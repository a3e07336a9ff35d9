//! Arbitration of conflicting requests and the buffer of deferred losers

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};
use xapp_arbiter_common::{PendingKey, Request, RequestId, TargetKey};

use crate::timer::TimerHandle;

/// Outcome of arbitrating one conflicting pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub applied: Request,
    pub buffered: Request,
}

/// First come, first served: the strictly earlier timestamp is applied now.
/// On an exact tie the first argument wins.
pub fn resolve(r1: Request, r2: Request) -> Resolution {
    if r2.timestamp < r1.timestamp {
        Resolution {
            applied: r2,
            buffered: r1,
        }
    } else {
        Resolution {
            applied: r1,
            buffered: r2,
        }
    }
}

/// A buffered request waiting for its timer.
#[derive(Debug)]
pub struct PendingEntry {
    pub request: Request,
    pub fire_at: DateTime<Utc>,
    pub timer: TimerHandle,
}

/// Read-only view of a pending entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingView {
    pub key: PendingKey,
    pub request: Request,
    pub fire_at: DateTime<Utc>,
}

/// What `PendingBuffer::insert` did.
#[derive(Debug)]
pub enum BufferOutcome {
    Inserted,
    /// An older buffered request for the same key was cancelled.
    Replaced(Request),
}

/// Buffered losers keyed by (agent, target). At most one timer per key.
#[derive(Debug, Default)]
pub struct PendingBuffer {
    entries: HashMap<PendingKey, PendingEntry>,
}

impl PendingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if this exact request is already waiting to be applied.
    pub fn is_pending(&self, request: &Request) -> bool {
        self.entries
            .get(&request.pending_key())
            .is_some_and(|entry| entry.request.id == request.id)
    }

    /// Track a newly scheduled entry, cancelling whatever was pending for the
    /// same key (last arbitration wins).
    pub fn insert(&mut self, entry: PendingEntry) -> BufferOutcome {
        let key = entry.request.pending_key();
        match self.entries.insert(key.clone(), entry) {
            Some(previous) => {
                previous.timer.cancel();
                warn!(
                    "Buffered request {} for {} superseded by a newer arbitration",
                    previous.request.id, key
                );
                BufferOutcome::Replaced(previous.request)
            }
            None => BufferOutcome::Inserted,
        }
    }

    /// Retire the entry for a fired timer. Returns the request only if the
    /// entry is still the current one for its key.
    pub fn retire(&mut self, key: &PendingKey, id: RequestId) -> Option<Request> {
        match self.entries.get(key) {
            Some(entry) if entry.request.id == id => {
                self.entries.remove(key).map(|entry| entry.request)
            }
            _ => {
                debug!("Stale timer for {} ({}) ignored", key, id);
                None
            }
        }
    }

    /// Cancel a pending entry without applying it.
    pub fn cancel(&mut self, key: &PendingKey) -> Option<Request> {
        self.entries.remove(key).map(|entry| {
            entry.timer.cancel();
            entry.request
        })
    }

    /// Cancel every pending timer, returning the dropped requests.
    pub fn cancel_all(&mut self) -> Vec<Request> {
        self.entries
            .drain()
            .map(|(_, entry)| {
                entry.timer.cancel();
                entry.request
            })
            .collect()
    }

    pub fn has_target(&self, target: &TargetKey) -> bool {
        self.entries.keys().any(|key| &key.target == target)
    }

    /// Pending entries sorted by fire time, then key.
    pub fn views(&self) -> Vec<PendingView> {
        let mut views: Vec<PendingView> = self
            .entries
            .iter()
            .map(|(key, entry)| PendingView {
                key: key.clone(),
                request: entry.request.clone(),
                fire_at: entry.fire_at,
            })
            .collect();
        views.sort_by(|a, b| a.fire_at.cmp(&b.fire_at).then_with(|| a.key.cmp(&b.key)));
        views
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::timer::TimerService;
    use chrono::TimeZone;
    use std::sync::Arc;
    use std::time::Duration;
    use xapp_arbiter_common::{AgentId, RatioBounds};

    fn request(id: u64, agent: &str, at: i64) -> Request {
        Request {
            id: RequestId(id),
            agent_id: AgentId::from(agent),
            target: TargetKey::new("gnb-1", 0),
            bounds: RatioBounds::new(1, 5).unwrap(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                + chrono::Duration::seconds(at),
        }
    }

    fn entry(timers: &TimerService, request: Request) -> PendingEntry {
        let timer = timers.schedule(Duration::from_secs(5), async {});
        PendingEntry {
            fire_at: timer.fire_at(),
            request,
            timer,
        }
    }

    #[test]
    fn test_earlier_timestamp_wins() {
        let early = request(2, "xApp1", 0);
        let late = request(1, "xApp2", 2);

        let resolution = resolve(late.clone(), early.clone());
        assert_eq!(resolution.applied, early);
        assert_eq!(resolution.buffered, late);
    }

    #[test]
    fn test_tie_prefers_first_argument() {
        let a = request(1, "xApp1", 3);
        let b = request(2, "xApp2", 3);

        assert_eq!(resolve(a.clone(), b.clone()).applied, a);
        assert_eq!(resolve(b.clone(), a).applied, b);
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_replaces_same_key() {
        let timers = TimerService::new(Arc::new(TokioClock::new()));
        let mut buffer = PendingBuffer::new();

        let first = request(1, "xApp2", 0);
        let second = request(4, "xApp2", 3);

        assert!(matches!(buffer.insert(entry(&timers, first.clone())), BufferOutcome::Inserted));
        assert!(buffer.is_pending(&first));

        match buffer.insert(entry(&timers, second.clone())) {
            BufferOutcome::Replaced(old) => assert_eq!(old, first),
            other => panic!("expected replacement, got {:?}", other),
        }
        assert!(!buffer.is_pending(&first));
        assert!(buffer.is_pending(&second));
        assert_eq!(buffer.len(), 1);

        // A timer for the superseded request must not retire the new entry.
        assert!(buffer.retire(&first.pending_key(), first.id).is_none());
        assert_eq!(buffer.retire(&second.pending_key(), second.id), Some(second));
        assert!(buffer.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_drains_buffer() {
        let timers = TimerService::new(Arc::new(TokioClock::new()));
        let mut buffer = PendingBuffer::new();
        buffer.insert(entry(&timers, request(1, "xApp1", 0)));
        buffer.insert(entry(&timers, request(2, "xApp2", 0)));

        assert!(buffer.has_target(&TargetKey::new("gnb-1", 0)));
        assert_eq!(buffer.cancel_all().len(), 2);
        assert!(buffer.is_empty());
        assert!(!buffer.has_target(&TargetKey::new("gnb-1", 0)));
    }
}
