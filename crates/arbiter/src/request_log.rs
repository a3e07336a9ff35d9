//! Append-only request log
//!
//! Insertion order is arrival order. Timestamps come from the agents and are
//! not guaranteed to be sorted, so readers never assume they are.

use chrono::{DateTime, Utc};
use std::time::Duration;
use xapp_arbiter_common::{AgentId, Request, RequestId, Submission, TargetKey};

#[derive(Debug, Default)]
pub struct RequestLog {
    entries: Vec<Request>,
}

impl RequestLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log a submission, assigning it the next request id.
    pub fn append(&mut self, submission: Submission) -> &Request {
        let id = RequestId(self.entries.len() as u64 + 1);
        self.entries.push(Request::from_submission(id, submission));
        &self.entries[self.entries.len() - 1]
    }

    /// Requests strictly within `window` of `now`, in arrival order.
    ///
    /// A request exactly `window` old is excluded. Requests stamped ahead of
    /// `now` (agent clock skew) are included.
    pub fn recent_within_window(&self, now: DateTime<Utc>, window: Duration) -> Vec<&Request> {
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
        self.entries
            .iter()
            .filter(|r| now.signed_duration_since(r.timestamp) < window)
            .collect()
    }

    /// Requests for `target`, in arrival order.
    pub fn matching_target(&self, target: &TargetKey) -> Vec<&Request> {
        self.entries.iter().filter(|r| &r.target == target).collect()
    }

    /// Requests submitted by `agent_id`, in arrival order.
    pub fn by_agent(&self, agent_id: &AgentId) -> Vec<&Request> {
        self.entries.iter().filter(|r| &r.agent_id == agent_id).collect()
    }

    pub fn get(&self, id: RequestId) -> Option<&Request> {
        let index = usize::try_from(id.0).ok()?.checked_sub(1)?;
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Request> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
