//! Conflict detection over the request log
//!
//! Two requests conflict when they target the same (node, UE) pair, come from
//! different agents and ask for different ratio bounds. Every scan stops at the
//! first unsettled conflict it finds.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;
use xapp_arbiter_common::{AgentId, Request, RequestId, TargetKey};

use crate::registry::AgentRegistry;
use crate::request_log::RequestLog;

/// A pair of conflicting requests, in detection order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub first: Request,
    pub second: Request,
}

impl Conflict {
    pub fn target(&self) -> &TargetKey {
        &self.first.target
    }
}

/// The conflict predicate.
pub fn is_conflict(a: &Request, b: &Request) -> bool {
    a.target == b.target && a.agent_id != b.agent_id && a.bounds != b.bounds
}

/// Pairs that have already been arbitrated, stored order-independently.
#[derive(Debug, Default)]
pub struct SettledPairs {
    pairs: HashSet<(RequestId, RequestId)>,
}

impl SettledPairs {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(a: RequestId, b: RequestId) -> (RequestId, RequestId) {
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }

    /// Returns false if the pair was already settled.
    pub fn settle(&mut self, a: RequestId, b: RequestId) -> bool {
        self.pairs.insert(Self::key(a, b))
    }

    pub fn is_settled(&self, a: RequestId, b: RequestId) -> bool {
        self.pairs.contains(&Self::key(a, b))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

fn open_conflict(a: &Request, b: &Request, settled: &SettledPairs) -> bool {
    is_conflict(a, b) && !settled.is_settled(a.id, b.id)
}

/// Submission-time scan: compare every pair of requests inside the trailing
/// window (outer index ascending, inner index ascending) and return the first
/// unsettled conflict.
pub fn scan_window(
    log: &RequestLog,
    now: DateTime<Utc>,
    window: Duration,
    settled: &SettledPairs,
) -> Option<Conflict> {
    let recent = log.recent_within_window(now, window);
    debug!("Checking for conflicts among {} recent requests", recent.len());

    for (i, a) in recent.iter().enumerate() {
        for b in &recent[i + 1..] {
            if open_conflict(a, b, settled) {
                return Some(Conflict {
                    first: (*a).clone(),
                    second: (*b).clone(),
                });
            }
        }
    }
    None
}

/// Whether `request` has any unsettled conflicting counterpart in the window.
pub fn has_open_conflict(
    log: &RequestLog,
    request: &Request,
    now: DateTime<Utc>,
    window: Duration,
    settled: &SettledPairs,
) -> bool {
    log.recent_within_window(now, window)
        .into_iter()
        .any(|other| other.id != request.id && open_conflict(other, request, settled))
}

/// The first unsettled conflict between `request` and another request in the
/// window, in log order. The earlier-logged request of the pair comes first.
pub fn first_open_conflict_of(
    log: &RequestLog,
    request: &Request,
    now: DateTime<Utc>,
    window: Duration,
    settled: &SettledPairs,
) -> Option<Conflict> {
    log.recent_within_window(now, window)
        .into_iter()
        .find(|other| other.id != request.id && open_conflict(other, request, settled))
        .map(|other| {
            let (first, second) = if other.id < request.id {
                (other.clone(), request.clone())
            } else {
                (request.clone(), other.clone())
            };
            Conflict { first, second }
        })
}

/// Onboarding-time scan over the full log.
///
/// For every logged request not sent by the new agent, walk the other
/// onboarded agents (in onboarding order) and compare each of their requests
/// against it. The new agent's own requests never take part, so an agent that
/// has not submitted anything yet only surfaces conflicts between agents that
/// were already registered.
pub fn scan_onboarding(
    log: &RequestLog,
    registry: &AgentRegistry,
    new_agent: &AgentId,
    settled: &SettledPairs,
) -> Option<Conflict> {
    debug!("Checking for conflicts upon onboarding {}", new_agent);

    let others: Vec<&AgentId> = registry
        .agents()
        .iter()
        .map(|agent| &agent.id)
        .filter(|id| *id != new_agent)
        .collect();

    for candidate in log.iter().filter(|r| &r.agent_id != new_agent) {
        for agent in &others {
            for existing in log.by_agent(agent) {
                if open_conflict(existing, candidate, settled) {
                    return Some(Conflict {
                        first: existing.clone(),
                        second: candidate.clone(),
                    });
                }
            }
        }
    }
    None
}
