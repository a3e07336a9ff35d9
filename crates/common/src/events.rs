//! State-change events mirrored to notifiers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::types::{AgentId, Request, TargetKey};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

impl EngineEvent {
    pub fn new(kind: EventKind, timestamp: DateTime<Utc>) -> Self {
        Self { timestamp, kind }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    AgentOnboarded {
        agent_id: AgentId,
    },
    ConflictDetected {
        first_agent: AgentId,
        second_agent: AgentId,
        target: TargetKey,
    },
    Applied {
        request: Request,
        /// True when this apply is the delayed execution of a buffered request.
        deferred: bool,
    },
    Buffered {
        request: Request,
        delay_ms: u64,
        fire_at: DateTime<Utc>,
    },
    /// Conflicts with a request still awaiting arbitration; a follow-up pass
    /// applies or buffers it.
    Held {
        request: Request,
    },
}

impl EventKind {
    /// The request carried by apply, buffer and hold events.
    pub fn request(&self) -> Option<&Request> {
        match self {
            Self::Applied { request, .. }
            | Self::Buffered { request, .. }
            | Self::Held { request } => Some(request),
            _ => None,
        }
    }
}
