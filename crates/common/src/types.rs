use chrono::{DateTime, Utc};
use derive_more::Display as MoreDisplay;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ArbiterError, ArbiterResult};

/// Upper bound for a ratio request, in percent of the shared quota.
pub const MAX_RATIO: u8 = 100;

/// Identifier of a control agent (an xApp)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Validated constructor used at the engine boundary.
    pub fn parse(id: impl Into<String>) -> ArbiterResult<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ArbiterError::InvalidAgentId(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The managed entity a request targets: (E2 node, UE) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, MoreDisplay)]
#[display("{node_id}/ue{sub_entity_id}")]
pub struct TargetKey {
    pub node_id: String,
    pub sub_entity_id: u64,
}

impl TargetKey {
    pub fn new(node_id: impl Into<String>, sub_entity_id: u64) -> Self {
        Self {
            node_id: node_id.into(),
            sub_entity_id,
        }
    }
}

/// Min/max share of the allocatable quota. Always `min <= max <= 100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, MoreDisplay)]
#[serde(try_from = "RawRatioBounds")]
#[display("[{min}, {max}]")]
pub struct RatioBounds {
    min: u8,
    max: u8,
}

#[derive(Deserialize)]
struct RawRatioBounds {
    min: i32,
    max: i32,
}

impl TryFrom<RawRatioBounds> for RatioBounds {
    type Error = ArbiterError;

    fn try_from(raw: RawRatioBounds) -> ArbiterResult<Self> {
        Self::new(raw.min, raw.max)
    }
}

impl RatioBounds {
    pub fn new(min: i32, max: i32) -> ArbiterResult<Self> {
        let in_range = |v: i32| (0..=i32::from(MAX_RATIO)).contains(&v);
        if !in_range(min) || !in_range(max) || min > max {
            return Err(ArbiterError::InvalidRange { min, max });
        }
        Ok(Self {
            min: min as u8,
            max: max as u8,
        })
    }

    pub fn min(&self) -> u8 {
        self.min
    }

    pub fn max(&self) -> u8 {
        self.max
    }
}

/// Sequence number assigned by the request log, in arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A validated request that has not been logged yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub agent_id: AgentId,
    pub target: TargetKey,
    pub bounds: RatioBounds,
    pub timestamp: DateTime<Utc>,
}

impl Submission {
    pub fn new(
        agent_id: AgentId,
        target: TargetKey,
        min_ratio: i32,
        max_ratio: i32,
        timestamp: DateTime<Utc>,
    ) -> ArbiterResult<Self> {
        Ok(Self {
            agent_id,
            target,
            bounds: RatioBounds::new(min_ratio, max_ratio)?,
            timestamp,
        })
    }
}

/// A logged ratio request. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub agent_id: AgentId,
    pub target: TargetKey,
    pub bounds: RatioBounds,
    pub timestamp: DateTime<Utc>,
}

impl Request {
    pub fn from_submission(id: RequestId, submission: Submission) -> Self {
        Self {
            id,
            agent_id: submission.agent_id,
            target: submission.target,
            bounds: submission.bounds,
            timestamp: submission.timestamp,
        }
    }

    /// Key under which a buffered copy of this request is tracked.
    pub fn pending_key(&self) -> PendingKey {
        PendingKey {
            agent_id: self.agent_id.clone(),
            target: self.target.clone(),
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} from {} on {} ratio {}",
            self.id, self.agent_id, self.target, self.bounds
        )
    }
}

/// Stable identity of a buffered request: one pending entry per agent and target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, MoreDisplay)]
#[display("{agent_id}@{target}")]
pub struct PendingKey {
    pub agent_id: AgentId,
    pub target: TargetKey,
}

/// An onboarded agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub onboarded_at: DateTime<Utc>,
}
