//! xApp arbiter: conflict detection and resolution for competing xApps
//!
//! Independent agents (xApps) ask a shared network controller to pin the PRB
//! ratio of a UE on an E2 node. This crate provides:
//! - An ordered request log and a registry of onboarded agents
//! - Windowed and onboarding-time conflict detection
//! - First-come-first-served arbitration with delayed application of losers
//! - Pluggable sinks (decision enactment) and notifiers (event mirrors)
//! - Scripted scenario replay

pub mod arbiter;
pub mod clock;
pub mod detector;
pub mod engine;
pub mod notifier;
pub mod registry;
pub mod request_log;
pub mod scenario;
pub mod sink;
pub mod timer;
pub mod tracing_setup;

// Re-exports
pub use arbiter::{PendingView, Resolution};
pub use clock::{Clock, ManualClock, TokioClock};
pub use engine::{ArbiterEngine, Disposition, EngineSnapshot, SubmitOutcome, TargetState};
pub use notifier::{BroadcastNotifier, FanoutNotifier, Notifier, RecordingNotifier, TracingNotifier};
pub use scenario::{Scenario, ScenarioRun, Step, StepReport};
pub use sink::{DecisionLogSink, FanoutSink, LoggingSink, RecordingSink, Sink};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
