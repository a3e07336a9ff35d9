//! Arbiter engine - serializes submissions, detects conflicts and schedules
//! deferred applies
//!
//! The engine owns the request log, the agent registry, the settled-pair set
//! and the pending buffer behind a single async mutex. Every public operation
//! runs "append + detect + resolve" inside that critical section and collects
//! its side effects; sink and notifier calls are made only after the lock is
//! released. Deferred applies fire on their own tasks and take the same lock
//! before retiring their pending entry.
//!
//! Batches are queued to a single dispatcher task while the state lock is
//! still held, so they reach the sink and notifier in the order they were
//! arbitrated. The caller then waits for its own batch outside the lock. A
//! slow sink delays later batches (up to `sink_timeout_ms` per apply) but
//! never the critical section.
//!
//! A `Held` request is re-examined by a follow-up pass that runs as soon as
//! the submitting pass has released the lock. That pass arbitrates the held
//! request against its first open counterpart, or applies it directly if the
//! counterpart has left the window.
//!
//! Buffered decisions live in memory only: if the process exits before a
//! timer fires, that decision is lost.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use xapp_arbiter_common::{
    Agent, AgentId, ArbiterError, ArbiterResult, EngineConfig, EngineEvent, EventKind,
    NotifyError, PendingKey, Request, SinkError, Submission, SystemConfig, TargetKey,
};

use crate::arbiter::{self, BufferOutcome, PendingBuffer, PendingEntry, PendingView, Resolution};
use crate::clock::{Clock, TokioClock};
use crate::detector::{self, Conflict, SettledPairs};
use crate::notifier::Notifier;
use crate::registry::AgentRegistry;
use crate::request_log::RequestLog;
use crate::sink::{FanoutSink, Sink};
use crate::timer::TimerService;

/// What happened to a submitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Disposition {
    /// Sent to the sink immediately, either as a pass-through or as the winner
    /// of a conflict.
    Applied,
    /// Lost a conflict and waits for its deferred apply.
    Buffered,
    /// Conflicts with a request still awaiting arbitration; a follow-up pass
    /// applies or buffers it.
    Held,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub request: Request,
    pub disposition: Disposition,
    /// The conflict arbitrated during this call, which need not involve `request`.
    pub resolution: Option<Resolution>,
}

/// Per-target arbitration state as seen from outside the critical section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TargetState {
    Idle,
    Buffered,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub taken_at: DateTime<Utc>,
    pub agents: Vec<Agent>,
    pub logged_requests: usize,
    pub settled_conflicts: usize,
    pub pending: Vec<PendingView>,
}

enum Effect {
    Notify(EventKind),
    Apply { request: Request, deferred: bool },
}

/// Side effects collected under the lock, replayed after it is released.
struct Batch {
    at: DateTime<Utc>,
    effects: Vec<Effect>,
}

/// A batch waiting for the dispatcher, with the caller's completion signal.
struct Queued {
    batch: Batch,
    done: oneshot::Sender<()>,
}

impl Batch {
    fn new(at: DateTime<Utc>) -> Self {
        Self {
            at,
            effects: Vec::new(),
        }
    }

    fn notify(&mut self, kind: EventKind) {
        self.effects.push(Effect::Notify(kind));
    }

    fn apply(&mut self, request: Request, deferred: bool) {
        self.effects.push(Effect::Apply { request, deferred });
    }
}

#[derive(Default)]
struct EngineState {
    registry: AgentRegistry,
    log: RequestLog,
    settled: SettledPairs,
    pending: PendingBuffer,
    /// Deferred applies retired from the buffer but not yet dispatched.
    dispatching: usize,
    /// Held requests whose follow-up pass has not run yet.
    reviewing: usize,
    stopped: bool,
}

struct EngineInner {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    timers: TimerService,
    dispatch_tx: mpsc::UnboundedSender<Queued>,
    state: Mutex<EngineState>,
}

/// Replays batches against the sink and notifier, one at a time.
struct Dispatcher {
    sink: Arc<dyn Sink>,
    notifier: Arc<dyn Notifier>,
    sink_timeout: Duration,
    sink_timeout_ms: u64,
}

/// Conflict detection and resolution engine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ArbiterEngine {
    inner: Arc<EngineInner>,
}

impl ArbiterEngine {
    pub fn new(config: EngineConfig, sink: Arc<dyn Sink>, notifier: Arc<dyn Notifier>) -> Self {
        Self::with_clock(config, Arc::new(TokioClock::new()), sink, notifier)
    }

    /// Must be called from within a tokio runtime; the dispatcher runs as a
    /// task on it.
    pub fn with_clock(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn Sink>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        info!(
            "Arbiter engine started (window {}ms, buffer delay {}ms, onboarding scan {})",
            config.detection_window_ms, config.buffer_delay_ms, config.onboarding_scan
        );
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher {
            sink,
            notifier,
            sink_timeout: config.sink_timeout(),
            sink_timeout_ms: config.sink_timeout_ms,
        };
        tokio::spawn(dispatcher.run(dispatch_rx));

        Self {
            inner: Arc::new(EngineInner {
                config,
                timers: TimerService::new(Arc::clone(&clock)),
                clock,
                dispatch_tx,
                state: Mutex::new(EngineState::default()),
            }),
        }
    }

    /// Build an engine from file configuration. Decisions are always logged;
    /// `sink.decision_log` adds a JSON-lines decision file.
    pub fn from_system_config(config: &SystemConfig, notifier: Arc<dyn Notifier>) -> Self {
        let sink = FanoutSink::from_config(&config.sink);
        Self::new(config.engine.clone(), Arc::new(sink), notifier)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Current time on the engine's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// Onboard an agent. Returns true on first onboarding, false if it was
    /// already known.
    pub async fn onboard(&self, agent_id: impl Into<String>) -> ArbiterResult<bool> {
        let agent_id = AgentId::parse(agent_id)?;
        self.inner.onboard(agent_id).await
    }

    /// Submit a ratio request for `target`.
    ///
    /// Invalid ranges are rejected before anything is logged. Sink and
    /// notifier failures are logged and never returned here.
    pub async fn submit(
        &self,
        agent_id: impl Into<String>,
        target: TargetKey,
        min_ratio: i32,
        max_ratio: i32,
        timestamp: DateTime<Utc>,
    ) -> ArbiterResult<SubmitOutcome> {
        let agent_id = AgentId::parse(agent_id)?;
        let submission = Submission::new(agent_id, target, min_ratio, max_ratio, timestamp)?;
        self.inner.submit(submission).await
    }

    /// Submit a request stamped with the engine clock.
    pub async fn submit_now(
        &self,
        agent_id: impl Into<String>,
        target: TargetKey,
        min_ratio: i32,
        max_ratio: i32,
    ) -> ArbiterResult<SubmitOutcome> {
        let timestamp = self.now();
        self.submit(agent_id, target, min_ratio, max_ratio, timestamp).await
    }

    /// Cancel a buffered request before its timer fires.
    pub async fn cancel_pending(&self, key: &PendingKey) -> Option<Request> {
        let mut state = self.inner.state.lock().await;
        let cancelled = state.pending.cancel(key);
        if let Some(request) = &cancelled {
            info!("Cancelled buffered {}", request);
        }
        cancelled
    }

    pub async fn agents(&self) -> Vec<Agent> {
        self.inner.state.lock().await.registry.agents().to_vec()
    }

    pub async fn requests(&self) -> Vec<Request> {
        self.inner.state.lock().await.log.iter().cloned().collect()
    }

    pub async fn log_len(&self) -> usize {
        self.inner.state.lock().await.log.len()
    }

    pub async fn pending(&self) -> Vec<PendingView> {
        self.inner.state.lock().await.pending.views()
    }

    pub async fn target_state(&self, target: &TargetKey) -> TargetState {
        if self.inner.state.lock().await.pending.has_target(target) {
            TargetState::Buffered
        } else {
            TargetState::Idle
        }
    }

    pub async fn snapshot(&self) -> EngineSnapshot {
        let state = self.inner.state.lock().await;
        EngineSnapshot {
            taken_at: self.inner.clock.now(),
            agents: state.registry.agents().to_vec(),
            logged_requests: state.log.len(),
            settled_conflicts: state.settled.len(),
            pending: state.pending.views(),
        }
    }

    /// Wait until no buffered or held request is left and every deferred
    /// apply has been dispatched. Returns false on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            {
                let state = self.inner.state.lock().await;
                if state.pending.is_empty() && state.dispatching == 0 && state.reviewing == 0 {
                    return true;
                }
            }
            if start.elapsed() >= timeout {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Stop accepting calls and cancel every buffered request. The cancelled
    /// requests are returned and will never reach the sink.
    pub async fn shutdown(&self) -> Vec<Request> {
        let mut state = self.inner.state.lock().await;
        state.stopped = true;
        let dropped = state.pending.cancel_all();
        if dropped.is_empty() {
            info!("Arbiter engine stopped");
        } else {
            warn!(
                "Arbiter engine stopped with {} buffered decisions dropped",
                dropped.len()
            );
        }
        dropped
    }
}

impl EngineInner {
    #[instrument(name = "onboard", skip_all, fields(agent = %agent_id))]
    async fn onboard(self: &Arc<Self>, agent_id: AgentId) -> ArbiterResult<bool> {
        let done = {
            let mut state = self.state.lock().await;
            if state.stopped {
                return Err(ArbiterError::EngineStopped);
            }

            let now = self.clock.now();
            if !state.registry.onboard(&agent_id, now) {
                debug!("xApp {} already onboarded", agent_id);
                return Ok(false);
            }
            info!("xApp {} onboarded", agent_id);

            let mut batch = Batch::new(now);
            batch.notify(EventKind::AgentOnboarded {
                agent_id: agent_id.clone(),
            });

            if self.config.onboarding_scan {
                let found = detector::scan_onboarding(
                    &state.log,
                    &state.registry,
                    &agent_id,
                    &state.settled,
                );
                if let Some(conflict) = found {
                    self.arbitrate(&mut state, conflict, &mut batch);
                }
            }
            self.enqueue(batch)
        };

        Self::dispatched(done).await;
        Ok(true)
    }

    #[instrument(
        name = "submit",
        skip(self, submission),
        fields(agent = %submission.agent_id, target = %submission.target)
    )]
    async fn submit(self: &Arc<Self>, submission: Submission) -> ArbiterResult<SubmitOutcome> {
        let (done, outcome) = {
            let mut state = self.state.lock().await;
            if state.stopped {
                return Err(ArbiterError::EngineStopped);
            }

            let now = self.clock.now();
            let mut batch = Batch::new(now);

            if !state.registry.contains(&submission.agent_id) {
                if self.config.strict_onboarding {
                    return Err(ArbiterError::UnknownAgent(submission.agent_id.to_string()));
                }
                info!("Implicitly onboarding xApp {}", submission.agent_id);
                state.registry.onboard(&submission.agent_id, now);
                batch.notify(EventKind::AgentOnboarded {
                    agent_id: submission.agent_id.clone(),
                });
            }

            let request = state.log.append(submission).clone();
            info!("Logging request {} at {}", request, request.timestamp);

            let window = self.config.detection_window();
            let resolution = detector::scan_window(&state.log, now, window, &state.settled)
                .map(|conflict| self.arbitrate(&mut state, conflict, &mut batch));

            let disposition = match &resolution {
                Some(r) if r.applied.id == request.id => Disposition::Applied,
                Some(r) if r.buffered.id == request.id => Disposition::Buffered,
                _ if detector::has_open_conflict(
                    &state.log,
                    &request,
                    now,
                    window,
                    &state.settled,
                ) =>
                {
                    self.hold(&mut state, request.clone(), &mut batch);
                    Disposition::Held
                }
                _ => {
                    debug!("No conflict for {}, applying directly", request);
                    batch.apply(request.clone(), false);
                    Disposition::Applied
                }
            };

            (
                self.enqueue(batch),
                SubmitOutcome {
                    request,
                    disposition,
                    resolution,
                },
            )
        };

        Self::dispatched(done).await;
        Ok(outcome)
    }

    /// Resolve one conflict: apply the earlier request now, buffer the other.
    fn arbitrate(
        self: &Arc<Self>,
        state: &mut EngineState,
        conflict: Conflict,
        batch: &mut Batch,
    ) -> Resolution {
        info!(
            "Conflict detected between {} ({}) and {} ({}) on {}",
            conflict.first.agent_id,
            conflict.first.id,
            conflict.second.agent_id,
            conflict.second.id,
            conflict.target()
        );
        state.settled.settle(conflict.first.id, conflict.second.id);
        batch.notify(EventKind::ConflictDetected {
            first_agent: conflict.first.agent_id.clone(),
            second_agent: conflict.second.agent_id.clone(),
            target: conflict.target().clone(),
        });

        let resolution = arbiter::resolve(conflict.first, conflict.second);
        batch.apply(resolution.applied.clone(), false);
        self.defer(state, resolution.buffered.clone(), batch);
        resolution
    }

    fn defer(self: &Arc<Self>, state: &mut EngineState, request: Request, batch: &mut Batch) {
        if state.pending.is_pending(&request) {
            debug!("{} is already buffered, keeping its timer", request);
            return;
        }

        let delay = self.config.buffer_delay();
        let engine = Arc::downgrade(self);
        let fired = request.clone();
        let timer = self.timers.schedule(delay, async move {
            if let Some(engine) = engine.upgrade() {
                engine.fire_deferred(fired).await;
            }
        });

        let fire_at = timer.fire_at();
        info!("Buffering {} for execution at {}", request, fire_at);
        if let BufferOutcome::Replaced(previous) = state.pending.insert(PendingEntry {
            request: request.clone(),
            fire_at,
            timer,
        }) {
            debug!("Replaced buffered {}", previous.id);
        }

        batch.notify(EventKind::Buffered {
            request,
            delay_ms: self.config.buffer_delay_ms,
            fire_at,
        });
    }

    fn hold(self: &Arc<Self>, state: &mut EngineState, request: Request, batch: &mut Batch) {
        info!("Holding {} until its conflict is arbitrated", request);
        state.reviewing += 1;

        let engine = Arc::downgrade(self);
        let held = request.clone();
        self.timers.schedule(Duration::ZERO, async move {
            if let Some(engine) = engine.upgrade() {
                engine.review_held(held).await;
            }
        });

        batch.notify(EventKind::Held { request });
    }

    /// Follow-up pass for a held request.
    async fn review_held(self: Arc<Self>, request: Request) {
        let done = {
            let mut state = self.state.lock().await;
            state.reviewing -= 1;
            if state.stopped {
                warn!("Engine stopped before held {} was arbitrated", request);
                return;
            }

            let now = self.clock.now();
            let mut batch = Batch::new(now);
            let found = detector::first_open_conflict_of(
                &state.log,
                &request,
                now,
                self.config.detection_window(),
                &state.settled,
            );
            match found {
                Some(conflict) => {
                    self.arbitrate(&mut state, conflict, &mut batch);
                }
                None => {
                    debug!("Conflict partner of held {} left the window", request);
                    batch.apply(request, false);
                }
            }
            state.dispatching += 1;
            self.enqueue(batch)
        };

        Self::dispatched(done).await;
        self.state.lock().await.dispatching -= 1;
    }

    async fn fire_deferred(self: Arc<Self>, request: Request) {
        let done = {
            let mut state = self.state.lock().await;
            if state.stopped {
                return;
            }
            let Some(request) = state.pending.retire(&request.pending_key(), request.id) else {
                return;
            };
            info!("Executing buffered {} after delay", request);
            state.dispatching += 1;

            let mut batch = Batch::new(self.clock.now());
            batch.apply(request, true);
            self.enqueue(batch)
        };

        Self::dispatched(done).await;
        self.state.lock().await.dispatching -= 1;
    }

    /// Queue a batch behind every batch arbitrated before it. Call with the
    /// state lock held.
    fn enqueue(&self, batch: Batch) -> oneshot::Receiver<()> {
        let (done, dispatched) = oneshot::channel();
        if self.dispatch_tx.send(Queued { batch, done }).is_err() {
            warn!("Dispatcher is gone, dropping side effects");
        }
        dispatched
    }

    async fn dispatched(done: oneshot::Receiver<()>) {
        if done.await.is_err() {
            debug!("Batch dropped before dispatch");
        }
    }
}

impl Dispatcher {
    async fn run(self, mut queue: mpsc::UnboundedReceiver<Queued>) {
        while let Some(Queued { batch, done }) = queue.recv().await {
            self.dispatch(batch).await;
            let _ = done.send(());
        }
        debug!("Dispatcher stopped");
    }

    async fn dispatch(&self, batch: Batch) {
        let Batch { at, effects } = batch;
        for effect in effects {
            match effect {
                Effect::Notify(kind) => self.emit(kind, at),
                Effect::Apply { request, deferred } => {
                    self.apply_to_sink(&request).await;
                    self.emit(EventKind::Applied { request, deferred }, at);
                }
            }
        }
    }

    async fn apply_to_sink(&self, request: &Request) {
        let result = match tokio::time::timeout(self.sink_timeout, self.sink.apply(request)).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::Timeout {
                millis: self.sink_timeout_ms,
            }),
        };
        if let Err(e) = result {
            warn!("Sink failed to apply {}: {}", request, e);
        }
    }

    fn emit(&self, kind: EventKind, at: DateTime<Utc>) {
        let event = EngineEvent::new(kind, at);
        match self.notifier.notify(&event) {
            Ok(()) => {}
            Err(NotifyError::NoSubscribers) => {
                debug!("No subscribers for {} event", event.kind)
            }
            Err(e) => warn!("Failed to notify {} event: {}", event.kind, e),
        }
    }
}
