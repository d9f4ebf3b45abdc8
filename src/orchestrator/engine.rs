//! The orchestration engine: owns sessions and drives them through their
//! phase graphs.
//!
//! Each session has its own async lock, so `advance` and
//! `resolve_checkpoint` calls on one session run one at a time while other
//! sessions proceed independently. Phase context is only written back to the
//! context store after a phase run succeeds; a failed or cancelled run leaves
//! the session exactly as it was.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use journey_common::{
    Artifact, ArtifactId, CheckpointDecision, DecisionKind, DecisionRequest, ErrorCode, EventKind,
    JourneyBrief, Mode, PhaseId, SessionId, SessionOutcome, UserInput,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::agents::AgentRegistry;
use crate::channel::{DEFAULT_RETAINED_EVENTS, EventChannel, Subscription};
use crate::context::store::{ContextStore, MemoryContextStore, Snapshot, Versioned};
use crate::context::{CHECKPOINT_REJECTED, PhaseContext, TransitionRecord};
use crate::errors::{ConfigurationError, EngineError, ExecutorError, PersistenceError, ValidationError};
use crate::executor::{ExecutorConfig, PhaseExecutor, PhaseInvocation, PhaseWork, PromptVariant};
use crate::gates::PendingCheckpoint;
use crate::orchestrator::evaluator::{evaluate, evaluate_excluding};
use crate::orchestrator::session::{
    SessionHandle, SessionSnapshot, SessionState, SessionStatus, SessionSummary,
};
use crate::persistence::{self, FileSessionStore, RECORD_FORMAT, SessionRecord};
use crate::phase::{AgentDefinition, Transition};
use crate::producer::WorkProducer;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub executor: ExecutorConfig,
    /// Phases one `advance` call may run before returning.
    pub max_steps_per_advance: usize,
    pub retained_events: usize,
    /// Save the session record after every committed step.
    pub autosave: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            executor: ExecutorConfig::default(),
            max_steps_per_advance: 32,
            retained_events: DEFAULT_RETAINED_EVENTS,
            autosave: true,
        }
    }
}

/// Where an `advance` or `resolve_checkpoint` call stopped.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum AdvanceOutcome {
    /// The terminal phase was reached.
    Completed { phase: PhaseId },
    /// No transition applies; the next input re-runs this phase.
    Stayed { phase: PhaseId },
    CheckpointPending { checkpoint: PendingCheckpoint },
    Amended { phase: PhaseId },
    /// Phase work failed; the session is unchanged and can be advanced again.
    Failed {
        phase: PhaseId,
        message: String,
        attempts: u32,
    },
    Cancelled { phase: PhaseId },
    StepLimit { phase: PhaseId },
}

impl AdvanceOutcome {
    pub fn phase(&self) -> &PhaseId {
        match self {
            AdvanceOutcome::CheckpointPending { checkpoint } => &checkpoint.from,
            AdvanceOutcome::Completed { phase }
            | AdvanceOutcome::Stayed { phase }
            | AdvanceOutcome::Amended { phase }
            | AdvanceOutcome::Failed { phase, .. }
            | AdvanceOutcome::Cancelled { phase }
            | AdvanceOutcome::StepLimit { phase } => phase,
        }
    }
}

/// State and context as of the same commit.
#[derive(Clone)]
struct Published {
    state: SessionState,
    context: Versioned<PhaseContext>,
}

struct SessionSlot {
    def: Arc<AgentDefinition>,
    events: Arc<EventChannel>,
    state: tokio::sync::Mutex<SessionState>,
    /// Last committed step, readable while the next one runs.
    view: Mutex<Published>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl SessionSlot {
    fn new(
        def: Arc<AgentDefinition>,
        events: Arc<EventChannel>,
        state: SessionState,
        context: Versioned<PhaseContext>,
    ) -> Self {
        Self {
            def,
            events,
            view: Mutex::new(Published {
                state: state.clone(),
                context,
            }),
            state: tokio::sync::Mutex::new(state),
            cancel: Mutex::new(None),
        }
    }

    fn publish(&self, state: &SessionState, context: Versioned<PhaseContext>) {
        *lock(&self.view) = Published {
            state: state.clone(),
            context,
        };
    }

    /// Republishes `state` alongside the context already published.
    fn publish_state(&self, state: &SessionState) {
        lock(&self.view).state = state.clone();
    }

    fn view(&self) -> Published {
        lock(&self.view).clone()
    }

    fn state_view(&self) -> SessionState {
        lock(&self.view).state.clone()
    }

    fn arm(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *lock(&self.cancel) = Some(token.clone());
        token
    }

    fn disarm(&self) {
        lock(&self.cancel).take();
    }

    fn trip(&self) -> bool {
        match lock(&self.cancel).as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct Engine {
    registry: AgentRegistry,
    executor: PhaseExecutor,
    store: Arc<dyn ContextStore>,
    files: Option<FileSessionStore>,
    sessions: DashMap<SessionId, Arc<SessionSlot>>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(registry: AgentRegistry, producer: Arc<dyn WorkProducer>, config: EngineConfig) -> Self {
        Self {
            registry,
            executor: PhaseExecutor::new(producer, config.executor.clone()),
            store: Arc::new(MemoryContextStore::new()),
            files: None,
            sessions: DashMap::new(),
            config,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ContextStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_persistence(mut self, files: FileSessionStore) -> Self {
        self.files = Some(files);
        self
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn persistence(&self) -> Option<&FileSessionStore> {
        self.files.as_ref()
    }

    fn slot(&self, id: &SessionId) -> Result<Arc<SessionSlot>, EngineError> {
        self.sessions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(EngineError::SessionNotFound(*id))
    }

    pub async fn create_session(
        &self,
        mode: Mode,
        brief: JourneyBrief,
    ) -> Result<SessionHandle, EngineError> {
        let def = self.registry.get(mode)?;
        let id = SessionId::new();
        let initial = def.initial().clone();
        self.store.create(id, PhaseContext::new(&initial), 1)?;
        let context = self.store.get(&id)?;

        let events = Arc::new(EventChannel::new(id, self.config.retained_events));
        let state = SessionState::new(id, mode, brief, initial.clone());
        let slot = Arc::new(SessionSlot::new(def, events, state, context));
        slot.events.emit(EventKind::SessionStarted {
            mode,
            phase: initial.clone(),
        });
        self.sessions.insert(id, Arc::clone(&slot));
        tracing::info!(session_id = %id, %mode, phase = %initial, "session started");

        let mut state = slot.state.lock().await;
        self.autosave(&slot, &mut state)?;
        Ok(SessionHandle {
            session_id: id,
            phase: initial,
        })
    }

    /// Runs phases from the current one until the session stays, hits a
    /// checkpoint, fails, completes or reaches the step limit.
    pub async fn advance(&self, id: SessionId, input: UserInput) -> Result<AdvanceOutcome, EngineError> {
        let slot = self.slot(&id)?;
        let mut state = slot.state.lock().await;
        ensure_active(&state)?;
        if let Some(pending) = state.gate.pending() {
            return Err(ValidationError::DecisionRequired {
                checkpoint_id: pending.checkpoint_id.clone(),
            }
            .into());
        }

        let cancel = slot.arm();
        let outcome = self.drive(&slot, &mut state, Some(input), &cancel).await;
        slot.disarm();
        outcome
    }

    pub async fn resolve_checkpoint(
        &self,
        id: SessionId,
        request: DecisionRequest,
    ) -> Result<AdvanceOutcome, EngineError> {
        let slot = self.slot(&id)?;
        let mut state = slot.state.lock().await;
        ensure_active(&state)?;
        state.gate.check(&request.checkpoint_id)?;
        let decision = request.decision()?;

        let cancel = slot.arm();
        let outcome = self
            .apply_decision(&slot, &mut state, &request.checkpoint_id, decision, &cancel)
            .await;
        slot.disarm();
        outcome
    }

    /// Trips the running step's cancellation token. Returns false when no
    /// step was running.
    pub fn cancel(&self, id: SessionId) -> Result<bool, EngineError> {
        let slot = self.slot(&id)?;
        let tripped = slot.trip();
        if tripped {
            tracing::info!(session_id = %id, "cancellation requested");
        }
        Ok(tripped)
    }

    pub async fn abandon(&self, id: SessionId) -> Result<(), EngineError> {
        let slot = self.slot(&id)?;
        slot.trip();
        let mut state = slot.state.lock().await;
        ensure_active(&state)?;
        self.finish(&slot, &mut state, SessionStatus::Abandoned)
    }

    pub fn subscribe(&self, id: SessionId, after: u64) -> Result<Subscription, EngineError> {
        Ok(self.slot(&id)?.events.subscribe(after)?)
    }

    pub fn snapshot(&self, id: SessionId) -> Result<SessionSnapshot, EngineError> {
        let slot = self.slot(&id)?;
        let Published { state, context } = slot.view();
        Ok(SessionSnapshot {
            session_id: state.id,
            mode: state.mode,
            brief: state.brief,
            current_phase: state.current_phase,
            status: state.status,
            pending_checkpoint: state.gate.pending().cloned(),
            checkpoints: state.gate.history().to_vec(),
            context: context.value,
            context_version: context.version,
            last_sequence: slot.events.last_sequence(),
            created_at: state.created_at,
            updated_at: state.updated_at,
        })
    }

    /// Live sessions, most recently updated first.
    pub fn sessions(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .sessions
            .iter()
            .map(|entry| SessionSummary::from(&entry.value().state_view()))
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summaries
    }

    pub fn save(&self, id: SessionId) -> Result<PathBuf, EngineError> {
        let files = self.files.as_ref().ok_or(PersistenceError::Disabled)?;
        let slot = self.slot(&id)?;
        let view = slot.view();
        let record = self.record(&slot, &view.state, &view.context)?;
        Ok(files.save(&record)?)
    }

    /// Loads a saved session and registers it. Event numbering continues from
    /// the saved sequence.
    pub fn load(&self, path: &Path) -> Result<SessionId, EngineError> {
        let record = persistence::read_record(path)?;
        let def = self.registry.get(record.mode)?;
        if !def.contains(&record.current_phase) {
            return Err(ConfigurationError::UnknownPhase {
                mode: record.mode,
                phase: record.current_phase,
            }
            .into());
        }

        let id = record.id;
        let entry = match self.sessions.entry(id) {
            Entry::Occupied(_) => return Err(PersistenceError::AlreadyLoaded(id).into()),
            Entry::Vacant(entry) => entry,
        };
        let context = record.versioned_context();
        self.store.create(id, context.value.clone(), context.version)?;

        let events = Arc::new(EventChannel::resume(
            id,
            self.config.retained_events,
            record.last_sequence,
            record.events.clone(),
        ));
        let state = record.state();
        if state.status.is_active() {
            events.emit(EventKind::SessionResumed {
                phase: state.current_phase.clone(),
            });
        }
        tracing::info!(
            session_id = %id,
            phase = %state.current_phase,
            status = %state.status,
            path = %path.display(),
            "session loaded"
        );
        entry.insert(Arc::new(SessionSlot::new(def, events, state, context)));
        Ok(id)
    }

    async fn drive(
        &self,
        slot: &SessionSlot,
        state: &mut SessionState,
        mut input: Option<UserInput>,
        cancel: &CancellationToken,
    ) -> Result<AdvanceOutcome, EngineError> {
        let def = Arc::clone(&slot.def);
        let mut steps = 0;
        loop {
            if &state.current_phase == def.terminal() {
                self.finish(slot, state, SessionStatus::Completed)?;
                return Ok(AdvanceOutcome::Completed {
                    phase: state.current_phase.clone(),
                });
            }
            if steps == self.config.max_steps_per_advance {
                tracing::warn!(
                    session_id = %state.id,
                    phase = %state.current_phase,
                    steps,
                    "step limit reached"
                );
                return Ok(AdvanceOutcome::StepLimit {
                    phase: state.current_phase.clone(),
                });
            }
            steps += 1;

            let phase = state.current_phase.clone();
            let current = self.store.get(&state.id)?;
            let step_input = input.take().unwrap_or_else(UserInput::continuation);
            let invocation = PhaseInvocation {
                session_id: state.id,
                def: &def,
                phase: &phase,
                brief: &state.brief,
                input: &step_input,
                context: &current.value,
                variant: PromptVariant::select(&phase, &current.value),
            };
            let work = match self.executor.execute(invocation, &slot.events, cancel).await {
                Ok(work) => work,
                Err(err) => return Ok(step_failed(slot, state.id, &phase, err)),
            };

            let mut working = current.value;
            let added = apply_work(&mut working, &phase, work);
            let proposal = evaluate(&def, &phase, &working).cloned();
            if let Some(outcome) =
                self.settle(slot, state, working, current.version, added, proposal)?
            {
                return Ok(outcome);
            }
        }
    }

    /// Commits a step's working context and acts on the proposed transition.
    /// Returns `None` when the session moved and the loop should continue.
    fn settle(
        &self,
        slot: &SessionSlot,
        state: &mut SessionState,
        mut working: PhaseContext,
        version: u64,
        added: Vec<(ArtifactId, Artifact)>,
        proposal: Option<Transition>,
    ) -> Result<Option<AdvanceOutcome>, EngineError> {
        let phase = state.current_phase.clone();
        let Some(transition) = proposal else {
            self.commit(state, working, version)?;
            announce(slot, &phase, added);
            self.autosave(slot, state)?;
            tracing::debug!(session_id = %state.id, %phase, "no transition, staying");
            return Ok(Some(AdvanceOutcome::Stayed { phase }));
        };

        let checkpoint = slot
            .def
            .checkpoint_for(&transition.from, &transition.to)
            .cloned();
        if let Some(spec) = checkpoint.as_ref().filter(|spec| spec.blocking) {
            let pending = PendingCheckpoint::new(spec, &transition);
            self.commit(state, working, version)?;
            announce(slot, &phase, added);
            state.gate.raise(pending.clone())?;
            slot.events.emit(checkpoint_required(&pending));
            tracing::info!(
                session_id = %state.id,
                checkpoint = %pending.spec.id,
                from = %pending.from,
                to = %pending.to,
                "awaiting checkpoint decision"
            );
            self.autosave(slot, state)?;
            return Ok(Some(AdvanceOutcome::CheckpointPending { checkpoint: pending }));
        }

        let record = working.record_transition(&transition);
        self.commit(state, working, version)?;
        announce(slot, &phase, added);
        if let Some(spec) = checkpoint {
            slot.events
                .emit(checkpoint_required(&PendingCheckpoint::new(&spec, &transition)));
        }
        self.enter(slot, state, record);
        self.autosave(slot, state)?;
        Ok(None)
    }

    async fn apply_decision(
        &self,
        slot: &SessionSlot,
        state: &mut SessionState,
        checkpoint_id: &str,
        decision: CheckpointDecision,
        cancel: &CancellationToken,
    ) -> Result<AdvanceOutcome, EngineError> {
        let def = Arc::clone(&slot.def);
        let pending = state.gate.check(checkpoint_id)?.clone();
        let current = self.store.get(&state.id)?;
        let mut working = current.value;

        match decision {
            CheckpointDecision::Approve => {
                let transition = proposed(&def, &pending)?;
                let record = working.record_transition(transition);
                self.commit(state, working, current.version)?;
                self.resolve_gate(slot, state, checkpoint_id, DecisionKind::Approve)?;
                self.enter(slot, state, record);
                self.autosave(slot, state)?;
                self.drive(slot, state, None, cancel).await
            }
            CheckpointDecision::Modify { amendments } => {
                working.apply_amendments(&amendments)?;
                self.commit(state, working, current.version)?;
                self.resolve_gate(slot, state, checkpoint_id, DecisionKind::Modify)?;
                for amendment in amendments {
                    slot.events.emit(EventKind::ArtifactReplaced {
                        artifact_id: amendment.artifact_id,
                        artifact: amendment.artifact,
                    });
                }
                self.autosave(slot, state)?;
                Ok(AdvanceOutcome::Amended {
                    phase: state.current_phase.clone(),
                })
            }
            CheckpointDecision::Reject { reason } => {
                let rejected = proposed(&def, &pending)?;
                working.set_backward_trigger(CHECKPOINT_REJECTED, Some(reason));
                let version = self.commit(state, working.clone(), current.version)?;
                self.resolve_gate(slot, state, checkpoint_id, DecisionKind::Reject)?;

                let proposal =
                    evaluate_excluding(&def, &state.current_phase, &working, Some(rejected)).cloned();
                match self.settle(slot, state, working, version, Vec::new(), proposal)? {
                    Some(outcome) => Ok(outcome),
                    None => self.drive(slot, state, None, cancel).await,
                }
            }
        }
    }

    fn commit(
        &self,
        state: &mut SessionState,
        working: PhaseContext,
        expected_version: u64,
    ) -> Result<u64, EngineError> {
        let version = self.store.put(&state.id, working, expected_version)?;
        state.touch();
        Ok(version)
    }

    fn resolve_gate(
        &self,
        slot: &SessionSlot,
        state: &mut SessionState,
        checkpoint_id: &str,
        decision: DecisionKind,
    ) -> Result<(), EngineError> {
        let resolved = state.gate.resolve(checkpoint_id, decision)?;
        slot.events.emit(EventKind::CheckpointResolved {
            checkpoint_id: resolved.checkpoint_id,
            decision,
        });
        tracing::info!(session_id = %state.id, checkpoint = %resolved.spec.id, %decision, "checkpoint resolved");
        Ok(())
    }

    fn enter(&self, slot: &SessionSlot, state: &mut SessionState, record: TransitionRecord) {
        tracing::info!(
            session_id = %state.id,
            from = %record.from_phase,
            to = %record.to_phase,
            backward = record.is_backward,
            reason = %record.reason,
            "phase changed"
        );
        state.current_phase = record.to_phase.clone();
        slot.events.emit(EventKind::PhaseChanged {
            from: record.from_phase,
            to: record.to_phase,
            is_backward: record.is_backward,
            reason: record.reason,
        });
    }

    fn finish(
        &self,
        slot: &SessionSlot,
        state: &mut SessionState,
        status: SessionStatus,
    ) -> Result<(), EngineError> {
        let Some(outcome) = status.outcome() else {
            return Ok(());
        };
        let summary = self
            .store
            .get(&state.id)
            .map(|ctx| summarize(&ctx.value))
            .unwrap_or_default();
        state.status = status;
        state.touch();
        slot.events.emit(EventKind::SessionEnded {
            phase: state.current_phase.clone(),
            outcome,
            summary,
        });
        tracing::info!(session_id = %state.id, status = %state.status, "session ended");
        self.autosave(slot, state)
    }

    fn record(
        &self,
        slot: &SessionSlot,
        state: &SessionState,
        context: &Versioned<PhaseContext>,
    ) -> Result<SessionRecord, EngineError> {
        Ok(SessionRecord {
            format_version: RECORD_FORMAT,
            id: state.id,
            mode: state.mode,
            brief: state.brief.clone(),
            current_phase: state.current_phase.clone(),
            status: state.status.clone(),
            gate: state.gate.clone(),
            snapshot: Snapshot::seal(&state.id, context)?,
            last_sequence: slot.events.last_sequence(),
            events: slot.events.retained(),
            created_at: state.created_at,
            updated_at: state.updated_at,
        })
    }

    /// Publishes the committed state and, when enabled, writes it to disk. A
    /// write failure ends the session as failed.
    fn autosave(&self, slot: &SessionSlot, state: &mut SessionState) -> Result<(), EngineError> {
        let context = self.store.get(&state.id)?;
        slot.publish(state, context.clone());
        let Some(files) = self.files.as_ref().filter(|_| self.config.autosave) else {
            return Ok(());
        };
        let record = self.record(slot, state, &context)?;
        match files.save(&record) {
            Ok(_) => Ok(()),
            Err(err) => Err(self.fail(slot, state, err)),
        }
    }

    fn fail(&self, slot: &SessionSlot, state: &mut SessionState, err: PersistenceError) -> EngineError {
        tracing::error!(session_id = %state.id, error = %err, "session persistence failed");
        state.status = SessionStatus::Failed {
            reason: err.to_string(),
        };
        state.touch();
        slot.events.emit(EventKind::Error {
            code: ErrorCode::Persistence,
            message: err.to_string(),
            recoverable: false,
        });
        slot.events.emit(EventKind::SessionEnded {
            phase: state.current_phase.clone(),
            outcome: SessionOutcome::Failed,
            summary: "session could not be saved".to_string(),
        });
        slot.publish_state(state);
        EngineError::Persistence(err)
    }
}

fn ensure_active(state: &SessionState) -> Result<(), EngineError> {
    if state.status.is_active() {
        Ok(())
    } else {
        Err(EngineError::SessionTerminated {
            id: state.id,
            status: state.status.to_string(),
        })
    }
}

fn proposed<'a>(
    def: &'a AgentDefinition,
    pending: &PendingCheckpoint,
) -> Result<&'a Transition, EngineError> {
    def.find_transition(&pending.from, &pending.to, &pending.reason)
        .ok_or_else(|| EngineError::MissingTransition {
            mode: def.mode(),
            from: pending.from.clone(),
            to: pending.to.clone(),
        })
}

fn apply_work(ctx: &mut PhaseContext, phase: &PhaseId, work: PhaseWork) -> Vec<(ArtifactId, Artifact)> {
    let added = work
        .artifacts
        .into_iter()
        .map(|artifact| (ctx.add_artifact(phase, artifact.clone()), artifact))
        .collect();
    for milestone in work.milestones {
        ctx.reach_milestone(phase, &milestone.name, milestone.detail);
    }
    for flag in work.flags {
        ctx.raise_flag(&flag.name, flag.detail);
    }
    added
}

fn announce(slot: &SessionSlot, phase: &PhaseId, added: Vec<(ArtifactId, Artifact)>) {
    for (artifact_id, artifact) in added {
        slot.events.emit(EventKind::ArtifactAdded {
            phase: phase.clone(),
            artifact_id,
            artifact,
        });
    }
}

fn checkpoint_required(pending: &PendingCheckpoint) -> EventKind {
    EventKind::CheckpointRequired {
        checkpoint_id: pending.checkpoint_id.clone(),
        name: pending.spec.id.clone(),
        message: pending.spec.message.clone(),
        options: pending.spec.options.clone(),
        from: pending.from.clone(),
        to: pending.to.clone(),
        blocking: pending.spec.blocking,
    }
}

fn step_failed(slot: &SessionSlot, id: SessionId, phase: &PhaseId, err: ExecutorError) -> AdvanceOutcome {
    let message = err.to_string();
    tracing::warn!(session_id = %id, %phase, error = %message, "phase step failed");
    let (code, attempts) = match &err {
        ExecutorError::Cancelled => (ErrorCode::Cancelled, 0),
        ExecutorError::Exhausted { attempts, .. } => (ErrorCode::WorkProducer, *attempts),
        ExecutorError::Failed(_) => (ErrorCode::WorkProducer, 1),
    };
    slot.events.emit(EventKind::Error {
        code,
        message: message.clone(),
        recoverable: true,
    });
    match err {
        ExecutorError::Cancelled => AdvanceOutcome::Cancelled {
            phase: phase.clone(),
        },
        _ => AdvanceOutcome::Failed {
            phase: phase.clone(),
            message,
            attempts,
        },
    }
}

fn summarize(ctx: &PhaseContext) -> String {
    format!(
        "{} artifacts over {} phase visits",
        ctx.artifacts().len(),
        ctx.total_visits()
    )
}
