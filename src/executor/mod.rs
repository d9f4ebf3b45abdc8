//! Runs one phase visit against a work producer.
//!
//! Progress is streamed to the session's event channel as it arrives.
//! Artifacts, milestones and flags are buffered and handed back only when the
//! run succeeds; a failed or cancelled run leaves nothing behind.

pub mod prompt;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use journey_common::{
    Artifact, ErrorCode, EventKind, JourneyBrief, PhaseId, SessionId, UserInput,
};
use tokio_util::sync::CancellationToken;

use crate::channel::EventChannel;
use crate::context::PhaseContext;
use crate::errors::{ExecutorError, ProducerError};
use crate::phase::{AgentDefinition, PhaseProgram};
use crate::producer::{GenerateRequest, ProducerOutput, WorkProducer};
use crate::signals::NamedSignal;

pub use prompt::PromptVariant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retrying after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub retry: RetryPolicy,
    pub attempt_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            attempt_timeout: Duration::from_secs(300),
        }
    }
}

pub struct PhaseInvocation<'a> {
    pub session_id: SessionId,
    pub def: &'a AgentDefinition,
    pub phase: &'a PhaseId,
    pub brief: &'a JourneyBrief,
    pub input: &'a UserInput,
    pub context: &'a PhaseContext,
    pub variant: PromptVariant,
}

/// Buffered output of a successful phase run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseWork {
    pub artifacts: Vec<Artifact>,
    pub milestones: Vec<NamedSignal>,
    pub flags: Vec<NamedSignal>,
    pub attempts: u32,
}

enum AttemptFailure {
    Producer(ProducerError),
    Cancelled,
}

pub struct PhaseExecutor {
    producer: Arc<dyn WorkProducer>,
    config: ExecutorConfig,
}

impl PhaseExecutor {
    pub fn new(producer: Arc<dyn WorkProducer>, config: ExecutorConfig) -> Self {
        Self { producer, config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn request_for(&self, inv: &PhaseInvocation<'_>) -> GenerateRequest {
        let tools = prompt::tools_for(inv.def.program(inv.phase));
        let text = prompt::render(
            &prompt::PromptParts {
                def: inv.def,
                phase: inv.phase,
                brief: inv.brief,
                input: inv.input,
                context: inv.context,
                variant: &inv.variant,
            },
            &tools,
        );
        GenerateRequest {
            session_id: inv.session_id,
            phase: inv.phase.clone(),
            variant: inv.variant.clone(),
            system: prompt::render_system(inv.def),
            prompt: text,
            tools,
        }
    }

    pub async fn execute(
        &self,
        inv: PhaseInvocation<'_>,
        events: &EventChannel,
        cancel: &CancellationToken,
    ) -> Result<PhaseWork, ExecutorError> {
        let request = self.request_for(&inv);
        let program = inv.def.program(inv.phase);
        let retry = &self.config.retry;
        let max_attempts = retry.max_attempts.max(1);

        let mut attempt = 0;
        loop {
            attempt += 1;
            tracing::debug!(
                session_id = %inv.session_id,
                phase = %inv.phase,
                attempt,
                reentry = inv.variant.is_reentry(),
                "running phase"
            );
            match self
                .attempt(request.clone(), program, inv.phase, events, cancel)
                .await
            {
                Ok(mut work) => {
                    work.attempts = attempt;
                    return Ok(work);
                }
                Err(AttemptFailure::Cancelled) => return Err(ExecutorError::Cancelled),
                Err(AttemptFailure::Producer(err)) if !err.is_transient() => {
                    tracing::warn!(phase = %inv.phase, error = %err, "phase work failed");
                    return Err(ExecutorError::Failed(err));
                }
                Err(AttemptFailure::Producer(err)) if attempt >= max_attempts => {
                    tracing::warn!(phase = %inv.phase, attempts = attempt, error = %err, "retries exhausted");
                    return Err(ExecutorError::Exhausted {
                        attempts: attempt,
                        last: err,
                    });
                }
                Err(AttemptFailure::Producer(err)) => {
                    let delay = retry.delay_for(attempt);
                    tracing::info!(
                        phase = %inv.phase,
                        attempt,
                        ?delay,
                        error = %err,
                        "transient failure, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(ExecutorError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn attempt(
        &self,
        request: GenerateRequest,
        program: Option<&PhaseProgram>,
        phase: &PhaseId,
        events: &EventChannel,
        cancel: &CancellationToken,
    ) -> Result<PhaseWork, AttemptFailure> {
        let run = async {
            let mut stream = self.producer.generate(request).await?;
            let mut work = PhaseWork::default();
            while let Some(item) = stream.next().await {
                match item? {
                    ProducerOutput::Progress(content) => {
                        events.emit(EventKind::WorkInProgress {
                            phase: phase.clone(),
                            content,
                        });
                    }
                    ProducerOutput::Artifact(artifact) => {
                        if program.is_none_or(|p| p.allows_artifact(artifact.kind())) {
                            work.artifacts.push(artifact);
                        } else {
                            reject(events, phase, &format!("{} artifact", artifact.kind()));
                        }
                    }
                    ProducerOutput::Milestone(signal) => {
                        if program.is_none_or(|p| p.allows_milestone(&signal.name)) {
                            work.milestones.push(signal);
                        } else {
                            reject(events, phase, &format!("milestone {}", signal.name));
                        }
                    }
                    ProducerOutput::Flag(signal) => {
                        if program.is_none_or(|p| p.allows_flag(&signal.name)) {
                            work.flags.push(signal);
                        } else {
                            reject(events, phase, &format!("flag {}", signal.name));
                        }
                    }
                }
            }
            Ok::<PhaseWork, ProducerError>(work)
        };

        let timeout = self.config.attempt_timeout;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AttemptFailure::Cancelled),
            result = tokio::time::timeout(timeout, run) => match result {
                Ok(Ok(work)) => Ok(work),
                Ok(Err(err)) => Err(AttemptFailure::Producer(err)),
                Err(_) => Err(AttemptFailure::Producer(ProducerError::Timeout(timeout))),
            },
        }
    }
}

fn reject(events: &EventChannel, phase: &PhaseId, what: &str) {
    tracing::warn!(%phase, what, "producer output outside phase scope");
    events.emit(EventKind::Error {
        code: ErrorCode::Validation,
        message: format!("{} is not allowed in phase {}; ignored", what, phase),
        recoverable: true,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::{Condition, Transition};
    use crate::producer::{ScriptStep, ScriptedProducer};
    use journey_common::{ArtifactKind, Mode, Priority};

    const A: PhaseId = PhaseId::from_static("a");
    const DONE: PhaseId = PhaseId::from_static("done");

    fn yes(_: &PhaseContext) -> bool {
        true
    }

    fn def() -> AgentDefinition {
        AgentDefinition::builder(Mode::Research)
            .phases(&[A, DONE])
            .initial(A)
            .terminal(DONE)
            .transition(Transition::forward(A, DONE, Condition::new("a_done", yes)))
            .program(
                A,
                PhaseProgram::new("A", "Do A.")
                    .artifacts(&[ArtifactKind::Question])
                    .milestones(&["a_done"]),
            )
            .build()
            .unwrap()
    }

    fn fast_config() -> ExecutorConfig {
        ExecutorConfig {
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
            attempt_timeout: Duration::from_secs(5),
        }
    }

    fn question() -> Artifact {
        Artifact::Question {
            question: "Why?".into(),
            category: None,
            priority: Priority::High,
        }
    }

    struct Harness {
        def: AgentDefinition,
        phase: PhaseId,
        ctx: PhaseContext,
        brief: JourneyBrief,
        input: UserInput,
        events: EventChannel,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                def: def(),
                phase: A,
                ctx: PhaseContext::new(&A),
                brief: JourneyBrief::new("How do tides work?"),
                input: UserInput::new("go"),
                events: EventChannel::new(SessionId::new(), 64),
            }
        }

        fn invocation(&self) -> PhaseInvocation<'_> {
            PhaseInvocation {
                session_id: self.events.session_id(),
                def: &self.def,
                phase: &self.phase,
                brief: &self.brief,
                input: &self.input,
                context: &self.ctx,
                variant: PromptVariant::select(&self.phase, &self.ctx),
            }
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_buffers_outputs_and_streams_progress() {
        let producer = Arc::new(ScriptedProducer::new().with_turn(
            "a",
            vec![
                ScriptStep::progress("thinking"),
                ScriptStep::artifact(question()),
                ScriptStep::milestone("a_done"),
            ],
        ));
        let executor = PhaseExecutor::new(producer.clone(), fast_config());
        let h = Harness::new();

        let work = executor
            .execute(h.invocation(), &h.events, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(work.artifacts, vec![question()]);
        assert_eq!(work.milestones[0].name, "a_done");
        assert_eq!(work.attempts, 1);

        let events = h.events.replay(0).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].type_name(), "work.progress");
        assert!(producer.requests()[0].prompt.contains("Do A."));
    }

    #[tokio::test]
    async fn test_out_of_scope_outputs_are_dropped() {
        let producer = Arc::new(ScriptedProducer::new().with_turn(
            "a",
            vec![
                ScriptStep::artifact(Artifact::Note {
                    title: "n".into(),
                    body: "b".into(),
                }),
                ScriptStep::flag("unexpected", None),
            ],
        ));
        let executor = PhaseExecutor::new(producer, fast_config());
        let h = Harness::new();

        let work = executor
            .execute(h.invocation(), &h.events, &CancellationToken::new())
            .await
            .unwrap();
        assert!(work.artifacts.is_empty());
        assert!(work.flags.is_empty());

        let errors: Vec<_> = h
            .events
            .replay(0)
            .unwrap()
            .into_iter()
            .filter(|e| e.type_name() == "error")
            .collect();
        assert_eq!(errors.len(), 2);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let producer = Arc::new(
            ScriptedProducer::new()
                .with_turn("a", vec![ScriptStep::transient("overloaded")])
                .with_turn(
                    "a",
                    vec![
                        ScriptStep::artifact(question()),
                        ScriptStep::transient("dropped connection"),
                    ],
                )
                .with_turn("a", vec![ScriptStep::milestone("a_done")]),
        );
        let executor = PhaseExecutor::new(producer.clone(), fast_config());
        let h = Harness::new();

        let work = executor
            .execute(h.invocation(), &h.events, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(work.attempts, 3);
        // The partial artifact from the failed second attempt is discarded.
        assert!(work.artifacts.is_empty());
        assert_eq!(work.milestones.len(), 1);
        assert_eq!(producer.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let producer = Arc::new(
            ScriptedProducer::new()
                .with_turn("a", vec![ScriptStep::transient("1")])
                .with_turn("a", vec![ScriptStep::transient("2")])
                .with_turn("a", vec![ScriptStep::transient("3")])
                .with_turn("a", vec![ScriptStep::milestone("a_done")]),
        );
        let executor = PhaseExecutor::new(producer.clone(), fast_config());
        let h = Harness::new();

        let err = executor
            .execute(h.invocation(), &h.events, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ExecutorError::Exhausted {
                attempts: 3,
                last: ProducerError::Transient("3".into())
            }
        );
        assert_eq!(producer.remaining("a"), 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let producer = Arc::new(
            ScriptedProducer::new()
                .with_turn("a", vec![ScriptStep::permanent("bad request")])
                .with_turn("a", vec![ScriptStep::milestone("a_done")]),
        );
        let executor = PhaseExecutor::new(producer.clone(), fast_config());
        let h = Harness::new();

        let err = executor
            .execute(h.invocation(), &h.events, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Failed(ProducerError::Permanent(_))));
        assert_eq!(producer.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_attempt_timeout_counts_as_transient() {
        let producer = Arc::new(
            ScriptedProducer::new()
                .with_turn("a", vec![ScriptStep::Stall])
                .with_turn("a", vec![ScriptStep::milestone("a_done")]),
        );
        let mut config = fast_config();
        config.attempt_timeout = Duration::from_millis(20);
        let executor = PhaseExecutor::new(producer, config);
        let h = Harness::new();

        let work = executor
            .execute(h.invocation(), &h.events, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(work.attempts, 2);
    }

    #[tokio::test]
    async fn test_cancellation_stops_a_stalled_run() {
        let producer = Arc::new(ScriptedProducer::new().with_turn(
            "a",
            vec![ScriptStep::progress("starting"), ScriptStep::Stall],
        ));
        let executor = PhaseExecutor::new(producer, fast_config());
        let h = Harness::new();
        let cancel = CancellationToken::new();

        let trip = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trip.cancel();
        });

        let err = executor
            .execute(h.invocation(), &h.events, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, ExecutorError::Cancelled);
    }
}
