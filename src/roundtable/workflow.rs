//! The conversation workflow: a state machine that repeatedly decides who
//! speaks next, generates that speaker's reply, meters its cost, and decides
//! whether the group is done, emitting a live event stream the whole way.
//!
//! # State machine
//!
//! ```text
//! Initializing
//!   └─ SelectingSpeaker ──(none / turns = 0)──────────────► Completed (paused)
//!       └─ GeneratingTurn(i) for i in 1..=turns
//!           ├─ backoff sleep (skipped on the very first turn)
//!           ├─ Status "thinking" → generate → append → AgentResponse
//!           └─ debit → CreditUpdate (or Error on insufficient funds)
//!       └─ EvaluatingTermination ──(should_terminate)─────► Completed (natural)
//!   └─ turn ceiling reached ──────────────────────────────► Completed (turn limit)
//!   └─ any error inside an iteration ─── Error event ─────► Completed
//! ```
//!
//! `Completed` is terminal. Whatever path leads there, the roster is
//! unregistered from the run's [`AgentRegistry`] exactly once, and the run
//! ends with exactly one of: a `Completed` event, an `Error` event, or a
//! silent exit when the consumer is gone.
//!
//! # Consumption
//!
//! [`ConversationWorkflow::run`] spawns the loop onto the tokio runtime and
//! hands back a [`RunHandle`] plus an [`EventStream`]. The stream is lazy: the
//! loop suspends whenever the bounded channel is full, so an unread stream
//! stops producing. Dropping the stream, or flipping the handle's liveness
//! flag, makes the loop exit cleanly at the next iteration boundary without
//! emitting further events.

use crate::config::ConversationConfig;
use crate::conversation::{ConversationState, Message};
use crate::credits::{BalanceStore, CostMeter, DebitMetadata, DebitOutcome};
use crate::generator::ResponseGenerator;
use crate::registry::SharedAgentRegistry;
use crate::stream::{NullTranscript, TranscriptSink};
use crate::supervisor::{Supervisor, MIN_MESSAGES_FOR_TERMINATION};
use futures_util::Stream;
use log::{info, warn};
use std::error::Error;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;

/// Why a run reached `Completed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The termination evaluator judged the conversation naturally concluded.
    Natural,
    /// The selector asked the group to wait for the user (no selection, or
    /// `turns = 0`). The conversation can be resumed with new user input.
    Paused,
    /// The configured turn ceiling was reached.
    TurnLimit,
}

impl Outcome {
    /// Wire label carried in the completed event's payload.
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Natural => "natural",
            Outcome::Paused => "paused",
            Outcome::TurnLimit => "turn_limit",
        }
    }
}

/// One unit of the workflow's lazy output sequence.
#[derive(Clone, Debug, PartialEq)]
pub enum WorkflowEvent {
    /// Progress notice, e.g. "Ada is thinking...". Always precedes the
    /// `AgentResponse` it announces.
    Status { message: String },
    /// A generated assistant turn.
    AgentResponse {
        agent_id: String,
        agent_name: String,
        content: String,
        /// Epoch milliseconds of the appended message.
        timestamp: i64,
        /// Whole-message emission; chunked deltas would clear this.
        is_complete: bool,
    },
    /// A successful debit for the preceding turn.
    CreditUpdate {
        credits_used: u64,
        remaining_credits: i64,
    },
    /// Terminal event for every non-error run. Nothing follows it.
    Completed {
        conversation_id: String,
        total_credits_used: u64,
        message: String,
        outcome: Outcome,
    },
    /// Terminal event for a failed run. Nothing follows it.
    Error { message: String },
}

/// Errors that force a run to terminate with an `Error` event, or that reject
/// a run before it starts.
#[derive(Debug, Clone)]
pub enum WorkflowError {
    /// A selected agent id has no registry entry. Fatal to the run.
    AgentNotFound(String),
    /// The model call for a generation attempt failed (beyond the single
    /// empty-response retry). Fatal to the run.
    GenerationFailed(String),
    /// A runtime failure outside generation, e.g. transcript persistence.
    ExecutionFailed(String),
    /// A mid-run debit could not be covered. The run stops rather than let
    /// the agent speak for free.
    InsufficientCredits { needed: u64, balance: i64 },
    /// `run` was called with an empty registry.
    NoAgents,
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowError::AgentNotFound(id) => write!(f, "Agent not found: {}", id),
            WorkflowError::GenerationFailed(msg) => write!(f, "Generation failed: {}", msg),
            WorkflowError::ExecutionFailed(msg) => write!(f, "Execution failed: {}", msg),
            WorkflowError::InsufficientCredits { needed, balance } => write!(
                f,
                "Insufficient credits: needed {}, balance {}",
                needed, balance
            ),
            WorkflowError::NoAgents => write!(f, "No agents registered for this conversation"),
        }
    }
}

impl Error for WorkflowError {}

/// Caller-side control of an in-flight run.
///
/// Dropping the handle does not stop the run; call [`RunHandle::stop`] or
/// drop the [`EventStream`].
#[derive(Clone)]
pub struct RunHandle {
    conversation_id: String,
    active: Arc<AtomicBool>,
}

impl RunHandle {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Flip the liveness flag. The loop observes it at the next iteration
    /// boundary and exits silently: no further events, no error.
    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// The lazy event sequence of one run. Implements [`Stream`]; dropping it
/// counts as the consumer disconnecting.
pub struct EventStream {
    rx: mpsc::Receiver<WorkflowEvent>,
}

impl EventStream {
    /// Await the next event, or `None` once the run has fully terminated.
    pub async fn recv(&mut self) -> Option<WorkflowEvent> {
        self.rx.recv().await
    }

    /// Drain the stream to completion. Convenient in tests; real consumers
    /// forward events as they arrive.
    pub async fn collect_all(mut self) -> Vec<WorkflowEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        events
    }

    /// Erase the concrete type for callers that want a plain boxed stream.
    pub fn boxed(self) -> Pin<Box<dyn Stream<Item = WorkflowEvent> + Send>> {
        Box::pin(self)
    }
}

impl Stream for EventStream {
    type Item = WorkflowEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Progressive pre-generation delay: grows with the conversation to stay
/// under provider rate limits, capped at three seconds total.
fn backoff_delay(turn_count: usize) -> Duration {
    let ramp = std::cmp::min(turn_count as u64 * 200, 2000);
    Duration::from_millis(ramp + 1000)
}

/// Events the loop can buffer before it suspends waiting for the consumer.
const EVENT_BUFFER: usize = 32;

struct Accounting {
    meter: CostMeter,
    store: Arc<dyn BalanceStore>,
}

/// Orchestrates one multi-agent conversation run.
///
/// # Example
///
/// ```rust,no_run
/// use roundtable::agent::Agent;
/// use roundtable::config::ConversationConfig;
/// use roundtable::registry::AgentRegistry;
/// use roundtable::supervisor::Supervisor;
/// use roundtable::workflow::ConversationWorkflow;
/// # use roundtable::model::LanguageModel;
/// # async fn example(model: std::sync::Arc<dyn LanguageModel>) {
/// let registry = AgentRegistry::shared();
/// registry.write().await.register(
///     Agent::new("ada", "Ada", model.clone()).with_prompt("You are a mathematician."),
/// );
///
/// let workflow = ConversationWorkflow::new(registry, Supervisor::new(model));
/// let (handle, mut events) = workflow
///     .run(ConversationConfig::new("Hello everyone!"))
///     .await
///     .unwrap();
///
/// while let Some(event) = events.recv().await {
///     println!("{:?}", event);
/// }
/// # let _ = handle;
/// # }
/// ```
pub struct ConversationWorkflow {
    registry: SharedAgentRegistry,
    supervisor: Supervisor,
    generator: ResponseGenerator,
    accounting: Option<Accounting>,
    sink: Arc<dyn TranscriptSink>,
}

impl ConversationWorkflow {
    /// Create a workflow over a run-scoped registry and a supervisor model.
    /// Cost accounting is off and transcript persistence is a no-op until the
    /// corresponding builders are called.
    pub fn new(registry: SharedAgentRegistry, supervisor: Supervisor) -> Self {
        Self {
            registry,
            supervisor,
            generator: ResponseGenerator::new(),
            accounting: None,
            sink: Arc::new(NullTranscript),
        }
    }

    /// Meter every generated message against `meter` and debit `store`
    /// (builder pattern). Debits are only attempted for runs that carry a
    /// `user_id`.
    pub fn with_accounting(mut self, meter: CostMeter, store: Arc<dyn BalanceStore>) -> Self {
        self.accounting = Some(Accounting { meter, store });
        self
    }

    /// Append every generated message to `sink` (builder pattern).
    pub fn with_transcript_sink(mut self, sink: Arc<dyn TranscriptSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Start a fresh conversation from the configured initial message.
    ///
    /// Returns a [`RunHandle`] and the lazy [`EventStream`]; the loop itself
    /// runs on a spawned task and suspends at every model call, backoff sleep
    /// and full channel.
    pub async fn run(
        self,
        config: ConversationConfig,
    ) -> Result<(RunHandle, EventStream), WorkflowError> {
        if config.initial_message.trim().is_empty() {
            return Err(WorkflowError::ExecutionFailed(
                "initial message must not be empty".to_string(),
            ));
        }
        let conversation_id = config
            .conversation_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let state = ConversationState::new(
            conversation_id,
            config.user_id.clone(),
            config.initial_message.clone(),
            Vec::new(),
            config.max_turns,
        );
        self.start(state).await
    }

    /// Continue a conversation from a rebuilt [`ConversationState`] (see
    /// [`ConversationState::resume`]). The state's roster is replaced by the
    /// registry's current roster.
    pub async fn resume(
        self,
        state: ConversationState,
    ) -> Result<(RunHandle, EventStream), WorkflowError> {
        self.start(state).await
    }

    async fn start(
        self,
        mut state: ConversationState,
    ) -> Result<(RunHandle, EventStream), WorkflowError> {
        state.roster = self.registry.read().await.profiles();
        if state.roster.is_empty() {
            return Err(WorkflowError::NoAgents);
        }

        let active = Arc::new(AtomicBool::new(true));
        let handle = RunHandle {
            conversation_id: state.conversation_id.clone(),
            active: Arc::clone(&active),
        };
        let (events, rx) = mpsc::channel(EVENT_BUFFER);

        info!(
            "starting conversation '{}' with {} agent(s), max {} turns",
            state.conversation_id,
            state.roster.len(),
            state.max_turns
        );
        tokio::spawn(drive(
            self.registry,
            self.supervisor,
            self.generator,
            self.accounting,
            self.sink,
            state,
            events,
            active,
        ));

        Ok((handle, EventStream { rx }))
    }
}

async fn drive(
    registry: SharedAgentRegistry,
    supervisor: Supervisor,
    generator: ResponseGenerator,
    accounting: Option<Accounting>,
    sink: Arc<dyn TranscriptSink>,
    mut state: ConversationState,
    events: mpsc::Sender<WorkflowEvent>,
    active: Arc<AtomicBool>,
) {
    let mut total_credits: u64 = 0;
    let mut first_turn = true;

    // Ok(Some(outcome)) = natural terminal, Ok(None) = silent exit,
    // Err = fatal error for the run.
    let result: Result<Option<Outcome>, WorkflowError> = 'run: loop {
        if !active.load(Ordering::SeqCst) {
            break 'run Ok(None);
        }
        if state.turn_count >= state.max_turns {
            break 'run Ok(Some(Outcome::TurnLimit));
        }

        // SelectingSpeaker
        let selection = match supervisor.select_next(&state).await {
            Some(selection) => selection,
            None => break 'run Ok(Some(Outcome::Paused)),
        };
        if selection.turns == 0 {
            break 'run Ok(Some(Outcome::Paused));
        }

        // GeneratingTurn(i), bounded by the turn ceiling.
        let mut turn_error: Option<WorkflowError> = None;
        for _ in 0..selection.turns {
            if state.turn_count >= state.max_turns {
                break;
            }
            if !active.load(Ordering::SeqCst) {
                break 'run Ok(None);
            }

            let agent = registry.read().await.get(&selection.agent_id).cloned();
            let agent = match agent {
                Some(agent) => agent,
                None => {
                    turn_error = Some(WorkflowError::AgentNotFound(selection.agent_id.clone()));
                    break;
                }
            };

            if first_turn {
                first_turn = false;
            } else {
                tokio::time::sleep(backoff_delay(state.turn_count)).await;
            }

            let status = WorkflowEvent::Status {
                message: format!("{} is thinking...", agent.name),
            };
            if events.send(status).await.is_err() {
                break 'run Ok(None);
            }

            let reply = match generator.generate(&agent, &state.messages).await {
                Ok(reply) => reply,
                Err(e) => {
                    turn_error = Some(WorkflowError::GenerationFailed(e.to_string()));
                    break;
                }
            };

            let message = Message::from_agent(&agent.id, &agent.name, reply);
            if let Err(e) = sink.append(&state.conversation_id, &message).await {
                turn_error = Some(WorkflowError::ExecutionFailed(format!(
                    "transcript append failed: {}",
                    e
                )));
                break;
            }

            let response_event = WorkflowEvent::AgentResponse {
                agent_id: agent.id.clone(),
                agent_name: agent.name.clone(),
                content: message.content.clone(),
                timestamp: message.timestamp_millis(),
                is_complete: true,
            };
            let reply_chars = message.content.chars().count();
            state.append(message);
            state.turn_count += 1;
            state.current_speaker = Some(agent.id.clone());
            if events.send(response_event).await.is_err() {
                break 'run Ok(None);
            }

            if let (Some(accounting), Some(user_id)) = (&accounting, &state.user_id) {
                let provider = agent.client().provider();
                let model = agent.client().model_name();
                match accounting.meter.turn_cost(provider, model, reply_chars) {
                    Some(cost) => {
                        let metadata = DebitMetadata {
                            conversation_id: state.conversation_id.clone(),
                            agent_id: Some(agent.id.clone()),
                            model: model.to_string(),
                        };
                        match accounting
                            .store
                            .debit(user_id, cost, "agent message", metadata)
                            .await
                        {
                            DebitOutcome::Applied(transaction) => {
                                total_credits += cost;
                                let update = WorkflowEvent::CreditUpdate {
                                    credits_used: cost,
                                    remaining_credits: transaction.balance_after,
                                };
                                if events.send(update).await.is_err() {
                                    break 'run Ok(None);
                                }
                            }
                            DebitOutcome::InsufficientFunds { balance } => {
                                turn_error = Some(WorkflowError::InsufficientCredits {
                                    needed: cost,
                                    balance,
                                });
                                break;
                            }
                        }
                    }
                    None => {
                        warn!("no pricing row for {}/{}; turn not debited", provider, model);
                    }
                }
            }
        }
        if let Some(error) = turn_error {
            break 'run Err(error);
        }

        // EvaluatingTermination
        if state.messages.len() >= MIN_MESSAGES_FOR_TERMINATION {
            let decision = supervisor.should_stop(&state).await;
            if decision.should_terminate {
                info!(
                    "conversation '{}' concluded: {}",
                    state.conversation_id, decision.reason
                );
                break 'run Ok(Some(Outcome::Natural));
            }
        }
    };

    // Completed is terminal on every path; cleanup runs exactly once.
    state.complete = true;
    {
        let mut registry = registry.write().await;
        for profile in &state.roster {
            registry.unregister(&profile.id);
        }
    }

    match result {
        Ok(None) => {
            info!(
                "conversation '{}' stopped by its consumer after {} turn(s)",
                state.conversation_id, state.turn_count
            );
        }
        Ok(Some(outcome)) => {
            let message = match outcome {
                Outcome::Natural => "The conversation has come to a natural close.",
                Outcome::Paused => "The agents are waiting for you to continue.",
                Outcome::TurnLimit => "The conversation reached its turn limit.",
            };
            let _ = events
                .send(WorkflowEvent::Completed {
                    conversation_id: state.conversation_id.clone(),
                    total_credits_used: total_credits,
                    message: message.to_string(),
                    outcome,
                })
                .await;
        }
        Err(error) => {
            warn!("conversation '{}' failed: {}", state.conversation_id, error);
            let _ = events
                .send(WorkflowEvent::Error {
                    message: error.to_string(),
                })
                .await;
        }
    }
}
