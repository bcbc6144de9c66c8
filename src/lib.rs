//! # Roundtable
//!
//! Roundtable is a Rust engine for multi-agent group conversations: a user and
//! several configured personas share one transcript, and a streaming
//! orchestration loop repeatedly decides *who speaks next*, generates that
//! speaker's reply through an external language-model call, detects when the
//! group should pause or stop, and meters the credit cost of every generated
//! message.
//!
//! The crate provides carefully layered abstractions for:
//!
//! * **Agents**: [`Agent`] personas with role instructions, selection
//!   characteristics, and closed [`ChatStyle`](agent::ChatStyle) knobs
//! * **Run-scoped registries**: [`AgentRegistry`] instances owned by a single
//!   conversation run, with no process-wide agent state
//! * **Supervised turn-taking**: a [`Supervisor`] model picks the next
//!   speaker and judges natural termination, with deterministic fallbacks
//! * **The workflow loop**: [`ConversationWorkflow`] drives selection,
//!   generation with retry/backoff, termination checks and cleanup, exposed
//!   as a lazy [`WorkflowEvent`] stream
//! * **Credit metering**: a [`PricingTable`] + [`BalanceStore`] pair that
//!   debits every generated message and reports insufficient balance as a
//!   first-class outcome
//! * **Transport adaptation**: [`stream::frame`] encodes events for SSE or
//!   socket channels; [`TranscriptSink`] persists generated messages
//!
//! Provider SDKs stay outside the crate: implement [`LanguageModel`] for your
//! client of choice and hand it to agents and the supervisor.
//!
//! ## Example
//!
//! ```rust,no_run
//! use roundtable::{Agent, AgentRegistry, ConversationConfig, ConversationWorkflow, Supervisor};
//! # use roundtable::LanguageModel;
//! # async fn example(model: std::sync::Arc<dyn LanguageModel>) {
//! let registry = AgentRegistry::shared();
//! {
//!     let mut registry = registry.write().await;
//!     registry.register(
//!         Agent::new("ada", "Ada", model.clone())
//!             .with_prompt("You are a pioneering mathematician.")
//!             .with_characteristics("Rigorous; loves analytical engines."),
//!     );
//!     registry.register(
//!         Agent::new("edgar", "Edgar", model.clone())
//!             .with_prompt("You are a gothic poet.")
//!             .with_characteristics("Brooding; answers in dark metaphor."),
//!     );
//! }
//!
//! let workflow = ConversationWorkflow::new(registry, Supervisor::new(model));
//! let (handle, mut events) = workflow
//!     .run(ConversationConfig::new("What do you two make of ravens?"))
//!     .await
//!     .unwrap();
//!
//! while let Some(event) = events.recv().await {
//!     println!("{}", roundtable::stream::frame(&event));
//! }
//! # let _ = handle;
//! # }
//! ```

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise the global [`env_logger`] subscriber exactly once.
///
/// Applications embedding the engine can opt in to `RUST_LOG`-driven
/// diagnostics without choosing a logging backend upfront.
///
/// ```rust
/// roundtable::init_logger();
/// log::info!("Logger is ready");
/// ```
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

// Import the top-level `roundtable` module.
pub mod roundtable;

// Re-exporting key items for easier external access.
pub use roundtable::agent;
pub use roundtable::agent::{Agent, ChatStyle};
pub use roundtable::config;
pub use roundtable::config::ConversationConfig;
pub use roundtable::conversation;
pub use roundtable::conversation::{AgentProfile, ConversationState, Message};
pub use roundtable::credits;
pub use roundtable::credits::{
    BalanceStore, CostMeter, CreditTransaction, DebitMetadata, DebitOutcome, MemoryBalanceStore,
    PricingRow, PricingTable,
};
pub use roundtable::generator;
pub use roundtable::generator::ResponseGenerator;
pub use roundtable::model;
pub use roundtable::model::{ChatMessage, LanguageModel, ModelError, Provider, Role};
pub use roundtable::registry;
pub use roundtable::registry::{AgentRegistry, SharedAgentRegistry};
pub use roundtable::stream;
pub use roundtable::stream::{JsonlTranscript, NullTranscript, TranscriptSink};
pub use roundtable::supervisor;
pub use roundtable::supervisor::{AgentSelection, Supervisor, TerminationDecision};
pub use roundtable::workflow;
pub use roundtable::workflow::{
    ConversationWorkflow, EventStream, Outcome, RunHandle, WorkflowError, WorkflowEvent,
};
