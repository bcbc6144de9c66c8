//! Conversational agent configuration.
//!
//! An [`Agent`] is a configured persona: role instructions, free-text
//! characteristics used for speaker selection, a set of closed style knobs
//! ([`ChatStyle`]), and a handle to the model that speaks for it. Agents are
//! constructed from durable records by the surrounding system, registered into
//! an [`AgentRegistry`](crate::registry::AgentRegistry) for the duration of
//! one conversation run, and never mutated afterwards.
//!
//! # Example
//!
//! ```rust,no_run
//! use roundtable::agent::{Agent, ChatStyle, Friendliness, Humor};
//! # use roundtable::model::LanguageModel;
//! # fn example(client: std::sync::Arc<dyn LanguageModel>) {
//! let agent = Agent::new("historian", "Herodotus", client)
//!     .with_prompt("You are a historian of the ancient Mediterranean.")
//!     .with_characteristics("Knows classical antiquity; tells vivid anecdotes.")
//!     .with_chat_style(ChatStyle {
//!         friendliness: Friendliness::Warm,
//!         humor: Humor::Frequent,
//!         ..ChatStyle::default()
//!     });
//! # }
//! ```

use crate::model::LanguageModel;
use std::sync::Arc;

/// How warm the agent's tone should be.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Friendliness {
    Warm,
    Neutral,
    Blunt,
}

impl Default for Friendliness {
    fn default() -> Self {
        Friendliness::Neutral
    }
}

impl Friendliness {
    pub fn instruction(&self) -> &'static str {
        match self {
            Friendliness::Warm => "Be warm and approachable in your replies.",
            Friendliness::Neutral => "Keep a neutral, even-handed tone.",
            Friendliness::Blunt => "Be direct and to the point, even when it is uncomfortable.",
        }
    }
}

/// How long the agent's replies should run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseLength {
    Brief,
    Moderate,
    Detailed,
}

impl Default for ResponseLength {
    fn default() -> Self {
        ResponseLength::Moderate
    }
}

impl ResponseLength {
    pub fn instruction(&self) -> &'static str {
        match self {
            ResponseLength::Brief => "Answer in one or two short sentences.",
            ResponseLength::Moderate => "Answer in a short paragraph.",
            ResponseLength::Detailed => "Answer thoroughly, with supporting detail.",
        }
    }
}

/// Overall demeanor of the agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Personality {
    Playful,
    Serious,
    Balanced,
}

impl Default for Personality {
    fn default() -> Self {
        Personality::Balanced
    }
}

impl Personality {
    pub fn instruction(&self) -> &'static str {
        match self {
            Personality::Playful => "Keep the mood light and playful.",
            Personality::Serious => "Stay serious and focused on the topic.",
            Personality::Balanced => "Balance levity with substance as the topic demands.",
        }
    }
}

/// How much humor the agent should inject.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Humor {
    None,
    Light,
    Frequent,
}

impl Default for Humor {
    fn default() -> Self {
        Humor::Light
    }
}

impl Humor {
    pub fn instruction(&self) -> &'static str {
        match self {
            Humor::None => "Do not attempt jokes.",
            Humor::Light => "An occasional light joke is welcome.",
            Humor::Frequent => "Use humor freely when it fits the conversation.",
        }
    }
}

/// The level of expertise the agent should project.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExpertiseLevel {
    Beginner,
    Intermediate,
    Expert,
}

impl Default for ExpertiseLevel {
    fn default() -> Self {
        ExpertiseLevel::Intermediate
    }
}

impl ExpertiseLevel {
    pub fn instruction(&self) -> &'static str {
        match self {
            ExpertiseLevel::Beginner => "Explain things simply, as to a newcomer.",
            ExpertiseLevel::Intermediate => "Assume a generally informed audience.",
            ExpertiseLevel::Expert => "Speak as a domain expert addressing peers.",
        }
    }
}

/// The five style knobs that shape an agent's voice.
///
/// Each knob is a closed enum with a default; every variant expands to exactly
/// one fixed instruction sentence. The expansion is deterministic; the same
/// style always produces the same system-prompt fragment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChatStyle {
    pub friendliness: Friendliness,
    pub response_length: ResponseLength,
    pub personality: Personality,
    pub humor: Humor,
    pub expertise_level: ExpertiseLevel,
}

impl ChatStyle {
    /// Render the style as instruction sentences, one per knob, in a fixed
    /// order.
    pub fn instructions(&self) -> String {
        [
            self.friendliness.instruction(),
            self.response_length.instruction(),
            self.personality.instruction(),
            self.humor.instruction(),
            self.expertise_level.instruction(),
        ]
        .join(" ")
    }
}

/// A configured persona that can generate conversational turns.
///
/// Identity is the `id`; it must be unique and stable for the duration of one
/// conversation run. The `client` is the model that speaks for this agent;
/// the agent's provider family and model name (used for pricing and retry
/// steering) are read from it.
#[derive(Clone)]
pub struct Agent {
    /// Stable identifier referenced by supervisor selections.
    pub id: String,
    /// Human-readable display name; becomes the `speaker` of generated messages.
    pub name: String,
    /// Role instructions embedded at the top of the agent's system prompt.
    pub prompt: String,
    /// Free-form description of the agent's strengths, shown to the supervisor
    /// when it picks the next speaker.
    pub characteristics: String,
    /// Style knobs expanded into the system prompt.
    pub chat_style: ChatStyle,
    /// Optional completion cap forwarded to the model call.
    pub max_tokens: Option<u32>,

    client: Arc<dyn LanguageModel>,
}

impl Agent {
    /// Create a new agent with the mandatory identity information.
    ///
    /// Prompt and characteristics start empty and the chat style starts at its
    /// defaults; use the `with_*` builders to fill them in.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        client: Arc<dyn LanguageModel>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            prompt: String::new(),
            characteristics: String::new(),
            chat_style: ChatStyle::default(),
            max_tokens: None,
            client,
        }
    }

    /// Attach the persona's role instructions (builder pattern).
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// Attach the free-text characteristics used for speaker selection.
    pub fn with_characteristics(mut self, characteristics: impl Into<String>) -> Self {
        self.characteristics = characteristics.into();
        self
    }

    /// Override the default chat style.
    pub fn with_chat_style(mut self, chat_style: ChatStyle) -> Self {
        self.chat_style = chat_style;
        self
    }

    /// Cap the number of completion tokens per generated turn.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// The model that speaks for this agent.
    pub fn client(&self) -> &Arc<dyn LanguageModel> {
        &self.client
    }
}
