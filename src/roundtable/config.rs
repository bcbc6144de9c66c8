//! Configuration surface consumed by the workflow.
//!
//! Callers construct a [`ConversationConfig`] directly, with no file parsing.
//! Agent ownership checks and id deduplication happen outside the core.

/// Per-run configuration for a conversation workflow.
///
/// # Example
///
/// ```rust
/// use roundtable::config::ConversationConfig;
///
/// let config = ConversationConfig::new("Hello everyone!")
///     .with_max_turns(6)
///     .with_user("user-42");
/// assert_eq!(config.max_turns, 6);
/// ```
#[derive(Clone, Debug)]
pub struct ConversationConfig {
    /// Explicit conversation id; a v4 UUID is generated when `None`.
    pub conversation_id: Option<String>,
    /// User on whose behalf the run executes; debits are skipped when `None`.
    pub user_id: Option<String>,
    /// The opening user message. Must be non-empty.
    pub initial_message: String,
    /// Ceiling on assistant turns for this run.
    pub max_turns: usize,
}

/// Default ceiling on assistant turns per run.
pub const DEFAULT_MAX_TURNS: usize = 10;

impl ConversationConfig {
    pub fn new(initial_message: impl Into<String>) -> Self {
        Self {
            conversation_id: None,
            user_id: None,
            initial_message: initial_message.into(),
            max_turns: DEFAULT_MAX_TURNS,
        }
    }

    pub fn with_conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }
}
