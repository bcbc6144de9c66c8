use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error;

/// A LanguageModel is the crate's only window onto a concrete LLM provider.
/// Provider selection, credential resolution and transport live outside the
/// orchestration core; the engine only ever asks for plain text or for a
/// structured JSON decision. An implementation wraps one configured model
/// (client + model name), the way a session wraps a single client.

/// Represents the possible roles for a chat message sent to a model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    // set by the developer to steer the model's responses
    User,
    // a message sent by a human user (or app user)
    Assistant, // content previously generated by a model
}

/// A generic role/content pair, the shape every provider ultimately accepts.
#[derive(Clone, Debug)]
pub struct ChatMessage {
    /// The role associated with the message.
    pub role: Role,
    /// The actual content of the message.
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Provider families the engine can meter and steer.
///
/// The family matters in exactly two places: pricing lookup
/// ([`PricingTable`](crate::credits::PricingTable)) and the role used for the
/// empty-response retry nudge in the
/// [`ResponseGenerator`](crate::generator::ResponseGenerator).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Anthropic,
    Google,
    XAi,
}

impl Provider {
    /// Lowercase identifier used in pricing rows and debit metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Google => "google",
            Provider::XAi => "xai",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type alias for a Send-able error box returned by model calls.
pub type ModelError = Box<dyn Error + Send + Sync>;

/// Trait defining the two model capabilities the orchestration core consumes.
///
/// Implementations are expected to be cheap to share (`Arc<dyn LanguageModel>`)
/// and safe to call from spawned tasks.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a free-form text reply.
    ///
    /// - `system_prompt`: the full system instruction for this call.
    /// - `messages`: the conversation as role/content pairs, oldest first.
    /// - `temperature`: sampling temperature requested by the caller.
    /// - `max_tokens`: optional completion cap, `None` for the provider default.
    async fn generate_text(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: Option<u32>,
    ) -> Result<String, ModelError>;

    /// Generate a structured JSON object for a single prompt.
    ///
    /// Used for supervisor decisions (speaker selection, termination). The
    /// returned value must be a JSON object; the caller deserializes it into
    /// its decision type and treats any mismatch as an invalid payload.
    async fn generate_structured(
        &self,
        system_prompt: &str,
        prompt: &str,
        temperature: f32,
        max_tokens: Option<u32>,
    ) -> Result<serde_json::Value, ModelError>;

    /// Name of the underlying model (e.g. `"gpt-4o-mini"`). Used for pricing
    /// lookup and debit metadata.
    fn model_name(&self) -> &str;

    /// Provider family of the underlying model.
    fn provider(&self) -> Provider;
}
