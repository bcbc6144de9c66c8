//! Turn generation for a single agent.
//!
//! The [`ResponseGenerator`] wraps the external model call for one agent: it
//! expands the agent's prompt, characteristics and chat style into a system
//! instruction, converts the shared transcript into the role/content shape the
//! model expects, and applies the empty-response retry policy.

use crate::agent::Agent;
use crate::conversation::Message;
use crate::model::{ChatMessage, ModelError, Provider, Role};
use log::warn;

/// Sampling temperature for the primary generation attempt.
pub const PRIMARY_TEMPERATURE: f32 = 0.7;

/// Bumped temperature for the single empty-response retry.
const RETRY_TEMPERATURE: f32 = 0.8;

/// Returned when both the primary attempt and the retry come back blank. An
/// empty turn is worse than a filler turn.
pub const FALLBACK_REPLY: &str = "Hey there!";

const RETRY_NUDGE: &str =
    "Your previous reply was empty. Respond now with a short message in character.";

/// Generates one conversational turn per call. Stateless; all inputs come
/// from the agent and the transcript.
#[derive(Default)]
pub struct ResponseGenerator;

impl ResponseGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Generate a reply for `agent` given the shared transcript.
    ///
    /// Blank or whitespace-only output triggers exactly one retry with a
    /// temperature bump and a steering nudge; a second blank yields
    /// [`FALLBACK_REPLY`]. Transport and provider errors propagate to the
    /// caller and are fatal for the turn.
    pub async fn generate(&self, agent: &Agent, transcript: &[Message]) -> Result<String, ModelError> {
        let system_prompt = self.system_instruction(agent);
        let mut messages = self.request_messages(agent, transcript);

        let reply = agent
            .client()
            .generate_text(&system_prompt, &messages, PRIMARY_TEMPERATURE, agent.max_tokens)
            .await?;
        if !reply.trim().is_empty() {
            return Ok(reply);
        }

        warn!(
            "agent '{}' returned an empty reply, retrying with steering nudge",
            agent.id
        );
        messages.push(self.retry_nudge(agent));
        let retry = agent
            .client()
            .generate_text(&system_prompt, &messages, RETRY_TEMPERATURE, agent.max_tokens)
            .await?;
        if !retry.trim().is_empty() {
            return Ok(retry);
        }

        warn!(
            "agent '{}' returned a second empty reply, substituting fallback",
            agent.id
        );
        Ok(FALLBACK_REPLY.to_string())
    }

    /// Expand prompt, characteristics and chat style into the system
    /// instruction. Deterministic text templating, no randomness.
    fn system_instruction(&self, agent: &Agent) -> String {
        let mut prompt = format!("You are {}.\n", agent.name);
        if !agent.prompt.is_empty() {
            prompt.push_str(&agent.prompt);
            prompt.push('\n');
        }
        if !agent.characteristics.is_empty() {
            prompt.push_str(&format!("Your characteristics: {}\n", agent.characteristics));
        }
        prompt.push_str(&agent.chat_style.instructions());
        prompt.push_str(
            "\nYou are in a group conversation with a user and other assistants. \
             Reply as yourself; do not prefix your reply with your own name.",
        );
        prompt
    }

    /// Convert the shared transcript into this agent's view of it.
    ///
    /// Turns by other agents are injected as labeled user-role context so the
    /// model sees who said what without mistaking their words for its own.
    fn request_messages(&self, agent: &Agent, transcript: &[Message]) -> Vec<ChatMessage> {
        transcript
            .iter()
            .map(|message| match (&message.role, &message.agent_id) {
                (Role::Assistant, Some(id)) if *id == agent.id => {
                    ChatMessage::new(Role::Assistant, message.content.clone())
                }
                (Role::Assistant, _) => ChatMessage::new(
                    Role::User,
                    format!("[{}]: {}", message.speaker, message.content),
                ),
                (role, _) => ChatMessage::new(role.clone(), message.content.clone()),
            })
            .collect()
    }

    /// The steering message appended before the retry. OpenAI-family models
    /// respond to a trailing user message here; the other providers honor a
    /// system message instead.
    fn retry_nudge(&self, agent: &Agent) -> ChatMessage {
        let role = match agent.client().provider() {
            Provider::OpenAi => Role::User,
            _ => Role::System,
        };
        ChatMessage::new(role, RETRY_NUDGE)
    }
}
