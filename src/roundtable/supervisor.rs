//! Supervisor decisions: who speaks next, and whether the group is done.
//!
//! The supervisor is a designated model role, distinct from the
//! conversational agents, asked for two structured decisions:
//!
//! - [`Supervisor::select_next`]: the next speaker, a turn count, and
//!   reasoning;
//! - [`Supervisor::should_stop`]: whether the conversation has naturally
//!   concluded.
//!
//! Both decisions degrade deterministically on failure: selection falls back
//! to the first roster agent, termination falls back to "keep going". A
//! supervisor failure is never fatal to the conversation.

use crate::conversation::ConversationState;
use crate::model::LanguageModel;
use log::{debug, warn};
use serde::Deserialize;
use std::sync::Arc;

/// Messages of context handed to the supervisor for either decision.
const CONTEXT_WINDOW: usize = 5;

/// Distinct recent speakers surfaced in the selection prompt.
const RECENCY_WINDOW: usize = 3;

/// Supervisor calls want consistency, not creativity.
const DECISION_TEMPERATURE: f32 = 0.2;

/// Transcript length below which termination is not evaluated. Very short
/// exchanges (a greeting and a reply) always continue.
pub const MIN_MESSAGES_FOR_TERMINATION: usize = 3;

fn default_turns() -> u32 {
    1
}

/// The supervisor's speaker choice.
#[derive(Clone, Debug, Deserialize)]
pub struct AgentSelection {
    /// Id of the agent that should speak next.
    pub agent_id: String,
    /// Informational only; surfaced in logs, never parsed.
    #[serde(default)]
    pub reasoning: String,
    /// How many consecutive turns the agent should take. `0` means "pause
    /// and wait for the user".
    #[serde(default = "default_turns")]
    pub turns: u32,
}

/// The supervisor's verdict on whether the group conversation is over.
#[derive(Clone, Debug, Deserialize)]
pub struct TerminationDecision {
    pub should_terminate: bool,
    #[serde(default)]
    pub reason: String,
}

/// Wraps the supervisor model and renders its decision prompts.
pub struct Supervisor {
    client: Arc<dyn LanguageModel>,
}

impl Supervisor {
    pub fn new(client: Arc<dyn LanguageModel>) -> Self {
        Self { client }
    }

    /// Pick the next speaker for `state`, or `None` when the roster is empty.
    ///
    /// The model's raw choice is overridden when it names the single most
    /// recent speaker again: the first roster agent that differs is selected
    /// instead. Note the override only compares against the most recent
    /// speaker even though the prompt surfaces a wider recency window; the
    /// enforced guarantee is deliberately the narrower one.
    pub async fn select_next(&self, state: &ConversationState) -> Option<AgentSelection> {
        if state.roster.is_empty() {
            return None;
        }

        let recent_speakers = state.recent_distinct_speakers(RECENCY_WINDOW);
        let prompt = self.selection_prompt(state, &recent_speakers);

        let mut selection = match self.request_selection(&prompt).await {
            Some(selection) if state.roster.iter().any(|a| a.id == selection.agent_id) => selection,
            Some(selection) => {
                warn!(
                    "supervisor selected unknown agent '{}', falling back to roster order",
                    selection.agent_id
                );
                self.fallback_selection(state)?
            }
            None => self.fallback_selection(state)?,
        };

        // Anti-repetition override: never let the same agent speak twice in a
        // row when another agent is available.
        if let Some(last_speaker) = recent_speakers.first() {
            if selection.agent_id == *last_speaker {
                if let Some(other) = state.roster.iter().find(|a| a.id != *last_speaker) {
                    selection = AgentSelection {
                        agent_id: other.id.clone(),
                        reasoning: "Forced variety to avoid repetition".to_string(),
                        turns: selection.turns,
                    };
                }
            }
        }

        debug!(
            "selected speaker '{}' for {} turn(s): {}",
            selection.agent_id, selection.turns, selection.reasoning
        );
        Some(selection)
    }

    /// Ask whether the conversation has naturally concluded.
    ///
    /// Biased toward continuing: any call failure or unparseable payload
    /// returns `should_terminate: false`.
    pub async fn should_stop(&self, state: &ConversationState) -> TerminationDecision {
        if state.messages.len() < MIN_MESSAGES_FOR_TERMINATION {
            return TerminationDecision {
                should_terminate: false,
                reason: "conversation too short to evaluate".to_string(),
            };
        }

        let prompt = self.termination_prompt(state);
        let result = self
            .client
            .generate_structured(
                TERMINATION_SYSTEM_PROMPT,
                &prompt,
                DECISION_TEMPERATURE,
                None,
            )
            .await;

        match result {
            Ok(value) => match serde_json::from_value::<TerminationDecision>(value) {
                Ok(decision) => decision,
                Err(e) => {
                    warn!("termination payload did not parse: {}", e);
                    TerminationDecision {
                        should_terminate: false,
                        reason: "continuing due to parsing error".to_string(),
                    }
                }
            },
            Err(e) => {
                warn!("termination call failed: {}", e);
                TerminationDecision {
                    should_terminate: false,
                    reason: "continuing due to parsing error".to_string(),
                }
            }
        }
    }

    async fn request_selection(&self, prompt: &str) -> Option<AgentSelection> {
        let result = self
            .client
            .generate_structured(SELECTION_SYSTEM_PROMPT, prompt, DECISION_TEMPERATURE, None)
            .await;

        match result {
            Ok(value) => match serde_json::from_value::<AgentSelection>(value) {
                Ok(selection) => Some(selection),
                Err(e) => {
                    warn!("selection payload did not parse: {}", e);
                    None
                }
            },
            Err(e) => {
                warn!("selection call failed: {}", e);
                None
            }
        }
    }

    /// Deterministic fallback: the first roster agent.
    fn fallback_selection(&self, state: &ConversationState) -> Option<AgentSelection> {
        state.roster.first().map(|agent| AgentSelection {
            agent_id: agent.id.clone(),
            reasoning: "Fallback selection due to error".to_string(),
            turns: 1,
        })
    }

    fn selection_prompt(&self, state: &ConversationState, recent_speakers: &[String]) -> String {
        let mut prompt = String::from("Participants:\n");
        for agent in &state.roster {
            prompt.push_str(&format!(
                "- {} (id: {}): {}\n",
                agent.name, agent.id, agent.characteristics
            ));
        }

        prompt.push_str("\nRecent conversation:\n");
        prompt.push_str(&render_transcript(state, CONTEXT_WINDOW));

        if !recent_speakers.is_empty() {
            prompt.push_str(&format!(
                "\nThe last speakers were (most recent first): {}. \
                 The next speaker MUST be different from the most recent one.\n",
                recent_speakers.join(", ")
            ));
        }

        prompt.push_str(
            "\nDecide who should speak next and for how many turns. \
             Use turns = 0 if the group should pause and wait for the user.",
        );
        prompt
    }

    fn termination_prompt(&self, state: &ConversationState) -> String {
        format!(
            "Recent conversation:\n{}\nHas this group conversation reached a natural stopping \
             point?",
            render_transcript(state, CONTEXT_WINDOW)
        )
    }
}

const SELECTION_SYSTEM_PROMPT: &str = "You orchestrate a group conversation between a user and \
     several assistant personas. Given the participants and the recent transcript, pick the one \
     participant best placed to speak next. Respond with a JSON object: \
     {\"agent_id\": string, \"reasoning\": string, \"turns\": integer}.";

const TERMINATION_SYSTEM_PROMPT: &str = "You judge whether a group conversation has naturally \
     concluded. Simple greetings do not need a reply from every participant; let short social \
     exchanges end. Respond with a JSON object: \
     {\"should_terminate\": boolean, \"reason\": string}.";

/// Speaker-labeled rendering of the last `n` messages, one per line.
fn render_transcript(state: &ConversationState, n: usize) -> String {
    state
        .recent_messages(n)
        .iter()
        .map(|m| format!("{}: {}", m.speaker, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}
