//! Conversation transcript and run state.
//!
//! The transcript is an append-only ordered sequence of [`Message`]s; the
//! orchestrator never edits or removes a message once appended. A
//! [`ConversationState`] bundles the transcript with the roster projection and
//! the loop counters, and is exclusively owned by one in-flight workflow run.

use crate::model::Role;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single transcript entry.
///
/// Serializes cleanly to one JSON object per message, which is also the
/// on-disk format used by
/// [`JsonlTranscript`](crate::stream::JsonlTranscript).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    /// Conversation role of this entry.
    pub role: Role,
    /// The message text.
    pub content: String,
    /// Display name of whoever produced the message ("You" for the user).
    pub speaker: String,
    /// Identifier of the producing agent, `None` for user/system entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// UTC wall-clock time the message was recorded.
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a user-authored message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            speaker: "You".to_string(),
            agent_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Create an assistant message attributed to a specific agent.
    pub fn from_agent(
        agent_id: impl Into<String>,
        speaker: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            speaker: speaker.into(),
            agent_id: Some(agent_id.into()),
            timestamp: Utc::now(),
        }
    }

    /// Epoch milliseconds of the message timestamp, as carried on the wire.
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

/// Read-only projection of one registered agent, used for prompt building.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentProfile {
    pub id: String,
    pub name: String,
    pub characteristics: String,
}

/// Mutable state of one conversation run.
///
/// Invariants maintained by the workflow loop:
/// - `turn_count <= max_turns` whenever the loop observes it;
/// - `complete` is monotonic: once `true` it never reverts;
/// - `messages` only ever grows.
#[derive(Clone, Debug)]
pub struct ConversationState {
    pub conversation_id: String,
    pub user_id: Option<String>,
    pub messages: Vec<Message>,
    /// Roster of participating agents, in registration order.
    pub roster: Vec<AgentProfile>,
    /// Agent that generated the most recent turn.
    pub current_speaker: Option<String>,
    /// Number of assistant turns generated so far in this run.
    pub turn_count: usize,
    /// Configured ceiling on assistant turns.
    pub max_turns: usize,
    /// Terminal flag, set exactly once when the run completes.
    pub complete: bool,
}

impl ConversationState {
    /// Start a fresh conversation from an initial user message.
    pub fn new(
        conversation_id: impl Into<String>,
        user_id: Option<String>,
        initial_message: impl Into<String>,
        roster: Vec<AgentProfile>,
        max_turns: usize,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            user_id,
            messages: vec![Message::user(initial_message)],
            roster,
            current_speaker: None,
            turn_count: 0,
            max_turns,
            complete: false,
        }
    }

    /// Rebuild state from a persisted transcript and append a new user
    /// message, so the group can pick the conversation back up.
    ///
    /// The turn counter restarts at zero; `max_turns` bounds each run, not
    /// the lifetime of the conversation.
    pub fn resume(
        conversation_id: impl Into<String>,
        user_id: Option<String>,
        mut transcript: Vec<Message>,
        new_message: impl Into<String>,
        roster: Vec<AgentProfile>,
        max_turns: usize,
    ) -> Self {
        transcript.push(Message::user(new_message));
        Self {
            conversation_id: conversation_id.into(),
            user_id,
            messages: transcript,
            roster,
            current_speaker: None,
            turn_count: 0,
            max_turns,
            complete: false,
        }
    }

    /// Append a message to the transcript.
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// The last `n` messages, oldest first.
    pub fn recent_messages(&self, n: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }

    /// The last `n` *distinct* assistant speakers, scanning backward from the
    /// end of the transcript. The most recent speaker comes first.
    pub fn recent_distinct_speakers(&self, n: usize) -> Vec<String> {
        let mut seen = Vec::new();
        for message in self.messages.iter().rev() {
            if message.role != Role::Assistant {
                continue;
            }
            if let Some(id) = &message.agent_id {
                if !seen.contains(id) {
                    seen.push(id.clone());
                    if seen.len() == n {
                        break;
                    }
                }
            }
        }
        seen
    }
}
