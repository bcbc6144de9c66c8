//! Transport adaptation and transcript persistence.
//!
//! The workflow's event sequence is transport-agnostic; this module turns
//! each [`WorkflowEvent`] into the one-JSON-object-per-event frame the
//! serving layer writes to its SSE stream or socket channel, and defines the
//! [`TranscriptSink`] seam through which generated messages reach durable
//! storage.
//!
//! # Wire format
//!
//! ```text
//! { "type": "status",                data: { "message": ... } }
//! { "type": "agent_response",        data: { "content", "agentId", "agentName", "isComplete", "timestamp" } }
//! { "type": "credit_update",         data: { "creditsUsed", "remainingCredits" } }
//! { "type": "conversation_complete", data: { "conversationId", "totalCreditsUsed", "message", "outcome" } }
//! { "type": "error",                 data: { "error": ... } }
//! ```
//!
//! Framing beyond one JSON value per event (newlines, SSE `data:` prefixes)
//! is the transport's concern.

use crate::conversation::Message;
use crate::workflow::WorkflowEvent;
use async_trait::async_trait;
use serde_json::json;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;

/// Encode one event as its wire frame.
pub fn frame(event: &WorkflowEvent) -> serde_json::Value {
    match event {
        WorkflowEvent::Status { message } => json!({
            "type": "status",
            "data": { "message": message },
        }),
        WorkflowEvent::AgentResponse {
            agent_id,
            agent_name,
            content,
            timestamp,
            is_complete,
        } => json!({
            "type": "agent_response",
            "data": {
                "content": content,
                "agentId": agent_id,
                "agentName": agent_name,
                "isComplete": is_complete,
                "timestamp": timestamp,
            },
        }),
        WorkflowEvent::CreditUpdate {
            credits_used,
            remaining_credits,
        } => json!({
            "type": "credit_update",
            "data": {
                "creditsUsed": credits_used,
                "remainingCredits": remaining_credits,
            },
        }),
        WorkflowEvent::Completed {
            conversation_id,
            total_credits_used,
            message,
            outcome,
        } => json!({
            "type": "conversation_complete",
            "data": {
                "conversationId": conversation_id,
                "totalCreditsUsed": total_credits_used,
                "message": message,
                "outcome": outcome.as_str(),
            },
        }),
        WorkflowEvent::Error { message } => json!({
            "type": "error",
            "data": { "error": message },
        }),
    }
}

/// Destination for generated messages. The workflow appends every assistant
/// turn here before emitting its `agent_response` event; a failed append
/// aborts the run rather than let a turn silently vanish from the durable
/// transcript.
#[async_trait]
pub trait TranscriptSink: Send + Sync {
    async fn append(&self, conversation_id: &str, message: &Message) -> io::Result<()>;
}

/// Discards every message. The default sink for embedders that persist
/// transcripts through their own storage layer.
pub struct NullTranscript;

#[async_trait]
impl TranscriptSink for NullTranscript {
    async fn append(&self, _conversation_id: &str, _message: &Message) -> io::Result<()> {
        Ok(())
    }
}

/// File-backed transcript store: one `.jsonl` file per conversation, one
/// JSON-serialized [`Message`] per line, append-only.
pub struct JsonlTranscript {
    dir: PathBuf,
}

impl JsonlTranscript {
    /// Create a store rooted at `dir`. The directory is created on first
    /// append.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn file_path(&self, conversation_id: &str) -> PathBuf {
        // Conversation ids come from the caller; keep the filename tame.
        let safe: String = conversation_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.jsonl", safe))
    }

    /// Read a conversation's messages back, oldest first. A missing file is
    /// an empty transcript.
    pub fn load(&self, conversation_id: &str) -> io::Result<Vec<Message>> {
        let path = self.file_path(conversation_id);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = fs::File::open(&path)?;
        let reader = BufReader::new(file);
        let mut messages = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let message: Message = serde_json::from_str(&line).map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("corrupt transcript line: {}", e),
                )
            })?;
            messages.push(message);
        }
        Ok(messages)
    }
}

#[async_trait]
impl TranscriptSink for JsonlTranscript {
    async fn append(&self, conversation_id: &str, message: &Message) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_path(conversation_id))?;
        let line = serde_json::to_string(message)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}
