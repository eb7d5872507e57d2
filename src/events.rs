//! Turn progress events
//!
//! The ordered unit stream a client renders live. Tags are stable wire
//! names; clients must ignore tags they do not recognize.

use serde::Serialize;
use serde_json::Value;

/// One tagged unit of turn progress
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    Status { content: String },
    Content { content: String },
    ReasoningContent { content: String },
    Timings { timings: Value },
    ToolCall { name: String, args: Value },
    ToolResult {
        tool_call_id: Option<String>,
        result: String,
    },
    Finished { node_id: String },
    Error { content: String },
}

impl TurnEvent {
    pub fn status(content: impl Into<String>) -> Self {
        TurnEvent::Status {
            content: content.into(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        TurnEvent::Error {
            content: content.into(),
        }
    }

    /// Wire tag for this event
    pub fn tag(&self) -> &'static str {
        match self {
            TurnEvent::Status { .. } => "status",
            TurnEvent::Content { .. } => "content",
            TurnEvent::ReasoningContent { .. } => "reasoning_content",
            TurnEvent::Timings { .. } => "timings",
            TurnEvent::ToolCall { .. } => "tool_call",
            TurnEvent::ToolResult { .. } => "tool_result",
            TurnEvent::Finished { .. } => "finished",
            TurnEvent::Error { .. } => "error",
        }
    }
}
