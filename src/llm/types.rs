//! Common types for model interactions

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One logical message as sent to or received from the model.
///
/// `content` is plain text for stored messages; user messages with
/// attachments are expanded into content parts during linearization
/// (see `formatter`). `files` carries attachment ids on stored user
/// messages and is stripped once the parts are expanded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: MessageBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageBody::Text(text.into()),
            reasoning_content: None,
            tool_calls: None,
            tool_call_id: None,
            files: None,
        }
    }

    pub fn user(text: impl Into<String>, files: Vec<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageBody::Text(text.into()),
            reasoning_content: None,
            tool_calls: None,
            tool_call_id: None,
            files: if files.is_empty() { None } else { Some(files) },
        }
    }

    /// Synthetic `tool` message correlating a result back to its call.
    pub fn tool_result(tool_call_id: Option<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: MessageBody::Text(content.into()),
            reasoning_content: None,
            tool_calls: None,
            tool_call_id,
            files: None,
        }
    }

    /// The plain-text content, empty for part-expanded messages.
    pub fn text(&self) -> &str {
        match &self.content {
            MessageBody::Text(s) => s,
            MessageBody::Parts(_) => "",
        }
    }
}

/// Message content: plain text or an ordered part sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageBody {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Default for MessageBody {
    fn default() -> Self {
        MessageBody::Text(String::new())
    }
}

/// One element of a multimodal content sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    InputText { text: String },
    ImageUrl { image_url: ImageUrl },
}

impl ContentPart {
    pub fn text(s: impl Into<String>) -> Self {
        ContentPart::Text { text: s.into() }
    }

    pub fn input_text(s: impl Into<String>) -> Self {
        ContentPart::InputText { text: s.into() }
    }

    pub fn image_data_url(media_type: &str, base64_data: &str) -> Self {
        ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: format!("data:{media_type};base64,{base64_data}"),
            },
        }
    }
}

/// Embedded image reference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// A tool invocation requested by the model.
///
/// `id` and `kind` may be absent on partially streamed calls; `function`
/// fields are assembled by fragment concatenation (see `llama`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub function: FunctionCall,
}

/// Named function plus its argument document (a JSON string)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// A recorded tool result, correlated to its call id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultRecord {
    pub tool_call_id: Option<String>,
    pub content: String,
}

/// Tool definition advertised to the model
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Incremental events produced by a streaming model call.
///
/// Tool-call fragments are merged inside the client; `Complete` carries
/// the fully assembled assistant message.
#[derive(Debug, Clone)]
pub enum ModelEvent {
    Content(String),
    ReasoningContent(String),
    Timings(Value),
    Complete(ChatMessage),
}
