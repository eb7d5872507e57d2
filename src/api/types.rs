//! API request and response types

use crate::db::{ChatSummary, FileRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Request to send a chat message
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub files: Vec<String>,
}

/// Request to edit a message into a sibling branch
#[derive(Debug, Deserialize)]
pub struct EditRequest {
    pub node_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub files: Vec<String>,
}

/// Request to upload a file (bytes as base64)
#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub filename: String,
    pub data: String,
}

/// Request to toggle a tool on or off
#[derive(Debug, Deserialize)]
pub struct ToggleToolRequest {
    pub tool_name: String,
    #[serde(default)]
    pub enabled: bool,
}

/// Response with the chat listing
#[derive(Debug, Serialize)]
pub struct ChatListResponse {
    pub chats: Vec<ChatSummary>,
}

/// Response after creating a chat
#[derive(Debug, Serialize)]
pub struct NewChatResponse {
    pub success: bool,
    pub chat_id: String,
}

/// Response with a chat's full tree snapshot
#[derive(Debug, Serialize)]
pub struct TreeResponse {
    pub tree: Value,
    pub current_node_id: String,
    pub title: String,
}

/// Response after appending a user message
#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub success: bool,
    pub node_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_title: Option<String>,
}

/// Response after an edit
#[derive(Debug, Serialize)]
pub struct EditResponse {
    pub success: bool,
    pub node_id: String,
    pub should_generate: bool,
}

/// Response after selecting a node to continue from
#[derive(Debug, Serialize)]
pub struct ContinueResponse {
    pub success: bool,
    pub node_id: String,
}

/// Response after a file upload
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub file_id: String,
    pub filename: String,
    pub media_type: String,
    pub is_image: bool,
}

/// Response with the file registry listing
#[derive(Debug, Serialize)]
pub struct FileListResponse {
    pub files: Vec<FileRecord>,
}

/// Response with tool names and their enablement
#[derive(Debug, Serialize)]
pub struct ToolsResponse {
    pub tools: Vec<String>,
    pub enabled: HashMap<String, bool>,
}

/// Response for simple lifecycle actions
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
