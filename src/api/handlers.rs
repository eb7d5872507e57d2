//! HTTP request handlers

use super::sse::turn_stream;
use super::types::{
    ChatListResponse, ContinueResponse, EditRequest, EditResponse, ErrorResponse,
    FileListResponse, NewChatResponse, SendMessageRequest, SendMessageResponse, SuccessResponse,
    ToggleToolRequest, ToolsResponse, TreeResponse, UploadRequest, UploadResponse,
};
use super::AppState;
use crate::db::DbError;
use crate::files::{is_image, FileError};
use crate::llm::ChatMessage;
use crate::title;
use crate::tree::{Chat, ChatNode, TreeError};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::Value;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Chat management
        .route("/api/chats", get(list_chats))
        .route("/api/chats/new", post(create_chat))
        .route("/api/chats/:id", delete(delete_chat))
        .route("/api/chats/:id/tree", get(get_chat_tree))
        // Turns
        .route("/api/chats/:id/send", post(send_message))
        .route("/api/chats/:id/stream/:node_id", get(stream_response))
        .route("/api/chats/:id/edit", post(edit_message))
        .route("/api/chats/:id/continue/:node_id", post(continue_message))
        // File registry
        .route("/api/files/upload", post(upload_file))
        .route("/api/files", get(list_files))
        .route("/api/files/:id", get(get_file))
        // Tool management
        .route("/api/tools", get(get_tools))
        .route("/api/tools/toggle", post(toggle_tool))
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Chat Management
// ============================================================

async fn list_chats(State(state): State<AppState>) -> Result<Json<ChatListResponse>, AppError> {
    let chats = state
        .db
        .list_chats()
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(ChatListResponse { chats }))
}

async fn create_chat(State(state): State<AppState>) -> Result<Json<NewChatResponse>, AppError> {
    let chat = Chat::new();
    state
        .db
        .save_chat(&chat)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(NewChatResponse {
        success: true,
        chat_id: chat.id,
    }))
}

async fn delete_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    state.db.delete_chat(&id).map_err(|e| match e {
        DbError::ChatNotFound(_) => AppError::NotFound("Chat not found".to_string()),
        other => AppError::Internal(other.to_string()),
    })?;

    Ok(Json(SuccessResponse { success: true }))
}

async fn get_chat_tree(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TreeResponse>, AppError> {
    let chat = state.db.get_chat(&id).map_err(not_found_or_internal)?;

    Ok(Json(TreeResponse {
        current_node_id: chat.tree.current_node_id.clone(),
        tree: serde_json::to_value(&chat.tree).unwrap_or(Value::Null),
        title: chat.title,
    }))
}

// ============================================================
// Turns
// ============================================================

async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, AppError> {
    // Empty text is allowed when attachments carry the message
    if req.message.trim().is_empty() && req.files.is_empty() {
        return Err(AppError::BadRequest("Message cannot be empty".to_string()));
    }

    let mut chat = state.db.get_chat(&id).map_err(not_found_or_internal)?;

    let parent_id = chat.tree.current_node_id.clone();
    let node = ChatNode::new(
        crate::llm::Role::User,
        req.message.clone(),
        ChatMessage::user(req.message.clone(), req.files.clone()),
        Some(parent_id.clone()),
    )
    .with_files(req.files.clone());

    let node_id = chat
        .tree
        .append_child(&parent_id, node)
        .map_err(|e| AppError::NotFound(e.to_string()))?;
    chat.tree
        .set_current(&node_id)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    // First user message names the chat
    let mut updated_title = None;
    if chat.title == title::DEFAULT_TITLE {
        chat.title = if req.message.trim().is_empty() {
            title::from_files(&req.files, state.files.as_ref())
        } else {
            title::from_text(&req.message)
        };
        updated_title = Some(chat.title.clone());
    }

    chat.touch();
    state
        .db
        .save_chat(&chat)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(SendMessageResponse {
        success: true,
        node_id,
        updated_title,
    }))
}

async fn stream_response(
    State(state): State<AppState>,
    Path((chat_id, node_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let exists = state
        .db
        .chat_exists(&chat_id)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    if !exists {
        return Err(AppError::NotFound("Chat not found".to_string()));
    }

    let (tx, rx) = tokio::sync::mpsc::channel(256);

    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        orchestrator.run_turn(&chat_id, &node_id, tx).await;
    });

    Ok(turn_stream(rx))
}

async fn edit_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<EditRequest>,
) -> Result<Json<EditResponse>, AppError> {
    let mut chat = state.db.get_chat(&id).map_err(not_found_or_internal)?;

    let edited_role = chat
        .tree
        .get(&req.node_id)
        .map(|n| n.role)
        .ok_or_else(|| AppError::NotFound("Node not found".to_string()))?;

    let node_id = chat
        .tree
        .edit_as_sibling(&req.node_id, &req.content, req.files)
        .map_err(|e| match e {
            TreeError::RootEdit => AppError::BadRequest("Cannot edit root node".to_string()),
            other => AppError::NotFound(other.to_string()),
        })?;

    chat.touch();
    state
        .db
        .save_chat(&chat)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    // Edited user messages get a fresh generation from the client
    Ok(Json(EditResponse {
        success: true,
        node_id,
        should_generate: edited_role == crate::llm::Role::User,
    }))
}

async fn continue_message(
    State(state): State<AppState>,
    Path((chat_id, node_id)): Path<(String, String)>,
) -> Result<Json<ContinueResponse>, AppError> {
    let mut chat = state.db.get_chat(&chat_id).map_err(not_found_or_internal)?;

    let node = chat
        .tree
        .get(&node_id)
        .ok_or_else(|| AppError::NotFound("Node not found".to_string()))?;
    if node.role != crate::llm::Role::Assistant {
        return Err(AppError::BadRequest(
            "Can only continue assistant messages".to_string(),
        ));
    }

    chat.tree
        .set_current(&node_id)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    chat.touch();
    state
        .db
        .save_chat(&chat)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(ContinueResponse {
        success: true,
        node_id,
    }))
}

// ============================================================
// File Registry
// ============================================================

async fn upload_file(
    State(state): State<AppState>,
    Json(req): Json<UploadRequest>,
) -> Result<Json<UploadResponse>, AppError> {
    let bytes = BASE64
        .decode(req.data.as_bytes())
        .map_err(|e| AppError::BadRequest(format!("Invalid base64 payload: {e}")))?;

    let record = state
        .files
        .save_upload(&req.filename, &bytes)
        .map_err(|e| match e {
            FileError::TooLarge { .. } | FileError::EmptyFilename => {
                AppError::BadRequest(e.to_string())
            }
            other => AppError::Internal(other.to_string()),
        })?;

    Ok(Json(UploadResponse {
        success: true,
        is_image: is_image(&record.media_type),
        file_id: record.id,
        filename: record.filename,
        media_type: record.media_type,
    }))
}

async fn list_files(State(state): State<AppState>) -> Result<Json<FileListResponse>, AppError> {
    let files = state
        .files
        .list()
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(FileListResponse { files }))
}

async fn get_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let record = state
        .files
        .get(&id)
        .map_err(|_| AppError::NotFound("File not found".to_string()))?;

    let bytes = tokio::fs::read(&record.path)
        .await
        .map_err(|e| AppError::Internal(format!("Cannot read stored file: {e}")))?;

    Ok(([(header::CONTENT_TYPE, record.media_type)], bytes).into_response())
}

// ============================================================
// Tool Management
// ============================================================

async fn get_tools(State(state): State<AppState>) -> Result<Json<ToolsResponse>, AppError> {
    let overrides = state
        .db
        .get_tool_flags()
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(ToolsResponse {
        tools: state.tools.names(),
        enabled: state.tools.effective_flags(&overrides),
    }))
}

async fn toggle_tool(
    State(state): State<AppState>,
    Json(req): Json<ToggleToolRequest>,
) -> Result<Json<SuccessResponse>, AppError> {
    if !state.tools.contains(&req.tool_name) {
        return Err(AppError::NotFound("Tool not found".to_string()));
    }

    state
        .db
        .set_tool_flag(&req.tool_name, req.enabled)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    tracing::info!(tool = %req.tool_name, enabled = req.enabled, "Tool toggled");
    Ok(Json(SuccessResponse { success: true }))
}

// ============================================================
// Version
// ============================================================

async fn get_version() -> &'static str {
    concat!("bramble ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

fn not_found_or_internal(e: DbError) -> AppError {
    match e {
        DbError::ChatNotFound(_) => AppError::NotFound("Chat not found".to_string()),
        other => AppError::Internal(other.to_string()),
    }
}

enum AppError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
