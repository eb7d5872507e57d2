//! HTTP API for the chat server

mod handlers;
mod sse;
mod types;

pub use handlers::create_router;
#[allow(unused_imports)] // Public API re-exports
pub use types::*;

use crate::db::Database;
use crate::files::{FileRegistry, FileStore};
use crate::llm::ModelClient;
use crate::orchestrator::Orchestrator;
use crate::tools::ToolRegistry;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub files: Arc<FileStore>,
    pub tools: Arc<ToolRegistry>,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(
        db: Database,
        files: Arc<FileStore>,
        client: Arc<dyn ModelClient>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        let registry: Arc<dyn FileRegistry> = files.clone();
        let orchestrator = Arc::new(Orchestrator::new(
            db.clone(),
            registry,
            client,
            tools.clone(),
        ));

        Self {
            db,
            files,
            tools,
            orchestrator,
        }
    }
}
