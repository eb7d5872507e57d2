//! Tools the model can invoke mid-turn

mod calculator;
mod read_url;
mod web_search;

pub use calculator::CalculatorTool;
pub use read_url::ReadUrlTool;
pub use web_search::WebSearchTool;

use crate::llm::ToolDefinition;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Result from tool execution
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub success: bool,
    pub output: String,
}

impl ToolOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: message.into(),
        }
    }
}

/// Trait for tools that can be invoked by the model
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name
    fn name(&self) -> &str;

    /// Tool description for the model
    fn description(&self) -> String;

    /// JSON schema for tool input
    fn input_schema(&self) -> Value;

    /// Execute the tool
    async fn run(&self, input: Value) -> ToolOutput;
}

/// Registered tools plus per-tool enablement.
///
/// Only tools both registered and currently enabled are advertised to
/// the model or eligible for invocation. Flags default to enabled;
/// stored overrides come from the database.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create the standard tool set
    pub fn new(search_url: Option<String>) -> Self {
        let tools: Vec<Arc<dyn Tool>> = vec![
            Arc::new(CalculatorTool),
            Arc::new(WebSearchTool::new(search_url)),
            Arc::new(ReadUrlTool::new()),
        ];
        Self { tools }
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name() == name)
    }

    /// Effective enablement for every registered tool: enabled unless a
    /// stored override says otherwise.
    pub fn effective_flags(&self, overrides: &HashMap<String, bool>) -> HashMap<String, bool> {
        self.tools
            .iter()
            .map(|t| {
                let name = t.name().to_string();
                let enabled = overrides.get(&name).copied().unwrap_or(true);
                (name, enabled)
            })
            .collect()
    }

    /// Definitions for the currently enabled tools, for the model call
    pub fn enabled_definitions(&self, flags: &HashMap<String, bool>) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .filter(|t| flags.get(t.name()).copied().unwrap_or(false))
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description(),
                input_schema: t.input_schema(),
            })
            .collect()
    }
}
