//! Web search tool backed by a SearxNG-compatible JSON endpoint

use super::{Tool, ToolOutput};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt::Write;
use std::time::Duration;

const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_RESULTS: usize = 5;
const MAX_RESULTS: usize = 10;

/// Queries a search endpoint and formats results as markdown
pub struct WebSearchTool {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl WebSearchTool {
    /// `base_url` points at a SearxNG instance; `None` leaves the tool
    /// registered but unable to run.
    pub fn new(base_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(SEARCH_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");

        Self { client, base_url }
    }
}

#[derive(Debug, Deserialize)]
struct WebSearchInput {
    query: String,
    #[serde(default)]
    num_results: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> String {
        "Search the web and return a list of result URLs with descriptions.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "num_results": {
                    "type": "integer",
                    "default": DEFAULT_RESULTS,
                    "description": "Number of search results to return (max 10).",
                },
            },
            "required": ["query"],
        })
    }

    async fn run(&self, input: Value) -> ToolOutput {
        let input: WebSearchInput = match serde_json::from_value(input) {
            Ok(i) => i,
            Err(e) => return ToolOutput::error(format!("Invalid input: {e}")),
        };

        let Some(base_url) = &self.base_url else {
            return ToolOutput::error(
                "Web search is not configured on this server (SEARCH_URL is unset)",
            );
        };

        let limit = input
            .num_results
            .unwrap_or(DEFAULT_RESULTS)
            .clamp(1, MAX_RESULTS);

        tracing::info!(query = %input.query, limit, "Performing web search");

        let url = format!("{}/search", base_url.trim_end_matches('/'));
        let response = match self
            .client
            .get(&url)
            .query(&[("q", input.query.as_str()), ("format", "json")])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return ToolOutput::error(format!("Error performing search: {e}")),
        };

        if !response.status().is_success() {
            return ToolOutput::error(format!("Search failed: HTTP {}", response.status()));
        }

        let parsed: SearchResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => return ToolOutput::error(format!("Error parsing search response: {e}")),
        };

        ToolOutput::success(format_results(&parsed.results, limit))
    }
}

fn format_results(results: &[SearchHit], limit: usize) -> String {
    let mut out = String::new();
    for (idx, hit) in results.iter().take(limit).enumerate() {
        let _ = write!(
            out,
            "### {}. {}\n\n**Description:** {}\n\n**URL:** [{}]({})\n\n",
            idx + 1,
            hit.title,
            hit.content,
            hit.url,
            hit.url
        );
    }

    if out.is_empty() {
        "No results found.".to_string()
    } else {
        out.trim_end().to_string()
    }
}
