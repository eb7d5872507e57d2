//! URL reader tool - fetch a page and reduce it to readable text

use super::{Tool, ToolOutput};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetches a URL and strips markup down to its text content
pub struct ReadUrlTool {
    client: reqwest::Client,
    strip_blocks: Regex,
    strip_tags: Regex,
    collapse_blank: Regex,
}

impl ReadUrlTool {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            // script/style/noscript bodies and HTML comments carry no text
            strip_blocks: Regex::new(
                r"(?is)<(script|style|noscript)\b[^>]*>.*?</(script|style|noscript)>|<!--.*?-->",
            )
            .expect("invalid strip_blocks regex"),
            strip_tags: Regex::new(r"(?s)<[^>]+>").expect("invalid strip_tags regex"),
            collapse_blank: Regex::new(r"\n{3,}").expect("invalid collapse_blank regex"),
        }
    }

    fn extract_text(&self, html: &str) -> String {
        let no_blocks = self.strip_blocks.replace_all(html, "");
        let no_tags = self.strip_tags.replace_all(&no_blocks, "\n");
        let decoded = decode_entities(&no_tags);

        let trimmed_lines: String = decoded
            .lines()
            .map(str::trim)
            .collect::<Vec<_>>()
            .join("\n");
        self.collapse_blank
            .replace_all(&trimmed_lines, "\n\n")
            .trim()
            .to_string()
    }
}

impl Default for ReadUrlTool {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct ReadUrlInput {
    url: String,
}

#[async_trait]
impl Tool for ReadUrlTool {
    fn name(&self) -> &str {
        "read_url"
    }

    fn description(&self) -> String {
        "Fetch a webpage from a given URL and return its main readable text content.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL of the webpage to read.",
                },
            },
            "required": ["url"],
        })
    }

    async fn run(&self, input: Value) -> ToolOutput {
        let input: ReadUrlInput = match serde_json::from_value(input) {
            Ok(i) => i,
            Err(e) => return ToolOutput::error(format!("Invalid input: {e}")),
        };

        tracing::info!(url = %input.url, "Fetching URL");

        let response = match self.client.get(&input.url).send().await {
            Ok(r) => r,
            Err(e) => return ToolOutput::error(format!("Error fetching URL: {e}")),
        };

        if !response.status().is_success() {
            return ToolOutput::error(format!("Error fetching URL: HTTP {}", response.status()));
        }

        match response.text().await {
            Ok(body) => ToolOutput::success(self.extract_text(&body)),
            Err(e) => ToolOutput::error(format!("Error reading response body: {e}")),
        }
    }
}

/// Decode the handful of entities that dominate real pages
fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}
