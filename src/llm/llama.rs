//! Streaming client for llama-server's OpenAI-compatible chat endpoint
//!
//! Consumes the upstream SSE body line by line, forwarding content and
//! reasoning deltas as they arrive and merging indexed tool-call fragments
//! into fully assembled calls for the terminal `Complete` event.

use super::types::{
    ChatMessage, FunctionCall, MessageBody, ModelEvent, Role, ToolCallRecord, ToolDefinition,
};
use super::{LlmError, ModelClient, ModelStream};
use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::pin::Pin;
use std::time::Duration;

/// Client for an OpenAI-compatible `chat/completions` endpoint
pub struct LlamaClient {
    client: Client,
    url: String,
}

impl LlamaClient {
    pub fn new(url: impl Into<String>) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl ModelClient for LlamaClient {
    async fn stream(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ModelStream, LlmError> {
        let tool_schemas: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    }
                })
            })
            .collect();

        let payload = json!({
            "messages": messages,
            "tools": tool_schemas,
            "stream": true,
            "timings_per_token": true,
        });

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::network(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    LlmError::network(format!("Connection failed: {e}"))
                } else {
                    LlmError::unknown(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = match status.as_u16() {
                400..=499 => LlmError::invalid_request(format!("HTTP {status}: {body}")),
                500..=599 => LlmError::server_error(format!("HTTP {status}: {body}")),
                _ => LlmError::unknown(format!("HTTP {status}: {body}")),
            };
            tracing::warn!(kind = ?err.kind, status = %status, "Model endpoint returned an error");
            return Err(err);
        }

        let bytes: Pin<Box<dyn Stream<Item = Result<Vec<u8>, reqwest::Error>> + Send>> =
            Box::pin(response.bytes_stream().map(|r| r.map(|b| b.to_vec())));

        let state = StreamState {
            bytes,
            buf: Vec::new(),
            acc: DeltaAccumulator::default(),
            pending: VecDeque::new(),
            finished: false,
        };

        let stream = stream::unfold(state, |mut state| async move {
            loop {
                if let Some(item) = state.pending.pop_front() {
                    return Some((item, state));
                }
                if state.finished {
                    return None;
                }

                match state.bytes.next().await {
                    Some(Ok(chunk)) => {
                        state.buf.extend_from_slice(&chunk);
                        state.drain_lines();
                    }
                    Some(Err(e)) => {
                        state.finished = true;
                        state
                            .pending
                            .push_back(Err(LlmError::network(format!("Stream error: {e}"))));
                    }
                    None => {
                        // Flush a trailing line that arrived without a newline
                        let rest = std::mem::take(&mut state.buf);
                        if let Ok(line) = String::from_utf8(rest) {
                            state.handle_line(line.trim_end_matches('\r'));
                        }
                        state.finish();
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

struct StreamState {
    bytes: Pin<Box<dyn Stream<Item = Result<Vec<u8>, reqwest::Error>> + Send>>,
    buf: Vec<u8>,
    acc: DeltaAccumulator,
    pending: VecDeque<Result<ModelEvent, LlmError>>,
    finished: bool,
}

impl StreamState {
    /// Split completed lines out of the byte buffer and process each.
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = self.buf.drain(..=pos).collect();
            if self.finished {
                continue;
            }
            let Ok(line) = std::str::from_utf8(&line_bytes) else {
                continue;
            };
            let line = line.trim_end_matches(['\n', '\r']).to_string();
            self.handle_line(&line);
        }
    }

    fn handle_line(&mut self, line: &str) {
        if self.finished {
            return;
        }
        let Some(data) = line.strip_prefix("data: ") else {
            return;
        };
        if data.trim() == "[DONE]" {
            self.finish();
            return;
        }

        let (events, stop) = self.acc.apply(data);
        for ev in events {
            self.pending.push_back(Ok(ev));
        }
        if stop {
            self.finish();
        }
    }

    /// Emit the terminal `Complete` event if any chunk was observed.
    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if let Some(message) = self.acc.assemble() {
            self.pending.push_back(Ok(ModelEvent::Complete(message)));
        }
    }
}

/// Accumulates streamed deltas into a final assistant message.
///
/// Tool-call fragments are keyed by their delta index; `name` and
/// `arguments` grow by concatenation in arrival order, while `id` and
/// `type` are overwritten by whichever fragment last carried them.
#[derive(Default)]
struct DeltaAccumulator {
    content: String,
    reasoning: String,
    tool_calls: BTreeMap<u32, PartialToolCall>,
    saw_chunk: bool,
}

#[derive(Default)]
struct PartialToolCall {
    id: Option<String>,
    kind: Option<String>,
    name: String,
    arguments: String,
}

impl DeltaAccumulator {
    /// Apply one `data:` payload. Returns the events to forward and
    /// whether the stream should stop (upstream sent an empty choice
    /// list, its end-of-stream marker before `[DONE]`).
    fn apply(&mut self, data: &str) -> (Vec<ModelEvent>, bool) {
        let mut events = Vec::new();

        // Malformed chunks are skipped, not fatal
        let Ok(chunk) = serde_json::from_str::<StreamChunk>(data) else {
            return (events, false);
        };

        // A chunk without choices is skipped; an explicitly empty choice
        // list is the upstream's end-of-stream marker
        let Some(choices) = chunk.choices else {
            return (events, false);
        };
        if choices.is_empty() {
            return (events, true);
        }
        self.saw_chunk = true;

        if let Some(timings) = chunk.timings {
            events.push(ModelEvent::Timings(timings));
        }

        if let Some(choice) = choices.into_iter().next() {
            let delta = choice.delta;

            if let Some(text) = delta.content {
                if !text.is_empty() {
                    self.content.push_str(&text);
                    events.push(ModelEvent::Content(text));
                }
            }

            if let Some(text) = delta.reasoning_content {
                if !text.is_empty() {
                    self.reasoning.push_str(&text);
                    events.push(ModelEvent::ReasoningContent(text));
                }
            }

            if let Some(fragments) = delta.tool_calls {
                for fragment in fragments {
                    self.merge_fragment(&fragment);
                }
            }
        }

        (events, false)
    }

    fn merge_fragment(&mut self, fragment: &ToolCallFragment) {
        let entry = self.tool_calls.entry(fragment.index).or_default();
        if let Some(function) = &fragment.function {
            if let Some(name) = &function.name {
                entry.name.push_str(name);
            }
            if let Some(arguments) = &function.arguments {
                entry.arguments.push_str(arguments);
            }
        }
        if let Some(id) = &fragment.id {
            entry.id = Some(id.clone());
        }
        if let Some(kind) = &fragment.kind {
            entry.kind = Some(kind.clone());
        }
    }

    /// Build the final assistant message, or `None` if the upstream never
    /// produced a single chunk.
    fn assemble(&mut self) -> Option<ChatMessage> {
        if !self.saw_chunk {
            return None;
        }

        let tool_calls: Vec<ToolCallRecord> = std::mem::take(&mut self.tool_calls)
            .into_values()
            .map(|partial| ToolCallRecord {
                id: partial.id,
                kind: partial.kind,
                function: FunctionCall {
                    name: partial.name,
                    arguments: partial.arguments,
                },
            })
            .collect();

        Some(ChatMessage {
            role: Role::Assistant,
            content: MessageBody::Text(std::mem::take(&mut self.content)),
            reasoning_content: Some(std::mem::take(&mut self.reasoning)),
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            tool_call_id: None,
            files: None,
        })
    }
}

// Upstream wire types

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Option<Vec<StreamChoice>>,
    #[serde(default)]
    timings: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallFragment>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallFragment {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    function: Option<FunctionFragment>,
}

#[derive(Debug, Deserialize)]
struct FunctionFragment {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}
