//! Turn orchestration
//!
//! Drives one user-triggered turn: linearize the selected branch, stream
//! the model response, run at most one round of tool calls, stream the
//! follow-up response, and commit the result into the tree. Progress is
//! reported as an ordered `TurnEvent` stream; failures become a terminal
//! error event rather than a rollback of already-checkpointed state.

use crate::db::{Database, DbError};
use crate::events::TurnEvent;
use crate::files::FileRegistry;
use crate::formatter;
use crate::llm::{
    ChatMessage, LlmError, ModelClient, ModelEvent, Role, ToolCallRecord, ToolDefinition,
    ToolResultRecord,
};
use crate::tools::ToolRegistry;
use crate::tree::{ChatNode, TreeError};
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::Sender;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Error, Debug)]
pub enum TurnError {
    #[error("Chat not found: {0}")]
    ChatNotFound(String),
    #[error("Node not found: {0}")]
    NodeNotFound(String),
    #[error("No response from model")]
    UpstreamEmpty,
    #[error("A turn is already running for this chat")]
    Busy,
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// Per-chat mutual exclusion for mutating turns.
///
/// A guard is held for the whole orchestrator run so two concurrent
/// streams can never race on the same tree's children or current
/// pointer. Reads do not take this lock.
#[derive(Default)]
pub struct TurnLocks {
    chats: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TurnLocks {
    fn acquire(&self, chat_id: &str) -> Option<OwnedMutexGuard<()>> {
        let lock = {
            let mut map = self.chats.lock().unwrap();
            map.entry(chat_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.try_lock_owned().ok()
    }
}

/// Orchestrates streamed turns against the conversation store
pub struct Orchestrator {
    db: Database,
    files: Arc<dyn FileRegistry>,
    client: Arc<dyn ModelClient>,
    tools: Arc<ToolRegistry>,
    locks: TurnLocks,
}

impl Orchestrator {
    pub fn new(
        db: Database,
        files: Arc<dyn FileRegistry>,
        client: Arc<dyn ModelClient>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            db,
            files,
            client,
            tools,
            locks: TurnLocks::default(),
        }
    }

    /// Run one turn to completion, reporting progress on `tx`.
    ///
    /// Always ends the stream with either `finished` or `error`. The
    /// receiver going away does not stop the turn; it keeps running to
    /// its next durability checkpoint.
    pub async fn run_turn(&self, chat_id: &str, node_id: &str, tx: Sender<TurnEvent>) {
        tracing::info!(chat_id, node_id, "Starting turn");

        match self.drive(chat_id, node_id, &tx).await {
            Ok(committed) => {
                tracing::info!(chat_id, node_id = %committed, "Turn committed");
                send(&tx, TurnEvent::Finished { node_id: committed }).await;
            }
            Err(e) => {
                tracing::error!(chat_id, node_id, error = %e, "Turn failed");
                send(&tx, TurnEvent::error(format!("Error: {e}"))).await;
            }
        }
    }

    async fn drive(
        &self,
        chat_id: &str,
        node_id: &str,
        tx: &Sender<TurnEvent>,
    ) -> Result<String, TurnError> {
        let _guard = self.locks.acquire(chat_id).ok_or(TurnError::Busy)?;

        send(tx, TurnEvent::status("Starting response...")).await;

        let mut chat = self.db.get_chat(chat_id).map_err(|e| match e {
            DbError::ChatNotFound(id) => TurnError::ChatNotFound(id),
            other => TurnError::Db(other),
        })?;
        if !chat.tree.contains(node_id) {
            return Err(TurnError::NodeNotFound(node_id.to_string()));
        }

        let flags = self.tools.effective_flags(&self.db.get_tool_flags()?);
        let definitions = self.tools.enabled_definitions(&flags);

        let mut messages = chat.tree.linearize(node_id)?;
        formatter::expand_path(&mut messages, self.files.as_ref());

        let mut final_message = self.stream_once(&messages, &definitions, tx).await?;
        let mut commit_target = node_id.to_string();

        let tool_calls = final_message.tool_calls.clone().unwrap_or_default();
        if !tool_calls.is_empty() {
            // Commit the tool-calling assistant node before executing
            // anything, so a crash after tool execution cannot lose the
            // calls themselves.
            let assistant = ChatNode::new(
                Role::Assistant,
                final_message.text(),
                final_message.clone(),
                Some(node_id.to_string()),
            )
            .with_tool_calls(tool_calls.clone());
            let assistant_id = chat.tree.append_child(node_id, assistant)?;
            chat.tree.set_current(&assistant_id)?;

            let results = self.execute_tool_calls(&tool_calls, &flags, tx).await;

            if let Some(node) = chat.tree.get_mut(&assistant_id) {
                node.tool_results = Some(results.clone());
            }
            chat.touch();
            self.db.save_chat(&chat)?;

            // Follow-up call: the branch up to the assistant node plus one
            // synthetic tool message per result.
            let mut followup = chat.tree.linearize(&assistant_id)?;
            formatter::expand_path(&mut followup, self.files.as_ref());
            for result in &results {
                followup.push(ChatMessage::tool_result(
                    result.tool_call_id.clone(),
                    result.content.clone(),
                ));
            }

            send(tx, TurnEvent::status("Processing tool results...")).await;
            final_message = self.stream_once(&followup, &definitions, tx).await?;
            commit_target = assistant_id;
        }

        // Commit. Continuing an assistant node rewrites its content in
        // place; anything else gets a fresh assistant node. Tool calls in
        // the follow-up response stay unexecuted in the committed message:
        // one tool round per turn.
        let target_is_assistant = chat
            .tree
            .get(&commit_target)
            .map(|n| n.role == Role::Assistant)
            .unwrap_or(false);

        let committed_id = if target_is_assistant {
            if let Some(node) = chat.tree.get_mut(&commit_target) {
                node.content = final_message.text().to_string();
            }
            commit_target
        } else {
            let node = ChatNode::new(
                Role::Assistant,
                final_message.text(),
                final_message.clone(),
                Some(commit_target.clone()),
            );
            let id = chat.tree.append_child(&commit_target, node)?;
            chat.tree.set_current(&id)?;
            id
        };

        chat.touch();
        self.db.save_chat(&chat)?;
        Ok(committed_id)
    }

    /// Consume one streaming model call, forwarding deltas as they
    /// arrive. Returns the terminal assembled message.
    async fn stream_once(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        tx: &Sender<TurnEvent>,
    ) -> Result<ChatMessage, TurnError> {
        let mut stream = self.client.stream(messages, tools).await?;

        let mut terminal = None;
        while let Some(event) = stream.next().await {
            match event? {
                ModelEvent::Content(text) => {
                    send(tx, TurnEvent::Content { content: text }).await;
                }
                ModelEvent::ReasoningContent(text) => {
                    send(tx, TurnEvent::ReasoningContent { content: text }).await;
                }
                ModelEvent::Timings(data) => {
                    send(tx, TurnEvent::Timings { timings: data }).await;
                }
                ModelEvent::Complete(message) => {
                    terminal = Some(message);
                    break;
                }
            }
        }

        terminal.ok_or(TurnError::UpstreamEmpty)
    }

    /// Execute tool calls sequentially, in delta-arrival order.
    ///
    /// Malformed arguments skip that call; unknown or disabled tools are
    /// skipped silently with no wire events. Neither aborts the turn.
    async fn execute_tool_calls(
        &self,
        calls: &[ToolCallRecord],
        flags: &HashMap<String, bool>,
        tx: &Sender<TurnEvent>,
    ) -> Vec<ToolResultRecord> {
        let mut results = Vec::new();

        for call in calls {
            let name = &call.function.name;

            let args: Value = match serde_json::from_str(&call.function.arguments) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(tool = %name, error = %e, "Skipping tool call with malformed arguments");
                    continue;
                }
            };

            let Some(tool) = self.tools.get(name) else {
                tracing::debug!(tool = %name, "Skipping unknown tool");
                continue;
            };
            if !flags.get(name.as_str()).copied().unwrap_or(false) {
                tracing::debug!(tool = %name, "Skipping disabled tool");
                continue;
            }

            send(
                tx,
                TurnEvent::ToolCall {
                    name: name.clone(),
                    args: args.clone(),
                },
            )
            .await;

            tracing::info!(tool = %name, tool_call_id = ?call.id, "Executing tool");
            let output = tool.run(args).await;
            if !output.success {
                tracing::warn!(tool = %name, output = %output.output, "Tool reported an error");
            }

            send(
                tx,
                TurnEvent::ToolResult {
                    tool_call_id: call.id.clone(),
                    result: output.output.clone(),
                },
            )
            .await;

            results.push(ToolResultRecord {
                tool_call_id: call.id.clone(),
                content: output.output,
            });
        }

        results
    }
}

/// Forward an event, ignoring a closed receiver: a disconnected client
/// stops seeing progress but the turn still checkpoints.
async fn send(tx: &Sender<TurnEvent>, event: TurnEvent) {
    let _ = tx.send(event).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::ResolvedFile;
    use crate::llm::{FunctionCall, MessageBody, ModelStream};
    use crate::tree::Chat;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tokio::sync::mpsc;

    struct NoFiles;

    impl FileRegistry for NoFiles {
        fn resolve(&self, _file_id: &str) -> Option<ResolvedFile> {
            None
        }
    }

    /// Model client that replays scripted delta sequences, one per call
    struct ScriptedClient {
        calls: std::sync::Mutex<VecDeque<Vec<Result<ModelEvent, LlmError>>>>,
    }

    impl ScriptedClient {
        fn new(calls: Vec<Vec<Result<ModelEvent, LlmError>>>) -> Self {
            Self {
                calls: std::sync::Mutex::new(calls.into()),
            }
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedClient {
        async fn stream(
            &self,
            _messages: &[ChatMessage],
            _tools: &[ToolDefinition],
        ) -> Result<ModelStream, LlmError> {
            let events = self.calls.lock().unwrap().pop_front().unwrap_or_default();
            Ok(Box::pin(futures::stream::iter(events)))
        }
    }

    fn assistant_message(text: &str, tool_calls: Option<Vec<ToolCallRecord>>) -> ChatMessage {
        ChatMessage {
            role: Role::Assistant,
            content: MessageBody::Text(text.to_string()),
            reasoning_content: Some(String::new()),
            tool_calls,
            tool_call_id: None,
            files: None,
        }
    }

    fn calculator_call(arguments: &str) -> ToolCallRecord {
        ToolCallRecord {
            id: Some("call_1".to_string()),
            kind: Some("function".to_string()),
            function: FunctionCall {
                name: "calculator".to_string(),
                arguments: arguments.to_string(),
            },
        }
    }

    /// A chat with one user message appended under the root
    fn seed_chat(db: &Database, text: &str) -> (String, String) {
        let mut chat = Chat::new();
        let root_id = chat.tree.root_id.clone();
        let node = ChatNode::new(
            Role::User,
            text,
            ChatMessage::user(text, vec![]),
            Some(root_id.clone()),
        );
        let node_id = chat.tree.append_child(&root_id, node).unwrap();
        chat.tree.set_current(&node_id).unwrap();
        db.save_chat(&chat).unwrap();
        (chat.id, node_id)
    }

    fn orchestrator(db: Database, client: ScriptedClient) -> Orchestrator {
        Orchestrator::new(
            db,
            Arc::new(NoFiles),
            Arc::new(client),
            Arc::new(ToolRegistry::new(None)),
        )
    }

    async fn collect_events(orch: &Orchestrator, chat_id: &str, node_id: &str) -> Vec<TurnEvent> {
        let (tx, mut rx) = mpsc::channel(1024);
        orch.run_turn(chat_id, node_id, tx).await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn tags(events: &[TurnEvent]) -> Vec<&'static str> {
        events.iter().map(TurnEvent::tag).collect()
    }

    #[tokio::test]
    async fn plain_turn_commits_one_assistant_node() {
        let db = Database::open_in_memory().unwrap();
        let (chat_id, node_id) = seed_chat(&db, "hello");

        let client = ScriptedClient::new(vec![vec![
            Ok(ModelEvent::Content("Hi ".to_string())),
            Ok(ModelEvent::Content("there".to_string())),
            Ok(ModelEvent::Complete(assistant_message("Hi there", None))),
        ]]);
        let orch = orchestrator(db.clone(), client);

        let events = collect_events(&orch, &chat_id, &node_id).await;
        assert_eq!(
            tags(&events),
            vec!["status", "content", "content", "finished"]
        );

        let TurnEvent::Finished { node_id: committed } = events.last().unwrap() else {
            panic!("expected finished event");
        };

        let chat = db.get_chat(&chat_id).unwrap();
        let node = chat.tree.get(committed).unwrap();
        assert_eq!(node.role, Role::Assistant);
        assert_eq!(node.content, "Hi there");
        assert_eq!(node.parent_id.as_deref(), Some(node_id.as_str()));
        assert_eq!(chat.tree.current_node_id, *committed);
    }

    #[tokio::test]
    async fn calculator_turn_runs_the_tool_round() {
        let db = Database::open_in_memory().unwrap();
        let (chat_id, node_id) = seed_chat(&db, "2+2?");

        let client = ScriptedClient::new(vec![
            vec![Ok(ModelEvent::Complete(assistant_message(
                "",
                Some(vec![calculator_call(
                    r#"{"num1":2,"num2":2,"operation":"add"}"#,
                )]),
            )))],
            vec![
                Ok(ModelEvent::Content("The answer is 4".to_string())),
                Ok(ModelEvent::Complete(assistant_message(
                    "The answer is 4",
                    None,
                ))),
            ],
        ]);
        let orch = orchestrator(db.clone(), client);

        let events = collect_events(&orch, &chat_id, &node_id).await;
        assert_eq!(
            tags(&events),
            vec![
                "status",
                "tool_call",
                "tool_result",
                "status",
                "content",
                "finished"
            ]
        );

        let TurnEvent::ToolResult { result, .. } = &events[2] else {
            panic!("expected tool_result event");
        };
        assert_eq!(result, "4");

        let chat = db.get_chat(&chat_id).unwrap();
        let TurnEvent::Finished { node_id: committed } = events.last().unwrap() else {
            panic!("expected finished event");
        };

        // The tool round rewrote the assistant node in place
        let node = chat.tree.get(committed).unwrap();
        assert_eq!(node.role, Role::Assistant);
        assert_eq!(node.content, "The answer is 4");
        assert_eq!(node.parent_id.as_deref(), Some(node_id.as_str()));

        let results = node.tool_results.as_ref().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "4");
        assert_eq!(results[0].tool_call_id.as_deref(), Some("call_1"));
        assert!(node.tool_calls.is_some());
    }

    #[tokio::test]
    async fn disabled_tool_is_silently_skipped() {
        let db = Database::open_in_memory().unwrap();
        db.set_tool_flag("calculator", false).unwrap();
        let (chat_id, node_id) = seed_chat(&db, "2+2?");

        let client = ScriptedClient::new(vec![
            vec![Ok(ModelEvent::Complete(assistant_message(
                "",
                Some(vec![calculator_call(
                    r#"{"num1":2,"num2":2,"operation":"add"}"#,
                )]),
            )))],
            vec![Ok(ModelEvent::Complete(assistant_message(
                "I cannot compute that",
                None,
            )))],
        ]);
        let orch = orchestrator(db.clone(), client);

        let events = collect_events(&orch, &chat_id, &node_id).await;
        assert!(!tags(&events).contains(&"tool_call"));
        assert!(!tags(&events).contains(&"tool_result"));

        let chat = db.get_chat(&chat_id).unwrap();
        let TurnEvent::Finished { node_id: committed } = events.last().unwrap() else {
            panic!("expected finished event");
        };
        let node = chat.tree.get(committed).unwrap();
        assert_eq!(node.tool_results.as_deref(), Some(&[][..]));
    }

    #[tokio::test]
    async fn malformed_arguments_skip_only_that_call() {
        let db = Database::open_in_memory().unwrap();
        let (chat_id, node_id) = seed_chat(&db, "2+2 and 3+3?");

        let good = calculator_call(r#"{"num1":3,"num2":3,"operation":"add"}"#);
        let bad = ToolCallRecord {
            id: Some("call_bad".to_string()),
            kind: Some("function".to_string()),
            function: FunctionCall {
                name: "calculator".to_string(),
                arguments: "{not json".to_string(),
            },
        };

        let client = ScriptedClient::new(vec![
            vec![Ok(ModelEvent::Complete(assistant_message(
                "",
                Some(vec![bad, good]),
            )))],
            vec![Ok(ModelEvent::Complete(assistant_message("6", None)))],
        ]);
        let orch = orchestrator(db.clone(), client);

        let events = collect_events(&orch, &chat_id, &node_id).await;
        let tool_results: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, TurnEvent::ToolResult { .. }))
            .collect();
        assert_eq!(tool_results.len(), 1);

        let chat = db.get_chat(&chat_id).unwrap();
        let TurnEvent::Finished { node_id: committed } = events.last().unwrap() else {
            panic!("expected finished event");
        };
        let results = chat.tree.get(committed).unwrap().tool_results.clone().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "6");
    }

    #[tokio::test]
    async fn empty_upstream_reports_error_not_panic() {
        let db = Database::open_in_memory().unwrap();
        let (chat_id, node_id) = seed_chat(&db, "hello?");

        // Content but no terminal message
        let client =
            ScriptedClient::new(vec![vec![Ok(ModelEvent::Content("partial".to_string()))]]);
        let orch = orchestrator(db.clone(), client);

        let events = collect_events(&orch, &chat_id, &node_id).await;
        let TurnEvent::Error { content } = events.last().unwrap() else {
            panic!("expected terminal error event");
        };
        assert!(content.contains("No response from model"));

        // Nothing was committed
        let chat = db.get_chat(&chat_id).unwrap();
        assert_eq!(chat.tree.current_node_id, node_id);
    }

    #[tokio::test]
    async fn continuing_an_assistant_node_rewrites_in_place() {
        let db = Database::open_in_memory().unwrap();
        let (chat_id, user_id) = seed_chat(&db, "tell me more");

        let mut chat = db.get_chat(&chat_id).unwrap();
        let assistant = ChatNode::new(
            Role::Assistant,
            "partial answer",
            assistant_message("partial answer", None),
            Some(user_id.clone()),
        );
        let assistant_id = chat.tree.append_child(&user_id, assistant).unwrap();
        chat.tree.set_current(&assistant_id).unwrap();
        db.save_chat(&chat).unwrap();
        let nodes_before = chat.tree.nodes.len();

        let client = ScriptedClient::new(vec![vec![Ok(ModelEvent::Complete(assistant_message(
            "a longer, complete answer",
            None,
        )))]]);
        let orch = orchestrator(db.clone(), client);

        let events = collect_events(&orch, &chat_id, &assistant_id).await;
        let TurnEvent::Finished { node_id: committed } = events.last().unwrap() else {
            panic!("expected finished event");
        };
        assert_eq!(*committed, assistant_id);

        let reloaded = db.get_chat(&chat_id).unwrap();
        assert_eq!(reloaded.tree.nodes.len(), nodes_before);
        assert_eq!(
            reloaded.tree.get(&assistant_id).unwrap().content,
            "a longer, complete answer"
        );
    }

    #[tokio::test]
    async fn missing_chat_reports_not_found() {
        let db = Database::open_in_memory().unwrap();
        let client = ScriptedClient::new(vec![]);
        let orch = orchestrator(db, client);

        let events = collect_events(&orch, "ghost-chat", "ghost-node").await;
        let TurnEvent::Error { content } = events.last().unwrap() else {
            panic!("expected error event");
        };
        assert!(content.contains("Chat not found"));
    }

    #[tokio::test]
    async fn missing_node_reports_not_found() {
        let db = Database::open_in_memory().unwrap();
        let (chat_id, _) = seed_chat(&db, "hello");
        let client = ScriptedClient::new(vec![]);
        let orch = orchestrator(db, client);

        let events = collect_events(&orch, &chat_id, "ghost-node").await;
        let TurnEvent::Error { content } = events.last().unwrap() else {
            panic!("expected error event");
        };
        assert!(content.contains("Node not found"));
    }

    #[tokio::test]
    async fn concurrent_turn_on_same_chat_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let (chat_id, node_id) = seed_chat(&db, "hello");

        let client = ScriptedClient::new(vec![vec![Ok(ModelEvent::Complete(
            assistant_message("hi", None),
        ))]]);
        let orch = orchestrator(db, client);

        // Hold the chat's turn lock, simulating an in-flight turn
        let guard = orch.locks.acquire(&chat_id).unwrap();

        let events = collect_events(&orch, &chat_id, &node_id).await;
        let TurnEvent::Error { content } = events.last().unwrap() else {
            panic!("expected error event");
        };
        assert!(content.contains("already running"));

        drop(guard);
        let events = collect_events(&orch, &chat_id, &node_id).await;
        assert!(matches!(events.last(), Some(TurnEvent::Finished { .. })));
    }
}
