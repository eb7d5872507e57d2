//! Branching conversation tree
//!
//! Dialogue history is a rooted tree of nodes rather than a linear
//! transcript: editing or regenerating a message creates a new sibling
//! branch under the same parent, and the original branch stays intact
//! and selectable. Nodes live in an arena keyed by id, with parent and
//! child links stored as id references.

use crate::llm::{ChatMessage, MessageBody, Role, ToolCallRecord, ToolResultRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Default system prompt for new chats
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";

#[derive(Error, Debug)]
pub enum TreeError {
    #[error("node not found: {0}")]
    NodeNotFound(String),
    #[error("node parent does not match append target")]
    ParentMismatch,
    #[error("the root node cannot be edited")]
    RootEdit,
}

pub type TreeResult<T> = Result<T, TreeError>;

/// One turn of dialogue.
///
/// Immutable once created, with one exception: an assistant node being
/// continued into has its `content` rewritten when the new turn commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatNode {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub message: ChatMessage,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub children: Vec<String>,
    pub parent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_results: Option<Vec<ToolResultRecord>>,
}

impl ChatNode {
    pub fn new(
        role: Role,
        content: impl Into<String>,
        message: ChatMessage,
        parent_id: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            message,
            files: Vec::new(),
            children: Vec::new(),
            parent_id,
            created_at: Utc::now(),
            tool_calls: None,
            tool_results: None,
        }
    }

    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files = files;
        self
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCallRecord>) -> Self {
        self.tool_calls = Some(tool_calls);
        self
    }
}

/// The branching history of one chat, plus the pointer identifying where
/// the visible conversation currently is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTree {
    pub nodes: HashMap<String, ChatNode>,
    pub root_id: String,
    pub current_node_id: String,
}

impl ChatTree {
    /// Create a tree with a system-prompt root node.
    pub fn new(system_prompt: &str) -> Self {
        let root = ChatNode::new(
            Role::System,
            system_prompt,
            ChatMessage::system(system_prompt),
            None,
        );
        let root_id = root.id.clone();
        let mut nodes = HashMap::new();
        nodes.insert(root_id.clone(), root);

        Self {
            nodes,
            root_id: root_id.clone(),
            current_node_id: root_id,
        }
    }

    /// Look up a node by id. Absence is not an error; callers treat it
    /// as a stale reference.
    pub fn get(&self, id: &str) -> Option<&ChatNode> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ChatNode> {
        self.nodes.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Append a node as the last child of `parent_id`.
    ///
    /// The node's `parent_id` must already name the target parent, and
    /// the parent must exist in this tree.
    pub fn append_child(&mut self, parent_id: &str, node: ChatNode) -> TreeResult<String> {
        if node.parent_id.as_deref() != Some(parent_id) {
            return Err(TreeError::ParentMismatch);
        }
        let parent = self
            .nodes
            .get_mut(parent_id)
            .ok_or_else(|| TreeError::NodeNotFound(parent_id.to_string()))?;

        let id = node.id.clone();
        parent.children.push(id.clone());
        self.nodes.insert(id.clone(), node);
        Ok(id)
    }

    /// Move the current pointer to an existing node.
    pub fn set_current(&mut self, id: &str) -> TreeResult<()> {
        if !self.contains(id) {
            return Err(TreeError::NodeNotFound(id.to_string()));
        }
        self.current_node_id = id.to_string();
        Ok(())
    }

    /// Produce the root-to-node message sequence for one branch.
    ///
    /// Walks parent pointers from `node_id` to the root, then reverses.
    /// This path, not the whole tree, is what gets submitted to the
    /// model; selecting a different leaf changes the submission without
    /// touching any other branch.
    pub fn linearize(&self, node_id: &str) -> TreeResult<Vec<ChatMessage>> {
        let mut current = Some(
            self.get(node_id)
                .ok_or_else(|| TreeError::NodeNotFound(node_id.to_string()))?,
        );

        let mut path = Vec::new();
        while let Some(node) = current {
            path.push(node.message.clone());
            current = node.parent_id.as_deref().and_then(|pid| self.get(pid));
        }
        path.reverse();
        Ok(path)
    }

    /// Create an edited sibling of `node_id` under the same parent.
    ///
    /// The original node and its subtree are left untouched; the current
    /// pointer moves to the new sibling. Returns the sibling's id.
    pub fn edit_as_sibling(
        &mut self,
        node_id: &str,
        new_content: &str,
        new_files: Vec<String>,
    ) -> TreeResult<String> {
        let node = self
            .get(node_id)
            .ok_or_else(|| TreeError::NodeNotFound(node_id.to_string()))?;
        let parent_id = node.parent_id.clone().ok_or(TreeError::RootEdit)?;

        let mut message = node.message.clone();
        message.content = MessageBody::Text(new_content.to_string());
        message.files = if new_files.is_empty() {
            None
        } else {
            Some(new_files.clone())
        };

        let sibling = ChatNode::new(node.role, new_content, message, Some(parent_id.clone()))
            .with_files(new_files);
        let sibling_id = self.append_child(&parent_id, sibling)?;
        self.current_node_id = sibling_id.clone();
        Ok(sibling_id)
    }

    /// Verify the rooted-tree invariant: every node reaches the root
    /// through parent pointers without cycles, and parent/child edges
    /// agree in both directions.
    #[cfg(test)]
    pub fn check_invariants(&self) -> Result<(), String> {
        if !self.contains(&self.current_node_id) {
            return Err(format!("current node {} is dead", self.current_node_id));
        }
        for (id, node) in &self.nodes {
            if *id != node.id {
                return Err(format!("key {id} does not match node id {}", node.id));
            }

            // Walk to root, bounded by node count to catch cycles
            let mut steps = 0;
            let mut cursor = node;
            while let Some(parent_id) = &cursor.parent_id {
                let parent = self
                    .get(parent_id)
                    .ok_or_else(|| format!("dangling parent {parent_id} from {id}"))?;
                if !parent.children.contains(&cursor.id) {
                    return Err(format!("{parent_id} does not list {} as child", cursor.id));
                }
                steps += 1;
                if steps > self.nodes.len() {
                    return Err(format!("cycle reached from {id}"));
                }
                cursor = parent;
            }
            if cursor.id != self.root_id {
                return Err(format!("{id} does not reach the root"));
            }

            for child_id in &node.children {
                let child = self
                    .get(child_id)
                    .ok_or_else(|| format!("dangling child {child_id} under {id}"))?;
                if child.parent_id.as_deref() != Some(id.as_str()) {
                    return Err(format!("{child_id} does not point back to {id}"));
                }
            }
        }
        Ok(())
    }
}

/// A chat: title, branching tree, timestamps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub title: String,
    pub tree: ChatTree,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chat {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: crate::title::DEFAULT_TITLE.to_string(),
            tree: ChatTree::new(DEFAULT_SYSTEM_PROMPT),
            created_at: now,
            updated_at: now,
        }
    }

    /// Refresh `updated_at`; call on every mutation.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl Default for Chat {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod proptests;
