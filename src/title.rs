//! Chat title derivation
//!
//! Titles come from the first user message once one is sent; a text-less
//! first message falls back to a description of its attachments.

use crate::files::{is_image, FileRegistry};

pub const DEFAULT_TITLE: &str = "New Chat";

const MAX_TITLE_CHARS: usize = 30;

/// Derive a title from message text: the leading characters, ellipsized.
pub fn from_text(content: &str) -> String {
    let trimmed = content.trim();
    let mut title: String = trimmed.chars().take(MAX_TITLE_CHARS).collect();
    if trimmed.chars().count() > MAX_TITLE_CHARS {
        title.push_str("...");
    }
    title
}

/// Derive a title from attachments when the first message has no text.
pub fn from_files(files: &[String], registry: &dyn FileRegistry) -> String {
    let image_count = files
        .iter()
        .filter_map(|id| registry.resolve(id))
        .filter(|f| is_image(&f.media_type))
        .count();

    if image_count > 0 {
        format!("Images and files ({} files)", files.len())
    } else {
        format!("Files ({} files)", files.len())
    }
}
