//! Message formatting for multimodal model calls
//!
//! Stored messages keep attachment ids; right before submission the user
//! messages carrying files are expanded into ordered content parts.
//! Unreadable attachments degrade to textual placeholders so one bad
//! file never aborts a whole turn.

use crate::files::{is_image, FileRegistry};
use crate::llm::{ChatMessage, ContentPart, MessageBody, Role};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Expand user messages with attachments into content-part form.
///
/// Only `user` messages are touched; every other role passes through
/// unchanged. The `files` field is dropped once its ids have been
/// expanded into parts.
pub fn expand_path(messages: &mut [ChatMessage], registry: &dyn FileRegistry) {
    for message in messages.iter_mut() {
        if message.role != Role::User {
            continue;
        }
        let Some(files) = message.files.take() else {
            continue;
        };
        if files.is_empty() {
            continue;
        }

        let text = message.text().to_string();
        message.content = MessageBody::Parts(format_content(&text, &files, registry));
    }
}

/// Build the ordered part sequence for one user message: file parts in
/// attachment order, then the message's own text if it has any.
pub fn format_content(
    text: &str,
    files: &[String],
    registry: &dyn FileRegistry,
) -> Vec<ContentPart> {
    let mut parts = Vec::new();

    for file_id in files {
        let Some(file) = registry.resolve(file_id) else {
            // Stale reference; skip rather than fail the turn
            continue;
        };

        if is_image(&file.media_type) {
            match std::fs::read(&file.path) {
                Ok(bytes) => {
                    parts.push(ContentPart::image_data_url(
                        &file.media_type,
                        &BASE64.encode(bytes),
                    ));
                }
                Err(e) => {
                    tracing::warn!(
                        filename = %file.filename,
                        error = %e,
                        "Failed to embed image attachment"
                    );
                    parts.push(ContentPart::input_text(format!(
                        "[Error loading image: {}]",
                        file.filename
                    )));
                }
            }
        } else {
            match std::fs::read_to_string(&file.path) {
                Ok(contents) => {
                    parts.push(ContentPart::input_text(format!(
                        "File: {}\n{}",
                        file.filename, contents
                    )));
                }
                Err(e) => {
                    tracing::warn!(
                        filename = %file.filename,
                        error = %e,
                        "Failed to read text attachment"
                    );
                    parts.push(ContentPart::input_text(format!(
                        "File: {}\n[Error reading file: {}]",
                        file.filename, e
                    )));
                }
            }
        }
    }

    if !text.trim().is_empty() {
        parts.push(ContentPart::text(text));
    }

    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::ResolvedFile;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct MapRegistry(HashMap<String, ResolvedFile>);

    impl FileRegistry for MapRegistry {
        fn resolve(&self, file_id: &str) -> Option<ResolvedFile> {
            self.0.get(file_id).cloned()
        }
    }

    fn registry(entries: Vec<(&str, ResolvedFile)>) -> MapRegistry {
        MapRegistry(
            entries
                .into_iter()
                .map(|(id, f)| (id.to_string(), f))
                .collect(),
        )
    }

    fn write_file(dir: &TempDir, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn text_only_message_passes_through_unchanged() {
        let reg = registry(vec![]);
        let mut messages = vec![ChatMessage::user("just text", vec![])];
        expand_path(&mut messages, &reg);
        assert_eq!(messages[0].text(), "just text");
    }

    #[test]
    fn image_attachment_becomes_data_url_part() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "dot.png", &[0x89, 0x50, 0x4e, 0x47]);
        let reg = registry(vec![(
            "img",
            ResolvedFile {
                filename: "dot.png".to_string(),
                media_type: "image/png".to_string(),
                path,
            },
        )]);

        let parts = format_content("what is this?", &["img".to_string()], &reg);
        assert_eq!(parts.len(), 2);
        match &parts[0] {
            ContentPart::ImageUrl { image_url } => {
                assert!(image_url.url.starts_with("data:image/png;base64,"));
            }
            other => panic!("expected image part, got {other:?}"),
        }
        assert!(matches!(&parts[1], ContentPart::Text { text } if text == "what is this?"));
    }

    #[test]
    fn unreadable_image_substitutes_placeholder() {
        let reg = registry(vec![(
            "img",
            ResolvedFile {
                filename: "gone.png".to_string(),
                media_type: "image/png".to_string(),
                path: PathBuf::from("/no/such/path.png"),
            },
        )]);

        let parts = format_content("describe this", &["img".to_string()], &reg);
        assert_eq!(parts.len(), 2);
        match &parts[0] {
            ContentPart::InputText { text } => {
                assert!(text.contains("gone.png"));
                assert!(text.contains("Error loading image"));
            }
            other => panic!("expected placeholder, got {other:?}"),
        }
    }

    #[test]
    fn text_file_is_inlined_with_filename_prefix() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "notes.txt", b"line one\nline two");
        let reg = registry(vec![(
            "doc",
            ResolvedFile {
                filename: "notes.txt".to_string(),
                media_type: "text/plain".to_string(),
                path,
            },
        )]);

        let parts = format_content("", &["doc".to_string()], &reg);
        assert_eq!(parts.len(), 1);
        match &parts[0] {
            ContentPart::InputText { text } => {
                assert_eq!(text, "File: notes.txt\nline one\nline two");
            }
            other => panic!("expected input_text, got {other:?}"),
        }
    }

    #[test]
    fn unreadable_text_file_substitutes_placeholder() {
        let reg = registry(vec![(
            "doc",
            ResolvedFile {
                filename: "gone.txt".to_string(),
                media_type: "text/plain".to_string(),
                path: PathBuf::from("/no/such/notes.txt"),
            },
        )]);

        let parts = format_content("describe this", &["doc".to_string()], &reg);
        match &parts[0] {
            ContentPart::InputText { text } => {
                assert!(text.contains("gone.txt"));
                assert!(text.contains("Error reading file"));
            }
            other => panic!("expected placeholder, got {other:?}"),
        }
    }

    #[test]
    fn stale_file_ids_are_skipped() {
        let reg = registry(vec![]);
        let parts = format_content("hello", &["ghost".to_string()], &reg);
        assert_eq!(parts.len(), 1);
        assert!(matches!(&parts[0], ContentPart::Text { text } if text == "hello"));
    }

    #[test]
    fn whitespace_only_text_is_suppressed() {
        let reg = registry(vec![]);
        let parts = format_content("   \n\t ", &["ghost".to_string()], &reg);
        assert!(parts.is_empty());
    }

    #[test]
    fn parts_keep_attachment_order() {
        let dir = TempDir::new().unwrap();
        let a = write_file(&dir, "a.txt", b"first");
        let b = write_file(&dir, "b.txt", b"second");
        let reg = registry(vec![
            (
                "a",
                ResolvedFile {
                    filename: "a.txt".to_string(),
                    media_type: "text/plain".to_string(),
                    path: a,
                },
            ),
            (
                "b",
                ResolvedFile {
                    filename: "b.txt".to_string(),
                    media_type: "text/plain".to_string(),
                    path: b,
                },
            ),
        ]);

        let parts = format_content("", &["a".to_string(), "b".to_string()], &reg);
        assert_eq!(parts.len(), 2);
        assert!(matches!(&parts[0], ContentPart::InputText { text } if text.contains("first")));
        assert!(matches!(&parts[1], ContentPart::InputText { text } if text.contains("second")));
    }

    #[test]
    fn non_user_roles_are_not_expanded() {
        let reg = registry(vec![]);
        let mut assistant = ChatMessage::system("untouched");
        assistant.role = Role::Assistant;
        assistant.files = Some(vec!["img".to_string()]);

        let mut messages = vec![assistant];
        expand_path(&mut messages, &reg);

        assert!(matches!(messages[0].content, MessageBody::Text(_)));
        assert!(messages[0].files.is_some());
    }
}
