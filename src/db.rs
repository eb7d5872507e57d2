//! Persistence for chats, uploaded files, and tool flags
//!
//! Each chat row carries its whole branching tree as JSON; writing the
//! row is the durability checkpoint for a turn. A crash between
//! checkpoints loses only the work since the last one, never structure.

mod schema;

pub use schema::*;

use crate::tree::Chat;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Chat not found: {0}")]
    ChatNotFound(String),
    #[error("File not found: {0}")]
    FileNotFound(String),
    #[error("Corrupt chat record: {0}")]
    Corrupt(#[from] serde_json::Error),
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ==================== Chat Operations ====================

    /// Insert or update a chat row; this is the turn checkpoint.
    pub fn save_chat(&self, chat: &Chat) -> DbResult<()> {
        let tree_json = serde_json::to_string(&chat.tree)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO chats (id, title, tree, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                tree = excluded.tree,
                updated_at = excluded.updated_at",
            params![
                chat.id,
                chat.title,
                tree_json,
                chat.created_at.to_rfc3339(),
                chat.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Load a chat with its full tree
    pub fn get_chat(&self, id: &str) -> DbResult<Chat> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT id, title, tree, created_at, updated_at FROM chats WHERE id = ?1")?;

        let row = stmt
            .query_row(params![id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => DbError::ChatNotFound(id.to_string()),
                other => DbError::Sqlite(other),
            })?;

        Ok(Chat {
            id: row.0,
            title: row.1,
            tree: serde_json::from_str(&row.2)?,
            created_at: parse_datetime(&row.3),
            updated_at: parse_datetime(&row.4),
        })
    }

    pub fn chat_exists(&self, id: &str) -> DbResult<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chats WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// List chats, most recently updated first
    pub fn list_chats(&self) -> DbResult<Vec<ChatSummary>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, title, created_at, updated_at FROM chats ORDER BY updated_at DESC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(ChatSummary {
                id: row.get(0)?,
                title: row.get(1)?,
                created_at: parse_datetime(&row.get::<_, String>(2)?),
                updated_at: parse_datetime(&row.get::<_, String>(3)?),
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    pub fn delete_chat(&self, id: &str) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute("DELETE FROM chats WHERE id = ?1", params![id])?;
        if affected == 0 {
            return Err(DbError::ChatNotFound(id.to_string()));
        }
        Ok(())
    }

    // ==================== File Operations ====================

    pub fn insert_file(&self, record: &FileRecord) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO files (id, filename, path, media_type, size, uploaded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.id,
                record.filename,
                record.path,
                record.media_type,
                record.size,
                record.uploaded_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_file(&self, id: &str) -> DbResult<FileRecord> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, filename, path, media_type, size, uploaded_at FROM files WHERE id = ?1",
        )?;

        stmt.query_row(params![id], |row| {
            Ok(FileRecord {
                id: row.get(0)?,
                filename: row.get(1)?,
                path: row.get(2)?,
                media_type: row.get(3)?,
                size: row.get::<_, i64>(4)? as u64,
                uploaded_at: parse_datetime(&row.get::<_, String>(5)?),
            })
        })
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DbError::FileNotFound(id.to_string()),
            other => DbError::Sqlite(other),
        })
    }

    pub fn list_files(&self) -> DbResult<Vec<FileRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, filename, path, media_type, size, uploaded_at FROM files
             ORDER BY uploaded_at DESC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(FileRecord {
                id: row.get(0)?,
                filename: row.get(1)?,
                path: row.get(2)?,
                media_type: row.get(3)?,
                size: row.get::<_, i64>(4)? as u64,
                uploaded_at: parse_datetime(&row.get::<_, String>(5)?),
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    // ==================== Tool Flag Operations ====================

    /// Stored per-tool enable overrides; tools without a row use their
    /// default.
    pub fn get_tool_flags(&self) -> DbResult<HashMap<String, bool>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT name, enabled FROM tool_flags")?;

        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?))
        })?;

        rows.collect::<Result<HashMap<_, _>, _>>()
            .map_err(DbError::from)
    }

    pub fn set_tool_flag(&self, name: &str, enabled: bool) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO tool_flags (name, enabled) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET enabled = excluded.enabled",
            params![name, enabled],
        )?;
        Ok(())
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
