pub mod models;

use crate::llm::Role;
use chrono::{SecondsFormat, Utc};
use models::{truncate_chars, Conversation, HealthProfile, Message};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result, Row};
use std::path::Path;
use std::sync::Mutex;

const PREVIEW_CHARS: usize = 50;

/// Conversation/message log the chat orchestrator reads and writes.
///
/// Messages behave as an ordered append log per conversation: they are only
/// ever appended, deleted by id, or deleted from a given message onward.
pub trait ChatStore: Send + Sync {
    fn create_conversation(
        &self,
        user_id: Option<&str>,
        title: &str,
        library_id: Option<&str>,
    ) -> Result<Conversation>;
    fn list_conversations(
        &self,
        user_id: Option<&str>,
        library_id: Option<&str>,
    ) -> Result<Vec<Conversation>>;
    fn get_conversation(&self, id: &str) -> Result<Option<Conversation>>;
    fn rename_conversation(&self, id: &str, title: &str) -> Result<()>;
    fn delete_conversation(&self, id: &str) -> Result<()>;

    fn add_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        is_emergency: bool,
    ) -> Result<Message>;
    fn get_messages(&self, conversation_id: &str) -> Result<Vec<Message>>;
    fn delete_message(&self, id: &str) -> Result<()>;
    /// Deletes `message_id` and every later message of the conversation.
    fn delete_messages_from(&self, conversation_id: &str, message_id: &str) -> Result<usize>;
}

pub struct Database {
    pub conn: Mutex<Connection>,
}

impl Database {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir).ok();
        }
        Self::with_connection(Connection::open(db_path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                user_id TEXT,
                title TEXT NOT NULL,
                library_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
                content TEXT NOT NULL,
                is_emergency INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_messages_conversation
                ON messages (conversation_id, created_at);

            CREATE TABLE IF NOT EXISTS health_profiles (
                user_id TEXT PRIMARY KEY,
                allergies TEXT NOT NULL DEFAULT '[]',
                conditions TEXT NOT NULL DEFAULT '[]',
                medications TEXT NOT NULL DEFAULT '[]',
                blood_type TEXT,
                height_cm REAL,
                weight_kg REAL,
                updated_at TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    // ── Health profiles ──

    pub fn get_health_profile(&self, user_id: &str) -> Result<Option<HealthProfile>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT user_id, allergies, conditions, medications, blood_type, height_cm, weight_kg
             FROM health_profiles WHERE user_id = ?1",
            params![user_id],
            |row| {
                Ok(HealthProfile {
                    user_id: row.get(0)?,
                    allergies: json_list(row, 1)?,
                    conditions: json_list(row, 2)?,
                    medications: json_list(row, 3)?,
                    blood_type: row.get(4)?,
                    height_cm: row.get(5)?,
                    weight_kg: row.get(6)?,
                })
            },
        )
        .optional()
    }

    pub fn upsert_health_profile(&self, profile: &HealthProfile) -> Result<()> {
        let to_json = |list: &Vec<String>| {
            serde_json::to_string(list)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
        };
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO health_profiles
                (user_id, allergies, conditions, medications, blood_type, height_cm, weight_kg, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                profile.user_id,
                to_json(&profile.allergies)?,
                to_json(&profile.conditions)?,
                to_json(&profile.medications)?,
                profile.blood_type,
                profile.height_cm,
                profile.weight_kg,
                now(),
            ],
        )?;
        Ok(())
    }
}

impl ChatStore for Database {
    // ── Conversations ──

    fn create_conversation(
        &self,
        user_id: Option<&str>,
        title: &str,
        library_id: Option<&str>,
    ) -> Result<Conversation> {
        let conn = self.conn.lock().unwrap();
        let id = uuid::Uuid::new_v4().to_string();
        let at = now();
        conn.execute(
            "INSERT INTO conversations (id, user_id, title, library_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![id, user_id, title, library_id, at],
        )?;
        conn.query_row(
            &format!("{CONVERSATION_SELECT} WHERE c.id = ?1"),
            params![id],
            conversation_from_row,
        )
    }

    fn list_conversations(
        &self,
        user_id: Option<&str>,
        library_id: Option<&str>,
    ) -> Result<Vec<Conversation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{CONVERSATION_SELECT} WHERE c.user_id IS ?1 AND c.library_id IS ?2
             ORDER BY c.updated_at DESC, c.rowid DESC"
        ))?;
        let rows = stmt.query_map(params![user_id, library_id], conversation_from_row)?;
        rows.collect()
    }

    fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("{CONVERSATION_SELECT} WHERE c.id = ?1"),
            params![id],
            conversation_from_row,
        )
        .optional()
    }

    fn rename_conversation(&self, id: &str, title: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE conversations SET title = ?1, updated_at = ?2 WHERE id = ?3",
            params![title, now(), id],
        )?;
        Ok(())
    }

    fn delete_conversation(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
        Ok(())
    }

    // ── Messages ──

    fn add_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        is_emergency: bool,
    ) -> Result<Message> {
        let conn = self.conn.lock().unwrap();
        let id = uuid::Uuid::new_v4().to_string();
        let at = now();
        conn.execute(
            "INSERT INTO messages (id, conversation_id, role, content, is_emergency, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, conversation_id, role, content, is_emergency, at],
        )?;
        // Touch conversation updated_at
        conn.execute(
            "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
            params![at, conversation_id],
        )?;
        conn.query_row(
            &format!("{MESSAGE_SELECT} WHERE id = ?1"),
            params![id],
            message_from_row,
        )
    }

    fn get_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{MESSAGE_SELECT} WHERE conversation_id = ?1 ORDER BY created_at ASC, rowid ASC"
        ))?;
        let rows = stmt.query_map(params![conversation_id], message_from_row)?;
        rows.collect()
    }

    fn delete_message(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM messages WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn delete_messages_from(&self, conversation_id: &str, message_id: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM messages
             WHERE conversation_id = ?1
               AND rowid >= (SELECT rowid FROM messages WHERE id = ?2 AND conversation_id = ?1)",
            params![conversation_id, message_id],
        )
    }
}

const CONVERSATION_SELECT: &str = "
    SELECT c.id, c.user_id, c.title, c.library_id, c.created_at, c.updated_at,
           (SELECT m.content FROM messages m
             WHERE m.conversation_id = c.id
             ORDER BY m.created_at DESC, m.rowid DESC LIMIT 1)
    FROM conversations c";

const MESSAGE_SELECT: &str =
    "SELECT id, conversation_id, role, content, is_emergency, created_at FROM messages";

fn conversation_from_row(row: &Row<'_>) -> Result<Conversation> {
    let last: Option<String> = row.get(6)?;
    Ok(Conversation {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        library_id: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        last_message_preview: last
            .map(|m| truncate_chars(&m, PREVIEW_CHARS))
            .unwrap_or_default(),
    })
}

fn message_from_row(row: &Row<'_>) -> Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role: row.get(2)?,
        content: row.get(3)?,
        is_emergency: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn json_list(row: &Row<'_>, idx: usize) -> Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
