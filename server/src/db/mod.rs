/// Database layer for persistent storage.
/// Handles all database operations for chats and their messages.

pub mod init;
pub mod models;

use chrono::Utc;
use models::{Chat, Message};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::sync::Arc;
use tokio::sync::Mutex;

pub type DbPool = Arc<Mutex<Connection>>;

const MESSAGE_COLUMNS: &str = "id, client_tag, chat_id, sender_id, content, timestamp, media_ref";

/// Create a connection pool (simplified for single-threaded SQLite)
pub fn create_pool(db_path: &str) -> SqliteResult<DbPool> {
    let conn = Connection::open(db_path)?;
    init::initialize_database(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Create an in-memory database for testing
#[cfg(any(test, feature = "test_utils"))]
pub fn create_test_pool() -> DbPool {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory DB");
    init::initialize_database(&conn).expect("Failed to initialize DB");
    Arc::new(Mutex::new(conn))
}

fn row_to_chat(row: &Row<'_>) -> SqliteResult<Chat> {
    Ok(Chat {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        user_id: row.get(2)?,
        role_id: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn row_to_message(row: &Row<'_>) -> SqliteResult<Message> {
    Ok(Message {
        id: row.get(0)?,
        client_tag: row.get(1)?,
        chat_id: row.get(2)?,
        sender_id: row.get(3)?,
        content: row.get(4)?,
        timestamp: row.get(5)?,
        media_ref: row.get(6)?,
    })
}

fn find_chat(conn: &Connection, chat_id: &str) -> SqliteResult<Option<Chat>> {
    conn.query_row(
        "SELECT id, chat_id, user_id, role_id, created_at FROM chats WHERE chat_id = ?1",
        params![chat_id],
        row_to_chat,
    )
    .optional()
}

fn find_message(conn: &Connection, chat_id: &str, client_tag: &str) -> SqliteResult<Option<Message>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM messages WHERE chat_id = ?1 AND client_tag = ?2",
            MESSAGE_COLUMNS
        ),
        params![chat_id, client_tag],
        row_to_message,
    )
    .optional()
}

/// New message parameters
#[derive(Debug, Clone, Copy)]
pub struct NewMessage<'a> {
    pub chat_id: &'a str,
    pub client_tag: &'a str,
    pub sender_id: &'a str,
    pub content: &'a str,
    pub media_ref: Option<&'a str>,
}

/// Database operations
pub struct Database;

impl Database {
    /// Register a chat. Returns the stored chat and whether it was created now.
    pub async fn create_chat(
        pool: &DbPool,
        chat_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> SqliteResult<(Chat, bool)> {
        let conn = pool.lock().await;
        let created_at = Utc::now().to_rfc3339();

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO chats (chat_id, user_id, role_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![chat_id, user_id, role_id, &created_at],
        )?;

        let chat = conn.query_row(
            "SELECT id, chat_id, user_id, role_id, created_at FROM chats WHERE chat_id = ?1",
            params![chat_id],
            row_to_chat,
        )?;

        Ok((chat, inserted > 0))
    }

    /// Get chat by chat_id
    pub async fn get_chat(pool: &DbPool, chat_id: &str) -> SqliteResult<Option<Chat>> {
        let conn = pool.lock().await;
        find_chat(&conn, chat_id)
    }

    /// Store a message unless its client tag is already known in that chat.
    ///
    /// Returns the stored row and whether it was inserted by this call.
    /// Timestamps are strictly increasing per chat so cursors never skip
    /// or repeat a message.
    pub async fn store_message(pool: &DbPool, message: NewMessage<'_>) -> SqliteResult<(Message, bool)> {
        let conn = pool.lock().await;

        if let Some(existing) = find_message(&conn, message.chat_id, message.client_tag)? {
            return Ok((existing, false));
        }

        let last: Option<i64> = conn.query_row(
            "SELECT MAX(timestamp) FROM messages WHERE chat_id = ?1",
            params![message.chat_id],
            |row| row.get(0),
        )?;
        let now = Utc::now().timestamp_millis();
        let timestamp = match last {
            Some(last) if last >= now => last + 1,
            _ => now,
        };

        conn.execute(
            "INSERT INTO messages (chat_id, client_tag, sender_id, content, timestamp, media_ref)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.chat_id,
                message.client_tag,
                message.sender_id,
                message.content,
                timestamp,
                message.media_ref
            ],
        )?;

        let stored = Message {
            id: conn.last_insert_rowid(),
            client_tag: message.client_tag.to_string(),
            chat_id: message.chat_id.to_string(),
            sender_id: message.sender_id.to_string(),
            content: message.content.to_string(),
            timestamp,
            media_ref: message.media_ref.map(str::to_string),
        };

        Ok((stored, true))
    }

    /// Every message newer than `since`, ascending
    pub async fn get_messages_since(pool: &DbPool, chat_id: &str, since: i64) -> SqliteResult<Vec<Message>> {
        let conn = pool.lock().await;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM messages WHERE chat_id = ?1 AND timestamp > ?2 ORDER BY timestamp ASC, id ASC",
            MESSAGE_COLUMNS
        ))?;

        let messages = stmt
            .query_map(params![chat_id, since], row_to_message)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(messages)
    }

    /// The newest `limit` messages older than `before`, ascending
    pub async fn get_messages_before(
        pool: &DbPool,
        chat_id: &str,
        before: i64,
        limit: i64,
    ) -> SqliteResult<Vec<Message>> {
        let conn = pool.lock().await;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM messages WHERE chat_id = ?1 AND timestamp < ?2 ORDER BY timestamp DESC, id DESC LIMIT ?3",
            MESSAGE_COLUMNS
        ))?;

        let mut messages = stmt
            .query_map(params![chat_id, before, limit], row_to_message)?
            .collect::<Result<Vec<_>, _>>()?;
        messages.reverse();

        Ok(messages)
    }
}
