/// Local message cache backed by SQLite.
///
/// Messages are keyed by `(chat_id, client_tag)`; the `seq` column records
/// first-insertion order and breaks timestamp ties. The schema is managed by
/// embedded refinery migrations.

use crate::config::RetentionPolicy;
use crate::error::StoreError;
use crate::models::{now_millis, ChatId, ClientTag, Message, MessageStatus};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Durable per-chat message cache.
///
/// Every sequence returned is ordered ascending by `(timestamp, insertion)`.
pub trait MessageStore: Send + Sync {
    /// The newest `limit` messages of a chat.
    fn fetch_recent(&self, chat_id: &ChatId, limit: usize) -> StoreResult<Vec<Message>>;

    /// Up to `limit` messages strictly older than `timestamp`, the newest of them.
    fn fetch_before(&self, chat_id: &ChatId, timestamp: i64, limit: usize) -> StoreResult<Vec<Message>>;

    /// Newest confirmed timestamp of a chat, `0` if nothing is cached.
    fn fetch_latest_timestamp(&self, chat_id: &ChatId) -> StoreResult<i64>;

    /// Insert, or update in place the row with the same `client_tag`.
    fn upsert(&self, message: &Message) -> StoreResult<()>;

    /// Apply a status (and optionally server id) transition to one chat's row.
    ///
    /// Returns `Ok(false)` without touching anything when the tag is unknown
    /// or the transition is not allowed.
    fn update_status(
        &self,
        chat_id: &ChatId,
        client_tag: &ClientTag,
        server_id: Option<i64>,
        status: MessageStatus,
    ) -> StoreResult<bool>;

    /// Delete expired confirmed messages, chat by chat, never touching `pinned`.
    fn prune(&self, policy: &RetentionPolicy, pinned: &HashSet<ClientTag>) -> StoreResult<usize>;

    fn search(&self, chat_id: &ChatId, query: &str, limit: usize) -> StoreResult<Vec<Message>>;

    fn clear_chat(&self, chat_id: &ChatId) -> StoreResult<usize>;

    fn count(&self, chat_id: &ChatId) -> StoreResult<usize>;
}

const MESSAGE_COLUMNS: &str =
    "chat_id, client_tag, server_id, sender_id, content, timestamp, status, media_ref";

pub struct LocalStore {
    db: Mutex<Connection>,
    db_path: PathBuf,
}

impl LocalStore {
    /// Open (or create) the cache database at the given path
    pub fn open<P: AsRef<Path>>(db_path: P) -> StoreResult<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut conn = Connection::open(&db_path)?;
        // WAL is unavailable for some filesystems; the cache still works without it
        if let Err(e) = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0)) {
            log::debug!("WAL not enabled for {}: {}", db_path.display(), e);
        }
        Self::migrate(&mut conn)?;

        log::info!("Opened message cache at {}", db_path.display());
        Ok(LocalStore {
            db: Mutex::new(conn),
            db_path,
        })
    }

    /// Create an in-memory cache (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let mut conn = Connection::open_in_memory()?;
        Self::migrate(&mut conn)?;
        Ok(LocalStore {
            db: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn migrate(conn: &mut Connection) -> StoreResult<()> {
        embedded::migrations::runner()
            .run(conn)
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        Ok(())
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Run a newest-first query and hand the rows back in ascending order
    fn query_newest_first(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> StoreResult<Vec<Message>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(sql)?;
        let mut messages = stmt
            .query_map(params, row_to_message)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    let status: String = row.get(6)?;
    let status = status.parse::<MessageStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, e.into())
    })?;

    Ok(Message {
        chat_id: ChatId::new(row.get::<_, String>(0)?),
        client_tag: ClientTag::from_string(&row.get::<_, String>(1)?),
        id: row.get(2)?,
        sender_id: row.get(3)?,
        content: row.get(4)?,
        timestamp: row.get(5)?,
        status,
        media_ref: row.get(7)?,
    })
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// Escape `%`, `_` and the escape character itself for a LIKE pattern
fn like_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

impl MessageStore for LocalStore {
    fn fetch_recent(&self, chat_id: &ChatId, limit: usize) -> StoreResult<Vec<Message>> {
        let sql = format!(
            "SELECT {} FROM messages WHERE chat_id = ?1
             ORDER BY timestamp DESC, seq DESC LIMIT ?2",
            MESSAGE_COLUMNS
        );
        self.query_newest_first(&sql, params![chat_id.as_str(), sql_limit(limit)])
    }

    fn fetch_before(&self, chat_id: &ChatId, timestamp: i64, limit: usize) -> StoreResult<Vec<Message>> {
        let sql = format!(
            "SELECT {} FROM messages WHERE chat_id = ?1 AND timestamp < ?2
             ORDER BY timestamp DESC, seq DESC LIMIT ?3",
            MESSAGE_COLUMNS
        );
        self.query_newest_first(&sql, params![chat_id.as_str(), timestamp, sql_limit(limit)])
    }

    fn fetch_latest_timestamp(&self, chat_id: &ChatId) -> StoreResult<i64> {
        let db = self.conn()?;
        let latest = db.query_row(
            "SELECT COALESCE(MAX(timestamp), 0) FROM messages WHERE chat_id = ?1 AND status = 'sent'",
            params![chat_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(latest)
    }

    fn upsert(&self, message: &Message) -> StoreResult<()> {
        let db = self.conn()?;

        // A confirmed row is only ever overwritten by another confirmed copy
        db.execute(
            "INSERT INTO messages (chat_id, client_tag, server_id, sender_id, content, timestamp, status, media_ref)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(chat_id, client_tag) DO UPDATE SET
                 server_id = COALESCE(excluded.server_id, messages.server_id),
                 sender_id = excluded.sender_id,
                 content = excluded.content,
                 timestamp = excluded.timestamp,
                 status = excluded.status,
                 media_ref = COALESCE(excluded.media_ref, messages.media_ref)
             WHERE messages.status != 'sent' OR excluded.status = 'sent'",
            params![
                message.chat_id.as_str(),
                message.client_tag.as_str(),
                message.id,
                &message.sender_id,
                &message.content,
                message.timestamp,
                message.status.as_str(),
                &message.media_ref,
            ],
        )?;

        Ok(())
    }

    fn update_status(
        &self,
        chat_id: &ChatId,
        client_tag: &ClientTag,
        server_id: Option<i64>,
        status: MessageStatus,
    ) -> StoreResult<bool> {
        let db = self.conn()?;

        let current: Option<String> = db
            .query_row(
                "SELECT status FROM messages WHERE chat_id = ?1 AND client_tag = ?2",
                params![chat_id.as_str(), client_tag.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        let Some(current) = current else {
            log::debug!("Status update for uncached message {} ignored", client_tag);
            return Ok(false);
        };
        let current = current.parse::<MessageStatus>().map_err(StoreError::Corrupt)?;

        if current != status && !current.can_transition_to(status) {
            log::warn!(
                "Refusing status transition {} -> {} for message {}",
                current,
                status,
                client_tag
            );
            return Ok(false);
        }

        db.execute(
            "UPDATE messages SET status = ?1, server_id = COALESCE(?2, server_id)
             WHERE chat_id = ?3 AND client_tag = ?4",
            params![status.as_str(), server_id, chat_id.as_str(), client_tag.as_str()],
        )?;

        Ok(true)
    }

    fn prune(&self, policy: &RetentionPolicy, pinned: &HashSet<ClientTag>) -> StoreResult<usize> {
        let cutoff = policy.age_cutoff(now_millis());
        let mut db = self.conn()?;
        let tx = db.transaction()?;

        let chat_ids: Vec<String> = {
            let mut stmt = tx.prepare("SELECT DISTINCT chat_id FROM messages")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            ids
        };

        let mut doomed: Vec<i64> = Vec::new();
        for chat_id in &chat_ids {
            let mut stmt = tx.prepare(
                "SELECT seq, client_tag, timestamp, status FROM messages WHERE chat_id = ?1
                 ORDER BY timestamp DESC, seq DESC",
            )?;
            let rows = stmt
                .query_map(params![chat_id], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            for (rank, (seq, tag, timestamp, status)) in rows.into_iter().enumerate() {
                if status != MessageStatus::Sent.as_str() || pinned.contains(&ClientTag::from_string(&tag)) {
                    continue;
                }
                let over_count = policy.max_messages_per_chat.is_some_and(|max| rank >= max);
                let expired = cutoff.is_some_and(|cutoff| timestamp < cutoff);
                if over_count || expired {
                    doomed.push(seq);
                }
            }
        }

        for seq in &doomed {
            tx.execute("DELETE FROM messages WHERE seq = ?1", params![seq])?;
        }
        tx.commit()?;

        if !doomed.is_empty() {
            log::info!("Pruned {} cached messages across {} chats", doomed.len(), chat_ids.len());
        }
        Ok(doomed.len())
    }

    fn search(&self, chat_id: &ChatId, query: &str, limit: usize) -> StoreResult<Vec<Message>> {
        let sql = format!(
            "SELECT {} FROM messages WHERE chat_id = ?1
             AND (content LIKE ?2 ESCAPE '\\' OR sender_id LIKE ?2 ESCAPE '\\')
             ORDER BY timestamp DESC, seq DESC LIMIT ?3",
            MESSAGE_COLUMNS
        );
        self.query_newest_first(&sql, params![chat_id.as_str(), like_pattern(query), sql_limit(limit)])
    }

    fn clear_chat(&self, chat_id: &ChatId) -> StoreResult<usize> {
        let db = self.conn()?;
        let deleted = db.execute("DELETE FROM messages WHERE chat_id = ?1", params![chat_id.as_str()])?;
        Ok(deleted)
    }

    fn count(&self, chat_id: &ChatId) -> StoreResult<usize> {
        let db = self.conn()?;
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM messages WHERE chat_id = ?1",
            params![chat_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn sent(chat: &str, tag: &str, timestamp: i64) -> Message {
        Message::from_server(
            timestamp,
            ClientTag::from_string(tag),
            ChatId::from(chat),
            "narrator".to_string(),
            format!("message {}", tag),
            timestamp,
        )
    }

    fn tags(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.client_tag.as_str()).collect()
    }

    #[test]
    fn test_initialize_creates_tables() {
        let store = LocalStore::in_memory().unwrap();
        let db = store.conn().unwrap();
        let mut stmt = db
            .prepare("SELECT name FROM sqlite_master WHERE type='table'")
            .unwrap();
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"messages".to_string()));
        assert!(tables.contains(&"refinery_schema_history".to_string()));
    }

    #[test]
    fn test_fetch_recent_is_ascending_and_limited() {
        let store = LocalStore::in_memory().unwrap();
        let chat = ChatId::from("c1");
        for i in 1..=5 {
            store.upsert(&sent("c1", &format!("m{}", i), i * 100)).unwrap();
        }

        let recent = store.fetch_recent(&chat, 3).unwrap();
        assert_eq!(tags(&recent), vec!["m3", "m4", "m5"]);
    }

    #[test]
    fn test_fetch_recent_empty_chat() {
        let store = LocalStore::in_memory().unwrap();
        assert!(store.fetch_recent(&ChatId::from("nope"), 10).unwrap().is_empty());
        assert_eq!(store.fetch_latest_timestamp(&ChatId::from("nope")).unwrap(), 0);
    }

    #[test]
    fn test_fetch_before_is_strict() {
        let store = LocalStore::in_memory().unwrap();
        let chat = ChatId::from("c1");
        for i in 1..=5 {
            store.upsert(&sent("c1", &format!("m{}", i), i * 100)).unwrap();
        }

        let older = store.fetch_before(&chat, 400, 10).unwrap();
        assert_eq!(tags(&older), vec!["m1", "m2", "m3"]);

        let page = store.fetch_before(&chat, 400, 2).unwrap();
        assert_eq!(tags(&page), vec!["m2", "m3"]);
    }

    #[test]
    fn test_equal_timestamps_keep_insertion_order() {
        let store = LocalStore::in_memory().unwrap();
        store.upsert(&sent("c1", "zeta", 100)).unwrap();
        store.upsert(&sent("c1", "alpha", 100)).unwrap();

        let recent = store.fetch_recent(&ChatId::from("c1"), 10).unwrap();
        assert_eq!(tags(&recent), vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_chats_are_isolated() {
        let store = LocalStore::in_memory().unwrap();
        store.upsert(&sent("c1", "a", 100)).unwrap();
        store.upsert(&sent("c2", "b", 200)).unwrap();

        assert_eq!(store.count(&ChatId::from("c1")).unwrap(), 1);
        assert_eq!(store.fetch_latest_timestamp(&ChatId::from("c1")).unwrap(), 100);
    }

    #[test]
    fn test_upsert_twice_keeps_one_row_with_latest_fields() {
        let store = LocalStore::in_memory().unwrap();
        let chat = ChatId::from("c1");
        let mut msg = sent("c1", "m1", 100);
        store.upsert(&msg).unwrap();
        msg.content = "edited".to_string();
        store.upsert(&msg).unwrap();
        store.upsert(&msg).unwrap();

        let all = store.fetch_recent(&chat, 10).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].content, "edited");
    }

    #[test]
    fn test_upsert_never_downgrades_sent() {
        let store = LocalStore::in_memory().unwrap();
        let chat = ChatId::from("c1");
        let confirmed = sent("c1", "m1", 100);
        store.upsert(&confirmed).unwrap();

        let mut stale = confirmed.clone();
        stale.status = MessageStatus::Sending;
        stale.id = None;
        stale.content = "stale".to_string();
        store.upsert(&stale).unwrap();

        let all = store.fetch_recent(&chat, 10).unwrap();
        assert_eq!(all[0].status, MessageStatus::Sent);
        assert_eq!(all[0].id, Some(100));
        assert_eq!(all[0].content, "message m1");
    }

    #[test]
    fn test_latest_timestamp_ignores_pending() {
        let store = LocalStore::in_memory().unwrap();
        let chat = ChatId::from("c1");
        store.upsert(&sent("c1", "m1", 100)).unwrap();

        let mut pending = Message::outgoing(chat.clone(), "alice".to_string(), "hi".to_string());
        pending.timestamp = 5_000;
        store.upsert(&pending).unwrap();

        assert_eq!(store.fetch_latest_timestamp(&chat).unwrap(), 100);
    }

    #[test]
    fn test_update_status_transitions() {
        let store = LocalStore::in_memory().unwrap();
        let chat = ChatId::from("c1");
        let pending = Message::outgoing(chat.clone(), "alice".to_string(), "hi".to_string());
        store.upsert(&pending).unwrap();

        assert!(store.update_status(&chat, &pending.client_tag, None, MessageStatus::Failed).unwrap());
        assert!(store.update_status(&chat, &pending.client_tag, None, MessageStatus::Sending).unwrap());
        assert!(store.update_status(&chat, &pending.client_tag, Some(99), MessageStatus::Sent).unwrap());

        // Sent never reverts
        assert!(!store.update_status(&chat, &pending.client_tag, None, MessageStatus::Failed).unwrap());
        assert!(!store.update_status(&chat, &pending.client_tag, None, MessageStatus::Sending).unwrap());

        let stored = store.fetch_recent(&chat, 1).unwrap();
        assert_eq!(stored[0].status, MessageStatus::Sent);
        assert_eq!(stored[0].id, Some(99));
    }

    #[test]
    fn test_update_status_unknown_tag_is_noop() {
        let store = LocalStore::in_memory().unwrap();
        let updated = store
            .update_status(&ChatId::from("c1"), &ClientTag::new(), Some(1), MessageStatus::Sent)
            .unwrap();
        assert!(!updated);
    }

    #[test]
    fn test_update_status_is_scoped_to_chat() {
        let store = LocalStore::in_memory().unwrap();
        let first = Message::outgoing(ChatId::from("c1"), "alice".to_string(), "hi".to_string());
        let mut second = first.clone();
        second.chat_id = ChatId::from("c2");
        store.upsert(&first).unwrap();
        store.upsert(&second).unwrap();

        assert!(store
            .update_status(&ChatId::from("c1"), &first.client_tag, None, MessageStatus::Failed)
            .unwrap());
        assert!(!store
            .update_status(&ChatId::from("c3"), &first.client_tag, None, MessageStatus::Failed)
            .unwrap());

        let untouched = store.fetch_recent(&ChatId::from("c2"), 1).unwrap();
        assert_eq!(untouched[0].status, MessageStatus::Sending);
        let changed = store.fetch_recent(&ChatId::from("c1"), 1).unwrap();
        assert_eq!(changed[0].status, MessageStatus::Failed);
    }

    #[test]
    fn test_prune_by_count_keeps_newest() {
        let store = LocalStore::in_memory().unwrap();
        let chat = ChatId::from("c1");
        for i in 1..=10 {
            store.upsert(&sent("c1", &format!("m{}", i), now_millis() + i)).unwrap();
        }

        let policy = RetentionPolicy {
            max_age: None,
            max_messages_per_chat: Some(4),
        };
        let removed = store.prune(&policy, &HashSet::new()).unwrap();
        assert_eq!(removed, 6);
        assert_eq!(tags(&store.fetch_recent(&chat, 10).unwrap()), vec!["m7", "m8", "m9", "m10"]);
    }

    #[test]
    fn test_prune_by_age_spares_pinned_and_pending() {
        let store = LocalStore::in_memory().unwrap();
        let chat = ChatId::from("c1");
        store.upsert(&sent("c1", "old1", 1_000)).unwrap();
        store.upsert(&sent("c1", "old2", 2_000)).unwrap();
        store.upsert(&sent("c1", "fresh", now_millis())).unwrap();

        let mut pending = Message::outgoing(chat.clone(), "alice".to_string(), "queued".to_string());
        pending.timestamp = 500;
        pending.status = MessageStatus::Failed;
        store.upsert(&pending).unwrap();

        let policy = RetentionPolicy {
            max_age: Some(Duration::from_secs(3600)),
            max_messages_per_chat: None,
        };
        let pinned: HashSet<ClientTag> = [ClientTag::from_string("old2")].into_iter().collect();
        let removed = store.prune(&policy, &pinned).unwrap();

        assert_eq!(removed, 1);
        let remaining = store.fetch_recent(&chat, 10).unwrap();
        assert_eq!(remaining.len(), 3);
        assert!(!remaining.iter().any(|m| m.client_tag.as_str() == "old1"));
    }

    #[test]
    fn test_search_is_case_insensitive_and_escaped() {
        let store = LocalStore::in_memory().unwrap();
        let chat = ChatId::from("c1");
        let mut a = sent("c1", "a", 100);
        a.content = "The Dragon wakes".to_string();
        let mut b = sent("c1", "b", 200);
        b.content = "100% sure".to_string();
        let mut c = sent("c1", "c", 300);
        c.content = "nothing here".to_string();
        for m in [&a, &b, &c] {
            store.upsert(m).unwrap();
        }

        assert_eq!(tags(&store.search(&chat, "dragon", 10).unwrap()), vec!["a"]);
        assert_eq!(tags(&store.search(&chat, "%", 10).unwrap()), vec!["b"]);
        assert_eq!(store.search(&chat, "narrator", 10).unwrap().len(), 3);
    }

    #[test]
    fn test_clear_chat() {
        let store = LocalStore::in_memory().unwrap();
        store.upsert(&sent("c1", "a", 100)).unwrap();
        store.upsert(&sent("c1", "b", 200)).unwrap();
        store.upsert(&sent("c2", "c", 300)).unwrap();

        assert_eq!(store.clear_chat(&ChatId::from("c1")).unwrap(), 2);
        assert_eq!(store.count(&ChatId::from("c1")).unwrap(), 0);
        assert_eq!(store.count(&ChatId::from("c2")).unwrap(), 1);
    }

    #[test]
    fn test_survives_reopen() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("nested").join("cache.db");
        {
            let store = LocalStore::open(&db_path).unwrap();
            store.upsert(&sent("c1", "a", 100)).unwrap();
        }

        let reopened = LocalStore::open(&db_path).unwrap();
        assert_eq!(reopened.count(&ChatId::from("c1")).unwrap(), 1);
        assert_eq!(reopened.path(), db_path.as_path());
    }

    #[test]
    fn test_like_pattern_escaping() {
        assert_eq!(like_pattern("a_b"), "%a\\_b%");
        assert_eq!(like_pattern("50%"), "%50\\%%");
    }
}
