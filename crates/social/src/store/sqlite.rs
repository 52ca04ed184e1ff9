//! SQLite-based unified storage

use std::path::Path;
use std::sync::Mutex;
use std::sync::mpsc::Receiver;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use rusqlite::{Connection as DbConnection, OptionalExtension, params};
use rusqlite_migration::{M, Migrations};

use super::events::{ChangeEvent, ChangeNotifier};
use super::traits::SocialStore;
use crate::models::{
    Connection, ConnectionId, ConnectionStatus, Conversation, ConversationId, DeliveryState,
    Direction, Message, MessageId, Participant, Platform, PollCursor,
};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- One row per authorized external account/page
            CREATE TABLE connections (
                id TEXT PRIMARY KEY,
                platform TEXT NOT NULL,
                external_account_id TEXT NOT NULL,
                display_name TEXT NOT NULL,
                access_token TEXT NOT NULL,
                token_expires_at TEXT,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            -- At most one active connection per platform identity
            CREATE UNIQUE INDEX idx_connections_active_identity
                ON connections(platform, external_account_id)
                WHERE status = 'active';

            -- One unified thread per external thread per connection
            CREATE TABLE conversations (
                id TEXT PRIMARY KEY,
                connection_id TEXT NOT NULL,
                external_thread_id TEXT NOT NULL,
                participants TEXT NOT NULL,
                last_message_at TEXT NOT NULL,
                unread_count INTEGER NOT NULL DEFAULT 0 CHECK (unread_count >= 0),
                UNIQUE (connection_id, external_thread_id),
                FOREIGN KEY (connection_id) REFERENCES connections(id)
            );

            CREATE INDEX idx_conversations_last_message_at
                ON conversations(last_message_at DESC);

            -- Unified messages; external_message_id is NULL for provisional
            -- outbound records (NULLs never collide in a UNIQUE index)
            CREATE TABLE messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                external_message_id TEXT,
                direction TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                body TEXT NOT NULL,
                sent_at TEXT NOT NULL,
                delivery_state TEXT NOT NULL,
                UNIQUE (conversation_id, external_message_id),
                FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
            );

            CREATE INDEX idx_messages_conversation ON messages(conversation_id, sent_at);

            -- Poll progress per connection
            CREATE TABLE poll_cursors (
                connection_id TEXT PRIMARY KEY,
                page_cursor TEXT,
                last_synced_at TEXT,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (connection_id) REFERENCES connections(id)
            );
            "#,
        ),
        // Migration 2: Track when an in-progress listing first started so a
        // resumed listing completes with the original watermark
        M::up("ALTER TABLE poll_cursors ADD COLUMN listing_started_at TEXT;"),
    ])
}

/// SQLite-based implementation of [`SocialStore`]
pub struct SqliteSocialStore {
    conn: Mutex<DbConnection>,
    notifier: ChangeNotifier,
}

impl SqliteSocialStore {
    /// Open (or create) a store at `db_path`
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = DbConnection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        // WAL for concurrent readers during writes; NORMAL sync is safe
        // with WAL; foreign_keys for ON DELETE CASCADE.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
            notifier: ChangeNotifier::new(),
        })
    }

    /// Open an in-memory database (tests)
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = DbConnection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;
        Ok(Self {
            conn: Mutex::new(conn),
            notifier: ChangeNotifier::new(),
        })
    }
}

fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn decode_ts(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("invalid timestamp: {s}"))?
        .with_timezone(&Utc))
}

type ConnectionRow = (
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    String,
);

fn decode_connection(row: ConnectionRow) -> Result<Connection> {
    let (id, platform, external_account_id, display_name, access_token, expires, status, created) =
        row;
    Ok(Connection {
        id: ConnectionId::new(id),
        platform: Platform::parse(&platform)
            .ok_or_else(|| anyhow!("unknown platform in database: {platform}"))?,
        external_account_id,
        display_name,
        access_token,
        token_expires_at: expires.as_deref().map(decode_ts).transpose()?,
        status: ConnectionStatus::parse(&status)
            .ok_or_else(|| anyhow!("unknown connection status: {status}"))?,
        created_at: decode_ts(&created)?,
    })
}

type ConversationRow = (String, String, String, String, String, u32);

fn decode_conversation(row: ConversationRow) -> Result<Conversation> {
    let (id, connection_id, external_thread_id, participants, last_message_at, unread_count) = row;
    let participants: Vec<Participant> =
        serde_json::from_str(&participants).context("invalid participants JSON")?;
    Ok(Conversation {
        id: ConversationId::new(id),
        connection_id: ConnectionId::new(connection_id),
        external_thread_id,
        participants,
        last_message_at: decode_ts(&last_message_at)?,
        unread_count,
    })
}

type MessageRow = (
    String,
    String,
    Option<String>,
    String,
    String,
    String,
    String,
    String,
);

fn decode_message(row: MessageRow) -> Result<Message> {
    let (id, conversation_id, external_message_id, direction, sender_id, body, sent_at, delivery) =
        row;
    Ok(Message {
        id: MessageId::new(id),
        conversation_id: ConversationId::new(conversation_id),
        external_message_id,
        direction: Direction::parse(&direction)
            .ok_or_else(|| anyhow!("unknown direction: {direction}"))?,
        sender_id,
        body,
        sent_at: decode_ts(&sent_at)?,
        delivery_state: DeliveryState::parse(&delivery)
            .ok_or_else(|| anyhow!("unknown delivery state: {delivery}"))?,
    })
}

const SELECT_CONNECTION: &str = "SELECT id, platform, external_account_id, display_name, \
     access_token, token_expires_at, status, created_at FROM connections";

const SELECT_CONVERSATION: &str = "SELECT id, connection_id, external_thread_id, participants, \
     last_message_at, unread_count FROM conversations";

const SELECT_MESSAGE: &str = "SELECT id, conversation_id, external_message_id, direction, \
     sender_id, body, sent_at, delivery_state FROM messages";

impl SocialStore for SqliteSocialStore {
    fn insert_connection(&self, connection: Connection) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO connections (id, platform, external_account_id, display_name, \
             access_token, token_expires_at, status, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                connection.id.as_str(),
                connection.platform.as_str(),
                connection.external_account_id,
                connection.display_name,
                connection.access_token,
                connection.token_expires_at.map(encode_ts),
                connection.status.as_str(),
                encode_ts(connection.created_at),
            ],
        )
        .context("Failed to insert connection")?;
        drop(conn);
        self.notifier.emit(ChangeEvent::ConnectionUpdated {
            connection_id: connection.id.as_str().to_string(),
        });
        Ok(())
    }

    fn get_connection(&self, id: &ConnectionId) -> Result<Option<Connection>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<ConnectionRow> = conn
            .query_row(
                &format!("{SELECT_CONNECTION} WHERE id = ?1"),
                [id.as_str()],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                    ))
                },
            )
            .optional()?;
        row.map(decode_connection).transpose()
    }

    fn find_active_connection(
        &self,
        platform: Platform,
        external_account_id: &str,
    ) -> Result<Option<Connection>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<ConnectionRow> = conn
            .query_row(
                &format!(
                    "{SELECT_CONNECTION} WHERE platform = ?1 AND external_account_id = ?2 \
                     AND status = 'active'"
                ),
                params![platform.as_str(), external_account_id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                    ))
                },
            )
            .optional()?;
        row.map(decode_connection).transpose()
    }

    fn list_connections(&self) -> Result<Vec<Connection>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("{SELECT_CONNECTION} ORDER BY created_at DESC"))?;
        let rows: Vec<ConnectionRow> = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(decode_connection).collect()
    }

    fn update_connection_token(
        &self,
        id: &ConnectionId,
        access_token: &str,
        token_expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE connections SET access_token = ?2, token_expires_at = ?3 WHERE id = ?1",
            params![id.as_str(), access_token, token_expires_at.map(encode_ts)],
        )?;
        drop(conn);
        if changed == 0 {
            bail!("unknown connection {}", id.as_str());
        }
        self.notifier.emit(ChangeEvent::ConnectionUpdated {
            connection_id: id.as_str().to_string(),
        });
        Ok(())
    }

    fn update_connection_status(&self, id: &ConnectionId, status: ConnectionStatus) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE connections SET status = ?2 WHERE id = ?1",
            params![id.as_str(), status.as_str()],
        )?;
        drop(conn);
        if changed == 0 {
            bail!("unknown connection {}", id.as_str());
        }
        self.notifier.emit(ChangeEvent::ConnectionUpdated {
            connection_id: id.as_str().to_string(),
        });
        Ok(())
    }

    fn upsert_conversation(&self, conversation: Conversation) -> Result<()> {
        let participants = serde_json::to_string(&conversation.participants)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO conversations (id, connection_id, external_thread_id, participants, \
             last_message_at, unread_count) VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT(id) DO UPDATE SET participants = ?4, last_message_at = ?5, \
             unread_count = ?6",
            params![
                conversation.id.as_str(),
                conversation.connection_id.as_str(),
                conversation.external_thread_id,
                participants,
                encode_ts(conversation.last_message_at),
                conversation.unread_count,
            ],
        )
        .context("Failed to upsert conversation")?;
        drop(conn);
        self.notifier.emit(ChangeEvent::ConversationUpdated {
            conversation_id: conversation.id.as_str().to_string(),
        });
        Ok(())
    }

    fn get_conversation(&self, id: &ConversationId) -> Result<Option<Conversation>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<ConversationRow> = conn
            .query_row(
                &format!("{SELECT_CONVERSATION} WHERE id = ?1"),
                [id.as_str()],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )
            .optional()?;
        row.map(decode_conversation).transpose()
    }

    fn find_conversation(
        &self,
        connection_id: &ConnectionId,
        external_thread_id: &str,
    ) -> Result<Option<Conversation>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<ConversationRow> = conn
            .query_row(
                &format!(
                    "{SELECT_CONVERSATION} WHERE connection_id = ?1 AND external_thread_id = ?2"
                ),
                params![connection_id.as_str(), external_thread_id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )
            .optional()?;
        row.map(decode_conversation).transpose()
    }

    fn list_conversations(&self, limit: usize, offset: usize) -> Result<Vec<Conversation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{SELECT_CONVERSATION} ORDER BY last_message_at DESC LIMIT ?1 OFFSET ?2"
        ))?;
        let rows: Vec<ConversationRow> = stmt
            .query_map(params![limit as i64, offset as i64], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(decode_conversation).collect()
    }

    fn mark_read(&self, id: &ConversationId) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let unread: Option<u32> = conn
            .query_row(
                "SELECT unread_count FROM conversations WHERE id = ?1",
                [id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(unread) = unread else {
            bail!("unknown conversation {}", id.as_str());
        };
        if unread == 0 {
            return Ok(());
        }
        conn.execute(
            "UPDATE conversations SET unread_count = 0 WHERE id = ?1",
            [id.as_str()],
        )?;
        drop(conn);
        self.notifier.emit(ChangeEvent::ConversationUpdated {
            conversation_id: id.as_str().to_string(),
        });
        Ok(())
    }

    fn insert_message_if_absent(&self, message: Message) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute(
                "INSERT OR IGNORE INTO messages (id, conversation_id, external_message_id, \
                 direction, sender_id, body, sent_at, delivery_state) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    message.id.as_str(),
                    message.conversation_id.as_str(),
                    message.external_message_id,
                    message.direction.as_str(),
                    message.sender_id,
                    message.body,
                    encode_ts(message.sent_at),
                    message.delivery_state.as_str(),
                ],
            )
            .context("Failed to insert message")?;
        drop(conn);
        if changed == 0 {
            return Ok(false);
        }
        self.notifier.emit(ChangeEvent::MessageAdded {
            conversation_id: message.conversation_id.as_str().to_string(),
            message_id: message.id.as_str().to_string(),
        });
        Ok(true)
    }

    fn get_message(&self, id: &MessageId) -> Result<Option<Message>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<MessageRow> = conn
            .query_row(
                &format!("{SELECT_MESSAGE} WHERE id = ?1"),
                [id.as_str()],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                    ))
                },
            )
            .optional()?;
        row.map(decode_message).transpose()
    }

    fn find_message_by_external(
        &self,
        conversation_id: &ConversationId,
        external_message_id: &str,
    ) -> Result<Option<Message>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<MessageRow> = conn
            .query_row(
                &format!(
                    "{SELECT_MESSAGE} WHERE conversation_id = ?1 AND external_message_id = ?2"
                ),
                params![conversation_id.as_str(), external_message_id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                    ))
                },
            )
            .optional()?;
        row.map(decode_message).transpose()
    }

    fn list_recent_messages(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{SELECT_MESSAGE} WHERE conversation_id = ?1 ORDER BY sent_at DESC LIMIT ?2"
        ))?;
        let rows: Vec<MessageRow> = stmt
            .query_map(params![conversation_id.as_str(), limit as i64], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut messages: Vec<Message> = rows
            .into_iter()
            .map(decode_message)
            .collect::<Result<_>>()?;
        messages.reverse();
        Ok(messages)
    }

    fn confirm_message(&self, id: &MessageId, external_message_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE messages SET external_message_id = ?2, delivery_state = 'sent' WHERE id = ?1",
            params![id.as_str(), external_message_id],
        )?;
        if changed == 0 {
            bail!("unknown message {}", id.as_str());
        }
        let conversation_id: String = conn.query_row(
            "SELECT conversation_id FROM messages WHERE id = ?1",
            [id.as_str()],
            |row| row.get(0),
        )?;
        drop(conn);
        self.notifier.emit(ChangeEvent::MessageUpdated {
            conversation_id,
            message_id: id.as_str().to_string(),
        });
        Ok(())
    }

    fn set_message_delivery(&self, id: &MessageId, state: DeliveryState) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE messages SET delivery_state = ?2 WHERE id = ?1",
            params![id.as_str(), state.as_str()],
        )?;
        if changed == 0 {
            bail!("unknown message {}", id.as_str());
        }
        let conversation_id: String = conn.query_row(
            "SELECT conversation_id FROM messages WHERE id = ?1",
            [id.as_str()],
            |row| row.get(0),
        )?;
        drop(conn);
        self.notifier.emit(ChangeEvent::MessageUpdated {
            conversation_id,
            message_id: id.as_str().to_string(),
        });
        Ok(())
    }

    fn delete_message(&self, id: &MessageId) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let conversation_id: Option<String> = conn
            .query_row(
                "SELECT conversation_id FROM messages WHERE id = ?1",
                [id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(conversation_id) = conversation_id else {
            return Ok(());
        };
        conn.execute("DELETE FROM messages WHERE id = ?1", [id.as_str()])?;
        drop(conn);
        self.notifier.emit(ChangeEvent::MessageRemoved {
            conversation_id,
            message_id: id.as_str().to_string(),
        });
        Ok(())
    }

    fn count_messages(&self, conversation_id: &ConversationId) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
            [conversation_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn get_poll_cursor(&self, connection_id: &ConnectionId) -> Result<Option<PollCursor>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(Option<String>, Option<String>, Option<String>, String)> = conn
            .query_row(
                "SELECT page_cursor, listing_started_at, last_synced_at, updated_at \
                 FROM poll_cursors WHERE connection_id = ?1",
                [connection_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;
        row.map(|(page_cursor, listing_started_at, last_synced_at, updated_at)| {
            Ok(PollCursor {
                connection_id: connection_id.clone(),
                page_cursor,
                listing_started_at: listing_started_at.as_deref().map(decode_ts).transpose()?,
                last_synced_at: last_synced_at.as_deref().map(decode_ts).transpose()?,
                updated_at: decode_ts(&updated_at)?,
            })
        })
        .transpose()
    }

    fn save_poll_cursor(&self, cursor: PollCursor) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO poll_cursors (connection_id, page_cursor, listing_started_at, \
             last_synced_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(connection_id) DO UPDATE SET page_cursor = ?2, \
             listing_started_at = ?3, last_synced_at = ?4, updated_at = ?5",
            params![
                cursor.connection_id.as_str(),
                cursor.page_cursor,
                cursor.listing_started_at.map(encode_ts),
                cursor.last_synced_at.map(encode_ts),
                encode_ts(cursor.updated_at),
            ],
        )?;
        Ok(())
    }

    fn subscribe(&self) -> Receiver<ChangeEvent> {
        self.notifier.subscribe()
    }

    fn clear(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "DELETE FROM messages; DELETE FROM conversations; \
             DELETE FROM poll_cursors; DELETE FROM connections;",
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteSocialStore {
        SqliteSocialStore::open_in_memory().unwrap()
    }

    fn active_connection(acct: &str) -> Connection {
        Connection::pending(Platform::Demo).activated(acct, "Demo", "tok", None)
    }

    #[test]
    fn test_migrations_apply() {
        store();
    }

    #[test]
    fn test_connection_roundtrip() {
        let store = store();
        let conn = active_connection("acct-1");
        let id = conn.id.clone();
        store.insert_connection(conn.clone()).unwrap();

        let loaded = store.get_connection(&id).unwrap().unwrap();
        assert_eq!(loaded, conn);

        let found = store
            .find_active_connection(Platform::Demo, "acct-1")
            .unwrap()
            .unwrap();
        assert_eq!(found.id, id);
    }

    #[test]
    fn test_active_uniqueness_index() {
        let store = store();
        store.insert_connection(active_connection("acct-1")).unwrap();
        assert!(store.insert_connection(active_connection("acct-1")).is_err());

        // A revoked duplicate identity is allowed
        let mut dup = active_connection("acct-1");
        dup.status = ConnectionStatus::Revoked;
        store.insert_connection(dup).unwrap();
    }

    #[test]
    fn test_message_dedupe_and_provisionals() {
        let store = store();
        let conn = active_connection("acct-1");
        let conn_id = conn.id.clone();
        store.insert_connection(conn).unwrap();

        let conv = Conversation::new(conn_id, "t1", vec![], Utc::now());
        let conv_id = conv.id.clone();
        store.upsert_conversation(conv).unwrap();

        let m1 = Message::inbound(conv_id.clone(), "m1", "u1", "hi", Utc::now());
        let dup = Message::inbound(conv_id.clone(), "m1", "u1", "hi", Utc::now());
        assert!(store.insert_message_if_absent(m1).unwrap());
        assert!(!store.insert_message_if_absent(dup).unwrap());

        // NULL external ids never collide
        let p1 = Message::outbound_pending(conv_id.clone(), "page", "a");
        let p2 = Message::outbound_pending(conv_id.clone(), "page", "b");
        assert!(store.insert_message_if_absent(p1).unwrap());
        assert!(store.insert_message_if_absent(p2).unwrap());

        assert_eq!(store.count_messages(&conv_id).unwrap(), 3);
    }

    #[test]
    fn test_confirm_message() {
        let store = store();
        let conn = active_connection("acct-1");
        let conn_id = conn.id.clone();
        store.insert_connection(conn).unwrap();
        let conv = Conversation::new(conn_id, "t1", vec![], Utc::now());
        let conv_id = conv.id.clone();
        store.upsert_conversation(conv).unwrap();

        let pending = Message::outbound_pending(conv_id.clone(), "page", "hello");
        let msg_id = pending.id.clone();
        store.insert_message_if_absent(pending).unwrap();

        store.confirm_message(&msg_id, "ext-9").unwrap();
        let confirmed = store.get_message(&msg_id).unwrap().unwrap();
        assert_eq!(confirmed.delivery_state, DeliveryState::Sent);
        assert_eq!(confirmed.external_message_id.as_deref(), Some("ext-9"));

        let by_external = store
            .find_message_by_external(&conv_id, "ext-9")
            .unwrap()
            .unwrap();
        assert_eq!(by_external.id, msg_id);
    }

    #[test]
    fn test_poll_cursor_roundtrip() {
        let store = store();
        let conn = active_connection("acct-1");
        let conn_id = conn.id.clone();
        store.insert_connection(conn).unwrap();

        assert!(store.get_poll_cursor(&conn_id).unwrap().is_none());

        let started = Utc::now();
        let cursor = PollCursor::new(conn_id.clone())
            .started(started)
            .advanced(Some("page-2".to_string()));
        store.save_poll_cursor(cursor).unwrap();
        let loaded = store.get_poll_cursor(&conn_id).unwrap().unwrap();
        assert_eq!(loaded.page_cursor.as_deref(), Some("page-2"));
        // The listing start survives the round trip for crash resume
        assert_eq!(loaded.listing_started_at.map(|t| t.timestamp()), Some(started.timestamp()));

        let done = loaded.completed();
        store.save_poll_cursor(done).unwrap();
        let loaded = store.get_poll_cursor(&conn_id).unwrap().unwrap();
        assert!(loaded.page_cursor.is_none());
        assert!(loaded.listing_started_at.is_none());
        assert_eq!(loaded.last_synced_at.map(|t| t.timestamp()), Some(started.timestamp()));
    }

    #[test]
    fn test_recent_messages_window() {
        let store = store();
        let conn = active_connection("acct-1");
        let conn_id = conn.id.clone();
        store.insert_connection(conn).unwrap();
        let conv = Conversation::new(conn_id, "t1", vec![], Utc::now());
        let conv_id = conv.id.clone();
        store.upsert_conversation(conv).unwrap();

        for i in 0..5 {
            let msg = Message::inbound(
                conv_id.clone(),
                format!("m{i}"),
                "u1",
                format!("body {i}"),
                Utc::now() - chrono::Duration::minutes(5 - i),
            );
            store.insert_message_if_absent(msg).unwrap();
        }

        let recent = store.list_recent_messages(&conv_id, 3).unwrap();
        assert_eq!(recent.len(), 3);
        // Oldest first within the window, window holds the newest three
        assert_eq!(recent[0].body, "body 2");
        assert_eq!(recent[2].body, "body 4");
    }
}
