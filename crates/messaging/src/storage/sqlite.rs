//! SQLite-based message storage

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use rusqlite_migration::{M, Migrations};

use super::traits::{AppliedChanges, MailboxSlice, MessageRow, MessageStore, StagedChange};
use crate::models::{Container, Member, MemberId, Message, MessageId, NewMember, Party};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- Members known to messaging (profile data lives elsewhere)
            CREATE TABLE members (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                known_as TEXT,
                photo_url TEXT
            );

            -- Direct messages; usernames are denormalized for filtering
            CREATE TABLE messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sender_id INTEGER NOT NULL,
                sender_username TEXT NOT NULL,
                recipient_id INTEGER NOT NULL,
                recipient_username TEXT NOT NULL,
                content TEXT NOT NULL,
                message_sent TEXT NOT NULL,
                date_read TEXT,
                FOREIGN KEY (sender_id) REFERENCES members(id) ON DELETE CASCADE,
                FOREIGN KEY (recipient_id) REFERENCES members(id) ON DELETE CASCADE
            );

            CREATE INDEX idx_messages_recipient
                ON messages(recipient_username, message_sent DESC);
            CREATE INDEX idx_messages_sender
                ON messages(sender_username, message_sent DESC);
            "#,
        ),
        // Migration 2: Per-party soft delete
        M::up(
            r#"
            ALTER TABLE messages ADD COLUMN sender_deleted INTEGER NOT NULL DEFAULT 0;
            ALTER TABLE messages ADD COLUMN recipient_deleted INTEGER NOT NULL DEFAULT 0;
            "#,
        ),
    ])
}

const MESSAGE_ROW_COLUMNS: &str = "m.id, m.sender_id, m.sender_username, m.recipient_id,
        m.recipient_username, m.content, m.message_sent, m.date_read,
        m.sender_deleted, m.recipient_deleted, s.photo_url, r.photo_url
     FROM messages m
     LEFT JOIN members s ON s.id = m.sender_id
     LEFT JOIN members r ON r.id = m.recipient_id";

/// WHERE clause selecting one mailbox container for `?1` (username)
fn container_clause(container: Container) -> &'static str {
    match container {
        Container::Inbox => "m.recipient_username = ?1 AND m.recipient_deleted = 0",
        Container::Outbox => "m.sender_username = ?1 AND m.sender_deleted = 0",
        Container::Unread => {
            "m.recipient_username = ?1 AND m.date_read IS NULL AND m.recipient_deleted = 0"
        }
    }
}

fn deleted_column(party: Party) -> &'static str {
    match party {
        Party::Sender => "sender_deleted",
        Party::Recipient => "recipient_deleted",
    }
}

fn query_mailbox(
    conn: &Connection,
    username: &str,
    container: Container,
    limit: usize,
    offset: usize,
) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_ROW_COLUMNS}
         WHERE {}
         ORDER BY m.message_sent DESC, m.id DESC
         LIMIT ?2 OFFSET ?3",
        container_clause(container)
    ))?;

    let rows = stmt
        .query_map(
            params![username, limit as i64, offset as i64],
            message_row_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to list {container} for {username}"))?;

    Ok(rows)
}

fn count_container(conn: &Connection, username: &str, container: Container) -> Result<usize> {
    let count: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM messages m WHERE {}",
            container_clause(container)
        ),
        [username],
        |row| row.get(0),
    )?;

    Ok(count as usize)
}

/// Format a timestamp as fixed-width RFC 3339 so text order matches time order
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let message_sent: String = row.get(6)?;
    let date_read: Option<String> = row.get(7)?;

    Ok(Message {
        id: MessageId::new(row.get(0)?),
        sender_id: MemberId::new(row.get(1)?),
        sender_username: row.get(2)?,
        recipient_id: MemberId::new(row.get(3)?),
        recipient_username: row.get(4)?,
        content: row.get(5)?,
        message_sent: parse_timestamp(6, &message_sent)?,
        date_read: date_read.map(|raw| parse_timestamp(7, &raw)).transpose()?,
        sender_deleted: row.get(8)?,
        recipient_deleted: row.get(9)?,
    })
}

fn message_row_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        message: message_from_row(row)?,
        sender_photo_url: row.get(10)?,
        recipient_photo_url: row.get(11)?,
    })
}

/// SQLite-based message storage
pub struct SqliteMessageStore {
    conn: Mutex<Connection>,
}

impl SqliteMessageStore {
    /// Open (or create) the database at `db_path` and run migrations
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;
        Self::with_connection(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::with_connection(conn)
    }

    fn with_connection(mut conn: Connection) -> Result<Self> {
        // WAL lets readers proceed during the short write transactions.
        // foreign_keys is required for the member references to be enforced.
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
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("SQLite connection lock poisoned"))
    }
}

impl MessageStore for SqliteMessageStore {
    fn upsert_member(&self, member: NewMember) -> Result<Member> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO members (username, known_as, photo_url)
             VALUES (?, ?, ?)
             ON CONFLICT(username) DO UPDATE SET
                known_as = excluded.known_as,
                photo_url = excluded.photo_url",
            params![member.username, member.known_as, member.photo_url],
        )
        .with_context(|| format!("Failed to save member {}", member.username))?;

        let id: i64 = conn.query_row(
            "SELECT id FROM members WHERE username = ?",
            [&member.username],
            |row| row.get(0),
        )?;

        Ok(member.into_member(MemberId::new(id)))
    }

    fn get_member(&self, username: &str) -> Result<Option<Member>> {
        let conn = self.conn()?;

        let member = conn
            .query_row(
                "SELECT id, username, known_as, photo_url FROM members WHERE username = ?",
                [username],
                |row| {
                    Ok(Member {
                        id: MemberId::new(row.get(0)?),
                        username: row.get(1)?,
                        known_as: row.get(2)?,
                        photo_url: row.get(3)?,
                    })
                },
            )
            .optional()?;

        Ok(member)
    }

    fn get_message(&self, id: MessageId) -> Result<Option<Message>> {
        let conn = self.conn()?;

        let message = conn
            .query_row(
                &format!("SELECT {MESSAGE_ROW_COLUMNS} WHERE m.id = ?"),
                [id.as_i64()],
                message_from_row,
            )
            .optional()
            .with_context(|| format!("Failed to load message {id}"))?;

        Ok(message)
    }

    fn list_mailbox(
        &self,
        username: &str,
        container: Container,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MessageRow>> {
        let conn = self.conn()?;
        query_mailbox(&conn, username, container, limit, offset)
    }

    fn count_mailbox(&self, username: &str, container: Container) -> Result<usize> {
        let conn = self.conn()?;
        count_container(&conn, username, container)
    }

    fn mailbox_slice(
        &self,
        username: &str,
        container: Container,
        limit: usize,
        offset: usize,
    ) -> Result<MailboxSlice> {
        let mut conn = self.conn()?;
        // One read transaction so a writer on another connection can't land
        // between the count and the page
        let tx = conn.transaction()?;

        let total_count = count_container(&tx, username, container)?;
        let rows = query_mailbox(&tx, username, container, limit, offset)?;

        tx.commit()?;
        Ok(MailboxSlice { rows, total_count })
    }

    fn list_thread(&self, current: &str, other: &str) -> Result<Vec<MessageRow>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_ROW_COLUMNS}
             WHERE (m.recipient_username = ?1 AND m.sender_username = ?2
                    AND m.recipient_deleted = 0)
                OR (m.sender_username = ?1 AND m.recipient_username = ?2
                    AND m.sender_deleted = 0)
             ORDER BY m.message_sent ASC, m.id ASC"
        ))?;

        let rows = stmt
            .query_map(params![current, other], message_row_from_row)?
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to load thread {current} <-> {other}"))?;

        Ok(rows)
    }

    fn mark_read(&self, ids: &[MessageId], read_at: DateTime<Utc>) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let read_at = format_timestamp(&read_at);

        let mut changed = 0;
        {
            let mut stmt = tx.prepare(
                "UPDATE messages SET date_read = ? WHERE id = ? AND date_read IS NULL",
            )?;
            for id in ids {
                changed += stmt.execute(params![read_at, id.as_i64()])?;
            }
        }

        tx.commit().context("Failed to commit read receipts")?;
        Ok(changed)
    }

    fn apply_changes(&self, changes: &[StagedChange]) -> Result<AppliedChanges> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut applied = AppliedChanges::default();

        for change in changes {
            match change {
                StagedChange::Insert(message) => {
                    tx.execute(
                        "INSERT INTO messages
                         (sender_id, sender_username, recipient_id, recipient_username,
                          content, message_sent)
                         VALUES (?, ?, ?, ?, ?, ?)",
                        params![
                            message.sender_id.as_i64(),
                            message.sender_username,
                            message.recipient_id.as_i64(),
                            message.recipient_username,
                            message.content,
                            format_timestamp(&message.message_sent),
                        ],
                    )
                    .with_context(|| {
                        format!(
                            "Failed to insert message from {} to {}",
                            message.sender_username, message.recipient_username
                        )
                    })?;
                    applied
                        .inserted_ids
                        .push(MessageId::new(tx.last_insert_rowid()));
                    applied.rows_affected += 1;
                }
                StagedChange::HideFor { id, party } => {
                    applied.rows_affected += tx.execute(
                        &format!(
                            "UPDATE messages SET {} = 1 WHERE id = ?",
                            deleted_column(*party)
                        ),
                        [id.as_i64()],
                    )?;
                    applied.rows_affected += tx.execute(
                        "DELETE FROM messages
                         WHERE id = ? AND sender_deleted = 1 AND recipient_deleted = 1",
                        [id.as_i64()],
                    )?;
                }
                StagedChange::Remove(id) => {
                    applied.rows_affected +=
                        tx.execute("DELETE FROM messages WHERE id = ?", [id.as_i64()])?;
                }
            }
        }

        tx.commit().context("Failed to commit staged changes")?;
        Ok(applied)
    }

    fn clear(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            "DELETE FROM messages;
             DELETE FROM members;",
        )?;

        Ok(())
    }
}
