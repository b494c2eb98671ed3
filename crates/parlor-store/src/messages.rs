use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use parlor_shared::{Message, MessageId, RoomId, UserId};

use crate::convert::{ts_col, uuid_col};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::MessageWithReceipts;

impl Database {
    /// Persist a new message and return it with its assigned id and
    /// creation timestamp.
    pub fn insert_message(&self, room_id: RoomId, sender_id: UserId, content: &str) -> Result<Message> {
        let message = Message {
            id: MessageId::new(),
            room_id,
            sender_id,
            content: content.to_string(),
            created_at: Utc::now(),
        };

        self.conn().execute(
            "INSERT INTO messages (id, room_id, sender_id, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                message.id.0.to_string(),
                message.room_id.0.to_string(),
                message.sender_id.0.to_string(),
                message.content,
                message.created_at.to_rfc3339(),
            ],
        )?;

        Ok(message)
    }

    pub fn get_message(&self, id: MessageId) -> Result<Option<Message>> {
        let message = self
            .conn()
            .query_row(
                "SELECT id, room_id, sender_id, content, created_at
                 FROM messages WHERE id = ?1",
                params![id.0.to_string()],
                row_to_message,
            )
            .optional()?;
        Ok(message)
    }

    /// One page of room history, newest first.
    ///
    /// `cursor` is the id of the last message of the previous page; the page
    /// starts strictly after it. An unknown cursor is [`StoreError::NotFound`].
    pub fn get_messages_for_room(
        &self,
        room_id: RoomId,
        cursor: Option<MessageId>,
        limit: u32,
    ) -> Result<Vec<MessageWithReceipts>> {
        let before_seq: i64 = match cursor {
            Some(cursor) => self
                .conn()
                .query_row(
                    "SELECT seq FROM messages WHERE id = ?1 AND room_id = ?2",
                    params![cursor.0.to_string(), room_id.0.to_string()],
                    |row| row.get(0),
                )
                .map_err(StoreError::from_lookup)?,
            None => i64::MAX,
        };

        let mut stmt = self.conn().prepare(
            "SELECT id, room_id, sender_id, content, created_at
             FROM messages
             WHERE room_id = ?1 AND seq < ?2
             ORDER BY seq DESC
             LIMIT ?3",
        )?;

        let rows = stmt.query_map(
            params![room_id.0.to_string(), before_seq, limit],
            row_to_message,
        )?;

        let mut page = Vec::new();
        for row in rows {
            let message = row?;
            let receipts = self.receipts_for_message(message.id)?;
            page.push(MessageWithReceipts { message, receipts });
        }
        Ok(page)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: MessageId(uuid_col(row, 0)?),
        room_id: RoomId(uuid_col(row, 1)?),
        sender_id: UserId(uuid_col(row, 2)?),
        content: row.get(3)?,
        created_at: ts_col(row, 4)?,
    })
}
