use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use parlor_shared::{RoomId, UserId};

use crate::convert::{ts_col, uuid_col};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Room;

const ROOM_COLUMNS: &str = "id, name, is_private, invite_code, created_at";

impl Database {
    pub fn create_room(
        &self,
        name: &str,
        is_private: bool,
        invite_code: Option<&str>,
    ) -> Result<Room> {
        let room = Room {
            id: RoomId::new(),
            name: name.to_string(),
            is_private,
            invite_code: invite_code.map(str::to_string),
            created_at: Utc::now(),
        };

        self.conn()
            .execute(
                "INSERT INTO rooms (id, name, is_private, invite_code, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    room.id.0.to_string(),
                    room.name,
                    room.is_private,
                    room.invite_code,
                    room.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| StoreError::from_insert(e, "invite code already in use"))?;

        Ok(room)
    }

    pub fn get_room(&self, id: RoomId) -> Result<Option<Room>> {
        let room = self
            .conn()
            .query_row(
                &format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id = ?1"),
                params![id.0.to_string()],
                row_to_room,
            )
            .optional()?;
        Ok(room)
    }

    pub fn find_room_by_invite(&self, invite_code: &str) -> Result<Option<Room>> {
        let room = self
            .conn()
            .query_row(
                &format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE invite_code = ?1"),
                params![invite_code],
                row_to_room,
            )
            .optional()?;
        Ok(room)
    }

    /// Idempotently add `user_id` to the room's member list.
    pub fn add_member(&self, user_id: UserId, room_id: RoomId) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO room_members (user_id, room_id, joined_at)
             VALUES (?1, ?2, ?3)",
            params![
                user_id.0.to_string(),
                room_id.0.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn is_member(&self, user_id: UserId, room_id: RoomId) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM room_members WHERE user_id = ?1 AND room_id = ?2",
                params![user_id.0.to_string(), room_id.0.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Rooms the user belongs to, oldest membership first.
    pub fn rooms_for_user(&self, user_id: UserId) -> Result<Vec<Room>> {
        let mut stmt = self.conn().prepare(
            "SELECT r.id, r.name, r.is_private, r.invite_code, r.created_at
             FROM rooms r
             JOIN room_members m ON m.room_id = r.id
             WHERE m.user_id = ?1
             ORDER BY m.joined_at ASC",
        )?;

        let rows = stmt.query_map(params![user_id.0.to_string()], row_to_room)?;

        let mut rooms = Vec::new();
        for row in rows {
            rooms.push(row?);
        }
        Ok(rooms)
    }
}

fn row_to_room(row: &rusqlite::Row<'_>) -> rusqlite::Result<Room> {
    Ok(Room {
        id: RoomId(uuid_col(row, 0)?),
        name: row.get(1)?,
        is_private: row.get(2)?,
        invite_code: row.get(3)?,
        created_at: ts_col(row, 4)?,
    })
}
