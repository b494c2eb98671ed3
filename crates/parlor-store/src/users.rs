use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use parlor_shared::UserId;

use crate::convert::{opt_ts_col, ts_col, uuid_col};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::User;

const USER_COLUMNS: &str = "id, email, password_hash, display_name, created_at, last_seen_at";

impl Database {
    /// Create an account. Fails with [`StoreError::Conflict`] when the email
    /// is already registered.
    pub fn create_user(
        &self,
        email: &str,
        display_name: &str,
        password_hash: &str,
    ) -> Result<User> {
        let user = User {
            id: UserId::new(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            display_name: display_name.to_string(),
            created_at: Utc::now(),
            last_seen_at: None,
        };

        self.conn()
            .execute(
                "INSERT INTO users (id, email, password_hash, display_name, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    user.id.0.to_string(),
                    user.email,
                    user.password_hash,
                    user.display_name,
                    user.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| StoreError::from_insert(e, "email already in use"))?;

        Ok(user)
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = self
            .conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                params![email],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    /// Record when the user was last connected.
    pub fn set_last_seen(&self, id: UserId, at: DateTime<Utc>) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE users SET last_seen_at = ?2 WHERE id = ?1",
            params![id.0.to_string(), at.to_rfc3339()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: UserId(uuid_col(row, 0)?),
        email: row.get(1)?,
        password_hash: row.get(2)?,
        display_name: row.get(3)?,
        created_at: ts_col(row, 4)?,
        last_seen_at: opt_ts_col(row, 5)?,
    })
}
