use chrono::Utc;
use rusqlite::params;

use parlor_shared::{MessageId, ReceiptStatus, UserId};

use crate::convert::{ts_col, uuid_col};
use crate::database::Database;
use crate::error::Result;
use crate::models::Receipt;

impl Database {
    /// Record a receipt. At most one row exists per (message, user, status);
    /// repeated calls are no-ops.
    pub fn upsert_receipt(
        &self,
        message_id: MessageId,
        user_id: UserId,
        status: ReceiptStatus,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO message_receipts (message_id, user_id, status, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                message_id.0.to_string(),
                user_id.0.to_string(),
                status.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn receipts_for_message(&self, message_id: MessageId) -> Result<Vec<Receipt>> {
        let mut stmt = self.conn().prepare(
            "SELECT message_id, user_id, status, created_at
             FROM message_receipts WHERE message_id = ?1
             ORDER BY created_at ASC",
        )?;

        let rows = stmt.query_map(params![message_id.0.to_string()], row_to_receipt)?;

        let mut receipts = Vec::new();
        for row in rows {
            receipts.push(row?);
        }
        Ok(receipts)
    }
}

fn row_to_receipt(row: &rusqlite::Row<'_>) -> rusqlite::Result<Receipt> {
    let status_str: String = row.get(2)?;
    let status = ReceiptStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown receipt status: {status_str}").into(),
        )
    })?;

    Ok(Receipt {
        message_id: MessageId(uuid_col(row, 0)?),
        user_id: UserId(uuid_col(row, 1)?),
        status,
        created_at: ts_col(row, 3)?,
    })
}
