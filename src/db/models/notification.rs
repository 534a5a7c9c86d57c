//! Notification log models.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};
use uuid::Uuid;

use super::common::string_enum;

string_enum! {
    pub enum NotificationChannel {
        Email => "email",
        WhatsApp => "whatsapp",
    }
}

string_enum! {
    /// What a notification is about
    pub enum NotificationKind {
        Verification => "verification",
        PasswordReset => "password_reset",
        HouseholdInvite => "household_invite",
        MemberJoined => "member_joined",
        BillCreated => "bill_created",
        BillDueReminder => "bill_due_reminder",
        BillPaid => "bill_paid",
    }
}

string_enum! {
    pub enum NotificationStatus {
        Sent => "sent",
        Failed => "failed",
        /// Channel not configured or recipient opted out
        Skipped => "skipped",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NotificationLog {
    pub id: String,
    pub user_id: Option<String>,
    pub channel: String,
    pub kind: String,
    pub recipient: String,
    pub status: String,
    pub error: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct NotificationLogQuery {
    pub status: Option<String>,
    pub channel: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// Record one delivery attempt
pub async fn log_notification(
    conn: &mut SqliteConnection,
    user_id: Option<&str>,
    channel: NotificationChannel,
    kind: NotificationKind,
    recipient: &str,
    status: NotificationStatus,
    error: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO notification_log (id, user_id, channel, kind, recipient, status, error, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(channel.as_str())
    .bind(kind.as_str())
    .bind(recipient)
    .bind(status.as_str())
    .bind(error)
    .bind(crate::db::now())
    .execute(conn)
    .await?;
    Ok(())
}
