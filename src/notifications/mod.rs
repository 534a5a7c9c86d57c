//! Notification fan-out over email and WhatsApp.
//!
//! Delivery never fails the request that triggered it: every attempt is
//! recorded in `notification_log` and errors are only logged. Handlers use
//! the `spawn_*` helpers so delivery happens off the request path.

mod email;
mod templates;
mod whatsapp;

pub use email::EmailService;
pub use templates::{format_amount, html_escape, Notification};
pub use whatsapp::WhatsAppService;

use serde::Serialize;
use sqlx::FromRow;
use std::sync::Arc;

use crate::api::metrics::record_notification;
use crate::config::Config;
use crate::db::{log_notification, DbPool, NotificationChannel, NotificationStatus};

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("{0} delivery is not configured")]
    NotConfigured(&'static str),
    #[error("invalid address: {0}")]
    Address(String),
    #[error("failed to build email: {0}")]
    Email(#[from] lettre::error::Error),
    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned {status}: {body}")]
    Provider { status: u16, body: String },
}

/// Someone a notification can reach, with their channel preferences
#[derive(Debug, Clone, FromRow)]
pub struct Recipient {
    pub user_id: Option<String>,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub notify_email: bool,
    pub notify_whatsapp: bool,
}

impl Recipient {
    /// A bare address with no account behind it, e.g. an invitee
    pub fn address(email: &str) -> Self {
        Self {
            user_id: None,
            name: email.to_string(),
            email: email.to_string(),
            phone: None,
            notify_email: true,
            notify_whatsapp: false,
        }
    }
}

/// Outcome counts for one fan-out
#[derive(Debug, Default, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct DeliveryReport {
    pub sent: u32,
    pub failed: u32,
    pub skipped: u32,
}

impl DeliveryReport {
    fn record(&mut self, status: NotificationStatus) {
        match status {
            NotificationStatus::Sent => self.sent += 1,
            NotificationStatus::Failed => self.failed += 1,
            NotificationStatus::Skipped => self.skipped += 1,
        }
    }
}

#[derive(Clone)]
pub struct Notifier {
    db: DbPool,
    email: Arc<EmailService>,
    whatsapp: Arc<WhatsAppService>,
}

impl Notifier {
    pub fn new(config: &Config, db: DbPool) -> Self {
        Self {
            db,
            email: Arc::new(EmailService::new(config.email.clone())),
            whatsapp: Arc::new(WhatsAppService::new(config.whatsapp.clone())),
        }
    }

    pub fn email_enabled(&self) -> bool {
        self.email.is_enabled()
    }

    pub fn whatsapp_enabled(&self) -> bool {
        self.whatsapp.is_enabled()
    }

    /// Members of a household who can be notified, optionally leaving one out
    pub async fn household_recipients(
        &self,
        household_id: &str,
        exclude_user: Option<&str>,
    ) -> Result<Vec<Recipient>, sqlx::Error> {
        sqlx::query_as::<_, Recipient>(
            r#"
            SELECT u.id as user_id, u.name, u.email, u.phone, u.notify_email, u.notify_whatsapp
            FROM household_members hm
            INNER JOIN users u ON hm.user_id = u.id
            WHERE hm.household_id = ? AND (? IS NULL OR u.id != ?)
            ORDER BY hm.joined_at
            "#,
        )
        .bind(household_id)
        .bind(exclude_user)
        .bind(exclude_user)
        .fetch_all(&self.db)
        .await
    }

    /// Deliver to every recipient on every channel they accept
    pub async fn notify(&self, recipients: &[Recipient], notification: &Notification) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for recipient in recipients {
            if notification.is_transactional() || recipient.notify_email {
                let status = self.deliver_email(recipient, notification).await;
                report.record(status);
            }
            if !notification.is_transactional() && recipient.notify_whatsapp {
                if let Some(phone) = recipient.phone.as_deref().filter(|p| !p.is_empty()) {
                    let status = self.deliver_whatsapp(recipient, phone, notification).await;
                    report.record(status);
                }
            }
        }
        report
    }

    /// Fire and forget
    pub fn spawn(&self, recipients: Vec<Recipient>, notification: Notification) {
        let notifier = self.clone();
        tokio::spawn(async move {
            notifier.notify(&recipients, &notification).await;
        });
    }

    /// Fire and forget to a household's members
    pub fn spawn_household(
        &self,
        household_id: String,
        exclude_user: Option<String>,
        notification: Notification,
    ) {
        let notifier = self.clone();
        tokio::spawn(async move {
            match notifier
                .household_recipients(&household_id, exclude_user.as_deref())
                .await
            {
                Ok(recipients) => {
                    notifier.notify(&recipients, &notification).await;
                }
                Err(e) => {
                    tracing::error!(household_id = %household_id, error = %e, "Failed to load notification recipients");
                }
            }
        });
    }

    async fn deliver_email(&self, recipient: &Recipient, notification: &Notification) -> NotificationStatus {
        let result = if self.email.is_enabled() {
            self.email
                .send(
                    &recipient.email,
                    &notification.subject(),
                    &notification.html(),
                    &notification.text(),
                )
                .await
        } else {
            Err(NotifyError::NotConfigured("email"))
        };
        self.record(recipient, NotificationChannel::Email, &recipient.email, notification, result)
            .await
    }

    async fn deliver_whatsapp(
        &self,
        recipient: &Recipient,
        phone: &str,
        notification: &Notification,
    ) -> NotificationStatus {
        let result = if self.whatsapp.is_enabled() {
            let body = format!("*{}*\n{}", notification.subject(), notification.text());
            self.whatsapp.send(phone, &body).await
        } else {
            Err(NotifyError::NotConfigured("whatsapp"))
        };
        self.record(recipient, NotificationChannel::WhatsApp, phone, notification, result)
            .await
    }

    async fn record(
        &self,
        recipient: &Recipient,
        channel: NotificationChannel,
        address: &str,
        notification: &Notification,
        result: Result<(), NotifyError>,
    ) -> NotificationStatus {
        let (status, error) = match result {
            Ok(()) => (NotificationStatus::Sent, None),
            Err(NotifyError::NotConfigured(_)) => {
                tracing::debug!(channel = %channel, kind = %notification.kind(), "Channel not configured, skipping");
                (NotificationStatus::Skipped, Some("not configured".to_string()))
            }
            Err(e) => {
                tracing::warn!(
                    channel = %channel,
                    kind = %notification.kind(),
                    recipient = %address,
                    error = %e,
                    "Notification delivery failed"
                );
                (NotificationStatus::Failed, Some(e.to_string()))
            }
        };

        record_notification(channel, status);

        let logged = async {
            let mut conn = self.db.acquire().await?;
            log_notification(
                &mut conn,
                recipient.user_id.as_deref(),
                channel,
                notification.kind(),
                address,
                status,
                error.as_deref(),
            )
            .await
        }
        .await;
        if let Err(e) = logged {
            tracing::error!(error = %e, "Failed to record notification attempt");
        }

        status
    }
}
