//! Background maintenance.
//!
//! The bill sweeper runs on a fixed interval and:
//! - Moves unpaid bills past their due date to overdue
//! - Sends one reminder per bill once it falls within the reminder lead time
//!
//! The rate limiter's stale entries are cleared by a separate task.

use anyhow::Result;
use chrono::{Days, NaiveDate};
use serde::Serialize;
use sqlx::FromRow;
use std::sync::Arc;
use tokio::time::{interval, Duration};

use crate::api::rate_limit::spawn_cleanup_task;
use crate::config::JobsConfig;
use crate::db::{self, format_date, refresh_overdue, Bill};
use crate::notifications::{Notification, Notifier};
use crate::{AppState, DbPool};

/// Used when the household owner's currency cannot be found
const FALLBACK_CURRENCY: &str = "USD";

#[derive(Debug, Default, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct SweepStats {
    pub overdue_marked: u64,
    pub reminders_sent: u64,
}

/// Unreminded bill with its household owner's currency
#[derive(Debug, FromRow)]
struct DueBill {
    #[sqlx(flatten)]
    bill: Bill,
    currency: Option<String>,
}

pub struct BillSweeper {
    db: DbPool,
    notifier: Notifier,
    config: JobsConfig,
    frontend_url: String,
}

impl BillSweeper {
    pub fn new(db: DbPool, notifier: Notifier, config: JobsConfig, frontend_url: String) -> Self {
        Self {
            db,
            notifier,
            config,
            frontend_url,
        }
    }

    /// Run a single sweep as of `today`
    pub async fn run_once(&self, today: NaiveDate) -> Result<SweepStats> {
        let mut stats = SweepStats::default();

        {
            let mut conn = self.db.acquire().await?;
            stats.overdue_marked = refresh_overdue(&mut conn, None, today).await?;
        }

        let lead_days = self.config.reminder_lead_days.max(0) as u64;
        let horizon = today.checked_add_days(Days::new(lead_days)).unwrap_or(today);
        let due: Vec<DueBill> = sqlx::query_as(
            r#"
            SELECT b.*, u.currency as currency
            FROM bills b
            LEFT JOIN households h ON b.household_id = h.id
            LEFT JOIN users u ON h.owner_id = u.id
            WHERE b.status = 'pending'
              AND b.reminder_sent_at IS NULL
              AND b.due_date >= ?
              AND b.due_date <= ?
            ORDER BY b.due_date
            "#,
        )
        .bind(format_date(today))
        .bind(format_date(horizon))
        .fetch_all(&self.db)
        .await?;

        for DueBill { bill, currency } in due {
            // Claim the bill first so overlapping sweeps send once
            let claimed = sqlx::query(
                "UPDATE bills SET reminder_sent_at = ? WHERE id = ? AND reminder_sent_at IS NULL",
            )
            .bind(db::now())
            .bind(&bill.id)
            .execute(&self.db)
            .await?
            .rows_affected();
            if claimed == 0 {
                continue;
            }

            let recipients = match self
                .notifier
                .household_recipients(&bill.household_id, None)
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(bill_id = %bill.id, error = %e, "Failed to load reminder recipients");
                    continue;
                }
            };
            let notification = Notification::bill_reminder(
                &bill,
                currency.as_deref().unwrap_or(FALLBACK_CURRENCY),
                &self.frontend_url,
                today,
            );
            let report = self.notifier.notify(&recipients, &notification).await;
            tracing::debug!(
                bill_id = %bill.id,
                sent = report.sent,
                failed = report.failed,
                skipped = report.skipped,
                "Bill reminder delivered"
            );
            stats.reminders_sent += 1;
        }

        if stats.overdue_marked > 0 || stats.reminders_sent > 0 {
            tracing::info!(
                overdue = stats.overdue_marked,
                reminders = stats.reminders_sent,
                "Bill sweep completed"
            );
        }
        Ok(stats)
    }
}

/// Start the bill sweeper and the rate limiter cleanup
pub fn spawn(state: Arc<AppState>) {
    spawn_cleanup_task(
        state.rate_limiter.clone(),
        state.config.rate_limit.cleanup_interval,
    );

    let config = state.config.jobs.clone();
    if !config.enabled {
        tracing::info!("Background bill sweeps are disabled");
        return;
    }

    let interval_secs = config.sweep_interval_secs.max(1);
    tracing::info!(
        interval_secs = interval_secs,
        reminder_lead_days = config.reminder_lead_days,
        "Starting bill sweeper"
    );

    let sweeper = BillSweeper::new(
        state.db.clone(),
        state.notifier.clone(),
        config,
        state.config.server.frontend_url.clone(),
    );

    tokio::spawn(async move {
        let mut tick = interval(Duration::from_secs(interval_secs));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tick.tick().await;
            if let Err(e) = sweeper.run_once(db::today()).await {
                tracing::error!(error = %e, "Bill sweep failed");
            }
        }
    });
}
