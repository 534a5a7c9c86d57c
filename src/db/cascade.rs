//! Cascading deletes for users and households.

use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::info;

use super::{now, DbPool};

/// Rows removed by a cascading delete
#[derive(Debug, Default, Clone, Serialize, PartialEq, Eq)]
pub struct DeletionSummary {
    pub households: u64,
    pub bills: u64,
    pub expenses: u64,
    pub contributions: u64,
    pub members_detached: u64,
}

impl DeletionSummary {
    fn add(&mut self, other: DeletionSummary) {
        self.households += other.households;
        self.bills += other.bills;
        self.expenses += other.expenses;
        self.contributions += other.contributions;
        self.members_detached += other.members_detached;
    }
}

/// Delete a household and everything scoped to it. Users that pointed at it
/// keep their accounts with the household fields cleared.
pub async fn delete_household_cascade(
    pool: &DbPool,
    household_id: &str,
) -> Result<DeletionSummary, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let summary = delete_household_in(&mut tx, household_id).await?;
    tx.commit().await?;

    info!(household_id = %household_id, bills = summary.bills, "Deleted household");
    Ok(summary)
}

async fn delete_household_in(
    conn: &mut SqliteConnection,
    household_id: &str,
) -> Result<DeletionSummary, sqlx::Error> {
    let mut summary = DeletionSummary::default();

    summary.members_detached = sqlx::query(
        "UPDATE users SET household_id = NULL, household_role = NULL, updated_at = ? WHERE household_id = ?",
    )
    .bind(now())
    .bind(household_id)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    sqlx::query(
        "DELETE FROM bill_splits WHERE bill_id IN (SELECT id FROM bills WHERE household_id = ?)",
    )
    .bind(household_id)
    .execute(&mut *conn)
    .await?;
    sqlx::query(
        "DELETE FROM bill_payments WHERE bill_id IN (SELECT id FROM bills WHERE household_id = ?)",
    )
    .bind(household_id)
    .execute(&mut *conn)
    .await?;

    summary.bills = sqlx::query("DELETE FROM bills WHERE household_id = ?")
        .bind(household_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    summary.expenses = sqlx::query("DELETE FROM expenses WHERE household_id = ?")
        .bind(household_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    summary.contributions = sqlx::query("DELETE FROM contributions WHERE household_id = ?")
        .bind(household_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    sqlx::query("DELETE FROM household_members WHERE household_id = ?")
        .bind(household_id)
        .execute(&mut *conn)
        .await?;
    summary.households = sqlx::query("DELETE FROM households WHERE id = ?")
        .bind(household_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    Ok(summary)
}

/// Delete a user, the households they own and every record they authored.
/// Returns None when the user does not exist.
pub async fn delete_user_cascade(
    pool: &DbPool,
    user_id: &str,
) -> Result<Option<DeletionSummary>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;
    if exists.is_none() {
        return Ok(None);
    }

    let mut summary = DeletionSummary::default();

    let owned: Vec<String> = sqlx::query_scalar("SELECT id FROM households WHERE owner_id = ?")
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await?;
    for household_id in &owned {
        let removed = delete_household_in(&mut tx, household_id).await?;
        summary.add(removed);
    }

    sqlx::query("DELETE FROM household_members WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    // Records authored in households the user did not own
    sqlx::query("DELETE FROM bill_splits WHERE user_id = ? OR bill_id IN (SELECT id FROM bills WHERE created_by = ?)")
        .bind(user_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM bill_payments WHERE bill_id IN (SELECT id FROM bills WHERE created_by = ?)")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    summary.bills += sqlx::query("DELETE FROM bills WHERE created_by = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    summary.expenses += sqlx::query("DELETE FROM expenses WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    summary.contributions += sqlx::query("DELETE FROM contributions WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    sqlx::query("DELETE FROM feedback WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM notification_log WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    info!(
        user_id = %user_id,
        households = summary.households,
        bills = summary.bills,
        expenses = summary.expenses,
        "Deleted user"
    );
    Ok(Some(summary))
}
