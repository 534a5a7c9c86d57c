//! Bills, their per-member splits and payment history.

use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};
use uuid::Uuid;

use super::common::{format_date, parse_date, string_enum};
use crate::db::{now, DbPool};

string_enum! {
    pub enum BillCategory {
        Rent => "rent",
        Utilities => "utilities",
        Internet => "internet",
        Phone => "phone",
        Insurance => "insurance",
        Subscription => "subscription",
        Loan => "loan",
        Tax => "tax",
        Other => "other",
    }
}

string_enum! {
    pub enum BillStatus {
        Pending => "pending",
        Paid => "paid",
        Overdue => "overdue",
    }
}

string_enum! {
    pub enum RecurrenceInterval {
        Weekly => "weekly",
        Biweekly => "biweekly",
        Monthly => "monthly",
        Quarterly => "quarterly",
        Yearly => "yearly",
    }
}

string_enum! {
    /// How a bill's amount is shared between members
    pub enum SplitType {
        None => "none",
        Equal => "equal",
        Custom => "custom",
    }
}

impl RecurrenceInterval {
    /// Due date of the next occurrence. Month-based intervals clamp to the
    /// last day of the target month (Jan 31 + 1 month = Feb 28/29).
    pub fn advance(&self, date: NaiveDate) -> Option<NaiveDate> {
        match self {
            RecurrenceInterval::Weekly => date.checked_add_days(chrono::Days::new(7)),
            RecurrenceInterval::Biweekly => date.checked_add_days(chrono::Days::new(14)),
            RecurrenceInterval::Monthly => date.checked_add_months(Months::new(1)),
            RecurrenceInterval::Quarterly => date.checked_add_months(Months::new(3)),
            RecurrenceInterval::Yearly => date.checked_add_months(Months::new(12)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Bill {
    pub id: String,
    pub household_id: String,
    pub created_by: String,
    pub title: String,
    pub amount_cents: i64,
    pub category: String,
    pub due_date: String,
    pub status: String,
    pub is_recurring: bool,
    pub recurrence_interval: Option<String>,
    pub split_type: String,
    pub notes: Option<String>,
    pub paid_at: Option<String>,
    pub paid_by: Option<String>,
    pub reminder_sent_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Bill {
    pub fn status_enum(&self) -> BillStatus {
        self.status.parse().unwrap_or(BillStatus::Pending)
    }

    pub fn due(&self) -> Option<NaiveDate> {
        parse_date(&self.due_date).ok()
    }

    pub fn interval(&self) -> Option<RecurrenceInterval> {
        self.recurrence_interval.as_deref().and_then(|i| i.parse().ok())
    }

    /// Status as of `today`: paid stays paid, anything else is overdue once
    /// the due date has passed and pending otherwise.
    pub fn effective_status(&self, today: NaiveDate) -> BillStatus {
        if self.status_enum() == BillStatus::Paid {
            return BillStatus::Paid;
        }
        match self.due() {
            Some(due) if due < today => BillStatus::Overdue,
            _ => BillStatus::Pending,
        }
    }

    pub fn is_paid(&self) -> bool {
        self.status_enum() == BillStatus::Paid
    }

    /// Next occurrence of a recurring bill, or None when not recurring
    pub fn next_due_date(&self) -> Option<NaiveDate> {
        if !self.is_recurring {
            return None;
        }
        self.interval()?.advance(self.due()?)
    }

    pub async fn find(conn: &mut SqliteConnection, id: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Bill>("SELECT * FROM bills WHERE id = ?")
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    pub async fn splits(
        conn: &mut SqliteConnection,
        bill_id: &str,
    ) -> Result<Vec<BillSplit>, sqlx::Error> {
        sqlx::query_as::<_, BillSplit>(
            r#"
            SELECT bs.id, bs.bill_id, bs.user_id, bs.amount_cents, bs.paid, u.name as user_name
            FROM bill_splits bs
            LEFT JOIN users u ON bs.user_id = u.id
            WHERE bs.bill_id = ?
            ORDER BY u.name ASC
            "#,
        )
        .bind(bill_id)
        .fetch_all(conn)
        .await
    }

    pub async fn payments(
        conn: &mut SqliteConnection,
        bill_id: &str,
    ) -> Result<Vec<BillPayment>, sqlx::Error> {
        sqlx::query_as::<_, BillPayment>(
            "SELECT * FROM bill_payments WHERE bill_id = ? ORDER BY paid_at DESC",
        )
        .bind(bill_id)
        .fetch_all(conn)
        .await
    }

    /// Bill with splits attached
    pub async fn detail(self, conn: &mut SqliteConnection) -> Result<BillDetail, sqlx::Error> {
        let splits = Self::splits(&mut *conn, &self.id).await?;
        let paid_cents: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount_cents), 0) FROM bill_payments WHERE bill_id = ?",
        )
        .bind(&self.id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(BillDetail {
            bill: self,
            splits,
            paid_cents,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BillSplit {
    pub id: String,
    pub bill_id: String,
    pub user_id: String,
    pub amount_cents: i64,
    pub paid: bool,
    pub user_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BillPayment {
    pub id: String,
    pub bill_id: String,
    pub paid_by: String,
    pub amount_cents: i64,
    pub note: Option<String>,
    pub paid_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillDetail {
    #[serde(flatten)]
    pub bill: Bill,
    pub splits: Vec<BillSplit>,
    /// Sum of recorded payments
    pub paid_cents: i64,
}

/// A requested custom share
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SplitShare {
    pub user_id: String,
    pub amount_cents: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateBillRequest {
    pub title: String,
    pub amount_cents: i64,
    pub category: Option<String>,
    pub due_date: String,
    #[serde(default)]
    pub is_recurring: bool,
    pub recurrence_interval: Option<String>,
    pub split_type: Option<String>,
    #[serde(default)]
    pub splits: Vec<SplitShare>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateBillRequest {
    pub title: Option<String>,
    pub amount_cents: Option<i64>,
    pub category: Option<String>,
    pub due_date: Option<String>,
    pub is_recurring: Option<bool>,
    pub recurrence_interval: Option<String>,
    pub split_type: Option<String>,
    pub splits: Option<Vec<SplitShare>>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PayBillRequest {
    pub amount_cents: Option<i64>,
    pub note: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PayBillResponse {
    pub bill: BillDetail,
    pub payment: BillPayment,
    /// Next occurrence created for recurring bills
    pub next_bill: Option<Bill>,
}

#[derive(Debug, Deserialize)]
pub struct SplitPaidRequest {
    pub paid: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct BillQuery {
    pub status: Option<String>,
    pub category: Option<String>,
    /// Due on or after
    pub from: Option<String>,
    /// Due on or before
    pub to: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpcomingQuery {
    pub days: Option<i64>,
}

/// Divide `amount_cents` across `members` in order. Leftover cents go one
/// each to the first members so the shares always sum to the amount.
pub fn split_equally(amount_cents: i64, members: &[String]) -> Vec<SplitShare> {
    if members.is_empty() {
        return Vec::new();
    }
    let count = members.len() as i64;
    let base = amount_cents / count;
    let remainder = amount_cents % count;
    members
        .iter()
        .enumerate()
        .map(|(i, user_id)| SplitShare {
            user_id: user_id.clone(),
            amount_cents: base + if (i as i64) < remainder { 1 } else { 0 },
        })
        .collect()
}

/// Check custom shares against the bill amount and the household's members
pub fn validate_custom_split(
    amount_cents: i64,
    shares: &[SplitShare],
    members: &[String],
) -> Result<(), String> {
    if shares.is_empty() {
        return Err("Custom split requires at least one share".to_string());
    }
    let mut seen = std::collections::HashSet::new();
    for share in shares {
        if share.amount_cents < 0 {
            return Err("Split amounts cannot be negative".to_string());
        }
        if !members.contains(&share.user_id) {
            return Err(format!("User {} is not a household member", share.user_id));
        }
        if !seen.insert(share.user_id.as_str()) {
            return Err(format!("User {} appears more than once", share.user_id));
        }
    }
    let total: i64 = shares.iter().map(|s| s.amount_cents).sum();
    if total != amount_cents {
        return Err(format!(
            "Split amounts sum to {} but the bill is {}",
            total, amount_cents
        ));
    }
    Ok(())
}

/// Replace a bill's splits
pub async fn replace_splits(
    conn: &mut SqliteConnection,
    bill_id: &str,
    shares: &[SplitShare],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM bill_splits WHERE bill_id = ?")
        .bind(bill_id)
        .execute(&mut *conn)
        .await?;
    for share in shares {
        sqlx::query(
            "INSERT INTO bill_splits (id, bill_id, user_id, amount_cents, paid) VALUES (?, ?, ?, ?, 0)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(bill_id)
        .bind(&share.user_id)
        .bind(share.amount_cents)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Move unpaid bills whose due date has passed to overdue, optionally for a
/// single household. Returns the number of bills changed.
pub async fn refresh_overdue(
    conn: &mut SqliteConnection,
    household_id: Option<&str>,
    today: NaiveDate,
) -> Result<u64, sqlx::Error> {
    let today = format_date(today);
    let result = match household_id {
        Some(id) => {
            sqlx::query(
                "UPDATE bills SET status = 'overdue', updated_at = ? WHERE status = 'pending' AND due_date < ? AND household_id = ?",
            )
            .bind(now())
            .bind(&today)
            .bind(id)
            .execute(conn)
            .await?
        }
        None => {
            sqlx::query(
                "UPDATE bills SET status = 'overdue', updated_at = ? WHERE status = 'pending' AND due_date < ?",
            )
            .bind(now())
            .bind(&today)
            .execute(conn)
            .await?
        }
    };
    Ok(result.rows_affected())
}

/// Record a payment, mark the bill paid and, for recurring bills, create the
/// next occurrence with the same splits (unpaid). All in one transaction.
///
/// Returns `None` without writing anything when the bill is already paid.
pub async fn mark_as_paid(
    pool: &DbPool,
    bill: &Bill,
    paid_by: &str,
    amount_cents: i64,
    note: Option<&str>,
) -> Result<Option<(BillPayment, Option<Bill>)>, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let timestamp = now();

    let claimed = sqlx::query(
        "UPDATE bills SET status = 'paid', paid_at = ?, paid_by = ?, updated_at = ? WHERE id = ? AND status != 'paid'",
    )
    .bind(&timestamp)
    .bind(paid_by)
    .bind(&timestamp)
    .bind(&bill.id)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    if claimed == 0 {
        tx.rollback().await?;
        return Ok(None);
    }

    let payment = BillPayment {
        id: Uuid::new_v4().to_string(),
        bill_id: bill.id.clone(),
        paid_by: paid_by.to_string(),
        amount_cents,
        note: note.map(str::to_string),
        paid_at: timestamp.clone(),
    };

    sqlx::query(
        "INSERT INTO bill_payments (id, bill_id, paid_by, amount_cents, note, paid_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&payment.id)
    .bind(&payment.bill_id)
    .bind(&payment.paid_by)
    .bind(payment.amount_cents)
    .bind(&payment.note)
    .bind(&payment.paid_at)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE bill_splits SET paid = 1 WHERE bill_id = ?")
        .bind(&bill.id)
        .execute(&mut *tx)
        .await?;

    let next_bill = match bill.next_due_date() {
        Some(next_due) => {
            let next = Bill {
                id: Uuid::new_v4().to_string(),
                due_date: format_date(next_due),
                status: BillStatus::Pending.to_string(),
                paid_at: None,
                paid_by: None,
                reminder_sent_at: None,
                created_at: timestamp.clone(),
                updated_at: timestamp.clone(),
                ..bill.clone()
            };
            insert_bill(&mut tx, &next).await?;

            let shares: Vec<SplitShare> = Bill::splits(&mut tx, &bill.id)
                .await?
                .into_iter()
                .map(|s| SplitShare {
                    user_id: s.user_id,
                    amount_cents: s.amount_cents,
                })
                .collect();
            replace_splits(&mut tx, &next.id, &shares).await?;
            Some(next)
        }
        None => None,
    };

    tx.commit().await?;
    Ok(Some((payment, next_bill)))
}

pub async fn insert_bill(conn: &mut SqliteConnection, bill: &Bill) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO bills (
            id, household_id, created_by, title, amount_cents, category, due_date, status,
            is_recurring, recurrence_interval, split_type, notes, paid_at, paid_by,
            reminder_sent_at, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&bill.id)
    .bind(&bill.household_id)
    .bind(&bill.created_by)
    .bind(&bill.title)
    .bind(bill.amount_cents)
    .bind(&bill.category)
    .bind(&bill.due_date)
    .bind(&bill.status)
    .bind(bill.is_recurring)
    .bind(&bill.recurrence_interval)
    .bind(&bill.split_type)
    .bind(&bill.notes)
    .bind(&bill.paid_at)
    .bind(&bill.paid_by)
    .bind(&bill.reminder_sent_at)
    .bind(&bill.created_at)
    .bind(&bill.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}
