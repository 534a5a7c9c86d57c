//! Day-to-day household spending.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};

use super::common::string_enum;

string_enum! {
    pub enum ExpenseCategory {
        Groceries => "groceries",
        Dining => "dining",
        Transport => "transport",
        Entertainment => "entertainment",
        Health => "health",
        Shopping => "shopping",
        Household => "household",
        Education => "education",
        Travel => "travel",
        Other => "other",
    }
}

string_enum! {
    pub enum PaymentMethod {
        Cash => "cash",
        Card => "card",
        BankTransfer => "bank_transfer",
        MobileMoney => "mobile_money",
        Other => "other",
    }
}

string_enum! {
    pub enum ExpenseStatus {
        Pending => "pending",
        Completed => "completed",
        Cancelled => "cancelled",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Expense {
    pub id: String,
    pub household_id: String,
    pub user_id: String,
    pub description: String,
    pub amount_cents: i64,
    pub category: String,
    pub payment_method: String,
    pub status: String,
    pub date: String,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Expense with the author's name for list views
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExpenseWithUser {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub expense: Expense,
    pub user_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateExpenseRequest {
    pub description: String,
    pub amount_cents: i64,
    pub category: Option<String>,
    pub payment_method: Option<String>,
    pub status: Option<String>,
    pub date: String,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateExpenseRequest {
    pub description: Option<String>,
    pub amount_cents: Option<i64>,
    pub category: Option<String>,
    pub payment_method: Option<String>,
    pub status: Option<String>,
    pub date: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExpenseQuery {
    pub category: Option<String>,
    pub status: Option<String>,
    /// Only the caller's own expenses
    #[serde(default)]
    pub mine: bool,
    pub from: Option<String>,
    pub to: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// Total for one category
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct CategoryTotal {
    pub category: String,
    pub total_cents: i64,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct ExpenseSummary {
    pub total_cents: i64,
    pub count: i64,
    pub by_category: Vec<CategoryTotal>,
}

impl Expense {
    pub async fn find(conn: &mut SqliteConnection, id: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Expense>("SELECT * FROM expenses WHERE id = ?")
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    pub fn is_cancelled(&self) -> bool {
        self.status.parse::<ExpenseStatus>() == Ok(ExpenseStatus::Cancelled)
    }
}

/// Totals by category for non-cancelled expenses between `from` and `to`
/// (inclusive, either bound optional)
pub async fn totals_by_category(
    conn: &mut SqliteConnection,
    household_id: &str,
    from: Option<&str>,
    to: Option<&str>,
) -> Result<Vec<CategoryTotal>, sqlx::Error> {
    sqlx::query_as::<_, CategoryTotal>(
        r#"
        SELECT category, COALESCE(SUM(amount_cents), 0) as total_cents, COUNT(*) as count
        FROM expenses
        WHERE household_id = ?
          AND status != 'cancelled'
          AND (? IS NULL OR date >= ?)
          AND (? IS NULL OR date <= ?)
        GROUP BY category
        ORDER BY total_cents DESC, category ASC
        "#,
    )
    .bind(household_id)
    .bind(from)
    .bind(from)
    .bind(to)
    .bind(to)
    .fetch_all(conn)
    .await
}
