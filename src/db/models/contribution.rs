//! Money members put into the household pot.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};

use super::common::string_enum;

string_enum! {
    pub enum ContributionType {
        Salary => "salary",
        Savings => "savings",
        Allowance => "allowance",
        Reimbursement => "reimbursement",
        Other => "other",
    }
}

string_enum! {
    /// Review state; only pending contributions can be confirmed or rejected
    pub enum ContributionStatus {
        Pending => "pending",
        Confirmed => "confirmed",
        Rejected => "rejected",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Contribution {
    pub id: String,
    pub household_id: String,
    pub user_id: String,
    pub amount_cents: i64,
    pub contribution_type: String,
    pub status: String,
    pub date: String,
    pub notes: Option<String>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Contribution {
    pub fn status_enum(&self) -> ContributionStatus {
        self.status.parse().unwrap_or(ContributionStatus::Pending)
    }

    pub fn is_pending(&self) -> bool {
        self.status_enum() == ContributionStatus::Pending
    }

    pub async fn find(conn: &mut SqliteConnection, id: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Contribution>("SELECT * FROM contributions WHERE id = ?")
            .bind(id)
            .fetch_optional(conn)
            .await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ContributionWithUser {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub contribution: Contribution,
    pub user_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateContributionRequest {
    pub amount_cents: i64,
    pub contribution_type: Option<String>,
    pub date: String,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateContributionRequest {
    pub amount_cents: Option<i64>,
    pub contribution_type: Option<String>,
    pub date: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ContributionQuery {
    pub status: Option<String>,
    pub user_id: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// Confirmed total for one member
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct MemberTotal {
    pub user_id: String,
    pub user_name: Option<String>,
    pub total_cents: i64,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct ContributionSummary {
    /// Confirmed total
    pub total_cents: i64,
    pub pending_count: i64,
    pub by_member: Vec<MemberTotal>,
}

/// Confirmed contributions per member between `from` and `to`
pub async fn totals_by_member(
    conn: &mut SqliteConnection,
    household_id: &str,
    from: Option<&str>,
    to: Option<&str>,
) -> Result<Vec<MemberTotal>, sqlx::Error> {
    sqlx::query_as::<_, MemberTotal>(
        r#"
        SELECT c.user_id, u.name as user_name,
               COALESCE(SUM(c.amount_cents), 0) as total_cents, COUNT(*) as count
        FROM contributions c
        LEFT JOIN users u ON c.user_id = u.id
        WHERE c.household_id = ?
          AND c.status = 'confirmed'
          AND (? IS NULL OR c.date >= ?)
          AND (? IS NULL OR c.date <= ?)
        GROUP BY c.user_id, u.name
        ORDER BY total_cents DESC
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
