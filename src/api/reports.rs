use axum::{
    extract::{Query, State},
    Json,
};
use serde::Serialize;
use sqlx::FromRow;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::error::ApiError;
use super::household::require_household;
use super::validation::validate_range;
use crate::db::{
    self, refresh_overdue, totals_by_category, totals_by_member, CategoryTotal, DateRangeQuery,
    MemberTotal, User,
};
use crate::AppState;

#[derive(Debug, Serialize, FromRow, PartialEq, Eq)]
pub struct StatusTotal {
    pub status: String,
    pub total_cents: i64,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct BillReport {
    /// Bills due in the range, by status
    pub by_status: Vec<StatusTotal>,
    /// Payments recorded in the range
    pub paid_cents: i64,
}

#[derive(Debug, Serialize)]
pub struct ExpenseReport {
    pub total_cents: i64,
    pub by_category: Vec<CategoryTotal>,
}

#[derive(Debug, Serialize)]
pub struct ContributionReport {
    pub total_cents: i64,
    pub by_member: Vec<MemberTotal>,
}

/// One `YYYY-MM` bucket
#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct MonthlyTotals {
    pub month: String,
    pub expense_cents: i64,
    pub bill_payment_cents: i64,
}

#[derive(Debug, Serialize)]
pub struct ReportSummary {
    pub from: Option<String>,
    pub to: Option<String>,
    pub bills: BillReport,
    pub expenses: ExpenseReport,
    pub contributions: ContributionReport,
    pub monthly: Vec<MonthlyTotals>,
}

#[derive(FromRow)]
struct MonthRow {
    month: String,
    total_cents: i64,
}

/// Household overview for a date range
pub async fn summary(
    State(state): State<Arc<AppState>>,
    user: User,
    Query(range): Query<DateRangeQuery>,
) -> Result<Json<ReportSummary>, ApiError> {
    let membership = require_household(&state.db, &user).await?;
    validate_range(&range.from, &range.to).map_err(|e| ApiError::validation_field("from", e))?;

    let household_id = membership.household_id.as_str();
    let from = range.from.as_deref();
    let to = range.to.as_deref();

    let mut conn = state.db.acquire().await?;
    refresh_overdue(&mut conn, Some(household_id), db::today()).await?;

    let by_status = sqlx::query_as::<_, StatusTotal>(
        r#"
        SELECT status, COALESCE(SUM(amount_cents), 0) as total_cents, COUNT(*) as count
        FROM bills
        WHERE household_id = ?
          AND (? IS NULL OR due_date >= ?)
          AND (? IS NULL OR due_date <= ?)
        GROUP BY status
        ORDER BY status
        "#,
    )
    .bind(household_id)
    .bind(from)
    .bind(from)
    .bind(to)
    .bind(to)
    .fetch_all(&mut *conn)
    .await?;

    // paid_at is a timestamp; compare on its date part
    let payments = sqlx::query_as::<_, MonthRow>(
        r#"
        SELECT substr(bp.paid_at, 1, 7) as month, COALESCE(SUM(bp.amount_cents), 0) as total_cents
        FROM bill_payments bp
        INNER JOIN bills b ON bp.bill_id = b.id
        WHERE b.household_id = ?
          AND (? IS NULL OR substr(bp.paid_at, 1, 10) >= ?)
          AND (? IS NULL OR substr(bp.paid_at, 1, 10) <= ?)
        GROUP BY month
        "#,
    )
    .bind(household_id)
    .bind(from)
    .bind(from)
    .bind(to)
    .bind(to)
    .fetch_all(&mut *conn)
    .await?;

    let spending = sqlx::query_as::<_, MonthRow>(
        r#"
        SELECT strftime('%Y-%m', date) as month, COALESCE(SUM(amount_cents), 0) as total_cents
        FROM expenses
        WHERE household_id = ?
          AND status != 'cancelled'
          AND (? IS NULL OR date >= ?)
          AND (? IS NULL OR date <= ?)
        GROUP BY month
        "#,
    )
    .bind(household_id)
    .bind(from)
    .bind(from)
    .bind(to)
    .bind(to)
    .fetch_all(&mut *conn)
    .await?;

    let by_category = totals_by_category(&mut conn, household_id, from, to).await?;
    let by_member = totals_by_member(&mut conn, household_id, from, to).await?;

    let paid_cents = payments.iter().map(|m| m.total_cents).sum();
    let monthly = merge_monthly(&spending, &payments);

    Ok(Json(ReportSummary {
        from: range.from.clone(),
        to: range.to.clone(),
        bills: BillReport {
            by_status,
            paid_cents,
        },
        expenses: ExpenseReport {
            total_cents: by_category.iter().map(|c| c.total_cents).sum(),
            by_category,
        },
        contributions: ContributionReport {
            total_cents: by_member.iter().map(|m| m.total_cents).sum(),
            by_member,
        },
        monthly,
    }))
}

/// Combine per-month expense and payment sums into one ascending series
fn merge_monthly(expenses: &[MonthRow], payments: &[MonthRow]) -> Vec<MonthlyTotals> {
    let mut months: BTreeMap<&str, MonthlyTotals> = BTreeMap::new();
    for row in expenses {
        let entry = months.entry(&row.month).or_insert_with(|| MonthlyTotals {
            month: row.month.clone(),
            ..Default::default()
        });
        entry.expense_cents += row.total_cents;
    }
    for row in payments {
        let entry = months.entry(&row.month).or_insert_with(|| MonthlyTotals {
            month: row.month.clone(),
            ..Default::default()
        });
        entry.bill_payment_cents += row.total_cents;
    }
    months.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::TestApp;
    use axum::http::StatusCode;
    use serde_json::json;

    fn row(month: &str, total_cents: i64) -> MonthRow {
        MonthRow {
            month: month.to_string(),
            total_cents,
        }
    }

    #[test]
    fn test_merge_monthly_orders_and_combines() {
        let merged = merge_monthly(
            &[row("2024-03", 500), row("2024-01", 100)],
            &[row("2024-02", 70), row("2024-03", 30)],
        );
        let months: Vec<&str> = merged.iter().map(|m| m.month.as_str()).collect();
        assert_eq!(months, vec!["2024-01", "2024-02", "2024-03"]);
        assert_eq!(merged[2].expense_cents, 500);
        assert_eq!(merged[2].bill_payment_cents, 30);
        assert_eq!(merged[1].expense_cents, 0);
    }

    #[tokio::test]
    async fn test_summary_report() {
        let app = TestApp::new().await;
        let (_, token, _) = app.owner("Ama", "ama@example.com").await;

        for (description, amount, date) in [
            ("Groceries", 3_000, "2024-01-10"),
            ("Taxi", 500, "2024-02-03"),
            ("Dinner", 2_000, "2024-02-20"),
        ] {
            let (status, _) = app
                .post(
                    "/api/expenses",
                    Some(&token),
                    json!({"description": description, "amount_cents": amount, "date": date}),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);
        }
        let (_, bill) = app
            .post(
                "/api/bills",
                Some(&token),
                json!({"title": "Rent", "amount_cents": 80_000, "due_date": "2024-02-01"}),
            )
            .await;
        app.post(
            &format!("/api/bills/{}/pay", bill["id"].as_str().unwrap()),
            Some(&token),
            json!({}),
        )
        .await;
        app.post(
            "/api/bills",
            Some(&token),
            json!({"title": "Water", "amount_cents": 4_000, "due_date": "2024-02-15"}),
        )
        .await;

        let (status, report) = app
            .get("/api/reports/summary?from=2024-01-01&to=2024-02-29", Some(&token))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["expenses"]["total_cents"], 5_500);

        let statuses = report["bills"]["by_status"].as_array().unwrap();
        assert_eq!(statuses.len(), 2);
        assert!(statuses
            .iter()
            .any(|s| s["status"] == "overdue" && s["total_cents"] == 4_000));
        assert!(statuses
            .iter()
            .any(|s| s["status"] == "paid" && s["total_cents"] == 80_000));

        let monthly = report["monthly"].as_array().unwrap();
        assert_eq!(monthly[0]["month"], "2024-01");
        assert_eq!(monthly[0]["expense_cents"], 3_000);
        assert_eq!(monthly[1]["expense_cents"], 2_500);
    }
}
