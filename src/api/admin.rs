//! Site administration: usage metrics, user and household oversight, the
//! feedback inbox, the notification log and the consistency audit.
//!
//! Every handler takes `AdminUser`, so non-admins get 403.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{Duration, Utc};
use serde::Serialize;
use sqlx::FromRow;
use std::collections::HashMap;
use std::sync::Arc;

use super::auth::AdminUser;
use super::error::{ApiError, ValidationErrorBuilder};
use crate::db::{
    self, check_consistency, delete_user_cascade, fetch_page, find_user_by_id, format_date,
    repair_consistency, AdminUserQuery, ConsistencyReport, FeedbackWithUser, Filter, Household,
    NotificationChannel, NotificationLog, NotificationLogQuery, NotificationStatus, Page,
    PaginationQuery, RepairSummary, UpdateUserRoleRequest, User, UserResponse, UserRole,
};
use crate::AppState;

/// Signups per day over the trailing window
const SIGNUP_WINDOW_DAYS: i64 = 14;

/// Site-wide usage numbers for the admin dashboard
#[derive(Debug, Clone, Serialize)]
pub struct AdminMetrics {
    pub total_users: i64,
    pub verified_users: i64,
    pub total_households: i64,
    pub total_bills: i64,
    pub total_expenses: i64,
    pub total_contributions: i64,
    /// Signups in the last 7 days
    pub new_users_7d: i64,
    /// Signups in the 7 days before that
    pub new_users_prev_7d: i64,
    /// Change between the two windows, in percent
    pub user_growth_percent: f64,
    /// Users who logged in within the last 7 days
    pub active_users_7d: i64,
    /// Non-cancelled expenses dated within the last 7 days
    pub expense_cents_7d: i64,
    pub feedback_count: i64,
    pub average_rating: Option<f64>,
    pub feedback_count_7d: i64,
    pub average_rating_7d: Option<f64>,
    /// Oldest first, one entry per day including days without signups
    pub daily_signups: Vec<DailyCount>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DailyCount {
    pub date: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct HouseholdOverview {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub household: Household,
    pub owner_name: Option<String>,
    pub member_count: i64,
}

/// Percent change from `previous` to `current`, one decimal place.
/// Growth from zero counts as 100% when anything was added.
fn growth_percent(current: i64, previous: i64) -> f64 {
    if previous == 0 {
        return if current > 0 { 100.0 } else { 0.0 };
    }
    let change = (current - previous) as f64 / previous as f64 * 100.0;
    (change * 10.0).round() / 10.0
}

async fn count(state: &AppState, sql: &str, bindings: &[&str]) -> Result<i64, sqlx::Error> {
    let mut query = sqlx::query_scalar::<_, i64>(sql);
    for binding in bindings {
        query = query.bind(*binding);
    }
    query.fetch_one(&state.db).await
}

async fn rating(
    state: &AppState,
    since: Option<&str>,
) -> Result<(i64, Option<f64>), sqlx::Error> {
    sqlx::query_as::<_, (i64, Option<f64>)>(
        "SELECT COUNT(*), AVG(rating) FROM feedback WHERE (? IS NULL OR created_at >= ?)",
    )
    .bind(since)
    .bind(since)
    .fetch_one(&state.db)
    .await
}

pub async fn metrics(
    State(state): State<Arc<AppState>>,
    AdminUser(_admin): AdminUser,
) -> Result<Json<AdminMetrics>, ApiError> {
    let now = Utc::now();
    let week_ago = db::timestamp(now - Duration::days(7));
    let two_weeks_ago = db::timestamp(now - Duration::days(14));
    let today = db::today();
    // Seven calendar days including today
    let week_start_date = format_date(today - Duration::days(6));

    let total_users = count(&state, "SELECT COUNT(*) FROM users", &[]).await?;
    let verified_users = count(&state, "SELECT COUNT(*) FROM users WHERE is_verified = 1", &[]).await?;
    let total_households = count(&state, "SELECT COUNT(*) FROM households", &[]).await?;
    let total_bills = count(&state, "SELECT COUNT(*) FROM bills", &[]).await?;
    let total_expenses = count(&state, "SELECT COUNT(*) FROM expenses", &[]).await?;
    let total_contributions = count(&state, "SELECT COUNT(*) FROM contributions", &[]).await?;

    let new_users_7d = count(
        &state,
        "SELECT COUNT(*) FROM users WHERE created_at >= ?",
        &[week_ago.as_str()],
    )
    .await?;
    let new_users_prev_7d = count(
        &state,
        "SELECT COUNT(*) FROM users WHERE created_at >= ? AND created_at < ?",
        &[two_weeks_ago.as_str(), week_ago.as_str()],
    )
    .await?;
    let active_users_7d = count(
        &state,
        "SELECT COUNT(*) FROM users WHERE last_login_at >= ?",
        &[week_ago.as_str()],
    )
    .await?;
    let expense_cents_7d = count(
        &state,
        "SELECT COALESCE(SUM(amount_cents), 0) FROM expenses WHERE status != 'cancelled' AND date >= ?",
        &[week_start_date.as_str()],
    )
    .await?;

    let (feedback_count, average_rating) = rating(&state, None).await?;
    let (feedback_count_7d, average_rating_7d) = rating(&state, Some(week_ago.as_str())).await?;

    let first_day = today - Duration::days(SIGNUP_WINDOW_DAYS - 1);
    let rows = sqlx::query_as::<_, (String, i64)>(
        r#"
        SELECT substr(created_at, 1, 10) as day, COUNT(*)
        FROM users
        WHERE substr(created_at, 1, 10) >= ?
        GROUP BY day
        "#,
    )
    .bind(format_date(first_day))
    .fetch_all(&state.db)
    .await?;
    let by_day: HashMap<String, i64> = rows.into_iter().collect();
    let daily_signups = first_day
        .iter_days()
        .take(SIGNUP_WINDOW_DAYS as usize)
        .map(|day| {
            let date = format_date(day);
            let count = by_day.get(&date).copied().unwrap_or(0);
            DailyCount { date, count }
        })
        .collect();

    Ok(Json(AdminMetrics {
        total_users,
        verified_users,
        total_households,
        total_bills,
        total_expenses,
        total_contributions,
        new_users_7d,
        new_users_prev_7d,
        user_growth_percent: growth_percent(new_users_7d, new_users_prev_7d),
        active_users_7d,
        expense_cents_7d,
        feedback_count,
        average_rating,
        feedback_count_7d,
        average_rating_7d,
        daily_signups,
    }))
}

pub async fn list_users(
    State(state): State<Arc<AppState>>,
    AdminUser(_admin): AdminUser,
    Query(query): Query<AdminUserQuery>,
) -> Result<Json<Page<UserResponse>>, ApiError> {
    let role = query
        .role
        .as_deref()
        .map(str::parse::<UserRole>)
        .transpose()
        .map_err(|e| ApiError::validation_field("role", e))?;
    let search = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{}%", s.to_lowercase()));

    let mut filter = Filter::new();
    filter
        .push_opt("role = ?", role.as_ref().map(UserRole::as_str))
        .push_opt("lower(name || ' ' || email) LIKE ?", search.as_deref());

    let pagination = PaginationQuery {
        page: query.page,
        per_page: query.per_page,
    };
    let page: Page<User> = fetch_page(
        &state.db,
        "*",
        "FROM users",
        "created_at DESC",
        &filter,
        &pagination,
    )
    .await?;

    Ok(Json(Page {
        items: page.items.into_iter().map(UserResponse::from).collect(),
        total: page.total,
        page: page.page,
        per_page: page.per_page,
        total_pages: page.total_pages,
    }))
}

pub async fn update_user_role(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateUserRoleRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let role: UserRole = req
        .role
        .parse()
        .map_err(|e: String| ApiError::validation_field("role", e))?;
    if id == admin.id && role != UserRole::Admin {
        return Err(ApiError::bad_request("You cannot remove your own admin role"));
    }

    let result = sqlx::query("UPDATE users SET role = ?, updated_at = ? WHERE id = ?")
        .bind(role.as_str())
        .bind(db::now())
        .bind(&id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("User not found"));
    }

    tracing::info!(user_id = %id, role = %role, changed_by = %admin.id, "User role changed");

    let mut conn = state.db.acquire().await?;
    let user = find_user_by_id(&mut conn, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(Json(user.into()))
}

pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if id == admin.id {
        return Err(ApiError::bad_request("You cannot delete your own account here"));
    }

    let summary = delete_user_cascade(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    tracing::info!(
        user_id = %id,
        deleted_by = %admin.id,
        households = summary.households,
        "User deleted by admin"
    );
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_households(
    State(state): State<Arc<AppState>>,
    AdminUser(_admin): AdminUser,
    Query(pagination): Query<PaginationQuery>,
) -> Result<Json<Page<HouseholdOverview>>, ApiError> {
    let page = fetch_page(
        &state.db,
        "h.*, u.name as owner_name, \
         (SELECT COUNT(*) FROM household_members hm WHERE hm.household_id = h.id) as member_count",
        "FROM households h LEFT JOIN users u ON h.owner_id = u.id",
        "h.created_at DESC",
        &Filter::new(),
        &pagination,
    )
    .await?;
    Ok(Json(page))
}

pub async fn list_feedback(
    State(state): State<Arc<AppState>>,
    AdminUser(_admin): AdminUser,
    Query(pagination): Query<PaginationQuery>,
) -> Result<Json<Page<FeedbackWithUser>>, ApiError> {
    let page = fetch_page(
        &state.db,
        "f.*, u.name as user_name, u.email as user_email",
        "FROM feedback f LEFT JOIN users u ON f.user_id = u.id",
        "f.created_at DESC",
        &Filter::new(),
        &pagination,
    )
    .await?;
    Ok(Json(page))
}

pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    AdminUser(_admin): AdminUser,
    Query(query): Query<NotificationLogQuery>,
) -> Result<Json<Page<NotificationLog>>, ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    let status = query
        .status
        .as_deref()
        .map(str::parse::<NotificationStatus>)
        .transpose();
    if let Err(e) = &status {
        errors.add("status", e.clone());
    }
    let channel = query
        .channel
        .as_deref()
        .map(str::parse::<NotificationChannel>)
        .transpose();
    if let Err(e) = &channel {
        errors.add("channel", e.clone());
    }
    errors.finish()?;

    let mut filter = Filter::new();
    filter
        .push_opt(
            "status = ?",
            status.ok().flatten().as_ref().map(NotificationStatus::as_str),
        )
        .push_opt(
            "channel = ?",
            channel.ok().flatten().as_ref().map(NotificationChannel::as_str),
        );

    let pagination = PaginationQuery {
        page: query.page,
        per_page: query.per_page,
    };
    let page = fetch_page(
        &state.db,
        "*",
        "FROM notification_log",
        "created_at DESC",
        &filter,
        &pagination,
    )
    .await?;
    Ok(Json(page))
}

pub async fn consistency_check(
    State(state): State<Arc<AppState>>,
    AdminUser(_admin): AdminUser,
) -> Result<Json<ConsistencyReport>, ApiError> {
    Ok(Json(check_consistency(&state.db).await?))
}

pub async fn consistency_repair(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
) -> Result<Json<RepairSummary>, ApiError> {
    let summary = repair_consistency(&state.db).await?;
    tracing::info!(admin_id = %admin.id, ?summary, "Consistency repair run from admin API");
    Ok(Json(summary))
}
