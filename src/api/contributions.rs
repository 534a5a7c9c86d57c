//! Member contributions to the household pot.
//!
//! A contribution starts out pending and is confirmed or rejected by a
//! household owner or admin. Only confirmed contributions count towards the
//! summaries.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use super::error::{ApiError, ValidationErrorBuilder};
use super::household::{require_household, require_household_role, Membership};
use super::validation::{parse_or, validate_amount, validate_date, validate_notes, validate_range};
use crate::db::{
    self, fetch_page, format_date, totals_by_member, Contribution, ContributionQuery,
    ContributionStatus, ContributionSummary, ContributionType, ContributionWithUser,
    CreateContributionRequest, DateRangeQuery, Filter, HouseholdRole, Page, PaginationQuery,
    UpdateContributionRequest, User,
};
use crate::AppState;

async fn load_contribution(
    state: &AppState,
    membership: &Membership,
    id: &str,
) -> Result<Contribution, ApiError> {
    let mut conn = state.db.acquire().await?;
    Contribution::find(&mut conn, id)
        .await?
        .filter(|c| c.household_id == membership.household_id)
        .ok_or_else(|| ApiError::not_found("Contribution not found"))
}

/// Authors may change their own contribution until it is reviewed
fn ensure_can_modify(
    contribution: &Contribution,
    user: &User,
    membership: &Membership,
) -> Result<(), ApiError> {
    if membership.can_manage() {
        return Ok(());
    }
    if contribution.user_id != user.id {
        return Err(ApiError::forbidden(
            "Only the contribution's author or a household admin can change it",
        ));
    }
    if !contribution.is_pending() {
        return Err(ApiError::conflict(
            "Reviewed contributions can only be changed by a household admin",
        ));
    }
    Ok(())
}

pub async fn list_contributions(
    State(state): State<Arc<AppState>>,
    user: User,
    Query(query): Query<ContributionQuery>,
) -> Result<Json<Page<ContributionWithUser>>, ApiError> {
    let membership = require_household(&state.db, &user).await?;

    let mut errors = ValidationErrorBuilder::new();
    if let Some(status) = &query.status {
        errors.check("status", status.parse::<ContributionStatus>().map(|_| ()));
    }
    errors.check("from", validate_range(&query.from, &query.to));
    errors.finish()?;

    let status = query.status.as_deref().map(|s| s.trim().to_lowercase());
    let mut filter = Filter::new();
    filter
        .push("c.household_id = ?", membership.household_id.as_str())
        .push_opt("c.status = ?", status.as_deref())
        .push_opt("c.user_id = ?", query.user_id.as_deref())
        .push_opt("c.date >= ?", query.from.as_deref())
        .push_opt("c.date <= ?", query.to.as_deref());

    let pagination = PaginationQuery {
        page: query.page,
        per_page: query.per_page,
    };
    let page = fetch_page(
        &state.db,
        "c.*, u.name as user_name",
        "FROM contributions c LEFT JOIN users u ON c.user_id = u.id",
        "c.date DESC, c.created_at DESC",
        &filter,
        &pagination,
    )
    .await?;

    Ok(Json(page))
}

pub async fn get_contribution(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
) -> Result<Json<Contribution>, ApiError> {
    let membership = require_household(&state.db, &user).await?;
    Ok(Json(load_contribution(&state, &membership, &id).await?))
}

pub async fn create_contribution(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(req): Json<CreateContributionRequest>,
) -> Result<(StatusCode, Json<Contribution>), ApiError> {
    let membership = require_household(&state.db, &user).await?;

    let mut errors = ValidationErrorBuilder::new();
    errors.check("amount_cents", validate_amount(req.amount_cents));
    errors.check("notes", validate_notes(&req.notes));
    let date = validate_date(&req.date);
    if let Err(e) = &date {
        errors.add("date", e.clone());
    }
    let kind = parse_or(&req.contribution_type, ContributionType::Other);
    if let Err(e) = &kind {
        errors.add("contribution_type", e.clone());
    }
    errors.finish()?;

    let (Ok(date), Ok(kind)) = (date, kind) else {
        return Err(ApiError::bad_request("Invalid contribution"));
    };

    let timestamp = db::now();
    let contribution = Contribution {
        id: Uuid::new_v4().to_string(),
        household_id: membership.household_id.clone(),
        user_id: user.id.clone(),
        amount_cents: req.amount_cents,
        contribution_type: kind.to_string(),
        status: ContributionStatus::Pending.to_string(),
        date: format_date(date),
        notes: req.notes.clone(),
        reviewed_by: None,
        reviewed_at: None,
        created_at: timestamp.clone(),
        updated_at: timestamp,
    };

    sqlx::query(
        r#"
        INSERT INTO contributions (id, household_id, user_id, amount_cents, contribution_type,
            status, date, notes, reviewed_by, reviewed_at, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, ?, ?)
        "#,
    )
    .bind(&contribution.id)
    .bind(&contribution.household_id)
    .bind(&contribution.user_id)
    .bind(contribution.amount_cents)
    .bind(&contribution.contribution_type)
    .bind(&contribution.status)
    .bind(&contribution.date)
    .bind(&contribution.notes)
    .bind(&contribution.created_at)
    .bind(&contribution.updated_at)
    .execute(&state.db)
    .await?;

    tracing::info!(contribution_id = %contribution.id, user_id = %user.id, "Contribution recorded");
    Ok((StatusCode::CREATED, Json(contribution)))
}

pub async fn update_contribution(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
    Json(req): Json<UpdateContributionRequest>,
) -> Result<Json<Contribution>, ApiError> {
    let membership = require_household(&state.db, &user).await?;
    let mut contribution = load_contribution(&state, &membership, &id).await?;
    ensure_can_modify(&contribution, &user, &membership)?;

    let mut errors = ValidationErrorBuilder::new();
    if let Some(amount) = req.amount_cents {
        errors.check("amount_cents", validate_amount(amount));
        contribution.amount_cents = amount;
    }
    errors.check("notes", validate_notes(&req.notes));
    if let Some(date) = &req.date {
        match validate_date(date) {
            Ok(date) => contribution.date = format_date(date),
            Err(e) => {
                errors.add("date", e);
            }
        }
    }
    if let Some(kind) = &req.contribution_type {
        match kind.parse::<ContributionType>() {
            Ok(k) => contribution.contribution_type = k.to_string(),
            Err(e) => {
                errors.add("contribution_type", e);
            }
        }
    }
    errors.finish()?;

    if let Some(notes) = &req.notes {
        contribution.notes = Some(notes.clone()).filter(|n| !n.trim().is_empty());
    }
    contribution.updated_at = db::now();

    sqlx::query(
        "UPDATE contributions SET amount_cents = ?, contribution_type = ?, date = ?, notes = ?, updated_at = ? WHERE id = ?",
    )
    .bind(contribution.amount_cents)
    .bind(&contribution.contribution_type)
    .bind(&contribution.date)
    .bind(&contribution.notes)
    .bind(&contribution.updated_at)
    .bind(&contribution.id)
    .execute(&state.db)
    .await?;

    Ok(Json(contribution))
}

pub async fn delete_contribution(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let membership = require_household(&state.db, &user).await?;
    let contribution = load_contribution(&state, &membership, &id).await?;
    ensure_can_modify(&contribution, &user, &membership)?;

    sqlx::query("DELETE FROM contributions WHERE id = ?")
        .bind(&contribution.id)
        .execute(&state.db)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn review(
    state: &AppState,
    user: &User,
    id: &str,
    outcome: ContributionStatus,
) -> Result<Contribution, ApiError> {
    let membership = require_household_role(&state.db, user, HouseholdRole::Admin).await?;
    let mut contribution = load_contribution(state, &membership, id).await?;
    if !contribution.is_pending() {
        return Err(ApiError::conflict(format!(
            "Contribution is already {}",
            contribution.status
        )));
    }

    let timestamp = db::now();
    // Guard on status so concurrent reviews cannot both win
    let result = sqlx::query(
        "UPDATE contributions SET status = ?, reviewed_by = ?, reviewed_at = ?, updated_at = ? WHERE id = ? AND status = 'pending'",
    )
    .bind(outcome.as_str())
    .bind(&user.id)
    .bind(&timestamp)
    .bind(&timestamp)
    .bind(&contribution.id)
    .execute(&state.db)
    .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::conflict("Contribution was already reviewed"));
    }

    contribution.status = outcome.to_string();
    contribution.reviewed_by = Some(user.id.clone());
    contribution.reviewed_at = Some(timestamp.clone());
    contribution.updated_at = timestamp;

    tracing::info!(
        contribution_id = %contribution.id,
        reviewed_by = %user.id,
        status = %outcome,
        "Contribution reviewed"
    );
    Ok(contribution)
}

pub async fn confirm_contribution(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
) -> Result<Json<Contribution>, ApiError> {
    Ok(Json(
        review(&state, &user, &id, ContributionStatus::Confirmed).await?,
    ))
}

pub async fn reject_contribution(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
) -> Result<Json<Contribution>, ApiError> {
    Ok(Json(
        review(&state, &user, &id, ContributionStatus::Rejected).await?,
    ))
}

pub async fn contribution_summary(
    State(state): State<Arc<AppState>>,
    user: User,
    Query(range): Query<DateRangeQuery>,
) -> Result<Json<ContributionSummary>, ApiError> {
    let membership = require_household(&state.db, &user).await?;
    validate_range(&range.from, &range.to).map_err(|e| ApiError::validation_field("from", e))?;

    let mut conn = state.db.acquire().await?;
    let by_member = totals_by_member(
        &mut conn,
        &membership.household_id,
        range.from.as_deref(),
        range.to.as_deref(),
    )
    .await?;
    let pending_count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM contributions
        WHERE household_id = ? AND status = 'pending'
          AND (? IS NULL OR date >= ?) AND (? IS NULL OR date <= ?)
        "#,
    )
    .bind(&membership.household_id)
    .bind(&range.from)
    .bind(&range.from)
    .bind(&range.to)
    .bind(&range.to)
    .fetch_one(&mut *conn)
    .await?;

    Ok(Json(ContributionSummary {
        total_cents: by_member.iter().map(|m| m.total_cents).sum(),
        pending_count,
        by_member,
    }))
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::TestApp;
    use crate::db::HouseholdRole;
    use axum::http::StatusCode;
    use serde_json::{json, Value};

    async fn contribute(app: &TestApp, token: &str, amount: i64, date: &str) -> Value {
        let (status, body) = app
            .post(
                "/api/contributions",
                Some(token),
                json!({"amount_cents": amount, "contribution_type": "salary", "date": date}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body
    }

    #[tokio::test]
    async fn test_review_flow() {
        let app = TestApp::new().await;
        let (_, owner_token, household) = app.owner("Ama", "ama@example.com").await;
        let (_, kofi_token) = app
            .member(&household, "Kofi", "kofi@example.com", HouseholdRole::Member)
            .await;

        let c = contribute(&app, &kofi_token, 50_000, "2024-05-01").await;
        assert_eq!(c["status"], "pending");
        let id = c["id"].as_str().unwrap();

        // Members cannot review
        let (status, _) = app
            .post(&format!("/api/contributions/{}/confirm", id), Some(&kofi_token), json!({}))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = app
            .post(&format!("/api/contributions/{}/confirm", id), Some(&owner_token), json!({}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "confirmed");
        assert!(body["reviewed_by"].is_string());

        let (status, _) = app
            .post(&format!("/api/contributions/{}/reject", id), Some(&owner_token), json!({}))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        // The author can no longer edit a reviewed contribution
        let (status, _) = app
            .put(
                &format!("/api/contributions/{}", id),
                Some(&kofi_token),
                json!({"amount_cents": 1}),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_summary_counts_confirmed_only() {
        let app = TestApp::new().await;
        let (_, owner_token, household) = app.owner("Ama", "ama@example.com").await;
        let (_, kofi_token) = app
            .member(&household, "Kofi", "kofi@example.com", HouseholdRole::Member)
            .await;

        let a = contribute(&app, &kofi_token, 30_000, "2024-05-01").await;
        let b = contribute(&app, &owner_token, 20_000, "2024-05-02").await;
        let c = contribute(&app, &kofi_token, 10_000, "2024-05-03").await;
        contribute(&app, &kofi_token, 5_000, "2024-05-04").await;

        for (v, action) in [(&a, "confirm"), (&b, "confirm"), (&c, "reject")] {
            let (status, _) = app
                .post(
                    &format!("/api/contributions/{}/{}", v["id"].as_str().unwrap(), action),
                    Some(&owner_token),
                    json!({}),
                )
                .await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, summary) = app.get("/api/contributions/summary", Some(&kofi_token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(summary["total_cents"], 50_000);
        assert_eq!(summary["pending_count"], 1);
        assert_eq!(summary["by_member"][0]["user_name"], "Kofi");
        assert_eq!(summary["by_member"][0]["total_cents"], 30_000);

        let (_, page) = app
            .get("/api/contributions?status=pending", Some(&owner_token))
            .await;
        assert_eq!(page["total"], 1);
        assert_eq!(page["items"][0]["user_name"], "Kofi");
    }

    #[tokio::test]
    async fn test_author_edits_and_deletes_pending() {
        let app = TestApp::new().await;
        let (_, _, household) = app.owner("Ama", "ama@example.com").await;
        let (_, kofi_token) = app
            .member(&household, "Kofi", "kofi@example.com", HouseholdRole::Member)
            .await;
        let (_, esi_token) = app
            .member(&household, "Esi", "esi@example.com", HouseholdRole::Member)
            .await;

        let c = contribute(&app, &kofi_token, 1_000, "2024-05-01").await;
        let path = format!("/api/contributions/{}", c["id"].as_str().unwrap());

        let (status, _) = app.delete(&path, Some(&esi_token)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = app
            .put(&path, Some(&kofi_token), json!({"amount_cents": 1_500, "contribution_type": "savings"}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["amount_cents"], 1_500);
        assert_eq!(body["contribution_type"], "savings");

        let (status, _) = app.delete(&path, Some(&kofi_token)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }
}
