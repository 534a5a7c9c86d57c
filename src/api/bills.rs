use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Days;
use std::sync::Arc;
use uuid::Uuid;

use super::error::{ApiError, ValidationErrorBuilder};
use super::household::{require_household, Membership};
use super::metrics::record_bill_paid;
use super::validation::{
    parse_or, validate_amount, validate_date, validate_notes, validate_range, validate_text,
};
use crate::db::{
    self, fetch_page, format_date, insert_bill, mark_as_paid, refresh_overdue, replace_splits,
    split_equally, validate_custom_split, Bill, BillCategory, BillDetail, BillPayment,
    BillQuery, BillStatus, CreateBillRequest, Filter, Household, Page, PaginationQuery,
    PayBillRequest, PayBillResponse, RecurrenceInterval, SplitPaidRequest, SplitShare,
    SplitType, UpcomingQuery, UpdateBillRequest, User,
};
use crate::notifications::{format_amount, Notification};
use crate::AppState;

const DEFAULT_UPCOMING_DAYS: i64 = 7;
const MAX_UPCOMING_DAYS: i64 = 365;

/// Load a bill of the member's household; bills elsewhere look missing
async fn load_bill(state: &AppState, membership: &Membership, id: &str) -> Result<Bill, ApiError> {
    let mut conn = state.db.acquire().await?;
    Bill::find(&mut conn, id)
        .await?
        .filter(|b| b.household_id == membership.household_id)
        .ok_or_else(|| ApiError::not_found("Bill not found"))
}

async fn detail(state: &AppState, bill: Bill) -> Result<BillDetail, ApiError> {
    let mut conn = state.db.acquire().await?;
    Ok(bill.detail(&mut conn).await?)
}

/// Creator or a household owner/admin
fn can_modify(bill: &Bill, user: &User, membership: &Membership) -> bool {
    bill.created_by == user.id || membership.can_manage()
}

/// Work out the shares for a bill from the requested split type
async fn resolve_splits(
    state: &AppState,
    household_id: &str,
    split_type: SplitType,
    amount_cents: i64,
    requested: &[SplitShare],
) -> Result<Vec<SplitShare>, ApiError> {
    match split_type {
        SplitType::None => Ok(Vec::new()),
        SplitType::Equal => {
            let mut conn = state.db.acquire().await?;
            let members = Household::member_ids(&mut conn, household_id).await?;
            Ok(split_equally(amount_cents, &members))
        }
        SplitType::Custom => {
            let mut conn = state.db.acquire().await?;
            let members = Household::member_ids(&mut conn, household_id).await?;
            validate_custom_split(amount_cents, requested, &members)
                .map_err(|e| ApiError::validation_field("splits", e))?;
            Ok(requested.to_vec())
        }
    }
}

fn status_for(due: chrono::NaiveDate) -> BillStatus {
    if due < db::today() {
        BillStatus::Overdue
    } else {
        BillStatus::Pending
    }
}

pub async fn list_bills(
    State(state): State<Arc<AppState>>,
    user: User,
    Query(query): Query<BillQuery>,
) -> Result<Json<Page<BillDetail>>, ApiError> {
    let membership = require_household(&state.db, &user).await?;

    let mut errors = ValidationErrorBuilder::new();
    if let Some(status) = &query.status {
        errors.check("status", status.parse::<BillStatus>().map(|_| ()));
    }
    if let Some(category) = &query.category {
        errors.check("category", category.parse::<BillCategory>().map(|_| ()));
    }
    errors.check("from", validate_range(&query.from, &query.to));
    errors.finish()?;

    {
        let mut conn = state.db.acquire().await?;
        refresh_overdue(&mut conn, Some(&membership.household_id), db::today()).await?;
    }

    let status = query.status.as_deref().map(|s| s.trim().to_lowercase());
    let category = query.category.as_deref().map(|c| c.trim().to_lowercase());
    let mut filter = Filter::new();
    filter
        .push("household_id = ?", membership.household_id.as_str())
        .push_opt("status = ?", status.as_deref())
        .push_opt("category = ?", category.as_deref())
        .push_opt("due_date >= ?", query.from.as_deref())
        .push_opt("due_date <= ?", query.to.as_deref());

    let pagination = PaginationQuery {
        page: query.page,
        per_page: query.per_page,
    };
    let page: Page<Bill> = fetch_page(
        &state.db,
        "*",
        "FROM bills",
        "due_date ASC, created_at ASC",
        &filter,
        &pagination,
    )
    .await?;

    let mut items = Vec::with_capacity(page.items.len());
    for bill in page.items {
        items.push(detail(&state, bill).await?);
    }
    Ok(Json(Page {
        items,
        total: page.total,
        page: page.page,
        per_page: page.per_page,
        total_pages: page.total_pages,
    }))
}

/// Unpaid bills due between today and `days` from now
pub async fn upcoming_bills(
    State(state): State<Arc<AppState>>,
    user: User,
    Query(query): Query<UpcomingQuery>,
) -> Result<Json<Vec<Bill>>, ApiError> {
    let membership = require_household(&state.db, &user).await?;
    let days = query
        .days
        .unwrap_or(DEFAULT_UPCOMING_DAYS)
        .clamp(1, MAX_UPCOMING_DAYS);

    let today = db::today();
    let until = today
        .checked_add_days(Days::new(days as u64))
        .unwrap_or(today);

    let bills = sqlx::query_as::<_, Bill>(
        r#"
        SELECT * FROM bills
        WHERE household_id = ? AND status != 'paid' AND due_date >= ? AND due_date <= ?
        ORDER BY due_date ASC
        "#,
    )
    .bind(&membership.household_id)
    .bind(format_date(today))
    .bind(format_date(until))
    .fetch_all(&state.db)
    .await?;

    Ok(Json(bills))
}

pub async fn get_bill(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
) -> Result<Json<BillDetail>, ApiError> {
    let membership = require_household(&state.db, &user).await?;
    let bill = load_bill(&state, &membership, &id).await?;
    Ok(Json(detail(&state, bill).await?))
}

pub async fn create_bill(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(req): Json<CreateBillRequest>,
) -> Result<(StatusCode, Json<BillDetail>), ApiError> {
    let membership = require_household(&state.db, &user).await?;

    let mut errors = ValidationErrorBuilder::new();
    errors.check("title", validate_text(&req.title, "Title", 200));
    errors.check("amount_cents", validate_amount(req.amount_cents));
    errors.check("notes", validate_notes(&req.notes));
    let due = validate_date(&req.due_date);
    if let Err(e) = &due {
        errors.add("due_date", e.clone());
    }
    let category = parse_or(&req.category, BillCategory::Other);
    if let Err(e) = &category {
        errors.add("category", e.clone());
    }
    let split_type = parse_or(&req.split_type, SplitType::None);
    if let Err(e) = &split_type {
        errors.add("split_type", e.clone());
    }
    let interval = req
        .recurrence_interval
        .as_deref()
        .map(str::parse::<RecurrenceInterval>)
        .transpose();
    match &interval {
        Err(e) => {
            errors.add("recurrence_interval", e.clone());
        }
        Ok(None) if req.is_recurring => {
            errors.add(
                "recurrence_interval",
                "Recurring bills need a recurrence interval",
            );
        }
        _ => {}
    }
    errors.finish()?;

    // All parsed successfully above
    let (Ok(due), Ok(category), Ok(split_type), Ok(interval)) =
        (due, category, split_type, interval)
    else {
        return Err(ApiError::bad_request("Invalid bill"));
    };

    let shares = resolve_splits(
        &state,
        &membership.household_id,
        split_type,
        req.amount_cents,
        &req.splits,
    )
    .await?;

    let timestamp = db::now();
    let bill = Bill {
        id: Uuid::new_v4().to_string(),
        household_id: membership.household_id.clone(),
        created_by: user.id.clone(),
        title: req.title.trim().to_string(),
        amount_cents: req.amount_cents,
        category: category.to_string(),
        due_date: format_date(due),
        status: status_for(due).to_string(),
        is_recurring: req.is_recurring,
        recurrence_interval: if req.is_recurring {
            interval.map(|i| i.to_string())
        } else {
            None
        },
        split_type: split_type.to_string(),
        notes: req.notes.clone(),
        paid_at: None,
        paid_by: None,
        reminder_sent_at: None,
        created_at: timestamp.clone(),
        updated_at: timestamp,
    };

    let mut tx = state.db.begin().await?;
    insert_bill(&mut tx, &bill).await?;
    replace_splits(&mut tx, &bill.id, &shares).await?;
    tx.commit().await?;

    tracing::info!(bill_id = %bill.id, household_id = %bill.household_id, "Bill created");

    notify_bill_created(&state, &user, &bill).await;

    Ok((StatusCode::CREATED, Json(detail(&state, bill).await?)))
}

async fn household_name(state: &AppState, household_id: &str) -> Result<String, sqlx::Error> {
    let mut conn = state.db.acquire().await?;
    Ok(Household::find(&mut conn, household_id)
        .await?
        .map(|h| h.name)
        .unwrap_or_else(|| "your household".to_string()))
}

async fn notify_bill_created(state: &AppState, user: &User, bill: &Bill) {
    let household_name = match household_name(state, &bill.household_id).await {
        Ok(name) => name,
        Err(e) => {
            tracing::warn!(bill_id = %bill.id, error = %e, "Skipping bill notification");
            return;
        }
    };
    state.notifier.spawn_household(
        bill.household_id.clone(),
        Some(user.id.clone()),
        Notification::BillCreated {
            household_name,
            title: bill.title.clone(),
            amount: format_amount(bill.amount_cents, &user.currency),
            due_date: bill.due_date.clone(),
            created_by: user.name.clone(),
        },
    );
}

pub async fn update_bill(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
    Json(req): Json<UpdateBillRequest>,
) -> Result<Json<BillDetail>, ApiError> {
    let membership = require_household(&state.db, &user).await?;
    let mut bill = load_bill(&state, &membership, &id).await?;
    if !can_modify(&bill, &user, &membership) {
        return Err(ApiError::forbidden(
            "Only the bill's creator or a household admin can edit it",
        ));
    }
    if bill.is_paid() {
        return Err(ApiError::conflict("Paid bills cannot be edited"));
    }

    let mut errors = ValidationErrorBuilder::new();
    if let Some(title) = &req.title {
        errors.check("title", validate_text(title, "Title", 200));
    }
    if let Some(amount) = req.amount_cents {
        errors.check("amount_cents", validate_amount(amount));
    }
    errors.check("notes", validate_notes(&req.notes));
    let due = req.due_date.as_deref().map(validate_date).transpose();
    if let Err(e) = &due {
        errors.add("due_date", e.clone());
    }
    let category = req
        .category
        .as_deref()
        .map(str::parse::<BillCategory>)
        .transpose();
    if let Err(e) = &category {
        errors.add("category", e.clone());
    }
    let split_type = req
        .split_type
        .as_deref()
        .map(str::parse::<SplitType>)
        .transpose();
    if let Err(e) = &split_type {
        errors.add("split_type", e.clone());
    }
    let interval = req
        .recurrence_interval
        .as_deref()
        .map(str::parse::<RecurrenceInterval>)
        .transpose();
    if let Err(e) = &interval {
        errors.add("recurrence_interval", e.clone());
    }
    errors.finish()?;

    let (Ok(due), Ok(category), Ok(split_type), Ok(interval)) =
        (due, category, split_type, interval)
    else {
        return Err(ApiError::bad_request("Invalid bill"));
    };

    let amount_changed = req
        .amount_cents
        .is_some_and(|a| a != bill.amount_cents);
    let old_split_type: SplitType = bill.split_type.parse().unwrap_or(SplitType::None);
    let new_split_type = split_type.unwrap_or(old_split_type);

    if let Some(title) = &req.title {
        bill.title = title.trim().to_string();
    }
    if let Some(amount) = req.amount_cents {
        bill.amount_cents = amount;
    }
    if let Some(category) = category {
        bill.category = category.to_string();
    }
    if let Some(due) = due {
        bill.due_date = format_date(due);
        bill.reminder_sent_at = None;
    }
    if let Some(notes) = &req.notes {
        bill.notes = Some(notes.clone()).filter(|n| !n.trim().is_empty());
    }
    if let Some(recurring) = req.is_recurring {
        bill.is_recurring = recurring;
    }
    if let Some(interval) = interval {
        bill.recurrence_interval = Some(interval.to_string());
    }
    if !bill.is_recurring {
        bill.recurrence_interval = None;
    } else if bill.recurrence_interval.is_none() {
        return Err(ApiError::validation_field(
            "recurrence_interval",
            "Recurring bills need a recurrence interval",
        ));
    }
    bill.split_type = new_split_type.to_string();
    if let Some(due) = bill.due() {
        bill.status = status_for(due).to_string();
    }

    // Shares change when the type, the amount or the custom shares change
    let new_shares = if new_split_type != old_split_type
        || amount_changed
        || req.splits.is_some()
    {
        if new_split_type == SplitType::Custom && req.splits.is_none() {
            return Err(ApiError::validation_field(
                "splits",
                "Custom splits must be provided again when the amount or split type changes",
            ));
        }
        let requested = req.splits.clone().unwrap_or_default();
        Some(
            resolve_splits(
                &state,
                &bill.household_id,
                new_split_type,
                bill.amount_cents,
                &requested,
            )
            .await?,
        )
    } else {
        None
    };

    bill.updated_at = db::now();

    let mut tx = state.db.begin().await?;
    sqlx::query(
        r#"
        UPDATE bills SET title = ?, amount_cents = ?, category = ?, due_date = ?, status = ?,
            is_recurring = ?, recurrence_interval = ?, split_type = ?, notes = ?,
            reminder_sent_at = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&bill.title)
    .bind(bill.amount_cents)
    .bind(&bill.category)
    .bind(&bill.due_date)
    .bind(&bill.status)
    .bind(bill.is_recurring)
    .bind(&bill.recurrence_interval)
    .bind(&bill.split_type)
    .bind(&bill.notes)
    .bind(&bill.reminder_sent_at)
    .bind(&bill.updated_at)
    .bind(&bill.id)
    .execute(&mut *tx)
    .await?;
    if let Some(shares) = &new_shares {
        replace_splits(&mut tx, &bill.id, shares).await?;
    }
    tx.commit().await?;

    tracing::info!(bill_id = %bill.id, "Bill updated");
    Ok(Json(detail(&state, bill).await?))
}

pub async fn delete_bill(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let membership = require_household(&state.db, &user).await?;
    let bill = load_bill(&state, &membership, &id).await?;
    if !can_modify(&bill, &user, &membership) {
        return Err(ApiError::forbidden(
            "Only the bill's creator or a household admin can delete it",
        ));
    }

    let mut tx = state.db.begin().await?;
    for sql in [
        "DELETE FROM bill_splits WHERE bill_id = ?",
        "DELETE FROM bill_payments WHERE bill_id = ?",
        "DELETE FROM bills WHERE id = ?",
    ] {
        sqlx::query(sql).bind(&bill.id).execute(&mut *tx).await?;
    }
    tx.commit().await?;

    tracing::info!(bill_id = %bill.id, deleted_by = %user.id, "Bill deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// An empty body pays the full amount; anything else must be a valid request
fn parse_pay_request(body: &[u8]) -> Result<PayBillRequest, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(PayBillRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::bad_request(format!("Invalid request body: {}", e)))
}

pub async fn pay_bill(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<PayBillResponse>, ApiError> {
    let req = parse_pay_request(&body)?;
    let membership = require_household(&state.db, &user).await?;
    let bill = load_bill(&state, &membership, &id).await?;
    if bill.is_paid() {
        return Err(ApiError::conflict("This bill has already been paid"));
    }

    let amount_cents = req.amount_cents.unwrap_or(bill.amount_cents);
    let mut errors = ValidationErrorBuilder::new();
    errors.check("amount_cents", validate_amount(amount_cents));
    errors.check("note", validate_notes(&req.note));
    errors.finish()?;

    let (payment, next_bill) =
        mark_as_paid(&state.db, &bill, &user.id, amount_cents, req.note.as_deref())
            .await?
            .ok_or_else(|| ApiError::conflict("This bill has already been paid"))?;
    record_bill_paid(next_bill.is_some());

    tracing::info!(
        bill_id = %bill.id,
        paid_by = %user.id,
        amount_cents = amount_cents,
        next_bill = ?next_bill.as_ref().map(|b| &b.id),
        "Bill paid"
    );

    state.notifier.spawn_household(
        bill.household_id.clone(),
        Some(user.id.clone()),
        Notification::BillPaid {
            title: bill.title.clone(),
            amount: format_amount(amount_cents, &user.currency),
            paid_by: user.name.clone(),
        },
    );

    let paid = load_bill(&state, &membership, &bill.id).await?;
    Ok(Json(PayBillResponse {
        bill: detail(&state, paid).await?,
        payment,
        next_bill,
    }))
}

pub async fn list_payments(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
) -> Result<Json<Vec<BillPayment>>, ApiError> {
    let membership = require_household(&state.db, &user).await?;
    let bill = load_bill(&state, &membership, &id).await?;
    let mut conn = state.db.acquire().await?;
    Ok(Json(Bill::payments(&mut conn, &bill.id).await?))
}

/// Mark one member's share as paid or unpaid. Allowed for that member, the
/// bill's creator and household admins.
pub async fn set_split_paid(
    State(state): State<Arc<AppState>>,
    user: User,
    Path((id, split_user_id)): Path<(String, String)>,
    Json(req): Json<SplitPaidRequest>,
) -> Result<Json<BillDetail>, ApiError> {
    let membership = require_household(&state.db, &user).await?;
    let bill = load_bill(&state, &membership, &id).await?;
    if split_user_id != user.id && !can_modify(&bill, &user, &membership) {
        return Err(ApiError::forbidden("You cannot update another member's share"));
    }

    let result = sqlx::query("UPDATE bill_splits SET paid = ? WHERE bill_id = ? AND user_id = ?")
        .bind(req.paid)
        .bind(&bill.id)
        .bind(&split_user_id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("This member has no share of the bill"));
    }

    Ok(Json(detail(&state, bill).await?))
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::TestApp;
    use crate::db::{format_date, today, HouseholdRole};
    use axum::http::{Method, StatusCode};
    use chrono::Days;
    use serde_json::{json, Value};

    fn due_in(days: i64) -> String {
        let date = if days >= 0 {
            today().checked_add_days(Days::new(days as u64))
        } else {
            today().checked_sub_days(Days::new((-days) as u64))
        };
        format_date(date.unwrap())
    }

    async fn create(app: &TestApp, token: &str, body: Value) -> (StatusCode, Value) {
        app.post("/api/bills", Some(token), body).await
    }

    #[tokio::test]
    async fn test_create_with_equal_split() {
        let app = TestApp::new().await;
        let (_, token, household) = app.owner("Ama", "ama@example.com").await;
        app.member(&household, "Kofi", "kofi@example.com", HouseholdRole::Member)
            .await;
        app.member(&household, "Esi", "esi@example.com", HouseholdRole::Member)
            .await;

        let (status, body) = create(
            &app,
            &token,
            json!({
                "title": "Electricity",
                "amount_cents": 1000,
                "category": "utilities",
                "due_date": due_in(10),
                "split_type": "equal"
            }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "pending");
        let mut amounts: Vec<i64> = body["splits"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["amount_cents"].as_i64().unwrap())
            .collect();
        amounts.sort();
        assert_eq!(amounts, vec![333, 333, 334]);
    }

    #[tokio::test]
    async fn test_create_validation() {
        let app = TestApp::new().await;
        let (_, token, household) = app.owner("Ama", "ama@example.com").await;
        let (kofi, _) = app
            .member(&household, "Kofi", "kofi@example.com", HouseholdRole::Member)
            .await;
        let (stranger, _) = app.user("Yaw", "yaw@example.com").await;

        let (status, body) = create(
            &app,
            &token,
            json!({"title": "", "amount_cents": 0, "due_date": "tomorrow", "category": "fun"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        for field in ["title", "amount_cents", "due_date", "category"] {
            assert!(body["error"]["details"][field].is_array(), "{field}");
        }

        let (status, _) = create(
            &app,
            &token,
            json!({"title": "Rent", "amount_cents": 500, "due_date": due_in(3), "is_recurring": true}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = create(
            &app,
            &token,
            json!({
                "title": "Rent", "amount_cents": 500, "due_date": due_in(3), "split_type": "custom",
                "splits": [{"user_id": kofi.id, "amount_cents": 300}]
            }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["details"]["splits"][0]
            .as_str()
            .unwrap()
            .contains("sum to 300"));

        let (status, _) = create(
            &app,
            &token,
            json!({
                "title": "Rent", "amount_cents": 500, "due_date": due_in(3), "split_type": "custom",
                "splits": [{"user_id": stranger.id, "amount_cents": 500}]
            }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_pay_recurring_bill() {
        let app = TestApp::new().await;
        let (_, token, _) = app.owner("Ama", "ama@example.com").await;

        let (_, bill) = create(
            &app,
            &token,
            json!({
                "title": "Rent", "amount_cents": 90000, "category": "rent", "due_date": "2030-01-31",
                "is_recurring": true, "recurrence_interval": "monthly"
            }),
        )
        .await;
        let id = bill["id"].as_str().unwrap();

        let (status, body) = app
            .post(&format!("/api/bills/{}/pay", id), Some(&token), json!({"note": "bank"}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["bill"]["status"], "paid");
        assert_eq!(body["bill"]["paid_cents"], 90000);
        assert_eq!(body["payment"]["note"], "bank");
        assert_eq!(body["next_bill"]["due_date"], "2030-02-28");
        assert_eq!(body["next_bill"]["status"], "pending");

        let (status, _) = app
            .post(&format!("/api/bills/{}/pay", id), Some(&token), json!({}))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, payments) = app
            .get(&format!("/api/bills/{}/payments", id), Some(&token))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payments.as_array().unwrap().len(), 1);

        // Paid bills are frozen
        let (status, _) = app
            .put(&format!("/api/bills/{}", id), Some(&token), json!({"title": "x"}))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_concurrent_pay_records_one_payment() {
        let app = TestApp::new().await;
        let (_, token, household) = app.owner("Ama", "ama@example.com").await;

        let (_, bill) = create(
            &app,
            &token,
            json!({
                "title": "Rent", "amount_cents": 90000, "category": "rent", "due_date": "2030-01-31",
                "is_recurring": true, "recurrence_interval": "monthly"
            }),
        )
        .await;
        let pay = format!("/api/bills/{}/pay", bill["id"].as_str().unwrap());

        let ((first, _), (second, _)) = tokio::join!(
            app.post(&pay, Some(&token), json!({})),
            app.post(&pay, Some(&token), json!({})),
        );
        let mut statuses = [first, second];
        statuses.sort();
        assert_eq!(statuses, [StatusCode::OK, StatusCode::CONFLICT]);

        let payments: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bill_payments")
            .fetch_one(app.db())
            .await
            .unwrap();
        assert_eq!(payments, 1);
        let bills: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bills WHERE household_id = ?")
            .bind(&household.id)
            .fetch_one(app.db())
            .await
            .unwrap();
        assert_eq!(bills, 2);
    }

    #[tokio::test]
    async fn test_pay_body_must_parse() {
        let app = TestApp::new().await;
        let (_, token, _) = app.owner("Ama", "ama@example.com").await;
        let (_, bill) = create(
            &app,
            &token,
            json!({"title": "Water", "amount_cents": 2500, "due_date": "2030-01-15"}),
        )
        .await;
        let pay = format!("/api/bills/{}/pay", bill["id"].as_str().unwrap());

        let (status, _) = app
            .post(&pay, Some(&token), json!({"amount_cents": "abc"}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // No body at all pays the full amount
        let (status, body) = app.request(Method::POST, &pay, Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["payment"]["amount_cents"], 2500);
    }

    #[tokio::test]
    async fn test_list_with_huge_page_is_empty() {
        let app = TestApp::new().await;
        let (_, token, _) = app.owner("Ama", "ama@example.com").await;
        create(
            &app,
            &token,
            json!({"title": "Water", "amount_cents": 2500, "due_date": "2030-01-15"}),
        )
        .await;

        let (status, body) = app
            .get(&format!("/api/bills?page={}", i64::MAX), Some(&token))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["items"].as_array().unwrap().is_empty());
        assert_eq!(body["total"], 1);
    }

    #[tokio::test]
    async fn test_list_refreshes_overdue_and_filters() {
        let app = TestApp::new().await;
        let (_, token, _) = app.owner("Ama", "ama@example.com").await;

        create(
            &app,
            &token,
            json!({"title": "Water", "amount_cents": 3000, "category": "utilities", "due_date": due_in(5)}),
        )
        .await;
        let (_, late) = create(
            &app,
            &token,
            json!({"title": "Phone", "amount_cents": 2000, "category": "phone", "due_date": due_in(2)}),
        )
        .await;
        // Simulate time passing
        sqlx::query("UPDATE bills SET due_date = ?, status = 'pending' WHERE id = ?")
            .bind(due_in(-2))
            .bind(late["id"].as_str().unwrap())
            .execute(app.db())
            .await
            .unwrap();

        let (status, body) = app.get("/api/bills?status=overdue", Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);
        assert_eq!(body["items"][0]["title"], "Phone");

        let (_, body) = app.get("/api/bills?category=utilities", Some(&token)).await;
        assert_eq!(body["total"], 1);

        let (_, body) = app.get("/api/bills/upcoming?days=7", Some(&token)).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["title"], "Water");

        let (status, _) = app.get("/api/bills?status=lost", Some(&token)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_permissions_and_isolation() {
        let app = TestApp::new().await;
        let (_, owner_token, household) = app.owner("Ama", "ama@example.com").await;
        let (_, member_token) = app
            .member(&household, "Kofi", "kofi@example.com", HouseholdRole::Member)
            .await;
        let (_, outsider_token, _) = app.owner("Yaw", "yaw@example.com").await;

        let (_, bill) = create(
            &app,
            &owner_token,
            json!({"title": "Internet", "amount_cents": 5000, "due_date": due_in(4)}),
        )
        .await;
        let path = format!("/api/bills/{}", bill["id"].as_str().unwrap());

        let (status, _) = app.get(&path, Some(&outsider_token)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = app.get(&path, Some(&member_token)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = app
            .put(&path, Some(&member_token), json!({"title": "Fibre"}))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = app
            .put(&path, Some(&owner_token), json!({"title": "Fibre", "amount_cents": 6000}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["title"], "Fibre");
        assert_eq!(body["amount_cents"], 6000);

        let (status, _) = app.delete(&path, Some(&member_token)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = app.delete(&path, Some(&owner_token)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = app.get(&path, Some(&owner_token)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_split_toggle() {
        let app = TestApp::new().await;
        let (owner, owner_token, household) = app.owner("Ama", "ama@example.com").await;
        let (kofi, kofi_token) = app
            .member(&household, "Kofi", "kofi@example.com", HouseholdRole::Member)
            .await;

        let (_, bill) = create(
            &app,
            &owner_token,
            json!({"title": "Gas", "amount_cents": 1001, "due_date": due_in(4), "split_type": "equal"}),
        )
        .await;
        let id = bill["id"].as_str().unwrap();

        let (status, body) = app
            .put(
                &format!("/api/bills/{}/splits/{}/paid", id, kofi.id),
                Some(&kofi_token),
                json!({"paid": true}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let kofi_share = body["splits"]
            .as_array()
            .unwrap()
            .iter()
            .find(|s| s["user_id"] == kofi.id.as_str())
            .unwrap()
            .clone();
        assert_eq!(kofi_share["paid"], true);

        // A plain member cannot tick someone else's share
        let (status, _) = app
            .put(
                &format!("/api/bills/{}/splits/{}/paid", id, owner.id),
                Some(&kofi_token),
                json!({"paid": true}),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        // Switching to no split clears the shares
        let (status, body) = app
            .put(
                &format!("/api/bills/{}", id),
                Some(&owner_token),
                json!({"split_type": "none"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["splits"].as_array().unwrap().is_empty());
    }
}
