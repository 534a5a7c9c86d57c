use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use super::error::{ApiError, ValidationErrorBuilder};
use super::household::{require_household, Membership};
use super::validation::{
    parse_or, validate_amount, validate_date, validate_notes, validate_range, validate_text,
};
use crate::db::{
    self, fetch_page, format_date, totals_by_category, CreateExpenseRequest, DateRangeQuery,
    Expense, ExpenseCategory, ExpenseQuery, ExpenseStatus, ExpenseSummary, ExpenseWithUser,
    Filter, Page, PaginationQuery, PaymentMethod, UpdateExpenseRequest, User,
};
use crate::AppState;

async fn load_expense(
    state: &AppState,
    membership: &Membership,
    id: &str,
) -> Result<Expense, ApiError> {
    let mut conn = state.db.acquire().await?;
    Expense::find(&mut conn, id)
        .await?
        .filter(|e| e.household_id == membership.household_id)
        .ok_or_else(|| ApiError::not_found("Expense not found"))
}

fn ensure_can_modify(expense: &Expense, user: &User, membership: &Membership) -> Result<(), ApiError> {
    if expense.user_id == user.id || membership.can_manage() {
        Ok(())
    } else {
        Err(ApiError::forbidden(
            "Only the expense's author or a household admin can change it",
        ))
    }
}

pub async fn list_expenses(
    State(state): State<Arc<AppState>>,
    user: User,
    Query(query): Query<ExpenseQuery>,
) -> Result<Json<Page<ExpenseWithUser>>, ApiError> {
    let membership = require_household(&state.db, &user).await?;

    let mut errors = ValidationErrorBuilder::new();
    if let Some(category) = &query.category {
        errors.check("category", category.parse::<ExpenseCategory>().map(|_| ()));
    }
    if let Some(status) = &query.status {
        errors.check("status", status.parse::<ExpenseStatus>().map(|_| ()));
    }
    errors.check("from", validate_range(&query.from, &query.to));
    errors.finish()?;

    let category = query.category.as_deref().map(|c| c.trim().to_lowercase());
    let status = query.status.as_deref().map(|s| s.trim().to_lowercase());
    let mut filter = Filter::new();
    filter
        .push("e.household_id = ?", membership.household_id.as_str())
        .push_opt("e.category = ?", category.as_deref())
        .push_opt("e.status = ?", status.as_deref())
        .push_opt("e.date >= ?", query.from.as_deref())
        .push_opt("e.date <= ?", query.to.as_deref());
    if query.mine {
        filter.push("e.user_id = ?", user.id.as_str());
    }

    let pagination = PaginationQuery {
        page: query.page,
        per_page: query.per_page,
    };
    let page = fetch_page(
        &state.db,
        "e.*, u.name as user_name",
        "FROM expenses e LEFT JOIN users u ON e.user_id = u.id",
        "e.date DESC, e.created_at DESC",
        &filter,
        &pagination,
    )
    .await?;

    Ok(Json(page))
}

pub async fn get_expense(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
) -> Result<Json<Expense>, ApiError> {
    let membership = require_household(&state.db, &user).await?;
    Ok(Json(load_expense(&state, &membership, &id).await?))
}

pub async fn create_expense(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(req): Json<CreateExpenseRequest>,
) -> Result<(StatusCode, Json<Expense>), ApiError> {
    let membership = require_household(&state.db, &user).await?;

    let mut errors = ValidationErrorBuilder::new();
    errors.check("description", validate_text(&req.description, "Description", 200));
    errors.check("amount_cents", validate_amount(req.amount_cents));
    errors.check("notes", validate_notes(&req.notes));
    let date = validate_date(&req.date);
    if let Err(e) = &date {
        errors.add("date", e.clone());
    }
    let category = parse_or(&req.category, ExpenseCategory::Other);
    if let Err(e) = &category {
        errors.add("category", e.clone());
    }
    let method = parse_or(&req.payment_method, PaymentMethod::Cash);
    if let Err(e) = &method {
        errors.add("payment_method", e.clone());
    }
    let status = parse_or(&req.status, ExpenseStatus::Completed);
    if let Err(e) = &status {
        errors.add("status", e.clone());
    }
    errors.finish()?;

    let (Ok(date), Ok(category), Ok(method), Ok(status)) = (date, category, method, status) else {
        return Err(ApiError::bad_request("Invalid expense"));
    };

    let timestamp = db::now();
    let expense = Expense {
        id: Uuid::new_v4().to_string(),
        household_id: membership.household_id.clone(),
        user_id: user.id.clone(),
        description: req.description.trim().to_string(),
        amount_cents: req.amount_cents,
        category: category.to_string(),
        payment_method: method.to_string(),
        status: status.to_string(),
        date: format_date(date),
        notes: req.notes.clone(),
        created_at: timestamp.clone(),
        updated_at: timestamp,
    };

    sqlx::query(
        r#"
        INSERT INTO expenses (id, household_id, user_id, description, amount_cents, category,
            payment_method, status, date, notes, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&expense.id)
    .bind(&expense.household_id)
    .bind(&expense.user_id)
    .bind(&expense.description)
    .bind(expense.amount_cents)
    .bind(&expense.category)
    .bind(&expense.payment_method)
    .bind(&expense.status)
    .bind(&expense.date)
    .bind(&expense.notes)
    .bind(&expense.created_at)
    .bind(&expense.updated_at)
    .execute(&state.db)
    .await?;

    tracing::info!(expense_id = %expense.id, household_id = %expense.household_id, "Expense recorded");
    Ok((StatusCode::CREATED, Json(expense)))
}

pub async fn update_expense(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
    Json(req): Json<UpdateExpenseRequest>,
) -> Result<Json<Expense>, ApiError> {
    let membership = require_household(&state.db, &user).await?;
    let mut expense = load_expense(&state, &membership, &id).await?;
    ensure_can_modify(&expense, &user, &membership)?;

    let mut errors = ValidationErrorBuilder::new();
    if let Some(description) = &req.description {
        errors.check("description", validate_text(description, "Description", 200));
    }
    if let Some(amount) = req.amount_cents {
        errors.check("amount_cents", validate_amount(amount));
    }
    errors.check("notes", validate_notes(&req.notes));
    if let Some(date) = &req.date {
        match validate_date(date) {
            Ok(date) => expense.date = format_date(date),
            Err(e) => {
                errors.add("date", e);
            }
        }
    }
    if let Some(category) = &req.category {
        match category.parse::<ExpenseCategory>() {
            Ok(c) => expense.category = c.to_string(),
            Err(e) => {
                errors.add("category", e);
            }
        }
    }
    if let Some(method) = &req.payment_method {
        match method.parse::<PaymentMethod>() {
            Ok(m) => expense.payment_method = m.to_string(),
            Err(e) => {
                errors.add("payment_method", e);
            }
        }
    }
    if let Some(status) = &req.status {
        match status.parse::<ExpenseStatus>() {
            Ok(s) => expense.status = s.to_string(),
            Err(e) => {
                errors.add("status", e);
            }
        }
    }
    errors.finish()?;

    if let Some(description) = &req.description {
        expense.description = description.trim().to_string();
    }
    if let Some(amount) = req.amount_cents {
        expense.amount_cents = amount;
    }
    if let Some(notes) = &req.notes {
        expense.notes = Some(notes.clone()).filter(|n| !n.trim().is_empty());
    }
    expense.updated_at = db::now();

    sqlx::query(
        r#"
        UPDATE expenses SET description = ?, amount_cents = ?, category = ?, payment_method = ?,
            status = ?, date = ?, notes = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&expense.description)
    .bind(expense.amount_cents)
    .bind(&expense.category)
    .bind(&expense.payment_method)
    .bind(&expense.status)
    .bind(&expense.date)
    .bind(&expense.notes)
    .bind(&expense.updated_at)
    .bind(&expense.id)
    .execute(&state.db)
    .await?;

    Ok(Json(expense))
}

pub async fn delete_expense(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let membership = require_household(&state.db, &user).await?;
    let expense = load_expense(&state, &membership, &id).await?;
    ensure_can_modify(&expense, &user, &membership)?;

    sqlx::query("DELETE FROM expenses WHERE id = ?")
        .bind(&expense.id)
        .execute(&state.db)
        .await?;

    tracing::info!(expense_id = %expense.id, deleted_by = %user.id, "Expense deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Spending per category, cancelled expenses excluded
pub async fn expense_summary(
    State(state): State<Arc<AppState>>,
    user: User,
    Query(range): Query<DateRangeQuery>,
) -> Result<Json<ExpenseSummary>, ApiError> {
    let membership = require_household(&state.db, &user).await?;
    validate_range(&range.from, &range.to).map_err(|e| ApiError::validation_field("from", e))?;

    let mut conn = state.db.acquire().await?;
    let by_category = totals_by_category(
        &mut conn,
        &membership.household_id,
        range.from.as_deref(),
        range.to.as_deref(),
    )
    .await?;

    Ok(Json(ExpenseSummary {
        total_cents: by_category.iter().map(|c| c.total_cents).sum(),
        count: by_category.iter().map(|c| c.count).sum(),
        by_category,
    }))
}
