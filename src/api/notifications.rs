//! On-demand bill reminders.

use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;

use super::error::ApiError;
use super::household::require_household;
use super::MessageResponse;
use crate::db::{self, Bill, User};
use crate::notifications::Notification;
use crate::AppState;

/// Remind every member of the household about an unpaid bill
pub async fn remind_bill(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let membership = require_household(&state.db, &user).await?;

    let bill = {
        let mut conn = state.db.acquire().await?;
        Bill::find(&mut conn, &id)
            .await?
            .filter(|b| b.household_id == membership.household_id)
            .ok_or_else(|| ApiError::not_found("Bill not found"))?
    };
    if bill.is_paid() {
        return Err(ApiError::conflict("This bill has already been paid"));
    }

    sqlx::query("UPDATE bills SET reminder_sent_at = ? WHERE id = ?")
        .bind(db::now())
        .bind(&bill.id)
        .execute(&state.db)
        .await?;

    let notification = Notification::bill_reminder(
        &bill,
        &user.currency,
        &state.config.server.frontend_url,
        db::today(),
    );
    state
        .notifier
        .spawn_household(bill.household_id.clone(), None, notification);

    tracing::info!(bill_id = %bill.id, requested_by = %user.id, "Bill reminder queued");
    Ok(Json(MessageResponse::new("Reminder sent to household members")))
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::TestApp;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_remind_bill() {
        let app = TestApp::new().await;
        let (_, token, _) = app.owner("Ama", "ama@example.com").await;
        let (_, outsider, _) = app.owner("Yaw", "yaw@example.com").await;

        let (_, bill) = app
            .post(
                "/api/bills",
                Some(&token),
                json!({"title": "Water", "amount_cents": 2_500, "due_date": "2030-01-15"}),
            )
            .await;
        let id = bill["id"].as_str().unwrap();
        let remind = format!("/api/notifications/bills/{}/remind", id);

        let (status, _) = app.post(&remind, Some(&outsider), json!({})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = app.post(&remind, Some(&token), json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Reminder sent to household members");

        let (_, detail) = app.get(&format!("/api/bills/{}", id), Some(&token)).await;
        assert!(detail["reminder_sent_at"].is_string());

        app.post(&format!("/api/bills/{}/pay", id), Some(&token), json!({}))
            .await;
        let (status, _) = app.post(&remind, Some(&token), json!({})).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }
}
