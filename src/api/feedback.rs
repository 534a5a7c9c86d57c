use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;
use uuid::Uuid;

use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{parse_or, validate_rating, validate_text};
use crate::db::{self, CreateFeedbackRequest, Feedback, FeedbackCategory, User};
use crate::AppState;

pub async fn create_feedback(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(req): Json<CreateFeedbackRequest>,
) -> Result<(StatusCode, Json<Feedback>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors.check("rating", validate_rating(req.rating));
    errors.check("message", validate_text(&req.message, "Message", 2000));
    let category = parse_or(&req.category, FeedbackCategory::General);
    if let Err(e) = &category {
        errors.add("category", e.clone());
    }
    errors.finish()?;
    let category = category.map_err(ApiError::bad_request)?;

    let feedback = Feedback {
        id: Uuid::new_v4().to_string(),
        user_id: user.id.clone(),
        rating: req.rating,
        message: req.message.trim().to_string(),
        category: category.to_string(),
        created_at: db::now(),
    };

    sqlx::query(
        "INSERT INTO feedback (id, user_id, rating, message, category, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&feedback.id)
    .bind(&feedback.user_id)
    .bind(feedback.rating)
    .bind(&feedback.message)
    .bind(&feedback.category)
    .bind(&feedback.created_at)
    .execute(&state.db)
    .await?;

    tracing::info!(user_id = %user.id, rating = feedback.rating, "Feedback received");
    Ok((StatusCode::CREATED, Json(feedback)))
}

pub async fn my_feedback(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<Vec<Feedback>>, ApiError> {
    let feedback = sqlx::query_as::<_, Feedback>(
        "SELECT * FROM feedback WHERE user_id = ? ORDER BY created_at DESC",
    )
    .bind(&user.id)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(feedback))
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::TestApp;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_submit_and_list_own_feedback() {
        let app = TestApp::new().await;
        let (_, ama) = app.user("Ama", "ama@example.com").await;
        let (_, kofi) = app.user("Kofi", "kofi@example.com").await;

        let (status, body) = app
            .post(
                "/api/feedback",
                Some(&ama),
                json!({"rating": 4, "message": "Splitting rent is easy now", "category": "usability"}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["category"], "usability");

        let (status, body) = app
            .post("/api/feedback", Some(&ama), json!({"rating": 9, "message": ""}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["details"]["rating"].is_array());
        assert!(body["error"]["details"]["message"].is_array());

        let (_, mine) = app.get("/api/feedback/mine", Some(&ama)).await;
        assert_eq!(mine.as_array().unwrap().len(), 1);
        let (_, theirs) = app.get("/api/feedback/mine", Some(&kofi)).await;
        assert!(theirs.as_array().unwrap().is_empty());
    }
}
