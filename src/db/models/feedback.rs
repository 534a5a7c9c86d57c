use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::common::string_enum;

string_enum! {
    pub enum FeedbackCategory {
        Bug => "bug",
        Feature => "feature",
        Usability => "usability",
        General => "general",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Feedback {
    pub id: String,
    pub user_id: String,
    pub rating: i64,
    pub message: String,
    pub category: String,
    pub created_at: String,
}

/// Feedback with the author for the admin view
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FeedbackWithUser {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub feedback: Feedback,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateFeedbackRequest {
    pub rating: i64,
    pub message: String,
    pub category: Option<String>,
}
