//! The signed-in user's own account: profile, password, notification
//! preferences and account deletion.

use axum::{extract::State, http::StatusCode, Json};
use axum_extra::extract::cookie::CookieJar;
use std::sync::Arc;

use super::auth::{hash_password, removal_cookie, verify_password};
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{validate_currency, validate_name, validate_password, validate_phone};
use super::MessageResponse;
use crate::db::{
    self, delete_user_cascade, find_user_by_id, ChangePasswordRequest, NotificationPreferences,
    UpdateNotificationPreferences, UpdateProfileRequest, User, UserResponse,
};
use crate::AppState;

async fn reload(state: &AppState, user_id: &str) -> Result<User, ApiError> {
    let mut conn = state.db.acquire().await?;
    find_user_by_id(&mut conn, user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

/// Empty strings clear optional fields
fn blank_to_none(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub async fn get_me(user: User) -> Json<UserResponse> {
    Json(user.into())
}

pub async fn update_me(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Some(name) = &req.name {
        errors.check("name", validate_name(name));
    }
    let phone = blank_to_none(req.phone.as_ref());
    errors.check("phone", validate_phone(&phone));
    if let Some(currency) = &req.currency {
        errors.check("currency", validate_currency(&currency.trim().to_uppercase()));
    }
    if let Some(url) = &req.avatar_url {
        if url.len() > 2048 {
            errors.add("avatar_url", "Avatar URL is too long");
        }
    }
    errors.finish()?;

    let name = req
        .name
        .as_deref()
        .map(str::trim)
        .unwrap_or(user.name.as_str())
        .to_string();
    let phone = if req.phone.is_some() { phone } else { user.phone.clone() };
    let avatar_url = if req.avatar_url.is_some() {
        blank_to_none(req.avatar_url.as_ref())
    } else {
        user.avatar_url.clone()
    };
    let currency = req
        .currency
        .as_deref()
        .map(|c| c.trim().to_uppercase())
        .unwrap_or_else(|| user.currency.clone());

    sqlx::query(
        "UPDATE users SET name = ?, phone = ?, avatar_url = ?, currency = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&name)
    .bind(&phone)
    .bind(&avatar_url)
    .bind(&currency)
    .bind(db::now())
    .bind(&user.id)
    .execute(&state.db)
    .await?;

    Ok(Json(reload(&state, &user.id).await?.into()))
}

pub async fn change_password(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    // Google-only accounts have no password to check and set one here
    if let Some(hash) = user.password_hash.as_deref() {
        if !verify_password(&req.current_password, hash) {
            return Err(ApiError::unauthorized("Current password is incorrect"));
        }
    }
    validate_password(&req.new_password)
        .map_err(|e| ApiError::validation_field("new_password", e))?;

    let password_hash = hash_password(&req.new_password).map_err(|e| {
        tracing::error!("Failed to hash password: {}", e);
        ApiError::internal("Failed to hash password")
    })?;

    sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
        .bind(&password_hash)
        .bind(db::now())
        .bind(&user.id)
        .execute(&state.db)
        .await?;

    tracing::info!(user_id = %user.id, "Password changed");
    Ok(Json(MessageResponse::new("Password updated")))
}

pub async fn delete_me(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    user: User,
) -> Result<(CookieJar, StatusCode), ApiError> {
    let summary = delete_user_cascade(&state.db, &user.id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    tracing::info!(
        user_id = %user.id,
        households = summary.households,
        bills = summary.bills,
        expenses = summary.expenses,
        "Account deleted"
    );
    Ok((jar.remove(removal_cookie(&state.config)), StatusCode::NO_CONTENT))
}

pub async fn get_notification_preferences(user: User) -> Json<NotificationPreferences> {
    Json(NotificationPreferences {
        notify_email: user.notify_email,
        notify_whatsapp: user.notify_whatsapp,
        phone: user.phone,
    })
}

pub async fn update_notification_preferences(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(req): Json<UpdateNotificationPreferences>,
) -> Result<Json<NotificationPreferences>, ApiError> {
    let phone = if req.phone.is_some() {
        blank_to_none(req.phone.as_ref())
    } else {
        user.phone.clone()
    };
    validate_phone(&phone).map_err(|e| ApiError::validation_field("phone", e))?;

    let notify_email = req.notify_email.unwrap_or(user.notify_email);
    let notify_whatsapp = req.notify_whatsapp.unwrap_or(user.notify_whatsapp);
    if notify_whatsapp && phone.is_none() {
        return Err(ApiError::validation_field(
            "phone",
            "A phone number is required for WhatsApp notifications",
        ));
    }

    sqlx::query(
        "UPDATE users SET notify_email = ?, notify_whatsapp = ?, phone = ?, updated_at = ? WHERE id = ?",
    )
    .bind(notify_email)
    .bind(notify_whatsapp)
    .bind(&phone)
    .bind(db::now())
    .bind(&user.id)
    .execute(&state.db)
    .await?;

    Ok(Json(NotificationPreferences {
        notify_email,
        notify_whatsapp,
        phone,
    }))
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::{TestApp, PASSWORD};
    use crate::db::HouseholdRole;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_get_and_update_profile() {
        let app = TestApp::new().await;
        let (_, token) = app.user("Ama", "ama@example.com").await;

        let (status, body) = app.get("/api/auth/me", Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Ama");
        assert_eq!(body["has_password"], true);
        assert!(body.get("password_hash").is_none());

        let (status, body) = app
            .put(
                "/api/auth/me",
                Some(&token),
                json!({"name": "Ama Mensah", "currency": "ghs", "phone": "+233201234567"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Ama Mensah");
        assert_eq!(body["currency"], "GHS");
        assert_eq!(body["phone"], "+233201234567");

        let (status, body) = app
            .put("/api/auth/me", Some(&token), json!({"phone": "0201234567"}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["details"]["phone"].is_array());
    }

    #[tokio::test]
    async fn test_change_password() {
        let app = TestApp::new().await;
        let (_, token) = app.user("Ama", "ama@example.com").await;

        let (status, _) = app
            .put(
                "/api/auth/me/password",
                Some(&token),
                json!({"current_password": "nope-nope-1", "new_password": "another-pass2"}),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = app
            .put(
                "/api/auth/me/password",
                Some(&token),
                json!({"current_password": PASSWORD, "new_password": "another-pass2"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = app
            .post(
                "/api/auth/login",
                None,
                json!({"email": "ama@example.com", "password": "another-pass2"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_notification_preferences() {
        let app = TestApp::new().await;
        let (_, token) = app.user("Ama", "ama@example.com").await;

        let (status, body) = app.get("/api/auth/me/notifications", Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["notify_email"], true);
        assert_eq!(body["notify_whatsapp"], false);

        let (status, _) = app
            .put(
                "/api/auth/me/notifications",
                Some(&token),
                json!({"notify_whatsapp": true}),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = app
            .put(
                "/api/auth/me/notifications",
                Some(&token),
                json!({"notify_whatsapp": true, "notify_email": false, "phone": "+233201234567"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["notify_whatsapp"], true);
        assert_eq!(body["notify_email"], false);
    }

    #[tokio::test]
    async fn test_delete_account_cascades() {
        let app = TestApp::new().await;
        let (_, owner_token, household) = app.owner("Ama", "ama@example.com").await;
        let (member, member_token) = app
            .member(&household, "Esi", "esi@example.com", HouseholdRole::Member)
            .await;

        let (status, _) = app.delete("/api/auth/me", Some(&owner_token)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        // Token of a deleted user no longer authenticates
        let (status, _) = app.get("/api/auth/me", Some(&owner_token)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        // The owned household went with them
        assert!(app.reload(&member.id).await.household_id.is_none());
        let (status, _) = app.get("/api/household", Some(&member_token)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
