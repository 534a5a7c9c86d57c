mod admin;
pub mod auth;
mod bills;
mod contributions;
pub mod error;
mod expenses;
mod feedback;
mod household;
pub mod metrics;
mod notifications;
mod oauth;
mod profile;
pub mod rate_limit;
mod reports;
pub mod validation;

#[cfg(test)]
pub(crate) mod test_support;

use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::AppState;

pub use household::{require_household, require_household_role, Membership};

/// Plain `{"message": ...}` body
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    // Auth routes (public, strict rate limit)
    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/verify-email", post(auth::verify_email))
        .route("/resend-verification", post(auth::resend_verification))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/forgot-password", post(auth::forgot_password))
        .route("/reset-password", post(auth::reset_password))
        .route("/google", get(oauth::google_start))
        .route("/google/callback", get(oauth::google_callback))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_auth,
        ));

    // Protected API routes
    let api_routes = Router::new()
        // Profile
        .route("/auth/me", get(profile::get_me))
        .route("/auth/me", put(profile::update_me))
        .route("/auth/me", delete(profile::delete_me))
        .route("/auth/me/password", put(profile::change_password))
        .route(
            "/auth/me/notifications",
            get(profile::get_notification_preferences),
        )
        .route(
            "/auth/me/notifications",
            put(profile::update_notification_preferences),
        )
        // Household
        .route("/household", post(household::create_household))
        .route("/household", get(household::get_household))
        .route("/household", put(household::rename_household))
        .route("/household", delete(household::delete_household))
        .route("/household/join", post(household::join_household))
        .route("/household/leave", post(household::leave_household))
        .route("/household/invite-code", post(household::regenerate_invite_code))
        .route("/household/invite", post(household::invite_member))
        .route("/household/members", get(household::list_members))
        .route(
            "/household/members/:user_id/role",
            put(household::update_member_role),
        )
        .route(
            "/household/members/:user_id",
            delete(household::remove_member),
        )
        // Bills
        .route("/bills", get(bills::list_bills))
        .route("/bills", post(bills::create_bill))
        .route("/bills/upcoming", get(bills::upcoming_bills))
        .route("/bills/:id", get(bills::get_bill))
        .route("/bills/:id", put(bills::update_bill))
        .route("/bills/:id", delete(bills::delete_bill))
        .route("/bills/:id/pay", post(bills::pay_bill))
        .route("/bills/:id/payments", get(bills::list_payments))
        .route("/bills/:id/splits/:user_id/paid", put(bills::set_split_paid))
        // Expenses
        .route("/expenses", get(expenses::list_expenses))
        .route("/expenses", post(expenses::create_expense))
        .route("/expenses/summary", get(expenses::expense_summary))
        .route("/expenses/:id", get(expenses::get_expense))
        .route("/expenses/:id", put(expenses::update_expense))
        .route("/expenses/:id", delete(expenses::delete_expense))
        // Contributions
        .route("/contributions", get(contributions::list_contributions))
        .route("/contributions", post(contributions::create_contribution))
        .route(
            "/contributions/summary",
            get(contributions::contribution_summary),
        )
        .route("/contributions/:id", get(contributions::get_contribution))
        .route("/contributions/:id", put(contributions::update_contribution))
        .route(
            "/contributions/:id",
            delete(contributions::delete_contribution),
        )
        .route(
            "/contributions/:id/confirm",
            post(contributions::confirm_contribution),
        )
        .route(
            "/contributions/:id/reject",
            post(contributions::reject_contribution),
        )
        // Reports
        .route("/reports/summary", get(reports::summary))
        // Feedback
        .route("/feedback", post(feedback::create_feedback))
        .route("/feedback/mine", get(feedback::my_feedback))
        // Notifications
        .route(
            "/notifications/bills/:id/remind",
            post(notifications::remind_bill),
        )
        // Admin (role checked by the AdminUser extractor)
        .route("/admin/metrics", get(admin::metrics))
        .route("/admin/users", get(admin::list_users))
        .route("/admin/users/:id/role", put(admin::update_user_role))
        .route("/admin/users/:id", delete(admin::delete_user))
        .route("/admin/households", get(admin::list_households))
        .route("/admin/feedback", get(admin::list_feedback))
        .route("/admin/notifications", get(admin::list_notifications))
        .route("/admin/consistency", get(admin::consistency_check))
        .route(
            "/admin/consistency/repair",
            post(admin::consistency_repair),
        )
        // Protected by auth
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_api,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics::metrics_endpoint))
        .nest("/api/auth", auth_routes)
        .nest("/api", api_routes)
        .layer(middleware::from_fn(metrics::metrics_middleware))
        .layer(cors_layer(&state.config.server))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// CORS for the browser frontend. Credentials are allowed so the auth
/// cookie travels, which rules out wildcard origins.
fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let configured = if config.cors_origins.is_empty() {
        vec![config.frontend_url.clone()]
    } else {
        config.cors_origins.clone()
    };
    let origins: Vec<HeaderValue> = configured
        .iter()
        .filter_map(|origin| match origin.trim_end_matches('/').parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::test_support::TestApp;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_health_check() {
        let app = TestApp::new().await;
        let (status, body) = app.get_text("/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn test_protected_routes_require_auth() {
        let app = TestApp::new().await;
        for path in ["/api/auth/me", "/api/household", "/api/bills", "/api/admin/users"] {
            let (status, body) = app.get(path, None).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{path}");
            assert_eq!(body["error"]["code"], "unauthorized");
        }
    }

    #[tokio::test]
    async fn test_garbage_token_is_rejected() {
        let app = TestApp::new().await;
        let (status, _) = app.get("/api/auth/me", Some("not-a-jwt")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
