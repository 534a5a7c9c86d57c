//! Google sign-in (authorization code flow).

use axum::{
    extract::{Query, State},
    response::Redirect,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use super::auth::{auth_cookie, issue_token};
use super::error::ApiError;
use crate::config::{Config, GoogleOAuthConfig};
use crate::db::{self, find_user_by_email, DbPool, Household, User};
use crate::AppState;

const GOOGLE_AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";
const STATE_COOKIE: &str = "hearth_oauth_state";

#[derive(Debug, Deserialize)]
pub struct OAuthCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleProfile {
    pub sub: String,
    pub email: String,
    #[serde(default)]
    pub email_verified: bool,
    pub name: Option<String>,
    pub picture: Option<String>,
}

fn google_config(config: &Config) -> Result<&GoogleOAuthConfig, ApiError> {
    config
        .oauth
        .google
        .as_ref()
        .ok_or_else(|| ApiError::not_found("Google sign-in is not configured"))
}

fn redirect_uri(config: &Config) -> String {
    config.google_redirect_uri().unwrap_or_default()
}

pub fn authorization_url(google: &GoogleOAuthConfig, redirect_uri: &str, state: &str) -> String {
    format!(
        "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}&prompt=select_account",
        GOOGLE_AUTHORIZE_URL,
        urlencoding::encode(&google.client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode("openid email profile"),
        urlencoding::encode(state)
    )
}

/// GET /api/auth/google
pub async fn google_start(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), ApiError> {
    let google = google_config(&state.config)?;

    // Random state for CSRF protection, echoed back by Google
    let state_param = Uuid::new_v4().simple().to_string();
    let url = authorization_url(google, &redirect_uri(&state.config), &state_param);

    let cookie = Cookie::build((STATE_COOKIE, state_param))
        .path("/")
        .http_only(true)
        .secure(state.config.auth.cookie_secure)
        .same_site(SameSite::Lax)
        .build();

    Ok((jar.add(cookie), Redirect::to(&url)))
}

/// GET /api/auth/google/callback
pub async fn google_callback(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(params): Query<OAuthCallbackQuery>,
) -> Result<(CookieJar, Redirect), ApiError> {
    let google = google_config(&state.config)?;

    if let Some(error) = params.error {
        tracing::warn!(error = %error, "Google sign-in was declined");
        return Err(ApiError::bad_request(format!("Google sign-in failed: {}", error)));
    }

    let expected = jar.get(STATE_COOKIE).map(|c| c.value().to_string());
    let valid_state = match (expected.as_deref(), params.state.as_deref()) {
        (Some(expected), Some(received)) => {
            bool::from(expected.as_bytes().ct_eq(received.as_bytes()))
        }
        _ => false,
    };
    if !valid_state {
        return Err(ApiError::bad_request("Invalid OAuth state"));
    }

    let code = params
        .code
        .ok_or_else(|| ApiError::bad_request("Missing authorization code"))?;

    let access_token = exchange_code(google, &redirect_uri(&state.config), &code).await?;
    let profile = fetch_profile(&access_token).await?;
    if !profile.email_verified {
        return Err(ApiError::forbidden("Your Google email address is not verified"));
    }

    let user = find_or_create_google_user(&state.db, &profile).await?;
    let token = issue_token(&state.config, &user.id)?;

    tracing::info!(user_id = %user.id, "Signed in with Google");

    let target = format!(
        "{}/auth/callback?token={}",
        state.config.server.frontend_url.trim_end_matches('/'),
        urlencoding::encode(&token)
    );
    let jar = jar
        .remove(Cookie::build(STATE_COOKIE).path("/"))
        .add(auth_cookie(&state.config, token));
    Ok((jar, Redirect::to(&target)))
}

async fn exchange_code(
    google: &GoogleOAuthConfig,
    redirect_uri: &str,
    code: &str,
) -> Result<String, ApiError> {
    let client = reqwest::Client::new();
    let response = client
        .post(GOOGLE_TOKEN_URL)
        .form(&[
            ("client_id", google.client_id.as_str()),
            ("client_secret", google.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ])
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| {
            tracing::warn!(error = %e, "Google token exchange failed");
            ApiError::external("Failed to exchange authorization code")
        })?;

    let token: GoogleTokenResponse = response.json().await.map_err(|e| {
        tracing::warn!(error = %e, "Unexpected Google token response");
        ApiError::external("Failed to parse token response")
    })?;
    Ok(token.access_token)
}

async fn fetch_profile(access_token: &str) -> Result<GoogleProfile, ApiError> {
    let client = reqwest::Client::new();
    client
        .get(GOOGLE_USERINFO_URL)
        .bearer_auth(access_token)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| {
            tracing::warn!(error = %e, "Google profile request failed");
            ApiError::external("Failed to fetch Google profile")
        })?
        .json()
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "Unexpected Google profile response");
            ApiError::external("Failed to parse Google profile")
        })
}

/// Match a Google profile to an account: by Google id, then by email (linking
/// the Google id and marking the email verified), else a new verified account
/// with its own household.
pub async fn find_or_create_google_user(
    pool: &DbPool,
    profile: &GoogleProfile,
) -> Result<User, ApiError> {
    let email = profile.email.trim().to_lowercase();
    let mut tx = pool.begin().await?;

    let by_google: Option<User> = sqlx::query_as("SELECT * FROM users WHERE google_id = ?")
        .bind(&profile.sub)
        .fetch_optional(&mut *tx)
        .await?;

    let user_id = match by_google {
        Some(user) => user.id,
        None => match find_user_by_email(&mut tx, &email).await? {
            Some(user) => {
                sqlx::query(
                    r#"
                    UPDATE users SET google_id = ?, is_verified = 1,
                        avatar_url = COALESCE(avatar_url, ?),
                        verification_token_hash = NULL, verification_expires_at = NULL,
                        updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&profile.sub)
                .bind(&profile.picture)
                .bind(db::now())
                .bind(&user.id)
                .execute(&mut *tx)
                .await?;
                tracing::info!(user_id = %user.id, "Linked Google account");
                user.id
            }
            None => {
                let id = Uuid::new_v4().to_string();
                let now = db::now();
                let name = profile
                    .name
                    .clone()
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| email.split('@').next().unwrap_or("Friend").to_string());
                sqlx::query(
                    r#"
                    INSERT INTO users (
                        id, name, email, password_hash, role, is_verified, google_id,
                        avatar_url, created_at, updated_at
                    )
                    VALUES (?, ?, ?, NULL, 'user', 1, ?, ?, ?, ?)
                    "#,
                )
                .bind(&id)
                .bind(name.trim())
                .bind(&email)
                .bind(&profile.sub)
                .bind(&profile.picture)
                .bind(&now)
                .bind(&now)
                .execute(&mut *tx)
                .await?;

                let first = name.split_whitespace().next().unwrap_or("My").to_string();
                Household::create_in(&mut tx, &id, &format!("{}'s Household", first)).await?;
                tracing::info!(user_id = %id, "Created account from Google sign-in");
                id
            }
        },
    };

    sqlx::query("UPDATE users SET last_login_at = ? WHERE id = ?")
        .bind(db::now())
        .bind(&user_id)
        .execute(&mut *tx)
        .await?;

    let user = db::find_user_by_id(&mut tx, &user_id)
        .await?
        .ok_or_else(|| ApiError::internal("Failed to load user"))?;
    tx.commit().await?;
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::TestApp;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};

    fn profile(sub: &str, email: &str) -> GoogleProfile {
        GoogleProfile {
            sub: sub.to_string(),
            email: email.to_string(),
            email_verified: true,
            name: Some("Yaw Boateng".to_string()),
            picture: Some("https://example.com/yaw.png".to_string()),
        }
    }

    fn google_app_config() -> Config {
        let mut config = Config::default();
        config.auth.jwt_secret = "test-secret".into();
        config.rate_limit.enabled = false;
        config.oauth.google = Some(GoogleOAuthConfig {
            client_id: "client-123".into(),
            client_secret: "shh".into(),
            redirect_uri: None,
        });
        config
    }

    #[test]
    fn test_authorization_url() {
        let config = google_app_config();
        let url = authorization_url(
            config.oauth.google.as_ref().unwrap(),
            &redirect_uri(&config),
            "abc",
        );
        assert!(url.starts_with(GOOGLE_AUTHORIZE_URL));
        assert!(url.contains("client_id=client-123"));
        assert!(url.contains("state=abc"));
        assert!(url.contains(
            "redirect_uri=http%3A%2F%2Flocalhost%3A5000%2Fapi%2Fauth%2Fgoogle%2Fcallback"
        ));
    }

    #[tokio::test]
    async fn test_not_configured_is_404() {
        let app = TestApp::new().await;
        let (status, _) = app.get("/api/auth/google", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_start_sets_state_cookie_and_redirects() {
        let app = TestApp::with_config(google_app_config()).await;
        let response = app
            .send(Request::builder().uri("/api/auth/google").body(Body::empty()).unwrap())
            .await;
        assert!(response.status().is_redirection());
        let location = response.headers()["location"].to_str().unwrap();
        assert!(location.starts_with(GOOGLE_AUTHORIZE_URL));
        let cookie = response.headers()["set-cookie"].to_str().unwrap();
        assert!(cookie.starts_with(STATE_COOKIE));
    }

    #[tokio::test]
    async fn test_callback_rejects_state_mismatch() {
        let app = TestApp::with_config(google_app_config()).await;
        let response = app
            .send(
                Request::builder()
                    .uri("/api/auth/google/callback?code=x&state=forged")
                    .header("Cookie", format!("{}=expected", STATE_COOKIE))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let (status, _) = app.get("/api/auth/google/callback?code=x", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_new_google_user_gets_household() {
        let app = TestApp::new().await;
        let user = find_or_create_google_user(app.db(), &profile("g-1", "Yaw@Example.com"))
            .await
            .unwrap();
        assert!(user.is_verified);
        assert!(user.password_hash.is_none());
        assert_eq!(user.email, "yaw@example.com");
        assert_eq!(user.household_role.as_deref(), Some("owner"));

        // Second sign-in finds the same account
        let again = find_or_create_google_user(app.db(), &profile("g-1", "yaw@example.com"))
            .await
            .unwrap();
        assert_eq!(again.id, user.id);
    }

    #[tokio::test]
    async fn test_existing_email_is_linked() {
        let app = TestApp::new().await;
        let (existing, _) = app.user("Yaw", "yaw@example.com").await;
        sqlx::query("UPDATE users SET is_verified = 0 WHERE id = ?")
            .bind(&existing.id)
            .execute(app.db())
            .await
            .unwrap();

        let user = find_or_create_google_user(app.db(), &profile("g-9", "yaw@example.com"))
            .await
            .unwrap();
        assert_eq!(user.id, existing.id);
        assert_eq!(user.google_id.as_deref(), Some("g-9"));
        assert!(user.is_verified);
        assert!(user.password_hash.is_some());
        // Linking does not invent a household
        assert!(user.household_id.is_none());
    }
}
