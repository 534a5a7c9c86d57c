use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, State},
    http::{request::Parts, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{validate_email, validate_invite_code, validate_name, validate_password};
use super::MessageResponse;
use crate::config::Config;
use crate::db::{
    self, find_user_by_email, find_user_by_id, normalize_invite_code, EmailRequest, Household,
    HouseholdRole, LoginRequest, LoginResponse, RegisterRequest, ResetPasswordRequest,
    TokenRequest, User, UserResponse,
};
use crate::notifications::{Notification, Recipient};
use crate::AppState;

/// JWT claims
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub message: String,
    pub user: UserResponse,
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Random 32-byte token, hex encoded. Only its hash is stored.
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    hex::encode(bytes)
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn password_hash_or_500(password: &str) -> Result<String, ApiError> {
    hash_password(password).map_err(|e| {
        tracing::error!("Failed to hash password: {}", e);
        ApiError::internal("Failed to hash password")
    })
}

pub fn issue_token(config: &Config, user_id: &str) -> Result<String, ApiError> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        iat: now.timestamp(),
        exp: (now + Duration::days(config.auth.token_ttl_days)).timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.auth.jwt_secret.as_bytes()),
    )
    .map_err(|e| {
        tracing::error!("Failed to sign token: {}", e);
        ApiError::internal("Failed to issue token")
    })
}

/// Verify signature and expiry
pub fn decode_token(config: &Config, token: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.auth.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .ok()
}

/// Bearer header first, then the auth cookie
fn extract_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    if let Some(header) = headers.get("Authorization").and_then(|h| h.to_str().ok()) {
        if let Some(token) = header.strip_prefix("Bearer ") {
            return Some(token.trim().to_string());
        }
    }
    CookieJar::from_headers(headers)
        .get(cookie_name)
        .map(|c| c.value().to_string())
}

pub fn auth_cookie(config: &Config, token: String) -> Cookie<'static> {
    Cookie::build((config.auth.cookie_name.clone(), token))
        .path("/")
        .http_only(true)
        .secure(config.auth.cookie_secure)
        .same_site(SameSite::Lax)
        .build()
}

pub fn removal_cookie(config: &Config) -> Cookie<'static> {
    Cookie::build((config.auth.cookie_name.clone(), ""))
        .path("/")
        .build()
}

/// Resolve the acting user from a request's credentials
pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<User, ApiError> {
    let token = extract_token(headers, &state.config.auth.cookie_name)
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;
    let claims = decode_token(&state.config, &token)
        .ok_or_else(|| ApiError::unauthorized("Invalid or expired token"))?;

    let mut conn = state.db.acquire().await?;
    find_user_by_id(&mut conn, &claims.sub)
        .await?
        .ok_or_else(|| ApiError::unauthorized("User no longer exists"))
}

/// Rejects unauthenticated requests and stashes the user for handlers
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let user = authenticate(&state, request.headers()).await?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for User {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<User>() {
            return Ok(user.clone());
        }
        authenticate(state, &parts.headers).await
    }
}

/// A user with the site admin role
pub struct AdminUser(pub User);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let user = User::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(ApiError::forbidden("Admin access required"));
        }
        Ok(AdminUser(user))
    }
}

fn frontend_link(config: &Config, path: &str, token: &str) -> String {
    format!(
        "{}/{}?token={}",
        config.server.frontend_url.trim_end_matches('/'),
        path,
        urlencoding::encode(token)
    )
}

/// Store a fresh verification token and email the link
async fn send_verification(state: &AppState, user: &User) -> Result<(), ApiError> {
    let token = generate_token();
    let expires_at = db::timestamp(
        Utc::now() + Duration::hours(state.config.auth.verification_ttl_hours),
    );
    sqlx::query(
        "UPDATE users SET verification_token_hash = ?, verification_expires_at = ?, updated_at = ? WHERE id = ?",
    )
    .bind(hash_token(&token))
    .bind(&expires_at)
    .bind(db::now())
    .bind(&user.id)
    .execute(&state.db)
    .await?;

    let mut recipient = Recipient::address(&user.email);
    recipient.user_id = Some(user.id.clone());
    state.notifier.spawn(
        vec![recipient],
        Notification::Verification {
            name: user.name.clone(),
            link: frontend_link(&state.config, "verify-email", &token),
            ttl_hours: state.config.auth.verification_ttl_hours,
        },
    );
    Ok(())
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors.check("name", validate_name(&req.name));
    errors.check("email", validate_email(&req.email));
    errors.check("password", validate_password(&req.password));
    if let Some(code) = &req.invite_code {
        errors.check("invite_code", validate_invite_code(code));
    }
    if let Some(name) = &req.household_name {
        errors.check("household_name", validate_name(name));
    }
    errors.finish()?;

    let email = req.email.trim().to_lowercase();
    let mut conn = state.db.acquire().await?;

    if find_user_by_email(&mut conn, &email).await?.is_some() {
        return Err(ApiError::conflict("An account with this email already exists"));
    }

    let invite_code = match &req.invite_code {
        Some(code) => {
            let household = Household::find_by_invite_code(&mut conn, code).await?;
            if household.is_none() {
                return Err(ApiError::validation_field("invite_code", "Invalid invite code"));
            }
            Some(normalize_invite_code(code))
        }
        None => None,
    };

    let password_hash = password_hash_or_500(&req.password)?;
    let id = Uuid::new_v4().to_string();
    let now = db::now();

    sqlx::query(
        r#"
        INSERT INTO users (
            id, name, email, password_hash, role, is_verified,
            pending_invite_code, pending_household_name, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, 'user', 0, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(req.name.trim())
    .bind(&email)
    .bind(&password_hash)
    .bind(&invite_code)
    .bind(req.household_name.as_deref().map(str::trim))
    .bind(&now)
    .bind(&now)
    .execute(&mut *conn)
    .await?;

    let user = find_user_by_id(&mut conn, &id)
        .await?
        .ok_or_else(|| ApiError::internal("Failed to load new user"))?;
    drop(conn);

    send_verification(&state, &user).await?;

    tracing::info!(user_id = %user.id, "Registered user");

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "Registration successful. Check your email to verify your account.".to_string(),
            user: user.into(),
        }),
    ))
}

/// Put a freshly verified user into a household: the one their invite code
/// points at if it still exists, otherwise a new one they own.
async fn place_in_household(state: &AppState, user: &User) -> Result<(), ApiError> {
    if user.household_id.is_some() {
        return Ok(());
    }

    let mut tx = state.db.begin().await?;

    let invited = match &user.pending_invite_code {
        Some(code) => Household::find_by_invite_code(&mut tx, code).await?,
        None => None,
    };

    let joined = match invited {
        Some(household) => {
            household
                .add_member_in(&mut tx, &user.id, HouseholdRole::Member)
                .await?;
            Some(household)
        }
        None => {
            let name = user
                .pending_household_name
                .clone()
                .unwrap_or_else(|| user.default_household_name());
            Household::create_in(&mut tx, &user.id, &name).await?;
            None
        }
    };

    sqlx::query(
        "UPDATE users SET pending_invite_code = NULL, pending_household_name = NULL WHERE id = ?",
    )
    .bind(&user.id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    if let Some(household) = joined {
        tracing::info!(user_id = %user.id, household_id = %household.id, "User joined household by invite");
        state.notifier.spawn_household(
            household.id.clone(),
            Some(user.id.clone()),
            Notification::MemberJoined {
                household_name: household.name.clone(),
                member_name: user.name.clone(),
            },
        );
    }
    Ok(())
}

pub async fn verify_email(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<TokenRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), ApiError> {
    let user: Option<User> = sqlx::query_as(
        "SELECT * FROM users WHERE verification_token_hash = ? AND verification_expires_at > ?",
    )
    .bind(hash_token(req.token.trim()))
    .bind(db::now())
    .fetch_optional(&state.db)
    .await?;
    let user = user.ok_or_else(|| ApiError::bad_request("Invalid or expired verification token"))?;

    sqlx::query(
        "UPDATE users SET is_verified = 1, verification_token_hash = NULL, verification_expires_at = NULL, last_login_at = ?, updated_at = ? WHERE id = ?",
    )
    .bind(db::now())
    .bind(db::now())
    .bind(&user.id)
    .execute(&state.db)
    .await?;

    place_in_household(&state, &user).await?;

    let mut conn = state.db.acquire().await?;
    let user = find_user_by_id(&mut conn, &user.id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    tracing::info!(user_id = %user.id, "Email verified");

    let token = issue_token(&state.config, &user.id)?;
    let jar = jar.add(auth_cookie(&state.config, token.clone()));
    Ok((
        jar,
        Json(LoginResponse {
            token,
            user: user.into(),
        }),
    ))
}

pub async fn resend_verification(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EmailRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let mut conn = state.db.acquire().await?;
    if let Some(user) = find_user_by_email(&mut conn, &req.email).await? {
        drop(conn);
        if !user.is_verified {
            send_verification(&state, &user).await?;
        }
    }
    Ok(Json(MessageResponse::new(
        "If an unverified account exists for this email, a new verification link has been sent.",
    )))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), ApiError> {
    let mut conn = state.db.acquire().await?;
    let user = find_user_by_email(&mut conn, &req.email)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?;

    let valid = user
        .password_hash
        .as_deref()
        .map(|hash| verify_password(&req.password, hash))
        .unwrap_or(false);
    if !valid {
        tracing::warn!(user_id = %user.id, "Failed login attempt");
        return Err(ApiError::unauthorized("Invalid credentials"));
    }
    if !user.is_verified {
        return Err(ApiError::forbidden("Please verify your email before logging in"));
    }

    let now = db::now();
    sqlx::query("UPDATE users SET last_login_at = ? WHERE id = ?")
        .bind(&now)
        .bind(&user.id)
        .execute(&mut *conn)
        .await?;

    let token = issue_token(&state.config, &user.id)?;
    let jar = jar.add(auth_cookie(&state.config, token.clone()));

    let mut user = user;
    user.last_login_at = Some(now);
    Ok((
        jar,
        Json(LoginResponse {
            token,
            user: user.into(),
        }),
    ))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> (CookieJar, Json<MessageResponse>) {
    (
        jar.remove(removal_cookie(&state.config)),
        Json(MessageResponse::new("Logged out")),
    )
}

pub async fn forgot_password(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EmailRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let mut conn = state.db.acquire().await?;
    if let Some(user) = find_user_by_email(&mut conn, &req.email).await? {
        let token = generate_token();
        let expires_at =
            db::timestamp(Utc::now() + Duration::minutes(state.config.auth.reset_ttl_minutes));
        sqlx::query(
            "UPDATE users SET reset_token_hash = ?, reset_expires_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(hash_token(&token))
        .bind(&expires_at)
        .bind(db::now())
        .bind(&user.id)
        .execute(&mut *conn)
        .await?;

        let mut recipient = Recipient::address(&user.email);
        recipient.user_id = Some(user.id.clone());
        state.notifier.spawn(
            vec![recipient],
            Notification::PasswordReset {
                name: user.name.clone(),
                link: frontend_link(&state.config, "reset-password", &token),
                ttl_minutes: state.config.auth.reset_ttl_minutes,
            },
        );
        tracing::info!(user_id = %user.id, "Password reset requested");
    }

    Ok(Json(MessageResponse::new(
        "If an account exists for this email, a password reset link has been sent.",
    )))
}

pub async fn reset_password(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    validate_password(&req.password).map_err(|e| ApiError::validation_field("password", e))?;

    let user: Option<User> = sqlx::query_as(
        "SELECT * FROM users WHERE reset_token_hash = ? AND reset_expires_at > ?",
    )
    .bind(hash_token(req.token.trim()))
    .bind(db::now())
    .fetch_optional(&state.db)
    .await?;
    let user = user.ok_or_else(|| ApiError::bad_request("Invalid or expired reset token"))?;

    let password_hash = password_hash_or_500(&req.password)?;
    sqlx::query(
        "UPDATE users SET password_hash = ?, reset_token_hash = NULL, reset_expires_at = NULL, updated_at = ? WHERE id = ?",
    )
    .bind(&password_hash)
    .bind(db::now())
    .bind(&user.id)
    .execute(&state.db)
    .await?;

    tracing::info!(user_id = %user.id, "Password reset completed");
    Ok(Json(MessageResponse::new("Password has been reset. You can now log in.")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_round_trip() {
        let hash = hash_password("hunter22").unwrap();
        assert!(verify_password("hunter22", &hash));
        assert!(!verify_password("hunter23", &hash));
        assert!(!verify_password("hunter22", "not-a-hash"));
    }

    #[test]
    fn test_token_hashing() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert_ne!(token, generate_token());
        assert_eq!(hash_token(&token), hash_token(&token));
        assert_ne!(hash_token(&token), token);
    }

    #[test]
    fn test_jwt_issue_and_decode() {
        let mut config = Config::default();
        config.auth.jwt_secret = "test-secret".into();

        let token = issue_token(&config, "user-1").unwrap();
        let claims = decode_token(&config, &token).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert!(claims.exp > claims.iat);

        config.auth.jwt_secret = "other-secret".into();
        assert!(decode_token(&config, &token).is_none());
    }

    #[test]
    fn test_expired_jwt_is_rejected() {
        let mut config = Config::default();
        config.auth.jwt_secret = "test-secret".into();
        config.auth.token_ttl_days = -1;
        let token = issue_token(&config, "user-1").unwrap();
        assert!(decode_token(&config, &token).is_none());
    }

    #[test]
    fn test_extract_token_sources() {
        let mut headers = HeaderMap::new();
        headers.insert("Cookie", "hearth_token=from-cookie".parse().unwrap());
        assert_eq!(
            extract_token(&headers, "hearth_token").as_deref(),
            Some("from-cookie")
        );

        headers.insert("Authorization", "Bearer from-header".parse().unwrap());
        assert_eq!(
            extract_token(&headers, "hearth_token").as_deref(),
            Some("from-header")
        );

        assert!(extract_token(&HeaderMap::new(), "hearth_token").is_none());
    }

    mod handlers {
        use super::super::*;
        use crate::api::test_support::{TestApp, PASSWORD};
        use serde_json::json;

        async fn set_verification_token(app: &TestApp, email: &str, token: &str) {
            sqlx::query("UPDATE users SET verification_token_hash = ? WHERE email = ?")
                .bind(hash_token(token))
                .bind(email)
                .execute(app.db())
                .await
                .unwrap();
        }

        #[tokio::test]
        async fn test_register_then_verify_creates_household() {
            let app = TestApp::new().await;
            let (status, body) = app
                .post(
                    "/api/auth/register",
                    None,
                    json!({"name": "Ama Mensah", "email": "Ama@Example.com", "password": "hunter22a"}),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);
            assert_eq!(body["user"]["email"], "ama@example.com");
            assert_eq!(body["user"]["is_verified"], false);

            let (status, _) = app
                .post(
                    "/api/auth/login",
                    None,
                    json!({"email": "ama@example.com", "password": "hunter22a"}),
                )
                .await;
            assert_eq!(status, StatusCode::FORBIDDEN);

            set_verification_token(&app, "ama@example.com", "known-token").await;
            let (status, body) = app
                .post("/api/auth/verify-email", None, json!({"token": "known-token"}))
                .await;
            assert_eq!(status, StatusCode::OK);
            assert!(body["token"].as_str().is_some());
            assert_eq!(body["user"]["is_verified"], true);
            assert_eq!(body["user"]["household_role"], "owner");

            let user_id = body["user"]["id"].as_str().unwrap().to_string();
            let mut conn = app.db().acquire().await.unwrap();
            let user = find_user_by_id(&mut conn, &user_id).await.unwrap().unwrap();
            let household = Household::find(&mut conn, user.household_id.as_deref().unwrap())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(household.name, "Ama's Household");
            assert!(user.verification_token_hash.is_none());
            drop(conn);

            // Token is single use
            let (status, _) = app
                .post("/api/auth/verify-email", None, json!({"token": "known-token"}))
                .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }

        #[tokio::test]
        async fn test_register_with_invite_code_joins_on_verify() {
            let app = TestApp::new().await;
            let (_, _, household) = app.owner("Kofi", "kofi@example.com").await;

            let (status, body) = app
                .post(
                    "/api/auth/register",
                    None,
                    json!({"name": "Esi", "email": "esi@example.com", "password": "hunter22a", "invite_code": "ZZZZ2345"}),
                )
                .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert!(body["error"]["details"]["invite_code"].is_array());

            let (status, _) = app
                .post(
                    "/api/auth/register",
                    None,
                    json!({
                        "name": "Esi",
                        "email": "esi@example.com",
                        "password": "hunter22a",
                        "invite_code": household.invite_code.to_lowercase()
                    }),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);

            set_verification_token(&app, "esi@example.com", "esi-token").await;
            let (status, body) = app
                .post("/api/auth/verify-email", None, json!({"token": "esi-token"}))
                .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["user"]["household_id"], household.id.as_str());
            assert_eq!(body["user"]["household_role"], "member");
        }

        #[tokio::test]
        async fn test_register_validation_and_duplicates() {
            let app = TestApp::new().await;
            let (status, body) = app
                .post(
                    "/api/auth/register",
                    None,
                    json!({"name": "", "email": "nope", "password": "short"}),
                )
                .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            let details = &body["error"]["details"];
            assert!(details["name"].is_array());
            assert!(details["email"].is_array());
            assert!(details["password"].is_array());

            app.user("Ama", "ama@example.com").await;
            let (status, _) = app
                .post(
                    "/api/auth/register",
                    None,
                    json!({"name": "Ama", "email": "AMA@example.com", "password": "hunter22a"}),
                )
                .await;
            assert_eq!(status, StatusCode::CONFLICT);
        }

        #[tokio::test]
        async fn test_login_sets_cookie_and_token_works() {
            let app = TestApp::new().await;
            app.user("Ama", "ama@example.com").await;

            let (status, _) = app
                .post(
                    "/api/auth/login",
                    None,
                    json!({"email": "ama@example.com", "password": "wrong-pass-1"}),
                )
                .await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);

            let request = Request::builder()
                .method("POST")
                .uri("/api/auth/login")
                .header("Content-Type", "application/json")
                .body(Body::from(
                    json!({"email": "ama@example.com", "password": PASSWORD}).to_string(),
                ))
                .unwrap();
            let response = app.send(request).await;
            assert_eq!(response.status(), StatusCode::OK);
            let cookie = response
                .headers()
                .get("set-cookie")
                .and_then(|v| v.to_str().ok())
                .unwrap()
                .to_string();
            assert!(cookie.starts_with("hearth_token="));
            assert!(cookie.contains("HttpOnly"));

            // The cookie alone authenticates
            let cookie_pair = cookie.split(';').next().unwrap().to_string();
            let request = Request::builder()
                .uri("/api/auth/me")
                .header("Cookie", cookie_pair)
                .body(Body::empty())
                .unwrap();
            let response = app.send(request).await;
            assert_eq!(response.status(), StatusCode::OK);
        }

        #[tokio::test]
        async fn test_password_reset_flow() {
            let app = TestApp::new().await;
            let (user, _) = app.user("Ama", "ama@example.com").await;

            let (status, _) = app
                .post("/api/auth/forgot-password", None, json!({"email": "ghost@example.com"}))
                .await;
            assert_eq!(status, StatusCode::OK);

            let (status, _) = app
                .post("/api/auth/forgot-password", None, json!({"email": "ama@example.com"}))
                .await;
            assert_eq!(status, StatusCode::OK);
            assert!(app.user_column(&user.id, "reset_token_hash").await.is_some());

            sqlx::query("UPDATE users SET reset_token_hash = ? WHERE id = ?")
                .bind(hash_token("reset-me"))
                .bind(&user.id)
                .execute(app.db())
                .await
                .unwrap();

            let (status, _) = app
                .post(
                    "/api/auth/reset-password",
                    None,
                    json!({"token": "reset-me", "password": "weak"}),
                )
                .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);

            let (status, _) = app
                .post(
                    "/api/auth/reset-password",
                    None,
                    json!({"token": "reset-me", "password": "brand-new-pass9"}),
                )
                .await;
            assert_eq!(status, StatusCode::OK);
            assert!(app.user_column(&user.id, "reset_token_hash").await.is_none());

            let (status, _) = app
                .post(
                    "/api/auth/login",
                    None,
                    json!({"email": "ama@example.com", "password": "brand-new-pass9"}),
                )
                .await;
            assert_eq!(status, StatusCode::OK);
        }

        #[tokio::test]
        async fn test_expired_reset_token_is_rejected() {
            let app = TestApp::new().await;
            let (user, _) = app.user("Ama", "ama@example.com").await;
            sqlx::query(
                "UPDATE users SET reset_token_hash = ?, reset_expires_at = '2000-01-01T00:00:00.000Z' WHERE id = ?",
            )
            .bind(hash_token("old"))
            .bind(&user.id)
            .execute(app.db())
            .await
            .unwrap();

            let (status, _) = app
                .post(
                    "/api/auth/reset-password",
                    None,
                    json!({"token": "old", "password": "brand-new-pass9"}),
                )
                .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }

        #[tokio::test]
        async fn test_admin_extractor() {
            let app = TestApp::new().await;
            let (_, token) = app.user("Ama", "ama@example.com").await;
            let (status, _) = app.get("/api/admin/users", Some(&token)).await;
            assert_eq!(status, StatusCode::FORBIDDEN);
        }
    }
}
