//! In-process router harness for handler tests.

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    response::Response,
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

use super::auth::{hash_password, issue_token};
use crate::config::Config;
use crate::db::models::user::fixtures::{insert_user, reload};
use crate::db::{init_memory, DbPool, Household, HouseholdRole, User};
use crate::AppState;

pub const PASSWORD: &str = "correct-horse-1";

pub struct TestApp {
    pub state: Arc<AppState>,
    router: Router,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut config = Config::default();
        config.auth.jwt_secret = "test-secret".to_string();
        config.rate_limit.enabled = false;
        Self::with_config(config).await
    }

    pub async fn with_config(config: Config) -> Self {
        let db = init_memory().await.unwrap();
        let state = Arc::new(AppState::new(config, db));
        let router = super::create_router(state.clone());
        Self { state, router }
    }

    pub fn db(&self) -> &DbPool {
        &self.state.db
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(json) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = self.send(request).await;
        let status = response.status();
        (status, json_body(response).await)
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.request(Method::GET, uri, token, None).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, token, Some(body)).await
    }

    pub async fn put(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.request(Method::PUT, uri, token, Some(body)).await
    }

    pub async fn delete(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.request(Method::DELETE, uri, token, None).await
    }

    pub async fn get_text(&self, uri: &str) -> (StatusCode, String) {
        let response = self
            .send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await;
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    /// A verified user with password [`PASSWORD`] and no household
    pub async fn user(&self, name: &str, email: &str) -> (User, String) {
        let user = insert_user(self.db(), name, email).await;
        sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
            .bind(hash_password(PASSWORD).unwrap())
            .bind(&user.id)
            .execute(self.db())
            .await
            .unwrap();
        let token = issue_token(&self.state.config, &user.id).unwrap();
        (reload(self.db(), &user.id).await, token)
    }

    /// A verified user who owns a fresh household
    pub async fn owner(&self, name: &str, email: &str) -> (User, String, Household) {
        let (user, token) = self.user(name, email).await;
        let household = Household::create(self.db(), &user.id, "Home").await.unwrap();
        (reload(self.db(), &user.id).await, token, household)
    }

    /// A verified user added to `household` with `role`
    pub async fn member(
        &self,
        household: &Household,
        name: &str,
        email: &str,
        role: HouseholdRole,
    ) -> (User, String) {
        let (user, token) = self.user(name, email).await;
        household.add_member(self.db(), &user.id, role).await.unwrap();
        (reload(self.db(), &user.id).await, token)
    }

    pub async fn reload(&self, user_id: &str) -> User {
        reload(self.db(), user_id).await
    }

    /// Column value for a user row, for checking token bookkeeping
    pub async fn user_column(&self, user_id: &str, column: &str) -> Option<String> {
        sqlx::query_scalar(&format!("SELECT {} FROM users WHERE id = ?", column))
            .bind(user_id)
            .fetch_one(self.db())
            .await
            .unwrap()
    }
}

pub async fn json_body(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    }
}
