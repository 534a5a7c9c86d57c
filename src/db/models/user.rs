//! User accounts.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};

use super::common::string_enum;
use super::household::HouseholdRole;

string_enum! {
    /// Site-wide role
    pub enum UserRole {
        User => "user",
        Admin => "admin",
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    /// None for accounts created through Google sign-in
    pub password_hash: Option<String>,
    pub role: String,
    pub household_id: Option<String>,
    pub household_role: Option<String>,
    pub is_verified: bool,
    pub verification_token_hash: Option<String>,
    pub verification_expires_at: Option<String>,
    pub reset_token_hash: Option<String>,
    pub reset_expires_at: Option<String>,
    /// Invite code given at registration, applied on verification
    pub pending_invite_code: Option<String>,
    pub pending_household_name: Option<String>,
    pub google_id: Option<String>,
    pub phone: Option<String>,
    pub avatar_url: Option<String>,
    pub currency: String,
    pub notify_email: bool,
    pub notify_whatsapp: bool,
    pub last_login_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role.parse::<UserRole>() == Ok(UserRole::Admin)
    }

    /// Role inside the user's household, if they belong to one
    pub fn household_role_enum(&self) -> Option<HouseholdRole> {
        self.household_role.as_deref().and_then(|r| r.parse().ok())
    }

    /// Default name for a household created on the user's behalf
    pub fn default_household_name(&self) -> String {
        let first = self.name.split_whitespace().next().unwrap_or("My");
        format!("{}'s Household", first)
    }
}

/// Public view of a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
    pub household_id: Option<String>,
    pub household_role: Option<String>,
    pub is_verified: bool,
    pub phone: Option<String>,
    pub avatar_url: Option<String>,
    pub currency: String,
    pub notify_email: bool,
    pub notify_whatsapp: bool,
    pub has_password: bool,
    pub google_linked: bool,
    pub last_login_at: Option<String>,
    pub created_at: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            has_password: user.password_hash.is_some(),
            google_linked: user.google_id.is_some(),
            id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
            household_id: user.household_id,
            household_role: user.household_role,
            is_verified: user.is_verified,
            phone: user.phone,
            avatar_url: user.avatar_url,
            currency: user.currency,
            notify_email: user.notify_email,
            notify_whatsapp: user.notify_whatsapp,
            last_login_at: user.last_login_at,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    /// Join this household once the email is verified
    pub invite_code: Option<String>,
    /// Name for the household created on verification
    pub household_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserResponse,
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub avatar_url: Option<String>,
    pub currency: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPreferences {
    pub notify_email: bool,
    pub notify_whatsapp: bool,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateNotificationPreferences {
    pub notify_email: Option<bool>,
    pub notify_whatsapp: Option<bool>,
    pub phone: Option<String>,
}

/// Admin user listing; `search` matches name or email
#[derive(Debug, Default, Deserialize)]
pub struct AdminUserQuery {
    pub search: Option<String>,
    pub role: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRoleRequest {
    pub role: String,
}

pub async fn find_user_by_id(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await
}

/// Emails are stored lowercased, so lookups normalize the same way
pub async fn find_user_by_email(
    conn: &mut SqliteConnection,
    email: &str,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
        .bind(email.trim().to_lowercase())
        .fetch_optional(conn)
        .await
}

/// Promote an existing account to site admin. Returns false if no such user.
pub async fn promote_to_admin(
    conn: &mut SqliteConnection,
    email: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE users SET role = 'admin', updated_at = ? WHERE email = ?")
        .bind(crate::db::now())
        .bind(email.trim().to_lowercase())
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}
