//! Households, their members and the roles members hold.

use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};
use uuid::Uuid;

use super::common::string_enum;
use crate::db::{now, DbPool};

/// Characters used in invite codes; 0/O and 1/I are left out so codes read unambiguously
const INVITE_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const INVITE_CODE_LENGTH: usize = 8;
const INVITE_CODE_ATTEMPTS: usize = 10;

string_enum! {
    /// Role of a member within a household
    pub enum HouseholdRole {
        /// Created the household; cannot leave or be changed
        Owner => "owner",
        /// Manages members, bills and contributions
        Admin => "admin",
        Member => "member",
    }
}

impl HouseholdRole {
    /// Owners and admins manage the household
    pub fn can_manage(&self) -> bool {
        matches!(self, HouseholdRole::Owner | HouseholdRole::Admin)
    }

    /// Admin and owner memberships are immutable; only plain members can be
    /// promoted or removed, and only by someone who manages the household.
    pub fn can_manage_member(&self, target: HouseholdRole) -> bool {
        self.can_manage() && target == HouseholdRole::Member
    }

    /// Roles that can be handed out through a role change
    pub fn is_assignable(&self) -> bool {
        !matches!(self, HouseholdRole::Owner)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Household {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub invite_code: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct HouseholdMember {
    pub id: String,
    pub household_id: String,
    pub user_id: String,
    pub role: String,
    pub joined_at: String,
}

impl HouseholdMember {
    pub fn role_enum(&self) -> HouseholdRole {
        self.role.parse().unwrap_or(HouseholdRole::Member)
    }
}

/// Member with user details
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct HouseholdMemberWithUser {
    pub id: String,
    pub household_id: String,
    pub user_id: String,
    pub role: String,
    pub joined_at: String,
    pub user_name: String,
    pub user_email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HouseholdDetail {
    #[serde(flatten)]
    pub household: Household,
    pub member_count: usize,
    pub members: Vec<HouseholdMemberWithUser>,
}

#[derive(Debug, Deserialize)]
pub struct CreateHouseholdRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateHouseholdRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct JoinHouseholdRequest {
    pub invite_code: String,
}

#[derive(Debug, Deserialize)]
pub struct InviteByEmailRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMemberRoleRequest {
    pub role: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MembershipError {
    #[error("User already belongs to a household")]
    AlreadyInHousehold,
    #[error("User not found")]
    UserNotFound,
    #[error("Could not generate a unique invite code")]
    InviteCodeExhausted,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Random 8-character invite code
pub fn generate_invite_code() -> String {
    let mut rng = rand::rng();
    (0..INVITE_CODE_LENGTH)
        .map(|_| INVITE_CODE_ALPHABET[rng.random_range(0..INVITE_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Normalize user input to the stored invite code form
pub fn normalize_invite_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Generate an invite code not used by any household
pub async fn unique_invite_code(conn: &mut SqliteConnection) -> Result<String, MembershipError> {
    for _ in 0..INVITE_CODE_ATTEMPTS {
        let code = generate_invite_code();
        let taken: Option<(String,)> = sqlx::query_as("SELECT id FROM households WHERE invite_code = ?")
            .bind(&code)
            .fetch_optional(&mut *conn)
            .await?;
        if taken.is_none() {
            return Ok(code);
        }
    }
    Err(MembershipError::InviteCodeExhausted)
}

impl Household {
    pub async fn find(conn: &mut SqliteConnection, id: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Household>("SELECT * FROM households WHERE id = ?")
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    pub async fn find_by_invite_code(
        conn: &mut SqliteConnection,
        code: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Household>("SELECT * FROM households WHERE invite_code = ?")
            .bind(normalize_invite_code(code))
            .fetch_optional(conn)
            .await
    }

    /// Create a household owned by `owner_id` and link the owner to it.
    pub async fn create(pool: &DbPool, owner_id: &str, name: &str) -> Result<Self, MembershipError> {
        let mut tx = pool.begin().await?;
        let household = Self::create_in(&mut tx, owner_id, name).await?;
        tx.commit().await?;

        tracing::info!(household_id = %household.id, owner_id = %owner_id, "Created household");
        Ok(household)
    }

    /// Create inside an existing transaction
    pub async fn create_in(
        conn: &mut SqliteConnection,
        owner_id: &str,
        name: &str,
    ) -> Result<Self, MembershipError> {
        let owner: Option<(Option<String>,)> =
            sqlx::query_as("SELECT household_id FROM users WHERE id = ?")
                .bind(owner_id)
                .fetch_optional(&mut *conn)
                .await?;
        match owner {
            None => return Err(MembershipError::UserNotFound),
            Some((Some(_),)) => return Err(MembershipError::AlreadyInHousehold),
            Some((None,)) => {}
        }

        let id = Uuid::new_v4().to_string();
        let timestamp = now();
        let invite_code = unique_invite_code(&mut *conn).await?;

        sqlx::query(
            r#"
            INSERT INTO households (id, name, owner_id, invite_code, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(name.trim())
        .bind(owner_id)
        .bind(&invite_code)
        .bind(&timestamp)
        .bind(&timestamp)
        .execute(&mut *conn)
        .await?;

        let household = Household {
            id,
            name: name.trim().to_string(),
            owner_id: owner_id.to_string(),
            invite_code,
            created_at: timestamp.clone(),
            updated_at: timestamp,
        };
        household
            .add_member_in(&mut *conn, owner_id, HouseholdRole::Owner)
            .await?;
        Ok(household)
    }

    /// Add a user to this household and point the user at it.
    pub async fn add_member(
        &self,
        pool: &DbPool,
        user_id: &str,
        role: HouseholdRole,
    ) -> Result<HouseholdMember, MembershipError> {
        let mut tx = pool.begin().await?;
        let member = self.add_member_in(&mut tx, user_id, role).await?;
        tx.commit().await?;
        Ok(member)
    }

    /// Add inside an existing transaction. Rejects users already linked to a
    /// household other than this one.
    pub async fn add_member_in(
        &self,
        conn: &mut SqliteConnection,
        user_id: &str,
        role: HouseholdRole,
    ) -> Result<HouseholdMember, MembershipError> {
        let user: Option<(Option<String>,)> =
            sqlx::query_as("SELECT household_id FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_optional(&mut *conn)
                .await?;
        match user {
            None => return Err(MembershipError::UserNotFound),
            Some((Some(existing),)) if existing != self.id => {
                return Err(MembershipError::AlreadyInHousehold)
            }
            _ => {}
        }

        let already: Option<HouseholdMember> = sqlx::query_as(
            "SELECT * FROM household_members WHERE household_id = ? AND user_id = ?",
        )
        .bind(&self.id)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;
        if already.is_some() {
            return Err(MembershipError::AlreadyInHousehold);
        }

        let member = HouseholdMember {
            id: Uuid::new_v4().to_string(),
            household_id: self.id.clone(),
            user_id: user_id.to_string(),
            role: role.to_string(),
            joined_at: now(),
        };

        sqlx::query(
            r#"
            INSERT INTO household_members (id, household_id, user_id, role, joined_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&member.id)
        .bind(&member.household_id)
        .bind(&member.user_id)
        .bind(&member.role)
        .bind(&member.joined_at)
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            "UPDATE users SET household_id = ?, household_role = ?, pending_invite_code = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(&self.id)
        .bind(&member.role)
        .bind(&member.joined_at)
        .bind(user_id)
        .execute(&mut *conn)
        .await?;

        Ok(member)
    }

    /// Members ordered by role then join date
    pub async fn members(
        conn: &mut SqliteConnection,
        household_id: &str,
    ) -> Result<Vec<HouseholdMemberWithUser>, sqlx::Error> {
        sqlx::query_as::<_, HouseholdMemberWithUser>(
            r#"
            SELECT hm.id, hm.household_id, hm.user_id, hm.role, hm.joined_at,
                   u.name as user_name, u.email as user_email
            FROM household_members hm
            INNER JOIN users u ON hm.user_id = u.id
            WHERE hm.household_id = ?
            ORDER BY
                CASE hm.role
                    WHEN 'owner' THEN 1
                    WHEN 'admin' THEN 2
                    ELSE 3
                END,
                hm.joined_at ASC
            "#,
        )
        .bind(household_id)
        .fetch_all(conn)
        .await
    }

    /// User ids of all members in join order
    pub async fn member_ids(
        conn: &mut SqliteConnection,
        household_id: &str,
    ) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT user_id FROM household_members WHERE household_id = ? ORDER BY joined_at ASC, id ASC",
        )
        .bind(household_id)
        .fetch_all(conn)
        .await
    }
}

pub async fn find_membership(
    conn: &mut SqliteConnection,
    household_id: &str,
    user_id: &str,
) -> Result<Option<HouseholdMember>, sqlx::Error> {
    sqlx::query_as::<_, HouseholdMember>(
        "SELECT * FROM household_members WHERE household_id = ? AND user_id = ?",
    )
    .bind(household_id)
    .bind(user_id)
    .fetch_optional(conn)
    .await
}

/// Remove a member and clear the user's household fields
pub async fn remove_member(
    pool: &DbPool,
    household_id: &str,
    user_id: &str,
) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let result = sqlx::query("DELETE FROM household_members WHERE household_id = ? AND user_id = ?")
        .bind(household_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        "UPDATE users SET household_id = NULL, household_role = NULL, updated_at = ? WHERE id = ? AND household_id = ?",
    )
    .bind(now())
    .bind(user_id)
    .bind(household_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(result.rows_affected() > 0)
}

/// Change a member's role on both the membership row and the user
pub async fn set_member_role(
    pool: &DbPool,
    household_id: &str,
    user_id: &str,
    role: HouseholdRole,
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE household_members SET role = ? WHERE household_id = ? AND user_id = ?")
        .bind(role.as_str())
        .bind(household_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE users SET household_role = ?, updated_at = ? WHERE id = ? AND household_id = ?")
        .bind(role.as_str())
        .bind(now())
        .bind(user_id)
        .bind(household_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await
}
