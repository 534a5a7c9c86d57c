use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use super::error::ApiError;
use super::validation::{validate_email, validate_invite_code, validate_name};
use super::MessageResponse;
use crate::db::{
    delete_household_cascade, find_membership, remove_member as remove_household_member,
    set_member_role, unique_invite_code, CreateHouseholdRequest, DbPool, Household,
    HouseholdDetail, HouseholdMemberWithUser, HouseholdRole, InviteByEmailRequest,
    JoinHouseholdRequest, UpdateHouseholdRequest, UpdateMemberRoleRequest, User,
};
use crate::notifications::{Notification, Recipient};
use crate::AppState;

/// The acting user's place in their household
#[derive(Debug, Clone)]
pub struct Membership {
    pub household_id: String,
    pub role: HouseholdRole,
}

impl Membership {
    pub fn can_manage(&self) -> bool {
        self.role.can_manage()
    }

    pub fn is_owner(&self) -> bool {
        self.role == HouseholdRole::Owner
    }
}

/// Require that the user belongs to a household
pub async fn require_household(pool: &DbPool, user: &User) -> Result<Membership, ApiError> {
    let household_id = user
        .household_id
        .as_deref()
        .ok_or_else(|| ApiError::not_found("You are not in a household"))?;

    let mut conn = pool.acquire().await?;
    let member = find_membership(&mut conn, household_id, &user.id)
        .await?
        .ok_or_else(|| ApiError::not_found("You are not in a household"))?;

    Ok(Membership {
        household_id: member.household_id.clone(),
        role: member.role_enum(),
    })
}

/// Require that the user has at least the specified role in their household
pub async fn require_household_role(
    pool: &DbPool,
    user: &User,
    required: HouseholdRole,
) -> Result<Membership, ApiError> {
    let membership = require_household(pool, user).await?;
    let allowed = match required {
        HouseholdRole::Owner => membership.is_owner(),
        HouseholdRole::Admin => membership.can_manage(),
        HouseholdRole::Member => true,
    };
    if !allowed {
        return Err(ApiError::forbidden(format!(
            "This action requires {} role or higher",
            required
        )));
    }
    Ok(membership)
}

async fn load_detail(pool: &DbPool, household_id: &str) -> Result<HouseholdDetail, ApiError> {
    let mut conn = pool.acquire().await?;
    let household = Household::find(&mut conn, household_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Household not found"))?;
    let members = Household::members(&mut conn, household_id).await?;
    Ok(HouseholdDetail {
        household,
        member_count: members.len(),
        members,
    })
}

pub async fn create_household(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(req): Json<CreateHouseholdRequest>,
) -> Result<(StatusCode, Json<HouseholdDetail>), ApiError> {
    validate_name(&req.name).map_err(|e| ApiError::validation_field("name", e))?;
    if user.household_id.is_some() {
        return Err(ApiError::conflict("You already belong to a household"));
    }

    let household = Household::create(&state.db, &user.id, &req.name).await?;
    let detail = load_detail(&state.db, &household.id).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

pub async fn get_household(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<HouseholdDetail>, ApiError> {
    let membership = require_household(&state.db, &user).await?;
    Ok(Json(load_detail(&state.db, &membership.household_id).await?))
}

pub async fn rename_household(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(req): Json<UpdateHouseholdRequest>,
) -> Result<Json<HouseholdDetail>, ApiError> {
    validate_name(&req.name).map_err(|e| ApiError::validation_field("name", e))?;
    let membership = require_household_role(&state.db, &user, HouseholdRole::Admin).await?;

    sqlx::query("UPDATE households SET name = ?, updated_at = ? WHERE id = ?")
        .bind(req.name.trim())
        .bind(crate::db::now())
        .bind(&membership.household_id)
        .execute(&state.db)
        .await?;

    Ok(Json(load_detail(&state.db, &membership.household_id).await?))
}

pub async fn join_household(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(req): Json<JoinHouseholdRequest>,
) -> Result<Json<HouseholdDetail>, ApiError> {
    validate_invite_code(&req.invite_code)
        .map_err(|e| ApiError::validation_field("invite_code", e))?;
    if user.household_id.is_some() {
        return Err(ApiError::conflict("You already belong to a household"));
    }

    let household = {
        let mut conn = state.db.acquire().await?;
        Household::find_by_invite_code(&mut conn, &req.invite_code)
            .await?
            .ok_or_else(|| ApiError::not_found("No household matches this invite code"))?
    };

    household
        .add_member(&state.db, &user.id, HouseholdRole::Member)
        .await?;

    tracing::info!(user_id = %user.id, household_id = %household.id, "User joined household");
    state.notifier.spawn_household(
        household.id.clone(),
        Some(user.id.clone()),
        Notification::MemberJoined {
            household_name: household.name.clone(),
            member_name: user.name.clone(),
        },
    );

    Ok(Json(load_detail(&state.db, &household.id).await?))
}

pub async fn regenerate_invite_code(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<HouseholdDetail>, ApiError> {
    let membership = require_household_role(&state.db, &user, HouseholdRole::Admin).await?;

    let mut conn = state.db.acquire().await?;
    let code = unique_invite_code(&mut conn).await?;
    sqlx::query("UPDATE households SET invite_code = ?, updated_at = ? WHERE id = ?")
        .bind(&code)
        .bind(crate::db::now())
        .bind(&membership.household_id)
        .execute(&mut *conn)
        .await?;
    drop(conn);

    tracing::info!(household_id = %membership.household_id, "Invite code regenerated");
    Ok(Json(load_detail(&state.db, &membership.household_id).await?))
}

pub async fn invite_member(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(req): Json<InviteByEmailRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    validate_email(&req.email).map_err(|e| ApiError::validation_field("email", e))?;
    let membership = require_household_role(&state.db, &user, HouseholdRole::Admin).await?;

    let household = {
        let mut conn = state.db.acquire().await?;
        Household::find(&mut conn, &membership.household_id)
            .await?
            .ok_or_else(|| ApiError::not_found("Household not found"))?
    };

    let email = req.email.trim().to_lowercase();
    let join_link = format!(
        "{}/join?code={}",
        state.config.server.frontend_url.trim_end_matches('/'),
        household.invite_code
    );
    state.notifier.spawn(
        vec![Recipient::address(&email)],
        Notification::HouseholdInvite {
            household_name: household.name.clone(),
            inviter_name: user.name.clone(),
            invite_code: household.invite_code.clone(),
            join_link,
        },
    );

    tracing::info!(household_id = %household.id, invited_by = %user.id, "Household invite sent");
    Ok(Json(MessageResponse::new(format!("Invitation sent to {}", email))))
}

pub async fn list_members(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<Vec<HouseholdMemberWithUser>>, ApiError> {
    let membership = require_household(&state.db, &user).await?;
    let mut conn = state.db.acquire().await?;
    let members = Household::members(&mut conn, &membership.household_id).await?;
    Ok(Json(members))
}

/// Role of `target_user_id` in the requester's household, checked against
/// what the requester may manage
async fn managed_target(
    state: &AppState,
    membership: &Membership,
    requester: &User,
    target_user_id: &str,
) -> Result<HouseholdRole, ApiError> {
    if target_user_id == requester.id {
        return Err(ApiError::bad_request("You cannot change your own membership here"));
    }

    let target = {
        let mut conn = state.db.acquire().await?;
        find_membership(&mut conn, &membership.household_id, target_user_id)
            .await?
            .ok_or_else(|| ApiError::not_found("Member not found"))?
    };

    let target_role = target.role_enum();
    if !membership.role.can_manage_member(target_role) {
        return Err(ApiError::forbidden(format!(
            "A household {} cannot be changed or removed",
            target_role
        )));
    }
    Ok(target_role)
}

pub async fn update_member_role(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(target_user_id): Path<String>,
    Json(req): Json<UpdateMemberRoleRequest>,
) -> Result<Json<Vec<HouseholdMemberWithUser>>, ApiError> {
    let role: HouseholdRole = req
        .role
        .parse()
        .map_err(|e: String| ApiError::validation_field("role", e))?;
    if !role.is_assignable() {
        return Err(ApiError::validation_field(
            "role",
            "Role must be member or admin",
        ));
    }

    let membership = require_household_role(&state.db, &user, HouseholdRole::Admin).await?;
    managed_target(&state, &membership, &user, &target_user_id).await?;

    set_member_role(&state.db, &membership.household_id, &target_user_id, role).await?;

    tracing::info!(
        household_id = %membership.household_id,
        target = %target_user_id,
        role = %role,
        "Member role updated"
    );

    let mut conn = state.db.acquire().await?;
    Ok(Json(
        Household::members(&mut conn, &membership.household_id).await?,
    ))
}

pub async fn remove_member(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(target_user_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let membership = require_household_role(&state.db, &user, HouseholdRole::Admin).await?;
    managed_target(&state, &membership, &user, &target_user_id).await?;

    remove_household_member(&state.db, &membership.household_id, &target_user_id).await?;

    tracing::info!(
        household_id = %membership.household_id,
        target = %target_user_id,
        removed_by = %user.id,
        "Member removed"
    );
    Ok(StatusCode::NO_CONTENT)
}

pub async fn leave_household(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<MessageResponse>, ApiError> {
    let membership = require_household(&state.db, &user).await?;
    if membership.is_owner() {
        return Err(ApiError::bad_request(
            "The owner cannot leave the household; delete it instead",
        ));
    }

    remove_household_member(&state.db, &membership.household_id, &user.id).await?;
    tracing::info!(user_id = %user.id, household_id = %membership.household_id, "User left household");
    Ok(Json(MessageResponse::new("You have left the household")))
}

pub async fn delete_household(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<StatusCode, ApiError> {
    let membership = require_household_role(&state.db, &user, HouseholdRole::Owner).await?;

    let summary = delete_household_cascade(&state.db, &membership.household_id).await?;
    tracing::info!(
        household_id = %membership.household_id,
        bills = summary.bills,
        expenses = summary.expenses,
        contributions = summary.contributions,
        "Household deleted"
    );
    Ok(StatusCode::NO_CONTENT)
}
