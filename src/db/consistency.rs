//! Audit and repair of the links between users, households and members.
//!
//! A user's `household_id`/`household_role` duplicate the membership row, so
//! the two can drift (crashed requests, manual edits, older data). The checks
//! here find each class of drift and the repair fixes it in one transaction.

use serde::Serialize;
use sqlx::{FromRow, SqliteConnection};
use std::collections::HashSet;
use tracing::{info, warn};
use uuid::Uuid;

use super::{delete_household_cascade, now, DbPool};

/// A user whose household link does not match any membership row
#[derive(Debug, Clone, Serialize, FromRow, PartialEq, Eq)]
pub struct UnlinkedUser {
    pub user_id: String,
    pub household_id: String,
    pub household_role: Option<String>,
    /// False when the household itself no longer exists
    pub household_exists: bool,
    pub is_owner: bool,
}

/// A membership row that disagrees with its user
#[derive(Debug, Clone, Serialize, FromRow, PartialEq, Eq)]
pub struct StaleMember {
    pub member_id: String,
    pub household_id: String,
    pub user_id: String,
    pub role: String,
    /// The household the user actually points at, if the user exists
    pub user_household_id: Option<String>,
    pub user_exists: bool,
}

#[derive(Debug, Clone, Serialize, FromRow, PartialEq, Eq)]
pub struct OwnerlessHousehold {
    pub household_id: String,
    pub owner_id: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsistencyReport {
    /// Households whose owner account is gone
    pub orphaned_households: Vec<String>,
    pub unlinked_users: Vec<UnlinkedUser>,
    pub stale_members: Vec<StaleMember>,
    /// Households whose owner has no owner membership row
    pub ownerless_households: Vec<OwnerlessHousehold>,
}

impl ConsistencyReport {
    pub fn is_clean(&self) -> bool {
        self.issue_count() == 0
    }

    pub fn issue_count(&self) -> usize {
        self.orphaned_households.len()
            + self.unlinked_users.len()
            + self.stale_members.len()
            + self.ownerless_households.len()
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RepairSummary {
    pub households_deleted: usize,
    pub members_inserted: usize,
    pub members_deleted: usize,
    pub users_relinked: usize,
    pub users_cleared: usize,
    pub owners_reassigned: usize,
}

async fn orphaned_households(conn: &mut SqliteConnection) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT h.id FROM households h LEFT JOIN users u ON h.owner_id = u.id WHERE u.id IS NULL ORDER BY h.created_at",
    )
    .fetch_all(conn)
    .await
}

async fn unlinked_users(conn: &mut SqliteConnection) -> Result<Vec<UnlinkedUser>, sqlx::Error> {
    sqlx::query_as::<_, UnlinkedUser>(
        r#"
        SELECT u.id as user_id, u.household_id as household_id, u.household_role as household_role,
               (h.id IS NOT NULL) as household_exists,
               (h.owner_id IS NOT NULL AND h.owner_id = u.id) as is_owner
        FROM users u
        LEFT JOIN households h ON u.household_id = h.id
        LEFT JOIN household_members hm ON hm.household_id = u.household_id AND hm.user_id = u.id
        WHERE u.household_id IS NOT NULL AND hm.id IS NULL
        ORDER BY u.created_at
        "#,
    )
    .fetch_all(conn)
    .await
}

async fn stale_members(conn: &mut SqliteConnection) -> Result<Vec<StaleMember>, sqlx::Error> {
    sqlx::query_as::<_, StaleMember>(
        r#"
        SELECT hm.id as member_id, hm.household_id as household_id, hm.user_id as user_id,
               hm.role as role, u.household_id as user_household_id,
               (u.id IS NOT NULL) as user_exists
        FROM household_members hm
        LEFT JOIN users u ON hm.user_id = u.id
        WHERE u.id IS NULL OR u.household_id IS NULL OR u.household_id != hm.household_id
        ORDER BY hm.joined_at
        "#,
    )
    .fetch_all(conn)
    .await
}

async fn ownerless_households(
    conn: &mut SqliteConnection,
) -> Result<Vec<OwnerlessHousehold>, sqlx::Error> {
    sqlx::query_as::<_, OwnerlessHousehold>(
        r#"
        SELECT h.id as household_id, h.owner_id as owner_id
        FROM households h
        INNER JOIN users u ON h.owner_id = u.id
        LEFT JOIN household_members hm
            ON hm.household_id = h.id AND hm.user_id = h.owner_id AND hm.role = 'owner'
        WHERE hm.id IS NULL
        ORDER BY h.created_at
        "#,
    )
    .fetch_all(conn)
    .await
}

async fn collect(conn: &mut SqliteConnection) -> Result<ConsistencyReport, sqlx::Error> {
    Ok(ConsistencyReport {
        orphaned_households: orphaned_households(&mut *conn).await?,
        unlinked_users: unlinked_users(&mut *conn).await?,
        stale_members: stale_members(&mut *conn).await?,
        ownerless_households: ownerless_households(&mut *conn).await?,
    })
}

/// Read-only audit
pub async fn check_consistency(pool: &DbPool) -> Result<ConsistencyReport, sqlx::Error> {
    let mut conn = pool.acquire().await?;
    collect(&mut conn).await
}

async fn insert_member(
    conn: &mut SqliteConnection,
    household_id: &str,
    user_id: &str,
    role: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT OR IGNORE INTO household_members (id, household_id, user_id, role, joined_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(household_id)
    .bind(user_id)
    .bind(role)
    .bind(now())
    .execute(conn)
    .await?;
    Ok(())
}

async fn link_user(
    conn: &mut SqliteConnection,
    user_id: &str,
    household_id: Option<&str>,
    role: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE users SET household_id = ?, household_role = ?, updated_at = ? WHERE id = ?")
        .bind(household_id)
        .bind(role)
        .bind(now())
        .bind(user_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Member of `household_id` to take over ownership: admins first, then by join order
async fn successor(
    conn: &mut SqliteConnection,
    household_id: &str,
    owner_id: &str,
) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT hm.user_id
        FROM household_members hm
        INNER JOIN users u ON u.id = hm.user_id AND u.household_id = hm.household_id
        WHERE hm.household_id = ? AND hm.user_id != ?
        ORDER BY CASE hm.role WHEN 'admin' THEN 0 ELSE 1 END, hm.joined_at
        LIMIT 1
        "#,
    )
    .bind(household_id)
    .bind(owner_id)
    .fetch_optional(conn)
    .await
}

/// Fix every issue `check_consistency` reports.
///
/// Orphaned households are deleted with everything in them. Membership rows
/// win over user fields when the user has no household (earliest row first);
/// otherwise the user's link wins and the stray membership row is dropped.
/// A household whose owner now belongs elsewhere passes to its next admin or
/// member, and is deleted when nobody is left.
pub async fn repair_consistency(pool: &DbPool) -> Result<RepairSummary, sqlx::Error> {
    let mut summary = RepairSummary::default();

    // Deleting households runs its own transaction, so handle orphans first
    let orphans = {
        let mut conn = pool.acquire().await?;
        orphaned_households(&mut conn).await?
    };
    for household_id in &orphans {
        warn!(household_id = %household_id, "Deleting household with missing owner");
        delete_household_cascade(pool, household_id).await?;
        summary.households_deleted += 1;
    }

    let mut tx = pool.begin().await?;

    let mut relinked = HashSet::new();
    for member in stale_members(&mut tx).await? {
        match (&member.user_household_id, member.user_exists) {
            (None, true) if relinked.insert(member.user_id.clone()) => {
                link_user(&mut tx, &member.user_id, Some(&member.household_id), Some(&member.role))
                    .await?;
                summary.users_relinked += 1;
            }
            _ => {
                sqlx::query("DELETE FROM household_members WHERE id = ?")
                    .bind(&member.member_id)
                    .execute(&mut *tx)
                    .await?;
                summary.members_deleted += 1;
            }
        }
    }

    for user in unlinked_users(&mut tx).await? {
        if user.household_exists {
            let role = if user.is_owner {
                "owner".to_string()
            } else {
                user.household_role
                    .clone()
                    .filter(|r| r != "owner")
                    .unwrap_or_else(|| "member".to_string())
            };
            insert_member(&mut tx, &user.household_id, &user.user_id, &role).await?;
            link_user(&mut tx, &user.user_id, Some(&user.household_id), Some(&role)).await?;
            summary.members_inserted += 1;
        } else {
            link_user(&mut tx, &user.user_id, None, None).await?;
            summary.users_cleared += 1;
        }
    }

    let mut abandoned = Vec::new();
    for household in ownerless_households(&mut tx).await? {
        let owner_link: Option<String> =
            sqlx::query_scalar("SELECT household_id FROM users WHERE id = ?")
                .bind(&household.owner_id)
                .fetch_one(&mut *tx)
                .await?;

        if owner_link
            .as_deref()
            .is_some_and(|linked| linked != household.household_id)
        {
            // The owner belongs to another household now
            match successor(&mut tx, &household.household_id, &household.owner_id).await? {
                Some(user_id) => {
                    warn!(
                        household_id = %household.household_id,
                        new_owner = %user_id,
                        "Reassigning household whose owner moved away"
                    );
                    sqlx::query("UPDATE households SET owner_id = ?, updated_at = ? WHERE id = ?")
                        .bind(&user_id)
                        .bind(now())
                        .bind(&household.household_id)
                        .execute(&mut *tx)
                        .await?;
                    sqlx::query(
                        "UPDATE household_members SET role = 'owner' WHERE household_id = ? AND user_id = ?",
                    )
                    .bind(&household.household_id)
                    .bind(&user_id)
                    .execute(&mut *tx)
                    .await?;
                    link_user(&mut tx, &user_id, Some(&household.household_id), Some("owner"))
                        .await?;
                    summary.owners_reassigned += 1;
                }
                None => abandoned.push(household.household_id.clone()),
            }
            continue;
        }

        let existing: Option<(String,)> = sqlx::query_as(
            "SELECT id FROM household_members WHERE household_id = ? AND user_id = ?",
        )
        .bind(&household.household_id)
        .bind(&household.owner_id)
        .fetch_optional(&mut *tx)
        .await?;

        match existing {
            Some((member_id,)) => {
                sqlx::query("UPDATE household_members SET role = 'owner' WHERE id = ?")
                    .bind(&member_id)
                    .execute(&mut *tx)
                    .await?;
            }
            None => {
                insert_member(&mut tx, &household.household_id, &household.owner_id, "owner")
                    .await?;
                summary.members_inserted += 1;
            }
        }
        link_user(
            &mut tx,
            &household.owner_id,
            Some(&household.household_id),
            Some("owner"),
        )
        .await?;
    }

    tx.commit().await?;

    for household_id in &abandoned {
        warn!(household_id = %household_id, "Deleting household left without members");
        delete_household_cascade(pool, household_id).await?;
        summary.households_deleted += 1;
    }

    info!(
        households_deleted = summary.households_deleted,
        members_inserted = summary.members_inserted,
        members_deleted = summary.members_deleted,
        users_relinked = summary.users_relinked,
        users_cleared = summary.users_cleared,
        owners_reassigned = summary.owners_reassigned,
        "Consistency repair finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory;
    use crate::db::models::household::{Household, HouseholdRole};
    use crate::db::models::user::fixtures::{insert_user, reload};

    #[tokio::test]
    async fn test_clean_database_reports_nothing() {
        let pool = init_memory().await.unwrap();
        let owner = insert_user(&pool, "Ama", "ama@example.com").await;
        let kofi = insert_user(&pool, "Kofi", "kofi@example.com").await;
        let household = Household::create(&pool, &owner.id, "Home").await.unwrap();
        household
            .add_member(&pool, &kofi.id, HouseholdRole::Member)
            .await
            .unwrap();

        let report = check_consistency(&pool).await.unwrap();
        assert!(report.is_clean(), "{:?}", report);
    }

    #[tokio::test]
    async fn test_detects_and_repairs_drift() {
        let pool = init_memory().await.unwrap();
        let owner = insert_user(&pool, "Ama", "ama@example.com").await;
        let kofi = insert_user(&pool, "Kofi", "kofi@example.com").await;
        let esi = insert_user(&pool, "Esi", "esi@example.com").await;
        let household = Household::create(&pool, &owner.id, "Home").await.unwrap();
        household
            .add_member(&pool, &kofi.id, HouseholdRole::Member)
            .await
            .unwrap();

        // Kofi lost his user link, Esi points at the household without a member row
        sqlx::query("UPDATE users SET household_id = NULL, household_role = NULL WHERE id = ?")
            .bind(&kofi.id)
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("UPDATE users SET household_id = ?, household_role = 'member' WHERE id = ?")
            .bind(&household.id)
            .bind(&esi.id)
            .execute(&pool)
            .await
            .unwrap();
        // Owner membership row vanished
        sqlx::query("DELETE FROM household_members WHERE user_id = ?")
            .bind(&owner.id)
            .execute(&pool)
            .await
            .unwrap();
        // A household whose owner is gone
        let ghost_id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO households (id, name, owner_id, invite_code, created_at, updated_at) VALUES (?, 'Ghost', 'missing', 'GHOST234', ?, ?)",
        )
        .bind(&ghost_id)
        .bind(now())
        .bind(now())
        .execute(&pool)
        .await
        .unwrap();

        let report = check_consistency(&pool).await.unwrap();
        assert_eq!(report.orphaned_households, vec![ghost_id.clone()]);
        assert_eq!(report.stale_members.len(), 1);
        assert_eq!(report.stale_members[0].user_id, kofi.id);
        // Owner and Esi both point at the household without member rows
        assert_eq!(report.unlinked_users.len(), 2);
        assert_eq!(report.ownerless_households.len(), 1);

        let summary = repair_consistency(&pool).await.unwrap();
        assert_eq!(summary.households_deleted, 1);
        assert_eq!(summary.users_relinked, 1);
        assert_eq!(summary.members_inserted, 2);

        assert!(check_consistency(&pool).await.unwrap().is_clean());

        let kofi = reload(&pool, &kofi.id).await;
        assert_eq!(kofi.household_id.as_deref(), Some(household.id.as_str()));
        let owner = reload(&pool, &owner.id).await;
        assert_eq!(owner.household_role_enum(), Some(HouseholdRole::Owner));

        let mut conn = pool.acquire().await.unwrap();
        let members = Household::members(&mut conn, &household.id).await.unwrap();
        assert_eq!(members.len(), 3);
        assert_eq!(members[0].user_id, owner.id);
    }

    async fn raw_member(pool: &DbPool, household_id: &str, user_id: &str, role: &str, joined_at: &str) {
        sqlx::query(
            "INSERT INTO household_members (id, household_id, user_id, role, joined_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(household_id)
        .bind(user_id)
        .bind(role)
        .bind(joined_at)
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_owner_attached_elsewhere_without_members_deletes_household() {
        let pool = init_memory().await.unwrap();
        let owner = insert_user(&pool, "Ama", "ama@example.com").await;
        let home = Household::create(&pool, &owner.id, "Home").await.unwrap();

        // Second household recorded under Ama, with nobody in it
        let second = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO households (id, name, owner_id, invite_code, created_at, updated_at) VALUES (?, 'Cabin', ?, 'CABIN234', ?, ?)",
        )
        .bind(&second)
        .bind(&owner.id)
        .bind(now())
        .bind(now())
        .execute(&pool)
        .await
        .unwrap();

        let report = check_consistency(&pool).await.unwrap();
        assert_eq!(report.ownerless_households.len(), 1);

        let summary = repair_consistency(&pool).await.unwrap();
        assert_eq!(summary.households_deleted, 1);
        assert!(check_consistency(&pool).await.unwrap().is_clean());

        let owner = reload(&pool, &owner.id).await;
        assert_eq!(owner.household_id.as_deref(), Some(home.id.as_str()));
        let mut conn = pool.acquire().await.unwrap();
        assert!(Household::find(&mut conn, &second).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_owner_attached_elsewhere_hands_household_to_member() {
        let pool = init_memory().await.unwrap();
        let ama = insert_user(&pool, "Ama", "ama@example.com").await;
        let kofi = insert_user(&pool, "Kofi", "kofi@example.com").await;
        let esi = insert_user(&pool, "Esi", "esi@example.com").await;
        let home = Household::create(&pool, &ama.id, "Home").await.unwrap();
        let flat = Household::create(&pool, &kofi.id, "Flat").await.unwrap();
        flat.add_member(&pool, &esi.id, HouseholdRole::Member)
            .await
            .unwrap();

        // Kofi moved into Home but still owns Flat
        sqlx::query("UPDATE users SET household_id = ?, household_role = 'member' WHERE id = ?")
            .bind(&home.id)
            .bind(&kofi.id)
            .execute(&pool)
            .await
            .unwrap();
        raw_member(&pool, &home.id, &kofi.id, "member", &now()).await;

        let summary = repair_consistency(&pool).await.unwrap();
        assert_eq!(summary.owners_reassigned, 1);
        assert_eq!(summary.members_deleted, 1);
        let report = check_consistency(&pool).await.unwrap();
        assert!(report.is_clean(), "{:?}", report);

        let mut conn = pool.acquire().await.unwrap();
        let flat = Household::find(&mut conn, &flat.id).await.unwrap().unwrap();
        assert_eq!(flat.owner_id, esi.id);
        drop(conn);
        let esi = reload(&pool, &esi.id).await;
        assert_eq!(esi.household_role_enum(), Some(HouseholdRole::Owner));
    }

    #[tokio::test]
    async fn test_unlinked_user_with_two_rows_keeps_earliest() {
        let pool = init_memory().await.unwrap();
        let ama = insert_user(&pool, "Ama", "ama@example.com").await;
        let kofi = insert_user(&pool, "Kofi", "kofi@example.com").await;
        let esi = insert_user(&pool, "Esi", "esi@example.com").await;
        let home = Household::create(&pool, &ama.id, "Home").await.unwrap();
        let flat = Household::create(&pool, &kofi.id, "Flat").await.unwrap();

        raw_member(&pool, &flat.id, &esi.id, "member", "2020-01-02T00:00:00.000Z").await;
        raw_member(&pool, &home.id, &esi.id, "member", "2020-01-01T00:00:00.000Z").await;

        let summary = repair_consistency(&pool).await.unwrap();
        assert_eq!(summary.users_relinked, 1);
        assert_eq!(summary.members_deleted, 1);
        assert!(check_consistency(&pool).await.unwrap().is_clean());

        let esi = reload(&pool, &esi.id).await;
        assert_eq!(esi.household_id.as_deref(), Some(home.id.as_str()));
    }
}
