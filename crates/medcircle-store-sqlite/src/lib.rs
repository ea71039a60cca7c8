//! SQLite implementation of [`medcircle_storage::Store`].
//!
//! Roster sets live on the `groups` row (JSON arrays of user-id strings)
//! next to the `version` column, so the optimistic check in each `commit_*`
//! covers every set at once. Per-member detail lives in `members` rows.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use uuid::Uuid;

use medcircle_storage::{
    AccessSession, CreateGroupParams, CreateJoinRequestParams, DeviceId, Group, GroupId,
    JoinRequest, JoinRequestId, JoinRequestStatus, Member, MemberRole, NewMemberParams,
    Permission, Store, StoreError, UserId, UserProfile,
};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// `~/.medcircle/store.db` (creates dir with 0700 perms on unix)
    pub async fn open_default() -> Result<Self, StoreError> {
        let dir = dirs::home_dir()
            .ok_or_else(|| StoreError::Backend("no home dir".into()))?
            .join(".medcircle");
        std::fs::create_dir_all(&dir).map_err(backend)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))
                .map_err(backend)?;
        }
        let path = dir.join("store.db");
        let url = format!("sqlite://{}?mode=rwc", path.to_string_lossy());
        Self::open(&url).await
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        Self::open("sqlite::memory:").await
    }

    pub async fn open(url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await
            .map_err(backend)?;

        MIGRATOR.run(&pool).await.map_err(backend)?;

        Ok(Self { pool })
    }
}

// ─────────────────────────── Row mapping helpers ──────────────────────────

fn backend(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn unique_or_backend(e: sqlx::Error) -> StoreError {
    let s = e.to_string();
    if s.contains("UNIQUE") {
        StoreError::AlreadyExists
    } else {
        StoreError::Backend(s)
    }
}

fn from_ts(secs: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| StoreError::Backend(format!("invalid timestamp: {secs}")))
}

fn encode_ids(ids: &[UserId]) -> Result<String, StoreError> {
    let strs: Vec<String> = ids.iter().map(|u| u.0.to_string()).collect();
    serde_json::to_string(&strs).map_err(backend)
}

fn decode_ids(raw: &str) -> Result<Vec<UserId>, StoreError> {
    let strs: Vec<String> = serde_json::from_str(raw).map_err(backend)?;
    strs.iter()
        .map(|s| Uuid::try_parse(s).map(UserId).map_err(backend))
        .collect()
}

const GROUP_COLS: &str = "id,name,invite_code,created_by,admin_ids,member_ids,\
                          write_permission_ids,trial_end_date,has_active_subscription,\
                          version,created_at,updated_at";

type GroupRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    i64,
    bool,
    i64,
    i64,
    i64,
);

fn row_to_group(r: GroupRow) -> Result<Group, StoreError> {
    let (id, name, invite_code, created_by, admins, members, writers, trial_end, sub, version, created_at, updated_at) =
        r;
    Ok(Group {
        id: GroupId(Uuid::try_parse(&id).map_err(backend)?),
        name,
        invite_code,
        created_by: UserId(Uuid::try_parse(&created_by).map_err(backend)?),
        admin_ids: decode_ids(&admins)?,
        member_ids: decode_ids(&members)?,
        write_permission_ids: decode_ids(&writers)?,
        trial_end_date: from_ts(trial_end)?,
        has_active_subscription: sub,
        version,
        created_at: from_ts(created_at)?,
        updated_at: from_ts(updated_at)?,
    })
}

const MEMBER_COLS: &str = "group_id,user_id,role,permission,display_name,is_access_enabled,joined_at";

type MemberRow = (String, String, String, String, String, bool, i64);

fn row_to_member(r: MemberRow) -> Result<Member, StoreError> {
    let (group_id, user_id, role, permission, display_name, enabled, joined_at) = r;
    Ok(Member {
        group_id: GroupId(Uuid::try_parse(&group_id).map_err(backend)?),
        user_id: UserId(Uuid::try_parse(&user_id).map_err(backend)?),
        role: role.parse::<MemberRole>().map_err(backend)?,
        permission: permission.parse::<Permission>().map_err(backend)?,
        display_name,
        is_access_enabled: enabled,
        joined_at: from_ts(joined_at)?,
    })
}

const REQUEST_COLS: &str = "id,group_id,user_id,user_name,status,requested_at";

type RequestRow = (String, String, String, String, String, i64);

fn row_to_request(r: RequestRow) -> Result<JoinRequest, StoreError> {
    let (id, group_id, user_id, user_name, status, requested_at) = r;
    Ok(JoinRequest {
        id: JoinRequestId(Uuid::try_parse(&id).map_err(backend)?),
        group_id: GroupId(Uuid::try_parse(&group_id).map_err(backend)?),
        user_id: UserId(Uuid::try_parse(&user_id).map_err(backend)?),
        user_name,
        status: status.parse::<JoinRequestStatus>().map_err(backend)?,
        requested_at: from_ts(requested_at)?,
    })
}

type ProfileRow = (String, bool, Option<i64>, Option<i64>, i64, i64, i64);

fn row_to_profile(r: ProfileRow) -> Result<UserProfile, StoreError> {
    let (user_id, can_create, cooldown, last_transition, count, created_at, updated_at) = r;
    Ok(UserProfile {
        user_id: UserId(Uuid::try_parse(&user_id).map_err(backend)?),
        can_create_group: can_create,
        cooldown_end_date: cooldown.map(from_ts).transpose()?,
        last_transition_at: last_transition.map(from_ts).transpose()?,
        transition_count: count as i32,
        created_at: from_ts(created_at)?,
        updated_at: from_ts(updated_at)?,
    })
}

async fn fetch_group<'e, E>(exec: E, group_id: &GroupId) -> Result<Option<Group>, StoreError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let sql = format!("SELECT {GROUP_COLS} FROM groups WHERE id=?");
    let row = sqlx::query_as::<_, GroupRow>(&sql)
        .bind(group_id.0.to_string())
        .fetch_optional(exec)
        .await
        .map_err(backend)?;
    row.map(row_to_group).transpose()
}

async fn update_roster(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    group_id: &GroupId,
    admin_ids: &[UserId],
    member_ids: &[UserId],
    write_ids: &[UserId],
) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE groups SET admin_ids=?,member_ids=?,write_permission_ids=?,
                version=version+1,updated_at=? WHERE id=?",
    )
    .bind(encode_ids(admin_ids)?)
    .bind(encode_ids(member_ids)?)
    .bind(encode_ids(write_ids)?)
    .bind(Utc::now().timestamp())
    .bind(group_id.0.to_string())
    .execute(&mut **tx)
    .await
    .map_err(backend)?;
    Ok(())
}

async fn insert_member(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    group_id: &GroupId,
    member: &NewMemberParams,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO members(group_id,user_id,role,permission,display_name,is_access_enabled,joined_at)
         VALUES(?,?,?,?,?,?,?)",
    )
    .bind(group_id.0.to_string())
    .bind(member.user_id.0.to_string())
    .bind(member.role.as_str())
    .bind(member.permission.as_str())
    .bind(&member.display_name)
    .bind(true)
    .bind(Utc::now().timestamp())
    .execute(&mut **tx)
    .await
    .map_err(backend)?;
    Ok(())
}

#[async_trait::async_trait]
impl Store for SqliteStore {
    // ───────────────────────────────── Groups ─────────────────────────────

    async fn create_group(&self, p: &CreateGroupParams) -> Result<GroupId, StoreError> {
        let group_id = GroupId(Uuid::now_v7());
        let now = Utc::now().timestamp();
        let creator_set = encode_ids(std::slice::from_ref(&p.created_by))?;

        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query(
            "INSERT INTO groups(id,name,invite_code,created_by,admin_ids,member_ids,
                                write_permission_ids,trial_end_date,has_active_subscription,
                                version,created_at,updated_at)
             VALUES(?,?,?,?,?,?,?,?,?,?,?,?)",
        )
        .bind(group_id.0.to_string())
        .bind(&p.name)
        .bind(&p.invite_code)
        .bind(p.created_by.0.to_string())
        .bind(&creator_set)
        .bind(&creator_set)
        .bind(&creator_set)
        .bind(p.trial_end_date.timestamp())
        .bind(false)
        .bind(1i64)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(unique_or_backend)?;

        let creator = NewMemberParams {
            user_id: p.created_by.clone(),
            display_name: p.creator_display_name.clone(),
            role: MemberRole::Admin,
            permission: Permission::Write,
        };
        insert_member(&mut tx, &group_id, &creator).await?;

        tx.commit().await.map_err(backend)?;
        Ok(group_id)
    }

    async fn get_group(&self, group_id: &GroupId) -> Result<Group, StoreError> {
        fetch_group(&self.pool, group_id)
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn get_group_by_invite_code(&self, code: &str) -> Result<Group, StoreError> {
        let sql = format!("SELECT {GROUP_COLS} FROM groups WHERE invite_code=?");
        let row = sqlx::query_as::<_, GroupRow>(&sql)
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(row_to_group).transpose()?.ok_or(StoreError::NotFound)
    }

    async fn find_group_created_by(
        &self,
        user_id: &UserId,
    ) -> Result<Option<Group>, StoreError> {
        let sql = format!("SELECT {GROUP_COLS} FROM groups WHERE created_by=? LIMIT 1");
        let row = sqlx::query_as::<_, GroupRow>(&sql)
            .bind(user_id.0.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(row_to_group).transpose()
    }

    async fn list_groups_for_member(&self, user_id: &UserId) -> Result<Vec<Group>, StoreError> {
        let sql = format!(
            "SELECT {} FROM groups g JOIN members m ON m.group_id=g.id WHERE m.user_id=?",
            GROUP_COLS
                .split(',')
                .map(|c| format!("g.{}", c.trim()))
                .collect::<Vec<_>>()
                .join(",")
        );
        let rows = sqlx::query_as::<_, GroupRow>(&sql)
            .bind(user_id.0.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.into_iter().map(row_to_group).collect()
    }

    async fn rename_group(&self, group_id: &GroupId, name: &str) -> Result<(), StoreError> {
        let res = sqlx::query("UPDATE groups SET name=?,updated_at=? WHERE id=?")
            .bind(name)
            .bind(Utc::now().timestamp())
            .bind(group_id.0.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn set_subscription(&self, group_id: &GroupId, active: bool) -> Result<(), StoreError> {
        let res = sqlx::query("UPDATE groups SET has_active_subscription=?,updated_at=? WHERE id=?")
            .bind(active)
            .bind(Utc::now().timestamp())
            .bind(group_id.0.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete_group(&self, group_id: &GroupId) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let id = group_id.0.to_string();

        sqlx::query("DELETE FROM members WHERE group_id=?")
            .bind(&id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        sqlx::query("DELETE FROM join_requests WHERE group_id=?")
            .bind(&id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        let res = sqlx::query("DELETE FROM groups WHERE id=?")
            .bind(&id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    // ───────────────────── Roster commits (transactional) ─────────────────

    async fn commit_join(
        &self,
        group_id: &GroupId,
        expected_version: i64,
        member: &NewMemberParams,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let group = fetch_group(&mut *tx, group_id)
            .await?
            .ok_or(StoreError::NotFound)?;
        if group.version != expected_version {
            return Err(StoreError::Conflict);
        }
        // the caller's precondition may have raced another writer
        if group.is_full() || group.is_member(&member.user_id) {
            return Err(StoreError::Conflict);
        }

        let mut member_ids = group.member_ids.clone();
        member_ids.push(member.user_id.clone());
        update_roster(
            &mut tx,
            group_id,
            &group.admin_ids,
            &member_ids,
            &group.write_permission_ids,
        )
        .await?;
        insert_member(&mut tx, group_id, member).await?;

        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn commit_approval(
        &self,
        group_id: &GroupId,
        expected_version: i64,
        request_id: &JoinRequestId,
        member: &NewMemberParams,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let res = sqlx::query("UPDATE join_requests SET status='approved' WHERE id=? AND status='pending'")
            .bind(request_id.0.to_string())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        if res.rows_affected() == 0 {
            return Err(StoreError::Conflict);
        }

        let group = fetch_group(&mut *tx, group_id)
            .await?
            .ok_or(StoreError::NotFound)?;
        if group.version != expected_version {
            return Err(StoreError::Conflict);
        }
        if group.is_full() || group.is_member(&member.user_id) {
            return Err(StoreError::Conflict);
        }

        let mut member_ids = group.member_ids.clone();
        member_ids.push(member.user_id.clone());
        update_roster(
            &mut tx,
            group_id,
            &group.admin_ids,
            &member_ids,
            &group.write_permission_ids,
        )
        .await?;
        insert_member(&mut tx, group_id, member).await?;

        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn commit_leave(
        &self,
        group_id: &GroupId,
        expected_version: i64,
        user_id: &UserId,
        cooldown_end: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let group = fetch_group(&mut *tx, group_id)
            .await?
            .ok_or(StoreError::NotFound)?;
        if group.version != expected_version {
            return Err(StoreError::Conflict);
        }
        if !group.is_member(user_id) {
            return Err(StoreError::Conflict);
        }

        let admin_ids: Vec<UserId> = group
            .admin_ids
            .iter()
            .filter(|u| *u != user_id)
            .cloned()
            .collect();
        let member_ids: Vec<UserId> = group
            .member_ids
            .iter()
            .filter(|u| *u != user_id)
            .cloned()
            .collect();
        let write_ids: Vec<UserId> = group
            .write_permission_ids
            .iter()
            .filter(|u| *u != user_id)
            .cloned()
            .collect();
        update_roster(&mut tx, group_id, &admin_ids, &member_ids, &write_ids).await?;

        sqlx::query("DELETE FROM members WHERE group_id=? AND user_id=?")
            .bind(group_id.0.to_string())
            .bind(user_id.0.to_string())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        let now = Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO profiles(user_id,can_create_group,cooldown_end_date,transition_count,created_at,updated_at)
             VALUES(?,0,?,0,?,?)
             ON CONFLICT(user_id)
             DO UPDATE SET can_create_group=0,
                           cooldown_end_date=excluded.cooldown_end_date,
                           updated_at=excluded.updated_at",
        )
        .bind(user_id.0.to_string())
        .bind(cooldown_end.timestamp())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn commit_promotion(
        &self,
        group_id: &GroupId,
        expected_version: i64,
        user_id: &UserId,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let group = fetch_group(&mut *tx, group_id)
            .await?
            .ok_or(StoreError::NotFound)?;
        if group.version != expected_version {
            return Err(StoreError::Conflict);
        }
        if !group.is_member(user_id) || group.is_admin(user_id) {
            return Err(StoreError::Conflict);
        }

        let mut admin_ids = group.admin_ids.clone();
        admin_ids.push(user_id.clone());
        let mut write_ids = group.write_permission_ids.clone();
        if !write_ids.contains(user_id) {
            write_ids.push(user_id.clone());
        }
        update_roster(&mut tx, group_id, &admin_ids, &group.member_ids, &write_ids).await?;

        sqlx::query("UPDATE members SET role=?,permission=? WHERE group_id=? AND user_id=?")
            .bind(MemberRole::Admin.as_str())
            .bind(Permission::Write.as_str())
            .bind(group_id.0.to_string())
            .bind(user_id.0.to_string())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    // ──────────────────────────────── Members ─────────────────────────────

    async fn get_member(
        &self,
        group_id: &GroupId,
        user_id: &UserId,
    ) -> Result<Member, StoreError> {
        let sql = format!("SELECT {MEMBER_COLS} FROM members WHERE group_id=? AND user_id=?");
        let row = sqlx::query_as::<_, MemberRow>(&sql)
            .bind(group_id.0.to_string())
            .bind(user_id.0.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(row_to_member).transpose()?.ok_or(StoreError::NotFound)
    }

    async fn list_members(&self, group_id: &GroupId) -> Result<Vec<Member>, StoreError> {
        let sql = format!("SELECT {MEMBER_COLS} FROM members WHERE group_id=? ORDER BY joined_at");
        let rows = sqlx::query_as::<_, MemberRow>(&sql)
            .bind(group_id.0.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.into_iter().map(row_to_member).collect()
    }

    async fn set_member_access(
        &self,
        group_id: &GroupId,
        user_id: &UserId,
        enabled: bool,
    ) -> Result<(), StoreError> {
        let res = sqlx::query("UPDATE members SET is_access_enabled=? WHERE group_id=? AND user_id=?")
            .bind(enabled)
            .bind(group_id.0.to_string())
            .bind(user_id.0.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // ───────────────────────────── Join requests ──────────────────────────

    async fn create_join_request(
        &self,
        p: &CreateJoinRequestParams,
    ) -> Result<JoinRequestId, StoreError> {
        let id = JoinRequestId(Uuid::now_v7());
        sqlx::query(
            "INSERT INTO join_requests(id,group_id,user_id,user_name,status,requested_at)
             VALUES(?,?,?,?,?,?)",
        )
        .bind(id.0.to_string())
        .bind(p.group_id.0.to_string())
        .bind(p.user_id.0.to_string())
        .bind(&p.user_name)
        .bind(JoinRequestStatus::Pending.as_str())
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(unique_or_backend)?;
        Ok(id)
    }

    async fn get_join_request(&self, id: &JoinRequestId) -> Result<JoinRequest, StoreError> {
        let sql = format!("SELECT {REQUEST_COLS} FROM join_requests WHERE id=?");
        let row = sqlx::query_as::<_, RequestRow>(&sql)
            .bind(id.0.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(row_to_request).transpose()?.ok_or(StoreError::NotFound)
    }

    async fn list_join_requests(
        &self,
        group_id: &GroupId,
        status: Option<JoinRequestStatus>,
    ) -> Result<Vec<JoinRequest>, StoreError> {
        let rows = match status {
            Some(s) => {
                let sql = format!(
                    "SELECT {REQUEST_COLS} FROM join_requests WHERE group_id=? AND status=? ORDER BY requested_at"
                );
                sqlx::query_as::<_, RequestRow>(&sql)
                    .bind(group_id.0.to_string())
                    .bind(s.as_str())
                    .fetch_all(&self.pool)
                    .await
                    .map_err(backend)?
            }
            None => {
                let sql = format!(
                    "SELECT {REQUEST_COLS} FROM join_requests WHERE group_id=? ORDER BY requested_at"
                );
                sqlx::query_as::<_, RequestRow>(&sql)
                    .bind(group_id.0.to_string())
                    .fetch_all(&self.pool)
                    .await
                    .map_err(backend)?
            }
        };
        rows.into_iter().map(row_to_request).collect()
    }

    async fn resolve_join_request(
        &self,
        id: &JoinRequestId,
        status: JoinRequestStatus,
    ) -> Result<(), StoreError> {
        let res = sqlx::query("UPDATE join_requests SET status=? WHERE id=? AND status='pending'")
            .bind(status.as_str())
            .bind(id.0.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if res.rows_affected() == 0 {
            let exists: Option<(String,)> =
                sqlx::query_as("SELECT id FROM join_requests WHERE id=?")
                    .bind(id.0.to_string())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(backend)?;
            return Err(if exists.is_some() {
                StoreError::Conflict
            } else {
                StoreError::NotFound
            });
        }
        Ok(())
    }

    // ──────────────────────────────── Profiles ────────────────────────────

    async fn get_or_create_profile(&self, user_id: &UserId) -> Result<UserProfile, StoreError> {
        let now = Utc::now().timestamp();
        sqlx::query(
            "INSERT OR IGNORE INTO profiles(user_id,can_create_group,transition_count,created_at,updated_at)
             VALUES(?,1,0,?,?)",
        )
        .bind(user_id.0.to_string())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        self.get_profile(user_id).await
    }

    async fn get_profile(&self, user_id: &UserId) -> Result<UserProfile, StoreError> {
        let row = sqlx::query_as::<_, ProfileRow>(
            "SELECT user_id,can_create_group,cooldown_end_date,last_transition_at,
                    transition_count,created_at,updated_at
             FROM profiles WHERE user_id=?",
        )
        .bind(user_id.0.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(row_to_profile).transpose()?.ok_or(StoreError::NotFound)
    }

    async fn restore_create_permission(&self, user_id: &UserId) -> Result<(), StoreError> {
        let res = sqlx::query(
            "UPDATE profiles SET can_create_group=1,cooldown_end_date=NULL,updated_at=?
             WHERE user_id=?",
        )
        .bind(Utc::now().timestamp())
        .bind(user_id.0.to_string())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn increment_transition(
        &self,
        user_id: &UserId,
        at: DateTime<Utc>,
        limit: i32,
    ) -> Result<i32, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let now = Utc::now().timestamp();

        sqlx::query(
            "INSERT OR IGNORE INTO profiles(user_id,can_create_group,transition_count,created_at,updated_at)
             VALUES(?,1,0,?,?)",
        )
        .bind(user_id.0.to_string())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        let (count,): (i64,) =
            sqlx::query_as("SELECT transition_count FROM profiles WHERE user_id=?")
                .bind(user_id.0.to_string())
                .fetch_one(&mut *tx)
                .await
                .map_err(backend)?;
        if count >= limit as i64 {
            return Err(StoreError::Conflict);
        }

        sqlx::query(
            "UPDATE profiles SET transition_count=?,last_transition_at=?,updated_at=?
             WHERE user_id=?",
        )
        .bind(count + 1)
        .bind(at.timestamp())
        .bind(now)
        .bind(user_id.0.to_string())
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok((count + 1) as i32)
    }

    // ───────────────────────────── Access sessions ────────────────────────

    async fn get_access_session(
        &self,
        device_id: &DeviceId,
        date: NaiveDate,
    ) -> Result<Option<AccessSession>, StoreError> {
        let row: Option<(String, bool)> = sqlx::query_as(
            "SELECT access_date,used FROM access_sessions WHERE device_id=? AND access_date=?",
        )
        .bind(&device_id.0)
        .bind(date.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        match row {
            None => Ok(None),
            Some((raw_date, used)) => Ok(Some(AccessSession {
                device_id: device_id.clone(),
                access_date: raw_date.parse::<NaiveDate>().map_err(backend)?,
                used,
            })),
        }
    }

    async fn mark_access_used(
        &self,
        device_id: &DeviceId,
        date: NaiveDate,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO access_sessions(device_id,access_date,used) VALUES(?,?,1)
             ON CONFLICT(device_id,access_date) DO UPDATE SET used=1",
        )
        .bind(&device_id.0)
        .bind(date.to_string())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn store() -> SqliteStore {
        SqliteStore::open_in_memory().await.unwrap()
    }

    fn params(code: &str) -> CreateGroupParams {
        CreateGroupParams {
            name: "Family".to_string(),
            invite_code: code.to_string(),
            created_by: UserId(Uuid::new_v4()),
            creator_display_name: "Alice".to_string(),
            trial_end_date: Utc::now() + Duration::days(14),
        }
    }

    #[tokio::test]
    async fn create_and_get_group() {
        let s = store().await;
        let p = params("ABC123");
        let id = s.create_group(&p).await.unwrap();

        let g = s.get_group(&id).await.unwrap();
        assert_eq!(g.name, "Family");
        assert_eq!(g.invite_code, "ABC123");
        assert_eq!(g.created_by, p.created_by);
        assert_eq!(g.member_ids, vec![p.created_by.clone()]);
        assert_eq!(g.admin_ids, vec![p.created_by.clone()]);
        assert_eq!(g.write_permission_ids, vec![p.created_by.clone()]);
        assert_eq!(g.version, 1);
        assert!(!g.has_active_subscription);
        assert_eq!(g.trial_end_date.timestamp(), p.trial_end_date.timestamp());

        let m = s.get_member(&id, &p.created_by).await.unwrap();
        assert_eq!(m.role, MemberRole::Admin);
        assert_eq!(m.permission, Permission::Write);
        assert_eq!(m.display_name, "Alice");
        assert!(m.is_access_enabled);
    }

    #[tokio::test]
    async fn duplicate_invite_code_rejected() {
        let s = store().await;
        s.create_group(&params("ABC123")).await.unwrap();
        let err = s.create_group(&params("ABC123")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists));
    }

    #[tokio::test]
    async fn invite_code_resolution_and_delete() {
        let s = store().await;
        let id = s.create_group(&params("X7K2QP")).await.unwrap();

        let g = s.get_group_by_invite_code("X7K2QP").await.unwrap();
        assert_eq!(g.id, id);

        s.delete_group(&id).await.unwrap();
        assert!(matches!(
            s.get_group_by_invite_code("X7K2QP").await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(s.get_group(&id).await, Err(StoreError::NotFound)));

        // the code becomes available again
        s.create_group(&params("X7K2QP")).await.unwrap();
    }

    #[tokio::test]
    async fn find_group_created_by_owner_only() {
        let s = store().await;
        let p = params("ABC123");
        let id = s.create_group(&p).await.unwrap();

        let found = s.find_group_created_by(&p.created_by).await.unwrap();
        assert_eq!(found.unwrap().id, id);

        let stranger = UserId(Uuid::new_v4());
        assert!(s.find_group_created_by(&stranger).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn commit_join_adds_member_and_bumps_version() {
        let s = store().await;
        let id = s.create_group(&params("ABC123")).await.unwrap();
        let bob = UserId(Uuid::new_v4());

        s.commit_join(&id, 1, &NewMemberParams::joiner(bob.clone(), "Bob"))
            .await
            .unwrap();

        let g = s.get_group(&id).await.unwrap();
        assert_eq!(g.version, 2);
        assert!(g.is_member(&bob));
        assert!(!g.is_admin(&bob));
        assert!(!g.can_write(&bob));

        let m = s.get_member(&id, &bob).await.unwrap();
        assert_eq!(m.role, MemberRole::Member);
        assert_eq!(m.permission, Permission::Read);
    }

    #[tokio::test]
    async fn commit_join_stale_version_conflicts() {
        let s = store().await;
        let id = s.create_group(&params("ABC123")).await.unwrap();
        let bob = UserId(Uuid::new_v4());
        s.commit_join(&id, 1, &NewMemberParams::joiner(bob, "Bob"))
            .await
            .unwrap();

        // version moved to 2; a writer still holding 1 must fail
        let carol = UserId(Uuid::new_v4());
        let err = s
            .commit_join(&id, 1, &NewMemberParams::joiner(carol, "Carol"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
    }

    #[tokio::test]
    async fn commit_join_full_group_conflicts() {
        let s = store().await;
        let id = s.create_group(&params("ABC123")).await.unwrap();
        s.commit_join(&id, 1, &NewMemberParams::joiner(UserId(Uuid::new_v4()), "Bob"))
            .await
            .unwrap();
        s.commit_join(&id, 2, &NewMemberParams::joiner(UserId(Uuid::new_v4()), "Carol"))
            .await
            .unwrap();

        // roster is at capacity; even a fresh version token fails
        let err = s
            .commit_join(&id, 3, &NewMemberParams::joiner(UserId(Uuid::new_v4()), "Dave"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
    }

    #[tokio::test]
    async fn commit_leave_removes_and_starts_cooldown() {
        let s = store().await;
        let id = s.create_group(&params("ABC123")).await.unwrap();
        let bob = UserId(Uuid::new_v4());
        s.commit_join(&id, 1, &NewMemberParams::joiner(bob.clone(), "Bob"))
            .await
            .unwrap();

        let cooldown_end = Utc::now() + Duration::days(30);
        s.commit_leave(&id, 2, &bob, cooldown_end).await.unwrap();

        let g = s.get_group(&id).await.unwrap();
        assert_eq!(g.version, 3);
        assert!(!g.is_member(&bob));
        assert!(matches!(s.get_member(&id, &bob).await, Err(StoreError::NotFound)));

        let profile = s.get_profile(&bob).await.unwrap();
        assert!(!profile.can_create_group);
        assert_eq!(
            profile.cooldown_end_date.unwrap().timestamp(),
            cooldown_end.timestamp()
        );
    }

    #[tokio::test]
    async fn commit_promotion_upgrades_member() {
        let s = store().await;
        let id = s.create_group(&params("ABC123")).await.unwrap();
        let bob = UserId(Uuid::new_v4());
        s.commit_join(&id, 1, &NewMemberParams::joiner(bob.clone(), "Bob"))
            .await
            .unwrap();

        s.commit_promotion(&id, 2, &bob).await.unwrap();

        let g = s.get_group(&id).await.unwrap();
        assert!(g.is_admin(&bob));
        assert!(g.can_write(&bob));
        let m = s.get_member(&id, &bob).await.unwrap();
        assert_eq!(m.role, MemberRole::Admin);
        assert_eq!(m.permission, Permission::Write);

        // promoting an admin again conflicts
        let err = s.commit_promotion(&id, 3, &bob).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
    }

    #[tokio::test]
    async fn join_request_lifecycle() {
        let s = store().await;
        let id = s.create_group(&params("ABC123")).await.unwrap();
        let bob = UserId(Uuid::new_v4());
        let req = CreateJoinRequestParams {
            group_id: id.clone(),
            user_id: bob.clone(),
            user_name: "Bob".to_string(),
        };

        let req_id = s.create_join_request(&req).await.unwrap();
        let r = s.get_join_request(&req_id).await.unwrap();
        assert_eq!(r.status, JoinRequestStatus::Pending);
        assert_eq!(r.user_id, bob);

        // second pending request for the same (user, group) rejected
        let err = s.create_join_request(&req).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists));

        s.resolve_join_request(&req_id, JoinRequestStatus::Denied)
            .await
            .unwrap();
        let r = s.get_join_request(&req_id).await.unwrap();
        assert_eq!(r.status, JoinRequestStatus::Denied);

        // resolving a non-pending request conflicts
        let err = s
            .resolve_join_request(&req_id, JoinRequestStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict));

        // a denied request does not block a fresh one
        s.create_join_request(&req).await.unwrap();
    }

    #[tokio::test]
    async fn resolve_missing_request_not_found() {
        let s = store().await;
        let err = s
            .resolve_join_request(&JoinRequestId(Uuid::new_v4()), JoinRequestStatus::Denied)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn commit_approval_approves_and_joins() {
        let s = store().await;
        let id = s.create_group(&params("ABC123")).await.unwrap();
        let bob = UserId(Uuid::new_v4());
        let req_id = s
            .create_join_request(&CreateJoinRequestParams {
                group_id: id.clone(),
                user_id: bob.clone(),
                user_name: "Bob".to_string(),
            })
            .await
            .unwrap();

        s.commit_approval(&id, 1, &req_id, &NewMemberParams::joiner(bob.clone(), "Bob"))
            .await
            .unwrap();

        let g = s.get_group(&id).await.unwrap();
        assert!(g.is_member(&bob));
        assert_eq!(g.version, 2);
        let r = s.get_join_request(&req_id).await.unwrap();
        assert_eq!(r.status, JoinRequestStatus::Approved);

        // already approved; a second approval conflicts
        let err = s
            .commit_approval(&id, 2, &req_id, &NewMemberParams::joiner(bob, "Bob"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
    }

    #[tokio::test]
    async fn approval_abort_leaves_request_pending() {
        let s = store().await;
        let id = s.create_group(&params("ABC123")).await.unwrap();
        let bob = UserId(Uuid::new_v4());
        let req_id = s
            .create_join_request(&CreateJoinRequestParams {
                group_id: id.clone(),
                user_id: bob.clone(),
                user_name: "Bob".to_string(),
            })
            .await
            .unwrap();

        // stale version: the whole transaction rolls back
        let err = s
            .commit_approval(&id, 99, &req_id, &NewMemberParams::joiner(bob.clone(), "Bob"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict));

        let r = s.get_join_request(&req_id).await.unwrap();
        assert_eq!(r.status, JoinRequestStatus::Pending);
        let g = s.get_group(&id).await.unwrap();
        assert!(!g.is_member(&bob));
    }

    #[tokio::test]
    async fn list_join_requests_filters_by_status() {
        let s = store().await;
        let id = s.create_group(&params("ABC123")).await.unwrap();
        for name in ["Bob", "Carol"] {
            s.create_join_request(&CreateJoinRequestParams {
                group_id: id.clone(),
                user_id: UserId(Uuid::new_v4()),
                user_name: name.to_string(),
            })
            .await
            .unwrap();
        }
        let all = s.list_join_requests(&id, None).await.unwrap();
        assert_eq!(all.len(), 2);

        s.resolve_join_request(&all[0].id, JoinRequestStatus::Denied)
            .await
            .unwrap();
        let pending = s
            .list_join_requests(&id, Some(JoinRequestStatus::Pending))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn profile_defaults_and_transition_limit() {
        let s = store().await;
        let bob = UserId(Uuid::new_v4());

        let p = s.get_or_create_profile(&bob).await.unwrap();
        assert!(p.can_create_group);
        assert!(p.cooldown_end_date.is_none());
        assert_eq!(p.transition_count, 0);

        let at = Utc::now();
        assert_eq!(s.increment_transition(&bob, at, 3).await.unwrap(), 1);
        assert_eq!(s.increment_transition(&bob, at, 3).await.unwrap(), 2);
        assert_eq!(s.increment_transition(&bob, at, 3).await.unwrap(), 3);
        let err = s.increment_transition(&bob, at, 3).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict));

        let p = s.get_profile(&bob).await.unwrap();
        assert_eq!(p.transition_count, 3);
        assert_eq!(p.last_transition_at.unwrap().timestamp(), at.timestamp());
    }

    #[tokio::test]
    async fn restore_create_permission_clears_cooldown() {
        let s = store().await;
        let id = s.create_group(&params("ABC123")).await.unwrap();
        let bob = UserId(Uuid::new_v4());
        s.commit_join(&id, 1, &NewMemberParams::joiner(bob.clone(), "Bob"))
            .await
            .unwrap();
        s.commit_leave(&id, 2, &bob, Utc::now() + Duration::days(30))
            .await
            .unwrap();

        s.restore_create_permission(&bob).await.unwrap();
        let p = s.get_profile(&bob).await.unwrap();
        assert!(p.can_create_group);
        assert!(p.cooldown_end_date.is_none());
    }

    #[tokio::test]
    async fn access_session_daily_quota() {
        let s = store().await;
        let device = DeviceId("device-abc".to_string());
        let today = Utc::now().date_naive();

        assert!(s.get_access_session(&device, today).await.unwrap().is_none());

        s.mark_access_used(&device, today).await.unwrap();
        let session = s.get_access_session(&device, today).await.unwrap().unwrap();
        assert!(session.used);
        assert_eq!(session.access_date, today);

        // idempotent
        s.mark_access_used(&device, today).await.unwrap();

        // a new day is a new row
        let tomorrow = today + Duration::days(1);
        assert!(s.get_access_session(&device, tomorrow).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_member_access_toggles() {
        let s = store().await;
        let p = params("ABC123");
        let id = s.create_group(&p).await.unwrap();

        s.set_member_access(&id, &p.created_by, false).await.unwrap();
        assert!(!s.get_member(&id, &p.created_by).await.unwrap().is_access_enabled);

        s.set_member_access(&id, &p.created_by, true).await.unwrap();
        assert!(s.get_member(&id, &p.created_by).await.unwrap().is_access_enabled);

        let err = s
            .set_member_access(&id, &UserId(Uuid::new_v4()), false)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn rename_and_subscription() {
        let s = store().await;
        let id = s.create_group(&params("ABC123")).await.unwrap();

        s.rename_group(&id, "New Name").await.unwrap();
        s.set_subscription(&id, true).await.unwrap();

        let g = s.get_group(&id).await.unwrap();
        assert_eq!(g.name, "New Name");
        assert!(g.has_active_subscription);

        let missing = GroupId(Uuid::new_v4());
        assert!(matches!(s.rename_group(&missing, "x").await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn list_groups_for_member() {
        let s = store().await;
        let bob = UserId(Uuid::new_v4());
        let id1 = s.create_group(&params("AAA111")).await.unwrap();
        let _id2 = s.create_group(&params("BBB222")).await.unwrap();
        s.commit_join(&id1, 1, &NewMemberParams::joiner(bob.clone(), "Bob"))
            .await
            .unwrap();

        let groups = s.list_groups_for_member(&bob).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].id, id1);

        let members = s.list_members(&id1).await.unwrap();
        assert_eq!(members.len(), 2);
    }
}
