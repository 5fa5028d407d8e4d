//! PostgreSQL backend for the Database trait.
//!
//! A `deadpool-postgres` pool sized from `DATABASE_POOL_SIZE`. Schema lives in
//! `migrations/postgres` and is applied with refinery.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{GenericClient, Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use secrecy::ExposeSecret;
use tokio_postgres::types::ToSql;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::db::query::{LEAD_SELECT_FROM, Placeholder, SqlValue};
use crate::db::{
    ActivityKind, ActivityRecord, ActivityStore, CreateFollowUpParams, CreateUserParams, Database,
    Department, FollowUpChannel, FollowUpRecord, FollowUpStore, LeadFilter, LeadNoteRecord,
    LeadNoteStore, LeadOrder, LeadPriority, LeadRecord, LeadSource, LeadStatus, LeadStore,
    NewActivity, TeamMemberRecord, UpdateLeadParams, UserDirectoryStore, UserRef, UserRole,
};
use crate::error::DatabaseError;

mod embedded {
    refinery::embed_migrations!("migrations/postgres");
}

type BoxedParam = Box<dyn ToSql + Sync + Send>;

const NOTE_SELECT: &str = "SELECT n.id, n.lead_id, n.author_id, a.name, n.body, n.created_at \
     FROM lead_notes n LEFT JOIN users a ON a.id = n.author_id";

const FOLLOW_UP_COLUMNS: &str =
    "id, lead_id, created_by, scheduled_at, channel, notes, completed_at, created_at";

/// PostgreSQL database backend.
pub struct PgBackend {
    pool: Pool,
}

impl PgBackend {
    /// Create a new PostgreSQL backend from configuration.
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let url = config
            .url
            .as_ref()
            .ok_or_else(|| DatabaseError::Pool("DATABASE_URL is not set".to_string()))?;
        let pg_config: tokio_postgres::Config = url
            .expose_secret()
            .parse()
            .map_err(|e| DatabaseError::Pool(format!("invalid DATABASE_URL: {e}")))?;
        let manager = Manager::from_config(
            pg_config,
            tokio_postgres::NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(config.pool_size)
            .build()
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;

        // Fail fast on an unreachable server rather than on the first request.
        let _ = pool.get().await?;
        tracing::info!(pool_size = config.pool_size, "postgres pool ready");
        Ok(Self { pool })
    }

    async fn conn(&self) -> Result<Object, DatabaseError> {
        Ok(self.pool.get().await?)
    }
}

fn bind(value: &SqlValue) -> BoxedParam {
    match value {
        SqlValue::Text(s) => Box::new(s.clone()),
        SqlValue::Uuid(id) => Box::new(*id),
        SqlValue::Timestamp(ts) => Box::new(*ts),
    }
}

fn as_refs(params: &[BoxedParam]) -> Vec<&(dyn ToSql + Sync)> {
    params
        .iter()
        .map(|p| p.as_ref() as &(dyn ToSql + Sync))
        .collect()
}

fn parse_enum<T>(
    raw: Option<String>,
    field: &str,
    parse: fn(&str) -> Option<T>,
) -> Result<Option<T>, DatabaseError> {
    match raw {
        Some(value) => parse(&value)
            .map(Some)
            .ok_or_else(|| DatabaseError::Serialization(format!("invalid {field} '{value}'"))),
        None => Ok(None),
    }
}

fn parse_role(raw: &str) -> Result<UserRole, DatabaseError> {
    UserRole::from_db_value(raw)
        .ok_or_else(|| DatabaseError::Serialization(format!("invalid role '{raw}'")))
}

fn user_ref(id: Option<Uuid>, name: Option<String>) -> Option<UserRef> {
    id.map(|id| UserRef {
        id,
        name: name.unwrap_or_default(),
    })
}

fn row_to_lead_record(row: &tokio_postgres::Row) -> Result<LeadRecord, DatabaseError> {
    let role: String = row.try_get(4)?;
    Ok(LeadRecord {
        id: row.try_get(0)?,
        name: row.try_get(1)?,
        email: row.try_get(2)?,
        company_name: row.try_get(3)?,
        role: parse_role(&role)?,
        lead_status: parse_enum(row.try_get(5)?, "lead_status", LeadStatus::from_db_value)?,
        lead_priority: parse_enum(row.try_get(6)?, "lead_priority", LeadPriority::from_db_value)?,
        lead_source: parse_enum(row.try_get(7)?, "lead_source", LeadSource::from_db_value)?,
        department: parse_enum(row.try_get(8)?, "department", Department::from_db_value)?,
        min_ticket_size: row.try_get(9)?,
        max_ticket_size: row.try_get(10)?,
        lead_responsible: user_ref(row.try_get(11)?, row.try_get(12)?),
        lead_main_contact: user_ref(row.try_get(13)?, row.try_get(14)?),
        last_contact_date: row.try_get(15)?,
        next_follow_up_date: row.try_get(16)?,
        created_at: row.try_get(17)?,
        updated_at: row.try_get(18)?,
    })
}

fn row_to_team_member_record(row: &tokio_postgres::Row) -> Result<TeamMemberRecord, DatabaseError> {
    let role: String = row.try_get("role")?;
    Ok(TeamMemberRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        role: parse_role(&role)?,
    })
}

fn row_to_note_record(row: &tokio_postgres::Row) -> Result<LeadNoteRecord, DatabaseError> {
    Ok(LeadNoteRecord {
        id: row.try_get(0)?,
        lead_id: row.try_get(1)?,
        author: user_ref(row.try_get(2)?, row.try_get(3)?),
        body: row.try_get(4)?,
        created_at: row.try_get(5)?,
    })
}

fn row_to_follow_up_record(row: &tokio_postgres::Row) -> Result<FollowUpRecord, DatabaseError> {
    let channel: String = row.try_get("channel")?;
    Ok(FollowUpRecord {
        id: row.try_get("id")?,
        lead_id: row.try_get("lead_id")?,
        created_by: row.try_get("created_by")?,
        scheduled_at: row.try_get("scheduled_at")?,
        channel: FollowUpChannel::from_db_value(&channel).ok_or_else(|| {
            DatabaseError::Serialization(format!("invalid follow-up channel '{channel}'"))
        })?,
        notes: row.try_get("notes")?,
        completed_at: row.try_get("completed_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_activity_record(row: &tokio_postgres::Row) -> Result<ActivityRecord, DatabaseError> {
    let kind: String = row.try_get("kind")?;
    Ok(ActivityRecord {
        id: row.try_get("id")?,
        lead_id: row.try_get("lead_id")?,
        actor_id: row.try_get("actor_id")?,
        kind: ActivityKind::from_db_value(&kind).ok_or_else(|| {
            DatabaseError::Serialization(format!("invalid activity kind '{kind}'"))
        })?,
        description: row.try_get("description")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
    })
}

async fn insert_activity<C>(
    conn: &C,
    lead_id: Uuid,
    activity: &NewActivity,
) -> Result<(), DatabaseError>
where
    C: GenericClient,
{
    conn.execute(
        "INSERT INTO lead_activities (id, lead_id, actor_id, kind, description, metadata, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
        &[
            &Uuid::new_v4(),
            &lead_id,
            &activity.actor_id,
            &activity.kind.as_str(),
            &activity.description,
            &activity.metadata,
            &activity.occurred_at,
        ],
    )
    .await?;
    Ok(())
}

async fn stamp_contact<C>(
    conn: &C,
    lead_id: Uuid,
    at: &DateTime<Utc>,
) -> Result<bool, DatabaseError>
where
    C: GenericClient,
{
    let updated = conn
        .execute(
            "UPDATE users SET last_contact_date = $2, updated_at = $2 \
             WHERE id = $1 AND role = 'USER'",
            &[&lead_id, at],
        )
        .await?;
    Ok(updated > 0)
}

async fn refresh_next_follow_up<C>(conn: &C, lead_id: Uuid) -> Result<(), DatabaseError>
where
    C: GenericClient,
{
    conn.execute(
        "UPDATE users SET next_follow_up_date = ( \
             SELECT MIN(scheduled_at) FROM lead_follow_ups \
             WHERE lead_id = $1 AND completed_at IS NULL \
         ), updated_at = NOW() \
         WHERE id = $1",
        &[&lead_id],
    )
    .await?;
    Ok(())
}

async fn load_lead<C>(conn: &C, lead_id: Uuid) -> Result<Option<LeadRecord>, DatabaseError>
where
    C: GenericClient,
{
    let sql = format!("{LEAD_SELECT_FROM} WHERE u.id = $1 AND u.role = 'USER'");
    conn.query_opt(sql.as_str(), &[&lead_id])
        .await?
        .as_ref()
        .map(row_to_lead_record)
        .transpose()
}

async fn load_follow_up<C>(
    conn: &C,
    lead_id: Uuid,
    follow_up_id: Uuid,
) -> Result<Option<FollowUpRecord>, DatabaseError>
where
    C: GenericClient,
{
    let sql = format!(
        "SELECT {FOLLOW_UP_COLUMNS} FROM lead_follow_ups WHERE id = $1 AND lead_id = $2"
    );
    conn.query_opt(sql.as_str(), &[&follow_up_id, &lead_id])
        .await?
        .as_ref()
        .map(row_to_follow_up_record)
        .transpose()
}

// ==================== Database (supertrait) ====================

#[async_trait]
impl Database for PgBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let mut client = self.conn().await?;
        let report = embedded::migrations::runner()
            .run_async(&mut **client)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;
        tracing::debug!(applied = report.applied_migrations().len(), "postgres migrations applied");
        Ok(())
    }
}

// ==================== LeadStore ====================

#[async_trait]
impl LeadStore for PgBackend {
    async fn count_leads(&self, filter: &LeadFilter) -> Result<u64, DatabaseError> {
        let fragment = filter.to_sql(Placeholder::Dollar);
        let sql = format!("SELECT COUNT(*) FROM users u WHERE {}", fragment.sql);
        let params: Vec<BoxedParam> = fragment.params.iter().map(bind).collect();
        let conn = self.conn().await?;
        let row = conn.query_one(sql.as_str(), &as_refs(&params)).await?;
        let count: i64 = row.try_get(0)?;
        u64::try_from(count)
            .map_err(|_| DatabaseError::Serialization("negative lead count".to_string()))
    }

    async fn find_leads(
        &self,
        filter: &LeadFilter,
        order: &LeadOrder,
        skip: u64,
        take: u64,
    ) -> Result<Vec<LeadRecord>, DatabaseError> {
        let fragment = filter.to_sql(Placeholder::Dollar);
        let sql = format!(
            "{LEAD_SELECT_FROM} WHERE {} {} LIMIT {take} OFFSET {skip}",
            fragment.sql,
            order.to_sql(Placeholder::Dollar)
        );
        let params: Vec<BoxedParam> = fragment.params.iter().map(bind).collect();
        let conn = self.conn().await?;
        let rows = conn.query(sql.as_str(), &as_refs(&params)).await?;
        rows.iter().map(row_to_lead_record).collect()
    }

    async fn get_lead(&self, lead_id: Uuid) -> Result<Option<LeadRecord>, DatabaseError> {
        let conn = self.conn().await?;
        load_lead(&conn, lead_id).await
    }

    async fn update_lead(
        &self,
        lead_id: Uuid,
        input: &UpdateLeadParams,
        activity: &NewActivity,
    ) -> Result<Option<LeadRecord>, DatabaseError> {
        let mut sets: Vec<&'static str> = Vec::new();
        let mut params: Vec<BoxedParam> = vec![Box::new(lead_id)];
        let mut set = |column: &'static str, value: BoxedParam| {
            params.push(value);
            sets.push(column);
        };
        if let Some(ref v) = input.company_name {
            set("company_name", Box::new(v.clone()));
        }
        if let Some(v) = input.lead_priority {
            set("lead_priority", Box::new(v.map(LeadPriority::as_str)));
        }
        if let Some(v) = input.lead_source {
            set("lead_source", Box::new(v.map(LeadSource::as_str)));
        }
        if let Some(v) = input.department {
            set("department", Box::new(v.map(Department::as_str)));
        }
        if let Some(v) = input.min_ticket_size {
            set("min_ticket_size", Box::new(v));
        }
        if let Some(v) = input.max_ticket_size {
            set("max_ticket_size", Box::new(v));
        }
        if let Some(v) = input.lead_main_contact_id {
            set("lead_main_contact_id", Box::new(v));
        }
        set("updated_at", Box::new(activity.occurred_at));

        let assignments = sets
            .iter()
            .enumerate()
            .map(|(i, column)| format!("{column} = ${}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("UPDATE users SET {assignments} WHERE id = $1 AND role = 'USER'");

        let mut conn = self.conn().await?;
        let tx = conn.transaction().await?;
        let updated = tx.execute(sql.as_str(), &as_refs(&params)).await?;
        if updated == 0 {
            return Ok(None);
        }
        insert_activity(&tx, lead_id, activity).await?;
        let record = load_lead(&tx, lead_id).await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn assign_lead(
        &self,
        lead_id: Uuid,
        responsible_id: Uuid,
        activity: &NewActivity,
    ) -> Result<bool, DatabaseError> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await?;
        let updated = tx
            .execute(
                "UPDATE users SET lead_responsible_id = $2, last_contact_date = $3, updated_at = $3 \
                 WHERE id = $1 AND role = 'USER'",
                &[&lead_id, &responsible_id, &activity.occurred_at],
            )
            .await?;
        if updated == 0 {
            return Ok(false);
        }
        insert_activity(&tx, lead_id, activity).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn set_lead_status(
        &self,
        lead_id: Uuid,
        status: LeadStatus,
        activity: &NewActivity,
    ) -> Result<bool, DatabaseError> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await?;
        let updated = tx
            .execute(
                "UPDATE users SET lead_status = $2, last_contact_date = $3, updated_at = $3 \
                 WHERE id = $1 AND role = 'USER'",
                &[&lead_id, &status.as_str(), &activity.occurred_at],
            )
            .await?;
        if updated == 0 {
            return Ok(false);
        }
        insert_activity(&tx, lead_id, activity).await?;
        tx.commit().await?;
        Ok(true)
    }
}

// ==================== UserDirectoryStore ====================

#[async_trait]
impl UserDirectoryStore for PgBackend {
    async fn insert_user(&self, input: &CreateUserParams) -> Result<Uuid, DatabaseError> {
        let id = Uuid::new_v4();
        let created_at = input.created_at.unwrap_or_else(Utc::now);
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO users \
             (id, name, email, company_name, role, lead_status, lead_priority, lead_source, department, \
              min_ticket_size, max_ticket_size, lead_responsible_id, lead_main_contact_id, \
              last_contact_date, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $15)",
            &[
                &id,
                &input.name,
                &input.email,
                &input.company_name,
                &input.role.as_str(),
                &input.lead_status.map(LeadStatus::as_str),
                &input.lead_priority.map(LeadPriority::as_str),
                &input.lead_source.map(LeadSource::as_str),
                &input.department.map(Department::as_str),
                &input.min_ticket_size,
                &input.max_ticket_size,
                &input.lead_responsible_id,
                &input.lead_main_contact_id,
                &input.last_contact_date,
                &created_at,
            ],
        )
        .await?;
        Ok(id)
    }

    async fn get_user_role(&self, user_id: Uuid) -> Result<Option<UserRole>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt("SELECT role FROM users WHERE id = $1", &[&user_id])
            .await?;
        match row {
            Some(row) => {
                let raw: String = row.try_get(0)?;
                parse_role(&raw).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn get_team_member(
        &self,
        user_id: Uuid,
    ) -> Result<Option<TeamMemberRecord>, DatabaseError> {
        let conn = self.conn().await?;
        conn.query_opt(
            "SELECT id, name, email, role FROM users \
             WHERE id = $1 AND role IN ('TEAM_MEMBER', 'ADMIN')",
            &[&user_id],
        )
        .await?
        .as_ref()
        .map(row_to_team_member_record)
        .transpose()
    }

    async fn list_team_members(&self) -> Result<Vec<TeamMemberRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                "SELECT id, name, email, role FROM users \
                 WHERE role IN ('TEAM_MEMBER', 'ADMIN') ORDER BY name ASC, id ASC",
                &[],
            )
            .await?;
        rows.iter().map(row_to_team_member_record).collect()
    }
}

// ==================== LeadNoteStore ====================

#[async_trait]
impl LeadNoteStore for PgBackend {
    async fn list_lead_notes(&self, lead_id: Uuid) -> Result<Vec<LeadNoteRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let sql = format!("{NOTE_SELECT} WHERE n.lead_id = $1 ORDER BY n.created_at DESC, n.id DESC");
        let rows = conn.query(sql.as_str(), &[&lead_id]).await?;
        rows.iter().map(row_to_note_record).collect()
    }

    async fn create_lead_note(
        &self,
        lead_id: Uuid,
        author_id: Uuid,
        body: &str,
        activity: &NewActivity,
    ) -> Result<Option<LeadNoteRecord>, DatabaseError> {
        let note_id = Uuid::new_v4();
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await?;
        if !stamp_contact(&tx, lead_id, &activity.occurred_at).await? {
            return Ok(None);
        }
        tx.execute(
            "INSERT INTO lead_notes (id, lead_id, author_id, body, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
            &[&note_id, &lead_id, &author_id, &body, &activity.occurred_at],
        )
        .await?;
        insert_activity(&tx, lead_id, activity).await?;
        let sql = format!("{NOTE_SELECT} WHERE n.id = $1");
        let row = tx.query_one(sql.as_str(), &[&note_id]).await?;
        let record = row_to_note_record(&row)?;
        tx.commit().await?;
        Ok(Some(record))
    }
}

// ==================== FollowUpStore ====================

#[async_trait]
impl FollowUpStore for PgBackend {
    async fn list_follow_ups(&self, lead_id: Uuid) -> Result<Vec<FollowUpRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let sql = format!(
            "SELECT {FOLLOW_UP_COLUMNS} FROM lead_follow_ups \
             WHERE lead_id = $1 ORDER BY scheduled_at ASC, created_at ASC, id ASC"
        );
        let rows = conn.query(sql.as_str(), &[&lead_id]).await?;
        rows.iter().map(row_to_follow_up_record).collect()
    }

    async fn get_follow_up(
        &self,
        lead_id: Uuid,
        follow_up_id: Uuid,
    ) -> Result<Option<FollowUpRecord>, DatabaseError> {
        let conn = self.conn().await?;
        load_follow_up(&conn, lead_id, follow_up_id).await
    }

    async fn create_follow_up(
        &self,
        lead_id: Uuid,
        input: &CreateFollowUpParams,
        activity: &NewActivity,
    ) -> Result<Option<FollowUpRecord>, DatabaseError> {
        let follow_up_id = Uuid::new_v4();
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await?;
        if !stamp_contact(&tx, lead_id, &activity.occurred_at).await? {
            return Ok(None);
        }
        tx.execute(
            "INSERT INTO lead_follow_ups (id, lead_id, created_by, scheduled_at, channel, notes, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
            &[
                &follow_up_id,
                &lead_id,
                &input.created_by,
                &input.scheduled_at,
                &input.channel.as_str(),
                &input.notes,
                &activity.occurred_at,
            ],
        )
        .await?;
        refresh_next_follow_up(&tx, lead_id).await?;
        insert_activity(&tx, lead_id, activity).await?;
        let record = load_follow_up(&tx, lead_id, follow_up_id).await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn complete_follow_up(
        &self,
        lead_id: Uuid,
        follow_up_id: Uuid,
        activity: &NewActivity,
    ) -> Result<Option<FollowUpRecord>, DatabaseError> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await?;
        let updated = tx
            .execute(
                "UPDATE lead_follow_ups SET completed_at = $3 \
                 WHERE id = $1 AND lead_id = $2 AND completed_at IS NULL",
                &[&follow_up_id, &lead_id, &activity.occurred_at],
            )
            .await?;
        if updated == 0 {
            return Ok(None);
        }
        refresh_next_follow_up(&tx, lead_id).await?;
        insert_activity(&tx, lead_id, activity).await?;
        let record = load_follow_up(&tx, lead_id, follow_up_id).await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn delete_follow_up(
        &self,
        lead_id: Uuid,
        follow_up_id: Uuid,
        activity: &NewActivity,
    ) -> Result<bool, DatabaseError> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await?;
        let deleted = tx
            .execute(
                "DELETE FROM lead_follow_ups f USING users u \
                 WHERE f.id = $1 AND f.lead_id = $2 AND u.id = f.lead_id AND u.role = 'USER'",
                &[&follow_up_id, &lead_id],
            )
            .await?;
        if deleted == 0 {
            return Ok(false);
        }
        refresh_next_follow_up(&tx, lead_id).await?;
        insert_activity(&tx, lead_id, activity).await?;
        tx.commit().await?;
        Ok(true)
    }
}

// ==================== ActivityStore ====================

#[async_trait]
impl ActivityStore for PgBackend {
    async fn list_lead_activities(
        &self,
        lead_id: Uuid,
        limit: u32,
    ) -> Result<Vec<ActivityRecord>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                "SELECT id, lead_id, actor_id, kind, description, metadata, created_at \
                 FROM lead_activities WHERE lead_id = $1 \
                 ORDER BY created_at DESC, seq DESC LIMIT $2",
                &[&lead_id, &i64::from(limit)],
            )
            .await?;
        rows.iter().map(row_to_activity_record).collect()
    }
}
