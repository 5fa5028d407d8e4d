use chrono::{DateTime, Utc};
use libsql::params::Params;
use libsql::{Connection, params};
use uuid::Uuid;

use crate::db::query::{LEAD_SELECT_FROM, Placeholder};
use crate::db::{
    ActivityKind, ActivityRecord, ActivityStore, CreateFollowUpParams, CreateUserParams,
    Department, FollowUpChannel, FollowUpRecord, FollowUpStore, LeadFilter, LeadNoteRecord,
    LeadNoteStore, LeadOrder, LeadPriority, LeadRecord, LeadSource, LeadStatus, LeadStore,
    NewActivity, TeamMemberRecord, UpdateLeadParams, UserDirectoryStore, UserRef, UserRole,
};
use crate::error::DatabaseError;

use super::{
    LibSqlBackend, fmt_ts, get_i64, get_opt_decimal, get_opt_text, get_text, opt_decimal,
    opt_text, opt_text_owned, opt_ts, opt_uuid, parse_timestamp, sql_value,
};

const NOTE_SELECT: &str = "SELECT n.id, n.lead_id, n.author_id, a.name, n.body, n.created_at \
     FROM lead_notes n LEFT JOIN users a ON a.id = n.author_id";

const FOLLOW_UP_COLUMNS: &str =
    "id, lead_id, created_by, scheduled_at, channel, notes, completed_at, created_at";

fn parse_uuid(raw: &str, field: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(raw)
        .map_err(|e| DatabaseError::Serialization(format!("invalid {field} uuid: {e}")))
}

fn parse_opt_uuid(raw: Option<String>, field: &str) -> Result<Option<Uuid>, DatabaseError> {
    raw.map(|value| parse_uuid(&value, field)).transpose()
}

fn parse_dt(raw: &str) -> Result<DateTime<Utc>, DatabaseError> {
    parse_timestamp(raw).map_err(DatabaseError::Serialization)
}

fn parse_dt_opt(raw: Option<String>) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    raw.map(|value| parse_dt(&value)).transpose()
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

fn user_ref(
    id: Option<String>,
    name: Option<String>,
    field: &str,
) -> Result<Option<UserRef>, DatabaseError> {
    Ok(parse_opt_uuid(id, field)?.map(|id| UserRef {
        id,
        name: name.unwrap_or_default(),
    }))
}

fn row_to_lead_record(row: &libsql::Row) -> Result<LeadRecord, DatabaseError> {
    let role_raw = get_text(row, 4);
    Ok(LeadRecord {
        id: parse_uuid(&get_text(row, 0), "lead.id")?,
        name: get_text(row, 1),
        email: get_text(row, 2),
        company_name: get_opt_text(row, 3),
        role: UserRole::from_db_value(&role_raw)
            .ok_or_else(|| DatabaseError::Serialization(format!("invalid role '{role_raw}'")))?,
        lead_status: parse_enum(get_opt_text(row, 5), "lead_status", LeadStatus::from_db_value)?,
        lead_priority: parse_enum(
            get_opt_text(row, 6),
            "lead_priority",
            LeadPriority::from_db_value,
        )?,
        lead_source: parse_enum(get_opt_text(row, 7), "lead_source", LeadSource::from_db_value)?,
        department: parse_enum(get_opt_text(row, 8), "department", Department::from_db_value)?,
        min_ticket_size: get_opt_decimal(row, 9)?,
        max_ticket_size: get_opt_decimal(row, 10)?,
        lead_responsible: user_ref(get_opt_text(row, 11), get_opt_text(row, 12), "responsible")?,
        lead_main_contact: user_ref(
            get_opt_text(row, 13),
            get_opt_text(row, 14),
            "main_contact",
        )?,
        last_contact_date: parse_dt_opt(get_opt_text(row, 15))?,
        next_follow_up_date: parse_dt_opt(get_opt_text(row, 16))?,
        created_at: parse_dt(&get_text(row, 17))?,
        updated_at: parse_dt(&get_text(row, 18))?,
    })
}

fn row_to_team_member_record(row: &libsql::Row) -> Result<TeamMemberRecord, DatabaseError> {
    let role_raw = get_text(row, 3);
    Ok(TeamMemberRecord {
        id: parse_uuid(&get_text(row, 0), "user.id")?,
        name: get_text(row, 1),
        email: get_text(row, 2),
        role: UserRole::from_db_value(&role_raw)
            .ok_or_else(|| DatabaseError::Serialization(format!("invalid role '{role_raw}'")))?,
    })
}

fn row_to_note_record(row: &libsql::Row) -> Result<LeadNoteRecord, DatabaseError> {
    Ok(LeadNoteRecord {
        id: parse_uuid(&get_text(row, 0), "note.id")?,
        lead_id: parse_uuid(&get_text(row, 1), "note.lead_id")?,
        author: user_ref(get_opt_text(row, 2), get_opt_text(row, 3), "note.author_id")?,
        body: get_text(row, 4),
        created_at: parse_dt(&get_text(row, 5))?,
    })
}

fn row_to_follow_up_record(row: &libsql::Row) -> Result<FollowUpRecord, DatabaseError> {
    let channel_raw = get_text(row, 4);
    Ok(FollowUpRecord {
        id: parse_uuid(&get_text(row, 0), "follow_up.id")?,
        lead_id: parse_uuid(&get_text(row, 1), "follow_up.lead_id")?,
        created_by: parse_opt_uuid(get_opt_text(row, 2), "follow_up.created_by")?,
        scheduled_at: parse_dt(&get_text(row, 3))?,
        channel: FollowUpChannel::from_db_value(&channel_raw).ok_or_else(|| {
            DatabaseError::Serialization(format!("invalid follow-up channel '{channel_raw}'"))
        })?,
        notes: get_opt_text(row, 5),
        completed_at: parse_dt_opt(get_opt_text(row, 6))?,
        created_at: parse_dt(&get_text(row, 7))?,
    })
}

fn row_to_activity_record(row: &libsql::Row) -> Result<ActivityRecord, DatabaseError> {
    let kind_raw = get_text(row, 3);
    let metadata_raw = get_text(row, 5);
    let metadata = if metadata_raw.trim().is_empty() {
        serde_json::json!({})
    } else {
        serde_json::from_str(&metadata_raw)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?
    };
    Ok(ActivityRecord {
        id: parse_uuid(&get_text(row, 0), "activity.id")?,
        lead_id: parse_uuid(&get_text(row, 1), "activity.lead_id")?,
        actor_id: parse_opt_uuid(get_opt_text(row, 2), "activity.actor_id")?,
        kind: ActivityKind::from_db_value(&kind_raw).ok_or_else(|| {
            DatabaseError::Serialization(format!("invalid activity kind '{kind_raw}'"))
        })?,
        description: get_text(row, 4),
        metadata,
        created_at: parse_dt(&get_text(row, 6))?,
    })
}

// ==================== Transaction helpers ====================

async fn begin(conn: &Connection) -> Result<(), DatabaseError> {
    // Write lock up front; deferred transactions can deadlock on upgrade.
    conn.execute("BEGIN IMMEDIATE", ()).await?;
    Ok(())
}

async fn finish<T>(conn: &Connection, result: Result<T, DatabaseError>) -> Result<T, DatabaseError> {
    match result {
        Ok(value) => {
            conn.execute("COMMIT", ()).await?;
            Ok(value)
        }
        Err(err) => {
            let _ = conn.execute("ROLLBACK", ()).await;
            Err(err)
        }
    }
}

async fn insert_activity(
    conn: &Connection,
    lead_id: Uuid,
    activity: &NewActivity,
) -> Result<(), DatabaseError> {
    let metadata = serde_json::to_string(&activity.metadata)
        .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
    conn.execute(
        "INSERT INTO lead_activities (id, lead_id, actor_id, kind, description, metadata, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            Uuid::new_v4().to_string(),
            lead_id.to_string(),
            opt_uuid(activity.actor_id),
            activity.kind.as_str(),
            activity.description.as_str(),
            metadata,
            fmt_ts(&activity.occurred_at),
        ],
    )
    .await?;
    Ok(())
}

/// Stamp `last_contact_date`. Returns `false` when `lead_id` is not a lead.
async fn stamp_contact(
    conn: &Connection,
    lead_id: Uuid,
    at: &DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let updated = conn
        .execute(
            "UPDATE users SET last_contact_date = ?2, updated_at = ?2 \
             WHERE id = ?1 AND role = 'USER'",
            params![lead_id.to_string(), fmt_ts(at)],
        )
        .await?;
    Ok(updated > 0)
}

async fn refresh_next_follow_up(conn: &Connection, lead_id: Uuid) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE users SET next_follow_up_date = ( \
             SELECT MIN(scheduled_at) FROM lead_follow_ups \
             WHERE lead_id = ?1 AND completed_at IS NULL \
         ), updated_at = ?2 \
         WHERE id = ?1",
        params![lead_id.to_string(), fmt_ts(&Utc::now())],
    )
    .await?;
    Ok(())
}

async fn lead_exists(conn: &Connection, lead_id: Uuid) -> Result<bool, DatabaseError> {
    let row = conn
        .query(
            "SELECT 1 FROM users WHERE id = ?1 AND role = 'USER' LIMIT 1",
            params![lead_id.to_string()],
        )
        .await?
        .next()
        .await?;
    Ok(row.is_some())
}

async fn load_lead(conn: &Connection, lead_id: Uuid) -> Result<Option<LeadRecord>, DatabaseError> {
    let sql = format!("{LEAD_SELECT_FROM} WHERE u.id = ?1 AND u.role = 'USER' LIMIT 1");
    let mut rows = conn.query(&sql, params![lead_id.to_string()]).await?;
    match rows.next().await? {
        Some(row) => Ok(Some(row_to_lead_record(&row)?)),
        None => Ok(None),
    }
}

async fn load_follow_up(
    conn: &Connection,
    lead_id: Uuid,
    follow_up_id: Uuid,
) -> Result<Option<FollowUpRecord>, DatabaseError> {
    let sql = format!(
        "SELECT {FOLLOW_UP_COLUMNS} FROM lead_follow_ups WHERE id = ?1 AND lead_id = ?2 LIMIT 1"
    );
    let mut rows = conn
        .query(&sql, params![follow_up_id.to_string(), lead_id.to_string()])
        .await?;
    match rows.next().await? {
        Some(row) => Ok(Some(row_to_follow_up_record(&row)?)),
        None => Ok(None),
    }
}

#[async_trait::async_trait]
impl LeadStore for LibSqlBackend {
    async fn count_leads(&self, filter: &LeadFilter) -> Result<u64, DatabaseError> {
        let fragment = filter.to_sql(Placeholder::Question);
        let sql = format!("SELECT COUNT(*) FROM users u WHERE {}", fragment.sql);
        let conn = self.connect().await?;
        let row = conn
            .query(
                &sql,
                Params::Positional(fragment.params.iter().map(sql_value).collect()),
            )
            .await?
            .next()
            .await?
            .ok_or_else(|| DatabaseError::Query("count returned no rows".to_string()))?;
        u64::try_from(get_i64(&row, 0))
            .map_err(|_| DatabaseError::Serialization("negative lead count".to_string()))
    }

    async fn find_leads(
        &self,
        filter: &LeadFilter,
        order: &LeadOrder,
        skip: u64,
        take: u64,
    ) -> Result<Vec<LeadRecord>, DatabaseError> {
        let fragment = filter.to_sql(Placeholder::Question);
        let sql = format!(
            "{LEAD_SELECT_FROM} WHERE {} {} LIMIT {take} OFFSET {skip}",
            fragment.sql,
            order.to_sql(Placeholder::Question)
        );
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &sql,
                Params::Positional(fragment.params.iter().map(sql_value).collect()),
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_lead_record(&row)?);
        }
        Ok(out)
    }

    async fn get_lead(&self, lead_id: Uuid) -> Result<Option<LeadRecord>, DatabaseError> {
        let conn = self.connect().await?;
        load_lead(&conn, lead_id).await
    }

    async fn update_lead(
        &self,
        lead_id: Uuid,
        input: &UpdateLeadParams,
        activity: &NewActivity,
    ) -> Result<Option<LeadRecord>, DatabaseError> {
        let mut sets: Vec<&'static str> = Vec::new();
        let mut values: Vec<libsql::Value> = vec![libsql::Value::Text(lead_id.to_string())];
        let mut set = |column: &'static str, value: libsql::Value| {
            values.push(value);
            sets.push(column);
        };
        if let Some(ref v) = input.company_name {
            set("company_name", opt_text(v.as_deref()));
        }
        if let Some(v) = input.lead_priority {
            set("lead_priority", opt_text(v.map(LeadPriority::as_str)));
        }
        if let Some(v) = input.lead_source {
            set("lead_source", opt_text(v.map(LeadSource::as_str)));
        }
        if let Some(v) = input.department {
            set("department", opt_text(v.map(Department::as_str)));
        }
        if let Some(v) = input.min_ticket_size {
            set("min_ticket_size", opt_decimal(v));
        }
        if let Some(v) = input.max_ticket_size {
            set("max_ticket_size", opt_decimal(v));
        }
        if let Some(v) = input.lead_main_contact_id {
            set("lead_main_contact_id", opt_uuid(v));
        }
        set("updated_at", libsql::Value::Text(fmt_ts(&activity.occurred_at)));

        let assignments = sets
            .iter()
            .enumerate()
            .map(|(i, column)| format!("{column} = ?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("UPDATE users SET {assignments} WHERE id = ?1 AND role = 'USER'");

        let conn = self.connect().await?;
        begin(&conn).await?;
        let result = async {
            let updated = conn.execute(&sql, Params::Positional(values)).await?;
            if updated == 0 {
                return Ok(false);
            }
            insert_activity(&conn, lead_id, activity).await?;
            Ok::<_, DatabaseError>(true)
        }
        .await;
        if !finish(&conn, result).await? {
            return Ok(None);
        }
        load_lead(&conn, lead_id).await
    }

    async fn assign_lead(
        &self,
        lead_id: Uuid,
        responsible_id: Uuid,
        activity: &NewActivity,
    ) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        begin(&conn).await?;
        let result = async {
            let updated = conn
                .execute(
                    "UPDATE users SET lead_responsible_id = ?2, last_contact_date = ?3, updated_at = ?3 \
                     WHERE id = ?1 AND role = 'USER'",
                    params![
                        lead_id.to_string(),
                        responsible_id.to_string(),
                        fmt_ts(&activity.occurred_at),
                    ],
                )
                .await?;
            if updated == 0 {
                return Ok(false);
            }
            insert_activity(&conn, lead_id, activity).await?;
            Ok::<_, DatabaseError>(true)
        }
        .await;
        finish(&conn, result).await
    }

    async fn set_lead_status(
        &self,
        lead_id: Uuid,
        status: LeadStatus,
        activity: &NewActivity,
    ) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        begin(&conn).await?;
        let result = async {
            let updated = conn
                .execute(
                    "UPDATE users SET lead_status = ?2, last_contact_date = ?3, updated_at = ?3 \
                     WHERE id = ?1 AND role = 'USER'",
                    params![
                        lead_id.to_string(),
                        status.as_str(),
                        fmt_ts(&activity.occurred_at),
                    ],
                )
                .await?;
            if updated == 0 {
                return Ok(false);
            }
            insert_activity(&conn, lead_id, activity).await?;
            Ok::<_, DatabaseError>(true)
        }
        .await;
        finish(&conn, result).await
    }
}

#[async_trait::async_trait]
impl UserDirectoryStore for LibSqlBackend {
    async fn insert_user(&self, input: &CreateUserParams) -> Result<Uuid, DatabaseError> {
        let id = Uuid::new_v4();
        let created_at = input.created_at.unwrap_or_else(Utc::now);
        let conn = self.connect().await?;
        conn.execute(
            "INSERT INTO users \
             (id, name, email, company_name, role, lead_status, lead_priority, lead_source, department, \
              min_ticket_size, max_ticket_size, lead_responsible_id, lead_main_contact_id, \
              last_contact_date, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)",
            params![
                id.to_string(),
                input.name.as_str(),
                input.email.as_str(),
                opt_text(input.company_name.as_deref()),
                input.role.as_str(),
                opt_text(input.lead_status.map(LeadStatus::as_str)),
                opt_text(input.lead_priority.map(LeadPriority::as_str)),
                opt_text(input.lead_source.map(LeadSource::as_str)),
                opt_text(input.department.map(Department::as_str)),
                opt_decimal(input.min_ticket_size),
                opt_decimal(input.max_ticket_size),
                opt_uuid(input.lead_responsible_id),
                opt_uuid(input.lead_main_contact_id),
                opt_ts(input.last_contact_date.as_ref()),
                fmt_ts(&created_at),
            ],
        )
        .await?;
        Ok(id)
    }

    async fn get_user_role(&self, user_id: Uuid) -> Result<Option<UserRole>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                "SELECT role FROM users WHERE id = ?1 LIMIT 1",
                params![user_id.to_string()],
            )
            .await?
            .next()
            .await?;
        match row {
            Some(row) => {
                let raw = get_text(&row, 0);
                UserRole::from_db_value(&raw)
                    .map(Some)
                    .ok_or_else(|| DatabaseError::Serialization(format!("invalid role '{raw}'")))
            }
            None => Ok(None),
        }
    }

    async fn get_team_member(
        &self,
        user_id: Uuid,
    ) -> Result<Option<TeamMemberRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                "SELECT id, name, email, role FROM users \
                 WHERE id = ?1 AND role IN ('TEAM_MEMBER', 'ADMIN') LIMIT 1",
                params![user_id.to_string()],
            )
            .await?
            .next()
            .await?;
        row.as_ref().map(row_to_team_member_record).transpose()
    }

    async fn list_team_members(&self) -> Result<Vec<TeamMemberRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                "SELECT id, name, email, role FROM users \
                 WHERE role IN ('TEAM_MEMBER', 'ADMIN') ORDER BY name ASC, id ASC",
                (),
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_team_member_record(&row)?);
        }
        Ok(out)
    }
}

#[async_trait::async_trait]
impl LeadNoteStore for LibSqlBackend {
    async fn list_lead_notes(&self, lead_id: Uuid) -> Result<Vec<LeadNoteRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let sql = format!("{NOTE_SELECT} WHERE n.lead_id = ?1 ORDER BY n.created_at DESC, n.rowid DESC");
        let mut rows = conn.query(&sql, params![lead_id.to_string()]).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_note_record(&row)?);
        }
        Ok(out)
    }

    async fn create_lead_note(
        &self,
        lead_id: Uuid,
        author_id: Uuid,
        body: &str,
        activity: &NewActivity,
    ) -> Result<Option<LeadNoteRecord>, DatabaseError> {
        let note_id = Uuid::new_v4();
        let conn = self.connect().await?;
        begin(&conn).await?;
        let result = async {
            if !stamp_contact(&conn, lead_id, &activity.occurred_at).await? {
                return Ok(false);
            }
            conn.execute(
                "INSERT INTO lead_notes (id, lead_id, author_id, body, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    note_id.to_string(),
                    lead_id.to_string(),
                    author_id.to_string(),
                    body,
                    fmt_ts(&activity.occurred_at),
                ],
            )
            .await?;
            insert_activity(&conn, lead_id, activity).await?;
            Ok::<_, DatabaseError>(true)
        }
        .await;
        if !finish(&conn, result).await? {
            return Ok(None);
        }

        let sql = format!("{NOTE_SELECT} WHERE n.id = ?1 LIMIT 1");
        let row = conn
            .query(&sql, params![note_id.to_string()])
            .await?
            .next()
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load created note".to_string()))?;
        row_to_note_record(&row).map(Some)
    }
}

#[async_trait::async_trait]
impl FollowUpStore for LibSqlBackend {
    async fn list_follow_ups(&self, lead_id: Uuid) -> Result<Vec<FollowUpRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let sql = format!(
            "SELECT {FOLLOW_UP_COLUMNS} FROM lead_follow_ups \
             WHERE lead_id = ?1 ORDER BY scheduled_at ASC, rowid ASC"
        );
        let mut rows = conn.query(&sql, params![lead_id.to_string()]).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_follow_up_record(&row)?);
        }
        Ok(out)
    }

    async fn get_follow_up(
        &self,
        lead_id: Uuid,
        follow_up_id: Uuid,
    ) -> Result<Option<FollowUpRecord>, DatabaseError> {
        let conn = self.connect().await?;
        load_follow_up(&conn, lead_id, follow_up_id).await
    }

    async fn create_follow_up(
        &self,
        lead_id: Uuid,
        input: &CreateFollowUpParams,
        activity: &NewActivity,
    ) -> Result<Option<FollowUpRecord>, DatabaseError> {
        let follow_up_id = Uuid::new_v4();
        let conn = self.connect().await?;
        begin(&conn).await?;
        let result = async {
            if !stamp_contact(&conn, lead_id, &activity.occurred_at).await? {
                return Ok(false);
            }
            conn.execute(
                "INSERT INTO lead_follow_ups (id, lead_id, created_by, scheduled_at, channel, notes, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    follow_up_id.to_string(),
                    lead_id.to_string(),
                    input.created_by.to_string(),
                    fmt_ts(&input.scheduled_at),
                    input.channel.as_str(),
                    opt_text_owned(input.notes.clone()),
                    fmt_ts(&activity.occurred_at),
                ],
            )
            .await?;
            refresh_next_follow_up(&conn, lead_id).await?;
            insert_activity(&conn, lead_id, activity).await?;
            Ok::<_, DatabaseError>(true)
        }
        .await;
        if !finish(&conn, result).await? {
            return Ok(None);
        }
        load_follow_up(&conn, lead_id, follow_up_id).await
    }

    async fn complete_follow_up(
        &self,
        lead_id: Uuid,
        follow_up_id: Uuid,
        activity: &NewActivity,
    ) -> Result<Option<FollowUpRecord>, DatabaseError> {
        let conn = self.connect().await?;
        begin(&conn).await?;
        let result = async {
            let updated = conn
                .execute(
                    "UPDATE lead_follow_ups SET completed_at = ?3 \
                     WHERE id = ?1 AND lead_id = ?2 AND completed_at IS NULL",
                    params![
                        follow_up_id.to_string(),
                        lead_id.to_string(),
                        fmt_ts(&activity.occurred_at),
                    ],
                )
                .await?;
            if updated == 0 {
                return Ok(false);
            }
            refresh_next_follow_up(&conn, lead_id).await?;
            insert_activity(&conn, lead_id, activity).await?;
            Ok::<_, DatabaseError>(true)
        }
        .await;
        if !finish(&conn, result).await? {
            return Ok(None);
        }
        load_follow_up(&conn, lead_id, follow_up_id).await
    }

    async fn delete_follow_up(
        &self,
        lead_id: Uuid,
        follow_up_id: Uuid,
        activity: &NewActivity,
    ) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        begin(&conn).await?;
        let result = async {
            if !lead_exists(&conn, lead_id).await? {
                return Ok(false);
            }
            let deleted = conn
                .execute(
                    "DELETE FROM lead_follow_ups WHERE id = ?1 AND lead_id = ?2",
                    params![follow_up_id.to_string(), lead_id.to_string()],
                )
                .await?;
            if deleted == 0 {
                return Ok(false);
            }
            refresh_next_follow_up(&conn, lead_id).await?;
            insert_activity(&conn, lead_id, activity).await?;
            Ok::<_, DatabaseError>(true)
        }
        .await;
        finish(&conn, result).await
    }
}

#[async_trait::async_trait]
impl ActivityStore for LibSqlBackend {
    async fn list_lead_activities(
        &self,
        lead_id: Uuid,
        limit: u32,
    ) -> Result<Vec<ActivityRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                "SELECT id, lead_id, actor_id, kind, description, metadata, created_at \
                 FROM lead_activities WHERE lead_id = ?1 \
                 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
                params![lead_id.to_string(), i64::from(limit)],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_activity_record(&row)?);
        }
        Ok(out)
    }
}
