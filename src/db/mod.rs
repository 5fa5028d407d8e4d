//! Database abstraction layer.
//!
//! Provides a backend-agnostic `Database` trait that unifies all persistence
//! operations. Two implementations exist behind feature flags:
//!
//! - `postgres` (default): Uses `deadpool-postgres` + `tokio-postgres`
//! - `libsql`: Uses libSQL (Turso's SQLite fork) for embedded/edge deployment
//!
//! Lead actions that touch contact state are single store calls so that the
//! change, the `last_contact_date` stamp and the activity entry commit in one
//! transaction.

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "libsql")]
pub mod libsql;

#[cfg(feature = "libsql")]
pub mod libsql_migrations;

pub mod query;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DatabaseError;

pub use query::{LeadFilter, LeadOrder, LeadSortField, SortDirection};

/// Create a database backend from configuration, run migrations, and return it.
pub async fn connect_from_config(
    config: &crate::config::DatabaseConfig,
) -> Result<Arc<dyn Database>, DatabaseError> {
    match config.backend {
        #[cfg(feature = "libsql")]
        crate::config::DatabaseBackend::LibSql => {
            use secrecy::ExposeSecret as _;

            let default_path = crate::config::default_libsql_path();
            let db_path = config.libsql_path.as_deref().unwrap_or(&default_path);

            let backend = if let Some(ref url) = config.libsql_url {
                let token = config.libsql_auth_token.as_ref().ok_or_else(|| {
                    DatabaseError::Pool(
                        "LIBSQL_AUTH_TOKEN required when LIBSQL_URL is set".to_string(),
                    )
                })?;
                libsql::LibSqlBackend::new_remote_replica(db_path, url, token.expose_secret())
                    .await?
            } else {
                libsql::LibSqlBackend::new_local(db_path).await?
            };
            backend.run_migrations().await?;
            Ok(Arc::new(backend))
        }
        #[cfg(feature = "postgres")]
        _ => {
            let pg = postgres::PgBackend::new(config).await?;
            pg.run_migrations().await?;
            Ok(Arc::new(pg))
        }
        #[cfg(not(feature = "postgres"))]
        _ => Err(DatabaseError::Pool(
            "No database backend available. Enable 'postgres' or 'libsql' feature.".to_string(),
        )),
    }
}

/// Role held by a user record. Leads are users with role `User`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    #[default]
    User,
    TeamMember,
    Admin,
}

impl UserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::TeamMember => "TEAM_MEMBER",
            Self::Admin => "ADMIN",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "USER" => Some(Self::User),
            "TEAM_MEMBER" => Some(Self::TeamMember),
            "ADMIN" => Some(Self::Admin),
            _ => None,
        }
    }

    /// Team members and admins may work leads and be assigned to them.
    pub fn is_staff(self) -> bool {
        !matches!(self, Self::User)
    }
}

/// Pipeline state of a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeadStatus {
    New,
    Contacted,
    Qualified,
    Proposal,
    Negotiation,
    ClosedWon,
    ClosedLost,
    OnHold,
}

impl LeadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Contacted => "CONTACTED",
            Self::Qualified => "QUALIFIED",
            Self::Proposal => "PROPOSAL",
            Self::Negotiation => "NEGOTIATION",
            Self::ClosedWon => "CLOSED_WON",
            Self::ClosedLost => "CLOSED_LOST",
            Self::OnHold => "ON_HOLD",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "NEW" => Some(Self::New),
            "CONTACTED" => Some(Self::Contacted),
            "QUALIFIED" => Some(Self::Qualified),
            "PROPOSAL" => Some(Self::Proposal),
            "NEGOTIATION" => Some(Self::Negotiation),
            "CLOSED_WON" => Some(Self::ClosedWon),
            "CLOSED_LOST" => Some(Self::ClosedLost),
            "ON_HOLD" => Some(Self::OnHold),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeadPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl LeadPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Urgent => "URGENT",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "LOW" => Some(Self::Low),
            "MEDIUM" => Some(Self::Medium),
            "HIGH" => Some(Self::High),
            "URGENT" => Some(Self::Urgent),
            _ => None,
        }
    }
}

/// Channel through which a lead first reached the firm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeadSource {
    Referral,
    Website,
    Linkedin,
    Event,
    ColdOutreach,
    AccessRequest,
    Other,
}

impl LeadSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Referral => "REFERRAL",
            Self::Website => "WEBSITE",
            Self::Linkedin => "LINKEDIN",
            Self::Event => "EVENT",
            Self::ColdOutreach => "COLD_OUTREACH",
            Self::AccessRequest => "ACCESS_REQUEST",
            Self::Other => "OTHER",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "REFERRAL" => Some(Self::Referral),
            "WEBSITE" => Some(Self::Website),
            "LINKEDIN" => Some(Self::Linkedin),
            "EVENT" => Some(Self::Event),
            "COLD_OUTREACH" => Some(Self::ColdOutreach),
            "ACCESS_REQUEST" => Some(Self::AccessRequest),
            "OTHER" => Some(Self::Other),
            _ => None,
        }
    }
}

/// Business unit that owns a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Department {
    #[serde(rename = "M_A")]
    MergersAcquisitions,
    #[serde(rename = "CRE")]
    CommercialRealEstate,
    #[serde(rename = "BOTH")]
    Both,
}

impl Department {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MergersAcquisitions => "M_A",
            Self::CommercialRealEstate => "CRE",
            Self::Both => "BOTH",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "M_A" => Some(Self::MergersAcquisitions),
            "CRE" => Some(Self::CommercialRealEstate),
            "BOTH" => Some(Self::Both),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FollowUpChannel {
    Call,
    Email,
    Meeting,
    Other,
}

impl FollowUpChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Call => "CALL",
            Self::Email => "EMAIL",
            Self::Meeting => "MEETING",
            Self::Other => "OTHER",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "CALL" => Some(Self::Call),
            "EMAIL" => Some(Self::Email),
            "MEETING" => Some(Self::Meeting),
            "OTHER" => Some(Self::Other),
            _ => None,
        }
    }
}

/// Kind of change recorded in a lead's activity log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityKind {
    Assigned,
    NoteAdded,
    FollowUpScheduled,
    FollowUpCompleted,
    FollowUpRemoved,
    StatusChanged,
    FieldUpdated,
}

impl ActivityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Assigned => "ASSIGNED",
            Self::NoteAdded => "NOTE_ADDED",
            Self::FollowUpScheduled => "FOLLOW_UP_SCHEDULED",
            Self::FollowUpCompleted => "FOLLOW_UP_COMPLETED",
            Self::FollowUpRemoved => "FOLLOW_UP_REMOVED",
            Self::StatusChanged => "STATUS_CHANGED",
            Self::FieldUpdated => "FIELD_UPDATED",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "ASSIGNED" => Some(Self::Assigned),
            "NOTE_ADDED" => Some(Self::NoteAdded),
            "FOLLOW_UP_SCHEDULED" => Some(Self::FollowUpScheduled),
            "FOLLOW_UP_COMPLETED" => Some(Self::FollowUpCompleted),
            "FOLLOW_UP_REMOVED" => Some(Self::FollowUpRemoved),
            "STATUS_CHANGED" => Some(Self::StatusChanged),
            "FIELD_UPDATED" => Some(Self::FieldUpdated),
            _ => None,
        }
    }
}

/// `{id, name}` projection of a related user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: Uuid,
    pub name: String,
}

/// Raw lead row with its relations resolved to `UserRef`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadRecord {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub company_name: Option<String>,
    pub role: UserRole,
    pub lead_status: Option<LeadStatus>,
    pub lead_priority: Option<LeadPriority>,
    pub lead_source: Option<LeadSource>,
    pub department: Option<Department>,
    pub min_ticket_size: Option<Decimal>,
    pub max_ticket_size: Option<Decimal>,
    pub lead_responsible: Option<UserRef>,
    pub lead_main_contact: Option<UserRef>,
    pub last_contact_date: Option<DateTime<Utc>>,
    pub next_follow_up_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMemberRecord {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: UserRole,
}

/// Insert parameters for a user row. Leads normally arrive through the
/// onboarding flow; this exists for seeding and tests.
#[derive(Debug, Clone, Default)]
pub struct CreateUserParams {
    pub name: String,
    pub email: String,
    pub company_name: Option<String>,
    pub role: UserRole,
    pub lead_status: Option<LeadStatus>,
    pub lead_priority: Option<LeadPriority>,
    pub lead_source: Option<LeadSource>,
    pub department: Option<Department>,
    pub min_ticket_size: Option<Decimal>,
    pub max_ticket_size: Option<Decimal>,
    pub lead_responsible_id: Option<Uuid>,
    pub lead_main_contact_id: Option<Uuid>,
    pub last_contact_date: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Per-field lead update. Outer `None` leaves a field untouched; inner `None`
/// clears it.
#[derive(Debug, Clone, Default)]
pub struct UpdateLeadParams {
    pub company_name: Option<Option<String>>,
    pub lead_priority: Option<Option<LeadPriority>>,
    pub lead_source: Option<Option<LeadSource>>,
    pub department: Option<Option<Department>>,
    pub min_ticket_size: Option<Option<Decimal>>,
    pub max_ticket_size: Option<Option<Decimal>>,
    pub lead_main_contact_id: Option<Option<Uuid>>,
}

impl UpdateLeadParams {
    /// Names of the fields this update touches, in a stable order.
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.company_name.is_some() {
            fields.push("companyName");
        }
        if self.lead_priority.is_some() {
            fields.push("priority");
        }
        if self.lead_source.is_some() {
            fields.push("leadSource");
        }
        if self.department.is_some() {
            fields.push("department");
        }
        if self.min_ticket_size.is_some() {
            fields.push("minTicketSize");
        }
        if self.max_ticket_size.is_some() {
            fields.push("maxTicketSize");
        }
        if self.lead_main_contact_id.is_some() {
            fields.push("mainContact");
        }
        fields
    }

    pub fn is_empty(&self) -> bool {
        self.changed_fields().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadNoteRecord {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub author: Option<UserRef>,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowUpRecord {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub created_by: Option<Uuid>,
    pub scheduled_at: DateTime<Utc>,
    pub channel: FollowUpChannel,
    pub notes: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateFollowUpParams {
    pub created_by: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub channel: FollowUpChannel,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub actor_id: Option<Uuid>,
    pub kind: ActivityKind,
    pub description: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Activity entry written alongside a lead change. `occurred_at` is also the
/// value stamped into `last_contact_date` by contact-touching actions.
#[derive(Debug, Clone)]
pub struct NewActivity {
    pub actor_id: Option<Uuid>,
    pub kind: ActivityKind,
    pub description: String,
    pub metadata: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

// ==================== Sub-traits ====================
//
// Each sub-trait groups related persistence methods. The `Database` supertrait
// combines them all; leaf consumers can depend on a specific sub-trait instead.

#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Count users matching `filter`. The caller supplies the role clause.
    async fn count_leads(&self, filter: &LeadFilter) -> Result<u64, DatabaseError>;
    /// Fetch one page of users matching `filter`.
    async fn find_leads(
        &self,
        filter: &LeadFilter,
        order: &LeadOrder,
        skip: u64,
        take: u64,
    ) -> Result<Vec<LeadRecord>, DatabaseError>;
    /// Load a lead by id. Returns `None` for unknown ids and non-lead users.
    async fn get_lead(&self, lead_id: Uuid) -> Result<Option<LeadRecord>, DatabaseError>;
    /// Apply a field update and append `activity`. Does not stamp contact.
    async fn update_lead(
        &self,
        lead_id: Uuid,
        input: &UpdateLeadParams,
        activity: &NewActivity,
    ) -> Result<Option<LeadRecord>, DatabaseError>;
    /// Set the responsible user, stamp contact, append `activity`.
    /// Returns `false` when the lead does not exist.
    async fn assign_lead(
        &self,
        lead_id: Uuid,
        responsible_id: Uuid,
        activity: &NewActivity,
    ) -> Result<bool, DatabaseError>;
    /// Set the pipeline status, stamp contact, append `activity`.
    /// Returns `false` when the lead does not exist.
    async fn set_lead_status(
        &self,
        lead_id: Uuid,
        status: LeadStatus,
        activity: &NewActivity,
    ) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait UserDirectoryStore: Send + Sync {
    async fn insert_user(&self, input: &CreateUserParams) -> Result<Uuid, DatabaseError>;
    async fn get_user_role(&self, user_id: Uuid) -> Result<Option<UserRole>, DatabaseError>;
    async fn get_team_member(
        &self,
        user_id: Uuid,
    ) -> Result<Option<TeamMemberRecord>, DatabaseError>;
    async fn list_team_members(&self) -> Result<Vec<TeamMemberRecord>, DatabaseError>;
}

#[async_trait]
pub trait LeadNoteStore: Send + Sync {
    /// Notes for a lead, newest first.
    async fn list_lead_notes(&self, lead_id: Uuid) -> Result<Vec<LeadNoteRecord>, DatabaseError>;
    /// Insert a note, stamp contact, append `activity`.
    /// Returns `None` when the lead does not exist.
    async fn create_lead_note(
        &self,
        lead_id: Uuid,
        author_id: Uuid,
        body: &str,
        activity: &NewActivity,
    ) -> Result<Option<LeadNoteRecord>, DatabaseError>;
}

#[async_trait]
pub trait FollowUpStore: Send + Sync {
    /// Follow-ups for a lead ordered by `scheduled_at`.
    async fn list_follow_ups(&self, lead_id: Uuid) -> Result<Vec<FollowUpRecord>, DatabaseError>;
    async fn get_follow_up(
        &self,
        lead_id: Uuid,
        follow_up_id: Uuid,
    ) -> Result<Option<FollowUpRecord>, DatabaseError>;
    /// Insert a follow-up, refresh `next_follow_up_date`, stamp contact,
    /// append `activity`. Returns `None` when the lead does not exist.
    async fn create_follow_up(
        &self,
        lead_id: Uuid,
        input: &CreateFollowUpParams,
        activity: &NewActivity,
    ) -> Result<Option<FollowUpRecord>, DatabaseError>;
    /// Mark an open follow-up completed, refresh `next_follow_up_date`,
    /// append `activity`. Returns `None` when no open follow-up matched.
    async fn complete_follow_up(
        &self,
        lead_id: Uuid,
        follow_up_id: Uuid,
        activity: &NewActivity,
    ) -> Result<Option<FollowUpRecord>, DatabaseError>;
    /// Delete a follow-up, refresh `next_follow_up_date`, append `activity`.
    async fn delete_follow_up(
        &self,
        lead_id: Uuid,
        follow_up_id: Uuid,
        activity: &NewActivity,
    ) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// Most recent activity entries for a lead, newest first.
    async fn list_lead_activities(
        &self,
        lead_id: Uuid,
        limit: u32,
    ) -> Result<Vec<ActivityRecord>, DatabaseError>;
}

/// Backend-agnostic database supertrait.
#[async_trait]
pub trait Database:
    LeadStore + UserDirectoryStore + LeadNoteStore + FollowUpStore + ActivityStore + Send + Sync
{
    /// Run schema migrations for this backend.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;
}
