//! Lead list query, lead detail, and the actor check every lead operation
//! runs first.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::query::{Clause, Column, SqlValue};
use crate::db::{
    ActivityRecord, Database, Department, FollowUpRecord, LeadFilter, LeadNoteRecord, LeadOrder,
    LeadPriority, LeadRecord, LeadSortField, LeadSource, LeadStatus, SortDirection,
    TeamMemberRecord, UserRef, UserRole,
};
use crate::error::LeadError;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;
/// Activity entries shown on the lead detail view.
pub const RECENT_ACTIVITY_LIMIT: u32 = 50;

/// Filter, sort and pagination input of the lead list.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LeadListQuery {
    pub page: u32,
    pub page_size: u32,
    pub search: Option<String>,
    pub lead_source: Option<LeadSource>,
    pub assigned_to: Option<Uuid>,
    pub department: Option<Department>,
    pub status: Option<LeadStatus>,
    pub priority: Option<LeadPriority>,
    pub last_contact_date_from: Option<String>,
    pub last_contact_date_to: Option<String>,
    pub sort_by: LeadSortField,
    pub sort_direction: SortDirection,
}

impl Default for LeadListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            search: None,
            lead_source: None,
            assigned_to: None,
            department: None,
            status: None,
            priority: None,
            last_contact_date_from: None,
            last_contact_date_to: None,
            sort_by: LeadSortField::default(),
            sort_direction: SortDirection::default(),
        }
    }
}

impl LeadListQuery {
    /// Check pagination bounds.
    pub fn validate(&self) -> Result<(), LeadError> {
        if self.page < 1 {
            return Err(LeadError::Validation("page must be at least 1".to_string()));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.page_size) {
            return Err(LeadError::Validation(format!(
                "pageSize must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        Ok(())
    }

    pub fn order(&self) -> LeadOrder {
        LeadOrder {
            field: self.sort_by,
            direction: self.sort_direction,
        }
    }

    /// Search term with surrounding whitespace removed; blank counts as absent.
    fn search_term(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Parse a date filter bound. A bare `YYYY-MM-DD` covers the whole day: the
/// start of it for a lower bound, the last microsecond for an upper bound.
pub fn parse_date_bound(raw: &str, field: &str, upper: bool) -> Result<DateTime<Utc>, LeadError> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        let time = if upper {
            date.and_hms_micro_opt(23, 59, 59, 999_999)
        } else {
            date.and_hms_opt(0, 0, 0)
        };
        return time
            .map(|t| t.and_utc())
            .ok_or_else(|| LeadError::Validation(format!("{field} is out of range")));
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| {
            LeadError::Validation(format!(
                "{field} must be a date (YYYY-MM-DD) or an RFC 3339 timestamp"
            ))
        })
}

/// Translate the list input into store clauses. The role clause comes first
/// and is not optional.
pub fn build_lead_filter(query: &LeadListQuery) -> Result<LeadFilter, LeadError> {
    let mut filter = LeadFilter::new();
    filter.push(Clause::Equals {
        column: Column::Role,
        value: SqlValue::Text(UserRole::User.as_str().to_string()),
    });

    if let Some(term) = query.search_term() {
        filter.push(Clause::OrGroup(
            [Column::Name, Column::Email, Column::CompanyName]
                .into_iter()
                .map(|column| Clause::Contains {
                    column,
                    needle: term.to_string(),
                })
                .collect(),
        ));
    }

    if let Some(user_id) = query.assigned_to {
        filter.push(Clause::OrGroup(vec![
            Clause::Equals {
                column: Column::LeadResponsibleId,
                value: SqlValue::Uuid(user_id),
            },
            Clause::Equals {
                column: Column::LeadMainContactId,
                value: SqlValue::Uuid(user_id),
            },
        ]));
    }

    let exact = [
        (Column::LeadSource, query.lead_source.map(LeadSource::as_str)),
        (Column::Department, query.department.map(Department::as_str)),
        (Column::LeadStatus, query.status.map(LeadStatus::as_str)),
        (Column::LeadPriority, query.priority.map(LeadPriority::as_str)),
    ];
    for (column, value) in exact {
        if let Some(value) = value {
            filter.push(Clause::Equals {
                column,
                value: SqlValue::Text(value.to_string()),
            });
        }
    }

    let from = query
        .last_contact_date_from
        .as_deref()
        .map(|raw| parse_date_bound(raw, "lastContactDateFrom", false))
        .transpose()?;
    let to = query
        .last_contact_date_to
        .as_deref()
        .map(|raw| parse_date_bound(raw, "lastContactDateTo", true))
        .transpose()?;
    if let (Some(from), Some(to)) = (from, to)
        && from > to
    {
        return Err(LeadError::Validation(
            "lastContactDateFrom must not be after lastContactDateTo".to_string(),
        ));
    }
    if from.is_some() || to.is_some() {
        filter.push(Clause::Range {
            column: Column::LastContactDate,
            from: from.map(SqlValue::Timestamp),
            to: to.map(SqlValue::Timestamp),
        });
    }

    Ok(filter)
}

/// Paginated response envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total_count: u64,
    pub total_pages: u64,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, page: u32, page_size: u32, total_count: u64) -> Self {
        let total_pages = total_count.div_ceil(u64::from(page_size.max(1)));
        Self {
            items,
            page,
            page_size,
            total_count,
            total_pages,
            has_next_page: u64::from(page) < total_pages,
            has_previous_page: page > 1,
        }
    }
}

/// A lead as the list and detail views show it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadListItem {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub company_name: Option<String>,
    pub status: LeadStatus,
    pub priority: Option<LeadPriority>,
    pub lead_source: Option<LeadSource>,
    pub department: Option<Department>,
    pub min_ticket_size: Option<Decimal>,
    pub max_ticket_size: Option<Decimal>,
    pub lead_responsible: Option<UserRef>,
    pub lead_main_contact: Option<UserRef>,
    pub last_contact_date: Option<DateTime<Utc>>,
    pub next_follow_up_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<LeadRecord> for LeadListItem {
    fn from(record: LeadRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            email: record.email,
            company_name: record.company_name,
            status: record.lead_status.unwrap_or(LeadStatus::New),
            priority: record.lead_priority,
            lead_source: record.lead_source,
            department: record.department,
            min_ticket_size: record.min_ticket_size,
            max_ticket_size: record.max_ticket_size,
            lead_responsible: record.lead_responsible,
            lead_main_contact: record.lead_main_contact,
            last_contact_date: record.last_contact_date,
            next_follow_up_date: record.next_follow_up_date,
            created_at: record.created_at,
        }
    }
}

/// Lead with its child collections.
#[derive(Debug, Clone)]
pub struct LeadDetail {
    pub lead: LeadListItem,
    pub notes: Vec<LeadNoteRecord>,
    pub follow_ups: Vec<FollowUpRecord>,
    pub activities: Vec<ActivityRecord>,
}

/// An authenticated team member or admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub role: UserRole,
}

/// Read side of the lead CRM, plus the lead actions in `actions.rs`.
#[derive(Clone)]
pub struct LeadService {
    pub(crate) db: Arc<dyn Database>,
}

impl LeadService {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Resolve a user id to an actor allowed to work leads.
    pub async fn authorize_actor(&self, user_id: Uuid) -> Result<Actor, LeadError> {
        match self.db.get_user_role(user_id).await? {
            Some(role) if role.is_staff() => Ok(Actor { id: user_id, role }),
            Some(_) => Err(LeadError::Forbidden(
                "lead management requires a team member or admin".to_string(),
            )),
            None => Err(LeadError::Forbidden("unknown user".to_string())),
        }
    }

    /// One page of leads matching `query`.
    pub async fn list_leads(&self, query: &LeadListQuery) -> Result<Page<LeadListItem>, LeadError> {
        query.validate()?;
        let filter = build_lead_filter(query)?;
        let order = query.order();
        let skip = u64::from(query.page - 1) * u64::from(query.page_size);
        let take = u64::from(query.page_size);

        let (total_count, records) = tokio::try_join!(
            self.db.count_leads(&filter),
            self.db.find_leads(&filter, &order, skip, take),
        )?;

        tracing::debug!(
            page = query.page,
            page_size = query.page_size,
            total_count,
            returned = records.len(),
            "lead list query"
        );

        let items = records.into_iter().map(LeadListItem::from).collect();
        Ok(Page::new(items, query.page, query.page_size, total_count))
    }

    pub async fn get_lead_detail(&self, lead_id: Uuid) -> Result<LeadDetail, LeadError> {
        let lead = self
            .db
            .get_lead(lead_id)
            .await?
            .ok_or_else(|| LeadError::NotFound(format!("lead {lead_id}")))?;
        let (notes, follow_ups, activities) = tokio::try_join!(
            self.db.list_lead_notes(lead_id),
            self.db.list_follow_ups(lead_id),
            self.db.list_lead_activities(lead_id, RECENT_ACTIVITY_LIMIT),
        )?;
        Ok(LeadDetail {
            lead: lead.into(),
            notes,
            follow_ups,
            activities,
        })
    }

    /// Users a lead can be assigned to, by name.
    pub async fn list_team_members(&self) -> Result<Vec<TeamMemberRecord>, LeadError> {
        Ok(self.db.list_team_members().await?)
    }
}
