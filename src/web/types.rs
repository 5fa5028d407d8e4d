//! Request and response DTOs for the gateway. Field names are camelCase on
//! the wire.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::crm::{LeadDetail, LeadListItem};
use crate::db::{
    ActivityKind, ActivityRecord, Department, FollowUpChannel, FollowUpRecord, LeadNoteRecord,
    LeadPriority, LeadSource, LeadStatus, TeamMemberRecord, UpdateLeadParams, UserRef, UserRole,
};

// --- Health ---

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

// --- Lead actions ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignLeadRequest {
    pub responsible_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct AddNoteRequest {
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangeStatusRequest {
    pub status: LeadStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleFollowUpRequest {
    pub scheduled_at: DateTime<Utc>,
    pub channel: FollowUpChannel,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Distinguishes an absent field (leave unchanged) from an explicit `null`
/// (clear it).
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// PATCH body. Every field is optional; `null` clears.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateLeadRequest {
    #[serde(default, deserialize_with = "nullable")]
    pub company_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub priority: Option<Option<LeadPriority>>,
    #[serde(default, deserialize_with = "nullable")]
    pub lead_source: Option<Option<LeadSource>>,
    #[serde(default, deserialize_with = "nullable")]
    pub department: Option<Option<Department>>,
    #[serde(default, deserialize_with = "nullable")]
    pub min_ticket_size: Option<Option<Decimal>>,
    #[serde(default, deserialize_with = "nullable")]
    pub max_ticket_size: Option<Option<Decimal>>,
    #[serde(default, deserialize_with = "nullable")]
    pub main_contact_id: Option<Option<Uuid>>,
}

impl From<UpdateLeadRequest> for UpdateLeadParams {
    fn from(req: UpdateLeadRequest) -> Self {
        Self {
            company_name: req.company_name,
            lead_priority: req.priority,
            lead_source: req.lead_source,
            department: req.department,
            min_ticket_size: req.min_ticket_size,
            max_ticket_size: req.max_ticket_size,
            lead_main_contact_id: req.main_contact_id,
        }
    }
}

// --- Lead detail ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteInfo {
    pub id: Uuid,
    pub body: String,
    pub author: Option<UserRef>,
    pub created_at: DateTime<Utc>,
}

impl From<LeadNoteRecord> for NoteInfo {
    fn from(note: LeadNoteRecord) -> Self {
        Self {
            id: note.id,
            body: note.body,
            author: note.author,
            created_at: note.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpInfo {
    pub id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub channel: FollowUpChannel,
    pub notes: Option<String>,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<FollowUpRecord> for FollowUpInfo {
    fn from(f: FollowUpRecord) -> Self {
        Self {
            id: f.id,
            scheduled_at: f.scheduled_at,
            channel: f.channel,
            notes: f.notes,
            completed: f.completed_at.is_some(),
            completed_at: f.completed_at,
            created_by: f.created_by,
            created_at: f.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityInfo {
    pub id: Uuid,
    pub kind: ActivityKind,
    pub description: String,
    pub actor_id: Option<Uuid>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl From<ActivityRecord> for ActivityInfo {
    fn from(a: ActivityRecord) -> Self {
        Self {
            id: a.id,
            kind: a.kind,
            description: a.description,
            actor_id: a.actor_id,
            metadata: a.metadata,
            created_at: a.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadDetailResponse {
    #[serde(flatten)]
    pub lead: LeadListItem,
    pub notes: Vec<NoteInfo>,
    pub follow_ups: Vec<FollowUpInfo>,
    pub activities: Vec<ActivityInfo>,
}

impl From<LeadDetail> for LeadDetailResponse {
    fn from(detail: LeadDetail) -> Self {
        Self {
            lead: detail.lead,
            notes: detail.notes.into_iter().map(NoteInfo::from).collect(),
            follow_ups: detail.follow_ups.into_iter().map(FollowUpInfo::from).collect(),
            activities: detail.activities.into_iter().map(ActivityInfo::from).collect(),
        }
    }
}

// --- Team ---

#[derive(Debug, Serialize)]
pub struct TeamMemberInfo {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: UserRole,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMemberListResponse {
    pub team_members: Vec<TeamMemberInfo>,
}

impl From<TeamMemberRecord> for TeamMemberInfo {
    fn from(m: TeamMemberRecord) -> Self {
        Self {
            id: m.id,
            name: m.name,
            email: m.email,
            role: m.role,
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn patch_body_distinguishes_absent_from_null() {
        let req: UpdateLeadRequest = serde_json::from_value(serde_json::json!({
            "priority": "HIGH",
            "companyName": null,
            "minTicketSize": "250000.00",
        }))
        .expect("parse");
        let params = UpdateLeadParams::from(req);
        assert_eq!(params.lead_priority, Some(Some(LeadPriority::High)));
        assert_eq!(params.company_name, Some(None));
        assert_eq!(params.min_ticket_size, Some(Some(dec!(250000.00))));
        assert_eq!(params.department, None);
        assert_eq!(params.lead_main_contact_id, None);
    }

    #[test]
    fn patch_body_rejects_unknown_fields() {
        let parsed = serde_json::from_value::<UpdateLeadRequest>(serde_json::json!({
            "status": "QUALIFIED",
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn follow_up_request_parses_rfc3339() {
        let req: ScheduleFollowUpRequest = serde_json::from_value(serde_json::json!({
            "scheduledAt": "2030-05-01T09:30:00Z",
            "channel": "CALL",
        }))
        .expect("parse");
        assert_eq!(req.channel, FollowUpChannel::Call);
        assert!(req.notes.is_none());
    }
}
