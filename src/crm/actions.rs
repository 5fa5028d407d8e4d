//! Lead lifecycle actions.
//!
//! Contact-touching actions (assign, note, follow-up, status) stamp
//! `last_contact_date` and append their activity entry inside the store call,
//! so the write, the stamp and the log commit together.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

use crate::crm::audit;
use crate::crm::leads::{Actor, LeadListItem, LeadService};
use crate::db::{
    ActivityKind, CreateFollowUpParams, FollowUpChannel, FollowUpRecord, LeadNoteRecord,
    LeadRecord, LeadStatus, NewActivity, UpdateLeadParams, UserRole,
};
use crate::error::LeadError;

pub const MAX_NOTE_CHARS: usize = 10_000;
pub const MAX_FOLLOW_UP_NOTES_CHARS: usize = 2_000;
const MAX_TICKET_SCALE: u32 = 2;
const MAX_TICKET_SIZE_EXCLUSIVE: i64 = 1_000_000_000_000_000_000;

/// Count the failure and hand it back.
fn rejected(err: LeadError) -> LeadError {
    audit::inc_rejected_action();
    err
}

fn entry(actor: &Actor, kind: ActivityKind, description: String, metadata: serde_json::Value) -> NewActivity {
    NewActivity {
        actor_id: Some(actor.id),
        kind,
        description,
        metadata,
        occurred_at: Utc::now(),
    }
}

/// Ticket sizes fit `NUMERIC(20, 2)`: at most two decimal places and below 10^18.
fn check_ticket_size(field: &str, value: Option<Option<Decimal>>) -> Result<(), LeadError> {
    let Some(Some(v)) = value else {
        return Ok(());
    };
    if v.is_sign_negative() && !v.is_zero() {
        return Err(LeadError::Validation(format!("{field} must not be negative")));
    }
    if v.normalize().scale() > MAX_TICKET_SCALE {
        return Err(LeadError::Validation(format!(
            "{field} must have at most {MAX_TICKET_SCALE} decimal places"
        )));
    }
    if v >= Decimal::from(MAX_TICKET_SIZE_EXCLUSIVE) {
        return Err(LeadError::Validation(format!(
            "{field} must be less than {MAX_TICKET_SIZE_EXCLUSIVE}"
        )));
    }
    Ok(())
}

/// Trimmed text, `None` when blank.
fn non_blank(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl LeadService {
    async fn require_lead(&self, lead_id: Uuid) -> Result<LeadRecord, LeadError> {
        self.db
            .get_lead(lead_id)
            .await?
            .ok_or_else(|| LeadError::NotFound(format!("lead {lead_id}")))
    }

    async fn reload(&self, lead_id: Uuid) -> Result<LeadListItem, LeadError> {
        Ok(self.require_lead(lead_id).await?.into())
    }

    /// Make `responsible_id` the lead's responsible team member.
    pub async fn assign_lead(
        &self,
        actor: &Actor,
        lead_id: Uuid,
        responsible_id: Uuid,
    ) -> Result<LeadListItem, LeadError> {
        let Some(target) = self.db.get_team_member(responsible_id).await? else {
            let reason = match self.db.get_user_role(responsible_id).await? {
                Some(UserRole::User) => "leads can only be assigned to team members or admins",
                _ => "assignee does not exist",
            };
            return Err(rejected(LeadError::Precondition(reason.to_string())));
        };
        let lead = self.require_lead(lead_id).await?;
        let previous = lead.lead_responsible.map(|r| r.id);

        let activity = entry(
            actor,
            ActivityKind::Assigned,
            format!("Assigned to {}", target.name),
            json!({ "responsibleId": target.id, "previousResponsibleId": previous }),
        );
        if !self.db.assign_lead(lead_id, target.id, &activity).await? {
            return Err(LeadError::NotFound(format!("lead {lead_id}")));
        }

        tracing::info!(%lead_id, actor = %actor.id, responsible = %target.id, "lead assigned");
        audit::record(
            "lead_assigned",
            actor.id,
            Some(lead_id),
            json!({ "responsible_id": target.id, "previous_responsible_id": previous }),
        );
        self.reload(lead_id).await
    }

    /// Attach a note authored by `actor`.
    pub async fn add_note(
        &self,
        actor: &Actor,
        lead_id: Uuid,
        body: &str,
    ) -> Result<LeadNoteRecord, LeadError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(rejected(LeadError::Validation(
                "note body must not be empty".to_string(),
            )));
        }
        let length = body.chars().count();
        if length > MAX_NOTE_CHARS {
            return Err(rejected(LeadError::Validation(format!(
                "note body must be at most {MAX_NOTE_CHARS} characters"
            ))));
        }

        let activity = entry(
            actor,
            ActivityKind::NoteAdded,
            "Note added".to_string(),
            json!({ "length": length }),
        );
        let note = self
            .db
            .create_lead_note(lead_id, actor.id, body, &activity)
            .await?
            .ok_or_else(|| LeadError::NotFound(format!("lead {lead_id}")))?;

        tracing::info!(%lead_id, actor = %actor.id, note_id = %note.id, "lead note added");
        audit::record(
            "lead_note_added",
            actor.id,
            Some(lead_id),
            json!({ "note_id": note.id, "length": length }),
        );
        Ok(note)
    }

    pub async fn schedule_follow_up(
        &self,
        actor: &Actor,
        lead_id: Uuid,
        scheduled_at: DateTime<Utc>,
        channel: FollowUpChannel,
        notes: Option<&str>,
    ) -> Result<FollowUpRecord, LeadError> {
        let notes = non_blank(notes);
        if notes
            .as_deref()
            .is_some_and(|n| n.chars().count() > MAX_FOLLOW_UP_NOTES_CHARS)
        {
            return Err(rejected(LeadError::Validation(format!(
                "follow-up notes must be at most {MAX_FOLLOW_UP_NOTES_CHARS} characters"
            ))));
        }

        let activity = entry(
            actor,
            ActivityKind::FollowUpScheduled,
            format!(
                "Follow-up ({}) scheduled for {}",
                channel.as_str(),
                scheduled_at.format("%Y-%m-%d %H:%M UTC")
            ),
            json!({ "scheduledAt": scheduled_at, "channel": channel }),
        );
        let follow_up = self
            .db
            .create_follow_up(
                lead_id,
                &CreateFollowUpParams {
                    created_by: actor.id,
                    scheduled_at,
                    channel,
                    notes,
                },
                &activity,
            )
            .await?
            .ok_or_else(|| LeadError::NotFound(format!("lead {lead_id}")))?;

        tracing::info!(%lead_id, actor = %actor.id, follow_up_id = %follow_up.id, "follow-up scheduled");
        audit::record(
            "lead_follow_up_scheduled",
            actor.id,
            Some(lead_id),
            json!({
                "follow_up_id": follow_up.id,
                "scheduled_at": scheduled_at,
                "channel": channel.as_str(),
            }),
        );
        Ok(follow_up)
    }

    /// Move the lead to `status`. An unset stored status counts as NEW.
    pub async fn change_status(
        &self,
        actor: &Actor,
        lead_id: Uuid,
        status: LeadStatus,
    ) -> Result<LeadListItem, LeadError> {
        let lead = self.require_lead(lead_id).await?;
        let from = lead.lead_status.unwrap_or(LeadStatus::New);

        let activity = entry(
            actor,
            ActivityKind::StatusChanged,
            format!("Status changed from {} to {}", from.as_str(), status.as_str()),
            json!({ "from": from, "to": status }),
        );
        if !self.db.set_lead_status(lead_id, status, &activity).await? {
            return Err(LeadError::NotFound(format!("lead {lead_id}")));
        }

        tracing::info!(%lead_id, actor = %actor.id, from = from.as_str(), to = status.as_str(), "lead status changed");
        audit::record(
            "lead_status_changed",
            actor.id,
            Some(lead_id),
            json!({ "from": from.as_str(), "to": status.as_str() }),
        );
        self.reload(lead_id).await
    }

    /// Set or clear individual lead fields. Does not count as contact.
    pub async fn update_lead(
        &self,
        actor: &Actor,
        lead_id: Uuid,
        mut input: UpdateLeadParams,
    ) -> Result<LeadListItem, LeadError> {
        if input.is_empty() {
            return Err(rejected(LeadError::Validation(
                "update must change at least one field".to_string(),
            )));
        }
        check_ticket_size("minTicketSize", input.min_ticket_size).map_err(rejected)?;
        check_ticket_size("maxTicketSize", input.max_ticket_size).map_err(rejected)?;
        if let Some(company) = input.company_name.take() {
            input.company_name = Some(non_blank(company.as_deref()));
        }

        let lead = self.require_lead(lead_id).await?;
        let min = input.min_ticket_size.unwrap_or(lead.min_ticket_size);
        let max = input.max_ticket_size.unwrap_or(lead.max_ticket_size);
        if let (Some(min), Some(max)) = (min, max)
            && min > max
        {
            return Err(rejected(LeadError::Validation(
                "minTicketSize must not exceed maxTicketSize".to_string(),
            )));
        }
        if let Some(Some(contact_id)) = input.lead_main_contact_id
            && self.db.get_user_role(contact_id).await?.is_none()
        {
            return Err(rejected(LeadError::Precondition(
                "main contact does not exist".to_string(),
            )));
        }

        let fields = input.changed_fields();
        let activity = entry(
            actor,
            ActivityKind::FieldUpdated,
            format!("Updated {}", fields.join(", ")),
            json!({ "fields": fields }),
        );
        let updated = self
            .db
            .update_lead(lead_id, &input, &activity)
            .await?
            .ok_or_else(|| LeadError::NotFound(format!("lead {lead_id}")))?;

        tracing::info!(%lead_id, actor = %actor.id, ?fields, "lead updated");
        audit::record(
            "lead_updated",
            actor.id,
            Some(lead_id),
            json!({ "fields": fields }),
        );
        Ok(updated.into())
    }

    pub async fn complete_follow_up(
        &self,
        actor: &Actor,
        lead_id: Uuid,
        follow_up_id: Uuid,
    ) -> Result<FollowUpRecord, LeadError> {
        let existing = self
            .db
            .get_follow_up(lead_id, follow_up_id)
            .await?
            .ok_or_else(|| LeadError::NotFound(format!("follow-up {follow_up_id}")))?;
        if existing.completed_at.is_some() {
            return Err(rejected(LeadError::Precondition(
                "follow-up is already completed".to_string(),
            )));
        }

        let activity = entry(
            actor,
            ActivityKind::FollowUpCompleted,
            format!("Follow-up ({}) completed", existing.channel.as_str()),
            json!({ "followUpId": follow_up_id }),
        );
        let completed = self
            .db
            .complete_follow_up(lead_id, follow_up_id, &activity)
            .await?
            .ok_or_else(|| {
                rejected(LeadError::Precondition(
                    "follow-up is already completed".to_string(),
                ))
            })?;

        tracing::info!(%lead_id, actor = %actor.id, %follow_up_id, "follow-up completed");
        audit::record(
            "lead_follow_up_completed",
            actor.id,
            Some(lead_id),
            json!({ "follow_up_id": follow_up_id }),
        );
        Ok(completed)
    }

    pub async fn remove_follow_up(
        &self,
        actor: &Actor,
        lead_id: Uuid,
        follow_up_id: Uuid,
    ) -> Result<(), LeadError> {
        let existing = self
            .db
            .get_follow_up(lead_id, follow_up_id)
            .await?
            .ok_or_else(|| LeadError::NotFound(format!("follow-up {follow_up_id}")))?;

        let activity = entry(
            actor,
            ActivityKind::FollowUpRemoved,
            format!("Follow-up ({}) removed", existing.channel.as_str()),
            json!({ "followUpId": follow_up_id, "scheduledAt": existing.scheduled_at }),
        );
        if !self
            .db
            .delete_follow_up(lead_id, follow_up_id, &activity)
            .await?
        {
            return Err(LeadError::NotFound(format!("follow-up {follow_up_id}")));
        }

        tracing::info!(%lead_id, actor = %actor.id, %follow_up_id, "follow-up removed");
        audit::record(
            "lead_follow_up_removed",
            actor.id,
            Some(lead_id),
            json!({ "follow_up_id": follow_up_id }),
        );
        Ok(())
    }
}
