//! Lead CRM: the lead list query, lead detail, lifecycle actions and the
//! audit trail they write to.

mod actions;
pub mod audit;
mod leads;

pub use actions::{MAX_FOLLOW_UP_NOTES_CHARS, MAX_NOTE_CHARS};
pub use leads::{
    Actor, DEFAULT_PAGE_SIZE, LeadDetail, LeadListItem, LeadListQuery, LeadService, MAX_PAGE_SIZE,
    Page, RECENT_ACTIVITY_LIMIT, build_lead_filter, parse_date_bound,
};
