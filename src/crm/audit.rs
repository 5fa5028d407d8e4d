//! Append-only audit trail of lead actions.
//!
//! One JSON object per line. With hash chaining on, each line carries the
//! SHA-256 of its own serialization (taken before `hash` is filled in) and the
//! previous line's hash.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::sync::{Mutex, OnceLock};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::AuditConfig;

/// Running totals written into every event.
#[derive(Debug, Default, Clone, Serialize)]
struct ActionCounters {
    actions_recorded: u64,
    actions_rejected: u64,
    requests_denied: u64,
}

#[derive(Debug, Serialize)]
struct AuditLine<'a> {
    ts: String,
    event_type: &'a str,
    actor_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    lead_id: Option<Uuid>,
    details: serde_json::Value,
    counters: ActionCounters,
    #[serde(skip_serializing_if = "Option::is_none")]
    prev_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hash: Option<String>,
}

struct AuditLog {
    path: PathBuf,
    hash_chain: bool,
    last_hash: Mutex<Option<String>>,
    counters: Mutex<ActionCounters>,
}

impl AuditLog {
    fn new(path: PathBuf, hash_chain: bool) -> Self {
        Self {
            path,
            hash_chain,
            last_hash: Mutex::new(None),
            counters: Mutex::new(ActionCounters::default()),
        }
    }

    fn bump<F>(&self, update: F)
    where
        F: FnOnce(&mut ActionCounters),
    {
        if let Ok(mut counters) = self.counters.lock() {
            update(&mut counters);
        }
    }

    fn append(
        &self,
        event_type: &str,
        actor_id: Uuid,
        lead_id: Option<Uuid>,
        details: serde_json::Value,
    ) {
        // Both locks are held until the line is on disk so the chain order
        // matches the file order.
        let mut counters = match self.counters.lock() {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("CRM audit counters lock poisoned: {}", e);
                return;
            }
        };
        let mut last_hash = match self.last_hash.lock() {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!("CRM audit chain lock poisoned: {}", e);
                return;
            }
        };
        counters.actions_recorded += 1;

        let mut line = AuditLine {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            event_type,
            actor_id,
            lead_id,
            details,
            counters: counters.clone(),
            prev_hash: last_hash.clone(),
            hash: None,
        };

        let mut next_hash = None;
        if self.hash_chain {
            let unsigned = match serde_json::to_string(&line) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("Failed to serialize CRM audit event for hashing: {}", e);
                    return;
                }
            };
            let digest = format!("{:x}", Sha256::digest(unsigned.as_bytes()));
            line.hash = Some(digest.clone());
            next_hash = Some(digest);
        }

        let serialized = match serde_json::to_string(&line) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Failed to serialize CRM audit event: {}", e);
                return;
            }
        };

        if self.write_line(&serialized) && next_hash.is_some() {
            *last_hash = next_hash;
        }
    }

    /// Append one line. Returns `false` if nothing was written.
    fn write_line(&self, serialized: &str) -> bool {
        if let Some(parent) = self.path.parent()
            && let Err(e) = std::fs::create_dir_all(parent)
        {
            tracing::warn!("Failed to create CRM audit log dir {:?}: {}", parent, e);
            return false;
        }

        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = match options.open(&self.path) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!("Failed to open CRM audit log {:?}: {}", self.path, e);
                return false;
            }
        };

        // Pre-existing files keep their mode; anything looser than 0600 is refused.
        #[cfg(unix)]
        match file.metadata() {
            Ok(meta) if meta.permissions().mode() & 0o777 == 0o600 => {}
            Ok(meta) => {
                tracing::warn!(
                    "Refusing to append CRM audit event; mode {:o} on {:?} (expected 600)",
                    meta.permissions().mode() & 0o777,
                    self.path
                );
                return false;
            }
            Err(e) => {
                tracing::warn!("Failed to stat CRM audit log {:?}: {}", self.path, e);
                return false;
            }
        }

        match writeln!(file, "{serialized}") {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to append CRM audit event: {}", e);
                false
            }
        }
    }
}

static LOG: OnceLock<AuditLog> = OnceLock::new();
#[cfg(test)]
static TEST_EVENTS: OnceLock<Mutex<Vec<RecordedEvent>>> = OnceLock::new();

#[cfg(test)]
#[derive(Debug, Clone)]
pub(crate) struct RecordedEvent {
    pub event_type: String,
    pub actor_id: Uuid,
    pub lead_id: Option<Uuid>,
    pub details: serde_json::Value,
}

/// Install the process-wide audit log. No-op when disabled or already set.
pub fn init(config: &AuditConfig) {
    if !config.enabled {
        tracing::info!("CRM audit log disabled");
        return;
    }
    if LOG
        .set(AuditLog::new(config.path.clone(), config.hash_chain))
        .is_ok()
    {
        tracing::info!(path = %config.path.display(), hash_chain = config.hash_chain, "CRM audit log enabled");
    }
}

/// Record a completed lead action.
pub fn record(event_type: &str, actor_id: Uuid, lead_id: Option<Uuid>, details: serde_json::Value) {
    #[cfg(test)]
    capture(event_type, actor_id, lead_id, &details);
    if let Some(log) = LOG.get() {
        log.append(event_type, actor_id, lead_id, details);
    }
}

/// Count an action refused for a failed precondition or invalid input.
pub fn inc_rejected_action() {
    if let Some(log) = LOG.get() {
        log.bump(|c| c.actions_rejected += 1);
    }
}

/// Count a request refused by authentication or authorization.
pub fn inc_denied_request() {
    if let Some(log) = LOG.get() {
        log.bump(|c| c.requests_denied += 1);
    }
}

#[cfg(test)]
fn capture(event_type: &str, actor_id: Uuid, lead_id: Option<Uuid>, details: &serde_json::Value) {
    let events = TEST_EVENTS.get_or_init(|| Mutex::new(Vec::new()));
    if let Ok(mut lock) = events.lock() {
        lock.push(RecordedEvent {
            event_type: event_type.to_string(),
            actor_id,
            lead_id,
            details: details.clone(),
        });
    }
}

/// Events captured for `lead_id`. Tests run in parallel, so callers filter by
/// their own lead instead of clearing the shared buffer.
#[cfg(test)]
pub(crate) fn recorded_for(lead_id: Uuid) -> Vec<RecordedEvent> {
    TEST_EVENTS
        .get()
        .and_then(|events| {
            events.lock().ok().map(|lock| {
                lock.iter()
                    .filter(|e| e.lead_id == Some(lead_id))
                    .cloned()
                    .collect()
            })
        })
        .unwrap_or_default()
}
