//! SQLite-dialect schema for the libSQL backend.
//!
//! Mirrors `migrations/postgres`. UUIDs are TEXT, timestamps are fixed-width
//! RFC 3339 TEXT in UTC, money columns are exact decimal TEXT. Every statement is
//! idempotent so the schema can be applied on each start.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE,
    company_name TEXT,
    role TEXT NOT NULL DEFAULT 'USER'
        CHECK (role IN ('USER', 'TEAM_MEMBER', 'ADMIN')),
    lead_status TEXT
        CHECK (lead_status IN ('NEW', 'CONTACTED', 'QUALIFIED', 'PROPOSAL',
                               'NEGOTIATION', 'CLOSED_WON', 'CLOSED_LOST', 'ON_HOLD')),
    lead_priority TEXT
        CHECK (lead_priority IN ('LOW', 'MEDIUM', 'HIGH', 'URGENT')),
    lead_source TEXT
        CHECK (lead_source IN ('REFERRAL', 'WEBSITE', 'LINKEDIN', 'EVENT',
                               'COLD_OUTREACH', 'ACCESS_REQUEST', 'OTHER')),
    department TEXT
        CHECK (department IN ('M_A', 'CRE', 'BOTH')),
    min_ticket_size TEXT
        CHECK (min_ticket_size IS NULL OR CAST(min_ticket_size AS REAL) >= 0),
    max_ticket_size TEXT
        CHECK (max_ticket_size IS NULL OR CAST(max_ticket_size AS REAL) >= 0),
    lead_responsible_id TEXT REFERENCES users(id) ON DELETE SET NULL,
    lead_main_contact_id TEXT REFERENCES users(id) ON DELETE SET NULL,
    last_contact_date TEXT,
    next_follow_up_date TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_users_role ON users(role);
CREATE INDEX IF NOT EXISTS idx_users_lead_status ON users(lead_status);
CREATE INDEX IF NOT EXISTS idx_users_lead_responsible ON users(lead_responsible_id);
CREATE INDEX IF NOT EXISTS idx_users_last_contact ON users(last_contact_date);
CREATE INDEX IF NOT EXISTS idx_users_created_at ON users(created_at);

CREATE TABLE IF NOT EXISTS lead_notes (
    id TEXT PRIMARY KEY,
    lead_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    author_id TEXT REFERENCES users(id) ON DELETE SET NULL,
    body TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_lead_notes_lead ON lead_notes(lead_id, created_at);

CREATE TABLE IF NOT EXISTS lead_follow_ups (
    id TEXT PRIMARY KEY,
    lead_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    created_by TEXT REFERENCES users(id) ON DELETE SET NULL,
    scheduled_at TEXT NOT NULL,
    channel TEXT NOT NULL CHECK (channel IN ('CALL', 'EMAIL', 'MEETING', 'OTHER')),
    notes TEXT,
    completed_at TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_lead_follow_ups_lead ON lead_follow_ups(lead_id, scheduled_at);

CREATE TABLE IF NOT EXISTS lead_activities (
    id TEXT PRIMARY KEY,
    lead_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    actor_id TEXT REFERENCES users(id) ON DELETE SET NULL,
    kind TEXT NOT NULL
        CHECK (kind IN ('ASSIGNED', 'NOTE_ADDED', 'FOLLOW_UP_SCHEDULED', 'FOLLOW_UP_COMPLETED',
                        'FOLLOW_UP_REMOVED', 'STATUS_CHANGED', 'FIELD_UPDATED')),
    description TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_lead_activities_lead ON lead_activities(lead_id, created_at);
"#;
