//! Shared fixtures for unit tests.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::libsql::LibSqlBackend;
use crate::db::{CreateUserParams, Database, UserRole};

/// A migrated temp-file libSQL database. Keep the fixture alive for the
/// duration of the test; dropping it removes the file.
pub(crate) struct TestDb {
    pub db: Arc<dyn Database>,
    _tmpdir: tempfile::TempDir,
}

pub(crate) async fn test_db() -> TestDb {
    // Temp file rather than :memory: so every connection sees the same data.
    let tmpdir = tempfile::tempdir().expect("tempdir");
    let backend = LibSqlBackend::new_local(&tmpdir.path().join("crm_test.db"))
        .await
        .expect("local backend should initialize");
    backend
        .run_migrations()
        .await
        .expect("migrations should succeed");
    TestDb {
        db: Arc::new(backend),
        _tmpdir: tmpdir,
    }
}

impl TestDb {
    pub async fn staff(&self, name: &str, role: UserRole) -> Uuid {
        self.db
            .insert_user(&CreateUserParams {
                name: name.to_string(),
                email: format!("{}@firm.test", name.to_lowercase().replace(' ', ".")),
                role,
                ..Default::default()
            })
            .await
            .expect("insert staff")
    }

    pub async fn lead(&self, params: CreateUserParams) -> Uuid {
        let email = if params.email.is_empty() {
            format!("{}@client.test", Uuid::new_v4().simple())
        } else {
            params.email.clone()
        };
        self.db
            .insert_user(&CreateUserParams {
                email,
                role: UserRole::User,
                ..params
            })
            .await
            .expect("insert lead")
    }

    pub async fn named_lead(&self, name: &str, last_contact: Option<DateTime<Utc>>) -> Uuid {
        self.lead(CreateUserParams {
            name: name.to_string(),
            last_contact_date: last_contact,
            ..Default::default()
        })
        .await
    }
}
