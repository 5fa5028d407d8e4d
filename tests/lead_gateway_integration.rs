//! End-to-end tests for the lead gateway.
//!
//! Each test starts a real Axum server on a random port backed by a temp-file
//! libSQL database and drives it over HTTP with reqwest.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{Duration, Utc};
use reqwest::StatusCode;
use secrecy::SecretString;
use serde_json::{Value, json};
use uuid::Uuid;

use dealflow::config::ApiToken;
use dealflow::crm::LeadService;
use dealflow::db::libsql::LibSqlBackend;
use dealflow::db::{CreateUserParams, Database, LeadSource, LeadStatus, UserRole};
use dealflow::web::{GatewayState, start_server};

const ADMIN_TOKEN: &str = "admin-token-12345";
const CLIENT_TOKEN: &str = "client-token-67890";

struct TestGateway {
    addr: SocketAddr,
    state: Arc<GatewayState>,
    db: Arc<dyn Database>,
    admin: Uuid,
    client: reqwest::Client,
    _tmpdir: tempfile::TempDir,
}

impl TestGateway {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.get(self.url(path)).bearer_auth(ADMIN_TOKEN)
    }

    fn post(&self, path: &str, body: Value) -> reqwest::RequestBuilder {
        self.client
            .post(self.url(path))
            .bearer_auth(ADMIN_TOKEN)
            .json(&body)
    }

    async fn user(&self, name: &str, role: UserRole) -> Uuid {
        self.db
            .insert_user(&CreateUserParams {
                name: name.to_string(),
                email: format!("{}@example.test", Uuid::new_v4().simple()),
                role,
                ..Default::default()
            })
            .await
            .expect("insert user")
    }

    async fn lead(&self, params: CreateUserParams) -> Uuid {
        self.db
            .insert_user(&CreateUserParams {
                email: format!("{}@client.test", Uuid::new_v4().simple()),
                role: UserRole::User,
                ..params
            })
            .await
            .expect("insert lead")
    }
}

async fn start_gateway() -> TestGateway {
    let tmpdir = tempfile::tempdir().expect("tempdir");
    let backend = LibSqlBackend::new_local(&tmpdir.path().join("gateway.db"))
        .await
        .expect("local libsql should initialize");
    backend
        .run_migrations()
        .await
        .expect("libsql migrations should run");
    let db: Arc<dyn Database> = Arc::new(backend);

    let admin = db
        .insert_user(&CreateUserParams {
            name: "Ada Admin".to_string(),
            email: "ada@firm.test".to_string(),
            role: UserRole::Admin,
            ..Default::default()
        })
        .await
        .expect("insert admin");
    let portal_user = db
        .insert_user(&CreateUserParams {
            name: "Portal User".to_string(),
            email: "portal@client.test".to_string(),
            role: UserRole::User,
            ..Default::default()
        })
        .await
        .expect("insert portal user");

    let tokens = vec![
        ApiToken {
            token: SecretString::from(ADMIN_TOKEN.to_string()),
            user_id: admin,
        },
        ApiToken {
            token: SecretString::from(CLIENT_TOKEN.to_string()),
            user_id: portal_user,
        },
    ];
    let state = Arc::new(GatewayState::new(LeadService::new(db.clone()), tokens));

    let addr: SocketAddr = "127.0.0.1:0".parse().expect("addr");
    let bound = start_server(addr, state.clone())
        .await
        .expect("Failed to start test server");

    TestGateway {
        addr: bound,
        state,
        db,
        admin,
        client: reqwest::Client::new(),
        _tmpdir: tmpdir,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn health_is_public_and_sets_security_headers() {
    let gw = start_gateway().await;
    let resp = gw
        .client
        .get(gw.url("/api/health"))
        .send()
        .await
        .expect("health request");

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()
            .get("x-content-type-options")
            .and_then(|v| v.to_str().ok()),
        Some("nosniff")
    );
    assert_eq!(
        resp.headers()
            .get("x-frame-options")
            .and_then(|v| v.to_str().ok()),
        Some("DENY")
    );
    let body: Value = resp.json().await.expect("json");
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn protected_routes_require_staff_token() {
    let gw = start_gateway().await;

    let missing = gw
        .client
        .get(gw.url("/api/leads"))
        .send()
        .await
        .expect("request");
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let wrong = gw
        .client
        .get(gw.url("/api/leads"))
        .bearer_auth("not-a-token")
        .send()
        .await
        .expect("request");
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let portal = gw
        .client
        .get(gw.url("/api/leads"))
        .bearer_auth(CLIENT_TOKEN)
        .send()
        .await
        .expect("request");
    assert_eq!(portal.status(), StatusCode::FORBIDDEN);

    let ok = gw.get("/api/leads").send().await.expect("request");
    assert_eq!(ok.status(), StatusCode::OK);
}

#[tokio::test]
async fn lead_list_returns_paginated_envelope() {
    let gw = start_gateway().await;
    let now = Utc::now();
    for (i, name) in ["Acme Holdings", "Birch Capital", "Cedar Realty"]
        .iter()
        .enumerate()
    {
        gw.lead(CreateUserParams {
            name: name.to_string(),
            lead_source: Some(LeadSource::Referral),
            last_contact_date: Some(now - Duration::days(i as i64)),
            ..Default::default()
        })
        .await;
    }

    let resp = gw
        .get("/api/leads?page=1&pageSize=2&leadSource=REFERRAL")
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.expect("json");

    // The portal user seeded at startup is a USER as well, but has no source.
    assert_eq!(body["totalCount"], 3);
    assert_eq!(body["totalPages"], 2);
    assert_eq!(body["hasNextPage"], true);
    assert_eq!(body["hasPreviousPage"], false);
    let items = body["items"].as_array().expect("items");
    assert_eq!(items.len(), 2);
    // Default sort: most recently contacted first.
    assert_eq!(items[0]["name"], "Acme Holdings");
    assert_eq!(items[0]["status"], "NEW");

    let page2: Value = gw
        .get("/api/leads?page=2&pageSize=2&leadSource=REFERRAL")
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(page2["items"].as_array().map(Vec::len), Some(1));
    assert_eq!(page2["items"][0]["name"], "Cedar Realty");
    assert_eq!(page2["hasNextPage"], false);
}

#[tokio::test]
async fn lead_list_search_and_validation() {
    let gw = start_gateway().await;
    gw.lead(CreateUserParams {
        name: "Harbor Logistics".to_string(),
        company_name: Some("Harbor Group".to_string()),
        ..Default::default()
    })
    .await;
    gw.lead(CreateUserParams {
        name: "Summit Partners".to_string(),
        ..Default::default()
    })
    .await;

    let body: Value = gw
        .get("/api/leads?search=harbor")
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(body["totalCount"], 1);
    assert_eq!(body["items"][0]["companyName"], "Harbor Group");

    let too_big = gw
        .get("/api/leads?pageSize=500")
        .send()
        .await
        .expect("request");
    assert_eq!(too_big.status(), StatusCode::BAD_REQUEST);

    let inverted = gw
        .get("/api/leads?lastContactDateFrom=2024-05-10&lastContactDateTo=2024-05-01")
        .send()
        .await
        .expect("request");
    assert_eq!(inverted.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn assign_note_and_status_show_up_in_detail() {
    let gw = start_gateway().await;
    let banker = gw.user("Ben Banker", UserRole::TeamMember).await;
    let lead = gw
        .lead(CreateUserParams {
            name: "Oakridge Estates".to_string(),
            ..Default::default()
        })
        .await;

    let assigned = gw
        .post(
            &format!("/api/leads/{lead}/assign"),
            json!({ "responsibleId": banker }),
        )
        .send()
        .await
        .expect("assign");
    assert_eq!(assigned.status(), StatusCode::OK);
    let assigned: Value = assigned.json().await.expect("json");
    assert_eq!(assigned["leadResponsible"]["id"], banker.to_string());
    assert!(assigned["lastContactDate"].is_string());

    let note = gw
        .post(
            &format!("/api/leads/{lead}/notes"),
            json!({ "body": "Intro call went well." }),
        )
        .send()
        .await
        .expect("note");
    assert_eq!(note.status(), StatusCode::CREATED);

    let blank = gw
        .post(&format!("/api/leads/{lead}/notes"), json!({ "body": "   " }))
        .send()
        .await
        .expect("blank note");
    assert_eq!(blank.status(), StatusCode::BAD_REQUEST);

    let status = gw
        .post(
            &format!("/api/leads/{lead}/status"),
            json!({ "status": LeadStatus::Qualified }),
        )
        .send()
        .await
        .expect("status");
    assert_eq!(status.status(), StatusCode::OK);

    let detail: Value = gw
        .get(&format!("/api/leads/{lead}"))
        .send()
        .await
        .expect("detail")
        .json()
        .await
        .expect("json");
    assert_eq!(detail["status"], "QUALIFIED");
    assert_eq!(detail["notes"][0]["body"], "Intro call went well.");
    assert_eq!(detail["notes"][0]["author"]["id"], gw.admin.to_string());
    let kinds: Vec<&str> = detail["activities"]
        .as_array()
        .expect("activities")
        .iter()
        .filter_map(|a| a["kind"].as_str())
        .collect();
    assert!(kinds.contains(&"ASSIGNED"), "{kinds:?}");
    assert!(kinds.contains(&"NOTE_ADDED"), "{kinds:?}");
    assert!(kinds.contains(&"STATUS_CHANGED"), "{kinds:?}");
}

#[tokio::test]
async fn assigning_to_a_non_staff_user_conflicts() {
    let gw = start_gateway().await;
    let lead = gw
        .lead(CreateUserParams {
            name: "Willow Ventures".to_string(),
            ..Default::default()
        })
        .await;
    let other_lead = gw
        .lead(CreateUserParams {
            name: "Aspen Group".to_string(),
            ..Default::default()
        })
        .await;

    let resp = gw
        .post(
            &format!("/api/leads/{lead}/assign"),
            json!({ "responsibleId": other_lead }),
        )
        .send()
        .await
        .expect("assign");
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let missing = gw
        .post(
            &format!("/api/leads/{}/assign", Uuid::new_v4()),
            json!({ "responsibleId": gw.admin }),
        )
        .send()
        .await
        .expect("assign");
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let malformed = gw
        .get("/api/leads/not-a-uuid")
        .send()
        .await
        .expect("detail");
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn follow_up_lifecycle() {
    let gw = start_gateway().await;
    let lead = gw
        .lead(CreateUserParams {
            name: "Maple Industrial".to_string(),
            ..Default::default()
        })
        .await;
    let scheduled_at = Utc::now() + Duration::days(3);

    let created = gw
        .post(
            &format!("/api/leads/{lead}/follow-ups"),
            json!({
                "scheduledAt": scheduled_at.to_rfc3339(),
                "channel": "MEETING",
                "notes": "Site visit",
            }),
        )
        .send()
        .await
        .expect("schedule");
    assert_eq!(created.status(), StatusCode::CREATED);
    let created: Value = created.json().await.expect("json");
    let follow_up_id = created["id"].as_str().expect("id").to_string();
    assert_eq!(created["completed"], false);

    let detail: Value = gw
        .get(&format!("/api/leads/{lead}"))
        .send()
        .await
        .expect("detail")
        .json()
        .await
        .expect("json");
    assert!(detail["nextFollowUpDate"].is_string());

    let complete_path = format!("/api/leads/{lead}/follow-ups/{follow_up_id}/complete");
    let completed = gw
        .post(&complete_path, json!({}))
        .send()
        .await
        .expect("complete");
    assert_eq!(completed.status(), StatusCode::OK);
    let completed: Value = completed.json().await.expect("json");
    assert_eq!(completed["completed"], true);

    let again = gw
        .post(&complete_path, json!({}))
        .send()
        .await
        .expect("complete again");
    assert_eq!(again.status(), StatusCode::CONFLICT);

    let delete_path = format!("/api/leads/{lead}/follow-ups/{follow_up_id}");
    let deleted = gw
        .client
        .delete(gw.url(&delete_path))
        .bearer_auth(ADMIN_TOKEN)
        .send()
        .await
        .expect("delete");
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let gone = gw
        .client
        .delete(gw.url(&delete_path))
        .bearer_auth(ADMIN_TOKEN)
        .send()
        .await
        .expect("delete again");
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn patch_updates_and_clears_fields() {
    let gw = start_gateway().await;
    let lead = gw
        .lead(CreateUserParams {
            name: "Spruce Capital".to_string(),
            company_name: Some("Spruce LLC".to_string()),
            ..Default::default()
        })
        .await;

    let resp = gw
        .client
        .patch(gw.url(&format!("/api/leads/{lead}")))
        .bearer_auth(ADMIN_TOKEN)
        .json(&json!({
            "priority": "HIGH",
            "department": "CRE",
            "companyName": null,
        }))
        .send()
        .await
        .expect("patch");
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.expect("json");
    assert_eq!(body["priority"], "HIGH");
    assert_eq!(body["department"], "CRE");
    assert!(body["companyName"].is_null());
    // Field edits are not contact.
    assert!(body["lastContactDate"].is_null());
}

#[tokio::test]
async fn team_members_lists_staff_only() {
    let gw = start_gateway().await;
    gw.user("Zoe Member", UserRole::TeamMember).await;

    let body: Value = gw
        .get("/api/team-members")
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    let names: Vec<&str> = body["teamMembers"]
        .as_array()
        .expect("teamMembers")
        .iter()
        .filter_map(|m| m["name"].as_str())
        .collect();
    assert_eq!(names, vec!["Ada Admin", "Zoe Member"]);
}

#[tokio::test]
async fn shutdown_stops_accepting_requests() {
    let gw = start_gateway().await;
    gw.state.shutdown().await;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let result = gw.client.get(gw.url("/api/health")).send().await;
    assert!(result.is_err(), "server should be closed");
}
