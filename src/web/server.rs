//! Axum HTTP server for the lead API.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{StatusCode, header},
    middleware,
    routing::{get, post},
};
use tokio::sync::oneshot;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::ApiToken;
use crate::crm::{Actor, LeadListItem, LeadListQuery, LeadService, Page};
use crate::error::{GatewayError, LeadError};
use crate::web::auth::{AuthState, auth_middleware};
use crate::web::types::*;

/// Shared state for all gateway handlers.
pub struct GatewayState {
    pub leads: LeadService,
    pub api_tokens: Vec<ApiToken>,
    /// Fires graceful shutdown of the running server.
    pub shutdown_tx: tokio::sync::RwLock<Option<oneshot::Sender<()>>>,
    pub startup_time: std::time::Instant,
}

impl GatewayState {
    pub fn new(leads: LeadService, api_tokens: Vec<ApiToken>) -> Self {
        Self {
            leads,
            api_tokens,
            shutdown_tx: tokio::sync::RwLock::new(None),
            startup_time: std::time::Instant::now(),
        }
    }

    /// Ask the server to stop accepting connections and drain.
    pub async fn shutdown(&self) {
        if let Some(tx) = self.shutdown_tx.write().await.take() {
            tracing::info!(
                uptime_secs = self.startup_time.elapsed().as_secs(),
                "Lead gateway shutdown requested"
            );
            let _ = tx.send(());
        }
    }
}

/// Start the gateway HTTP server.
///
/// Returns the actual bound `SocketAddr` (useful when binding to port 0).
pub async fn start_server(
    addr: SocketAddr,
    state: Arc<GatewayState>,
) -> Result<SocketAddr, GatewayError> {
    let listener =
        tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::StartupFailed {
                reason: format!("Failed to bind to {}: {}", addr, e),
            })?;
    let bound_addr = listener
        .local_addr()
        .map_err(|e| GatewayError::StartupFailed {
            reason: format!("Failed to get local addr: {}", e),
        })?;

    let app = router(state.clone());

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    *state.shutdown_tx.write().await = Some(shutdown_tx);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Lead gateway shutting down");
            })
            .await
        {
            tracing::error!("Lead gateway server error: {}", e);
        }
    });

    tracing::info!(addr = %bound_addr, "Lead gateway listening");
    Ok(bound_addr)
}

/// Public and protected routes with the gateway's layers applied.
pub fn router(state: Arc<GatewayState>) -> Router {
    let public = Router::new().route("/api/health", get(health_handler));

    let auth_state = AuthState {
        tokens: Arc::new(state.api_tokens.clone()),
        leads: state.leads.clone(),
    };
    let protected = Router::new()
        .route("/api/leads", get(leads_list_handler))
        .route(
            "/api/leads/{id}",
            get(lead_detail_handler).patch(lead_update_handler),
        )
        .route("/api/leads/{id}/assign", post(lead_assign_handler))
        .route("/api/leads/{id}/notes", post(lead_note_handler))
        .route("/api/leads/{id}/status", post(lead_status_handler))
        .route("/api/leads/{id}/follow-ups", post(follow_up_create_handler))
        .route(
            "/api/leads/{id}/follow-ups/{follow_up_id}/complete",
            post(follow_up_complete_handler),
        )
        .route(
            "/api/leads/{id}/follow-ups/{follow_up_id}",
            axum::routing::delete(follow_up_delete_handler),
        )
        .route("/api/team-members", get(team_members_handler))
        .route_layer(middleware::from_fn_with_state(auth_state, auth_middleware));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1 MB max request body
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            header::HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            header::HeaderValue::from_static("DENY"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn lead_error_status(err: &LeadError) -> StatusCode {
    match err {
        LeadError::Validation(_) => StatusCode::BAD_REQUEST,
        LeadError::NotFound(_) => StatusCode::NOT_FOUND,
        LeadError::Precondition(_) => StatusCode::CONFLICT,
        LeadError::Forbidden(_) => StatusCode::FORBIDDEN,
        LeadError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn lead_error(err: LeadError) -> (StatusCode, String) {
    let status = lead_error_status(&err);
    if status.is_server_error() {
        tracing::error!("lead request failed: {}", err);
    }
    (status, err.to_string())
}

fn parse_id(raw: &str, what: &str) -> Result<Uuid, (StatusCode, String)> {
    Uuid::parse_str(raw).map_err(|_| (StatusCode::BAD_REQUEST, format!("Invalid {what} ID")))
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// --- Lead handlers ---

async fn leads_list_handler(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<LeadListQuery>,
) -> Result<Json<Page<LeadListItem>>, (StatusCode, String)> {
    let page = state.leads.list_leads(&query).await.map_err(lead_error)?;
    Ok(Json(page))
}

async fn lead_detail_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> Result<Json<LeadDetailResponse>, (StatusCode, String)> {
    let lead_id = parse_id(&id, "lead")?;
    let detail = state
        .leads
        .get_lead_detail(lead_id)
        .await
        .map_err(lead_error)?;
    Ok(Json(detail.into()))
}

async fn lead_update_handler(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    Json(req): Json<UpdateLeadRequest>,
) -> Result<Json<LeadListItem>, (StatusCode, String)> {
    let lead_id = parse_id(&id, "lead")?;
    let lead = state
        .leads
        .update_lead(&actor, lead_id, req.into())
        .await
        .map_err(lead_error)?;
    Ok(Json(lead))
}

async fn lead_assign_handler(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    Json(req): Json<AssignLeadRequest>,
) -> Result<Json<LeadListItem>, (StatusCode, String)> {
    let lead_id = parse_id(&id, "lead")?;
    let lead = state
        .leads
        .assign_lead(&actor, lead_id, req.responsible_id)
        .await
        .map_err(lead_error)?;
    Ok(Json(lead))
}

async fn lead_note_handler(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    Json(req): Json<AddNoteRequest>,
) -> Result<(StatusCode, Json<NoteInfo>), (StatusCode, String)> {
    let lead_id = parse_id(&id, "lead")?;
    let note = state
        .leads
        .add_note(&actor, lead_id, &req.body)
        .await
        .map_err(lead_error)?;
    Ok((StatusCode::CREATED, Json(note.into())))
}

async fn lead_status_handler(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    Json(req): Json<ChangeStatusRequest>,
) -> Result<Json<LeadListItem>, (StatusCode, String)> {
    let lead_id = parse_id(&id, "lead")?;
    let lead = state
        .leads
        .change_status(&actor, lead_id, req.status)
        .await
        .map_err(lead_error)?;
    Ok(Json(lead))
}

// --- Follow-up handlers ---

async fn follow_up_create_handler(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    Json(req): Json<ScheduleFollowUpRequest>,
) -> Result<(StatusCode, Json<FollowUpInfo>), (StatusCode, String)> {
    let lead_id = parse_id(&id, "lead")?;
    let follow_up = state
        .leads
        .schedule_follow_up(
            &actor,
            lead_id,
            req.scheduled_at,
            req.channel,
            req.notes.as_deref(),
        )
        .await
        .map_err(lead_error)?;
    Ok((StatusCode::CREATED, Json(follow_up.into())))
}

async fn follow_up_complete_handler(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path((id, follow_up_id)): Path<(String, String)>,
) -> Result<Json<FollowUpInfo>, (StatusCode, String)> {
    let lead_id = parse_id(&id, "lead")?;
    let follow_up_id = parse_id(&follow_up_id, "follow-up")?;
    let follow_up = state
        .leads
        .complete_follow_up(&actor, lead_id, follow_up_id)
        .await
        .map_err(lead_error)?;
    Ok(Json(follow_up.into()))
}

async fn follow_up_delete_handler(
    State(state): State<Arc<GatewayState>>,
    Extension(actor): Extension<Actor>,
    Path((id, follow_up_id)): Path<(String, String)>,
) -> Result<StatusCode, (StatusCode, String)> {
    let lead_id = parse_id(&id, "lead")?;
    let follow_up_id = parse_id(&follow_up_id, "follow-up")?;
    state
        .leads
        .remove_follow_up(&actor, lead_id, follow_up_id)
        .await
        .map_err(lead_error)?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Team ---

async fn team_members_handler(
    State(state): State<Arc<GatewayState>>,
) -> Result<Json<TeamMemberListResponse>, (StatusCode, String)> {
    let members = state.leads.list_team_members().await.map_err(lead_error)?;
    Ok(Json(TeamMemberListResponse {
        team_members: members.into_iter().map(TeamMemberInfo::from).collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DatabaseError;

    #[test]
    fn lead_errors_map_to_status_codes() {
        let cases = [
            (LeadError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (LeadError::NotFound("lead".into()), StatusCode::NOT_FOUND),
            (LeadError::Precondition("x".into()), StatusCode::CONFLICT),
            (LeadError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (
                LeadError::StoreUnavailable(DatabaseError::Query("boom".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(lead_error_status(&err), expected, "{err}");
        }
    }

    #[test]
    fn malformed_ids_are_bad_requests() {
        let err = parse_id("not-a-uuid", "lead").expect_err("should reject");
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
        assert!(parse_id(&Uuid::new_v4().to_string(), "lead").is_ok());
    }

    #[cfg(feature = "libsql")]
    mod routing {
        use axum::body::{Body, to_bytes};
        use axum::http::Request;
        use secrecy::SecretString;
        use tower::ServiceExt;

        use super::*;
        use crate::db::UserRole;

        const TOKEN: &str = "router-test-token";

        async fn app() -> (Router, crate::testing::TestDb) {
            let fx = crate::testing::test_db().await;
            let admin = fx.staff("Router Admin", UserRole::Admin).await;
            let state = Arc::new(GatewayState::new(
                LeadService::new(fx.db.clone()),
                vec![ApiToken {
                    token: SecretString::from(TOKEN.to_string()),
                    user_id: admin,
                }],
            ));
            (router(state), fx)
        }

        fn get(uri: &str, token: Option<&str>) -> Request<Body> {
            let mut builder = Request::builder().uri(uri);
            if let Some(token) = token {
                builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
            }
            builder.body(Body::empty()).expect("request")
        }

        #[tokio::test]
        async fn protected_route_without_token_is_unauthorized() {
            let (app, _fx) = app().await;
            let resp = app.oneshot(get("/api/leads", None)).await.expect("response");
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(
                resp.headers().get(header::X_FRAME_OPTIONS),
                Some(&header::HeaderValue::from_static("DENY"))
            );
        }

        #[tokio::test]
        async fn unknown_lead_is_not_found() {
            let (app, _fx) = app().await;
            let uri = format!("/api/leads/{}", Uuid::new_v4());
            let resp = app.oneshot(get(&uri, Some(TOKEN))).await.expect("response");
            assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        }

        #[tokio::test]
        async fn bad_sort_field_is_rejected() {
            let (app, _fx) = app().await;
            let resp = app
                .oneshot(get("/api/leads?sortBy=email", Some(TOKEN)))
                .await
                .expect("response");
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        }

        #[tokio::test]
        async fn empty_list_has_zero_pages() {
            let (app, _fx) = app().await;
            let resp = app
                .oneshot(get("/api/leads", Some(TOKEN)))
                .await
                .expect("response");
            assert_eq!(resp.status(), StatusCode::OK);
            let bytes = to_bytes(resp.into_body(), 1024 * 1024).await.expect("body");
            let body: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
            assert_eq!(body["totalCount"], 0);
            assert_eq!(body["totalPages"], 0);
            assert_eq!(body["items"], serde_json::json!([]));
            assert_eq!(body["hasNextPage"], false);
        }
    }

    #[tokio::test]
    async fn health_reports_crate_version() {
        let Json(body) = health_handler().await;
        assert_eq!(body.status, "healthy");
        assert_eq!(body.version, env!("CARGO_PKG_VERSION"));
    }
}
