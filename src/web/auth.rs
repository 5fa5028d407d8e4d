//! Bearer token authentication and actor resolution for protected routes.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use secrecy::ExposeSecret;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::config::ApiToken;
use crate::crm::{LeadService, audit};
use crate::error::LeadError;

/// Tokens accepted by the gateway and the service used to resolve actors.
#[derive(Clone)]
pub struct AuthState {
    pub tokens: Arc<Vec<ApiToken>>,
    pub leads: LeadService,
}

impl AuthState {
    /// User id bound to `presented`, if any token matches.
    ///
    /// Every configured token is compared so timing does not reveal which
    /// entry matched.
    fn user_for(&self, presented: &str) -> Option<Uuid> {
        let mut found = None;
        for entry in self.tokens.iter() {
            let expected = entry.token.expose_secret().as_bytes();
            if bool::from(expected.ct_eq(presented.as_bytes())) {
                found = Some(entry.user_id);
            }
        }
        found
    }
}

fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Reject requests without a valid token (401) or whose user may not work
/// leads (403). On success the resolved [`Actor`](crate::crm::Actor) is
/// placed in the request extensions.
pub async fn auth_middleware(
    State(auth): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(user_id) = bearer_token(&req).and_then(|t| auth.user_for(t)) else {
        audit::inc_denied_request();
        return (StatusCode::UNAUTHORIZED, "Invalid or missing auth token").into_response();
    };

    match auth.leads.authorize_actor(user_id).await {
        Ok(actor) => {
            req.extensions_mut().insert(actor);
            next.run(req).await
        }
        Err(LeadError::Forbidden(reason)) => {
            tracing::debug!(%user_id, %reason, "request denied");
            audit::inc_denied_request();
            (StatusCode::FORBIDDEN, reason).into_response()
        }
        Err(e) => {
            tracing::error!(%user_id, "actor lookup failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
    }
}
