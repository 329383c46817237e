use std::sync::Arc;

use axum::extract::{Query, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use journal_core::bearer_token;
use serde::Deserialize;

use crate::http::HttpState;

/// Identity resolved from the request's bearer credential.
///
/// Always present in request extensions once `resolve_identity` has run;
/// `user_id` is `None` for anonymous or unverifiable callers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestIdentity {
    pub user_id: Option<String>,
}

impl RequestIdentity {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn verified(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }
}

#[derive(Debug, Deserialize)]
struct TokenParam {
    token: Option<String>,
}

/// Pull the credential from `Authorization: Bearer`, or from a `token` query
/// parameter (browsers cannot set headers on a WebSocket upgrade).
fn presented_token(req: &Request) -> Option<String> {
    if let Some(token) = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
    {
        return Some(token.to_string());
    }

    Query::<TokenParam>::try_from_uri(req.uri())
        .ok()
        .and_then(|Query(p)| p.token)
        .filter(|t| !t.trim().is_empty())
}

/// Resolve the caller's identity and insert `RequestIdentity` into request
/// extensions. Never rejects: handlers decide whether anonymity is allowed.
pub async fn resolve_identity(
    State(state): State<Arc<HttpState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let identity = match presented_token(&req) {
        Some(token) => match state.verifier.verify(&token).await {
            Ok(sub) => RequestIdentity::verified(sub),
            Err(e) => {
                tracing::debug!(error = %e, path = %req.uri().path(), "Bearer token rejected");
                RequestIdentity::anonymous()
            }
        },
        None => RequestIdentity::anonymous(),
    };

    req.extensions_mut().insert(identity);
    next.run(req).await
}
