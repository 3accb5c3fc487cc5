//! `/system/*` routes: the participant-facing surface. Every route except
//! `health` requires the upstream auth service to have already resolved a
//! participant id into the `X-Request-User` header; its absence is a 401,
//! not a `ServiceError` (anonymous requests never reach the facade).

use super::error::to_response;
use super::AppState;
use axum::async_trait;
use axum::extract::{FromRequestParts, Query, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub struct RequestUser(pub i64);

#[async_trait]
impl<S> FromRequestParts<S> for RequestUser
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get("x-request-user")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok());
        header.map(RequestUser).ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(crate::error::ErrorBody {
                    error: "not-allowed",
                    message: "anonymous requests are not permitted".to_string(),
                }),
            )
                .into_response()
        })
    }
}

#[derive(Deserialize)]
pub struct VoteQuery {
    id: i64,
}

fn split_ballot_body(raw: serde_json::Value) -> (Option<i64>, serde_json::Value) {
    if let serde_json::Value::Object(map) = &raw {
        if map.contains_key("value") {
            let user_id = map.get("user_id").and_then(|v| v.as_i64());
            let value = map.get("value").cloned().unwrap_or(serde_json::Value::Null);
            return (user_id, value);
        }
    }
    (None, raw)
}

pub async fn vote(
    State(state): State<AppState>,
    request_user: Result<RequestUser, Response>,
    Query(q): Query<VoteQuery>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let RequestUser(request_user_id) = match request_user {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let (body_user_id, value) = split_ballot_body(body);
    let cancel = CancellationToken::new();
    match state
        .service
        .vote(&cancel, q.id, request_user_id, body_user_id, &value)
        .await
    {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => to_response(&err, false).into_response(),
    }
}

#[derive(Deserialize)]
pub struct VotedQuery {
    ids: String,
}

pub async fn voted(
    State(state): State<AppState>,
    request_user: Result<RequestUser, Response>,
    Query(q): Query<VotedQuery>,
) -> Response {
    let RequestUser(request_user_id) = match request_user {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let poll_ids: Vec<i64> = q
        .ids
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();
    let result = state.service.voted(&poll_ids, request_user_id).await;
    Json(result).into_response()
}

#[derive(Serialize)]
pub struct HealthResponse {
    healthy: bool,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { healthy: true })
}
