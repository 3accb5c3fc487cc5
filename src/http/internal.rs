//! `/internal/*` routes: invoked by the conferencing server/room manager,
//! not by participants. Guarded by a shared bearer token rather than the
//! per-participant auth the `/system/*` routes use.

use super::error::to_response;
use super::AppState;
use axum::extract::{Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use futures::StreamExt as _;
use std::time::Duration;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

pub async fn require_internal_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if presented != Some(state.internal_token.as_ref()) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(crate::error::ErrorBody {
                error: "not-allowed",
                message: "missing or invalid internal token".to_string(),
            }),
        )
            .into_response();
    }
    next.run(request).await
}

#[derive(Deserialize)]
pub struct PollIdQuery {
    id: i64,
}

pub async fn start(State(state): State<AppState>, Query(q): Query<PollIdQuery>) -> Response {
    let cancel = CancellationToken::new();
    match state.service.start(&cancel, q.id).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => to_response(&err, true).into_response(),
    }
}

#[derive(Serialize)]
pub struct StopResponse {
    votes: Vec<serde_json::Value>,
    user_ids: Vec<i64>,
}

pub async fn stop(State(state): State<AppState>, Query(q): Query<PollIdQuery>) -> Response {
    let cancel = CancellationToken::new();
    match state.service.stop(&cancel, q.id).await {
        Ok(result) => {
            let votes = result
                .ballots
                .iter()
                .map(|bytes| {
                    serde_json::from_slice(bytes).unwrap_or(serde_json::Value::Null)
                })
                .collect();
            Json(StopResponse {
                votes,
                user_ids: result.voters,
            })
            .into_response()
        }
        Err(err) => to_response(&err, true).into_response(),
    }
}

pub async fn clear(State(state): State<AppState>, Query(q): Query<PollIdQuery>) -> Response {
    let cancel = CancellationToken::new();
    match state.service.clear(&cancel, q.id).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => to_response(&err, true).into_response(),
    }
}

pub async fn clear_all(State(state): State<AppState>) -> Response {
    let cancel = CancellationToken::new();
    match state.service.clear_all(&cancel).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => to_response(&err, true).into_response(),
    }
}

/// Hanging GET: flushes a full snapshot, then once a second flushes a diff
/// of newly-voted ids per poll (`null` for a poll that was cleared). Flushes
/// every tick, even empty ones, so intermediary proxies keep the connection
/// open.
pub async fn all_voted_ids(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let service = state.service;
    let initial = service.voted_index().snapshot();
    let ticker = tokio_stream::wrappers::IntervalStream::new(tokio::time::interval(Duration::from_secs(1)));

    let seed = futures::stream::once(async move {
        Ok(Event::default()
            .json_data(initial)
            .unwrap_or_else(|_| Event::default().data("{}")))
    });

    let diffs = futures::stream::unfold(
        (service, HashMap::<i64, Vec<i64>>::new(), ticker),
        |(service, mut prev, mut ticker)| async move {
            use tokio_stream::StreamExt as _;
            ticker.next().await;
            let current = service.voted_index().snapshot();
            let mut delta: HashMap<i64, Option<Vec<i64>>> = HashMap::new();
            for (poll_id, voters) in &current {
                let is_new = match prev.get(poll_id) {
                    Some(old) => old != voters,
                    None => true,
                };
                if is_new {
                    delta.insert(*poll_id, Some(voters.clone()));
                }
            }
            for poll_id in prev.keys() {
                if !current.contains_key(poll_id) {
                    delta.insert(*poll_id, None);
                }
            }
            prev = current;
            let event = Event::default()
                .json_data(&delta)
                .unwrap_or_else(|_| Event::default().data("{}"));
            Some((Ok(event), (service, prev, ticker)))
        },
    );

    Sse::new(seed.chain(diffs)).keep_alive(KeepAlive::default())
}
