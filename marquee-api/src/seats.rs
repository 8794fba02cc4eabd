use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use chrono::{DateTime, Utc};
use futures_util::stream::Stream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use uuid::Uuid;

use marquee_core::SeatPos;
use marquee_reserve::SeatMap;
use marquee_shared::{SeatUpdateEvent, SeatUpdateKind};

use crate::error::AppError;
use crate::identity::Caller;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SeatSelection {
    pub seats: Vec<SeatPos>,
}

#[derive(Debug, Serialize)]
pub struct LockResponse {
    pub status: String,
    pub seats: Vec<SeatPos>,
    pub expires_at: DateTime<Utc>,
}

/// GET /v1/screenings/{id}/seats
/// Full seat status grid for one screening.
pub async fn seat_map(
    State(state): State<AppState>,
    Path(screening_id): Path<Uuid>,
) -> Result<Json<SeatMap>, AppError> {
    let map = state.locks.seat_map(screening_id).await?;
    Ok(Json(map))
}

/// POST /v1/screenings/{id}/locks
/// Lock the requested seats for the caller, all or nothing.
pub async fn lock_seats(
    State(state): State<AppState>,
    Path(screening_id): Path<Uuid>,
    Caller(user_id): Caller,
    Json(req): Json<SeatSelection>,
) -> Result<Json<LockResponse>, AppError> {
    let locks = state
        .locks
        .lock_seats(screening_id, user_id, &req.seats)
        .await?;

    // Every lock in one grant shares the same expiry.
    let expires_at = locks
        .first()
        .map(|l| l.expires_at)
        .unwrap_or_else(Utc::now);
    let seats: Vec<SeatPos> = locks.iter().map(|l| l.seat).collect();

    let _ = state.sse_tx.send(SeatUpdateEvent::new(
        screening_id,
        seats.clone(),
        SeatUpdateKind::Locked,
    ));

    Ok(Json(LockResponse {
        status: "LOCKED".to_string(),
        seats,
        expires_at,
    }))
}

/// DELETE /v1/screenings/{id}/locks
/// Release the caller's locks on the given seats.
pub async fn unlock_seats(
    State(state): State<AppState>,
    Path(screening_id): Path<Uuid>,
    Caller(user_id): Caller,
    Json(req): Json<SeatSelection>,
) -> Result<StatusCode, AppError> {
    state
        .locks
        .unlock_seats(screening_id, user_id, &req.seats)
        .await?;

    let _ = state.sse_tx.send(SeatUpdateEvent::new(
        screening_id,
        req.seats,
        SeatUpdateKind::Released,
    ));

    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/screenings/{id}/stream
/// Server-sent seat updates for one screening.
pub async fn stream(
    State(state): State<AppState>,
    Path(screening_id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.sse_tx.subscribe();

    let stream = tokio_stream::wrappers::BroadcastStream::new(rx).filter_map(move |result| {
        async move {
            match result {
                Ok(event) if event.screening_id == screening_id => {
                    let data = serde_json::to_string(&event).ok()?;
                    Some(Ok(Event::default().event("seat_update").data(data)))
                }
                // Other screenings and lagged receivers are skipped.
                _ => None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
