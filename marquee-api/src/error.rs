use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use marquee_core::SeatPos;
use marquee_order::OrderError;
use marquee_reserve::LockError;

#[derive(Debug)]
pub enum AppError {
    Lock(LockError),
    Order(OrderError),
    Unauthenticated(String),
}

impl From<LockError> for AppError {
    fn from(err: LockError) -> Self {
        Self::Lock(err)
    }
}

impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self {
        Self::Order(err)
    }
}

// Conflict-style errors carry the exact seats so the client can repaint
// just those and let the customer retry for the rest.
fn lock_parts(err: LockError) -> (StatusCode, String, Option<Vec<SeatPos>>) {
    let message = err.to_string();
    match err {
        LockError::UnknownScreening(_) => (StatusCode::NOT_FOUND, message, None),
        LockError::EmptyRequest | LockError::DuplicateSeats => {
            (StatusCode::BAD_REQUEST, message, None)
        }
        LockError::InvalidSeats(seats) => (StatusCode::BAD_REQUEST, message, Some(seats)),
        LockError::Conflict(seats)
        | LockError::NotHeld(seats)
        | LockError::HeldByOther(seats) => (StatusCode::CONFLICT, message, Some(seats)),
        LockError::Store(e) => {
            tracing::error!("seat lock storage failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Server Error".to_string(),
                None,
            )
        }
    }
}

fn order_parts(err: OrderError) -> (StatusCode, String, Option<Vec<SeatPos>>) {
    let message = err.to_string();
    match err {
        OrderError::NotFound => (StatusCode::NOT_FOUND, message, None),
        OrderError::LockRequired(seats) => (StatusCode::CONFLICT, message, Some(seats)),
        OrderError::InvalidState { .. } => (StatusCode::CONFLICT, message, None),
        OrderError::LatePayment => (StatusCode::GONE, message, None),
        OrderError::Forbidden => (StatusCode::FORBIDDEN, message, None),
        OrderError::Lock(inner) => lock_parts(inner),
        OrderError::Store(e) => {
            tracing::error!("order storage failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Server Error".to_string(),
                None,
            )
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message, seats) = match self {
            AppError::Lock(err) => lock_parts(err),
            AppError::Order(err) => order_parts(err),
            AppError::Unauthenticated(msg) => (StatusCode::UNAUTHORIZED, msg, None),
        };

        let body = match seats {
            Some(seats) => json!({ "error": message, "seats": seats }),
            None => json!({ "error": message }),
        };

        (status, Json(body)).into_response()
    }
}
