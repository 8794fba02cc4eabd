use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use marquee_core::SeatPos;
use marquee_order::{CancelActor, Order, OrderStatus};
use marquee_shared::{Countdown, Remaining, SeatUpdateEvent, SeatUpdateKind};

use crate::error::AppError;
use crate::identity::Caller;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub screening_id: Uuid,
    pub seats: Vec<SeatPos>,
}

#[derive(Debug, Serialize)]
pub struct OrderView {
    pub id: Uuid,
    pub order_no: String,
    pub screening_id: Uuid,
    pub status: OrderStatus,
    pub seats: Vec<SeatPos>,
    pub seats_description: Vec<String>,
    pub seat_count: usize,
    pub create_time: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    /// Present only while payment is still possible.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub countdown: Option<Remaining>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_time: Option<DateTime<Utc>>,
}

impl From<&Order> for OrderView {
    fn from(order: &Order) -> Self {
        let countdown = match order.status {
            OrderStatus::PendingPayment => Some(
                Countdown::new(order.create_time, order.deadline).remaining(Utc::now()),
            ),
            _ => None,
        };
        Self {
            id: order.id,
            order_no: order.order_no.clone(),
            screening_id: order.screening_id,
            status: order.status,
            seats: order.seats.clone(),
            seats_description: order.seats_description(),
            seat_count: order.seat_count(),
            create_time: order.create_time,
            deadline: order.deadline,
            countdown,
            payment_time: order.payment_time,
            cancel_time: order.cancel_time,
        }
    }
}

/// POST /v1/orders
/// Turn the caller's seat locks into a PENDING_PAYMENT order.
pub async fn create_order(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderView>), AppError> {
    let order = state
        .orders
        .create(req.screening_id, user_id, &req.seats)
        .await?;
    Ok((StatusCode::CREATED, Json(OrderView::from(&order))))
}

/// GET /v1/orders/{id}
/// Fetch one of the caller's orders by UUID or order number.
pub async fn get_order(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Path(identifier): Path<String>,
) -> Result<Json<OrderView>, AppError> {
    let order = state.orders.find_for_user(&identifier, user_id).await?;
    Ok(Json(OrderView::from(&order)))
}

/// GET /v1/orders
/// The caller's orders, newest first.
pub async fn list_orders(
    State(state): State<AppState>,
    Caller(user_id): Caller,
) -> Result<Json<Vec<OrderView>>, AppError> {
    let orders = state.orders.list_for_user(user_id).await?;
    Ok(Json(orders.iter().map(OrderView::from).collect()))
}

/// PUT /v1/orders/{id}/mark-as-paid
/// Confirm payment; the seats become durably sold.
pub async fn mark_paid(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Path(identifier): Path<String>,
) -> Result<Json<OrderView>, AppError> {
    let order = state.orders.mark_paid(&identifier, user_id).await?;

    let _ = state.sse_tx.send(SeatUpdateEvent::new(
        order.screening_id,
        order.seats.clone(),
        SeatUpdateKind::Sold,
    ));

    Ok(Json(OrderView::from(&order)))
}

/// PUT /v1/orders/{id}/cancel
/// Cancel a pending order; its seats go back on the market.
pub async fn cancel_order(
    State(state): State<AppState>,
    Caller(user_id): Caller,
    Path(identifier): Path<String>,
) -> Result<StatusCode, AppError> {
    let order = state
        .orders
        .cancel(&identifier, CancelActor::User(user_id))
        .await?;

    let _ = state.sse_tx.send(SeatUpdateEvent::new(
        order.screening_id,
        order.seats.clone(),
        SeatUpdateKind::Released,
    ));

    Ok(StatusCode::NO_CONTENT)
}
