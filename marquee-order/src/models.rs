use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use marquee_core::SeatPos;

/// Order status in the lifecycle. Orders are never deleted; cancellation
/// and refund are terminal states, not removals.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    PendingPayment,
    Paid,
    Cancelled,
    Refunded,
    Completed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::PendingPayment => "PENDING_PAYMENT",
            OrderStatus::Paid => "PAID",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Refunded => "REFUNDED",
            OrderStatus::Completed => "COMPLETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING_PAYMENT" => Some(OrderStatus::PendingPayment),
            "PAID" => Some(OrderStatus::Paid),
            "CANCELLED" => Some(OrderStatus::Cancelled),
            "REFUNDED" => Some(OrderStatus::Refunded),
            "COMPLETED" => Some(OrderStatus::Completed),
            _ => None,
        }
    }

    /// Whether an order in this status keeps its seats off the market:
    /// paid and completed orders are durable sales.
    pub fn is_sold(&self) -> bool {
        matches!(self, OrderStatus::Paid | OrderStatus::Completed)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ticket purchase for one screening. While PENDING_PAYMENT the seats
/// are held against the order's own absolute deadline, not the lock
/// table's sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub order_no: String,
    pub user_id: Uuid,
    pub screening_id: Uuid,
    pub seats: Vec<SeatPos>,
    pub status: OrderStatus,
    pub create_time: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub payment_time: Option<DateTime<Utc>>,
    pub cancel_time: Option<DateTime<Utc>>,
}

impl Order {
    pub fn new(
        order_no: String,
        user_id: Uuid,
        screening_id: Uuid,
        seats: Vec<SeatPos>,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_no,
            user_id,
            screening_id,
            seats,
            status: OrderStatus::PendingPayment,
            create_time: now,
            deadline: now + window,
            payment_time: None,
            cancel_time: None,
        }
    }

    pub fn seat_count(&self) -> usize {
        self.seats.len()
    }

    /// Seat labels for display, e.g. ["A5", "A6"].
    pub fn seats_description(&self) -> Vec<String> {
        self.seats.iter().map(|s| s.label()).collect()
    }

    /// Past the reservation deadline. Meaningful only for PENDING_PAYMENT;
    /// the deadline is absolute so the answer is the same whenever asked.
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline
    }
}
