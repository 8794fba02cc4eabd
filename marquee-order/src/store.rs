use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use marquee_core::{SeatClaim, SeatClaimSource, StoreError};

use crate::models::{Order, OrderStatus};

#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("order not found")]
    NotFound,

    #[error("order status is {actual}, expected {expected}")]
    StateMismatch {
        expected: OrderStatus,
        actual: OrderStatus,
    },

    #[error("order storage failed: {0}")]
    Store(#[from] StoreError),
}

/// Order persistence. `transition` is the single compare-and-swap that
/// resolves races between payment and expiry: it commits the new status
/// only if the stored status still matches `expected`, and stamps
/// `payment_time` / `cancel_time` according to the target state.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, order: &Order) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Order>, StoreError>;

    async fn get_by_order_no(&self, order_no: &str) -> Result<Option<Order>, StoreError>;

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Order>, StoreError>;

    async fn transition(
        &self,
        id: Uuid,
        expected: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Order, TransitionError>;

    /// Ids of PENDING_PAYMENT orders whose deadline has passed.
    async fn expired_pending(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError>;
}

/// In-process order store. The mutex serializes `transition` so exactly
/// one of two racing state changes commits.
#[derive(Default)]
pub struct MemoryOrderStore {
    orders: Mutex<HashMap<Uuid, Order>>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn insert(&self, order: &Order) -> Result<(), StoreError> {
        let mut orders = self.orders.lock().unwrap();
        orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        let orders = self.orders.lock().unwrap();
        Ok(orders.get(&id).cloned())
    }

    async fn get_by_order_no(&self, order_no: &str) -> Result<Option<Order>, StoreError> {
        let orders = self.orders.lock().unwrap();
        Ok(orders.values().find(|o| o.order_no == order_no).cloned())
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Order>, StoreError> {
        let orders = self.orders.lock().unwrap();
        let mut found: Vec<Order> = orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.create_time.cmp(&a.create_time));
        Ok(found)
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Order, TransitionError> {
        let mut orders = self.orders.lock().unwrap();
        let order = orders.get_mut(&id).ok_or(TransitionError::NotFound)?;
        if order.status != expected {
            return Err(TransitionError::StateMismatch {
                expected,
                actual: order.status,
            });
        }
        order.status = to;
        match to {
            OrderStatus::Paid => order.payment_time = Some(at),
            OrderStatus::Cancelled => order.cancel_time = Some(at),
            _ => {}
        }
        Ok(order.clone())
    }

    async fn expired_pending(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let orders = self.orders.lock().unwrap();
        Ok(orders
            .values()
            .filter(|o| o.status == OrderStatus::PendingPayment && o.is_past_deadline(now))
            .map(|o| o.id)
            .collect())
    }
}

#[async_trait]
impl SeatClaimSource for MemoryOrderStore {
    async fn claimed_seats(
        &self,
        screening_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<SeatClaim>, StoreError> {
        let orders = self.orders.lock().unwrap();
        let mut claims = Vec::new();
        for order in orders.values().filter(|o| o.screening_id == screening_id) {
            let sold = order.status.is_sold();
            let pending_hold =
                order.status == OrderStatus::PendingPayment && !order.is_past_deadline(now);
            if sold || pending_hold {
                for &seat in &order.seats {
                    claims.push(SeatClaim { seat, sold });
                }
            }
        }
        Ok(claims)
    }
}
