use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use marquee_core::{format_seats, SeatPos, StoreError};
use marquee_reserve::{LockError, LockManager};

use crate::models::{Order, OrderStatus};
use crate::order_no::OrderNumberGenerator;
use crate::store::{OrderStore, TransitionError};

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("order not found")]
    NotFound,

    #[error("seat locks missing or expired: {}", format_seats(.0))]
    LockRequired(Vec<SeatPos>),

    #[error("order status is {actual}, cannot transition to {attempted}")]
    InvalidState {
        attempted: OrderStatus,
        actual: OrderStatus,
    },

    #[error("payment arrived after the reservation deadline")]
    LatePayment,

    #[error("order belongs to another user")]
    Forbidden,

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("order storage failed: {0}")]
    Store(StoreError),
}

/// Who asked for a cancellation. System cancellations skip the ownership
/// check and are logged as expiry, not user action.
#[derive(Debug, Clone, Copy)]
pub enum CancelActor {
    User(Uuid),
    System,
}

/// Drives an order through its lifecycle. All status changes go through
/// the store's compare-and-swap, so a payment racing an expiry resolves
/// to exactly one winner.
#[derive(Clone)]
pub struct OrderController {
    locks: LockManager,
    orders: Arc<dyn OrderStore>,
    order_numbers: Arc<OrderNumberGenerator>,
    window: Duration,
}

impl OrderController {
    pub fn new(locks: LockManager, orders: Arc<dyn OrderStore>, window: Duration) -> Self {
        Self {
            locks,
            orders,
            order_numbers: Arc::new(OrderNumberGenerator::new()),
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Creates a PENDING_PAYMENT order from seats the caller has already
    /// locked. The order row is inserted before the locks are released,
    /// so the seats move from lock-held to order-held without a gap; from
    /// then on the order's own deadline governs expiry.
    pub async fn create(
        &self,
        screening_id: Uuid,
        user_id: Uuid,
        seats: &[SeatPos],
    ) -> Result<Order, OrderError> {
        if seats.is_empty() {
            return Err(OrderError::Lock(LockError::EmptyRequest));
        }
        // One lock satisfies every duplicate of its seat in verify_held,
        // so repeats must be rejected here or the order overcounts.
        let unique: HashSet<SeatPos> = seats.iter().copied().collect();
        if unique.len() != seats.len() {
            return Err(OrderError::Lock(LockError::DuplicateSeats));
        }
        self.locks
            .verify_held(screening_id, user_id, seats)
            .await
            .map_err(|e| match e {
                LockError::NotHeld(missing) => OrderError::LockRequired(missing),
                other => OrderError::Lock(other),
            })?;

        let now = Utc::now();
        let order = Order::new(
            self.order_numbers.generate(now),
            user_id,
            screening_id,
            seats.to_vec(),
            now,
            self.window,
        );
        self.orders.insert(&order).await.map_err(OrderError::Store)?;

        // The locks are superseded by the order-bound hold. A failure here
        // only delays reclamation; the lock sweep catches the leftovers.
        if let Err(e) = self.locks.unlock_seats(screening_id, user_id, seats).await {
            warn!(
                order_no = %order.order_no, error = %e,
                "failed to release seat locks after order creation"
            );
        }

        info!(
            order_no = %order.order_no, %user_id, %screening_id,
            seat_count = order.seat_count(), "order created"
        );
        Ok(order)
    }

    /// Looks an order up by UUID or order number.
    pub async fn find(&self, identifier: &str) -> Result<Order, OrderError> {
        let found = if let Ok(id) = Uuid::parse_str(identifier) {
            self.orders.get(id).await.map_err(OrderError::Store)?
        } else {
            self.orders
                .get_by_order_no(identifier)
                .await
                .map_err(OrderError::Store)?
        };
        found.ok_or(OrderError::NotFound)
    }

    /// Looks an order up and enforces ownership.
    pub async fn find_for_user(&self, identifier: &str, user_id: Uuid) -> Result<Order, OrderError> {
        let order = self.find(identifier).await?;
        if order.user_id != user_id {
            return Err(OrderError::Forbidden);
        }
        Ok(order)
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Order>, OrderError> {
        self.orders.list_for_user(user_id).await.map_err(OrderError::Store)
    }

    /// Confirms payment: PENDING_PAYMENT → PAID, seats become durably
    /// sold. Calling again on an already-PAID order is a no-op success so
    /// duplicate payment callbacks are harmless. A payment past the
    /// deadline expires the order instead and reports `LatePayment`.
    pub async fn mark_paid(&self, identifier: &str, user_id: Uuid) -> Result<Order, OrderError> {
        let order = self.find_for_user(identifier, user_id).await?;
        match order.status {
            OrderStatus::Paid => return Ok(order),
            OrderStatus::PendingPayment => {}
            // The sweeper got there first; this is a payment arriving late,
            // not a caller bug.
            OrderStatus::Cancelled if order.is_past_deadline(Utc::now()) => {
                return Err(OrderError::LatePayment)
            }
            actual => {
                return Err(OrderError::InvalidState {
                    attempted: OrderStatus::Paid,
                    actual,
                })
            }
        }

        let now = Utc::now();
        if order.is_past_deadline(now) {
            return match self
                .orders
                .transition(order.id, OrderStatus::PendingPayment, OrderStatus::Cancelled, now)
                .await
            {
                Ok(_) => {
                    info!(order_no = %order.order_no, "late payment refused; order expired");
                    Err(OrderError::LatePayment)
                }
                // A concurrent payment committed first; same terminal state.
                Err(TransitionError::StateMismatch {
                    actual: OrderStatus::Paid,
                    ..
                }) => self.find(identifier).await,
                Err(e) => Err(map_transition(e, OrderStatus::Cancelled)),
            };
        }

        match self
            .orders
            .transition(order.id, OrderStatus::PendingPayment, OrderStatus::Paid, now)
            .await
        {
            Ok(paid) => {
                info!(order_no = %paid.order_no, "order marked as paid");
                Ok(paid)
            }
            // Duplicate callback raced us to PAID; report the same state.
            Err(TransitionError::StateMismatch {
                actual: OrderStatus::Paid,
                ..
            }) => self.find(identifier).await,
            Err(TransitionError::StateMismatch {
                actual: OrderStatus::Cancelled,
                ..
            }) => Err(OrderError::LatePayment),
            Err(e) => Err(map_transition(e, OrderStatus::Paid)),
        }
    }

    /// Cancels a pending order and releases its seats immediately.
    /// Cancelling an order the sweeper already expired is an idempotent
    /// success; any other state is a hard error.
    pub async fn cancel(&self, identifier: &str, actor: CancelActor) -> Result<Order, OrderError> {
        let order = self.find(identifier).await?;
        if let CancelActor::User(user_id) = actor {
            if order.user_id != user_id {
                return Err(OrderError::Forbidden);
            }
        }

        let now = Utc::now();
        match self
            .orders
            .transition(order.id, OrderStatus::PendingPayment, OrderStatus::Cancelled, now)
            .await
        {
            Ok(cancelled) => {
                match actor {
                    CancelActor::User(user_id) => {
                        info!(order_no = %cancelled.order_no, %user_id, "order cancelled by user")
                    }
                    CancelActor::System => {
                        info!(order_no = %cancelled.order_no, "order cancelled by system")
                    }
                }
                Ok(cancelled)
            }
            Err(TransitionError::StateMismatch {
                actual: OrderStatus::Cancelled,
                ..
            }) => self.find(identifier).await,
            Err(e) => Err(map_transition(e, OrderStatus::Cancelled)),
        }
    }

    /// Expires one pending order past its deadline, returning the cancelled
    /// order when this call performed the expiry. Losing the race to a
    /// concurrent payment is not an error; the winner's transition stands.
    pub async fn auto_expire(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Order>, OrderError> {
        let order = self
            .orders
            .get(id)
            .await
            .map_err(OrderError::Store)?
            .ok_or(OrderError::NotFound)?;
        if order.status != OrderStatus::PendingPayment || !order.is_past_deadline(now) {
            return Ok(None);
        }
        match self
            .orders
            .transition(id, OrderStatus::PendingPayment, OrderStatus::Cancelled, now)
            .await
        {
            Ok(cancelled) => {
                info!(order_no = %cancelled.order_no, "pending order expired");
                Ok(Some(cancelled))
            }
            Err(TransitionError::StateMismatch { .. }) => Ok(None),
            Err(TransitionError::NotFound) => Err(OrderError::NotFound),
            Err(TransitionError::Store(e)) => Err(OrderError::Store(e)),
        }
    }

    /// Expires every pending order past its deadline, returning the orders
    /// cancelled. Used by the background sweeper, which announces the freed
    /// seats; individual failures are logged and skipped so one bad row
    /// never stalls the pass.
    pub async fn expire_pending(&self, now: DateTime<Utc>) -> Result<Vec<Order>, OrderError> {
        let ids = self
            .orders
            .expired_pending(now)
            .await
            .map_err(OrderError::Store)?;
        let mut expired = Vec::new();
        for id in ids {
            match self.auto_expire(id, now).await {
                Ok(Some(order)) => expired.push(order),
                Ok(None) => {}
                Err(e) => warn!(order_id = %id, error = %e, "failed to expire pending order"),
            }
        }
        Ok(expired)
    }
}

fn map_transition(err: TransitionError, attempted: OrderStatus) -> OrderError {
    match err {
        TransitionError::NotFound => OrderError::NotFound,
        TransitionError::StateMismatch { actual, .. } => OrderError::InvalidState {
            attempted,
            actual,
        },
        TransitionError::Store(e) => OrderError::Store(e),
    }
}
