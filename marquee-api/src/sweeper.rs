use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};
use uuid::Uuid;

use marquee_core::SeatPos;
use marquee_order::OrderController;
use marquee_reserve::LockManager;
use marquee_shared::{SeatUpdateEvent, SeatUpdateKind};

/// Background reclamation loop: physically deletes expired lock entries
/// and moves lapsed PENDING_PAYMENT orders to CANCELLED. Correctness never
/// depends on it; everything it touches is already logically expired.
/// Seats freed by either pass are announced on the update stream so
/// connected seat maps repaint without polling.
pub async fn run(
    locks: LockManager,
    orders: OrderController,
    sse_tx: broadcast::Sender<SeatUpdateEvent>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        sweep_once(&locks, &orders, &sse_tx).await;
    }
}

async fn sweep_once(
    locks: &LockManager,
    orders: &OrderController,
    sse_tx: &broadcast::Sender<SeatUpdateEvent>,
) {
    let now = Utc::now();

    match locks.sweep(now).await {
        Ok(swept) if swept.is_empty() => {}
        Ok(swept) => {
            debug!(removed = swept.len(), "swept expired seat locks");
            let mut freed: HashMap<Uuid, Vec<SeatPos>> = HashMap::new();
            for lock in swept {
                freed.entry(lock.screening_id).or_default().push(lock.seat);
            }
            for (screening_id, seats) in freed {
                let _ = sse_tx.send(SeatUpdateEvent::new(
                    screening_id,
                    seats,
                    SeatUpdateKind::Released,
                ));
            }
        }
        // Next tick retries; expired entries stay logically dead meanwhile.
        Err(e) => warn!("seat lock sweep failed: {}", e),
    }

    match orders.expire_pending(now).await {
        Ok(expired) if expired.is_empty() => {}
        Ok(expired) => {
            debug!(expired = expired.len(), "expired lapsed pending orders");
            for order in expired {
                let _ = sse_tx.send(SeatUpdateEvent::new(
                    order.screening_id,
                    order.seats,
                    SeatUpdateKind::Released,
                ));
            }
        }
        Err(e) => warn!("pending order expiry failed: {}", e),
    }
}
