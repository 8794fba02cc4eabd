use tokio::sync::broadcast;

use marquee_order::OrderController;
use marquee_reserve::LockManager;
use marquee_shared::SeatUpdateEvent;

#[derive(Clone)]
pub struct AppState {
    pub locks: LockManager,
    pub orders: OrderController,
    pub sse_tx: broadcast::Sender<SeatUpdateEvent>,
}
