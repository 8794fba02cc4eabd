use uuid::Uuid;

use marquee_core::SeatPos;

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatUpdateKind {
    Locked,
    Released,
    Sold,
}

/// Broadcast whenever the availability of seats changes, so connected
/// seat-map clients can repaint without polling.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct SeatUpdateEvent {
    pub screening_id: Uuid,
    pub seats: Vec<SeatPos>,
    pub kind: SeatUpdateKind,
    pub at: i64,
}

impl SeatUpdateEvent {
    pub fn new(screening_id: Uuid, seats: Vec<SeatPos>, kind: SeatUpdateKind) -> Self {
        Self {
            screening_id,
            seats,
            kind,
            at: chrono::Utc::now().timestamp_millis(),
        }
    }
}
