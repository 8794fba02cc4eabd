use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::lock::SeatLock;
use crate::seat::{RoomLayout, SeatPos};

pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// Result of a conditional lock insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The seat was free; a new lock now exists.
    Created,
    /// An active lock by the same holder existed; its expiry was extended
    /// in place, no duplicate entry was written.
    Refreshed,
    /// An active lock by a different holder exists.
    Conflict,
}

/// Result of an owner-checked lock removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    /// No active lock for this holder: absent or already expired.
    NotHeld,
    /// An active lock by a different holder exists; the removal is refused.
    HeldByOther,
}

/// Authoritative record of active seat holds.
///
/// `insert` must be an atomic compare-and-swap keyed by
/// `(screening_id, seat)`; callers never read-then-write. Expired entries
/// are treated as absent by every operation, whether or not `sweep` has
/// physically removed them yet.
#[async_trait]
pub trait SeatLockTable: Send + Sync {
    /// All currently active locks for a screening.
    async fn query(
        &self,
        screening_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<SeatLock>, StoreError>;

    async fn insert(&self, lock: SeatLock, now: DateTime<Utc>)
        -> Result<InsertOutcome, StoreError>;

    async fn remove(
        &self,
        screening_id: Uuid,
        seat: SeatPos,
        holder_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<RemoveOutcome, StoreError>;

    /// Physically deletes entries with `expires_at <= now`, returning the
    /// locks removed so callers can announce the freed seats. Space
    /// reclamation only; correctness never depends on it running.
    async fn sweep(&self, now: DateTime<Utc>) -> Result<Vec<SeatLock>, StoreError>;
}

/// A seat held through an order rather than a raw lock: a pending order
/// still inside its deadline, or a completed sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeatClaim {
    pub seat: SeatPos,
    /// `true` once payment made the sale durable.
    pub sold: bool,
}

/// Seats claimed by orders, consulted by the lock manager so availability
/// has a single answer. Implemented by the order store.
#[async_trait]
pub trait SeatClaimSource: Send + Sync {
    async fn claimed_seats(
        &self,
        screening_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<SeatClaim>, StoreError>;
}

/// Boundary to the screening catalog, which this engine does not own.
/// Returns `None` for unknown screenings.
#[async_trait]
pub trait ScreeningDirectory: Send + Sync {
    async fn room_layout(&self, screening_id: Uuid) -> Result<Option<RoomLayout>, StoreError>;
}
