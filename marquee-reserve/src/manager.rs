use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use marquee_core::{
    format_seats, InsertOutcome, RemoveOutcome, ScreeningDirectory, SeatClaimSource, SeatLock,
    SeatLockTable, SeatPos, SeatStatus, StoreError,
};

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("screening not found: {0}")]
    UnknownScreening(Uuid),

    #[error("at least one seat must be requested")]
    EmptyRequest,

    #[error("request contains duplicate seats")]
    DuplicateSeats,

    #[error("invalid seats (outside the room grid or blocked): {}", format_seats(.0))]
    InvalidSeats(Vec<SeatPos>),

    #[error("seats already locked or sold: {}", format_seats(.0))]
    Conflict(Vec<SeatPos>),

    #[error("no active lock held for seats: {}", format_seats(.0))]
    NotHeld(Vec<SeatPos>),

    #[error("seats actively held by another customer: {}", format_seats(.0))]
    HeldByOther(Vec<SeatPos>),

    #[error("seat lock storage failed: {0}")]
    Store(#[from] StoreError),
}

/// Per-seat status grid for one screening, row-major.
#[derive(Debug, Clone, Serialize)]
pub struct SeatMap {
    pub rows: i32,
    pub cols: i32,
    pub grid: Vec<Vec<SeatStatus>>,
}

/// The sole conflict-resolution authority for seat holds. Acquisition is
/// all-or-nothing per request; the conflict error names exactly the seats
/// that could not be granted so callers can retry for the remainder.
#[derive(Clone)]
pub struct LockManager {
    table: Arc<dyn SeatLockTable>,
    claims: Arc<dyn SeatClaimSource>,
    directory: Arc<dyn ScreeningDirectory>,
    window: Duration,
}

impl LockManager {
    pub fn new(
        table: Arc<dyn SeatLockTable>,
        claims: Arc<dyn SeatClaimSource>,
        directory: Arc<dyn ScreeningDirectory>,
        window: Duration,
    ) -> Self {
        Self {
            table,
            claims,
            directory,
            window,
        }
    }

    /// Reservation window shared with order deadlines and the client
    /// countdown.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Acquires locks for every requested seat with a single shared expiry,
    /// or grants none. Seats the holder already has active locks on are
    /// refreshed rather than rejected.
    pub async fn lock_seats(
        &self,
        screening_id: Uuid,
        holder_id: Uuid,
        seats: &[SeatPos],
    ) -> Result<Vec<SeatLock>, LockError> {
        let layout = self
            .directory
            .room_layout(screening_id)
            .await?
            .ok_or(LockError::UnknownScreening(screening_id))?;
        validate_request(&layout, seats)?;

        let now = Utc::now();
        let expires_at = now + self.window;

        // Seats sold or held through a live order conflict before any
        // lock insert is attempted.
        let claimed: HashSet<SeatPos> = self
            .claims
            .claimed_seats(screening_id, now)
            .await?
            .into_iter()
            .map(|c| c.seat)
            .collect();
        let mut conflicts: Vec<SeatPos> =
            seats.iter().copied().filter(|s| claimed.contains(s)).collect();

        let mut created: Vec<SeatPos> = Vec::new();
        let mut refreshed: Vec<SeatPos> = Vec::new();
        let mut granted: Vec<SeatLock> = Vec::new();
        let mut storage_failure: Option<StoreError> = None;

        for seat in seats.iter().copied().filter(|s| !claimed.contains(s)) {
            let lock = SeatLock::new(screening_id, seat, holder_id, expires_at, now);
            match self.table.insert(lock.clone(), now).await {
                Ok(InsertOutcome::Created) => {
                    created.push(seat);
                    granted.push(lock);
                }
                Ok(InsertOutcome::Refreshed) => {
                    refreshed.push(seat);
                    granted.push(lock);
                }
                Ok(InsertOutcome::Conflict) => conflicts.push(seat),
                Err(e) => {
                    storage_failure = Some(e);
                    break;
                }
            }
        }

        // Order creation publishes its claim before it releases the raw
        // lock, so a grant that slipped through that release window must
        // observe the claim on a second read. Without it, a seat can be
        // locked and ordered twice.
        if storage_failure.is_none() && conflicts.is_empty() {
            match self.claims.claimed_seats(screening_id, now).await {
                Ok(claims) => {
                    let claimed: HashSet<SeatPos> =
                        claims.into_iter().map(|c| c.seat).collect();
                    conflicts.extend(seats.iter().copied().filter(|s| claimed.contains(s)));
                }
                Err(e) => storage_failure = Some(e),
            }
        }

        if storage_failure.is_some() || !conflicts.is_empty() {
            // All-or-nothing: undo the inserts made during this attempt.
            // Refreshed locks were the holder's own and stay in place.
            for seat in created {
                if let Err(e) = self.table.remove(screening_id, seat, holder_id, now).await {
                    warn!(
                        %screening_id, %holder_id, seat = %seat, error = %e,
                        "failed to roll back partial seat lock"
                    );
                }
            }
            if let Some(e) = storage_failure {
                return Err(LockError::Store(e));
            }
            conflicts.sort();
            return Err(LockError::Conflict(conflicts));
        }

        if !refreshed.is_empty() {
            // The table kept the original created_at on a refresh; read it
            // back so the grant reports the hold's true creation time.
            match self.table.query(screening_id, now).await {
                Ok(stored) => {
                    let created_at: HashMap<SeatPos, DateTime<Utc>> = stored
                        .into_iter()
                        .filter(|l| l.holder_id == holder_id)
                        .map(|l| (l.seat, l.created_at))
                        .collect();
                    for lock in granted.iter_mut() {
                        if let Some(&at) = created_at.get(&lock.seat) {
                            lock.created_at = at;
                        }
                    }
                }
                Err(e) => warn!(
                    %screening_id, %holder_id, error = %e,
                    "failed to read back refreshed lock creation times"
                ),
            }
        }

        debug!(%screening_id, %holder_id, count = granted.len(), "seat locks granted");
        Ok(granted)
    }

    /// Releases the caller's locks. Absent or already-expired locks are
    /// idempotent successes; seats actively held by someone else are refused.
    pub async fn unlock_seats(
        &self,
        screening_id: Uuid,
        holder_id: Uuid,
        seats: &[SeatPos],
    ) -> Result<(), LockError> {
        let now = Utc::now();
        let mut refused = Vec::new();
        for &seat in seats {
            match self.table.remove(screening_id, seat, holder_id, now).await? {
                RemoveOutcome::Removed | RemoveOutcome::NotHeld => {}
                RemoveOutcome::HeldByOther => refused.push(seat),
            }
        }
        if refused.is_empty() {
            Ok(())
        } else {
            refused.sort();
            Err(LockError::HeldByOther(refused))
        }
    }

    /// Confirms every seat carries an active lock owned by `holder_id`,
    /// returning the locks. Order creation calls this before committing.
    pub async fn verify_held(
        &self,
        screening_id: Uuid,
        holder_id: Uuid,
        seats: &[SeatPos],
    ) -> Result<Vec<SeatLock>, LockError> {
        let now = Utc::now();
        let held: HashMap<SeatPos, SeatLock> = self
            .table
            .query(screening_id, now)
            .await?
            .into_iter()
            .filter(|l| l.holder_id == holder_id)
            .map(|l| (l.seat, l))
            .collect();

        let mut missing = Vec::new();
        let mut locks = Vec::new();
        for &seat in seats {
            match held.get(&seat) {
                Some(lock) => locks.push(lock.clone()),
                None => missing.push(seat),
            }
        }
        if missing.is_empty() {
            Ok(locks)
        } else {
            missing.sort();
            Err(LockError::NotHeld(missing))
        }
    }

    /// Physically reclaims expired lock entries, returning the locks that
    /// were removed. Expiry itself is lazy; this only frees storage.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<Vec<SeatLock>, LockError> {
        Ok(self.table.sweep(now).await?)
    }

    /// Full per-seat status grid for a screening.
    /// Precedence mirrors the storefront seat picker: sold > locked >
    /// blocked > available.
    pub async fn seat_map(&self, screening_id: Uuid) -> Result<SeatMap, LockError> {
        let layout = self
            .directory
            .room_layout(screening_id)
            .await?
            .ok_or(LockError::UnknownScreening(screening_id))?;
        let now = Utc::now();

        let mut sold: HashSet<SeatPos> = HashSet::new();
        let mut held: HashSet<SeatPos> = HashSet::new();
        for claim in self.claims.claimed_seats(screening_id, now).await? {
            if claim.sold {
                sold.insert(claim.seat);
            } else {
                held.insert(claim.seat);
            }
        }
        for lock in self.table.query(screening_id, now).await? {
            held.insert(lock.seat);
        }

        let mut grid = Vec::with_capacity(layout.rows as usize);
        for row in 1..=layout.rows {
            let mut row_seats = Vec::with_capacity(layout.cols as usize);
            for col in 1..=layout.cols {
                let seat = SeatPos::new(row, col);
                let status = if sold.contains(&seat) {
                    SeatStatus::Sold
                } else if held.contains(&seat) {
                    SeatStatus::Locked
                } else if layout.is_blocked(seat) {
                    SeatStatus::Unavailable
                } else {
                    SeatStatus::Available
                };
                row_seats.push(status);
            }
            grid.push(row_seats);
        }

        Ok(SeatMap {
            rows: layout.rows,
            cols: layout.cols,
            grid,
        })
    }
}

fn validate_request(
    layout: &marquee_core::RoomLayout,
    seats: &[SeatPos],
) -> Result<(), LockError> {
    if seats.is_empty() {
        return Err(LockError::EmptyRequest);
    }
    let unique: HashSet<SeatPos> = seats.iter().copied().collect();
    if unique.len() != seats.len() {
        return Err(LockError::DuplicateSeats);
    }
    let mut invalid: Vec<SeatPos> = seats
        .iter()
        .copied()
        .filter(|s| !layout.is_sellable(*s))
        .collect();
    if !invalid.is_empty() {
        invalid.sort();
        return Err(LockError::InvalidSeats(invalid));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::MemoryLockTable;
    use async_trait::async_trait;
    use marquee_core::{RoomLayout, SeatClaim};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Claim source with no order-held seats.
    struct NoClaims;

    #[async_trait]
    impl SeatClaimSource for NoClaims {
        async fn claimed_seats(
            &self,
            _screening_id: Uuid,
            _now: DateTime<Utc>,
        ) -> Result<Vec<SeatClaim>, StoreError> {
            Ok(Vec::new())
        }
    }

    /// Claim source that publishes a claim only after its first read, the
    /// way an order insert racing a grant does.
    struct LateClaim {
        seat: SeatPos,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl SeatClaimSource for LateClaim {
        async fn claimed_seats(
            &self,
            _screening_id: Uuid,
            _now: DateTime<Utc>,
        ) -> Result<Vec<SeatClaim>, StoreError> {
            if self.reads.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(Vec::new())
            } else {
                Ok(vec![SeatClaim {
                    seat: self.seat,
                    sold: false,
                }])
            }
        }
    }

    /// Claim source that marks a fixed set of seats as sold.
    struct FixedClaims(Vec<SeatPos>);

    #[async_trait]
    impl SeatClaimSource for FixedClaims {
        async fn claimed_seats(
            &self,
            _screening_id: Uuid,
            _now: DateTime<Utc>,
        ) -> Result<Vec<SeatClaim>, StoreError> {
            Ok(self.0.iter().map(|&seat| SeatClaim { seat, sold: true }).collect())
        }
    }

    /// Directory answering every screening with the same layout.
    struct AnyScreening(RoomLayout);

    #[async_trait]
    impl ScreeningDirectory for AnyScreening {
        async fn room_layout(
            &self,
            _screening_id: Uuid,
        ) -> Result<Option<RoomLayout>, StoreError> {
            Ok(Some(self.0.clone()))
        }
    }

    fn manager_with_claims(claims: Arc<dyn SeatClaimSource>) -> LockManager {
        LockManager::new(
            Arc::new(MemoryLockTable::new()),
            claims,
            Arc::new(AnyScreening(RoomLayout::new(10, 10))),
            Duration::minutes(15),
        )
    }

    fn manager() -> LockManager {
        manager_with_claims(Arc::new(NoClaims))
    }

    #[tokio::test]
    async fn disjoint_requests_all_succeed() {
        let manager = manager();
        let screening = Uuid::new_v4();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

        let alice_seats = [SeatPos::new(1, 1), SeatPos::new(1, 2)];
        let bob_seats = [SeatPos::new(2, 1), SeatPos::new(2, 2)];
        let a = manager.lock_seats(screening, alice, &alice_seats);
        let b = manager.lock_seats(screening, bob, &bob_seats);
        let (a, b) = tokio::join!(a, b);
        assert_eq!(a.unwrap().len(), 2);
        assert_eq!(b.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn overlapping_requests_have_exactly_one_winner() {
        let manager = manager();
        let screening = Uuid::new_v4();
        let contested = SeatPos::new(5, 5);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            let holder = Uuid::new_v4();
            tasks.push(tokio::spawn(async move {
                manager.lock_seats(screening, holder, &[contested]).await
            }));
        }

        let mut winners = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => winners += 1,
                Err(LockError::Conflict(seats)) => assert_eq!(seats, vec![contested]),
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn conflict_lists_only_contended_seats_and_rolls_back() {
        let manager = manager();
        let screening = Uuid::new_v4();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let contested = SeatPos::new(1, 6);

        manager
            .lock_seats(screening, alice, &[contested])
            .await
            .unwrap();

        let free = SeatPos::new(1, 5);
        let err = manager
            .lock_seats(screening, bob, &[free, contested])
            .await
            .unwrap_err();
        match err {
            LockError::Conflict(seats) => assert_eq!(seats, vec![contested]),
            other => panic!("unexpected error: {other}"),
        }

        // The free seat was not left partially locked by the loser.
        let relock = manager.lock_seats(screening, Uuid::new_v4(), &[free]).await;
        assert!(relock.is_ok());
    }

    #[tokio::test]
    async fn relock_by_same_holder_extends_expiry() {
        let manager = manager();
        let screening = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let seats = [SeatPos::new(3, 1), SeatPos::new(3, 2)];

        let first = manager.lock_seats(screening, alice, &seats).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = manager.lock_seats(screening, alice, &seats).await.unwrap();
        assert_eq!(second.len(), 2);
        for (a, b) in first.iter().zip(second.iter()) {
            assert!(b.expires_at >= a.expires_at);
            // The refresh keeps the hold's original creation time, and the
            // grant reports it, not the refresh instant.
            assert_eq!(b.created_at, a.created_at);
        }
        // Still a single entry per seat.
        let held = manager.verify_held(screening, alice, &seats).await.unwrap();
        assert_eq!(held.len(), 2);
    }

    #[tokio::test]
    async fn claim_published_during_the_grant_is_a_conflict() {
        let contested = SeatPos::new(2, 3);
        let manager = manager_with_claims(Arc::new(LateClaim {
            seat: contested,
            reads: AtomicUsize::new(0),
        }));
        let screening = Uuid::new_v4();
        let bob = Uuid::new_v4();

        // The first claims read sees nothing, the inserts succeed, and the
        // re-check finds the seat claimed by a freshly created order.
        let err = manager
            .lock_seats(screening, bob, &[contested, SeatPos::new(2, 4)])
            .await
            .unwrap_err();
        match err {
            LockError::Conflict(seats) => assert_eq!(seats, vec![contested]),
            other => panic!("unexpected error: {other}"),
        }

        // Both inserts were rolled back, not just the contested one.
        let err = manager
            .verify_held(screening, bob, &[contested, SeatPos::new(2, 4)])
            .await
            .unwrap_err();
        match err {
            LockError::NotHeld(seats) => assert_eq!(seats.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn lock_then_unlock_round_trips() {
        let manager = manager();
        let screening = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let seat = [SeatPos::new(4, 4)];

        manager.lock_seats(screening, alice, &seat).await.unwrap();
        manager.unlock_seats(screening, alice, &seat).await.unwrap();

        // Seat is exactly as available as before: anyone can take it.
        let bob = Uuid::new_v4();
        assert!(manager.lock_seats(screening, bob, &seat).await.is_ok());
    }

    #[tokio::test]
    async fn unlock_is_idempotent_but_owner_checked() {
        let manager = manager();
        let screening = Uuid::new_v4();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let seat = [SeatPos::new(6, 6)];

        // Nothing locked yet: releasing is a quiet no-op.
        manager.unlock_seats(screening, alice, &seat).await.unwrap();

        manager.lock_seats(screening, alice, &seat).await.unwrap();
        let err = manager.unlock_seats(screening, bob, &seat).await.unwrap_err();
        match err {
            LockError::HeldByOther(seats) => assert_eq!(seats, vec![seat[0]]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn sold_seats_conflict_before_any_insert() {
        let sold = SeatPos::new(7, 7);
        let manager = manager_with_claims(Arc::new(FixedClaims(vec![sold])));
        let screening = Uuid::new_v4();

        let err = manager
            .lock_seats(screening, Uuid::new_v4(), &[sold, SeatPos::new(7, 8)])
            .await
            .unwrap_err();
        match err {
            LockError::Conflict(seats) => assert_eq!(seats, vec![sold]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn request_validation_rejects_bad_seats() {
        let manager = manager();
        let screening = Uuid::new_v4();
        let holder = Uuid::new_v4();

        assert!(matches!(
            manager.lock_seats(screening, holder, &[]).await,
            Err(LockError::EmptyRequest)
        ));
        assert!(matches!(
            manager
                .lock_seats(screening, holder, &[SeatPos::new(1, 1), SeatPos::new(1, 1)])
                .await,
            Err(LockError::DuplicateSeats)
        ));
        match manager
            .lock_seats(screening, holder, &[SeatPos::new(11, 1)])
            .await
            .unwrap_err()
        {
            LockError::InvalidSeats(seats) => assert_eq!(seats, vec![SeatPos::new(11, 1)]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn seat_map_reports_locked_and_blocked() {
        let table: Arc<dyn SeatLockTable> = Arc::new(MemoryLockTable::new());
        let layout = RoomLayout::with_blocked(2, 2, vec![SeatPos::new(2, 2)]);
        let manager = LockManager::new(
            table,
            Arc::new(NoClaims),
            Arc::new(AnyScreening(layout)),
            Duration::minutes(15),
        );
        let screening = Uuid::new_v4();

        manager
            .lock_seats(screening, Uuid::new_v4(), &[SeatPos::new(1, 1)])
            .await
            .unwrap();

        let map = manager.seat_map(screening).await.unwrap();
        assert_eq!(map.grid[0][0], SeatStatus::Locked);
        assert_eq!(map.grid[0][1], SeatStatus::Available);
        assert_eq!(map.grid[1][1], SeatStatus::Unavailable);
    }
}
