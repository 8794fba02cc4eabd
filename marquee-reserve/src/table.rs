use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use marquee_core::{InsertOutcome, RemoveOutcome, SeatLock, SeatLockTable, SeatPos, StoreError};

/// In-process lock table backed by a mutex-guarded map. The mutex makes
/// every insert a compare-and-swap over the seat key, which is all the
/// atomicity the lock manager needs.
#[derive(Default)]
pub struct MemoryLockTable {
    locks: Mutex<HashMap<(Uuid, SeatPos), SeatLock>>,
}

impl MemoryLockTable {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SeatLockTable for MemoryLockTable {
    async fn query(
        &self,
        screening_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<SeatLock>, StoreError> {
        let locks = self.locks.lock().unwrap();
        Ok(locks
            .values()
            .filter(|l| l.screening_id == screening_id && l.is_active(now))
            .cloned()
            .collect())
    }

    async fn insert(
        &self,
        lock: SeatLock,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome, StoreError> {
        let mut locks = self.locks.lock().unwrap();
        match locks.entry((lock.screening_id, lock.seat)) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_active(now) {
                    if entry.get().holder_id == lock.holder_id {
                        // Idempotent refresh: extend expiry, keep created_at.
                        entry.get_mut().expires_at = lock.expires_at;
                        Ok(InsertOutcome::Refreshed)
                    } else {
                        Ok(InsertOutcome::Conflict)
                    }
                } else {
                    entry.insert(lock);
                    Ok(InsertOutcome::Created)
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(lock);
                Ok(InsertOutcome::Created)
            }
        }
    }

    async fn remove(
        &self,
        screening_id: Uuid,
        seat: SeatPos,
        holder_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<RemoveOutcome, StoreError> {
        let mut locks = self.locks.lock().unwrap();
        let key = (screening_id, seat);
        match locks.get(&key) {
            None => Ok(RemoveOutcome::NotHeld),
            Some(lock) if !lock.is_active(now) => {
                locks.remove(&key);
                Ok(RemoveOutcome::NotHeld)
            }
            Some(lock) if lock.holder_id == holder_id => {
                locks.remove(&key);
                Ok(RemoveOutcome::Removed)
            }
            Some(_) => Ok(RemoveOutcome::HeldByOther),
        }
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<Vec<SeatLock>, StoreError> {
        let mut locks = self.locks.lock().unwrap();
        let expired: Vec<SeatLock> = locks
            .values()
            .filter(|l| !l.is_active(now))
            .cloned()
            .collect();
        locks.retain(|_, lock| lock.is_active(now));
        Ok(expired)
    }
}
