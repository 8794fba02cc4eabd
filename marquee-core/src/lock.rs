use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::seat::SeatPos;

/// A time-bounded exclusive claim on one seat for one screening by one
/// holder. At most one active lock may exist per `(screening_id, seat)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeatLock {
    pub screening_id: Uuid,
    pub seat: SeatPos,
    pub holder_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl SeatLock {
    pub fn new(
        screening_id: Uuid,
        seat: SeatPos,
        holder_id: Uuid,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            screening_id,
            seat,
            holder_id,
            expires_at,
            created_at: now,
        }
    }

    /// Active strictly before the deadline: a lock expiring at `T` is
    /// already released at `T`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn lock_is_inactive_exactly_at_expiry() {
        let now = Utc::now();
        let lock = SeatLock::new(
            Uuid::new_v4(),
            SeatPos::new(1, 1),
            Uuid::new_v4(),
            now + Duration::minutes(15),
            now,
        );
        let deadline = lock.expires_at;
        assert!(lock.is_active(deadline - Duration::milliseconds(1)));
        assert!(!lock.is_active(deadline));
        assert!(!lock.is_active(deadline + Duration::milliseconds(1)));
    }
}
