use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Snapshot of the time left before a reservation deadline, floored to
/// whole seconds. Once `expired` is true it never goes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Remaining {
    pub minutes: i64,
    pub seconds: i64,
    pub expired: bool,
}

impl Remaining {
    /// "MM:SS" for display next to the seat map.
    pub fn formatted(&self) -> String {
        format!("{:02}:{:02}", self.minutes, self.seconds)
    }
}

/// Pure countdown arithmetic against an absolute deadline. The deadline
/// never moves, so recomputing after a pause or clock skew on the display
/// side always lands on the same answer.
#[derive(Debug, Clone, Copy)]
pub struct Countdown {
    pub create_time: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

impl Countdown {
    pub fn new(create_time: DateTime<Utc>, deadline: DateTime<Utc>) -> Self {
        Self {
            create_time,
            deadline,
        }
    }

    pub fn for_window(create_time: DateTime<Utc>, window: Duration) -> Self {
        Self::new(create_time, create_time + window)
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> Remaining {
        let left = self.deadline - now;
        if left <= Duration::zero() {
            return Remaining {
                minutes: 0,
                seconds: 0,
                expired: true,
            };
        }
        let total_seconds = left.num_seconds();
        Remaining {
            minutes: total_seconds / 60,
            seconds: total_seconds % 60,
            expired: false,
        }
    }
}

/// Pushes a fresh `Remaining` to subscribers every second until the
/// deadline passes. Receivers see the final expired tick and then the
/// channel goes quiet; the task stops on its own.
pub struct CountdownTicker {
    countdown: Countdown,
    tx: Arc<watch::Sender<Remaining>>,
    task: JoinHandle<()>,
}

impl CountdownTicker {
    pub fn start(countdown: Countdown) -> Self {
        let (tx, _rx) = watch::channel(countdown.remaining(Utc::now()));
        let tx = Arc::new(tx);
        let task = Self::spawn(countdown, Arc::clone(&tx));
        Self {
            countdown,
            tx,
            task,
        }
    }

    fn spawn(countdown: Countdown, tx: Arc<watch::Sender<Remaining>>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
            loop {
                ticker.tick().await;
                let remaining = countdown.remaining(Utc::now());
                // send_replace never fails; receivers may come and go.
                tx.send_replace(remaining);
                if remaining.expired {
                    break;
                }
            }
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<Remaining> {
        self.tx.subscribe()
    }

    pub fn countdown(&self) -> Countdown {
        self.countdown
    }

    /// Re-arms the ticker against a new deadline, e.g. after the holder
    /// refreshed their locks. Existing subscribers keep their receiver.
    pub fn restart(&mut self, countdown: Countdown) {
        self.task.abort();
        self.countdown = countdown;
        self.tx.send_replace(countdown.remaining(Utc::now()));
        self.task = Self::spawn(countdown, Arc::clone(&self.tx));
    }
}

impl Drop for CountdownTicker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_floors_to_whole_seconds() {
        let start = Utc::now();
        let countdown = Countdown::for_window(start, Duration::minutes(15));

        let r = countdown.remaining(start);
        assert_eq!((r.minutes, r.seconds, r.expired), (15, 0, false));
        assert_eq!(r.formatted(), "15:00");

        // 14:59.400 left floors to 14:59.
        let r = countdown.remaining(start + Duration::milliseconds(600));
        assert_eq!((r.minutes, r.seconds), (14, 59));
        assert_eq!(r.formatted(), "14:59");

        let r = countdown.remaining(start + Duration::seconds(899));
        assert_eq!(r.formatted(), "00:01");
    }

    #[test]
    fn expiry_is_exact_at_the_deadline() {
        let start = Utc::now();
        let countdown = Countdown::for_window(start, Duration::minutes(15));
        let deadline = countdown.deadline;

        assert!(!countdown.remaining(deadline - Duration::milliseconds(1)).expired);
        let at = countdown.remaining(deadline);
        assert!(at.expired);
        assert_eq!(at.formatted(), "00:00");
        // Long after: still pinned at zero, never negative.
        let late = countdown.remaining(deadline + Duration::hours(2));
        assert_eq!((late.minutes, late.seconds, late.expired), (0, 0, true));
    }

    #[tokio::test]
    async fn ticker_counts_down_and_stops_when_expired() {
        let start = Utc::now();
        // Deadline already passed; the first tick reports expired.
        let countdown = Countdown::new(start, start - Duration::seconds(1));
        let ticker = CountdownTicker::start(countdown);
        let mut rx = ticker.subscribe();

        rx.changed().await.unwrap();
        assert!(rx.borrow().expired);
    }

    #[tokio::test]
    async fn restart_rearms_against_the_new_deadline() {
        let start = Utc::now();
        let mut ticker =
            CountdownTicker::start(Countdown::new(start, start - Duration::seconds(1)));
        let rx = ticker.subscribe();

        ticker.restart(Countdown::for_window(Utc::now(), Duration::minutes(15)));
        let r = *rx.borrow();
        assert!(!r.expired);
        assert!(r.minutes >= 14);
    }
}
