use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::atomic::{AtomicU32, Ordering};

/// Generates order numbers: millisecond timestamp (17 digits) plus a
/// 3-digit random component and a 3-digit cycling sequence. 23 digits
/// total; collision odds are negligible at storefront load, and the
/// database keeps a unique constraint as the backstop.
#[derive(Default)]
pub struct OrderNumberGenerator {
    sequence: AtomicU32,
}

impl OrderNumberGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generate(&self, now: DateTime<Utc>) -> String {
        let timestamp = now.format("%Y%m%d%H%M%S%3f");
        let random: u32 = rand::thread_rng().gen_range(0..1000);
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) % 1000;
        format!("{timestamp}{random:03}{seq:03}")
    }
}
