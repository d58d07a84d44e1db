//! Clock and order-id generation seams.
//!
//! Injected into the reconciler so tests can pin time and ids.

use chrono::{DateTime, Utc};
use rand::Rng;

/// Time source
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Generator for globally-unique order / reference ids
pub trait OrderIdGenerator: Send + Sync {
    fn next_id(&self, now: DateTime<Utc>) -> String;
}

/// Timestamp-to-the-second, sub-second fraction, then a random suffix.
/// Sortable by creation time and unique enough across concurrent requests;
/// the database unique constraint backstops collisions.
pub struct SystemOrderIdGenerator;

impl OrderIdGenerator for SystemOrderIdGenerator {
    fn next_id(&self, now: DateTime<Utc>) -> String {
        let suffix: u32 = rand::rng().random_range(0..1_000_000);
        format!("{}{:06}", now.format("%Y%m%d%H%M%S%3f"), suffix)
    }
}
