//! # Task Start Rate Limiting
//!
//! Per task type start-rate limits in the `"N/s"`, `"N/m"`, `"N/h"` format
//! (a bare `"N"` means per second). Starts are spaced `period / N` apart;
//! callers receive the wait for their reserved slot and suspend only their
//! own task.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// A parsed start-rate limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub count: u32,
    pub period: Duration,
}

impl RateLimit {
    pub fn parse(rate: &str) -> Result<RateLimit, String> {
        let rate = rate.trim();
        let (count, unit) = match rate.split_once('/') {
            Some((count, unit)) => (count.trim(), unit.trim()),
            None => (rate, "s"),
        };

        let count: u32 = count
            .parse()
            .map_err(|_| format!("'{rate}' is not a rate such as 10/s, 100/m or 500/h"))?;
        if count == 0 {
            return Err(format!("'{rate}' must allow at least one task per period"));
        }

        let period = match unit {
            "s" => Duration::from_secs(1),
            "m" => Duration::from_secs(60),
            "h" => Duration::from_secs(3600),
            other => return Err(format!("unknown rate unit '{other}', expected s, m or h")),
        };

        Ok(RateLimit { count, period })
    }

    /// Minimum spacing between two starts
    pub fn interval(&self) -> Duration {
        self.period / self.count
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.period.as_secs() {
            60 => "m",
            3600 => "h",
            _ => "s",
        };
        write!(f, "{}/{}", self.count, unit)
    }
}

/// A start slot handed out by [`RateLimiter::reserve`]
#[derive(Debug, Clone)]
pub struct Reservation {
    task_name: String,
    start: Instant,
    interval: Duration,
}

impl Reservation {
    /// Time left until the slot arrives
    pub fn wait(&self) -> Duration {
        self.start.saturating_duration_since(Instant::now())
    }
}

/// Next free start slot per task name
#[derive(Debug, Default, Clone)]
pub struct RateLimiter {
    next_slot: Arc<DashMap<String, Arc<Mutex<Instant>>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, task_name: &str) -> Arc<Mutex<Instant>> {
        self.next_slot
            .entry(task_name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Instant::now())))
            .clone()
    }

    /// Reserve the next start slot for `task_name`
    pub fn reserve(&self, task_name: &str, limit: RateLimit) -> Reservation {
        let slot = self.slot(task_name);
        let mut next = slot.lock();
        let start = (*next).max(Instant::now());
        *next = start + limit.interval();
        Reservation {
            task_name: task_name.to_string(),
            start,
            interval: limit.interval(),
        }
    }

    /// Give back a slot that will not be used. Only the most recent
    /// reservation can be returned; earlier ones already spaced the
    /// reservations made after them.
    pub fn release(&self, reservation: &Reservation) -> bool {
        let Some(slot) = self.next_slot.get(&reservation.task_name).map(|s| s.clone()) else {
            return false;
        };
        let mut next = slot.lock();
        if *next == reservation.start + reservation.interval {
            *next = reservation.start;
            true
        } else {
            false
        }
    }

    /// Reserve a slot and sleep until it arrives
    pub async fn acquire(&self, task_name: &str, limit: RateLimit) {
        let wait = self.reserve(task_name, limit).wait();
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}
