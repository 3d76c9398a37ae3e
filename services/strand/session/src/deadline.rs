//! Resettable deadline for one outstanding operation.

use std::time::Duration;
use tokio::time::{sleep_until, Instant};

/// A deadline that is either armed at an instant or disarmed.
///
/// `elapsed()` never completes while disarmed, so it can sit in a `select!`
/// next to the operation it guards.
#[derive(Debug, Default)]
pub struct Deadline {
    expiry: Option<Instant>,
}

impl Deadline {
    /// A disarmed deadline
    pub fn new() -> Self {
        Self { expiry: None }
    }

    /// Arm for `timeout` from now. A zero timeout disarms.
    pub fn arm(&mut self, timeout: Duration) {
        self.expiry = if timeout.is_zero() {
            None
        } else {
            Some(Instant::now() + timeout)
        };
    }

    /// Disarm
    pub fn reset(&mut self) {
        self.expiry = None;
    }

    /// Whether armed
    pub fn is_armed(&self) -> bool {
        self.expiry.is_some()
    }

    /// When the deadline expires, if armed
    pub fn expiry(&self) -> Option<Instant> {
        self.expiry
    }

    /// Complete once the armed instant passes
    pub async fn elapsed(&self) {
        match self.expiry {
            Some(at) => sleep_until(at).await,
            None => std::future::pending::<()>().await,
        }
    }
}
