//! Byte-rate pacing primitive.
//!
//! A [`RateGate`] keeps a tally of bytes cleared since its accounting window
//! opened. Bytes already cleared "should have taken" `tally / limit`
//! seconds; if less time than that has passed the caller is ahead of
//! schedule and must wait the difference before its next bytes count as
//! sent.
//!
//! # Window reset
//! Once a window is a second old it is re-opened at the current instant.
//! Only the bytes not yet paid for at the current rate are carried into the
//! new window, so a connection that was idle earns no burst credit and a
//! connection that is behind schedule keeps its debt. Average throughput
//! over any interval longer than the horizon converges to the limit.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use super::accessor::ceiling;
use super::{Limit, RequestContext};

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Age after which the accounting window is re-opened.
const RESET_HORIZON: Duration = Duration::from_secs(1);

/// Throttled bodies release at most this fraction of a second's budget at once.
const CHUNKS_PER_SECOND: u64 = 10;

/// Upper bound for a single paced slice.
const MAX_CHUNK: usize = 64 * 1024;

#[derive(Debug)]
struct Window {
    start: Instant,
    tally: u64,
}

/// Computes how long a writer must wait to stay under a bytes-per-second ceiling.
#[derive(Debug)]
pub struct RateGate {
    limit: Limit<i64>,
    window: Mutex<Window>,
}

impl RateGate {
    /// Create a gate whose ceiling is read from `limit` on every call.
    pub fn new(limit: Limit<i64>) -> Self {
        Self {
            limit,
            window: Mutex::new(Window {
                start: Instant::now(),
                tally: 0,
            }),
        }
    }

    /// Clear `bytes` for sending and return how long to wait before sending them.
    pub fn acquire(&self, ctx: &RequestContext, bytes: usize) -> Duration {
        if bytes == 0 {
            return Duration::ZERO;
        }
        let Some(limit) = ceiling(self.limit.get(ctx)) else {
            return Duration::ZERO;
        };

        let now = Instant::now();
        let mut window = self.lock();
        let mut elapsed = now.saturating_duration_since(window.start);

        if elapsed >= RESET_HORIZON {
            let on_schedule = elapsed.as_nanos() * limit as u128 / NANOS_PER_SEC;
            let on_schedule = u64::try_from(on_schedule).unwrap_or(u64::MAX);
            window.tally = window.tally.saturating_sub(on_schedule);
            window.start = now;
            elapsed = Duration::ZERO;
        }

        let expected = window.tally as u128 * NANOS_PER_SEC / limit as u128;
        let expected = Duration::from_nanos(u64::try_from(expected).unwrap_or(u64::MAX));
        window.tally = window.tally.saturating_add(bytes as u64);

        expected.saturating_sub(elapsed)
    }

    /// Largest slice a throttled body should clear in one step.
    pub fn chunk_len(&self, ctx: &RequestContext) -> usize {
        match ceiling(self.limit.get(ctx)) {
            None => usize::MAX,
            Some(limit) => {
                let chunk = (limit / CHUNKS_PER_SECOND).max(1);
                usize::try_from(chunk).unwrap_or(MAX_CHUNK).min(MAX_CHUNK)
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Window> {
        // The window is two plain integers, always left consistent.
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
