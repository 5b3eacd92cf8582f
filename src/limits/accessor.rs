//! Live configuration accessors.
//!
//! Operators change limits at runtime, so guards never hold a plain value.
//! They hold a [`Limit`], a shared closure evaluated afresh for every
//! decision. The three accepted shapes are a fixed value, a `() -> T`
//! getter and a `(&RequestContext) -> T` getter.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::RequestContext;

type Source<T> = dyn Fn(&RequestContext) -> T + Send + Sync;

/// A re-readable source of a limit value.
///
/// For integer ceilings a value `<= 0` means unlimited.
pub struct Limit<T> {
    source: Arc<Source<T>>,
}

impl<T: 'static> Limit<T> {
    /// A limit that never changes.
    pub fn fixed(value: T) -> Self
    where
        T: Clone + Send + Sync,
    {
        Self::per_request(move |_| value.clone())
    }

    /// A limit read from `getter` on every decision.
    pub fn dynamic<F>(getter: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::per_request(move |_| getter())
    }

    /// A limit that depends on the request being processed.
    pub fn per_request<F>(getter: F) -> Self
    where
        F: Fn(&RequestContext) -> T + Send + Sync + 'static,
    {
        Self {
            source: Arc::new(getter),
        }
    }

    /// Read the current value.
    pub fn get(&self, ctx: &RequestContext) -> T {
        (self.source)(ctx)
    }
}

impl<T> Clone for Limit<T> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
        }
    }
}

impl<T> fmt::Debug for Limit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Limit").finish_non_exhaustive()
    }
}

impl From<i64> for Limit<i64> {
    fn from(value: i64) -> Self {
        Limit::fixed(value)
    }
}

impl From<Duration> for Limit<Duration> {
    fn from(value: Duration) -> Self {
        Limit::fixed(value)
    }
}

/// Interpret an integer ceiling, mapping `<= 0` to `None` (unlimited).
pub(crate) fn ceiling(value: i64) -> Option<u64> {
    u64::try_from(value).ok().filter(|v| *v > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    #[test]
    fn dynamic_limit_is_reread() {
        let value = Arc::new(AtomicI64::new(10));
        let v = value.clone();
        let limit = Limit::dynamic(move || v.load(Ordering::SeqCst));
        let ctx = RequestContext::default();

        assert_eq!(limit.get(&ctx), 10);
        value.store(3, Ordering::SeqCst);
        assert_eq!(limit.get(&ctx), 3);
    }

    #[test]
    fn per_request_limit_sees_context() {
        let limit = Limit::per_request(|ctx: &RequestContext| {
            if ctx.path().starts_with("/big") { 100 } else { 1 }
        });
        assert_eq!(limit.get(&RequestContext::default()), 1);
    }

    #[test]
    fn non_positive_ceiling_is_unlimited() {
        assert_eq!(ceiling(0), None);
        assert_eq!(ceiling(-5), None);
        assert_eq!(ceiling(7), Some(7));
    }
}
