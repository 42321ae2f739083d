//! Clock abstraction for deterministic time.
//!
//! Every suspension point in the engine — long-poll receive, delayed send,
//! visibility timeouts, move-task rate limiting — goes through a [`Clock`]
//! rather than calling `tokio::time` or `Utc::now()` directly. Production
//! code uses [`RealClock`]; tests construct a [`VirtualClock`] and drive it
//! forward explicitly with [`VirtualClock::advance`].

mod real;
mod virtual_clock;

pub use real::RealClock;
pub use virtual_clock::VirtualClock;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

/// A one-shot unit of deferred work. Scheduled by [`Clock::create_timer`].
///
/// Neither `change` nor `dispose` block on the callback; they only affect
/// whether/when it will run. Calling either after the timer has already
/// fired is a no-op.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Handle to a scheduled timer.
///
/// Disposal is idempotent: disposing an already-fired or already-disposed
/// timer does nothing.
pub trait TimerHandle: Send + Sync {
    /// Reschedule the timer to fire `new_delay` from now, replacing whatever
    /// delay it was created or last changed with.
    fn change(&self, new_delay: Duration);

    /// Cancel the timer. Its callback will not run if it has not already.
    fn dispose(&self);
}

/// Source of time for the engine.
///
/// All three methods must route through whichever implementation a [`Bus`]
/// was constructed with — never call a process-wide time function from
/// engine code.
///
/// [`Bus`]: crate::bus::Bus
#[async_trait]
pub trait Clock: Send + Sync {
    /// The current point in time.
    fn now(&self) -> DateTime<Utc>;

    /// Schedule `callback` to run `delay` from now. The returned handle
    /// supports rescheduling and cancellation.
    fn create_timer(&self, delay: Duration, callback: TimerCallback) -> Arc<dyn TimerHandle>;

    /// Suspend until `delay` has elapsed.
    ///
    /// Built on [`create_timer`](Clock::create_timer) so both implementations
    /// share one definition: a real clock resolves it after a real
    /// `tokio::time` sleep, a virtual clock resolves it the next time
    /// [`VirtualClock::advance`] crosses the deadline.
    async fn sleep(&self, delay: Duration) {
        let (tx, rx) = oneshot::channel();
        let _handle = self.create_timer(
            delay,
            Box::new(move || {
                let _ = tx.send(());
            }),
        );
        let _ = rx.await;
    }
}
