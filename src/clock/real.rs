use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{Clock, TimerCallback, TimerHandle};

/// Wall-clock [`Clock`] backed by `tokio::time`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealClock;

struct RealTimerState {
    deadline: Mutex<Instant>,
    disposed: AtomicBool,
    notify: Notify,
}

/// Handle returned by [`RealClock::create_timer`].
struct RealTimerHandle {
    state: Arc<RealTimerState>,
}

impl TimerHandle for RealTimerHandle {
    fn change(&self, new_delay: Duration) {
        if self.state.disposed.load(Ordering::SeqCst) {
            return;
        }
        *self.state.deadline.lock().unwrap() = Instant::now() + new_delay;
        self.state.notify.notify_one();
    }

    fn dispose(&self) {
        self.state.disposed.store(true, Ordering::SeqCst);
        self.state.notify.notify_one();
    }
}

#[async_trait]
impl Clock for RealClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn create_timer(&self, delay: Duration, callback: TimerCallback) -> Arc<dyn TimerHandle> {
        let state = Arc::new(RealTimerState {
            deadline: Mutex::new(Instant::now() + delay),
            disposed: AtomicBool::new(false),
            notify: Notify::new(),
        });

        let task_state = state.clone();
        tokio::spawn(async move {
            let mut callback = Some(callback);
            loop {
                if task_state.disposed.load(Ordering::SeqCst) {
                    return;
                }
                let deadline = *task_state.deadline.lock().unwrap();
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {
                        if task_state.disposed.load(Ordering::SeqCst) {
                            return;
                        }
                        // `change` may have landed between the wake and this
                        // check; re-read the deadline before committing to fire.
                        if *task_state.deadline.lock().unwrap() > Instant::now() {
                            continue;
                        }
                        if let Some(cb) = callback.take() {
                            cb();
                        }
                        return;
                    }
                    _ = task_state.notify.notified() => {
                        continue;
                    }
                }
            }
        });

        Arc::new(RealTimerHandle { state })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[tokio::test]
    async fn fires_after_delay() {
        let clock = RealClock;
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        let _handle = clock.create_timer(
            Duration::from_millis(10),
            Box::new(move || fired2.store(true, Ordering::SeqCst)),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn dispose_prevents_fire() {
        let clock = RealClock;
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        let handle = clock.create_timer(
            Duration::from_millis(20),
            Box::new(move || fired2.store(true, Ordering::SeqCst)),
        );
        handle.dispose();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn change_reschedules() {
        let clock = RealClock;
        let count = Arc::new(AtomicU32::new(0));
        let count2 = count.clone();
        let handle = clock.create_timer(
            Duration::from_millis(10),
            Box::new(move || {
                count2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        handle.change(Duration::from_millis(60));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0, "should not have fired yet");
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sleep_resolves() {
        let clock = RealClock;
        let started = Instant::now();
        clock.sleep(Duration::from_millis(15)).await;
        assert!(started.elapsed() >= Duration::from_millis(15));
    }
}
