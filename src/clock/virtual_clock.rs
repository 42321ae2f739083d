use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Clock, TimerCallback, TimerHandle};

struct Entry {
    deadline: DateTime<Utc>,
    seq: u64,
    callback: Option<TimerCallback>,
    disposed: bool,
}

struct Inner {
    now: DateTime<Utc>,
    next_seq: u64,
    timers: Vec<Arc<Mutex<Entry>>>,
}

/// Deterministic [`Clock`] for tests. Time only moves when [`advance`] is
/// called; nothing fires on a background thread in between.
///
/// [`advance`]: VirtualClock::advance
pub struct VirtualClock {
    inner: Arc<Mutex<Inner>>,
}

impl VirtualClock {
    /// New virtual clock starting at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        VirtualClock {
            inner: Arc::new(Mutex::new(Inner {
                now: start,
                next_seq: 0,
                timers: Vec::new(),
            })),
        }
    }

    /// New virtual clock starting at the Unix epoch.
    pub fn at_epoch() -> Self {
        Self::new(
            DateTime::<Utc>::from_timestamp(0, 0).expect("zero is always a valid timestamp"),
        )
    }

    /// Move time forward by `dur`, firing every pending timer whose deadline
    /// falls at or before the new time, strictly in deadline order (ties
    /// broken by scheduling order). Each callback runs to completion — and
    /// may itself schedule further timers, which are considered in the same
    /// pass if their deadline is still within `dur` — before the next one
    /// starts. No timer ever fires out of order and none fire early.
    pub fn advance(&self, dur: Duration) {
        let target = {
            let inner = self.inner.lock().unwrap();
            inner.now + chrono_duration(dur)
        };

        loop {
            let next = {
                let inner = self.inner.lock().unwrap();
                let mut best: Option<(DateTime<Utc>, u64, Arc<Mutex<Entry>>)> = None;
                for entry_arc in &inner.timers {
                    let entry = entry_arc.lock().unwrap();
                    if entry.disposed || entry.callback.is_none() {
                        continue;
                    }
                    if entry.deadline > target {
                        continue;
                    }
                    let candidate = (entry.deadline, entry.seq);
                    let better = match &best {
                        Some((d, s, _)) => candidate < (*d, *s),
                        None => true,
                    };
                    if better {
                        best = Some((entry.deadline, entry.seq, entry_arc.clone()));
                    }
                }
                best
            };

            let Some((deadline, _, entry_arc)) = next else {
                break;
            };

            {
                let mut inner = self.inner.lock().unwrap();
                inner.now = deadline;
            }
            let callback = {
                let mut entry = entry_arc.lock().unwrap();
                entry.callback.take()
            };
            if let Some(callback) = callback {
                callback();
            }
        }

        let mut inner = self.inner.lock().unwrap();
        inner.now = target;
        inner.timers.retain(|e| {
            let entry = e.lock().unwrap();
            !entry.disposed && entry.callback.is_some()
        });
    }
}

fn chrono_duration(dur: Duration) -> chrono::Duration {
    chrono::Duration::from_std(dur).unwrap_or_else(|_| chrono::Duration::zero())
}

struct VirtualTimerHandle {
    entry: Arc<Mutex<Entry>>,
    inner: Arc<Mutex<Inner>>,
}

impl TimerHandle for VirtualTimerHandle {
    fn change(&self, new_delay: Duration) {
        let mut entry = self.entry.lock().unwrap();
        if entry.disposed || entry.callback.is_none() {
            return;
        }
        let now = self.inner.lock().unwrap().now;
        entry.deadline = now + chrono_duration(new_delay);
    }

    fn dispose(&self) {
        let mut entry = self.entry.lock().unwrap();
        entry.disposed = true;
        entry.callback = None;
    }
}

#[async_trait]
impl Clock for VirtualClock {
    fn now(&self) -> DateTime<Utc> {
        self.inner.lock().unwrap().now
    }

    fn create_timer(&self, delay: Duration, callback: TimerCallback) -> Arc<dyn TimerHandle> {
        let mut inner = self.inner.lock().unwrap();
        let deadline = inner.now + chrono_duration(delay);
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let entry = Arc::new(Mutex::new(Entry {
            deadline,
            seq,
            callback: Some(callback),
            disposed: false,
        }));
        inner.timers.push(entry.clone());
        let inner_arc = self.inner.clone();
        drop(inner);

        Arc::new(VirtualTimerHandle {
            entry,
            inner: inner_arc,
        })
    }
}
