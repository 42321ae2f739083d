//! Queue resource: metadata, attributes, and runtime state (ready pool,
//! FIFO group sub-queues, in-flight table, dedup tables).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use super::message::Message;
use crate::clock::TimerHandle;
use std::sync::Arc;

pub const DEFAULT_VISIBILITY_TIMEOUT_SECS: u64 = 30;
pub const MAX_PAYLOAD_BYTES: usize = 262_144;

/// A queue's resolved dead-letter redrive configuration.
#[derive(Debug, Clone)]
pub struct RedriveConfig {
    pub dead_letter_queue_name: String,
    pub max_receive_count: u32,
}

/// One entry in the in-flight table: the message as it was when received,
/// and the visibility timer that returns it to the ready pool on expiry.
pub struct InFlightEntry {
    pub message: Message,
    pub timer: Arc<dyn TimerHandle>,
}

/// An unbounded MPMC-ish ready pool. Writers never block; readers share one
/// underlying `mpsc::UnboundedReceiver` behind a mutex so more than one
/// concurrent `ReceiveMessage` caller can drain it, at the cost of briefly
/// serializing drains against each other.
pub struct ReadyPool {
    tx: mpsc::UnboundedSender<Message>,
    rx: AsyncMutex<mpsc::UnboundedReceiver<Message>>,
    len: AtomicI64,
    notify: tokio::sync::Notify,
}

impl ReadyPool {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        ReadyPool {
            tx,
            rx: AsyncMutex::new(rx),
            len: AtomicI64::new(0),
            notify: tokio::sync::Notify::new(),
        }
    }

    /// Enqueue a message. Never blocks.
    pub fn push(&self, message: Message) {
        self.len.fetch_add(1, Ordering::SeqCst);
        // The receiver side only ever drops with the queue itself, so the
        // channel is never actually closed while this pool is alive.
        let _ = self.tx.send(message);
        self.notify.notify_waiters();
    }

    /// Drain up to `max` ready messages without waiting.
    pub async fn try_drain(&self, max: usize) -> Vec<Message> {
        let mut rx = self.rx.lock().await;
        let mut out = Vec::with_capacity(max);
        while out.len() < max {
            match rx.try_recv() {
                Ok(msg) => {
                    self.len.fetch_sub(1, Ordering::SeqCst);
                    out.push(msg);
                }
                Err(_) => break,
            }
        }
        out
    }

    /// The push notification source for long-poll receive.
    ///
    /// Callers must use the `enable()`-then-recheck-then-`await` pattern
    /// `tokio::sync::Notify` documents (create the `Notified` future, call
    /// `.enable()`, re-check [`try_drain`](Self::try_drain), only then
    /// `.await` it) — creating the future after the emptiness check would
    /// race a concurrent `push` and miss the wakeup.
    pub fn notify(&self) -> &tokio::sync::Notify {
        &self.notify
    }

    /// Drain every ready message, discarding it (used by `PurgeQueue`).
    pub async fn drain_all(&self) {
        let mut rx = self.rx.lock().await;
        while rx.try_recv().is_ok() {
            self.len.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub fn approx_len(&self) -> usize {
        self.len.load(Ordering::SeqCst).max(0) as usize
    }
}

/// What a dedup-id maps to: the message it was first seen on, remembered so
/// a duplicate send can echo back the same id and digest without the
/// original still being reachable (it may already be in-flight, or even
/// deleted-but-within-window is not possible — deletion removes the entry —
/// but it may be invisible, which is enough to make "look it up live" unsafe).
#[derive(Debug, Clone)]
pub struct DedupEntry {
    pub message_id: String,
    pub md5_of_body: String,
}

/// A single FIFO group's ordered messages and (when the queue is a fair
/// queue) its own dedup scope. Mutated only while the group's lock, held by
/// the caller, is locked — see [`QueueResource::group`]. A plain `std::sync`
/// lock is enough here: every critical section is a handful of map/deque
/// operations with no `.await` inside it, including the ones reached from a
/// synchronous visibility-timer callback.
#[derive(Default)]
pub struct GroupQueue {
    pub messages: VecDeque<Message>,
    pub dedup: HashMap<String, DedupEntry>,
}

/// Standard or FIFO queue state.
pub struct QueueResource {
    pub name: String,
    pub region: String,
    pub account_id: String,
    pub url: String,
    pub arn: String,
    pub fifo: bool,
    pub fair_queue: bool,

    pub tags: DashMap<String, String>,
    pub attributes: DashMap<String, String>,

    visibility_timeout_secs: AtomicU64,
    redrive: RwLock<Option<RedriveConfig>>,

    pub ready: ReadyPool,
    pub groups: DashMap<String, Arc<Mutex<GroupQueue>>>,
    /// Group ids in first-seen order, used for fair round-robin receive
    /// iteration across groups. Entries are never removed once added, even
    /// if the group's sub-queue later drains to empty and is removed from
    /// `groups` — re-creating a group keeps its original position.
    pub group_order: RwLock<Vec<String>>,
    pub dedup_global: DashMap<String, DedupEntry>,
    pub in_flight: DashMap<String, InFlightEntry>,

    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl QueueResource {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        region: &str,
        account_id: &str,
        endpoint_url: Option<&str>,
        attributes: HashMap<String, String>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        let fifo = is_fifo_name(&name) || attributes.get("FifoQueue").map(|v| v == "true").unwrap_or(false);
        let fair_queue = is_fair_queue(&attributes);
        let visibility_timeout = derive_visibility_timeout(&attributes);
        let redrive = derive_redrive(&attributes);
        let arn = format!("arn:aws:sqs:{region}:{account_id}:{name}");
        let url = match endpoint_url {
            Some(base) => format!("{base}/{account_id}/{name}"),
            None => format!("https://sqs.{region}.amazonaws.com/{account_id}/{name}"),
        };

        let attr_map = DashMap::new();
        for (k, v) in attributes {
            attr_map.insert(k, v);
        }

        QueueResource {
            name,
            region: region.to_string(),
            account_id: account_id.to_string(),
            url,
            arn,
            fifo,
            fair_queue,
            tags: DashMap::new(),
            attributes: attr_map,
            visibility_timeout_secs: AtomicU64::new(visibility_timeout),
            redrive: RwLock::new(redrive),
            ready: ReadyPool::new(),
            groups: DashMap::new(),
            group_order: RwLock::new(Vec::new()),
            dedup_global: DashMap::new(),
            in_flight: DashMap::new(),
            created_at: now,
        }
    }

    pub fn visibility_timeout_secs(&self) -> u64 {
        self.visibility_timeout_secs.load(Ordering::SeqCst)
    }

    pub fn set_visibility_timeout_secs(&self, secs: u64) {
        self.visibility_timeout_secs.store(secs, Ordering::SeqCst);
    }

    pub fn redrive_config(&self) -> Option<RedriveConfig> {
        self.redrive.read().unwrap().clone()
    }

    pub fn set_redrive_config(&self, redrive: Option<RedriveConfig>) {
        *self.redrive.write().unwrap() = redrive;
    }

    /// Get-or-create a group's lock-protected queue, recording it in
    /// `group_order` the first time it's seen. Per the concurrency model,
    /// `group_order` entries are never removed; `groups` entries may be
    /// removed by the queue engine once a group's sub-queue drains empty,
    /// and are simply re-created (at the same `group_order` position) the
    /// next time a message lands in that group.
    pub fn group(&self, group_id: &str) -> Arc<Mutex<GroupQueue>> {
        let entry = self
            .groups
            .entry(group_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(GroupQueue::default())));
        if !self.group_order.read().unwrap().iter().any(|g| g == group_id) {
            self.group_order.write().unwrap().push(group_id.to_string());
        }
        entry.clone()
    }

    /// Group ids in first-seen order, for fair round-robin receive
    /// iteration. Includes groups whose sub-queue has since been removed
    /// from `groups` after draining empty — callers skip those via a
    /// `contains_key` check rather than relying on this list staying in
    /// sync.
    pub fn group_order(&self) -> Vec<String> {
        self.group_order.read().unwrap().clone()
    }

    /// Approximate ready-message count: ready pool plus every group's
    /// current length. Computed on demand, never stored.
    pub async fn approximate_number_of_messages(&self) -> usize {
        let mut total = self.ready.approx_len();
        for entry in self.groups.iter() {
            total += entry.value().lock().unwrap().messages.len();
        }
        total
    }

    pub fn approximate_number_of_messages_not_visible(&self) -> usize {
        self.in_flight.len()
    }
}

fn is_fifo_name(name: &str) -> bool {
    name.ends_with(".fifo")
}

fn is_fair_queue(attributes: &HashMap<String, String>) -> bool {
    attributes.get("DeduplicationScope").map(String::as_str) == Some("messageGroup")
        && attributes.get("FifoThroughputLimit").map(String::as_str) == Some("perMessageGroupId")
}

fn derive_visibility_timeout(attributes: &HashMap<String, String>) -> u64 {
    attributes
        .get("VisibilityTimeout")
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_VISIBILITY_TIMEOUT_SECS)
}

/// Parse a `RedrivePolicy` attribute's JSON value (`{"deadLetterTargetArn":
/// "...", "maxReceiveCount": N}`) into a resolved config naming the DLQ by
/// name rather than arn. Returns `None` when the attribute is absent or
/// unparseable (the caller — `queue_engine` — treats "present but
/// unparseable" as a validation error; this helper itself stays infallible
/// so the model layer never needs `crate::error`).
fn derive_redrive(attributes: &HashMap<String, String>) -> Option<RedriveConfig> {
    let raw = attributes.get("RedrivePolicy")?;
    let parsed: serde_json::Value = serde_json::from_str(raw).ok()?;
    let target_arn = parsed.get("deadLetterTargetArn")?.as_str()?;
    let max_receive_count = parsed.get("maxReceiveCount")?.as_u64()? as u32;
    let dead_letter_queue_name = target_arn.rsplit(':').next()?.to_string();
    Some(RedriveConfig {
        dead_letter_queue_name,
        max_receive_count,
    })
}
