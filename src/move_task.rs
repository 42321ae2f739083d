//! Move-task engine: background rate-limited transfer of messages from a
//! dead-letter queue back to a destination, with cancel and list — §4.3.
//!
//! Grounded on the teacher's `dlq/mod.rs` redrive-job shape (an owned
//! background task with an explicit cancel signal and status cell) and
//! `bus/channel/mod.rs` for how the bus spawns and tracks long-lived work
//! against its own clock rather than `tokio::time` directly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::bus::Bus;
use crate::error::{EmulatorError, Result};
use crate::model::message::system_attr;
use crate::queue_engine::ReceiveMessageRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveTaskStatus {
    Running,
    Cancelled,
    Completed,
}

impl MoveTaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MoveTaskStatus::Running => "RUNNING",
            MoveTaskStatus::Cancelled => "CANCELLED",
            MoveTaskStatus::Completed => "COMPLETED",
        }
    }
}

/// A single in-flight (or finished) move task. Owned by the bus's
/// `move_tasks` table, keyed by `handle`.
pub struct MoveTask {
    pub handle: String,
    pub source_arn: String,
    pub destination_arn: Option<String>,
    pub max_messages_per_second: f64,
    pub to_move: u64,
    moved: AtomicU64,
    status: Mutex<MoveTaskStatus>,
    cancellation: CancellationToken,
    job: Mutex<Option<JoinHandle<()>>>,
}

impl MoveTask {
    pub fn status(&self) -> MoveTaskStatus {
        *self.status.lock().unwrap()
    }

    pub fn moved(&self) -> u64 {
        self.moved.load(Ordering::SeqCst)
    }

    /// Flip to `Cancelled` and abort the background job. Idempotent: calling
    /// this on an already-finished task leaves its status untouched.
    fn cancel(&self) {
        let mut status = self.status.lock().unwrap();
        if *status == MoveTaskStatus::Running {
            *status = MoveTaskStatus::Cancelled;
        }
        drop(status);
        self.cancellation.cancel();
        if let Some(job) = self.job.lock().unwrap().take() {
            job.abort();
        }
    }

    fn finish_if_running(&self) {
        let mut status = self.status.lock().unwrap();
        if *status == MoveTaskStatus::Running {
            *status = MoveTaskStatus::Completed;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StartMessageMoveTaskRequest {
    pub source_arn: String,
    pub destination_arn: Option<String>,
    pub max_messages_per_second: f64,
}

#[derive(Debug, Clone)]
pub struct StartMessageMoveTaskResponse {
    pub handle: String,
}

#[derive(Debug, Clone)]
pub struct MoveTaskSummary {
    pub handle: String,
    pub source_arn: String,
    pub destination_arn: Option<String>,
    pub status: &'static str,
    pub approximate_number_of_messages_moved: u64,
    pub approximate_number_of_messages_to_move: u64,
}

impl Bus {
    /// Start a background job draining `req.source_arn` into its resolved
    /// destination. Takes `self` by `Arc` (rather than `&self`) because the
    /// spawned job outlives this call and needs its own owned handle to the
    /// bus — callers already hold the bus behind an `Arc` and pass a clone
    /// of it in.
    #[instrument(skip(self, req), fields(source = %req.source_arn))]
    pub async fn start_message_move_task(
        self: Arc<Self>,
        req: StartMessageMoveTaskRequest,
    ) -> Result<StartMessageMoveTaskResponse> {
        if req.max_messages_per_second <= 0.0 {
            return Err(EmulatorError::InvalidParameter(
                "max_messages_per_second must be positive".into(),
            ));
        }

        let source = self.queue_by_arn(&req.source_arn)?;

        let is_dlq_of_some_queue = self.queues.iter().any(|q| {
            q.redrive_config()
                .map(|cfg| cfg.dead_letter_queue_name == source.name)
                .unwrap_or(false)
        });
        if !is_dlq_of_some_queue {
            return Err(EmulatorError::InvalidSource(req.source_arn.clone()));
        }

        let already_running = self
            .move_tasks
            .iter()
            .any(|t| t.source_arn == source.arn && t.status() == MoveTaskStatus::Running);
        if already_running {
            return Err(EmulatorError::UnsupportedOperation(format!(
                "a move task is already running for source {}",
                req.source_arn
            )));
        }

        if let Some(dest_arn) = &req.destination_arn {
            self.queue_by_arn(dest_arn)
                .map_err(|_| EmulatorError::DestinationNotFound(dest_arn.clone()))?;
        }

        let to_move = source.approximate_number_of_messages().await as u64;
        let handle = uuid::Uuid::new_v4().to_string();

        let task = Arc::new(MoveTask {
            handle: handle.clone(),
            source_arn: source.arn.clone(),
            destination_arn: req.destination_arn.clone(),
            max_messages_per_second: req.max_messages_per_second,
            to_move,
            moved: AtomicU64::new(0),
            status: Mutex::new(MoveTaskStatus::Running),
            cancellation: CancellationToken::new(),
            job: Mutex::new(None),
        });
        self.move_tasks.insert(handle.clone(), task.clone());

        let bus = self.clone();
        let job_task = task.clone();
        let job = tokio::spawn(async move {
            bus.run_move_task(job_task).await;
        });
        *task.job.lock().unwrap() = Some(job);

        Ok(StartMessageMoveTaskResponse { handle })
    }

    /// The background job body: repeatedly receive-one from the source,
    /// deliver to the resolved destination, delete from source, rate-limit
    /// sleep. Runs until the source drains (`Completed`) or the task is
    /// cancelled — never propagates an error outward, per the "background
    /// callbacks must never crash the bus" rule.
    async fn run_move_task(self: Arc<Self>, task: Arc<MoveTask>) {
        let period = Duration::from_secs_f64(1.0 / task.max_messages_per_second);
        let Ok(source) = self.queue_by_arn(&task.source_arn) else {
            task.finish_if_running();
            return;
        };

        loop {
            if task.cancellation.is_cancelled() {
                return;
            }

            let received = self
                .receive_message(ReceiveMessageRequest {
                    queue_url: source.url.clone(),
                    max_messages: 1,
                    wait_time_seconds: 0,
                    visibility_timeout: None,
                    system_attribute_names: vec!["All".to_string()],
                    cancellation: task.cancellation.clone(),
                })
                .await;

            let message = match received {
                Ok(resp) if !resp.messages.is_empty() => resp.messages.into_iter().next().unwrap(),
                Ok(_) => {
                    task.finish_if_running();
                    return;
                }
                Err(_) => return,
            };

            let dest_arn = task.destination_arn.clone().or_else(|| {
                message
                    .system_attributes
                    .get(system_attr::DEAD_LETTER_QUEUE_SOURCE_ARN)
                    .cloned()
            });
            let dest = dest_arn.as_deref().and_then(|arn| self.queue_by_arn(arn).ok());

            let Some(dest) = dest else {
                warn!(
                    message_id = %message.id,
                    "move task could not resolve a destination for this message, dropping"
                );
                let _ = self
                    .delete_message(&source.url, message.receipt_handle.as_deref().unwrap_or_default())
                    .await;
                continue;
            };

            self.deliver_internal(&dest, message.clone()).await;
            let _ = self
                .delete_message(&source.url, message.receipt_handle.as_deref().unwrap_or_default())
                .await;
            task.moved.fetch_add(1, Ordering::SeqCst);

            tokio::select! {
                _ = self.clock.sleep(period) => {}
                _ = task.cancellation.cancelled() => return,
            }
        }
    }

    pub fn cancel_message_move_task(&self, handle: &str) -> Result<()> {
        let task = self
            .move_tasks
            .get(handle)
            .ok_or_else(|| EmulatorError::InvalidParameter(format!("no move task with handle {handle}")))?;
        task.cancel();
        Ok(())
    }

    pub fn list_message_move_tasks(&self, source_arn: &str) -> Vec<MoveTaskSummary> {
        self.move_tasks
            .iter()
            .filter(|t| t.source_arn == source_arn)
            .map(|t| MoveTaskSummary {
                handle: t.handle.clone(),
                source_arn: t.source_arn.clone(),
                destination_arn: t.destination_arn.clone(),
                status: t.status().as_str(),
                approximate_number_of_messages_moved: t.moved(),
                approximate_number_of_messages_to_move: t.to_move,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use crate::config::BusConfig;
    use crate::queue_engine::{CreateQueueRequest, SendMessageRequest};
    use std::collections::HashMap;
    use std::time::Duration as StdDuration;

    fn bus() -> (Arc<Bus>, Arc<VirtualClock>) {
        let clock = Arc::new(VirtualClock::at_epoch());
        (Bus::with_clock(BusConfig::default(), clock.clone()), clock)
    }

    #[tokio::test]
    async fn rejects_source_that_is_not_a_dlq() {
        let (bus, _vclock) = bus();
        let url = bus
            .create_queue(CreateQueueRequest {
                name: "q".to_string(),
                ..Default::default()
            })
            .await
            .unwrap()
            .queue_url;
        let arn = bus.resolve_queue(&url).unwrap().arn.clone();
        let err = bus
            .clone()
            .start_message_move_task(StartMessageMoveTaskRequest {
                source_arn: arn,
                destination_arn: None,
                max_messages_per_second: 10.0,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidSource");
    }

    #[tokio::test]
    async fn rejects_second_running_task_for_same_source() {
        let (bus, _vclock) = bus();
        let dlq_url = bus
            .create_queue(CreateQueueRequest {
                name: "dlq".to_string(),
                ..Default::default()
            })
            .await
            .unwrap()
            .queue_url;
        let dlq_arn = bus.resolve_queue(&dlq_url).unwrap().arn.clone();

        let mut attrs = HashMap::new();
        attrs.insert(
            "RedrivePolicy".to_string(),
            serde_json::json!({"deadLetterTargetArn": dlq_arn, "maxReceiveCount": 1}).to_string(),
        );
        bus.create_queue(CreateQueueRequest {
            name: "main".to_string(),
            attributes: attrs,
            tags: HashMap::new(),
        })
        .await
        .unwrap();

        let dest_url = bus
            .create_queue(CreateQueueRequest {
                name: "dest".to_string(),
                ..Default::default()
            })
            .await
            .unwrap()
            .queue_url;
        let dest_arn = bus.resolve_queue(&dest_url).unwrap().arn.clone();

        bus.clone()
            .start_message_move_task(StartMessageMoveTaskRequest {
                source_arn: dlq_arn.clone(),
                destination_arn: Some(dest_arn.clone()),
                max_messages_per_second: 1000.0,
            })
        .await
        .unwrap();

        let err = bus
            .clone()
            .start_message_move_task(StartMessageMoveTaskRequest {
                source_arn: dlq_arn,
                destination_arn: Some(dest_arn),
                max_messages_per_second: 1000.0,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "UnsupportedOperation");
    }

    #[tokio::test]
    async fn rejects_unknown_destination() {
        let (bus, _vclock) = bus();
        let dlq_url = bus
            .create_queue(CreateQueueRequest {
                name: "dlq".to_string(),
                ..Default::default()
            })
            .await
            .unwrap()
            .queue_url;
        let dlq_arn = bus.resolve_queue(&dlq_url).unwrap().arn.clone();

        let mut attrs = HashMap::new();
        attrs.insert(
            "RedrivePolicy".to_string(),
            serde_json::json!({"deadLetterTargetArn": dlq_arn, "maxReceiveCount": 1}).to_string(),
        );
        bus.create_queue(CreateQueueRequest {
            name: "main".to_string(),
            attributes: attrs,
            tags: HashMap::new(),
        })
        .await
        .unwrap();

        let err = bus
            .clone()
            .start_message_move_task(StartMessageMoveTaskRequest {
                source_arn: dlq_arn,
                destination_arn: Some("arn:aws:sqs:us-east-1:1:nope".to_string()),
                max_messages_per_second: 10.0,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "DestinationNotFound");
    }

    #[tokio::test]
    async fn moves_messages_to_destination_and_completes() {
        let (bus, vclock) = bus();
        let dlq_url = bus
            .create_queue(CreateQueueRequest {
                name: "dlq".to_string(),
                ..Default::default()
            })
            .await
            .unwrap()
            .queue_url;
        let dlq_arn = bus.resolve_queue(&dlq_url).unwrap().arn.clone();

        let mut attrs = HashMap::new();
        attrs.insert(
            "RedrivePolicy".to_string(),
            serde_json::json!({"deadLetterTargetArn": dlq_arn, "maxReceiveCount": 1}).to_string(),
        );
        bus.create_queue(CreateQueueRequest {
            name: "main".to_string(),
            attributes: attrs,
            tags: HashMap::new(),
        })
        .await
        .unwrap();

        let dest_url = bus
            .create_queue(CreateQueueRequest {
                name: "dest".to_string(),
                ..Default::default()
            })
            .await
            .unwrap()
            .queue_url;
        let dest_arn = bus.resolve_queue(&dest_url).unwrap().arn.clone();

        bus.send_message(SendMessageRequest {
            queue_url: dlq_url.clone(),
            body: "x".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

        let resp = bus
            .clone()
            .start_message_move_task(StartMessageMoveTaskRequest {
                source_arn: dlq_arn.clone(),
                destination_arn: Some(dest_arn),
                max_messages_per_second: 1000.0,
            })
            .await
            .unwrap();

        // Let the spawned task run; advancing the virtual clock also drives
        // tokio's own task scheduling forward across yield points.
        for _ in 0..50 {
            tokio::task::yield_now().await;
            vclock.advance(StdDuration::from_millis(5));
        }

        let summaries = bus.list_message_move_tasks(&dlq_arn);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].handle, resp.handle);
        assert_eq!(summaries[0].approximate_number_of_messages_moved, 1);
        assert_eq!(summaries[0].status, "COMPLETED");
    }

    #[tokio::test]
    async fn cancel_flips_status_and_stops_job() {
        let (bus, _vclock) = bus();
        let dlq_url = bus
            .create_queue(CreateQueueRequest {
                name: "dlq".to_string(),
                ..Default::default()
            })
            .await
            .unwrap()
            .queue_url;
        let dlq_arn = bus.resolve_queue(&dlq_url).unwrap().arn.clone();

        let mut attrs = HashMap::new();
        attrs.insert(
            "RedrivePolicy".to_string(),
            serde_json::json!({"deadLetterTargetArn": dlq_arn, "maxReceiveCount": 1}).to_string(),
        );
        bus.create_queue(CreateQueueRequest {
            name: "main".to_string(),
            attributes: attrs,
            tags: HashMap::new(),
        })
        .await
        .unwrap();

        let resp = bus
            .clone()
            .start_message_move_task(StartMessageMoveTaskRequest {
                source_arn: dlq_arn.clone(),
                destination_arn: None,
                max_messages_per_second: 1.0,
            })
            .await
            .unwrap();

        bus.cancel_message_move_task(&resp.handle).unwrap();
        let summaries = bus.list_message_move_tasks(&dlq_arn);
        assert_eq!(summaries[0].status, "CANCELLED");
    }
}
