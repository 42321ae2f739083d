//! In-process emulator of a queue service (QS, modeled on SQS) and a
//! topic/notification service (TS, modeled on SNS).
//!
//! This crate is the message engine only: queue and topic data models, the
//! send/receive/delete/visibility state machine, FIFO ordering and
//! deduplication, dead-letter redrive, message-move tasks, and topic-to-queue
//! fan-out. Wire-protocol adapters (XML/JSON over HTTP), CLI, and
//! process-wide configuration loading are collaborators that sit in front of
//! [`Bus`] — they are not part of this crate.
//!
//! Everything here takes time from [`clock::Clock`] rather than the system
//! clock, so callers can swap in [`clock::VirtualClock`] and drive the whole
//! engine deterministically in tests.

pub mod bus;
pub mod clock;
pub mod config;
pub mod error;
pub mod model;
pub mod move_task;
pub mod pagination;
pub mod publish;
pub mod queue_engine;
pub mod topic_engine;

pub use bus::Bus;
pub use config::BusConfig;
pub use error::{EmulatorError, Result};
