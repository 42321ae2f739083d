//! The emulator's neutral error taxonomy.
//!
//! Every public operation returns [`Result<T>`]. Wire-protocol adapters map
//! each [`EmulatorError`] variant to a service-specific exception name and
//! HTTP status; this crate only ever surfaces the neutral `Kind`.

/// Result type for all core operations.
pub type Result<T> = std::result::Result<T, EmulatorError>;

/// Neutral error taxonomy for the queue/topic emulator.
///
/// Adapter mapping (HTTP status in the front-end, not decided here):
/// `QueueNotFound` -> 400, `TopicNotFound`/`SubscriptionNotFound` -> 404,
/// `ReceiptHandleInvalid`/`InvalidParameter`/`PayloadTooLarge`/`BatchTooLong`/
/// `DependencyMissing`/`DestinationNotFound`/`InvalidSource`/
/// `UnsupportedOperation` -> 400, `Cancelled` -> 499, `Internal` -> 500.
#[derive(Debug, thiserror::Error)]
pub enum EmulatorError {
    /// Unknown queue url/name.
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    /// Unknown topic arn.
    #[error("topic not found: {0}")]
    TopicNotFound(String),

    /// Unknown subscription arn.
    #[error("subscription not found: {0}")]
    SubscriptionNotFound(String),

    /// Receipt handle is structurally invalid or does not refer to an
    /// in-flight message on the target queue.
    #[error("receipt handle invalid: {0}")]
    ReceiptHandleInvalid(String),

    /// Missing or invalid argument.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A single message (or its attribute set) exceeds 256 KiB.
    #[error("payload too large: {size} bytes exceeds {limit} byte limit")]
    PayloadTooLarge {
        /// Computed size of the offending message.
        size: usize,
        /// The limit that was exceeded.
        limit: usize,
    },

    /// A batch's summed message size exceeds 256 KiB.
    #[error("batch too long: {size} bytes exceeds {limit} byte limit")]
    BatchTooLong {
        /// Computed size of the batch.
        size: usize,
        /// The limit that was exceeded.
        limit: usize,
    },

    /// A redrive policy names a dead-letter queue that does not exist.
    #[error("dependency missing: dead-letter queue {0} does not exist")]
    DependencyMissing(String),

    /// A move task's destination arn names a queue that does not exist.
    #[error("destination not found: {0}")]
    DestinationNotFound(String),

    /// A move task's source queue is not the configured DLQ of any queue.
    #[error("invalid source: {0} is not a dead-letter queue of any queue")]
    InvalidSource(String),

    /// An operation conflicts with existing state (e.g. a second running
    /// move task for the same source, or a duplicate policy statement id).
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Operation was cancelled by the caller or by a wait timeout.
    #[error("operation cancelled")]
    Cancelled,

    /// Internal defect or unexpected state. Should never be returned for
    /// well-formed input; if it is, that's a bug in the engine.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EmulatorError {
    /// Short machine-readable tag for the error kind, useful for adapters
    /// that want to log or match without a `match` over every variant.
    pub fn kind(&self) -> &'static str {
        match self {
            EmulatorError::QueueNotFound(_) => "QueueNotFound",
            EmulatorError::TopicNotFound(_) => "TopicNotFound",
            EmulatorError::SubscriptionNotFound(_) => "SubscriptionNotFound",
            EmulatorError::ReceiptHandleInvalid(_) => "ReceiptHandleInvalid",
            EmulatorError::InvalidParameter(_) => "InvalidParameter",
            EmulatorError::PayloadTooLarge { .. } => "PayloadTooLarge",
            EmulatorError::BatchTooLong { .. } => "BatchTooLong",
            EmulatorError::DependencyMissing(_) => "DependencyMissing",
            EmulatorError::DestinationNotFound(_) => "DestinationNotFound",
            EmulatorError::InvalidSource(_) => "InvalidSource",
            EmulatorError::UnsupportedOperation(_) => "UnsupportedOperation",
            EmulatorError::Cancelled => "Cancelled",
            EmulatorError::Internal(_) => "Internal",
        }
    }
}
