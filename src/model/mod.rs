//! Value types shared by the queue engine, move-task engine, and topic
//! publish engine.

pub mod message;
pub mod presence;
pub mod queue;
pub mod receipt;
pub mod subscription;
pub mod topic;

pub use message::{Message, MessageAttributeValue};
pub use presence::Presence;
pub use queue::QueueResource;
pub use subscription::Subscription;
pub use topic::TopicResource;
