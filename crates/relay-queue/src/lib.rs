//! Durable work queue and event publishing on Redis.
//!
//! The queue is a Redis Stream consumed through a consumer group, which
//! gives at-least-once delivery with per-message leases. Delayed
//! redelivery (retry backoff) rides a sorted set that a background task
//! promotes back onto the stream once due. Terminal job events go out
//! over Pub/Sub.

pub mod error;
pub mod events;
pub mod payload;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use events::{EventPublisher, RedisEventPublisher};
pub use payload::EnqueueJob;
pub use queue::{LeasedMessage, QueueConfig, RedisWorkQueue, WorkQueue};
