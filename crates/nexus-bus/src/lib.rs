//! nexus-bus: Broadcast task bus
//!
//! This crate provides channel-based publish/subscribe:
//! - Postgres LISTEN/NOTIFY bus with one listener connection per subscription
//! - In-process fan-out bus with the same delivery contract
//! - Payload size enforcement and channel name validation

pub mod channel;
pub mod memory;
pub mod postgres;
pub mod subscription;
pub mod traits;

pub use channel::{encode_payload, validate_channel, NOTIFY_PAYLOAD_CAP};
pub use memory::MemoryBus;
pub use postgres::PgBus;
pub use subscription::Subscription;
pub use traits::{publish_json, TaskBus};
