//! Bounded queues connecting pipeline stages.

pub mod channel;

pub use channel::{SendError, StageReceiver, StageSender, bounded};
