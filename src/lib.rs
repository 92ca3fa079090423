pub mod config;
pub mod extract;
pub mod fetch;
pub mod humanize;
pub mod ledger;
pub mod media;
pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod stats;
pub mod transport;
