//! The Subscriber
//!
//! Responsible for:
//! - Receiving and decoding quote datagrams
//! - Keeping the currency graph current
//! - Running detection and handing reports to the caller

mod engine;
mod pipeline;

pub use engine::GraphEngine;
pub use pipeline::{Subscriber, SubscriberSettings, SubscriberStats, SubscriberStatsSnapshot};
