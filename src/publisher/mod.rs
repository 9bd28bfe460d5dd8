//! The Publisher
//!
//! Sources rates, stamps them and sprays them at subscribers over UDP.

mod engine;
mod source;

pub use engine::{Publisher, PublisherSettings, PublisherStats, PublisherStatsSnapshot, SubscriberSet};
pub use source::{PairRate, QuoteSource, RandomWalkSource, TableSource};
