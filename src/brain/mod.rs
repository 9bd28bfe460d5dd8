//! The Brain
//!
//! Responsible for:
//! - Finding negative cycles (arbitrage opportunities) using Bellman-Ford
//! - Describing what each detection pass found

mod bellman_ford;
mod report;

pub use bellman_ford::{
    ArbitrageCycle, Conversion, Detection, EdgeData, NegativeCycleDetector, DEFAULT_TOLERANCE,
};
pub use report::{millis_to_datetime, ArbitrageReport, OpportunityLog};
