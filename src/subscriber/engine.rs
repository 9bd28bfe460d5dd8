//! Graph Engine
//!
//! Owns the currency graph on the subscriber side. Quotes go in one at a
//! time; detection runs over a snapshot of the live edges.

use std::time::Duration;
use tracing::{debug, warn};

use super::SubscriberSettings;
use crate::brain::{ArbitrageReport, NegativeCycleDetector};
use crate::cartographer::{CurrencyGraph, UpsertOutcome};
use crate::wire::{now_millis, Millis, Quote};

pub struct GraphEngine {
    graph: CurrencyGraph,
    detector: NegativeCycleDetector,
    staleness_threshold: Duration,
    max_future_skew: Option<Duration>,
    batch_size: usize,
    pending: u64,
    last_found: bool,
}

impl GraphEngine {
    pub fn new(settings: &SubscriberSettings) -> Self {
        Self {
            graph: CurrencyGraph::new().with_inverse_edges(settings.synthesize_inverse),
            detector: NegativeCycleDetector::new(settings.tolerance)
                .with_preferred_start(settings.trade_currency),
            staleness_threshold: settings.staleness_threshold,
            max_future_skew: settings.max_future_skew,
            batch_size: settings.detection_batch_size.max(1),
            pending: 0,
            last_found: false,
        }
    }

    /// Apply one quote. Stale quotes leave the pending count alone.
    pub fn apply(&mut self, quote: &Quote) -> UpsertOutcome {
        self.apply_at(quote, now_millis())
    }

    /// Apply one quote as seen at `now`. A timestamp more than
    /// `max_future_skew` ahead of `now` would pin its pair until the clock
    /// caught up, so it is refused.
    pub fn apply_at(&mut self, quote: &Quote, now: Millis) -> UpsertOutcome {
        if let Some(skew) = self.max_future_skew {
            let limit = now.saturating_add(skew.as_millis() as u64);
            if quote.timestamp > limit {
                warn!(
                    "Refusing quote {} from {} ms in the future",
                    quote.cross(),
                    quote.timestamp - now
                );
                return UpsertOutcome::Rejected;
            }
        }

        let outcome = self.graph.apply_quote(quote);
        if outcome.changed() {
            self.pending += 1;
        }
        outcome
    }

    /// Graph changes since the last detection pass
    pub fn pending(&self) -> u64 {
        self.pending
    }

    pub fn batch_full(&self) -> bool {
        self.pending >= self.batch_size as u64
    }

    /// Something changed, or the last pass found a cycle that staleness may
    /// since have removed.
    pub fn should_detect(&self) -> bool {
        self.pending > 0 || self.last_found
    }

    pub fn detect(&mut self, now: Millis) -> ArbitrageReport {
        let edges = self.graph.live_edges(now, self.staleness_threshold);
        let vertices = self.graph.vertices(now, self.staleness_threshold).len();
        let detection = self.detector.detect(&edges);

        debug!(
            "Detection over {} live edges / {} currencies after {} updates: {}",
            edges.len(),
            vertices,
            self.pending,
            if detection.is_arbitrage() { "cycle" } else { "none" }
        );

        let report = ArbitrageReport {
            at: now,
            live_edges: edges.len(),
            vertices,
            updates: self.pending,
            detection,
        };

        self.pending = 0;
        self.last_found = report.is_arbitrage();
        report
    }

    pub fn graph(&self) -> &CurrencyGraph {
        &self.graph
    }
}
