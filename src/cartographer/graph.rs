//! Currency Graph
//!
//! One directed edge per ordered currency pair, weight `-ln(rate)`.
//! Edges are overwritten only by strictly newer timestamps, so datagrams
//! arriving out of order can never roll an edge back. Nothing is ever
//! deleted; stale edges are simply left out of `live_edges`.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, trace};

use crate::wire::{CurrencyCode, Millis, Quote};

/// Edge data in the currency graph
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub from: CurrencyCode,
    pub to: CurrencyCode,
    /// `-ln(rate)`
    pub weight: f64,
    pub rate: f64,
    pub last_updated: Millis,
}

impl Edge {
    pub fn is_live(&self, now: Millis, staleness_threshold: Duration) -> bool {
        now.saturating_sub(self.last_updated) as u128 <= staleness_threshold.as_millis()
    }
}

/// Result of an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Timestamp not newer than the stored edge; nothing changed
    Stale,
    /// Timestamp too far ahead of the local clock; never reached the graph
    Rejected,
}

impl UpsertOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, UpsertOutcome::Inserted | UpsertOutcome::Updated)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct EdgeState {
    weight: f64,
    rate: f64,
    last_updated: Millis,
}

/// The currency graph. Keyed by ordered pair; the ordered map fixes the
/// edge iteration order the detector relies on for its tie-break.
#[derive(Debug, Clone, Default)]
pub struct CurrencyGraph {
    edges: BTreeMap<(CurrencyCode, CurrencyCode), EdgeState>,
    synthesize_inverse: bool,
}

impl CurrencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also record `quote -> base` at `1/rate` for every applied quote
    pub fn with_inverse_edges(mut self, enabled: bool) -> Self {
        self.synthesize_inverse = enabled;
        self
    }

    /// Insert or overwrite the edge iff `timestamp` is newer than what is stored
    pub fn upsert_edge(
        &mut self,
        from: CurrencyCode,
        to: CurrencyCode,
        weight: f64,
        rate: f64,
        timestamp: Millis,
    ) -> UpsertOutcome {
        let incoming = EdgeState {
            weight,
            rate,
            last_updated: timestamp,
        };

        match self.edges.get_mut(&(from, to)) {
            None => {
                self.edges.insert((from, to), incoming);
                trace!("new edge {}->{} @ {}", from, to, timestamp);
                UpsertOutcome::Inserted
            }
            Some(existing) if timestamp > existing.last_updated => {
                *existing = incoming;
                UpsertOutcome::Updated
            }
            Some(existing) => {
                debug!(
                    "Ignoring out of sequence quote {}->{}: {} <= {}",
                    from, to, timestamp, existing.last_updated
                );
                UpsertOutcome::Stale
            }
        }
    }

    /// Apply a decoded quote. The forward edge's outcome is returned.
    pub fn apply_quote(&mut self, quote: &Quote) -> UpsertOutcome {
        let outcome = self.upsert_edge(
            quote.base,
            quote.quote,
            quote.neg_log_rate(),
            quote.rate,
            quote.timestamp,
        );

        if self.synthesize_inverse {
            self.upsert_edge(
                quote.quote,
                quote.base,
                -quote.neg_log_rate(),
                1.0 / quote.rate,
                quote.timestamp,
            );
        }

        outcome
    }

    /// Edges no older than `staleness_threshold`, in ascending pair order
    pub fn live_edges(&self, now: Millis, staleness_threshold: Duration) -> Vec<Edge> {
        self.edges
            .iter()
            .map(|(&(from, to), state)| Edge {
                from,
                to,
                weight: state.weight,
                rate: state.rate,
                last_updated: state.last_updated,
            })
            .filter(|edge| edge.is_live(now, staleness_threshold))
            .collect()
    }

    /// Currencies touched by at least one live edge
    pub fn vertices(&self, now: Millis, staleness_threshold: Duration) -> BTreeSet<CurrencyCode> {
        self.live_edges(now, staleness_threshold)
            .into_iter()
            .flat_map(|edge| [edge.from, edge.to])
            .collect()
    }

    pub fn get_edge(&self, from: CurrencyCode, to: CurrencyCode) -> Option<Edge> {
        self.edges.get(&(from, to)).map(|state| Edge {
            from,
            to,
            weight: state.weight,
            rate: state.rate,
            last_updated: state.last_updated,
        })
    }

    /// Total edges ever seen, live or stale
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}
