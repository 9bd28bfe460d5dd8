//! Negative-Cycle Bellman-Ford
//!
//! Every vertex starts at distance 0, which is the same as hanging all of
//! them off a virtual zero-weight source. One run therefore finds a negative
//! cycle anywhere in the graph, including disconnected components.
//!
//! Relaxation uses a plain `<`. The tolerance is applied only to the summed
//! weight of an extracted cycle, so rate-neutral loops are dropped there.
//!
//! Tie-break: the reported cycle comes from the first edge, in snapshot
//! order, that is still improvable after `n - 1` passes. Snapshot order is
//! the ascending `(from, to)` order of the live edges, so the result is
//! deterministic for a given graph.

use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

use crate::cartographer::Edge;
use crate::wire::CurrencyCode;

/// Floating point comparison tolerance
pub const DEFAULT_TOLERANCE: f64 = 1e-6;

/// Edge payload in the detection snapshot
#[derive(Debug, Clone, Copy)]
pub struct EdgeData {
    pub weight: f64,
    pub rate: f64,
}

/// Represents an arbitrage cycle (negative cycle in the graph)
#[derive(Debug, Clone, PartialEq)]
pub struct ArbitrageCycle {
    /// Closed path: first and last entries are the same currency
    pub path: Vec<CurrencyCode>,
    /// `rates[i]` converts `path[i]` into `path[i + 1]`
    pub rates: Vec<f64>,
    pub total_weight: f64,
    /// Product of the rates
    pub expected_return: f64,
}

/// One hop of a trade walk through a cycle
#[derive(Debug, Clone, PartialEq)]
pub struct Conversion {
    pub from: CurrencyCode,
    pub to: CurrencyCode,
    pub rate: f64,
    pub amount_after: f64,
}

impl ArbitrageCycle {
    fn from_hops(hops: Vec<(CurrencyCode, CurrencyCode, EdgeData)>) -> Option<Self> {
        let first = hops.first()?.0;
        let mut path = Vec::with_capacity(hops.len() + 1);
        path.push(first);
        let mut rates = Vec::with_capacity(hops.len());
        let mut total_weight = 0.0;

        for (_, to, data) in &hops {
            path.push(*to);
            rates.push(data.rate);
            total_weight += data.weight;
        }

        Some(Self {
            path,
            rates,
            total_weight,
            expected_return: (-total_weight).exp(),
        })
    }

    pub fn profit_percentage(&self) -> f64 {
        (self.expected_return - 1.0) * 100.0
    }

    pub fn hop_count(&self) -> usize {
        self.rates.len()
    }

    pub fn start(&self) -> CurrencyCode {
        self.path[0]
    }

    /// Well-formed: closed, at least two hops, no repeated intermediate
    /// currency, sane return.
    pub fn is_valid(&self) -> bool {
        if self.path.len() < 3 || self.path.len() != self.rates.len() + 1 {
            return false;
        }

        if self.path.first() != self.path.last() {
            return false;
        }

        let open = &self.path[..self.path.len() - 1];
        let unique: HashSet<_> = open.iter().collect();
        if unique.len() != open.len() {
            debug!("Cycle has duplicate nodes - invalid");
            return false;
        }

        self.expected_return.is_finite() && self.expected_return > 0.0
    }

    /// Same cycle, starting from `currency`. Unchanged if it isn't on the cycle.
    pub fn rotated_to(&self, currency: CurrencyCode) -> Self {
        let open = &self.path[..self.path.len() - 1];
        let Some(offset) = open.iter().position(|c| *c == currency) else {
            return self.clone();
        };

        let mut path = open.to_vec();
        path.rotate_left(offset);
        path.push(currency);
        let mut rates = self.rates.clone();
        rates.rotate_left(offset);

        Self {
            path,
            rates,
            total_weight: self.total_weight,
            expected_return: self.expected_return,
        }
    }

    /// Walk `start_amount` of the starting currency around the cycle
    pub fn conversions(&self, start_amount: f64) -> Vec<Conversion> {
        let mut amount = start_amount;
        self.path
            .windows(2)
            .zip(&self.rates)
            .map(|(pair, &rate)| {
                amount *= rate;
                Conversion {
                    from: pair[0],
                    to: pair[1],
                    rate,
                    amount_after: amount,
                }
            })
            .collect()
    }

    pub fn format_path(&self) -> String {
        self.path
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(" → ")
    }
}

/// Outcome of one detection pass
#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
    NoArbitrage,
    Arbitrage(ArbitrageCycle),
}

impl Detection {
    pub fn cycle(&self) -> Option<&ArbitrageCycle> {
        match self {
            Detection::Arbitrage(cycle) => Some(cycle),
            Detection::NoArbitrage => None,
        }
    }

    pub fn is_arbitrage(&self) -> bool {
        matches!(self, Detection::Arbitrage(_))
    }
}

/// Directed snapshot of the live edges
struct Snapshot {
    graph: DiGraph<CurrencyCode, EdgeData>,
}

impl Snapshot {
    fn build(edges: &[Edge]) -> Self {
        let mut graph = DiGraph::with_capacity(edges.len(), edges.len());
        let mut nodes: HashMap<CurrencyCode, NodeIndex> = HashMap::new();

        for edge in edges {
            // Exchanging a currency for itself is not a conversion
            if edge.from == edge.to {
                continue;
            }
            let from = *nodes.entry(edge.from).or_insert_with(|| graph.add_node(edge.from));
            let to = *nodes.entry(edge.to).or_insert_with(|| graph.add_node(edge.to));
            graph.add_edge(
                from,
                to,
                EdgeData {
                    weight: edge.weight,
                    rate: edge.rate,
                },
            );
        }

        Self { graph }
    }
}

/// Bellman-Ford negative cycle detector
#[derive(Debug, Clone)]
pub struct NegativeCycleDetector {
    tolerance: f64,
    preferred_start: Option<CurrencyCode>,
}

impl Default for NegativeCycleDetector {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE)
    }
}

impl NegativeCycleDetector {
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance: tolerance.abs(),
            preferred_start: None,
        }
    }

    /// Rotate reported cycles to start here when the currency is on them
    pub fn with_preferred_start(mut self, currency: CurrencyCode) -> Self {
        self.preferred_start = Some(currency);
        self
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Search the given live edges for a negative cycle
    pub fn detect(&self, edges: &[Edge]) -> Detection {
        let snapshot = Snapshot::build(edges);
        let graph = &snapshot.graph;
        let n = graph.node_count();

        if n < 2 {
            return Detection::NoArbitrage;
        }

        let mut distance = vec![0.0f64; n];
        let mut predecessor: Vec<Option<EdgeIndex>> = vec![None; n];

        for pass in 0..n - 1 {
            let mut changed = false;
            for edge in graph.edge_references() {
                let (u, v) = (edge.source().index(), edge.target().index());
                let relaxed = distance[u] + edge.weight().weight;
                if relaxed < distance[v] {
                    distance[v] = relaxed;
                    predecessor[v] = Some(edge.id());
                    changed = true;
                }
            }
            if !changed {
                trace!("Bellman-Ford converged after {} passes", pass + 1);
                return Detection::NoArbitrage;
            }
        }

        for edge in graph.edge_references() {
            let (u, v) = (edge.source().index(), edge.target().index());
            if distance[u] + edge.weight().weight >= distance[v] {
                continue;
            }

            predecessor[v] = Some(edge.id());
            let Some(cycle) = self.extract_cycle(graph, &predecessor, edge.target()) else {
                continue;
            };

            if !cycle.is_valid() {
                debug!("Rejecting malformed cycle {}", cycle.format_path());
                continue;
            }

            if cycle.total_weight < -self.tolerance {
                debug!(
                    "Negative cycle {} (weight {:.6})",
                    cycle.format_path(),
                    cycle.total_weight
                );
                return Detection::Arbitrage(self.orient(cycle));
            }

            trace!(
                "Discarding rate-neutral cycle {} (weight {:.3e})",
                cycle.format_path(),
                cycle.total_weight
            );
        }

        Detection::NoArbitrage
    }

    /// Walk predecessors back `n` times to land inside the cycle, then
    /// collect it.
    fn extract_cycle(
        &self,
        graph: &DiGraph<CurrencyCode, EdgeData>,
        predecessor: &[Option<EdgeIndex>],
        from: NodeIndex,
    ) -> Option<ArbitrageCycle> {
        let n = graph.node_count();
        let source_of = |node: NodeIndex| -> Option<(NodeIndex, EdgeIndex)> {
            let edge = predecessor[node.index()]?;
            let (source, _) = graph.edge_endpoints(edge)?;
            Some((source, edge))
        };

        let mut anchor = from;
        for _ in 0..n {
            anchor = source_of(anchor)?.0;
        }

        let mut hops = Vec::new();
        let mut current = anchor;
        loop {
            let (source, edge) = source_of(current)?;
            hops.push((graph[source], graph[current], graph[edge]));
            current = source;
            if current == anchor {
                break;
            }
            if hops.len() > n {
                return None;
            }
        }
        hops.reverse();

        ArbitrageCycle::from_hops(hops)
    }

    fn orient(&self, cycle: ArbitrageCycle) -> ArbitrageCycle {
        let open = &cycle.path[..cycle.path.len() - 1];
        let start = self
            .preferred_start
            .filter(|c| open.contains(c))
            .or_else(|| open.iter().min().copied());

        match start {
            Some(start) => cycle.rotated_to(start),
            None => cycle,
        }
    }
}
