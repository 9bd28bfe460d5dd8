//! Arbitrage Reports
//!
//! What one detection pass found, plus the JSON-lines opportunity log.

use chrono::{DateTime, TimeZone, Utc};
use eyre::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;

use super::{ArbitrageCycle, Conversion, Detection};
use crate::wire::Millis;

/// Result of a single detection pass
#[derive(Debug, Clone, PartialEq)]
pub struct ArbitrageReport {
    /// Wall clock used for the staleness cut-off
    pub at: Millis,
    pub live_edges: usize,
    pub vertices: usize,
    /// Quotes that changed the graph since the previous pass
    pub updates: u64,
    pub detection: Detection,
}

impl ArbitrageReport {
    pub fn is_arbitrage(&self) -> bool {
        self.detection.is_arbitrage()
    }

    pub fn cycle(&self) -> Option<&ArbitrageCycle> {
        self.detection.cycle()
    }

    /// Trade walk for `start_amount` of the cycle's first currency
    pub fn trade_walk(&self, start_amount: f64) -> Option<Vec<Conversion>> {
        self.cycle().map(|c| c.conversions(start_amount))
    }

    pub fn time(&self) -> DateTime<Utc> {
        millis_to_datetime(self.at)
    }

    pub fn summary(&self) -> String {
        match &self.detection {
            Detection::NoArbitrage => format!(
                "no arbitrage detected ({} live edges, {} currencies)",
                self.live_edges, self.vertices
            ),
            Detection::Arbitrage(cycle) => format!(
                "ARBITRAGE {} | return {:.6}x ({:+.4}%)",
                cycle.format_path(),
                cycle.expected_return,
                cycle.profit_percentage()
            ),
        }
    }
}

pub fn millis_to_datetime(ms: Millis) -> DateTime<Utc> {
    i64::try_from(ms)
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_default()
}

/// One detected opportunity, as written to the log file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpportunityLog {
    pub timestamp: DateTime<Utc>,
    pub path: Vec<String>,
    pub rates: Vec<f64>,
    pub start_amount: f64,
    pub end_amount: f64,
    pub profit_pct: f64,
    pub total_weight: f64,
    pub live_edges: usize,
}

impl OpportunityLog {
    /// `None` when the report carries no cycle
    pub fn from_report(report: &ArbitrageReport, start_amount: f64) -> Option<Self> {
        let cycle = report.cycle()?;
        let end_amount = cycle
            .conversions(start_amount)
            .last()
            .map(|c| c.amount_after)
            .unwrap_or(start_amount);

        Some(Self {
            timestamp: report.time(),
            path: cycle.path.iter().map(|c| c.to_string()).collect(),
            rates: cycle.rates.clone(),
            start_amount,
            end_amount,
            profit_pct: cycle.profit_percentage(),
            total_weight: cycle.total_weight,
            live_edges: report.live_edges,
        })
    }

    /// Append this log to a file
    pub fn append_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;

        let json = serde_json::to_string(self)?;
        writeln!(file, "{}", json)?;

        Ok(())
    }
}
