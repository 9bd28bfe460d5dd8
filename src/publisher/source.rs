//! Quote Sources
//!
//! Pluggable producers of raw `(base, quote, rate)` triples. The publisher
//! stamps and encodes whatever these return.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::wire::{CurrencyCode, DecodeError};

/// An unstamped rate for one currency pair. Text form: `USD/EUR=0.92`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PairRate {
    pub base: CurrencyCode,
    pub quote: CurrencyCode,
    pub rate: f64,
}

impl PairRate {
    pub fn new(base: CurrencyCode, quote: CurrencyCode, rate: f64) -> Self {
        Self { base, quote, rate }
    }
}

impl FromStr for PairRate {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DecodeError::InvalidCurrencyCodeText(s.to_string());
        let (pair, rate) = s.split_once('=').ok_or_else(invalid)?;
        let (base, quote) = pair.split_once('/').ok_or_else(invalid)?;
        let rate: f64 = rate.trim().parse().map_err(|_| invalid())?;
        if !(rate.is_finite() && rate > 0.0) {
            return Err(DecodeError::InvalidRate(rate));
        }
        Ok(Self {
            base: base.trim().parse()?,
            quote: quote.trim().parse()?,
            rate,
        })
    }
}

impl TryFrom<String> for PairRate {
    type Error = DecodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PairRate> for String {
    fn from(pair: PairRate) -> Self {
        pair.to_string()
    }
}

impl fmt::Display for PairRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}={}", self.base, self.quote, self.rate)
    }
}

/// Anything that can feed the publisher
pub trait QuoteSource: Send {
    /// `None` means the source has nothing to offer this tick
    fn next_quote(&mut self) -> Option<PairRate>;
}

/// Replays a fixed table in order, wrapping around
#[derive(Debug, Clone)]
pub struct TableSource {
    table: Vec<PairRate>,
    cursor: usize,
}

impl TableSource {
    pub fn new(table: Vec<PairRate>) -> Self {
        Self { table, cursor: 0 }
    }
}

impl QuoteSource for TableSource {
    fn next_quote(&mut self) -> Option<PairRate> {
        if self.table.is_empty() {
            return None;
        }
        let next = self.table[self.cursor % self.table.len()];
        self.cursor = (self.cursor + 1) % self.table.len();
        Some(next)
    }
}

/// Random walk over a rate table. Each tick picks one pair and moves its rate
/// by a uniform relative step in `[-max_step, +max_step]`.
#[derive(Debug, Clone)]
pub struct RandomWalkSource {
    rates: Vec<PairRate>,
    max_step: f64,
    rng: StdRng,
}

impl RandomWalkSource {
    pub fn new(rates: Vec<PairRate>, max_step: f64) -> Self {
        Self::with_rng(rates, max_step, StdRng::from_entropy())
    }

    /// Reproducible walk
    pub fn seeded(rates: Vec<PairRate>, max_step: f64, seed: u64) -> Self {
        Self::with_rng(rates, max_step, StdRng::seed_from_u64(seed))
    }

    fn with_rng(rates: Vec<PairRate>, max_step: f64, rng: StdRng) -> Self {
        Self {
            rates,
            // Keeps every step strictly positive
            max_step: max_step.clamp(0.0, 0.5),
            rng,
        }
    }

    pub fn rates(&self) -> &[PairRate] {
        &self.rates
    }
}

impl QuoteSource for RandomWalkSource {
    fn next_quote(&mut self) -> Option<PairRate> {
        if self.rates.is_empty() {
            return None;
        }
        let idx = self.rng.gen_range(0..self.rates.len());
        let step = if self.max_step > 0.0 {
            self.rng.gen_range(-self.max_step..=self.max_step)
        } else {
            0.0
        };

        let pair = &mut self.rates[idx];
        let moved = pair.rate * (1.0 + step);
        if moved.is_finite() && moved > 0.0 {
            pair.rate = moved;
        }
        Some(*pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(s: &str) -> PairRate {
        s.parse().unwrap()
    }

    #[test]
    fn test_pair_rate_text_form() {
        let p = pair("USD/EUR=0.92");
        assert_eq!(p.base.as_str(), "USD");
        assert_eq!(p.quote.as_str(), "EUR");
        assert_eq!(p.rate, 0.92);
        assert_eq!(p.to_string(), "USD/EUR=0.92");

        assert!("USD/EUR".parse::<PairRate>().is_err());
        assert!("USDEUR=1".parse::<PairRate>().is_err());
        assert!("USD/EUR=-1".parse::<PairRate>().is_err());
        assert!("USD/eur=1".parse::<PairRate>().is_err());
    }

    #[test]
    fn test_table_source_cycles() {
        let mut source = TableSource::new(vec![pair("USD/EUR=0.9"), pair("EUR/GBP=0.85")]);
        let seen: Vec<_> = (0..5).filter_map(|_| source.next_quote()).map(|p| p.rate).collect();
        assert_eq!(seen, vec![0.9, 0.85, 0.9, 0.85, 0.9]);

        assert!(TableSource::new(vec![]).next_quote().is_none());
    }

    #[test]
    fn test_random_walk_stays_positive_and_bounded() {
        let start = vec![pair("USD/EUR=0.9"), pair("USD/JPY=150.0")];
        let mut source = RandomWalkSource::seeded(start.clone(), 0.01, 7);

        for _ in 0..1_000 {
            let before: Vec<f64> = source.rates().iter().map(|p| p.rate).collect();
            let next = source.next_quote().unwrap();
            assert!(next.rate > 0.0 && next.rate.is_finite());

            let idx = source.rates().iter().position(|p| p.base == next.base && p.quote == next.quote).unwrap();
            let ratio = next.rate / before[idx];
            assert!((0.99 - 1e-12..=1.01 + 1e-12).contains(&ratio));
        }
    }

    #[test]
    fn test_seeded_walks_are_reproducible() {
        let start = vec![pair("USD/EUR=0.9"), pair("EUR/GBP=0.85"), pair("GBP/USD=1.3")];
        let mut a = RandomWalkSource::seeded(start.clone(), 0.002, 42);
        let mut b = RandomWalkSource::seeded(start, 0.002, 42);
        for _ in 0..50 {
            assert_eq!(a.next_quote(), b.next_quote());
        }
    }
}
