//! The Cartographer
//!
//! Keeps the live map of currency pairs that the brain searches for cycles.

mod graph;

pub use graph::{CurrencyGraph, Edge, UpsertOutcome};
