//! FX arbitrage over UDP
//!
//! A publisher streams timestamped exchange-rate quotes as fixed 22-byte
//! datagrams; each subscriber folds them into a currency graph and searches
//! it for negative cycles (Bellman-Ford over `-ln(rate)` weights).

pub mod brain;
pub mod cartographer;
pub mod config;
pub mod publisher;
pub mod subscriber;
pub mod wire;
