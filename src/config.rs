//! Configuration
//!
//! One flat configuration shared by the publisher and subscriber binaries.
//! Loaded from environment variables (and `.env`) or from a TOML file, then
//! projected into the per-role settings each component consumes.

use eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::brain::DEFAULT_TOLERANCE;
use crate::publisher::{PairRate, PublisherSettings};
use crate::subscriber::SubscriberSettings;
use crate::wire::CurrencyCode;

// ============================================
// QUOTE SOURCE
// ============================================

/// Where the publisher gets its rates from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuoteSourceKind {
    /// Random walk seeded from `quote_table`
    #[default]
    RandomWalk,

    /// Replay `quote_table` in order, forever
    Table,
}

impl FromStr for QuoteSourceKind {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "random" | "random_walk" | "randomwalk" => Ok(Self::RandomWalk),
            "table" | "replay" => Ok(Self::Table),
            other => Err(eyre!("unknown quote source {:?} (expected random_walk or table)", other)),
        }
    }
}

impl std::fmt::Display for QuoteSourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuoteSourceKind::RandomWalk => write!(f, "RANDOM_WALK"),
            QuoteSourceKind::Table => write!(f, "TABLE"),
        }
    }
}

// ============================================
// MAIN CONFIGURATION
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // ========== Subscriber ==========
    /// Address the subscriber binds to
    pub listen_addr: SocketAddr,

    /// Publisher to send subscription requests to (optional)
    pub provider_addr: Option<SocketAddr>,

    /// Edges older than this are ignored by detection
    pub staleness_threshold_ms: u64,

    /// Run detection after this many graph updates
    pub detection_batch_size: usize,

    /// ...or at least this often while updates are pending
    pub detection_interval_ms: u64,

    /// Floating point tolerance for relaxation and cycle significance
    pub tolerance: f64,

    /// Also insert `quote -> base` at `1/rate` for every quote
    pub synthesize_inverse: bool,

    /// Currency arbitrage cycles are reported from
    pub trade_currency: CurrencyCode,

    /// Amount walked around reported cycles
    pub trade_amount: f64,

    /// Refuse quotes stamped further ahead of the local clock (0 = no limit)
    pub max_future_skew_ms: u64,

    /// Shut down after this long without a datagram (0 = never)
    pub idle_timeout_secs: u64,

    /// How often to renew the subscription with `provider_addr`
    pub resubscribe_interval_secs: u64,

    /// Append detected opportunities here as JSON lines
    pub opportunity_log_path: Option<String>,

    // ========== Publisher ==========
    /// Address the publisher binds to (also receives subscription requests)
    pub publisher_addr: SocketAddr,

    /// Statically configured subscribers
    pub subscribers: Vec<SocketAddr>,

    pub publish_interval_ms: u64,

    /// Uniform random extra delay added to each interval
    pub publish_jitter_ms: u64,

    pub quote_source: QuoteSourceKind,

    /// Replay table, or starting rates for the random walk
    pub quote_table: Vec<PairRate>,

    /// Maximum relative change per random-walk step
    pub random_walk_step: f64,

    /// How long a dynamic subscription stays active
    pub subscription_lease_secs: u64,

    // ========== Simulated network ==========
    pub drop_rate: f64,
    pub duplicate_rate: f64,
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_list<T: FromStr>(key: &str) -> Option<Vec<T>> {
    env::var(key).ok().map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(|s| s.parse().ok())
            .collect()
    })
}

impl Config {
    /// Load configuration from environment variables and .env file
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Ok(Self {
            listen_addr: env_parse("LISTEN_ADDR", defaults.listen_addr),
            provider_addr: env::var("PROVIDER_ADDR").ok().and_then(|s| s.parse().ok()),
            staleness_threshold_ms: env_parse("STALENESS_THRESHOLD_MS", defaults.staleness_threshold_ms),
            detection_batch_size: env_parse("DETECTION_BATCH_SIZE", defaults.detection_batch_size),
            detection_interval_ms: env_parse("DETECTION_INTERVAL_MS", defaults.detection_interval_ms),
            tolerance: env_parse("TOLERANCE", defaults.tolerance),
            synthesize_inverse: env_parse("SYNTHESIZE_INVERSE", defaults.synthesize_inverse),
            trade_currency: env_parse("TRADE_CURRENCY", defaults.trade_currency),
            trade_amount: env_parse("TRADE_AMOUNT", defaults.trade_amount),
            max_future_skew_ms: env_parse("MAX_FUTURE_SKEW_MS", defaults.max_future_skew_ms),
            idle_timeout_secs: env_parse("IDLE_TIMEOUT_SECS", defaults.idle_timeout_secs),
            resubscribe_interval_secs: env_parse(
                "RESUBSCRIBE_INTERVAL_SECS",
                defaults.resubscribe_interval_secs,
            ),
            opportunity_log_path: env::var("OPPORTUNITY_LOG_PATH").ok(),

            publisher_addr: env_parse("PUBLISHER_ADDR", defaults.publisher_addr),
            subscribers: env_list("SUBSCRIBERS").unwrap_or(defaults.subscribers),
            publish_interval_ms: env_parse("PUBLISH_INTERVAL_MS", defaults.publish_interval_ms),
            publish_jitter_ms: env_parse("PUBLISH_JITTER_MS", defaults.publish_jitter_ms),
            quote_source: match env::var("QUOTE_SOURCE") {
                Ok(s) => s.parse()?,
                Err(_) => defaults.quote_source,
            },
            quote_table: env_list("QUOTE_TABLE").unwrap_or(defaults.quote_table),
            random_walk_step: env_parse("RANDOM_WALK_STEP", defaults.random_walk_step),
            subscription_lease_secs: env_parse(
                "SUBSCRIPTION_LEASE_SECS",
                defaults.subscription_lease_secs,
            ),

            drop_rate: env_parse("DROP_RATE", defaults.drop_rate),
            duplicate_rate: env_parse("DUPLICATE_RATE", defaults.duplicate_rate),
        })
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Default rate table: majors around realistic levels
    fn default_quote_table() -> Vec<PairRate> {
        [
            "USD/EUR=0.92",
            "EUR/USD=1.085",
            "EUR/GBP=0.86",
            "GBP/EUR=1.16",
            "GBP/USD=1.27",
            "USD/GBP=0.785",
            "USD/JPY=150.1",
            "JPY/USD=0.00666",
            "EUR/JPY=162.9",
            "USD/CHF=0.88",
            "CHF/EUR=1.045",
            "AUD/USD=0.66",
            "USD/CAD=1.36",
            "CAD/AUD=1.11",
        ]
        .iter()
        .filter_map(|entry| entry.parse().ok())
        .collect()
    }

    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_millis(self.staleness_threshold_ms)
    }

    pub fn max_future_skew(&self) -> Option<Duration> {
        (self.max_future_skew_ms > 0).then(|| Duration::from_millis(self.max_future_skew_ms))
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    /// Validate configuration before starting either role
    pub fn validate(&self) -> Result<()> {
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(eyre!("TOLERANCE must be a non-negative number (got {})", self.tolerance));
        }

        if self.detection_batch_size == 0 {
            return Err(eyre!("DETECTION_BATCH_SIZE must be at least 1"));
        }

        if self.detection_interval_ms == 0 {
            return Err(eyre!("DETECTION_INTERVAL_MS must be positive"));
        }

        if self.staleness_threshold_ms == 0 {
            return Err(eyre!("STALENESS_THRESHOLD_MS must be positive"));
        }

        if self.publish_interval_ms == 0 {
            return Err(eyre!("PUBLISH_INTERVAL_MS must be positive"));
        }

        if !(self.trade_amount.is_finite() && self.trade_amount > 0.0) {
            return Err(eyre!("TRADE_AMOUNT must be positive (got {})", self.trade_amount));
        }

        for (name, rate) in [("DROP_RATE", self.drop_rate), ("DUPLICATE_RATE", self.duplicate_rate)] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(eyre!("{} must be between 0 and 1 (got {})", name, rate));
            }
        }

        if !(self.random_walk_step.is_finite() && (0.0..1.0).contains(&self.random_walk_step)) {
            return Err(eyre!(
                "RANDOM_WALK_STEP must be in [0, 1) (got {})",
                self.random_walk_step
            ));
        }

        if self.quote_table.is_empty() {
            return Err(eyre!("QUOTE_TABLE must contain at least one pair"));
        }

        if let Some(bad) = self.quote_table.iter().find(|p| !(p.rate.is_finite() && p.rate > 0.0)) {
            return Err(eyre!("QUOTE_TABLE rate for {}/{} must be positive", bad.base, bad.quote));
        }

        Ok(())
    }

    pub fn subscriber_settings(&self) -> SubscriberSettings {
        SubscriberSettings {
            listen_addr: self.listen_addr,
            provider_addr: self.provider_addr,
            staleness_threshold: self.staleness_threshold(),
            detection_batch_size: self.detection_batch_size,
            detection_interval: Duration::from_millis(self.detection_interval_ms),
            tolerance: self.tolerance,
            trade_currency: self.trade_currency,
            synthesize_inverse: self.synthesize_inverse,
            max_future_skew: self.max_future_skew(),
            idle_timeout: self.idle_timeout(),
            resubscribe_interval: Duration::from_secs(self.resubscribe_interval_secs.max(1)),
            ..SubscriberSettings::default()
        }
    }

    pub fn publisher_settings(&self) -> PublisherSettings {
        PublisherSettings {
            bind_addr: self.publisher_addr,
            subscribers: self.subscribers.clone(),
            interval: Duration::from_millis(self.publish_interval_ms),
            jitter: Duration::from_millis(self.publish_jitter_ms),
            subscription_lease: Duration::from_secs(self.subscription_lease_secs),
            drop_rate: self.drop_rate,
            duplicate_rate: self.duplicate_rate,
        }
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        let opt_addr = |a: Option<SocketAddr>| a.map(|a| a.to_string()).unwrap_or_else(|| "✗ Not Set".to_string());
        println!("╔════════════════════════════════════════════════════════════╗");
        println!("║              FX ARBITRAGE - CONFIGURATION                  ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ SUBSCRIBER                                                 ║");
        println!("║ • Listen:          {:^40} ║", self.listen_addr);
        println!("║ • Provider:        {:^40} ║", opt_addr(self.provider_addr));
        println!("║ • Staleness:       {:>37} ms ║", self.staleness_threshold_ms);
        println!("║ • Batch / Interval:{:>29} / {:>5} ms ║", self.detection_batch_size, self.detection_interval_ms);
        println!("║ • Tolerance:       {:^40e} ║", self.tolerance);
        println!("║ • Trade:           {:^40} ║", format!("{} {}", self.trade_currency, self.trade_amount));
        println!("║ • Inverse Edges:   {:^40} ║", if self.synthesize_inverse { "✓ Enabled" } else { "✗ Disabled" });
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ PUBLISHER                                                  ║");
        println!("║ • Bind:            {:^40} ║", self.publisher_addr);
        println!("║ • Subscribers:     {:^40} ║", self.subscribers.len());
        println!("║ • Interval:        {:>37} ms ║", self.publish_interval_ms);
        println!("║ • Source:          {:^40} ║", self.quote_source);
        println!("║ • Pairs:           {:^40} ║", self.quote_table.len());
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ SIMULATED NETWORK                                          ║");
        println!("║ • Drop Rate:       {:>38.1}% ║", self.drop_rate * 100.0);
        println!("║ • Duplicate Rate:  {:>38.1}% ║", self.duplicate_rate * 100.0);
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

impl Default for Config {
    fn default() -> Self {
        let subscriber = SubscriberSettings::default();
        Self {
            listen_addr: subscriber.listen_addr,
            provider_addr: None,
            staleness_threshold_ms: 1_500,
            detection_batch_size: 8,
            detection_interval_ms: 250,
            tolerance: DEFAULT_TOLERANCE,
            synthesize_inverse: false,
            trade_currency: subscriber.trade_currency,
            trade_amount: 100.0,
            max_future_skew_ms: 5_000,
            idle_timeout_secs: 60,
            resubscribe_interval_secs: 300,
            opportunity_log_path: None,
            publisher_addr: SocketAddr::from(([127, 0, 0, 1], 50403)),
            subscribers: vec![subscriber.listen_addr],
            publish_interval_ms: 100,
            publish_jitter_ms: 0,
            quote_source: QuoteSourceKind::RandomWalk,
            quote_table: Self::default_quote_table(),
            random_walk_step: 0.002,
            subscription_lease_secs: 600,
            drop_rate: 0.0,
            duplicate_rate: 0.0,
        }
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.quote_source, QuoteSourceKind::RandomWalk);
        assert_eq!(config.quote_table.len(), 14);
        assert_eq!(config.trade_currency.as_str(), "USD");
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.drop_rate = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.detection_batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.tolerance = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.quote_table.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = Config::default();
        config.quote_source = QuoteSourceKind::Table;
        config.provider_addr = Some("127.0.0.1:40000".parse().unwrap());
        config.opportunity_log_path = Some("./logs/opportunities.log".to_string());

        let path = std::env::temp_dir().join(format!("fxarb-config-{}.toml", std::process::id()));
        config.save_to_file(&path).unwrap();
        let loaded = Config::from_file(&path).unwrap();
        let _ = fs::remove_file(&path);

        assert_eq!(loaded.quote_source, QuoteSourceKind::Table);
        assert_eq!(loaded.provider_addr, config.provider_addr);
        assert_eq!(loaded.quote_table, config.quote_table);
        assert_eq!(loaded.trade_currency, config.trade_currency);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            quote_source = "table"
            staleness_threshold_ms = 5000
            quote_table = ["USD/EUR=0.9", "EUR/GBP=0.85", "GBP/USD=1.35"]
            "#,
        )
        .unwrap();

        assert_eq!(config.quote_source, QuoteSourceKind::Table);
        assert_eq!(config.staleness_threshold(), Duration::from_secs(5));
        assert_eq!(config.quote_table.len(), 3);
        assert_eq!(config.detection_batch_size, 8);
    }

    #[test]
    fn test_settings_projection() {
        let mut config = Config::default();
        config.idle_timeout_secs = 0;
        config.subscribers = vec!["127.0.0.1:7001".parse().unwrap(), "127.0.0.1:7002".parse().unwrap()];

        let sub = config.subscriber_settings();
        assert_eq!(sub.idle_timeout, None);
        assert_eq!(sub.max_future_skew, Some(Duration::from_secs(5)));

        config.max_future_skew_ms = 0;
        assert_eq!(config.subscriber_settings().max_future_skew, None);
        assert_eq!(sub.staleness_threshold, Duration::from_millis(1_500));

        let publisher = config.publisher_settings();
        assert_eq!(publisher.subscribers.len(), 2);
        assert_eq!(publisher.interval, Duration::from_millis(100));
    }

    #[test]
    fn test_quote_source_parsing() {
        assert_eq!("table".parse::<QuoteSourceKind>().unwrap(), QuoteSourceKind::Table);
        assert_eq!("Random".parse::<QuoteSourceKind>().unwrap(), QuoteSourceKind::RandomWalk);
        assert!("feed".parse::<QuoteSourceKind>().is_err());
    }
}
