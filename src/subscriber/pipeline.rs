//! Subscriber Pipeline
//!
//! ```text
//! socket -> receive task -> decode -> mpsc -> graph task -> reports
//!                                              (detect on batch / tick)
//! ```
//!
//! The graph task is the only owner of the currency graph. The receive task
//! never blocks on detection; if the channel fills it waits, and the socket
//! buffer absorbs the rest (or drops it, which the protocol tolerates).

use eyre::Result;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::GraphEngine;
use crate::brain::{ArbitrageReport, DEFAULT_TOLERANCE};
use crate::cartographer::UpsertOutcome;
use crate::wire::{
    decode, encode_subscription, now_millis, CurrencyCode, DatagramTransport, Quote, TransportError,
    UdpTransport,
};

/// Settings for the subscriber role
#[derive(Debug, Clone)]
pub struct SubscriberSettings {
    pub listen_addr: SocketAddr,
    pub provider_addr: Option<SocketAddr>,
    pub staleness_threshold: Duration,
    pub detection_batch_size: usize,
    pub detection_interval: Duration,
    pub tolerance: f64,
    pub trade_currency: CurrencyCode,
    pub synthesize_inverse: bool,
    /// Quotes stamped further ahead of the local clock are refused.
    /// `None` accepts any timestamp.
    pub max_future_skew: Option<Duration>,
    /// `None` waits forever
    pub idle_timeout: Option<Duration>,
    pub resubscribe_interval: Duration,
    /// Decoded quotes buffered between the receive and graph tasks
    pub channel_capacity: usize,
}

impl Default for SubscriberSettings {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 50414)),
            provider_addr: None,
            staleness_threshold: Duration::from_millis(1_500),
            detection_batch_size: 8,
            detection_interval: Duration::from_millis(250),
            tolerance: DEFAULT_TOLERANCE,
            trade_currency: CurrencyCode::USD,
            synthesize_inverse: false,
            max_future_skew: Some(Duration::from_secs(5)),
            idle_timeout: Some(Duration::from_secs(60)),
            resubscribe_interval: Duration::from_secs(300),
            channel_capacity: 1024,
        }
    }
}

/// Statistics for the subscriber
#[derive(Debug, Default)]
pub struct SubscriberStats {
    pub datagrams_received: AtomicU64,
    pub quotes_decoded: AtomicU64,
    pub decode_errors: AtomicU64,
    pub updates_applied: AtomicU64,
    pub stale_quotes: AtomicU64,
    pub future_quotes: AtomicU64,
    pub detection_passes: AtomicU64,
    pub arbitrage_found: AtomicU64,
    pub subscriptions_sent: AtomicU64,
}

impl SubscriberStats {
    pub fn snapshot(&self) -> SubscriberStatsSnapshot {
        SubscriberStatsSnapshot {
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            quotes_decoded: self.quotes_decoded.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            updates_applied: self.updates_applied.load(Ordering::Relaxed),
            stale_quotes: self.stale_quotes.load(Ordering::Relaxed),
            future_quotes: self.future_quotes.load(Ordering::Relaxed),
            detection_passes: self.detection_passes.load(Ordering::Relaxed),
            arbitrage_found: self.arbitrage_found.load(Ordering::Relaxed),
            subscriptions_sent: self.subscriptions_sent.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SubscriberStatsSnapshot {
    pub datagrams_received: u64,
    pub quotes_decoded: u64,
    pub decode_errors: u64,
    pub updates_applied: u64,
    pub stale_quotes: u64,
    pub future_quotes: u64,
    pub detection_passes: u64,
    pub arbitrage_found: u64,
    pub subscriptions_sent: u64,
}

/// The quote subscriber
pub struct Subscriber<T = UdpTransport> {
    settings: SubscriberSettings,
    transport: T,
    stats: Arc<SubscriberStats>,
}

impl Subscriber<UdpTransport> {
    /// Bind the listening socket. Fails before anything is received.
    pub async fn bind(settings: SubscriberSettings) -> Result<Self, TransportError> {
        let transport = UdpTransport::bind(settings.listen_addr).await?;
        Ok(Self::new(settings, transport))
    }
}

impl<T: DatagramTransport + 'static> Subscriber<T> {
    pub fn new(settings: SubscriberSettings, transport: T) -> Self {
        Self {
            settings,
            transport,
            stats: Arc::new(SubscriberStats::default()),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.transport.local_addr()
    }

    pub fn stats(&self) -> Arc<SubscriberStats> {
        Arc::clone(&self.stats)
    }

    /// Receive, update and detect until the socket goes idle or `reports`
    /// is dropped. One report is sent per detection pass.
    pub async fn run(self, reports: mpsc::UnboundedSender<ArbitrageReport>) -> Result<()> {
        let Subscriber {
            settings,
            transport,
            stats,
        } = self;

        let local = transport.local_addr()?;
        info!("Listening for quotes on {}", local);

        let transport = Arc::new(transport);
        let (quote_tx, quote_rx) = mpsc::channel(settings.channel_capacity.max(1));

        let receiver = tokio::spawn(receive_loop(
            Arc::clone(&transport),
            quote_tx,
            settings.idle_timeout,
            Arc::clone(&stats),
        ));

        let resubscriber = settings.provider_addr.map(|provider| {
            tokio::spawn(subscription_loop(
                Arc::clone(&transport),
                provider,
                local,
                settings.resubscribe_interval,
                Arc::clone(&stats),
            ))
        });

        let engine = GraphEngine::new(&settings);
        graph_loop(engine, quote_rx, reports, settings.detection_interval, &stats).await;

        if let Some(handle) = resubscriber {
            handle.abort();
        }

        if receiver.is_finished() {
            receiver.await??;
        } else {
            // Reports consumer went away first
            receiver.abort();
        }

        info!("Subscriber on {} stopped", local);
        Ok(())
    }
}

async fn receive_loop<T: DatagramTransport>(
    transport: Arc<T>,
    quotes: mpsc::Sender<Quote>,
    idle_timeout: Option<Duration>,
    stats: Arc<SubscriberStats>,
) -> Result<(), TransportError> {
    loop {
        let received = match idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, transport.receive()).await {
                Ok(received) => received,
                Err(_) => {
                    info!("No quotes received for {:?}, shutting down", limit);
                    return Ok(());
                }
            },
            None => transport.receive().await,
        };

        let (sender, payload) = received?;
        stats.datagrams_received.fetch_add(1, Ordering::Relaxed);

        match decode(&payload) {
            Ok(quote) => {
                stats.quotes_decoded.fetch_add(1, Ordering::Relaxed);
                if quotes.send(quote).await.is_err() {
                    return Ok(());
                }
            }
            Err(e) => {
                stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Discarding datagram from {}: {} [{}]",
                    sender,
                    e,
                    hex::encode(&payload[..payload.len().min(32)])
                );
            }
        }
    }
}

async fn subscription_loop<T: DatagramTransport>(
    transport: Arc<T>,
    provider: SocketAddr,
    local: SocketAddr,
    every: Duration,
    stats: Arc<SubscriberStats>,
) {
    let request = match encode_subscription(local) {
        Ok(request) => request,
        Err(e) => {
            warn!("Cannot subscribe to {}: {}", provider, e);
            return;
        }
    };

    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        match transport.send(provider, &request).await {
            Ok(()) => {
                stats.subscriptions_sent.fetch_add(1, Ordering::Relaxed);
                debug!("Subscription request sent to {}", provider);
            }
            Err(e) => warn!("Subscription request failed: {}", e),
        }
    }
}

async fn graph_loop(
    mut engine: GraphEngine,
    mut quotes: mpsc::Receiver<Quote>,
    reports: mpsc::UnboundedSender<ArbitrageReport>,
    detection_interval: Duration,
    stats: &SubscriberStats,
) {
    let mut ticker = tokio::time::interval(detection_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            maybe_quote = quotes.recv() => {
                let Some(quote) = maybe_quote else { break };
                let counter = match engine.apply(&quote) {
                    UpsertOutcome::Inserted | UpsertOutcome::Updated => &stats.updates_applied,
                    UpsertOutcome::Stale => &stats.stale_quotes,
                    UpsertOutcome::Rejected => &stats.future_quotes,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                if !engine.batch_full() {
                    continue;
                }
            }
            _ = ticker.tick() => {
                if !engine.should_detect() {
                    continue;
                }
            }
        }

        if !publish_report(&mut engine, &reports, stats) {
            return;
        }
    }

    // Flush whatever arrived since the last pass
    if engine.pending() > 0 {
        publish_report(&mut engine, &reports, stats);
    }
}

fn publish_report(
    engine: &mut GraphEngine,
    reports: &mpsc::UnboundedSender<ArbitrageReport>,
    stats: &SubscriberStats,
) -> bool {
    let report = engine.detect(now_millis());
    stats.detection_passes.fetch_add(1, Ordering::Relaxed);
    if report.is_arbitrage() {
        stats.arbitrage_found.fetch_add(1, Ordering::Relaxed);
    }
    reports.send(report).is_ok()
}
