//! Publisher Loop
//!
//! Every tick: take a rate from the source, stamp it, encode it and fire it
//! at every subscriber. A failed send is logged and skipped; the next tick
//! supersedes it. Between ticks the same socket accepts subscription
//! requests.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::source::QuoteSource;
use crate::wire::subscription::effective_subscriber;
use crate::wire::{
    decode_subscription, encode, now_millis, DatagramTransport, LossyTransport, Millis, Quote,
    TransportError, UdpTransport,
};

/// Settings for the publisher role
#[derive(Debug, Clone)]
pub struct PublisherSettings {
    pub bind_addr: SocketAddr,
    pub subscribers: Vec<SocketAddr>,
    pub interval: Duration,
    pub jitter: Duration,
    pub subscription_lease: Duration,
    pub drop_rate: f64,
    pub duplicate_rate: f64,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 50403)),
            subscribers: Vec::new(),
            interval: Duration::from_millis(100),
            jitter: Duration::ZERO,
            subscription_lease: Duration::from_secs(600),
            drop_rate: 0.0,
            duplicate_rate: 0.0,
        }
    }
}

/// Static subscribers plus leased ones registered over the wire
#[derive(Debug, Clone)]
pub struct SubscriberSet {
    fixed: BTreeSet<SocketAddr>,
    leased: HashMap<SocketAddr, Instant>,
    lease: Duration,
}

impl SubscriberSet {
    pub fn new(fixed: impl IntoIterator<Item = SocketAddr>, lease: Duration) -> Self {
        Self {
            fixed: fixed.into_iter().collect(),
            leased: HashMap::new(),
            lease,
        }
    }

    /// Register or renew. Returns true for a new subscriber.
    pub fn subscribe(&mut self, addr: SocketAddr, now: Instant) -> bool {
        if self.fixed.contains(&addr) {
            return false;
        }
        self.leased.insert(addr, now + self.lease).is_none()
    }

    /// Current destinations, sorted. Expired leases are dropped.
    pub fn active(&mut self, now: Instant) -> Vec<SocketAddr> {
        self.leased.retain(|addr, expires| {
            let keep = *expires > now;
            if !keep {
                info!("Subscription from {} expired", addr);
            }
            keep
        });

        let mut all: BTreeSet<SocketAddr> = self.fixed.clone();
        all.extend(self.leased.keys().copied());
        all.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.fixed.len() + self.leased.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Statistics for the publisher
#[derive(Debug, Default)]
pub struct PublisherStats {
    pub quotes_published: AtomicU64,
    pub datagrams_sent: AtomicU64,
    pub send_failures: AtomicU64,
    pub subscriptions: AtomicU64,
    pub invalid_requests: AtomicU64,
}

impl PublisherStats {
    pub fn snapshot(&self) -> PublisherStatsSnapshot {
        PublisherStatsSnapshot {
            quotes_published: self.quotes_published.load(Ordering::Relaxed),
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            subscriptions: self.subscriptions.load(Ordering::Relaxed),
            invalid_requests: self.invalid_requests.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PublisherStatsSnapshot {
    pub quotes_published: u64,
    pub datagrams_sent: u64,
    pub send_failures: u64,
    pub subscriptions: u64,
    pub invalid_requests: u64,
}

/// The quote publisher
pub struct Publisher<T, S> {
    settings: PublisherSettings,
    transport: T,
    source: S,
    subscribers: SubscriberSet,
    stats: Arc<PublisherStats>,
    last_timestamp: Millis,
    rng: StdRng,
}

impl<S: QuoteSource> Publisher<LossyTransport<UdpTransport>, S> {
    /// Bind the publisher socket. Loss/duplication rates of zero make the
    /// lossy wrapper a pass-through.
    pub async fn bind(settings: PublisherSettings, source: S) -> Result<Self, TransportError> {
        let socket = UdpTransport::bind(settings.bind_addr).await?;
        let transport = LossyTransport::new(socket, settings.drop_rate, settings.duplicate_rate);
        Ok(Self::new(settings, transport, source))
    }
}

impl<T: DatagramTransport, S: QuoteSource> Publisher<T, S> {
    pub fn new(settings: PublisherSettings, transport: T, source: S) -> Self {
        let subscribers = SubscriberSet::new(settings.subscribers.iter().copied(), settings.subscription_lease);
        Self {
            settings,
            transport,
            source,
            subscribers,
            stats: Arc::new(PublisherStats::default()),
            last_timestamp: 0,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn stats(&self) -> Arc<PublisherStats> {
        Arc::clone(&self.stats)
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.transport.local_addr()
    }

    pub fn subscribers(&self) -> &SubscriberSet {
        &self.subscribers
    }

    /// Run forever
    pub async fn run(mut self) -> Result<(), TransportError> {
        info!(
            "Publishing on {} every {:?} to {} subscriber(s)",
            self.transport.local_addr()?,
            self.settings.interval,
            self.subscribers.len()
        );

        loop {
            let deadline = tokio::time::sleep(self.next_delay());
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    _ = &mut deadline => break,
                    request = self.transport.receive() => self.handle_request(request),
                }
            }

            self.publish_once().await;
        }
    }

    fn next_delay(&mut self) -> Duration {
        let jitter_ms = self.settings.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.settings.interval;
        }
        self.settings.interval + Duration::from_millis(self.rng.gen_range(0..=jitter_ms))
    }

    /// Strictly increasing per publisher, so two quotes for the same pair in
    /// the same millisecond still order correctly at the subscriber.
    fn next_timestamp(&mut self) -> Millis {
        let ts = now_millis().max(self.last_timestamp + 1);
        self.last_timestamp = ts;
        ts
    }

    /// Publish one quote to every subscriber. Returns the number of
    /// successful sends.
    pub async fn publish_once(&mut self) -> usize {
        let Some(raw) = self.source.next_quote() else {
            debug!("Quote source had nothing to publish");
            return 0;
        };

        let timestamp = self.next_timestamp();
        let quote = match Quote::new(raw.base, raw.quote, raw.rate, timestamp) {
            Ok(quote) => quote,
            Err(e) => {
                warn!("Skipping invalid quote {}: {}", raw, e);
                return 0;
            }
        };

        let frame = encode(&quote);
        let destinations = self.subscribers.active(Instant::now());
        self.stats.quotes_published.fetch_add(1, Ordering::Relaxed);
        debug!("Publishing {} to {} subscriber(s)", quote, destinations.len());

        let mut sent = 0;
        for dest in destinations {
            match self.transport.send(dest, &frame).await {
                Ok(()) => {
                    sent += 1;
                    self.stats.datagrams_sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.stats.send_failures.fetch_add(1, Ordering::Relaxed);
                    warn!("Transmission failure: {}", e);
                }
            }
        }
        sent
    }

    fn handle_request(&mut self, request: Result<(SocketAddr, Vec<u8>), TransportError>) {
        let (sender, payload) = match request {
            Ok(received) => received,
            Err(e) => {
                debug!("Publisher receive error: {}", e);
                return;
            }
        };

        match decode_subscription(&payload) {
            Ok(advertised) => {
                let addr = effective_subscriber(advertised, sender);
                if self.subscribers.subscribe(addr, Instant::now()) {
                    self.stats.subscriptions.fetch_add(1, Ordering::Relaxed);
                    info!("New subscriber {} (via {})", addr, sender);
                } else {
                    debug!("Renewed subscription for {}", addr);
                }
            }
            Err(e) => {
                self.stats.invalid_requests.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Ignoring request from {}: {} [{}]",
                    sender,
                    e,
                    hex::encode(&payload[..payload.len().min(32)])
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::{PairRate, TableSource};
    use crate::wire::{decode, encode_subscription};

    fn table() -> TableSource {
        TableSource::new(vec![
            "USD/EUR=0.9".parse::<PairRate>().unwrap(),
            "EUR/GBP=0.85".parse().unwrap(),
        ])
    }

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn test_subscriber_set_leases() {
        let fixed: SocketAddr = "127.0.0.1:7000".parse().unwrap();
        let dynamic: SocketAddr = "127.0.0.1:7001".parse().unwrap();
        let mut set = SubscriberSet::new([fixed], Duration::from_secs(10));
        let t0 = Instant::now();

        assert!(!set.subscribe(fixed, t0));
        assert!(set.subscribe(dynamic, t0));
        assert!(!set.subscribe(dynamic, t0));
        assert_eq!(set.active(t0 + Duration::from_secs(5)), vec![fixed, dynamic]);

        // Renewal pushes the expiry out
        set.subscribe(dynamic, t0 + Duration::from_secs(8));
        assert_eq!(set.active(t0 + Duration::from_secs(12)).len(), 2);
        assert_eq!(set.active(t0 + Duration::from_secs(19)), vec![fixed]);
    }

    #[tokio::test]
    async fn test_publish_once_reaches_all_subscribers() {
        let a = UdpTransport::bind(loopback()).await.unwrap();
        let b = UdpTransport::bind(loopback()).await.unwrap();
        let settings = PublisherSettings {
            bind_addr: loopback(),
            subscribers: vec![a.local_addr().unwrap(), b.local_addr().unwrap()],
            ..PublisherSettings::default()
        };

        let mut publisher = Publisher::bind(settings, table()).await.unwrap();
        assert_eq!(publisher.publish_once().await, 2);
        assert_eq!(publisher.publish_once().await, 2);

        for rx in [&a, &b] {
            let (_, first) = rx.receive().await.unwrap();
            let (_, second) = rx.receive().await.unwrap();
            let first = decode(&first).unwrap();
            let second = decode(&second).unwrap();
            assert_eq!(first.cross(), "USD/EUR");
            assert_eq!(second.cross(), "EUR/GBP");
            assert!(second.timestamp > first.timestamp);
        }

        let stats = publisher.stats().snapshot();
        assert_eq!(stats.quotes_published, 2);
        assert_eq!(stats.datagrams_sent, 4);
        assert_eq!(stats.send_failures, 0);
    }

    #[tokio::test]
    async fn test_subscription_request_adds_destination() {
        let settings = PublisherSettings {
            bind_addr: loopback(),
            ..PublisherSettings::default()
        };
        let publisher = Publisher::bind(settings, table()).await.unwrap();
        let publisher_addr = publisher.local_addr().unwrap();
        let stats = publisher.stats();
        let task = tokio::spawn(publisher.run());

        let subscriber = UdpTransport::bind(loopback()).await.unwrap();
        let request = encode_subscription(subscriber.local_addr().unwrap()).unwrap();
        subscriber.send(publisher_addr, &request).await.unwrap();
        subscriber.send(publisher_addr, b"garbage").await.unwrap();

        let (_, frame) = tokio::time::timeout(Duration::from_secs(5), subscriber.receive())
            .await
            .expect("no quote within 5s")
            .unwrap();
        assert!(decode(&frame).is_ok());

        tokio::time::sleep(Duration::from_millis(50)).await;
        task.abort();
        let stats = stats.snapshot();
        assert_eq!(stats.subscriptions, 1);
        assert_eq!(stats.invalid_requests, 1);
    }
}
