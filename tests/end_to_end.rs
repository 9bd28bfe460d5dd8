//! Publisher and subscriber talking over real UDP sockets on 127.0.0.1

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use fxarb::brain::ArbitrageReport;
use fxarb::publisher::{PairRate, Publisher, PublisherSettings, TableSource};
use fxarb::subscriber::{Subscriber, SubscriberSettings, SubscriberStats};
use fxarb::wire::{encode, now_millis, DatagramTransport, Quote, UdpTransport};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn table(entries: &[&str]) -> TableSource {
    TableSource::new(entries.iter().map(|e| e.parse::<PairRate>().unwrap()).collect())
}

fn quote(base: &str, quote: &str, rate: f64, timestamp: u64) -> Quote {
    Quote::new(base.parse().unwrap(), quote.parse().unwrap(), rate, timestamp).unwrap()
}

struct Running {
    addr: SocketAddr,
    stats: Arc<SubscriberStats>,
    reports: mpsc::UnboundedReceiver<ArbitrageReport>,
    task: JoinHandle<eyre::Result<()>>,
}

async fn start_subscriber(settings: SubscriberSettings) -> Running {
    let subscriber = Subscriber::bind(settings).await.unwrap();
    let addr = subscriber.local_addr().unwrap();
    let stats = subscriber.stats();
    let (tx, reports) = mpsc::unbounded_channel();
    let task = tokio::spawn(subscriber.run(tx));
    Running {
        addr,
        stats,
        reports,
        task,
    }
}

fn subscriber_settings() -> SubscriberSettings {
    SubscriberSettings {
        listen_addr: loopback(),
        detection_batch_size: 3,
        detection_interval: Duration::from_millis(20),
        idle_timeout: Some(Duration::from_secs(2)),
        ..SubscriberSettings::default()
    }
}

fn publisher_settings(subscribers: Vec<SocketAddr>) -> PublisherSettings {
    PublisherSettings {
        bind_addr: loopback(),
        subscribers,
        interval: Duration::from_millis(10),
        ..PublisherSettings::default()
    }
}

/// Wait for the first report matching `pred`
async fn wait_for(
    reports: &mut mpsc::UnboundedReceiver<ArbitrageReport>,
    pred: impl Fn(&ArbitrageReport) -> bool,
) -> ArbitrageReport {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let report = reports.recv().await.expect("subscriber stopped early");
            if pred(&report) {
                return report;
            }
        }
    })
    .await
    .expect("no matching report within 5s")
}

#[tokio::test]
async fn test_three_currency_arbitrage_is_reported() {
    let mut sub = start_subscriber(subscriber_settings()).await;
    let publisher = Publisher::bind(
        publisher_settings(vec![sub.addr]),
        table(&["USD/EUR=0.9", "EUR/GBP=0.85", "GBP/USD=1.35"]),
    )
    .await
    .unwrap();
    let publisher = tokio::spawn(publisher.run());

    let report = wait_for(&mut sub.reports, |r| r.is_arbitrage()).await;
    publisher.abort();

    let cycle = report.cycle().unwrap();
    assert_eq!(cycle.format_path(), "USD → EUR → GBP → USD");
    assert_eq!(cycle.rates, vec![0.9, 0.85, 1.35]);
    assert!((cycle.expected_return - 1.03275).abs() < 1e-9);

    let walk = report.trade_walk(100.0).unwrap();
    assert!((walk[0].amount_after - 90.0).abs() < 1e-9);
    assert!((walk[1].amount_after - 76.5).abs() < 1e-9);
    assert!((walk[2].amount_after - 103.275).abs() < 1e-9);

    sub.task.abort();
}

#[tokio::test]
async fn test_unprofitable_loop_is_not_reported() {
    let mut sub = start_subscriber(subscriber_settings()).await;
    let publisher = Publisher::bind(
        publisher_settings(vec![sub.addr]),
        table(&["USD/EUR=0.9", "EUR/GBP=0.85", "GBP/USD=1.29"]),
    )
    .await
    .unwrap();
    let publisher = tokio::spawn(publisher.run());

    // Keep watching for a while after the graph is complete
    let full = wait_for(&mut sub.reports, |r| r.live_edges == 3).await;
    assert!(!full.is_arbitrage());
    tokio::time::sleep(Duration::from_millis(200)).await;
    publisher.abort();

    while let Ok(report) = sub.reports.try_recv() {
        assert!(!report.is_arbitrage(), "unexpected: {}", report.summary());
    }
    assert_eq!(sub.stats.snapshot().arbitrage_found, 0);

    sub.task.abort();
}

#[tokio::test]
async fn test_older_timestamp_is_ignored() {
    let settings = SubscriberSettings {
        idle_timeout: Some(Duration::from_millis(300)),
        ..subscriber_settings()
    };
    let mut sub = start_subscriber(settings).await;
    let sender = UdpTransport::bind(loopback()).await.unwrap();

    let now = now_millis();
    let frames = [
        quote("USD", "EUR", 0.9, now),
        // Reordered in flight: older and would kill the cycle
        quote("USD", "EUR", 0.5, now - 100),
        quote("EUR", "GBP", 0.85, now),
        quote("GBP", "USD", 1.35, now),
    ];
    for frame in &frames {
        sender.send(sub.addr, &encode(frame)).await.unwrap();
    }

    let report = wait_for(&mut sub.reports, |r| r.live_edges == 3).await;
    assert!(report.is_arbitrage());
    assert_eq!(report.cycle().unwrap().rates[0], 0.9);

    tokio_test::assert_ok!(sub.task.await.unwrap());
    let stats = sub.stats.snapshot();
    assert_eq!(stats.stale_quotes, 1);
    assert_eq!(stats.updates_applied, 3);
}

#[tokio::test]
async fn test_malformed_datagrams_do_not_stop_the_subscriber() {
    let mut sub = start_subscriber(subscriber_settings()).await;
    let sender = UdpTransport::bind(loopback()).await.unwrap();

    let mut bad_code = encode(&quote("USD", "EUR", 0.9, now_millis()));
    bad_code[0] = b'u';
    let mut bad_rate = encode(&quote("USD", "EUR", 0.9, now_millis()));
    bad_rate[6..14].copy_from_slice(&(-1.0f64).to_be_bytes());

    sender.send(sub.addr, b"hello").await.unwrap();
    sender.send(sub.addr, &[0u8; 23]).await.unwrap();
    sender.send(sub.addr, &bad_code).await.unwrap();
    sender.send(sub.addr, &bad_rate).await.unwrap();

    let now = now_millis();
    for q in [
        quote("USD", "EUR", 0.9, now),
        quote("EUR", "GBP", 0.85, now),
        quote("GBP", "USD", 1.35, now),
    ] {
        sender.send(sub.addr, &encode(&q)).await.unwrap();
    }

    let report = wait_for(&mut sub.reports, |r| r.is_arbitrage()).await;
    assert_eq!(report.cycle().unwrap().hop_count(), 3);

    let stats = sub.stats.snapshot();
    assert_eq!(stats.decode_errors, 4);
    assert_eq!(stats.quotes_decoded, 3);

    sub.task.abort();
}

#[tokio::test]
async fn test_subscription_handshake() {
    let publisher = Publisher::bind(
        publisher_settings(Vec::new()),
        table(&["USD/EUR=0.9", "EUR/GBP=0.85", "GBP/USD=1.35"]),
    )
    .await
    .unwrap();
    let provider = publisher.local_addr().unwrap();
    let publisher_stats = publisher.stats();
    let publisher = tokio::spawn(publisher.run());

    let settings = SubscriberSettings {
        provider_addr: Some(provider),
        ..subscriber_settings()
    };
    let mut sub = start_subscriber(settings).await;

    let report = wait_for(&mut sub.reports, |r| r.is_arbitrage()).await;
    assert_eq!(report.cycle().unwrap().start().as_str(), "USD");
    assert_eq!(publisher_stats.snapshot().subscriptions, 1);
    assert!(sub.stats.snapshot().subscriptions_sent >= 1);

    publisher.abort();
    sub.task.abort();
}
