//! FX Quote Publisher
//!
//! Run with: cargo run --bin publisher -- --subscriber 127.0.0.1:50414
//!
//! Streams quotes from a random walk (or a fixed replay table) to every
//! configured subscriber, and accepts subscription requests on its own
//! socket.

use clap::Parser;
use color_eyre::eyre::Result;
use console::style;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fxarb::config::{Config, QuoteSourceKind};
use fxarb::publisher::{Publisher, PublisherSettings, QuoteSource, RandomWalkSource, TableSource};

#[derive(Parser)]
#[command(author, version, about = "Publish FX quotes over UDP", long_about = None)]
struct Cli {
    /// TOML config file (defaults to environment / .env)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to publish from (and accept subscriptions on)
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Static subscriber; repeat for several
    #[arg(short, long = "subscriber")]
    subscribers: Vec<SocketAddr>,

    /// random_walk or table
    #[arg(long)]
    source: Option<QuoteSourceKind>,
}

async fn publish<S: QuoteSource>(settings: PublisherSettings, source: S) -> Result<()> {
    let publisher = Publisher::bind(settings, source).await?;
    let stats = publisher.stats();

    tokio::select! {
        result = publisher.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
    }

    let stats = stats.snapshot();
    println!();
    println!("Summary:");
    println!("  • Quotes published: {}", stats.quotes_published);
    println!("  • Datagrams sent: {} ({} failed)", stats.datagrams_sent, stats.send_failures);
    println!("  • Subscriptions accepted: {}", stats.subscriptions);
    println!("  • Invalid requests: {}", stats.invalid_requests);
    println!();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fxarb=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    println!();
    println!(
        "{}",
        style(" 📡 FX ARBITRAGE - Quote Publisher").cyan().bold()
    );
    println!();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    if let Some(bind) = cli.bind {
        config.publisher_addr = bind;
    }
    if !cli.subscribers.is_empty() {
        config.subscribers = cli.subscribers.clone();
    }
    if let Some(source) = cli.source {
        config.quote_source = source;
    }

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        return Err(e);
    }

    config.print_summary();
    println!();

    let settings = config.publisher_settings();
    match config.quote_source {
        QuoteSourceKind::RandomWalk => {
            let source = RandomWalkSource::new(config.quote_table.clone(), config.random_walk_step);
            publish(settings, source).await
        }
        QuoteSourceKind::Table => publish(settings, TableSource::new(config.quote_table.clone())).await,
    }
}
