//! FX Arbitrage Subscriber
//!
//! Run with: cargo run -- [--config fxarb.toml] [--listen 127.0.0.1:50414]
//!
//! Listens for quote datagrams, keeps the currency graph current and prints
//! every arbitrage cycle it finds as a trade walk. Passes that find nothing
//! are logged as a one-line summary.

use clap::Parser;
use color_eyre::eyre::Result;
use console::style;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fxarb::brain::{ArbitrageReport, OpportunityLog};
use fxarb::config::Config;
use fxarb::subscriber::{Subscriber, SubscriberStatsSnapshot};

#[derive(Parser)]
#[command(author, version, about = "Subscribe to FX quotes and report arbitrage", long_about = None)]
struct Cli {
    /// TOML config file (defaults to environment / .env)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Publisher to send subscription requests to
    #[arg(short, long)]
    provider: Option<SocketAddr>,
}

fn print_banner() {
    println!();
    println!(
        "{}",
        style("═══════════════════════════════════════════════════════════════").cyan()
    );
    println!(
        "{}",
        style(" 💱 FX ARBITRAGE - Quote Subscriber").cyan().bold()
    );
    println!(
        "{}",
        style("    UDP quotes | Last-write-wins graph | Bellman-Ford").cyan()
    );
    println!(
        "{}",
        style("═══════════════════════════════════════════════════════════════").cyan()
    );
    println!();
}

fn print_report(report: &ArbitrageReport, trade_amount: f64) {
    let Some(cycle) = report.cycle() else {
        return;
    };

    println!();
    println!(
        "{} {} {}",
        style(report.time().format("%H:%M:%S%.3f")).dim(),
        style("ARBITRAGE").green().bold(),
        style(cycle.format_path()).cyan()
    );
    println!("   Start with {} {}", cycle.start(), trade_amount);
    for step in cycle.conversions(trade_amount) {
        println!(
            "   Exchange {} for {} at {} --> {} {:.4}",
            step.from, step.to, step.rate, step.to, step.amount_after
        );
    }
    println!(
        "   Return: {:.6}x ({})",
        cycle.expected_return,
        style(format!("{:+.4}%", cycle.profit_percentage())).green()
    );
}

/// Report one detection pass: a log line when nothing was found, the trade
/// walk (and opportunity log entry) otherwise. Returns the summary line.
fn handle_report(report: &ArbitrageReport, trade_amount: f64, log_path: Option<&str>) -> String {
    let summary = report.summary();
    if !report.is_arbitrage() {
        info!("{}", summary);
        return summary;
    }

    print_report(report, trade_amount);

    if let Some(path) = log_path {
        if let Some(entry) = OpportunityLog::from_report(report, trade_amount) {
            if let Err(e) = entry.append_to_file(path) {
                warn!("Failed to write opportunity log: {}", e);
            }
        }
    }
    summary
}

fn print_stats(stats: &SubscriberStatsSnapshot) {
    println!();
    println!("Summary:");
    println!("  • Datagrams received: {}", stats.datagrams_received);
    println!("  • Quotes decoded: {} ({} rejected)", stats.quotes_decoded, stats.decode_errors);
    println!(
        "  • Graph updates: {} ({} out of sequence, {} from the future)",
        stats.updates_applied, stats.stale_quotes, stats.future_quotes
    );
    println!("  • Detection passes: {}", stats.detection_passes);
    println!("  • Arbitrage found: {}", stats.arbitrage_found);
    println!();
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

    print_banner();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }
    if let Some(provider) = cli.provider {
        config.provider_addr = Some(provider);
    }

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        error!("Please check your .env file or --config");
        return Err(e);
    }

    config.print_summary();
    println!();

    let subscriber = Subscriber::bind(config.subscriber_settings()).await?;
    let stats = subscriber.stats();

    let (report_tx, mut report_rx) = mpsc::unbounded_channel::<ArbitrageReport>();
    let trade_amount = config.trade_amount;
    let log_path = config.opportunity_log_path.clone();

    let printer = tokio::spawn(async move {
        while let Some(report) = report_rx.recv().await {
            handle_report(&report, trade_amount, log_path.as_deref());
        }
    });

    tokio::select! {
        result = subscriber.run(report_tx) => result?,
        _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
    }

    // The printer drains whatever is left once the sender is gone
    printer.await?;

    print_stats(&stats.snapshot());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxarb::brain::{ArbitrageCycle, Detection};
    use fxarb::wire::CurrencyCode;

    fn report(detection: Detection) -> ArbitrageReport {
        ArbitrageReport {
            at: 1_700_000_000_000,
            live_edges: 3,
            vertices: 3,
            updates: 3,
            detection,
        }
    }

    #[test]
    fn test_quiet_pass_is_still_reported() {
        let line = handle_report(&report(Detection::NoArbitrage), 100.0, None);
        assert_eq!(line, "no arbitrage detected (3 live edges, 3 currencies)");
    }

    #[test]
    fn test_arbitrage_pass_is_logged_to_file() {
        let code = |s: &str| s.parse::<CurrencyCode>().unwrap();
        let cycle = ArbitrageCycle {
            path: vec![code("USD"), code("EUR"), code("GBP"), code("USD")],
            rates: vec![0.90, 0.85, 1.35],
            total_weight: -(1.03275f64.ln()),
            expected_return: 1.03275,
        };

        let path = std::env::temp_dir()
            .join(format!("fxarb-main-{}", std::process::id()))
            .join("opportunities.log");
        let _ = std::fs::remove_file(&path);

        let line = handle_report(
            &report(Detection::Arbitrage(cycle)),
            100.0,
            path.to_str(),
        );
        assert!(line.starts_with("ARBITRAGE USD → EUR → GBP → USD"));

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        let _ = std::fs::remove_file(&path);
    }
}
