//! Diagnostic tool - Check configuration and sockets
//!
//! Run with: cargo run --bin diagnose

use std::env;
use std::net::{SocketAddr, UdpSocket};

use fxarb::config::Config;

fn probe_bind(label: &str, addr: SocketAddr) {
    match UdpSocket::bind(addr) {
        Ok(_) => println!("  {:<16} {}  ✅ Free", label, addr),
        Err(e) => println!("  {:<16} {}  ❌ {}", label, addr, e),
    }
}

fn main() {
    println!("🔍 FXARB DIAGNOSTIC CHECK\n");

    dotenvy::dotenv().ok();

    println!("═══════════════════════════════════════════════════");
    println!("                  CONFIGURATION                     ");
    println!("═══════════════════════════════════════════════════\n");

    let checks = [
        ("LISTEN_ADDR", "Subscriber socket"),
        ("PROVIDER_ADDR", "Publisher to subscribe to"),
        ("STALENESS_THRESHOLD_MS", "Quotes older than this are ignored"),
        ("DETECTION_BATCH_SIZE", "Updates per detection pass"),
        ("TOLERANCE", "Minimum significant cycle weight"),
        ("PUBLISHER_ADDR", "Publisher socket"),
        ("SUBSCRIBERS", "Static subscribers"),
        ("QUOTE_SOURCE", "random_walk or table"),
        ("DROP_RATE", "Simulated packet loss"),
    ];

    for (key, desc) in checks {
        let marker = match env::var(key) {
            Ok(value) => format!("{} (from .env)", value),
            Err(_) => "(default)".to_string(),
        };
        println!("  {}: {}", key, marker);
        println!("    └─ {}\n", desc);
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            println!("  ❌ Failed to load configuration: {}", e);
            return;
        }
    };

    println!("═══════════════════════════════════════════════════");
    println!("                    VALIDATION                      ");
    println!("═══════════════════════════════════════════════════\n");

    match config.validate() {
        Ok(()) => println!("  ✅ Configuration is valid"),
        Err(e) => println!("  ❌ {}", e),
    }

    if config.staleness_threshold_ms <= config.publish_interval_ms * config.quote_table.len() as u64 {
        println!("\n  ⚠️  Staleness threshold is shorter than one full pass over the");
        println!("     quote table; some pairs will drop out between updates.");
    }

    if config.synthesize_inverse {
        println!("\n  ⚠️  Inverse edges enabled: every quote is also read in reverse.");
    }

    println!("\n═══════════════════════════════════════════════════");
    println!("                     SOCKETS                        ");
    println!("═══════════════════════════════════════════════════\n");

    probe_bind("Subscriber", config.listen_addr);
    probe_bind("Publisher", config.publisher_addr);

    println!("\n✅ Diagnostic complete!\n");
}
