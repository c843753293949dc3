//! Relay server: ingest RTMP / live FLV and mirror streams to target servers
//!
//! Run with: cargo run --example relay_server -- CONFIG.json
//!
//! The configuration document holds the application settings plus an
//! optional `server` section:
//!
//! ```json
//! {
//!   "abortOnConnectError": false,
//!   "targetServers": {
//!     "backup": { "targetUri": "rtmp://backup.example.com/live" },
//!     "cam1-only": { "targetUri": "rtmp://cdn.example.com/ingest",
//!                    "localStreamName": "cam1", "targetStreamName": "main" }
//!   },
//!   "server": { "rtmpBind": "0.0.0.0:1935", "liveFlvBind": "0.0.0.0:6666" }
//! }
//! ```
//!
//! Publish with ffmpeg:
//!   ffmpeg -re -i input.mp4 -c copy -f flv rtmp://localhost/live/cam1
//!
//! Log level follows `RUST_LOG`, e.g. `RUST_LOG=rtmp_relay=trace`.

use std::sync::Arc;
use std::time::Duration;

use rtmp_relay::application::{ApplicationConfig, ProxyPublishApplication};
use rtmp_relay::handler::HandlerRegistry;
use rtmp_relay::registry::StreamsManager;
use rtmp_relay::server::{RelayServer, ServerConfig};

fn print_usage() {
    eprintln!("Usage: relay_server CONFIG.json");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  CONFIG.json  Application configuration (targetServers, abortOnConnectError, ...)");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }
    let Some(path) = args.get(1) else {
        print_usage();
        std::process::exit(1);
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rtmp_relay=info".parse()?)
                .add_directive("relay_server=info".parse()?),
        )
        .init();

    let document: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;

    // Configuration errors stop startup
    let app_config = ApplicationConfig::from_value(&document)?;
    let server_config = match document.get("server") {
        Some(section) => ServerConfig::from_value(section)?,
        None => ServerConfig::default(),
    };

    let registry = Arc::new(HandlerRegistry::new());
    let streams = Arc::new(StreamsManager::new());
    let app = ProxyPublishApplication::initialize(app_config, Arc::clone(&registry), streams)?;

    for (name, target) in app.config().target_servers.iter() {
        println!("target {:<16} {}", name, target.target_uri);
    }

    let server = RelayServer::new(server_config, registry);
    let stats = Arc::clone(app.stats());
    let reporter = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        loop {
            ticker.tick().await;
            let s = stats.snapshot();
            tracing::info!(
                streams = s.streams_seen,
                published = s.published_remote,
                rejected = s.rejected_remote,
                failed = s.pushes_failed,
                "Relay stats"
            );
        }
    });

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    reporter.abort();
    app.shutdown();
    println!("Relay stopped");
    Ok(())
}
