//! Feed Monitor - runs one feed and logs what it sees
//!
//! Usage:
//!   cargo run --release --bin feed_monitor
//!
//! Environment variables:
//!   FEED_ENDPOINT - upstream URL (required)
//!   FEED_PRESET - block-rays | validator-stream | event-stream (default: block-rays)
//!   SUMMARY_INTERVAL_MS - how often to log the aggregate (default: 10000)
//!   RUST_LOG - log filter (default: info)

use chainfeed::config::FeedConfig;
use chainfeed::feed::{transport_for, Feed};
use chainfeed::normalizer::DomainEvent;
use dotenv::dotenv;
use log::{info, warn};
use std::env;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let config = FeedConfig::from_env()?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.rust_log.as_str()))
        .target(env_logger::Target::Stderr)
        .init();

    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        warn!("⚠️  A rustls crypto provider was already installed");
    }

    let summary_interval_ms = env::var("SUMMARY_INTERVAL_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(10_000);

    info!("🚀 Starting Feed Monitor");
    info!("   ├─ Preset: {}", config.preset.as_str());
    info!("   ├─ Endpoint: {}", config.endpoint);
    info!("   ├─ Dwell / retention: {}ms / {}ms", config.dwell_ms, config.retention_ms);
    info!("   └─ Max items: {}", config.max_items);

    let transport = transport_for(&config)?;
    let mut feed = Feed::start(&config, transport)?;

    let mut summary_timer = tokio::time::interval(Duration::from_millis(summary_interval_ms));
    let connection = feed.connection();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("🛑 Shutdown requested");
                break;
            }
            _ = summary_timer.tick() => {
                let view = feed.latest();
                let state = connection.borrow().clone();
                let agg = &view.aggregate;

                info!(
                    "📊 {} | live {} / inactive {} | admitted {} ({:.1}/min) | latest block {}",
                    state.status.as_str(),
                    agg.live_items,
                    agg.inactive_items,
                    agg.total_admitted,
                    agg.admissions_per_minute,
                    agg.latest_block_number.map_or("-".to_string(), |n| n.to_string()),
                );
                let newest_block = view.items.iter().rev().find_map(|item| match &item.payload {
                    DomainEvent::BlockObserved(block) => Some(block),
                    _ => None,
                });
                if let Some(block) = newest_block {
                    info!(
                        "   ├─ Newest block #{} {} ({} txs, {:.0}% gas)",
                        block.number,
                        block.short_hash(),
                        block.tx_count,
                        block.gas_utilization() * 100.0
                    );
                }
                if let Some(err) = &state.last_error {
                    info!("   ├─ Last error: {} (reconnects: {})", err.message, state.reconnect_attempts);
                }
                for (rank, entry) in agg.leaderboard.iter().take(3).enumerate() {
                    info!(
                        "   └─ #{} {} - {} blocks ({:.1}%)",
                        rank + 1,
                        entry.author_id,
                        entry.blocks_produced,
                        entry.share * 100.0
                    );
                }
            }
        }
    }

    feed.stop().await;
    info!("✅ Feed Monitor stopped");
    Ok(())
}
