//! Main entry point for the token-radar demo
//!
//! Connects to a live feed when `TOKEN_RADAR_WS_URL` is set, otherwise drives the
//! feed with simulated trades. Demonstrates filters, list toggles and freezing.

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::env;
use token_radar::feed::{
    FeedBuilder, FeedHandle, FilterParams, MarketCapBucket, MarketFeed, SqlitePreferences,
    VolumeFilter,
};
use token_radar::{TokenEvent, TradeFill};
use tokio::time::{sleep, Duration};
use tracing::{info, warn, Level};

const SIMULATED_TOKENS: usize = 40;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    info!("Starting token-radar demo");

    let mut builder = FeedBuilder::new();
    if let Ok(url) = env::var("TOKEN_RADAR_WS_URL") {
        builder = builder.with_ws_url(url);
    }
    if let Ok(message) = env::var("TOKEN_RADAR_SUBSCRIBE") {
        builder = builder.with_subscribe_message(message);
    }
    if let Ok(url) = env::var("TOKEN_RADAR_DATABASE_URL") {
        builder = builder.with_database_url(url);
    }
    if let Ok(endpoint) = env::var("TOKEN_RADAR_METADATA_URL") {
        builder = builder.with_metadata_endpoint(endpoint);
    }
    let config = builder.build_config();
    let simulate = config.ws_url.is_none();

    let storage = SqlitePreferences::connect(&config.database_url).await?;
    let (feed, handle) = MarketFeed::new(config, storage).await?;

    let feed_task = tokio::spawn(async move {
        if let Err(e) = feed.run().await {
            warn!("Market feed stopped with error: {:#}", e);
        }
    });

    let simulator = simulate.then(|| {
        info!("No feed URL configured, simulating {} tokens", SIMULATED_TOKENS);
        let handle = handle.clone();
        tokio::spawn(async move { simulate_trades(handle).await })
    });

    demo_interactions(&handle).await?;

    if let Some(simulator) = simulator {
        simulator.abort();
    }
    handle.shutdown().await?;
    let _ = feed_task.await;

    info!("Demo completed. Preferences are stored in the configured database.");
    Ok(())
}

/// Push random trades for a fixed population of tokens until aborted.
async fn simulate_trades(handle: FeedHandle) -> Result<()> {
    let mut rng = StdRng::from_entropy();
    let mut market_caps: Vec<f64> = (0..SIMULATED_TOKENS)
        .map(|_| 10f64.powf(rng.gen_range(4.0..9.0)))
        .collect();

    loop {
        let index = rng.gen_range(0..SIMULATED_TOKENS);
        market_caps[index] *= rng.gen_range(0.95..1.06);

        let event = TokenEvent {
            name: Some(format!("Sim Token {}", index)),
            symbol: Some(format!("SIM{}", index)),
            market_cap: Some(market_caps[index]),
            trade: Some(TradeFill {
                amount: rng.gen_range(0.01..25.0),
                is_buy: rng.gen_bool(0.55),
            }),
            unique_address: Some(format!("Wallet{}", rng.gen_range(0..500))),
            timestamp: Some(chrono::Utc::now().timestamp_millis() as u64),
            ..TokenEvent::new(format!("SimMint{:02}", index))
        };

        handle.push_event(event).await?;
        sleep(Duration::from_millis(5)).await;
    }
}

async fn demo_interactions(handle: &FeedHandle) -> Result<()> {
    sleep(Duration::from_secs(2)).await;
    log_view("Top tokens by total volume", handle);

    let Some(leader) = handle.view().first().map(|token| token.pubkey.clone()) else {
        info!("No tokens observed yet");
        return Ok(());
    };

    let watched = handle.toggle_watchlist(leader.clone()).await?;
    info!("{} watchlisted: {}", leader, watched);

    handle
        .set_filter(FilterParams {
            watchlist_only: true,
            ..FilterParams::default()
        })
        .await?;
    sleep(Duration::from_millis(200)).await;
    log_view("Watchlist", handle);

    handle
        .set_filter(FilterParams {
            market_cap: MarketCapBucket::Under1M,
            volume: VolumeFilter::Bought,
            ..FilterParams::default()
        })
        .await?;
    sleep(Duration::from_millis(200)).await;
    log_view("Most bought under 1M", handle);

    handle.set_frozen(true).await?;
    // Stats round-trips through the loop, so the freeze has been applied after it.
    handle.stats().await?;
    let frozen = handle.view();
    sleep(Duration::from_secs(1)).await;
    info!(
        "Frozen view unchanged after 1s of trading: {}",
        frozen == handle.view()
    );
    handle.set_frozen(false).await?;

    let stats = handle.stats().await?;
    info!(
        "Applied {} events, rejected {} frames",
        stats.events_applied, stats.events_rejected
    );
    Ok(())
}

fn log_view(title: &str, handle: &FeedHandle) {
    info!("{} ({:?}):", title, handle.freeze_state());
    for (rank, token) in handle.view().iter().enumerate() {
        info!(
            "  {:>2}. {:<10} mcap {:>14.0}  buy {:>10.2}  sell {:>10.2}  holders {}",
            rank + 1,
            token.symbol,
            token.market_cap,
            token.buy_volume,
            token.sell_volume,
            token.unique_address_count()
        );
    }
}
