//! Replay a recorded feed (one JSON frame per line) and print the resulting view.
//!
//! Usage: replay_feed <frames.jsonl> [bucket] [volume] [limit]
//!   bucket: all | under1m | 1mTo10m | 10mTo100m | over100m
//!   volume: all | bought | sold

use anyhow::{bail, Context, Result};
use std::env;
use token_radar::feed::{
    filter_and_sort, FilterParams, MarketCapBucket, RankingPolicy, TokenStore, UserLists,
    VolumeFilter, DEFAULT_VIEW_LIMIT,
};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::WARN)
        .init();

    let args: Vec<String> = env::args().collect();
    let Some(path) = args.get(1) else {
        bail!("usage: replay_feed <frames.jsonl> [bucket] [volume] [limit]");
    };

    let params = FilterParams {
        market_cap: args
            .get(2)
            .map(|s| s.parse::<MarketCapBucket>().unwrap_or_default())
            .unwrap_or_default(),
        volume: args
            .get(3)
            .map(|s| s.parse::<VolumeFilter>().unwrap_or_default())
            .unwrap_or_default(),
        ..FilterParams::default()
    };
    let limit = match args.get(4) {
        Some(limit) => limit
            .parse::<usize>()
            .with_context(|| format!("Invalid limit {}", limit))?,
        None => DEFAULT_VIEW_LIMIT,
    };

    let file = File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path))?;
    let mut lines = BufReader::new(file).lines();

    let mut store = TokenStore::new();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        store.ingest_frame(&line);
    }

    let stats = store.stats();
    info!("Replayed {} frames into {} tokens", stats.events_applied, store.len());

    let view = filter_and_sort(
        store.values(),
        &params,
        &UserLists::new(),
        RankingPolicy::default(),
        limit,
    );

    println!(
        "{} tokens, {} applied, {} rejected frames, {} rejected fields",
        store.len(),
        stats.events_applied,
        stats.events_rejected,
        stats.fields_rejected
    );
    println!("bucket={} volume={} limit={}", params.market_cap, params.volume, limit);
    for (rank, token) in view.iter().enumerate() {
        println!(
            "{:>3}  {:<44}  {:<10}  mcap {:>14.0}  buy {:>12.2}  sell {:>12.2}  holders {}",
            rank + 1,
            token.pubkey,
            token.symbol,
            token.market_cap,
            token.buy_volume,
            token.sell_volume,
            token.unique_address_count()
        );
    }

    Ok(())
}
