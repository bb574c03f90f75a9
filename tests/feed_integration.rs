//! Tests for the MarketFeed event loop driven through its handle

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use token_radar::feed::{
    FeedBuilder, FeedHandle, FilterParams, FreezeState, MarketCapBucket, MarketFeed,
    PreferenceStorage, SqlitePreferences, VolumeFilter,
};
use token_radar::types::Pubkey;
use token_radar::{TokenEvent, TradeFill};
use tokio::task::JoinHandle;
use tokio::time::timeout;

async fn start_feed(storage: Arc<dyn PreferenceStorage>) -> (FeedHandle, JoinHandle<Result<()>>) {
    let (feed, handle) = FeedBuilder::new()
        .build(storage)
        .await
        .expect("Failed to create MarketFeed");
    let task = tokio::spawn(feed.run());
    (handle, task)
}

/// Every command is handled after the frames queued ahead of it, so a round trip
/// guarantees the published view reflects everything pushed so far.
async fn settle(handle: &FeedHandle) {
    handle.stats().await.expect("feed is running");
}

fn trade(pubkey: &str, market_cap: f64, buy: f64, sell: f64) -> TokenEvent {
    TokenEvent {
        market_cap: Some(market_cap),
        buy_volume: Some(buy),
        sell_volume: Some(sell),
        ..TokenEvent::new(pubkey)
    }
}

fn pubkeys(handle: &FeedHandle) -> Vec<Pubkey> {
    handle.view().into_iter().map(|token| token.pubkey).collect()
}

#[tokio::test]
async fn test_events_flow_into_ranked_view() {
    let storage = SqlitePreferences::in_memory().await.unwrap();
    let (handle, task) = start_feed(storage).await;

    handle.push_event(trade("mint-a", 50_000.0, 10.0, 1.0)).await.unwrap();
    handle.push_event(trade("mint-b", 50_000.0, 30.0, 5.0)).await.unwrap();
    handle
        .push_frame(r#"{"pubkey":"mint-c","marketCap":2000000,"buyVolume":"20","sellVolume":0}"#)
        .await
        .unwrap();
    handle.push_frame("garbage").await.unwrap();
    settle(&handle).await;

    assert_eq!(pubkeys(&handle), vec!["mint-b", "mint-c", "mint-a"]);

    let stats = handle.stats().await.unwrap();
    assert_eq!(stats.events_applied, 3);
    assert_eq!(stats.events_rejected, 1);

    handle
        .set_filter(FilterParams {
            market_cap: MarketCapBucket::Under1M,
            volume: VolumeFilter::Sold,
            ..FilterParams::default()
        })
        .await
        .unwrap();
    settle(&handle).await;
    assert_eq!(pubkeys(&handle), vec!["mint-b", "mint-a"]);

    handle.shutdown().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_frozen_view_is_stable_while_store_keeps_updating() {
    let storage = SqlitePreferences::in_memory().await.unwrap();
    let (handle, task) = start_feed(storage).await;

    handle.push_event(trade("mint-a", 10_000.0, 10.0, 0.0)).await.unwrap();
    handle.push_event(trade("mint-b", 10_000.0, 5.0, 0.0)).await.unwrap();
    settle(&handle).await;

    handle.set_frozen(true).await.unwrap();
    settle(&handle).await;
    assert_eq!(handle.freeze_state(), FreezeState::Frozen);
    let snapshot = handle.view();

    for i in 0..10 {
        handle
            .push_event(TokenEvent {
                trade: Some(TradeFill { amount: 100.0, is_buy: true }),
                ..TokenEvent::new(format!("mint-new-{}", i))
            })
            .await
            .unwrap();
    }
    handle.push_event(trade("mint-b", 10_000.0, 500.0, 0.0)).await.unwrap();
    settle(&handle).await;

    // Store moved on, displayed view did not.
    assert_eq!(handle.view(), snapshot);
    assert_eq!(handle.token("mint-b").await.unwrap().unwrap().buy_volume, 500.0);
    assert_eq!(handle.stats().await.unwrap().events_applied, 13);

    let mut state_rx = handle.subscribe_freeze_state();
    state_rx.borrow_and_update();
    handle.set_frozen(false).await.unwrap();
    timeout(Duration::from_secs(5), state_rx.changed())
        .await
        .expect("timed out waiting for unfreeze")
        .unwrap();
    assert_eq!(*state_rx.borrow(), FreezeState::Live);
    // The live view is already published when the state flips.
    let live = pubkeys(&handle);
    assert_eq!(live.len(), 12);
    assert_eq!(live[0], "mint-b");

    handle.shutdown().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_watchlist_and_hidden_filters_intersect() {
    let storage = SqlitePreferences::in_memory().await.unwrap();
    let (handle, task) = start_feed(storage).await;

    for (pubkey, volume) in [("mint-a", 1.0), ("mint-b", 2.0), ("mint-c", 3.0)] {
        handle.push_event(trade(pubkey, 1.0, volume, 0.0)).await.unwrap();
    }
    assert!(handle.toggle_watchlist("mint-a").await.unwrap());
    assert!(handle.toggle_watchlist("mint-b").await.unwrap());
    assert!(handle.toggle_hidden("mint-b").await.unwrap());
    assert!(handle.toggle_hidden("mint-c").await.unwrap());

    handle
        .set_filter(FilterParams {
            watchlist_only: true,
            hidden_only: true,
            ..FilterParams::default()
        })
        .await
        .unwrap();
    settle(&handle).await;
    assert_eq!(pubkeys(&handle), vec!["mint-b"]);

    handle
        .set_filter(FilterParams {
            watchlist_only: true,
            ..FilterParams::default()
        })
        .await
        .unwrap();
    settle(&handle).await;
    assert_eq!(pubkeys(&handle), vec!["mint-b", "mint-a"]);

    // Toggling off recomputes the filtered view immediately.
    assert!(!handle.toggle_watchlist("mint-b").await.unwrap());
    assert_eq!(pubkeys(&handle), vec!["mint-a"]);

    handle.shutdown().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_lists_survive_feed_restart() {
    let storage = SqlitePreferences::in_memory().await.unwrap();

    let (handle, task) = start_feed(storage.clone()).await;
    handle.toggle_watchlist("mint-a").await.unwrap();
    handle.toggle_watchlist("mint-b").await.unwrap();
    handle.toggle_watchlist("mint-b").await.unwrap();
    handle.toggle_hidden("mint-c").await.unwrap();
    handle.shutdown().await.unwrap();
    task.await.unwrap().unwrap();

    let (handle, task) = start_feed(storage.clone()).await;
    let lists = handle.lists().await.unwrap();
    assert!(lists.is_watchlisted("mint-a"));
    assert!(!lists.is_watchlisted("mint-b"));
    assert!(lists.is_hidden("mint-c"));
    assert!(!lists.is_hidden("mint-a"));

    assert_eq!(storage.load_set("watchlist").await.unwrap(), vec!["mint-a".to_string()]);
    assert_eq!(storage.load_set("hiddenTokens").await.unwrap(), vec!["mint-c".to_string()]);

    handle.shutdown().await.unwrap();
    task.await.unwrap().unwrap();
}

/// Storage backend that is permanently unavailable.
#[derive(Default)]
struct UnavailableStorage {
    writes: AtomicUsize,
}

#[async_trait]
impl PreferenceStorage for UnavailableStorage {
    async fn load_set(&self, _key: &str) -> Result<Vec<Pubkey>> {
        Err(anyhow!("storage unavailable"))
    }

    async fn save_set(&self, _key: &str, _members: &[Pubkey]) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!("storage unavailable"))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(false)
    }
}

#[tokio::test]
async fn test_storage_failures_are_not_fatal() {
    let storage = Arc::new(UnavailableStorage::default());
    let (handle, task) = start_feed(storage.clone()).await;

    assert!(handle.lists().await.unwrap().members(token_radar::feed::ListKind::Watchlist).is_empty());

    handle.push_event(trade("mint-a", 1.0, 1.0, 0.0)).await.unwrap();
    assert!(handle.toggle_watchlist("mint-a").await.unwrap());
    assert!(handle.lists().await.unwrap().is_watchlisted("mint-a"));
    assert_eq!(storage.writes.load(Ordering::SeqCst), 1);

    handle
        .set_filter(FilterParams {
            watchlist_only: true,
            ..FilterParams::default()
        })
        .await
        .unwrap();
    settle(&handle).await;
    assert_eq!(pubkeys(&handle), vec!["mint-a"]);

    handle.shutdown().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_view_is_truncated_to_limit() {
    let storage = SqlitePreferences::in_memory().await.unwrap();
    let (handle, task) = start_feed(storage).await;

    for i in 0..30 {
        handle
            .push_event(trade(&format!("mint-{:02}", i), 1.0, i as f64 + 1.0, 0.0))
            .await
            .unwrap();
    }
    settle(&handle).await;

    let view = pubkeys(&handle);
    assert_eq!(view.len(), 20);
    assert_eq!(view[0], "mint-29");
    assert_eq!(view[19], "mint-10");

    handle.shutdown().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_reset_volumes_through_handle() {
    let storage = SqlitePreferences::in_memory().await.unwrap();
    let (handle, task) = start_feed(storage).await;

    handle.push_event(trade("mint-a", 1.0, 10.0, 4.0)).await.unwrap();
    handle.push_event(trade("mint-b", 1.0, 3.0, 0.0)).await.unwrap();
    handle.reset_volumes(Some("mint-a".to_string())).await.unwrap();
    settle(&handle).await;

    assert_eq!(handle.token("mint-a").await.unwrap().unwrap().total_volume(), 0.0);
    assert_eq!(pubkeys(&handle), vec!["mint-b", "mint-a"]);

    handle.reset_volumes(None).await.unwrap();
    assert_eq!(handle.token("mint-b").await.unwrap().unwrap().buy_volume, 0.0);

    handle.shutdown().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_handle_fails_after_shutdown() {
    let storage = SqlitePreferences::in_memory().await.unwrap();
    let (handle, task) = start_feed(storage).await;

    handle.shutdown().await.unwrap();
    task.await.unwrap().unwrap();

    assert!(handle.toggle_watchlist("mint-a").await.is_err());
    assert!(handle.stats().await.is_err());
}

#[tokio::test]
async fn test_feed_stops_when_handles_are_dropped() {
    let storage = SqlitePreferences::in_memory().await.unwrap();
    let (handle, task) = start_feed(storage).await;

    drop(handle);
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_zero_view_limit_is_rejected() {
    let storage = SqlitePreferences::in_memory().await.unwrap();
    let config = FeedBuilder::new().with_view_limit(0).build_config();

    assert!(MarketFeed::new(config, storage).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_commands_are_handled_under_continuous_traffic() {
    let storage = SqlitePreferences::in_memory().await.unwrap();
    let (handle, task) = start_feed(storage).await;

    let producers: Vec<_> = (0..4)
        .map(|producer| {
            let handle = handle.clone();
            tokio::spawn(async move {
                let mut sent = 0u64;
                loop {
                    let event = TokenEvent {
                        trade: Some(TradeFill { amount: 1.0, is_buy: sent % 2 == 0 }),
                        ..TokenEvent::new(format!("mint-{}-{}", producer, sent % 500))
                    };
                    if handle.push_event(event).await.is_err() {
                        break sent;
                    }
                    sent += 1;
                }
            })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(100)).await;

    timeout(Duration::from_secs(5), handle.set_frozen(true))
        .await
        .expect("freeze request was not accepted")
        .unwrap();
    timeout(Duration::from_secs(5), settle(&handle))
        .await
        .expect("commands starved by inbound traffic");
    assert_eq!(handle.freeze_state(), FreezeState::Frozen);

    let snapshot = handle.view();
    timeout(Duration::from_secs(5), settle(&handle))
        .await
        .expect("commands starved by inbound traffic");
    assert_eq!(handle.view(), snapshot);

    assert!(timeout(Duration::from_secs(5), handle.toggle_watchlist("mint-0-0"))
        .await
        .expect("toggle starved by inbound traffic")
        .unwrap());

    timeout(Duration::from_secs(5), handle.shutdown())
        .await
        .expect("shutdown starved by inbound traffic")
        .unwrap();
    task.await.unwrap().unwrap();

    for producer in producers {
        let sent = timeout(Duration::from_secs(5), producer).await.unwrap().unwrap();
        assert!(sent > 0);
    }
}
