//! Feed module - live token market-data aggregation.
//!
//! Inbound events are merged into the token store, a pure pipeline derives the
//! filtered and ranked view, and the freeze controller decides which view is
//! displayed. `MarketFeed` wires these together on a single event loop.

pub mod types;
pub mod decoder;
pub mod token_store;
pub mod filter;
pub mod freeze;
pub mod lists;
pub mod storage;
pub mod ingestion;
pub mod metadata;
pub mod market_feed;

// Re-export main public types and the feed itself
pub use market_feed::{FeedHandle, MarketFeed};
pub use types::{
    FeedCommand, FeedConfig, FilterParams, Inbound, MarketCapBucket, RankingPolicy, VolumeFilter,
};

// Re-export other key components for direct use
pub use decoder::{decode_frame, DecodedEvent};
pub use filter::{filter_and_sort, DEFAULT_VIEW_LIMIT};
pub use freeze::{FreezeController, FreezeState};
pub use ingestion::IngestionChannel;
pub use lists::{ListKind, UserLists};
pub use metadata::MetadataResolver;
pub use storage::{PreferenceStorage, SqlitePreferences, HIDDEN_KEY, WATCHLIST_KEY};
pub use token_store::{ApplyOutcome, StoreStats, TokenStore};

/// Feed builder for convenient construction with sensible defaults.
pub struct FeedBuilder {
    config: FeedConfig,
}

impl FeedBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: FeedConfig::default(),
        }
    }

    /// Set the live feed WebSocket URL.
    pub fn with_ws_url(mut self, url: impl Into<String>) -> Self {
        self.config.ws_url = Some(url.into());
        self
    }

    /// Set the message sent right after connecting.
    pub fn with_subscribe_message(mut self, message: impl Into<String>) -> Self {
        self.config.subscribe_message = Some(message.into());
        self
    }

    /// Set the maximum view size.
    pub fn with_view_limit(mut self, limit: usize) -> Self {
        self.config.view_limit = limit;
        self
    }

    /// Set the ranking policy.
    pub fn with_ranking_policy(mut self, policy: RankingPolicy) -> Self {
        self.config.ranking_policy = policy;
        self
    }

    /// Set the preference database URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.config.database_url = url.into();
        self
    }

    /// Enable metadata backfill from `endpoint`.
    pub fn with_metadata_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.metadata_endpoint = Some(endpoint.into());
        self
    }

    /// Set metadata cache TTL in seconds.
    pub fn with_metadata_cache_ttl(mut self, ttl_seconds: u64) -> Self {
        self.config.metadata_cache_ttl_seconds = ttl_seconds;
        self
    }

    /// Set metadata request rate.
    pub fn with_metadata_rate_limit(mut self, requests_per_second: u32) -> Self {
        self.config.metadata_requests_per_second = requests_per_second;
        self
    }

    /// Set the maximum number of metadata lookups in flight.
    pub fn with_max_pending_backfills(mut self, max: usize) -> Self {
        self.config.max_pending_backfills = max;
        self
    }

    /// Set inbound and command queue capacities.
    pub fn with_buffers(mut self, inbound: usize, commands: usize) -> Self {
        self.config.inbound_buffer = inbound;
        self.config.command_buffer = commands;
        self
    }

    /// Build the feed configuration.
    pub fn build_config(self) -> FeedConfig {
        self.config
    }

    /// Build the feed and its handle.
    pub async fn build(
        self,
        storage: std::sync::Arc<dyn PreferenceStorage>,
    ) -> anyhow::Result<(MarketFeed, FeedHandle)> {
        MarketFeed::new(self.config, storage).await
    }
}

impl Default for FeedBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_builder() {
        let config = FeedBuilder::new()
            .with_ws_url("wss://feed.example/ws")
            .with_view_limit(10)
            .with_ranking_policy(RankingPolicy::NetFlow)
            .with_metadata_rate_limit(2)
            .with_max_pending_backfills(8)
            .build_config();

        assert_eq!(config.ws_url.as_deref(), Some("wss://feed.example/ws"));
        assert_eq!(config.view_limit, 10);
        assert_eq!(config.ranking_policy, RankingPolicy::NetFlow);
        assert_eq!(config.metadata_requests_per_second, 2);
        assert_eq!(config.max_pending_backfills, 8);
    }

    #[test]
    fn test_feed_builder_defaults() {
        let config = FeedBuilder::new().build_config();

        assert_eq!(config.ws_url, None);
        assert_eq!(config.view_limit, DEFAULT_VIEW_LIMIT);
        assert_eq!(config.ranking_policy, RankingPolicy::DirectionalVolume);
        assert_eq!(config.metadata_cache_ttl_seconds, 300);
        assert_eq!(config.metadata_endpoint, None);
    }
}
