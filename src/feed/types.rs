//! Configuration, filter parameters and channel types for the market feed.

use crate::feed::lists::UserLists;
use crate::feed::token_store::StoreStats;
use crate::types::{Pubkey, TokenEvent, TokenMarketData, TokenMetadata};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use tokio::sync::{mpsc, oneshot};

/// Lower bound of the `1mTo10m` bucket.
pub const ONE_MILLION: f64 = 1_000_000.0;
/// Lower bound of the `10mTo100m` bucket.
pub const TEN_MILLION: f64 = 10_000_000.0;
/// Lower bound of the `over100m` bucket.
pub const HUNDRED_MILLION: f64 = 100_000_000.0;

/// Market capitalization bucket. Lower bounds are inclusive, upper bounds exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MarketCapBucket {
    #[default]
    All,
    Under1M,
    From1MTo10M,
    From10MTo100M,
    Over100M,
}

impl MarketCapBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketCapBucket::All => "all",
            MarketCapBucket::Under1M => "under1m",
            MarketCapBucket::From1MTo10M => "1mTo10m",
            MarketCapBucket::From10MTo100M => "10mTo100m",
            MarketCapBucket::Over100M => "over100m",
        }
    }

    /// Whether a market cap falls inside this bucket.
    pub fn contains(&self, market_cap: f64) -> bool {
        match self {
            MarketCapBucket::All => true,
            MarketCapBucket::Under1M => market_cap < ONE_MILLION,
            MarketCapBucket::From1MTo10M => (ONE_MILLION..TEN_MILLION).contains(&market_cap),
            MarketCapBucket::From10MTo100M => {
                (TEN_MILLION..HUNDRED_MILLION).contains(&market_cap)
            }
            MarketCapBucket::Over100M => market_cap >= HUNDRED_MILLION,
        }
    }
}

/// Unknown values fall back to `All`.
impl FromStr for MarketCapBucket {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "under1m" => MarketCapBucket::Under1M,
            "1mTo10m" => MarketCapBucket::From1MTo10M,
            "10mTo100m" => MarketCapBucket::From10MTo100M,
            "over100m" => MarketCapBucket::Over100M,
            _ => MarketCapBucket::All,
        })
    }
}

impl From<String> for MarketCapBucket {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_default()
    }
}

impl From<MarketCapBucket> for String {
    fn from(value: MarketCapBucket) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for MarketCapBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Volume direction filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VolumeFilter {
    Bought,
    Sold,
    #[default]
    All,
}

impl VolumeFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeFilter::Bought => "bought",
            VolumeFilter::Sold => "sold",
            VolumeFilter::All => "all",
        }
    }
}

/// Unknown values fall back to `All`.
impl FromStr for VolumeFilter {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "bought" => VolumeFilter::Bought,
            "sold" => VolumeFilter::Sold,
            _ => VolumeFilter::All,
        })
    }
}

impl From<String> for VolumeFilter {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_default()
    }
}

impl From<VolumeFilter> for String {
    fn from(value: VolumeFilter) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for VolumeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-owned filter parameters. Not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterParams {
    pub market_cap: MarketCapBucket,
    pub volume: VolumeFilter,
    pub watchlist_only: bool,
    pub hidden_only: bool,
}

/// How tokens are ranked (and which are kept) for a given volume direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingPolicy {
    /// `bought` ranks by buy volume, `sold` by sell volume, `all` by total volume.
    /// Tokens with no activity in the requested direction are dropped.
    #[default]
    DirectionalVolume,
    /// `bought` keeps net buyers ranked by buy minus sell, `sold` the reverse,
    /// `all` ranks by total volume.
    NetFlow,
}

impl RankingPolicy {
    /// Rank key for a token, or `None` if the token is excluded.
    pub fn rank(&self, token: &TokenMarketData, direction: VolumeFilter) -> Option<f64> {
        let (buy, sell) = (token.buy_volume, token.sell_volume);
        match (self, direction) {
            (_, VolumeFilter::All) => Some(buy + sell),
            (RankingPolicy::DirectionalVolume, VolumeFilter::Bought) => (buy > 0.0).then_some(buy),
            (RankingPolicy::DirectionalVolume, VolumeFilter::Sold) => (sell > 0.0).then_some(sell),
            (RankingPolicy::NetFlow, VolumeFilter::Bought) => (buy > sell).then_some(buy - sell),
            (RankingPolicy::NetFlow, VolumeFilter::Sold) => (sell > buy).then_some(sell - buy),
        }
    }
}

/// Market feed configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// WebSocket endpoint of the live feed; no connection is made when unset
    pub ws_url: Option<String>,
    /// Message sent right after connecting (e.g. a subscription request)
    pub subscribe_message: Option<String>,
    /// Maximum number of tokens in the published view
    pub view_limit: usize,
    /// Ranking policy used by the filter pipeline
    pub ranking_policy: RankingPolicy,
    /// SQLite URL for the watchlist and hidden sets
    pub database_url: String,
    /// Token metadata endpoint; backfill is disabled when unset
    pub metadata_endpoint: Option<String>,
    /// Metadata cache TTL in seconds
    pub metadata_cache_ttl_seconds: u64,
    /// Max metadata cache entries
    pub max_metadata_cache_entries: u64,
    /// Metadata requests per second
    pub metadata_requests_per_second: u32,
    /// Metadata fetch retry attempts
    pub metadata_retry_attempts: usize,
    /// Metadata HTTP timeout in seconds
    pub metadata_timeout_seconds: u64,
    /// Max metadata lookups in flight; further new tokens are not backfilled
    pub max_pending_backfills: usize,
    /// Capacity of the inbound frame queue
    pub inbound_buffer: usize,
    /// Capacity of the command queue
    pub command_buffer: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ws_url: None,
            subscribe_message: None,
            view_limit: 20,
            ranking_policy: RankingPolicy::default(),
            database_url: "sqlite:./preferences.db?mode=rwc".to_string(),
            metadata_endpoint: None,
            metadata_cache_ttl_seconds: 300,
            max_metadata_cache_entries: 10_000,
            metadata_requests_per_second: 5,
            metadata_retry_attempts: 3,
            metadata_timeout_seconds: 10,
            max_pending_backfills: 64,
            inbound_buffer: 1024,
            command_buffer: 64,
        }
    }
}

/// Everything that flows into the feed's event loop from producers.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// Raw text frame from the live connection
    Frame(String),
    /// Already validated event (simulators, replays)
    Event(TokenEvent),
    /// Result of a metadata lookup
    Metadata(TokenMetadata),
    /// The live connection ended; terminal for that connection instance
    Disconnected(String),
}

/// Mutators and queries accepted by the feed's event loop.
#[derive(Debug)]
pub enum FeedCommand {
    ToggleWatchlist(Pubkey, oneshot::Sender<bool>),
    ToggleHidden(Pubkey, oneshot::Sender<bool>),
    SetFilter(FilterParams),
    SetFrozen(bool),
    ResetVolumes(Option<Pubkey>),
    Token(Pubkey, oneshot::Sender<Option<TokenMarketData>>),
    Lists(oneshot::Sender<UserLists>),
    Stats(oneshot::Sender<StoreStats>),
    Shutdown(oneshot::Sender<()>),
}

// --- Communication Channels for MarketFeed ---

pub type InboundSender = mpsc::Sender<Inbound>;
pub type InboundReceiver = mpsc::Receiver<Inbound>;

pub type FeedCommandSender = mpsc::Sender<FeedCommand>;
pub type FeedCommandReceiver = mpsc::Receiver<FeedCommand>;
