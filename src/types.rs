//! Core types and data structures for the token-radar market feed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A simple public key representation (chain-specific address kept as a string)
pub type Pubkey = String;

/// Latest known market snapshot for a single token.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMarketData {
    /// The mint address of the token, assigned on first observation
    pub pubkey: Pubkey,
    /// Display name (may be empty until backfilled)
    pub name: String,
    /// Display symbol (may be empty until backfilled)
    pub symbol: String,
    /// Latest market capitalization, last write wins
    pub market_cap: f64,
    /// Latest traded price, last write wins
    pub last_price: f64,
    /// Cumulative buy volume for this session
    pub buy_volume: f64,
    /// Cumulative sell volume for this session
    pub sell_volume: f64,
    /// Participant addresses observed trading this token
    pub unique_addresses: BTreeSet<String>,
    /// Unix timestamp (ms) of the latest applied event
    pub last_updated: u64,
    /// Token image (https only), filled in by the metadata resolver
    pub image: Option<String>,
}

impl TokenMarketData {
    /// Create an empty entry for a newly observed token.
    pub fn new(pubkey: impl Into<Pubkey>) -> Self {
        Self {
            pubkey: pubkey.into(),
            ..Default::default()
        }
    }

    /// Buy plus sell volume.
    pub fn total_volume(&self) -> f64 {
        self.buy_volume + self.sell_volume
    }

    /// Number of distinct addresses seen trading this token.
    pub fn unique_address_count(&self) -> usize {
        self.unique_addresses.len()
    }
}

/// A single swap reported by the feed; accumulates into the volume counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeFill {
    /// Swap size in the feed's quote unit
    pub amount: f64,
    /// True for buys, false for sells
    pub is_buy: bool,
}

/// A validated inbound market event. Absent fields leave the stored value untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TokenEvent {
    pub pubkey: Pubkey,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub market_cap: Option<f64>,
    pub price: Option<f64>,
    /// Cumulative buy volume as reported by the feed
    pub buy_volume: Option<f64>,
    /// Cumulative sell volume as reported by the feed
    pub sell_volume: Option<f64>,
    pub trade: Option<TradeFill>,
    pub unique_address: Option<String>,
    /// Unix timestamp (ms) reported by the feed
    pub timestamp: Option<u64>,
}

impl TokenEvent {
    /// Create an event that carries nothing but the token identifier.
    pub fn new(pubkey: impl Into<Pubkey>) -> Self {
        Self {
            pubkey: pubkey.into(),
            ..Default::default()
        }
    }
}

/// Display metadata returned by the token metadata service.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub pubkey: Pubkey,
    pub name: String,
    pub symbol: String,
    pub image: Option<String>,
}
