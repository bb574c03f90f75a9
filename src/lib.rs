//! token-radar - live token market-data aggregation for Solana trading front ends
//!
//! This crate merges a live stream of price/volume events into a keyed token map,
//! derives a filtered and ranked top-N view from it, and lets the consumer freeze
//! that view while ingestion keeps running underneath.

pub mod types;
pub mod feed;

// Re-export main types for convenience
pub use types::{Pubkey, TokenEvent, TokenMarketData, TokenMetadata, TradeFill};
