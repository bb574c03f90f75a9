//! Token map store - the authoritative, continuously updated map of token snapshots.
//!
//! The store is a plain owned value. Whoever owns it is the single writer; readers
//! learn about mutations through the revision counter returned by `subscribe()`.

use crate::feed::decoder::decode_frame;
use crate::types::{Pubkey, TokenEvent, TokenMarketData, TokenMetadata};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::watch;
use tracing::{debug, warn};

/// What `apply_event` did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// First observation of this pubkey
    Inserted,
    /// Merged into an existing entry
    Updated,
}

/// Ingestion counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub events_applied: u64,
    pub events_rejected: u64,
    pub fields_rejected: u64,
}

/// Keyed collection of the latest known market data per token.
pub struct TokenStore {
    tokens: HashMap<Pubkey, TokenMarketData>,
    revision: watch::Sender<u64>,
    stats: StoreStats,
}

impl TokenStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            tokens: HashMap::new(),
            revision,
            stats: StoreStats::default(),
        }
    }

    /// Subscribe to mutation notifications. The value is the store revision.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn get(&self, pubkey: &str) -> Option<&TokenMarketData> {
        self.tokens.get(pubkey)
    }

    pub fn values(&self) -> impl Iterator<Item = &TokenMarketData> {
        self.tokens.values()
    }

    pub fn stats(&self) -> StoreStats {
        self.stats
    }

    /// Decode and apply a raw frame. Bad frames are logged and dropped; this never fails.
    /// Returns the pubkey the frame was applied to.
    pub fn ingest_frame(&mut self, frame: &str) -> Option<(Pubkey, ApplyOutcome)> {
        match decode_frame(frame) {
            Ok(decoded) => {
                if !decoded.rejected_fields.is_empty() {
                    warn!(
                        "Dropped invalid fields {:?} from event for {}",
                        decoded.rejected_fields, decoded.event.pubkey
                    );
                    self.stats.fields_rejected += decoded.rejected_fields.len() as u64;
                }
                let pubkey = decoded.event.pubkey.clone();
                Some((pubkey, self.apply_event(decoded.event)))
            }
            Err(e) => {
                warn!("Ignoring malformed feed frame: {:#}", e);
                self.stats.events_rejected += 1;
                None
            }
        }
    }

    /// Merge an event into the map, creating the entry on first observation.
    pub fn apply_event(&mut self, event: TokenEvent) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::Updated;
        let entry = self.tokens.entry(event.pubkey.clone()).or_insert_with(|| {
            outcome = ApplyOutcome::Inserted;
            TokenMarketData::new(event.pubkey.clone())
        });

        if let Some(name) = event.name.filter(|n| !n.is_empty()) {
            entry.name = name;
        }
        if let Some(symbol) = event.symbol.filter(|s| !s.is_empty()) {
            entry.symbol = symbol;
        }
        if let Some(market_cap) = event.market_cap {
            entry.market_cap = market_cap;
        }
        if let Some(price) = event.price {
            entry.last_price = price;
        }

        // Reported volumes are running totals and only move forward.
        if let Some(buy_volume) = event.buy_volume {
            if buy_volume >= entry.buy_volume {
                entry.buy_volume = buy_volume;
            } else {
                debug!(
                    "Ignoring regressing buy volume for {}: {} < {}",
                    entry.pubkey, buy_volume, entry.buy_volume
                );
            }
        }
        if let Some(sell_volume) = event.sell_volume {
            if sell_volume >= entry.sell_volume {
                entry.sell_volume = sell_volume;
            } else {
                debug!(
                    "Ignoring regressing sell volume for {}: {} < {}",
                    entry.pubkey, sell_volume, entry.sell_volume
                );
            }
        }

        if let Some(trade) = event.trade {
            if trade.is_buy {
                entry.buy_volume += trade.amount;
            } else {
                entry.sell_volume += trade.amount;
            }
        }
        if let Some(address) = event.unique_address {
            entry.unique_addresses.insert(address);
        }

        entry.last_updated = event
            .timestamp
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis() as u64);

        self.stats.events_applied += 1;
        self.bump();
        outcome
    }

    /// Backfill display metadata. Only empty fields are filled; returns whether anything changed.
    pub fn apply_metadata(&mut self, metadata: &TokenMetadata) -> bool {
        let Some(entry) = self.tokens.get_mut(&metadata.pubkey) else {
            debug!("Metadata for unknown token {} ignored", metadata.pubkey);
            return false;
        };

        let mut changed = false;
        if entry.name.is_empty() && !metadata.name.is_empty() {
            entry.name = metadata.name.clone();
            changed = true;
        }
        if entry.symbol.is_empty() && !metadata.symbol.is_empty() {
            entry.symbol = metadata.symbol.clone();
            changed = true;
        }
        if entry.image.is_none() && metadata.image.is_some() {
            entry.image = metadata.image.clone();
            changed = true;
        }

        if changed {
            self.bump();
        }
        changed
    }

    /// Zero the volume counters of one token, or of every token when `pubkey` is `None`.
    /// Returns the number of entries reset.
    pub fn reset_volumes(&mut self, pubkey: Option<&str>) -> usize {
        let reset = match pubkey {
            Some(pubkey) => match self.tokens.get_mut(pubkey) {
                Some(entry) => {
                    entry.buy_volume = 0.0;
                    entry.sell_volume = 0.0;
                    1
                }
                None => 0,
            },
            None => {
                for entry in self.tokens.values_mut() {
                    entry.buy_volume = 0.0;
                    entry.sell_volume = 0.0;
                }
                self.tokens.len()
            }
        };

        if reset > 0 {
            self.bump();
        }
        reset
    }

    fn bump(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}
