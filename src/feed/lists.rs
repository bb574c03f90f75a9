//! Watchlist and hidden sets.
//!
//! Both sets are loaded once at startup and written back on every toggle. The
//! in-memory sets are authoritative: storage failures are logged and otherwise
//! ignored.

use crate::feed::storage::{PreferenceStorage, HIDDEN_KEY, WATCHLIST_KEY};
use crate::types::Pubkey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Which of the two user lists an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListKind {
    Watchlist,
    Hidden,
}

impl ListKind {
    pub fn storage_key(&self) -> &'static str {
        match self {
            ListKind::Watchlist => WATCHLIST_KEY,
            ListKind::Hidden => HIDDEN_KEY,
        }
    }
}

/// The user's watchlist and hidden sets. A token may be in both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserLists {
    watchlist: BTreeSet<Pubkey>,
    hidden: BTreeSet<Pubkey>,
}

impl UserLists {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_members(
        watchlist: impl IntoIterator<Item = Pubkey>,
        hidden: impl IntoIterator<Item = Pubkey>,
    ) -> Self {
        Self {
            watchlist: watchlist.into_iter().collect(),
            hidden: hidden.into_iter().collect(),
        }
    }

    fn set(&self, kind: ListKind) -> &BTreeSet<Pubkey> {
        match kind {
            ListKind::Watchlist => &self.watchlist,
            ListKind::Hidden => &self.hidden,
        }
    }

    fn set_mut(&mut self, kind: ListKind) -> &mut BTreeSet<Pubkey> {
        match kind {
            ListKind::Watchlist => &mut self.watchlist,
            ListKind::Hidden => &mut self.hidden,
        }
    }

    /// Flip membership of `pubkey`. Returns the new membership.
    pub fn toggle(&mut self, kind: ListKind, pubkey: &str) -> bool {
        let set = self.set_mut(kind);
        if set.remove(pubkey) {
            false
        } else {
            set.insert(pubkey.to_string());
            true
        }
    }

    pub fn toggle_watchlist(&mut self, pubkey: &str) -> bool {
        self.toggle(ListKind::Watchlist, pubkey)
    }

    pub fn toggle_hidden(&mut self, pubkey: &str) -> bool {
        self.toggle(ListKind::Hidden, pubkey)
    }

    pub fn contains(&self, kind: ListKind, pubkey: &str) -> bool {
        self.set(kind).contains(pubkey)
    }

    pub fn is_watchlisted(&self, pubkey: &str) -> bool {
        self.contains(ListKind::Watchlist, pubkey)
    }

    pub fn is_hidden(&self, pubkey: &str) -> bool {
        self.contains(ListKind::Hidden, pubkey)
    }

    /// Members of a list in storage order.
    pub fn members(&self, kind: ListKind) -> Vec<Pubkey> {
        self.set(kind).iter().cloned().collect()
    }

    /// Load both lists. A list that cannot be read starts empty for this session.
    pub async fn load(storage: &dyn PreferenceStorage) -> Self {
        let mut lists = Self::new();
        for kind in [ListKind::Watchlist, ListKind::Hidden] {
            match storage.load_set(kind.storage_key()).await {
                Ok(members) => *lists.set_mut(kind) = members.into_iter().collect(),
                Err(e) => warn!("Failed to load {:?}, starting empty: {:#}", kind, e),
            }
        }
        info!(
            "Loaded {} watchlisted and {} hidden tokens",
            lists.watchlist.len(),
            lists.hidden.len()
        );
        lists
    }

    /// Write one list back to storage. Returns whether the write succeeded.
    pub async fn persist(&self, storage: &dyn PreferenceStorage, kind: ListKind) -> bool {
        match storage.save_set(kind.storage_key(), &self.members(kind)).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to persist {:?}, keeping in-memory state: {:#}", kind, e);
                false
            }
        }
    }
}
