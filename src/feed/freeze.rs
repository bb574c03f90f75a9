//! Freeze/snapshot controller - a two-state machine that decouples the displayed
//! view from live recomputation.

use serde::{Deserialize, Serialize};

/// State of the displayed view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FreezeState {
    /// Every newly computed view is displayed immediately
    #[default]
    Live,
    /// The snapshot taken at freeze time is displayed until release
    Frozen,
}

/// Holds the latest live view and, while frozen, the snapshot being displayed.
#[derive(Debug, Clone)]
pub struct FreezeController<T: Clone> {
    state: FreezeState,
    latest: Vec<T>,
    held: Option<Vec<T>>,
}

impl<T: Clone> FreezeController<T> {
    pub fn new() -> Self {
        Self {
            state: FreezeState::Live,
            latest: Vec::new(),
            held: None,
        }
    }

    pub fn state(&self) -> FreezeState {
        self.state
    }

    pub fn is_frozen(&self) -> bool {
        self.state == FreezeState::Frozen
    }

    /// Record a freshly computed view. Returns true when the displayed view changed.
    pub fn offer(&mut self, view: Vec<T>) -> bool {
        self.latest = view;
        !self.is_frozen()
    }

    /// LIVE -> FROZEN. Copies the current live view. Returns false if already frozen.
    pub fn freeze(&mut self) -> bool {
        if self.is_frozen() {
            return false;
        }
        self.held = Some(self.latest.clone());
        self.state = FreezeState::Frozen;
        true
    }

    /// FROZEN -> LIVE. Drops the snapshot and adopts the latest live view.
    /// Returns false if already live.
    pub fn unfreeze(&mut self) -> bool {
        if !self.is_frozen() {
            return false;
        }
        self.held = None;
        self.state = FreezeState::Live;
        true
    }

    /// Apply an external signal. Returns true when the state changed.
    pub fn set_frozen(&mut self, frozen: bool) -> bool {
        if frozen {
            self.freeze()
        } else {
            self.unfreeze()
        }
    }

    /// The view that should be rendered right now.
    pub fn displayed(&self) -> &[T] {
        self.held.as_deref().unwrap_or(&self.latest)
    }

    /// The most recent live view, regardless of state.
    pub fn latest(&self) -> &[T] {
        &self.latest
    }
}

impl<T: Clone> Default for FreezeController<T> {
    fn default() -> Self {
        Self::new()
    }
}
