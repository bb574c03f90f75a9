//! Market feed orchestrator.
//!
//! `MarketFeed` runs a single event loop that owns the token store, the user
//! lists, the filter parameters and the freeze controller. It is the only writer
//! of all of them. `FeedHandle` is the cloneable front door used by everything
//! else: it sends commands into the loop and reads the published view.

use crate::feed::filter::filter_and_sort;
use crate::feed::freeze::{FreezeController, FreezeState};
use crate::feed::ingestion::IngestionChannel;
use crate::feed::lists::{ListKind, UserLists};
use crate::feed::metadata::MetadataResolver;
use crate::feed::storage::PreferenceStorage;
use crate::feed::token_store::{ApplyOutcome, StoreStats, TokenStore};
use crate::feed::types::{
    FeedCommand, FeedCommandReceiver, FeedCommandSender, FeedConfig, FilterParams, Inbound,
    InboundReceiver, InboundSender,
};
use crate::types::{Pubkey, TokenEvent, TokenMarketData};
use anyhow::{anyhow, bail, Context, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

/// Cloneable handle to a running `MarketFeed`.
#[derive(Clone)]
pub struct FeedHandle {
    command_tx: FeedCommandSender,
    inbound_tx: InboundSender,
    view_rx: watch::Receiver<Vec<TokenMarketData>>,
    state_rx: watch::Receiver<FreezeState>,
}

impl FeedHandle {
    async fn send(&self, command: FeedCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| anyhow!("Market feed is not running"))
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> FeedCommand) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(command(reply_tx)).await?;
        reply_rx.await.context("Market feed stopped before replying")
    }

    /// Flip watchlist membership. Returns the new membership.
    pub async fn toggle_watchlist(&self, pubkey: impl Into<Pubkey>) -> Result<bool> {
        let pubkey = pubkey.into();
        self.request(|reply| FeedCommand::ToggleWatchlist(pubkey, reply)).await
    }

    /// Flip hidden membership. Returns the new membership.
    pub async fn toggle_hidden(&self, pubkey: impl Into<Pubkey>) -> Result<bool> {
        let pubkey = pubkey.into();
        self.request(|reply| FeedCommand::ToggleHidden(pubkey, reply)).await
    }

    pub async fn set_filter(&self, params: FilterParams) -> Result<()> {
        self.send(FeedCommand::SetFilter(params)).await
    }

    /// External freeze signal (e.g. pointer enter / leave).
    pub async fn set_frozen(&self, frozen: bool) -> Result<()> {
        self.send(FeedCommand::SetFrozen(frozen)).await
    }

    /// Zero volume counters for one token, or all tokens when `pubkey` is `None`.
    pub async fn reset_volumes(&self, pubkey: Option<Pubkey>) -> Result<()> {
        self.send(FeedCommand::ResetVolumes(pubkey)).await
    }

    /// Queue a raw frame as if it came from the live connection.
    pub async fn push_frame(&self, frame: impl Into<String>) -> Result<()> {
        self.inbound_tx
            .send(Inbound::Frame(frame.into()))
            .await
            .map_err(|_| anyhow!("Market feed is not running"))
    }

    /// Queue an already validated event.
    pub async fn push_event(&self, event: TokenEvent) -> Result<()> {
        self.inbound_tx
            .send(Inbound::Event(event))
            .await
            .map_err(|_| anyhow!("Market feed is not running"))
    }

    pub async fn token(&self, pubkey: impl Into<Pubkey>) -> Result<Option<TokenMarketData>> {
        let pubkey = pubkey.into();
        self.request(|reply| FeedCommand::Token(pubkey, reply)).await
    }

    pub async fn lists(&self) -> Result<UserLists> {
        self.request(FeedCommand::Lists).await
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        self.request(FeedCommand::Stats).await
    }

    /// Stop the feed loop and close the live connection. Waits for teardown.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(FeedCommand::Shutdown).await
    }

    /// The view currently published for rendering.
    pub fn view(&self) -> Vec<TokenMarketData> {
        self.view_rx.borrow().clone()
    }

    /// Receiver notified on every published view.
    pub fn subscribe_view(&self) -> watch::Receiver<Vec<TokenMarketData>> {
        self.view_rx.clone()
    }

    pub fn freeze_state(&self) -> FreezeState {
        *self.state_rx.borrow()
    }

    /// Receiver notified on every freeze state change. The view matching the new
    /// state is published before the state itself.
    pub fn subscribe_freeze_state(&self) -> watch::Receiver<FreezeState> {
        self.state_rx.clone()
    }
}

/// Upper bound on inbound items applied per loop turn before commands get a chance.
const INBOUND_BATCH: usize = 256;

/// The live token feed.
pub struct MarketFeed {
    config: FeedConfig,
    store: TokenStore,
    lists: UserLists,
    filter: FilterParams,
    freeze: FreezeController<TokenMarketData>,
    storage: Arc<dyn PreferenceStorage>,
    resolver: Option<Arc<MetadataResolver>>,
    backfills: JoinSet<()>,
    ingestion: Option<IngestionChannel>,
    inbound_tx: InboundSender,
    inbound_rx: InboundReceiver,
    command_rx: FeedCommandReceiver,
    view_tx: watch::Sender<Vec<TokenMarketData>>,
    state_tx: watch::Sender<FreezeState>,
}

impl MarketFeed {
    /// Create the feed and its handle. Loads the user lists once from `storage`.
    pub async fn new(
        config: FeedConfig,
        storage: Arc<dyn PreferenceStorage>,
    ) -> Result<(Self, FeedHandle)> {
        if config.view_limit == 0 {
            bail!("view_limit must be at least 1");
        }

        let resolver = match &config.metadata_endpoint {
            Some(endpoint) => Some(Arc::new(MetadataResolver::new(endpoint.clone(), &config)?)),
            None => None,
        };

        let lists = UserLists::load(storage.as_ref()).await;

        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_buffer.max(1));
        let (command_tx, command_rx) = mpsc::channel(config.command_buffer.max(1));
        let (view_tx, view_rx) = watch::channel(Vec::new());
        let (state_tx, state_rx) = watch::channel(FreezeState::Live);

        let handle = FeedHandle {
            command_tx,
            inbound_tx: inbound_tx.clone(),
            view_rx,
            state_rx,
        };

        let feed = Self {
            config,
            store: TokenStore::new(),
            lists,
            filter: FilterParams::default(),
            freeze: FreezeController::new(),
            storage,
            resolver,
            backfills: JoinSet::new(),
            ingestion: None,
            inbound_tx,
            inbound_rx,
            command_rx,
            view_tx,
            state_tx,
        };

        Ok((feed, handle))
    }

    /// Open the live connection. At most one connection is active per feed.
    pub async fn connect(&mut self) -> Result<()> {
        if self.ingestion.as_ref().is_some_and(|channel| channel.is_active()) {
            bail!("Ingestion channel is already connected");
        }
        let url = self
            .config
            .ws_url
            .clone()
            .ok_or_else(|| anyhow!("No feed URL configured"))?;

        let channel = IngestionChannel::connect(
            &url,
            self.config.subscribe_message.clone(),
            self.inbound_tx.clone(),
        )
        .await?;
        self.ingestion = Some(channel);
        Ok(())
    }

    /// Main execution loop. Connects if a feed URL is configured, then processes
    /// inbound frames and commands until shutdown or until every handle is dropped.
    ///
    /// Before a command is handled, every frame queued at that moment is applied,
    /// so a command observes all frames pushed ahead of it.
    #[instrument(skip(self))]
    pub async fn run(mut self) -> Result<()> {
        if self.config.ws_url.is_some() {
            self.connect().await?;
        }
        info!("MarketFeed is running...");
        self.publish();

        let shutdown_reply = loop {
            tokio::select! {
                Some(inbound) = self.inbound_rx.recv() => self.apply_batch(inbound),
                command = self.command_rx.recv() => {
                    let Some(command) = command else {
                        info!("All feed handles dropped. Shutting down.");
                        break None;
                    };
                    self.drain_queued();
                    if let Some(reply) = self.handle_command(command).await {
                        break Some(reply);
                    }
                }
                Some(finished) = self.backfills.join_next(), if !self.backfills.is_empty() => {
                    if let Err(e) = finished {
                        warn!("Metadata backfill task failed: {}", e);
                    }
                }
            }
        };

        self.teardown().await;
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
        Ok(())
    }

    async fn teardown(&mut self) {
        // Closing the queue first unblocks a pump waiting on a full buffer.
        self.inbound_rx.close();

        let pending = self.backfills.len();
        self.backfills.abort_all();
        while self.backfills.join_next().await.is_some() {}
        if pending > 0 {
            debug!("Cancelled {} metadata backfills", pending);
        }

        if let Some(mut channel) = self.ingestion.take() {
            channel.close().await;
        }
        info!(
            "MarketFeed stopped with {} tokens ({:?})",
            self.store.len(),
            self.store.stats()
        );
    }

    /// Apply `first` plus whatever else is ready, up to `INBOUND_BATCH`, then recompute once.
    fn apply_batch(&mut self, first: Inbound) {
        let mut changed = self.apply_inbound(first);
        for _ in 1..INBOUND_BATCH {
            match self.inbound_rx.try_recv() {
                Ok(inbound) => changed |= self.apply_inbound(inbound),
                Err(_) => break,
            }
        }
        if changed {
            self.recompute();
        }
    }

    /// Apply exactly the items queued right now. Items arriving meanwhile wait.
    fn drain_queued(&mut self) {
        let queued = self.inbound_rx.len();
        let mut changed = false;
        for _ in 0..queued {
            match self.inbound_rx.try_recv() {
                Ok(inbound) => changed |= self.apply_inbound(inbound),
                Err(_) => break,
            }
        }
        if changed {
            self.recompute();
        }
    }

    /// Mutate the store. Returns whether the view needs recomputing.
    fn apply_inbound(&mut self, inbound: Inbound) -> bool {
        match inbound {
            Inbound::Frame(frame) => match self.store.ingest_frame(&frame) {
                Some((pubkey, outcome)) => {
                    self.after_apply(&pubkey, outcome);
                    true
                }
                None => false,
            },
            Inbound::Event(event) => {
                let pubkey = event.pubkey.clone();
                let outcome = self.store.apply_event(event);
                self.after_apply(&pubkey, outcome);
                true
            }
            Inbound::Metadata(metadata) => self.store.apply_metadata(&metadata),
            Inbound::Disconnected(reason) => {
                warn!("Live feed disconnected: {}", reason);
                false
            }
        }
    }

    fn after_apply(&mut self, pubkey: &str, outcome: ApplyOutcome) {
        if outcome == ApplyOutcome::Inserted {
            self.request_backfill(pubkey);
        }
    }

    /// Look up metadata off-loop for tokens first seen without a name or symbol.
    fn request_backfill(&mut self, pubkey: &str) {
        let Some(resolver) = self.resolver.clone() else {
            return;
        };
        let needs_backfill = self
            .store
            .get(pubkey)
            .is_some_and(|token| token.name.is_empty() || token.symbol.is_empty());
        if !needs_backfill {
            return;
        }
        if self.backfills.len() >= self.config.max_pending_backfills {
            debug!("Backfill queue full, skipping metadata for {}", pubkey);
            return;
        }

        let inbound_tx = self.inbound_tx.clone();
        let pubkey = pubkey.to_string();
        self.backfills.spawn(async move {
            match resolver.resolve(&pubkey).await {
                Ok(metadata) => {
                    if inbound_tx.send(Inbound::Metadata(metadata)).await.is_err() {
                        debug!("Feed stopped before metadata for {} was applied", pubkey);
                    }
                }
                Err(e) => debug!("Metadata backfill for {} failed: {:#}", pubkey, e),
            }
        });
    }

    /// Handle one command. Returns the reply channel when the command is a shutdown.
    async fn handle_command(&mut self, command: FeedCommand) -> Option<oneshot::Sender<()>> {
        match command {
            FeedCommand::ToggleWatchlist(pubkey, reply) => {
                let member = self.toggle(ListKind::Watchlist, &pubkey).await;
                let _ = reply.send(member);
            }
            FeedCommand::ToggleHidden(pubkey, reply) => {
                let member = self.toggle(ListKind::Hidden, &pubkey).await;
                let _ = reply.send(member);
            }
            FeedCommand::SetFilter(params) => {
                debug!("Filter changed: {:?}", params);
                self.filter = params;
                self.recompute();
            }
            FeedCommand::SetFrozen(frozen) => {
                if self.freeze.set_frozen(frozen) {
                    debug!("View is now {:?}", self.freeze.state());
                    self.publish();
                    self.state_tx.send_replace(self.freeze.state());
                }
            }
            FeedCommand::ResetVolumes(pubkey) => {
                let reset = self.store.reset_volumes(pubkey.as_deref());
                info!("Reset volumes of {} tokens", reset);
                if reset > 0 {
                    self.recompute();
                }
            }
            FeedCommand::Token(pubkey, reply) => {
                let _ = reply.send(self.store.get(&pubkey).cloned());
            }
            FeedCommand::Lists(reply) => {
                let _ = reply.send(self.lists.clone());
            }
            FeedCommand::Stats(reply) => {
                let _ = reply.send(self.store.stats());
            }
            FeedCommand::Shutdown(reply) => return Some(reply),
        }
        None
    }

    async fn toggle(&mut self, kind: ListKind, pubkey: &str) -> bool {
        let member = self.lists.toggle(kind, pubkey);
        info!("{} {} {:?}", pubkey, if member { "added to" } else { "removed from" }, kind);
        self.lists.persist(self.storage.as_ref(), kind).await;
        self.recompute();
        member
    }

    fn recompute(&mut self) {
        let view = filter_and_sort(
            self.store.values(),
            &self.filter,
            &self.lists,
            self.config.ranking_policy,
            self.config.view_limit,
        );
        if self.freeze.offer(view) {
            self.publish();
        }
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.freeze.displayed().to_vec());
    }
}
