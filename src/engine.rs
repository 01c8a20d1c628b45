//! Watch engine: for every registration and notification, decide which watches fire.
//! 1) registration files the watch and, for confirmations, checks the chain once,
//! 2) mempool transactions are matched against spend watches,
//! 3) blocks advance the height, rerun the spend pass and recheck confirmations.
use crate::{
    chain_source::{BlockNotification, ChainSource, TxStatus},
    config::{RetryConfig, WatcherConfig},
    error::WatchError,
    matcher::spend_events,
    registry::WatchRegistry,
    retry,
    sink::EventSink,
    watch::{ConfirmWatch, Watch, WatchEvent},
};
use anyhow::ensure;
use bitcoin::{absolute::LockTime, hashes::Hash, Block, BlockHash, Transaction, Txid};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Outcome of registering a watch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Registration {
    /// The condition already held; the event was delivered and nothing was filed.
    Fired,
    /// Filed and waiting for notifications.
    Pending,
    /// An identical watch is already pending; nothing changed.
    AlreadyRegistered,
    /// The watch can never fire (e.g. script mismatch); not filed.
    Rejected,
}

/// Outcome of publishing a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Publish {
    /// Handed to the node now.
    Broadcast {
        /// Whether the node took it.
        accepted: bool,
    },
    /// Held until the chain reaches the transaction's locktime height.
    Deferred {
        /// Height at which it will be broadcast.
        until: u32,
    },
}

/// Snapshot of engine state sizes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WatcherStats {
    /// Last known chain height.
    pub best_height: u32,
    /// Distinct outpoints being watched.
    pub spend_keys: usize,
    /// Spend watches across all outpoints.
    pub spend_watches: usize,
    /// Distinct txids with pending confirmation watches.
    pub confirm_keys: usize,
    /// Pending confirmation watches.
    pub confirm_watches: usize,
    /// Time-locked transactions waiting for their height.
    pub pending_publish: usize,
    /// Blocks whose spend pass is waiting on a body fetch.
    pub deferred_blocks: usize,
}

/// Core engine. `C` = chain query interface, `L` = event sink.
///
/// Not internally synchronised: one owner drives it one call at a time
/// (see [`crate::watcher::Watcher`]).
pub struct WatchEngine<C, L> {
    source: C,
    sink: L,
    config: WatcherConfig,
    registry: WatchRegistry,
    best_height: u32,
    pending_publish: BTreeMap<u32, Vec<Transaction>>,
    deferred_blocks: VecDeque<(u32, BlockHash)>,
    faults: Option<mpsc::UnboundedSender<WatchError>>,
    /// Set while a command is being handled; bounds its chain queries.
    deadline: Option<Instant>,
}

impl<C, L> WatchEngine<C, L>
where
    C: ChainSource,
    L: EventSink,
{
    /// Create an engine with empty indices and height 0.
    pub fn new(source: C, sink: L) -> Self {
        Self {
            source,
            sink,
            config: WatcherConfig::default(),
            registry: WatchRegistry::new(),
            best_height: 0,
            pending_publish: BTreeMap::new(),
            deferred_blocks: VecDeque::new(),
            faults: None,
            deadline: None,
        }
    }

    /// Replace the default configuration.
    pub fn with_config(mut self, config: WatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Forward every reported fault to `faults` in addition to logging it.
    pub fn with_fault_reporter(mut self, faults: mpsc::UnboundedSender<WatchError>) -> Self {
        self.faults = Some(faults);
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Last known chain height. Never decreases.
    pub fn best_height(&self) -> u32 {
        self.best_height
    }

    /// Read-only view of the outstanding watches.
    pub fn registry(&self) -> &WatchRegistry {
        &self.registry
    }

    /// Current state sizes.
    pub fn stats(&self) -> WatcherStats {
        WatcherStats {
            best_height: self.best_height,
            spend_keys: self.registry.spend_index().len(),
            spend_watches: self.registry.spend_watch_count(),
            confirm_keys: self.registry.confirm_index().len(),
            confirm_watches: self.registry.confirm_watch_count(),
            pending_publish: self.pending_publish.values().map(Vec::len).sum(),
            deferred_blocks: self.deferred_blocks.len(),
        }
    }

    /// Seed the best height from the node's tip.
    pub async fn bootstrap(&mut self) -> Result<u32, WatchError> {
        let tip = self.query("tip_height()", || self.source.tip_height()).await?;
        self.advance_height(tip);
        tracing::info!(height = self.best_height, "watcher bootstrapped");
        Ok(self.best_height)
    }

    /// Register a watch.
    ///
    /// Confirmation watches are checked against the chain first and fire here,
    /// without being filed, when already deep enough. If that check cannot be
    /// completed the watch is filed anyway and the fault is reported, so the
    /// next block rechecks it.
    pub async fn register(&mut self, watch: Watch) -> Registration {
        if self.registry.contains(&watch) {
            tracing::debug!(tag = %watch.tag(), "watch already registered");
            return Registration::AlreadyRegistered;
        }

        let cw = match watch {
            Watch::Spent(_) | Watch::SpentBasic(_) => {
                self.registry.add(watch);
                return Registration::Pending;
            }
            Watch::Confirmed(ref cw) => cw.clone(),
        };

        self.start_deadline();
        let checked = self.check_confirmed(&cw).await;
        self.deadline = None;

        match checked {
            Ok(Some(event)) => {
                tracing::debug!(txid = %cw.txid, tag = %cw.tag, "already confirmed, firing");
                self.sink.deliver(cw.listener, event);
                Registration::Fired
            }
            Ok(None) => {
                self.registry.add(watch);
                Registration::Pending
            }
            Err(e @ WatchError::ScriptMismatch { .. }) => {
                self.report(e);
                Registration::Rejected
            }
            Err(e) => {
                self.registry.add(watch);
                self.report(e);
                Registration::Pending
            }
        }
    }

    /// Remove one structurally-equal watch. Returns `false` if it was not registered.
    pub fn unregister(&mut self, watch: &Watch) -> bool {
        let removed = self.registry.remove(watch);
        tracing::debug!(tag = %watch.tag(), removed, "unregister");
        removed
    }

    /// A transaction showed up in the mempool. Returns the number of events fired.
    pub fn on_transaction(&mut self, tx: &Transaction) -> usize {
        if tx.input.is_empty() {
            self.report(WatchError::Malformed(format!(
                "transaction {} has no inputs",
                tx.compute_txid()
            )));
            return 0;
        }
        self.fire_spends(tx)
    }

    /// A block was connected.
    ///
    /// Blocks deferred earlier are retried first. Faults are reported, never returned:
    /// a block whose body cannot be fetched still advances the height and
    /// rechecks confirmations, and its spend pass is deferred. All chain
    /// queries made here share one [`WatcherConfig::command_deadline`].
    pub async fn on_block(&mut self, block: BlockNotification) {
        self.start_deadline();
        self.process_block(block).await;
        self.deadline = None;
    }

    async fn process_block(&mut self, block: BlockNotification) {
        let BlockNotification {
            height,
            hash,
            txdata,
        } = block;

        if txdata.is_none() && hash == BlockHash::all_zeros() {
            self.report(WatchError::Malformed(format!(
                "block at height {height} has neither body nor hash"
            )));
            return;
        }

        self.retry_deferred().await;
        self.advance_height(height);

        match txdata {
            Some(txs) => self.spend_pass(height, &txs),
            None => match self.fetch_block(hash, &self.config.retry).await {
                Ok(block) => self.spend_pass(height, &block.txdata),
                Err(e) => {
                    self.report(e);
                    self.defer(height, hash);
                }
            },
        }

        self.recheck_confirmations().await;
        self.release_publishes().await;
    }

    /// Broadcast `tx`, or hold it until the chain reaches its locktime height.
    pub async fn publish(&mut self, tx: Transaction) -> Result<Publish, WatchError> {
        if let Some(until) = lock_height(&tx) {
            if until > self.best_height {
                tracing::info!(txid = %tx.compute_txid(), until, "holding time-locked transaction");
                let queued = self.pending_publish.entry(until).or_default();
                if !queued.contains(&tx) {
                    queued.push(tx);
                }
                return Ok(Publish::Deferred { until });
            }
        }
        self.start_deadline();
        let accepted = self.broadcast(&tx).await;
        self.deadline = None;
        Ok(Publish::Broadcast {
            accepted: accepted?,
        })
    }

    /// Resolve a transaction through the chain source.
    pub async fn get_transaction(&self, txid: Txid) -> Result<Option<TxStatus>, WatchError> {
        self.resolve(txid).await
    }

    // ================================
    // Spend matching
    // ================================

    fn fire_spends(&self, tx: &Transaction) -> usize {
        let events = spend_events(&self.registry, tx);
        let fired = events.len();
        if fired == 0 {
            tracing::trace!(txid = %tx.compute_txid(), "no spend watch matched");
        }
        for (listener, event) in events {
            tracing::debug!(%listener, tag = %event.tag(), "spend seen");
            self.sink.deliver(listener, event);
        }
        fired
    }

    fn spend_pass(&self, height: u32, txs: &[Transaction]) {
        let fired: usize = txs.iter().map(|tx| self.fire_spends(tx)).sum();
        if fired > 0 {
            tracing::debug!(height, fired, "spend events from block");
        }
    }

    // ================================
    // Confirmations
    // ================================

    async fn check_confirmed(&self, cw: &ConfirmWatch) -> Result<Option<WatchEvent>, WatchError> {
        let depth = self.depth_of(cw.txid).await?;
        if depth < cw.min_depth {
            return Ok(None);
        }
        match self.resolve(cw.txid).await? {
            Some(status) => confirmed_event(cw, &status),
            None => Ok(None),
        }
    }

    async fn recheck_confirmations(&mut self) {
        let txids = self.registry.confirm_txids();
        if txids.is_empty() {
            return;
        }

        let width = self.config.max_concurrent_queries.max(1);

        // (a) depths for every watched txid, a bounded number at a time
        let depth_queries: Vec<_> = txids.iter().map(|txid| self.depth_of(*txid)).collect();
        let depths: Vec<_> = stream::iter(depth_queries)
            .buffered(width)
            .collect()
            .await;
        let mut due = Vec::new();
        for (txid, depth) in txids.into_iter().zip(depths) {
            match depth {
                Ok(depth) => {
                    let ready = self.registry.satisfied(&txid, depth);
                    if !ready.is_empty() {
                        due.push((txid, ready));
                    }
                }
                // stays pending, rechecked next block
                Err(e) => self.report(e),
            }
        }
        if due.is_empty() {
            return;
        }

        // (b) resolve each txid that has something to fire, once
        let status_queries: Vec<_> = due.iter().map(|(txid, _)| self.resolve(*txid)).collect();
        let statuses: Vec<_> = stream::iter(status_queries)
            .buffered(width)
            .collect()
            .await;

        // (c) fire and drop one-shot watches
        for ((txid, ready), status) in due.into_iter().zip(statuses) {
            let status = match status {
                Ok(Some(status)) => status,
                Ok(None) => {
                    tracing::debug!(%txid, "transaction vanished between queries");
                    continue;
                }
                Err(e) => {
                    self.report(e);
                    continue;
                }
            };
            for cw in ready {
                match confirmed_event(&cw, &status) {
                    Ok(Some(event)) => {
                        self.registry.remove(&Watch::Confirmed(cw.clone()));
                        tracing::debug!(%txid, tag = %cw.tag, depth = cw.min_depth, "confirmed");
                        self.sink.deliver(cw.listener, event);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        self.registry.remove(&Watch::Confirmed(cw));
                        self.report(e);
                    }
                }
            }
        }
    }

    // ================================
    // Blocks and publishing
    // ================================

    fn advance_height(&mut self, height: u32) {
        if height > self.best_height {
            self.best_height = height;
        } else {
            tracing::trace!(height, best = self.best_height, "height not advanced");
        }
    }

    fn defer(&mut self, height: u32, hash: BlockHash) {
        tracing::warn!(height, %hash, "deferring block spend pass");
        self.deferred_blocks.push_back((height, hash));
        while self.deferred_blocks.len() > self.config.max_deferred_blocks {
            if let Some((height, hash)) = self.deferred_blocks.pop_front() {
                self.report(WatchError::BlockDropped { height, hash });
            }
        }
    }

    /// Replays deferred blocks oldest first, one attempt each, stopping at
    /// the first failure so a dead node costs one query timeout per block.
    async fn retry_deferred(&mut self) {
        let single = RetryConfig::none();
        while let Some(&(height, hash)) = self.deferred_blocks.front() {
            match self.fetch_block(hash, &single).await {
                Ok(block) => {
                    self.deferred_blocks.pop_front();
                    tracing::info!(height, %hash, "deferred block fetched");
                    self.spend_pass(height, &block.txdata);
                }
                Err(e) => {
                    tracing::warn!(
                        height,
                        %hash,
                        waiting = self.deferred_blocks.len(),
                        "deferred block still unavailable"
                    );
                    self.report(e);
                    break;
                }
            }
        }
    }

    async fn release_publishes(&mut self) {
        let later = self
            .pending_publish
            .split_off(&self.best_height.saturating_add(1));
        let due = std::mem::replace(&mut self.pending_publish, later);

        for (until, txs) in due {
            for tx in txs {
                match self.broadcast(&tx).await {
                    Ok(accepted) => {
                        let txid = tx.compute_txid();
                        tracing::info!(%txid, until, accepted, "released time-locked transaction");
                    }
                    Err(e) => {
                        self.report(e);
                        self.pending_publish
                            .entry(self.best_height)
                            .or_default()
                            .push(tx);
                    }
                }
            }
        }
    }

    // ================================
    // Chain queries
    // ================================

    fn start_deadline(&mut self) {
        self.deadline = Some(Instant::now() + self.config.command_deadline);
    }

    async fn query<T, F, Fut>(&self, what: &str, op: F) -> Result<T, WatchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.query_with(&self.config.retry, what, op).await
    }

    async fn query_with<T, F, Fut>(
        &self,
        retry: &RetryConfig,
        what: &str,
        op: F,
    ) -> Result<T, WatchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        retry::query(retry, self.config.query_timeout, self.deadline, what, op).await
    }

    async fn depth_of(&self, txid: Txid) -> Result<u32, WatchError> {
        let what = format!("confirmations({txid})");
        self.query(&what, || self.source.confirmations(txid)).await
    }

    async fn resolve(&self, txid: Txid) -> Result<Option<TxStatus>, WatchError> {
        let what = format!("get_transaction({txid})");
        self.query(&what, || self.source.get_transaction(txid)).await
    }

    async fn fetch_block(
        &self,
        hash: BlockHash,
        retry: &RetryConfig,
    ) -> Result<Block, WatchError> {
        let what = format!("get_block({hash})");
        self.query_with(retry, &what, || async move {
            let block = self.source.get_block(hash).await?;
            ensure!(
                block.block_hash() == hash,
                "node returned block {} for {hash}",
                block.block_hash()
            );
            Ok::<_, anyhow::Error>(block)
        })
        .await
    }

    async fn broadcast(&self, tx: &Transaction) -> Result<bool, WatchError> {
        let what = format!("broadcast({})", tx.compute_txid());
        let accepted = self.query(&what, || self.source.broadcast(tx)).await?;
        if !accepted {
            tracing::warn!(txid = %tx.compute_txid(), "node rejected transaction");
        }
        Ok(accepted)
    }

    fn report(&self, err: WatchError) {
        match &err {
            WatchError::Malformed(_) => tracing::warn!(error = %err, "dropping notification"),
            _ => tracing::error!(error = %err, "watcher fault"),
        }
        if let Some(faults) = &self.faults {
            let _ = faults.send(err);
        }
    }
}

fn confirmed_event(cw: &ConfirmWatch, status: &TxStatus) -> Result<Option<WatchEvent>, WatchError> {
    // reorged out between the depth query and resolution
    let Some((height, block_hash)) = status.confirmed_at else {
        return Ok(None);
    };
    if !cw.script.is_empty()
        && !status
            .tx
            .output
            .iter()
            .any(|out| out.script_pubkey == cw.script)
    {
        return Err(WatchError::ScriptMismatch { txid: cw.txid });
    }
    Ok(Some(WatchEvent::Confirmed {
        tag: cw.tag.clone(),
        tx: status.tx.clone(),
        height,
        block_hash,
    }))
}

/// Height a transaction's locktime waits for, if it is height-based and enforced.
fn lock_height(tx: &Transaction) -> Option<u32> {
    if !tx.is_lock_time_enabled() {
        return None;
    }
    match tx.lock_time {
        LockTime::Blocks(h) => Some(h.to_consensus_u32()),
        LockTime::Seconds(_) => None,
    }
}
