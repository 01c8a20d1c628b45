//! Single-consumer actor around [`WatchEngine`].
//!
//! Registrations, unregistrations and both kinds of chain notification go
//! through one bounded inbox and are processed strictly one at a time, so a
//! notification never observes another one half-applied. Chain queries issued
//! while handling a command are awaited before the next command is taken.
use crate::{
    chain_source::{BlockNotification, ChainSource, TxStatus},
    engine::{Publish, Registration, WatchEngine, WatcherStats},
    error::WatchError,
    sink::EventSink,
    watch::Watch,
};
use bitcoin::{Transaction, Txid};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Messages accepted by the watcher inbox.
#[derive(Debug)]
pub(crate) enum Command {
    /// Register a watch and report how it was handled.
    Register {
        /// The watch.
        watch: Watch,
        /// Outcome.
        reply: oneshot::Sender<Registration>,
    },
    /// Remove a watch; replies whether it was present.
    Unregister {
        /// The watch.
        watch: Watch,
        /// Whether it was registered.
        reply: oneshot::Sender<bool>,
    },
    /// Mempool sighting.
    NewTransaction(Transaction),
    /// Block connected.
    NewBlock(BlockNotification),
    /// Broadcast now or at the transaction's locktime height.
    Publish {
        /// The transaction.
        tx: Transaction,
        /// Outcome.
        reply: oneshot::Sender<Result<Publish, WatchError>>,
    },
    /// Look a transaction up through the chain source.
    GetTransaction {
        /// Id to resolve.
        txid: Txid,
        /// Result.
        reply: oneshot::Sender<Result<Option<TxStatus>, WatchError>>,
    },
    /// Read the best height.
    BestHeight(oneshot::Sender<u32>),
    /// Read state sizes.
    Stats(oneshot::Sender<WatcherStats>),
    /// Stop after the commands queued before this one.
    Shutdown,
}

/// Owns the engine and drains the inbox.
pub struct Watcher<C, L> {
    engine: WatchEngine<C, L>,
    inbox: mpsc::Receiver<Command>,
}

impl<C, L> Watcher<C, L>
where
    C: ChainSource + 'static,
    L: EventSink + 'static,
{
    /// Spawn the actor on the current tokio runtime.
    ///
    /// The inbox capacity comes from the engine's configuration. The task
    /// seeds the best height from the chain source before taking commands.
    pub fn spawn(engine: WatchEngine<C, L>) -> (WatcherHandle, JoinHandle<()>) {
        let (tx, inbox) = mpsc::channel(engine.config().inbox_capacity);
        let watcher = Self { engine, inbox };
        let task = tokio::spawn(watcher.run());
        (WatcherHandle { tx }, task)
    }

    async fn run(mut self) {
        tracing::info!("watcher started");
        if let Err(e) = self.engine.bootstrap().await {
            tracing::warn!(error = %e, "bootstrap failed, waiting for first block");
        }

        while let Some(cmd) = self.inbox.recv().await {
            if !self.handle(cmd).await {
                break;
            }
        }
        tracing::info!(stats = ?self.engine.stats(), "watcher stopped");
    }

    /// Returns `false` when the actor should stop.
    async fn handle(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Register { watch, reply } => {
                let outcome = self.engine.register(watch).await;
                let _ = reply.send(outcome);
            }
            Command::Unregister { watch, reply } => {
                let _ = reply.send(self.engine.unregister(&watch));
            }
            Command::NewTransaction(tx) => {
                self.engine.on_transaction(&tx);
            }
            Command::NewBlock(block) => {
                self.engine.on_block(block).await;
            }
            Command::Publish { tx, reply } => {
                let _ = reply.send(self.engine.publish(tx).await);
            }
            Command::GetTransaction { txid, reply } => {
                let _ = reply.send(self.engine.get_transaction(txid).await);
            }
            Command::BestHeight(reply) => {
                let _ = reply.send(self.engine.best_height());
            }
            Command::Stats(reply) => {
                let _ = reply.send(self.engine.stats());
            }
            Command::Shutdown => return false,
        }
        true
    }
}

/// Cloneable front door to a running [`Watcher`].
#[derive(Clone, Debug)]
pub struct WatcherHandle {
    tx: mpsc::Sender<Command>,
}

impl WatcherHandle {
    /// Register `watch`. Resolves once the watcher has processed it, which for
    /// an already-satisfied confirmation watch is after its event was delivered.
    pub async fn register(&self, watch: Watch) -> Result<Registration, WatchError> {
        self.ask(|reply| Command::Register { watch, reply }).await
    }

    /// Unregister `watch`; `Ok(false)` if it was not registered.
    pub async fn unregister(&self, watch: Watch) -> Result<bool, WatchError> {
        self.ask(|reply| Command::Unregister { watch, reply }).await
    }

    /// Push a mempool sighting.
    pub async fn notify_transaction(&self, tx: Transaction) -> Result<(), WatchError> {
        self.send(Command::NewTransaction(tx)).await
    }

    /// Push a connected block.
    pub async fn notify_block(&self, block: BlockNotification) -> Result<(), WatchError> {
        self.send(Command::NewBlock(block)).await
    }

    /// Broadcast `tx`, or hold it until its locktime height.
    pub async fn publish(&self, tx: Transaction) -> Result<Publish, WatchError> {
        self.ask(|reply| Command::Publish { tx, reply }).await?
    }

    /// Resolve a transaction through the watcher's chain source.
    pub async fn get_transaction(&self, txid: Txid) -> Result<Option<TxStatus>, WatchError> {
        self.ask(|reply| Command::GetTransaction { txid, reply }).await?
    }

    /// Best height as seen by the watcher.
    pub async fn best_height(&self) -> Result<u32, WatchError> {
        self.ask(Command::BestHeight).await
    }

    /// State sizes.
    pub async fn stats(&self) -> Result<WatcherStats, WatchError> {
        self.ask(Command::Stats).await
    }

    /// Ask the watcher to stop once everything queued so far is processed.
    pub async fn shutdown(&self) -> Result<(), WatchError> {
        self.send(Command::Shutdown).await
    }

    async fn send(&self, cmd: Command) -> Result<(), WatchError> {
        self.tx.send(cmd).await.map_err(|_| WatchError::Closed)
    }

    async fn ask<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, WatchError> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply)).await?;
        rx.await.map_err(|_| WatchError::Closed)
    }
}
