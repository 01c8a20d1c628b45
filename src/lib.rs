#![forbid(unsafe_code)]
#![deny(missing_docs)]
//! chain-watcher: spend and confirmation watches over a Bitcoin node for
//! payment-channel state machines.
//!
//! ## What you implement
//! - [`ChainSource`]: resolve transactions, fetch blocks, report the tip, broadcast.
//! - [`EventSink`]: receive fired events per listener (or use [`ChannelSink`]).
//! - Feed the [`WatcherHandle`] with mempool transactions and connected blocks
//!   from whatever transport you run (ZMQ, Electrum, P2P).
//!
//! ## What the watcher does
//! - Keeps spend watches keyed by outpoint and confirmation watches keyed by txid.
//! - Reports a spend every time it becomes visible: once from the mempool and
//!   again when it is mined.
//! - Fires confirmation watches once, as soon as the node reports enough depth,
//!   including at registration time.
//! - Retries failing chain queries with backoff and reports faults without stopping.
//!
//! ## Minimal usage
//! ```rust,ignore
//! use chain_watcher::prelude::*;
//! use bitcoin::{Block, BlockHash, Transaction, Txid};
//! use async_trait::async_trait;
//! use std::sync::Arc;
//!
//! struct MyNode;
//! #[async_trait]
//! impl ChainSource for MyNode {
//!     async fn get_transaction(&self, _txid: Txid) -> anyhow::Result<Option<TxStatus>> { Ok(None) }
//!     async fn tip_height(&self) -> anyhow::Result<u32> { Ok(0) }
//!     async fn get_block(&self, _hash: BlockHash) -> anyhow::Result<Block> { anyhow::bail!("unknown") }
//!     async fn broadcast(&self, _tx: &Transaction) -> anyhow::Result<bool> { Ok(true) }
//! }
//!
//! async fn run(funding: Txid) -> anyhow::Result<()> {
//!     let sink = Arc::new(ChannelSink::new());
//!     let mut events = sink.subscribe(ListenerId(1));
//!     let (watcher, _task) = Watcher::spawn(WatchEngine::new(MyNode, sink));
//!
//!     let watch = SpendWatch::new(ListenerId(1), funding, 0, "funding-spent");
//!     watcher.register(Watch::Spent(watch)).await?;
//!
//!     while let Some(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//!     Ok(())
//! }
//! ```
/// Chain query interface and notification types.
pub mod chain_source;

/// Watcher and retry configuration.
pub mod config;

/// Event derivation: registration, mempool and block handling.
pub mod engine;

/// Fault taxonomy.
pub mod error;

/// Spend matching of a transaction against the registry.
pub mod matcher;

/// Outstanding watches indexed by outpoint and txid.
pub mod registry;

/// Event delivery to listeners.
pub mod sink;

/// Watch and event values.
pub mod watch;

/// Actor owning the engine, and its handle.
pub mod watcher;

// Internal helpers:
mod retry;

// Public re-exports
pub use chain_source::{BlockNotification, ChainSource, TxStatus};
pub use config::{RetryConfig, WatcherConfig};
pub use engine::{Publish, Registration, WatchEngine, WatcherStats};
pub use error::WatchError;
pub use registry::WatchRegistry;
pub use sink::{ChannelSink, EventSink};
pub use watch::{ConfirmWatch, ListenerId, SpendWatch, Tag, Watch, WatchEvent, WatchKey};
pub use watcher::{Watcher, WatcherHandle};

/// Convenience prelude for end users.
pub mod prelude {
    pub use crate::{
        BlockNotification, ChainSource, ChannelSink, ConfirmWatch, EventSink, ListenerId,
        Publish, Registration, SpendWatch, Tag, TxStatus, Watch, WatchEngine, WatchEvent,
        Watcher, WatcherConfig, WatcherHandle,
    };
}
