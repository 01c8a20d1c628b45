//! Error types surfaced by the watcher.
use bitcoin::{BlockHash, Txid};
use thiserror::Error;

/// Faults the engine reports upward. None of them stop the watcher.
#[derive(Debug, Error)]
pub enum WatchError {
    /// A chain query kept failing (or timing out) through every retry.
    #[error("chain query `{what}` failed after {attempts} attempt(s)")]
    QueryFailed {
        /// Which query, e.g. `confirmations(<txid>)`.
        what: String,
        /// Attempts made, including the first.
        attempts: usize,
        /// Last underlying error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// A notification that cannot be matched; dropped without touching state.
    #[error("malformed notification: {0}")]
    Malformed(String),

    /// A watched transaction confirmed without paying to the expected script.
    #[error("transaction {txid} has no output with the watched script")]
    ScriptMismatch {
        /// The transaction that confirmed.
        txid: Txid,
    },

    /// The deferred-block queue overflowed and this block's spend pass was abandoned.
    #[error("block {hash} at height {height} dropped from the deferred queue")]
    BlockDropped {
        /// Height of the abandoned block.
        height: u32,
        /// Hash of the abandoned block.
        hash: BlockHash,
    },

    /// The watcher task is no longer running.
    #[error("watcher is closed")]
    Closed,
}
