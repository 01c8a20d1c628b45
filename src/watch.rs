//! Watch and event values exchanged between callers, the engine and listeners.
//!
//! Every type here is an immutable value compared by structure: two watches
//! with the same fields are the same watch, which is what makes registration
//! idempotent.
use bitcoin::{BlockHash, OutPoint, ScriptBuf, Transaction, Txid};
use std::fmt;

/// Opaque handle naming the listener a watch delivers its events to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// Correlation tag carried from a watch into each event it produces.
///
/// The engine never interprets the bytes.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Tag(Vec<u8>);

impl Tag {
    /// Wrap arbitrary bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Raw tag bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Tag {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({})", hex::encode(&self.0))
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

/// Watch on one output of one transaction being spent.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SpendWatch {
    /// Where events go.
    pub listener: ListenerId,
    /// Transaction holding the watched output.
    pub txid: Txid,
    /// Output index inside `txid`.
    pub vout: u32,
    /// Echoed back in every event.
    pub tag: Tag,
    /// Full parent transaction, when the caller has it instead of a bare id.
    pub parent: Option<Transaction>,
}

impl SpendWatch {
    /// Watch output `vout` of `txid`.
    pub fn new(listener: ListenerId, txid: Txid, vout: u32, tag: impl Into<Tag>) -> Self {
        Self {
            listener,
            txid,
            vout,
            tag: tag.into(),
            parent: None,
        }
    }

    /// Watch output `vout` of `parent`, deriving the txid from the transaction itself.
    pub fn on_output_of(
        listener: ListenerId,
        parent: Transaction,
        vout: u32,
        tag: impl Into<Tag>,
    ) -> Self {
        Self {
            listener,
            txid: parent.compute_txid(),
            vout,
            tag: tag.into(),
            parent: Some(parent),
        }
    }

    /// The outpoint this watch is keyed by.
    ///
    /// A carried parent transaction wins over the stored id so both
    /// construction paths land on the same key.
    pub fn outpoint(&self) -> OutPoint {
        let txid = self
            .parent
            .as_ref()
            .map(Transaction::compute_txid)
            .unwrap_or(self.txid);
        OutPoint::new(txid, self.vout)
    }
}

/// Watch on a transaction reaching a minimum confirmation depth.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConfirmWatch {
    /// Where events go.
    pub listener: ListenerId,
    /// Transaction to follow.
    pub txid: Txid,
    /// Output script the transaction is expected to pay to. Empty skips the check.
    pub script: ScriptBuf,
    /// Required depth, at least 1.
    pub min_depth: u32,
    /// Echoed back in the event.
    pub tag: Tag,
}

impl ConfirmWatch {
    /// Watch `txid` until it is buried `min_depth` blocks deep (0 is treated as 1).
    pub fn new(
        listener: ListenerId,
        txid: Txid,
        script: ScriptBuf,
        min_depth: u32,
        tag: impl Into<Tag>,
    ) -> Self {
        Self {
            listener,
            txid,
            script,
            min_depth: min_depth.max(1),
            tag: tag.into(),
        }
    }
}

/// A standing request registered with the engine.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Watch {
    /// Report spends with the full spending transaction.
    Spent(SpendWatch),
    /// Report spends with only the spending txid.
    SpentBasic(SpendWatch),
    /// One-shot confirmation depth watch.
    Confirmed(ConfirmWatch),
}

/// Index key a watch is filed under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WatchKey {
    /// Spend watches.
    Outpoint(OutPoint),
    /// Confirmation watches.
    Txid(Txid),
}

impl Watch {
    /// Listener receiving this watch's events.
    pub fn listener(&self) -> ListenerId {
        match self {
            Watch::Spent(w) | Watch::SpentBasic(w) => w.listener,
            Watch::Confirmed(w) => w.listener,
        }
    }

    /// Correlation tag.
    pub fn tag(&self) -> &Tag {
        match self {
            Watch::Spent(w) | Watch::SpentBasic(w) => &w.tag,
            Watch::Confirmed(w) => &w.tag,
        }
    }

    /// Key of the index this watch belongs to.
    pub fn key(&self) -> WatchKey {
        match self {
            Watch::Spent(w) | Watch::SpentBasic(w) => WatchKey::Outpoint(w.outpoint()),
            Watch::Confirmed(w) => WatchKey::Txid(w.txid),
        }
    }
}

/// Event delivered to a listener.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchEvent {
    /// A watched outpoint was spent by `tx` (mempool or block).
    Spent {
        /// Tag of the originating watch.
        tag: Tag,
        /// The outpoint that was spent.
        outpoint: OutPoint,
        /// Spending transaction.
        tx: Transaction,
    },
    /// Lightweight spend notice.
    SpentBasic {
        /// Tag of the originating watch.
        tag: Tag,
        /// The outpoint that was spent.
        outpoint: OutPoint,
        /// Id of the spending transaction.
        spending_txid: Txid,
    },
    /// A watched transaction reached its required depth.
    Confirmed {
        /// Tag of the originating watch.
        tag: Tag,
        /// The confirmed transaction.
        tx: Transaction,
        /// Height of the confirming block.
        height: u32,
        /// Hash of the confirming block.
        block_hash: BlockHash,
    },
}

impl WatchEvent {
    /// Correlation tag of the watch that fired.
    pub fn tag(&self) -> &Tag {
        match self {
            WatchEvent::Spent { tag, .. }
            | WatchEvent::SpentBasic { tag, .. }
            | WatchEvent::Confirmed { tag, .. } => tag,
        }
    }
}
