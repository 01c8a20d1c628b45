//! Abstractions over the node (RPC, Electrum, ...) and the notifications it pushes.
use async_trait::async_trait;
use bitcoin::{Block, BlockHash, Transaction, Txid};
use std::sync::Arc;

/// A transaction as the node currently sees it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxStatus {
    /// Transaction body.
    pub tx: Transaction,
    /// `(height, block_hash)` of the confirming block, `None` while unconfirmed.
    pub confirmed_at: Option<(u32, BlockHash)>,
}

/// "A new block was connected", as pushed by the notification source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockNotification {
    /// Height of the new block.
    pub height: u32,
    /// Its hash.
    pub hash: BlockHash,
    /// Block transactions, when the source sent them along. `None` means fetch by hash.
    pub txdata: Option<Vec<Transaction>>,
}

impl BlockNotification {
    /// Notification carrying the full block.
    pub fn from_block(height: u32, block: Block) -> Self {
        Self {
            height,
            hash: block.block_hash(),
            txdata: Some(block.txdata),
        }
    }

    /// Notification carrying only the header hash.
    pub fn announced(height: u32, hash: BlockHash) -> Self {
        Self {
            height,
            hash,
            txdata: None,
        }
    }
}

/// Authoritative request/response access to the chain.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Resolve a transaction by id. `None` if the node does not know it.
    async fn get_transaction(&self, txid: Txid) -> anyhow::Result<Option<TxStatus>>;

    /// Current best height.
    async fn tip_height(&self) -> anyhow::Result<u32>;

    /// Fetch a full block by hash.
    async fn get_block(&self, hash: BlockHash) -> anyhow::Result<Block>;

    /// Hand a transaction to the node. `Ok(false)` means the node rejected it.
    async fn broadcast(&self, tx: &Transaction) -> anyhow::Result<bool>;

    /// Confirmation depth of `txid`; 0 when unconfirmed, unknown or reorged out.
    ///
    /// The default derives it from the confirming height and the node's tip.
    async fn confirmations(&self, txid: Txid) -> anyhow::Result<u32> {
        let Some(status) = self.get_transaction(txid).await? else {
            return Ok(0);
        };
        let Some((height, _)) = status.confirmed_at else {
            return Ok(0);
        };
        let tip = self.tip_height().await?;
        Ok(tip.checked_sub(height).map_or(0, |d| d + 1))
    }
}

#[async_trait]
impl<T: ChainSource + ?Sized> ChainSource for Arc<T> {
    async fn get_transaction(&self, txid: Txid) -> anyhow::Result<Option<TxStatus>> {
        (**self).get_transaction(txid).await
    }

    async fn tip_height(&self) -> anyhow::Result<u32> {
        (**self).tip_height().await
    }

    async fn get_block(&self, hash: BlockHash) -> anyhow::Result<Block> {
        (**self).get_block(hash).await
    }

    async fn broadcast(&self, tx: &Transaction) -> anyhow::Result<bool> {
        (**self).broadcast(tx).await
    }

    async fn confirmations(&self, txid: Txid) -> anyhow::Result<u32> {
        (**self).confirmations(txid).await
    }
}
