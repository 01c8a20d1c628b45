#![allow(dead_code)]

use async_trait::async_trait;
use bitcoin::{
    absolute::LockTime,
    block::{Header as BlockHeader, Version as BlockVersion},
    hash_types::TxMerkleNode,
    hashes::Hash,
    pow::CompactTarget,
    transaction::Version,
    Amount, Block, BlockHash, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid,
    WPubkeyHash, Witness,
};
use chain_watcher::prelude::*;
use std::collections::HashMap;
use std::sync::Mutex;

/// ------- In-memory chain: tx statuses, blocks, a tip and a broadcast log -------
#[derive(Default)]
pub struct MemChain {
    pub tip: Mutex<u32>,
    pub txs: Mutex<HashMap<Txid, TxStatus>>,
    pub blocks: Mutex<HashMap<BlockHash, Block>>,
    pub broadcasts: Mutex<Vec<Transaction>>,
    /// Number of upcoming queries that fail before answering again.
    pub failures: Mutex<u32>,
    /// Like `failures`, but only for `get_transaction`.
    pub resolve_failures: Mutex<u32>,
    pub depth_queries: Mutex<u32>,
}

impl MemChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tip(&self, height: u32) {
        *self.tip.lock().unwrap() = height;
    }

    /// Known to the node, unconfirmed.
    pub fn add_unconfirmed(&self, tx: &Transaction) {
        self.txs.lock().unwrap().insert(
            tx.compute_txid(),
            TxStatus {
                tx: tx.clone(),
                confirmed_at: None,
            },
        );
    }

    /// Confirmed at `height` in a block identified by `hash`.
    pub fn confirm(&self, tx: &Transaction, height: u32, hash: BlockHash) {
        self.txs.lock().unwrap().insert(
            tx.compute_txid(),
            TxStatus {
                tx: tx.clone(),
                confirmed_at: Some((height, hash)),
            },
        );
    }

    /// Reorged out: back to the mempool.
    pub fn unconfirm(&self, txid: Txid) {
        if let Some(status) = self.txs.lock().unwrap().get_mut(&txid) {
            status.confirmed_at = None;
        }
    }

    pub fn add_block(&self, block: Block) {
        self.blocks.lock().unwrap().insert(block.block_hash(), block);
    }

    pub fn fail_next(&self, n: u32) {
        *self.failures.lock().unwrap() = n;
    }

    pub fn fail_next_resolve(&self, n: u32) {
        *self.resolve_failures.lock().unwrap() = n;
    }

    pub fn broadcasts(&self) -> Vec<Transaction> {
        self.broadcasts.lock().unwrap().clone()
    }

    pub fn depth_queries(&self) -> u32 {
        *self.depth_queries.lock().unwrap()
    }

    fn maybe_fail(&self) -> anyhow::Result<()> {
        let mut failures = self.failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            anyhow::bail!("node unreachable");
        }
        Ok(())
    }
}

#[async_trait]
impl ChainSource for MemChain {
    async fn get_transaction(&self, txid: Txid) -> anyhow::Result<Option<TxStatus>> {
        self.maybe_fail()?;
        {
            let mut failures = self.resolve_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                anyhow::bail!("getrawtransaction timed out");
            }
        }
        Ok(self.txs.lock().unwrap().get(&txid).cloned())
    }

    async fn tip_height(&self) -> anyhow::Result<u32> {
        self.maybe_fail()?;
        Ok(*self.tip.lock().unwrap())
    }

    async fn get_block(&self, hash: BlockHash) -> anyhow::Result<Block> {
        self.maybe_fail()?;
        match self.blocks.lock().unwrap().get(&hash) {
            Some(block) => Ok(block.clone()),
            None => anyhow::bail!("unknown block {hash}"),
        }
    }

    async fn broadcast(&self, tx: &Transaction) -> anyhow::Result<bool> {
        self.maybe_fail()?;
        self.broadcasts.lock().unwrap().push(tx.clone());
        Ok(true)
    }

    async fn confirmations(&self, txid: Txid) -> anyhow::Result<u32> {
        self.maybe_fail()?;
        *self.depth_queries.lock().unwrap() += 1;
        let status = self.txs.lock().unwrap().get(&txid).cloned();
        let tip = *self.tip.lock().unwrap();
        Ok(match status.and_then(|s| s.confirmed_at) {
            Some((height, _)) if tip >= height => tip - height + 1,
            _ => 0,
        })
    }
}

/// ------- Event sink recording every delivery -------
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<(ListenerId, WatchEvent)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<(ListenerId, WatchEvent)> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

impl EventSink for RecordingSink {
    fn deliver(&self, listener: ListenerId, event: WatchEvent) {
        self.events.lock().unwrap().push((listener, event));
    }
}

/// ------- Transaction and block builders -------
pub fn script(seed: u8) -> ScriptBuf {
    ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([seed; 20]))
}

pub fn txid(seed: u8) -> Txid {
    Txid::from_byte_array([seed; 32])
}

/// A transaction with one input per outpoint and one output of `sats` to `script(seed)`.
pub fn spending(outpoints: &[OutPoint], sats: u64, seed: u8) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: outpoints
            .iter()
            .map(|op| TxIn {
                previous_output: *op,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            })
            .collect(),
        output: vec![TxOut {
            value: Amount::from_sat(sats),
            script_pubkey: script(seed),
        }],
    }
}

/// Coinbase-like transaction paying `sats` to `script(seed)`.
pub fn funding(sats: u64, seed: u8) -> Transaction {
    spending(&[OutPoint::null()], sats, seed)
}

/// Block at no particular height containing `txs`, chained on `prev`.
pub fn block(prev: BlockHash, txs: Vec<Transaction>) -> Block {
    let header = BlockHeader {
        version: BlockVersion::from_consensus(2),
        prev_blockhash: prev,
        merkle_root: TxMerkleNode::all_zeros(),
        time: 0,
        bits: CompactTarget::from_consensus(0x207fffff),
        nonce: txs.len() as u32,
    };
    Block {
        header,
        txdata: txs,
    }
}

pub fn block_hash(seed: u8) -> BlockHash {
    BlockHash::from_byte_array([seed; 32])
}
