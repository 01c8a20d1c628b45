use crate::registry::WatchRegistry;
use crate::watch::{ListenerId, Watch, WatchEvent};
use bitcoin::Transaction;
use std::collections::HashSet;

/// Spend events `tx` triggers against the registry, one per matching watch.
///
/// Each outpoint is considered once per pass even if `tx` lists it twice.
/// Coinbase inputs never match.
pub fn spend_events(registry: &WatchRegistry, tx: &Transaction) -> Vec<(ListenerId, WatchEvent)> {
    let mut seen = HashSet::new();
    let mut events = Vec::new();
    let mut spending_txid = None;

    for input in &tx.input {
        let op = input.previous_output;
        if op.is_null() || !seen.insert(op) {
            continue;
        }
        let Some(watches) = registry.spend_watches(&op) else {
            continue;
        };
        let txid = *spending_txid.get_or_insert_with(|| tx.compute_txid());

        for watch in watches {
            let event = match watch {
                Watch::Spent(w) => WatchEvent::Spent {
                    tag: w.tag.clone(),
                    outpoint: op,
                    tx: tx.clone(),
                },
                Watch::SpentBasic(w) => WatchEvent::SpentBasic {
                    tag: w.tag.clone(),
                    outpoint: op,
                    spending_txid: txid,
                },
                // never filed under an outpoint
                Watch::Confirmed(_) => continue,
            };
            events.push((watch.listener(), event));
        }
    }

    events
}
