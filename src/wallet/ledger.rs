//! Authoritative store of owned outputs and wallet transactions.
//!
//! Everything else reads and mutates the ledger through the operations
//! below; the maps are private.

use std::collections::{BTreeMap, BTreeSet};

use bitcoin::{Amount, OutPoint, Transaction, Txid};

use crate::wallet::types::{Origin, OwnedOutput, TxRecord};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtxoLedger {
    outputs: BTreeMap<OutPoint, OwnedOutput>,
    txs: BTreeMap<Txid, TxRecord>,
}

impl UtxoLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a ledger from persisted parts
    pub fn from_parts(outputs: Vec<OwnedOutput>, txs: Vec<TxRecord>) -> Self {
        Self {
            outputs: outputs.into_iter().map(|o| (o.outpoint, o)).collect(),
            txs: txs.into_iter().map(|t| (t.txid, t)).collect(),
        }
    }

    /// Insert an owned output, or refresh its confirmation if already known.
    ///
    /// Returns true when the outpoint was new.
    pub fn record_output(&mut self, output: OwnedOutput, origin: Origin) -> bool {
        match self.outputs.get_mut(&output.outpoint) {
            Some(existing) => {
                if let Origin::Block(height) = origin {
                    existing.confirmation_height = Some(height);
                }
                false
            }
            None => {
                let mut output = output;
                if let Some(height) = origin.confirmation_height() {
                    output.confirmation_height = Some(height);
                }
                self.outputs.insert(output.outpoint, output);
                true
            }
        }
    }

    /// Record that `spending_txid` consumes `outpoint`.
    ///
    /// Unknown outpoints are ignored. Returns the amount consumed.
    pub fn mark_spent(
        &mut self,
        outpoint: &OutPoint,
        spending_txid: Txid,
        origin: Origin,
    ) -> Option<Amount> {
        let Some(output) = self.outputs.get_mut(outpoint) else {
            log::warn!(
                "Ignoring spend of unknown outpoint {} by {}",
                outpoint,
                spending_txid
            );
            return None;
        };

        if let Some(previous) = output.spent_by {
            if previous != spending_txid {
                log::warn!(
                    "Outpoint {} re-spent by {} (was {}), origin {:?}",
                    outpoint,
                    spending_txid,
                    previous,
                    origin
                );
            }
        }
        output.spent_by = Some(spending_txid);
        Some(output.amount)
    }

    /// Insert or replace a transaction record
    pub fn record_transaction(&mut self, record: TxRecord) {
        self.txs.insert(record.txid, record);
    }

    /// Confirm a known transaction and its outputs at `height`
    pub fn confirm_transaction(&mut self, txid: &Txid, height: u32) -> bool {
        let Some(record) = self.txs.get_mut(txid) else {
            return false;
        };
        record.confirmation_height = Some(height);
        let outputs = record.tx.output.len() as u32;
        for vout in 0..outputs {
            if let Some(output) = self.outputs.get_mut(&OutPoint::new(*txid, vout)) {
                output.confirmation_height = Some(height);
            }
        }
        true
    }

    /// Refresh the last time a transaction was seen unconfirmed
    pub fn touch(&mut self, txid: &Txid, seen_unix: u64) {
        if let Some(record) = self.txs.get_mut(txid) {
            record.last_seen = record.last_seen.max(seen_unix);
        }
    }

    /// Return a confirmed transaction and its outputs to the unconfirmed state.
    /// Spends it made stay in place.
    pub fn unconfirm(&mut self, txid: &Txid) -> bool {
        let Some(record) = self.txs.get_mut(txid) else {
            return false;
        };
        record.confirmation_height = None;
        let outputs = record.tx.output.len() as u32;
        for vout in 0..outputs {
            if let Some(output) = self.outputs.get_mut(&OutPoint::new(*txid, vout)) {
                output.confirmation_height = None;
            }
        }
        true
    }

    /// Delete a transaction and everything that depends on it.
    ///
    /// Outputs it spent become unspent again; its own outputs are dropped
    /// and every known transaction spending them is removed the same way.
    /// Returns the removed txids, the requested one first.
    pub fn remove(&mut self, txid: &Txid) -> Vec<Txid> {
        let mut removed = Vec::new();
        let mut pending = vec![*txid];

        while let Some(current) = pending.pop() {
            let Some(record) = self.txs.remove(&current) else {
                continue;
            };

            for input in &record.tx.input {
                if let Some(output) = self.outputs.get_mut(&input.previous_output) {
                    if output.spent_by == Some(current) {
                        output.spent_by = None;
                    }
                }
            }

            for vout in 0..record.tx.output.len() as u32 {
                if let Some(output) = self.outputs.remove(&OutPoint::new(current, vout)) {
                    if let Some(child) = output.spent_by {
                        pending.push(child);
                    }
                }
            }

            // Descendants whose spent outputs were already pruned
            for (child_txid, child) in &self.txs {
                if child
                    .tx
                    .input
                    .iter()
                    .any(|input| input.previous_output.txid == current)
                    && !pending.contains(child_txid)
                {
                    pending.push(*child_txid);
                }
            }

            log::debug!("Removed transaction {} from ledger", current);
            removed.push(current);
        }

        removed
    }

    /// Drop spent outputs that can no longer come back.
    ///
    /// An output goes once its spender is `finality_depth` deep, or as soon
    /// as its spender confirms if the output itself never confirmed.
    pub fn prune(&mut self, tip_height: u32, finality_depth: u32) -> usize {
        let txs = &self.txs;
        let before = self.outputs.len();

        self.outputs.retain(|outpoint, output| {
            let Some(spender) = output.spent_by else {
                return true;
            };
            let Some(spender_height) = txs.get(&spender).and_then(|r| r.confirmation_height) else {
                return true;
            };
            let depth = tip_height.saturating_sub(spender_height) + 1;
            let keep = output.is_confirmed() && depth < finality_depth;
            if !keep {
                log::debug!("Pruning spent output {} (spender depth {})", outpoint, depth);
            }
            keep
        });

        before - self.outputs.len()
    }

    /// Unconfirmed transactions that spend an owned outpoint also spent by `tx`
    pub fn conflicts_of(&self, tx: &Transaction) -> BTreeSet<Txid> {
        let txid = tx.compute_txid();
        tx.input
            .iter()
            .filter_map(|input| self.outputs.get(&input.previous_output))
            .filter_map(|output| output.spent_by)
            .filter(|spender| *spender != txid)
            .collect()
    }

    /// Every owned output, ordered by outpoint
    pub fn snapshot(&self) -> Vec<OwnedOutput> {
        self.outputs.values().cloned().collect()
    }

    pub fn output(&self, outpoint: &OutPoint) -> Option<&OwnedOutput> {
        self.outputs.get(outpoint)
    }

    pub fn transaction(&self, txid: &Txid) -> Option<&TxRecord> {
        self.txs.get(txid)
    }

    pub fn contains_tx(&self, txid: &Txid) -> bool {
        self.txs.contains_key(txid)
    }

    pub fn is_confirmed(&self, txid: &Txid) -> bool {
        self.txs
            .get(txid)
            .map(|r| r.confirmation_height.is_some())
            .unwrap_or(false)
    }

    pub fn transactions(&self) -> impl Iterator<Item = &TxRecord> {
        self.txs.values()
    }

    /// Transactions confirmed at or above `height`, highest first
    pub fn confirmed_from(&self, height: u32) -> Vec<TxRecord> {
        let mut records: Vec<TxRecord> = self
            .txs
            .values()
            .filter(|r| r.confirmation_height.map(|h| h >= height).unwrap_or(false))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.confirmation_height.cmp(&a.confirmation_height));
        records
    }

    /// Sum of unspent owned outputs
    pub fn unspent_total(&self) -> Amount {
        self.outputs
            .values()
            .filter(|o| !o.is_spent())
            .map(|o| o.amount)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::types::Keychain;
    use bitcoin::absolute::LockTime;
    use bitcoin::hashes::Hash;
    use bitcoin::transaction::Version;
    use bitcoin::{ScriptBuf, Sequence, TxIn, TxOut, Witness};

    fn tx(inputs: &[OutPoint], outputs: &[u64]) -> Transaction {
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: inputs
                .iter()
                .map(|prev| TxIn {
                    previous_output: *prev,
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::MAX,
                    witness: Witness::new(),
                })
                .collect(),
            output: outputs
                .iter()
                .map(|sats| TxOut {
                    value: Amount::from_sat(*sats),
                    script_pubkey: ScriptBuf::new(),
                })
                .collect(),
        }
    }

    fn admit(ledger: &mut UtxoLedger, tx: &Transaction, origin: Origin) -> Txid {
        let txid = tx.compute_txid();
        let mut spent = Amount::ZERO;
        for input in &tx.input {
            if let Some(amount) = ledger.mark_spent(&input.previous_output, txid, origin) {
                spent += amount;
            }
        }
        for (vout, txout) in tx.output.iter().enumerate() {
            ledger.record_output(
                OwnedOutput {
                    outpoint: OutPoint::new(txid, vout as u32),
                    amount: txout.value,
                    script_pubkey: txout.script_pubkey.clone(),
                    keychain: Keychain::External,
                    derivation_index: vout as u32,
                    confirmation_height: None,
                    spent_by: None,
                    is_coinbase: false,
                },
                origin,
            );
        }
        ledger.record_transaction(TxRecord {
            txid,
            tx: tx.clone(),
            spent,
            received: tx.output.iter().map(|o| o.value).sum(),
            confirmation_height: origin.confirmation_height(),
            last_seen: 0,
        });
        txid
    }

    fn foreign(n: u8) -> OutPoint {
        OutPoint::new(Txid::from_byte_array([n; 32]), 0)
    }

    #[test]
    fn test_record_output_is_idempotent() {
        let mut ledger = UtxoLedger::new();
        let funding = tx(&[foreign(1)], &[10_000]);
        admit(&mut ledger, &funding, Origin::Mempool);
        admit(&mut ledger, &funding, Origin::Block(5));

        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].confirmation_height, Some(5));
        assert_eq!(ledger.unspent_total(), Amount::from_sat(10_000));
    }

    #[test]
    fn test_unknown_spend_is_ignored() {
        let mut ledger = UtxoLedger::new();
        let result = ledger.mark_spent(&foreign(9), Txid::from_byte_array([2; 32]), Origin::Mempool);
        assert_eq!(result, None);
        assert!(ledger.snapshot().is_empty());
    }

    #[test]
    fn test_remove_cascades_and_restores_parent() {
        let mut ledger = UtxoLedger::new();
        let parent = tx(&[foreign(1)], &[50_000]);
        let parent_txid = admit(&mut ledger, &parent, Origin::Block(1));

        let child = tx(&[OutPoint::new(parent_txid, 0)], &[40_000]);
        let child_txid = admit(&mut ledger, &child, Origin::Mempool);
        let grandchild = tx(&[OutPoint::new(child_txid, 0)], &[30_000]);
        let grandchild_txid = admit(&mut ledger, &grandchild, Origin::Mempool);

        assert_eq!(ledger.unspent_total(), Amount::from_sat(30_000));

        let removed = ledger.remove(&child_txid);
        assert_eq!(removed, vec![child_txid, grandchild_txid]);
        assert!(!ledger.contains_tx(&grandchild_txid));
        assert_eq!(ledger.unspent_total(), Amount::from_sat(50_000));
        assert_eq!(
            ledger.output(&OutPoint::new(parent_txid, 0)).unwrap().spent_by,
            None
        );
    }

    #[test]
    fn test_unconfirm_keeps_spends() {
        let mut ledger = UtxoLedger::new();
        let parent = tx(&[foreign(1)], &[50_000]);
        let parent_txid = admit(&mut ledger, &parent, Origin::Block(1));
        let child = tx(&[OutPoint::new(parent_txid, 0)], &[40_000]);
        let child_txid = admit(&mut ledger, &child, Origin::Block(2));

        assert!(ledger.unconfirm(&child_txid));
        assert!(!ledger.is_confirmed(&child_txid));
        let child_out = ledger.output(&OutPoint::new(child_txid, 0)).unwrap();
        assert_eq!(child_out.confirmation_height, None);
        assert_eq!(
            ledger.output(&OutPoint::new(parent_txid, 0)).unwrap().spent_by,
            Some(child_txid)
        );
    }

    #[test]
    fn test_prune_waits_for_finality() {
        let mut ledger = UtxoLedger::new();
        let parent = tx(&[foreign(1)], &[50_000]);
        let parent_txid = admit(&mut ledger, &parent, Origin::Block(1));
        let child = tx(&[OutPoint::new(parent_txid, 0)], &[40_000]);
        admit(&mut ledger, &child, Origin::Block(2));

        assert_eq!(ledger.prune(10, 10), 0);
        assert_eq!(ledger.prune(11, 10), 1);
        assert!(ledger.output(&OutPoint::new(parent_txid, 0)).is_none());
        assert_eq!(ledger.unspent_total(), Amount::from_sat(40_000));
    }

    #[test]
    fn test_prune_drops_unconfirmed_output_with_confirmed_spender() {
        let mut ledger = UtxoLedger::new();
        let parent = tx(&[foreign(1)], &[50_000]);
        let parent_txid = admit(&mut ledger, &parent, Origin::Mempool);
        let child = tx(&[OutPoint::new(parent_txid, 0)], &[40_000]);
        admit(&mut ledger, &child, Origin::Block(2));

        assert_eq!(ledger.prune(2, 100), 1);
    }

    #[test]
    fn test_conflicts_of() {
        let mut ledger = UtxoLedger::new();
        let parent = tx(&[foreign(1)], &[50_000]);
        let parent_txid = admit(&mut ledger, &parent, Origin::Block(1));
        let spend_a = tx(&[OutPoint::new(parent_txid, 0)], &[40_000]);
        let a_txid = admit(&mut ledger, &spend_a, Origin::Mempool);

        let spend_b = tx(&[OutPoint::new(parent_txid, 0)], &[39_000]);
        let conflicts = ledger.conflicts_of(&spend_b);
        assert_eq!(conflicts.into_iter().collect::<Vec<_>>(), vec![a_txid]);
        assert!(ledger.conflicts_of(&spend_a).is_empty());
    }
}
