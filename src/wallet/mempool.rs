//! Unconfirmed transaction ingestion.
//!
//! Batches are normalized (deduplicated, sorted by txid) before anything is
//! decided, so the outcome does not depend on the order the host delivered
//! them in. Double-spends between unconfirmed transactions are settled by
//! `(last_seen, txid)`: the higher key stays.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use bitcoin::{OutPoint, Transaction, Txid};

use crate::error::WalletError;
use crate::wallet::keychain::KeyDeriver;
use crate::wallet::ledger::UtxoLedger;
use crate::wallet::scan::{admit_transaction, scan_transaction};
use crate::wallet::types::{ApplyResult, MempoolTx, Origin};

struct Candidate {
    txid: Txid,
    tx: Transaction,
    seen: u64,
}

impl Candidate {
    fn priority(&self) -> (u64, Txid) {
        (self.seen, self.txid)
    }
}

/// Apply a batch of unconfirmed transactions.
///
/// Returns the wallet-relevant transactions admitted (or refreshed). Txids
/// already in the ledger are passed to `on_known` so the caller can track
/// them, whatever their state.
pub fn apply_mempool_transactions(
    deriver: &mut KeyDeriver,
    ledger: &mut UtxoLedger,
    txs: Vec<MempoolTx>,
    mut on_known: impl FnMut(&Txid),
) -> Result<ApplyResult, WalletError> {
    let mut result = ApplyResult::default();

    // Collapse duplicates to their latest sighting.
    let mut batch: BTreeMap<Txid, Candidate> = BTreeMap::new();
    for MempoolTx { tx, added_unix } in txs {
        let txid = tx.compute_txid();
        match batch.get_mut(&txid) {
            Some(existing) => existing.seen = existing.seen.max(added_unix),
            None => {
                batch.insert(
                    txid,
                    Candidate {
                        txid,
                        tx,
                        seen: added_unix,
                    },
                );
            }
        }
    }

    // Known transactions: confirmed ones are untouched, unconfirmed ones
    // only get their last-seen time refreshed.
    batch.retain(|txid, candidate| {
        if !ledger.contains_tx(txid) {
            return true;
        }
        on_known(txid);
        if !ledger.is_confirmed(txid) {
            ledger.touch(txid, candidate.seen);
            result.relevant_txids.push(*txid);
        }
        false
    });

    let relevant = select_relevant(deriver, ledger, batch);
    let admitted = resolve_conflicts(ledger, relevant);

    for candidate in order_parents_first(admitted) {
        if admit_transaction(deriver, ledger, &candidate.tx, Origin::Mempool, candidate.seen)? {
            result.relevant_txids.push(candidate.txid);
        }
    }

    if !result.is_empty() {
        log::debug!(
            "Mempool batch applied: {} relevant tx(s)",
            result.relevant_txids.len()
        );
    }
    Ok(result)
}

/// Keep transactions that pay us, or spend something we own, including
/// outputs created by other relevant transactions of the same batch.
fn select_relevant(
    deriver: &KeyDeriver,
    ledger: &UtxoLedger,
    batch: BTreeMap<Txid, Candidate>,
) -> Vec<Candidate> {
    let mut owned_outpoints: BTreeSet<OutPoint> = BTreeSet::new();
    let mut relevant: BTreeSet<Txid> = BTreeSet::new();

    for (txid, candidate) in &batch {
        let scan = scan_transaction(deriver, ledger, &candidate.tx);
        if !scan.owned_outputs.is_empty() {
            relevant.insert(*txid);
            for (vout, ..) in &scan.owned_outputs {
                owned_outpoints.insert(OutPoint::new(*txid, *vout));
            }
        } else if !scan.owned_inputs.is_empty() {
            relevant.insert(*txid);
        }
    }

    // Spends of batch-created outputs, to a fixpoint.
    loop {
        let mut changed = false;
        for (txid, candidate) in &batch {
            if relevant.contains(txid) {
                continue;
            }
            if candidate
                .tx
                .input
                .iter()
                .any(|input| owned_outpoints.contains(&input.previous_output))
            {
                relevant.insert(*txid);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    batch
        .into_values()
        .filter(|candidate| relevant.contains(&candidate.txid))
        .collect()
}

/// Settle double-spends within the batch and against the ledger.
///
/// A candidate that turns out to spend a rejected transaction must not keep
/// the outpoints it claimed, so settling restarts without it until no
/// admitted candidate depends on a rejected one. Evictions only reach the
/// real ledger from the final round.
fn resolve_conflicts(ledger: &mut UtxoLedger, candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut ordered = candidates;
    ordered.sort_by(|a, b| b.priority().cmp(&a.priority()));

    let mut excluded: BTreeSet<Txid> = BTreeSet::new();
    loop {
        let mut trial = ledger.clone();
        let round = settle(&mut trial, &ordered, &excluded);
        if round.orphans.is_empty() {
            *ledger = trial;
            return ordered
                .into_iter()
                .filter(|candidate| round.admitted.contains(&candidate.txid))
                .collect();
        }
        for txid in &round.orphans {
            log::warn!("Rejected {}: spends a replaced transaction", txid);
        }
        excluded.extend(round.orphans);
    }
}

struct Round {
    admitted: BTreeSet<Txid>,
    /// Admitted candidates spending a rejected or evicted transaction
    orphans: BTreeSet<Txid>,
}

/// One pass over `ordered` (highest priority first), skipping `excluded`
fn settle(ledger: &mut UtxoLedger, ordered: &[Candidate], excluded: &BTreeSet<Txid>) -> Round {
    let mut claimed: HashMap<OutPoint, Txid> = HashMap::new();
    let mut rejected: BTreeSet<Txid> = excluded.clone();
    let mut admitted: BTreeSet<Txid> = BTreeSet::new();

    for candidate in ordered {
        if excluded.contains(&candidate.txid) {
            continue;
        }

        let mut evict = BTreeSet::new();
        let mut accept = true;

        for input in &candidate.tx.input {
            let prev = input.previous_output;

            if claimed.contains_key(&prev) {
                // A higher-priority batch tx already took this outpoint.
                accept = false;
                break;
            }

            let Some(spender) = ledger.output(&prev).and_then(|o| o.spent_by) else {
                continue;
            };
            if ledger.is_confirmed(&spender) {
                accept = false;
                break;
            }
            let spender_seen = ledger
                .transaction(&spender)
                .map(|r| r.last_seen)
                .unwrap_or(0);
            if (spender_seen, spender) > candidate.priority() {
                accept = false;
                break;
            }
            evict.insert(spender);
        }

        if !accept {
            log::debug!("Conflicting mempool tx {} loses", candidate.txid);
            rejected.insert(candidate.txid);
            continue;
        }

        for loser in evict {
            for removed in ledger.remove(&loser) {
                log::info!("Replaced {} with {}", removed, candidate.txid);
                rejected.insert(removed);
            }
        }
        for input in &candidate.tx.input {
            claimed.insert(input.previous_output, candidate.txid);
        }
        admitted.insert(candidate.txid);
    }

    let orphans = ordered
        .iter()
        .filter(|candidate| admitted.contains(&candidate.txid))
        .filter(|candidate| {
            candidate
                .tx
                .input
                .iter()
                .any(|input| rejected.contains(&input.previous_output.txid))
        })
        .map(|candidate| candidate.txid)
        .collect();

    Round { admitted, orphans }
}

/// Order so every transaction follows the batch transactions it spends
fn order_parents_first(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut remaining: BTreeMap<Txid, Candidate> =
        candidates.into_iter().map(|c| (c.txid, c)).collect();
    let mut ordered = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let ready: Vec<Txid> = remaining
            .iter()
            .filter(|(_, candidate)| {
                !candidate
                    .tx
                    .input
                    .iter()
                    .any(|input| remaining.contains_key(&input.previous_output.txid))
            })
            .map(|(txid, _)| *txid)
            .collect();

        // Cycles cannot occur between valid transactions; fall back to txid
        // order rather than looping forever.
        let ready = if ready.is_empty() {
            remaining.keys().take(1).copied().collect()
        } else {
            ready
        };

        for txid in ready {
            if let Some(candidate) = remaining.remove(&txid) {
                ordered.push(candidate);
            }
        }
    }

    ordered
}
