use bitcoin::{Amount, OutPoint, Transaction, Txid};

use crate::error::WalletError;
use crate::wallet::keychain::KeyDeriver;
use crate::wallet::ledger::UtxoLedger;
use crate::wallet::types::{Keychain, Origin, OwnedOutput, TxRecord};

/// What a transaction does to the wallet
#[derive(Debug, Default)]
pub struct TxScan {
    /// (vout, keychain, derivation index, amount)
    pub owned_outputs: Vec<(u32, Keychain, u32, Amount)>,
    /// Inputs spending outputs the ledger holds
    pub owned_inputs: Vec<OutPoint>,
}

impl TxScan {
    pub fn is_relevant(&self) -> bool {
        !self.owned_outputs.is_empty() || !self.owned_inputs.is_empty()
    }
}

pub fn scan_transaction(deriver: &KeyDeriver, ledger: &UtxoLedger, tx: &Transaction) -> TxScan {
    let owned_outputs = tx
        .output
        .iter()
        .enumerate()
        .filter_map(|(vout, txout)| {
            deriver
                .index_of_spk(&txout.script_pubkey)
                .map(|(keychain, index)| (vout as u32, keychain, index, txout.value))
        })
        .collect();

    let owned_inputs = if tx.is_coinbase() {
        Vec::new()
    } else {
        tx.input
            .iter()
            .map(|input| input.previous_output)
            .filter(|prev| ledger.output(prev).is_some())
            .collect()
    };

    TxScan {
        owned_outputs,
        owned_inputs,
    }
}

/// Apply a relevant transaction to the ledger.
///
/// Known transactions are only confirmed (block origin) or refreshed
/// (mempool origin). Returns false when the transaction is not ours.
pub fn admit_transaction(
    deriver: &mut KeyDeriver,
    ledger: &mut UtxoLedger,
    tx: &Transaction,
    origin: Origin,
    seen_unix: u64,
) -> Result<bool, WalletError> {
    let txid = tx.compute_txid();
    let scan = scan_transaction(deriver, ledger, tx);
    if !scan.is_relevant() {
        return Ok(false);
    }

    if ledger.contains_tx(&txid) {
        match origin {
            Origin::Block(height) => {
                ledger.confirm_transaction(&txid, height);
            }
            Origin::Mempool => ledger.touch(&txid, seen_unix),
        }
        return Ok(true);
    }

    let mut received = Amount::ZERO;
    for (vout, keychain, index, amount) in &scan.owned_outputs {
        deriver.mark_used(*keychain, *index)?;
        received += *amount;
        ledger.record_output(
            OwnedOutput {
                outpoint: OutPoint::new(txid, *vout),
                amount: *amount,
                script_pubkey: tx.output[*vout as usize].script_pubkey.clone(),
                keychain: *keychain,
                derivation_index: *index,
                confirmation_height: None,
                spent_by: None,
                is_coinbase: tx.is_coinbase(),
            },
            origin,
        );
    }

    let mut spent = Amount::ZERO;
    for outpoint in &scan.owned_inputs {
        if let Some(amount) = ledger.mark_spent(outpoint, txid, origin) {
            spent += amount;
        }
    }

    ledger.record_transaction(TxRecord {
        txid,
        tx: tx.clone(),
        spent,
        received,
        confirmation_height: origin.confirmation_height(),
        last_seen: seen_unix,
    });

    log::debug!(
        "Admitted {} ({:?}): received {} sats, spent {} sats",
        txid,
        origin,
        received.to_sat(),
        spent.to_sat()
    );
    Ok(true)
}

/// Bring back outputs of `txid`'s inputs that were pruned while it was
/// confirmed, using the parent records still in the ledger.
pub fn restore_inputs(deriver: &KeyDeriver, ledger: &mut UtxoLedger, txid: &Txid) {
    let Some(record) = ledger.transaction(txid).cloned() else {
        return;
    };

    for input in &record.tx.input {
        let prev = input.previous_output;
        if ledger.output(&prev).is_some() {
            continue;
        }
        let Some(parent) = ledger.transaction(&prev.txid).cloned() else {
            continue;
        };
        let Some(txout) = parent.tx.output.get(prev.vout as usize) else {
            continue;
        };
        let Some((keychain, index)) = deriver.index_of_spk(&txout.script_pubkey) else {
            continue;
        };

        let origin = match parent.confirmation_height {
            Some(height) => Origin::Block(height),
            None => Origin::Mempool,
        };
        ledger.record_output(
            OwnedOutput {
                outpoint: prev,
                amount: txout.value,
                script_pubkey: txout.script_pubkey.clone(),
                keychain,
                derivation_index: index,
                confirmation_height: None,
                spent_by: None,
                is_coinbase: parent.tx.is_coinbase(),
            },
            origin,
        );
        ledger.mark_spent(&prev, *txid, origin);
        log::debug!("Restored output {} spent by {}", prev, txid);
    }
}
