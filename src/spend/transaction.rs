use bitcoin::blockdata::script::ScriptBuf;
use bitcoin::blockdata::transaction::{Transaction, TxIn, TxOut};
use bitcoin::blockdata::witness::Witness;
use bitcoin::transaction::Sequence;
use bitcoin::{absolute, Amount, Script};

use crate::spend::coin_selection::Selection;

/// Version, counts, locktime and segwit marker, rounded up
pub const TX_OVERHEAD_VBYTES: u64 = 11;
/// Outpoint, sequence, empty script_sig and discounted P2WPKH witness
pub const TX_INPUT_VBYTES: u64 = 68;

/// Amount (8) plus script length prefix (1) plus the script
pub fn output_vbytes(script_pubkey: &Script) -> u64 {
    9 + script_pubkey.len() as u64
}

pub struct TransactionBuilder;

impl TransactionBuilder {
    /// Estimate the virtual size of a P2WPKH-only spend
    pub fn estimate_vsize(num_inputs: usize, outputs: &[&Script]) -> u64 {
        TX_OVERHEAD_VBYTES
            + num_inputs as u64 * TX_INPUT_VBYTES
            + outputs.iter().map(|s| output_vbytes(s)).sum::<u64>()
    }

    /// Assemble the unsigned transaction: recipients in request order, then
    /// change when the selection produced one.
    pub fn build_unsigned(
        selection: &Selection,
        recipients: &[(ScriptBuf, Amount)],
        change_script: Option<&ScriptBuf>,
    ) -> Transaction {
        let mut tx = Transaction {
            version: bitcoin::transaction::Version::TWO,
            lock_time: absolute::LockTime::ZERO,
            input: vec![],
            output: vec![],
        };

        for utxo in &selection.selected {
            tx.input.push(TxIn {
                previous_output: utxo.outpoint,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            });
        }

        for (script_pubkey, amount) in recipients {
            tx.output.push(TxOut {
                value: *amount,
                script_pubkey: script_pubkey.clone(),
            });
        }

        if let (Some(amount), Some(script_pubkey)) = (selection.change, change_script) {
            tx.output.push(TxOut {
                value: amount,
                script_pubkey: script_pubkey.clone(),
            });
        }

        tx
    }
}
