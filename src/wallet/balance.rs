use bitcoin::Amount;
use serde::{Deserialize, Serialize};

use crate::wallet::types::{Keychain, OwnedOutput};

/// Four-way split of the wallet's unspent outputs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Coinbase outputs still inside the maturity window
    pub immature: Amount,
    /// Unconfirmed outputs on the change keychain
    pub trusted_pending: Amount,
    /// Unconfirmed outputs on the receive keychain
    pub untrusted_pending: Amount,
    /// Confirmed and mature
    pub confirmed: Amount,
}

impl Balance {
    /// Funds the wallet may spend right now
    pub fn trusted_spendable(&self) -> Amount {
        self.confirmed + self.trusted_pending
    }

    pub fn total(&self) -> Amount {
        self.immature + self.trusted_pending + self.untrusted_pending + self.confirmed
    }
}

/// Compute the balance of a ledger snapshot at `tip_height`
pub fn aggregate(snapshot: &[OwnedOutput], tip_height: u32, coinbase_maturity: u32) -> Balance {
    let mut balance = Balance::default();

    for output in snapshot.iter().filter(|o| !o.is_spent()) {
        if output.is_coinbase && !output.is_mature(tip_height, coinbase_maturity) {
            balance.immature += output.amount;
        } else if output.is_confirmed() {
            balance.confirmed += output.amount;
        } else {
            match output.keychain {
                Keychain::Internal => balance.trusted_pending += output.amount,
                Keychain::External => balance.untrusted_pending += output.amount,
            }
        }
    }

    balance
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use bitcoin::{OutPoint, ScriptBuf, Txid};

    fn output(
        n: u8,
        sats: u64,
        keychain: Keychain,
        height: Option<u32>,
        coinbase: bool,
    ) -> OwnedOutput {
        OwnedOutput {
            outpoint: OutPoint::new(Txid::from_byte_array([n; 32]), 0),
            amount: Amount::from_sat(sats),
            script_pubkey: ScriptBuf::new(),
            keychain,
            derivation_index: 0,
            confirmation_height: height,
            spent_by: None,
            is_coinbase: coinbase,
        }
    }

    #[test]
    fn test_balance_buckets() {
        let mut spent = output(5, 7_000, Keychain::External, Some(3), false);
        spent.spent_by = Some(Txid::from_byte_array([9; 32]));

        let snapshot = vec![
            output(1, 1_000, Keychain::External, Some(10), false),
            output(2, 2_000, Keychain::Internal, None, false),
            output(3, 3_000, Keychain::External, None, false),
            output(4, 5_000, Keychain::External, Some(50), true),
            spent,
        ];

        let balance = aggregate(&snapshot, 54, 100);
        assert_eq!(balance.confirmed, Amount::from_sat(1_000));
        assert_eq!(balance.trusted_pending, Amount::from_sat(2_000));
        assert_eq!(balance.untrusted_pending, Amount::from_sat(3_000));
        assert_eq!(balance.immature, Amount::from_sat(5_000));
        assert_eq!(balance.trusted_spendable(), Amount::from_sat(3_000));
        assert_eq!(balance.total(), Amount::from_sat(11_000));
    }

    #[test]
    fn test_coinbase_matures_at_depth() {
        let snapshot = vec![output(1, 5_000, Keychain::External, Some(10), true)];

        let balance = aggregate(&snapshot, 109, 100);
        assert_eq!(balance.immature, Amount::from_sat(5_000));

        let balance = aggregate(&snapshot, 110, 100);
        assert_eq!(balance.confirmed, Amount::from_sat(5_000));
        assert_eq!(balance.immature, Amount::ZERO);
    }
}
