use std::fmt;
use std::str::FromStr;

use bitcoin::{Amount, FeeRate};
use serde::{Deserialize, Serialize};

use crate::error::WalletError;
use crate::spend::transaction::TX_INPUT_VBYTES;
use crate::wallet::types::OwnedOutput;

/// Order in which candidates are accumulated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoinSelectionPolicy {
    /// Fewest inputs: biggest outputs first
    #[default]
    LargestFirst,
    /// Oldest confirmations first, unconfirmed change last
    OldestFirst,
}

impl CoinSelectionPolicy {
    fn sort(&self, candidates: &mut [OwnedOutput]) {
        match self {
            CoinSelectionPolicy::LargestFirst => {
                candidates.sort_by(|a, b| b.amount.cmp(&a.amount).then(a.outpoint.cmp(&b.outpoint)))
            }
            CoinSelectionPolicy::OldestFirst => candidates.sort_by(|a, b| {
                let height = |o: &OwnedOutput| o.confirmation_height.unwrap_or(u32::MAX);
                height(a)
                    .cmp(&height(b))
                    .then(a.outpoint.cmp(&b.outpoint))
            }),
        }
    }
}

impl FromStr for CoinSelectionPolicy {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "largest-first" | "largest" => Ok(CoinSelectionPolicy::LargestFirst),
            "oldest-first" | "oldest" => Ok(CoinSelectionPolicy::OldestFirst),
            other => Err(WalletError::InvalidConfig(format!(
                "unknown coin selection policy '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for CoinSelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoinSelectionPolicy::LargestFirst => write!(f, "largest-first"),
            CoinSelectionPolicy::OldestFirst => write!(f, "oldest-first"),
        }
    }
}

/// Sizes and limits the selection is computed against
#[derive(Debug, Clone, Copy)]
pub struct SelectionParams {
    pub fee_rate: FeeRate,
    /// Transaction overhead plus every recipient output, in vbytes
    pub base_vbytes: u64,
    /// Size of the change output, in vbytes
    pub change_vbytes: u64,
    pub dust_limit: Amount,
}

impl SelectionParams {
    fn fee(&self, vbytes: u64) -> Result<Amount, WalletError> {
        self.fee_rate
            .fee_vb(vbytes)
            .ok_or(WalletError::InvalidFeeRate(self.fee_rate.to_sat_per_vb_floor()))
    }

    /// Fee of a transaction with `inputs` inputs and no change
    pub fn fee_without_change(&self, inputs: usize) -> Result<Amount, WalletError> {
        self.fee(self.base_vbytes + inputs as u64 * TX_INPUT_VBYTES)
    }

    /// Excess above which a change output is worth creating
    pub fn cost_of_change(&self) -> Result<Amount, WalletError> {
        Ok(self.fee(self.change_vbytes)? + self.dust_limit)
    }
}

/// Outcome of coin selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub selected: Vec<OwnedOutput>,
    pub fee: Amount,
    pub change: Option<Amount>,
}

impl Selection {
    pub fn input_total(&self) -> Amount {
        self.selected.iter().map(|o| o.amount).sum()
    }
}

/// Pick inputs paying `target` plus fee.
///
/// A single input that needs no change is preferred. Otherwise candidates
/// are accumulated in policy order; an excess too small for a non-dust
/// change output is left to the fee.
pub fn select_coins(
    mut candidates: Vec<OwnedOutput>,
    target: Amount,
    params: &SelectionParams,
    policy: CoinSelectionPolicy,
) -> Result<Selection, WalletError> {
    let available = candidates
        .iter()
        .try_fold(Amount::ZERO, |sum, o| sum.checked_add(o.amount))
        .unwrap_or(Amount::MAX);
    let cost_of_change = params.cost_of_change()?;
    let single_fee = params.fee_without_change(1)?;

    let changeless = candidates
        .iter()
        .filter_map(|o| {
            let excess = o.amount.checked_sub(target.checked_add(single_fee)?)?;
            (excess <= cost_of_change).then_some((excess, o))
        })
        .min_by(|(ea, a), (eb, b)| ea.cmp(eb).then(a.outpoint.cmp(&b.outpoint)));

    if let Some((_, output)) = changeless {
        let selected = vec![output.clone()];
        let fee = output.amount - target;
        log::debug!(
            "Selected single changeless input {} (fee {} sats)",
            output.outpoint,
            fee.to_sat()
        );
        return Ok(Selection {
            selected,
            fee,
            change: None,
        });
    }

    policy.sort(&mut candidates);

    let mut selected = Vec::new();
    let mut total = Amount::ZERO;
    for candidate in candidates {
        total = total.checked_add(candidate.amount).unwrap_or(Amount::MAX);
        selected.push(candidate);

        let fee = params.fee_without_change(selected.len())?;
        let Some(excess) = target
            .checked_add(fee)
            .and_then(|needed| total.checked_sub(needed))
        else {
            continue;
        };

        if excess > cost_of_change {
            let change_fee = params.fee(params.change_vbytes)?;
            let change = excess - change_fee;
            return Ok(Selection {
                selected,
                fee: fee + change_fee,
                change: Some(change),
            });
        }

        return Ok(Selection {
            selected,
            fee: fee + excess,
            change: None,
        });
    }

    let needed = target
        .checked_add(params.fee_without_change(selected.len().max(1))?)
        .unwrap_or(Amount::MAX);
    Err(WalletError::InsufficientFunds {
        needed: needed.to_sat(),
        available: available.to_sat(),
    })
}
