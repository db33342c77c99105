//! Value types exchanged between the engine and its host

use std::fmt;
use std::str::FromStr;

use bitcoin::consensus::encode;
use bitcoin::{Address, Amount, BlockHash, ScriptBuf, Transaction, Txid};
use serde::{Deserialize, Serialize};

use crate::error::WalletError;

/// Keychain branch of the BIP84 account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Keychain {
    /// Receive addresses handed out to payers (branch 0)
    External,
    /// Change addresses (branch 1)
    Internal,
}

impl Keychain {
    pub const ALL: [Keychain; 2] = [Keychain::External, Keychain::Internal];

    /// BIP32 child number of the branch
    pub fn branch(&self) -> u32 {
        match self {
            Keychain::External => 0,
            Keychain::Internal => 1,
        }
    }
}

impl TryFrom<u32> for Keychain {
    type Error = WalletError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Keychain::External),
            1 => Ok(Keychain::Internal),
            other => Err(WalletError::InvalidKeychain(other.to_string())),
        }
    }
}

impl FromStr for Keychain {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "external" | "receive" | "0" => Ok(Keychain::External),
            "internal" | "change" | "1" => Ok(Keychain::Internal),
            other => Err(WalletError::InvalidKeychain(other.to_string())),
        }
    }
}

impl fmt::Display for Keychain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Keychain::External => write!(f, "external"),
            Keychain::Internal => write!(f, "internal"),
        }
    }
}

/// Height and hash of a block on the wallet's chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId {
    pub height: u32,
    pub hash: BlockHash,
}

/// Where an observation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Mempool,
    Block(u32),
}

impl Origin {
    pub fn confirmation_height(&self) -> Option<u32> {
        match self {
            Origin::Mempool => None,
            Origin::Block(height) => Some(*height),
        }
    }
}

/// Output paying to one of the wallet's scripts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedOutput {
    pub outpoint: bitcoin::OutPoint,
    pub amount: Amount,
    pub script_pubkey: ScriptBuf,
    pub keychain: Keychain,
    pub derivation_index: u32,
    pub confirmation_height: Option<u32>,
    pub spent_by: Option<Txid>,
    pub is_coinbase: bool,
}

impl OwnedOutput {
    pub fn is_spent(&self) -> bool {
        self.spent_by.is_some()
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmation_height.is_some()
    }

    /// A coinbase output is immature while `tip - height < maturity`.
    /// Unconfirmed coinbase outputs never count as mature.
    pub fn is_mature(&self, tip_height: u32, coinbase_maturity: u32) -> bool {
        if !self.is_coinbase {
            return true;
        }
        match self.confirmation_height {
            Some(height) => tip_height.saturating_sub(height) >= coinbase_maturity,
            None => false,
        }
    }
}

/// A wallet-relevant transaction and what it did to the wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRecord {
    pub txid: Txid,
    pub tx: Transaction,
    /// Owned inputs consumed
    pub spent: Amount,
    /// Owned outputs created
    pub received: Amount,
    pub confirmation_height: Option<u32>,
    /// Unix seconds the transaction was last seen unconfirmed, 0 if never
    pub last_seen: u64,
}

/// Unconfirmed transaction handed over by the host mempool
#[derive(Debug, Clone)]
pub struct MempoolTx {
    pub tx: Transaction,
    /// Unix seconds the host first accepted the transaction
    pub added_unix: u64,
}

impl MempoolTx {
    pub fn new(tx: Transaction, added_unix: u64) -> Self {
        Self { tx, added_unix }
    }

    /// Decode a consensus-serialized transaction
    pub fn from_bytes(raw: &[u8], added_unix: u64) -> Result<Self, WalletError> {
        let tx: Transaction =
            encode::deserialize(raw).map_err(|e| WalletError::Decode(e.to_string()))?;
        Ok(Self { tx, added_unix })
    }

    pub fn from_hex(raw_hex: &str, added_unix: u64) -> Result<Self, WalletError> {
        let raw = hex::decode(raw_hex.trim()).map_err(|e| WalletError::Decode(e.to_string()))?;
        Self::from_bytes(&raw, added_unix)
    }
}

/// Wallet-relevant transactions found by a block or mempool application
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyResult {
    pub relevant_txids: Vec<Txid>,
}

impl ApplyResult {
    pub fn is_empty(&self) -> bool {
        self.relevant_txids.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressInfo {
    pub index: u32,
    pub keychain: Keychain,
    pub address: Address,
}

/// Payment request passed to `create_tx`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub amount: u64,
    pub address: String,
}

impl Recipient {
    pub fn new(address: impl Into<String>, amount: u64) -> Self {
        Self {
            amount,
            address: address.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInfo {
    pub txid: Txid,
    pub tx: Transaction,
    pub spent: Amount,
    pub received: Amount,
    pub confirmations: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtxoInfo {
    pub txid: Txid,
    pub vout: u32,
    pub amount: Amount,
    pub script_pubkey: ScriptBuf,
    pub is_change: bool,
    pub derivation_index: u32,
    pub confirmations: u32,
}

/// Confirmations of something confirmed at `height` seen from `tip_height`
pub fn confirmations(height: Option<u32>, tip_height: u32) -> u32 {
    match height {
        Some(h) if h <= tip_height => tip_height - h + 1,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keychain_selectors() {
        assert_eq!(Keychain::try_from(0).unwrap(), Keychain::External);
        assert_eq!(Keychain::try_from(1).unwrap(), Keychain::Internal);
        assert!(matches!(
            Keychain::try_from(2),
            Err(WalletError::InvalidKeychain(_))
        ));
        assert_eq!("change".parse::<Keychain>().unwrap(), Keychain::Internal);
        assert!("savings".parse::<Keychain>().is_err());
    }

    #[test]
    fn test_confirmations() {
        assert_eq!(confirmations(Some(100), 110), 11);
        assert_eq!(confirmations(Some(110), 110), 1);
        assert_eq!(confirmations(None, 110), 0);
    }

    #[test]
    fn test_mempool_tx_rejects_garbage() {
        let err = MempoolTx::from_bytes(&[0xde, 0xad], 0).unwrap_err();
        assert!(matches!(err, WalletError::Decode(_)));
        assert!(matches!(
            MempoolTx::from_hex("not hex", 0),
            Err(WalletError::Decode(_))
        ));
    }
}
