use bitcoin::{BlockHash, Network, Txid};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Wallet already exists: {0}")]
    WalletExists(String),

    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    #[error("Must have at least one recipient")]
    NoRecipient,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid amount for {0}: amount must be greater than zero")]
    InvalidAmount(String),

    #[error("Invalid keychain selector: {0}")]
    InvalidKeychain(String),

    #[error("Invalid derivation index: {0}")]
    InvalidIndex(u32),

    #[error("Invalid fee rate: {0} sat/vB")]
    InvalidFeeRate(u64),

    #[error("Insufficient funds: need {needed} sats, but only {available} sats are spendable")]
    InsufficientFunds { needed: u64, available: u64 },

    #[error("Block {hash} at height {height} does not connect to wallet tip at height {tip_height}")]
    CannotConnect {
        height: u32,
        hash: BlockHash,
        tip_height: u32,
    },

    #[error("Reorg to height {fork_height} is deeper than the retained chain tail (oldest height {oldest_height})")]
    ReorgTooDeep { fork_height: u32, oldest_height: u32 },

    #[error("Transaction not found: {0}")]
    TransactionNotFound(Txid),

    #[error("Transaction {0} is already confirmed")]
    AlreadyConfirmed(Txid),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unsupported wallet format version: {0}")]
    HeaderVersion(String),

    #[error("Wallet network mismatch: expected {expected}, found {found}")]
    NetworkMismatch { expected: Network, found: String },

    #[error("Wallet genesis hash mismatch: expected {expected}, found {found}")]
    GenesisMismatch { expected: BlockHash, found: BlockHash },

    #[error("No wallet engine implementation was provided")]
    NoWalletEngine,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WalletError {
    /// Errors caused by bad caller input. Nothing was mutated.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            WalletError::NoRecipient
                | WalletError::InvalidAddress(_)
                | WalletError::InvalidAmount(_)
                | WalletError::InvalidKeychain(_)
                | WalletError::InvalidIndex(_)
                | WalletError::InvalidFeeRate(_)
        )
    }

    /// Errors after which the engine's state can no longer be trusted to
    /// track the chain.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WalletError::ReorgTooDeep { .. }
                | WalletError::KeyDerivation(_)
                | WalletError::Internal(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Wallet directory not found: {0}")]
    DirectoryNotFound(String),

    #[error("File not found: {0}")]
    FileNotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(WalletError::NoRecipient.is_usage());
        assert!(!WalletError::NoRecipient.is_fatal());

        let deep = WalletError::ReorgTooDeep {
            fork_height: 3,
            oldest_height: 10,
        };
        assert!(deep.is_fatal());
        assert!(!deep.is_usage());

        let funds = WalletError::InsufficientFunds {
            needed: 10,
            available: 5,
        };
        assert!(!funds.is_usage());
        assert!(!funds.is_fatal());
    }

    #[test]
    fn test_recipient_message() {
        assert_eq!(
            WalletError::NoRecipient.to_string(),
            "Must have at least one recipient"
        );
    }
}
