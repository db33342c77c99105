//! Wallet Engine: a deterministic BIP84 Bitcoin wallet
//!
//! Tracks coins derived from a single HD account, follows the host's chain
//! (blocks, disconnects, reorgs) and mempool, and builds signed spends.
//!
//! # Architecture
//!
//! - **Key Deriver**: P2WPKH receive and change addresses with lookahead
//! - **UTXO Ledger**: owned outputs and wallet transactions
//! - **Chain Synchronizer / Mempool Ingestor**: apply host events to the ledger
//! - **Transaction Builder**: coin selection, fees, change, signing
//! - **Manager**: creates or loads the engine and dispatches host notifications
//!
//! # Example
//!
//! ```ignore
//! use wallet_engine::{BitcoinWallet, Recipient, Wallet, WalletConfig};
//!
//! let wallet = BitcoinWallet::create(WalletConfig::from_env(), None, "default")?;
//! wallet.apply_block(&block, height)?;
//!
//! let receive = wallet.unused_address()?;
//! let raw_tx = wallet.create_tx(2, &[Recipient::new(receive.address.to_string(), 10_000)])?;
//! ```

pub mod config;
pub mod error;
pub mod spend;
pub mod storage;
pub mod wallet;

pub use config::WalletConfig;
pub use error::{StorageError, WalletError};
pub use spend::CoinSelectionPolicy;
pub use wallet::balance::Balance;
pub use wallet::engine::{BitcoinWallet, Wallet};
pub use wallet::manager::{
    ChainNotification, ChainNotifier, FileWalletFactory, Manager, ManagerConfig,
    NotificationHandler, WalletFactory,
};
pub use wallet::types::{
    AddressInfo, ApplyResult, BlockId, Keychain, MempoolTx, Recipient, TxInfo, UtxoInfo,
};

// Common result type
pub type Result<T> = std::result::Result<T, WalletError>;
