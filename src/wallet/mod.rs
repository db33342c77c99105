//! Wallet Core Module
//!
//! - `keychain.rs` - BIP84 address derivation and script lookup
//! - `ledger.rs` - Owned outputs and transaction records
//! - `scan.rs` - Recognizing and admitting wallet transactions
//! - `chain_sync.rs` - Block application and reorgs
//! - `mempool.rs` - Unconfirmed transaction batches
//! - `balance.rs` - Balance buckets
//! - `engine.rs` - Locked, persisted engine behind the `Wallet` trait
//! - `manager.rs` - Host wiring

pub mod balance;
pub mod chain_sync;
pub mod engine;
pub mod keychain;
pub mod ledger;
pub mod manager;
pub mod mempool;
pub mod scan;
pub mod types;

pub use balance::Balance;
pub use engine::{BitcoinWallet, Wallet};
pub use manager::{
    ChainNotification, ChainNotifier, FileWalletFactory, Manager, ManagerConfig, WalletFactory,
};
