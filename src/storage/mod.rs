//! Wallet persistence
//!
//! - `file_system.rs` - per-wallet directory with atomic JSON writes
//! - `keys.rs` - BIP39/BIP84 account keys
//! - `models.rs` - on-disk header and engine state

mod file_system;
mod keys;
mod models;

pub use file_system::Storage;
pub use keys::{KeyManager, WalletKeys};
pub use models::{Metadata, WalletState, WALLET_FORMAT_VERSION};
