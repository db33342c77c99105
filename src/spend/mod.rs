//! Spend construction
//!
//! - Coin selection and fee arithmetic
//! - Unsigned transaction assembly
//! - P2WPKH signing

pub mod coin_selection;
pub mod signer;
pub mod transaction;

pub use coin_selection::{select_coins, CoinSelectionPolicy, Selection, SelectionParams};
pub use signer::WalletSigner;
pub use transaction::{output_vbytes, TransactionBuilder, TX_INPUT_VBYTES, TX_OVERHEAD_VBYTES};
