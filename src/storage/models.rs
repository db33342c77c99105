//! Data models for wallet storage

use bitcoin::BlockHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::wallet::chain_sync::SyncState;
use crate::wallet::keychain::KeychainIndices;
use crate::wallet::types::{BlockId, OwnedOutput, TxRecord};

/// Format marker written into every wallet's metadata
pub const WALLET_FORMAT_VERSION: &str = "wallet-engine/state/v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub network: String,
    pub version: String,
    pub genesis_hash: BlockHash,
}

/// Everything the engine needs to resume where it stopped
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalletState {
    pub external: KeychainIndices,
    pub internal: KeychainIndices,
    pub outputs: Vec<OwnedOutput>,
    pub transactions: Vec<TxRecord>,
    /// Retained chain tail, oldest first
    pub recent_blocks: Vec<BlockId>,
    pub sync: SyncState,
}
