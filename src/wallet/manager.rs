//! Wires the wallet engine into a host node.
//!
//! The host supplies the engine through a `WalletFactory` and, optionally, a
//! `ChainNotifier` to which the manager subscribes exactly once.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bitcoin::Block;

use crate::config::WalletConfig;
use crate::error::WalletError;
use crate::storage::Storage;
use crate::wallet::engine::{BitcoinWallet, Wallet};
use crate::wallet::types::{BlockId, MempoolTx};

/// Directory below the data dir that holds the wallet
pub const WALLET_DIR_NAME: &str = "wallet";
/// Name of the wallet the manager opens
pub const DEFAULT_WALLET_NAME: &str = "default";

/// Creates and loads wallet engines
pub trait WalletFactory: Send + Sync {
    fn create(&self, wallet_dir: &Path, config: &WalletConfig) -> Result<Arc<dyn Wallet>, WalletError>;

    fn load(&self, wallet_dir: &Path, config: &WalletConfig) -> Result<Arc<dyn Wallet>, WalletError>;

    /// Whether `load` would find a wallet in `wallet_dir`
    fn exists(&self, wallet_dir: &Path) -> bool;
}

/// Factory backed by the JSON file storage
#[derive(Debug, Clone, Copy, Default)]
pub struct FileWalletFactory;

impl WalletFactory for FileWalletFactory {
    fn create(&self, wallet_dir: &Path, config: &WalletConfig) -> Result<Arc<dyn Wallet>, WalletError> {
        let storage = Storage::new_with_base_dir(wallet_dir.to_path_buf());
        let wallet = BitcoinWallet::create(config.clone(), Some(storage), DEFAULT_WALLET_NAME)?;
        Ok(Arc::new(wallet))
    }

    fn load(&self, wallet_dir: &Path, config: &WalletConfig) -> Result<Arc<dyn Wallet>, WalletError> {
        let storage = Storage::new_with_base_dir(wallet_dir.to_path_buf());
        let wallet = BitcoinWallet::load(config.clone(), storage, DEFAULT_WALLET_NAME)?;
        Ok(Arc::new(wallet))
    }

    fn exists(&self, wallet_dir: &Path) -> bool {
        Storage::new_with_base_dir(wallet_dir.to_path_buf()).wallet_exists(DEFAULT_WALLET_NAME)
    }
}

/// Chain events the host delivers
#[derive(Debug, Clone)]
pub enum ChainNotification {
    BlockConnected { block: Block, height: u32 },
    BlockDisconnected(BlockId),
}

pub type NotificationHandler = Box<dyn Fn(&ChainNotification) + Send + Sync>;

/// Host-side notification dispatcher
pub trait ChainNotifier {
    /// Register a handler. It is invoked synchronously for every event.
    fn subscribe(&self, handler: NotificationHandler);
}

pub struct ManagerConfig {
    pub wallet: WalletConfig,
    pub factory: Option<Arc<dyn WalletFactory>>,
}

pub struct Manager {
    config: WalletConfig,
    wallet: Arc<dyn Wallet>,
}

impl Manager {
    /// Open (or create) the wallet and subscribe to chain notifications.
    pub fn new(
        config: ManagerConfig,
        notifier: Option<&dyn ChainNotifier>,
    ) -> Result<Self, WalletError> {
        let factory = config.factory.ok_or(WalletError::NoWalletEngine)?;
        let wallet_config = config.wallet;

        let wallet_dir = Self::wallet_dir(&wallet_config.data_dir);
        std::fs::create_dir_all(&wallet_dir).map_err(crate::error::StorageError::from)?;

        let wallet = if factory.exists(&wallet_dir) {
            log::info!("Loading wallet from {}", wallet_dir.display());
            factory.load(&wallet_dir, &wallet_config)?
        } else {
            log::info!("Creating wallet in {}", wallet_dir.display());
            factory.create(&wallet_dir, &wallet_config)?
        };

        if let Some(notifier) = notifier {
            let subscribed = Arc::clone(&wallet);
            notifier.subscribe(Box::new(move |notification| {
                dispatch_notification(subscribed.as_ref(), notification)
            }));
        }

        Ok(Self {
            config: wallet_config,
            wallet,
        })
    }

    pub fn wallet_dir(data_dir: &Path) -> PathBuf {
        data_dir.join(WALLET_DIR_NAME)
    }

    pub fn does_wallet_dir_exist(data_dir: &Path) -> bool {
        Self::wallet_dir(data_dir).exists()
    }

    pub fn wallet(&self) -> &Arc<dyn Wallet> {
        &self.wallet
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    /// Forward a mempool batch; failures are logged, not returned.
    pub fn notify_new_transactions(&self, txs: Vec<MempoolTx>) {
        let count = txs.len();
        match self.wallet.apply_mempool_transactions(txs) {
            Ok(result) if !result.is_empty() => log::info!(
                "Mempool: {} of {} tx(s) relevant to the wallet",
                result.relevant_txids.len(),
                count
            ),
            Ok(_) => {}
            Err(e) => log::error!("Failed to apply mempool transactions: {}", e),
        }
    }

    pub fn handle_chain_notification(&self, notification: &ChainNotification) {
        dispatch_notification(self.wallet.as_ref(), notification)
    }
}

fn dispatch_notification(wallet: &dyn Wallet, notification: &ChainNotification) {
    let outcome = match notification {
        ChainNotification::BlockConnected { block, height } => wallet
            .apply_block(block, *height)
            .map(|result| {
                if !result.is_empty() {
                    log::info!(
                        "Block {}: {} wallet tx(s)",
                        height,
                        result.relevant_txids.len()
                    );
                }
            }),
        ChainNotification::BlockDisconnected(block) => wallet.disconnect_block(*block),
    };

    if let Err(e) = outcome {
        if e.is_fatal() {
            log::error!("🚨 Wallet can no longer follow the chain: {}", e);
        } else {
            log::error!("Failed to apply chain notification: {}", e);
        }
    }
}
