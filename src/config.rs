//! Wallet configuration from environment variables
//!
//! Controls the Bitcoin network, the data directory and the engine policy
//! knobs. Defaults to Signet.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use bitcoin::{Amount, Network};

use crate::error::WalletError;
use crate::spend::CoinSelectionPolicy;

/// Default number of addresses scanned past the reveal cursor of each keychain
pub const DEFAULT_LOOKAHEAD: u32 = 25;
/// Default number of recent block identities retained for reorg handling
pub const DEFAULT_CHAIN_TAIL_LEN: usize = 100;
/// Blocks a coinbase output must wait before it can be spent
pub const COINBASE_MATURITY: u32 = 100;
/// Smallest change output the builder will create
pub const DEFAULT_DUST_LIMIT: Amount = Amount::from_sat(546);

#[derive(Clone, Debug)]
pub struct WalletConfig {
    /// Bitcoin network type
    pub network: Network,
    /// Directory holding wallet directories
    pub data_dir: PathBuf,
    /// Addresses scanned past the reveal cursor, per keychain
    pub lookahead: u32,
    /// Recent block identities kept for reorg unwinding
    pub chain_tail_len: usize,
    /// Depth at which a spent output is dropped from the ledger
    pub finality_depth: u32,
    pub coinbase_maturity: u32,
    pub dust_limit: Amount,
    pub coin_selection: CoinSelectionPolicy,
}

impl WalletConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `BITCOIN_NETWORK`: "signet" (default), "regtest", "testnet" or "bitcoin"
    /// - `WALLET_DATA_DIR`: wallet storage root (default `./wallets`)
    /// - `WALLET_LOOKAHEAD`, `WALLET_CHAIN_TAIL_LEN`, `WALLET_FINALITY_DEPTH`,
    ///   `WALLET_COINBASE_MATURITY`, `WALLET_DUST_LIMIT`: numeric policy values
    /// - `WALLET_COIN_SELECTION`: "largest-first" (default) or "oldest-first"
    ///
    /// Unparseable values fall back to their defaults with a warning.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let network_str = env::var("BITCOIN_NETWORK")
            .unwrap_or_else(|_| "signet".to_string())
            .to_lowercase();

        let network = match network_str.as_str() {
            "regtest" => {
                log::info!("🔧 Using REGTEST network");
                Network::Regtest
            }
            "testnet" => {
                log::info!("🧪 Using TESTNET network");
                Network::Testnet
            }
            "bitcoin" | "mainnet" => {
                log::info!("₿ Using MAINNET network");
                Network::Bitcoin
            }
            "signet" | "" => {
                log::info!("🌐 Using SIGNET network");
                Network::Signet
            }
            other => {
                log::warn!("⚠️  Unknown network '{}', defaulting to Signet", other);
                Network::Signet
            }
        };

        let data_dir = env::var("WALLET_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        log::info!("📁 Wallet data directory: {}", data_dir.display());

        let chain_tail_len = env_number("WALLET_CHAIN_TAIL_LEN", defaults.chain_tail_len);

        let coin_selection = match env::var("WALLET_COIN_SELECTION") {
            Ok(value) => CoinSelectionPolicy::from_str(&value).unwrap_or_else(|e| {
                log::warn!("⚠️  {}, using {}", e, defaults.coin_selection);
                defaults.coin_selection
            }),
            Err(_) => defaults.coin_selection,
        };

        Self {
            network,
            data_dir,
            lookahead: env_number("WALLET_LOOKAHEAD", defaults.lookahead),
            chain_tail_len,
            finality_depth: env_number("WALLET_FINALITY_DEPTH", chain_tail_len as u32),
            coinbase_maturity: env_number("WALLET_COINBASE_MATURITY", defaults.coinbase_maturity),
            dust_limit: Amount::from_sat(env_number(
                "WALLET_DUST_LIMIT",
                defaults.dust_limit.to_sat(),
            )),
            coin_selection,
        }
    }

    /// Check the policy values against each other
    pub fn validate(&self) -> Result<(), WalletError> {
        if self.lookahead == 0 {
            return Err(WalletError::InvalidConfig(
                "lookahead must be at least 1".into(),
            ));
        }
        if self.chain_tail_len < 2 {
            return Err(WalletError::InvalidConfig(
                "chain tail must retain at least 2 blocks".into(),
            ));
        }
        // Pruned outputs must never be needed by an unwind.
        if (self.finality_depth as usize) < self.chain_tail_len {
            return Err(WalletError::InvalidConfig(format!(
                "finality depth {} is shorter than the retained chain tail {}",
                self.finality_depth, self.chain_tail_len
            )));
        }
        Ok(())
    }

    /// Get the BIP44 coin type for this network
    ///
    /// - Mainnet: 0
    /// - Testnet/Signet/Regtest: 1
    pub fn coin_type(&self) -> u32 {
        match self.network {
            Network::Bitcoin => 0,
            _ => 1, // All test networks use coin type 1
        }
    }

    /// Get the account derivation path for this network
    ///
    /// Returns: "m/84'/1'/0'" for test networks, "m/84'/0'/0'" for mainnet
    pub fn account_path(&self) -> String {
        format!("m/84'/{}'/0'", self.coin_type())
    }
}

impl Default for WalletConfig {
    /// Default configuration (Signet)
    fn default() -> Self {
        Self {
            network: Network::Signet,
            data_dir: PathBuf::from("./wallets"),
            lookahead: DEFAULT_LOOKAHEAD,
            chain_tail_len: DEFAULT_CHAIN_TAIL_LEN,
            finality_depth: DEFAULT_CHAIN_TAIL_LEN as u32,
            coinbase_maturity: COINBASE_MATURITY,
            dust_limit: DEFAULT_DUST_LIMIT,
            coin_selection: CoinSelectionPolicy::default(),
        }
    }
}

fn env_number<T>(key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display + Copy,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("⚠️  Invalid {}='{}', using {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}
