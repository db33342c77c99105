use bip39::Mnemonic;
use bitcoin::bip32::{ChildNumber, DerivationPath, Fingerprint, Xpriv, Xpub};
use bitcoin::secp256k1::{rand, Secp256k1};
use bitcoin::Network;
use std::fmt;
use std::str::FromStr;

use crate::error::WalletError;
use crate::wallet::types::Keychain;

pub struct KeyManager;

impl KeyManager {
    /// Generate a new random wallet with a 12-word mnemonic and keys
    pub fn generate(network: Network) -> Result<WalletKeys, WalletError> {
        let entropy = rand::random::<[u8; 16]>();

        let mnemonic = Mnemonic::from_entropy(&entropy)
            .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;

        Self::derive_keys(mnemonic, network)
    }

    /// Import a wallet from an existing mnemonic phrase
    pub fn from_mnemonic(words: &str, network: Network) -> Result<WalletKeys, WalletError> {
        let mnemonic =
            Mnemonic::parse(words).map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;

        Self::derive_keys(mnemonic, network)
    }

    /// Derive the BIP84 account keys of a mnemonic
    pub fn derive_keys(mnemonic: Mnemonic, network: Network) -> Result<WalletKeys, WalletError> {
        let secp = Secp256k1::new();

        let seed = mnemonic.to_seed("");

        let master_key = Xpriv::new_master(network, &seed)
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;

        let fingerprint = master_key.fingerprint(&secp);

        let coin_type = match network {
            Network::Bitcoin => 0,
            _ => 1,
        };
        let derivation_path = DerivationPath::from_str(&format!("m/84'/{}'/0'", coin_type))
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;

        let account_key = master_key
            .derive_priv(&secp, &derivation_path)
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;

        let xpub = Xpub::from_priv(&secp, &account_key);

        Ok(WalletKeys {
            mnemonic,
            xprv: account_key,
            xpub,
            fingerprint,
            coin_type,
            network,
        })
    }
}

/// Account-level key material (m/84'/coin'/0')
#[derive(Clone)]
pub struct WalletKeys {
    pub mnemonic: Mnemonic,
    pub xprv: Xpriv,
    pub xpub: Xpub,
    pub fingerprint: Fingerprint,
    pub coin_type: u32,
    pub network: Network,
}

impl WalletKeys {
    /// Extended public key of one keychain branch
    pub fn keychain_xpub(&self, keychain: Keychain) -> Result<Xpub, WalletError> {
        let secp = Secp256k1::verification_only();
        let branch = ChildNumber::from_normal_idx(keychain.branch())
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
        self.xpub
            .derive_pub(&secp, &[branch])
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))
    }

    /// BIP84 output descriptor of one keychain
    pub fn descriptor(&self, keychain: Keychain) -> String {
        format!(
            "wpkh([{}/84h/{}h/0h]{}/{}/*)",
            self.fingerprint,
            self.coin_type,
            self.xpub,
            keychain.branch()
        )
    }

    pub fn mnemonic_words(&self) -> Vec<String> {
        self.mnemonic.words().map(str::to_string).collect()
    }
}

// Never print key material.
impl fmt::Debug for WalletKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletKeys")
            .field("fingerprint", &self.fingerprint)
            .field("network", &self.network)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn test_generate_twelve_words() {
        let keys = KeyManager::generate(Network::Regtest).unwrap();
        assert_eq!(keys.mnemonic_words().len(), 12);
    }

    #[test]
    fn test_import_is_deterministic() {
        let a = KeyManager::from_mnemonic(TEST_MNEMONIC, Network::Regtest).unwrap();
        let b = KeyManager::from_mnemonic(TEST_MNEMONIC, Network::Regtest).unwrap();
        assert_eq!(a.xpub, b.xpub);
        assert_eq!(a.fingerprint.to_string(), "73c5da0a");
        assert!(a.descriptor(Keychain::Internal).ends_with("/1/*)"));
    }

    #[test]
    fn test_invalid_mnemonic() {
        let result = KeyManager::from_mnemonic("not a real phrase", Network::Regtest);
        assert!(matches!(result, Err(WalletError::InvalidMnemonic(_))));
    }

    #[test]
    fn test_debug_hides_keys() {
        let keys = KeyManager::from_mnemonic(TEST_MNEMONIC, Network::Regtest).unwrap();
        let printed = format!("{:?}", keys);
        assert!(!printed.contains("abandon"));
        assert!(!printed.contains("tprv"));
    }
}
