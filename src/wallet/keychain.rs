use std::collections::{BTreeSet, HashMap};

use bitcoin::bip32::{ChildNumber, Xpub};
use bitcoin::secp256k1::{Secp256k1, VerifyOnly};
use bitcoin::{Address, Network, Script, ScriptBuf};
use serde::{Deserialize, Serialize};

use crate::error::WalletError;
use crate::storage::WalletKeys;
use crate::wallet::types::Keychain;

/// Reveal cursor and used set of one keychain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeychainIndices {
    /// Number of revealed addresses; never decreases
    pub next_index: u32,
    pub used: BTreeSet<u32>,
}

impl KeychainIndices {
    /// Lowest index never marked used
    pub fn lowest_unused(&self) -> u32 {
        let mut index = 0u32;
        while self.used.contains(&index) {
            index += 1;
        }
        index
    }
}

/// Derives P2WPKH addresses for both keychains and recognizes the wallet's
/// scripts in transactions.
#[derive(Clone)]
pub struct KeyDeriver {
    network: Network,
    external: Xpub,
    internal: Xpub,
    secp: Secp256k1<VerifyOnly>,
    lookahead: u32,
    external_indices: KeychainIndices,
    internal_indices: KeychainIndices,
    spk_index: HashMap<ScriptBuf, (Keychain, u32)>,
    /// Scripts derived so far per keychain: indices `0..derived`
    external_derived: u32,
    internal_derived: u32,
}

impl KeyDeriver {
    /// Build the deriver and its script index.
    ///
    /// Any derivation failure here is fatal: the wallet cannot recognize
    /// its own outputs without the full lookahead window.
    pub fn new(
        keys: &WalletKeys,
        lookahead: u32,
        external_indices: KeychainIndices,
        internal_indices: KeychainIndices,
    ) -> Result<Self, WalletError> {
        let mut deriver = Self {
            network: keys.network,
            external: keys.keychain_xpub(Keychain::External)?,
            internal: keys.keychain_xpub(Keychain::Internal)?,
            secp: Secp256k1::verification_only(),
            lookahead,
            external_indices,
            internal_indices,
            spk_index: HashMap::new(),
            external_derived: 0,
            internal_derived: 0,
        };
        deriver.fill_lookahead()?;
        log::debug!(
            "Key deriver ready: {} scripts indexed (lookahead {})",
            deriver.spk_index.len(),
            lookahead
        );
        Ok(deriver)
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Derive the P2WPKH address at `keychain/index`. Pure.
    pub fn derive_address(&self, keychain: Keychain, index: u32) -> Result<Address, WalletError> {
        let child = ChildNumber::from_normal_idx(index).map_err(|_| WalletError::InvalidIndex(index))?;

        let derived = self
            .xpub(keychain)
            .derive_pub(&self.secp, &[child])
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;

        Ok(Address::p2wpkh(&derived.to_pub(), self.network))
    }

    pub fn derive_script(&self, keychain: Keychain, index: u32) -> Result<ScriptBuf, WalletError> {
        Ok(self.derive_address(keychain, index)?.script_pubkey())
    }

    /// External address at `index`, regardless of usage
    pub fn peek_address(&self, index: u32) -> Result<Address, WalletError> {
        self.derive_address(Keychain::External, index)
    }

    /// Lowest never-used index of the keychain, without touching any state
    pub fn lowest_unused(&self, keychain: Keychain) -> u32 {
        self.indices(keychain).lowest_unused()
    }

    /// Lowest never-used address. The index is revealed but not marked used,
    /// so repeated calls return the same address until funds arrive.
    pub fn next_unused(&mut self, keychain: Keychain) -> Result<(u32, Address), WalletError> {
        let index = self.lowest_unused(keychain);
        let address = self.derive_address(keychain, index)?;
        self.reveal_through(keychain, index)?;
        Ok((index, address))
    }

    /// Address at the reveal cursor; advances the cursor.
    pub fn reveal_next(&mut self, keychain: Keychain) -> Result<(u32, Address), WalletError> {
        let index = self.indices(keychain).next_index;
        let address = self.derive_address(keychain, index)?;
        self.reveal_through(keychain, index)?;
        Ok((index, address))
    }

    /// Mark an index as used. Returns false if it already was.
    pub fn mark_used(&mut self, keychain: Keychain, index: u32) -> Result<bool, WalletError> {
        let inserted = self.indices_mut(keychain).used.insert(index);
        self.reveal_through(keychain, index)?;
        Ok(inserted)
    }

    pub fn is_used(&self, keychain: Keychain, index: u32) -> bool {
        self.indices(keychain).used.contains(&index)
    }

    /// Derivation of a script, if it belongs to the scanned range
    pub fn index_of_spk(&self, script: &Script) -> Option<(Keychain, u32)> {
        self.spk_index.get(script).copied()
    }

    pub fn indices(&self, keychain: Keychain) -> &KeychainIndices {
        match keychain {
            Keychain::External => &self.external_indices,
            Keychain::Internal => &self.internal_indices,
        }
    }

    fn indices_mut(&mut self, keychain: Keychain) -> &mut KeychainIndices {
        match keychain {
            Keychain::External => &mut self.external_indices,
            Keychain::Internal => &mut self.internal_indices,
        }
    }

    fn xpub(&self, keychain: Keychain) -> &Xpub {
        match keychain {
            Keychain::External => &self.external,
            Keychain::Internal => &self.internal,
        }
    }

    fn reveal_through(&mut self, keychain: Keychain, index: u32) -> Result<(), WalletError> {
        let indices = self.indices_mut(keychain);
        indices.next_index = indices.next_index.max(index.saturating_add(1));
        self.fill_lookahead()
    }

    /// Extend the script index of each keychain up to cursor + lookahead
    fn fill_lookahead(&mut self) -> Result<(), WalletError> {
        for keychain in Keychain::ALL {
            let target = self
                .indices(keychain)
                .next_index
                .saturating_add(self.lookahead);
            let derived = match keychain {
                Keychain::External => self.external_derived,
                Keychain::Internal => self.internal_derived,
            };

            for index in derived..target {
                let script = self.derive_script(keychain, index)?;
                self.spk_index.insert(script, (keychain, index));
            }

            if target > derived {
                match keychain {
                    Keychain::External => self.external_derived = target,
                    Keychain::Internal => self.internal_derived = target,
                }
            }
        }
        Ok(())
    }
}
