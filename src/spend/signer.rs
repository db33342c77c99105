use bitcoin::bip32::{ChildNumber, Xpriv};
use bitcoin::hashes::Hash;
use bitcoin::key::CompressedPublicKey;
use bitcoin::secp256k1::{All, Message, Secp256k1, SecretKey};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{Address, Network, Transaction};

use crate::error::WalletError;
use crate::storage::WalletKeys;
use crate::wallet::types::{Keychain, OwnedOutput};

/// Wallet signer for P2WPKH (SegWit v0) inputs only.
///
/// Keys are derived from the BIP84 account key at
/// `m/84'/coin'/0'/keychain/index`, taken from each spent output.
#[derive(Clone)]
pub struct WalletSigner {
    account: Xpriv,
    network: Network,
    secp: Secp256k1<All>,
}

impl WalletSigner {
    pub fn new(keys: &WalletKeys) -> Self {
        Self {
            account: keys.xprv,
            network: keys.network,
            secp: Secp256k1::new(),
        }
    }

    /// Derive the private key for a specific keychain/index pair
    pub fn derive_private_key(
        &self,
        keychain: Keychain,
        index: u32,
    ) -> Result<SecretKey, WalletError> {
        let path = [
            ChildNumber::from_normal_idx(keychain.branch())
                .map_err(|e| WalletError::KeyDerivation(e.to_string()))?,
            ChildNumber::from_normal_idx(index).map_err(|_| WalletError::InvalidIndex(index))?,
        ];

        let derived = self
            .account
            .derive_priv(&self.secp, &path)
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;

        Ok(derived.private_key)
    }

    /// Sign every input of `tx`; `prevouts[i]` is the output input `i` spends.
    pub fn sign_transaction(
        &self,
        mut tx: Transaction,
        prevouts: &[OwnedOutput],
    ) -> Result<Transaction, WalletError> {
        if prevouts.len() != tx.input.len() {
            return Err(WalletError::Signing(format!(
                "{} inputs but {} previous outputs",
                tx.input.len(),
                prevouts.len()
            )));
        }

        for (input_index, (input, prevout)) in tx.input.iter().zip(prevouts).enumerate() {
            if input.previous_output != prevout.outpoint {
                return Err(WalletError::Signing(format!(
                    "input {} does not spend {}",
                    input_index, prevout.outpoint
                )));
            }
        }

        let mut witnesses = Vec::with_capacity(tx.input.len());
        {
            let mut sighash_cache = SighashCache::new(&tx);

            for (input_index, prevout) in prevouts.iter().enumerate() {
                let secret_key =
                    self.derive_private_key(prevout.keychain, prevout.derivation_index)?;
                let public_key = CompressedPublicKey(secret_key.public_key(&self.secp));

                let expected = Address::p2wpkh(&public_key, self.network).script_pubkey();
                if expected != prevout.script_pubkey {
                    return Err(WalletError::Signing(format!(
                        "derived key {}/{} does not own {}",
                        prevout.keychain, prevout.derivation_index, prevout.outpoint
                    )));
                }

                let sighash = sighash_cache
                    .p2wpkh_signature_hash(
                        input_index,
                        &prevout.script_pubkey,
                        prevout.amount,
                        EcdsaSighashType::All,
                    )
                    .map_err(|e| WalletError::Signing(e.to_string()))?;

                let message = Message::from_digest(sighash.to_byte_array());
                let signature = self.secp.sign_ecdsa(&message, &secret_key);

                let mut sig_with_hashtype = signature.serialize_der().to_vec();
                sig_with_hashtype.push(EcdsaSighashType::All.to_u32() as u8);

                witnesses.push((sig_with_hashtype, public_key.to_bytes()));
            }
        }

        for (input, (sig, pubkey)) in tx.input.iter_mut().zip(witnesses) {
            input.witness.clear();
            input.witness.push(sig);
            input.witness.push(pubkey);
        }

        Ok(tx)
    }
}
