//! The wallet engine: one lock around key derivation, the ledger and the
//! chain synchronizer, plus persistence after every mutation.

use std::cmp::Reverse;
use std::str::FromStr;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use bitcoin::consensus::encode::serialize;
use bitcoin::{Address, Amount, Block, BlockHash, FeeRate, Network, Script, ScriptBuf, Txid};

use crate::config::WalletConfig;
use crate::error::WalletError;
use crate::spend::{
    output_vbytes, select_coins, SelectionParams, TransactionBuilder, WalletSigner,
    TX_OVERHEAD_VBYTES,
};
use crate::storage::{KeyManager, Metadata, Storage, WalletKeys, WalletState, WALLET_FORMAT_VERSION};
use crate::wallet::balance::{self, Balance};
use crate::wallet::chain_sync::{genesis_id, ChainPolicy, ChainSynchronizer, ChainTail};
use crate::wallet::keychain::KeyDeriver;
use crate::wallet::ledger::UtxoLedger;
use crate::wallet::mempool;
use crate::wallet::types::{
    confirmations, AddressInfo, ApplyResult, BlockId, Keychain, MempoolTx, OwnedOutput, Recipient,
    TxInfo, UtxoInfo,
};

/// Host-facing wallet operations.
///
/// Mutations are applied atomically: on error the wallet is unchanged.
pub trait Wallet: Send + Sync {
    /// Lowest receive address that has not received funds yet
    fn unused_address(&self) -> Result<AddressInfo, WalletError>;

    /// Receive address never handed out before
    fn fresh_address(&self) -> Result<AddressInfo, WalletError>;

    fn peek_address(&self, index: u32) -> Result<AddressInfo, WalletError>;

    fn balance(&self) -> Result<Balance, WalletError>;

    /// Most recent blocks of the retained tail, newest first
    fn recent_blocks(&self, count: usize) -> Result<Vec<BlockId>, WalletError>;

    fn tip(&self) -> Result<BlockId, WalletError>;

    fn apply_block(&self, block: &Block, height: u32) -> Result<ApplyResult, WalletError>;

    fn disconnect_block(&self, block: BlockId) -> Result<(), WalletError>;

    fn apply_mempool_transactions(&self, txs: Vec<MempoolTx>)
        -> Result<ApplyResult, WalletError>;

    /// Build and sign a payment; returns the consensus-encoded transaction.
    /// The transaction is recorded as pending but not broadcast.
    fn create_tx(&self, fee_rate: u64, recipients: &[Recipient]) -> Result<Vec<u8>, WalletError>;

    /// Forget an unconfirmed transaction, releasing the outputs it spent
    fn cancel_tx(&self, txid: &Txid) -> Result<(), WalletError>;

    /// Recovery phrase. Secret: never log it.
    fn mnemonic_words(&self) -> Vec<String>;

    /// Wallet transactions, most confirmations first
    fn transactions(&self) -> Result<Vec<TxInfo>, WalletError>;

    /// Unspent outputs, most confirmations first
    fn utxos(&self) -> Result<Vec<UtxoInfo>, WalletError>;

    fn network(&self) -> Network;

    fn genesis_hash(&self) -> BlockHash;
}

#[derive(Clone)]
struct EngineState {
    deriver: KeyDeriver,
    ledger: UtxoLedger,
    chain: ChainSynchronizer,
}

impl EngineState {
    fn to_persisted(&self) -> WalletState {
        WalletState {
            external: self.deriver.indices(Keychain::External).clone(),
            internal: self.deriver.indices(Keychain::Internal).clone(),
            outputs: self.ledger.snapshot(),
            transactions: self.ledger.transactions().cloned().collect(),
            recent_blocks: self.chain.tail().blocks(),
            sync: self.chain.state().clone(),
        }
    }
}

/// BIP84 single-account wallet
pub struct BitcoinWallet {
    name: String,
    config: WalletConfig,
    keys: WalletKeys,
    signer: WalletSigner,
    storage: Option<Storage>,
    genesis: BlockId,
    state: RwLock<EngineState>,
}

impl BitcoinWallet {
    /// Create a wallet with a fresh random mnemonic
    pub fn create(
        config: WalletConfig,
        storage: Option<Storage>,
        name: &str,
    ) -> Result<Self, WalletError> {
        let keys = KeyManager::generate(config.network)?;
        Self::create_with_keys(config, keys, storage, name)
    }

    /// Create a wallet from an existing recovery phrase
    pub fn from_mnemonic(
        words: &str,
        config: WalletConfig,
        storage: Option<Storage>,
        name: &str,
    ) -> Result<Self, WalletError> {
        let keys = KeyManager::from_mnemonic(words, config.network)?;
        Self::create_with_keys(config, keys, storage, name)
    }

    fn create_with_keys(
        config: WalletConfig,
        keys: WalletKeys,
        storage: Option<Storage>,
        name: &str,
    ) -> Result<Self, WalletError> {
        config.validate()?;
        let genesis = genesis_id(config.network);

        if let Some(storage) = &storage {
            if storage.wallet_exists(name) {
                return Err(WalletError::WalletExists(name.to_string()));
            }
            storage.create_wallet(name)?;
            storage.save_mnemonic(name, &keys.mnemonic)?;
            storage.save_metadata(
                name,
                &Metadata {
                    name: name.to_string(),
                    created_at: chrono::Utc::now(),
                    network: config.network.to_string(),
                    version: WALLET_FORMAT_VERSION.to_string(),
                    genesis_hash: genesis.hash,
                },
            )?;
        }

        let wallet = Self::assemble(config, keys, WalletState::default(), storage, name)?;
        {
            let state = wallet.read()?;
            wallet.persist(&state)?;
        }

        log::info!(
            "✅ Wallet '{}' created on {} (fingerprint {})",
            name,
            wallet.config.network,
            wallet.keys.fingerprint
        );
        Ok(wallet)
    }

    /// Load a wallet previously created in `storage`
    pub fn load(config: WalletConfig, storage: Storage, name: &str) -> Result<Self, WalletError> {
        config.validate()?;

        if !storage.wallet_exists(name) {
            return Err(WalletError::WalletNotFound(name.to_string()));
        }

        let meta = storage.load_metadata(name)?;
        if meta.version != WALLET_FORMAT_VERSION {
            return Err(WalletError::HeaderVersion(meta.version));
        }
        if meta.network != config.network.to_string() {
            return Err(WalletError::NetworkMismatch {
                expected: config.network,
                found: meta.network,
            });
        }
        let genesis = genesis_id(config.network);
        if meta.genesis_hash != genesis.hash {
            return Err(WalletError::GenesisMismatch {
                expected: genesis.hash,
                found: meta.genesis_hash,
            });
        }

        let mnemonic = storage.load_mnemonic(name)?;
        let keys = KeyManager::derive_keys(mnemonic, config.network)?;
        let persisted = storage.load_state(name)?;

        let wallet = Self::assemble(config, keys, persisted, Some(storage), name)?;
        {
            let state = wallet.read()?;
            log::info!(
                "📂 Wallet '{}' loaded at height {} ({} outputs tracked)",
                name,
                state.chain.tip().height,
                state.ledger.snapshot().len()
            );
        }
        Ok(wallet)
    }

    fn assemble(
        config: WalletConfig,
        keys: WalletKeys,
        persisted: WalletState,
        storage: Option<Storage>,
        name: &str,
    ) -> Result<Self, WalletError> {
        let genesis = genesis_id(config.network);

        let deriver = KeyDeriver::new(&keys, config.lookahead, persisted.external, persisted.internal)?;
        let ledger = UtxoLedger::from_parts(persisted.outputs, persisted.transactions);
        let tail = ChainTail::from_blocks(persisted.recent_blocks, config.chain_tail_len)
            .unwrap_or_else(|| ChainTail::new(genesis, config.chain_tail_len));
        let chain = ChainSynchronizer::new(
            tail,
            persisted.sync,
            ChainPolicy {
                finality_depth: config.finality_depth,
            },
        );

        Ok(Self {
            name: name.to_string(),
            signer: WalletSigner::new(&keys),
            keys,
            config,
            storage,
            genesis,
            state: RwLock::new(EngineState {
                deriver,
                ledger,
                chain,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    /// Output descriptor of a keychain
    pub fn descriptor(&self, keychain: Keychain) -> String {
        self.keys.descriptor(keychain)
    }

    /// Whether an index of a keychain has been marked used
    pub fn is_used(&self, keychain: Keychain, index: u32) -> Result<bool, WalletError> {
        Ok(self.read()?.deriver.is_used(keychain, index))
    }

    /// Sum of unspent owned outputs, independent of the balance buckets
    pub fn unspent_total(&self) -> Result<Amount, WalletError> {
        Ok(self.read()?.ledger.unspent_total())
    }

    /// Balance and unspent total read under one lock acquisition
    pub fn balance_with_unspent_total(&self) -> Result<(Balance, Amount), WalletError> {
        let state = self.read()?;
        Ok((self.balance_of(&state), state.ledger.unspent_total()))
    }

    fn balance_of(&self, state: &EngineState) -> Balance {
        balance::aggregate(
            &state.ledger.snapshot(),
            state.chain.tip().height,
            self.config.coinbase_maturity,
        )
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, EngineState>, WalletError> {
        self.state
            .read()
            .map_err(|e| WalletError::Internal(format!("wallet lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, EngineState>, WalletError> {
        self.state
            .write()
            .map_err(|e| WalletError::Internal(format!("wallet lock poisoned: {}", e)))
    }

    fn persist(&self, state: &EngineState) -> Result<(), WalletError> {
        if let Some(storage) = &self.storage {
            storage.save_state(&self.name, &state.to_persisted())?;
        }
        Ok(())
    }

    /// Run `f` under the write lock. On error, or if the result cannot be
    /// persisted, the previous state is put back.
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut EngineState) -> Result<T, WalletError>,
    ) -> Result<T, WalletError> {
        let mut state = self.write()?;
        let backup = state.clone();

        let outcome = f(&mut state).and_then(|value| {
            self.persist(&state)?;
            Ok(value)
        });

        if outcome.is_err() {
            *state = backup;
        }
        outcome
    }

    fn address_info(keychain: Keychain, index: u32, address: Address) -> AddressInfo {
        AddressInfo {
            index,
            keychain,
            address,
        }
    }

    /// Outputs the builder may spend: confirmed and mature, or our own
    /// unconfirmed change.
    fn spendable(output: &OwnedOutput, tip_height: u32, coinbase_maturity: u32) -> bool {
        if output.is_spent() {
            return false;
        }
        if output.is_confirmed() {
            output.is_mature(tip_height, coinbase_maturity)
        } else {
            output.keychain == Keychain::Internal && !output.is_coinbase
        }
    }

    fn parse_recipients(
        &self,
        recipients: &[Recipient],
    ) -> Result<(Vec<(ScriptBuf, Amount)>, Amount), WalletError> {
        if recipients.is_empty() {
            return Err(WalletError::NoRecipient);
        }

        let mut outputs = Vec::with_capacity(recipients.len());
        let mut target = Amount::ZERO;
        for recipient in recipients {
            if recipient.amount == 0 {
                return Err(WalletError::InvalidAmount(recipient.address.clone()));
            }
            let address = Address::from_str(&recipient.address)
                .map_err(|e| WalletError::InvalidAddress(format!("{}: {}", recipient.address, e)))?
                .require_network(self.config.network)
                .map_err(|e| WalletError::InvalidAddress(format!("{}: {}", recipient.address, e)))?;

            let amount = Amount::from_sat(recipient.amount);
            target = target
                .checked_add(amount)
                .filter(|total| *total <= Amount::MAX_MONEY)
                .ok_or_else(|| WalletError::InvalidAmount(recipient.address.clone()))?;
            outputs.push((address.script_pubkey(), amount));
        }
        Ok((outputs, target))
    }
}

impl Wallet for BitcoinWallet {
    fn unused_address(&self) -> Result<AddressInfo, WalletError> {
        self.mutate(|state| {
            let (index, address) = state.deriver.next_unused(Keychain::External)?;
            Ok(Self::address_info(Keychain::External, index, address))
        })
    }

    fn fresh_address(&self) -> Result<AddressInfo, WalletError> {
        self.mutate(|state| {
            let (index, address) = state.deriver.reveal_next(Keychain::External)?;
            Ok(Self::address_info(Keychain::External, index, address))
        })
    }

    fn peek_address(&self, index: u32) -> Result<AddressInfo, WalletError> {
        let address = self.read()?.deriver.peek_address(index)?;
        Ok(Self::address_info(Keychain::External, index, address))
    }

    fn balance(&self) -> Result<Balance, WalletError> {
        let state = self.read()?;
        Ok(self.balance_of(&state))
    }

    fn recent_blocks(&self, count: usize) -> Result<Vec<BlockId>, WalletError> {
        Ok(self.read()?.chain.tail().recent(count))
    }

    fn tip(&self) -> Result<BlockId, WalletError> {
        Ok(self.read()?.chain.tip())
    }

    fn apply_block(&self, block: &Block, height: u32) -> Result<ApplyResult, WalletError> {
        self.mutate(|state| {
            let EngineState {
                deriver,
                ledger,
                chain,
            } = state;
            chain.apply_block(deriver, ledger, block, height)
        })
    }

    fn disconnect_block(&self, block: BlockId) -> Result<(), WalletError> {
        self.mutate(|state| {
            let EngineState {
                deriver,
                ledger,
                chain,
            } = state;
            chain.disconnect_block(deriver, ledger, block)
        })
    }

    fn apply_mempool_transactions(
        &self,
        txs: Vec<MempoolTx>,
    ) -> Result<ApplyResult, WalletError> {
        if txs.is_empty() {
            return Ok(ApplyResult::default());
        }
        self.mutate(|state| {
            let EngineState {
                deriver,
                ledger,
                chain,
            } = state;
            mempool::apply_mempool_transactions(deriver, ledger, txs, |txid| {
                chain.adopt_unconfirmed(txid)
            })
        })
    }

    fn create_tx(&self, fee_rate: u64, recipients: &[Recipient]) -> Result<Vec<u8>, WalletError> {
        let (outputs, target) = self.parse_recipients(recipients)?;
        let fee_rate = FeeRate::from_sat_per_vb(fee_rate).ok_or(WalletError::InvalidFeeRate(fee_rate))?;

        self.mutate(|state| {
            let tip_height = state.chain.tip().height;
            let candidates: Vec<OwnedOutput> = state
                .ledger
                .snapshot()
                .into_iter()
                .filter(|o| Self::spendable(o, tip_height, self.config.coinbase_maturity))
                .collect();

            let change_index = state.deriver.lowest_unused(Keychain::Internal);
            let change_script = state.deriver.derive_script(Keychain::Internal, change_index)?;

            let params = SelectionParams {
                fee_rate,
                base_vbytes: TX_OVERHEAD_VBYTES
                    + outputs.iter().map(|(script, _)| output_vbytes(script)).sum::<u64>(),
                change_vbytes: output_vbytes(&change_script),
                dust_limit: self.config.dust_limit,
            };
            let selection = select_coins(candidates, target, &params, self.config.coin_selection)?;

            let unsigned = TransactionBuilder::build_unsigned(&selection, &outputs, Some(&change_script));
            let signed = self.signer.sign_transaction(unsigned, &selection.selected)?;
            let txid = signed.compute_txid();

            if selection.change.is_some() {
                state.deriver.mark_used(Keychain::Internal, change_index)?;
            }

            let now = chrono::Utc::now().timestamp().max(0) as u64;
            mempool::apply_mempool_transactions(
                &mut state.deriver,
                &mut state.ledger,
                vec![MempoolTx::new(signed.clone(), now)],
                |_| {},
            )?;
            if !state.ledger.contains_tx(&txid) {
                return Err(WalletError::Internal(format!(
                    "built transaction {} was not admitted to the ledger",
                    txid
                )));
            }

            let mut scripts: Vec<&Script> = outputs.iter().map(|(script, _)| script.as_script()).collect();
            if selection.change.is_some() {
                scripts.push(change_script.as_script());
            }
            log::info!(
                "💸 Created tx {}: {} inputs, ~{} vB, fee {} sats, change {}",
                txid,
                selection.selected.len(),
                TransactionBuilder::estimate_vsize(selection.selected.len(), &scripts),
                selection.fee.to_sat(),
                selection
                    .change
                    .map(|c| format!("{} sats", c.to_sat()))
                    .unwrap_or_else(|| "none".to_string())
            );
            Ok(serialize(&signed))
        })
    }

    fn cancel_tx(&self, txid: &Txid) -> Result<(), WalletError> {
        self.mutate(|state| {
            let record = state
                .ledger
                .transaction(txid)
                .ok_or(WalletError::TransactionNotFound(*txid))?;
            if record.confirmation_height.is_some() {
                return Err(WalletError::AlreadyConfirmed(*txid));
            }
            let removed = state.ledger.remove(txid);
            log::info!("Cancelled {} ({} tx(s) removed)", txid, removed.len());
            Ok(())
        })
    }

    fn mnemonic_words(&self) -> Vec<String> {
        self.keys.mnemonic_words()
    }

    fn transactions(&self) -> Result<Vec<TxInfo>, WalletError> {
        let state = self.read()?;
        let tip_height = state.chain.tip().height;

        let mut txs: Vec<TxInfo> = state
            .ledger
            .transactions()
            .map(|record| TxInfo {
                txid: record.txid,
                tx: record.tx.clone(),
                spent: record.spent,
                received: record.received,
                confirmations: confirmations(record.confirmation_height, tip_height),
            })
            .collect();
        txs.sort_by_key(|info| Reverse(info.confirmations));
        Ok(txs)
    }

    fn utxos(&self) -> Result<Vec<UtxoInfo>, WalletError> {
        let state = self.read()?;
        let tip_height = state.chain.tip().height;

        let mut utxos: Vec<UtxoInfo> = state
            .ledger
            .snapshot()
            .into_iter()
            .filter(|o| !o.is_spent())
            .map(|o| UtxoInfo {
                txid: o.outpoint.txid,
                vout: o.outpoint.vout,
                amount: o.amount,
                script_pubkey: o.script_pubkey,
                is_change: o.keychain == Keychain::Internal,
                derivation_index: o.derivation_index,
                confirmations: confirmations(o.confirmation_height, tip_height),
            })
            .collect();
        utxos.sort_by_key(|info| Reverse(info.confirmations));
        Ok(utxos)
    }

    fn network(&self) -> Network {
        self.config.network
    }

    fn genesis_hash(&self) -> BlockHash {
        self.genesis.hash
    }
}
