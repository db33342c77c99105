//! Shared fixtures for the wallet engine integration tests
//!
//! - Regtest block and transaction builders
//! - A scratch chain that connects through the birthday rule
//! - Temporary wallet environments
#![allow(dead_code)]

use bitcoin::absolute::LockTime;
use bitcoin::block::{Header, Version as BlockVersion};
use bitcoin::hashes::Hash;
use bitcoin::key::CompressedPublicKey;
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, Block, BlockHash, CompactTarget, Network, OutPoint, ScriptBuf, Sequence,
    Transaction, TxIn, TxMerkleNode, TxOut, Txid, Witness,
};
use tempfile::TempDir;
use wallet_engine::storage::Storage;
use wallet_engine::{BitcoinWallet, BlockId, WalletConfig};

pub const TEST_MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Regtest config rooted in `data_dir`
pub fn test_config(data_dir: &std::path::Path) -> WalletConfig {
    WalletConfig {
        network: Network::Regtest,
        data_dir: data_dir.to_path_buf(),
        ..WalletConfig::default()
    }
}

/// Wallet without persistence, from the fixed test mnemonic
pub fn memory_wallet(config: WalletConfig) -> BitcoinWallet {
    BitcoinWallet::from_mnemonic(TEST_MNEMONIC, config, None, "test").unwrap()
}

/// Address no test wallet owns
pub fn foreign_address() -> Address {
    let secp = Secp256k1::new();
    let secret = SecretKey::from_slice(&[7u8; 32]).unwrap();
    Address::p2wpkh(&CompressedPublicKey(secret.public_key(&secp)), Network::Regtest)
}

pub fn outpoint(seed: u8, vout: u32) -> OutPoint {
    OutPoint::new(Txid::from_byte_array([seed; 32]), vout)
}

/// Transaction spending `inputs` and paying `outputs`
pub fn tx(inputs: &[OutPoint], outputs: &[(ScriptBuf, u64)]) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: inputs
            .iter()
            .map(|prev| TxIn {
                previous_output: *prev,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            })
            .collect(),
        output: outputs
            .iter()
            .map(|(script, sats)| TxOut {
                value: Amount::from_sat(*sats),
                script_pubkey: script.clone(),
            })
            .collect(),
    }
}

/// Payment into the wallet from an outpoint it does not own
pub fn funding_tx(seed: u8, script: &Address, sats: u64) -> Transaction {
    tx(&[outpoint(seed, 0)], &[(script.script_pubkey(), sats)])
}

pub fn coinbase(height: u32, pay_to: ScriptBuf, sats: u64) -> Transaction {
    Transaction {
        version: Version::ONE,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::null(),
            script_sig: ScriptBuf::builder().push_int(height as i64).into_script(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(sats),
            script_pubkey: pay_to,
        }],
    }
}

/// Scratch chain. The first block lands at `start` and connects to a fresh
/// wallet through the birthday rule.
#[derive(Clone)]
pub struct TestChain {
    pub blocks: Vec<(Block, u32)>,
    next_height: u32,
    prev: BlockHash,
    /// Distinguishes forks built from the same parent
    branch: u32,
}

impl TestChain {
    pub fn starting_at(start: u32) -> Self {
        Self {
            blocks: Vec::new(),
            next_height: start,
            prev: BlockHash::from_byte_array([0xaa; 32]),
            branch: 0,
        }
    }

    /// Fork that replaces every block above `height`
    pub fn fork_at(&self, height: u32, branch: u32) -> Self {
        let blocks: Vec<(Block, u32)> = self
            .blocks
            .iter()
            .filter(|(_, h)| *h <= height)
            .cloned()
            .collect();
        let prev = blocks
            .last()
            .map(|(block, _)| block.block_hash())
            .unwrap_or(self.prev);
        Self {
            blocks,
            next_height: height + 1,
            prev,
            branch,
        }
    }

    /// Mine a block holding `txs` after a coinbase paying `foreign_address`
    pub fn mine(&mut self, txs: Vec<Transaction>) -> (Block, u32) {
        self.mine_with_coinbase(foreign_address().script_pubkey(), txs)
    }

    pub fn mine_with_coinbase(&mut self, pay_to: ScriptBuf, txs: Vec<Transaction>) -> (Block, u32) {
        let height = self.next_height;
        let mut txdata = vec![coinbase(height, pay_to, 50 * 100_000_000)];
        txdata.extend(txs);

        let block = Block {
            header: Header {
                version: BlockVersion::TWO,
                prev_blockhash: self.prev,
                merkle_root: TxMerkleNode::all_zeros(),
                time: 1_700_000_000 + height,
                bits: CompactTarget::from_consensus(0x207fffff),
                nonce: self.branch,
            },
            txdata,
        };

        self.prev = block.block_hash();
        self.next_height += 1;
        self.blocks.push((block.clone(), height));
        (block, height)
    }

    /// Mine empty blocks up to and including `height`
    pub fn mine_to(&mut self, height: u32) -> Vec<(Block, u32)> {
        let mut mined = Vec::new();
        while self.next_height <= height {
            mined.push(self.mine(vec![]));
        }
        mined
    }

    pub fn tip(&self) -> Option<BlockId> {
        self.blocks.last().map(|(block, height)| BlockId {
            height: *height,
            hash: block.block_hash(),
        })
    }

    pub fn id_at(&self, height: u32) -> Option<BlockId> {
        self.blocks
            .iter()
            .find(|(_, h)| *h == height)
            .map(|(block, h)| BlockId {
                height: *h,
                hash: block.block_hash(),
            })
    }
}

/// Temporary data directory with automatic cleanup
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub config: WalletConfig,
}

impl TestEnvironment {
    pub fn new() -> anyhow::Result<Self> {
        init_logging();
        let temp_dir = TempDir::new()?;
        log::info!("📁 Test directory: {:?}", temp_dir.path());
        let config = test_config(temp_dir.path());
        Ok(Self { temp_dir, config })
    }

    pub fn storage(&self) -> Storage {
        Storage::new_with_base_dir(self.temp_dir.path().to_path_buf())
    }
}
