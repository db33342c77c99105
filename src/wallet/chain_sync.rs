//! Block connection, disconnection and reorg reconciliation.
//!
//! The synchronizer keeps a bounded tail of recent block identities. A block
//! whose parent sits inside the tail below the tip starts a reorg: the
//! blocks above the parent are unwound and their transactions become
//! orphans. Once the next block connects, orphans it did not confirm again
//! are dropped unless the mempool has vouched for them in the meantime.

use std::collections::{BTreeMap, BTreeSet};

use bitcoin::blockdata::constants::genesis_block;
use bitcoin::hashes::Hash;
use bitcoin::{Block, BlockHash, Network, Txid};
use serde::{Deserialize, Serialize};

use crate::error::WalletError;
use crate::wallet::keychain::KeyDeriver;
use crate::wallet::ledger::UtxoLedger;
use crate::wallet::scan::{admit_transaction, restore_inputs};
use crate::wallet::types::{ApplyResult, BlockId, Origin};

/// Genesis block identity of a network
pub fn genesis_id(network: Network) -> BlockId {
    BlockId {
        height: 0,
        hash: genesis_block(network).block_hash(),
    }
}

/// Bounded window of the most recent block identities
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTail {
    blocks: BTreeMap<u32, BlockHash>,
    capacity: usize,
}

impl ChainTail {
    pub fn new(genesis: BlockId, capacity: usize) -> Self {
        let mut blocks = BTreeMap::new();
        blocks.insert(genesis.height, genesis.hash);
        Self {
            blocks,
            capacity: capacity.max(1),
        }
    }

    pub fn from_blocks(blocks: Vec<BlockId>, capacity: usize) -> Option<Self> {
        let mut tail = Self {
            blocks: BTreeMap::new(),
            capacity: capacity.max(1),
        };
        for block in blocks {
            tail.push(block);
        }
        if tail.blocks.is_empty() {
            None
        } else {
            Some(tail)
        }
    }

    pub fn tip(&self) -> BlockId {
        self.blocks
            .iter()
            .next_back()
            .map(|(height, hash)| BlockId {
                height: *height,
                hash: *hash,
            })
            .unwrap_or(BlockId {
                height: 0,
                hash: BlockHash::all_zeros(),
            })
    }

    pub fn oldest_height(&self) -> u32 {
        self.blocks.keys().next().copied().unwrap_or(0)
    }

    pub fn get(&self, height: u32) -> Option<BlockHash> {
        self.blocks.get(&height).copied()
    }

    pub fn contains(&self, block: &BlockId) -> bool {
        self.get(block.height) == Some(block.hash)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Append a block, evicting the oldest entries beyond capacity
    fn push(&mut self, block: BlockId) {
        self.blocks.insert(block.height, block.hash);
        while self.blocks.len() > self.capacity {
            self.blocks.pop_first();
        }
    }

    /// Drop every block above `height`, returning them highest first
    fn truncate_above(&mut self, height: u32) -> Vec<BlockId> {
        let removed = self.blocks.split_off(&(height + 1));
        removed
            .into_iter()
            .rev()
            .map(|(height, hash)| BlockId { height, hash })
            .collect()
    }

    /// Most recent blocks, newest first
    pub fn recent(&self, count: usize) -> Vec<BlockId> {
        self.blocks
            .iter()
            .rev()
            .take(count)
            .map(|(height, hash)| BlockId {
                height: *height,
                hash: *hash,
            })
            .collect()
    }

    pub fn blocks(&self) -> Vec<BlockId> {
        self.blocks
            .iter()
            .map(|(height, hash)| BlockId {
                height: *height,
                hash: *hash,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    #[default]
    Synced,
    /// Blocks up to `old_tip` were unwound and no replacement block has
    /// connected yet; `orphaned` holds the transactions they confirmed.
    Reconciling {
        old_tip: BlockId,
        orphaned: BTreeSet<Txid>,
    },
}

/// Chain policy values the synchronizer needs
#[derive(Debug, Clone, Copy)]
pub struct ChainPolicy {
    pub finality_depth: u32,
}

#[derive(Debug, Clone)]
pub struct ChainSynchronizer {
    tail: ChainTail,
    state: SyncState,
    policy: ChainPolicy,
}

impl ChainSynchronizer {
    pub fn new(tail: ChainTail, state: SyncState, policy: ChainPolicy) -> Self {
        Self {
            tail,
            state,
            policy,
        }
    }

    pub fn tip(&self) -> BlockId {
        self.tail.tip()
    }

    pub fn tail(&self) -> &ChainTail {
        &self.tail
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    /// A fresh wallet has seen nothing but genesis
    fn at_birth(&self) -> bool {
        self.tail.len() == 1 && self.tail.tip().height == 0
    }

    /// Connect `block` at `height`, reorganizing first if it forks off the
    /// retained tail.
    pub fn apply_block(
        &mut self,
        deriver: &mut KeyDeriver,
        ledger: &mut UtxoLedger,
        block: &Block,
        height: u32,
    ) -> Result<ApplyResult, WalletError> {
        let hash = block.block_hash();
        let id = BlockId { height, hash };

        if self.tail.contains(&id) {
            log::debug!("Block {} at height {} already applied", hash, height);
            return Ok(ApplyResult::default());
        }

        let tip = self.tail.tip();
        let parent = block.header.prev_blockhash;

        let extends_tip = height == tip.height + 1 && parent == tip.hash;
        let birthday = self.at_birth() && height > 1;

        if !(extends_tip || birthday) {
            if height == 0 || height > tip.height + 1 {
                return Err(self.cannot_connect(id));
            }

            // Pruned from the tail, or a fork below it: cannot tell which
            if height < self.tail.oldest_height() {
                log::warn!(
                    "Block {} at height {} is below the retained window (oldest {})",
                    hash,
                    height,
                    self.tail.oldest_height()
                );
                return Err(self.cannot_connect(id));
            }

            let fork_height = height - 1;
            match self.tail.get(fork_height) {
                Some(known) if known == parent => {
                    self.unwind_above(deriver, ledger, fork_height);
                }
                _ if fork_height < self.tail.oldest_height() => {
                    return Err(WalletError::ReorgTooDeep {
                        fork_height,
                        oldest_height: self.tail.oldest_height(),
                    });
                }
                _ => return Err(self.cannot_connect(id)),
            }
        }

        let result = self.connect(deriver, ledger, block, height)?;
        self.tail.push(id);
        self.finish_reconcile(ledger);

        let pruned = ledger.prune(height, self.policy.finality_depth);
        if pruned > 0 {
            log::debug!("Pruned {} final outputs at height {}", pruned, height);
        }

        log::debug!(
            "Applied block {} at height {} ({} relevant txs)",
            hash,
            height,
            result.relevant_txids.len()
        );
        Ok(result)
    }

    /// Unwind `block` and everything above it.
    ///
    /// Unknown blocks are ignored; the new branch arrives through
    /// `apply_block`.
    pub fn disconnect_block(
        &mut self,
        deriver: &KeyDeriver,
        ledger: &mut UtxoLedger,
        block: BlockId,
    ) -> Result<(), WalletError> {
        if !self.tail.contains(&block) {
            log::warn!(
                "Ignoring disconnect of unknown block {} at height {}",
                block.hash,
                block.height
            );
            return Ok(());
        }

        if block.height <= self.tail.oldest_height() {
            return Err(WalletError::ReorgTooDeep {
                fork_height: block.height.saturating_sub(1),
                oldest_height: self.tail.oldest_height(),
            });
        }

        self.unwind_above(deriver, ledger, block.height - 1);
        Ok(())
    }

    /// The host vouched for an unconfirmed transaction again (mempool).
    pub fn adopt_unconfirmed(&mut self, txid: &Txid) {
        if let SyncState::Reconciling { orphaned, .. } = &mut self.state {
            if orphaned.remove(txid) {
                log::debug!("Orphan {} is back in the mempool", txid);
            }
        }
    }

    fn cannot_connect(&self, id: BlockId) -> WalletError {
        WalletError::CannotConnect {
            height: id.height,
            hash: id.hash,
            tip_height: self.tail.tip().height,
        }
    }

    fn connect(
        &mut self,
        deriver: &mut KeyDeriver,
        ledger: &mut UtxoLedger,
        block: &Block,
        height: u32,
    ) -> Result<ApplyResult, WalletError> {
        let mut result = ApplyResult::default();

        for tx in &block.txdata {
            let txid = tx.compute_txid();

            // The chain wins every double-spend against the mempool.
            for conflict in ledger.conflicts_of(tx) {
                if ledger.is_confirmed(&conflict) {
                    log::error!(
                        "Block tx {} double-spends confirmed tx {}; following the chain",
                        txid,
                        conflict
                    );
                }
                for evicted in ledger.remove(&conflict) {
                    log::info!("Evicted {} (conflicts with block tx {})", evicted, txid);
                    self.forget_orphan(&evicted);
                }
            }

            if admit_transaction(deriver, ledger, tx, Origin::Block(height), 0)? {
                self.forget_orphan(&txid);
                result.relevant_txids.push(txid);
            }
        }

        Ok(result)
    }

    /// Undo every block above `fork_height`
    fn unwind_above(&mut self, deriver: &KeyDeriver, ledger: &mut UtxoLedger, fork_height: u32) {
        let old_tip = self.tail.tip();
        let removed = self.tail.truncate_above(fork_height);
        if removed.is_empty() {
            return;
        }

        log::info!(
            "🔀 Reorg: unwinding {} block(s) above height {} (old tip {})",
            removed.len(),
            fork_height,
            old_tip.height
        );

        let mut orphaned = BTreeSet::new();
        for record in ledger.confirmed_from(fork_height + 1) {
            if record.tx.is_coinbase() {
                ledger.remove(&record.txid);
                continue;
            }
            ledger.unconfirm(&record.txid);
            restore_inputs(deriver, ledger, &record.txid);
            orphaned.insert(record.txid);
        }

        self.state = match std::mem::take(&mut self.state) {
            SyncState::Synced => SyncState::Reconciling { old_tip, orphaned },
            SyncState::Reconciling {
                old_tip: earlier,
                orphaned: mut pending,
            } => {
                pending.extend(orphaned);
                SyncState::Reconciling {
                    old_tip: if earlier.height >= old_tip.height {
                        earlier
                    } else {
                        old_tip
                    },
                    orphaned: pending,
                }
            }
        };
    }

    fn forget_orphan(&mut self, txid: &Txid) {
        if let SyncState::Reconciling { orphaned, .. } = &mut self.state {
            orphaned.remove(txid);
        }
    }

    /// Leave `Reconciling` after a block connected on the new branch
    fn finish_reconcile(&mut self, ledger: &mut UtxoLedger) {
        let SyncState::Reconciling { old_tip, orphaned } = &self.state else {
            return;
        };

        let abandoned: Vec<Txid> = orphaned
            .iter()
            .filter(|txid| !ledger.is_confirmed(txid))
            .copied()
            .collect();
        for txid in &abandoned {
            for removed in ledger.remove(txid) {
                log::info!("Dropped {} (only confirmed on the abandoned branch)", removed);
            }
        }

        log::info!(
            "✅ Reorg reconciled at height {} (old tip {}, {} orphaned tx(s) dropped)",
            self.tail.tip().height,
            old_tip.height,
            abandoned.len()
        );
        self.state = SyncState::Synced;
    }
}
