//! The canonical ledger: block sequence, per-amount output registries,
//! spent key images, alternative chains, and reorg execution.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};

use crossbeam_channel::Receiver;
use obol_crypto::{
    check_ring_signature, check_signature, to_hex, Hash256, KeyImage, PublicKey, NULL_HASH,
};
use obol_currency::{median_value, next_difficulty, Currency, Difficulty, TimeProvider};
use obol_log::{log_debug, log_error, log_info, log_trace, log_warn};
use obol_primitives::{
    relative_output_offsets_to_absolute, Block, Decodable, DecodeError, Decoder, Encodable,
    Encoder, KeyInput, MultisignatureInput, MultisignatureOutput, Transaction, TransactionInput,
    TransactionOutputTarget,
};
use obol_storage::{BlobStore, StoreError};
use rayon::prelude::*;

use crate::block_index::BlockIndex;
use crate::checkpoints::Checkpoints;
use crate::indices::{
    GeneratedTransactionsIndex, OrphanBlocksIndex, PaymentIdIndex, TimestampIndex,
};
use crate::messages::{BlockchainMessage, MessageFanOut};
use crate::pow::check_proof_of_work;
use crate::shuffle::ShuffleGenerator;
use crate::validator::{
    BlockInfo, BlockTransactionPool, BlockVerificationContext, TransactionValidator,
};

const BLOCKS_BLOB_VERSION: u8 = 1;
const BLOCK_CACHE_VERSION: u8 = 1;
const BLOCK_INDICES_VERSION: u8 = 1;
const BLOCKS_BLOB_NAME: &str = "blocks.bin";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TransactionIndex {
    pub block: u32,
    pub transaction: u16,
}

#[derive(Clone, Debug)]
pub struct TransactionEntry {
    pub tx: Transaction,
    /// Global output index assigned to each output at commit time.
    pub global_output_indexes: Vec<u32>,
}

#[derive(Clone, Debug)]
pub struct BlockEntry {
    pub block: Block,
    pub height: u32,
    pub block_cumulative_size: usize,
    pub cumulative_difficulty: Difficulty,
    pub already_generated_coins: u64,
    /// Coinbase first, then the mined transactions in block order.
    pub transactions: Vec<TransactionEntry>,
}

#[derive(Clone, Copy, Debug)]
struct MultisignatureOutputUsage {
    transaction_index: TransactionIndex,
    output_index: u16,
    is_used: bool,
}

struct AltChainEntry {
    block: Block,
    height: u32,
    cumulative_difficulty: Difficulty,
}

#[derive(Debug)]
pub enum BlockchainError {
    GenesisMismatch,
    GenesisRejected,
    Store(StoreError),
}

impl std::fmt::Display for BlockchainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockchainError::GenesisMismatch => {
                write!(f, "stored chain starts from a different genesis block")
            }
            BlockchainError::GenesisRejected => write!(f, "generated genesis block failed validation"),
            BlockchainError::Store(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for BlockchainError {}

impl From<StoreError> for BlockchainError {
    fn from(err: StoreError) -> Self {
        BlockchainError::Store(err)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputEntry {
    pub global_index: u32,
    pub public_key: PublicKey,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RandomOuts {
    pub amount: u64,
    pub outs: Vec<OutputEntry>,
}

pub struct Blockchain {
    inner: Mutex<ChainInner>,
}

struct ChainInner {
    currency: Currency,
    time: Arc<dyn TimeProvider>,
    store: Arc<dyn BlobStore>,
    pool: Option<Weak<dyn BlockTransactionPool>>,

    blocks: Vec<BlockEntry>,
    block_index: BlockIndex,
    transaction_map: HashMap<Hash256, TransactionIndex>,
    spent_key_images: HashSet<KeyImage>,
    outputs: HashMap<u64, Vec<(TransactionIndex, u16)>>,
    multisignature_outputs: HashMap<u64, Vec<MultisignatureOutputUsage>>,
    alternative_chains: HashMap<Hash256, AltChainEntry>,

    payment_id_index: PaymentIdIndex,
    timestamp_index: TimestampIndex,
    generated_transactions_index: GeneratedTransactionsIndex,
    orphan_index: OrphanBlocksIndex,

    checkpoints: Checkpoints,
    is_in_checkpoint_zone: bool,
    current_block_size_limit: u64,

    messages: MessageFanOut,
}

impl Blockchain {
    pub fn new(currency: Currency, store: Arc<dyn BlobStore>, time: Arc<dyn TimeProvider>) -> Self {
        let checkpoints = Checkpoints::from_list(&currency.checkpoints);
        Self {
            inner: Mutex::new(ChainInner {
                currency,
                time,
                store,
                pool: None,
                blocks: Vec::new(),
                block_index: BlockIndex::new(),
                transaction_map: HashMap::new(),
                spent_key_images: HashSet::new(),
                outputs: HashMap::new(),
                multisignature_outputs: HashMap::new(),
                alternative_chains: HashMap::new(),
                payment_id_index: PaymentIdIndex::default(),
                timestamp_index: TimestampIndex::default(),
                generated_transactions_index: GeneratedTransactionsIndex::default(),
                orphan_index: OrphanBlocksIndex::default(),
                checkpoints,
                is_in_checkpoint_zone: false,
                current_block_size_limit: 0,
                messages: MessageFanOut::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ChainInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wires the mempool the engine pulls block bodies through.
    pub fn set_transaction_pool(&self, pool: Weak<dyn BlockTransactionPool>) {
        self.lock().pool = Some(pool);
    }

    /// Loads persisted state (or starts from the generated genesis) and
    /// brings every index up to date.
    pub fn init(&self, load_existing: bool) -> Result<(), BlockchainError> {
        let mut inner = self.lock();
        if load_existing {
            inner.load_blocks();
        } else {
            inner.blocks.clear();
        }

        if inner.blocks.is_empty() {
            log_info!("no chain loaded, generating genesis block");
            let genesis = inner.currency.genesis_block();
            let mut ctx = BlockVerificationContext::default();
            if !inner.push_block_with_transactions(genesis, Vec::new(), &mut ctx) {
                return Err(BlockchainError::GenesisRejected);
            }
        } else {
            let tail_hash = inner.blocks[inner.blocks.len() - 1].block.hash();
            if !inner.load_cache(&tail_hash) {
                log_warn!("no usable blockchain cache found, rebuilding internal structures");
                inner.rebuild_cache();
            }
            if !inner.load_indices(&tail_hash) {
                log_warn!("no usable blockchain indices found, rebuilding");
                inner.rebuild_indices();
            }
            let genesis_hash = inner.currency.genesis_block().hash();
            if inner.block_index.block_id(0) != Some(genesis_hash) {
                log_error!("loaded chain has foreign genesis block");
                return Err(BlockchainError::GenesisMismatch);
            }
        }

        inner.update_size_limit();
        log_info!(
            "blockchain initialized, height {}, difficulty {}",
            inner.blocks.len(),
            inner.difficulty_for_next_block()
        );
        Ok(())
    }

    /// Persists blocks, cache, and indices. Failures are logged; the
    /// in-memory state stays authoritative.
    pub fn deinit(&self) {
        let inner = self.lock();
        inner.store_blocks();
        inner.store_cache();
        inner.store_indices();
    }

    pub fn store_cache(&self) {
        let inner = self.lock();
        inner.store_blocks();
        inner.store_cache();
    }

    pub fn subscribe_messages(&self) -> Receiver<BlockchainMessage> {
        self.lock().messages.subscribe()
    }

    pub fn height(&self) -> u32 {
        self.lock().height()
    }

    pub fn tail_id(&self) -> Hash256 {
        self.lock().tail_id()
    }

    pub fn tail(&self) -> (u32, Hash256) {
        let inner = self.lock();
        (inner.height().saturating_sub(1), inner.tail_id())
    }

    pub fn have_block(&self, id: &Hash256) -> bool {
        let inner = self.lock();
        inner.block_index.has_block(id) || inner.alternative_chains.contains_key(id)
    }

    pub fn is_block_in_main_chain(&self, id: &Hash256) -> bool {
        self.lock().block_index.has_block(id)
    }

    pub fn have_transaction(&self, id: &Hash256) -> bool {
        self.lock().transaction_map.contains_key(id)
    }

    pub fn total_transactions(&self) -> usize {
        self.lock().transaction_map.len()
    }

    pub fn coins_in_circulation(&self) -> u64 {
        let inner = self.lock();
        inner.blocks.last().map_or(0, |entry| entry.already_generated_coins)
    }

    pub fn block_id_by_height(&self, height: u32) -> Option<Hash256> {
        self.lock().block_index.block_id(height)
    }

    pub fn block_height_by_id(&self, id: &Hash256) -> Option<u32> {
        self.lock().block_index.block_height(id)
    }

    pub fn block_by_hash(&self, id: &Hash256) -> Option<Block> {
        let inner = self.lock();
        if let Some(height) = inner.block_index.block_height(id) {
            return Some(inner.blocks[height as usize].block.clone());
        }
        inner.alternative_chains.get(id).map(|entry| entry.block.clone())
    }

    pub fn get_blocks(&self, start_height: u32, count: u32) -> Vec<Block> {
        let inner = self.lock();
        inner
            .blocks
            .iter()
            .skip(start_height as usize)
            .take(count as usize)
            .map(|entry| entry.block.clone())
            .collect()
    }

    /// Blocks plus the bodies of their mined transactions.
    pub fn get_blocks_with_transactions(
        &self,
        start_height: u32,
        count: u32,
    ) -> Vec<(Block, Vec<Transaction>)> {
        let inner = self.lock();
        inner
            .blocks
            .iter()
            .skip(start_height as usize)
            .take(count as usize)
            .map(|entry| {
                let txs = entry.transactions.iter().skip(1).map(|t| t.tx.clone()).collect();
                (entry.block.clone(), txs)
            })
            .collect()
    }

    pub fn get_block_ids(&self, start_height: u32, max_count: u32) -> Vec<Hash256> {
        self.lock().block_index.block_ids(start_height, max_count)
    }

    pub fn get_transactions(&self, ids: &[Hash256]) -> (Vec<Transaction>, Vec<Hash256>) {
        let inner = self.lock();
        let mut found = Vec::new();
        let mut missed = Vec::new();
        for id in ids {
            match inner.transaction_map.get(id) {
                Some(index) => found.push(inner.transaction_by_index(*index).tx.clone()),
                None => missed.push(*id),
            }
        }
        (found, missed)
    }

    pub fn get_block_containing_transaction(&self, id: &Hash256) -> Option<(Hash256, u32)> {
        let inner = self.lock();
        let index = inner.transaction_map.get(id)?;
        let height = inner.blocks[index.block as usize].height;
        Some((inner.block_index.block_id(height)?, height))
    }

    pub fn get_transaction_global_indices(&self, id: &Hash256) -> Option<Vec<u32>> {
        let inner = self.lock();
        let index = inner.transaction_map.get(id)?;
        let entry = inner.transaction_by_index(*index);
        Some(entry.global_output_indexes.clone())
    }

    pub fn get_multisignature_output(
        &self,
        amount: u64,
        global_index: u32,
    ) -> Option<MultisignatureOutput> {
        let inner = self.lock();
        let usage = *inner.multisignature_outputs.get(&amount)?.get(global_index as usize)?;
        let entry = inner.transaction_by_index(usage.transaction_index);
        match &entry.tx.prefix.outputs.get(usage.output_index as usize)?.target {
            TransactionOutputTarget::Multisignature(out) => Some(out.clone()),
            TransactionOutputTarget::Key(_) => None,
        }
    }

    /// Resolves a multisignature input to `(owning tx hash, output index)`.
    pub fn get_multisignature_output_reference(
        &self,
        input: &MultisignatureInput,
    ) -> Option<(Hash256, usize)> {
        let inner = self.lock();
        let usage = *inner
            .multisignature_outputs
            .get(&input.amount)?
            .get(input.output_index as usize)?;
        let entry = inner.transaction_by_index(usage.transaction_index);
        Some((entry.tx.hash(), usage.output_index as usize))
    }

    pub fn get_already_generated_coins(&self, id: &Hash256) -> Option<u64> {
        let inner = self.lock();
        let height = inner.block_index.block_height(id)?;
        Some(inner.blocks[height as usize].already_generated_coins)
    }

    pub fn get_block_size(&self, id: &Hash256) -> Option<usize> {
        let inner = self.lock();
        let height = inner.block_index.block_height(id)?;
        Some(inner.blocks[height as usize].block_cumulative_size)
    }

    pub fn get_alternative_blocks(&self) -> Vec<Block> {
        let inner = self.lock();
        inner.alternative_chains.values().map(|entry| entry.block.clone()).collect()
    }

    pub fn alternative_blocks_count(&self) -> usize {
        self.lock().alternative_chains.len()
    }

    pub fn build_sparse_chain(&self) -> Vec<Hash256> {
        let inner = self.lock();
        match inner.block_index.tail_id() {
            Some(tail) => inner.block_index.build_sparse_chain(&tail),
            None => Vec::new(),
        }
    }

    /// Block ids to feed a peer that knows `remote_ids`; also reports
    /// our height and the first shared height.
    pub fn find_blockchain_supplement(
        &self,
        remote_ids: &[Hash256],
        max_count: u32,
    ) -> Option<(Vec<Hash256>, u32, u32)> {
        let inner = self.lock();
        let start = inner.block_index.find_supplement(remote_ids)?;
        Some((inner.block_index.block_ids(start, max_count), inner.height(), start))
    }

    pub fn difficulty_for_next_block(&self) -> Difficulty {
        self.lock().difficulty_for_next_block()
    }

    pub fn block_difficulty(&self, height: u32) -> Option<Difficulty> {
        let inner = self.lock();
        let entry = inner.blocks.get(height as usize)?;
        if height == 0 {
            return Some(entry.cumulative_difficulty);
        }
        Some(entry.cumulative_difficulty - inner.blocks[height as usize - 1].cumulative_difficulty)
    }

    pub fn current_cumulative_block_size_limit(&self) -> u64 {
        self.lock().current_block_size_limit
    }

    pub fn get_generated_transactions_number(&self, height: u32) -> Option<u64> {
        self.lock().generated_transactions_index.find(height)
    }

    pub fn get_orphan_block_ids_by_height(&self, height: u32) -> Vec<Hash256> {
        self.lock().orphan_index.find(height)
    }

    pub fn get_transaction_ids_by_payment_id(&self, payment_id: &Hash256) -> Vec<Hash256> {
        self.lock().payment_id_index.find(payment_id)
    }

    pub fn get_block_ids_by_timestamp(
        &self,
        begin: u64,
        end: u64,
        limit: usize,
    ) -> (Vec<Hash256>, u64) {
        self.lock().timestamp_index.find(begin, end, limit)
    }

    /// Height of the first block whose timestamp reaches `timestamp`,
    /// starting the scan at `start_offset`.
    pub fn timestamp_lower_bound(&self, start_offset: u32, timestamp: u64) -> Option<u32> {
        let inner = self.lock();
        let target = timestamp.saturating_sub(inner.currency.block_future_time_limit);
        inner
            .blocks
            .iter()
            .skip(start_offset as usize)
            .position(|entry| entry.block.header.timestamp >= target)
            .map(|offset| start_offset + offset as u32)
    }

    pub fn is_spend_time_unlocked(&self, unlock_time: u64) -> bool {
        self.lock().is_spendtime_unlocked(unlock_time)
    }

    /// Random eligible ring decoys per requested amount. Outputs still
    /// inside the mined-money unlock window are never offered.
    pub fn get_random_outs_by_amounts(&self, amounts: &[u64], count: usize) -> Vec<RandomOuts> {
        let inner = self.lock();
        let mut rng = rand::thread_rng();
        amounts
            .iter()
            .map(|amount| inner.random_outs_for_amount(*amount, count, &mut rng))
            .collect()
    }

    pub fn add_new_block(&self, block: Block, ctx: &mut BlockVerificationContext) -> bool {
        self.lock().add_new_block(block, ctx)
    }

    /// Pops every block above `height`, returning their bodies to the
    /// pool. Recovery hook; reorgs go through the alternative-chain path.
    pub fn rollback_to(&self, height: u32) -> Vec<Hash256> {
        let mut inner = self.lock();
        let mut removed = Vec::new();
        while inner.height() > height + 1 {
            let (block, transactions) = match inner.pop_block() {
                Some(popped) => popped,
                None => break,
            };
            removed.push(block.hash());
            inner.return_transactions_to_pool(transactions);
        }
        inner.update_size_limit();
        removed
    }

    pub fn checkpoints_add(&self, height: u32, hash: Hash256) {
        self.lock().checkpoints.add(height, hash);
    }
}

impl TransactionValidator for Blockchain {
    fn check_transaction_inputs(&self, tx: &Transaction, max_used: &mut BlockInfo) -> bool {
        let inner = self.lock();
        let mut tail = BlockInfo::default();
        inner.check_tx_inputs_full(tx, max_used, &mut tail)
    }

    fn check_transaction_inputs_cached(
        &self,
        tx: &Transaction,
        max_used: &mut BlockInfo,
        last_failed: &mut BlockInfo,
    ) -> bool {
        let inner = self.lock();
        inner.check_tx_inputs_cached(tx, max_used, last_failed)
    }

    fn have_spent_key_images(&self, tx: &Transaction) -> bool {
        let inner = self.lock();
        inner.have_spent_key_images_of(tx)
    }

    fn check_transaction_size(&self, blob_size: usize) -> bool {
        let inner = self.lock();
        let limit = inner
            .currency
            .max_transaction_blob_size(inner.current_block_size_limit);
        if blob_size as u64 > limit {
            log_error!("transaction is too big: {blob_size} bytes, maximum allowed {limit}");
            return false;
        }
        true
    }
}

impl ChainInner {
    fn height(&self) -> u32 {
        self.blocks.len() as u32
    }

    fn tail_id(&self) -> Hash256 {
        self.block_index.tail_id().unwrap_or(NULL_HASH)
    }

    fn transaction_by_index(&self, index: TransactionIndex) -> &TransactionEntry {
        &self.blocks[index.block as usize].transactions[index.transaction as usize]
    }

    fn pool(&self) -> Option<Arc<dyn BlockTransactionPool>> {
        self.pool.as_ref().and_then(Weak::upgrade)
    }

    // ---- difficulty and timestamps -------------------------------------

    fn difficulty_for_next_block(&self) -> Difficulty {
        let count = self.currency.difficulty_blocks_count();
        let mut offset = self.blocks.len().saturating_sub(count);
        if offset == 0 {
            offset = 1;
        }
        let mut timestamps = Vec::new();
        let mut cumulative = Vec::new();
        for entry in &self.blocks[offset.min(self.blocks.len())..] {
            timestamps.push(entry.block.header.timestamp);
            cumulative.push(entry.cumulative_difficulty);
        }
        next_difficulty(&self.currency, timestamps, cumulative)
    }

    /// Difficulty for the next block of an alternative branch, blending
    /// main-chain history below the split with the branch itself.
    fn difficulty_for_alternative_chain(
        &self,
        alt_chain: &[Hash256],
        new_block_height: u32,
    ) -> Difficulty {
        let count = self.currency.difficulty_blocks_count();
        let mut timestamps = Vec::new();
        let mut cumulative = Vec::new();

        if alt_chain.len() < count {
            let split = alt_chain
                .first()
                .and_then(|id| self.alternative_chains.get(id))
                .map_or(new_block_height, |entry| entry.height) as usize;
            let main_count = (count - alt_chain.len()).min(split);
            let mut start = split - main_count;
            if start == 0 {
                start = 1;
            }
            for entry in &self.blocks[start..split] {
                timestamps.push(entry.block.header.timestamp);
                cumulative.push(entry.cumulative_difficulty);
            }
            for id in alt_chain {
                if let Some(entry) = self.alternative_chains.get(id) {
                    timestamps.push(entry.block.header.timestamp);
                    cumulative.push(entry.cumulative_difficulty);
                }
            }
        } else {
            for id in &alt_chain[alt_chain.len() - count..] {
                if let Some(entry) = self.alternative_chains.get(id) {
                    timestamps.push(entry.block.header.timestamp);
                    cumulative.push(entry.cumulative_difficulty);
                }
            }
        }

        next_difficulty(&self.currency, timestamps, cumulative)
    }

    fn check_block_timestamp_main(&self, block: &Block) -> bool {
        if block.header.timestamp > self.time.now() + self.currency.block_future_time_limit {
            log_info!(
                "block {} timestamp {} is too far in the future",
                to_hex(&block.hash()),
                block.header.timestamp
            );
            return false;
        }
        let window = self.currency.timestamp_check_window;
        let offset = self.blocks.len().saturating_sub(window);
        let timestamps: Vec<u64> = self.blocks[offset..]
            .iter()
            .map(|entry| entry.block.header.timestamp)
            .collect();
        self.check_block_timestamp(timestamps, block)
    }

    fn check_block_timestamp(&self, timestamps: Vec<u64>, block: &Block) -> bool {
        if timestamps.len() < self.currency.timestamp_check_window {
            return true;
        }
        let mut sorted = timestamps;
        sorted.sort_unstable();
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 1 {
            sorted[mid]
        } else {
            (sorted[mid - 1] + sorted[mid]) / 2
        };
        if block.header.timestamp < median {
            log_info!(
                "block {} timestamp {} is less than the median of the last {} blocks",
                to_hex(&block.hash()),
                block.header.timestamp,
                self.currency.timestamp_check_window
            );
            return false;
        }
        true
    }

    fn complete_timestamps_vector(&self, start_top_height: u32, timestamps: &mut Vec<u64>) -> bool {
        let window = self.currency.timestamp_check_window;
        if timestamps.len() >= window {
            return true;
        }
        if start_top_height as usize >= self.blocks.len() {
            log_error!(
                "internal error: start height {start_top_height} is not below chain size {}",
                self.blocks.len()
            );
            return false;
        }
        let needed = window - timestamps.len();
        let stop = (start_top_height as usize + 1).saturating_sub(needed);
        let mut height = start_top_height as usize;
        loop {
            timestamps.push(self.blocks[height].block.header.timestamp);
            if height == 0 || height == stop {
                break;
            }
            height -= 1;
        }
        true
    }

    // ---- coinbase validation -------------------------------------------

    fn prevalidate_coinbase(&self, block: &Block, height: u32) -> bool {
        let base = &block.base_transaction;
        if base.prefix.inputs.len() != 1 {
            log_error!("coinbase transaction does not have exactly one input");
            return false;
        }
        let claimed_height = match &base.prefix.inputs[0] {
            TransactionInput::Base(input) => input.block_index,
            _ => {
                log_error!("coinbase transaction has the wrong input type");
                return false;
            }
        };
        if claimed_height != height {
            log_info!("coinbase claims height {claimed_height}, expected {height}");
            return false;
        }
        let expected_unlock = height as u64 + self.currency.mined_money_unlock_window as u64;
        if base.prefix.unlock_time != expected_unlock {
            log_error!(
                "coinbase has wrong unlock time {}, expected {expected_unlock}",
                base.prefix.unlock_time
            );
            return false;
        }
        if base.checked_output_amount().is_none() {
            log_info!("coinbase outputs overflow in block {}", to_hex(&block.hash()));
            return false;
        }
        true
    }

    fn validate_coinbase(
        &self,
        block: &Block,
        cumulative_block_size: usize,
        already_generated_coins: u64,
        fee: u64,
    ) -> Option<i64> {
        let miner_reward = block.base_transaction.output_amount();
        let sizes = self.last_block_sizes(self.currency.reward_blocks_window);
        let median = median_value(&sizes);
        let Some((reward, emission_change)) = self.currency.block_reward(
            median,
            cumulative_block_size,
            already_generated_coins,
            fee,
        ) else {
            log_info!("block size {cumulative_block_size} exceeds what this chain allows");
            return None;
        };
        if miner_reward > reward {
            log_error!(
                "coinbase spends too much: {} with block reward {}",
                self.currency.format_amount(miner_reward),
                self.currency.format_amount(reward)
            );
            return None;
        }
        if miner_reward < reward {
            log_error!(
                "coinbase does not claim the full reward: {} of {}",
                self.currency.format_amount(miner_reward),
                self.currency.format_amount(reward)
            );
            return None;
        }
        Some(emission_change)
    }

    fn last_block_sizes(&self, count: usize) -> Vec<usize> {
        let offset = self.blocks.len().saturating_sub(count);
        self.blocks[offset..]
            .iter()
            .map(|entry| entry.block_cumulative_size)
            .collect()
    }

    fn update_size_limit(&mut self) {
        let sizes = self.last_block_sizes(self.currency.reward_blocks_window);
        let median = median_value(&sizes).max(self.currency.block_granted_full_reward_zone);
        self.current_block_size_limit = median as u64 * 2;
    }

    fn check_cumulative_block_size(&self, id: &Hash256, size: usize, height: u64) -> bool {
        let max = self.currency.max_block_cumulative_size(height);
        if size as u64 > max {
            log_info!(
                "block {} is too big: {size} bytes, expected no more than {max}",
                to_hex(id)
            );
            return false;
        }
        true
    }

    // ---- input validation ----------------------------------------------

    fn is_spendtime_unlocked(&self, unlock_time: u64) -> bool {
        if unlock_time < obol_currency::constants::MAX_BLOCK_NUMBER {
            let current = self.height() as u64;
            current.saturating_sub(1) + self.currency.locked_tx_allowed_delta_blocks as u64
                >= unlock_time
        } else {
            self.time.now() + self.currency.locked_tx_allowed_delta_seconds >= unlock_time
        }
    }

    fn have_spent_key_images_of(&self, tx: &Transaction) -> bool {
        tx.prefix.inputs.iter().any(|input| match input {
            TransactionInput::Key(key_input) => {
                self.spent_key_images.contains(&key_input.key_image)
            }
            _ => false,
        })
    }

    /// Resolves a key input's ring members to their output keys,
    /// checking lock state, and tracks the highest owning block.
    fn resolve_key_input(
        &self,
        input: &KeyInput,
        max_related_height: &mut u32,
    ) -> Option<Vec<PublicKey>> {
        let amount_outs = self.outputs.get(&input.amount)?;
        let absolute = relative_output_offsets_to_absolute(&input.output_offsets)?;
        let mut keys = Vec::with_capacity(absolute.len());
        for offset in absolute {
            let Some((tx_index, out_index)) = amount_outs.get(offset as usize).copied() else {
                log_info!(
                    "wrong index in transaction inputs: {offset}, registry holds {}",
                    amount_outs.len()
                );
                return None;
            };
            if tx_index.block as usize >= self.blocks.len() {
                log_error!("output registry references a block that is not committed");
                return None;
            }
            let entry = self.transaction_by_index(tx_index);
            if !self.is_spendtime_unlocked(entry.tx.prefix.unlock_time) {
                log_info!(
                    "a referenced output is still locked, unlock time {}",
                    entry.tx.prefix.unlock_time
                );
                return None;
            }
            let Some(output) = entry.tx.prefix.outputs.get(out_index as usize) else {
                log_error!(
                    "internal error: output index {out_index} exceeds transaction outputs"
                );
                return None;
            };
            match &output.target {
                TransactionOutputTarget::Key(key) => keys.push(*key),
                TransactionOutputTarget::Multisignature(_) => {
                    log_info!("referenced output has the wrong type for a key input");
                    return None;
                }
            }
            if tx_index.block > *max_related_height {
                *max_related_height = tx_index.block;
            }
        }
        Some(keys)
    }

    fn check_key_input(
        &self,
        input: &KeyInput,
        prefix_hash: &Hash256,
        signatures: &[obol_crypto::Signature],
        max_related_height: &mut u32,
    ) -> bool {
        let Some(output_keys) = self.resolve_key_input(input, max_related_height) else {
            log_info!(
                "failed to resolve output keys for amount {} with {} ring members",
                input.amount,
                input.output_offsets.len()
            );
            return false;
        };
        if output_keys.len() != input.output_offsets.len() {
            log_info!("resolved ring size does not match the input's ring size");
            return false;
        }
        if signatures.len() != output_keys.len() {
            log_error!(
                "internal error: signature count {} does not match ring size {}",
                signatures.len(),
                output_keys.len()
            );
            return false;
        }
        if self.is_in_checkpoint_zone {
            return true;
        }
        check_ring_signature(prefix_hash, &input.key_image, &output_keys, signatures)
    }

    /// Signatures validate strictly in order against a forward-only key
    /// cursor: a signature may skip keys, the cursor never rewinds.
    fn validate_multisignature_input(
        &self,
        input: &MultisignatureInput,
        tx_hash: &Hash256,
        prefix_hash: &Hash256,
        signatures: &[obol_crypto::Signature],
    ) -> bool {
        let Some(amount_outputs) = self.multisignature_outputs.get(&input.amount) else {
            log_debug!("transaction {} uses a multisignature amount with no outputs", to_hex(tx_hash));
            return false;
        };
        let Some(usage) = amount_outputs.get(input.output_index as usize) else {
            log_debug!("transaction {} references an invalid multisignature index", to_hex(tx_hash));
            return false;
        };
        if usage.is_used {
            log_debug!("transaction {} double spends a multisignature output", to_hex(tx_hash));
            return false;
        }
        let owning_tx = &self.transaction_by_index(usage.transaction_index).tx;
        if !self.is_spendtime_unlocked(owning_tx.prefix.unlock_time) {
            log_debug!("transaction {} spends a locked multisignature output", to_hex(tx_hash));
            return false;
        }
        let output = match &owning_tx.prefix.outputs[usage.output_index as usize].target {
            TransactionOutputTarget::Multisignature(out) => out,
            TransactionOutputTarget::Key(_) => {
                log_error!("multisignature registry references a key output");
                return false;
            }
        };
        if input.signature_count != output.required_signatures {
            log_debug!("transaction {} has the wrong multisignature count", to_hex(tx_hash));
            return false;
        }
        if signatures.len() != input.signature_count as usize {
            log_error!("internal error: multisignature slot count mismatch");
            return false;
        }

        let mut signature_index = 0;
        let mut key_index = 0;
        while signature_index < signatures.len() {
            if key_index == output.keys.len() {
                log_debug!("transaction {} has invalid multisignatures", to_hex(tx_hash));
                return false;
            }
            if check_signature(prefix_hash, &output.keys[key_index], &signatures[signature_index]) {
                signature_index += 1;
            }
            key_index += 1;
        }
        true
    }

    fn check_tx_inputs(&self, tx: &Transaction, max_used_height: &mut u32) -> bool {
        let prefix_hash = tx.prefix_hash();
        let tx_hash = tx.hash();
        for (input_index, input) in tx.prefix.inputs.iter().enumerate() {
            let Some(signatures) = tx.signatures.get(input_index) else {
                log_error!("transaction {} is missing a signature slot", to_hex(&tx_hash));
                return false;
            };
            match input {
                TransactionInput::Key(key_input) => {
                    if key_input.output_offsets.is_empty() {
                        log_error!("empty ring in transaction {}", to_hex(&tx_hash));
                        return false;
                    }
                    if self.spent_key_images.contains(&key_input.key_image) {
                        log_debug!(
                            "key image already spent in blockchain: {}",
                            to_hex(key_input.key_image.as_bytes())
                        );
                        return false;
                    }
                    if !self.check_key_input(key_input, &prefix_hash, signatures, max_used_height) {
                        log_info!("failed to check ring signature for tx {}", to_hex(&tx_hash));
                        return false;
                    }
                }
                TransactionInput::Multisignature(ms_input) => {
                    if !self.validate_multisignature_input(ms_input, &tx_hash, &prefix_hash, signatures)
                    {
                        return false;
                    }
                }
                TransactionInput::Base(_) => {
                    log_info!("transaction {} contains an input of unsupported type", to_hex(&tx_hash));
                    return false;
                }
            }
        }
        true
    }

    fn check_tx_inputs_full(
        &self,
        tx: &Transaction,
        max_used: &mut BlockInfo,
        tail: &mut BlockInfo,
    ) -> bool {
        tail.height = self.height().saturating_sub(1);
        tail.id = self.tail_id();

        let mut max_used_height = 0u32;
        if !self.check_tx_inputs(tx, &mut max_used_height) {
            return false;
        }
        if max_used_height as usize >= self.blocks.len() {
            log_error!(
                "internal error: max used block index {max_used_height} is not below chain size {}",
                self.blocks.len()
            );
            return false;
        }
        max_used.height = max_used_height;
        max_used.id = self.block_index.block_id(max_used_height).unwrap_or(NULL_HASH);
        true
    }

    fn check_tx_inputs_cached(
        &self,
        tx: &Transaction,
        max_used: &mut BlockInfo,
        last_failed: &mut BlockInfo,
    ) -> bool {
        let mut tail = BlockInfo::default();
        if max_used.is_empty() {
            if !last_failed.is_empty()
                && self.height() > last_failed.height
                && self.block_index.block_id(last_failed.height) == Some(last_failed.id)
            {
                // known broken against this exact chain state
                return false;
            }
            if !self.check_tx_inputs_full(tx, max_used, &mut tail) {
                *last_failed = tail;
                return false;
            }
        } else {
            if max_used.height >= self.height() {
                return false;
            }
            if self.block_index.block_id(max_used.height) != Some(max_used.id) {
                if !last_failed.is_empty()
                    && self.block_index.block_id(last_failed.height) == Some(last_failed.id)
                {
                    return false;
                }
                if !self.check_tx_inputs_full(tx, max_used, &mut tail) {
                    *last_failed = tail;
                    return false;
                }
            }
        }
        true
    }

    // ---- commit and rollback -------------------------------------------

    /// Rejects duplicate multisignature references within one transaction.
    fn check_multisignature_inputs_diff(&self, tx: &Transaction) -> bool {
        let mut seen = HashSet::new();
        for input in &tx.prefix.inputs {
            if let TransactionInput::Multisignature(ms) = input {
                if !seen.insert((ms.amount, ms.output_index)) {
                    return false;
                }
            }
        }
        true
    }

    /// Commits one transaction's inputs and outputs to the registries,
    /// assigning global output indices. All-or-nothing.
    fn commit_transaction(
        &mut self,
        tx: &Transaction,
        hash: Hash256,
        index: TransactionIndex,
    ) -> Option<Vec<u32>> {
        if self.transaction_map.insert(hash, index).is_some() {
            log_error!("duplicate transaction was pushed to the blockchain");
            return None;
        }

        if !self.check_multisignature_inputs_diff(tx) {
            log_error!("double spending transaction was pushed to the blockchain");
            self.transaction_map.remove(&hash);
            return None;
        }

        let mut inserted_images: Vec<KeyImage> = Vec::new();
        for input in &tx.prefix.inputs {
            if let TransactionInput::Key(key_input) = input {
                if !self.spent_key_images.insert(key_input.key_image) {
                    log_error!("double spending transaction was pushed to the blockchain");
                    for image in &inserted_images {
                        self.spent_key_images.remove(image);
                    }
                    self.transaction_map.remove(&hash);
                    return None;
                }
                inserted_images.push(key_input.key_image);
            }
        }

        for input in &tx.prefix.inputs {
            if let TransactionInput::Multisignature(ms) = input {
                let usage = self
                    .multisignature_outputs
                    .get_mut(&ms.amount)
                    .and_then(|outputs| outputs.get_mut(ms.output_index as usize));
                match usage {
                    Some(usage) => usage.is_used = true,
                    None => log_error!("multisignature output missing while committing transaction"),
                }
            }
        }

        let mut global_indexes = Vec::with_capacity(tx.prefix.outputs.len());
        for (out_index, output) in tx.prefix.outputs.iter().enumerate() {
            match &output.target {
                TransactionOutputTarget::Key(_) => {
                    let amount_outputs = self.outputs.entry(output.amount).or_default();
                    global_indexes.push(amount_outputs.len() as u32);
                    amount_outputs.push((index, out_index as u16));
                }
                TransactionOutputTarget::Multisignature(_) => {
                    let amount_outputs = self.multisignature_outputs.entry(output.amount).or_default();
                    global_indexes.push(amount_outputs.len() as u32);
                    amount_outputs.push(MultisignatureOutputUsage {
                        transaction_index: index,
                        output_index: out_index as u16,
                        is_used: false,
                    });
                }
            }
        }

        self.payment_id_index.add(tx);
        Some(global_indexes)
    }

    /// Reverses [`Self::commit_transaction`]. Registry mismatches are
    /// logged and skipped rather than aborting the pop.
    fn pop_transaction(&mut self, tx: &Transaction, hash: &Hash256) {
        let Some(transaction_index) = self.transaction_map.get(hash).copied() else {
            log_error!("blockchain consistency broken - cannot find transaction by hash");
            return;
        };

        for (back_offset, output) in tx.prefix.outputs.iter().enumerate().rev() {
            match &output.target {
                TransactionOutputTarget::Key(_) => {
                    let Some(amount_outputs) = self.outputs.get_mut(&output.amount) else {
                        log_error!(
                            "blockchain consistency broken - cannot find specific amount in outputs map"
                        );
                        continue;
                    };
                    let Some(last) = amount_outputs.last().copied() else {
                        log_error!(
                            "blockchain consistency broken - output array for specific amount is empty"
                        );
                        continue;
                    };
                    if last.0 != transaction_index {
                        log_error!("blockchain consistency broken - invalid transaction index");
                        continue;
                    }
                    if last.1 as usize != back_offset {
                        log_error!("blockchain consistency broken - invalid output index");
                        continue;
                    }
                    amount_outputs.pop();
                    if amount_outputs.is_empty() {
                        self.outputs.remove(&output.amount);
                    }
                }
                TransactionOutputTarget::Multisignature(_) => {
                    let Some(amount_outputs) = self.multisignature_outputs.get_mut(&output.amount)
                    else {
                        log_error!(
                            "blockchain consistency broken - cannot find specific amount in outputs map"
                        );
                        continue;
                    };
                    let Some(last) = amount_outputs.last().copied() else {
                        log_error!(
                            "blockchain consistency broken - output array for specific amount is empty"
                        );
                        continue;
                    };
                    if last.is_used {
                        log_error!("blockchain consistency broken - attempting to remove used output");
                        continue;
                    }
                    if last.transaction_index != transaction_index {
                        log_error!("blockchain consistency broken - invalid transaction index");
                        continue;
                    }
                    if last.output_index as usize != back_offset {
                        log_error!("blockchain consistency broken - invalid output index");
                        continue;
                    }
                    amount_outputs.pop();
                    if amount_outputs.is_empty() {
                        self.multisignature_outputs.remove(&output.amount);
                    }
                }
            }
        }

        for input in &tx.prefix.inputs {
            match input {
                TransactionInput::Key(key_input) => {
                    if !self.spent_key_images.remove(&key_input.key_image) {
                        log_error!("blockchain consistency broken - cannot find spent key");
                    }
                }
                TransactionInput::Multisignature(ms) => {
                    let entry = self
                        .multisignature_outputs
                        .get_mut(&ms.amount)
                        .and_then(|outputs| outputs.get_mut(ms.output_index as usize));
                    match entry {
                        Some(usage) if usage.is_used => usage.is_used = false,
                        Some(_) => log_error!(
                            "blockchain consistency broken - multisignature output not marked as used"
                        ),
                        None => log_error!(
                            "blockchain consistency broken - multisignature output missing"
                        ),
                    }
                }
                TransactionInput::Base(_) => {}
            }
        }

        self.payment_id_index.remove(tx);

        if self.transaction_map.remove(hash).is_none() {
            log_error!("blockchain consistency broken - cannot find transaction by hash");
        }
    }

    // ---- push and pop --------------------------------------------------

    fn push_block_with_transactions(
        &mut self,
        block: Block,
        transactions: Vec<Transaction>,
        ctx: &mut BlockVerificationContext,
    ) -> bool {
        let block_hash = block.hash();

        if self.block_index.has_block(&block_hash) {
            log_error!("block {} already exists in blockchain", to_hex(&block_hash));
            ctx.verification_failed = true;
            return false;
        }

        if block.header.previous_block_hash != self.tail_id() {
            log_info!(
                "block {} has wrong previous hash {}, expected {}",
                to_hex(&block_hash),
                to_hex(&block.header.previous_block_hash),
                to_hex(&self.tail_id())
            );
            ctx.verification_failed = true;
            return false;
        }

        if !self.blocks.is_empty() && !self.check_block_timestamp_main(&block) {
            log_info!(
                "block {} has invalid timestamp {}",
                to_hex(&block_hash),
                block.header.timestamp
            );
            ctx.verification_failed = true;
            return false;
        }

        let current_difficulty = if self.blocks.is_empty() { 1 } else { self.difficulty_for_next_block() };
        if current_difficulty == 0 {
            log_error!("difficulty overhead while pushing block");
            return false;
        }

        let height = self.height();
        self.is_in_checkpoint_zone = self.checkpoints.is_in_checkpoint_zone(height);
        if self.checkpoints.is_checkpoint_height(height) {
            let (ok, _) = self.checkpoints.check_block(height, &block_hash);
            if !ok {
                log_error!("checkpoint validation failed at height {height}");
                ctx.verification_failed = true;
                return false;
            }
        } else {
            let mut proof_of_work = NULL_HASH;
            if !check_proof_of_work(&block, current_difficulty, &mut proof_of_work) {
                log_info!(
                    "block {} has too weak proof of work {}, expected difficulty {current_difficulty}",
                    to_hex(&block_hash),
                    to_hex(&proof_of_work)
                );
                ctx.verification_failed = true;
                return false;
            }
        }

        if !self.prevalidate_coinbase(&block, height) {
            log_info!("block {} failed coinbase prevalidation", to_hex(&block_hash));
            ctx.verification_failed = true;
            return false;
        }

        // commit phase: coinbase first, then the mined transactions, each
        // undone in reverse if anything later fails
        let mut committed: Vec<(Transaction, Hash256)> = Vec::with_capacity(1 + transactions.len());
        let mut entries: Vec<TransactionEntry> = Vec::with_capacity(1 + transactions.len());

        let miner_tx_hash = block.base_transaction.hash();
        let base_index = TransactionIndex { block: height, transaction: 0 };
        let Some(base_globals) =
            self.commit_transaction(&block.base_transaction, miner_tx_hash, base_index)
        else {
            ctx.verification_failed = true;
            return false;
        };
        entries.push(TransactionEntry {
            tx: block.base_transaction.clone(),
            global_output_indexes: base_globals,
        });
        committed.push((block.base_transaction.clone(), miner_tx_hash));

        let rollback = |inner: &mut Self, committed: &mut Vec<(Transaction, Hash256)>| {
            for (tx, hash) in committed.iter().rev() {
                inner.pop_transaction(tx, hash);
            }
            committed.clear();
        };

        let coinbase_size = block.base_transaction.blob_size();
        let mut cumulative_size = coinbase_size;
        let mut fee_summary = 0u64;
        for (position, tx) in transactions.iter().enumerate() {
            let tx_hash = block.transaction_hashes[position];
            let blob_size = tx.blob_size();
            let fee = tx.input_amount().saturating_sub(tx.output_amount());

            let mut max_used_height = 0u32;
            if !self.check_tx_inputs(tx, &mut max_used_height) {
                log_info!(
                    "block {} has at least one transaction with wrong inputs: {}",
                    to_hex(&block_hash),
                    to_hex(&tx_hash)
                );
                ctx.verification_failed = true;
                rollback(self, &mut committed);
                return false;
            }

            let index = TransactionIndex { block: height, transaction: (position + 1) as u16 };
            let Some(globals) = self.commit_transaction(tx, tx_hash, index) else {
                ctx.verification_failed = true;
                rollback(self, &mut committed);
                return false;
            };
            entries.push(TransactionEntry { tx: tx.clone(), global_output_indexes: globals });
            committed.push((tx.clone(), tx_hash));

            cumulative_size += blob_size;
            fee_summary += fee;
        }

        if !self.check_cumulative_block_size(&block_hash, cumulative_size, height as u64) {
            ctx.verification_failed = true;
            rollback(self, &mut committed);
            return false;
        }

        let already_generated_coins = self.blocks.last().map_or(0, |e| e.already_generated_coins);
        let Some(emission_change) =
            self.validate_coinbase(&block, cumulative_size, already_generated_coins, fee_summary)
        else {
            log_info!("block {} has invalid coinbase amount", to_hex(&block_hash));
            ctx.verification_failed = true;
            rollback(self, &mut committed);
            return false;
        };

        let cumulative_difficulty = current_difficulty
            + self.blocks.last().map_or(0, |e| e.cumulative_difficulty);

        let entry = BlockEntry {
            block,
            height,
            block_cumulative_size: cumulative_size,
            cumulative_difficulty,
            already_generated_coins: already_generated_coins
                .saturating_add_signed(emission_change),
            transactions: entries,
        };
        self.push_block_entry(entry, block_hash);

        log_debug!(
            "block {} added at height {height}, difficulty {current_difficulty}, size {cumulative_size}, fee {}",
            to_hex(&block_hash),
            fee_summary
        );

        ctx.added_to_main_chain = true;
        self.update_size_limit();
        true
    }

    fn push_block_entry(&mut self, entry: BlockEntry, block_hash: Hash256) {
        self.timestamp_index.add(entry.block.header.timestamp, block_hash);
        self.generated_transactions_index
            .add(entry.height, entry.transactions.len() as u64);
        self.blocks.push(entry);
        self.block_index.push(block_hash);
        debug_assert_eq!(self.block_index.size() as usize, self.blocks.len());
    }

    fn pop_block(&mut self) -> Option<(Block, Vec<Transaction>)> {
        if self.blocks.is_empty() {
            log_error!("attempt to pop block from empty blockchain");
            return None;
        }

        let entry = self.blocks.last().cloned().expect("not empty");
        let block_hash = entry.block.hash();

        let transactions: Vec<Transaction> =
            entry.transactions.iter().skip(1).map(|t| t.tx.clone()).collect();

        for (back_offset, tx_entry) in entry.transactions.iter().enumerate().skip(1).rev() {
            let hash = entry.block.transaction_hashes[back_offset - 1];
            self.pop_transaction(&tx_entry.tx, &hash);
        }
        self.pop_transaction(&entry.block.base_transaction, &entry.block.base_transaction.hash());

        self.timestamp_index.remove(entry.block.header.timestamp, &block_hash);
        self.generated_transactions_index
            .remove(entry.height, entry.transactions.len() as u64);

        self.blocks.pop();
        self.block_index.pop();
        debug_assert_eq!(self.block_index.size() as usize, self.blocks.len());

        Some((entry.block, transactions))
    }

    // ---- pool handoff --------------------------------------------------

    fn load_transactions(&self, block: &Block) -> Option<Vec<Transaction>> {
        if block.transaction_hashes.is_empty() {
            return Some(Vec::new());
        }
        let Some(pool) = self.pool() else {
            log_error!("block references transactions but no pool is attached");
            return None;
        };
        let mut taken = Vec::with_capacity(block.transaction_hashes.len());
        for hash in &block.transaction_hashes {
            match pool.take_for_block(hash) {
                Some((tx, _, _)) => taken.push(tx),
                None => {
                    for tx in taken.into_iter().rev() {
                        if !pool.return_from_block(tx) {
                            log_error!("failed to return transaction to pool");
                        }
                    }
                    return None;
                }
            }
        }
        Some(taken)
    }

    fn return_transactions_to_pool(&self, transactions: Vec<Transaction>) {
        if transactions.is_empty() {
            return;
        }
        let Some(pool) = self.pool() else {
            log_warn!("dropping {} popped transactions, no pool attached", transactions.len());
            return;
        };
        for tx in transactions.into_iter().rev() {
            if !pool.return_from_block(tx) {
                log_error!("failed to return popped transaction to pool");
            }
        }
    }

    // ---- front door ----------------------------------------------------

    fn add_new_block(&mut self, block: Block, ctx: &mut BlockVerificationContext) -> bool {
        let id = block.hash();

        if self.block_index.has_block(&id) || self.alternative_chains.contains_key(&id) {
            log_trace!("block {} already exists", to_hex(&id));
            ctx.already_exists = true;
            return false;
        }

        if block.header.previous_block_hash != self.tail_id() {
            ctx.added_to_main_chain = false;
            return self.handle_alternative_block(block, id, ctx, true);
        }

        let Some(transactions) = self.load_transactions(&block) else {
            ctx.verification_failed = true;
            return false;
        };

        let pushed = self.push_block_with_transactions(block, transactions.clone(), ctx);
        if !pushed {
            // return bodies so the pool can retry them later
            self.return_transactions_to_pool(transactions);
            return false;
        }
        self.messages.send(BlockchainMessage::NewBlock(id));
        true
    }

    // ---- alternative chains and reorg ----------------------------------

    fn coinbase_height(block: &Block) -> Option<u32> {
        match block.base_transaction.prefix.inputs.first() {
            Some(TransactionInput::Base(input)) => Some(input.block_index),
            _ => None,
        }
    }

    fn block_cumulative_size_estimate(&self, block: &Block) -> (usize, bool) {
        let mut size = block.base_transaction.blob_size();
        let mut precise = true;
        let pool = self.pool();
        for hash in &block.transaction_hashes {
            if let Some(index) = self.transaction_map.get(hash) {
                size += self.transaction_by_index(*index).tx.blob_size();
            } else if let Some(tx) = pool.as_ref().and_then(|p| p.get_transaction(hash)) {
                size += tx.blob_size();
            } else {
                precise = false;
            }
        }
        (size, precise)
    }

    fn handle_alternative_block(
        &mut self,
        block: Block,
        id: Hash256,
        ctx: &mut BlockVerificationContext,
        send_alternative_message: bool,
    ) -> bool {
        let Some(coinbase_height) = Self::coinbase_height(&block) else {
            log_error!("alternative block {} has a malformed coinbase", to_hex(&id));
            ctx.verification_failed = true;
            return false;
        };
        if coinbase_height == 0 {
            log_error!("alternative block {} claims genesis height", to_hex(&id));
            ctx.verification_failed = true;
            return false;
        }

        if !self
            .checkpoints
            .is_alternative_block_allowed(self.height(), coinbase_height)
        {
            log_trace!(
                "block {} at height {coinbase_height} cannot start an alternative chain below a checkpoint",
                to_hex(&id)
            );
            ctx.verification_failed = true;
            return false;
        }

        let (cumulative_size, precise) = self.block_cumulative_size_estimate(&block);
        if !precise {
            log_trace!(
                "block {} has unknown transactions, cumulative size is imprecise",
                to_hex(&id)
            );
        }
        if !self.check_cumulative_block_size(&id, cumulative_size, coinbase_height as u64) {
            ctx.verification_failed = true;
            return false;
        }

        let main_prev_height = self.block_index.block_height(&block.header.previous_block_hash);
        let alt_prev = self.alternative_chains.contains_key(&block.header.previous_block_hash);

        if main_prev_height.is_none() && !alt_prev {
            ctx.marked_as_orphaned = true;
            log_info!("block {} recognized as orphaned and rejected", to_hex(&id));
            return true;
        }

        // walk back to the main-chain root, collecting the branch in
        // root -> tip order
        let mut alt_chain: Vec<Hash256> = Vec::new();
        let mut timestamps: Vec<u64> = Vec::new();
        let mut cursor = block.header.previous_block_hash;
        while let Some(entry) = self.alternative_chains.get(&cursor) {
            alt_chain.push(cursor);
            timestamps.push(entry.block.header.timestamp);
            cursor = entry.block.header.previous_block_hash;
        }
        alt_chain.reverse();
        timestamps.reverse();

        let height;
        if let Some(first) = alt_chain.first() {
            let split_height = self.alternative_chains[first].height;
            if self.blocks.len() <= split_height as usize {
                log_error!("main blockchain is shorter than the alternative split height");
                return false;
            }
            let connect = self.blocks[split_height as usize - 1].block.hash();
            if connect != self.alternative_chains[first].block.header.previous_block_hash {
                log_error!("alternative chain has a broken connection to the main chain");
                return false;
            }
            if !self.complete_timestamps_vector(split_height - 1, &mut timestamps) {
                return false;
            }
            height = self.alternative_chains[&block.header.previous_block_hash].height + 1;
        } else {
            let prev_height = main_prev_height.expect("checked above");
            if !self.complete_timestamps_vector(prev_height, &mut timestamps) {
                return false;
            }
            height = prev_height + 1;
        }

        if !self.check_block_timestamp(timestamps, &block) {
            log_info!(
                "alternative block {} has invalid timestamp {}",
                to_hex(&id),
                block.header.timestamp
            );
            ctx.verification_failed = true;
            return false;
        }

        let (checkpoint_ok, is_checkpoint) = self.checkpoints.check_block(height, &id);
        if !checkpoint_ok {
            log_error!("checkpoint validation failed for alternative block at height {height}");
            ctx.verification_failed = true;
            return false;
        }

        // proof of work is always checked for alternative blocks
        self.is_in_checkpoint_zone = false;
        let difficulty = self.difficulty_for_alternative_chain(&alt_chain, height);
        if difficulty == 0 {
            log_error!("difficulty overhead on alternative chain");
            return false;
        }
        let mut proof_of_work = NULL_HASH;
        if !check_proof_of_work(&block, difficulty, &mut proof_of_work) {
            log_info!(
                "alternative block {} has not enough proof of work {}, expected difficulty {difficulty}",
                to_hex(&id),
                to_hex(&proof_of_work)
            );
            ctx.verification_failed = true;
            return false;
        }

        if !self.prevalidate_coinbase(&block, height) {
            log_info!("alternative block {} has a wrong coinbase", to_hex(&id));
            ctx.verification_failed = true;
            return false;
        }

        let previous_cumulative = match alt_chain.last() {
            Some(last) => self.alternative_chains[last].cumulative_difficulty,
            None => {
                let prev_height = main_prev_height.expect("checked above") as usize;
                self.blocks[prev_height].cumulative_difficulty
            }
        };
        let cumulative_difficulty = previous_cumulative + difficulty;

        self.alternative_chains.insert(
            id,
            AltChainEntry { block: block.clone(), height, cumulative_difficulty },
        );
        self.orphan_index.add(height, id);
        alt_chain.push(id);

        let main_cumulative = self.blocks.last().map_or(0, |e| e.cumulative_difficulty);
        if is_checkpoint {
            log_info!(
                "reorganize triggered by checkpoint at height {height}, chain height {}",
                self.blocks.len()
            );
            let switched = self.switch_to_alternative_blockchain(alt_chain, true);
            if switched {
                ctx.added_to_main_chain = true;
                ctx.switched_to_alt_chain = true;
            } else {
                ctx.verification_failed = true;
            }
            switched
        } else if main_cumulative < cumulative_difficulty {
            log_info!(
                "reorganize: alternative cumulative difficulty {cumulative_difficulty} beats main {main_cumulative}"
            );
            let switched = self.switch_to_alternative_blockchain(alt_chain, false);
            if switched {
                ctx.added_to_main_chain = true;
                ctx.switched_to_alt_chain = true;
            } else {
                ctx.verification_failed = true;
            }
            switched
        } else {
            log_info!(
                "block {} added as alternative at height {height}, difficulty {difficulty}",
                to_hex(&id)
            );
            if send_alternative_message {
                self.messages.send(BlockchainMessage::NewAlternativeBlock(id));
            }
            true
        }
    }

    fn rollback_blockchain_switching(
        &mut self,
        original_chain: Vec<Block>,
        rollback_height: u32,
    ) -> bool {
        while self.height() > rollback_height {
            let popped = self.pop_block();
            if let Some((_, transactions)) = popped {
                self.return_transactions_to_pool(transactions);
            } else {
                break;
            }
        }

        for block in original_chain {
            let transactions = match self.load_transactions(&block) {
                Some(txs) => txs,
                None => {
                    log_error!("failed to reload transactions while rolling back a chain switch");
                    return false;
                }
            };
            let mut ctx = BlockVerificationContext::default();
            if !self.push_block_with_transactions(block, transactions.clone(), &mut ctx)
                || !ctx.added_to_main_chain
            {
                self.return_transactions_to_pool(transactions);
                log_error!("failed to re-push original block while rolling back a chain switch");
                return false;
            }
        }

        log_info!("rollback success");
        true
    }

    /// Replaces the main-chain tail with `alt_chain` (root -> tip). On
    /// any failure the original chain is restored; the chain is never
    /// left half-switched.
    fn switch_to_alternative_blockchain(
        &mut self,
        alt_chain: Vec<Hash256>,
        discard_disconnected_chain: bool,
    ) -> bool {
        let Some(first) = alt_chain.first() else {
            log_error!("empty chain passed to switch_to_alternative_blockchain");
            return false;
        };
        let split_height = match self.alternative_chains.get(first) {
            Some(entry) => entry.height,
            None => {
                log_error!("alternative chain root is missing");
                return false;
            }
        };
        if self.blocks.len() <= split_height as usize {
            log_error!("blockchain size is lower than the split height");
            return false;
        }

        // disconnect the current tail
        let mut disconnected_chain: Vec<Block> = Vec::new();
        while self.height() > split_height {
            let Some((block, transactions)) = self.pop_block() else {
                break;
            };
            self.return_transactions_to_pool(transactions);
            disconnected_chain.insert(0, block);
        }

        // connect the new branch
        for (position, alt_id) in alt_chain.iter().enumerate() {
            let block = match self.alternative_chains.get(alt_id) {
                Some(entry) => entry.block.clone(),
                None => {
                    log_error!("alternative chain entry vanished mid-switch");
                    self.rollback_blockchain_switching(disconnected_chain, split_height);
                    return false;
                }
            };
            let mut ctx = BlockVerificationContext::default();
            let transactions = self.load_transactions(&block);
            let pushed = match transactions {
                Some(txs) => {
                    let pushed = self.push_block_with_transactions(block, txs.clone(), &mut ctx);
                    if !pushed {
                        self.return_transactions_to_pool(txs);
                    }
                    pushed && ctx.added_to_main_chain
                }
                None => false,
            };
            if !pushed {
                log_info!("failed to switch to alternative blockchain");
                self.rollback_blockchain_switching(disconnected_chain, split_height);

                // drop the failed block and everything that built on it
                for stale_id in &alt_chain[position..] {
                    if let Some(entry) = self.alternative_chains.remove(stale_id) {
                        self.orphan_index.remove(entry.height, stale_id);
                    }
                }
                return false;
            }
        }

        if !discard_disconnected_chain {
            // the abandoned tail becomes an alternative chain itself
            for old_block in &disconnected_chain {
                let old_id = old_block.hash();
                let mut ctx = BlockVerificationContext::default();
                if !self.handle_alternative_block(old_block.clone(), old_id, &mut ctx, false) {
                    log_error!("failed to push ex-main chain block to alternative chain");
                    self.rollback_blockchain_switching(disconnected_chain, split_height);
                    return false;
                }
            }
        }

        let mut blocks_from_common_root = Vec::with_capacity(alt_chain.len() + 1);
        if let Some(entry_height) = split_height.checked_sub(1) {
            blocks_from_common_root
                .push(self.block_index.block_id(entry_height).unwrap_or(NULL_HASH));
        }
        for alt_id in &alt_chain {
            blocks_from_common_root.push(*alt_id);
            if let Some(entry) = self.alternative_chains.remove(alt_id) {
                self.orphan_index.remove(entry.height, alt_id);
            }
        }

        self.messages.send(BlockchainMessage::ChainSwitch(blocks_from_common_root));
        log_info!(
            "reorganize success on height {split_height}, new blockchain size {}",
            self.blocks.len()
        );
        true
    }

    // ---- random outputs ------------------------------------------------

    /// Highest index (exclusive) of outputs old enough to serve as
    /// decoys: their owning block must be an unlock window deep.
    fn end_of_allowed_index(&self, amount_outs: &[(TransactionIndex, u16)]) -> usize {
        if amount_outs.is_empty() {
            return 0;
        }
        let mut i = amount_outs.len();
        while i > 0 {
            i -= 1;
            let owning_block = amount_outs[i].0.block;
            if owning_block + self.currency.mined_money_unlock_window <= self.height() {
                return i + 1;
            }
        }
        0
    }

    fn random_outs_for_amount<R: rand::Rng>(
        &self,
        amount: u64,
        count: usize,
        rng: &mut R,
    ) -> RandomOuts {
        let mut result = RandomOuts { amount, outs: Vec::new() };
        let Some(amount_outs) = self.outputs.get(&amount) else {
            log_error!("no outputs exist for amount {amount}, cannot pick mixins");
            return result;
        };
        let limit = self.end_of_allowed_index(amount_outs);
        if limit == 0 {
            return result;
        }
        let mut generator = ShuffleGenerator::new(limit as u64, rng);
        while result.outs.len() < count {
            let Some(picked) = generator.next_index() else {
                break;
            };
            let (tx_index, out_index) = amount_outs[picked as usize];
            let entry = self.transaction_by_index(tx_index);
            if !self.is_spendtime_unlocked(entry.tx.prefix.unlock_time) {
                continue;
            }
            match &entry.tx.prefix.outputs[out_index as usize].target {
                TransactionOutputTarget::Key(key) => {
                    result.outs.push(OutputEntry { global_index: picked as u32, public_key: *key });
                }
                TransactionOutputTarget::Multisignature(_) => {
                    log_error!("unexpected output type in the key output registry");
                }
            }
        }
        result.outs.sort_by_key(|entry| entry.global_index);
        result
    }

    // ---- persistence ---------------------------------------------------

    fn store_blocks(&self) {
        let mut encoder = Encoder::new();
        encoder.write_u8(BLOCKS_BLOB_VERSION);
        encoder.write_varint(self.blocks.len() as u64);
        for entry in &self.blocks {
            entry.consensus_encode(&mut encoder);
        }
        if let Err(err) = self.store.store(BLOCKS_BLOB_NAME, &encoder.into_inner()) {
            log_error!("failed to save block sequence: {err}");
        }
    }

    fn load_blocks(&mut self) {
        let Some(bytes) = self.store.load(BLOCKS_BLOB_NAME) else {
            return;
        };
        let mut decoder = Decoder::new(&bytes);
        let blocks = (|| -> Result<Vec<BlockEntry>, DecodeError> {
            let version = decoder.read_u8()?;
            if version != BLOCKS_BLOB_VERSION {
                return Err(DecodeError::InvalidData("unsupported block blob version"));
            }
            let count = decoder.read_size()?;
            let mut blocks = Vec::with_capacity(count);
            for _ in 0..count {
                blocks.push(BlockEntry::consensus_decode(&mut decoder)?);
            }
            Ok(blocks)
        })();
        match blocks {
            Ok(blocks) => self.blocks = blocks,
            Err(err) => {
                log_warn!("discarding unreadable block sequence: {err}");
                self.blocks.clear();
            }
        }
    }

    fn store_cache(&self) {
        let mut encoder = Encoder::new();
        encoder.write_u8(BLOCK_CACHE_VERSION);
        encoder.write_hash(&self.tail_id());

        encoder.write_varint(self.block_index.size() as u64);
        for height in 0..self.block_index.size() {
            encoder.write_hash(&self.block_index.block_id(height).expect("in range"));
        }

        let mut tx_hashes: Vec<&Hash256> = self.transaction_map.keys().collect();
        tx_hashes.sort_unstable();
        encoder.write_varint(tx_hashes.len() as u64);
        for hash in tx_hashes {
            let index = self.transaction_map[hash];
            encoder.write_hash(hash);
            encoder.write_u32_le(index.block);
            encoder.write_u16_le(index.transaction);
        }

        let mut images: Vec<&KeyImage> = self.spent_key_images.iter().collect();
        images.sort_unstable_by_key(|image| *image.as_bytes());
        encoder.write_varint(images.len() as u64);
        for image in images {
            encoder.write_key_image(image);
        }

        let mut amounts: Vec<&u64> = self.outputs.keys().collect();
        amounts.sort_unstable();
        encoder.write_varint(amounts.len() as u64);
        for amount in amounts {
            let entries = &self.outputs[amount];
            encoder.write_varint(*amount);
            encoder.write_varint(entries.len() as u64);
            for (index, out_index) in entries {
                encoder.write_u32_le(index.block);
                encoder.write_u16_le(index.transaction);
                encoder.write_u16_le(*out_index);
            }
        }

        let mut ms_amounts: Vec<&u64> = self.multisignature_outputs.keys().collect();
        ms_amounts.sort_unstable();
        encoder.write_varint(ms_amounts.len() as u64);
        for amount in ms_amounts {
            let entries = &self.multisignature_outputs[amount];
            encoder.write_varint(*amount);
            encoder.write_varint(entries.len() as u64);
            for usage in entries {
                encoder.write_u32_le(usage.transaction_index.block);
                encoder.write_u16_le(usage.transaction_index.transaction);
                encoder.write_u16_le(usage.output_index);
                encoder.write_bool(usage.is_used);
            }
        }

        if let Err(err) = self
            .store
            .store(self.currency.blocks_cache_file_name, &encoder.into_inner())
        {
            log_error!("failed to save blockchain cache: {err}");
        }
    }

    fn load_cache(&mut self, expected_tail: &Hash256) -> bool {
        let Some(bytes) = self.store.load(self.currency.blocks_cache_file_name) else {
            return false;
        };
        let mut decoder = Decoder::new(&bytes);
        let result = (|| -> Result<(), DecodeError> {
            let version = decoder.read_u8()?;
            if version != BLOCK_CACHE_VERSION {
                return Err(DecodeError::InvalidData("unsupported cache version"));
            }
            let tail = decoder.read_hash()?;
            if tail != *expected_tail {
                return Err(DecodeError::InvalidData("stale blockchain cache"));
            }

            let id_count = decoder.read_size()?;
            let mut block_index = BlockIndex::new();
            for _ in 0..id_count {
                block_index.push(decoder.read_hash()?);
            }

            let tx_count = decoder.read_size()?;
            let mut transaction_map = HashMap::with_capacity(tx_count);
            for _ in 0..tx_count {
                let hash = decoder.read_hash()?;
                let block = decoder.read_u32_le()?;
                let transaction = decoder.read_u16_le()?;
                transaction_map.insert(hash, TransactionIndex { block, transaction });
            }

            let image_count = decoder.read_size()?;
            let mut spent_key_images = HashSet::with_capacity(image_count);
            for _ in 0..image_count {
                spent_key_images.insert(decoder.read_key_image()?);
            }

            let amount_count = decoder.read_size()?;
            let mut outputs: HashMap<u64, Vec<(TransactionIndex, u16)>> =
                HashMap::with_capacity(amount_count);
            for _ in 0..amount_count {
                let amount = decoder.read_varint()?;
                let entry_count = decoder.read_size()?;
                let mut entries = Vec::with_capacity(entry_count);
                for _ in 0..entry_count {
                    let block = decoder.read_u32_le()?;
                    let transaction = decoder.read_u16_le()?;
                    let out_index = decoder.read_u16_le()?;
                    entries.push((TransactionIndex { block, transaction }, out_index));
                }
                outputs.insert(amount, entries);
            }

            let ms_amount_count = decoder.read_size()?;
            let mut multisignature_outputs: HashMap<u64, Vec<MultisignatureOutputUsage>> =
                HashMap::with_capacity(ms_amount_count);
            for _ in 0..ms_amount_count {
                let amount = decoder.read_varint()?;
                let entry_count = decoder.read_size()?;
                let mut entries = Vec::with_capacity(entry_count);
                for _ in 0..entry_count {
                    let block = decoder.read_u32_le()?;
                    let transaction = decoder.read_u16_le()?;
                    let output_index = decoder.read_u16_le()?;
                    let is_used = decoder.read_bool()?;
                    entries.push(MultisignatureOutputUsage {
                        transaction_index: TransactionIndex { block, transaction },
                        output_index,
                        is_used,
                    });
                }
                multisignature_outputs.insert(amount, entries);
            }

            self.block_index = block_index;
            self.transaction_map = transaction_map;
            self.spent_key_images = spent_key_images;
            self.outputs = outputs;
            self.multisignature_outputs = multisignature_outputs;
            Ok(())
        })();
        match result {
            Ok(()) => true,
            Err(err) => {
                log_warn!("blockchain cache unusable: {err}");
                false
            }
        }
    }

    /// Rebuilds every derived structure from the block sequence. Hashes
    /// are recomputed in parallel, insertion stays sequential.
    fn rebuild_cache(&mut self) {
        self.block_index.clear();
        self.transaction_map.clear();
        self.spent_key_images.clear();
        self.outputs.clear();
        self.multisignature_outputs.clear();

        let hashes: Vec<(Hash256, Vec<Hash256>)> = self
            .blocks
            .par_iter()
            .map(|entry| {
                let block_hash = entry.block.hash();
                let tx_hashes = entry.transactions.iter().map(|t| t.tx.hash()).collect();
                (block_hash, tx_hashes)
            })
            .collect();

        for (block_position, (block_hash, tx_hashes)) in hashes.iter().enumerate() {
            if block_position % 1000 == 0 {
                log_info!("rebuilding cache, height {} of {}", block_position, self.blocks.len());
            }
            self.block_index.push(*block_hash);
            let entry = &self.blocks[block_position];
            for (tx_position, tx_hash) in tx_hashes.iter().enumerate() {
                let index = TransactionIndex {
                    block: block_position as u32,
                    transaction: tx_position as u16,
                };
                self.transaction_map.insert(*tx_hash, index);
                let tx = &entry.transactions[tx_position].tx;

                for input in &tx.prefix.inputs {
                    match input {
                        TransactionInput::Key(key_input) => {
                            self.spent_key_images.insert(key_input.key_image);
                        }
                        TransactionInput::Multisignature(ms) => {
                            if let Some(outputs) = self.multisignature_outputs.get_mut(&ms.amount)
                            {
                                if let Some(usage) = outputs.get_mut(ms.output_index as usize) {
                                    usage.is_used = true;
                                }
                            }
                        }
                        TransactionInput::Base(_) => {}
                    }
                }

                for (out_index, output) in tx.prefix.outputs.iter().enumerate() {
                    match &output.target {
                        TransactionOutputTarget::Key(_) => {
                            self.outputs.entry(output.amount).or_default().push((index, out_index as u16));
                        }
                        TransactionOutputTarget::Multisignature(_) => {
                            self.multisignature_outputs.entry(output.amount).or_default().push(
                                MultisignatureOutputUsage {
                                    transaction_index: index,
                                    output_index: out_index as u16,
                                    is_used: false,
                                },
                            );
                        }
                    }
                }
            }
        }
        log_info!("internal structures rebuilt, height {}", self.blocks.len());
    }

    fn store_indices(&self) {
        let mut encoder = Encoder::new();
        encoder.write_u8(BLOCK_INDICES_VERSION);
        encoder.write_hash(&self.tail_id());
        self.payment_id_index.consensus_encode(&mut encoder);
        self.timestamp_index.consensus_encode(&mut encoder);
        self.generated_transactions_index.consensus_encode(&mut encoder);
        if let Err(err) = self
            .store
            .store(self.currency.blockchain_indices_file_name, &encoder.into_inner())
        {
            log_error!("failed to save blockchain indices: {err}");
        }
    }

    fn load_indices(&mut self, expected_tail: &Hash256) -> bool {
        let Some(bytes) = self.store.load(self.currency.blockchain_indices_file_name) else {
            return false;
        };
        let mut decoder = Decoder::new(&bytes);
        let result = (|| -> Result<(), DecodeError> {
            let version = decoder.read_u8()?;
            if version != BLOCK_INDICES_VERSION {
                return Err(DecodeError::InvalidData("unsupported indices version"));
            }
            let tail = decoder.read_hash()?;
            if tail != *expected_tail {
                return Err(DecodeError::InvalidData("stale blockchain indices"));
            }
            self.payment_id_index = PaymentIdIndex::consensus_decode(&mut decoder)?;
            self.timestamp_index = TimestampIndex::consensus_decode(&mut decoder)?;
            self.generated_transactions_index =
                GeneratedTransactionsIndex::consensus_decode(&mut decoder)?;
            Ok(())
        })();
        match result {
            Ok(()) => true,
            Err(err) => {
                log_warn!("blockchain indices unusable: {err}");
                false
            }
        }
    }

    fn rebuild_indices(&mut self) {
        self.payment_id_index.clear();
        self.timestamp_index.clear();
        self.generated_transactions_index.clear();

        for (height, entry) in self.blocks.iter().enumerate() {
            let block_hash = self
                .block_index
                .block_id(height as u32)
                .unwrap_or_else(|| entry.block.hash());
            self.timestamp_index.add(entry.block.header.timestamp, block_hash);
            self.generated_transactions_index
                .add(height as u32, entry.transactions.len() as u64);
        }
        // payment ids need the transactions themselves
        let payment_entries: Vec<&TransactionEntry> = self
            .blocks
            .iter()
            .flat_map(|entry| entry.transactions.iter())
            .collect();
        for entry in payment_entries {
            self.payment_id_index.add(&entry.tx);
        }
        log_info!("blockchain indices rebuilt, height {}", self.blocks.len());
    }
}

impl Encodable for TransactionEntry {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.tx.consensus_encode(encoder);
        encoder.write_varint(self.global_output_indexes.len() as u64);
        for index in &self.global_output_indexes {
            encoder.write_varint(*index as u64);
        }
    }
}

impl Decodable for TransactionEntry {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let tx = Transaction::consensus_decode(decoder)?;
        let count = decoder.read_size()?;
        let mut global_output_indexes = Vec::with_capacity(count);
        for _ in 0..count {
            let index = decoder.read_varint()?;
            global_output_indexes
                .push(u32::try_from(index).map_err(|_| DecodeError::InvalidData("global index"))?);
        }
        Ok(Self { tx, global_output_indexes })
    }
}

impl Encodable for BlockEntry {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.block.consensus_encode(encoder);
        encoder.write_u32_le(self.height);
        encoder.write_varint(self.block_cumulative_size as u64);
        encoder.write_varint(self.cumulative_difficulty);
        encoder.write_varint(self.already_generated_coins);
        encoder.write_varint(self.transactions.len() as u64);
        for entry in &self.transactions {
            entry.consensus_encode(encoder);
        }
    }
}

impl Decodable for BlockEntry {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let block = Block::consensus_decode(decoder)?;
        let height = decoder.read_u32_le()?;
        let block_cumulative_size = decoder.read_size()?;
        let cumulative_difficulty = decoder.read_varint()?;
        let already_generated_coins = decoder.read_varint()?;
        let count = decoder.read_size()?;
        let mut transactions = Vec::with_capacity(count);
        for _ in 0..count {
            transactions.push(TransactionEntry::consensus_decode(decoder)?);
        }
        Ok(Self {
            block,
            height,
            block_cumulative_size,
            cumulative_difficulty,
            already_generated_coins,
            transactions,
        })
    }
}
