//! The transaction memory pool.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use crossbeam_channel::{unbounded, Receiver, Sender};
use obol_chain::indices::{PaymentIdIndex, TimestampIndex};
use obol_chain::{BlockInfo, BlockTransactionPool, TransactionValidator, TxVerificationContext};
use obol_crypto::{to_hex, Hash256, KeyImage};
use obol_currency::{Currency, TimeProvider};
use obol_log::{log_error, log_info, log_trace};
use obol_primitives::{
    Decodable, DecodeError, Decoder, Encodable, Encoder, Transaction, TransactionInput,
};
use obol_storage::BlobStore;

use crate::priority::PriorityKey;
use crate::template::BlockTemplate;

const POOL_BLOB_VERSION: u8 = 1;
const EXPIRY_CHECK_INTERVAL: u64 = 60;

#[derive(Clone, Debug)]
pub struct TransactionDetails {
    pub id: Hash256,
    pub tx: Transaction,
    pub blob_size: usize,
    pub fee: u64,
    pub kept_by_block: bool,
    pub receive_time: u64,
    pub max_used_block: BlockInfo,
    pub last_failed_block: BlockInfo,
}

impl TransactionDetails {
    fn priority_key(&self) -> PriorityKey {
        PriorityKey {
            fee: self.fee,
            blob_size: self.blob_size,
            receive_time: self.receive_time,
            id: self.id,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolEvent {
    TransactionDeletedFromPool,
}

pub struct TxMemoryPool {
    currency: Currency,
    time: Arc<dyn TimeProvider>,
    store: Arc<dyn BlobStore>,
    validator: OnceLock<Weak<dyn TransactionValidator>>,
    inner: Mutex<PoolInner>,
}

struct PoolInner {
    transactions: HashMap<Hash256, TransactionDetails>,
    fee_index: BTreeSet<PriorityKey>,
    /// key image -> ids of pool transactions consuming it; more than one
    /// entry only for kept-by-block transactions.
    spent_key_images: HashMap<KeyImage, HashSet<Hash256>>,
    spent_outputs: BTreeSet<(u64, u32)>,
    recently_deleted: HashMap<Hash256, u64>,
    payment_id_index: PaymentIdIndex,
    timestamp_index: TimestampIndex,
    last_expiry_check: u64,
    senders: Vec<Sender<PoolEvent>>,
}

impl TxMemoryPool {
    pub fn new(currency: Currency, store: Arc<dyn BlobStore>, time: Arc<dyn TimeProvider>) -> Self {
        Self {
            currency,
            time,
            store,
            validator: OnceLock::new(),
            inner: Mutex::new(PoolInner {
                transactions: HashMap::new(),
                fee_index: BTreeSet::new(),
                spent_key_images: HashMap::new(),
                spent_outputs: BTreeSet::new(),
                recently_deleted: HashMap::new(),
                payment_id_index: PaymentIdIndex::default(),
                timestamp_index: TimestampIndex::default(),
                last_expiry_check: 0,
                senders: Vec::new(),
            }),
        }
    }

    /// Wires the ring-signature arbiter. Must be called before
    /// transactions are offered.
    pub fn set_validator(&self, validator: Weak<dyn TransactionValidator>) {
        let _ = self.validator.set(validator);
    }

    fn validator(&self) -> Option<Arc<dyn TransactionValidator>> {
        self.validator.get().and_then(Weak::upgrade)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe_events(&self) -> Receiver<PoolEvent> {
        let (sender, receiver) = unbounded();
        self.lock().senders.push(sender);
        receiver
    }

    pub fn init(&self) {
        if !self.load() {
            log_error!("failed to load memory pool from {}", self.currency.tx_pool_file_name);
        }
        self.remove_expired_transactions();
    }

    pub fn deinit(&self) {
        if !self.save() {
            log_info!("failed to serialize memory pool to {}", self.currency.tx_pool_file_name);
        }
    }

    pub fn have_transaction(&self, id: &Hash256) -> bool {
        self.lock().transactions.contains_key(id)
    }

    pub fn transactions_count(&self) -> usize {
        self.lock().transactions.len()
    }

    pub fn get_transactions(&self) -> Vec<Transaction> {
        self.lock().transactions.values().map(|record| record.tx.clone()).collect()
    }

    pub fn get_transaction(&self, id: &Hash256) -> Option<Transaction> {
        self.lock().transactions.get(id).map(|record| record.tx.clone())
    }

    pub fn get_transactions_by_ids(&self, ids: &[Hash256]) -> (Vec<Transaction>, Vec<Hash256>) {
        let inner = self.lock();
        let mut found = Vec::new();
        let mut missed = Vec::new();
        for id in ids {
            match inner.transactions.get(id) {
                Some(record) => found.push(record.tx.clone()),
                None => missed.push(*id),
            }
        }
        (found, missed)
    }

    pub fn get_transaction_ids_by_payment_id(&self, payment_id: &Hash256) -> Vec<Hash256> {
        self.lock().payment_id_index.find(payment_id)
    }

    pub fn get_transaction_ids_by_timestamp(
        &self,
        begin: u64,
        end: u64,
        limit: usize,
    ) -> (Vec<Hash256>, u64) {
        self.lock().timestamp_index.find(begin, end, limit)
    }

    pub fn add_transaction(
        &self,
        tx: Transaction,
        ctx: &mut TxVerificationContext,
        kept_by_block: bool,
    ) -> bool {
        let id = tx.hash();
        let blob_size = tx.blob_size();
        self.add_transaction_with_id(tx, id, blob_size, ctx, kept_by_block)
    }

    pub fn add_transaction_with_id(
        &self,
        tx: Transaction,
        id: Hash256,
        blob_size: usize,
        ctx: &mut TxVerificationContext,
        kept_by_block: bool,
    ) -> bool {
        if !check_input_types_supported(&tx) {
            ctx.verification_failed = true;
            return false;
        }

        let Some(inputs_amount) = checked_inputs_amount(&tx) else {
            ctx.verification_failed = true;
            return false;
        };
        let Some(outputs_amount) = tx.checked_output_amount() else {
            ctx.verification_failed = true;
            return false;
        };
        if outputs_amount > inputs_amount {
            log_info!(
                "transaction uses more money than it has: spends {}, holds {}",
                self.currency.format_amount(outputs_amount),
                self.currency.format_amount(inputs_amount)
            );
            ctx.verification_failed = true;
            return false;
        }

        let fee = inputs_amount - outputs_amount;
        let is_fusion = fee == 0 && self.currency.is_fusion_transaction(&tx, blob_size);
        if !kept_by_block && !is_fusion && fee < self.currency.minimum_fee {
            log_info!(
                "transaction fee is not enough: {}, minimum fee: {}",
                self.currency.format_amount(fee),
                self.currency.format_amount(self.currency.minimum_fee)
            );
            ctx.verification_failed = true;
            ctx.tx_fee_too_small = true;
            return false;
        }

        if !kept_by_block {
            let inner = self.lock();
            if inner.have_spent_inputs(&tx) {
                log_info!("transaction {} uses already spent inputs", to_hex(&id));
                ctx.verification_failed = true;
                return false;
            }
        }

        // ring-signature arbitration happens without the pool lock held
        let mut max_used_block = BlockInfo::default();
        let inputs_valid = match self.validator() {
            Some(validator) => validator.check_transaction_inputs(&tx, &mut max_used_block),
            None => {
                log_error!("no transaction validator attached to the pool");
                false
            }
        };

        if !inputs_valid {
            if !kept_by_block {
                log_info!("transaction {} used wrong inputs, rejected", to_hex(&id));
                ctx.verification_failed = true;
                return false;
            }
            max_used_block.clear();
            ctx.verification_impossible = true;
        }

        if !kept_by_block {
            let size_valid = match self.validator() {
                Some(validator) => validator.check_transaction_size(blob_size),
                None => false,
            };
            if !size_valid {
                log_info!("transaction {} is too big, rejected", to_hex(&id));
                ctx.verification_failed = true;
                return false;
            }
        }

        let mut inner = self.lock();

        if !kept_by_block && inner.recently_deleted.contains_key(&id) {
            log_info!("ignoring recently deleted transaction {}", to_hex(&id));
            ctx.verification_failed = false;
            ctx.should_be_relayed = false;
            ctx.added_to_pool = false;
            return true;
        }

        if inner.transactions.contains_key(&id) {
            log_error!("transaction already exists at inserting in memory pool");
            return false;
        }

        let record = TransactionDetails {
            id,
            tx,
            blob_size,
            fee,
            kept_by_block,
            receive_time: self.time.now(),
            max_used_block,
            last_failed_block: BlockInfo::default(),
        };
        inner.insert_record(record);

        ctx.added_to_pool = true;
        ctx.should_be_relayed = inputs_valid && (fee > 0 || is_fusion);
        ctx.verification_failed = true;

        let tx_ref = inner.transactions[&id].tx.clone();
        if !inner.add_transaction_inputs(&id, &tx_ref, kept_by_block) {
            return false;
        }

        ctx.verification_failed = false;
        true
    }

    /// Atomically removes a transaction for inclusion in a block being
    /// assembled, releasing its reservations.
    pub fn take_transaction(&self, id: &Hash256) -> Option<(Transaction, usize, u64)> {
        let mut inner = self.lock();
        let record = inner.remove_record(id)?;
        Some((record.tx, record.blob_size, record.fee))
    }

    /// Ready-to-mine pool ids versus a known set: `(new, deleted)`.
    pub fn get_difference(&self, known_ids: &[Hash256]) -> (Vec<Hash256>, Vec<Hash256>) {
        let snapshot: Vec<TransactionDetails> =
            self.lock().transactions.values().cloned().collect();
        let validator = self.validator();

        let mut ready: HashSet<Hash256> = HashSet::new();
        for mut record in snapshot {
            if self.is_transaction_ready(validator.as_deref(), &mut record) {
                ready.insert(record.id);
            }
        }

        let mut known: HashSet<Hash256> = known_ids.iter().copied().collect();
        ready.retain(|id| !known.remove(id));

        (ready.into_iter().collect(), known.into_iter().collect())
    }

    /// Two-pass template fill: zero-fee fusion transactions first inside
    /// their own budget, then everything by descending fee density.
    pub fn fill_block_template(
        &self,
        median_size: usize,
        max_cumulative_size: usize,
        _already_generated_coins: u64,
    ) -> (Vec<Hash256>, usize, u64) {
        let ordered: Vec<TransactionDetails> = {
            let inner = self.lock();
            inner
                .fee_index
                .iter()
                .filter_map(|key| inner.transactions.get(&key.id).cloned())
                .collect()
        };
        let validator = self.validator();

        let mut total_size = 0usize;
        let mut total_fee = 0u64;
        let max_total_size = (2 * median_size)
            .saturating_sub(self.currency.miner_tx_blob_reserved_size)
            .min(max_cumulative_size);

        let mut template = BlockTemplate::new();
        let mut check_updates: HashMap<Hash256, (BlockInfo, BlockInfo)> = HashMap::new();

        for record in ordered.iter().rev() {
            if record.fee != 0 {
                break;
            }
            if self.currency.fusion_tx_max_size < total_size + record.blob_size {
                continue;
            }
            let mut candidate = record.clone();
            if self.is_transaction_ready(validator.as_deref(), &mut candidate)
                && template.add_transaction(&candidate.id, &candidate.tx)
            {
                total_size += candidate.blob_size;
            }
        }

        for record in &ordered {
            let block_size_limit = if record.fee == 0 { median_size } else { max_total_size };
            if block_size_limit < total_size + record.blob_size {
                continue;
            }
            let mut candidate = record.clone();
            let ready = self.is_transaction_ready(validator.as_deref(), &mut candidate);
            check_updates
                .insert(candidate.id, (candidate.max_used_block, candidate.last_failed_block));
            if ready && template.add_transaction(&candidate.id, &candidate.tx) {
                total_size += candidate.blob_size;
                total_fee += candidate.fee;
            }
        }

        {
            let mut inner = self.lock();
            for (id, (max_used, last_failed)) in check_updates {
                if let Some(record) = inner.transactions.get_mut(&id) {
                    record.max_used_block = max_used;
                    record.last_failed_block = last_failed;
                }
            }
        }

        (template.into_transactions(), total_size, total_fee)
    }

    pub fn on_blockchain_inc(&self, _new_height: u64, _top_block_id: &Hash256) {}

    pub fn on_blockchain_dec(&self, _new_height: u64, _top_block_id: &Hash256) {}

    /// Periodic maintenance; runs the expiry sweep at most once per
    /// check interval.
    pub fn on_idle(&self) {
        let now = self.time.now();
        {
            let mut inner = self.lock();
            if now < inner.last_expiry_check + EXPIRY_CHECK_INTERVAL {
                return;
            }
            inner.last_expiry_check = now;
        }
        self.remove_expired_transactions();
    }

    /// Evicts transactions older than their live time and prunes the
    /// recently-deleted memory.
    pub fn remove_expired_transactions(&self) {
        let mut removed_something = false;
        {
            let mut inner = self.lock();
            let now = self.time.now();

            let forget_after = self.currency.number_of_periods_to_forget_tx_deleted_from_pool
                * self.currency.mempool_tx_live_time;
            inner
                .recently_deleted
                .retain(|_, deleted_at| now.saturating_sub(*deleted_at) <= forget_after);

            let expired: Vec<Hash256> = inner
                .transactions
                .values()
                .filter(|record| {
                    let age = now.saturating_sub(record.receive_time);
                    let live_time = if record.kept_by_block {
                        self.currency.mempool_tx_from_alt_block_live_time
                    } else {
                        self.currency.mempool_tx_live_time
                    };
                    age > live_time
                })
                .map(|record| record.id)
                .collect();

            for id in expired {
                log_trace!("transaction {} removed from pool as outdated", to_hex(&id));
                inner.remove_record(&id);
                inner.recently_deleted.insert(id, now);
                removed_something = true;
            }
        }

        if removed_something {
            self.notify(PoolEvent::TransactionDeletedFromPool);
        }
    }

    fn notify(&self, event: PoolEvent) {
        let mut inner = self.lock();
        inner.senders.retain(|sender| sender.send(event).is_ok());
    }

    fn is_transaction_ready(
        &self,
        validator: Option<&dyn TransactionValidator>,
        record: &mut TransactionDetails,
    ) -> bool {
        let Some(validator) = validator else {
            return false;
        };
        if !validator.check_transaction_inputs_cached(
            &record.tx,
            &mut record.max_used_block,
            &mut record.last_failed_block,
        ) {
            return false;
        }
        // the inputs may have become spent in the chain since the memo
        if validator.have_spent_key_images(&record.tx) {
            return false;
        }
        true
    }

    // ---- persistence ---------------------------------------------------

    fn save(&self) -> bool {
        let inner = self.lock();
        let mut encoder = Encoder::new();
        encoder.write_u8(POOL_BLOB_VERSION);

        let mut ids: Vec<&Hash256> = inner.transactions.keys().collect();
        ids.sort_unstable();
        encoder.write_varint(ids.len() as u64);
        for id in ids {
            inner.transactions[id].consensus_encode(&mut encoder);
        }

        let mut images: Vec<&KeyImage> = inner.spent_key_images.keys().collect();
        images.sort_unstable_by_key(|image| *image.as_bytes());
        encoder.write_varint(images.len() as u64);
        for image in images {
            encoder.write_key_image(image);
            let mut owners: Vec<&Hash256> = inner.spent_key_images[image].iter().collect();
            owners.sort_unstable();
            encoder.write_varint(owners.len() as u64);
            for owner in owners {
                encoder.write_hash(owner);
            }
        }

        encoder.write_varint(inner.spent_outputs.len() as u64);
        for (amount, index) in &inner.spent_outputs {
            encoder.write_varint(*amount);
            encoder.write_u32_le(*index);
        }

        let mut deleted: Vec<(&Hash256, &u64)> = inner.recently_deleted.iter().collect();
        deleted.sort_unstable_by_key(|(id, _)| **id);
        encoder.write_varint(deleted.len() as u64);
        for (id, when) in deleted {
            encoder.write_hash(id);
            encoder.write_varint(*when);
        }

        self.store
            .store(self.currency.tx_pool_file_name, &encoder.into_inner())
            .is_ok()
    }

    fn load(&self) -> bool {
        let Some(bytes) = self.store.load(self.currency.tx_pool_file_name) else {
            return true;
        };
        let mut inner = self.lock();
        let mut decoder = Decoder::new(&bytes);
        let result = (|| -> Result<(), DecodeError> {
            let version = decoder.read_u8()?;
            if version != POOL_BLOB_VERSION {
                return Err(DecodeError::InvalidData("unsupported pool blob version"));
            }

            let record_count = decoder.read_size()?;
            let mut transactions = HashMap::with_capacity(record_count);
            for _ in 0..record_count {
                let record = TransactionDetails::consensus_decode(&mut decoder)?;
                transactions.insert(record.id, record);
            }

            let image_count = decoder.read_size()?;
            let mut spent_key_images = HashMap::with_capacity(image_count);
            for _ in 0..image_count {
                let image = decoder.read_key_image()?;
                let owner_count = decoder.read_size()?;
                let mut owners = HashSet::with_capacity(owner_count);
                for _ in 0..owner_count {
                    owners.insert(decoder.read_hash()?);
                }
                spent_key_images.insert(image, owners);
            }

            let output_count = decoder.read_size()?;
            let mut spent_outputs = BTreeSet::new();
            for _ in 0..output_count {
                let amount = decoder.read_varint()?;
                let index = decoder.read_u32_le()?;
                spent_outputs.insert((amount, index));
            }

            let deleted_count = decoder.read_size()?;
            let mut recently_deleted = HashMap::with_capacity(deleted_count);
            for _ in 0..deleted_count {
                let id = decoder.read_hash()?;
                let when = decoder.read_varint()?;
                recently_deleted.insert(id, when);
            }

            inner.transactions = transactions;
            inner.spent_key_images = spent_key_images;
            inner.spent_outputs = spent_outputs;
            inner.recently_deleted = recently_deleted;
            Ok(())
        })();

        match result {
            Ok(()) => {
                inner.rebuild_indices();
                true
            }
            Err(err) => {
                // a stale or foreign pool blob means a cold start
                log_info!("discarding memory pool state: {err}");
                inner.transactions.clear();
                inner.spent_key_images.clear();
                inner.spent_outputs.clear();
                inner.recently_deleted.clear();
                inner.rebuild_indices();
                true
            }
        }
    }
}

impl BlockTransactionPool for TxMemoryPool {
    fn take_for_block(&self, id: &Hash256) -> Option<(Transaction, usize, u64)> {
        self.take_transaction(id)
    }

    fn return_from_block(&self, tx: Transaction) -> bool {
        let id = tx.hash();
        let blob_size = tx.blob_size();
        let mut inner = self.lock();
        if inner.transactions.contains_key(&id) {
            return true;
        }
        // no inline validation here: the chain is mid-reorg, so the memo
        // is cleared and the inputs get re-checked lazily
        let fee = checked_inputs_amount(&tx)
            .unwrap_or(0)
            .saturating_sub(tx.output_amount());
        let record = TransactionDetails {
            id,
            tx,
            blob_size,
            fee,
            kept_by_block: true,
            receive_time: self.time.now(),
            max_used_block: BlockInfo::default(),
            last_failed_block: BlockInfo::default(),
        };
        inner.insert_record(record);
        let tx_ref = inner.transactions[&id].tx.clone();
        inner.add_transaction_inputs(&id, &tx_ref, true)
    }

    fn get_transaction(&self, id: &Hash256) -> Option<Transaction> {
        TxMemoryPool::get_transaction(self, id)
    }
}

impl PoolInner {
    fn insert_record(&mut self, record: TransactionDetails) {
        self.payment_id_index.add(&record.tx);
        self.timestamp_index.add(record.receive_time, record.id);
        self.fee_index.insert(record.priority_key());
        self.transactions.insert(record.id, record);
    }

    fn remove_record(&mut self, id: &Hash256) -> Option<TransactionDetails> {
        let record = self.transactions.remove(id)?;
        self.remove_transaction_inputs(id, &record.tx, record.kept_by_block);
        self.payment_id_index.remove(&record.tx);
        self.timestamp_index.remove(record.receive_time, id);
        self.fee_index.remove(&record.priority_key());
        Some(record)
    }

    fn have_spent_inputs(&self, tx: &Transaction) -> bool {
        tx.prefix.inputs.iter().any(|input| match input {
            TransactionInput::Key(key_input) => {
                self.spent_key_images.contains_key(&key_input.key_image)
            }
            TransactionInput::Multisignature(ms) => {
                self.spent_outputs.contains(&(ms.amount, ms.output_index))
            }
            TransactionInput::Base(_) => false,
        })
    }

    fn add_transaction_inputs(&mut self, id: &Hash256, tx: &Transaction, kept_by_block: bool) -> bool {
        for input in &tx.prefix.inputs {
            match input {
                TransactionInput::Key(key_input) => {
                    let owners = self.spent_key_images.entry(key_input.key_image).or_default();
                    if !kept_by_block && !owners.is_empty() {
                        log_error!(
                            "internal error: key image {} already reserved in the pool",
                            to_hex(key_input.key_image.as_bytes())
                        );
                        return false;
                    }
                    if !owners.insert(*id) {
                        log_error!("internal error: duplicate pool reservation for one transaction");
                        return false;
                    }
                }
                TransactionInput::Multisignature(ms) => {
                    if !kept_by_block && !self.spent_outputs.insert((ms.amount, ms.output_index)) {
                        log_error!("internal error: multisignature output already reserved");
                        return false;
                    }
                }
                TransactionInput::Base(_) => {}
            }
        }
        true
    }

    fn remove_transaction_inputs(
        &mut self,
        id: &Hash256,
        tx: &Transaction,
        kept_by_block: bool,
    ) -> bool {
        for input in &tx.prefix.inputs {
            match input {
                TransactionInput::Key(key_input) => {
                    let Some(owners) = self.spent_key_images.get_mut(&key_input.key_image) else {
                        log_error!(
                            "failed to find key image reservation for transaction {}",
                            to_hex(id)
                        );
                        return false;
                    };
                    if !owners.remove(id) {
                        log_error!("transaction id not found in key image reservation");
                        return false;
                    }
                    if owners.is_empty() {
                        self.spent_key_images.remove(&key_input.key_image);
                    }
                }
                TransactionInput::Multisignature(ms) => {
                    if !kept_by_block {
                        self.spent_outputs.remove(&(ms.amount, ms.output_index));
                    }
                }
                TransactionInput::Base(_) => {}
            }
        }
        true
    }

    fn rebuild_indices(&mut self) {
        self.payment_id_index.clear();
        self.timestamp_index.clear();
        self.fee_index.clear();
        let records: Vec<(Hash256, u64, PriorityKey)> = self
            .transactions
            .values()
            .map(|record| (record.id, record.receive_time, record.priority_key()))
            .collect();
        for (id, receive_time, key) in records {
            let tx = self.transactions[&id].tx.clone();
            self.payment_id_index.add(&tx);
            self.timestamp_index.add(receive_time, id);
            self.fee_index.insert(key);
        }
    }
}

fn check_input_types_supported(tx: &Transaction) -> bool {
    tx.prefix
        .inputs
        .iter()
        .all(|input| matches!(input, TransactionInput::Key(_) | TransactionInput::Multisignature(_)))
}

fn checked_inputs_amount(tx: &Transaction) -> Option<u64> {
    let mut total: u64 = 0;
    for input in &tx.prefix.inputs {
        total = total.checked_add(input.amount())?;
    }
    Some(total)
}

impl Encodable for TransactionDetails {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_hash(&self.id);
        self.tx.consensus_encode(encoder);
        encoder.write_varint(self.blob_size as u64);
        encoder.write_varint(self.fee);
        encoder.write_bool(self.kept_by_block);
        encoder.write_varint(self.receive_time);
        encoder.write_u32_le(self.max_used_block.height);
        encoder.write_hash(&self.max_used_block.id);
        encoder.write_u32_le(self.last_failed_block.height);
        encoder.write_hash(&self.last_failed_block.id);
    }
}

impl Decodable for TransactionDetails {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let id = decoder.read_hash()?;
        let tx = Transaction::consensus_decode(decoder)?;
        let blob_size = decoder.read_size()?;
        let fee = decoder.read_varint()?;
        let kept_by_block = decoder.read_bool()?;
        let receive_time = decoder.read_varint()?;
        let max_used_block = BlockInfo {
            height: decoder.read_u32_le()?,
            id: decoder.read_hash()?,
        };
        let last_failed_block = BlockInfo {
            height: decoder.read_u32_le()?,
            id: decoder.read_hash()?,
        };
        Ok(Self {
            id,
            tx,
            blob_size,
            fee,
            kept_by_block,
            receive_time,
            max_used_block,
            last_failed_block,
        })
    }
}
