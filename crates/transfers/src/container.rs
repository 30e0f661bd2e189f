//! Per-account output ledger: unconfirmed, available, and spent
//! transfers with confirmation, spend, and rollback transitions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use obol_crypto::{to_hex, Hash256};
use obol_currency::constants::MAX_BLOCK_NUMBER;
use obol_currency::{Currency, TimeProvider};
use obol_log::{log_debug, log_error, log_warn};
use obol_primitives::{
    Decodable, DecodeError, Decoder, Encodable, Encoder, Transaction, TransactionInput,
};
use smallvec::SmallVec;

use crate::types::{
    flags, OutputData, SpentOutputDescriptor, SpentTransferRecord, TransactionBlockInfo,
    TransactionInformation, TransactionOutputInformation, TransferRecord,
    UNCONFIRMED_GLOBAL_OUTPUT_INDEX, UNCONFIRMED_HEIGHT,
};

const CONTAINER_BLOB_VERSION: u8 = 1;

type IdBucket = SmallVec<[u64; 1]>;

/// Arena of transfer records with descriptor and containing-transaction
/// lookups. Descriptors are not unique here; duplicates carry the
/// `visible` flag resolution.
#[derive(Default)]
struct IndexedTransfers {
    records: HashMap<u64, TransferRecord>,
    next_id: u64,
    by_descriptor: HashMap<SpentOutputDescriptor, IdBucket>,
    by_transaction: HashMap<Hash256, IdBucket>,
}

impl IndexedTransfers {
    fn insert(&mut self, record: TransferRecord) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.by_descriptor.entry(record.output.descriptor()).or_default().push(id);
        self.by_transaction
            .entry(record.output.transaction_hash)
            .or_default()
            .push(id);
        self.records.insert(id, record);
        id
    }

    fn remove(&mut self, id: u64) -> Option<TransferRecord> {
        let record = self.records.remove(&id)?;
        prune(&mut self.by_descriptor, &record.output.descriptor(), id);
        prune(&mut self.by_transaction, &record.output.transaction_hash, id);
        Some(record)
    }

    fn get(&self, id: u64) -> Option<&TransferRecord> {
        self.records.get(&id)
    }

    fn get_mut(&mut self, id: u64) -> Option<&mut TransferRecord> {
        self.records.get_mut(&id)
    }

    fn ids_by_descriptor(&self, descriptor: &SpentOutputDescriptor) -> IdBucket {
        self.by_descriptor.get(descriptor).cloned().unwrap_or_default()
    }

    fn ids_by_transaction(&self, hash: &Hash256) -> IdBucket {
        self.by_transaction.get(hash).cloned().unwrap_or_default()
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn iter(&self) -> impl Iterator<Item = &TransferRecord> {
        self.records.values()
    }
}

#[derive(Default)]
struct SpentTransfers {
    records: HashMap<u64, SpentTransferRecord>,
    next_id: u64,
    by_descriptor: HashMap<SpentOutputDescriptor, IdBucket>,
    by_transaction: HashMap<Hash256, IdBucket>,
    by_spending_transaction: HashMap<Hash256, IdBucket>,
}

impl SpentTransfers {
    fn insert(&mut self, record: SpentTransferRecord) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.by_descriptor
            .entry(record.record.output.descriptor())
            .or_default()
            .push(id);
        self.by_transaction
            .entry(record.record.output.transaction_hash)
            .or_default()
            .push(id);
        self.by_spending_transaction
            .entry(record.spending_transaction_hash)
            .or_default()
            .push(id);
        self.records.insert(id, record);
        id
    }

    fn remove(&mut self, id: u64) -> Option<SpentTransferRecord> {
        let record = self.records.remove(&id)?;
        prune(&mut self.by_descriptor, &record.record.output.descriptor(), id);
        prune(&mut self.by_transaction, &record.record.output.transaction_hash, id);
        prune(
            &mut self.by_spending_transaction,
            &record.spending_transaction_hash,
            id,
        );
        Some(record)
    }

    fn get_mut(&mut self, id: u64) -> Option<&mut SpentTransferRecord> {
        self.records.get_mut(&id)
    }

    fn ids_by_descriptor(&self, descriptor: &SpentOutputDescriptor) -> IdBucket {
        self.by_descriptor.get(descriptor).cloned().unwrap_or_default()
    }

    fn ids_by_transaction(&self, hash: &Hash256) -> IdBucket {
        self.by_transaction.get(hash).cloned().unwrap_or_default()
    }

    fn ids_by_spending_transaction(&self, hash: &Hash256) -> IdBucket {
        self.by_spending_transaction.get(hash).cloned().unwrap_or_default()
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn iter(&self) -> impl Iterator<Item = &SpentTransferRecord> {
        self.records.values()
    }
}

fn prune<K: std::hash::Hash + Eq>(map: &mut HashMap<K, IdBucket>, key: &K, id: u64) {
    if let Some(bucket) = map.get_mut(key) {
        bucket.retain(|candidate| *candidate != id);
        if bucket.is_empty() {
            map.remove(key);
        }
    }
}

struct ContainerInner {
    transactions: HashMap<Hash256, TransactionInformation>,
    unconfirmed: IndexedTransfers,
    available: IndexedTransfers,
    spent: SpentTransfers,
    current_height: u32,
}

pub struct TransfersContainer {
    currency: Currency,
    spendable_age: u32,
    time: Arc<dyn TimeProvider>,
    inner: Mutex<ContainerInner>,
}

impl TransfersContainer {
    pub fn new(currency: Currency, spendable_age: u32, time: Arc<dyn TimeProvider>) -> Self {
        Self {
            currency,
            spendable_age,
            time,
            inner: Mutex::new(ContainerInner {
                transactions: HashMap::new(),
                unconfirmed: IndexedTransfers::default(),
                available: IndexedTransfers::default(),
                spent: SpentTransfers::default(),
                current_height: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ContainerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records a transaction: inserts newly owned outputs and marks any
    /// previously owned outputs its inputs consume as spent. Returns
    /// whether the container changed.
    pub fn add_transaction(
        &self,
        block: &TransactionBlockInfo,
        tx: &Transaction,
        transfers: &[TransactionOutputInformation],
    ) -> bool {
        let tx_hash = tx.hash();
        let mut inner = self.lock();

        if inner.transactions.contains_key(&tx_hash) {
            log_error!("transaction {} is already in the container", to_hex(&tx_hash));
            return false;
        }

        let added_outputs = inner.add_transaction_outputs(block, transfers);
        let added_inputs = inner.add_transaction_inputs(block, tx, &tx_hash);
        let added = added_outputs || added_inputs;

        if added {
            inner.transactions.insert(
                tx_hash,
                TransactionInformation {
                    transaction_hash: tx_hash,
                    public_key: tx.public_key().unwrap_or_default(),
                    block_height: block.height,
                    timestamp: block.timestamp,
                    unlock_time: tx.prefix.unlock_time,
                    total_amount_in: tx.input_amount(),
                    total_amount_out: tx.output_amount(),
                    extra: tx.prefix.extra.clone(),
                    payment_id: tx.payment_id(),
                },
            );
        }

        added
    }

    /// Confirms a previously unconfirmed transaction: assigns real
    /// global indices and moves its outputs into the available set.
    pub fn mark_transaction_confirmed(
        &self,
        block: &TransactionBlockInfo,
        tx_hash: &Hash256,
        global_indices: &[u32],
    ) -> bool {
        if !block.is_confirmed() {
            return false;
        }
        let mut inner = self.lock();

        let Some(info) = inner.transactions.get_mut(tx_hash) else {
            return false;
        };
        if info.block_height != UNCONFIRMED_HEIGHT {
            return false;
        }
        info.block_height = block.height;
        info.timestamp = block.timestamp;

        for id in inner.unconfirmed.ids_by_transaction(tx_hash) {
            let Some(mut record) = inner.unconfirmed.remove(id) else {
                continue;
            };
            let output_position = record.output.output_in_transaction as usize;
            match global_indices.get(output_position) {
                Some(global_index) => record.output.global_output_index = *global_index,
                None => {
                    log_error!(
                        "no global index for output {output_position} of {}",
                        to_hex(tx_hash)
                    );
                    continue;
                }
            }
            record.block_height = block.height;
            record.transaction_index = block.transaction_index;
            let descriptor = record.output.descriptor();
            inner.available.insert(record);
            inner.update_visibility(&descriptor);
        }

        // spends performed while this transaction sat in the pool now
        // carry a real spending block
        for id in inner.spent.ids_by_spending_transaction(tx_hash) {
            if let Some(spent) = inner.spent.get_mut(id) {
                spent.spending_block = *block;
            }
        }

        true
    }

    /// Reverses an unconfirmed transaction: drops its outputs and
    /// returns anything it had marked spent to available.
    pub fn delete_unconfirmed_transaction(&self, tx_hash: &Hash256) -> bool {
        let mut inner = self.lock();
        match inner.transactions.get(tx_hash) {
            Some(info) if info.block_height == UNCONFIRMED_HEIGHT => {}
            _ => return false,
        }
        inner.delete_transaction_transfers(tx_hash);
        inner.transactions.remove(tx_hash);
        true
    }

    /// Rollback for a reorg: removes every transaction at or above
    /// `height` and returns their hashes.
    pub fn detach(&self, height: u32) -> Vec<Hash256> {
        let mut inner = self.lock();

        let mut doomed: Vec<(u32, Hash256)> = inner
            .transactions
            .values()
            .filter(|info| info.block_height != UNCONFIRMED_HEIGHT && info.block_height >= height)
            .map(|info| (info.block_height, info.transaction_hash))
            .collect();
        // undo newest first so spends are released before their sources
        doomed.sort_unstable_by(|a, b| b.cmp(a));

        let mut removed = Vec::with_capacity(doomed.len());
        for (_, tx_hash) in doomed {
            inner.delete_transaction_transfers(&tx_hash);
            inner.transactions.remove(&tx_hash);
            removed.push(tx_hash);
        }

        if inner.current_height > height {
            inner.current_height = height;
        }
        removed
    }

    pub fn advance_height(&self, height: u32) -> bool {
        let mut inner = self.lock();
        if inner.current_height <= height {
            inner.current_height = height;
            return true;
        }
        false
    }

    pub fn current_height(&self) -> u32 {
        self.lock().current_height
    }

    pub fn transfers_count(&self) -> usize {
        let inner = self.lock();
        inner.unconfirmed.len() + inner.available.len() + inner.spent.len()
    }

    pub fn transactions_count(&self) -> usize {
        self.lock().transactions.len()
    }

    pub fn balance(&self, include_flags: u32) -> u64 {
        let inner = self.lock();
        let mut amount = 0u64;

        for record in inner.available.iter().filter(|r| r.visible) {
            if self.is_included(record, self.available_state(&inner, record), include_flags) {
                amount += record.output.amount;
            }
        }

        if include_flags & flags::INCLUDE_STATE_LOCKED != 0 {
            for record in inner.unconfirmed.iter().filter(|r| r.visible) {
                if type_matches(&record.output, include_flags) {
                    amount += record.output.amount;
                }
            }
        }

        if include_flags & flags::INCLUDE_STATE_SPENT != 0 {
            for spent in inner.spent.iter() {
                if type_matches(&spent.record.output, include_flags) {
                    amount += spent.record.output.amount;
                }
            }
        }

        amount
    }

    pub fn get_outputs(&self, include_flags: u32) -> Vec<TransactionOutputInformation> {
        let inner = self.lock();
        let mut outputs = Vec::new();

        for record in inner.available.iter().filter(|r| r.visible) {
            if self.is_included(record, self.available_state(&inner, record), include_flags) {
                outputs.push(record.output);
            }
        }
        if include_flags & flags::INCLUDE_STATE_LOCKED != 0 {
            for record in inner.unconfirmed.iter().filter(|r| r.visible) {
                if type_matches(&record.output, include_flags) {
                    outputs.push(record.output);
                }
            }
        }
        if include_flags & flags::INCLUDE_STATE_SPENT != 0 {
            for spent in inner.spent.iter() {
                if type_matches(&spent.record.output, include_flags) {
                    outputs.push(spent.record.output);
                }
            }
        }
        outputs
    }

    pub fn get_transaction_information(
        &self,
        tx_hash: &Hash256,
    ) -> Option<TransactionInformation> {
        self.lock().transactions.get(tx_hash).cloned()
    }

    pub fn get_transaction_outputs(
        &self,
        tx_hash: &Hash256,
        include_flags: u32,
    ) -> Vec<TransactionOutputInformation> {
        let inner = self.lock();
        let mut outputs = Vec::new();

        for id in inner.available.ids_by_transaction(tx_hash) {
            if let Some(record) = inner.available.get(id) {
                if record.visible
                    && self.is_included(record, self.available_state(&inner, record), include_flags)
                {
                    outputs.push(record.output);
                }
            }
        }
        if include_flags & flags::INCLUDE_STATE_LOCKED != 0 {
            for id in inner.unconfirmed.ids_by_transaction(tx_hash) {
                if let Some(record) = inner.unconfirmed.get(id) {
                    if record.visible && type_matches(&record.output, include_flags) {
                        outputs.push(record.output);
                    }
                }
            }
        }
        if include_flags & flags::INCLUDE_STATE_SPENT != 0 {
            for id in inner.spent.ids_by_transaction(tx_hash) {
                if let Some(spent) = inner.spent.records.get(&id) {
                    if type_matches(&spent.record.output, include_flags) {
                        outputs.push(spent.record.output);
                    }
                }
            }
        }
        outputs
    }

    /// Outputs consumed by `tx_hash`; only type flags apply.
    pub fn get_transaction_inputs(
        &self,
        tx_hash: &Hash256,
        include_flags: u32,
    ) -> Vec<TransactionOutputInformation> {
        let inner = self.lock();
        inner
            .spent
            .ids_by_spending_transaction(tx_hash)
            .into_iter()
            .filter_map(|id| inner.spent.records.get(&id))
            .filter(|spent| type_matches(&spent.record.output, include_flags))
            .map(|spent| spent.record.output)
            .collect()
    }

    pub fn get_unconfirmed_transactions(&self) -> Vec<Hash256> {
        let inner = self.lock();
        inner
            .transactions
            .values()
            .filter(|info| info.block_height == UNCONFIRMED_HEIGHT)
            .map(|info| info.transaction_hash)
            .collect()
    }

    pub fn get_spent_outputs(&self) -> Vec<SpentTransferRecord> {
        self.lock().spent.iter().cloned().collect()
    }

    // ---- state helpers -------------------------------------------------

    fn is_spend_time_unlocked(&self, unlock_time: u64, current_height: u32) -> bool {
        if unlock_time < MAX_BLOCK_NUMBER {
            current_height as u64 + self.currency.locked_tx_allowed_delta_blocks as u64
                >= unlock_time
        } else {
            self.time.now() + self.currency.locked_tx_allowed_delta_seconds >= unlock_time
        }
    }

    fn available_state(&self, inner: &ContainerInner, record: &TransferRecord) -> u32 {
        if !self.is_spend_time_unlocked(record.unlock_time, inner.current_height) {
            flags::INCLUDE_STATE_LOCKED
        } else if inner.current_height < record.block_height + self.spendable_age {
            flags::INCLUDE_STATE_SOFT_LOCKED
        } else {
            flags::INCLUDE_STATE_UNLOCKED
        }
    }

    fn is_included(&self, record: &TransferRecord, state: u32, include_flags: u32) -> bool {
        type_matches(&record.output, include_flags) && (include_flags & state != 0)
    }

    // ---- persistence ---------------------------------------------------

    pub fn save(&self) -> Vec<u8> {
        let inner = self.lock();
        let mut encoder = Encoder::new();
        encoder.write_u8(CONTAINER_BLOB_VERSION);
        encoder.write_u32_le(inner.current_height);

        let mut hashes: Vec<&Hash256> = inner.transactions.keys().collect();
        hashes.sort_unstable();
        encoder.write_varint(hashes.len() as u64);
        for hash in hashes {
            inner.transactions[hash].consensus_encode(&mut encoder);
        }

        for store in [&inner.unconfirmed, &inner.available] {
            encoder.write_varint(store.len() as u64);
            let mut records: Vec<&TransferRecord> = store.iter().collect();
            records.sort_unstable_by_key(|r| {
                (r.output.transaction_hash, r.output.output_in_transaction)
            });
            for record in records {
                record.consensus_encode(&mut encoder);
            }
        }

        encoder.write_varint(inner.spent.len() as u64);
        let mut spent: Vec<&SpentTransferRecord> = inner.spent.iter().collect();
        spent.sort_unstable_by_key(|s| {
            (s.record.output.transaction_hash, s.record.output.output_in_transaction)
        });
        for record in spent {
            record.consensus_encode(&mut encoder);
        }

        encoder.into_inner()
    }

    pub fn load(&self, bytes: &[u8]) -> bool {
        let mut decoder = Decoder::new(bytes);
        let result = (|| -> Result<ContainerInner, DecodeError> {
            let version = decoder.read_u8()?;
            if version != CONTAINER_BLOB_VERSION {
                return Err(DecodeError::InvalidData("unsupported container version"));
            }
            let current_height = decoder.read_u32_le()?;

            let tx_count = decoder.read_size()?;
            let mut transactions = HashMap::with_capacity(tx_count);
            for _ in 0..tx_count {
                let info = TransactionInformation::consensus_decode(&mut decoder)?;
                transactions.insert(info.transaction_hash, info);
            }

            let mut unconfirmed = IndexedTransfers::default();
            let unconfirmed_count = decoder.read_size()?;
            for _ in 0..unconfirmed_count {
                unconfirmed.insert(TransferRecord::consensus_decode(&mut decoder)?);
            }

            let mut available = IndexedTransfers::default();
            let available_count = decoder.read_size()?;
            for _ in 0..available_count {
                available.insert(TransferRecord::consensus_decode(&mut decoder)?);
            }

            let mut spent = SpentTransfers::default();
            let spent_count = decoder.read_size()?;
            for _ in 0..spent_count {
                spent.insert(SpentTransferRecord::consensus_decode(&mut decoder)?);
            }

            Ok(ContainerInner { transactions, unconfirmed, available, spent, current_height })
        })();

        match result {
            Ok(loaded) => {
                *self.lock() = loaded;
                true
            }
            Err(err) => {
                log_warn!("discarding transfers container state: {err}");
                false
            }
        }
    }
}

fn type_matches(output: &TransactionOutputInformation, include_flags: u32) -> bool {
    match output.data {
        OutputData::Key { .. } => include_flags & flags::INCLUDE_TYPE_KEY != 0,
        OutputData::Multisignature { .. } => {
            include_flags & flags::INCLUDE_TYPE_MULTISIGNATURE != 0
        }
    }
}

impl ContainerInner {
    fn add_transaction_outputs(
        &mut self,
        block: &TransactionBlockInfo,
        transfers: &[TransactionOutputInformation],
    ) -> bool {
        let mut added = false;
        for transfer in transfers {
            let confirmed = block.is_confirmed();
            let has_real_index = transfer.global_output_index != UNCONFIRMED_GLOBAL_OUTPUT_INDEX;
            if confirmed != has_real_index {
                log_error!(
                    "output {} of {} has a global index inconsistent with its block info",
                    transfer.output_in_transaction,
                    to_hex(&transfer.transaction_hash)
                );
                continue;
            }

            let mut record = TransferRecord {
                output: *transfer,
                unlock_time: 0,
                block_height: block.height,
                transaction_index: block.transaction_index,
                visible: true,
            };

            if confirmed {
                if let OutputData::Key { key_image, .. } = transfer.data {
                    // a duplicate key image means at most one of the
                    // copies can ever be spent; newcomers stay hidden
                    let descriptor = SpentOutputDescriptor::KeyImage(key_image);
                    let visible_elsewhere = self
                        .available
                        .ids_by_descriptor(&descriptor)
                        .iter()
                        .filter_map(|id| self.available.get(*id))
                        .any(|existing| existing.visible)
                        || !self.spent.ids_by_descriptor(&descriptor).is_empty();
                    if visible_elsewhere {
                        log_debug!(
                            "duplicate key image {} observed, hiding the newcomer",
                            to_hex(key_image.as_bytes())
                        );
                        record.visible = false;
                    }
                }
                self.available.insert(record);
            } else {
                self.unconfirmed.insert(record);
            }
            added = true;
        }
        added
    }

    fn add_transaction_inputs(
        &mut self,
        block: &TransactionBlockInfo,
        tx: &Transaction,
        tx_hash: &Hash256,
    ) -> bool {
        let mut added = false;
        for (input_index, input) in tx.prefix.inputs.iter().enumerate() {
            let descriptor = match input {
                TransactionInput::Key(key_input) => {
                    SpentOutputDescriptor::KeyImage(key_input.key_image)
                }
                TransactionInput::Multisignature(ms) => {
                    SpentOutputDescriptor::AmountGlobalIndex(ms.amount, ms.output_index)
                }
                TransactionInput::Base(_) => continue,
            };

            let candidate = self
                .available
                .ids_by_descriptor(&descriptor)
                .into_iter()
                .find(|id| self.available.get(*id).is_some_and(|r| r.visible));
            let Some(id) = candidate else {
                continue;
            };
            let Some(record) = self.available.remove(id) else {
                continue;
            };
            self.spent.insert(SpentTransferRecord {
                record,
                spending_block: *block,
                spending_transaction_hash: *tx_hash,
                input_in_transaction: input_index as u32,
            });
            self.update_visibility(&descriptor);
            added = true;
        }
        added
    }

    /// Removes every trace of `tx_hash`: restores the outputs it spent
    /// and drops the outputs it created.
    fn delete_transaction_transfers(&mut self, tx_hash: &Hash256) {
        for id in self.spent.ids_by_spending_transaction(tx_hash) {
            let Some(spent) = self.spent.remove(id) else {
                continue;
            };
            let descriptor = spent.record.output.descriptor();
            self.available.insert(spent.record);
            self.update_visibility(&descriptor);
        }

        for id in self.unconfirmed.ids_by_transaction(tx_hash) {
            self.unconfirmed.remove(id);
        }
        for id in self.available.ids_by_transaction(tx_hash) {
            if let Some(record) = self.available.remove(id) {
                self.update_visibility(&record.output.descriptor());
            }
        }
        for id in self.spent.ids_by_transaction(tx_hash) {
            if let Some(spent) = self.spent.remove(id) {
                self.update_visibility(&spent.record.output.descriptor());
            }
        }
    }

    /// Recomputes visibility among duplicates of one descriptor: a
    /// spent copy wins, otherwise the earliest confirmed copy.
    fn update_visibility(&mut self, descriptor: &SpentOutputDescriptor) {
        if !matches!(descriptor, SpentOutputDescriptor::KeyImage(_)) {
            return;
        }

        let spent_exists = !self.spent.ids_by_descriptor(descriptor).is_empty();
        let available_ids = self.available.ids_by_descriptor(descriptor);
        let unconfirmed_ids = self.unconfirmed.ids_by_descriptor(descriptor);

        if spent_exists {
            for id in available_ids {
                if let Some(record) = self.available.get_mut(id) {
                    record.visible = false;
                }
            }
            for id in unconfirmed_ids {
                if let Some(record) = self.unconfirmed.get_mut(id) {
                    record.visible = false;
                }
            }
            return;
        }

        let winner = available_ids
            .iter()
            .filter_map(|id| {
                self.available
                    .get(*id)
                    .map(|record| (record.block_height, record.transaction_index, *id))
            })
            .min();
        for id in &available_ids {
            if let Some(record) = self.available.get_mut(*id) {
                record.visible = winner.is_some_and(|(_, _, winner_id)| winner_id == *id);
            }
        }
        let unconfirmed_visible = winner.is_none();
        for (position, id) in unconfirmed_ids.iter().enumerate() {
            if let Some(record) = self.unconfirmed.get_mut(*id) {
                record.visible = unconfirmed_visible && position == 0;
            }
        }
    }
}
