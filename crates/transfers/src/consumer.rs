//! Scans the block/pool stream for outputs owned by a set of
//! subscriptions sharing one view key. Matching is fanned out across a
//! worker pool; results are replayed into the containers in strict
//! (height, in-block index) order.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;

use crossbeam_channel::bounded;
use obol_crypto::{
    derive_public_key, derive_secret_key, generate_key_derivation, generate_key_image, to_hex,
    AccountPublicAddress, Hash256, PublicKey, SecretKey,
};
use obol_currency::{Currency, TimeProvider};
use obol_log::{log_debug, log_error};
use obol_primitives::{Transaction, TransactionOutputTarget};

use crate::node::{promise, wait, CompleteBlock, Node, SyncError};
use crate::observers::ObserverList;
use crate::subscription::TransfersSubscription;
use crate::types::{
    AccountSubscription, OutputData, SynchronizationStart, TransactionBlockInfo,
    TransactionOutputInformation, UNCONFIRMED_GLOBAL_OUTPUT_INDEX,
};

pub trait ConsumerObserver: Send + Sync {
    fn on_blocks_added(&self, _view_key: &PublicKey, _block_hashes: &[Hash256]) {}
    fn on_blockchain_detach(&self, _view_key: &PublicKey, _height: u32) {}
    fn on_transaction_delete_begin(&self, _view_key: &PublicKey, _tx_hash: &Hash256) {}
    fn on_transaction_delete_end(&self, _view_key: &PublicKey, _tx_hash: &Hash256) {}
    fn on_transaction_updated(
        &self,
        _view_key: &PublicKey,
        _tx_hash: &Hash256,
        _subscriptions: &[AccountPublicAddress],
    ) {
    }
}

struct ConsumerState {
    subscriptions: HashMap<PublicKey, Arc<TransfersSubscription>>,
    pool_txs: HashSet<Hash256>,
    sync_start: SynchronizationStart,
}

pub struct TransfersConsumer {
    currency: Currency,
    node: Arc<dyn Node>,
    time: Arc<dyn TimeProvider>,
    view_secret: SecretKey,
    view_public: PublicKey,
    state: Mutex<ConsumerState>,
    observers: ObserverList<dyn ConsumerObserver>,
}

struct PreprocessedTx {
    block_info: TransactionBlockInfo,
    tx: Transaction,
    outputs: HashMap<PublicKey, Vec<TransactionOutputInformation>>,
    global_indices: Vec<u32>,
}

impl TransfersConsumer {
    pub fn new(
        currency: Currency,
        node: Arc<dyn Node>,
        time: Arc<dyn TimeProvider>,
        view_secret: SecretKey,
        view_public: PublicKey,
    ) -> Self {
        Self {
            currency,
            node,
            time,
            view_secret,
            view_public,
            state: Mutex::new(ConsumerState {
                subscriptions: HashMap::new(),
                pool_txs: HashSet::new(),
                sync_start: SynchronizationStart { timestamp: u64::MAX, height: u64::MAX },
            }),
            observers: ObserverList::new(),
        }
    }

    pub fn view_public_key(&self) -> PublicKey {
        self.view_public
    }

    pub fn add_observer(&self, observer: Weak<dyn ConsumerObserver>) {
        self.observers.add(observer);
    }

    /// Registers an account. All subscriptions of one consumer share
    /// the consumer's view secret; anything else is a wiring bug.
    pub fn add_subscription(&self, subscription: AccountSubscription) -> Arc<TransfersSubscription> {
        assert_eq!(
            subscription.keys.view_secret_key, self.view_secret,
            "subscription offered to a consumer with a different view key"
        );
        let mut state = self.lock();
        let spend_key = subscription.keys.address.spend_public_key;
        let entry = state.subscriptions.entry(spend_key).or_insert_with(|| {
            Arc::new(TransfersSubscription::new(
                self.currency.clone(),
                self.time.clone(),
                subscription,
            ))
        });
        let result = entry.clone();
        Self::update_sync_start(&mut state);
        result
    }

    /// Removes an account; true when no subscriptions remain.
    pub fn remove_subscription(&self, address: &AccountPublicAddress) -> bool {
        let mut state = self.lock();
        state.subscriptions.remove(&address.spend_public_key);
        Self::update_sync_start(&mut state);
        state.subscriptions.is_empty()
    }

    pub fn get_subscription(&self, address: &AccountPublicAddress) -> Option<Arc<TransfersSubscription>> {
        self.lock().subscriptions.get(&address.spend_public_key).cloned()
    }

    pub fn get_subscriptions(&self) -> Vec<AccountPublicAddress> {
        self.lock().subscriptions.values().map(|sub| sub.address()).collect()
    }

    /// Seeds the known-pool set from unconfirmed container entries,
    /// skipping transactions the wallet has not yet committed anywhere.
    pub fn init_transaction_pool(&self, uncommitted: &HashSet<Hash256>) {
        let mut state = self.lock();
        let mut seeded: HashSet<Hash256> = HashSet::new();
        for sub in state.subscriptions.values() {
            for tx_hash in sub.container().get_unconfirmed_transactions() {
                if !uncommitted.contains(&tx_hash) {
                    seeded.insert(tx_hash);
                }
            }
        }
        state.pool_txs.extend(seeded);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ConsumerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn update_sync_start(state: &mut ConsumerState) {
        let mut start = SynchronizationStart { timestamp: u64::MAX, height: u64::MAX };
        for sub in state.subscriptions.values() {
            let sub_start = sub.sync_start();
            start.timestamp = start.timestamp.min(sub_start.timestamp);
            start.height = start.height.min(sub_start.height);
        }
        state.sync_start = start;
    }

    fn subscriptions_snapshot(&self) -> HashMap<PublicKey, Arc<TransfersSubscription>> {
        self.lock().subscriptions.clone()
    }

    // ---- matching ------------------------------------------------------

    /// Output indices owned per spend key, matched through the shared
    /// view-key derivation. The derivation index runs over key outputs;
    /// multisignature keys derive with the output position.
    fn find_my_outputs(
        &self,
        spend_keys: &HashSet<PublicKey>,
        tx: &Transaction,
    ) -> HashMap<PublicKey, Vec<u32>> {
        let mut found: HashMap<PublicKey, Vec<u32>> = HashMap::new();
        let Some(tx_public_key) = tx.public_key() else {
            return found;
        };
        let Some(derivation) = generate_key_derivation(&tx_public_key, &self.view_secret) else {
            return found;
        };

        let mut key_index = 0u32;
        for (output_index, output) in tx.prefix.outputs.iter().enumerate() {
            match &output.target {
                TransactionOutputTarget::Key(output_key) => {
                    let spend_key = obol_crypto::underive_public_key(&derivation, key_index, output_key);
                    if spend_keys.contains(&spend_key) {
                        found.entry(spend_key).or_default().push(output_index as u32);
                    }
                    key_index += 1;
                }
                TransactionOutputTarget::Multisignature(ms) => {
                    for key in &ms.keys {
                        let spend_key =
                            obol_crypto::underive_public_key(&derivation, output_index as u32, key);
                        if spend_keys.contains(&spend_key) {
                            found.entry(spend_key).or_default().push(output_index as u32);
                        }
                        key_index += 1;
                    }
                }
            }
        }
        found
    }

    fn create_transfers(
        &self,
        subscription: &TransfersSubscription,
        block_info: &TransactionBlockInfo,
        tx: &Transaction,
        output_indices: &[u32],
        global_indices: &[u32],
    ) -> Result<Vec<TransactionOutputInformation>, SyncError> {
        let keys = subscription.keys();
        let tx_hash = tx.hash();
        let Some(tx_public_key) = tx.public_key() else {
            return Ok(Vec::new());
        };
        let derivation = generate_key_derivation(&tx_public_key, &keys.view_secret_key)
            .ok_or(SyncError::InvalidResponse("null transaction public key"))?;

        let mut transfers = Vec::with_capacity(output_indices.len());
        for output_index in output_indices {
            let position = *output_index as usize;
            let Some(output) = tx.prefix.outputs.get(position) else {
                return Err(SyncError::InvalidResponse("owned output index out of range"));
            };

            let global_output_index = if block_info.is_confirmed() {
                *global_indices
                    .get(position)
                    .ok_or(SyncError::InvalidResponse("missing global output index"))?
            } else {
                UNCONFIRMED_GLOBAL_OUTPUT_INDEX
            };

            let data = match &output.target {
                TransactionOutputTarget::Key(output_key) => {
                    let ephemeral_public =
                        derive_public_key(&derivation, *output_index, &keys.address.spend_public_key);
                    debug_assert_eq!(ephemeral_public, *output_key);
                    let ephemeral_secret =
                        derive_secret_key(&derivation, *output_index, &keys.spend_secret_key);
                    OutputData::Key {
                        output_key: *output_key,
                        key_image: generate_key_image(&ephemeral_public, &ephemeral_secret),
                    }
                }
                TransactionOutputTarget::Multisignature(ms) => OutputData::Multisignature {
                    required_signatures: ms.required_signatures as u32,
                },
            };

            transfers.push(TransactionOutputInformation {
                amount: output.amount,
                global_output_index,
                output_in_transaction: *output_index,
                transaction_hash: tx_hash,
                transaction_public_key: tx_public_key,
                data,
            });
        }
        Ok(transfers)
    }

    fn preprocess_outputs(
        &self,
        spend_keys: &HashSet<PublicKey>,
        subscriptions: &HashMap<PublicKey, Arc<TransfersSubscription>>,
        block_info: &TransactionBlockInfo,
        tx: &Transaction,
    ) -> Result<(HashMap<PublicKey, Vec<TransactionOutputInformation>>, Vec<u32>), SyncError> {
        let matched = self.find_my_outputs(spend_keys, tx);
        let mut outputs = HashMap::new();
        let mut global_indices = Vec::new();
        if matched.is_empty() {
            return Ok((outputs, global_indices));
        }

        if block_info.is_confirmed() {
            let (callback, receiver) = promise();
            self.node.get_transaction_outs_global_indices(tx.hash(), callback);
            global_indices = wait(receiver)?;
        }

        for (spend_key, output_indices) in matched {
            if let Some(subscription) = subscriptions.get(&spend_key) {
                let transfers = self.create_transfers(
                    subscription,
                    block_info,
                    tx,
                    &output_indices,
                    &global_indices,
                )?;
                outputs.insert(spend_key, transfers);
            }
        }
        Ok((outputs, global_indices))
    }

    fn process_transaction(
        &self,
        subscriptions: &HashMap<PublicKey, Arc<TransfersSubscription>>,
        preprocessed: &PreprocessedTx,
    ) {
        let tx_hash = preprocessed.tx.hash();
        let empty: Vec<TransactionOutputInformation> = Vec::new();
        let mut updated_subscriptions: Vec<AccountPublicAddress> = Vec::new();

        for (spend_key, subscription) in subscriptions {
            let transfers = preprocessed.outputs.get(spend_key).unwrap_or(&empty);
            let updated = self.process_outputs(
                subscription,
                &preprocessed.block_info,
                &preprocessed.tx,
                &tx_hash,
                transfers,
                &preprocessed.global_indices,
            );
            if updated {
                updated_subscriptions.push(subscription.address());
            }
        }

        if !updated_subscriptions.is_empty() {
            self.observers.notify(|observer| {
                observer.on_transaction_updated(&self.view_public, &tx_hash, &updated_subscriptions)
            });
        }
    }

    fn process_outputs(
        &self,
        subscription: &TransfersSubscription,
        block_info: &TransactionBlockInfo,
        tx: &Transaction,
        tx_hash: &Hash256,
        transfers: &[TransactionOutputInformation],
        global_indices: &[u32],
    ) -> bool {
        if let Some(known) = subscription.container().get_transaction_information(tx_hash) {
            if known.block_height == crate::types::UNCONFIRMED_HEIGHT && block_info.is_confirmed() {
                // pool transaction landed in a block
                return subscription.mark_transaction_confirmed(block_info, tx_hash, global_indices);
            }
            debug_assert_eq!(known.block_height, block_info.height);
            return false;
        }
        subscription.add_transaction(block_info, tx, transfers)
    }

    // ---- pipeline entry points -----------------------------------------

    fn on_new_blocks_impl(&self, blocks: &[CompleteBlock], start_height: u32) -> bool {
        let subscriptions = self.subscriptions_snapshot();
        let spend_keys: HashSet<PublicKey> = subscriptions.keys().copied().collect();
        let sync_start = self.lock().sync_start;

        let workers = thread::available_parallelism().map(|n| n.get()).unwrap_or(2).max(2);
        let stop = AtomicBool::new(false);
        let collected: Mutex<Vec<PreprocessedTx>> = Mutex::new(Vec::new());
        let first_error: Mutex<Option<SyncError>> = Mutex::new(None);

        struct WorkItem<'a> {
            block_info: TransactionBlockInfo,
            tx: &'a Transaction,
        }

        let (sender, receiver) = bounded::<WorkItem<'_>>(workers * 2);

        thread::scope(|scope| {
            let stop = &stop;
            let collected = &collected;
            let first_error = &first_error;
            let subscriptions = &subscriptions;
            let spend_keys = &spend_keys;

            scope.spawn(move || {
                'feeding: for (offset, complete) in blocks.iter().enumerate() {
                    let Some(block) = &complete.block else {
                        continue;
                    };
                    if sync_start.timestamp != 0 && block.header.timestamp < sync_start.timestamp {
                        continue;
                    }
                    let mut block_info = TransactionBlockInfo {
                        height: start_height + offset as u32,
                        timestamp: block.header.timestamp,
                        transaction_index: 0,
                    };
                    for tx in &complete.transactions {
                        if stop.load(Ordering::Relaxed) {
                            break 'feeding;
                        }
                        let has_public_key = tx.public_key().is_some_and(|key| !key.is_null());
                        if has_public_key
                            && sender.send(WorkItem { block_info, tx }).is_err()
                        {
                            break 'feeding;
                        }
                        block_info.transaction_index += 1;
                    }
                }
                // dropping the sender closes the queue
            });

            for _ in 0..workers {
                let receiver = receiver.clone();
                scope.spawn(move || {
                    while let Ok(item) = receiver.recv() {
                        if stop.load(Ordering::Relaxed) {
                            break;
                        }
                        match self.preprocess_outputs(
                            spend_keys,
                            subscriptions,
                            &item.block_info,
                            item.tx,
                        ) {
                            Ok((outputs, global_indices)) => {
                                collected.lock().unwrap_or_else(|p| p.into_inner()).push(
                                    PreprocessedTx {
                                        block_info: item.block_info,
                                        tx: item.tx.clone(),
                                        outputs,
                                        global_indices,
                                    },
                                );
                            }
                            Err(error) => {
                                stop.store(true, Ordering::Relaxed);
                                first_error
                                    .lock()
                                    .unwrap_or_else(|p| p.into_inner())
                                    .get_or_insert(error);
                                break;
                            }
                        }
                    }
                });
            }
            // only worker clones may keep the queue open, so a failed
            // batch disconnects the producer instead of wedging it
            drop(receiver);
        });

        let error = first_error.into_inner().unwrap_or_else(|p| p.into_inner());
        if let Some(error) = error {
            log_error!("block batch processing failed at height {start_height}: {error}");
            for subscription in subscriptions.values() {
                subscription.on_error(start_height, &error);
            }
            return false;
        }

        let block_hashes: Vec<Hash256> = blocks.iter().map(|b| b.block_hash).collect();
        self.observers
            .notify(|observer| observer.on_blocks_added(&self.view_public, &block_hashes));

        // matching ran unordered; replay strictly by chain position
        let mut preprocessed = collected.into_inner().unwrap_or_else(|p| p.into_inner());
        preprocessed
            .sort_by_key(|item| (item.block_info.height, item.block_info.transaction_index));
        for item in &preprocessed {
            self.process_transaction(&subscriptions, item);
        }

        let new_height = start_height + blocks.len() as u32 - 1;
        for subscription in subscriptions.values() {
            subscription.advance_height(new_height);
        }
        true
    }

    fn on_pool_updated_impl(
        &self,
        added: &[Transaction],
        deleted: &[Hash256],
    ) -> Result<(), SyncError> {
        let subscriptions = self.subscriptions_snapshot();
        let spend_keys: HashSet<PublicKey> = subscriptions.keys().copied().collect();
        let unconfirmed = TransactionBlockInfo::unconfirmed();

        for tx in added {
            self.lock().pool_txs.insert(tx.hash());
            match self.preprocess_outputs(&spend_keys, &subscriptions, &unconfirmed, tx) {
                Ok((outputs, global_indices)) => {
                    self.process_transaction(
                        &subscriptions,
                        &PreprocessedTx {
                            block_info: unconfirmed,
                            tx: tx.clone(),
                            outputs,
                            global_indices,
                        },
                    );
                }
                Err(error) => {
                    for subscription in subscriptions.values() {
                        subscription.on_error(crate::types::UNCONFIRMED_HEIGHT, &error);
                    }
                    return Err(error);
                }
            }
        }

        for tx_hash in deleted {
            self.lock().pool_txs.remove(tx_hash);
            self.observers
                .notify(|observer| observer.on_transaction_delete_begin(&self.view_public, tx_hash));
            for subscription in subscriptions.values() {
                subscription.delete_unconfirmed_transaction(tx_hash);
            }
            self.observers
                .notify(|observer| observer.on_transaction_delete_end(&self.view_public, tx_hash));
        }

        Ok(())
    }
}

impl crate::synchronizer::BlockchainConsumer for TransfersConsumer {
    fn get_sync_start(&self) -> SynchronizationStart {
        self.lock().sync_start
    }

    fn known_pool_tx_ids(&self) -> Vec<Hash256> {
        self.lock().pool_txs.iter().copied().collect()
    }

    fn on_blockchain_detach(&self, height: u32) {
        log_debug!("detaching consumer {} to height {height}", to_hex(self.view_public.as_bytes()));
        self.observers
            .notify(|observer| observer.on_blockchain_detach(&self.view_public, height));
        for subscription in self.subscriptions_snapshot().values() {
            subscription.on_blockchain_detach(height);
        }
    }

    fn on_new_blocks(&self, blocks: &[CompleteBlock], start_height: u32) -> bool {
        if blocks.is_empty() {
            return true;
        }
        self.on_new_blocks_impl(blocks, start_height)
    }

    fn on_pool_updated(&self, added: &[Transaction], deleted: &[Hash256]) -> Result<(), SyncError> {
        self.on_pool_updated_impl(added, deleted)
    }

    fn add_unconfirmed_transaction(&self, tx: &Transaction) -> Result<(), SyncError> {
        let subscriptions = self.subscriptions_snapshot();
        let spend_keys: HashSet<PublicKey> = subscriptions.keys().copied().collect();
        let unconfirmed = TransactionBlockInfo::unconfirmed();
        let (outputs, global_indices) =
            self.preprocess_outputs(&spend_keys, &subscriptions, &unconfirmed, tx)?;
        self.process_transaction(
            &subscriptions,
            &PreprocessedTx { block_info: unconfirmed, tx: tx.clone(), outputs, global_indices },
        );
        Ok(())
    }

    fn remove_unconfirmed_transaction(&self, tx_hash: &Hash256) {
        self.observers
            .notify(|observer| observer.on_transaction_delete_begin(&self.view_public, tx_hash));
        for subscription in self.subscriptions_snapshot().values() {
            subscription.delete_unconfirmed_transaction(tx_hash);
        }
        self.observers
            .notify(|observer| observer.on_transaction_delete_end(&self.view_public, tx_hash));
    }
}
