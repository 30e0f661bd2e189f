//! Registry of consumers keyed by view public key: accounts sharing a
//! view key share one blockchain scan.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};

use obol_crypto::{AccountPublicAddress, Hash256, PublicKey};
use obol_currency::{Currency, TimeProvider};
use obol_log::log_warn;
use obol_primitives::{DecodeError, Decoder, Encoder};

use crate::consumer::{ConsumerObserver, TransfersConsumer};
use crate::node::Node;
use crate::observers::ObserverList;
use crate::subscription::TransfersSubscription;
use crate::sync_state::SynchronizationState;
use crate::synchronizer::{BlockchainConsumer, BlockchainSynchronizer};
use crate::types::AccountSubscription;

const SYNCHRONIZER_BLOB_VERSION: u8 = 1;

pub trait TransfersSynchronizerObserver: Send + Sync {
    fn on_blocks_added(&self, _view_key: &PublicKey, _block_hashes: &[Hash256]) {}
    fn on_blockchain_detach(&self, _view_key: &PublicKey, _height: u32) {}
    fn on_transaction_deleted(&self, _view_key: &PublicKey, _tx_hash: &Hash256) {}
    fn on_transaction_updated(
        &self,
        _view_key: &PublicKey,
        _tx_hash: &Hash256,
        _subscriptions: &[AccountPublicAddress],
    ) {
    }
}

struct ConsumerEntry {
    consumer: Arc<TransfersConsumer>,
    as_blockchain_consumer: Arc<dyn BlockchainConsumer>,
}

pub struct TransfersSynchronizer {
    currency: Currency,
    node: Arc<dyn Node>,
    time: Arc<dyn TimeProvider>,
    synchronizer: Arc<BlockchainSynchronizer>,
    consumers: Mutex<HashMap<PublicKey, ConsumerEntry>>,
    /// States loaded from disk before their consumers are subscribed.
    pending_states: Mutex<HashMap<PublicKey, SynchronizationState>>,
    observers: ObserverList<dyn TransfersSynchronizerObserver>,
}

impl TransfersSynchronizer {
    pub fn new(
        currency: Currency,
        node: Arc<dyn Node>,
        time: Arc<dyn TimeProvider>,
        synchronizer: Arc<BlockchainSynchronizer>,
    ) -> Arc<Self> {
        Arc::new(Self {
            currency,
            node,
            time,
            synchronizer,
            consumers: Mutex::new(HashMap::new()),
            pending_states: Mutex::new(HashMap::new()),
            observers: ObserverList::new(),
        })
    }

    pub fn add_observer(&self, observer: Weak<dyn TransfersSynchronizerObserver>) {
        self.observers.add(observer);
    }

    pub fn add_subscription(
        self: &Arc<Self>,
        subscription: AccountSubscription,
    ) -> Arc<TransfersSubscription> {
        let view_key = subscription.keys.address.view_public_key;
        let mut consumers = self.lock_consumers();

        if !consumers.contains_key(&view_key) {
            let consumer = Arc::new(TransfersConsumer::new(
                self.currency.clone(),
                self.node.clone(),
                self.time.clone(),
                subscription.keys.view_secret_key.clone(),
                view_key,
            ));
            let me_arc: Arc<dyn ConsumerObserver> = self.clone();
            let me: Weak<dyn ConsumerObserver> = Arc::downgrade(&me_arc);
            consumer.add_observer(me);

            let as_blockchain_consumer: Arc<dyn BlockchainConsumer> = consumer.clone();
            let pending = self.pending_states.lock().ok().and_then(|mut states| states.remove(&view_key));
            match pending {
                Some(state) => self
                    .synchronizer
                    .add_consumer_with_state(as_blockchain_consumer.clone(), state),
                None => self.synchronizer.add_consumer(as_blockchain_consumer.clone()),
            }
            consumers.insert(view_key, ConsumerEntry { consumer, as_blockchain_consumer });
        }

        consumers[&view_key].consumer.add_subscription(subscription)
    }

    pub fn remove_subscription(&self, address: &AccountPublicAddress) -> bool {
        let mut consumers = self.lock_consumers();
        let Some(entry) = consumers.get(&address.view_public_key) else {
            return false;
        };
        if entry.consumer.remove_subscription(address) {
            self.synchronizer.remove_consumer(&entry.as_blockchain_consumer);
            consumers.remove(&address.view_public_key);
        }
        true
    }

    pub fn get_subscription(
        &self,
        address: &AccountPublicAddress,
    ) -> Option<Arc<TransfersSubscription>> {
        self.lock_consumers()
            .get(&address.view_public_key)
            .and_then(|entry| entry.consumer.get_subscription(address))
    }

    pub fn get_subscriptions(&self) -> Vec<AccountPublicAddress> {
        self.lock_consumers()
            .values()
            .flat_map(|entry| entry.consumer.get_subscriptions())
            .collect()
    }

    pub fn init_transaction_pool(&self, uncommitted: &HashSet<Hash256>) {
        for entry in self.lock_consumers().values() {
            entry.consumer.init_transaction_pool(uncommitted);
        }
    }

    pub fn get_view_key_known_blocks(&self, view_key: &PublicKey) -> Option<Vec<Hash256>> {
        let consumers = self.lock_consumers();
        let entry = consumers.get(view_key)?;
        self.synchronizer.get_consumer_known_blocks(&entry.as_blockchain_consumer)
    }

    fn lock_consumers(&self) -> std::sync::MutexGuard<'_, HashMap<PublicKey, ConsumerEntry>> {
        self.consumers.lock().unwrap_or_else(|p| p.into_inner())
    }

    // ---- persistence ---------------------------------------------------

    /// Serializes every consumer's sync state keyed by view key.
    pub fn save(&self) -> Vec<u8> {
        let consumers = self.lock_consumers();
        let mut encoder = Encoder::new();
        encoder.write_u8(SYNCHRONIZER_BLOB_VERSION);

        let mut entries: Vec<(&PublicKey, &ConsumerEntry)> = consumers.iter().collect();
        entries.sort_unstable_by_key(|(key, _)| **key);
        let mut serialized = Vec::new();
        for (view_key, entry) in entries {
            if let Some(hashes) =
                self.synchronizer.get_consumer_known_blocks(&entry.as_blockchain_consumer)
            {
                serialized.push((*view_key, hashes));
            }
        }
        encoder.write_varint(serialized.len() as u64);
        for (view_key, hashes) in serialized {
            encoder.write_public_key(&view_key);
            encoder.write_varint(hashes.len() as u64);
            for hash in hashes {
                encoder.write_hash(&hash);
            }
        }
        encoder.into_inner()
    }

    /// Loads saved sync states; they take effect as subscriptions with
    /// matching view keys arrive.
    pub fn load(&self, bytes: &[u8]) -> bool {
        let mut decoder = Decoder::new(bytes);
        let result = (|| -> Result<HashMap<PublicKey, SynchronizationState>, DecodeError> {
            let version = decoder.read_u8()?;
            if version != SYNCHRONIZER_BLOB_VERSION {
                return Err(DecodeError::InvalidData("unsupported synchronizer state version"));
            }
            let count = decoder.read_size()?;
            let mut states = HashMap::with_capacity(count);
            for _ in 0..count {
                let view_key = decoder.read_public_key()?;
                let hash_count = decoder.read_size()?;
                let mut hashes = Vec::with_capacity(hash_count);
                for _ in 0..hash_count {
                    hashes.push(decoder.read_hash()?);
                }
                let Some((genesis, rest)) = hashes.split_first() else {
                    return Err(DecodeError::InvalidData("empty consumer state"));
                };
                let mut state = SynchronizationState::new(*genesis);
                state.add_blocks(rest, 1);
                states.insert(view_key, state);
            }
            Ok(states)
        })();

        match result {
            Ok(states) => {
                if let Ok(mut pending) = self.pending_states.lock() {
                    *pending = states;
                }
                true
            }
            Err(err) => {
                log_warn!("discarding transfers synchronizer state: {err}");
                false
            }
        }
    }
}

impl ConsumerObserver for TransfersSynchronizer {
    fn on_blocks_added(&self, view_key: &PublicKey, block_hashes: &[Hash256]) {
        self.observers.notify(|observer| observer.on_blocks_added(view_key, block_hashes));
    }

    fn on_blockchain_detach(&self, view_key: &PublicKey, height: u32) {
        self.observers.notify(|observer| observer.on_blockchain_detach(view_key, height));
    }

    fn on_transaction_delete_end(&self, view_key: &PublicKey, tx_hash: &Hash256) {
        self.observers.notify(|observer| observer.on_transaction_deleted(view_key, tx_hash));
    }

    fn on_transaction_updated(
        &self,
        view_key: &PublicKey,
        tx_hash: &Hash256,
        subscriptions: &[AccountPublicAddress],
    ) {
        self.observers
            .notify(|observer| observer.on_transaction_updated(view_key, tx_hash, subscriptions));
    }
}
