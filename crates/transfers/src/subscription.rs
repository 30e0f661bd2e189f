//! One synchronized wallet account: its keys, its transfer ledger, and
//! the observers watching it.

use std::sync::{Arc, Weak};

use obol_crypto::{AccountKeys, AccountPublicAddress, Hash256};
use obol_currency::{Currency, TimeProvider};

use crate::container::TransfersContainer;
use crate::node::SyncError;
use crate::observers::ObserverList;
use crate::types::{AccountSubscription, SynchronizationStart, TransactionBlockInfo, TransactionOutputInformation};

pub trait TransfersObserver: Send + Sync {
    fn on_error(&self, _address: &AccountPublicAddress, _height: u32, _error: &SyncError) {}
    fn on_transaction_updated(&self, _address: &AccountPublicAddress, _tx_hash: &Hash256) {}
    fn on_transaction_deleted(&self, _address: &AccountPublicAddress, _tx_hash: &Hash256) {}
}

pub struct TransfersSubscription {
    subscription: AccountSubscription,
    container: TransfersContainer,
    observers: ObserverList<dyn TransfersObserver>,
}

impl TransfersSubscription {
    pub fn new(currency: Currency, time: Arc<dyn TimeProvider>, subscription: AccountSubscription) -> Self {
        let container = TransfersContainer::new(
            currency,
            subscription.transaction_spendable_age,
            time,
        );
        Self { subscription, container, observers: ObserverList::new() }
    }

    pub fn address(&self) -> AccountPublicAddress {
        self.subscription.keys.address
    }

    pub fn keys(&self) -> &AccountKeys {
        &self.subscription.keys
    }

    pub fn sync_start(&self) -> SynchronizationStart {
        self.subscription.sync_start
    }

    pub fn container(&self) -> &TransfersContainer {
        &self.container
    }

    pub fn add_observer(&self, observer: Weak<dyn TransfersObserver>) {
        self.observers.add(observer);
    }

    pub fn on_blockchain_detach(&self, height: u32) {
        let deleted = self.container.detach(height);
        let address = self.address();
        for tx_hash in deleted {
            self.observers
                .notify(|observer| observer.on_transaction_deleted(&address, &tx_hash));
        }
    }

    pub fn on_error(&self, height: u32, error: &SyncError) {
        let address = self.address();
        self.observers.notify(|observer| observer.on_error(&address, height, error));
    }

    pub fn advance_height(&self, height: u32) -> bool {
        self.container.advance_height(height)
    }

    pub fn add_transaction(
        &self,
        block: &TransactionBlockInfo,
        tx: &obol_primitives::Transaction,
        transfers: &[TransactionOutputInformation],
    ) -> bool {
        let added = self.container.add_transaction(block, tx, transfers);
        if added {
            let address = self.address();
            let tx_hash = tx.hash();
            self.observers
                .notify(|observer| observer.on_transaction_updated(&address, &tx_hash));
        }
        added
    }

    pub fn mark_transaction_confirmed(
        &self,
        block: &TransactionBlockInfo,
        tx_hash: &Hash256,
        global_indices: &[u32],
    ) -> bool {
        let confirmed = self.container.mark_transaction_confirmed(block, tx_hash, global_indices);
        if confirmed {
            let address = self.address();
            self.observers
                .notify(|observer| observer.on_transaction_updated(&address, tx_hash));
        }
        confirmed
    }

    pub fn delete_unconfirmed_transaction(&self, tx_hash: &Hash256) -> bool {
        let deleted = self.container.delete_unconfirmed_transaction(tx_hash);
        if deleted {
            let address = self.address();
            self.observers
                .notify(|observer| observer.on_transaction_deleted(&address, tx_hash));
        }
        deleted
    }
}
