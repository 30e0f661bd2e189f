use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use obol_crypto::{
    derive_public_key, generate_deterministic_account, generate_deterministic_keys,
    generate_key_derivation, Hash256,
};
use obol_currency::{currency_params, ManualTime, Network};
use obol_primitives::block::{Block, BlockHeader, BLOCK_MAJOR_VERSION, BLOCK_MINOR_VERSION};
use obol_primitives::{
    extra, BaseInput, Transaction, TransactionInput, TransactionOutput, TransactionOutputTarget,
    TransactionPrefix,
};
use obol_transfers::node::{
    CompleteBlock, Node, NodeCallback, NodeObserver, PoolChanges, QueryBlocksResult, SyncError,
};
use obol_transfers::synchronizer::BlockchainConsumer;
use obol_transfers::{flags, AccountSubscription, SynchronizationStart, TransfersConsumer};

/// Node stub serving only global-index lookups from a canned table.
#[derive(Default)]
struct TableNode {
    global_indices: Mutex<HashMap<Hash256, Result<Vec<u32>, SyncError>>>,
}

impl TableNode {
    fn set_indices(&self, tx_hash: Hash256, indices: Vec<u32>) {
        self.global_indices.lock().unwrap().insert(tx_hash, Ok(indices));
    }

    fn set_failure(&self, tx_hash: Hash256) {
        self.global_indices
            .lock()
            .unwrap()
            .insert(tx_hash, Err(SyncError::RequestFailed("lookup failed".into())));
    }
}

impl Node for TableNode {
    fn add_observer(&self, _observer: Weak<dyn NodeObserver>) {}

    fn get_last_local_block_height(&self) -> u32 {
        0
    }

    fn get_last_known_block_height(&self) -> u32 {
        0
    }

    fn get_peer_count(&self) -> usize {
        0
    }

    fn relay_transaction(&self, _transaction: Transaction, callback: NodeCallback<()>) {
        callback(Ok(()));
    }

    fn query_blocks(
        &self,
        _known_block_ids: Vec<Hash256>,
        _timestamp: u64,
        callback: NodeCallback<QueryBlocksResult>,
    ) {
        callback(Ok(QueryBlocksResult { start_height: 0, blocks: Vec::new() }));
    }

    fn get_pool_symmetric_difference(
        &self,
        _known_pool_tx_ids: Vec<Hash256>,
        _known_block_id: Hash256,
        callback: NodeCallback<PoolChanges>,
    ) {
        callback(Ok(PoolChanges::default()));
    }

    fn get_transaction_outs_global_indices(
        &self,
        transaction_hash: Hash256,
        callback: NodeCallback<Vec<u32>>,
    ) {
        let result = self
            .global_indices
            .lock()
            .unwrap()
            .get(&transaction_hash)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()));
        callback(result);
    }
}

struct Rig {
    node: Arc<TableNode>,
    consumer: TransfersConsumer,
    account: obol_crypto::AccountKeys,
}

fn rig(seed: &[u8]) -> Rig {
    let currency = currency_params(Network::Regtest);
    let node = Arc::new(TableNode::default());
    let account = generate_deterministic_account(seed);
    let consumer = TransfersConsumer::new(
        currency.clone(),
        node.clone(),
        Arc::new(ManualTime::new(1_700_000_000)),
        account.view_secret_key.clone(),
        account.address.view_public_key,
    );
    consumer.add_subscription(AccountSubscription {
        keys: account.clone(),
        sync_start: SynchronizationStart { timestamp: 0, height: 0 },
        transaction_spendable_age: currency.transaction_spendable_age,
    });
    Rig { node, consumer, account }
}

fn payment_to(account: &obol_crypto::AccountPublicAddress, amount: u64, tag: &[u8]) -> Transaction {
    let tx_keys = generate_deterministic_keys(&[b"consumer-pay-".as_slice(), tag].concat());
    let derivation =
        generate_key_derivation(&account.view_public_key, &tx_keys.secret).expect("derivation");
    let mut extra_blob = Vec::new();
    extra::add_public_key(&mut extra_blob, &tx_keys.public);
    Transaction {
        prefix: TransactionPrefix {
            version: 1,
            unlock_time: 0,
            inputs: vec![TransactionInput::Base(BaseInput { block_index: 0 })],
            outputs: vec![TransactionOutput {
                amount,
                target: TransactionOutputTarget::Key(derive_public_key(
                    &derivation,
                    0,
                    &account.spend_public_key,
                )),
            }],
            extra: extra_blob,
        },
        signatures: vec![Vec::new()],
    }
}

fn block_with(height: u32, txs: Vec<Transaction>) -> CompleteBlock {
    let block = Block {
        header: BlockHeader {
            major_version: BLOCK_MAJOR_VERSION,
            minor_version: BLOCK_MINOR_VERSION,
            timestamp: 1_700_000_000 + height as u64,
            previous_block_hash: obol_crypto::fast_hash(&height.to_le_bytes()),
            nonce: height,
        },
        base_transaction: payment_to(
            &generate_deterministic_account(b"nobody").address,
            1,
            &height.to_le_bytes(),
        ),
        transaction_hashes: txs.iter().map(|tx| tx.hash()).collect(),
    };
    let mut transactions = vec![block.base_transaction.clone()];
    transactions.extend(txs);
    CompleteBlock { block_hash: block.hash(), block: Some(block), transactions }
}

#[test]
fn matched_outputs_are_applied_in_block_order() {
    let rig = rig(b"ordered");
    let pay1 = payment_to(&rig.account.address, 1_000, b"first");
    let pay2 = payment_to(&rig.account.address, 2_000, b"second");
    rig.node.set_indices(pay1.hash(), vec![40]);
    rig.node.set_indices(pay2.hash(), vec![41]);

    let blocks = vec![block_with(10, vec![pay1.clone()]), block_with(11, vec![pay2.clone()])];
    assert!(rig.consumer.on_new_blocks(&blocks, 10));

    let subscription = rig.consumer.get_subscription(&rig.account.address).unwrap();
    let container = subscription.container();
    assert_eq!(container.transactions_count(), 2);
    assert_eq!(container.current_height(), 11);
    assert_eq!(container.balance(flags::INCLUDE_ALL), 3_000);

    let outputs = container.get_outputs(flags::INCLUDE_TYPE_ALL | flags::INCLUDE_STATE_ALL);
    let mut indices: Vec<u32> = outputs.iter().map(|out| out.global_output_index).collect();
    indices.sort_unstable();
    assert_eq!(indices, vec![40, 41]);
}

#[test]
fn failed_index_lookup_aborts_the_whole_batch() {
    let rig = rig(b"abort");
    let good = payment_to(&rig.account.address, 1_000, b"good");
    let bad = payment_to(&rig.account.address, 2_000, b"bad");
    rig.node.set_indices(good.hash(), vec![7]);
    rig.node.set_failure(bad.hash());

    let blocks = vec![block_with(5, vec![good]), block_with(6, vec![bad])];
    assert!(!rig.consumer.on_new_blocks(&blocks, 5));

    // nothing was applied, not even the block that preprocessed cleanly
    let subscription = rig.consumer.get_subscription(&rig.account.address).unwrap();
    assert_eq!(subscription.container().transactions_count(), 0);
    assert_eq!(subscription.container().balance(flags::INCLUDE_ALL), 0);
}

#[test]
fn pool_updates_add_and_remove_unconfirmed_transactions() {
    let rig = rig(b"pool");
    let pending = payment_to(&rig.account.address, 4_000, b"pending");

    assert!(rig.consumer.on_pool_updated(&[pending.clone()], &[]).is_ok());
    let subscription = rig.consumer.get_subscription(&rig.account.address).unwrap();
    assert_eq!(
        subscription.container().get_unconfirmed_transactions(),
        vec![pending.hash()]
    );
    assert_eq!(subscription.container().balance(flags::INCLUDE_ALL_LOCKED), 4_000);
    assert_eq!(rig.consumer.known_pool_tx_ids(), vec![pending.hash()]);

    rig.consumer.on_pool_updated(&[], &[pending.hash()]).unwrap();
    assert!(subscription.container().get_unconfirmed_transactions().is_empty());
    assert_eq!(subscription.container().balance(flags::INCLUDE_ALL), 0);
    assert!(rig.consumer.known_pool_tx_ids().is_empty());
}

#[test]
fn detach_is_propagated_to_subscriptions() {
    let rig = rig(b"detach");
    let pay = payment_to(&rig.account.address, 9_000, b"kept");
    rig.node.set_indices(pay.hash(), vec![3]);

    let blocks = vec![block_with(20, vec![pay])];
    assert!(rig.consumer.on_new_blocks(&blocks, 20));
    let subscription = rig.consumer.get_subscription(&rig.account.address).unwrap();
    assert_eq!(subscription.container().balance(flags::INCLUDE_ALL), 9_000);

    rig.consumer.on_blockchain_detach(20);
    assert_eq!(subscription.container().balance(flags::INCLUDE_ALL), 0);
    assert_eq!(subscription.container().transactions_count(), 0);
}
