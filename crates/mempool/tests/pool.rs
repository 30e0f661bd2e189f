use std::sync::Arc;

use obol_chain::{BlockInfo, TransactionValidator, TxVerificationContext};
use obol_crypto::{generate_deterministic_keys, generate_key_image, KeyImage};
use obol_currency::{currency_params, ManualTime, Network};
use obol_mempool::{PoolEvent, TxMemoryPool};
use obol_primitives::{
    KeyInput, Transaction, TransactionInput, TransactionOutput, TransactionOutputTarget,
    TransactionPrefix,
};
use obol_storage::{BlobStore, MemoryBlobStore};

struct AcceptAll;

impl TransactionValidator for AcceptAll {
    fn check_transaction_inputs(&self, _tx: &Transaction, max_used: &mut BlockInfo) -> bool {
        max_used.height = 0;
        max_used.id = obol_crypto::fast_hash(b"genesis");
        true
    }

    fn check_transaction_inputs_cached(
        &self,
        _tx: &Transaction,
        _max_used: &mut BlockInfo,
        _last_failed: &mut BlockInfo,
    ) -> bool {
        true
    }

    fn have_spent_key_images(&self, _tx: &Transaction) -> bool {
        false
    }

    fn check_transaction_size(&self, _blob_size: usize) -> bool {
        true
    }
}

struct Harness {
    pool: Arc<TxMemoryPool>,
    time: Arc<ManualTime>,
    store: Arc<MemoryBlobStore>,
    _validator: Arc<dyn TransactionValidator>,
}

fn harness() -> Harness {
    let currency = currency_params(Network::Regtest);
    let time = Arc::new(ManualTime::new(1_700_000_000));
    let store = Arc::new(MemoryBlobStore::new());
    let pool = Arc::new(TxMemoryPool::new(
        currency,
        store.clone() as Arc<dyn BlobStore>,
        time.clone(),
    ));
    let validator: Arc<dyn TransactionValidator> = Arc::new(AcceptAll);
    pool.set_validator(Arc::downgrade(&validator));
    Harness { pool, time, store, _validator: validator }
}

fn unique_image(tag: &[u8]) -> KeyImage {
    let keys = generate_deterministic_keys(tag);
    generate_key_image(&keys.public, &keys.secret)
}

fn key_output(amount: u64, tag: &[u8]) -> TransactionOutput {
    TransactionOutput {
        amount,
        target: TransactionOutputTarget::Key(generate_deterministic_keys(tag).public),
    }
}

fn spend_tx(input_amounts: &[u64], output_amounts: &[u64], tag: &[u8]) -> Transaction {
    let inputs: Vec<TransactionInput> = input_amounts
        .iter()
        .enumerate()
        .map(|(i, amount)| {
            let mut image_tag = tag.to_vec();
            image_tag.extend_from_slice(&i.to_le_bytes());
            TransactionInput::Key(KeyInput {
                amount: *amount,
                output_offsets: vec![i as u32],
                key_image: unique_image(&image_tag),
            })
        })
        .collect();
    let outputs: Vec<TransactionOutput> = output_amounts
        .iter()
        .enumerate()
        .map(|(i, amount)| {
            let mut out_tag = tag.to_vec();
            out_tag.extend_from_slice(b"out");
            out_tag.extend_from_slice(&i.to_le_bytes());
            key_output(*amount, &out_tag)
        })
        .collect();
    let signatures = inputs
        .iter()
        .map(|input| vec![obol_crypto::Signature::default(); input.signature_count()])
        .collect();
    Transaction {
        prefix: TransactionPrefix { version: 1, unlock_time: 0, inputs, outputs, extra: Vec::new() },
        signatures,
    }
}

/// A transaction paying `fee` with roughly unit size variance.
fn paying_tx(fee: u64, tag: &[u8]) -> Transaction {
    spend_tx(&[10_000_000 + fee], &[10_000_000], tag)
}

#[test]
fn re_adding_a_transaction_does_not_duplicate_it() {
    let harness = harness();
    let tx = paying_tx(2_000_000, b"dup");

    let mut ctx = TxVerificationContext::default();
    assert!(harness.pool.add_transaction(tx.clone(), &mut ctx, false));
    assert!(ctx.added_to_pool);
    assert!(ctx.should_be_relayed);

    let mut ctx = TxVerificationContext::default();
    assert!(!harness.pool.add_transaction(tx.clone(), &mut ctx, false));
    assert_eq!(harness.pool.transactions_count(), 1);

    // kept-by-block path reaches the duplicate-record check directly
    let mut ctx = TxVerificationContext::default();
    assert!(!harness.pool.add_transaction(tx, &mut ctx, true));
    assert_eq!(harness.pool.transactions_count(), 1);
}

#[test]
fn fee_below_minimum_is_rejected() {
    let harness = harness();
    let tx = paying_tx(10, b"cheap");
    let mut ctx = TxVerificationContext::default();
    assert!(!harness.pool.add_transaction(tx, &mut ctx, false));
    assert!(ctx.verification_failed);
    assert!(ctx.tx_fee_too_small);
    assert_eq!(harness.pool.transactions_count(), 0);
}

#[test]
fn conflicting_pool_transactions_are_rejected() {
    let harness = harness();
    let image = unique_image(b"contested");

    let make = |out_tag: &[u8]| Transaction {
        prefix: TransactionPrefix {
            version: 1,
            unlock_time: 0,
            inputs: vec![TransactionInput::Key(KeyInput {
                amount: 5_000_000,
                output_offsets: vec![0],
                key_image: image,
            })],
            outputs: vec![key_output(3_000_000, out_tag)],
            extra: Vec::new(),
        },
        signatures: vec![vec![obol_crypto::Signature::default()]],
    };

    let mut ctx = TxVerificationContext::default();
    assert!(harness.pool.add_transaction(make(b"first"), &mut ctx, false));

    let mut ctx = TxVerificationContext::default();
    assert!(!harness.pool.add_transaction(make(b"second"), &mut ctx, false));
    assert!(ctx.verification_failed);
    assert_eq!(harness.pool.transactions_count(), 1);
}

#[test]
fn take_releases_reservations() {
    let harness = harness();
    let tx = paying_tx(2_000_000, b"taken");
    let id = tx.hash();

    let mut ctx = TxVerificationContext::default();
    assert!(harness.pool.add_transaction(tx.clone(), &mut ctx, false));

    let (taken, blob_size, fee) = harness.pool.take_transaction(&id).unwrap();
    assert_eq!(taken.hash(), id);
    assert_eq!(blob_size, tx.blob_size());
    assert_eq!(fee, 2_000_000);
    assert_eq!(harness.pool.transactions_count(), 0);

    // with the reservation gone the same key image is acceptable again
    let mut ctx = TxVerificationContext::default();
    assert!(harness.pool.add_transaction(tx, &mut ctx, false));
}

#[test]
fn zero_fee_fusion_transaction_is_accepted_and_scheduled_first() {
    let harness = harness();
    let currency = currency_params(Network::Regtest);
    assert!(currency.minimum_fee > 0);

    let fusion = spend_tx(&[1_000; 12], &[2_000, 10_000], b"fusion");
    assert_eq!(fusion.input_amount(), fusion.output_amount());

    let mut ctx = TxVerificationContext::default();
    assert!(harness.pool.add_transaction(fusion.clone(), &mut ctx, false));
    assert!(ctx.added_to_pool);
    assert!(ctx.should_be_relayed);

    let paying = paying_tx(5_000_000, b"rich");
    let mut ctx = TxVerificationContext::default();
    assert!(harness.pool.add_transaction(paying.clone(), &mut ctx, false));

    let (hashes, total_size, total_fee) =
        harness.pool.fill_block_template(currency.block_granted_full_reward_zone, 1_000_000, 0);
    // the fusion pass runs before the fee-priority pass
    assert_eq!(hashes.first(), Some(&fusion.hash()));
    assert!(hashes.contains(&paying.hash()));
    assert_eq!(total_fee, 5_000_000);
    assert!(total_size >= fusion.blob_size() + paying.blob_size());
}

#[test]
fn block_template_prefers_higher_fee_density_under_pressure() {
    let harness = harness();
    let rich = paying_tx(10_000_000, b"dense");
    let poor = paying_tx(1_500_000, b"sparse");

    let mut ctx = TxVerificationContext::default();
    assert!(harness.pool.add_transaction(rich.clone(), &mut ctx, false));
    let mut ctx = TxVerificationContext::default();
    assert!(harness.pool.add_transaction(poor.clone(), &mut ctx, false));

    // budget admits exactly one of the two
    let budget = rich.blob_size();
    let (hashes, _, total_fee) = harness.pool.fill_block_template(20_000, budget, 0);
    assert_eq!(hashes, vec![rich.hash()]);
    assert_eq!(total_fee, 10_000_000);
}

#[test]
fn expired_transactions_are_evicted_and_remembered() {
    let harness = harness();
    let currency = currency_params(Network::Regtest);
    let events = harness.pool.subscribe_events();

    let tx = paying_tx(2_000_000, b"aging");
    let mut ctx = TxVerificationContext::default();
    assert!(harness.pool.add_transaction(tx.clone(), &mut ctx, false));

    harness.time.advance(currency.mempool_tx_live_time + 1);
    harness.pool.remove_expired_transactions();
    assert_eq!(harness.pool.transactions_count(), 0);
    assert_eq!(events.try_recv().unwrap(), PoolEvent::TransactionDeletedFromPool);

    // re-offering a recently deleted transaction is a silent no-op
    let mut ctx = TxVerificationContext::default();
    assert!(harness.pool.add_transaction(tx, &mut ctx, false));
    assert!(!ctx.added_to_pool);
    assert!(!ctx.should_be_relayed);
    assert!(!ctx.verification_failed);
    assert_eq!(harness.pool.transactions_count(), 0);
}

#[test]
fn kept_by_block_transactions_live_longer() {
    let harness = harness();
    let currency = currency_params(Network::Regtest);

    let tx = paying_tx(2_000_000, b"from-alt");
    let mut ctx = TxVerificationContext::default();
    assert!(harness.pool.add_transaction(tx, &mut ctx, true));

    harness.time.advance(currency.mempool_tx_live_time + 1);
    harness.pool.remove_expired_transactions();
    assert_eq!(harness.pool.transactions_count(), 1);

    harness.time.advance(currency.mempool_tx_from_alt_block_live_time);
    harness.pool.remove_expired_transactions();
    assert_eq!(harness.pool.transactions_count(), 0);
}

#[test]
fn pool_difference_reports_new_and_deleted() {
    let harness = harness();
    let tx1 = paying_tx(2_000_000, b"one");
    let tx2 = paying_tx(3_000_000, b"two");

    let mut ctx = TxVerificationContext::default();
    assert!(harness.pool.add_transaction(tx1.clone(), &mut ctx, false));
    let mut ctx = TxVerificationContext::default();
    assert!(harness.pool.add_transaction(tx2.clone(), &mut ctx, false));

    let phantom = obol_crypto::fast_hash(b"phantom");
    let (new_ids, deleted_ids) = harness.pool.get_difference(&[tx1.hash(), phantom]);
    assert_eq!(new_ids, vec![tx2.hash()]);
    assert_eq!(deleted_ids, vec![phantom]);
}

#[test]
fn payment_id_and_receive_time_queries() {
    let harness = harness();
    let payment_id = obol_crypto::fast_hash(b"invoice-7");

    let mut tx = paying_tx(2_000_000, b"tagged");
    obol_primitives::extra::add_payment_id(&mut tx.prefix.extra, &payment_id);
    let mut ctx = TxVerificationContext::default();
    assert!(harness.pool.add_transaction(tx.clone(), &mut ctx, false));

    let plain = paying_tx(2_000_000, b"plain");
    let mut ctx = TxVerificationContext::default();
    harness.time.advance(100);
    assert!(harness.pool.add_transaction(plain.clone(), &mut ctx, false));

    assert_eq!(
        harness.pool.get_transaction_ids_by_payment_id(&payment_id),
        vec![tx.hash()]
    );

    let (ids, total) =
        harness.pool.get_transaction_ids_by_timestamp(1_700_000_000, 1_700_000_050, 10);
    assert_eq!(total, 1);
    assert_eq!(ids, vec![tx.hash()]);

    harness.pool.take_transaction(&tx.hash()).unwrap();
    assert!(harness.pool.get_transaction_ids_by_payment_id(&payment_id).is_empty());
}

#[test]
fn pool_state_survives_a_restart() {
    let harness = harness();
    let tx = paying_tx(2_000_000, b"persisted");
    let mut ctx = TxVerificationContext::default();
    assert!(harness.pool.add_transaction(tx.clone(), &mut ctx, false));
    harness.pool.deinit();

    let reloaded = Arc::new(TxMemoryPool::new(
        currency_params(Network::Regtest),
        harness.store.clone() as Arc<dyn BlobStore>,
        harness.time.clone(),
    ));
    let validator: Arc<dyn TransactionValidator> = Arc::new(AcceptAll);
    reloaded.set_validator(Arc::downgrade(&validator));
    reloaded.init();

    assert_eq!(reloaded.transactions_count(), 1);
    assert!(reloaded.have_transaction(&tx.hash()));

    // a conflicting spend is still rejected after the reload
    let mut conflicting = tx.clone();
    conflicting.prefix.outputs.pop();
    let mut ctx = TxVerificationContext::default();
    assert!(!reloaded.add_transaction(conflicting, &mut ctx, false));
}

#[test]
fn version_mismatch_discards_the_pool() {
    let harness = harness();
    let tx = paying_tx(2_000_000, b"stale");
    let mut ctx = TxVerificationContext::default();
    assert!(harness.pool.add_transaction(tx, &mut ctx, false));
    harness.pool.deinit();

    let currency = currency_params(Network::Regtest);
    let mut blob = harness.store.load(currency.tx_pool_file_name).unwrap();
    blob[0] = 0xfe;
    harness.store.store(currency.tx_pool_file_name, &blob).unwrap();

    let reloaded = Arc::new(TxMemoryPool::new(
        currency,
        harness.store.clone() as Arc<dyn BlobStore>,
        harness.time.clone(),
    ));
    let validator: Arc<dyn TransactionValidator> = Arc::new(AcceptAll);
    reloaded.set_validator(Arc::downgrade(&validator));
    reloaded.init();
    assert_eq!(reloaded.transactions_count(), 0);
}
