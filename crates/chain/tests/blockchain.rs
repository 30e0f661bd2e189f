mod support;

use std::sync::Arc;

use obol_chain::{BlockInfo, Blockchain, BlockchainMessage, TransactionValidator};
use obol_crypto::generate_deterministic_account;
use obol_currency::TimeProvider;
use support::ChainHarness;

#[test]
fn three_block_chain_has_expected_shape() {
    let harness = ChainHarness::new();
    let blocks = harness.grow(2);

    assert_eq!(harness.chain.height(), 3);
    assert_eq!(harness.chain.tail_id(), blocks[1].hash());
    assert!(harness.chain.is_block_in_main_chain(&blocks[0].hash()));

    let sparse = harness.chain.build_sparse_chain();
    assert_eq!(sparse.first(), Some(&blocks[1].hash()));
    assert_eq!(
        sparse.last(),
        harness.chain.block_id_by_height(0).as_ref()
    );
    assert!(sparse.len() <= 3);
}

#[test]
fn wrong_coinbase_reward_is_rejected() {
    let harness = ChainHarness::new();
    harness.grow(1);

    // overpaying coinbase: claim a fee no transaction paid
    let mut block = harness.build_next_block(&[]);
    let greedy = harness.build_block_on(harness.chain.tail_id(), harness.chain.height(), 7, &[]);
    block.base_transaction = harness
        .currency
        .construct_miner_tx(
            harness.chain.height(),
            0,
            harness.chain.coins_in_circulation(),
            0,
            1_000_000,
            &harness.miner.address,
            &obol_crypto::generate_deterministic_keys(b"greedy"),
            obol_currency::miner::MAX_COINBASE_OUTPUTS,
        )
        .unwrap();
    let ctx = harness.push(&block);
    assert!(ctx.verification_failed);
    assert!(!ctx.added_to_main_chain);

    // the honest competitor still lands
    let ctx = harness.push(&greedy);
    assert!(ctx.added_to_main_chain);
}

#[test]
fn stale_timestamp_is_rejected() {
    let harness = ChainHarness::new();
    harness.grow(12);

    let mut block = harness.build_next_block(&[]);
    block.header.timestamp = harness.currency.genesis_timestamp;
    let ctx = harness.push(&block);
    assert!(ctx.verification_failed);
    assert_eq!(harness.chain.height(), 13);
}

#[test]
fn far_future_timestamp_is_rejected() {
    let harness = ChainHarness::new();
    harness.grow(2);

    let mut block = harness.build_next_block(&[]);
    block.header.timestamp = harness.time.now() + harness.currency.block_future_time_limit + 60;
    let mut ctx = obol_chain::BlockVerificationContext::default();
    harness.chain.add_new_block(block, &mut ctx);
    assert!(ctx.verification_failed);
}

#[test]
fn spend_requires_coinbase_maturity() {
    let harness = ChainHarness::new();
    harness.grow(1); // coinbase to spend lives at height 1

    let recipient = generate_deterministic_account(b"recipient");
    let source = harness.richest_output(1);
    let tx = harness.build_spend_tx(1, source, &recipient.address, 1_000_000, b"early");

    // unlock window (4) not yet satisfied at height 2
    let mut max_used = BlockInfo::default();
    assert!(!harness.chain.check_transaction_inputs(&tx, &mut max_used));

    harness.grow(4);
    let mut max_used = BlockInfo::default();
    assert!(harness.chain.check_transaction_inputs(&tx, &mut max_used));
    assert_eq!(max_used.height, 1);
    assert_eq!(max_used.id, harness.chain.block_id_by_height(1).unwrap());
}

#[test]
fn committed_key_image_rejects_a_second_spend() {
    let harness = ChainHarness::new();
    harness.grow(5);

    let recipient = generate_deterministic_account(b"first-dest");
    let other = generate_deterministic_account(b"second-dest");
    let source = harness.richest_output(1);
    let spend = harness.build_spend_tx(1, source, &recipient.address, 1_000_000, b"spend");
    let double = harness.build_spend_tx(1, source, &other.address, 1_000_000, b"double");

    harness.pool.insert(spend.clone());
    let block = harness.build_next_block(&[spend.clone()]);
    let ctx = harness.push(&block);
    assert!(ctx.added_to_main_chain);
    assert!(harness.chain.have_transaction(&spend.hash()));

    // same key image, different payload
    let mut max_used = BlockInfo::default();
    assert!(!harness.chain.check_transaction_inputs(&double, &mut max_used));
    assert!(harness.chain.have_spent_key_images(&double));

    // a block smuggling the double spend is rejected wholesale
    harness.pool.insert(double.clone());
    let bad_block = harness.build_next_block(&[double.clone()]);
    let ctx = harness.push(&bad_block);
    assert!(ctx.verification_failed);
    // the body is handed back for a later retry
    assert!(harness.pool.contains(&double.hash()));
}

#[test]
fn pop_restores_global_output_indices_exactly() {
    let harness = ChainHarness::new();
    harness.grow(5);

    let recipient = generate_deterministic_account(b"pop-dest");
    let spend = harness.build_spend_tx(2, harness.richest_output(2), &recipient.address, 1_000_000, b"pop");
    harness.pool.insert(spend.clone());
    let block = harness.build_next_block(&[spend.clone()]);
    assert!(harness.push(&block).added_to_main_chain);

    let indices_before = harness.chain.get_transaction_global_indices(&spend.hash()).unwrap();
    let height_before = harness.chain.height();

    let removed = harness.chain.rollback_to(height_before - 2);
    assert_eq!(removed, vec![block.hash()]);
    assert!(!harness.chain.have_transaction(&spend.hash()));
    assert!(harness.pool.contains(&spend.hash()));

    // push-then-pop left the registries identical: the same block
    // commits again with the same indices
    assert!(harness.push(&block).added_to_main_chain);
    assert_eq!(
        harness.chain.get_transaction_global_indices(&spend.hash()).unwrap(),
        indices_before
    );
    assert_eq!(harness.chain.height(), height_before);
}

#[test]
fn heavier_alternative_chain_triggers_a_switch() {
    let harness = ChainHarness::new();
    let messages = harness.chain.subscribe_messages();
    harness.grow(5);
    while messages.try_recv().is_ok() {}

    let fork_parent = harness.chain.block_id_by_height(4).unwrap();
    let main_tip = harness.chain.tail_id();

    let alt1 = harness.build_block_on(fork_parent, 5, 0xa1, &[]);
    let ctx = harness.push(&alt1);
    assert!(!ctx.added_to_main_chain);
    assert!(!ctx.verification_failed);
    assert_eq!(harness.chain.tail_id(), main_tip);
    assert_eq!(
        messages.try_recv().unwrap(),
        BlockchainMessage::NewAlternativeBlock(alt1.hash())
    );
    assert_eq!(harness.chain.alternative_blocks_count(), 1);
    assert_eq!(
        harness.chain.get_orphan_block_ids_by_height(5),
        vec![alt1.hash()]
    );

    // the second alternative block out-weighs the main tip
    let alt2 = harness.build_block_on(alt1.hash(), 6, 0xa2, &[]);
    let ctx = harness.push(&alt2);
    assert!(ctx.added_to_main_chain);
    assert!(ctx.switched_to_alt_chain);
    assert_eq!(harness.chain.tail_id(), alt2.hash());
    assert_eq!(harness.chain.height(), 7);

    assert_eq!(
        messages.try_recv().unwrap(),
        BlockchainMessage::ChainSwitch(vec![fork_parent, alt1.hash(), alt2.hash()])
    );

    // the abandoned tip is retained as an alternative block
    assert!(harness.chain.have_block(&main_tip));
    assert!(!harness.chain.is_block_in_main_chain(&main_tip));
}

#[test]
fn block_at_checkpoint_height_must_match() {
    let harness = ChainHarness::new();
    harness.grow(2);

    let honest = harness.build_next_block(&[]);
    harness.chain.checkpoints_add(3, honest.hash());

    let imposter = harness.build_block_on(harness.chain.tail_id(), 3, 9, &[]);
    let ctx = harness.push(&imposter);
    assert!(ctx.verification_failed);

    let ctx = harness.push(&honest);
    assert!(ctx.added_to_main_chain);
}

#[test]
fn random_outs_respect_the_unlock_window() {
    let harness = ChainHarness::new();
    harness.grow(2);

    let young = &harness.chain.get_blocks(2, 1)[0];
    let amount = young.base_transaction.prefix.outputs[0].amount;

    // nothing is deep enough yet for that amount
    let outs = harness.chain.get_random_outs_by_amounts(&[amount], 10);
    assert_eq!(outs.len(), 1);
    assert!(outs[0].outs.is_empty());

    harness.grow(5);
    let outs = harness.chain.get_random_outs_by_amounts(&[amount], 10);
    assert!(!outs[0].outs.is_empty());
    let mut indices: Vec<u32> = outs[0].outs.iter().map(|o| o.global_index).collect();
    let before = indices.len();
    indices.sort_unstable();
    indices.dedup();
    assert_eq!(indices.len(), before, "sampled decoys must be unique");
}

#[test]
fn chain_state_survives_restart_and_rebuilds_stale_caches() {
    let harness = ChainHarness::new();
    harness.grow(4);
    let tail = harness.chain.tail_id();
    let height = harness.chain.height();
    harness.chain.deinit();

    let reloaded = Blockchain::new(
        harness.currency.clone(),
        harness.store.clone() as Arc<dyn obol_storage::BlobStore>,
        harness.time.clone(),
    );
    reloaded.init(true).unwrap();
    assert_eq!(reloaded.height(), height);
    assert_eq!(reloaded.tail_id(), tail);

    // a corrupt cache blob forces a rebuild from the block sequence
    use obol_storage::BlobStore as _;
    harness
        .store
        .store(harness.currency.blocks_cache_file_name, b"garbage")
        .unwrap();
    let rebuilt = Blockchain::new(
        harness.currency.clone(),
        harness.store.clone() as Arc<dyn obol_storage::BlobStore>,
        harness.time.clone(),
    );
    rebuilt.init(true).unwrap();
    assert_eq!(rebuilt.height(), height);
    assert_eq!(rebuilt.tail_id(), tail);
    assert_eq!(
        rebuilt.get_transaction_global_indices(
            &harness.chain.get_blocks(1, 1)[0].base_transaction.hash()
        ),
        harness.chain.get_transaction_global_indices(
            &harness.chain.get_blocks(1, 1)[0].base_transaction.hash()
        )
    );
}

#[test]
fn memoized_input_checks_survive_only_on_the_same_chain() {
    let harness = ChainHarness::new();
    harness.grow(5);

    let recipient = generate_deterministic_account(b"memo-dest");
    let tx = harness.build_spend_tx(1, harness.richest_output(1), &recipient.address, 1_000_000, b"memo");

    let mut max_used = BlockInfo::default();
    let mut last_failed = BlockInfo::default();
    assert!(harness
        .chain
        .check_transaction_inputs_cached(&tx, &mut max_used, &mut last_failed));
    assert!(!max_used.is_empty());

    // memo still valid while the referenced block is in place
    assert!(harness
        .chain
        .check_transaction_inputs_cached(&tx, &mut max_used, &mut last_failed));

    // rewinding past the referenced block invalidates the memo
    harness.chain.rollback_to(0);
    assert!(!harness
        .chain
        .check_transaction_inputs_cached(&tx, &mut max_used, &mut last_failed));
}
