//! Regtest core scaffolding for end-to-end tests: a live core plus
//! helpers to mint blocks and ring-signed payments.

use std::sync::Arc;
use std::time::{Duration, Instant};

use obol_chain::BlockVerificationContext;
use obol_crypto::{
    derive_public_key, derive_secret_key, generate_deterministic_account,
    generate_deterministic_keys, generate_key_derivation, generate_key_image,
    generate_ring_signature, AccountKeys, AccountPublicAddress, Hash256, KeyImage, PublicKey,
};
use obol_currency::miner::MAX_COINBASE_OUTPUTS;
use obol_currency::{currency_params, Currency, ManualTime, Network, TimeProvider};
use obol_node::Core;
use obol_primitives::block::{Block, BlockHeader, BLOCK_MAJOR_VERSION, BLOCK_MINOR_VERSION};
use obol_primitives::{
    absolute_output_offsets_to_relative, extra, KeyInput, Transaction, TransactionInput,
    TransactionOutput, TransactionOutputTarget, TransactionPrefix,
};
use obol_storage::{BlobStore, MemoryBlobStore};

pub struct NodeHarness {
    pub currency: Currency,
    pub miner: AccountKeys,
    pub time: Arc<ManualTime>,
    pub core: Arc<Core>,
}

impl NodeHarness {
    pub fn new() -> Self {
        let currency = currency_params(Network::Regtest);
        let time = Arc::new(ManualTime::new(currency.genesis_timestamp));
        let store = Arc::new(MemoryBlobStore::new()) as Arc<dyn BlobStore>;
        let core = Arc::new(Core::new(currency.clone(), store, time.clone()));
        core.init(false).expect("core init");
        Self { currency, miner: generate_deterministic_account(b"node-miner"), time, core }
    }

    pub fn block_timestamp(&self, height: u32) -> u64 {
        self.currency.genesis_timestamp + height as u64 * self.currency.difficulty_target
    }

    pub fn build_block_on(&self, parent: Hash256, height: u32, nonce: u32, txs: &[Transaction]) -> Block {
        let fee: u64 = txs
            .iter()
            .map(|tx| tx.input_amount().saturating_sub(tx.output_amount()))
            .sum();
        let mut generated = 0u64;
        for _ in 0..height {
            let (reward, _) = self.currency.block_reward(0, 0, generated, 0).expect("reward");
            generated += reward;
        }
        let tx_keys = generate_deterministic_keys(
            &[
                b"node-coinbase-".as_slice(),
                &height.to_le_bytes(),
                &nonce.to_le_bytes(),
                parent.as_slice(),
            ]
            .concat(),
        );
        let base_transaction = self
            .currency
            .construct_miner_tx(
                height,
                0,
                generated,
                0,
                fee,
                &self.miner.address,
                &tx_keys,
                MAX_COINBASE_OUTPUTS,
            )
            .expect("coinbase");
        Block {
            header: BlockHeader {
                major_version: BLOCK_MAJOR_VERSION,
                minor_version: BLOCK_MINOR_VERSION,
                timestamp: self.block_timestamp(height),
                previous_block_hash: parent,
                nonce,
            },
            base_transaction,
            transaction_hashes: txs.iter().map(|tx| tx.hash()).collect(),
        }
    }

    pub fn build_next_block(&self, txs: &[Transaction]) -> Block {
        self.build_block_on(self.core.blockchain.tail_id(), self.core.blockchain.height(), 0, txs)
    }

    pub fn push(&self, block: Block, txs: Vec<Transaction>) -> BlockVerificationContext {
        self.time.set(block.header.timestamp.max(self.time.now()));
        self.core.handle_incoming_block(block, txs)
    }

    pub fn grow(&self, count: u32) -> Vec<Block> {
        let mut blocks = Vec::new();
        for _ in 0..count {
            let block = self.build_next_block(&[]);
            let ctx = self.push(block.clone(), Vec::new());
            assert!(ctx.added_to_main_chain, "harness block rejected");
            blocks.push(block);
        }
        blocks
    }

    pub fn richest_output(&self, height: u32) -> usize {
        let block = &self.core.blockchain.get_blocks(height, 1)[0];
        block
            .base_transaction
            .prefix
            .outputs
            .iter()
            .enumerate()
            .max_by_key(|(_, out)| out.amount)
            .map(|(index, _)| index)
            .expect("coinbase has outputs")
    }

    /// Spends one miner coinbase output across `recipients`, change
    /// back to the miner, paying `fee`.
    pub fn build_payment_tx(
        &self,
        source_height: u32,
        output_index: usize,
        recipients: &[(AccountPublicAddress, u64)],
        fee: u64,
        tag: &[u8],
    ) -> Transaction {
        let source = &self.core.blockchain.get_blocks(source_height, 1)[0];
        let coinbase = &source.base_transaction;
        let amount = coinbase.prefix.outputs[output_index].amount;
        let paid: u64 = recipients.iter().map(|(_, value)| value).sum();
        assert!(amount >= paid + fee, "source output cannot cover the payment");

        let coinbase_public = coinbase.public_key().expect("coinbase key");
        let derivation = generate_key_derivation(&coinbase_public, &self.miner.view_secret_key)
            .expect("derivation");
        let ephemeral_public =
            derive_public_key(&derivation, output_index as u32, &self.miner.address.spend_public_key);
        let ephemeral_secret =
            derive_secret_key(&derivation, output_index as u32, &self.miner.spend_secret_key);
        let key_image = generate_key_image(&ephemeral_public, &ephemeral_secret);

        let global_index = self
            .core
            .blockchain
            .get_transaction_global_indices(&coinbase.hash())
            .expect("committed coinbase")[output_index];
        let offsets = absolute_output_offsets_to_relative(&[global_index]).expect("offsets");

        let tx_keys = generate_deterministic_keys(&[b"node-pay-".as_slice(), tag].concat());
        let mut outputs = Vec::new();
        for (position, (recipient, value)) in recipients.iter().enumerate() {
            let pay_derivation =
                generate_key_derivation(&recipient.view_public_key, &tx_keys.secret)
                    .expect("derivation");
            outputs.push(TransactionOutput {
                amount: *value,
                target: TransactionOutputTarget::Key(derive_public_key(
                    &pay_derivation,
                    position as u32,
                    &recipient.spend_public_key,
                )),
            });
        }
        let change = amount - paid - fee;
        if change > 0 {
            let change_derivation =
                generate_key_derivation(&self.miner.address.view_public_key, &tx_keys.secret)
                    .expect("derivation");
            outputs.push(TransactionOutput {
                amount: change,
                target: TransactionOutputTarget::Key(derive_public_key(
                    &change_derivation,
                    recipients.len() as u32,
                    &self.miner.address.spend_public_key,
                )),
            });
        }

        let mut extra_blob = Vec::new();
        extra::add_public_key(&mut extra_blob, &tx_keys.public);

        let prefix = TransactionPrefix {
            version: 1,
            unlock_time: 0,
            inputs: vec![TransactionInput::Key(KeyInput { amount, output_offsets: offsets, key_image })],
            outputs,
            extra: extra_blob,
        };
        let prefix_hash = prefix.hash();
        let signatures = vec![generate_ring_signature(
            &prefix_hash,
            &key_image,
            &[ephemeral_public],
            &ephemeral_secret,
            0,
        )];
        Transaction { prefix, signatures }
    }

    /// Spends an output owned by `owner` (as recorded by a wallet
    /// container), paying everything minus `fee` back to the miner.
    pub fn build_wallet_spend_tx(
        &self,
        owner: &AccountKeys,
        source_tx_public: &PublicKey,
        source_output_index: u32,
        amount: u64,
        global_index: u32,
        fee: u64,
        tag: &[u8],
    ) -> (Transaction, KeyImage) {
        let derivation = generate_key_derivation(source_tx_public, &owner.view_secret_key)
            .expect("derivation");
        let ephemeral_public =
            derive_public_key(&derivation, source_output_index, &owner.address.spend_public_key);
        let ephemeral_secret =
            derive_secret_key(&derivation, source_output_index, &owner.spend_secret_key);
        let key_image = generate_key_image(&ephemeral_public, &ephemeral_secret);

        let offsets = absolute_output_offsets_to_relative(&[global_index]).expect("offsets");
        let tx_keys = generate_deterministic_keys(&[b"wallet-spend-".as_slice(), tag].concat());
        let pay_derivation =
            generate_key_derivation(&self.miner.address.view_public_key, &tx_keys.secret)
                .expect("derivation");

        let mut extra_blob = Vec::new();
        extra::add_public_key(&mut extra_blob, &tx_keys.public);

        let prefix = TransactionPrefix {
            version: 1,
            unlock_time: 0,
            inputs: vec![TransactionInput::Key(KeyInput { amount, output_offsets: offsets, key_image })],
            outputs: vec![TransactionOutput {
                amount: amount - fee,
                target: TransactionOutputTarget::Key(derive_public_key(
                    &pay_derivation,
                    0,
                    &self.miner.address.spend_public_key,
                )),
            }],
            extra: extra_blob,
        };
        let prefix_hash = prefix.hash();
        let signatures = vec![generate_ring_signature(
            &prefix_hash,
            &key_image,
            &[ephemeral_public],
            &ephemeral_secret,
            0,
        )];
        (Transaction { prefix, signatures }, key_image)
    }
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}
