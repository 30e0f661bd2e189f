//! Regtest chain scaffolding: builds valid blocks and ring-signed
//! spends against a live engine.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use obol_chain::{BlockTransactionPool, BlockVerificationContext, Blockchain};
use obol_crypto::{
    derive_public_key, derive_secret_key, generate_deterministic_account,
    generate_deterministic_keys, generate_key_derivation, generate_key_image,
    generate_ring_signature, AccountKeys, AccountPublicAddress, Hash256,
};
use obol_currency::miner::MAX_COINBASE_OUTPUTS;
use obol_currency::{currency_params, Currency, ManualTime, Network, TimeProvider};
use obol_primitives::block::{Block, BlockHeader, BLOCK_MAJOR_VERSION, BLOCK_MINOR_VERSION};
use obol_primitives::{
    absolute_output_offsets_to_relative, extra, KeyInput, Transaction, TransactionInput,
    TransactionOutput, TransactionOutputTarget, TransactionPrefix,
};
use obol_storage::MemoryBlobStore;

/// Minimal pool: enough for the engine to stage and reclaim block
/// bodies during pushes and reorgs.
#[derive(Default)]
pub struct StubPool {
    txs: Mutex<HashMap<Hash256, Transaction>>,
}

impl StubPool {
    pub fn insert(&self, tx: Transaction) {
        self.txs.lock().unwrap().insert(tx.hash(), tx);
    }

    pub fn contains(&self, id: &Hash256) -> bool {
        self.txs.lock().unwrap().contains_key(id)
    }
}

impl BlockTransactionPool for StubPool {
    fn take_for_block(&self, id: &Hash256) -> Option<(Transaction, usize, u64)> {
        let tx = self.txs.lock().unwrap().remove(id)?;
        let blob_size = tx.blob_size();
        let fee = tx.input_amount().saturating_sub(tx.output_amount());
        Some((tx, blob_size, fee))
    }

    fn return_from_block(&self, tx: Transaction) -> bool {
        self.txs.lock().unwrap().insert(tx.hash(), tx);
        true
    }

    fn get_transaction(&self, id: &Hash256) -> Option<Transaction> {
        self.txs.lock().unwrap().get(id).cloned()
    }
}

pub struct ChainHarness {
    pub currency: Currency,
    pub miner: AccountKeys,
    pub time: Arc<ManualTime>,
    pub store: Arc<MemoryBlobStore>,
    pub pool: Arc<StubPool>,
    pub chain: Arc<Blockchain>,
}

impl ChainHarness {
    pub fn new() -> Self {
        let currency = currency_params(Network::Regtest);
        let time = Arc::new(ManualTime::new(currency.genesis_timestamp));
        let store = Arc::new(MemoryBlobStore::new());
        let chain = Arc::new(Blockchain::new(currency.clone(), store.clone(), time.clone()));
        let pool = Arc::new(StubPool::default());
        let pool_handle: Arc<dyn BlockTransactionPool> = pool.clone();
        chain.set_transaction_pool(Arc::downgrade(&pool_handle));
        chain.init(false).expect("fresh chain init");
        Self {
            currency,
            miner: generate_deterministic_account(b"harness-miner"),
            time,
            store,
            pool,
            chain,
        }
    }

    pub fn block_timestamp(&self, height: u32) -> u64 {
        self.currency.genesis_timestamp + height as u64 * self.currency.difficulty_target
    }

    /// A valid next block over the current tail carrying `txs`.
    pub fn build_next_block(&self, txs: &[Transaction]) -> Block {
        self.build_block_on(self.chain.tail_id(), self.chain.height(), 0, txs)
    }

    /// A valid block claiming `height` whose parent is `parent` (which
    /// need not be the current tail; used to grow alternative chains).
    /// The nonce disambiguates competing blocks at one position.
    pub fn build_block_on(&self, parent: Hash256, height: u32, nonce: u32, txs: &[Transaction]) -> Block {
        let fee: u64 = txs
            .iter()
            .map(|tx| tx.input_amount().saturating_sub(tx.output_amount()))
            .sum();
        let generated = self.generated_before(height);
        let tx_keys = generate_deterministic_keys(
            &[
                b"harness-coinbase-".as_slice(),
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
            .expect("coinbase is constructible");
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

    fn generated_before(&self, height: u32) -> u64 {
        // emission already granted to the parent chain of `height`
        if height == self.chain.height() {
            self.chain.coins_in_circulation()
        } else {
            // alternative blocks reuse the emission of the main block
            // at the same height, which regtest keeps equal per height
            let mut generated = 0u64;
            for _ in 0..height {
                let (reward, _) = self.currency.block_reward(0, 0, generated, 0).expect("reward");
                generated += reward;
            }
            generated
        }
    }

    pub fn push(&self, block: &Block) -> BlockVerificationContext {
        self.time
            .set(block.header.timestamp.max(self.time.now()));
        let mut ctx = BlockVerificationContext::default();
        self.chain.add_new_block(block.clone(), &mut ctx);
        ctx
    }

    /// Extends the main chain by `count` coinbase-only blocks.
    pub fn grow(&self, count: u32) -> Vec<Block> {
        let mut blocks = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let block = self.build_next_block(&[]);
            let ctx = self.push(&block);
            assert!(ctx.added_to_main_chain, "harness block rejected");
            blocks.push(block);
        }
        blocks
    }

    /// Index of the largest coinbase output in the block at `height`.
    pub fn richest_output(&self, height: u32) -> usize {
        let block = &self.chain.get_blocks(height, 1)[0];
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

    /// A ring-signed transaction spending one coinbase output of the
    /// block at `source_height`, paying `dest` minus `fee`.
    pub fn build_spend_tx(
        &self,
        source_height: u32,
        output_index: usize,
        dest: &AccountPublicAddress,
        fee: u64,
        tag: &[u8],
    ) -> Transaction {
        let source = &self.chain.get_blocks(source_height, 1)[0];
        let coinbase = &source.base_transaction;
        let amount = coinbase.prefix.outputs[output_index].amount;

        let coinbase_public = coinbase.public_key().expect("coinbase carries its key");
        let derivation = generate_key_derivation(&coinbase_public, &self.miner.view_secret_key)
            .expect("derivation");
        let ephemeral_public =
            derive_public_key(&derivation, output_index as u32, &self.miner.address.spend_public_key);
        let ephemeral_secret =
            derive_secret_key(&derivation, output_index as u32, &self.miner.spend_secret_key);
        let key_image = generate_key_image(&ephemeral_public, &ephemeral_secret);

        let global_index = self
            .chain
            .get_transaction_global_indices(&coinbase.hash())
            .expect("committed coinbase")[output_index];
        let offsets =
            absolute_output_offsets_to_relative(&[global_index]).expect("single offset");

        let pay_keys = generate_deterministic_keys(&[b"harness-pay-".as_slice(), tag].concat());
        let pay_derivation =
            generate_key_derivation(&dest.view_public_key, &pay_keys.secret).expect("derivation");
        let out_key = derive_public_key(&pay_derivation, 0, &dest.spend_public_key);

        let mut extra_blob = Vec::new();
        extra::add_public_key(&mut extra_blob, &pay_keys.public);

        let prefix = TransactionPrefix {
            version: 1,
            unlock_time: 0,
            inputs: vec![TransactionInput::Key(KeyInput {
                amount,
                output_offsets: offsets,
                key_image,
            })],
            outputs: vec![TransactionOutput {
                amount: amount - fee,
                target: TransactionOutputTarget::Key(out_key),
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
        Transaction { prefix, signatures }
    }
}
