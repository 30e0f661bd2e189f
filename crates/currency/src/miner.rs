//! Coinbase construction and the genesis block.

use obol_crypto::{
    derive_public_key, generate_deterministic_account, generate_deterministic_keys,
    generate_key_derivation, AccountPublicAddress, KeyPair, NULL_HASH,
};
use obol_primitives::block::{Block, BlockHeader, BLOCK_MAJOR_VERSION, BLOCK_MINOR_VERSION};
use obol_primitives::extra;
use obol_primitives::{
    BaseInput, Transaction, TransactionInput, TransactionOutput, TransactionOutputTarget,
    TransactionPrefix,
};

use crate::fusion::decompose_amount;
use crate::params::Currency;

pub const MAX_COINBASE_OUTPUTS: usize = 10;

impl Currency {
    /// Builds the coinbase for a block at `height`, paying the exact
    /// computed reward to `recipient` in decomposed chunks. Returns
    /// `None` when the block size disqualifies any reward.
    #[allow(clippy::too_many_arguments)]
    pub fn construct_miner_tx(
        &self,
        height: u32,
        median_size: usize,
        already_generated_coins: u64,
        current_block_size: usize,
        fee: u64,
        recipient: &AccountPublicAddress,
        tx_keys: &KeyPair,
        max_outs: usize,
    ) -> Option<Transaction> {
        let (reward, _) =
            self.block_reward(median_size, current_block_size, already_generated_coins, fee)?;

        let mut amounts = decompose_amount(reward);
        while amounts.len() > max_outs.max(1) {
            // fold the two smallest chunks together; the result may no
            // longer be a single digit chunk, which is fine for coinbase
            let merged = amounts.remove(0) + amounts[0];
            amounts[0] = merged;
        }

        let derivation = generate_key_derivation(&recipient.view_public_key, &tx_keys.secret)?;
        let outputs = amounts
            .iter()
            .enumerate()
            .map(|(index, amount)| TransactionOutput {
                amount: *amount,
                target: TransactionOutputTarget::Key(derive_public_key(
                    &derivation,
                    index as u32,
                    &recipient.spend_public_key,
                )),
            })
            .collect();

        let mut extra_blob = Vec::with_capacity(33);
        extra::add_public_key(&mut extra_blob, &tx_keys.public);

        Some(Transaction {
            prefix: TransactionPrefix {
                version: obol_primitives::transaction::TRANSACTION_VERSION,
                unlock_time: height as u64 + self.mined_money_unlock_window as u64,
                inputs: vec![TransactionInput::Base(BaseInput { block_index: height })],
                outputs,
                extra: extra_blob,
            },
            signatures: vec![Vec::new()],
        })
    }

    /// Deterministic genesis block for this network.
    pub fn genesis_block(&self) -> Block {
        let tx_keys = generate_deterministic_keys(b"obol.genesis.tx");
        let recipient = generate_deterministic_account(b"obol.genesis.reward");
        let base_transaction = self
            .construct_miner_tx(0, 0, 0, 0, 0, &recipient.address, &tx_keys, MAX_COINBASE_OUTPUTS)
            .expect("genesis coinbase is always constructible");
        Block {
            header: BlockHeader {
                major_version: BLOCK_MAJOR_VERSION,
                minor_version: BLOCK_MINOR_VERSION,
                timestamp: self.genesis_timestamp,
                previous_block_hash: NULL_HASH,
                nonce: 0,
            },
            base_transaction,
            transaction_hashes: Vec::new(),
        }
    }
}
