//! Staging set for block assembly: rejects candidates whose inputs
//! collide with transactions already picked for the same block.

use std::collections::{BTreeSet, HashSet};

use obol_crypto::{Hash256, KeyImage};
use obol_primitives::{Transaction, TransactionInput};

#[derive(Default)]
pub struct BlockTemplate {
    key_images: HashSet<KeyImage>,
    used_outputs: BTreeSet<(u64, u32)>,
    tx_hashes: Vec<Hash256>,
}

impl BlockTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_transaction(&mut self, id: &Hash256, tx: &Transaction) -> bool {
        if !self.can_add(tx) {
            return false;
        }
        for input in &tx.prefix.inputs {
            match input {
                TransactionInput::Key(key_input) => {
                    self.key_images.insert(key_input.key_image);
                }
                TransactionInput::Multisignature(ms) => {
                    self.used_outputs.insert((ms.amount, ms.output_index));
                }
                TransactionInput::Base(_) => {}
            }
        }
        self.tx_hashes.push(*id);
        true
    }

    pub fn transactions(&self) -> &[Hash256] {
        &self.tx_hashes
    }

    pub fn into_transactions(self) -> Vec<Hash256> {
        self.tx_hashes
    }

    fn can_add(&self, tx: &Transaction) -> bool {
        tx.prefix.inputs.iter().all(|input| match input {
            TransactionInput::Key(key_input) => !self.key_images.contains(&key_input.key_image),
            TransactionInput::Multisignature(ms) => {
                !self.used_outputs.contains(&(ms.amount, ms.output_index))
            }
            TransactionInput::Base(_) => true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obol_crypto::{generate_deterministic_keys, generate_key_image};
    use obol_primitives::{KeyInput, TransactionPrefix};

    fn tx_with_image(image: KeyImage) -> Transaction {
        Transaction {
            prefix: TransactionPrefix {
                version: 1,
                unlock_time: 0,
                inputs: vec![TransactionInput::Key(KeyInput {
                    amount: 100,
                    output_offsets: vec![0],
                    key_image: image,
                })],
                outputs: Vec::new(),
                extra: Vec::new(),
            },
            signatures: vec![Vec::new()],
        }
    }

    #[test]
    fn conflicting_key_images_are_rejected() {
        let keys = generate_deterministic_keys(b"spender");
        let image = generate_key_image(&keys.public, &keys.secret);
        let first = tx_with_image(image);
        let second = tx_with_image(image);

        let mut template = BlockTemplate::new();
        assert!(template.add_transaction(&first.hash(), &first));
        assert!(!template.add_transaction(&second.hash(), &second));
        assert_eq!(template.transactions().len(), 1);
    }
}
