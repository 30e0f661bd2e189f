//! Fusion-transaction policy: zero-fee consolidation of many small
//! outputs into the canonical decomposition of their sum.

use obol_primitives::{Transaction, TransactionInput};

use crate::params::Currency;

/// Splits an amount into its non-zero decimal digit chunks, smallest
/// first (e.g. 12_300 -> [300, 2_000, 10_000]).
pub fn decompose_amount(mut amount: u64) -> Vec<u64> {
    let mut chunks = Vec::new();
    let mut magnitude = 1u64;
    while amount > 0 {
        let digit = amount % 10;
        if digit != 0 {
            chunks.push(digit * magnitude);
        }
        amount /= 10;
        magnitude = magnitude.saturating_mul(10);
    }
    chunks
}

impl Currency {
    pub fn is_fusion_transaction(&self, tx: &Transaction, blob_size: usize) -> bool {
        let input_amounts: Vec<u64> = tx
            .prefix
            .inputs
            .iter()
            .filter_map(|input| match input {
                TransactionInput::Base(_) => None,
                other => Some(other.amount()),
            })
            .collect();
        let output_amounts: Vec<u64> = tx.prefix.outputs.iter().map(|out| out.amount).collect();
        self.is_fusion_amounts(&input_amounts, &output_amounts, blob_size)
    }

    pub fn is_fusion_amounts(
        &self,
        input_amounts: &[u64],
        output_amounts: &[u64],
        blob_size: usize,
    ) -> bool {
        if blob_size > self.fusion_tx_max_size {
            return false;
        }
        if input_amounts.len() < self.fusion_tx_min_input_count {
            return false;
        }
        if input_amounts.len() < output_amounts.len() * self.fusion_tx_min_in_out_count_ratio {
            return false;
        }

        let mut total: u64 = 0;
        for amount in input_amounts {
            match total.checked_add(*amount) {
                Some(sum) => total = sum,
                None => return false,
            }
        }

        let mut expected = decompose_amount(total);
        expected.sort_unstable();
        let mut actual = output_amounts.to_vec();
        actual.sort_unstable();
        expected == actual
    }
}
