//! Consensus data model: binary codec, transactions, blocks.

pub mod block;
pub mod encoding;
pub mod extra;
pub mod merkle;
pub mod transaction;

pub use block::{Block, BlockHeader};
pub use encoding::{decode, encode, Decodable, DecodeError, Decoder, Encodable, Encoder};
pub use transaction::{
    absolute_output_offsets_to_relative, relative_output_offsets_to_absolute, BaseInput, KeyInput,
    MultisignatureInput, MultisignatureOutput, Transaction, TransactionInput, TransactionOutput,
    TransactionOutputTarget, TransactionPrefix,
};
