//! Block model and identity hashing.

use obol_crypto::{fast_hash, Hash256};

use crate::encoding::{decode, Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::merkle::tree_hash;
use crate::transaction::Transaction;

pub const BLOCK_MAJOR_VERSION: u8 = 1;
pub const BLOCK_MINOR_VERSION: u8 = 0;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub major_version: u8,
    pub minor_version: u8,
    pub timestamp: u64,
    pub previous_block_hash: Hash256,
    pub nonce: u32,
}

impl Encodable for BlockHeader {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_u8(self.major_version);
        encoder.write_u8(self.minor_version);
        encoder.write_varint(self.timestamp);
        encoder.write_hash(&self.previous_block_hash);
        encoder.write_u32_le(self.nonce);
    }
}

impl Decodable for BlockHeader {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            major_version: decoder.read_u8()?,
            minor_version: decoder.read_u8()?,
            timestamp: decoder.read_varint()?,
            previous_block_hash: decoder.read_hash()?,
            nonce: decoder.read_u32_le()?,
        })
    }
}

/// Block: header, coinbase, and the hashes of the mined transactions
/// (bodies live in the chain's transaction store).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub base_transaction: Transaction,
    pub transaction_hashes: Vec<Hash256>,
}

impl Block {
    /// Blob the block identity and the proof-of-work are computed over:
    /// header, merkle root of all transactions, transaction count.
    pub fn hashing_blob(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        self.header.consensus_encode(&mut encoder);
        let mut hashes = Vec::with_capacity(1 + self.transaction_hashes.len());
        hashes.push(self.base_transaction.hash());
        hashes.extend_from_slice(&self.transaction_hashes);
        encoder.write_hash(&tree_hash(&hashes));
        encoder.write_varint(hashes.len() as u64);
        encoder.into_inner()
    }

    pub fn hash(&self) -> Hash256 {
        fast_hash(&self.hashing_blob())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        crate::encoding::encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        decode(bytes)
    }
}

impl Encodable for Block {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.header.consensus_encode(encoder);
        self.base_transaction.consensus_encode(encoder);
        encoder.write_varint(self.transaction_hashes.len() as u64);
        for hash in &self.transaction_hashes {
            encoder.write_hash(hash);
        }
    }
}

impl Decodable for Block {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let header = BlockHeader::consensus_decode(decoder)?;
        let base_transaction = Transaction::consensus_decode(decoder)?;
        let count = decoder.read_size()?;
        let mut transaction_hashes = Vec::with_capacity(count);
        for _ in 0..count {
            transaction_hashes.push(decoder.read_hash()?);
        }
        Ok(Self { header, base_transaction, transaction_hashes })
    }
}
