//! Wallet-side views of transactions and their outputs.

use obol_crypto::{AccountKeys, Hash256, KeyImage, PublicKey, NULL_HASH, NULL_PUBLIC_KEY};
use obol_primitives::{Decodable, DecodeError, Decoder, Encodable, Encoder};

pub use obol_currency::constants::{
    UNCONFIRMED_TRANSACTION_GLOBAL_OUTPUT_INDEX as UNCONFIRMED_GLOBAL_OUTPUT_INDEX,
    UNCONFIRMED_TRANSACTION_HEIGHT as UNCONFIRMED_HEIGHT,
};

/// Where a transaction was observed: a block position, or the
/// unconfirmed sentinel for pool arrivals.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransactionBlockInfo {
    pub height: u32,
    pub timestamp: u64,
    pub transaction_index: u32,
}

impl TransactionBlockInfo {
    pub fn unconfirmed() -> Self {
        Self { height: UNCONFIRMED_HEIGHT, timestamp: 0, transaction_index: 0 }
    }

    pub fn is_confirmed(&self) -> bool {
        self.height != UNCONFIRMED_HEIGHT
    }
}

/// Type-specific payload of an owned output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputData {
    Key { output_key: PublicKey, key_image: KeyImage },
    Multisignature { required_signatures: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransactionOutputInformation {
    pub amount: u64,
    pub global_output_index: u32,
    pub output_in_transaction: u32,
    pub transaction_hash: Hash256,
    pub transaction_public_key: PublicKey,
    pub data: OutputData,
}

impl TransactionOutputInformation {
    pub fn is_key_output(&self) -> bool {
        matches!(self.data, OutputData::Key { .. })
    }

    pub fn descriptor(&self) -> SpentOutputDescriptor {
        match self.data {
            OutputData::Key { key_image, .. } => SpentOutputDescriptor::KeyImage(key_image),
            OutputData::Multisignature { .. } => {
                SpentOutputDescriptor::AmountGlobalIndex(self.amount, self.global_output_index)
            }
        }
    }
}

/// How a spent output is recognized later: key outputs by key image,
/// multisignature outputs by `(amount, global index)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SpentOutputDescriptor {
    KeyImage(KeyImage),
    AmountGlobalIndex(u64, u32),
}

/// An owned output plus its container bookkeeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferRecord {
    pub output: TransactionOutputInformation,
    pub unlock_time: u64,
    pub block_height: u32,
    pub transaction_index: u32,
    pub visible: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpentTransferRecord {
    pub record: TransferRecord,
    pub spending_block: TransactionBlockInfo,
    pub spending_transaction_hash: Hash256,
    pub input_in_transaction: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionInformation {
    pub transaction_hash: Hash256,
    pub public_key: PublicKey,
    pub block_height: u32,
    pub timestamp: u64,
    pub unlock_time: u64,
    pub total_amount_in: u64,
    pub total_amount_out: u64,
    pub extra: Vec<u8>,
    pub payment_id: Option<Hash256>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SynchronizationStart {
    pub timestamp: u64,
    pub height: u64,
}

/// One wallet account offered for synchronization.
#[derive(Clone, Debug)]
pub struct AccountSubscription {
    pub keys: AccountKeys,
    pub sync_start: SynchronizationStart,
    pub transaction_spendable_age: u32,
}

/// Balance/listing filters: a state selector and a type selector,
/// combined by OR within each group and AND across groups.
pub mod flags {
    pub const INCLUDE_STATE_UNLOCKED: u32 = 0x01;
    pub const INCLUDE_STATE_LOCKED: u32 = 0x02;
    pub const INCLUDE_STATE_SOFT_LOCKED: u32 = 0x04;
    pub const INCLUDE_STATE_SPENT: u32 = 0x08;

    pub const INCLUDE_TYPE_KEY: u32 = 0x100;
    pub const INCLUDE_TYPE_MULTISIGNATURE: u32 = 0x200;

    pub const INCLUDE_STATE_ALL: u32 = 0xff;
    pub const INCLUDE_TYPE_ALL: u32 = 0xff00;

    pub const INCLUDE_KEY_UNLOCKED: u32 = INCLUDE_TYPE_KEY | INCLUDE_STATE_UNLOCKED;
    pub const INCLUDE_KEY_NOT_UNLOCKED: u32 =
        INCLUDE_TYPE_KEY | INCLUDE_STATE_LOCKED | INCLUDE_STATE_SOFT_LOCKED;

    pub const INCLUDE_ALL_LOCKED: u32 =
        INCLUDE_TYPE_ALL | INCLUDE_STATE_LOCKED | INCLUDE_STATE_SOFT_LOCKED;
    pub const INCLUDE_ALL_UNLOCKED: u32 = INCLUDE_TYPE_ALL | INCLUDE_STATE_UNLOCKED;
    pub const INCLUDE_ALL: u32 = INCLUDE_TYPE_ALL | INCLUDE_STATE_ALL;

    pub const INCLUDE_DEFAULT: u32 = INCLUDE_KEY_UNLOCKED;
}

impl Encodable for TransactionOutputInformation {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_varint(self.amount);
        encoder.write_u32_le(self.global_output_index);
        encoder.write_u32_le(self.output_in_transaction);
        encoder.write_hash(&self.transaction_hash);
        encoder.write_public_key(&self.transaction_public_key);
        match &self.data {
            OutputData::Key { output_key, key_image } => {
                encoder.write_u8(0);
                encoder.write_public_key(output_key);
                encoder.write_key_image(key_image);
            }
            OutputData::Multisignature { required_signatures } => {
                encoder.write_u8(1);
                encoder.write_u32_le(*required_signatures);
            }
        }
    }
}

impl Decodable for TransactionOutputInformation {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let amount = decoder.read_varint()?;
        let global_output_index = decoder.read_u32_le()?;
        let output_in_transaction = decoder.read_u32_le()?;
        let transaction_hash = decoder.read_hash()?;
        let transaction_public_key = decoder.read_public_key()?;
        let data = match decoder.read_u8()? {
            0 => OutputData::Key {
                output_key: decoder.read_public_key()?,
                key_image: decoder.read_key_image()?,
            },
            1 => OutputData::Multisignature { required_signatures: decoder.read_u32_le()? },
            _ => return Err(DecodeError::InvalidData("unknown output data tag")),
        };
        Ok(Self {
            amount,
            global_output_index,
            output_in_transaction,
            transaction_hash,
            transaction_public_key,
            data,
        })
    }
}

impl Encodable for TransferRecord {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.output.consensus_encode(encoder);
        encoder.write_varint(self.unlock_time);
        encoder.write_u32_le(self.block_height);
        encoder.write_u32_le(self.transaction_index);
        encoder.write_bool(self.visible);
    }
}

impl Decodable for TransferRecord {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            output: TransactionOutputInformation::consensus_decode(decoder)?,
            unlock_time: decoder.read_varint()?,
            block_height: decoder.read_u32_le()?,
            transaction_index: decoder.read_u32_le()?,
            visible: decoder.read_bool()?,
        })
    }
}

impl Encodable for SpentTransferRecord {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.record.consensus_encode(encoder);
        encoder.write_u32_le(self.spending_block.height);
        encoder.write_varint(self.spending_block.timestamp);
        encoder.write_u32_le(self.spending_block.transaction_index);
        encoder.write_hash(&self.spending_transaction_hash);
        encoder.write_u32_le(self.input_in_transaction);
    }
}

impl Decodable for SpentTransferRecord {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            record: TransferRecord::consensus_decode(decoder)?,
            spending_block: TransactionBlockInfo {
                height: decoder.read_u32_le()?,
                timestamp: decoder.read_varint()?,
                transaction_index: decoder.read_u32_le()?,
            },
            spending_transaction_hash: decoder.read_hash()?,
            input_in_transaction: decoder.read_u32_le()?,
        })
    }
}

impl Encodable for TransactionInformation {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_hash(&self.transaction_hash);
        encoder.write_public_key(&self.public_key);
        encoder.write_u32_le(self.block_height);
        encoder.write_varint(self.timestamp);
        encoder.write_varint(self.unlock_time);
        encoder.write_varint(self.total_amount_in);
        encoder.write_varint(self.total_amount_out);
        encoder.write_var_bytes(&self.extra);
        match &self.payment_id {
            Some(id) => {
                encoder.write_bool(true);
                encoder.write_hash(id);
            }
            None => encoder.write_bool(false),
        }
    }
}

impl Decodable for TransactionInformation {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            transaction_hash: decoder.read_hash()?,
            public_key: decoder.read_public_key()?,
            block_height: decoder.read_u32_le()?,
            timestamp: decoder.read_varint()?,
            unlock_time: decoder.read_varint()?,
            total_amount_in: decoder.read_varint()?,
            total_amount_out: decoder.read_varint()?,
            extra: decoder.read_var_bytes()?,
            payment_id: if decoder.read_bool()? { Some(decoder.read_hash()?) } else { None },
        })
    }
}

impl Default for TransactionInformation {
    fn default() -> Self {
        Self {
            transaction_hash: NULL_HASH,
            public_key: NULL_PUBLIC_KEY,
            block_height: UNCONFIRMED_HEIGHT,
            timestamp: 0,
            unlock_time: 0,
            total_amount_in: 0,
            total_amount_out: 0,
            extra: Vec::new(),
            payment_id: None,
        }
    }
}
