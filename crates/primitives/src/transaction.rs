//! Transaction model: sum-type inputs and outputs, consensus codec,
//! identity hashes.

use obol_crypto::{fast_hash, Hash256, KeyImage, PublicKey, Signature};

use crate::encoding::{decode, encode, Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::extra;

pub const TRANSACTION_VERSION: u8 = 1;

const INPUT_TAG_BASE: u8 = 0xff;
const INPUT_TAG_KEY: u8 = 0x02;
const INPUT_TAG_MULTISIGNATURE: u8 = 0x03;
const OUTPUT_TAG_KEY: u8 = 0x02;
const OUTPUT_TAG_MULTISIGNATURE: u8 = 0x03;

/// Coinbase input carrying the height of the block it mints for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BaseInput {
    pub block_index: u32,
}

/// Ring-signature input: spends one output of `amount` hidden among the
/// outputs referenced by `output_offsets` (relative global indices).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyInput {
    pub amount: u64,
    pub output_offsets: Vec<u32>,
    pub key_image: KeyImage,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultisignatureInput {
    pub amount: u64,
    pub output_index: u32,
    pub signature_count: u8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransactionInput {
    Base(BaseInput),
    Key(KeyInput),
    Multisignature(MultisignatureInput),
}

impl TransactionInput {
    pub fn amount(&self) -> u64 {
        match self {
            TransactionInput::Base(_) => 0,
            TransactionInput::Key(input) => input.amount,
            TransactionInput::Multisignature(input) => input.amount,
        }
    }

    /// Number of signature slots this input occupies.
    pub fn signature_count(&self) -> usize {
        match self {
            TransactionInput::Base(_) => 0,
            TransactionInput::Key(input) => input.output_offsets.len(),
            TransactionInput::Multisignature(input) => input.signature_count as usize,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultisignatureOutput {
    pub keys: Vec<PublicKey>,
    pub required_signatures: u8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransactionOutputTarget {
    Key(PublicKey),
    Multisignature(MultisignatureOutput),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionOutput {
    pub amount: u64,
    pub target: TransactionOutputTarget,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionPrefix {
    pub version: u8,
    pub unlock_time: u64,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub extra: Vec<u8>,
}

impl TransactionPrefix {
    pub fn hash(&self) -> Hash256 {
        fast_hash(&encode(self))
    }
}

/// Signed transaction: one signature vector per input, sized by the
/// input kind. Immutable once signed; every mutation path rebuilds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub prefix: TransactionPrefix,
    pub signatures: Vec<Vec<Signature>>,
}

impl Transaction {
    pub fn hash(&self) -> Hash256 {
        fast_hash(&encode(self))
    }

    pub fn prefix_hash(&self) -> Hash256 {
        self.prefix.hash()
    }

    pub fn blob_size(&self) -> usize {
        encode(self).len()
    }

    pub fn input_amount(&self) -> u64 {
        self.prefix.inputs.iter().map(TransactionInput::amount).sum()
    }

    pub fn output_amount(&self) -> u64 {
        self.prefix.outputs.iter().map(|out| out.amount).sum()
    }

    /// Sums output amounts, detecting u64 overflow across the sequence.
    pub fn checked_output_amount(&self) -> Option<u64> {
        let mut total: u64 = 0;
        for out in &self.prefix.outputs {
            total = total.checked_add(out.amount)?;
        }
        Some(total)
    }

    /// Transaction public key from the extra field, if present.
    pub fn public_key(&self) -> Option<PublicKey> {
        extra::parse(&self.prefix.extra).public_key
    }

    pub fn payment_id(&self) -> Option<Hash256> {
        extra::parse(&self.prefix.extra).payment_id
    }

    pub fn is_coinbase(&self) -> bool {
        matches!(self.prefix.inputs.as_slice(), [TransactionInput::Base(_)])
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        decode(bytes)
    }
}

impl Encodable for TransactionInput {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        match self {
            TransactionInput::Base(input) => {
                encoder.write_u8(INPUT_TAG_BASE);
                encoder.write_varint(input.block_index as u64);
            }
            TransactionInput::Key(input) => {
                encoder.write_u8(INPUT_TAG_KEY);
                encoder.write_varint(input.amount);
                encoder.write_varint(input.output_offsets.len() as u64);
                for offset in &input.output_offsets {
                    encoder.write_varint(*offset as u64);
                }
                encoder.write_key_image(&input.key_image);
            }
            TransactionInput::Multisignature(input) => {
                encoder.write_u8(INPUT_TAG_MULTISIGNATURE);
                encoder.write_varint(input.amount);
                encoder.write_varint(input.output_index as u64);
                encoder.write_u8(input.signature_count);
            }
        }
    }
}

impl Decodable for TransactionInput {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        match decoder.read_u8()? {
            INPUT_TAG_BASE => {
                let block_index = decoder.read_varint()?;
                let block_index =
                    u32::try_from(block_index).map_err(|_| DecodeError::InvalidData("base input height"))?;
                Ok(TransactionInput::Base(BaseInput { block_index }))
            }
            INPUT_TAG_KEY => {
                let amount = decoder.read_varint()?;
                let count = decoder.read_size()?;
                let mut output_offsets = Vec::with_capacity(count);
                for _ in 0..count {
                    let offset = decoder.read_varint()?;
                    output_offsets
                        .push(u32::try_from(offset).map_err(|_| DecodeError::InvalidData("output offset"))?);
                }
                let key_image = decoder.read_key_image()?;
                Ok(TransactionInput::Key(KeyInput { amount, output_offsets, key_image }))
            }
            INPUT_TAG_MULTISIGNATURE => {
                let amount = decoder.read_varint()?;
                let output_index = decoder.read_varint()?;
                let output_index =
                    u32::try_from(output_index).map_err(|_| DecodeError::InvalidData("output index"))?;
                let signature_count = decoder.read_u8()?;
                Ok(TransactionInput::Multisignature(MultisignatureInput {
                    amount,
                    output_index,
                    signature_count,
                }))
            }
            _ => Err(DecodeError::InvalidData("unknown input tag")),
        }
    }
}

impl Encodable for TransactionOutput {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_varint(self.amount);
        match &self.target {
            TransactionOutputTarget::Key(key) => {
                encoder.write_u8(OUTPUT_TAG_KEY);
                encoder.write_public_key(key);
            }
            TransactionOutputTarget::Multisignature(out) => {
                encoder.write_u8(OUTPUT_TAG_MULTISIGNATURE);
                encoder.write_varint(out.keys.len() as u64);
                for key in &out.keys {
                    encoder.write_public_key(key);
                }
                encoder.write_u8(out.required_signatures);
            }
        }
    }
}

impl Decodable for TransactionOutput {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let amount = decoder.read_varint()?;
        let target = match decoder.read_u8()? {
            OUTPUT_TAG_KEY => TransactionOutputTarget::Key(decoder.read_public_key()?),
            OUTPUT_TAG_MULTISIGNATURE => {
                let count = decoder.read_size()?;
                let mut keys = Vec::with_capacity(count);
                for _ in 0..count {
                    keys.push(decoder.read_public_key()?);
                }
                let required_signatures = decoder.read_u8()?;
                if required_signatures as usize > keys.len() {
                    return Err(DecodeError::InvalidData("required signatures exceed key count"));
                }
                TransactionOutputTarget::Multisignature(MultisignatureOutput {
                    keys,
                    required_signatures,
                })
            }
            _ => return Err(DecodeError::InvalidData("unknown output tag")),
        };
        Ok(TransactionOutput { amount, target })
    }
}

impl Encodable for TransactionPrefix {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_u8(self.version);
        encoder.write_varint(self.unlock_time);
        encoder.write_varint(self.inputs.len() as u64);
        for input in &self.inputs {
            input.consensus_encode(encoder);
        }
        encoder.write_varint(self.outputs.len() as u64);
        for output in &self.outputs {
            output.consensus_encode(encoder);
        }
        encoder.write_var_bytes(&self.extra);
    }
}

impl Decodable for TransactionPrefix {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let version = decoder.read_u8()?;
        let unlock_time = decoder.read_varint()?;
        let input_count = decoder.read_size()?;
        let mut inputs = Vec::with_capacity(input_count);
        for _ in 0..input_count {
            inputs.push(TransactionInput::consensus_decode(decoder)?);
        }
        let output_count = decoder.read_size()?;
        let mut outputs = Vec::with_capacity(output_count);
        for _ in 0..output_count {
            outputs.push(TransactionOutput::consensus_decode(decoder)?);
        }
        let extra = decoder.read_var_bytes()?;
        Ok(Self { version, unlock_time, inputs, outputs, extra })
    }
}

impl Encodable for Transaction {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.prefix.consensus_encode(encoder);
        for signatures in &self.signatures {
            for signature in signatures {
                encoder.write_signature(signature);
            }
        }
    }
}

impl Decodable for Transaction {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let prefix = TransactionPrefix::consensus_decode(decoder)?;
        let mut signatures = Vec::with_capacity(prefix.inputs.len());
        for input in &prefix.inputs {
            let count = input.signature_count();
            let mut slot = Vec::with_capacity(count);
            for _ in 0..count {
                slot.push(decoder.read_signature()?);
            }
            signatures.push(slot);
        }
        Ok(Self { prefix, signatures })
    }
}

/// Ring member references are stored as deltas to keep small numbers on
/// the wire; indices must be strictly increasing once accumulated.
pub fn relative_output_offsets_to_absolute(offsets: &[u32]) -> Option<Vec<u32>> {
    let mut absolute = Vec::with_capacity(offsets.len());
    let mut accumulator: u64 = 0;
    for (i, offset) in offsets.iter().enumerate() {
        if i > 0 && *offset == 0 {
            return None;
        }
        accumulator += *offset as u64;
        absolute.push(u32::try_from(accumulator).ok()?);
    }
    Some(absolute)
}

pub fn absolute_output_offsets_to_relative(offsets: &[u32]) -> Option<Vec<u32>> {
    let mut relative = Vec::with_capacity(offsets.len());
    let mut previous: Option<u32> = None;
    for offset in offsets {
        let delta = match previous {
            None => *offset,
            Some(prev) if *offset > prev => offset - prev,
            Some(_) => return None,
        };
        relative.push(delta);
        previous = Some(*offset);
    }
    Some(relative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use obol_crypto::generate_deterministic_keys;

    fn sample_transaction() -> Transaction {
        let spend = generate_deterministic_keys(b"spend");
        let cosigner = generate_deterministic_keys(b"cosigner");
        let prefix = TransactionPrefix {
            version: TRANSACTION_VERSION,
            unlock_time: 0,
            inputs: vec![
                TransactionInput::Key(KeyInput {
                    amount: 7_000,
                    output_offsets: vec![1, 2, 4],
                    key_image: obol_crypto::generate_key_image(&spend.public, &spend.secret),
                }),
                TransactionInput::Multisignature(MultisignatureInput {
                    amount: 500,
                    output_index: 9,
                    signature_count: 1,
                }),
            ],
            outputs: vec![
                TransactionOutput { amount: 7_400, target: TransactionOutputTarget::Key(spend.public) },
                TransactionOutput {
                    amount: 100,
                    target: TransactionOutputTarget::Multisignature(MultisignatureOutput {
                        keys: vec![spend.public, cosigner.public],
                        required_signatures: 2,
                    }),
                },
            ],
            extra: Vec::new(),
        };
        let signatures = prefix
            .inputs
            .iter()
            .map(|input| vec![Signature::default(); input.signature_count()])
            .collect();
        Transaction { prefix, signatures }
    }

    #[test]
    fn transaction_codec_round_trip() {
        let tx = sample_transaction();
        let bytes = tx.to_bytes();
        let decoded = Transaction::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.hash(), tx.hash());
        assert_eq!(bytes.len(), tx.blob_size());
    }

    #[test]
    fn prefix_hash_ignores_signatures() {
        let mut tx = sample_transaction();
        let before = tx.prefix_hash();
        tx.signatures[0][0] = Signature::from_bytes([0x5a; 64]);
        assert_eq!(tx.prefix_hash(), before);
        assert_ne!(tx.hash(), sample_transaction().hash());
    }

    #[test]
    fn unknown_input_tag_is_rejected() {
        let mut bytes = sample_transaction().to_bytes();
        // version + unlock_time + input count, then the first input tag
        bytes[3] = 0x77;
        assert!(Transaction::from_bytes(&bytes).is_err());
    }

    #[test]
    fn offsets_round_trip() {
        let absolute = vec![3u32, 7, 8, 20];
        let relative = absolute_output_offsets_to_relative(&absolute).unwrap();
        assert_eq!(relative, vec![3, 4, 1, 12]);
        assert_eq!(relative_output_offsets_to_absolute(&relative).unwrap(), absolute);
    }

    #[test]
    fn duplicate_absolute_offsets_are_rejected() {
        assert!(absolute_output_offsets_to_relative(&[5, 5]).is_none());
        assert!(relative_output_offsets_to_absolute(&[5, 0]).is_none());
    }
}
