//! Tagged fields stored in a transaction's extra blob.
//!
//! Layout: a sequence of `tag` bytes each followed by tag-specific data.
//! Unknown tags terminate parsing (nothing after them can be framed).

use obol_crypto::{Hash256, PublicKey};

pub const TAG_PUBLIC_KEY: u8 = 0x01;
pub const TAG_NONCE: u8 = 0x02;
pub const NONCE_PAYMENT_ID: u8 = 0x00;
pub const MAX_NONCE_SIZE: usize = 255;

#[derive(Clone, Debug, Default)]
pub struct ExtraFields {
    pub public_key: Option<PublicKey>,
    pub payment_id: Option<Hash256>,
    pub nonce: Vec<u8>,
}

pub fn parse(extra: &[u8]) -> ExtraFields {
    let mut fields = ExtraFields::default();
    let mut cursor = 0usize;
    while cursor < extra.len() {
        match extra[cursor] {
            TAG_PUBLIC_KEY => {
                if extra.len() - cursor - 1 < 32 {
                    return fields;
                }
                let mut key = [0u8; 32];
                key.copy_from_slice(&extra[cursor + 1..cursor + 33]);
                if fields.public_key.is_none() {
                    fields.public_key = Some(PublicKey(key));
                }
                cursor += 33;
            }
            TAG_NONCE => {
                if extra.len() - cursor - 1 < 1 {
                    return fields;
                }
                let len = extra[cursor + 1] as usize;
                if extra.len() - cursor - 2 < len {
                    return fields;
                }
                let nonce = &extra[cursor + 2..cursor + 2 + len];
                if fields.nonce.is_empty() {
                    fields.nonce = nonce.to_vec();
                    if len == 33 && nonce[0] == NONCE_PAYMENT_ID {
                        let mut id = [0u8; 32];
                        id.copy_from_slice(&nonce[1..]);
                        fields.payment_id = Some(id);
                    }
                }
                cursor += 2 + len;
            }
            _ => return fields,
        }
    }
    fields
}

pub fn add_public_key(extra: &mut Vec<u8>, key: &PublicKey) {
    extra.push(TAG_PUBLIC_KEY);
    extra.extend_from_slice(key.as_bytes());
}

pub fn add_payment_id(extra: &mut Vec<u8>, payment_id: &Hash256) {
    extra.push(TAG_NONCE);
    extra.push(33);
    extra.push(NONCE_PAYMENT_ID);
    extra.extend_from_slice(payment_id);
}
