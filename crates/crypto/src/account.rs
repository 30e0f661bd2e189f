use rand::RngCore;

use crate::hash::tagged_hash;
use crate::keys::{generate_deterministic_keys, generate_keys, KeyPair, PublicKey, SecretKey};

/// Public half of a wallet account: separate view and spend keys, so a
/// scanner holding only the view secret can detect incoming outputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AccountPublicAddress {
    pub spend_public_key: PublicKey,
    pub view_public_key: PublicKey,
}

#[derive(Clone, Debug)]
pub struct AccountKeys {
    pub address: AccountPublicAddress,
    pub spend_secret_key: SecretKey,
    pub view_secret_key: SecretKey,
}

impl AccountKeys {
    fn from_pairs(spend: KeyPair, view: KeyPair) -> Self {
        Self {
            address: AccountPublicAddress {
                spend_public_key: spend.public,
                view_public_key: view.public,
            },
            spend_secret_key: spend.secret,
            view_secret_key: view.secret,
        }
    }
}

pub fn generate_account<R: RngCore>(rng: &mut R) -> AccountKeys {
    AccountKeys::from_pairs(generate_keys(rng), generate_keys(rng))
}

pub fn generate_deterministic_account(seed: &[u8]) -> AccountKeys {
    let spend = generate_deterministic_keys(&tagged_hash(b"obol.acc.spend", &[seed]));
    let view = generate_deterministic_keys(&tagged_hash(b"obol.acc.view", &[seed]));
    AccountKeys::from_pairs(spend, view)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_accounts_are_stable_and_distinct() {
        let a1 = generate_deterministic_account(b"wallet-a");
        let a2 = generate_deterministic_account(b"wallet-a");
        let b = generate_deterministic_account(b"wallet-b");
        assert_eq!(a1.address, a2.address);
        assert_ne!(a1.address, b.address);
        assert_ne!(a1.address.spend_public_key, a1.address.view_public_key);
    }
}
