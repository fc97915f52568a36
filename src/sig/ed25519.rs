//! Signer using the ed25519-dalek crate.

use core::fmt::Debug;

use ed25519_dalek::{Signer as _, SigningKey, VerifyingKey};

use super::Signer;
use crate::types::{PublicKey, Signature};

pub const PUBLIC_KEY_LEN: usize = ed25519_dalek::PUBLIC_KEY_LENGTH;
pub const SIGNATURE_LEN: usize = ed25519_dalek::SIGNATURE_LENGTH;
pub const SECRET_KEY_LEN: usize = ed25519_dalek::SECRET_KEY_LENGTH;

pub struct KeyPair {
    key: SigningKey,
}

// Never print the secret half.
impl Debug for KeyPair {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key())
            .finish()
    }
}

impl KeyPair {
    pub fn generate<R: rand::RngCore + rand::CryptoRng>(rng: &mut R) -> Self {
        Self {
            key: SigningKey::generate(rng),
        }
    }

    pub fn from_secret_bytes(bytes: &[u8]) -> Option<Self> {
        let secret: [u8; SECRET_KEY_LEN] = bytes.try_into().ok()?;
        Some(Self {
            key: SigningKey::from_bytes(&secret),
        })
    }

    pub fn secret_bytes(&self) -> [u8; SECRET_KEY_LEN] {
        self.key.to_bytes()
    }
}

impl Signer for KeyPair {
    fn public_key(&self) -> PublicKey {
        PublicKey(self.key.verifying_key().to_bytes())
    }

    fn sign_message(&self, msg: &[u8]) -> Signature {
        Signature(self.key.sign(msg).to_bytes())
    }
}

/// Check a detached signature. Malformed keys or signatures yield `false`.
pub fn verify(public_key: &[u8], msg: &[u8], signature: &[u8]) -> bool {
    let Ok(public_key) = <[u8; PUBLIC_KEY_LEN]>::try_from(public_key) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&public_key) else {
        return false;
    };
    let Ok(sig) = ed25519_dalek::Signature::from_slice(signature) else {
        return false;
    };
    key.verify_strict(msg, &sig).is_ok()
}
