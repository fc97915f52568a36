//! Signer using the k256 Rust crate (implementation of ecdsa in Rust).
//!
//! Public keys are SEC1-compressed (33 bytes), signatures are the 64-byte
//! `r || s` form over the SHA-256 digest of the message.

use core::fmt::Debug;

use k256::{
    ecdsa::{
        signature::{Signer as _, Verifier as _},
        Signature as EcdsaSignature, SigningKey, VerifyingKey,
    },
    elliptic_curve::sec1::ToEncodedPoint,
};

use super::Signer;
use crate::types::{PublicKey, Signature};

pub const PUBLIC_KEY_LEN: usize = 33;
pub const SIGNATURE_LEN: usize = 64;
pub const SECRET_KEY_LEN: usize = 32;

pub struct KeyPair {
    key: SigningKey,
    public_key: PublicKey,
}

impl Debug for KeyPair {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .finish()
    }
}

fn encode_public_key(key: &VerifyingKey) -> PublicKey {
    // The compressed encoding is always 33 bytes for secp256k1.
    let point = key.to_encoded_point(true);
    let mut buf = [0u8; PUBLIC_KEY_LEN];
    buf.copy_from_slice(point.as_bytes());
    PublicKey(buf)
}

impl KeyPair {
    pub fn generate<R: rand::RngCore + rand::CryptoRng>(rng: &mut R) -> Self {
        let key = SigningKey::random(rng);
        let public_key = encode_public_key(key.verifying_key());
        Self { key, public_key }
    }

    pub fn from_secret_bytes(bytes: &[u8]) -> Option<Self> {
        let key = SigningKey::from_slice(bytes).ok()?;
        let public_key = encode_public_key(key.verifying_key());
        Some(Self { key, public_key })
    }

    pub fn secret_bytes(&self) -> [u8; SECRET_KEY_LEN] {
        self.key.to_bytes().into()
    }
}

impl Signer for KeyPair {
    fn public_key(&self) -> PublicKey {
        self.public_key
    }

    fn sign_message(&self, msg: &[u8]) -> Signature {
        let sig: EcdsaSignature = self.key.sign(msg);
        let mut buf = [0u8; SIGNATURE_LEN];
        buf.copy_from_slice(&sig.to_bytes());
        Signature(buf)
    }
}

/// Check a detached signature. Malformed keys or signatures yield `false`.
pub fn verify(public_key: &[u8], msg: &[u8], signature: &[u8]) -> bool {
    let Ok(key) = VerifyingKey::from_sec1_bytes(public_key) else {
        return false;
    };
    let Ok(sig) = EcdsaSignature::from_slice(signature) else {
        return false;
    };
    key.verify(msg, &sig).is_ok()
}
