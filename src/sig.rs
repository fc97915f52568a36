//! Handles the creation and verification of detached signatures over voucher
//! messages.
//!
//! The backend is chosen at compile time: `ed25519` (default) or `k256`
//! (secp256k1 ECDSA). Key and signature widths follow the selected backend and
//! must match what the ledger's verifier expects.

use std::sync::Arc;

#[cfg(all(feature = "ed25519", not(feature = "k256")))]
mod ed25519;
#[cfg(all(feature = "ed25519", not(feature = "k256")))]
pub use self::ed25519::{verify, KeyPair, PUBLIC_KEY_LEN, SECRET_KEY_LEN, SIGNATURE_LEN};

#[cfg(feature = "k256")]
mod k256;
#[cfg(feature = "k256")]
pub use self::k256::{verify, KeyPair, PUBLIC_KEY_LEN, SECRET_KEY_LEN, SIGNATURE_LEN};

#[cfg(not(any(feature = "ed25519", feature = "k256")))]
compile_error!("enable a signature backend: feature `ed25519` or `k256`");

pub use crate::types::{PublicKey, Signature};


/// Anything that can sign on behalf of a channel party.
///
/// Sessions only depend on this capability, never on how the key is stored.
/// Implement it for hardware wallets or remote signers; [KeyPair] is the
/// in-process implementation.
pub trait Signer: Send + Sync {
    fn public_key(&self) -> PublicKey;

    /// Produce a detached signature over `msg`.
    fn sign_message(&self, msg: &[u8]) -> Signature;
}

impl<S: Signer + ?Sized> Signer for &S {
    fn public_key(&self) -> PublicKey {
        (**self).public_key()
    }

    fn sign_message(&self, msg: &[u8]) -> Signature {
        (**self).sign_message(msg)
    }
}

impl<S: Signer + ?Sized> Signer for Arc<S> {
    fn public_key(&self) -> PublicKey {
        (**self).public_key()
    }

    fn sign_message(&self, msg: &[u8]) -> Signature {
        (**self).sign_message(msg)
    }
}

/// Typed variant of [verify].
pub fn verify_typed(public_key: &PublicKey, msg: &[u8], signature: &Signature) -> bool {
    verify(public_key.as_bytes(), msg, signature.as_bytes())
}
