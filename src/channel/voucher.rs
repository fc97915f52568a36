//! Off-chain state updates ("vouchers") and their signatures.
//!
//! A voucher proposes a new balance split at a new nonce. It only becomes
//! authoritative once both parties signed the exact same canonical message,
//! see [Voucher::serialize_for_signing].

use serde::{Deserialize, Serialize};

use super::Role;
use crate::{
    error::{ChannelError, Result},
    sig::{self, Signer},
    types::{ChannelId, PublicKey, Signature},
    wire,
};

/// Length of the signed message: id + balance A + balance B + nonce.
pub const SIGNED_MESSAGE_LEN: usize = ChannelId::LEN + 3 * 8;

/// Which signatures a voucher carries.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SigningStatus {
    Unsigned,
    PartyASigned { a: Signature },
    PartyBSigned { b: Signature },
    FullySigned { a: Signature, b: Signature },
}

impl SigningStatus {
    pub fn get(&self, role: Role) -> Option<Signature> {
        match (self, role) {
            (SigningStatus::PartyASigned { a }, Role::PartyA)
            | (SigningStatus::FullySigned { a, .. }, Role::PartyA) => Some(*a),
            (SigningStatus::PartyBSigned { b }, Role::PartyB)
            | (SigningStatus::FullySigned { b, .. }, Role::PartyB) => Some(*b),
            _ => None,
        }
    }

    /// Replace (or add) the signature for `role`.
    fn with(self, role: Role, sig: Signature) -> Self {
        let a = if role == Role::PartyA { Some(sig) } else { self.get(Role::PartyA) };
        let b = if role == Role::PartyB { Some(sig) } else { self.get(Role::PartyB) };
        Self::from_parts(a, b)
    }

    pub(crate) fn from_parts(a: Option<Signature>, b: Option<Signature>) -> Self {
        match (a, b) {
            (None, None) => SigningStatus::Unsigned,
            (Some(a), None) => SigningStatus::PartyASigned { a },
            (None, Some(b)) => SigningStatus::PartyBSigned { b },
            (Some(a), Some(b)) => SigningStatus::FullySigned { a, b },
        }
    }

    /// First role without a signature, party A first.
    pub fn missing(&self) -> Option<Role> {
        match self {
            SigningStatus::Unsigned | SigningStatus::PartyBSigned { .. } => Some(Role::PartyA),
            SigningStatus::PartyASigned { .. } => Some(Role::PartyB),
            SigningStatus::FullySigned { .. } => None,
        }
    }
}

/// Candidate balance split for a channel at a given nonce.
///
/// Balance and nonce fields are private: a different split or nonce requires a
/// new voucher, only signatures can be attached afterwards.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
#[serde(try_from = "RawVoucher")]
pub struct Voucher {
    channel_id: ChannelId,
    balance_a: u64,
    balance_b: u64,
    nonce: u64,
    signatures: SigningStatus,
}

/// Unchecked deserialization target, validated through [Voucher::create].
#[derive(Deserialize)]
struct RawVoucher {
    channel_id: ChannelId,
    balance_a: u64,
    balance_b: u64,
    nonce: u64,
    signatures: SigningStatus,
}

impl TryFrom<RawVoucher> for Voucher {
    type Error = ChannelError;

    fn try_from(raw: RawVoucher) -> Result<Self> {
        let mut v = Voucher::create(raw.channel_id, raw.balance_a, raw.balance_b, raw.nonce)?;
        v.signatures = raw.signatures;
        Ok(v)
    }
}

impl Voucher {
    pub fn create(channel_id: ChannelId, balance_a: u64, balance_b: u64, nonce: u64) -> Result<Self> {
        if balance_a.checked_add(balance_b).is_none() {
            return Err(ChannelError::InvalidAmount("balances overflow the channel total"));
        }
        if nonce == 0 {
            return Err(ChannelError::InvalidNonce(nonce));
        }

        Ok(Voucher {
            channel_id,
            balance_a,
            balance_b,
            nonce,
            signatures: SigningStatus::Unsigned,
        })
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }
    pub fn balance_a(&self) -> u64 {
        self.balance_a
    }
    pub fn balance_b(&self) -> u64 {
        self.balance_b
    }
    pub fn nonce(&self) -> u64 {
        self.nonce
    }
    pub fn status(&self) -> SigningStatus {
        self.signatures
    }

    pub fn balance(&self, role: Role) -> u64 {
        match role {
            Role::PartyA => self.balance_a,
            Role::PartyB => self.balance_b,
        }
    }

    pub fn signature(&self, role: Role) -> Option<Signature> {
        self.signatures.get(role)
    }

    /// Sum of both balances, `None` on overflow.
    pub fn total(&self) -> Option<u64> {
        self.balance_a.checked_add(self.balance_b)
    }

    /// The exact bytes both parties sign and the ledger verifies.
    ///
    /// Layout: `channel_id || balance_a || balance_b || nonce`, integers as
    /// u64 little-endian. Changing this breaks every deployed verifier.
    pub fn serialize_for_signing(&self) -> [u8; SIGNED_MESSAGE_LEN] {
        let mut buf = [0u8; SIGNED_MESSAGE_LEN];
        let (id, rest) = buf.split_at_mut(ChannelId::LEN);
        id.copy_from_slice(&self.channel_id.0);
        rest[0..8].copy_from_slice(&self.balance_a.to_le_bytes());
        rest[8..16].copy_from_slice(&self.balance_b.to_le_bytes());
        rest[16..24].copy_from_slice(&self.nonce.to_le_bytes());
        buf
    }

    /// Detached signature over the canonical message. Does not attach it.
    pub fn sign<S: Signer + ?Sized>(&self, signer: &S) -> Signature {
        signer.sign_message(&self.serialize_for_signing())
    }

    /// Attach `signature` for `role`, replacing an earlier one.
    pub fn add_signature(&mut self, signature: Signature, role: Role) {
        self.signatures = self.signatures.with(role, signature);
    }

    pub fn verify_signature(&self, signature: &[u8], public_key: &[u8]) -> bool {
        sig::verify(public_key, &self.serialize_for_signing(), signature)
    }

    /// Both signatures are present. Says nothing about their validity, see
    /// [Voucher::verify_parties].
    pub fn is_fully_signed(&self) -> bool {
        matches!(self.signatures, SigningStatus::FullySigned { .. })
    }

    /// Structural self-consistency only: no signatures, no prior state.
    pub fn validate(&self) -> bool {
        self.total().is_some() && self.nonce > 0 && !self.channel_id.is_zero()
    }

    /// Require both signatures and check each against its party's key.
    pub fn verify_parties(&self, party_a: &PublicKey, party_b: &PublicKey) -> Result<()> {
        let (a, b) = match self.signatures {
            SigningStatus::FullySigned { a, b } => (a, b),
            other => {
                // `missing` is Some for every status but FullySigned.
                return Err(ChannelError::SignatureMissing(
                    other.missing().unwrap_or(Role::PartyA),
                ));
            }
        };

        let msg = self.serialize_for_signing();
        if !sig::verify_typed(party_a, &msg, &a) {
            return Err(ChannelError::SignatureInvalid(Role::PartyA));
        }
        if !sig::verify_typed(party_b, &msg, &b) {
            return Err(ChannelError::SignatureInvalid(Role::PartyB));
        }
        Ok(())
    }

    /// Check only the signature of `role`, which must be present.
    pub fn verify_role(&self, role: Role, key: &PublicKey) -> Result<()> {
        let sig = self.signature(role).ok_or(ChannelError::SignatureMissing(role))?;
        if sig::verify_typed(key, &self.serialize_for_signing(), &sig) {
            Ok(())
        } else {
            Err(ChannelError::SignatureInvalid(role))
        }
    }

    /// Protobuf encoding used to send vouchers between parties.
    pub fn to_serialized_form(&self) -> Vec<u8> {
        wire::encode_voucher(self)
    }

    pub fn from_serialized_form(bytes: &[u8]) -> Result<Self> {
        Ok(wire::decode_voucher(bytes)?)
    }

    /// Rebuild a voucher from already-validated wire parts.
    pub(crate) fn from_parts(
        channel_id: ChannelId,
        balance_a: u64,
        balance_b: u64,
        nonce: u64,
        signatures: SigningStatus,
    ) -> Self {
        Voucher {
            channel_id,
            balance_a,
            balance_b,
            nonce,
            signatures,
        }
    }
}
