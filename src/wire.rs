mod encoding;
mod proto;

use core::fmt::Debug;

use prost::Message;

pub use encoding::{FrameTooLarge, ProtoBufEncodingLayer};
pub use proto::{envelope, Envelope, VoucherMsg, VoucherRejectedMsg};

use crate::{
    channel::{Role, SigningStatus, Voucher},
    messages::ParticipantMessage,
    types::{ChannelId, Signature},
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("frame truncated: need {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },
    #[error("protobuf: {0}")]
    Protobuf(String),
    #[error("{0} has the wrong length")]
    FieldLength(&'static str),
    #[error("envelope without a message")]
    EmptyEnvelope,
    #[error("invalid voucher: {0}")]
    InvalidVoucher(&'static str),
}

impl From<prost::DecodeError> for DecodeError {
    fn from(e: prost::DecodeError) -> Self {
        DecodeError::Protobuf(e.to_string())
    }
}

/// Transport for encoded frames. Delivery and ordering are up to the
/// implementation.
pub trait BytesBus: Debug {
    fn send_to_participant(&self, frame: &[u8]);
}

/// Typed counterpart of [BytesBus].
pub trait MessageBus: Debug {
    fn send_to_participant(&self, msg: ParticipantMessage);
}

impl From<&Voucher> for VoucherMsg {
    fn from(v: &Voucher) -> Self {
        let status = v.status();
        VoucherMsg {
            channel_id: v.channel_id().0.to_vec(),
            balance_a: v.balance_a(),
            balance_b: v.balance_b(),
            nonce: v.nonce(),
            sig_a: status.get(Role::PartyA).map(|s| s.0.to_vec()),
            sig_b: status.get(Role::PartyB).map(|s| s.0.to_vec()),
        }
    }
}

impl TryFrom<VoucherMsg> for Voucher {
    type Error = DecodeError;

    fn try_from(msg: VoucherMsg) -> Result<Self, Self::Error> {
        let channel_id =
            ChannelId::from_slice(&msg.channel_id).ok_or(DecodeError::FieldLength("channel id"))?;
        let sig = |bytes: Option<Vec<u8>>| -> Result<Option<Signature>, DecodeError> {
            bytes
                .map(|b| Signature::from_slice(&b).ok_or(DecodeError::FieldLength("signature")))
                .transpose()
        };
        let signatures = SigningStatus::from_parts(sig(msg.sig_a)?, sig(msg.sig_b)?);

        if msg.balance_a.checked_add(msg.balance_b).is_none() {
            return Err(DecodeError::InvalidVoucher("balances overflow"));
        }
        if msg.nonce == 0 {
            return Err(DecodeError::InvalidVoucher("zero nonce"));
        }
        Ok(Voucher::from_parts(
            channel_id,
            msg.balance_a,
            msg.balance_b,
            msg.nonce,
            signatures,
        ))
    }
}

/// Unframed protobuf encoding of a single voucher.
pub fn encode_voucher(v: &Voucher) -> Vec<u8> {
    VoucherMsg::from(v).encode_to_vec()
}

pub fn decode_voucher(bytes: &[u8]) -> Result<Voucher, DecodeError> {
    VoucherMsg::decode(bytes)?.try_into()
}
