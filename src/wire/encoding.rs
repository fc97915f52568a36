use prost::Message;
use tracing::error;

use super::{envelope, BytesBus, DecodeError, Envelope, MessageBus, VoucherRejectedMsg};
use crate::{messages::ParticipantMessage, types::ChannelId};

/// Rejection reasons are cut to this many bytes so every frame fits the
/// 2-byte length prefix.
pub const MAX_REASON_LEN: usize = 1024;

const PREFIX_LEN: usize = 2;

/// An encoded message does not fit the 2-byte length prefix.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("message of {0} bytes does not fit a u16 length prefix")]
pub struct FrameTooLarge(pub usize);

fn frame(body: &[u8]) -> Result<Vec<u8>, FrameTooLarge> {
    let len = u16::try_from(body.len()).map_err(|_| FrameTooLarge(body.len()))?;
    let mut buf = Vec::with_capacity(PREFIX_LEN + body.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(body);
    Ok(buf)
}

/// Frames messages as `len (u16, big-endian) || protobuf Envelope`.
#[derive(Debug)]
pub struct ProtoBufEncodingLayer<B: BytesBus> {
    pub bus: B,
}

fn truncate_reason(reason: &str) -> String {
    if reason.len() <= MAX_REASON_LEN {
        return reason.to_owned();
    }
    let mut end = MAX_REASON_LEN;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_owned()
}

impl<B: BytesBus> ProtoBufEncodingLayer<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    /// Encode a message into a length-prefixed frame. Prost's
    /// `encode_length_delimited` would write a varint instead of a u16.
    pub fn encode(msg: &ParticipantMessage) -> Result<Vec<u8>, FrameTooLarge> {
        let wiremsg = match msg {
            ParticipantMessage::VoucherProposal(v) => envelope::Msg::VoucherProposal(v.into()),
            ParticipantMessage::VoucherAccepted(v) => envelope::Msg::VoucherAccepted(v.into()),
            ParticipantMessage::VoucherRejected { id, nonce, reason } => {
                envelope::Msg::VoucherRejected(VoucherRejectedMsg {
                    channel_id: id.0.to_vec(),
                    nonce: *nonce,
                    reason: truncate_reason(reason),
                })
            }
        };
        frame(&Envelope { msg: Some(wiremsg) }.encode_to_vec())
    }

    /// Decode the first frame in `buf`, returning the message and the number
    /// of bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(ParticipantMessage, usize), DecodeError> {
        if buf.len() < PREFIX_LEN {
            return Err(DecodeError::Truncated {
                needed: PREFIX_LEN,
                have: buf.len(),
            });
        }
        let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
        let end = PREFIX_LEN + len;
        if buf.len() < end {
            return Err(DecodeError::Truncated {
                needed: end,
                have: buf.len(),
            });
        }

        let envelope = Envelope::decode(&buf[PREFIX_LEN..end])?;
        let msg = match envelope.msg.ok_or(DecodeError::EmptyEnvelope)? {
            envelope::Msg::VoucherProposal(v) => ParticipantMessage::VoucherProposal(v.try_into()?),
            envelope::Msg::VoucherAccepted(v) => ParticipantMessage::VoucherAccepted(v.try_into()?),
            envelope::Msg::VoucherRejected(r) => ParticipantMessage::VoucherRejected {
                id: ChannelId::from_slice(&r.channel_id)
                    .ok_or(DecodeError::FieldLength("channel id"))?,
                nonce: r.nonce,
                reason: r.reason,
            },
        };
        Ok((msg, end))
    }
}

impl<B: BytesBus> MessageBus for ProtoBufEncodingLayer<B> {
    fn send_to_participant(&self, msg: ParticipantMessage) {
        match Self::encode(&msg) {
            Ok(frame) => self.bus.send_to_participant(&frame),
            Err(e) => error!(channel = %msg.channel_id(), error = %e, "dropping message"),
        }
    }
}
