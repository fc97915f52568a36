use crate::{channel::Voucher, types::ChannelId};

/// Messages sent between the participants of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantMessage {
    /// Voucher signed by the sender, to be countersigned.
    VoucherProposal(Voucher),
    /// The proposal with both signatures attached.
    VoucherAccepted(Voucher),
    VoucherRejected {
        id: ChannelId,
        nonce: u64,
        reason: String,
    },
}

impl ParticipantMessage {
    pub fn channel_id(&self) -> ChannelId {
        match self {
            ParticipantMessage::VoucherProposal(v) | ParticipantMessage::VoucherAccepted(v) => {
                v.channel_id()
            }
            ParticipantMessage::VoucherRejected { id, .. } => *id,
        }
    }
}
