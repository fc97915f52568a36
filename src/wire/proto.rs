//! Protobuf messages exchanged between the parties of a channel.

#[derive(Clone, PartialEq, prost::Message)]
pub struct VoucherMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub channel_id: Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub balance_a: u64,
    #[prost(uint64, tag = "3")]
    pub balance_b: u64,
    #[prost(uint64, tag = "4")]
    pub nonce: u64,
    #[prost(bytes = "vec", optional, tag = "5")]
    pub sig_a: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "6")]
    pub sig_b: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct VoucherRejectedMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub channel_id: Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub nonce: u64,
    #[prost(string, tag = "3")]
    pub reason: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Envelope {
    #[prost(oneof = "envelope::Msg", tags = "1, 2, 3")]
    pub msg: Option<envelope::Msg>,
}

pub mod envelope {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Msg {
        #[prost(message, tag = "1")]
        VoucherProposal(super::VoucherMsg),
        #[prost(message, tag = "2")]
        VoucherAccepted(super::VoucherMsg),
        #[prost(message, tag = "3")]
        VoucherRejected(super::VoucherRejectedMsg),
    }
}
