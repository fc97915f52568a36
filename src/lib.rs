//! Two-party payment channels settled on a ledger.
//!
//! Parties lock a deposit on the ledger once, then move balances by exchanging
//! signed vouchers with strictly increasing nonces. The ledger is only
//! involved again to settle: cooperatively with the latest voucher, or by
//! force-close after the timeout.

pub mod channel;
mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod ledger;
pub mod messages;
pub mod sig;
mod types;
pub mod wire;

pub use channel::{
    derive_channel_id, ChannelSession, ChannelState, ChannelStatus, Role, SigningStatus, Voucher,
};
pub use client::{ChannelClient, ClientSession};
pub use error::{ChannelError, Result};
pub use types::{ChannelId, PublicKey, Signature};
