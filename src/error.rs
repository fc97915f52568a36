//! Errors reported by channel operations.
//!
//! Everything except [ChannelError::LedgerUnavailable] is decided locally and
//! leaves the channel untouched. `LedgerUnavailable` means the outcome of a
//! ledger call is unknown: it may or may not have been applied, and the caller
//! has to re-read the ledger before trying again.

use crate::{
    channel::{ChannelStatus, Role},
    ledger::LedgerError,
    types::ChannelId,
    wire::DecodeError,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("invalid key: {0}")]
    InvalidKey(&'static str),

    #[error("invalid amount: {0}")]
    InvalidAmount(&'static str),

    #[error("invalid nonce {0}: nonces start at 1")]
    InvalidNonce(u64),

    /// The balances of a voucher do not add up to the channel's total.
    #[error("conservation violated: channel holds {expected}, voucher sums to {actual}")]
    ConservationViolation { expected: u64, actual: u128 },

    #[error("voucher is missing the signature of {0}")]
    SignatureMissing(Role),

    #[error("signature of {0} does not verify")]
    SignatureInvalid(Role),

    /// Nonce at or below the nonce the channel already holds.
    #[error("stale voucher: nonce {nonce} is not above {current}")]
    StaleVoucher { nonce: u64, current: u64 },

    #[error("voucher belongs to channel {voucher}, not {channel}")]
    ChannelMismatch { channel: ChannelId, voucher: ChannelId },

    #[error("channel is not open (status: {0:?})")]
    ChannelNotOpen(ChannelStatus),

    #[error("channel was already opened (status: {0:?})")]
    AlreadyOpened(ChannelStatus),

    #[error("timeout not reached: now {now}, force close possible at {timeout_at}")]
    TimeoutNotReached { now: i64, timeout_at: i64 },

    #[error("channel {0} not found on the ledger")]
    ChannelNotFound(ChannelId),

    #[error("ledger unavailable, outcome unknown: {0}")]
    LedgerUnavailable(String),

    /// The ledger refused the operation; nothing was applied.
    #[error("ledger rejected operation: {0}")]
    LedgerRejected(String),

    #[error("malformed message: {0}")]
    Wire(#[from] DecodeError),
}

impl From<LedgerError> for ChannelError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Unavailable(reason) => Self::LedgerUnavailable(reason),
            LedgerError::Rejected(reason) => Self::LedgerRejected(reason),
            LedgerError::NotFound(id) => Self::ChannelNotFound(id),
        }
    }
}

/// Alias for `Result` using [ChannelError].
pub type Result<T> = core::result::Result<T, ChannelError>;
