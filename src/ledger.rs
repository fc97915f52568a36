//! Boundary to the ledger that custodies the escrow.
//!
//! The ledger verifies every submitted operation on its own; the channel core
//! only decides when to submit. [InMemoryLedger] implements the same checks
//! and is used by tests and the demo.

mod memory;
mod retry;

use async_trait::async_trait;

pub use memory::{Fault, InMemoryLedger};
pub use retry::RetryPolicy;

use crate::{
    channel::{ChannelState, Voucher},
    types::{ChannelId, PublicKey},
};

/// Parameters of an open transaction, signed and paid by `opener`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    pub opener: PublicKey,
    pub counterparty: PublicKey,
    pub deposit: u64,
    pub timeout_seconds: u64,
}

/// Result of an accepted ledger operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerReceipt {
    /// Transaction signature/hash as reported by the ledger.
    pub signature: String,
    /// Record after the operation was applied.
    pub state: ChannelState,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// The call may or may not have been applied.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    /// The verifier refused the operation. Nothing was applied.
    #[error("rejected by the ledger: {0}")]
    Rejected(String),
    #[error("no channel {0} on the ledger")]
    NotFound(ChannelId),
}

impl LedgerError {
    /// Whether repeating the same call could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Unavailable(_))
    }
}

/// Ledger operations used by a channel session.
///
/// Channels are always looked up by their [ChannelId]. Implementations submit
/// transactions signed by the local party and report the resulting record.
#[async_trait]
pub trait LedgerAdapter: Send + Sync {
    async fn open_channel(&self, req: OpenRequest) -> Result<LedgerReceipt, LedgerError>;

    /// Optional on-ledger checkpoint with a fully signed voucher. The channel
    /// stays open.
    async fn update_channel(&self, voucher: &Voucher) -> Result<LedgerReceipt, LedgerError>;

    /// Settle with a fully signed voucher and mark the channel closed.
    async fn close_channel(&self, voucher: &Voucher) -> Result<LedgerReceipt, LedgerError>;

    /// Settle with the recorded balances once the timeout passed. `authority`
    /// must be one of the parties.
    async fn force_close_channel(
        &self,
        id: ChannelId,
        authority: PublicKey,
    ) -> Result<LedgerReceipt, LedgerError>;

    async fn get_channel_state(&self, id: ChannelId) -> Result<Option<ChannelState>, LedgerError>;

    /// Judged by the ledger's own clock.
    async fn is_channel_timed_out(&self, id: ChannelId) -> Result<bool, LedgerError>;
}
