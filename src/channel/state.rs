use serde::{Deserialize, Serialize};

use super::Role;
use crate::types::{ChannelId, PublicKey};

/// Default window after which either party may force-close: 24 hours.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 24 * 60 * 60;

/// Lifecycle of a channel as seen by one party.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Unopened,
    Open,
    CooperativelyClosed,
    ForceClosed,
}

impl ChannelStatus {
    pub fn is_closed(self) -> bool {
        matches!(
            self,
            ChannelStatus::CooperativelyClosed | ChannelStatus::ForceClosed
        )
    }
}

/// The ledger's record of a channel, also used off-chain as the read model.
///
/// Closing only flips `is_open`; the record stays around as a tombstone.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub struct ChannelState {
    pub id: ChannelId,
    pub party_a: PublicKey,
    pub party_b: PublicKey,
    pub balance_a: u64,
    pub balance_b: u64,
    pub nonce: u64,
    pub is_open: bool,
    /// Unix seconds.
    pub opened_at: i64,
    /// Unix seconds; force-close is allowed from this point on.
    pub timeout_at: i64,
}

impl ChannelState {
    /// Sum of both balances. Records are only built from checked sums.
    pub fn total(&self) -> u64 {
        self.balance_a.saturating_add(self.balance_b)
    }

    pub fn has_timed_out(&self, now: i64) -> bool {
        now >= self.timeout_at
    }

    pub fn key(&self, role: Role) -> PublicKey {
        match role {
            Role::PartyA => self.party_a,
            Role::PartyB => self.party_b,
        }
    }

    pub fn balance(&self, role: Role) -> u64 {
        match role {
            Role::PartyA => self.balance_a,
            Role::PartyB => self.balance_b,
        }
    }

    /// Role held by `key`, if it is a participant.
    pub fn role_of(&self, key: &PublicKey) -> Option<Role> {
        if *key == self.party_a {
            Some(Role::PartyA)
        } else if *key == self.party_b {
            Some(Role::PartyB)
        } else {
            None
        }
    }

    pub fn is_participant(&self, key: &PublicKey) -> bool {
        self.role_of(key).is_some()
    }
}
