mod id;
mod machine;
mod session;
mod state;
mod voucher;


use core::fmt::Display;
use serde::{Deserialize, Serialize};

pub use id::*;
pub use machine::*;
pub use session::*;
pub use state::*;
pub use voucher::*;

/// Position of a participant in the channel.
///
/// `PartyA` holds the lexicographically smaller public key. The ledger derives
/// channel accounts with the same ordering.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Role {
    PartyA,
    PartyB,
}

impl Role {
    pub fn other(self) -> Self {
        match self {
            Role::PartyA => Role::PartyB,
            Role::PartyB => Role::PartyA,
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Role::PartyA => f.write_str("party A"),
            Role::PartyB => f.write_str("party B"),
        }
    }
}
