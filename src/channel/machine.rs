//! Lifecycle rules of a single channel.
//!
//! The machine never talks to the ledger. Transitions that need the ledger are
//! split in two: a `check_*`/`prepare_*` step that validates locally, and a
//! `confirm_*` step that applies what the ledger reported. Nothing is mutated
//! if a check fails.

use super::{canonical_order, ChannelState, ChannelStatus, Role, Voucher};
use crate::{
    error::{ChannelError, Result},
    types::{ChannelId, PublicKey},
};

#[derive(Debug, Clone)]
pub struct ChannelMachine {
    status: ChannelStatus,
    /// Off-chain view: ledger record with balances/nonce of the latest
    /// accepted voucher. `None` while unopened.
    state: Option<ChannelState>,
    /// Highest nonce the ledger is known to have recorded.
    ledger_nonce: u64,
}

impl Default for ChannelMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelMachine {
    pub fn new() -> Self {
        ChannelMachine {
            status: ChannelStatus::Unopened,
            state: None,
            ledger_nonce: 0,
        }
    }

    pub fn status(&self) -> ChannelStatus {
        self.status
    }
    pub fn state(&self) -> Option<ChannelState> {
        self.state
    }
    pub fn channel_id(&self) -> Option<ChannelId> {
        self.state.map(|s| s.id)
    }
    pub fn ledger_nonce(&self) -> u64 {
        self.ledger_nonce
    }

    fn open_state(&self) -> Result<&ChannelState> {
        match (&self.state, self.status) {
            (Some(state), ChannelStatus::Open) => Ok(state),
            _ => Err(ChannelError::ChannelNotOpen(self.status)),
        }
    }

    /// Build the record an open request should produce. Only party A opens,
    /// and the whole deposit starts on its side.
    pub fn prepare_open(
        &self,
        opener: PublicKey,
        counterparty: PublicKey,
        deposit: u64,
        timeout_seconds: u64,
        now: i64,
    ) -> Result<ChannelState> {
        if self.status != ChannelStatus::Unopened {
            return Err(ChannelError::AlreadyOpened(self.status));
        }
        if deposit == 0 {
            return Err(ChannelError::InvalidAmount("initial deposit must be positive"));
        }
        if opener == counterparty {
            return Err(ChannelError::InvalidKey("a channel needs two distinct parties"));
        }

        let (party_a, party_b) = canonical_order(opener, counterparty);
        if opener != party_a {
            return Err(ChannelError::InvalidKey(
                "opener must hold the lexicographically smaller key",
            ));
        }
        let timeout = i64::try_from(timeout_seconds).unwrap_or(i64::MAX);

        Ok(ChannelState {
            id: ChannelId::derive(&party_a, &party_b),
            party_a,
            party_b,
            balance_a: deposit,
            balance_b: 0,
            nonce: 0,
            is_open: true,
            opened_at: now,
            timeout_at: now.saturating_add(timeout),
        })
    }

    /// `Unopened -> Open` once the ledger confirmed the record.
    pub fn confirm_open(&mut self, record: ChannelState) -> Result<()> {
        if self.status != ChannelStatus::Unopened {
            return Err(ChannelError::AlreadyOpened(self.status));
        }
        if !record.is_open {
            return Err(ChannelError::ChannelNotOpen(ChannelStatus::Unopened));
        }
        self.state = Some(record);
        self.ledger_nonce = record.nonce;
        self.status = ChannelStatus::Open;
        Ok(())
    }

    /// Checks shared by every voucher-driven transition, except signatures.
    fn check_transition(&self, state: &ChannelState, voucher: &Voucher, min_nonce: u64) -> Result<()> {
        if voucher.channel_id() != state.id {
            return Err(ChannelError::ChannelMismatch {
                channel: state.id,
                voucher: voucher.channel_id(),
            });
        }
        // Stale nonces are rejected before anything else about the voucher.
        if voucher.nonce() <= min_nonce {
            return Err(ChannelError::StaleVoucher {
                nonce: voucher.nonce(),
                current: min_nonce,
            });
        }
        let actual = voucher.balance_a() as u128 + voucher.balance_b() as u128;
        if actual != state.total() as u128 {
            return Err(ChannelError::ConservationViolation {
                expected: state.total(),
                actual,
            });
        }
        Ok(())
    }

    /// Validate a proposal that does not need to be signed yet.
    pub fn check_proposal(&self, voucher: &Voucher) -> Result<()> {
        let state = self.open_state()?;
        self.check_transition(state, voucher, state.nonce)
    }

    /// All conditions for `accept_voucher`, without applying it.
    pub fn check_voucher(&self, voucher: &Voucher) -> Result<()> {
        let state = self.open_state()?;
        self.check_transition(state, voucher, state.nonce)?;
        voucher.verify_parties(&state.party_a, &state.party_b)
    }

    /// `Open -> Open`: adopt the balances and nonce of a fully signed voucher.
    pub fn accept_voucher(&mut self, voucher: &Voucher) -> Result<()> {
        self.check_voucher(voucher)?;
        if let Some(state) = self.state.as_mut() {
            state.balance_a = voucher.balance_a();
            state.balance_b = voucher.balance_b();
            state.nonce = voucher.nonce();
        }
        Ok(())
    }

    /// Conditions for settling `voucher` on the ledger (close or checkpoint).
    ///
    /// The voucher may be newer than the accepted state, or the accepted
    /// state itself. Either way it has to be above what the ledger recorded.
    pub fn check_settlement(&self, voucher: &Voucher) -> Result<()> {
        let state = self.open_state()?;
        let is_accepted_state = voucher.nonce() == state.nonce
            && voucher.balance_a() == state.balance_a
            && voucher.balance_b() == state.balance_b;

        let min_nonce = if is_accepted_state {
            self.ledger_nonce
        } else {
            state.nonce.max(self.ledger_nonce)
        };
        self.check_transition(state, voucher, min_nonce)?;
        voucher.verify_parties(&state.party_a, &state.party_b)
    }

    /// `Open -> CooperativelyClosed` with the ledger's settled record.
    pub fn confirm_close(&mut self, settled: ChannelState) -> Result<()> {
        self.open_state()?;
        self.adopt_ledger(settled);
        self.status = ChannelStatus::CooperativelyClosed;
        Ok(())
    }

    pub fn check_force_close(&self, now: i64) -> Result<()> {
        let state = self.open_state()?;
        if !state.has_timed_out(now) {
            return Err(ChannelError::TimeoutNotReached {
                now,
                timeout_at: state.timeout_at,
            });
        }
        Ok(())
    }

    /// `Open -> ForceClosed`. The ledger settles with whatever it recorded,
    /// which may be older than the latest accepted voucher.
    pub fn confirm_force_close(&mut self, settled: ChannelState) -> Result<()> {
        self.open_state()?;
        self.adopt_ledger(settled);
        self.status = ChannelStatus::ForceClosed;
        Ok(())
    }

    /// The ledger recorded a checkpoint; the channel stays open.
    pub fn confirm_checkpoint(&mut self, recorded: ChannelState) -> Result<()> {
        self.open_state()?;
        self.adopt_ledger(recorded);
        Ok(())
    }

    /// Take the ledger's record as the source of truth after an operation
    /// whose outcome was unknown.
    ///
    /// A closed record is classified as cooperative if it settled at the
    /// accepted state or at `attempted_close`, otherwise as forced.
    pub fn reconcile(&mut self, record: Option<ChannelState>, attempted_close: Option<&Voucher>) -> ChannelStatus {
        let Some(record) = record else {
            return self.status;
        };
        if self.status.is_closed() {
            return self.status;
        }
        if let Some(state) = self.state {
            if state.id != record.id {
                return self.status;
            }
        }

        if !record.is_open {
            let settled_at_known_voucher = |nonce: u64, a: u64, b: u64| {
                record.nonce == nonce && record.balance_a == a && record.balance_b == b
            };
            let cooperative = self
                .state
                .map(|s| s.nonce > 0 && settled_at_known_voucher(s.nonce, s.balance_a, s.balance_b))
                .unwrap_or(false)
                || attempted_close
                    .map(|v| settled_at_known_voucher(v.nonce(), v.balance_a(), v.balance_b()))
                    .unwrap_or(false);

            self.adopt_ledger(record);
            self.status = if cooperative {
                ChannelStatus::CooperativelyClosed
            } else {
                ChannelStatus::ForceClosed
            };
        } else if self.status == ChannelStatus::Unopened {
            self.state = Some(record);
            self.ledger_nonce = record.nonce;
            self.status = ChannelStatus::Open;
        } else {
            self.adopt_ledger(record);
        }
        self.status
    }

    /// Merge a ledger record into the off-chain view. Balances are only
    /// replaced when the ledger is at or ahead of the accepted nonce.
    fn adopt_ledger(&mut self, record: ChannelState) {
        self.ledger_nonce = record.nonce;
        match self.state.as_mut() {
            Some(state) if record.nonce < state.nonce && record.is_open => {
                state.is_open = record.is_open;
            }
            Some(state) => *state = record,
            None => self.state = Some(record),
        }
    }

    /// Our role in the channel, if `key` is a participant.
    pub fn role_of(&self, key: &PublicKey) -> Option<Role> {
        self.state.and_then(|s| s.role_of(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sig::{KeyPair, Signer};
    use rand::{rngs::StdRng, SeedableRng};

    const NOW: i64 = 1_700_000_000;

    struct Fixture {
        a: KeyPair,
        b: KeyPair,
        machine: ChannelMachine,
    }

    fn open(deposit: u64) -> Fixture {
        let mut rng = StdRng::seed_from_u64(1);
        let k1 = KeyPair::generate(&mut rng);
        let k2 = KeyPair::generate(&mut rng);
        let (a, b) = if k1.public_key() < k2.public_key() { (k1, k2) } else { (k2, k1) };

        let mut machine = ChannelMachine::new();
        let record = machine
            .prepare_open(a.public_key(), b.public_key(), deposit, 100, NOW)
            .unwrap();
        machine.confirm_open(record).unwrap();
        Fixture { a, b, machine }
    }

    fn signed(f: &Fixture, balance_a: u64, balance_b: u64, nonce: u64) -> Voucher {
        let id = f.machine.channel_id().unwrap();
        let mut v = Voucher::create(id, balance_a, balance_b, nonce).unwrap();
        v.add_signature(v.sign(&f.a), Role::PartyA);
        v.add_signature(v.sign(&f.b), Role::PartyB);
        v
    }

    #[test]
    fn prepare_open_rejects_bad_input() {
        let m = ChannelMachine::new();
        let k = PublicKey::default();
        let other = PublicKey([1; crate::sig::PUBLIC_KEY_LEN]);
        assert!(matches!(
            m.prepare_open(k, other, 0, 10, NOW),
            Err(ChannelError::InvalidAmount(_))
        ));
        assert!(matches!(
            m.prepare_open(k, k, 10, 10, NOW),
            Err(ChannelError::InvalidKey(_))
        ));
    }

    #[test]
    fn deposit_goes_to_party_a() {
        let m = ChannelMachine::new();
        let low = PublicKey([1; crate::sig::PUBLIC_KEY_LEN]);
        let high = PublicKey([2; crate::sig::PUBLIC_KEY_LEN]);

        let rec = m.prepare_open(low, high, 50, 10, NOW).unwrap();
        assert_eq!((rec.party_a, rec.party_b), (low, high));
        assert_eq!((rec.balance_a, rec.balance_b), (50, 0));
        assert_eq!(rec.timeout_at, NOW + 10);
        assert_eq!(rec.id, ChannelId::derive(&low, &high));

        assert!(matches!(
            m.prepare_open(high, low, 50, 10, NOW),
            Err(ChannelError::InvalidKey("opener must hold the lexicographically smaller key"))
        ));
        assert_eq!(m.status(), ChannelStatus::Unopened);
    }

    #[test]
    fn open_twice_fails() {
        let mut f = open(10);
        let state = f.machine.state().unwrap();
        assert!(matches!(
            f.machine.confirm_open(state),
            Err(ChannelError::AlreadyOpened(ChannelStatus::Open))
        ));
    }

    #[test]
    fn stale_nonce_checked_before_signatures() {
        let mut f = open(100);
        f.machine.accept_voucher(&signed(&f, 60, 40, 1)).unwrap();

        // Unsigned and stale: staleness wins.
        let id = f.machine.channel_id().unwrap();
        let unsigned = Voucher::create(id, 50, 50, 1).unwrap();
        assert_eq!(
            f.machine.check_voucher(&unsigned),
            Err(ChannelError::StaleVoucher { nonce: 1, current: 1 })
        );
    }

    #[test]
    fn wrong_channel_rejected() {
        let f = open(100);
        let mut v = Voucher::create(ChannelId([9; 32]), 50, 50, 1).unwrap();
        v.add_signature(v.sign(&f.a), Role::PartyA);
        v.add_signature(v.sign(&f.b), Role::PartyB);
        assert!(matches!(
            f.machine.check_voucher(&v),
            Err(ChannelError::ChannelMismatch { .. })
        ));
    }

    #[test]
    fn failed_accept_does_not_mutate() {
        let mut f = open(100);
        let before = f.machine.state();
        let bad = signed(&f, 10, 10, 1);
        assert!(matches!(
            f.machine.accept_voucher(&bad),
            Err(ChannelError::ConservationViolation { expected: 100, actual: 20 })
        ));
        assert_eq!(f.machine.state(), before);
    }

    #[test]
    fn settlement_accepts_the_accepted_state() {
        let mut f = open(100);
        let v = signed(&f, 70, 30, 1);
        f.machine.accept_voucher(&v).unwrap();
        assert_eq!(f.machine.check_settlement(&v), Ok(()));

        // An older voucher than the accepted one is stale for settlement.
        let mut g = open(100);
        g.machine.accept_voucher(&signed(&g, 70, 30, 2)).unwrap();
        let older = signed(&g, 80, 20, 1);
        assert!(matches!(
            g.machine.check_settlement(&older),
            Err(ChannelError::StaleVoucher { nonce: 1, current: 2 })
        ));
    }

    #[test]
    fn settlement_above_ledger_nonce_only() {
        let mut f = open(100);
        let v = signed(&f, 70, 30, 1);
        f.machine.accept_voucher(&v).unwrap();
        let mut recorded = f.machine.state().unwrap();
        recorded.nonce = 1;
        f.machine.confirm_checkpoint(recorded).unwrap();
        assert_eq!(f.machine.ledger_nonce(), 1);
        assert!(matches!(
            f.machine.check_settlement(&v),
            Err(ChannelError::StaleVoucher { nonce: 1, current: 1 })
        ));
    }

    #[test]
    fn force_close_waits_for_timeout() {
        let mut f = open(100);
        assert_eq!(
            f.machine.check_force_close(NOW + 99),
            Err(ChannelError::TimeoutNotReached { now: NOW + 99, timeout_at: NOW + 100 })
        );
        assert_eq!(f.machine.check_force_close(NOW + 100), Ok(()));

        let mut settled = f.machine.state().unwrap();
        settled.is_open = false;
        f.machine.confirm_force_close(settled).unwrap();
        assert_eq!(f.machine.status(), ChannelStatus::ForceClosed);
    }

    #[test]
    fn closed_is_terminal() {
        let mut f = open(100);
        let v = signed(&f, 100, 0, 1);
        let mut settled = f.machine.state().unwrap();
        settled.is_open = false;
        settled.nonce = 1;
        f.machine.confirm_close(settled).unwrap();
        assert_eq!(f.machine.status(), ChannelStatus::CooperativelyClosed);

        let closed = ChannelStatus::CooperativelyClosed;
        assert_eq!(f.machine.check_voucher(&v), Err(ChannelError::ChannelNotOpen(closed)));
        assert_eq!(f.machine.check_force_close(i64::MAX), Err(ChannelError::ChannelNotOpen(closed)));
        assert_eq!(f.machine.confirm_close(settled), Err(ChannelError::ChannelNotOpen(closed)));
        assert_eq!(f.machine.reconcile(Some(settled), None), closed);
    }

    #[test]
    fn reconcile_classifies_closures() {
        let mut f = open(100);
        let v = signed(&f, 40, 60, 1);
        f.machine.accept_voucher(&v).unwrap();

        let mut forced = f.machine.clone();
        let mut stale = f.machine.state().unwrap();
        stale.balance_a = 100;
        stale.balance_b = 0;
        stale.nonce = 0;
        stale.is_open = false;
        assert_eq!(forced.reconcile(Some(stale), None), ChannelStatus::ForceClosed);
        assert_eq!(forced.state().unwrap().balance_a, 100);

        let mut settled = f.machine.state().unwrap();
        settled.is_open = false;
        assert_eq!(
            f.machine.reconcile(Some(settled), Some(&v)),
            ChannelStatus::CooperativelyClosed
        );
    }

    #[test]
    fn reconcile_opens_unopened() {
        let f = open(100);
        let mut m = ChannelMachine::new();
        assert_eq!(m.reconcile(None, None), ChannelStatus::Unopened);
        assert_eq!(m.reconcile(f.machine.state(), None), ChannelStatus::Open);
        assert_eq!(m.state(), f.machine.state());
    }
}
