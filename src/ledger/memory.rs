use std::{collections::HashMap, collections::VecDeque, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;
use sha3::{Digest, Sha3_256};
use tracing::{debug, info, warn};

use super::{LedgerAdapter, LedgerError, LedgerReceipt, OpenRequest};
use crate::{
    channel::{canonical_order, ChannelState, Voucher},
    clock::Clock,
    config::LedgerConfig,
    types::{ChannelId, PublicKey},
};

/// Failure to inject into the next ledger call. Reads only act on
/// [Fault::Unavailable].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Fail without applying anything.
    Unavailable,
    /// Apply the operation, then fail as if the response got lost.
    LoseResponse,
}

/// Ledger kept in process memory, enforcing the same rules as the on-ledger
/// program.
#[derive(Debug)]
pub struct InMemoryLedger {
    program_id: String,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    channels: HashMap<ChannelId, ChannelState>,
    tx_count: u64,
    faults: VecDeque<Fault>,
}

fn reject(reason: impl Into<String>) -> LedgerError {
    LedgerError::Rejected(reason.into())
}

impl InMemoryLedger {
    pub fn new(config: &LedgerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            program_id: config.program_id.clone(),
            clock,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn program_id(&self) -> &str {
        &self.program_id
    }

    /// Queue a fault; faults are consumed one per call, in order.
    pub fn inject_fault(&self, fault: Fault) {
        self.inner.lock().faults.push_back(fault);
    }

    /// Number of applied transactions.
    pub fn transaction_count(&self) -> u64 {
        self.inner.lock().tx_count
    }

    /// Run `op` against the records, honoring the next injected fault.
    fn submit(
        &self,
        id: ChannelId,
        op: impl FnOnce(&mut HashMap<ChannelId, ChannelState>, i64) -> Result<ChannelState, LedgerError>,
    ) -> Result<LedgerReceipt, LedgerError> {
        let mut inner = self.inner.lock();
        let fault = inner.faults.pop_front();
        if fault == Some(Fault::Unavailable) {
            warn!(%id, "injected fault: ledger unavailable");
            return Err(LedgerError::Unavailable("injected fault".into()));
        }

        let state = op(&mut inner.channels, self.clock.now())?;
        inner.tx_count += 1;
        let signature = self.tx_signature(id, inner.tx_count);

        if fault == Some(Fault::LoseResponse) {
            warn!(%id, %signature, "injected fault: applied but response lost");
            return Err(LedgerError::Unavailable("response lost".into()));
        }
        Ok(LedgerReceipt { signature, state })
    }

    fn tx_signature(&self, id: ChannelId, seq: u64) -> String {
        let mut hasher = Sha3_256::new();
        hasher.update(self.program_id.as_bytes());
        hasher.update(id.0);
        hasher.update(seq.to_le_bytes());
        hex::encode(hasher.finalize())
    }

    fn read<T>(&self, f: impl FnOnce(&HashMap<ChannelId, ChannelState>, i64) -> T) -> Result<T, LedgerError> {
        let mut inner = self.inner.lock();
        // A lost response only makes sense for submissions, leave it queued.
        if inner.faults.front() == Some(&Fault::Unavailable) {
            inner.faults.pop_front();
            return Err(LedgerError::Unavailable("injected fault".into()));
        }
        Ok(f(&inner.channels, self.clock.now()))
    }
}

/// Checks shared by update and close.
fn check_voucher(
    channels: &HashMap<ChannelId, ChannelState>,
    voucher: &Voucher,
) -> Result<ChannelState, LedgerError> {
    let id = voucher.channel_id();
    let record = *channels.get(&id).ok_or(LedgerError::NotFound(id))?;
    if !record.is_open {
        return Err(reject("channel is closed"));
    }
    if voucher.nonce() <= record.nonce {
        return Err(reject(format!(
            "nonce {} not above recorded {}",
            voucher.nonce(),
            record.nonce
        )));
    }
    if voucher.total() != Some(record.total()) {
        return Err(reject("balances do not add up to the deposit"));
    }
    voucher
        .verify_parties(&record.party_a, &record.party_b)
        .map_err(|e| reject(e.to_string()))?;
    Ok(record)
}

#[async_trait]
impl LedgerAdapter for InMemoryLedger {
    async fn open_channel(&self, req: OpenRequest) -> Result<LedgerReceipt, LedgerError> {
        let (party_a, party_b) = canonical_order(req.opener, req.counterparty);
        let id = ChannelId::derive(&party_a, &party_b);

        let res = self.submit(id, |channels, now| {
            if party_a == party_b {
                return Err(reject("parties must differ"));
            }
            if req.opener != party_a {
                return Err(reject("opener must hold the lexicographically smaller key"));
            }
            if req.deposit == 0 {
                return Err(reject("deposit must be positive"));
            }
            if channels.contains_key(&id) {
                return Err(reject("channel account already exists"));
            }

            let timeout = i64::try_from(req.timeout_seconds).unwrap_or(i64::MAX);
            let record = ChannelState {
                id,
                party_a,
                party_b,
                balance_a: req.deposit,
                balance_b: 0,
                nonce: 0,
                is_open: true,
                opened_at: now,
                timeout_at: now.saturating_add(timeout),
            };
            channels.insert(id, record);
            Ok(record)
        });

        if let Ok(receipt) = &res {
            info!(%id, deposit = req.deposit, tx = %receipt.signature, "channel opened");
        }
        res
    }

    async fn update_channel(&self, voucher: &Voucher) -> Result<LedgerReceipt, LedgerError> {
        let id = voucher.channel_id();
        let res = self.submit(id, |channels, _| {
            let mut record = check_voucher(channels, voucher)?;
            record.balance_a = voucher.balance_a();
            record.balance_b = voucher.balance_b();
            record.nonce = voucher.nonce();
            channels.insert(id, record);
            Ok(record)
        });

        if let Ok(receipt) = &res {
            debug!(%id, nonce = voucher.nonce(), tx = %receipt.signature, "channel checkpointed");
        }
        res
    }

    async fn close_channel(&self, voucher: &Voucher) -> Result<LedgerReceipt, LedgerError> {
        let id = voucher.channel_id();
        let res = self.submit(id, |channels, _| {
            let mut record = check_voucher(channels, voucher)?;
            record.balance_a = voucher.balance_a();
            record.balance_b = voucher.balance_b();
            record.nonce = voucher.nonce();
            record.is_open = false;
            channels.insert(id, record);
            Ok(record)
        });

        if let Ok(receipt) = &res {
            info!(%id, nonce = voucher.nonce(), tx = %receipt.signature, "channel closed");
        }
        res
    }

    async fn force_close_channel(
        &self,
        id: ChannelId,
        authority: PublicKey,
    ) -> Result<LedgerReceipt, LedgerError> {
        let res = self.submit(id, |channels, now| {
            let mut record = *channels.get(&id).ok_or(LedgerError::NotFound(id))?;
            if !record.is_open {
                return Err(reject("channel is closed"));
            }
            if !record.has_timed_out(now) {
                return Err(reject(format!(
                    "timeout not reached: {} < {}",
                    now, record.timeout_at
                )));
            }
            if !record.is_participant(&authority) {
                return Err(reject("authority is not a channel participant"));
            }
            record.is_open = false;
            channels.insert(id, record);
            Ok(record)
        });

        if let Ok(receipt) = &res {
            info!(%id, nonce = receipt.state.nonce, tx = %receipt.signature, "channel force-closed");
        }
        res
    }

    async fn get_channel_state(&self, id: ChannelId) -> Result<Option<ChannelState>, LedgerError> {
        self.read(|channels, _| channels.get(&id).copied())
    }

    async fn is_channel_timed_out(&self, id: ChannelId) -> Result<bool, LedgerError> {
        self.read(|channels, now| {
            channels
                .get(&id)
                .map(|r| r.has_timed_out(now))
                .ok_or(LedgerError::NotFound(id))
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::Role,
        clock::ManualClock,
        sig::{KeyPair, Signer},
    };
    use rand::{rngs::StdRng, SeedableRng};

    const T0: i64 = 1_000;

    struct Fixture {
        clock: Arc<ManualClock>,
        ledger: InMemoryLedger,
        a: KeyPair,
        b: KeyPair,
    }

    fn setup() -> Fixture {
        let mut rng = StdRng::seed_from_u64(7);
        let k1 = KeyPair::generate(&mut rng);
        let k2 = KeyPair::generate(&mut rng);
        let (a, b) = if k1.public_key() < k2.public_key() { (k1, k2) } else { (k2, k1) };
        let clock = Arc::new(ManualClock::new(T0));
        let ledger = InMemoryLedger::new(&LedgerConfig::new("test-program"), clock.clone());
        Fixture { clock, ledger, a, b }
    }

    fn req(f: &Fixture, deposit: u64) -> OpenRequest {
        OpenRequest {
            opener: f.a.public_key(),
            counterparty: f.b.public_key(),
            deposit,
            timeout_seconds: 60,
        }
    }

    fn signed(f: &Fixture, id: ChannelId, a: u64, b: u64, nonce: u64) -> Voucher {
        let mut v = Voucher::create(id, a, b, nonce).unwrap();
        v.add_signature(v.sign(&f.a), Role::PartyA);
        v.add_signature(v.sign(&f.b), Role::PartyB);
        v
    }

    #[tokio::test]
    async fn open_records_channel() {
        let f = setup();
        let r = f.ledger.open_channel(req(&f, 100)).await.unwrap();
        assert_eq!(r.state.balance_a, 100);
        assert_eq!(r.state.nonce, 0);
        assert_eq!(r.state.timeout_at, T0 + 60);
        assert_eq!(r.signature.len(), 64);
        assert_eq!(f.ledger.get_channel_state(r.state.id).await.unwrap(), Some(r.state));
    }

    #[tokio::test]
    async fn open_twice_rejected() {
        let f = setup();
        f.ledger.open_channel(req(&f, 100)).await.unwrap();
        assert!(matches!(
            f.ledger.open_channel(req(&f, 5)).await,
            Err(LedgerError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn opener_must_be_party_a() {
        let f = setup();
        let mut swapped = req(&f, 100);
        core::mem::swap(&mut swapped.opener, &mut swapped.counterparty);
        assert_eq!(
            f.ledger.open_channel(swapped).await,
            Err(LedgerError::Rejected(
                "opener must hold the lexicographically smaller key".into()
            ))
        );
        assert_eq!(f.ledger.transaction_count(), 0);
    }

    #[tokio::test]
    async fn zero_deposit_rejected() {
        let f = setup();
        assert!(matches!(
            f.ledger.open_channel(req(&f, 0)).await,
            Err(LedgerError::Rejected(_))
        ));
        assert_eq!(f.ledger.transaction_count(), 0);
    }

    #[tokio::test]
    async fn update_then_close_enforces_nonce() {
        let f = setup();
        let id = f.ledger.open_channel(req(&f, 100)).await.unwrap().state.id;

        let v1 = signed(&f, id, 70, 30, 1);
        let r = f.ledger.update_channel(&v1).await.unwrap();
        assert!(r.state.is_open);
        assert_eq!(r.state.nonce, 1);

        assert!(matches!(f.ledger.close_channel(&v1).await, Err(LedgerError::Rejected(_))));

        let v2 = signed(&f, id, 60, 40, 2);
        let r = f.ledger.close_channel(&v2).await.unwrap();
        assert!(!r.state.is_open);
        assert_eq!((r.state.balance_a, r.state.balance_b), (60, 40));

        // Tombstone stays readable.
        assert_eq!(f.ledger.get_channel_state(id).await.unwrap(), Some(r.state));
    }

    #[tokio::test]
    async fn close_requires_both_valid_signatures() {
        let f = setup();
        let id = f.ledger.open_channel(req(&f, 100)).await.unwrap().state.id;

        let mut v = Voucher::create(id, 50, 50, 1).unwrap();
        v.add_signature(v.sign(&f.a), Role::PartyA);
        assert!(matches!(f.ledger.close_channel(&v).await, Err(LedgerError::Rejected(_))));

        v.add_signature(v.sign(&f.a), Role::PartyB);
        assert!(matches!(f.ledger.close_channel(&v).await, Err(LedgerError::Rejected(_))));

        let bad_total = signed(&f, id, 50, 51, 1);
        assert!(matches!(
            f.ledger.close_channel(&bad_total).await,
            Err(LedgerError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn unknown_channel_not_found() {
        let f = setup();
        let id = ChannelId([3; 32]);
        let v = signed(&f, id, 1, 1, 1);
        assert_eq!(f.ledger.close_channel(&v).await, Err(LedgerError::NotFound(id)));
        assert_eq!(f.ledger.get_channel_state(id).await, Ok(None));
        assert_eq!(f.ledger.is_channel_timed_out(id).await, Err(LedgerError::NotFound(id)));
    }

    #[tokio::test]
    async fn force_close_after_timeout_by_participant() {
        let f = setup();
        let id = f.ledger.open_channel(req(&f, 100)).await.unwrap().state.id;
        let stranger = PublicKey([0xee; crate::sig::PUBLIC_KEY_LEN]);

        assert!(!f.ledger.is_channel_timed_out(id).await.unwrap());
        assert!(matches!(
            f.ledger.force_close_channel(id, f.b.public_key()).await,
            Err(LedgerError::Rejected(_))
        ));

        f.clock.advance(60);
        assert!(f.ledger.is_channel_timed_out(id).await.unwrap());
        assert!(matches!(
            f.ledger.force_close_channel(id, stranger).await,
            Err(LedgerError::Rejected(_))
        ));
        let r = f.ledger.force_close_channel(id, f.b.public_key()).await.unwrap();
        assert!(!r.state.is_open);
        assert_eq!(r.state.balance_a, 100);
    }

    #[tokio::test]
    async fn injected_faults() {
        let f = setup();
        f.ledger.inject_fault(Fault::Unavailable);
        assert!(matches!(
            f.ledger.open_channel(req(&f, 100)).await,
            Err(LedgerError::Unavailable(_))
        ));
        assert_eq!(f.ledger.transaction_count(), 0);

        f.ledger.inject_fault(Fault::LoseResponse);
        assert!(matches!(
            f.ledger.open_channel(req(&f, 100)).await,
            Err(LedgerError::Unavailable(_))
        ));
        assert_eq!(f.ledger.transaction_count(), 1);

        let id = ChannelId::derive(&f.a.public_key(), &f.b.public_key());
        assert!(f.ledger.get_channel_state(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn reads_leave_lost_responses_for_the_next_submission() {
        let f = setup();
        let id = ChannelId::derive(&f.a.public_key(), &f.b.public_key());
        f.ledger.inject_fault(Fault::LoseResponse);
        assert_eq!(f.ledger.get_channel_state(id).await, Ok(None));
        assert!(matches!(
            f.ledger.open_channel(req(&f, 100)).await,
            Err(LedgerError::Unavailable(_))
        ));
        assert_eq!(f.ledger.transaction_count(), 1);
    }
}
