//! Per-channel orchestrator driven by one of the two parties.
//!
//! Voucher handling is synchronous and never touches the ledger. Ledger calls
//! are async, serialized per session, and never run while the voucher state is
//! locked.

use core::fmt::Debug;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use super::{canonical_order, ChannelMachine, ChannelState, ChannelStatus, Role, Voucher};
use crate::{
    clock::Clock,
    error::{ChannelError, Result},
    ledger::{LedgerAdapter, LedgerError, LedgerReceipt, OpenRequest},
    sig::Signer,
    types::{ChannelId, PublicKey},
};

/// Voucher-side state, guarded by a single lock.
#[derive(Debug)]
struct View {
    machine: ChannelMachine,
    /// Latest fully signed voucher we know of.
    latest: Option<Voucher>,
    /// Highest nonce handed out or seen so far.
    last_nonce: u64,
    /// Close submitted to the ledger whose outcome is not known yet.
    pending_close: Option<Voucher>,
}

impl View {
    fn new(machine: ChannelMachine) -> Self {
        let last_nonce = machine.state().map_or(0, |s| s.nonce);
        View {
            machine,
            latest: None,
            last_nonce,
            pending_close: None,
        }
    }

    fn adopt_latest(&mut self, voucher: Voucher) {
        if self.latest.map_or(true, |l| voucher.nonce() > l.nonce()) {
            self.latest = Some(voucher);
        }
        self.last_nonce = self.last_nonce.max(voucher.nonce());
    }
}

/// A channel as seen by the local party.
///
/// Share it between tasks behind an `Arc`; all methods take `&self`.
pub struct ChannelSession<L: LedgerAdapter, S: Signer> {
    ledger: Arc<L>,
    signer: S,
    clock: Arc<dyn Clock>,
    channel_id: ChannelId,
    role: Role,
    counterparty: PublicKey,
    view: Mutex<View>,
    ledger_lock: tokio::sync::Mutex<()>,
    needs_resync: AtomicBool,
}

impl<L: LedgerAdapter, S: Signer> Debug for ChannelSession<L, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChannelSession")
            .field("channel_id", &self.channel_id)
            .field("role", &self.role)
            .field("status", &self.status())
            .finish()
    }
}

impl<L: LedgerAdapter, S: Signer> ChannelSession<L, S> {
    /// Session for a channel with `counterparty` that has not been opened
    /// yet. Call [Self::open] to fund it.
    pub fn new(ledger: Arc<L>, signer: S, clock: Arc<dyn Clock>, counterparty: PublicKey) -> Result<Self> {
        let me = signer.public_key();
        if me == counterparty {
            return Err(ChannelError::InvalidKey("a channel needs two distinct parties"));
        }
        let role = if canonical_order(me, counterparty).0 == me {
            Role::PartyA
        } else {
            Role::PartyB
        };
        Ok(Self::from_parts(
            ledger,
            signer,
            clock,
            ChannelId::derive(&me, &counterparty),
            role,
            counterparty,
            ChannelMachine::new(),
        ))
    }

    /// Join a channel that already exists on the ledger, typically one the
    /// counterparty opened.
    pub async fn attach(ledger: Arc<L>, signer: S, clock: Arc<dyn Clock>, channel_id: ChannelId) -> Result<Self> {
        let record = ledger
            .get_channel_state(channel_id)
            .await?
            .ok_or(ChannelError::ChannelNotFound(channel_id))?;
        let role = record
            .role_of(&signer.public_key())
            .ok_or(ChannelError::InvalidKey("local key is not a party of this channel"))?;

        let mut machine = ChannelMachine::new();
        let status = machine.reconcile(Some(record), None);
        info!(channel = %channel_id, %role, ?status, "attached to channel");

        Ok(Self::from_parts(
            ledger,
            signer,
            clock,
            channel_id,
            role,
            record.key(role.other()),
            machine,
        ))
    }

    fn from_parts(
        ledger: Arc<L>,
        signer: S,
        clock: Arc<dyn Clock>,
        channel_id: ChannelId,
        role: Role,
        counterparty: PublicKey,
        machine: ChannelMachine,
    ) -> Self {
        ChannelSession {
            ledger,
            signer,
            clock,
            channel_id,
            role,
            counterparty,
            view: Mutex::new(View::new(machine)),
            ledger_lock: tokio::sync::Mutex::new(()),
            needs_resync: AtomicBool::new(false),
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }
    pub fn role(&self) -> Role {
        self.role
    }
    pub fn counterparty(&self) -> PublicKey {
        self.counterparty
    }
    pub fn status(&self) -> ChannelStatus {
        self.view.lock().machine.status()
    }
    /// Ledger record merged with the latest accepted voucher.
    pub fn state(&self) -> Option<ChannelState> {
        self.view.lock().machine.state()
    }
    pub fn latest_voucher(&self) -> Option<Voucher> {
        self.view.lock().latest
    }
    /// Whether the last ledger call had an unknown outcome.
    pub fn needs_resync(&self) -> bool {
        self.needs_resync.load(Ordering::SeqCst)
    }

    /// Evaluated now against the session's clock.
    pub fn is_timed_out(&self) -> bool {
        let now = self.clock.now();
        self.view
            .lock()
            .machine
            .state()
            .map_or(false, |s| s.is_open && s.has_timed_out(now))
    }

    /// Fund the channel with `deposit`. Only party A opens, so the local key
    /// must be the lexicographically smaller one.
    ///
    /// If an earlier open had an unknown outcome and actually went through,
    /// this fails with [ChannelError::AlreadyOpened] and the session is open.
    #[instrument(skip_all, fields(channel = %self.channel_id, deposit = deposit))]
    pub async fn open(&self, deposit: u64, timeout_seconds: u64) -> Result<LedgerReceipt> {
        let _serial = self.ledger_lock.lock().await;
        self.resync_if_needed().await?;

        let opener = self.signer.public_key();
        let now = self.clock.now();
        self.view
            .lock()
            .machine
            .prepare_open(opener, self.counterparty, deposit, timeout_seconds, now)?;

        let req = OpenRequest {
            opener,
            counterparty: self.counterparty,
            deposit,
            timeout_seconds,
        };
        let res = self.ledger.open_channel(req).await;
        let receipt = self.settle(res, |view, receipt| view.machine.confirm_open(receipt.state))?;
        info!(tx = %receipt.signature, timeout_at = receipt.state.timeout_at, "channel open");
        Ok(receipt)
    }

    /// Propose a new split at the next nonce, signed by the local party only.
    pub fn propose_voucher(&self, balance_a: u64, balance_b: u64) -> Result<Voucher> {
        let mut view = self.view.lock();
        let current = view.machine.state().map_or(0, |s| s.nonce);
        let nonce = view
            .last_nonce
            .max(current)
            .checked_add(1)
            .ok_or(ChannelError::InvalidNonce(u64::MAX))?;

        let mut voucher = Voucher::create(self.channel_id, balance_a, balance_b, nonce)?;
        view.machine.check_proposal(&voucher)?;
        voucher.add_signature(voucher.sign(&self.signer), self.role);
        view.last_nonce = nonce;

        debug!(channel = %self.channel_id, nonce, balance_a, balance_b, "proposed voucher");
        Ok(voucher)
    }

    /// Propose moving `amount` from the local party to the counterparty.
    pub fn propose_payment(&self, amount: u64) -> Result<Voucher> {
        if amount == 0 {
            return Err(ChannelError::InvalidAmount("payment must be positive"));
        }
        let state = self
            .state()
            .ok_or(ChannelError::ChannelNotOpen(ChannelStatus::Unopened))?;
        let mine = state
            .balance(self.role)
            .checked_sub(amount)
            .ok_or(ChannelError::InvalidAmount("payment exceeds the local balance"))?;
        let theirs = state
            .balance(self.role.other())
            .checked_add(amount)
            .ok_or(ChannelError::InvalidAmount("payment overflows the counterparty balance"))?;

        match self.role {
            Role::PartyA => self.propose_voucher(mine, theirs),
            Role::PartyB => self.propose_voucher(theirs, mine),
        }
    }

    /// Countersign a proposal from the counterparty and accept it. The
    /// returned voucher is fully signed and should be sent back.
    pub fn countersign(&self, mut voucher: Voucher) -> Result<Voucher> {
        let mut view = self.view.lock();
        view.machine.check_proposal(&voucher)?;
        voucher.verify_role(self.role.other(), &self.counterparty)?;

        voucher.add_signature(voucher.sign(&self.signer), self.role);
        view.machine.accept_voucher(&voucher)?;
        view.adopt_latest(voucher);

        debug!(channel = %self.channel_id, nonce = voucher.nonce(), "countersigned voucher");
        Ok(voucher)
    }

    /// Accept a fully signed voucher, e.g. our own proposal coming back
    /// countersigned.
    pub fn accept_counterparty_voucher(&self, voucher: Voucher) -> Result<()> {
        let mut view = self.view.lock();
        view.machine.accept_voucher(&voucher)?;
        view.adopt_latest(voucher);

        debug!(channel = %self.channel_id, nonce = voucher.nonce(), "accepted voucher");
        Ok(())
    }

    /// Settle cooperatively with `voucher`, which must be newer than the
    /// accepted state or be the accepted state itself.
    #[instrument(skip_all, fields(channel = %self.channel_id, nonce = voucher.nonce()))]
    pub async fn close(&self, voucher: Voucher) -> Result<LedgerReceipt> {
        let _serial = self.ledger_lock.lock().await;
        self.resync_if_needed().await?;

        {
            let mut view = self.view.lock();
            view.machine.check_settlement(&voucher)?;
            view.pending_close = Some(voucher);
        }

        let res = self.ledger.close_channel(&voucher).await;
        if !matches!(&res, Err(e) if e.is_transient()) {
            self.view.lock().pending_close = None;
        }
        let receipt = self.settle(res, |view, receipt| {
            view.machine.confirm_close(receipt.state)?;
            view.adopt_latest(voucher);
            Ok(())
        })?;
        info!(
            tx = %receipt.signature,
            balance_a = receipt.state.balance_a,
            balance_b = receipt.state.balance_b,
            "channel closed"
        );
        Ok(receipt)
    }

    /// Close with the latest fully signed voucher. Fails with
    /// [ChannelError::InvalidNonce] if no voucher was accepted yet.
    pub async fn close_latest(&self) -> Result<LedgerReceipt> {
        let latest = self.latest_voucher().ok_or(ChannelError::InvalidNonce(0))?;
        self.close(latest).await
    }

    /// Settle at the ledger's recorded balances once the timeout passed.
    #[instrument(skip_all, fields(channel = %self.channel_id))]
    pub async fn force_close_if_timed_out(&self) -> Result<LedgerReceipt> {
        let _serial = self.ledger_lock.lock().await;
        self.resync_if_needed().await?;

        self.view.lock().machine.check_force_close(self.clock.now())?;

        let res = self
            .ledger
            .force_close_channel(self.channel_id, self.signer.public_key())
            .await;
        let receipt = self.settle(res, |view, receipt| {
            view.machine.confirm_force_close(receipt.state)
        })?;

        let latest = self.latest_voucher().map_or(0, |v| v.nonce());
        if receipt.state.nonce < latest {
            warn!(
                settled = receipt.state.nonce,
                latest, "force close settled at an older state than the latest voucher"
            );
        }
        info!(tx = %receipt.signature, "channel force-closed");
        Ok(receipt)
    }

    /// Record `voucher` on the ledger without closing.
    #[instrument(skip_all, fields(channel = %self.channel_id, nonce = voucher.nonce()))]
    pub async fn checkpoint(&self, voucher: Voucher) -> Result<LedgerReceipt> {
        let _serial = self.ledger_lock.lock().await;
        self.resync_if_needed().await?;

        self.view.lock().machine.check_settlement(&voucher)?;

        let res = self.ledger.update_channel(&voucher).await;
        let receipt = self.settle(res, |view, receipt| {
            view.machine.confirm_checkpoint(receipt.state)?;
            view.adopt_latest(voucher);
            Ok(())
        })?;
        debug!(tx = %receipt.signature, "checkpoint recorded");
        Ok(receipt)
    }

    /// Re-read the ledger's record and adopt it.
    #[instrument(skip_all, fields(channel = %self.channel_id))]
    pub async fn refresh(&self) -> Result<ChannelStatus> {
        let _serial = self.ledger_lock.lock().await;
        self.resync().await
    }

    async fn resync_if_needed(&self) -> Result<()> {
        if self.needs_resync.load(Ordering::SeqCst) {
            self.resync().await?;
        }
        Ok(())
    }

    /// Must be called with `ledger_lock` held.
    async fn resync(&self) -> Result<ChannelStatus> {
        let record = self.ledger.get_channel_state(self.channel_id).await?;

        let status = {
            let mut view = self.view.lock();
            let pending = view.pending_close.take();
            let status = view.machine.reconcile(record, pending.as_ref());
            if let (ChannelStatus::CooperativelyClosed, Some(v)) = (status, pending) {
                if record.map_or(false, |r| r.nonce == v.nonce()) {
                    view.adopt_latest(v);
                }
            }
            status
        };

        self.needs_resync.store(false, Ordering::SeqCst);
        debug!(?status, "resynchronized with ledger");
        Ok(status)
    }

    /// Apply a ledger result. An unknown outcome flags the session for
    /// resynchronization before the next ledger call.
    fn settle(
        &self,
        res: core::result::Result<LedgerReceipt, LedgerError>,
        apply: impl FnOnce(&mut View, &LedgerReceipt) -> Result<()>,
    ) -> Result<LedgerReceipt> {
        match res {
            Ok(receipt) if receipt.state.id != self.channel_id => {
                self.needs_resync.store(true, Ordering::SeqCst);
                Err(ChannelError::LedgerRejected(format!(
                    "ledger reported channel {} instead of {}",
                    receipt.state.id, self.channel_id
                )))
            }
            Ok(receipt) => {
                apply(&mut *self.view.lock(), &receipt)?;
                Ok(receipt)
            }
            Err(e) => {
                if e.is_transient() {
                    self.needs_resync.store(true, Ordering::SeqCst);
                    warn!(error = %e, "ledger outcome unknown, will resynchronize");
                }
                Err(e.into())
            }
        }
    }
}
