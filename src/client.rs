use std::sync::Arc;

use tracing::info;

use crate::{
    channel::{ChannelSession, ChannelStatus},
    clock::Clock,
    config::ChannelConfig,
    error::{ChannelError, Result},
    ledger::LedgerAdapter,
    sig::Signer,
    types::{ChannelId, PublicKey},
};

/// Session type handed out by [ChannelClient].
pub type ClientSession<L, S> = ChannelSession<L, Arc<S>>;

/// Entry point for one party: creates and attaches channel sessions.
///
/// It holds the local signer, the ledger adapter and the clock shared by all
/// sessions. Usually an application needs only one ChannelClient.
#[derive(Debug)]
pub struct ChannelClient<L: LedgerAdapter, S: Signer> {
    ledger: Arc<L>,
    signer: Arc<S>,
    clock: Arc<dyn Clock>,
    config: ChannelConfig,
}

impl<L: LedgerAdapter, S: Signer> ChannelClient<L, S> {
    pub fn new(ledger: Arc<L>, signer: S, clock: Arc<dyn Clock>, config: ChannelConfig) -> Self {
        ChannelClient {
            ledger,
            signer: Arc::new(signer),
            clock,
            config,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.signer.public_key()
    }

    /// Unopened session with `counterparty`. Keep it around when opening
    /// fails with an unknown outcome, its next ledger call resynchronizes.
    pub fn session_with(&self, counterparty: PublicKey) -> Result<ClientSession<L, S>> {
        ChannelSession::new(
            self.ledger.clone(),
            self.signer.clone(),
            self.clock.clone(),
            counterparty,
        )
    }

    /// Open and fund a channel with the configured timeout.
    ///
    /// The ledger is read first, so retrying after an open with an unknown
    /// outcome never submits a second open. A channel that is already open
    /// with the same deposit is adopted, any other existing record fails
    /// with [ChannelError::AlreadyOpened].
    pub async fn open_channel(&self, counterparty: PublicKey, deposit: u64) -> Result<ClientSession<L, S>> {
        let session = self.session_with(counterparty)?;
        match session.refresh().await? {
            ChannelStatus::Unopened => {
                session.open(deposit, self.config.timeout_seconds).await?;
            }
            ChannelStatus::Open if session.state().map_or(false, |s| s.total() == deposit) => {
                info!(channel = %session.channel_id(), "channel already on the ledger, adopting it");
            }
            status => return Err(ChannelError::AlreadyOpened(status)),
        }
        Ok(session)
    }

    /// Session for a channel the counterparty opened.
    pub async fn attach(&self, channel_id: ChannelId) -> Result<ClientSession<L, S>> {
        ChannelSession::attach(
            self.ledger.clone(),
            self.signer.clone(),
            self.clock.clone(),
            channel_id,
        )
        .await
    }
}
