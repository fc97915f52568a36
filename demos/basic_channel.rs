//! Walkthrough: Alice opens a channel to Bob, pays him three times off-chain
//! and closes cooperatively.
//!
//! Both parties share one in-memory ledger. Messages travel as length-prefixed
//! protobuf frames over tokio channels. Run with `RUST_LOG=debug` to see every
//! step.

use std::sync::Arc;

use paychan::{
    clock::SystemClock,
    config::Config,
    ledger::InMemoryLedger,
    messages::ParticipantMessage,
    sig::{KeyPair, Signer},
    wire::{BytesBus, MessageBus, ProtoBufEncodingLayer},
    ChannelClient, ClientSession, PublicKey,
};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const CONFIG: &str = r#"
[channel]
timeout_seconds = 3600

[ledger]
program_id = "paychan-demo"
"#;

const DEPOSIT: u64 = 1_000_000_000;
const PAYMENTS: [u64; 3] = [100_000_000, 50_000_000, 25_000_000];

/// Frames to the other party, standing in for a network connection.
#[derive(Debug)]
struct Bus {
    name: &'static str,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl BytesBus for Bus {
    fn send_to_participant(&self, frame: &[u8]) {
        info!(from = self.name, bytes = frame.len(), "sending frame");
        if self.tx.send(frame.to_vec()).is_err() {
            warn!(from = self.name, "peer hung up");
        }
    }
}

type Layer = ProtoBufEncodingLayer<Bus>;

fn decode(frame: &[u8]) -> Option<ParticipantMessage> {
    match Layer::decode(frame) {
        Ok((msg, _)) => Some(msg),
        Err(e) => {
            warn!(error = %e, "dropping malformed frame");
            None
        }
    }
}

/// Helper macro to print significant places in the protocol.
macro_rules! print_bold {
    ($($arg:tt)*) => {
        print!("\x1b[1m");
        print!($($arg)*);
        println!("\x1b[0m");
    };
}

async fn alice(
    client: ChannelClient<InMemoryLedger, KeyPair>,
    bob: PublicKey,
    out: Layer,
    mut inbox: mpsc::UnboundedReceiver<Vec<u8>>,
) -> paychan::Result<()> {
    let channel = client.open_channel(bob, DEPOSIT).await?;
    print_bold!("Alice: opened channel {} with {}", channel.channel_id(), DEPOSIT);

    for amount in PAYMENTS {
        let proposal = channel.propose_payment(amount)?;
        out.send_to_participant(ParticipantMessage::VoucherProposal(proposal));

        let Some(frame) = inbox.recv().await else {
            warn!("Bob went away");
            break;
        };
        match decode(&frame) {
            Some(ParticipantMessage::VoucherAccepted(signed)) => {
                channel.accept_counterparty_voucher(signed)?;
                print_bold!("Alice: paid {} (nonce {})", amount, signed.nonce());
            }
            Some(ParticipantMessage::VoucherRejected { nonce, reason, .. }) => {
                warn!(nonce, %reason, "payment rejected");
            }
            _ => warn!("unexpected message"),
        }
    }

    let receipt = channel.close_latest().await?;
    print_bold!(
        "Alice: closed in tx {}, Alice {} / Bob {}",
        receipt.signature,
        receipt.state.balance_a,
        receipt.state.balance_b
    );
    Ok(())
}

async fn bob(
    client: ChannelClient<InMemoryLedger, KeyPair>,
    out: Layer,
    mut inbox: mpsc::UnboundedReceiver<Vec<u8>>,
) -> paychan::Result<()> {
    let mut channel: Option<ClientSession<InMemoryLedger, KeyPair>> = None;

    while let Some(frame) = inbox.recv().await {
        let Some(ParticipantMessage::VoucherProposal(proposal)) = decode(&frame) else {
            warn!("Bob only handles proposals");
            continue;
        };
        if channel.is_none() {
            channel = Some(client.attach(proposal.channel_id()).await?);
        }
        let Some(session) = channel.as_ref() else {
            continue;
        };

        let reply = match session.countersign(proposal) {
            Ok(signed) => ParticipantMessage::VoucherAccepted(signed),
            Err(e) => ParticipantMessage::VoucherRejected {
                id: proposal.channel_id(),
                nonce: proposal.nonce(),
                reason: e.to_string(),
            },
        };
        out.send_to_participant(reply);
    }

    if let Some(session) = channel {
        let status = session.refresh().await?;
        let state = session.state();
        print_bold!("Bob: channel is {:?}, final record {:#?}", status, state);
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_toml_str(CONFIG).expect("demo config is valid");
    let clock = Arc::new(SystemClock);
    let ledger = Arc::new(InMemoryLedger::new(&config.ledger, clock.clone()));

    // Do not use that on any real device, this is just for demonstration.
    let k1 = KeyPair::generate(&mut rand::thread_rng());
    let k2 = KeyPair::generate(&mut rand::thread_rng());
    // Only party A, the smaller key, can open.
    let (alice_key, bob_key) = if k1.public_key() < k2.public_key() { (k1, k2) } else { (k2, k1) };
    let bob_pk = bob_key.public_key();

    let alice_client = ChannelClient::new(ledger.clone(), alice_key, clock.clone(), config.channel);
    let bob_client = ChannelClient::new(ledger.clone(), bob_key, clock, config.channel);

    let (to_bob, bob_inbox) = mpsc::unbounded_channel();
    let (to_alice, alice_inbox) = mpsc::unbounded_channel();
    let alice_out = Layer::new(Bus { name: "Alice", tx: to_bob });
    let bob_out = Layer::new(Bus { name: "Bob", tx: to_alice });

    let alice_task = tokio::spawn(alice(alice_client, bob_pk, alice_out, alice_inbox));
    let bob_task = tokio::spawn(bob(bob_client, bob_out, bob_inbox));

    for (name, handle) in [("Alice", alice_task), ("Bob", bob_task)] {
        match handle.await {
            Ok(Ok(())) => println!("{} done", name),
            Ok(Err(e)) => println!("{} failed: {}", name, e),
            Err(e) => println!("{} panicked: {}", name, e),
        }
    }
}
