//! DNS NOTIFY sender (RFC 1996).
//!
//! Mutations request a broadcast through a coalescing single-slot channel;
//! a background consumer sends NOTIFY with the current SOA to every
//! configured slave under a per-target deadline.

use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use crate::dns::edns::EdnsOpt;
use crate::dns::enums::{RecordClass, RecordType, OPCODE_NOTIFY};
use crate::dns::question::Question;
use crate::dns::{Packet, DEFAULT_MSG_SIZE, MIN_MSG_SIZE};
use crate::dnssec::Signer;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct TransferNotifier {
    tx: mpsc::Sender<()>,
}

impl TransferNotifier {
    /// Start the consumer task and hand back the producer handle.
    pub fn spawn(signer: Arc<Signer>, targets: Vec<String>) -> Self {
        let (tx, mut rx) = mpsc::channel(1);

        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                let Some(soa) = signer.get(RecordType::SOA.code()) else {
                    continue;
                };

                let mut msg = Packet::default();
                msg.header.id = rand::random();
                msg.header.opcode = OPCODE_NOTIFY;
                msg.header.aa = true;
                msg.questions.push(Question::new(
                    signer.zone(),
                    RecordType::SOA,
                    RecordClass::IN,
                ));
                msg.answers.extend_from_slice(&soa.records);

                let mut opt = EdnsOpt::with_payload_size(DEFAULT_MSG_SIZE);
                opt.set_do_flag(true);
                msg.edns = Some(opt);

                let wire = match msg.serialize() {
                    Ok(wire) => wire,
                    Err(e) => {
                        warn!("Failed to serialize NOTIFY: {}", e);
                        continue;
                    }
                };

                for target in &targets {
                    match timeout(NOTIFY_TIMEOUT, exchange(&wire, target, msg.header.id)).await {
                        Ok(Ok(rcode)) if rcode == 0 => {
                            debug!("Sent NOTIFY to server success: {}", target);
                        }
                        Ok(Ok(rcode)) => {
                            debug!("Sent NOTIFY to server, received code {}: {}", rcode, target);
                        }
                        Ok(Err(e)) => {
                            warn!("Sent NOTIFY to server, received error: {}: {}", target, e);
                        }
                        Err(_) => {
                            warn!("NOTIFY response timeout from {}", target);
                        }
                    }
                }
            }
        });

        TransferNotifier { tx }
    }

    /// Request a broadcast. Non-blocking; a pending request coalesces
    /// bursts into one broadcast.
    pub fn notify(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Send one NOTIFY datagram and wait for the acknowledgment rcode.
async fn exchange(
    wire: &[u8],
    target: &str,
    id: u16,
) -> Result<u8, Box<dyn std::error::Error + Send + Sync>> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.send_to(wire, target).await?;

    let mut buf = vec![0u8; MIN_MSG_SIZE as usize];
    loop {
        let (len, _) = socket.recv_from(&mut buf).await?;
        let response = match Packet::parse(&buf[..len]) {
            Ok(response) => response,
            Err(_) => continue,
        };
        if response.header.id == id && response.header.qr {
            return Ok(response.header.rcode);
        }
    }
}
