//! Monerod ZMQ-PUB tip listener.
//!
//! Subscribes to the `json-minimal-chain_main` topic and forwards the root
//! of each announced chain segment into the producer's notification
//! channel. Only the data contract is relied upon: one frame of
//! `topic:json` per publication.

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error};
use zeromq::{Socket, SocketRecv, SubSocket};

use super::producer::TipNotification;
use super::BlockHash;
use crate::error::{HighwayError, Result};

const TOPIC_MINIMAL_CHAIN_MAIN: &str = "json-minimal-chain_main";

#[derive(Deserialize)]
struct MinimalChainMain {
    first_height: u64,
    first_prev_id: BlockHash,
    #[serde(default)]
    ids: Vec<BlockHash>,
}

/// Listen until the notification channel closes, reconnecting on errors.
pub async fn listen_tips(addr: String, tx: mpsc::Sender<TipNotification>) -> Result<()> {
    loop {
        if let Err(e) = run_subscriber(&addr, &tx).await {
            error!("Error listening zmq: {}", e);
        }
        if tx.is_closed() {
            return Ok(());
        }
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    }
}

async fn run_subscriber(addr: &str, tx: &mpsc::Sender<TipNotification>) -> Result<()> {
    let mut socket = SubSocket::new();
    socket
        .connect(addr)
        .await
        .map_err(|e| HighwayError::Rpc(e.to_string()))?;
    socket
        .subscribe(TOPIC_MINIMAL_CHAIN_MAIN)
        .await
        .map_err(|e| HighwayError::Rpc(e.to_string()))?;
    debug!("subscribed to {} on {}", TOPIC_MINIMAL_CHAIN_MAIN, addr);

    loop {
        let message = socket
            .recv()
            .await
            .map_err(|e| HighwayError::Rpc(e.to_string()))?;

        for frame in message.into_vec() {
            let Some(notification) = parse_frame(&frame) else {
                continue;
            };
            if tx.send(notification).await.is_err() {
                // consumer gone, stop listening
                return Ok(());
            }
        }
    }
}

/// Decode one `topic:json` frame into a tip notification.
fn parse_frame(frame: &[u8]) -> Option<TipNotification> {
    let text = std::str::from_utf8(frame).ok()?;
    let payload = text.strip_prefix(TOPIC_MINIMAL_CHAIN_MAIN)?.strip_prefix(':')?;

    let chain: MinimalChainMain = serde_json::from_str(payload).ok()?;
    let id = *chain.ids.first()?;

    Some(TipNotification {
        height: chain.first_height,
        id,
        previous_id: chain.first_prev_id,
    })
}
