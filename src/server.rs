//! UDP and TCP DNS server loops.
//!
//! Each datagram / connection is handled in its own task; the responder is
//! stateless, so the loops share one instance per transport.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{debug, info, warn};

use crate::dns::DEFAULT_MSG_SIZE;
use crate::responder::QueryResponder;

pub async fn run_udp_server(
    bind_addr: SocketAddr,
    responder: Arc<QueryResponder>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let sock = Arc::new(UdpSocket::bind(bind_addr).await?);
    info!("UDP DNS server listening on {}", bind_addr);

    let mut buf = vec![0; DEFAULT_MSG_SIZE as usize];

    loop {
        let (read_bytes, src_addr) = sock.recv_from(&mut buf).await?;

        let query = buf[..read_bytes].to_vec();
        let responder = responder.clone();
        let sock = sock.clone();

        tokio::spawn(async move {
            if let Some(reply) = responder.respond(&query, true) {
                if let Err(e) = sock.send_to(&reply, src_addr).await {
                    warn!("Failed to send UDP reply to {}: {:?}", src_addr, e);
                }
            }
        });
    }
}

pub async fn run_tcp_server(
    bind_addr: SocketAddr,
    responder: Arc<QueryResponder>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!("TCP DNS server listening on {}", bind_addr);

    loop {
        let (stream, src_addr) = listener.accept().await?;
        let responder = responder.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_tcp_connection(stream, src_addr, responder).await {
                debug!("TCP connection error from {}: {:?}", src_addr, e);
            }
        });
    }
}

async fn handle_tcp_connection(
    mut stream: TcpStream,
    src_addr: SocketAddr,
    responder: Arc<QueryResponder>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut length_buf = [0u8; 2];

    loop {
        // 2-byte length prefix per message (RFC 1035 §4.2.2)
        match stream.read_exact(&mut length_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("TCP connection closed by client {}", src_addr);
                break;
            }
            Err(e) => return Err(e.into()),
        }

        let message_length = u16::from_be_bytes(length_buf) as usize;
        let mut message_buf = vec![0; message_length];
        stream.read_exact(&mut message_buf).await?;

        match responder.respond(&message_buf, false) {
            Some(reply) => {
                let reply_length = reply.len() as u16;
                stream.write_all(&reply_length.to_be_bytes()).await?;
                stream.write_all(&reply).await?;
                stream.flush().await?;
            }
            None => {
                // silent drop; close the stream like the UDP path drops
                break;
            }
        }
    }

    Ok(())
}
