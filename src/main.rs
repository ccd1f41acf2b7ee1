mod cli;
mod codec;
mod errors;
mod forwarder;
mod parsers;
mod processor;
mod protocol;
mod response_builder;

use std::future::Future;

use anyhow::Context;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::forwarder::Forwarder;
use crate::protocol::MAX_DATAGRAM_SIZE;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse_args();

    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_max_level(args.log_level())
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let sock = UdpSocket::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind UDP socket on {}", args.listen))?;

    let forwarder = args.forwarder();
    match &forwarder {
        Some(forwarder) => info!(
            "Forwarding to {} (rcode policy {}, timeout {}s)",
            forwarder.upstream(),
            args.forward_rcode,
            args.timeout
        ),
        None => info!("No resolver configured, answering with placeholder records"),
    }

    info!("DNS server listening on {}", args.listen);

    serve(&sock, forwarder.as_ref(), shutdown_signal()).await;
    info!("Shutting down");
    Ok(())
}

/// Resolves on the first Ctrl-C. If the handler cannot be installed the
/// server keeps running and must be stopped some other way.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Answer datagrams on `sock` until `shutdown` resolves.
///
/// The shutdown future is created once and raced against both the receive
/// and the handling of each query, so a signal that arrives while a query
/// waits on the upstream still stops the loop.
async fn serve<F>(sock: &UdpSocket, forwarder: Option<&Forwarder>, shutdown: F)
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        let (len, addr) = tokio::select! {
            received = sock.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(e) => {
                    // e.g. ICMP errors surfacing on the socket; keep serving
                    warn!("Error receiving datagram: {}", e);
                    continue;
                }
            },
            () = &mut shutdown => return,
        };
        debug!("Received {} bytes from {}", len, addr);

        // One datagram is handled to completion before the next is read
        let handled = tokio::select! {
            handled = processor::handle_query(&buf[..len], forwarder) => handled,
            () = &mut shutdown => return,
        };
        let Some(response) = handled else {
            warn!("Dropped datagram from {}", addr);
            continue;
        };

        match sock.send_to(&response, addr).await {
            Ok(sent) => info!("Sent DNS response ({} bytes) to {}", sent, addr),
            Err(e) => warn!("Failed to send DNS response to {}: {}", addr, e),
        }
    }
}
