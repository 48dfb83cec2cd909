//! TCP ingress server.
//!
//! Connections are short-lived: a worker connects, writes one 45-byte
//! report, and waits for the one-byte acknowledgement. The server reads
//! under a deadline, validates through the wire codec, and enqueues the
//! report for the pipeline.
//!
//! Reply discipline: an accepted report gets exactly the single byte
//! `0x31` back; every rejection (deadline, short read, decode failure,
//! full queue) closes the connection with zero bytes written. Workers
//! treat a missing acknowledgement as "not accepted" and move on, so a
//! saturated queue sheds load without any extra protocol.
//!
//! The ingress path touches no resource owned by the pipeline task: no
//! working-copy I/O, no artifact reads, no tracker calls.

use std::net::SocketAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use vopr_core::wire::{BugReport, ACK_BYTE, REPORT_WIRE_SIZE};

/// Deadline for a connection to deliver its full 45 bytes.
pub const READ_DEADLINE: Duration = Duration::from_secs(10);

/// Capacity of the report queue. Ingress never blocks on a full queue;
/// it drops the connection unacknowledged instead.
pub const QUEUE_CAPACITY: usize = 256;

/// A validated report waiting for the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct PendingReport {
    /// The decoded report.
    pub report: BugReport,
    /// When ingress accepted it.
    pub received_at: DateTime<Utc>,
}

/// Accepts connections until shutdown is signalled, then drains in-flight
/// connections (each bounded by [`READ_DEADLINE`]).
///
/// # Errors
///
/// Returns an error only if the listener itself fails irrecoverably;
/// per-connection failures are logged and absorbed.
pub async fn run(
    listener: TcpListener,
    queue: mpsc::Sender<PendingReport>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "ingress listening");

    let mut connections: JoinSet<()> = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let queue = queue.clone();
                        connections.spawn(handle_connection(stream, peer, queue));
                    },
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                    },
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {},
            changed = shutdown.changed() => {
                // A dropped sender means the hub is going away too.
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            },
        }
    }

    info!(
        in_flight = connections.len(),
        "ingress stopping, draining connections"
    );
    while connections.join_next().await.is_some() {}
    Ok(())
}

/// Handles one connection: bounded read, decode, enqueue, ack.
async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    queue: mpsc::Sender<PendingReport>,
) {
    let mut buf = [0u8; REPORT_WIRE_SIZE];
    match tokio::time::timeout(READ_DEADLINE, stream.read_exact(&mut buf)).await {
        Err(_) => {
            debug!(%peer, "read deadline expired");
            return;
        },
        Ok(Err(e)) => {
            debug!(%peer, error = %e, "connection ended before a full report");
            return;
        },
        Ok(Ok(_)) => {},
    }

    let report = match BugReport::decode(&buf) {
        Ok(report) => report,
        Err(e) => {
            info!(%peer, error = %e, "rejected report");
            return;
        },
    };

    let pending = PendingReport {
        report,
        received_at: Utc::now(),
    };
    if queue.try_send(pending).is_err() {
        // Full or pipeline gone; either way the worker sees no ack.
        warn!(%peer, seed = report.seed, "queue unavailable, report not accepted");
        return;
    }

    info!(
        %peer,
        kind = %report.kind,
        seed = report.seed,
        commit = %report.commit,
        "report accepted"
    );
    if let Err(e) = stream.write_all(&[ACK_BYTE]).await {
        debug!(%peer, error = %e, "failed to write acknowledgement");
    }
}
