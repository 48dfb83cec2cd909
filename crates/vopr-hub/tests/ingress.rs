//! End-to-end tests of the ingress path: real TCP connections against a
//! running server task, observing the acknowledgement discipline and the
//! queue from the pipeline's side.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use vopr_core::wire::{BugKind, BugReport, CommitId, ACK_BYTE, COMMIT_SIZE};
use vopr_hub::server::{self, PendingReport};

struct Harness {
    addr: std::net::SocketAddr,
    queue: mpsc::Receiver<PendingReport>,
    shutdown: watch::Sender<bool>,
    server: tokio::task::JoinHandle<std::io::Result<()>>,
}

impl Harness {
    async fn start(queue_capacity: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::channel(queue_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = tokio::spawn(server::run(listener, tx, shutdown_rx));
        Self {
            addr,
            queue: rx,
            shutdown: shutdown_tx,
            server,
        }
    }

    async fn stop(self) {
        self.shutdown.send(true).unwrap();
        self.server.await.unwrap().unwrap();
    }
}

fn sample_report() -> BugReport {
    BugReport {
        kind: BugKind::Correctness,
        seed: 0x0123_4567_89ab_cdef,
        commit: CommitId::from_bytes([0x0a; COMMIT_SIZE]),
    }
}

/// Sends `bytes` and returns every byte the hub wrote back before closing.
async fn exchange(addr: std::net::SocketAddr, bytes: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(bytes).await.unwrap();
    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await.unwrap();
    reply
}

#[tokio::test]
async fn valid_report_is_acked_and_enqueued() {
    let mut harness = Harness::start(8).await;
    let report = sample_report();

    let reply = exchange(harness.addr, &report.encode()).await;
    assert_eq!(reply, [ACK_BYTE]);

    let pending = harness.queue.recv().await.unwrap();
    assert_eq!(pending.report, report);

    harness.stop().await;
}

#[tokio::test]
async fn duplicate_submission_is_acked_again() {
    // Dedup is the pipeline's job; ingress accepts both copies.
    let mut harness = Harness::start(8).await;
    let report = sample_report();

    for _ in 0..2 {
        let reply = exchange(harness.addr, &report.encode()).await;
        assert_eq!(reply, [ACK_BYTE]);
    }
    assert_eq!(harness.queue.recv().await.unwrap().report, report);
    assert_eq!(harness.queue.recv().await.unwrap().report, report);

    harness.stop().await;
}

#[tokio::test]
async fn corrupt_checksum_gets_no_reply() {
    let mut harness = Harness::start(8).await;
    let mut bytes = sample_report().encode();
    bytes[0] ^= 0x01;

    let reply = exchange(harness.addr, &bytes).await;
    assert!(reply.is_empty());
    assert!(harness.queue.try_recv().is_err());

    harness.stop().await;
}

#[tokio::test]
async fn short_write_gets_no_reply() {
    let mut harness = Harness::start(8).await;
    let bytes = sample_report().encode();

    let mut stream = TcpStream::connect(harness.addr).await.unwrap();
    stream.write_all(&bytes[..20]).await.unwrap();
    // Half-close so the server sees EOF before the deadline.
    stream.shutdown().await.unwrap();

    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await.unwrap();
    assert!(reply.is_empty());
    assert!(harness.queue.try_recv().is_err());

    harness.stop().await;
}

#[tokio::test]
async fn full_queue_sheds_without_ack() {
    let mut harness = Harness::start(1).await;
    let report = sample_report();

    // First report fills the queue and is acknowledged.
    let reply = exchange(harness.addr, &report.encode()).await;
    assert_eq!(reply, [ACK_BYTE]);

    // Second report finds the queue full: connection closes, no ack.
    let reply = exchange(harness.addr, &report.encode()).await;
    assert!(reply.is_empty());

    // Only the first report is queued.
    assert!(harness.queue.try_recv().is_ok());
    assert!(harness.queue.try_recv().is_err());

    harness.stop().await;
}

