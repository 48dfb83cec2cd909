//! End-to-end tests of the processing pipeline against a fake working
//! copy: a real git repository whose "simulator" is a shell script with a
//! scripted exit code. The tracker endpoint points at a closed port, so
//! issue filing fails fast and the tests assert the artifact side of the
//! contract (persisted artifacts survive publish failures by design).

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use vopr_core::dedup::DedupKey;
use vopr_core::publisher::IssuePublisher;
use vopr_core::resolver::RevisionResolver;
use vopr_core::simulator::Simulator;
use vopr_core::store::ArtifactStore;
use vopr_core::trace::TraceCanonicalizer;
use vopr_core::tracker::TrackerClient;
use vopr_core::wire::{BugKind, BugReport, CommitId};
use vopr_hub::pipeline::Pipeline;
use vopr_hub::server::PendingReport;

async fn git(dir: &Path, args: &[&str]) {
    let status = tokio::process::Command::new("git")
        .current_dir(dir)
        .env("GIT_CONFIG_NOSYSTEM", "1")
        .args(args)
        .status()
        .await
        .unwrap();
    assert!(status.success(), "git {args:?} failed");
}

/// A working copy named `tigerbeetle` containing a committed simulator
/// script, with itself as origin so `fetch --all` succeeds.
struct WorkingCopy {
    _root: tempfile::TempDir,
    dir: std::path::PathBuf,
    commit: CommitId,
}

impl WorkingCopy {
    async fn new(simulator_script: &str) -> Self {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("tigerbeetle");
        std::fs::create_dir_all(dir.join("zig-out/bin")).unwrap();

        let binary = dir.join("zig-out/bin/simulator");
        std::fs::write(&binary, simulator_script).unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();

        git(&dir, &["init", "-q", "-b", "main"]).await;
        git(&dir, &["config", "user.email", "hub@example.com"]).await;
        git(&dir, &["config", "user.name", "hub"]).await;
        git(&dir, &["add", "."]).await;
        git(&dir, &["commit", "-q", "-m", "simulator"]).await;
        git(&dir, &["remote", "add", "origin", "."]).await;

        let out = tokio::process::Command::new("git")
            .current_dir(&dir)
            .args(["rev-parse", "HEAD"])
            .output()
            .await
            .unwrap();
        let commit = CommitId::from_hex(String::from_utf8_lossy(&out.stdout).trim()).unwrap();

        Self {
            _root: root,
            dir,
            commit,
        }
    }
}

/// Runs the pipeline over `reports` until the queue drains, then shuts it
/// down. Returns the artifact store (and its directory guard) for
/// assertions.
async fn run_pipeline(
    copy: &WorkingCopy,
    reports: Vec<BugReport>,
) -> (tempfile::TempDir, ArtifactStore) {
    let issue_dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::open(issue_dir.path().join("issues")).unwrap();

    // Closed port: every publish attempt fails fast, retries are capped by
    // the short backoff.
    let tracker = TrackerClient::new("http://127.0.0.1:1").unwrap();
    let publisher = IssuePublisher::new(tracker).with_backoff_base(Duration::from_millis(5));

    let (tx, rx) = mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pipeline = Pipeline::new(
        store.clone(),
        RevisionResolver::new(&copy.dir),
        Simulator::new(&copy.dir),
        TraceCanonicalizer::new("tigerbeetle"),
        publisher,
        rx,
        shutdown_rx,
    );
    let task = tokio::spawn(pipeline.run());

    for report in reports {
        tx.send(PendingReport {
            report,
            received_at: chrono::Utc::now(),
        })
        .await
        .unwrap();
    }
    // Closing the queue lets the pipeline drain it fully and stop.
    drop(tx);
    task.await.unwrap().unwrap();
    drop(shutdown_tx);

    (issue_dir, store)
}

fn count_artifacts(store: &ArtifactStore) -> usize {
    std::fs::read_dir(store.root()).unwrap().count()
}

#[tokio::test]
async fn correctness_failure_produces_one_artifact() {
    let copy = WorkingCopy::new("#!/bin/sh\necho 'replica_count=3'\nexit 129\n").await;
    let report = BugReport {
        kind: BugKind::Correctness,
        seed: 42,
        commit: copy.commit,
    };

    let (_guard, store) = run_pipeline(&copy, vec![report]).await;

    let key = DedupKey::early(&report).unwrap();
    assert!(store.exists(&key));
    assert_eq!(count_artifacts(&store), 1);

    let body = std::fs::read_to_string(store.root().join(key.as_str())).unwrap();
    assert!(body.contains("bug kind: correctness"));
    assert!(body.contains("seed: 42"));
    assert!(body.contains("replica_count=3"));
    assert!(body.contains("outcome: reproduced"));
}

#[tokio::test]
async fn duplicate_report_is_skipped_by_early_dedup() {
    let copy = WorkingCopy::new("#!/bin/sh\nexit 129\n").await;
    let report = BugReport {
        kind: BugKind::Correctness,
        seed: 7,
        commit: copy.commit,
    };

    let (_guard, store) = run_pipeline(&copy, vec![report, report]).await;
    assert_eq!(count_artifacts(&store), 1);
}

#[tokio::test]
async fn crash_reports_with_identical_traces_dedup_after_replay() {
    // Same crash site regardless of seed: the second report hits the late
    // dedup check.
    let script = "#!/bin/sh\n\
        echo '/build/tigerbeetle/src/vsr/replica.zig:10:3: 0xdeadbeef in vsr.commit (simulator)' >&2\n\
        exit 127\n";
    let copy = WorkingCopy::new(script).await;
    let first = BugReport {
        kind: BugKind::Crash,
        seed: 100,
        commit: copy.commit,
    };
    let second = BugReport {
        kind: BugKind::Crash,
        seed: 200,
        commit: copy.commit,
    };

    let (_guard, store) = run_pipeline(&copy, vec![first, second]).await;
    assert_eq!(count_artifacts(&store), 1);

    let entry = std::fs::read_dir(store.root())
        .unwrap()
        .next()
        .unwrap()
        .unwrap();
    let name = entry.file_name().into_string().unwrap();
    assert!(name.starts_with(&format!("3_{}_", copy.commit.to_hex())));

    // The canonical trace in the body carries no machine-specific bytes.
    let body = std::fs::read_to_string(entry.path()).unwrap();
    assert!(body.contains("src/vsr/replica.zig:10:3: 0x???????????? in vsr.commit (simulator)"));
}

#[tokio::test]
async fn unknown_revision_is_dropped_without_artifact() {
    let copy = WorkingCopy::new("#!/bin/sh\nexit 129\n").await;
    let report = BugReport {
        kind: BugKind::Correctness,
        seed: 9,
        commit: CommitId::from_bytes([0x44; 20]),
    };

    let (_guard, store) = run_pipeline(&copy, vec![report]).await;
    assert_eq!(count_artifacts(&store), 0);
}

#[tokio::test]
async fn unexpected_pass_is_persisted_with_annotation() {
    let copy = WorkingCopy::new("#!/bin/sh\nexit 0\n").await;
    let report = BugReport {
        kind: BugKind::Correctness,
        seed: 11,
        commit: copy.commit,
    };

    let (_guard, store) = run_pipeline(&copy, vec![report]).await;

    let key = DedupKey::early(&report).unwrap();
    assert!(store.exists(&key));
    let body = std::fs::read_to_string(store.root().join(key.as_str())).unwrap();
    assert!(body.contains("outcome: passed-unexpectedly"));
}

#[tokio::test]
async fn reclassified_crash_lands_under_crash_key() {
    // Reported as correctness, but the replay crashes: the artifact keys
    // on what actually happened.
    let copy = WorkingCopy::new("#!/bin/sh\nexit 127\n").await;
    let report = BugReport {
        kind: BugKind::Correctness,
        seed: 13,
        commit: copy.commit,
    };

    let (_guard, store) = run_pipeline(&copy, vec![report]).await;
    assert_eq!(count_artifacts(&store), 1);

    let entry = std::fs::read_dir(store.root())
        .unwrap()
        .next()
        .unwrap()
        .unwrap();
    let name = entry.file_name().into_string().unwrap();
    assert!(name.starts_with("3_"));

    let body = std::fs::read_to_string(entry.path()).unwrap();
    assert!(body.contains("reported as correctness but replay produced crash"));
}
