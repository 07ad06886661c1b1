use flate2::read::{GzDecoder, MultiGzDecoder};
use multiwriter::{
    Body, Fault, Manager, ManagerConfig, MemoryFileSystem, RetryPolicy, WriteError,
};
use std::io::{self, Read};
use std::sync::Arc;
use std::sync::mpsc as std_mpsc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Manager over a shared in-memory filesystem, with its dispatcher running
fn start(fs: &MemoryFileSystem, config: ManagerConfig) -> (Arc<Manager>, JoinHandle<()>) {
    let manager = Arc::new(Manager::new(config, Arc::new(fs.clone())).unwrap());
    let running = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.run().await }
    });
    (manager, running)
}

fn spawn_write(
    manager: &Arc<Manager>,
    path: &'static str,
    body: impl Into<Body> + Send + 'static,
) -> JoinHandle<Result<(), WriteError>> {
    let manager = Arc::clone(manager);
    tokio::spawn(async move { manager.write(path, body).await })
}

fn gunzip_all(data: &[u8]) -> String {
    let mut out = String::new();
    MultiGzDecoder::new(data).read_to_string(&mut out).unwrap();
    out
}

/// Body whose first read blocks until the returned sender fires
struct Gate {
    open: Option<std_mpsc::Receiver<()>>,
    data: io::Cursor<Vec<u8>>,
}

fn gated(data: &str) -> (Body, std_mpsc::Sender<()>) {
    let (tx, rx) = std_mpsc::channel();
    let gate = Gate {
        open: Some(rx),
        data: io::Cursor::new(data.as_bytes().to_vec()),
    };
    (Body::from_reader(gate), tx)
}

impl Read for Gate {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(open) = self.open.take() {
            let _ = open.recv();
        }
        self.data.read(buf)
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_plain_write_then_stop() {
    let fs = MemoryFileSystem::new();
    let (manager, running) = start(&fs, ManagerConfig::new(2, 6, 2, 20, false));

    manager.write("/x.txt", "hello").await.unwrap();
    manager.stop().await;
    running.await.unwrap();

    assert_eq!(fs.read("/x.txt").unwrap(), b"hello");
    assert_eq!(fs.open_handles("/x.txt"), 0);
}

#[tokio::test]
async fn test_same_file_order_survives_requeue() {
    let fs = MemoryFileSystem::new();
    let config = ManagerConfig::new(64, 4, 1, 4, false).with_retry(RetryPolicy {
        base_delay: Duration::from_millis(1),
        ..RetryPolicy::default()
    });
    let (manager, running) = start(&fs, config);

    // The first write holds the writer, so later ones bounce through the intake
    let (first, release) = gated("0\n");
    let mut pending = vec![{
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.write("/ordered.log", first).await })
    }];
    for i in 1..10 {
        tokio::time::sleep(Duration::from_millis(5)).await;
        let manager = Arc::clone(&manager);
        pending.push(tokio::spawn(async move {
            manager.write("/ordered.log", format!("{i}\n")).await
        }));
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    release.send(()).unwrap();

    for write in pending {
        write.await.unwrap().unwrap();
    }
    manager.stop().await;
    running.await.unwrap();

    let expected: String = (0..10).map(|i| format!("{i}\n")).collect();
    assert_eq!(String::from_utf8(fs.read("/ordered.log").unwrap()).unwrap(), expected);
    assert!(manager.metrics().requeues > 0);
}

#[tokio::test]
async fn test_concurrent_transfers_stay_within_limit() {
    let fs = MemoryFileSystem::new();
    let (manager, running) = start(&fs, ManagerConfig::new(128, 3, 2, 8, false));

    let paths: Vec<String> = (0..16).map(|i| format!("/spread/{i}.txt")).collect();
    let mut pending = Vec::new();
    for round in 0..4 {
        for path in &paths {
            let manager = Arc::clone(&manager);
            let path = path.clone();
            pending.push(tokio::spawn(async move {
                manager.write(path, format!("{round}\n")).await
            }));
        }
    }
    for write in pending {
        write.await.unwrap().unwrap();
    }
    manager.stop().await;
    running.await.unwrap();

    assert!(manager.peak_transfers() <= 3);
    assert!(manager.peak_transfers() >= 1);
    assert_eq!(manager.transfers_in_flight(), 0);
    for path in &paths {
        let data = fs.read(path).unwrap();
        assert_eq!(data.iter().filter(|&&b| b == b'\n').count(), 4, "{path}");
        assert_eq!(fs.open_handles(path), 0);
    }

    let metrics = manager.metrics();
    assert_eq!(metrics.jobs_completed, 64);
    assert_eq!(metrics.jobs_failed, 0);
}

#[tokio::test]
async fn test_eviction_closes_victim_before_insert_returns() {
    let fs = MemoryFileSystem::new();
    let (manager, running) = start(&fs, ManagerConfig::new(8, 2, 2, 2, true));

    manager.write("/a.gz", "a1").await.unwrap();
    manager.write("/b.gz", "b1").await.unwrap();
    assert_eq!(fs.open_handles("/a.gz"), 1);

    manager.write("/c.gz", "c1").await.unwrap();

    // A was least recently used and is already finalized
    assert_eq!(fs.open_handles("/a.gz"), 0);
    let mut a = String::new();
    GzDecoder::new(&fs.read("/a.gz").unwrap()[..])
        .read_to_string(&mut a)
        .unwrap();
    assert_eq!(a, "a1");
    assert_eq!(manager.metrics().writers_evicted, 1);

    manager.stop().await;
    running.await.unwrap();
    assert_eq!(gunzip_all(&fs.read("/b.gz").unwrap()), "b1");
    assert_eq!(gunzip_all(&fs.read("/c.gz").unwrap()), "c1");
}

#[tokio::test]
async fn test_reopened_file_starts_a_new_gzip_member() {
    let fs = MemoryFileSystem::new();
    let (manager, running) = start(&fs, ManagerConfig::new(8, 2, 2, 2, true));

    manager.write("/a.gz", "a1").await.unwrap();
    manager.write("/b.gz", "b1").await.unwrap();
    manager.write("/c.gz", "c1").await.unwrap();
    manager.write("/a.gz", "a2").await.unwrap();
    manager.stop().await;
    running.await.unwrap();

    let data = fs.read("/a.gz").unwrap();
    assert_eq!(fs.open_count("/a.gz"), 2);
    assert_eq!(fs.peak_open_handles("/a.gz"), 1);
    assert_eq!(gunzip_all(&data), "a1a2");

    // A single-member decoder only sees the first session
    let mut first = String::new();
    GzDecoder::new(&data[..]).read_to_string(&mut first).unwrap();
    assert_eq!(first, "a1");

    let metrics = manager.metrics();
    assert_eq!(metrics.writers_opened, 4);
    assert_eq!(metrics.writers_evicted, 2);
}

#[tokio::test]
async fn test_gzip_round_trip() {
    let fs = MemoryFileSystem::new();
    let (manager, running) = start(&fs, ManagerConfig::new(8, 2, 2, 4, true));

    let mut expected = String::new();
    for i in 0..50 {
        let line = format!("record {i} {}\n", "x".repeat(i));
        expected.push_str(&line);
        manager.write("/logs/round.gz", line).await.unwrap();
    }
    manager.stop().await;
    running.await.unwrap();

    assert!(fs.dir_exists("/logs"));
    assert_eq!(gunzip_all(&fs.read("/logs/round.gz").unwrap()), expected);
}

#[tokio::test]
async fn test_missing_body_fails_only_that_job() {
    let fs = MemoryFileSystem::new();
    let (manager, running) = start(&fs, ManagerConfig::default());

    manager.write("/mixed.txt", "before ").await.unwrap();
    let result = manager.submit("/mixed.txt", None).await;
    assert!(matches!(result, Err(WriteError::BodyRequired)));
    manager.write("/mixed.txt", "after").await.unwrap();

    manager.stop().await;
    running.await.unwrap();

    assert_eq!(fs.read("/mixed.txt").unwrap(), b"before after");
    assert_eq!(fs.open_count("/mixed.txt"), 1);
    assert_eq!(manager.metrics().jobs_failed, 1);
}

#[tokio::test]
async fn test_retry_ceiling_reports_too_many_retries() {
    let fs = MemoryFileSystem::new();
    let config = ManagerConfig::new(8, 2, 1, 4, false).with_retry(RetryPolicy {
        base_delay: Duration::from_millis(1),
        max_retries: 0,
        warn_after: 0,
        ..RetryPolicy::default()
    });
    let (manager, running) = start(&fs, config);

    let (blocked, release) = gated("first\n");
    let first = spawn_write(&manager, "/busy.txt", blocked);
    wait_until(|| manager.transfers_in_flight() == 1).await;

    // Fills the single queue slot
    let second = spawn_write(&manager, "/busy.txt", "second\n");
    tokio::time::sleep(Duration::from_millis(20)).await;

    let third = manager.write("/busy.txt", "third\n").await;
    match third {
        Err(WriteError::TooManyRetries { retries, path }) => {
            assert_eq!(retries, 1);
            assert_eq!(path, std::path::PathBuf::from("/busy.txt"));
        }
        other => panic!("expected TooManyRetries, got {other:?}"),
    }

    release.send(()).unwrap();
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();
    manager.stop().await;
    running.await.unwrap();

    assert_eq!(fs.read("/busy.txt").unwrap(), b"first\nsecond\n");
}

#[tokio::test]
async fn test_write_fault_is_scoped_to_one_file() {
    let fs = MemoryFileSystem::new();
    let (manager, running) = start(&fs, ManagerConfig::default());

    fs.inject_fault("/bad.txt", Fault::Write);
    let bad = manager.write("/bad.txt", "lost").await;
    assert!(matches!(bad, Err(WriteError::Io { .. })));

    manager.write("/good.txt", "fine").await.unwrap();

    // Either rejected behind the failed write or sent to a restarted writer
    let again = manager.write("/bad.txt", "lost again").await;
    assert!(matches!(
        again,
        Err(WriteError::Io { .. } | WriteError::WriterFailed { .. })
    ));

    wait_until(|| fs.open_handles("/bad.txt") == 0).await;
    fs.clear_fault("/bad.txt");
    manager.write("/bad.txt", "recovered").await.unwrap();

    manager.stop().await;
    running.await.unwrap();

    assert_eq!(fs.read("/good.txt").unwrap(), b"fine");
    assert_eq!(fs.read("/bad.txt").unwrap(), b"recovered");
    assert!(fs.open_count("/bad.txt") >= 2);
}

#[tokio::test]
async fn test_sync_fault_fails_job_and_jobs_queued_behind_it() {
    let fs = MemoryFileSystem::new();
    let (manager, running) = start(&fs, ManagerConfig::new(8, 1, 2, 4, false));
    fs.inject_fault("/sync.txt", Fault::Sync);

    // Holding the only token lets both jobs queue at the faulty writer
    let (held, release) = gated("held");
    let holder = spawn_write(&manager, "/hold.txt", held);
    wait_until(|| manager.transfers_in_flight() == 1).await;

    let first = spawn_write(&manager, "/sync.txt", "a");
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = spawn_write(&manager, "/sync.txt", "b");
    tokio::time::sleep(Duration::from_millis(20)).await;
    release.send(()).unwrap();

    holder.await.unwrap().unwrap();
    assert!(matches!(first.await.unwrap(), Err(WriteError::Io { .. })));
    assert!(matches!(
        second.await.unwrap(),
        Err(WriteError::WriterFailed { .. })
    ));

    manager.stop().await;
    running.await.unwrap();

    assert_eq!(fs.sync_count("/sync.txt"), 0);
    assert_eq!(fs.open_handles("/sync.txt"), 0);
    assert_eq!(fs.read("/hold.txt").unwrap(), b"held");
}

#[tokio::test]
async fn test_submit_timeout_leaves_file_untouched() {
    let fs = MemoryFileSystem::new();
    let config = ManagerConfig::new(8, 1, 2, 4, false)
        .with_submit_timeout(Duration::from_millis(100))
        .with_retry(RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_retries: 5,
            warn_after: 5,
            ..RetryPolicy::default()
        });
    let (manager, running) = start(&fs, config);

    let (held, release) = gated("slow");
    let holder = spawn_write(&manager, "/held.txt", held);
    wait_until(|| manager.transfers_in_flight() == 1).await;

    // Queued at its writer, waiting for the token the whole time
    let late = manager.write("/late.txt", "late").await;
    assert!(matches!(late, Err(WriteError::SubmitTimeout(_))));

    // Started before its deadline, so it finishes and reports success
    release.send(()).unwrap();
    holder.await.unwrap().unwrap();

    manager.stop().await;
    running.await.unwrap();

    assert_eq!(fs.read("/held.txt").unwrap(), b"slow");
    assert!(fs.read("/late.txt").unwrap_or_default().is_empty());
    let metrics = manager.metrics();
    assert_eq!(metrics.jobs_abandoned, 1);
    assert_eq!(metrics.bytes_written, 4);
}

#[tokio::test]
async fn test_open_failure_does_not_stop_dispatcher() {
    let fs = MemoryFileSystem::new();
    let (manager, running) = start(&fs, ManagerConfig::default());

    fs.inject_fault("/locked.txt", Fault::Open);
    let result = manager.write("/locked.txt", "x").await;
    assert!(matches!(result, Err(WriteError::Io { .. })));

    manager.write("/open.txt", "y").await.unwrap();
    manager.stop().await;
    running.await.unwrap();

    assert_eq!(fs.read("/open.txt").unwrap(), b"y");
    assert!(!fs.exists("/locked.txt"));
}

#[tokio::test]
async fn test_stop_drains_queued_writes_and_rejects_late_ones() {
    let fs = MemoryFileSystem::new();
    let (manager, running) = start(&fs, ManagerConfig::new(64, 2, 2, 4, true));

    let pending: Vec<_> = (0..20)
        .map(|i| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager
                    .write(format!("/drain/{}.gz", i % 5), format!("{i};"))
                    .await
            })
        })
        .collect();
    // Let every submission reach the intake before stopping
    tokio::time::sleep(Duration::from_millis(20)).await;

    manager.stop().await;
    running.await.unwrap();
    for write in pending {
        write.await.unwrap().unwrap();
    }

    for file in 0..5 {
        let path = format!("/drain/{file}.gz");
        let content = gunzip_all(&fs.read(&path).unwrap());
        assert_eq!(content.matches(';').count(), 4, "{path}");
        assert_eq!(fs.open_handles(&path), 0);
    }
    assert!(matches!(
        manager.write("/drain/0.gz", "late").await,
        Err(WriteError::Stopped)
    ));
}
