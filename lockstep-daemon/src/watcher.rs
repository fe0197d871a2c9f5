//! File watching with trailing-edge batching.
//!
//! Raw notify events are collected until the project has been quiet for the
//! debounce window, then forwarded to the session as one de-duplicated,
//! arrival-ordered batch. A burst of saves therefore always produces a batch
//! that reflects the final state on disk. Under steady activity a batch is
//! still flushed once its first event is [`MAX_WAIT_WINDOWS`] windows old.

use std::collections::HashSet;
use std::future::pending;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{recommended_watcher, Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep_until, Instant};

use crate::error::DaemonError;
use crate::runtime::SessionEvent;

/// Upper bound on how long a batch may be held, in debounce windows.
pub(crate) const MAX_WAIT_WINDOWS: u32 = 10;

#[derive(Debug, Default)]
pub(crate) struct EventBatcher {
    paths: Vec<PathBuf>,
    seen: HashSet<PathBuf>,
    first_event: Option<Instant>,
    last_event: Option<Instant>,
}

impl EventBatcher {
    pub(crate) fn push(&mut self, paths: impl IntoIterator<Item = PathBuf>, now: Instant) {
        for path in paths {
            if self.seen.insert(path.clone()) {
                self.paths.push(path);
            }
        }
        if !self.paths.is_empty() {
            self.first_event.get_or_insert(now);
        }
        self.last_event = Some(now);
    }

    /// When the pending batch should be flushed, if there is one: a window
    /// after the latest event, but never later than the max wait after the
    /// first.
    pub(crate) fn deadline(&self, window: Duration) -> Option<Instant> {
        if self.paths.is_empty() {
            return None;
        }
        let quiet = self.last_event?.checked_add(window)?;
        let cap = self.first_event?.checked_add(window * MAX_WAIT_WINDOWS)?;
        Some(quiet.min(cap))
    }

    pub(crate) fn take(&mut self) -> Vec<PathBuf> {
        self.seen.clear();
        self.first_event = None;
        self.last_event = None;
        std::mem::take(&mut self.paths)
    }
}

pub(crate) async fn watcher_task(
    project_dir: PathBuf,
    ignore: PathBuf,
    window: Duration,
    events: mpsc::UnboundedSender<SessionEvent>,
    shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let (raw_tx, raw_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher = recommended_watcher(move |event| {
        let _ = raw_tx.send(event);
    })?;
    watcher.watch(&project_dir, RecursiveMode::Recursive)?;
    tracing::info!(path = %project_dir.display(), "watching project");

    batch_events(raw_rx, &ignore, window, events, shutdown_rx).await;
    Ok(())
}

/// Batch raw events until shutdown or until either channel closes. Paths
/// under `ignore` (the daemon's own state directory) are dropped.
pub(crate) async fn batch_events(
    mut raw_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    ignore: &Path,
    window: Duration,
    events: mpsc::UnboundedSender<SessionEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut batcher = EventBatcher::default();

    loop {
        let deadline = batcher.deadline(window);
        let flush = async move {
            match deadline {
                Some(at) => sleep_until(at).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = raw_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }
                let paths = event.paths.into_iter().filter(|path| !path.starts_with(ignore));
                batcher.push(paths, Instant::now());
            }
            _ = flush => {
                let batch = batcher.take();
                tracing::debug!(paths = batch.len(), "forwarding file batch");
                if events.send(SessionEvent::FilesChanged(batch)).is_err() {
                    break;
                }
            }
        }
    }
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind, RemoveKind};
    use tokio::time::{advance, timeout};

    const WINDOW: Duration = Duration::from_millis(250);

    fn event(kind: EventKind, path: &str) -> notify::Result<Event> {
        Ok(Event::new(kind).add_path(PathBuf::from(path)))
    }

    fn modify(path: &str) -> notify::Result<Event> {
        event(EventKind::Modify(ModifyKind::Any), path)
    }

    struct Harness {
        raw_tx: mpsc::UnboundedSender<notify::Result<Event>>,
        events_rx: mpsc::UnboundedReceiver<SessionEvent>,
        shutdown_tx: broadcast::Sender<()>,
        task: tokio::task::JoinHandle<()>,
    }

    fn spawn_batcher() -> Harness {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(1);
        let shutdown_rx = shutdown_tx.subscribe();
        let task = tokio::spawn(async move {
            batch_events(
                raw_rx,
                Path::new("/project/.lockstep"),
                WINDOW,
                events_tx,
                shutdown_rx,
            )
            .await;
        });
        Harness {
            raw_tx,
            events_rx,
            shutdown_tx,
            task,
        }
    }

    async fn next_batch(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<PathBuf> {
        match timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(SessionEvent::FilesChanged(paths))) => paths,
            other => panic!("expected a file batch, got {other:?}"),
        }
    }

    #[test]
    fn batcher_dedups_and_keeps_arrival_order() {
        let now = Instant::now();
        let mut batcher = EventBatcher::default();
        assert_eq!(batcher.deadline(WINDOW), None);

        batcher.push([PathBuf::from("/b"), PathBuf::from("/a")], now);
        batcher.push([PathBuf::from("/b")], now + Duration::from_millis(10));
        assert_eq!(
            batcher.deadline(WINDOW),
            Some(now + Duration::from_millis(10) + WINDOW)
        );
        assert_eq!(batcher.take(), vec![PathBuf::from("/b"), PathBuf::from("/a")]);
        assert_eq!(batcher.deadline(WINDOW), None);
    }

    #[test]
    fn deadline_is_capped_by_first_event() {
        let now = Instant::now();
        let mut batcher = EventBatcher::default();
        batcher.push([PathBuf::from("/a")], now);
        batcher.push([PathBuf::from("/b")], now + Duration::from_millis(2400));

        assert_eq!(
            batcher.deadline(WINDOW),
            Some(now + WINDOW * MAX_WAIT_WINDOWS)
        );
    }

    #[test]
    fn ignored_only_push_opens_no_batch() {
        let now = Instant::now();
        let mut batcher = EventBatcher::default();
        batcher.push(Vec::<PathBuf>::new(), now);
        assert_eq!(batcher.deadline(WINDOW), None);

        batcher.push([PathBuf::from("/a")], now + Duration::from_secs(10));
        assert_eq!(
            batcher.deadline(WINDOW),
            Some(now + Duration::from_secs(10) + WINDOW)
        );
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn steady_stream_is_still_flushed() {
        let mut h = spawn_batcher();
        let mut delivered = Vec::new();

        // One event every 200 ms never leaves a quiet window of 250 ms.
        for i in 0..25 {
            h.raw_tx
                .send(modify(&format!("/project/f{i}")))
                .expect("send");
            advance(Duration::from_millis(200)).await;
            while let Ok(SessionEvent::FilesChanged(batch)) = h.events_rx.try_recv() {
                delivered.push(batch);
            }
        }

        tokio::task::yield_now().await;
        while let Ok(SessionEvent::FilesChanged(batch)) = h.events_rx.try_recv() {
            delivered.push(batch);
        }

        assert!(!delivered.is_empty(), "no batch while events kept arriving");
        assert_eq!(delivered[0][0], PathBuf::from("/project/f0"));
        assert!(delivered[0].len() < 25, "first batch flushed mid-stream");

        h.shutdown_tx.send(()).expect("shutdown");
        h.task.await.expect("join");
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn burst_is_forwarded_as_one_batch() {
        let mut h = spawn_batcher();

        for path in ["/project/a", "/project/b", "/project/a", "/project/c"] {
            h.raw_tx.send(modify(path)).expect("send");
            advance(Duration::from_millis(100)).await;
        }

        let batch = next_batch(&mut h.events_rx).await;
        assert_eq!(
            batch,
            vec![
                PathBuf::from("/project/a"),
                PathBuf::from("/project/b"),
                PathBuf::from("/project/c"),
            ]
        );
        assert!(h.events_rx.try_recv().is_err(), "one batch per burst");

        h.shutdown_tx.send(()).expect("shutdown");
        h.task.await.expect("join");
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn quiet_gap_splits_batches() {
        let mut h = spawn_batcher();

        h.raw_tx.send(modify("/project/a")).expect("send");
        assert_eq!(next_batch(&mut h.events_rx).await, vec![PathBuf::from("/project/a")]);

        h.raw_tx
            .send(event(EventKind::Remove(RemoveKind::File), "/project/a"))
            .expect("send");
        assert_eq!(next_batch(&mut h.events_rx).await, vec![PathBuf::from("/project/a")]);

        h.shutdown_tx.send(()).expect("shutdown");
        h.task.await.expect("join");
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn access_events_and_state_dir_are_ignored() {
        let mut h = spawn_batcher();

        h.raw_tx
            .send(event(EventKind::Access(AccessKind::Any), "/project/a"))
            .expect("send");
        h.raw_tx
            .send(modify("/project/.lockstep/state.json"))
            .expect("send");
        h.raw_tx
            .send(event(EventKind::Create(CreateKind::File), "/project/b"))
            .expect("send");

        assert_eq!(next_batch(&mut h.events_rx).await, vec![PathBuf::from("/project/b")]);

        h.shutdown_tx.send(()).expect("shutdown");
        h.task.await.expect("join");
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn closing_raw_channel_ends_loop() {
        let h = spawn_batcher();
        drop(h.raw_tx);
        h.task.await.expect("join");
    }
}
