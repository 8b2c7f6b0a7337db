//! Group log transport: bounded channel + dedicated writer thread
//!
//! The engine must never block on logging. Events go through a bounded
//! crossbeam channel to a thread that owns the file handle and the
//! [`GroupBook`] model; a full queue drops the event. Dropping the last
//! handle disconnects the channel and the thread drains and exits.

use crate::config::GROUP_LOG_QUEUE;
use crate::grouplog::render::GroupBook;
use crate::grouplog::GroupEvent;
use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Cloneable engine-side handle
#[derive(Clone)]
pub struct GroupLog {
    tx: Option<Sender<GroupEvent>>,
    dropped: Arc<AtomicU64>,
}

impl GroupLog {
    /// Open a writer for one symbol's session log under `log_dir`
    pub fn open(log_dir: &Path, symbol: &str) -> std::io::Result<(Self, GroupLogWorker)> {
        fs::create_dir_all(log_dir)?;
        let safe: String = symbol
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect();
        let session = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let path = log_dir.join(format!("groups_{safe}_{session}.log"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let (tx, rx) = bounded(GROUP_LOG_QUEUE);
        let dropped = Arc::new(AtomicU64::new(0));
        let handle = std::thread::Builder::new()
            .name(format!("grouplog-{safe}"))
            .spawn(move || writer_loop(file, rx))?;

        Ok((
            Self {
                tx: Some(tx),
                dropped,
            },
            GroupLogWorker {
                handle: Some(handle),
                path,
            },
        ))
    }

    /// A handle that discards everything (tests, terminated engines)
    pub fn disabled() -> Self {
        Self {
            tx: None,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Fire-and-forget; a full queue drops the event and counts it
    pub fn record(&self, event: GroupEvent) {
        let Some(tx) = &self.tx else { return };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let n = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if n.is_power_of_two() {
                    warn!(dropped = n, "group log queue full, dropping events");
                }
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Owns the writer thread; joining flushes the file
pub struct GroupLogWorker {
    handle: Option<JoinHandle<()>>,
    path: PathBuf,
}

impl GroupLogWorker {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for GroupLogWorker {
    fn drop(&mut self) {
        // The thread exits once every GroupLog sender is gone; don't block
        // shutdown on it beyond detaching.
        if let Some(handle) = self.handle.take() {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
    }
}

fn timestamp() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let (h, m, s) = ((secs / 3600) % 24, (secs / 60) % 60, secs % 60);
    format!("{h:02}:{m:02}:{s:02}")
}

fn writer_loop(file: File, rx: Receiver<GroupEvent>) {
    let mut out = BufWriter::new(file);
    let mut book = GroupBook::new();
    while let Ok(event) = rx.recv() {
        let (line, rerender) = book.apply(&event);
        let _ = writeln!(out, "[{}] {line}", timestamp());
        if let Some(group) = rerender {
            let _ = out.write_all(book.render_group(group).as_bytes());
        }
        let _ = out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_handle_is_silent() {
        let log = GroupLog::disabled();
        log.record(GroupEvent::CCount { group: 0, c: 1 });
        assert_eq!(log.dropped_events(), 0);
    }

    #[test]
    fn events_reach_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let (log, worker) = GroupLog::open(dir.path(), "VIX 75").unwrap();
        log.record(GroupEvent::Init {
            group: 0,
            anchor: 1000.0,
            bullish_source: true,
            b_idx: 0,
            s_idx: 1,
            b_ticket: 1,
            s_ticket: 2,
            lots: 0.01,
        });
        drop(log); // disconnects; writer drains and exits

        // Wait for the writer thread to drain
        for _ in 0..100 {
            let content = std::fs::read_to_string(worker.path()).unwrap_or_default();
            if content.contains("INIT grp=0") {
                assert!(content.contains("GROUP 0"));
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        panic!("group log never flushed");
    }
}
