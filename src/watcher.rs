//! Polling directory watcher.
//!
//! [`DirectoryWatcher`] reports files that appear under a directory as
//! [`WatchEvent::Created`] notifications. It is a plain polling scanner:
//! every interval it lists the directory (optionally recursively), and any
//! matching file it has not seen before is reported. Files present when the
//! watcher starts are not reported.

use futures_core::Stream;
use regex::Regex;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// A notification from a filesystem event source.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// A file was created at this path
    Created(PathBuf),
    /// The event source failed and will deliver nothing further
    Error(Error),
}

/// Watches a directory for newly created files by polling it.
#[derive(Debug, Clone)]
pub struct DirectoryWatcher {
    root: PathBuf,
    filter: Option<Regex>,
    recursive: bool,
    poll_interval: Duration,
}

impl DirectoryWatcher {
    /// Default time between directory scans
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

    /// Watch the files directly inside `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            filter: None,
            recursive: false,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
        }
    }

    /// Only report files whose name matches a wildcard pattern (`*`, `?`)
    pub fn filter(mut self, pattern: &str) -> Result<Self> {
        self.filter = Some(wildcard(pattern)?);
        Ok(self)
    }

    /// Also watch subdirectories
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Set the time between scans
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// The watched directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start watching.
    ///
    /// Scanning stops once the returned stream is dropped. A scan failure is
    /// delivered as a single [`WatchEvent::Error`], after which the stream
    /// ends.
    pub fn into_stream(self) -> impl Stream<Item = WatchEvent> + Send + 'static {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(self.run(tx));
        ReceiverStream::new(rx)
    }

    async fn run(self, tx: mpsc::Sender<WatchEvent>) {
        let mut known = match self.scan().await {
            Ok(found) => found,
            Err(error) => {
                let _ = tx.send(WatchEvent::Error(error.into())).await;
                return;
            }
        };
        debug!(root = %self.root.display(), existing = known.len(), "directory watch started");

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                _ = ticker.tick() => {}
            }

            let found = match self.scan().await {
                Ok(found) => found,
                Err(error) => {
                    let _ = tx.send(WatchEvent::Error(error.into())).await;
                    return;
                }
            };

            let mut created: Vec<_> = found.difference(&known).cloned().collect();
            created.sort();
            for path in created {
                trace!(path = %path.display(), "file created");
                if tx.send(WatchEvent::Created(path)).await.is_err() {
                    break;
                }
            }
            known = found;
        }
        debug!(root = %self.root.display(), "directory watch stopped");
    }

    async fn scan(&self) -> io::Result<HashSet<PathBuf>> {
        let mut found = HashSet::new();
        let mut dirs = vec![self.root.clone()];

        while let Some(dir) = dirs.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                // A subdirectory removed mid-scan is not a watch failure.
                Err(error) if dir != self.root && error.kind() == io::ErrorKind::NotFound => {
                    continue
                }
                Err(error) => return Err(error),
            };

            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    if self.recursive {
                        dirs.push(entry.path());
                    }
                } else if self.matches(&entry.file_name().to_string_lossy()) {
                    found.insert(entry.path());
                }
            }
        }

        Ok(found)
    }

    fn matches(&self, name: &str) -> bool {
        self.filter
            .as_ref()
            .map_or(true, |filter| filter.is_match(name))
    }
}

/// Compile a filename wildcard into an anchored regex.
fn wildcard(pattern: &str) -> Result<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    expr.push('$');
    Regex::new(&expr).map_err(|e| Error::watch(format!("invalid filter {:?}: {}", pattern, e)))
}
