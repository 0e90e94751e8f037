//! File-drop source block.
//!
//! Turns "file created" notifications into a stream of paths that are known
//! to be readable. Notifications often arrive while the writer still holds
//! the file, so every path first waits out a quiet period in a
//! [`DelayBlock`] and is then checked; a path that cannot be opened yet goes
//! back through the delay for another round.
//!
//! ```text
//! events ──> delay ──> access check ──> output
//!              ^            │
//!              └── retry ───┘
//! ```
//!
//! There is no retry limit and no backoff: a path that never becomes
//! readable is retried every quiet period until the source completes or
//! faults. Once the delay stops accepting input the path is emitted as-is
//! rather than lost.

use async_trait::async_trait;
use futures::StreamExt;
use futures_core::Stream;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::action::{ActionBlock, ExecutionOptions};
use crate::buffer::BufferBlock;
use crate::completion::{propagate, Completion};
use crate::delay::DelayBlock;
use crate::error::{Declined, Error, Result};
use crate::link::{Link, LinkOptions};
use crate::traits::{Block, Source, Target};
use crate::watcher::{DirectoryWatcher, WatchEvent};

/// Configuration for watching a directory with a [`FileDropSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FileDropConfig {
    /// Directory to watch
    pub path: PathBuf,
    /// Wildcard pattern file names must match
    pub filter: Option<String>,
    /// Also watch subdirectories
    pub include_subdirectories: bool,
    /// Wait before each access check, and between retries.
    ///
    /// Retries repeat at this fixed interval for as long as the source runs;
    /// there is no attempt limit.
    pub quiet_period: Duration,
    /// Time between directory scans
    pub poll_interval: Duration,
}

impl FileDropConfig {
    /// Default wait before checking a new file
    pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_secs(1);

    /// Watch `path` with default settings
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            filter: None,
            include_subdirectories: false,
            quiet_period: Self::DEFAULT_QUIET_PERIOD,
            poll_interval: DirectoryWatcher::DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set the file name filter
    pub fn filter(mut self, pattern: impl Into<String>) -> Self {
        self.filter = Some(pattern.into());
        self
    }

    /// Set whether subdirectories are watched
    pub fn include_subdirectories(mut self, include: bool) -> Self {
        self.include_subdirectories = include;
        self
    }

    /// Set the quiet period
    pub fn quiet_period(mut self, period: Duration) -> Self {
        self.quiet_period = period;
        self
    }

    /// Set the poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Build the directory watcher this configuration describes
    pub fn watcher(&self) -> Result<DirectoryWatcher> {
        let watcher = DirectoryWatcher::new(&self.path)
            .recursive(self.include_subdirectories)
            .poll_interval(self.poll_interval);
        match &self.filter {
            Some(pattern) => watcher.filter(pattern),
            None => Ok(watcher),
        }
    }
}

/// Decides whether a dropped file is ready to be handed on.
#[async_trait]
pub trait AccessProbe: Send + Sync + 'static {
    /// Succeed if `path` can be used now
    async fn check(&self, path: &Path) -> io::Result<()>;
}

/// Probe that opens the file for reading.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadProbe;

#[async_trait]
impl AccessProbe for ReadProbe {
    async fn check(&self, path: &Path) -> io::Result<()> {
        tokio::fs::File::open(path).await.map(drop)
    }
}

struct Stages {
    delay: DelayBlock<PathBuf>,
    checker: ActionBlock<PathBuf>,
    output: BufferBlock<PathBuf>,
    watch: CancellationToken,
}

impl Stages {
    fn complete(&self) {
        self.watch.cancel();
        self.delay.complete();
    }

    fn fault(&self, error: Error) {
        self.watch.cancel();
        self.delay.fault(error.clone());
        self.checker.fault(error.clone());
        self.output.fault(error);
    }
}

/// A source of paths of newly dropped, readable files.
///
/// Dropping the source stops the event watch without completing it.
pub struct FileDropSource {
    stages: Arc<Stages>,
}

impl FileDropSource {
    /// Watch a directory as described by `config`
    pub fn watch(config: FileDropConfig) -> Result<Self> {
        let events = config.watcher()?.into_stream();
        debug!(path = %config.path.display(), "file drop source watching");
        Ok(Self::from_events(events, config.quiet_period))
    }

    /// Build a source fed by an arbitrary event stream.
    ///
    /// A [`WatchEvent::Error`] faults the whole source. The source completes
    /// when the stream ends.
    pub fn from_events<S>(events: S, quiet_period: Duration) -> Self
    where
        S: Stream<Item = WatchEvent> + Send + 'static,
    {
        Self::with_probe(events, quiet_period, ReadProbe)
    }

    /// Build a source with a custom access check
    pub fn with_probe<S, P>(events: S, quiet_period: Duration, probe: P) -> Self
    where
        S: Stream<Item = WatchEvent> + Send + 'static,
        P: AccessProbe,
    {
        let probe = Arc::new(probe);
        let stages = Arc::new_cyclic(|stages: &Weak<Stages>| {
            let output = BufferBlock::with_label("file_drop");
            let delay = DelayBlock::with_label(quiet_period, "file_drop.delay");

            let checker = {
                let stages = stages.clone();
                let output = output.clone();
                ActionBlock::with_options(
                    move |path: PathBuf| {
                        let stages = stages.clone();
                        let output = output.clone();
                        let probe = probe.clone();
                        async move {
                            check_access(probe.as_ref(), path, &stages, &output).await;
                            Ok(())
                        }
                    },
                    ExecutionOptions::sequential(),
                )
            };

            Stages {
                delay,
                checker,
                output,
                watch: CancellationToken::new(),
            }
        });

        stages.delay.link(
            Arc::new(stages.checker.clone()),
            LinkOptions::propagating(),
        );
        propagate(stages.checker.completion(), stages.output.clone());
        tokio::spawn(pump_events(events, stages.clone()));

        Self { stages }
    }

    /// Feed a path into the pipeline as though it had just been created.
    ///
    /// Refused once the source has completed or faulted.
    pub fn submit(&self, path: PathBuf) -> std::result::Result<(), Declined<PathBuf>> {
        self.stages.delay.offer(path)
    }
}

async fn pump_events<S>(events: S, stages: Arc<Stages>)
where
    S: Stream<Item = WatchEvent> + Send + 'static,
{
    tokio::pin!(events);
    loop {
        let event = tokio::select! {
            _ = stages.watch.cancelled() => break,
            event = events.next() => event,
        };

        match event {
            Some(WatchEvent::Created(path)) => {
                trace!(path = %path.display(), "file dropped");
                if stages.delay.offer(path).is_err() {
                    debug!("file drop source closed; ignoring notification");
                }
            }
            Some(WatchEvent::Error(e)) => {
                error!(error = %e, "file watch failed; faulting file drop source");
                stages.fault(e);
                break;
            }
            None => {
                debug!("event source ended; completing file drop source");
                stages.complete();
                break;
            }
        }
    }
}

async fn check_access<P: AccessProbe + ?Sized>(
    probe: &P,
    path: PathBuf,
    stages: &Weak<Stages>,
    output: &BufferBlock<PathBuf>,
) {
    let error = match probe.check(&path).await {
        Ok(()) => {
            if output.offer(path).is_ok() {
                #[cfg(feature = "metrics")]
                metrics::counter!("blockweld_file_drop_emitted_total").increment(1);
            }
            return;
        }
        Err(error) => error,
    };

    warn!(path = %path.display(), %error, "dropped file not accessible yet; retrying");
    #[cfg(feature = "metrics")]
    metrics::counter!("blockweld_file_drop_retries_total").increment(1);

    let retried = match stages.upgrade() {
        Some(stages) => stages.delay.offer(path),
        None => Err(Declined(path)),
    };
    if let Err(Declined(path)) = retried {
        debug!(path = %path.display(), "retry refused; emitting path without access check");
        if let Err(Declined(path)) = output.offer(path) {
            debug!(path = %path.display(), "file drop output closed; dropping path");
        }
    }
}

impl Drop for FileDropSource {
    fn drop(&mut self) {
        self.stages.watch.cancel();
    }
}

impl Block for FileDropSource {
    fn complete(&self) {
        self.stages.complete();
    }

    fn fault(&self, error: Error) {
        self.stages.fault(error);
    }

    fn completion(&self) -> Completion {
        self.stages.output.completion()
    }
}

#[async_trait]
impl Source<PathBuf> for FileDropSource {
    fn link(&self, target: Arc<dyn Target<PathBuf>>, options: LinkOptions) -> Link {
        self.stages.output.link(target, options)
    }

    async fn receive(&self) -> Option<PathBuf> {
        self.stages.output.receive().await
    }

    fn try_receive(&self) -> Option<PathBuf> {
        self.stages.output.try_receive()
    }
}
