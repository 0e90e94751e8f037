//! Worker block that applies an async function to every item.
//!
//! [`ActionBlock`] is the input half of the throttle and delay blocks and the
//! access checker of the file-drop source. It can also be used on its own as
//! a terminal consumer with bounded parallelism.

use futures::StreamExt;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::completion::{Completion, CompletionSource};
use crate::error::{Declined, Error, Result};
use crate::traits::{Block, Target};

/// How many items an [`ActionBlock`] may work on at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MaxConcurrency {
    /// At most this many items in flight (zero is treated as one)
    Bounded(usize),
    /// No limit on items in flight
    Unbounded,
}

impl MaxConcurrency {
    fn limit(self) -> Option<usize> {
        match self {
            MaxConcurrency::Bounded(n) => Some(n.max(1)),
            MaxConcurrency::Unbounded => None,
        }
    }
}

/// Configuration for an [`ActionBlock`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExecutionOptions {
    /// Maximum number of items processed concurrently
    pub max_concurrency: MaxConcurrency,
}

impl ExecutionOptions {
    /// One item at a time, in arrival order
    pub fn sequential() -> Self {
        Self {
            max_concurrency: MaxConcurrency::Bounded(1),
        }
    }

    /// Every item starts as soon as it arrives
    pub fn unbounded() -> Self {
        Self {
            max_concurrency: MaxConcurrency::Unbounded,
        }
    }

    /// Set the maximum concurrency
    pub fn max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = MaxConcurrency::Bounded(max);
        self
    }
}

impl Default for ExecutionOptions {
    /// One item in flight per available processing unit
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        Self {
            max_concurrency: MaxConcurrency::Bounded(parallelism),
        }
    }
}

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    failed: AtomicU64,
}

struct Shared<T> {
    sender: Mutex<Option<mpsc::UnboundedSender<T>>>,
    fault: Arc<Mutex<Option<Error>>>,
    cancel: CancellationToken,
    completion: Completion,
    counters: Arc<Counters>,
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A target that runs an async function on every accepted item.
///
/// An `Err` returned for one item is logged and counted but does not fault
/// the block or affect other items. Completing the block waits for every
/// accepted item to finish; faulting it drops items that have not started.
///
/// # Examples
///
/// ```rust
/// use blockweld::prelude::*;
///
/// # #[tokio::main]
/// # async fn main() -> Result<()> {
/// let printer = ActionBlock::new(|line: String| async move {
///     println!("{}", line);
///     Ok(())
/// });
///
/// printer.post("hello".to_string());
/// printer.complete();
/// printer.completion().await?;
/// # Ok(())
/// # }
/// ```
pub struct ActionBlock<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> ActionBlock<T> {
    /// Create an action block with default options
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self::with_options(f, ExecutionOptions::default())
    }

    /// Create an action block with explicit options
    pub fn with_options<F, Fut>(f: F, options: ExecutionOptions) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        let fault = Arc::new(Mutex::new(None));
        let cancel = CancellationToken::new();
        let counters = Arc::new(Counters::default());
        let source = CompletionSource::new();
        let completion = source.completion();

        tokio::spawn(run(
            receiver,
            f,
            options,
            source,
            fault.clone(),
            cancel.clone(),
            counters.clone(),
        ));

        Self {
            shared: Arc::new(Shared {
                sender: Mutex::new(Some(sender)),
                fault,
                cancel,
                completion,
                counters,
            }),
        }
    }

    /// Items whose function returned `Ok`
    pub fn processed(&self) -> u64 {
        self.shared.counters.processed.load(Ordering::Relaxed)
    }

    /// Items whose function returned `Err`
    pub fn failed(&self) -> u64 {
        self.shared.counters.failed.load(Ordering::Relaxed)
    }
}

async fn run<T, F, Fut>(
    receiver: mpsc::UnboundedReceiver<T>,
    f: F,
    options: ExecutionOptions,
    source: CompletionSource,
    fault: Arc<Mutex<Option<Error>>>,
    cancel: CancellationToken,
    counters: Arc<Counters>,
) where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    UnboundedReceiverStream::new(receiver)
        .take_until(cancel.cancelled_owned())
        .for_each_concurrent(options.max_concurrency.limit(), |item| {
            let work = f(item);
            let counters = counters.clone();
            async move {
                match work.await {
                    Ok(()) => {
                        counters.processed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(error) => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        #[cfg(feature = "metrics")]
                        metrics::counter!("blockweld_action_failed_total").increment(1);
                        warn!(%error, "action failed for item");
                    }
                }
            }
        })
        .await;

    let result = match lock(&fault).take() {
        Some(error) => Err(error),
        None => Ok(()),
    };
    debug!(ok = result.is_ok(), "action block finished");
    source.resolve(result);
}

impl<T> Clone for ActionBlock<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> fmt::Debug for ActionBlock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionBlock")
            .field("processed", &self.shared.counters.processed)
            .field("failed", &self.shared.counters.failed)
            .finish()
    }
}

impl<T: Send + 'static> Block for ActionBlock<T> {
    fn complete(&self) {
        if lock(&self.shared.sender).take().is_some() {
            debug!("action block completing");
        }
    }

    fn fault(&self, error: Error) {
        if self.shared.completion.is_resolved() {
            return;
        }
        {
            let mut slot = lock(&self.shared.fault);
            if slot.is_none() {
                debug!(%error, "action block faulted");
                *slot = Some(error);
            }
        }
        lock(&self.shared.sender).take();
        self.shared.cancel.cancel();
    }

    fn completion(&self) -> Completion {
        self.shared.completion.clone()
    }
}

impl<T: Send + 'static> Target<T> for ActionBlock<T> {
    fn offer(&self, item: T) -> std::result::Result<(), Declined<T>> {
        match lock(&self.shared.sender).as_ref() {
            Some(sender) => sender
                .send(item)
                .map_err(|mpsc::error::SendError(item)| Declined(item)),
            None => Err(Declined(item)),
        }
    }
}

/// Per-item result recorded by [`collect_outcomes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Outcome {
    Success,
    Fail,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Fail => write!(f, "fail"),
        }
    }
}

/// Run `f` over every item through an [`ActionBlock`] and map each item to
/// whether its call succeeded.
pub async fn collect_outcomes<T, I, F, Fut>(
    items: I,
    options: ExecutionOptions,
    f: F,
) -> Result<HashMap<T, Outcome>>
where
    T: Eq + Hash + Clone + Send + 'static,
    I: IntoIterator<Item = T>,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let results = Arc::new(Mutex::new(HashMap::new()));
    let sink = results.clone();

    let block = ActionBlock::with_options(
        move |item: T| {
            let work = f(item.clone());
            let sink = sink.clone();
            async move {
                let outcome = match work.await {
                    Ok(()) => Outcome::Success,
                    Err(error) => {
                        debug!(%error, "item failed");
                        Outcome::Fail
                    }
                };
                lock(&sink).insert(item, outcome);
                Ok(())
            }
        },
        options,
    );

    for item in items {
        block
            .offer(item)
            .map_err(|_| Error::custom("action block stopped accepting items"))?;
    }
    block.complete();
    block.completion().wait().await?;

    let outcomes = std::mem::take(&mut *lock(&results));
    Ok(outcomes)
}
