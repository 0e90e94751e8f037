//! Trailing-edge throttle (debounce) block.
//!
//! A burst of items collapses into the last item of the burst, emitted once
//! the input has been quiet for the configured timeout. Every new item
//! restarts the timeout rather than extending it.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::action::{ActionBlock, ExecutionOptions};
use crate::buffer::BufferBlock;
use crate::completion::Completion;
use crate::error::{Declined, Error};
use crate::link::{Link, LinkOptions};
use crate::traits::{Block, Source, Target};

/// Configuration for a [`ThrottleBlock`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ThrottleOptions {
    /// Quiet period that must elapse before the latest item is emitted
    pub timeout: Duration,
    /// Emit an item still waiting on its deadline when the block completes.
    ///
    /// Off by default: an item whose deadline has not fired when the input
    /// completes is dropped, and the output completes without it.
    pub flush_on_complete: bool,
}

impl ThrottleOptions {
    /// Options with the given timeout and no flushing on completion
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            flush_on_complete: false,
        }
    }

    /// Set whether a pending item is flushed on completion
    pub fn flush_on_complete(mut self, flush: bool) -> Self {
        self.flush_on_complete = flush;
        self
    }
}

/// The latest item and its deadline, always touched together.
struct Pending<T> {
    latest: Option<T>,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl<T> Pending<T> {
    fn disarm(&mut self) -> Option<T> {
        self.generation = self.generation.wrapping_add(1);
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.latest.take()
    }
}

type SharedPending<T> = Arc<Mutex<Pending<T>>>;

fn lock<T>(pending: &SharedPending<T>) -> MutexGuard<'_, Pending<T>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A propagator that emits only the most recent item of each burst.
///
/// # Examples
///
/// ```rust
/// use blockweld::prelude::*;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() {
/// let throttle = ThrottleBlock::new(Duration::from_millis(20));
/// throttle.post("S");
/// throttle.post("SF");
/// throttle.post("SF C");
///
/// assert_eq!(throttle.receive().await, Some("SF C"));
/// # }
/// ```
pub struct ThrottleBlock<T> {
    input: ActionBlock<T>,
    output: BufferBlock<T>,
    pending: SharedPending<T>,
}

impl<T: Send + 'static> ThrottleBlock<T> {
    /// Create a throttle with the given quiet period
    pub fn new(timeout: Duration) -> Self {
        Self::with_options(ThrottleOptions::new(timeout))
    }

    /// Create a throttle with explicit options
    pub fn with_options(options: ThrottleOptions) -> Self {
        let output = BufferBlock::with_label("throttle");
        let pending = Arc::new(Mutex::new(Pending {
            latest: None,
            generation: 0,
            timer: None,
        }));

        let input = {
            let pending = pending.clone();
            let output = output.clone();
            ActionBlock::with_options(
                move |item: T| {
                    arm(&pending, &output, options.timeout, item);
                    std::future::ready(Ok(()))
                },
                ExecutionOptions::sequential(),
            )
        };

        tokio::spawn(finish_output(
            input.completion(),
            pending.clone(),
            output.clone(),
            options.flush_on_complete,
        ));

        Self {
            input,
            output,
            pending,
        }
    }

    /// Whether an item is waiting for its deadline
    pub fn is_pending(&self) -> bool {
        lock(&self.pending).latest.is_some()
    }
}

/// Store `item` as the latest and restart the deadline.
fn arm<T: Send + 'static>(
    pending: &SharedPending<T>,
    output: &BufferBlock<T>,
    timeout: Duration,
    item: T,
) {
    let mut state = lock(pending);
    state.disarm();
    state.latest = Some(item);
    let generation = state.generation;

    let shared = pending.clone();
    let output = output.clone();
    state.timer = Some(tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        fire(&shared, &output, generation);
    }));
    trace!(generation, "throttle deadline armed");
}

/// Deadline expiry: move the latest item to the output.
fn fire<T: Send + 'static>(pending: &SharedPending<T>, output: &BufferBlock<T>, generation: u64) {
    let mut state = lock(pending);
    // Re-armed after this deadline elapsed but before it took the lock.
    if state.generation != generation {
        return;
    }
    state.timer = None;

    if let Some(item) = state.latest.take() {
        match output.offer(item) {
            Ok(()) => {
                trace!(generation, "throttle emitted latest item");
                #[cfg(feature = "metrics")]
                metrics::counter!("blockweld_throttle_emitted_total").increment(1);
            }
            Err(Declined(_)) => debug!("throttle output closed; dropping latest item"),
        }
    }
}

async fn finish_output<T: Send + 'static>(
    input: Completion,
    pending: SharedPending<T>,
    output: BufferBlock<T>,
    flush: bool,
) {
    match input.wait().await {
        Ok(()) => {
            let mut state = lock(&pending);
            match state.disarm() {
                Some(item) if flush => {
                    if output.offer(item).is_err() {
                        debug!("throttle output closed before flush");
                    }
                }
                Some(_) => debug!("throttle completed with an item still pending; dropping it"),
                None => {}
            }
            drop(state);
            output.complete();
        }
        Err(error) => {
            lock(&pending).disarm();
            output.fault(error);
        }
    }
}

impl<T: Send + 'static> Block for ThrottleBlock<T> {
    fn complete(&self) {
        self.input.complete();
    }

    fn fault(&self, error: Error) {
        self.input.fault(error.clone());
        lock(&self.pending).disarm();
        self.output.fault(error);
    }

    fn completion(&self) -> Completion {
        self.output.completion()
    }
}

impl<T: Send + 'static> Target<T> for ThrottleBlock<T> {
    fn offer(&self, item: T) -> std::result::Result<(), Declined<T>> {
        self.input.offer(item)
    }
}

#[async_trait]
impl<T: Send + 'static> Source<T> for ThrottleBlock<T> {
    fn link(&self, target: Arc<dyn Target<T>>, options: LinkOptions) -> Link {
        self.output.link(target, options)
    }

    async fn receive(&self) -> Option<T> {
        self.output.receive().await
    }

    fn try_receive(&self) -> Option<T> {
        self.output.try_receive()
    }
}
