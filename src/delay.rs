//! Fixed-delay re-emitting block.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::action::{ActionBlock, ExecutionOptions};
use crate::buffer::BufferBlock;
use crate::completion::{propagate, Completion};
use crate::error::{Declined, Error};
use crate::link::{Link, LinkOptions};
use crate::traits::{Block, Source, Target};

/// A propagator that re-emits every item unchanged after a fixed delay.
///
/// Each item waits independently, so a burst never delays any single item
/// by more than the configured duration. Items whose waits elapse together
/// may come out in any order.
///
/// Completing the block lets every in-flight wait finish before the output
/// completes. Faulting it cancels the waits and drops their items.
pub struct DelayBlock<T> {
    delay: Duration,
    input: ActionBlock<T>,
    output: BufferBlock<T>,
    cancel: CancellationToken,
}

impl<T: Send + 'static> DelayBlock<T> {
    /// Create a delay block
    pub fn new(delay: Duration) -> Self {
        Self::with_label(delay, "delay")
    }

    /// Create a delay block whose output logs carry `label`
    pub fn with_label(delay: Duration, label: &'static str) -> Self {
        let output = BufferBlock::with_label(label);
        let cancel = CancellationToken::new();

        let input = {
            let output = output.clone();
            let cancel = cancel.clone();
            ActionBlock::with_options(
                move |item: T| {
                    let output = output.clone();
                    let cancel = cancel.clone();
                    async move {
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => emit(&output, item),
                            _ = cancel.cancelled() => trace!("delayed item cancelled"),
                        }
                        Ok(())
                    }
                },
                ExecutionOptions::unbounded(),
            )
        };

        propagate(input.completion(), output.clone());

        Self {
            delay,
            input,
            output,
            cancel,
        }
    }

    /// The configured delay
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

fn emit<T: Send + 'static>(output: &BufferBlock<T>, item: T) {
    match output.offer(item) {
        Ok(()) => {
            #[cfg(feature = "metrics")]
            metrics::counter!("blockweld_delay_emitted_total").increment(1);
        }
        Err(Declined(_)) => debug!("delay output closed; dropping item"),
    }
}

impl<T: Send + 'static> Block for DelayBlock<T> {
    fn complete(&self) {
        self.input.complete();
    }

    fn fault(&self, error: Error) {
        self.cancel.cancel();
        self.input.fault(error.clone());
        self.output.fault(error);
    }

    fn completion(&self) -> Completion {
        self.output.completion()
    }
}

impl<T: Send + 'static> Target<T> for DelayBlock<T> {
    fn offer(&self, item: T) -> std::result::Result<(), Declined<T>> {
        self.input.offer(item)
    }
}

#[async_trait]
impl<T: Send + 'static> Source<T> for DelayBlock<T> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::drain;
    use crate::traits::TargetExt;
    use tokio::time::{sleep, Instant};

    #[tokio::test(start_paused = true)]
    async fn items_arrive_after_the_delay() {
        let delay = DelayBlock::new(Duration::from_millis(250));
        let start = Instant::now();
        delay.post("late");

        assert_eq!(delay.receive().await, Some("late"));
        assert!(start.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn bursts_are_not_serialized() {
        let delay = DelayBlock::new(Duration::from_millis(100));
        let start = Instant::now();
        for i in 0..50 {
            delay.post(i);
        }
        delay.complete();

        let mut items = drain(&delay.output).await.unwrap();
        items.sort();
        assert_eq!(items, (0..50).collect::<Vec<_>>());
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn completion_waits_for_in_flight_items() {
        let delay = DelayBlock::new(Duration::from_secs(5));
        delay.post(1);
        sleep(Duration::from_secs(1)).await;
        delay.complete();

        assert!(!delay.is_completed());
        assert_eq!(delay.receive().await, Some(1));
        assert!(delay.completion().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn fault_cancels_in_flight_items() {
        let delay = DelayBlock::new(Duration::from_secs(5));
        delay.post(1);
        delay.fault(Error::custom("cancelled"));

        assert!(delay.completion().await.is_err());
        sleep(Duration::from_secs(10)).await;
        assert_eq!(delay.try_receive(), None);
        assert!(!delay.post(2));
    }
}
