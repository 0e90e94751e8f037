//! Unbounded FIFO buffering block.
//!
//! [`BufferBlock`] is the output half of every composite block in this
//! crate. Items are held in arrival order until a linked target accepts them
//! or a caller pulls them with [`Source::receive`].

use async_trait::async_trait;
use futures::stream::{self, Stream};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::completion::{forward, Completion, CompletionSource};
use crate::error::{Declined, Error, Result};
use crate::link::{Link, LinkOptions};
use crate::traits::{Block, Source, Target};

struct LinkEntry<T> {
    id: u64,
    target: Arc<dyn Target<T>>,
    propagate: bool,
}

struct State<T> {
    queue: VecDeque<T>,
    links: Vec<LinkEntry<T>>,
    next_link_id: u64,
    /// Bumped whenever a target is linked
    links_version: u64,
    accepting: bool,
    /// An item may be outside the queue while a pump offers it
    draining: bool,
}

struct Shared<T> {
    label: &'static str,
    state: Mutex<State<T>>,
    available: Notify,
    completion: CompletionSource,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A FIFO queue with no capacity bound.
///
/// Offers always succeed until the block is completed or faulted. A
/// completed buffer resolves once its queue has drained; a faulted buffer
/// drops whatever is still queued and resolves immediately.
///
/// Nothing ever blocks a producer, so a buffer whose items are never taken
/// grows without limit.
pub struct BufferBlock<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> BufferBlock<T> {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::with_label("buffer")
    }

    /// Create an empty buffer whose log events carry `label`
    pub fn with_label(label: &'static str) -> Self {
        Self {
            shared: Arc::new(Shared {
                label,
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    links: Vec::new(),
                    next_link_id: 0,
                    links_version: 0,
                    accepting: true,
                    draining: false,
                }),
                available: Notify::new(),
                completion: CompletionSource::new(),
            }),
        }
    }

    /// Number of items currently queued
    pub fn len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Check if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Turn the buffer into a stream that ends when the buffer resolves
    pub fn into_stream(self) -> impl Stream<Item = T> + Send + 'static {
        stream::unfold(self, |buffer| async move {
            let item = buffer.receive().await?;
            Some((item, buffer))
        })
    }

    /// Hand queued items to linked targets until the queue is empty or
    /// every target refuses.
    ///
    /// Only one caller pumps at a time. The buffer cannot resolve while a
    /// popped item is being offered, and a target linked during an offer is
    /// tried before the item is held back.
    fn pump(&self) {
        {
            let mut state = self.shared.lock();
            if state.draining || state.links.is_empty() {
                return;
            }
            state.draining = true;
        }

        loop {
            let (item, targets, version) = {
                let mut state = self.shared.lock();
                match state.queue.pop_front() {
                    Some(item) => {
                        let targets: Vec<_> =
                            state.links.iter().map(|link| link.target.clone()).collect();
                        (item, targets, state.links_version)
                    }
                    None => {
                        state.draining = false;
                        break;
                    }
                }
            };

            let mut pending = Some(item);
            for target in &targets {
                let Some(item) = pending.take() else { break };
                if let Err(Declined(item)) = target.offer(item) {
                    pending = Some(item);
                }
            }

            if let Some(item) = pending {
                let mut state = self.shared.lock();
                if self.shared.completion.is_resolved() {
                    state.draining = false;
                    trace!(label = self.shared.label, "buffer faulted mid-delivery; dropping item");
                    break;
                }
                state.queue.push_front(item);
                if state.links_version != version {
                    continue;
                }
                state.draining = false;
                trace!(label = self.shared.label, "no linked target accepted; holding item");
                drop(state);
                self.shared.available.notify_one();
                break;
            }
        }

        self.try_finish();
    }

    /// Resolve successfully if completion was requested and the queue drained.
    fn try_finish(&self) {
        let targets = {
            let state = self.shared.lock();
            if state.accepting || state.draining || !state.queue.is_empty() {
                return;
            }
            if !self.shared.completion.resolve(Ok(())) {
                return;
            }
            propagating(&state.links)
        };

        debug!(label = self.shared.label, "buffer completed");
        self.shared.available.notify_waiters();
        for target in targets {
            target.complete();
        }
    }
}

fn propagating<T>(links: &[LinkEntry<T>]) -> Vec<Arc<dyn Target<T>>> {
    links
        .iter()
        .filter(|link| link.propagate)
        .map(|link| link.target.clone())
        .collect()
}

impl<T: Send + 'static> Default for BufferBlock<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for BufferBlock<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Send + 'static> Block for BufferBlock<T> {
    fn complete(&self) {
        {
            let mut state = self.shared.lock();
            if !state.accepting {
                return;
            }
            state.accepting = false;
            debug!(
                label = self.shared.label,
                queued = state.queue.len(),
                "buffer completing"
            );
        }
        self.shared.available.notify_waiters();
        self.try_finish();
    }

    fn fault(&self, error: Error) {
        let targets = {
            let mut state = self.shared.lock();
            if !self.shared.completion.resolve(Err(error.clone())) {
                return;
            }
            state.accepting = false;
            let dropped = state.queue.len();
            state.queue.clear();
            debug!(label = self.shared.label, dropped, %error, "buffer faulted");
            propagating(&state.links)
        };

        self.shared.available.notify_waiters();
        for target in targets {
            target.fault(error.clone());
        }
    }

    fn completion(&self) -> Completion {
        self.shared.completion.completion()
    }
}

impl<T: Send + 'static> Target<T> for BufferBlock<T> {
    fn offer(&self, item: T) -> std::result::Result<(), Declined<T>> {
        {
            let mut state = self.shared.lock();
            if !state.accepting {
                return Err(Declined(item));
            }
            state.queue.push_back(item);
        }
        self.shared.available.notify_one();
        self.pump();
        Ok(())
    }
}

#[async_trait]
impl<T: Send + 'static> Source<T> for BufferBlock<T> {
    fn link(&self, target: Arc<dyn Target<T>>, options: LinkOptions) -> Link {
        let (id, resolved) = {
            let mut state = self.shared.lock();
            let id = state.next_link_id;
            state.next_link_id += 1;
            state.links_version += 1;
            state.links.push(LinkEntry {
                id,
                target: target.clone(),
                propagate: options.propagate_completion,
            });
            (id, self.shared.completion.result())
        };
        debug!(label = self.shared.label, link = id, "target linked");

        if options.propagate_completion {
            if let Some(result) = resolved {
                forward(&result, &target);
            }
        }
        self.pump();

        let shared: Weak<Shared<T>> = Arc::downgrade(&self.shared);
        Link::new(id, move || {
            if let Some(shared) = shared.upgrade() {
                shared.lock().links.retain(|link| link.id != id);
                debug!(label = shared.label, link = id, "target unlinked");
            }
        })
    }

    async fn receive(&self) -> Option<T> {
        loop {
            let notified = self.shared.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.try_receive() {
                return Some(item);
            }
            if self.shared.completion.is_resolved() {
                return None;
            }

            notified.await;
        }
    }

    fn try_receive(&self) -> Option<T> {
        let item = self.shared.lock().queue.pop_front()?;
        self.try_finish();
        Some(item)
    }
}

/// Collect everything a buffer yields until it resolves.
pub async fn drain<T: Send + 'static>(buffer: &BufferBlock<T>) -> Result<Vec<T>> {
    let mut items = Vec::new();
    while let Some(item) = buffer.receive().await {
        items.push(item);
    }
    buffer.completion().wait().await?;
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::TargetExt;
    use std::time::Duration;

    /// Holds every offer for a while before passing it on.
    struct SlowTarget {
        inner: BufferBlock<i32>,
        hold: Duration,
        entered: Arc<Notify>,
    }

    impl SlowTarget {
        fn new(inner: BufferBlock<i32>, hold: Duration) -> (Arc<Self>, Arc<Notify>) {
            let entered = Arc::new(Notify::new());
            let target = Arc::new(Self {
                inner,
                hold,
                entered: entered.clone(),
            });
            (target, entered)
        }
    }

    impl Block for SlowTarget {
        fn complete(&self) {
            self.inner.complete();
        }

        fn fault(&self, error: Error) {
            self.inner.fault(error);
        }

        fn completion(&self) -> Completion {
            self.inner.completion()
        }
    }

    impl Target<i32> for SlowTarget {
        fn offer(&self, item: i32) -> std::result::Result<(), Declined<i32>> {
            self.entered.notify_one();
            std::thread::sleep(self.hold);
            self.inner.offer(item)
        }
    }

    #[tokio::test]
    async fn preserves_arrival_order() {
        let buffer = BufferBlock::new();
        for i in 0..5 {
            assert!(buffer.post(i));
        }
        buffer.complete();

        assert_eq!(drain(&buffer).await.unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn completion_waits_for_the_queue_to_drain() {
        let buffer = BufferBlock::new();
        buffer.post("a");
        buffer.complete();

        assert!(!buffer.is_completed());
        assert!(!buffer.post("b"));
        assert_eq!(buffer.try_receive(), Some("a"));
        assert!(buffer.is_completed());
        assert_eq!(buffer.receive().await, None);
    }

    #[tokio::test]
    async fn fault_discards_queued_items() {
        let buffer = BufferBlock::new();
        buffer.post(1);
        buffer.post(2);
        buffer.fault(Error::custom("broken"));

        assert!(buffer.is_empty());
        assert_eq!(buffer.receive().await, None);
        let error = buffer.completion().wait().await.unwrap_err();
        assert_eq!(error.to_string(), "broken");
    }

    #[tokio::test]
    async fn completing_twice_resolves_once() {
        let buffer = BufferBlock::<u8>::new();
        buffer.complete();
        buffer.complete();
        buffer.fault(Error::custom("too late"));

        assert!(buffer.completion().await.is_ok());
    }

    #[tokio::test]
    async fn each_item_goes_to_exactly_one_target() {
        let source = BufferBlock::<i32>::new();
        let first = Arc::new(BufferBlock::<i32>::new());
        let second = Arc::new(BufferBlock::<i32>::new());
        source.link(first.clone(), LinkOptions::propagating());
        source.link(second.clone(), LinkOptions::propagating());

        for i in 0..10 {
            source.post(i);
        }
        source.complete();

        let mut seen = drain(&first).await.unwrap();
        seen.extend(drain(&second).await.unwrap());
        seen.sort();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn declined_items_move_on_to_the_next_target() {
        let source = BufferBlock::<&str>::new();
        let closed = Arc::new(BufferBlock::<&str>::new());
        closed.complete();
        let open = Arc::new(BufferBlock::<&str>::new());
        source.link_to(closed.clone());
        source.link_to(open.clone());

        source.post("x");
        assert_eq!(open.try_receive(), Some("x"));
    }

    #[tokio::test]
    async fn items_wait_until_a_target_is_linked() {
        let source = BufferBlock::<i32>::new();
        source.post(42);
        assert_eq!(source.len(), 1);

        let target = Arc::new(BufferBlock::<i32>::new());
        source.link_to(target.clone());
        assert!(source.is_empty());
        assert_eq!(target.try_receive(), Some(42));
    }

    #[tokio::test]
    async fn unlinked_targets_stop_receiving() {
        let source = BufferBlock::<i32>::new();
        let target = Arc::new(BufferBlock::<i32>::new());
        let link = source.link(target.clone(), LinkOptions::propagating());
        link.unlink();

        source.post(1);
        source.complete();
        assert_eq!(target.try_receive(), None);
        assert!(!target.is_completed());
    }

    #[tokio::test]
    async fn fault_propagates_through_links() {
        let source = BufferBlock::<u8>::new();
        let target = Arc::new(BufferBlock::<u8>::new());
        source.link(target.clone(), LinkOptions::propagating());

        source.fault(Error::custom("upstream"));
        let error = target.completion().wait().await.unwrap_err();
        assert_eq!(error.to_string(), "upstream");
    }

    #[tokio::test]
    async fn linking_after_resolution_still_propagates() {
        let source = BufferBlock::<u8>::new();
        source.complete();

        let target = Arc::new(BufferBlock::<u8>::new());
        source.link(target.clone(), LinkOptions::propagating());
        assert!(target.completion().await.is_ok());
    }

    #[tokio::test]
    async fn receivers_wake_when_items_arrive() {
        let buffer = BufferBlock::new();
        let reader = buffer.clone();
        let handle = tokio::spawn(async move { reader.receive().await });

        tokio::task::yield_now().await;
        buffer.post("late");
        assert_eq!(handle.await.unwrap(), Some("late"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn completion_waits_for_an_in_flight_delivery() {
        let source = BufferBlock::<i32>::new();
        let downstream = BufferBlock::<i32>::new();
        let (slow, entered) = SlowTarget::new(downstream.clone(), Duration::from_millis(200));
        source.link(slow, LinkOptions::propagating());

        let producer = source.clone();
        let posting = tokio::task::spawn_blocking(move || producer.post(1));
        entered.notified().await;
        source.complete();
        assert!(!source.is_completed());

        assert!(posting.await.unwrap());
        assert_eq!(drain(&downstream).await.unwrap(), vec![1]);
        assert!(source.completion().await.is_ok());
        assert!(source.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn targets_linked_mid_delivery_get_the_held_item() {
        let source = BufferBlock::<i32>::new();
        let closed = BufferBlock::<i32>::new();
        closed.complete();
        let (slow, entered) = SlowTarget::new(closed, Duration::from_millis(100));
        source.link_to(slow);

        let producer = source.clone();
        let posting = tokio::task::spawn_blocking(move || producer.post(7));
        entered.notified().await;
        let open = Arc::new(BufferBlock::<i32>::new());
        source.link_to(open.clone());

        assert!(posting.await.unwrap());
        assert_eq!(open.try_receive(), Some(7));
        assert!(source.is_empty());
    }
}
