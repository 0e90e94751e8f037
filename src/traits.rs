//! Core traits for the block system.
//!
//! Every block shares the [`Block`] lifecycle: it can be completed, faulted,
//! and observed through its [`Completion`]. On top of that a block accepts
//! input ([`Target`]), offers output to linked consumers ([`Source`]), or
//! both ([`Propagator`]).

use async_trait::async_trait;
use std::sync::Arc;

use crate::completion::Completion;
use crate::error::{Declined, Error};
use crate::link::{Link, LinkOptions};

/// The lifecycle shared by every block.
pub trait Block: Send + Sync {
    /// Signal that no further items will arrive.
    ///
    /// Items already queued are still delivered; the completion resolves
    /// successfully once they are. Calling this more than once is a no-op.
    fn complete(&self);

    /// Terminate the block abnormally.
    ///
    /// Undelivered items are discarded and the completion resolves with
    /// `error`, unless it has already resolved.
    fn fault(&self, error: Error);

    /// Observe the block's completion
    fn completion(&self) -> Completion;

    /// Whether the completion has resolved
    fn is_completed(&self) -> bool {
        self.completion().is_resolved()
    }
}

/// A block that accepts items.
///
/// # Examples
///
/// ```rust
/// use blockweld::prelude::*;
///
/// # #[tokio::main]
/// # async fn main() {
/// let buffer = BufferBlock::new();
/// assert!(buffer.offer(1).is_ok());
///
/// buffer.complete();
/// assert_eq!(buffer.offer(2).unwrap_err().into_inner(), 2);
/// # }
/// ```
pub trait Target<T>: Block {
    /// Offer an item, getting it back if the block refuses it
    fn offer(&self, item: T) -> Result<(), Declined<T>>;
}

/// Convenience methods for targets
pub trait TargetExt<T>: Target<T> {
    /// Offer an item and report only whether it was accepted
    fn post(&self, item: T) -> bool {
        self.offer(item).is_ok()
    }
}

impl<T, B: Target<T> + ?Sized> TargetExt<T> for B {}

/// A block that offers items to linked targets.
///
/// Each item goes to at most one target: linked targets are tried in link
/// order and the first one to accept wins.
#[async_trait]
pub trait Source<T: Send + 'static>: Block {
    /// Link a target to this block's output
    fn link(&self, target: Arc<dyn Target<T>>, options: LinkOptions) -> Link;

    /// Link a target without propagating completion
    fn link_to(&self, target: Arc<dyn Target<T>>) -> Link {
        self.link(target, LinkOptions::default())
    }

    /// Pull the next item directly, waiting for one to arrive.
    ///
    /// Returns `None` once the block has resolved and nothing is left.
    async fn receive(&self) -> Option<T>;

    /// Pull the next item if one is immediately available
    fn try_receive(&self) -> Option<T>;
}

/// A block that is both a target and a source.
pub trait Propagator<I, O: Send + 'static>: Target<I> + Source<O> {}

impl<I, O: Send + 'static, B: Target<I> + Source<O> + ?Sized> Propagator<I, O> for B {}

impl<B: Block + ?Sized> Block for Arc<B> {
    fn complete(&self) {
        (**self).complete()
    }

    fn fault(&self, error: Error) {
        (**self).fault(error)
    }

    fn completion(&self) -> Completion {
        (**self).completion()
    }
}

impl<T, B: Target<T> + ?Sized> Target<T> for Arc<B> {
    fn offer(&self, item: T) -> Result<(), Declined<T>> {
        (**self).offer(item)
    }
}
