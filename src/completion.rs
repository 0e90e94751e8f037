//! Completion signals shared by every block.
//!
//! A [`CompletionSource`] is owned by the block that finishes; any number of
//! [`Completion`] handles observe it. The signal resolves exactly once, to
//! either success or a carried [`Error`], and never changes afterwards.

use futures::future::BoxFuture;
use std::future::IntoFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::traits::Block;

type State = Option<Result<()>>;

/// The resolving side of a completion signal.
#[derive(Debug)]
pub struct CompletionSource {
    tx: watch::Sender<State>,
}

impl CompletionSource {
    /// Create an unresolved completion source
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Resolve the signal.
    ///
    /// Returns `false` without touching the stored result if the signal was
    /// already resolved.
    pub fn resolve(&self, result: Result<()>) -> bool {
        self.tx.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = Some(result);
            true
        })
    }

    /// Whether the signal has been resolved
    pub fn is_resolved(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// The stored result, if resolved
    pub fn result(&self) -> Option<Result<()>> {
        self.tx.borrow().clone()
    }

    /// Create a handle observing this signal
    pub fn completion(&self) -> Completion {
        Completion {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for CompletionSource {
    fn default() -> Self {
        Self::new()
    }
}

/// An observable, awaitable completion signal.
#[derive(Debug, Clone)]
pub struct Completion {
    rx: watch::Receiver<State>,
}

impl Completion {
    /// Wait for the signal to resolve.
    ///
    /// If the resolving side is dropped without ever resolving, this returns
    /// [`Error::Shutdown`].
    pub async fn wait(&self) -> Result<()> {
        let mut rx = self.rx.clone();
        let result = match rx.wait_for(Option::is_some).await {
            Ok(state) => state.clone(),
            Err(_) => None,
        };
        result.unwrap_or(Err(Error::Shutdown))
    }

    /// Whether the signal has been resolved
    pub fn is_resolved(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// The result, if already resolved
    pub fn result(&self) -> Option<Result<()>> {
        self.rx.borrow().clone()
    }
}

impl IntoFuture for Completion {
    type Output = Result<()>;
    type IntoFuture = BoxFuture<'static, Result<()>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.wait().await })
    }
}

/// Resolve `target` the same way a finished block resolved.
pub fn forward<B: Block + ?Sized>(result: &Result<()>, target: &B) {
    match result {
        Ok(()) => target.complete(),
        Err(error) => target.fault(error.clone()),
    }
}

/// Once `completion` resolves, complete or fault `target` accordingly.
pub fn propagate<B>(completion: Completion, target: B) -> JoinHandle<()>
where
    B: Block + 'static,
{
    tokio::spawn(async move {
        let result = completion.wait().await;
        tracing::trace!(ok = result.is_ok(), "propagating completion");
        forward(&result, &target);
    })
}
