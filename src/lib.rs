//! # Composable concurrent processing blocks
//!
//! This crate provides small dataflow blocks that accept items one at a
//! time, optionally transform or delay them, and hand them on to linked
//! blocks, with explicit completion and fault signaling.
//!
//! ## Core Concepts
//!
//! - **Block**: anything with a completion lifecycle (complete, fault, observe)
//! - **Target**: a block that accepts items; it may refuse them once closed
//! - **Source**: a block that offers items to linked targets
//! - **Propagator**: both at once, usually an input block wired to a buffer
//! - **Link**: a directed connection from a source to a target, optionally
//!   propagating completion and faults
//!
//! ## Blocks
//!
//! - [`BufferBlock`](buffer::BufferBlock): unbounded FIFO with fan-out links
//! - [`ActionBlock`](action::ActionBlock): runs an async function per item
//! - [`ThrottleBlock`](throttle::ThrottleBlock): emits the last item of each burst
//! - [`DelayBlock`](delay::DelayBlock): re-emits every item after a fixed delay
//! - [`FileDropSource`](file_drop::FileDropSource): paths of newly dropped,
//!   readable files
//!
//! ## Example
//!
//! ```rust
//! use blockweld::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let delay = DelayBlock::new(Duration::from_millis(10));
//!     let printer = Arc::new(ActionBlock::new(|n: u32| async move {
//!         println!("{}", n);
//!         Ok(())
//!     }));
//!     delay.link(printer.clone(), LinkOptions::propagating());
//!
//!     for n in 0..3 {
//!         delay.post(n);
//!     }
//!     delay.complete();
//!     printer.completion().await
//! }
//! ```

pub mod action;
pub mod buffer;
pub mod completion;
pub mod delay;
pub mod error;
pub mod file_drop;
pub mod link;
pub mod throttle;
pub mod traits;
pub mod watcher;

// Re-export commonly used items
pub mod prelude {
    pub use crate::action::{
        collect_outcomes, ActionBlock, ExecutionOptions, MaxConcurrency, Outcome,
    };
    pub use crate::buffer::BufferBlock;
    pub use crate::completion::{propagate, Completion, CompletionSource};
    pub use crate::delay::DelayBlock;
    pub use crate::error::{Declined, Error, Result};
    pub use crate::file_drop::{AccessProbe, FileDropConfig, FileDropSource, ReadProbe};
    pub use crate::link::{Link, LinkOptions};
    pub use crate::throttle::{ThrottleBlock, ThrottleOptions};
    pub use crate::traits::{Block, Propagator, Source, Target, TargetExt};
    pub use crate::watcher::{DirectoryWatcher, WatchEvent};
}

// Re-export main error type
pub use error::{Error, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
