//! Links between a source block and its targets.

use std::fmt;

/// Options applied when linking a target to a source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LinkOptions {
    /// Complete or fault the target when the source resolves
    pub propagate_completion: bool,
}

impl LinkOptions {
    /// Options that propagate completion and faults to the target
    pub fn propagating() -> Self {
        Self {
            propagate_completion: true,
        }
    }
}

/// Handle to an established link.
///
/// Dropping the handle leaves the link in place; call [`Link::unlink`] to
/// remove it.
pub struct Link {
    id: u64,
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Link {
    pub(crate) fn new<F>(id: u64, detach: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            id,
            detach: Some(Box::new(detach)),
        }
    }

    /// Identifier of this link within its source
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remove the target from the source.
    ///
    /// The target receives no further items and, if the link propagated
    /// completion, is no longer told when the source resolves.
    pub fn unlink(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link").field("id", &self.id).finish()
    }
}
