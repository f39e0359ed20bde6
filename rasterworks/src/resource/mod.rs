//! Liveness tracking for shared native resources.
//!
//! Every native object (a raster dataset, and through it its bands) is owned
//! by a [`Resource`]. The resource tracks two pieces of state under a lock:
//!
//! - `alive`: cleared by [`Resource::destroy`], immediately visible to every
//!   thread.
//! - `refcount`: number of outstanding [`Ticket`]s held by in-flight tasks.
//!
//! The native object is freed exactly once, either by `destroy` when no
//! ticket is outstanding, or by the last ticket's release afterwards.
//!
//! ```text
//!   acquire ──► Ticket ──► read()/write() ──► drop(Ticket) = release
//!      │                                          │
//!      └─ fails once destroy() ran                └─ frees if !alive && refcount == 0
//! ```

mod guard;

pub use guard::{Resource, Ticket};

use std::fmt;

/// Unique identity of a resource.
///
/// Identities are never reused within a process. They also define the global
/// lock order used when a task needs several native objects at once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(u64);

impl ResourceId {
    /// Wraps a raw identifier.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw identifier.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind of native object behind a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// A raster or vector dataset.
    Dataset,
    /// A raster band (child of a dataset).
    Band,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dataset => write!(f, "Dataset"),
            Self::Band => write!(f, "Band"),
        }
    }
}
