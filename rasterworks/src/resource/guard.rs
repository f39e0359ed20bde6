//! The "destroy now, free later" resource lifecycle.

use super::{ResourceId, ResourceKind};
use crate::error::OperationError;
use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, Mutex, RwLock, RwLockReadGuard,
    RwLockWriteGuard,
};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Source of process-unique resource identities.
static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Callback run exactly once when the native object is freed.
type Finalizer<T> = Box<dyn FnOnce(ResourceId, T) + Send>;

#[derive(Debug)]
struct Lifecycle {
    alive: bool,
    refcount: usize,
    freed: bool,
}

struct Shared<T> {
    id: ResourceId,
    kind: ResourceKind,
    life: Mutex<Lifecycle>,
    object: RwLock<Option<T>>,
    finalizer: Mutex<Option<Finalizer<T>>>,
}

impl<T> Shared<T> {
    /// Takes the native object out and runs the finalizer.
    ///
    /// Callers must have flipped `freed` under the lifecycle lock first, which
    /// makes this reachable once per resource.
    fn free(&self) {
        let object = self.object.write().take();
        let finalizer = self.finalizer.lock().take();
        if let Some(object) = object {
            match finalizer {
                Some(finalize) => finalize(self.id, object),
                None => drop(object),
            }
            debug!(resource = %self.id, kind = %self.kind, "Native object freed");
        }
    }

    fn destroyed_error(&self) -> OperationError {
        OperationError::ResourceDestroyed {
            resource: self.kind,
            id: self.id,
        }
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        // Last handle and last ticket are gone without an explicit destroy.
        let life = self.life.get_mut();
        if !life.freed {
            life.freed = true;
            self.free();
        }
    }
}

/// A shared native object with an `alive` flag and a ticket refcount.
///
/// Cloning a `Resource` clones the handle, not the object: all clones share
/// identity and lifecycle.
pub struct Resource<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Resource<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Resource<T> {
    /// Wraps a native object. Freeing it simply drops it.
    pub fn new(kind: ResourceKind, object: T) -> Self {
        Self::build(kind, object, None)
    }

    /// Wraps a native object with a finalizer that receives it when freed.
    pub fn with_finalizer(
        kind: ResourceKind,
        object: T,
        finalizer: impl FnOnce(ResourceId, T) + Send + 'static,
    ) -> Self {
        Self::build(kind, object, Some(Box::new(finalizer)))
    }

    fn build(kind: ResourceKind, object: T, finalizer: Option<Finalizer<T>>) -> Self {
        let id = ResourceId::new(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            shared: Arc::new(Shared {
                id,
                kind,
                life: Mutex::new(Lifecycle {
                    alive: true,
                    refcount: 0,
                    freed: false,
                }),
                object: RwLock::new(Some(object)),
                finalizer: Mutex::new(finalizer),
            }),
        }
    }

    /// Returns the resource identity.
    pub fn id(&self) -> ResourceId {
        self.shared.id
    }

    /// Returns the resource kind.
    pub fn kind(&self) -> ResourceKind {
        self.shared.kind
    }

    /// Returns false once [`destroy`](Self::destroy) has run.
    pub fn is_alive(&self) -> bool {
        self.shared.life.lock().alive
    }

    /// Number of tickets currently outstanding.
    pub fn refcount(&self) -> usize {
        self.shared.life.lock().refcount
    }

    /// Returns true once the native object has been freed.
    pub fn is_freed(&self) -> bool {
        self.shared.life.lock().freed
    }

    /// Returns true if both handles refer to the same resource.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Pins the resource for the duration of a task.
    ///
    /// Fails with [`OperationError::ResourceDestroyed`] once `destroy` has run,
    /// no matter how many tickets are still outstanding.
    pub fn acquire(&self) -> Result<Ticket<T>, OperationError> {
        let mut life = self.shared.life.lock();
        if !life.alive {
            return Err(self.shared.destroyed_error());
        }
        life.refcount += 1;
        Ok(Ticket {
            shared: Arc::clone(&self.shared),
        })
    }

    /// Marks the resource destroyed.
    ///
    /// Never blocks on outstanding tickets. The native object is freed right
    /// away when none are outstanding, otherwise by the last release.
    pub fn destroy(&self) -> Result<(), OperationError> {
        let free_now = {
            let mut life = self.shared.life.lock();
            if !life.alive {
                return Err(self.shared.destroyed_error());
            }
            life.alive = false;
            if life.refcount == 0 {
                life.freed = true;
                true
            } else {
                false
            }
        };

        debug!(
            resource = %self.shared.id,
            kind = %self.shared.kind,
            deferred = !free_now,
            "Resource destroyed"
        );

        if free_now {
            self.shared.free();
        }
        Ok(())
    }
}

impl<T> fmt::Debug for Resource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let life = self.shared.life.lock();
        f.debug_struct("Resource")
            .field("id", &self.shared.id)
            .field("kind", &self.shared.kind)
            .field("alive", &life.alive)
            .field("refcount", &life.refcount)
            .finish()
    }
}

/// A scoped reference pinning a resource's native object.
///
/// Dropping the ticket releases the reference on every path, including
/// unwinding out of a panicking task.
pub struct Ticket<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Ticket<T> {
    /// Identity of the pinned resource.
    pub fn id(&self) -> ResourceId {
        self.shared.id
    }

    /// Kind of the pinned resource.
    pub fn kind(&self) -> ResourceKind {
        self.shared.kind
    }

    /// Whether the resource is still alive (not destroyed).
    ///
    /// A ticket keeps the object reachable after destroy, but tasks that have
    /// not started yet use this to drop themselves.
    pub fn is_alive(&self) -> bool {
        self.shared.life.lock().alive
    }

    /// Shared access to the native object.
    pub fn read(&self) -> Result<MappedRwLockReadGuard<'_, T>, OperationError> {
        RwLockReadGuard::try_map(self.shared.object.read_recursive(), |o| o.as_ref())
            .map_err(|_| self.shared.destroyed_error())
    }

    /// Exclusive access to the native object.
    pub fn write(&self) -> Result<MappedRwLockWriteGuard<'_, T>, OperationError> {
        RwLockWriteGuard::try_map(self.shared.object.write(), |o| o.as_mut())
            .map_err(|_| self.shared.destroyed_error())
    }
}

impl<T> Drop for Ticket<T> {
    fn drop(&mut self) {
        let free_now = {
            let mut life = self.shared.life.lock();
            life.refcount = life.refcount.saturating_sub(1);
            if life.refcount == 0 && !life.alive && !life.freed {
                life.freed = true;
                true
            } else {
                false
            }
        };
        if free_now {
            self.shared.free();
        }
    }
}

impl<T> fmt::Debug for Ticket<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticket")
            .field("id", &self.shared.id)
            .field("kind", &self.shared.kind)
            .finish()
    }
}
