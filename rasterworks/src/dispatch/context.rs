//! What a running task gets to work with.
//!
//! A [`TaskContext`] owns the tickets acquired at submission and the worker
//! side of the progress bridge. Dropping it releases every ticket, which is
//! how resources get released on success, failure and panic alike.
//!
//! Native objects are not safe for concurrent use, so access goes through
//! per-resource locks: inputs are locked shared, the output exclusive.
//! [`lock_resources`] always locks in ascending resource id order, so tasks
//! touching overlapping sets of resources cannot deadlock.

use super::progress::ProgressBridge;
use super::task::TaskId;
use crate::error::OperationError;
use crate::native::{NativeDataset, OperationKind};
use crate::resource::{Resource, ResourceId, Ticket};
use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard};

/// A native object owned by the resource guard.
pub type NativeObject = Box<dyn NativeDataset>;

/// A guarded dataset resource.
pub type DatasetResource = Resource<NativeObject>;

/// A ticket pinning a dataset resource.
pub type DatasetTicket = Ticket<NativeObject>;

/// Execution context handed to a task's work function.
#[derive(Debug)]
pub struct TaskContext {
    id: TaskId,
    kind: OperationKind,
    inputs: Vec<DatasetTicket>,
    output: Option<DatasetTicket>,
    progress: ProgressBridge,
}

/// Disjoint borrows of a [`TaskContext`].
pub struct TaskParts<'a> {
    pub inputs: &'a [DatasetTicket],
    pub output: Option<&'a DatasetTicket>,
    pub progress: &'a mut ProgressBridge,
}

impl TaskContext {
    pub(crate) fn new(
        id: TaskId,
        kind: OperationKind,
        inputs: Vec<DatasetTicket>,
        output: Option<DatasetTicket>,
        progress: ProgressBridge,
    ) -> Self {
        Self {
            id,
            kind,
            inputs,
            output,
            progress,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn inputs(&self) -> &[DatasetTicket] {
        &self.inputs
    }

    /// Input ticket by position.
    pub fn input(&self, index: usize) -> Result<&DatasetTicket, OperationError> {
        self.inputs.get(index).ok_or_else(|| {
            OperationError::invalid(format!("task has no input #{index}"))
        })
    }

    /// The output ticket.
    pub fn output(&self) -> Result<&DatasetTicket, OperationError> {
        self.output
            .as_ref()
            .ok_or_else(|| OperationError::invalid("task has no output resource"))
    }

    pub fn progress(&mut self) -> &mut ProgressBridge {
        &mut self.progress
    }

    /// Splits the context so resources can be locked while progress is emitted.
    pub fn parts(&mut self) -> TaskParts<'_> {
        TaskParts {
            inputs: &self.inputs,
            output: self.output.as_ref(),
            progress: &mut self.progress,
        }
    }

    /// Locks all inputs shared and the output exclusive.
    pub fn lock(&self) -> Result<LockedResources<'_>, OperationError> {
        lock_resources(&self.inputs, self.output.as_ref())
    }

    /// Locks every resource shared, the output included.
    ///
    /// For tasks that read first and write later: other readers of the same
    /// output keep running, and the exclusive lock is taken separately
    /// through [`output`](Self::output) only for the write.
    pub fn lock_shared(&self) -> Result<SharedResources<'_>, OperationError> {
        lock_shared(&self.inputs, self.output.as_ref())
    }

    /// First resource destroyed since submission, if any.
    pub(crate) fn destroyed_resource(&self) -> Option<&DatasetTicket> {
        self.inputs
            .iter()
            .chain(self.output.iter())
            .find(|ticket| !ticket.is_alive())
    }
}

enum Slot {
    Read(usize),
    Write,
}

/// Guards over a task's resources.
pub struct LockedResources<'a> {
    reads: Vec<(usize, MappedRwLockReadGuard<'a, NativeObject>)>,
    write: Option<MappedRwLockWriteGuard<'a, NativeObject>>,
}

/// Locks `inputs` shared and `output` exclusive, in ascending id order.
///
/// An output that is also an input would need both kinds of lock at once and
/// is rejected.
pub fn lock_resources<'a>(
    inputs: &'a [DatasetTicket],
    output: Option<&'a DatasetTicket>,
) -> Result<LockedResources<'a>, OperationError> {
    if let Some(out) = output {
        if inputs.iter().any(|t| t.id() == out.id()) {
            return Err(OperationError::invalid(
                "the destination dataset cannot also be one of the sources",
            ));
        }
    }

    let mut order: Vec<(ResourceId, Slot)> = inputs
        .iter()
        .enumerate()
        .map(|(i, t)| (t.id(), Slot::Read(i)))
        .chain(output.map(|t| (t.id(), Slot::Write)))
        .collect();
    order.sort_by_key(|(id, _)| *id);

    let mut reads = Vec::with_capacity(inputs.len());
    let mut write = None;
    for (_, slot) in order {
        match slot {
            Slot::Read(i) => reads.push((i, inputs[i].read()?)),
            Slot::Write => {
                if let Some(out) = output {
                    write = Some(out.write()?);
                }
            }
        }
    }
    reads.sort_by_key(|(i, _)| *i);
    Ok(LockedResources { reads, write })
}

/// Shared guards over a task's inputs and output.
pub struct SharedResources<'a> {
    reads: Vec<(usize, MappedRwLockReadGuard<'a, NativeObject>)>,
    output: Option<MappedRwLockReadGuard<'a, NativeObject>>,
}

/// Locks `inputs` and `output` shared, in ascending id order.
pub fn lock_shared<'a>(
    inputs: &'a [DatasetTicket],
    output: Option<&'a DatasetTicket>,
) -> Result<SharedResources<'a>, OperationError> {
    let mut order: Vec<(ResourceId, Slot)> = inputs
        .iter()
        .enumerate()
        .map(|(i, t)| (t.id(), Slot::Read(i)))
        .chain(output.map(|t| (t.id(), Slot::Write)))
        .collect();
    order.sort_by_key(|(id, _)| *id);

    let mut reads = Vec::with_capacity(inputs.len());
    let mut out = None;
    for (_, slot) in order {
        match slot {
            Slot::Read(i) => reads.push((i, inputs[i].read()?)),
            Slot::Write => {
                if let Some(ticket) = output {
                    out = Some(ticket.read()?);
                }
            }
        }
    }
    reads.sort_by_key(|(i, _)| *i);
    Ok(SharedResources { reads, output: out })
}

impl SharedResources<'_> {
    /// Input datasets in submission order.
    pub fn sources(&self) -> Vec<&dyn NativeDataset> {
        self.reads.iter().map(|(_, g)| &***g as &dyn NativeDataset).collect()
    }

    /// The output dataset, read-only.
    pub fn output(&self) -> Option<&dyn NativeDataset> {
        self.output.as_ref().map(|g| &***g as &dyn NativeDataset)
    }
}

impl<'a> LockedResources<'a> {
    /// Input datasets in submission order.
    pub fn sources(&self) -> Vec<&dyn NativeDataset> {
        self.reads.iter().map(|(_, g)| &***g as &dyn NativeDataset).collect()
    }

    /// Input dataset by position.
    pub fn source(&self, index: usize) -> Result<&dyn NativeDataset, OperationError> {
        self.reads
            .get(index)
            .map(|(_, g)| &***g as &dyn NativeDataset)
            .ok_or_else(|| OperationError::invalid(format!("task has no input #{index}")))
    }

    /// The output dataset.
    pub fn destination(&mut self) -> Result<&mut dyn NativeDataset, OperationError> {
        self.write
            .as_mut()
            .map(|g| &mut ***g as &mut dyn NativeDataset)
            .ok_or_else(|| OperationError::invalid("task has no output resource"))
    }

    /// Inputs and output borrowed together.
    pub fn split(&mut self) -> (Vec<&dyn NativeDataset>, Option<&mut dyn NativeDataset>) {
        let sources = self
            .reads
            .iter()
            .map(|(_, g)| &***g as &dyn NativeDataset)
            .collect();
        let destination = self.write.as_mut().map(|g| &mut ***g as &mut dyn NativeDataset);
        (sources, destination)
    }
}
