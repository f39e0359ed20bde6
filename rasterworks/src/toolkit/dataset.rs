//! Dataset handles.
//!
//! A [`Dataset`] is a cheap, cloneable reference to a guarded native dataset.
//! Clones share identity: closing one closes them all. Operations that touch
//! raster data run on the dispatcher and come in pairs, `x` (blocking) and
//! `x_async` (returns a [`TaskHandle`]); lightweight metadata accessors run on
//! the caller's thread under the dataset's lock.

use super::band::Band;
use crate::dispatch::{
    DatasetResource, Dispatcher, NativeObject, TaskHandle, TaskRequest, TelemetryEvent,
};
use crate::error::OperationError;
use crate::native::{
    DataType, Feature, GeoTransform, LayerInfo, NativeDataset, OperationKind, RasterSize,
};
use crate::resource::{Resource, ResourceId, ResourceKind};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Handle to an open dataset.
#[derive(Clone)]
pub struct Dataset {
    resource: DatasetResource,
    dispatcher: Arc<Dispatcher>,
    description: Arc<str>,
}

impl Dataset {
    /// Takes ownership of a native dataset.
    ///
    /// When the resource is freed the dataset is flushed, so pending writes
    /// reach the engine's storage.
    pub(crate) fn from_native(native: NativeObject, dispatcher: Arc<Dispatcher>) -> Self {
        let description: Arc<str> = Arc::from(native.description());
        let telemetry = Arc::clone(dispatcher.telemetry());
        let resource = Resource::with_finalizer(
            ResourceKind::Dataset,
            native,
            move |id, mut native: NativeObject| {
                if let Err(err) = native.flush() {
                    warn!(resource = %id, error = %err, "Failed to flush dataset while freeing it");
                }
                drop(native);
                telemetry.emit(TelemetryEvent::ResourceFreed {
                    resource: id,
                    kind: ResourceKind::Dataset,
                });
            },
        );
        Self {
            resource,
            dispatcher,
            description,
        }
    }

    /// Identity shared by all clones of this handle.
    pub fn id(&self) -> ResourceId {
        self.resource.id()
    }

    /// Returns true if both handles refer to the same dataset.
    pub fn same(a: &Dataset, b: &Dataset) -> bool {
        a.resource.ptr_eq(&b.resource)
    }

    /// Path or name the dataset was opened with.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns false once the dataset has been closed.
    pub fn is_open(&self) -> bool {
        self.resource.is_alive()
    }

    /// Closes the dataset.
    ///
    /// Takes effect immediately for every clone of the handle: later calls
    /// fail with [`OperationError::ResourceDestroyed`]. Tasks already holding
    /// the dataset finish normally and the native object is freed after the
    /// last of them.
    pub fn close(&self) -> Result<(), OperationError> {
        self.resource.destroy()?;
        self.dispatcher
            .telemetry()
            .emit(TelemetryEvent::ResourceDestroyed {
                resource: self.id(),
                kind: ResourceKind::Dataset,
                deferred: !self.resource.is_freed(),
            });
        Ok(())
    }

    pub(crate) fn resource(&self) -> &DatasetResource {
        &self.resource
    }

    pub(crate) fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Runs `f` against the dataset on a worker, holding a shared lock.
    pub(crate) fn read_task<T, F>(
        &self,
        kind: OperationKind,
        f: F,
    ) -> Result<TaskHandle<T>, OperationError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn NativeDataset) -> Result<T, OperationError> + Send + 'static,
    {
        self.dispatcher
            .submit(TaskRequest::new(kind).input(&self.resource), move |ctx| {
                let locked = ctx.lock()?;
                f(locked.source(0)?)
            })
    }

    /// Runs `f` against the dataset on a worker, holding the exclusive lock.
    pub(crate) fn write_task<T, F>(
        &self,
        kind: OperationKind,
        f: F,
    ) -> Result<TaskHandle<T>, OperationError>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn NativeDataset) -> Result<T, OperationError> + Send + 'static,
    {
        self.dispatcher
            .submit(TaskRequest::new(kind).output(&self.resource), move |ctx| {
                let mut locked = ctx.lock()?;
                f(locked.destination()?)
            })
    }

    /// Runs `f` on the caller's thread under a shared lock.
    fn inspect<T>(
        &self,
        f: impl FnOnce(&dyn NativeDataset) -> Result<T, OperationError>,
    ) -> Result<T, OperationError> {
        let ticket = self.resource.acquire()?;
        let native = ticket.read()?;
        f(&**native)
    }

    /// Runs `f` on the caller's thread under the exclusive lock.
    fn modify<T>(
        &self,
        f: impl FnOnce(&mut dyn NativeDataset) -> Result<T, OperationError>,
    ) -> Result<T, OperationError> {
        let ticket = self.resource.acquire()?;
        let mut native = ticket.write()?;
        f(&mut **native)
    }

    // =========================================================================
    // Dispatched operations
    // =========================================================================

    pub fn band_count(&self) -> Result<usize, OperationError> {
        self.band_count_async()?.wait_blocking()
    }

    pub fn band_count_async(&self) -> Result<TaskHandle<usize>, OperationError> {
        self.read_task(OperationKind::Metadata, |ds| Ok(ds.band_count()))
    }

    /// Returns band `index` (1-based).
    pub fn band(&self, index: usize) -> Result<Band, OperationError> {
        self.band_async(index)?.wait_blocking()
    }

    pub fn band_async(&self, index: usize) -> Result<TaskHandle<Band>, OperationError> {
        let dataset = self.clone();
        self.read_task(OperationKind::Metadata, move |ds| {
            let count = ds.band_count();
            if index == 0 || index > count {
                return Err(OperationError::invalid(format!(
                    "Illegal band #{index}, dataset has {count} band(s)"
                )));
            }
            Ok(Band::new(dataset, index))
        })
    }

    /// Appends a band and returns it.
    pub fn add_band(&self, data_type: DataType) -> Result<Band, OperationError> {
        self.add_band_async(data_type)?.wait_blocking()
    }

    pub fn add_band_async(&self, data_type: DataType) -> Result<TaskHandle<Band>, OperationError> {
        let dataset = self.clone();
        self.write_task(OperationKind::Metadata, move |ds| {
            let index = ds.add_band(data_type)?;
            Ok(Band::new(dataset, index))
        })
    }

    pub fn raster_size(&self) -> Result<RasterSize, OperationError> {
        self.raster_size_async()?.wait_blocking()
    }

    pub fn raster_size_async(&self) -> Result<TaskHandle<RasterSize>, OperationError> {
        self.read_task(OperationKind::Metadata, |ds| Ok(ds.raster_size()))
    }

    /// Writes pending changes to storage.
    pub fn flush(&self) -> Result<(), OperationError> {
        self.flush_async()?.wait_blocking()
    }

    pub fn flush_async(&self) -> Result<TaskHandle<()>, OperationError> {
        self.write_task(OperationKind::RasterIo, |ds| Ok(ds.flush()?))
    }

    // =========================================================================
    // Direct accessors
    // =========================================================================

    /// Short name of the driver backing the dataset.
    pub fn driver(&self) -> Result<String, OperationError> {
        self.inspect(|ds| Ok(ds.driver().to_string()))
    }

    /// Spatial reference, if any.
    pub fn srs(&self) -> Result<Option<String>, OperationError> {
        self.inspect(|ds| Ok(ds.srs()))
    }

    pub fn set_srs(&self, srs: Option<&str>) -> Result<(), OperationError> {
        let srs = srs.map(str::to_owned);
        self.modify(move |ds| Ok(ds.set_srs(srs)?))
    }

    pub fn geo_transform(&self) -> Result<Option<GeoTransform>, OperationError> {
        self.inspect(|ds| Ok(ds.geo_transform()))
    }

    pub fn set_geo_transform(&self, transform: GeoTransform) -> Result<(), OperationError> {
        self.modify(move |ds| Ok(ds.set_geo_transform(transform)?))
    }

    /// Vector layers, in dataset order.
    pub fn layers(&self) -> Result<Vec<LayerInfo>, OperationError> {
        self.inspect(|ds| Ok(ds.layers()))
    }

    /// All features of `layer`.
    pub fn features(&self, layer: &str) -> Result<Vec<Feature>, OperationError> {
        self.inspect(|ds| Ok(ds.features(layer)?))
    }
}

impl fmt::Debug for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("id", &self.id())
            .field("description", &self.description)
            .field("open", &self.is_open())
            .finish()
    }
}
