//! An in-process native engine backed by an in-memory dataset store.
//!
//! Paths address entries of a shared store rather than files. Persistent
//! drivers (`GTiff`, `GPKG`, `GeoJSON`) write datasets back to the store on
//! flush, so reopening a path sees the result of earlier operations. `MEM`
//! datasets live only as long as their handle.
//!
//! # Example
//!
//! ```
//! use rasterworks::native::memory::{DatasetData, MemoryEngine};
//! use rasterworks::native::{DataType, NativeDataset, NativeEngine, OpenMode, RasterSize};
//!
//! let engine = MemoryEngine::new();
//! engine.insert(
//!     "/data/dem.tif",
//!     DatasetData::raster("GTiff", RasterSize::new(4, 4), 1, DataType::Int16),
//! );
//!
//! let ds = engine.open("/data/dem.tif", OpenMode::Read, None, None).unwrap();
//! assert_eq!(ds.band_count(), 1);
//! ```

mod dataset;
mod drivers;
mod info;
mod options;
mod translate;
mod vector;
mod warp;

pub use dataset::{BandData, DatasetData, LayerData, MemDataset, DEFAULT_BLOCK_EDGE};
pub use drivers::{Driver, DriverKind};

use super::{
    CreateOptions, ExecuteOutput, ExecuteRequest, NativeDataset, NativeDestination, NativeEngine,
    NativeError, NativeProgress, NativeResult, OpenMode, OperationKind, RasterSize, Window,
};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Shared path-keyed dataset store.
pub(crate) type Store = Arc<DashMap<String, DatasetData>>;

/// The in-memory native engine.
#[derive(Clone, Default)]
pub struct MemoryEngine {
    store: Store,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a dataset under `path`, replacing any previous content.
    pub fn insert(&self, path: &str, data: DatasetData) {
        self.store.insert(path.to_string(), data);
    }

    /// Returns a copy of what is stored at `path`.
    pub fn snapshot(&self, path: &str) -> Option<DatasetData> {
        self.store.get(path).map(|entry| entry.value().clone())
    }

    pub fn exists(&self, path: &str) -> bool {
        self.store.contains_key(path)
    }

    /// Deletes the dataset stored at `path`.
    pub fn remove(&self, path: &str) -> bool {
        self.store.remove(path).is_some()
    }

    /// All stored paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.store.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }

    fn materialize(&self, path: &str, data: DatasetData) -> Box<dyn NativeDataset> {
        materialize(&self.store, path, data)
    }
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("datasets", &self.store.len())
            .finish()
    }
}

impl NativeEngine for MemoryEngine {
    fn name(&self) -> &str {
        "memory"
    }

    fn open(
        &self,
        path: &str,
        mode: OpenMode,
        driver: Option<&str>,
        create: Option<&CreateOptions>,
    ) -> NativeResult<Box<dyn NativeDataset>> {
        match mode {
            OpenMode::Read | OpenMode::Update => {
                let data = self.snapshot(path).ok_or_else(|| {
                    NativeError::Failed(format!("{path}: No such file or directory"))
                })?;
                if let Some(name) = driver {
                    if !name.eq_ignore_ascii_case(&data.driver) {
                        return Err(NativeError::Failed(format!(
                            "`{path}' not recognized as being in a supported file format by driver {name}"
                        )));
                    }
                }
                debug!(path, driver = %data.driver, ?mode, "Dataset opened");
                Ok(Box::new(MemDataset::persistent(
                    Arc::clone(&self.store),
                    path,
                    data,
                    mode.is_writable(),
                )))
            }
            OpenMode::Create => {
                let driver = match driver {
                    Some(name) => drivers::find(name).ok_or_else(|| {
                        NativeError::Failed(format!("Output driver `{name}' not recognised."))
                    })?,
                    None => drivers::for_path(path).ok_or_else(|| {
                        NativeError::Failed(format!("Unable to guess a driver for `{path}'"))
                    })?,
                };
                let data = match driver.kind {
                    DriverKind::Raster => {
                        let create = create.ok_or_else(|| {
                            NativeError::InvalidArgument(
                                "creating a raster requires a size, a band count and a data type"
                                    .to_string(),
                            )
                        })?;
                        let data = DatasetData::raster(
                            driver.name,
                            create.size,
                            create.band_count,
                            create.data_type,
                        );
                        match create.block_size {
                            Some(block) => data.with_block_size(block),
                            None => data,
                        }
                    }
                    DriverKind::Vector => DatasetData::vector(driver.name),
                };
                debug!(path, driver = driver.name, "Dataset created");
                Ok(self.materialize(path, data))
            }
        }
    }

    fn execute(
        &self,
        request: ExecuteRequest<'_>,
        progress: &mut NativeProgress<'_>,
    ) -> NativeResult<ExecuteOutput> {
        debug!(kind = %request.kind, options = ?request.options, "Executing utility");
        match request.kind {
            OperationKind::Translate => translate::run(&self.store, request, progress),
            OperationKind::VectorTranslate => vector::run(&self.store, request, progress),
            OperationKind::Info => info::run(request),
            OperationKind::Warp => warp::run(&self.store, request, progress),
            other => Err(NativeError::InvalidArgument(format!(
                "{other} is not a utility operation"
            ))),
        }
    }
}

/// Wraps contents in a dataset, persistent or not depending on the driver.
fn materialize(store: &Store, path: &str, data: DatasetData) -> Box<dyn NativeDataset> {
    let persistent = drivers::find(&data.driver).is_some_and(|d| d.persistent);
    if persistent {
        Box::new(MemDataset::persistent(Arc::clone(store), path, data, true).mark_dirty())
    } else {
        Box::new(MemDataset::anonymous(path, data))
    }
}

/// Hands a utility's output to its destination.
fn deliver(
    store: &Store,
    data: DatasetData,
    destination: NativeDestination<'_>,
) -> NativeResult<ExecuteOutput> {
    match destination {
        NativeDestination::None => Err(NativeError::InvalidArgument(
            "no destination was given".to_string(),
        )),
        NativeDestination::Path(path) => {
            let mut created = materialize(store, path, data);
            created.flush()?;
            Ok(ExecuteOutput::Created(created))
        }
        NativeDestination::Existing(target) => {
            update_in_place(target, data)?;
            Ok(ExecuteOutput::Updated)
        }
    }
}

fn update_in_place(target: &mut dyn NativeDataset, data: DatasetData) -> NativeResult<()> {
    if !data.bands.is_empty() {
        if target.raster_size() != data.size {
            return Err(NativeError::Failed(format!(
                "Destination of size {} cannot receive output of size {}",
                target.raster_size(),
                data.size
            )));
        }
        let window = Window::full(data.size);
        for (i, band) in data.bands.iter().enumerate() {
            let index = i + 1;
            if index > target.band_count() {
                target.add_band(band.data_type)?;
            }
            target.write_window(index, window, &band.values)?;
            if band.no_data.is_some() {
                target.set_band_no_data(index, band.no_data)?;
            }
        }
        if data.srs.is_some() {
            target.set_srs(data.srs)?;
        }
        if let Some(transform) = data.geo_transform {
            target.set_geo_transform(transform)?;
        }
    }
    for layer in data.layers {
        target.create_layer(&layer.name, layer.fields, layer.features)?;
    }
    target.flush()
}

/// Requires exactly one source.
fn single_source<'a>(
    sources: &[&'a dyn NativeDataset],
    utility: &str,
) -> NativeResult<&'a dyn NativeDataset> {
    match sources {
        [source] => Ok(*source),
        _ => Err(NativeError::InvalidArgument(format!(
            "{utility} requires exactly one source dataset, got {}",
            sources.len()
        ))),
    }
}

/// Reports progress, failing if the callback asks to stop.
fn report(progress: &mut NativeProgress<'_>, fraction: f64, message: Option<&str>) -> NativeResult<()> {
    if progress(fraction, message) {
        Ok(())
    } else {
        Err(options::user_terminated())
    }
}

/// Nearest-neighbour resampling of a row-major grid.
fn resample(values: &[f64], from: RasterSize, to: RasterSize) -> Vec<f64> {
    if from == to {
        return values.to_vec();
    }
    let pick = |i: usize, from: usize, to: usize| {
        (((i as f64 + 0.5) * from as f64 / to as f64) as usize).min(from.saturating_sub(1))
    };
    let mut out = Vec::with_capacity(to.area());
    for y in 0..to.y {
        let sy = pick(y, from.y, to.y);
        for x in 0..to.x {
            let sx = pick(x, from.x, to.x);
            out.push(values[sy * from.x + sx]);
        }
    }
    out
}
