//! Boundary to the native processing engine.
//!
//! The engine is consumed through two traits. [`NativeEngine`] opens datasets
//! and runs the utilities; [`NativeDataset`] is a single native object. Neither
//! is assumed safe for concurrent calls on the same object: the dispatcher
//! holds the owning resource's lock for the duration of every call.
//!
//! [`memory::MemoryEngine`] is a complete in-process engine backed by an
//! in-memory store of datasets keyed by path.

pub mod memory;
mod types;

pub use types::{
    CreateOptions, DataType, Feature, FieldValue, GeoTransform, LayerInfo, OpenMode,
    OperationKind, RasterSize, Window,
};

use crate::error::OperationError;
use thiserror::Error;

/// Errors reported by the native engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NativeError {
    /// The engine rejected its arguments (e.g. an unknown option token).
    #[error("{0}")]
    InvalidArgument(String),

    /// The engine ran and failed.
    #[error("{0}")]
    Failed(String),
}

impl From<NativeError> for OperationError {
    fn from(err: NativeError) -> Self {
        match err {
            NativeError::InvalidArgument(msg) => OperationError::InvalidArgument(msg),
            NativeError::Failed(msg) => OperationError::NativeOperationFailed(msg),
        }
    }
}

pub type NativeResult<T> = Result<T, NativeError>;

/// Progress callback handed to the engine. Returning `false` asks it to stop.
pub type NativeProgress<'a> = dyn FnMut(f64, Option<&str>) -> bool + 'a;

/// A native raster and/or vector dataset.
///
/// Bands are addressed 1-based. Pixel buffers are row-major `f64`.
pub trait NativeDataset: Send + Sync + 'static {
    /// Short driver name, e.g. `GTiff`.
    fn driver(&self) -> &str;

    /// Path or name the dataset was opened from.
    fn description(&self) -> &str;

    fn raster_size(&self) -> RasterSize;

    fn band_count(&self) -> usize;

    fn band_data_type(&self, band: usize) -> NativeResult<DataType>;

    fn band_block_size(&self, band: usize) -> NativeResult<RasterSize>;

    fn band_no_data(&self, band: usize) -> NativeResult<Option<f64>>;

    fn set_band_no_data(&mut self, band: usize, value: Option<f64>) -> NativeResult<()>;

    /// Reads a window of one band.
    fn read_window(&self, band: usize, window: Window) -> NativeResult<Vec<f64>>;

    /// Writes a window of one band. `data.len()` must equal `window.len()`.
    fn write_window(&mut self, band: usize, window: Window, data: &[f64]) -> NativeResult<()>;

    /// Appends a band and returns its 1-based index.
    fn add_band(&mut self, data_type: DataType) -> NativeResult<usize>;

    fn srs(&self) -> Option<String>;

    fn set_srs(&mut self, srs: Option<String>) -> NativeResult<()>;

    fn geo_transform(&self) -> Option<GeoTransform>;

    fn set_geo_transform(&mut self, transform: GeoTransform) -> NativeResult<()>;

    fn layers(&self) -> Vec<LayerInfo>;

    fn features(&self, layer: &str) -> NativeResult<Vec<Feature>>;

    /// Creates (or replaces) a vector layer with the given fields and features.
    fn create_layer(
        &mut self,
        name: &str,
        fields: Vec<String>,
        features: Vec<Feature>,
    ) -> NativeResult<()>;

    /// Persists pending changes.
    fn flush(&mut self) -> NativeResult<()>;
}

/// Where a utility writes its output.
pub enum NativeDestination<'a> {
    /// No output (read-only utilities).
    None,
    /// Create a new dataset at this path.
    Path(&'a str),
    /// Update an existing dataset in place.
    Existing(&'a mut dyn NativeDataset),
}

/// One utility invocation.
pub struct ExecuteRequest<'a> {
    pub kind: OperationKind,
    pub sources: Vec<&'a dyn NativeDataset>,
    pub destination: NativeDestination<'a>,
    pub options: &'a [String],
}

/// What a utility produced.
pub enum ExecuteOutput {
    /// A new dataset.
    Created(Box<dyn NativeDataset>),
    /// The existing destination was updated in place.
    Updated,
    /// A textual report.
    Report(String),
}

impl std::fmt::Debug for ExecuteOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created(ds) => write!(f, "Created({})", ds.description()),
            Self::Updated => write!(f, "Updated"),
            Self::Report(text) => write!(f, "Report({} bytes)", text.len()),
        }
    }
}

/// The native processing engine.
pub trait NativeEngine: Send + Sync + 'static {
    /// Engine name, for logs.
    fn name(&self) -> &str;

    /// Opens or creates a dataset.
    ///
    /// `create` is required for raster drivers in [`OpenMode::Create`].
    fn open(
        &self,
        path: &str,
        mode: OpenMode,
        driver: Option<&str>,
        create: Option<&CreateOptions>,
    ) -> NativeResult<Box<dyn NativeDataset>>;

    /// Runs a utility. The engine polls `progress` cooperatively.
    fn execute(
        &self,
        request: ExecuteRequest<'_>,
        progress: &mut NativeProgress<'_>,
    ) -> NativeResult<ExecuteOutput>;
}
