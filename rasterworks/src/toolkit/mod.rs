//! Caller-facing API.
//!
//! A [`Toolkit`] pairs a native engine with a dispatcher. Every operation has
//! a blocking form and an `_async` form returning a [`TaskHandle`]; both share
//! the same validation and execution path and differ only in whether the
//! caller's thread waits.
//!
//! # Example
//!
//! ```
//! use rasterworks::native::memory::{DatasetData, MemoryEngine};
//! use rasterworks::native::{DataType, RasterSize};
//! use rasterworks::toolkit::{Toolkit, UtilityOptions};
//! use rasterworks::dispatch::DispatcherConfig;
//! use std::sync::Arc;
//!
//! let engine = MemoryEngine::new();
//! engine.insert(
//!     "/data/rgb.tif",
//!     DatasetData::raster("GTiff", RasterSize::new(8, 8), 3, DataType::Byte),
//! );
//! let toolkit = Toolkit::new(Arc::new(engine), DispatcherConfig::default());
//!
//! let rgb = toolkit.open("/data/rgb.tif").unwrap();
//! let red = toolkit
//!     .translate("/data/red.tif", &rgb, &["-b", "1"], UtilityOptions::new())
//!     .unwrap();
//! assert_eq!(red.band_count().unwrap(), 1);
//! ```
//!
//! [`TaskHandle`]: crate::dispatch::TaskHandle

mod band;
mod dataset;
mod options;
mod utilities;

pub use band::Band;
pub use dataset::Dataset;
pub use options::{Destination, UtilityOptions};

use crate::dispatch::{Dispatcher, DispatcherConfig, TaskHandle, TaskRequest};
use crate::error::OperationError;
use crate::native::{CreateOptions, NativeEngine, OpenMode, OperationKind};
use std::sync::Arc;
use tracing::info;

/// Entry point binding a native engine to a dispatcher.
#[derive(Clone)]
pub struct Toolkit {
    engine: Arc<dyn NativeEngine>,
    dispatcher: Arc<Dispatcher>,
}

impl Toolkit {
    /// Creates a toolkit with its own dispatcher.
    pub fn new(engine: Arc<dyn NativeEngine>, config: DispatcherConfig) -> Self {
        Self::with_dispatcher(engine, Arc::new(Dispatcher::new(config)))
    }

    /// Creates a toolkit sharing an existing dispatcher.
    pub fn with_dispatcher(engine: Arc<dyn NativeEngine>, dispatcher: Arc<Dispatcher>) -> Self {
        info!(
            engine = engine.name(),
            workers = dispatcher.workers(),
            "Toolkit ready"
        );
        Self { engine, dispatcher }
    }

    pub fn engine(&self) -> &Arc<dyn NativeEngine> {
        &self.engine
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Opens an existing dataset read-only.
    pub fn open(&self, path: &str) -> Result<Dataset, OperationError> {
        self.open_async(path)?.wait_blocking()
    }

    pub fn open_async(&self, path: &str) -> Result<TaskHandle<Dataset>, OperationError> {
        self.open_with_async(path, OpenMode::Read, None, None)
    }

    /// Opens or creates a dataset.
    ///
    /// `driver` restricts (or, when creating, selects) the driver; without it
    /// the driver is picked from the path. Creating a raster needs `create`.
    pub fn open_with(
        &self,
        path: &str,
        mode: OpenMode,
        driver: Option<&str>,
        create: Option<CreateOptions>,
    ) -> Result<Dataset, OperationError> {
        self.open_with_async(path, mode, driver, create)?
            .wait_blocking()
    }

    pub fn open_with_async(
        &self,
        path: &str,
        mode: OpenMode,
        driver: Option<&str>,
        create: Option<CreateOptions>,
    ) -> Result<TaskHandle<Dataset>, OperationError> {
        let engine = Arc::clone(&self.engine);
        let dispatcher = Arc::clone(&self.dispatcher);
        let path = path.to_string();
        let driver = driver.map(str::to_owned);
        self.dispatcher
            .submit(TaskRequest::new(OperationKind::Open), move |_| {
                let native = engine.open(&path, mode, driver.as_deref(), create.as_ref())?;
                Ok(Dataset::from_native(native, dispatcher))
            })
    }
}

impl std::fmt::Debug for Toolkit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toolkit")
            .field("engine", &self.engine.name())
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}
