//! Raster band handles.
//!
//! A band has no lifecycle of its own: it is alive exactly as long as its
//! dataset, and every access goes through the dataset's resource.

use super::dataset::Dataset;
use crate::dispatch::TaskHandle;
use crate::error::OperationError;
use crate::native::{DataType, NativeDataset, OperationKind, RasterSize, Window};
use std::fmt;

/// Handle to one band of a dataset (1-based index).
#[derive(Clone)]
pub struct Band {
    dataset: Dataset,
    index: usize,
}

impl Band {
    pub(crate) fn new(dataset: Dataset, index: usize) -> Self {
        Self { dataset, index }
    }

    /// The dataset this band belongs to.
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// 1-based band index.
    pub fn index(&self) -> usize {
        self.index
    }

    fn inspect<T>(
        &self,
        f: impl FnOnce(&dyn NativeDataset, usize) -> Result<T, OperationError>,
    ) -> Result<T, OperationError> {
        let ticket = self.dataset.resource().acquire()?;
        let native = ticket.read()?;
        f(&**native, self.index)
    }

    // =========================================================================
    // Direct accessors
    // =========================================================================

    /// Raster dimensions of the band.
    pub fn size(&self) -> Result<RasterSize, OperationError> {
        self.inspect(|ds, _| Ok(ds.raster_size()))
    }

    pub fn data_type(&self) -> Result<DataType, OperationError> {
        self.inspect(|ds, band| Ok(ds.band_data_type(band)?))
    }

    /// Natural block size of the band.
    pub fn block_size(&self) -> Result<RasterSize, OperationError> {
        self.inspect(|ds, band| Ok(ds.band_block_size(band)?))
    }

    pub fn no_data(&self) -> Result<Option<f64>, OperationError> {
        self.inspect(|ds, band| Ok(ds.band_no_data(band)?))
    }

    /// Sets or clears the NoData value.
    pub fn set_no_data(&self, value: Option<f64>) -> Result<(), OperationError> {
        let ticket = self.dataset.resource().acquire()?;
        let mut native = ticket.write()?;
        Ok(native.set_band_no_data(self.index, value)?)
    }

    // =========================================================================
    // Pixel I/O
    // =========================================================================

    /// Reads a window as row-major values.
    pub fn read(&self, window: Window) -> Result<Vec<f64>, OperationError> {
        self.read_async(window)?.wait_blocking()
    }

    pub fn read_async(&self, window: Window) -> Result<TaskHandle<Vec<f64>>, OperationError> {
        let band = self.index;
        self.dataset.read_task(OperationKind::RasterIo, move |ds| {
            Ok(ds.read_window(band, window)?)
        })
    }

    /// Writes row-major values into a window.
    pub fn write(&self, window: Window, data: Vec<f64>) -> Result<(), OperationError> {
        self.write_async(window, data)?.wait_blocking()
    }

    pub fn write_async(
        &self,
        window: Window,
        data: Vec<f64>,
    ) -> Result<TaskHandle<()>, OperationError> {
        if data.len() != window.len() {
            return Err(buffer_mismatch(data.len(), window));
        }
        let band = self.index;
        self.dataset.write_task(OperationKind::RasterIo, move |ds| {
            Ok(ds.write_window(band, window, &data)?)
        })
    }

    /// Reads block `(x, y)`. Edge blocks are clamped to the raster.
    pub fn read_block(&self, x: usize, y: usize) -> Result<Vec<f64>, OperationError> {
        self.read_block_async(x, y)?.wait_blocking()
    }

    pub fn read_block_async(
        &self,
        x: usize,
        y: usize,
    ) -> Result<TaskHandle<Vec<f64>>, OperationError> {
        let band = self.index;
        self.dataset.read_task(OperationKind::RasterIo, move |ds| {
            let window = block_window(ds, band, x, y)?;
            Ok(ds.read_window(band, window)?)
        })
    }

    /// Writes block `(x, y)`. `data` must match the clamped block size.
    pub fn write_block(&self, x: usize, y: usize, data: Vec<f64>) -> Result<(), OperationError> {
        self.write_block_async(x, y, data)?.wait_blocking()
    }

    pub fn write_block_async(
        &self,
        x: usize,
        y: usize,
        data: Vec<f64>,
    ) -> Result<TaskHandle<()>, OperationError> {
        let band = self.index;
        self.dataset.write_task(OperationKind::RasterIo, move |ds| {
            let window = block_window(&*ds, band, x, y)?;
            if data.len() != window.len() {
                return Err(buffer_mismatch(data.len(), window));
            }
            Ok(ds.write_window(band, window, &data)?)
        })
    }

    /// Actual size of block `(x, y)` once clipped to the raster.
    pub fn clamp_block(&self, x: usize, y: usize) -> Result<RasterSize, OperationError> {
        self.clamp_block_async(x, y)?.wait_blocking()
    }

    pub fn clamp_block_async(
        &self,
        x: usize,
        y: usize,
    ) -> Result<TaskHandle<RasterSize>, OperationError> {
        let band = self.index;
        self.dataset.read_task(OperationKind::Metadata, move |ds| {
            let window = block_window(ds, band, x, y)?;
            Ok(RasterSize::new(window.x_size, window.y_size))
        })
    }
}

fn buffer_mismatch(len: usize, window: Window) -> OperationError {
    OperationError::invalid(format!(
        "Buffer of length {len} does not match window of {}x{}",
        window.x_size, window.y_size
    ))
}

/// Window covered by block `(x, y)` of `band`, clipped to the raster.
fn block_window(
    ds: &dyn NativeDataset,
    band: usize,
    x: usize,
    y: usize,
) -> Result<Window, OperationError> {
    let block = ds.band_block_size(band)?;
    let size = ds.raster_size();
    let (x_off, y_off) = (x * block.x, y * block.y);
    if x_off >= size.x || y_off >= size.y {
        return Err(OperationError::invalid(format!(
            "Block ({x}, {y}) is outside the raster of {size}"
        )));
    }
    Ok(Window::new(
        x_off,
        y_off,
        block.x.min(size.x - x_off),
        block.y.min(size.y - y_off),
    ))
}

impl fmt::Debug for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Band")
            .field("dataset", &self.dataset.id())
            .field("index", &self.index)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{Dispatcher, DispatcherConfig, NativeObject};
    use crate::native::memory::{DatasetData, MemDataset};
    use std::sync::Arc;

    fn band() -> Band {
        let dispatcher = Arc::new(Dispatcher::new(DispatcherConfig::default().with_workers(2)));
        let data = DatasetData::raster("MEM", RasterSize::new(5, 3), 1, DataType::Float32)
            .with_block_size(RasterSize::new(2, 2))
            .with_no_data(1, -9999.0);
        let native = Box::new(MemDataset::anonymous("band-test", data)) as NativeObject;
        Dataset::from_native(native, dispatcher).band(1).unwrap()
    }

    #[test]
    fn test_metadata() {
        let band = band();
        assert_eq!(band.size().unwrap(), RasterSize::new(5, 3));
        assert_eq!(band.data_type().unwrap(), DataType::Float32);
        assert_eq!(band.block_size().unwrap(), RasterSize::new(2, 2));
        assert_eq!(band.no_data().unwrap(), Some(-9999.0));
        band.set_no_data(None).unwrap();
        assert_eq!(band.no_data().unwrap(), None);
    }

    #[test]
    fn test_write_then_read_window() {
        let band = band();
        let window = Window::new(1, 1, 3, 2);
        band.write(window, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(band.read(window).unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(band.read(Window::new(0, 0, 2, 1)).unwrap(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_buffer_mismatch_rejected_before_dispatch() {
        let band = band();
        let err = band.write(Window::new(0, 0, 2, 2), vec![1.0]).unwrap_err();
        assert!(err.is_invalid_argument());
        assert!(err.to_string().contains("2x2"));
    }

    #[test]
    fn test_clamped_edge_blocks() {
        let band = band();
        assert_eq!(band.clamp_block(0, 0).unwrap(), RasterSize::new(2, 2));
        assert_eq!(band.clamp_block(2, 0).unwrap(), RasterSize::new(1, 2));
        assert_eq!(band.clamp_block(2, 1).unwrap(), RasterSize::new(1, 1));
        assert!(band.clamp_block(3, 0).unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_block_io() {
        let band = band();
        band.write_block(2, 1, vec![7.0]).unwrap();
        assert_eq!(band.read_block(2, 1).unwrap(), vec![7.0]);
        assert_eq!(band.read(Window::new(4, 2, 1, 1)).unwrap(), vec![7.0]);
        assert!(band.write_block(2, 1, vec![7.0, 8.0]).is_err());
    }

    #[test]
    fn test_out_of_range_window_is_invalid() {
        let band = band();
        let err = band.read(Window::new(4, 0, 2, 1)).unwrap_err();
        assert!(err.is_invalid_argument());
    }
}
