//! In-memory dataset contents and the [`NativeDataset`] implementation over them.

use super::Store;
use crate::native::{
    DataType, Feature, GeoTransform, LayerInfo, NativeDataset, NativeError, NativeResult,
    RasterSize, Window,
};

/// Default natural block edge length.
pub const DEFAULT_BLOCK_EDGE: usize = 256;

pub(crate) fn default_block(size: RasterSize) -> RasterSize {
    RasterSize::new(
        size.x.clamp(1, DEFAULT_BLOCK_EDGE),
        size.y.clamp(1, DEFAULT_BLOCK_EDGE),
    )
}

/// One raster band.
#[derive(Clone, Debug, PartialEq)]
pub struct BandData {
    pub data_type: DataType,
    pub no_data: Option<f64>,
    pub block: RasterSize,
    pub values: Vec<f64>,
}

/// One vector layer.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerData {
    pub name: String,
    pub fields: Vec<String>,
    pub features: Vec<Feature>,
}

/// Full contents of a stored dataset.
#[derive(Clone, Debug, PartialEq)]
pub struct DatasetData {
    pub driver: String,
    pub size: RasterSize,
    pub bands: Vec<BandData>,
    pub srs: Option<String>,
    pub geo_transform: Option<GeoTransform>,
    pub layers: Vec<LayerData>,
}

impl DatasetData {
    /// A zero-filled raster dataset.
    pub fn raster(driver: &str, size: RasterSize, band_count: usize, data_type: DataType) -> Self {
        let block = default_block(size);
        Self {
            driver: driver.to_string(),
            size,
            bands: (0..band_count)
                .map(|_| BandData {
                    data_type,
                    no_data: None,
                    block,
                    values: vec![0.0; size.area()],
                })
                .collect(),
            srs: None,
            geo_transform: None,
            layers: Vec::new(),
        }
    }

    /// An empty vector dataset.
    pub fn vector(driver: &str) -> Self {
        Self {
            driver: driver.to_string(),
            size: RasterSize::new(0, 0),
            bands: Vec::new(),
            srs: None,
            geo_transform: None,
            layers: Vec::new(),
        }
    }

    /// Fills a band (1-based) with values, cast to the band's type.
    ///
    /// Values are cycled if shorter than the band.
    pub fn with_band_values(mut self, band: usize, values: &[f64]) -> Self {
        if let Some(b) = self.bands.get_mut(band.wrapping_sub(1)) {
            if !values.is_empty() {
                for (dst, src) in b.values.iter_mut().zip(values.iter().cycle()) {
                    *dst = b.data_type.cast(*src);
                }
            }
        }
        self
    }

    /// Sets a band's value at one pixel.
    pub fn with_pixel(mut self, band: usize, x: usize, y: usize, value: f64) -> Self {
        let width = self.size.x;
        if let Some(b) = self.bands.get_mut(band.wrapping_sub(1)) {
            if let Some(v) = b.values.get_mut(y * width + x) {
                *v = b.data_type.cast(value);
            }
        }
        self
    }

    pub fn with_no_data(mut self, band: usize, value: f64) -> Self {
        if let Some(b) = self.bands.get_mut(band.wrapping_sub(1)) {
            b.no_data = Some(b.data_type.cast(value));
        }
        self
    }

    pub fn with_block_size(mut self, block: RasterSize) -> Self {
        for band in &mut self.bands {
            band.block = block;
        }
        self
    }

    pub fn with_srs(mut self, srs: &str) -> Self {
        self.srs = Some(srs.to_string());
        self
    }

    pub fn with_geo_transform(mut self, transform: GeoTransform) -> Self {
        self.geo_transform = Some(transform);
        self
    }

    pub fn with_layer(mut self, name: &str, fields: &[&str], features: Vec<Feature>) -> Self {
        self.layers.push(LayerData {
            name: name.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            features,
        });
        self
    }

    fn band(&self, band: usize) -> NativeResult<&BandData> {
        self.bands
            .get(band.wrapping_sub(1))
            .ok_or_else(|| illegal_band(band, self.bands.len()))
    }

    fn band_mut(&mut self, band: usize) -> NativeResult<&mut BandData> {
        let count = self.bands.len();
        self.bands
            .get_mut(band.wrapping_sub(1))
            .ok_or_else(|| illegal_band(band, count))
    }

    pub(crate) fn layer_infos(&self) -> Vec<LayerInfo> {
        self.layers
            .iter()
            .map(|layer| LayerInfo {
                name: layer.name.clone(),
                fields: layer.fields.clone(),
                feature_count: layer.features.len(),
            })
            .collect()
    }
}

fn illegal_band(band: usize, count: usize) -> NativeError {
    NativeError::InvalidArgument(format!(
        "Illegal band #{band}, dataset has {count} band(s)"
    ))
}

/// A dataset opened from (or destined for) the in-memory store.
pub struct MemDataset {
    description: String,
    data: DatasetData,
    store: Option<Store>,
    writable: bool,
    dirty: bool,
}

impl MemDataset {
    /// A dataset that writes back to `store` under `description` on flush.
    pub(crate) fn persistent(
        store: Store,
        description: &str,
        data: DatasetData,
        writable: bool,
    ) -> Self {
        Self {
            description: description.to_string(),
            data,
            store: Some(store),
            writable,
            dirty: false,
        }
    }

    /// A dataset that lives only as long as its handle.
    pub(crate) fn anonymous(description: &str, data: DatasetData) -> Self {
        Self {
            description: description.to_string(),
            data,
            store: None,
            writable: true,
            dirty: false,
        }
    }

    /// Marks freshly created content for write-back.
    pub(crate) fn mark_dirty(mut self) -> Self {
        self.dirty = true;
        self
    }

    fn check_writable(&self) -> NativeResult<()> {
        if self.writable {
            Ok(())
        } else {
            Err(NativeError::Failed(format!(
                "{} is opened read-only",
                self.description
            )))
        }
    }

    fn check_window(&self, window: Window) -> NativeResult<()> {
        if window.fits(self.data.size) {
            Ok(())
        } else {
            Err(NativeError::InvalidArgument(format!(
                "Access window out of range in RasterIO(). Requested {window} on raster of {}",
                self.data.size
            )))
        }
    }
}

impl NativeDataset for MemDataset {
    fn driver(&self) -> &str {
        &self.data.driver
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn raster_size(&self) -> RasterSize {
        self.data.size
    }

    fn band_count(&self) -> usize {
        self.data.bands.len()
    }

    fn band_data_type(&self, band: usize) -> NativeResult<DataType> {
        Ok(self.data.band(band)?.data_type)
    }

    fn band_block_size(&self, band: usize) -> NativeResult<RasterSize> {
        Ok(self.data.band(band)?.block)
    }

    fn band_no_data(&self, band: usize) -> NativeResult<Option<f64>> {
        Ok(self.data.band(band)?.no_data)
    }

    fn set_band_no_data(&mut self, band: usize, value: Option<f64>) -> NativeResult<()> {
        self.check_writable()?;
        let b = self.data.band_mut(band)?;
        b.no_data = value.map(|v| b.data_type.cast(v));
        self.dirty = true;
        Ok(())
    }

    fn read_window(&self, band: usize, window: Window) -> NativeResult<Vec<f64>> {
        let b = self.data.band(band)?;
        self.check_window(window)?;
        let width = self.data.size.x;
        let mut out = Vec::with_capacity(window.len());
        for row in window.y_off..window.y_off + window.y_size {
            let start = row * width + window.x_off;
            out.extend_from_slice(&b.values[start..start + window.x_size]);
        }
        Ok(out)
    }

    fn write_window(&mut self, band: usize, window: Window, data: &[f64]) -> NativeResult<()> {
        self.check_writable()?;
        self.check_window(window)?;
        if data.len() != window.len() {
            return Err(NativeError::InvalidArgument(format!(
                "Buffer of length {} does not match window of {}x{}",
                data.len(),
                window.x_size,
                window.y_size
            )));
        }
        let width = self.data.size.x;
        let b = self.data.band_mut(band)?;
        let data_type = b.data_type;
        for (i, row) in (window.y_off..window.y_off + window.y_size).enumerate() {
            let start = row * width + window.x_off;
            let src = &data[i * window.x_size..(i + 1) * window.x_size];
            for (dst, value) in b.values[start..start + window.x_size].iter_mut().zip(src) {
                *dst = data_type.cast(*value);
            }
        }
        self.dirty = true;
        Ok(())
    }

    fn add_band(&mut self, data_type: DataType) -> NativeResult<usize> {
        self.check_writable()?;
        let size = self.data.size;
        self.data.bands.push(BandData {
            data_type,
            no_data: None,
            block: default_block(size),
            values: vec![0.0; size.area()],
        });
        self.dirty = true;
        Ok(self.data.bands.len())
    }

    fn srs(&self) -> Option<String> {
        self.data.srs.clone()
    }

    fn set_srs(&mut self, srs: Option<String>) -> NativeResult<()> {
        self.check_writable()?;
        self.data.srs = srs;
        self.dirty = true;
        Ok(())
    }

    fn geo_transform(&self) -> Option<GeoTransform> {
        self.data.geo_transform
    }

    fn set_geo_transform(&mut self, transform: GeoTransform) -> NativeResult<()> {
        self.check_writable()?;
        self.data.geo_transform = Some(transform);
        self.dirty = true;
        Ok(())
    }

    fn layers(&self) -> Vec<LayerInfo> {
        self.data.layer_infos()
    }

    fn features(&self, layer: &str) -> NativeResult<Vec<Feature>> {
        self.data
            .layers
            .iter()
            .find(|l| l.name == layer)
            .map(|l| l.features.clone())
            .ok_or_else(|| NativeError::InvalidArgument(format!("Layer `{layer}' not found")))
    }

    fn create_layer(
        &mut self,
        name: &str,
        fields: Vec<String>,
        features: Vec<Feature>,
    ) -> NativeResult<()> {
        self.check_writable()?;
        let layer = LayerData {
            name: name.to_string(),
            fields,
            features,
        };
        match self.data.layers.iter_mut().find(|l| l.name == name) {
            Some(existing) => *existing = layer,
            None => self.data.layers.push(layer),
        }
        self.dirty = true;
        Ok(())
    }

    fn flush(&mut self) -> NativeResult<()> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(store) = &self.store {
            store.insert(self.description.clone(), self.data.clone());
        }
        self.dirty = false;
        Ok(())
    }
}
