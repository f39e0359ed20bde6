//! Plain data types shared across the native boundary.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Raster dimensions in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct RasterSize {
    pub x: usize,
    pub y: usize,
}

impl RasterSize {
    pub const fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }

    /// Number of pixels covered.
    pub fn area(&self) -> usize {
        self.x * self.y
    }
}

impl fmt::Display for RasterSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.x, self.y)
    }
}

/// A rectangular pixel window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Window {
    pub x_off: usize,
    pub y_off: usize,
    pub x_size: usize,
    pub y_size: usize,
}

impl Window {
    pub const fn new(x_off: usize, y_off: usize, x_size: usize, y_size: usize) -> Self {
        Self {
            x_off,
            y_off,
            x_size,
            y_size,
        }
    }

    /// Window covering a whole raster.
    pub const fn full(size: RasterSize) -> Self {
        Self::new(0, 0, size.x, size.y)
    }

    /// Number of pixels in the window.
    pub fn len(&self) -> usize {
        self.x_size * self.y_size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if the window lies entirely inside a raster of `size`.
    pub fn fits(&self, size: RasterSize) -> bool {
        self.x_off
            .checked_add(self.x_size)
            .is_some_and(|end| end <= size.x)
            && self
                .y_off
                .checked_add(self.y_size)
                .is_some_and(|end| end <= size.y)
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({},{}) of size {}x{}",
            self.x_off, self.y_off, self.x_size, self.y_size
        )
    }
}

/// Pixel data types understood by the engine.
///
/// Pixel buffers always travel as `f64`; the data type decides how values are
/// stored when written.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    Byte,
    UInt16,
    Int16,
    UInt32,
    Int32,
    Float32,
    Float64,
}

impl DataType {
    /// Canonical name, as used by `-ot` and in reports.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Byte => "Byte",
            Self::UInt16 => "UInt16",
            Self::Int16 => "Int16",
            Self::UInt32 => "UInt32",
            Self::Int32 => "Int32",
            Self::Float32 => "Float32",
            Self::Float64 => "Float64",
        }
    }

    /// Returns true for floating point types.
    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    /// Converts a value to what this type can store.
    ///
    /// Integer types round to nearest and saturate at their bounds (NaN
    /// becomes 0). `Float32` loses precision, `Float64` is lossless.
    pub fn cast(&self, value: f64) -> f64 {
        match self {
            Self::Byte => value.round() as u8 as f64,
            Self::UInt16 => value.round() as u16 as f64,
            Self::Int16 => value.round() as i16 as f64,
            Self::UInt32 => value.round() as u32 as f64,
            Self::Int32 => value.round() as i32 as f64,
            Self::Float32 => value as f32 as f64,
            Self::Float64 => value,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "byte" => Ok(Self::Byte),
            "uint16" => Ok(Self::UInt16),
            "int16" => Ok(Self::Int16),
            "uint32" => Ok(Self::UInt32),
            "int32" => Ok(Self::Int32),
            "float32" => Ok(Self::Float32),
            "float64" => Ok(Self::Float64),
            _ => Err(format!("Unknown data type: {s}")),
        }
    }
}

/// Access mode for opening a dataset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum OpenMode {
    #[default]
    Read,
    Update,
    Create,
}

impl OpenMode {
    /// Parses the short mode flags `r`, `r+` and `w`.
    pub fn from_flag(flag: &str) -> Option<Self> {
        match flag {
            "r" => Some(Self::Read),
            "r+" => Some(Self::Update),
            "w" => Some(Self::Create),
            _ => None,
        }
    }

    pub fn is_writable(&self) -> bool {
        !matches!(self, Self::Read)
    }
}

/// Parameters for creating a new raster dataset.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CreateOptions {
    pub size: RasterSize,
    pub band_count: usize,
    pub data_type: DataType,
    /// Natural block size; defaults to 256x256 tiles clamped to the raster.
    pub block_size: Option<RasterSize>,
}

impl CreateOptions {
    pub fn new(size: RasterSize, band_count: usize, data_type: DataType) -> Self {
        Self {
            size,
            band_count,
            data_type,
            block_size: None,
        }
    }

    pub fn with_block_size(mut self, block_size: RasterSize) -> Self {
        self.block_size = Some(block_size);
        self
    }
}

/// Affine georeferencing coefficients.
pub type GeoTransform = [f64; 6];

/// A single attribute value of a vector feature.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Real(f64),
    Text(String),
    Null,
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{v}"),
            Self::Real(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
            Self::Null => f.write_str("(null)"),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

/// A vector feature: an id plus ordered attribute fields.
///
/// Geometry is carried as opaque text.
#[derive(Clone, Debug, PartialEq)]
pub struct Feature {
    pub fid: u64,
    pub fields: Vec<(String, FieldValue)>,
    pub geometry: Option<String>,
}

impl Feature {
    pub fn new(fid: u64) -> Self {
        Self {
            fid,
            fields: Vec::new(),
            geometry: None,
        }
    }

    pub fn with_field(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.push((name.to_string(), value.into()));
        self
    }

    pub fn with_geometry(mut self, wkt: &str) -> Self {
        self.geometry = Some(wkt.to_string());
        self
    }

    /// Looks up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }
}

/// Summary of one vector layer.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerInfo {
    pub name: String,
    pub fields: Vec<String>,
    pub feature_count: usize,
}

/// Kinds of operation routed through the dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Open,
    Translate,
    VectorTranslate,
    Info,
    Warp,
    CalcBlock,
    RasterIo,
    Metadata,
}

impl OperationKind {
    /// Short name used in logs and telemetry.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Translate => "translate",
            Self::VectorTranslate => "vector_translate",
            Self::Info => "info",
            Self::Warp => "warp",
            Self::CalcBlock => "calc_block",
            Self::RasterIo => "raster_io",
            Self::Metadata => "metadata",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
