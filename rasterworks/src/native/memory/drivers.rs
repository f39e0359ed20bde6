//! Driver registry of the memory engine.

use crate::native::{NativeError, NativeResult};

/// What a driver stores.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverKind {
    Raster,
    Vector,
}

/// A registered driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Driver {
    pub name: &'static str,
    pub kind: DriverKind,
    /// Whether datasets are written back to the store by path.
    pub persistent: bool,
    extensions: &'static [&'static str],
}

const MEM: Driver = Driver {
    name: "MEM",
    kind: DriverKind::Raster,
    persistent: false,
    extensions: &[],
};

const GTIFF: Driver = Driver {
    name: "GTiff",
    kind: DriverKind::Raster,
    persistent: true,
    extensions: &["tif", "tiff"],
};

const GPKG: Driver = Driver {
    name: "GPKG",
    kind: DriverKind::Vector,
    persistent: true,
    extensions: &["gpkg"],
};

const GEOJSON: Driver = Driver {
    name: "GeoJSON",
    kind: DriverKind::Vector,
    persistent: true,
    extensions: &["json", "geojson"],
};

const DRIVERS: &[Driver] = &[MEM, GTIFF, GPKG, GEOJSON];

/// Looks up a driver by name, case-insensitively.
pub fn find(name: &str) -> Option<Driver> {
    DRIVERS
        .iter()
        .find(|d| d.name.eq_ignore_ascii_case(name))
        .copied()
}

/// Guesses the driver from a path's extension (`.geo.json` counts as JSON).
pub fn for_path(path: &str) -> Option<Driver> {
    let ext = path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase())?;
    DRIVERS
        .iter()
        .find(|d| d.extensions.contains(&ext.as_str()))
        .copied()
}

/// Resolves the output driver of a raster utility.
pub fn raster_output(format: Option<&str>, path: &str) -> NativeResult<Driver> {
    match format {
        Some(name) => find(name)
            .filter(|d| d.kind == DriverKind::Raster)
            .ok_or_else(|| NativeError::Failed(format!("Output driver `{name}' not recognised."))),
        None => Ok(for_path(path)
            .filter(|d| d.kind == DriverKind::Raster)
            .unwrap_or(GTIFF)),
    }
}

/// Resolves the output driver of the vector utility.
pub fn vector_output(format: Option<&str>, path: &str) -> NativeResult<Driver> {
    match format {
        Some(name) => find(name)
            .filter(|d| d.kind == DriverKind::Vector)
            .ok_or_else(|| NativeError::Failed(format!("Unable to find driver `{name}'."))),
        None => Ok(for_path(path)
            .filter(|d| d.kind == DriverKind::Vector)
            .unwrap_or(GPKG)),
    }
}
