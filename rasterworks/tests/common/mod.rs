//! Shared fixtures for integration tests.
//!
//! Every test builds its own in-memory store, so tests never see each
//! other's outputs.

#![allow(dead_code)]

use rasterworks::dispatch::DispatcherConfig;
use rasterworks::native::memory::{DatasetData, MemoryEngine};
use rasterworks::native::{DataType, Feature, RasterSize};
use rasterworks::toolkit::Toolkit;
use std::sync::Arc;

pub const MULTIBAND: &str = "/fixtures/multiband.tif";
pub const SAMPLE: &str = "/fixtures/sample.tif";
pub const PARK: &str = "/fixtures/park.geo.json";
pub const T2M: &str = "/fixtures/AROME_T2m_10.tiff";
pub const D2M: &str = "/fixtures/AROME_D2m_10.tiff";

/// Value stored at `MAGIC_PIXEL` of band 1 in `SAMPLE`.
pub const MAGIC_VALUE: f64 = 42.0;
pub const MAGIC_PIXEL: (usize, usize) = (7, 3);

/// Size and NoData of the AROME grids.
pub const AROME_SIZE: RasterSize = RasterSize { x: 6, y: 4 };
pub const AROME_NO_DATA: f64 = 9999.0;

/// 2 m temperature (K), with NoData in the corners.
pub fn t2m_values() -> Vec<f64> {
    (0..AROME_SIZE.x * AROME_SIZE.y)
        .map(|i| match i {
            0 | 23 => AROME_NO_DATA,
            _ => 280.0 + (i as f64) * 0.25,
        })
        .collect()
}

/// 2 m dew point (K), NoData at one interior position.
pub fn d2m_values() -> Vec<f64> {
    (0..AROME_SIZE.x * AROME_SIZE.y)
        .map(|i| match i {
            9 => AROME_NO_DATA,
            _ => 275.0 + (i as f64) * 0.125,
        })
        .collect()
}

/// Store holding every fixture dataset.
pub fn engine() -> MemoryEngine {
    let engine = MemoryEngine::new();
    engine.insert(
        MULTIBAND,
        DatasetData::raster("GTiff", RasterSize::new(16, 16), 3, DataType::Byte)
            .with_band_values(1, &[10.0])
            .with_band_values(2, &[20.0])
            .with_band_values(3, &[30.0])
            .with_srs("EPSG:4326"),
    );
    engine.insert(
        SAMPLE,
        DatasetData::raster("GTiff", RasterSize::new(20, 10), 1, DataType::Byte)
            .with_band_values(1, &[1.0, 2.0, 3.0])
            .with_pixel(1, MAGIC_PIXEL.0, MAGIC_PIXEL.1, MAGIC_VALUE)
            .with_srs("EPSG:32631")
            .with_geo_transform([440720.0, 60.0, 0.0, 3751320.0, 0.0, -60.0]),
    );
    engine.insert(
        PARK,
        DatasetData::vector("GeoJSON").with_layer(
            "park",
            &["name", "kind", "area"],
            vec![
                Feature::new(0)
                    .with_field("name", "Mercantour")
                    .with_field("kind", "county")
                    .with_field("area", 685.0)
                    .with_geometry("POINT (7.1 44.1)"),
                Feature::new(1)
                    .with_field("name", "Ecrins")
                    .with_field("kind", "national")
                    .with_field("area", 918.0),
                Feature::new(2)
                    .with_field("name", "Queyras")
                    .with_field("kind", "county")
                    .with_field("area", 650.0),
            ],
        ),
    );
    for (path, values) in [(T2M, t2m_values()), (D2M, d2m_values())] {
        engine.insert(
            path,
            DatasetData::raster("GTiff", AROME_SIZE, 1, DataType::Float64)
                .with_band_values(1, &values)
                .with_no_data(1, AROME_NO_DATA)
                .with_block_size(RasterSize::new(4, 2)),
        );
    }
    engine
}

/// Toolkit over a fresh fixture store with `workers` threads.
pub fn toolkit(workers: usize) -> (Toolkit, MemoryEngine) {
    let engine = engine();
    let toolkit = Toolkit::new(
        Arc::new(engine.clone()),
        DispatcherConfig::default()
            .with_workers(workers)
            .with_thread_name("it-worker"),
    );
    (toolkit, engine)
}
