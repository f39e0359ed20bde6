//! Mosaicking and regridding of one or more rasters onto a target grid.
//!
//! Resampling is nearest neighbour over north-up geotransforms. Coordinate
//! reference systems are tagged, not transformed.

use super::dataset::{default_block, BandData, DatasetData};
use super::options::{unknown, OptionReader};
use super::{deliver, drivers, report, Store};
use crate::native::{
    ExecuteOutput, ExecuteRequest, GeoTransform, NativeDataset, NativeDestination, NativeError,
    NativeProgress, NativeResult, RasterSize, Window,
};

/// Geotransform assumed for rasters without georeferencing.
const IDENTITY: GeoTransform = [0.0, 1.0, 0.0, 0.0, 0.0, 1.0];

#[derive(Debug, Default, PartialEq)]
struct WarpOptions {
    target_srs: Option<String>,
    format: Option<String>,
    target_size: Option<RasterSize>,
    dst_no_data: Option<f64>,
    src_no_data: Option<f64>,
}

impl WarpOptions {
    fn parse(args: &[String]) -> NativeResult<Self> {
        let mut opts = Self::default();
        let mut reader = OptionReader::new(args);
        while let Some(flag) = reader.next_flag() {
            match flag {
                "-t_srs" => opts.target_srs = Some(reader.value(flag)?.to_string()),
                "-of" => opts.format = Some(reader.value(flag)?.to_string()),
                "-ts" => opts.target_size = Some(reader.size(flag)?),
                "-r" => {
                    let method = reader.value(flag)?;
                    if !matches!(method, "near" | "nearest") {
                        return Err(NativeError::InvalidArgument(format!(
                            "Unknown resampling method: {method}."
                        )));
                    }
                }
                "-dstnodata" => opts.dst_no_data = Some(reader.parse(flag)?),
                "-srcnodata" => opts.src_no_data = Some(reader.parse(flag)?),
                "-overwrite" | "-multi" | "-q" => {}
                other => return Err(unknown(other)),
            }
        }
        Ok(opts)
    }
}

/// A raster grid: size plus north-up geotransform.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Grid {
    size: RasterSize,
    transform: GeoTransform,
}

impl Grid {
    fn of(dataset: &dyn NativeDataset) -> NativeResult<Self> {
        let transform = dataset.geo_transform().unwrap_or(IDENTITY);
        if transform[2] != 0.0 || transform[4] != 0.0 {
            return Err(NativeError::Failed(format!(
                "{}: rotated geotransforms are not supported",
                dataset.description()
            )));
        }
        Ok(Self {
            size: dataset.raster_size(),
            transform,
        })
    }

    /// `(min_x, min_y, max_x, max_y)` in georeferenced units.
    fn extent(&self) -> (f64, f64, f64, f64) {
        let t = &self.transform;
        let x1 = t[0] + self.size.x as f64 * t[1];
        let y1 = t[3] + self.size.y as f64 * t[5];
        (t[0].min(x1), t[3].min(y1), t[0].max(x1), t[3].max(y1))
    }

    /// Pixel containing a georeferenced point, if inside the grid.
    fn pixel(&self, gx: f64, gy: f64) -> Option<(usize, usize)> {
        let t = &self.transform;
        let col = ((gx - t[0]) / t[1]).floor();
        let row = ((gy - t[3]) / t[5]).floor();
        if col < 0.0 || row < 0.0 {
            return None;
        }
        let (col, row) = (col as usize, row as usize);
        (col < self.size.x && row < self.size.y).then_some((col, row))
    }

    /// Georeferenced centre of a pixel.
    fn centre(&self, col: usize, row: usize) -> (f64, f64) {
        let t = &self.transform;
        (
            t[0] + (col as f64 + 0.5) * t[1],
            t[3] + (row as f64 + 0.5) * t[5],
        )
    }
}

/// Output grid covering the union of all sources, at the first source's resolution.
fn union_grid(sources: &[Grid], target_size: Option<RasterSize>) -> Grid {
    let first = sources[0].transform;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = sources[0].extent();
    for grid in &sources[1..] {
        let (a, b, c, d) = grid.extent();
        min_x = min_x.min(a);
        min_y = min_y.min(b);
        max_x = max_x.max(c);
        max_y = max_y.max(d);
    }
    let (width, height) = (max_x - min_x, max_y - min_y);
    let cells = |span: f64, res: f64| ((span / res.abs()) - 1e-9).ceil().max(1.0) as usize;
    let size = target_size.unwrap_or_else(|| {
        RasterSize::new(cells(width, first[1]), cells(height, first[5]))
    });
    let pixel_x = width / size.x as f64;
    let pixel_y = height / size.y as f64;
    let transform = if first[5] < 0.0 {
        [min_x, pixel_x, 0.0, max_y, 0.0, -pixel_y]
    } else {
        [min_x, pixel_x, 0.0, min_y, 0.0, pixel_y]
    };
    Grid { size, transform }
}

fn same_value(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

pub(super) fn run(
    store: &Store,
    request: ExecuteRequest<'_>,
    progress: &mut NativeProgress<'_>,
) -> NativeResult<ExecuteOutput> {
    let opts = WarpOptions::parse(request.options)?;
    let sources = &request.sources;
    let Some(first) = sources.first().copied() else {
        return Err(NativeError::InvalidArgument(
            "warp requires at least one source dataset".to_string(),
        ));
    };
    let band_count = first.band_count();
    if band_count == 0 {
        return Err(NativeError::Failed(format!(
            "{} has no raster bands",
            first.description()
        )));
    }
    let mut grids = Vec::with_capacity(sources.len());
    for source in sources {
        if source.band_count() != band_count {
            return Err(NativeError::Failed(format!(
                "{} has {} bands, expected {band_count}",
                source.description(),
                source.band_count()
            )));
        }
        grids.push(Grid::of(*source)?);
    }

    let (driver, grid, existing) = match &request.destination {
        NativeDestination::Path(path) => (
            drivers::raster_output(opts.format.as_deref(), path)?
                .name
                .to_string(),
            union_grid(&grids, opts.target_size),
            None,
        ),
        NativeDestination::Existing(target) => {
            let grid = Grid::of(&**target)?;
            let mut bands = Vec::new();
            for band in 1..=target.band_count().min(band_count) {
                bands.push(target.read_window(band, Window::full(grid.size))?);
            }
            (target.driver().to_string(), grid, Some(bands))
        }
        NativeDestination::None => {
            return Err(NativeError::InvalidArgument(
                "warp requires a destination".to_string(),
            ))
        }
    };

    let mut out = DatasetData::raster(&driver, grid.size, 0, crate::native::DataType::Byte);
    out.srs = opts.target_srs.clone().or_else(|| first.srs());
    out.geo_transform = Some(grid.transform);

    let mut existing = existing.unwrap_or_default().into_iter();
    for band in 1..=band_count {
        let data_type = first.band_data_type(band)?;
        let no_data = match opts.dst_no_data.or(opts.src_no_data) {
            Some(v) => Some(v),
            None => first.band_no_data(band)?,
        };
        let values = existing
            .next()
            .unwrap_or_else(|| vec![no_data.unwrap_or(0.0); grid.size.area()]);
        out.bands.push(BandData {
            data_type,
            no_data: no_data.map(|v| data_type.cast(v)),
            block: default_block(grid.size),
            values,
        });
    }

    let steps = (sources.len() * grid.size.y).max(1);
    let mut done = 0usize;
    for (source, source_grid) in sources.iter().zip(&grids) {
        let mut inputs = Vec::with_capacity(band_count);
        for band in 1..=band_count {
            let skip = match opts.src_no_data {
                Some(v) => Some(v),
                None => source.band_no_data(band)?,
            };
            inputs.push((source.read_window(band, Window::full(source_grid.size))?, skip));
        }
        for row in 0..grid.size.y {
            for col in 0..grid.size.x {
                let (gx, gy) = grid.centre(col, row);
                let Some((sx, sy)) = source_grid.pixel(gx, gy) else {
                    continue;
                };
                let src_index = sy * source_grid.size.x + sx;
                let dst_index = row * grid.size.x + col;
                for ((values, skip), band) in inputs.iter().zip(out.bands.iter_mut()) {
                    let v = values[src_index];
                    if skip.is_some_and(|nd| same_value(v, nd)) {
                        continue;
                    }
                    band.values[dst_index] = band.data_type.cast(v);
                }
            }
            done += 1;
            report(progress, done as f64 / steps as f64, None)?;
        }
    }

    deliver(store, out, request.destination)
}
