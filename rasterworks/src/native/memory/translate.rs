//! Raster format conversion and subsetting.

use super::dataset::{default_block, BandData, DatasetData};
use super::options::{unknown, OptionReader};
use super::{deliver, drivers, report, resample, single_source, Store};
use crate::native::{
    DataType, ExecuteOutput, ExecuteRequest, GeoTransform, NativeDestination, NativeError,
    NativeProgress, NativeResult, RasterSize, Window,
};

#[derive(Debug, Default, PartialEq)]
struct TranslateOptions {
    bands: Vec<usize>,
    format: Option<String>,
    output_type: Option<DataType>,
    /// `Some(None)` strips NoData (`-a_nodata none`).
    no_data: Option<Option<f64>>,
    srs: Option<String>,
    out_size: Option<RasterSize>,
}

impl TranslateOptions {
    fn parse(args: &[String]) -> NativeResult<Self> {
        let mut opts = Self::default();
        let mut reader = OptionReader::new(args);
        while let Some(flag) = reader.next_flag() {
            match flag {
                "-b" => opts.bands.push(reader.parse(flag)?),
                "-of" => opts.format = Some(reader.value(flag)?.to_string()),
                "-ot" => opts.output_type = Some(reader.parse(flag)?),
                "-a_nodata" => {
                    let value = reader.value(flag)?;
                    opts.no_data = Some(if value.eq_ignore_ascii_case("none") {
                        None
                    } else {
                        Some(value.parse().map_err(|_| {
                            NativeError::InvalidArgument(format!(
                                "Invalid value '{value}' for {flag}"
                            ))
                        })?)
                    });
                }
                "-a_srs" => opts.srs = Some(reader.value(flag)?.to_string()),
                "-outsize" => opts.out_size = Some(reader.size(flag)?),
                "-q" | "-quiet" => {}
                other => return Err(unknown(other)),
            }
        }
        Ok(opts)
    }
}

/// Rescales pixel size for a new output size.
fn scale_transform(mut transform: GeoTransform, from: RasterSize, to: RasterSize) -> GeoTransform {
    transform[1] *= from.x as f64 / to.x as f64;
    transform[5] *= from.y as f64 / to.y as f64;
    transform
}

pub(super) fn run(
    store: &Store,
    request: ExecuteRequest<'_>,
    progress: &mut NativeProgress<'_>,
) -> NativeResult<ExecuteOutput> {
    let opts = TranslateOptions::parse(request.options)?;
    let source = single_source(&request.sources, "translate")?;

    let band_count = source.band_count();
    let bands: Vec<usize> = if opts.bands.is_empty() {
        (1..=band_count).collect()
    } else {
        opts.bands.clone()
    };
    if let Some(bad) = bands.iter().find(|&&b| b == 0 || b > band_count) {
        return Err(NativeError::InvalidArgument(format!(
            "Band {bad} requested, but only bands 1 to {band_count} available."
        )));
    }

    let driver = match &request.destination {
        NativeDestination::Path(path) => {
            drivers::raster_output(opts.format.as_deref(), path)?
                .name
                .to_string()
        }
        NativeDestination::Existing(target) => target.driver().to_string(),
        NativeDestination::None => {
            return Err(NativeError::InvalidArgument(
                "translate requires a destination".to_string(),
            ))
        }
    };

    let size = source.raster_size();
    let out_size = opts.out_size.unwrap_or(size);
    let mut out = DatasetData::raster(&driver, out_size, 0, DataType::Byte);
    out.srs = opts.srs.clone().or_else(|| source.srs());
    out.geo_transform = source
        .geo_transform()
        .map(|gt| scale_transform(gt, size, out_size));

    let total = bands.len();
    for (i, &band) in bands.iter().enumerate() {
        let data_type = match opts.output_type {
            Some(data_type) => data_type,
            None => source.band_data_type(band)?,
        };
        let no_data = match opts.no_data {
            Some(no_data) => no_data,
            None => source.band_no_data(band)?,
        };
        let values = source.read_window(band, Window::full(size))?;
        let values = resample(&values, size, out_size)
            .into_iter()
            .map(|v| data_type.cast(v))
            .collect();
        out.bands.push(BandData {
            data_type,
            no_data: no_data.map(|v| data_type.cast(v)),
            block: default_block(out_size),
            values,
        });
        report(progress, (i + 1) as f64 / total as f64, None)?;
    }
    if total == 0 {
        report(progress, 1.0, None)?;
    }

    deliver(store, out, request.destination)
}
