//! Dataset reports, as plain text or JSON.

use super::options::{unknown, OptionReader};
use super::single_source;
use crate::native::{
    ExecuteOutput, ExecuteRequest, GeoTransform, LayerInfo, NativeDataset, NativeError,
    NativeResult, Window,
};
use serde::Serialize;
use std::fmt::Write;

#[derive(Debug, Default, PartialEq)]
struct InfoOptions {
    json: bool,
    stats: bool,
}

impl InfoOptions {
    fn parse(args: &[String]) -> NativeResult<Self> {
        let mut opts = Self::default();
        let mut reader = OptionReader::new(args);
        while let Some(flag) = reader.next_flag() {
            match flag {
                "-json" => opts.json = true,
                "-stats" | "-mm" | "-approx_stats" => opts.stats = true,
                "-nomd" | "-norat" | "-noct" | "-nogcp" | "-nofl" => {}
                other => return Err(unknown(other)),
            }
        }
        Ok(opts)
    }
}

#[derive(Debug, Serialize)]
struct CoordinateSystem {
    wkt: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BandReport {
    band: usize,
    block: [usize; 2],
    #[serde(rename = "type")]
    data_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    no_data_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    minimum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    maximum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mean: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InfoReport {
    description: String,
    driver_short_name: String,
    size: [usize; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    coordinate_system: Option<CoordinateSystem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    geo_transform: Option<GeoTransform>,
    bands: Vec<BandReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    layers: Vec<LayerInfo>,
}

/// Min, max and mean of the valid values of a band.
fn statistics(values: &[f64], no_data: Option<f64>) -> Option<(f64, f64, f64)> {
    let valid = values
        .iter()
        .copied()
        .filter(|v| !v.is_nan() && no_data.map_or(true, |nd| *v != nd));
    let (mut min, mut max, mut sum, mut count) = (f64::INFINITY, f64::NEG_INFINITY, 0.0, 0usize);
    for v in valid {
        min = min.min(v);
        max = max.max(v);
        sum += v;
        count += 1;
    }
    (count > 0).then(|| (min, max, sum / count as f64))
}

fn build_report(source: &dyn NativeDataset, stats: bool) -> NativeResult<InfoReport> {
    let size = source.raster_size();
    let mut bands = Vec::with_capacity(source.band_count());
    for band in 1..=source.band_count() {
        let block = source.band_block_size(band)?;
        let no_data_value = source.band_no_data(band)?;
        let summary = if stats {
            statistics(&source.read_window(band, Window::full(size))?, no_data_value)
        } else {
            None
        };
        bands.push(BandReport {
            band,
            block: [block.x, block.y],
            data_type: source.band_data_type(band)?.name(),
            no_data_value,
            minimum: summary.map(|s| s.0),
            maximum: summary.map(|s| s.1),
            mean: summary.map(|s| s.2),
        });
    }
    Ok(InfoReport {
        description: source.description().to_string(),
        driver_short_name: source.driver().to_string(),
        size: [size.x, size.y],
        coordinate_system: source.srs().map(|wkt| CoordinateSystem { wkt }),
        geo_transform: source.geo_transform(),
        bands,
        layers: source.layers(),
    })
}

fn render_text(report: &InfoReport) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail.
    let _ = writeln!(out, "Driver: {}", report.driver_short_name);
    let _ = writeln!(out, "Files: {}", report.description);
    if !report.bands.is_empty() {
        let _ = writeln!(out, "Size is {}, {}", report.size[0], report.size[1]);
    }
    if let Some(cs) = &report.coordinate_system {
        let _ = writeln!(out, "Coordinate System is:\n{}", cs.wkt);
    }
    if let Some(gt) = &report.geo_transform {
        let _ = writeln!(out, "Origin = ({:.15},{:.15})", gt[0], gt[3]);
        let _ = writeln!(out, "Pixel Size = ({:.15},{:.15})", gt[1], gt[5]);
    }
    for band in &report.bands {
        let _ = writeln!(
            out,
            "Band {} Block={}x{} Type={}",
            band.band, band.block[0], band.block[1], band.data_type
        );
        if let (Some(min), Some(max), Some(mean)) = (band.minimum, band.maximum, band.mean) {
            let _ = writeln!(out, "  Minimum={min:.3}, Maximum={max:.3}, Mean={mean:.3}");
        }
        if let Some(nd) = band.no_data_value {
            let _ = writeln!(out, "  NoData Value={nd}");
        }
    }
    for layer in &report.layers {
        let _ = writeln!(out, "Layer name: {}", layer.name);
        let _ = writeln!(out, "Feature Count: {}", layer.feature_count);
        for field in &layer.fields {
            let _ = writeln!(out, "{field}: String");
        }
    }
    out
}

pub(super) fn run(request: ExecuteRequest<'_>) -> NativeResult<ExecuteOutput> {
    let opts = InfoOptions::parse(request.options)?;
    let source = single_source(&request.sources, "info")?;
    let report = build_report(source, opts.stats)?;
    let text = if opts.json {
        serde_json::to_string_pretty(&report)
            .map_err(|e| NativeError::Failed(format!("cannot serialize report: {e}")))?
    } else {
        render_text(&report)
    };
    Ok(ExecuteOutput::Report(text))
}
