//! Vector format conversion.
//!
//! Field content is copied verbatim; only layer naming, field selection,
//! attribute filtering and feature limits are applied.

use super::dataset::{DatasetData, LayerData};
use super::options::{unknown, OptionReader};
use super::{deliver, drivers, report, single_source, Store};
use crate::native::{
    ExecuteOutput, ExecuteRequest, Feature, NativeDestination, NativeError, NativeProgress,
    NativeResult,
};

#[derive(Debug, Default, PartialEq)]
struct VectorOptions {
    format: Option<String>,
    layer_name: Option<String>,
    select: Option<Vec<String>>,
    limit: Option<usize>,
    filter: Option<(String, String)>,
}

impl VectorOptions {
    fn parse(args: &[String]) -> NativeResult<Self> {
        let mut opts = Self::default();
        let mut reader = OptionReader::new(args);
        while let Some(flag) = reader.next_flag() {
            match flag {
                "-f" => opts.format = Some(reader.value(flag)?.to_string()),
                "-nln" => opts.layer_name = Some(reader.value(flag)?.to_string()),
                "-select" => {
                    opts.select = Some(
                        reader
                            .value(flag)?
                            .split(',')
                            .map(|f| f.trim().to_string())
                            .filter(|f| !f.is_empty())
                            .collect(),
                    )
                }
                "-limit" => opts.limit = Some(reader.parse(flag)?),
                "-where" => opts.filter = Some(parse_where(reader.value(flag)?)?),
                "-overwrite" | "-skipfailures" | "-q" => {}
                other => return Err(unknown(other)),
            }
        }
        Ok(opts)
    }
}

/// Parses `field = value`, with optional single or double quotes around the value.
fn parse_where(expr: &str) -> NativeResult<(String, String)> {
    let invalid = || NativeError::InvalidArgument(format!("Invalid -where expression: {expr}"));
    let (field, value) = expr.split_once('=').ok_or_else(invalid)?;
    let field = field.trim();
    let value = value.trim();
    if field.is_empty() || value.is_empty() {
        return Err(invalid());
    }
    let value = value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .or_else(|| value.strip_prefix('"').and_then(|v| v.strip_suffix('"')))
        .unwrap_or(value);
    Ok((field.to_string(), value.to_string()))
}

/// Keeps only the selected fields, in selection order.
fn project(feature: Feature, fields: &[String]) -> Feature {
    let mut out = Feature {
        fid: feature.fid,
        fields: Vec::with_capacity(fields.len()),
        geometry: feature.geometry,
    };
    for name in fields {
        if let Some((_, value)) = feature.fields.iter().find(|(field, _)| field == name) {
            out.fields.push((name.clone(), value.clone()));
        }
    }
    out
}

pub(super) fn run(
    store: &Store,
    request: ExecuteRequest<'_>,
    progress: &mut NativeProgress<'_>,
) -> NativeResult<ExecuteOutput> {
    let opts = VectorOptions::parse(request.options)?;
    let source = single_source(&request.sources, "vector translate")?;

    let layers = source.layers();
    if layers.is_empty() {
        return Err(NativeError::Failed(format!(
            "{} contains no vector layers",
            source.description()
        )));
    }

    let driver = match &request.destination {
        NativeDestination::Path(path) => drivers::vector_output(opts.format.as_deref(), path)?
            .name
            .to_string(),
        NativeDestination::Existing(target) => target.driver().to_string(),
        NativeDestination::None => {
            return Err(NativeError::InvalidArgument(
                "vector translate requires a destination".to_string(),
            ))
        }
    };

    let total: usize = layers.iter().map(|l| l.feature_count).sum();
    let mut processed = 0usize;
    let mut out = DatasetData::vector(&driver);
    out.srs = source.srs();

    for (index, info) in layers.iter().enumerate() {
        let fields = match &opts.select {
            Some(selected) => {
                if let Some(missing) = selected.iter().find(|f| !info.fields.contains(f)) {
                    return Err(NativeError::InvalidArgument(format!(
                        "Field '{missing}' not found in layer '{}'",
                        info.name
                    )));
                }
                selected.clone()
            }
            None => info.fields.clone(),
        };
        if let Some((field, _)) = &opts.filter {
            if !info.fields.contains(field) {
                return Err(NativeError::InvalidArgument(format!(
                    "\"{field}\" not recognised as an available field."
                )));
            }
        }

        let mut kept = Vec::new();
        for feature in source.features(&info.name)? {
            processed += 1;
            let matches = opts.filter.as_ref().map_or(true, |(field, value)| {
                feature
                    .field(field)
                    .is_some_and(|v| v.to_string() == *value)
            });
            if matches && opts.limit.map_or(true, |limit| kept.len() < limit) {
                kept.push(project(feature, &fields));
            }
            report(progress, processed as f64 / total as f64, None)?;
        }

        let name = match (&opts.layer_name, index) {
            (Some(name), 0) => name.clone(),
            _ => info.name.clone(),
        };
        out.layers.push(LayerData {
            name,
            fields,
            features: kept,
        });
    }
    if total == 0 {
        report(progress, 1.0, None)?;
    }

    deliver(store, out, request.destination)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::memory::{MemDataset, MemoryEngine};
    use crate::native::{FieldValue, NativeDataset, NativeEngine, OperationKind};

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn parks() -> MemDataset {
        let features = (1..=4)
            .map(|i| {
                Feature::new(i)
                    .with_field("name", format!("park {i}").as_str())
                    .with_field("kind", if i % 2 == 0 { "county" } else { "state" })
                    .with_field("acres", i as i64 * 10)
                    .with_geometry("POINT (0 0)")
            })
            .collect();
        MemDataset::anonymous(
            "park.geo.json",
            DatasetData::vector("GeoJSON").with_layer("park", &["name", "kind", "acres"], features),
        )
    }

    fn run_vector(engine: &MemoryEngine, options: &[&str]) -> NativeResult<ExecuteOutput> {
        let src = parks();
        let options = args(options);
        engine.execute(
            ExecuteRequest {
                kind: OperationKind::VectorTranslate,
                sources: vec![&src as &dyn NativeDataset],
                destination: NativeDestination::Path("out.gpkg"),
                options: &options,
            },
            &mut |_, _| true,
        )
    }

    #[test]
    fn test_parse_where() {
        assert_eq!(
            parse_where("kind = 'county'").unwrap(),
            ("kind".to_string(), "county".to_string())
        );
        assert_eq!(
            parse_where("acres=10").unwrap(),
            ("acres".to_string(), "10".to_string())
        );
        assert!(parse_where("kind").is_err());
        assert!(parse_where("=x").is_err());
    }

    #[test]
    fn test_copies_content_verbatim() {
        let engine = MemoryEngine::new();
        run_vector(&engine, &[]).unwrap();
        let stored = engine.snapshot("out.gpkg").unwrap();
        assert_eq!(stored.driver, "GPKG");
        assert_eq!(stored.layers.len(), 1);
        let layer = &stored.layers[0];
        assert_eq!(layer.features.len(), 4);
        assert_eq!(layer.features, parks().features("park").unwrap());
    }

    #[test]
    fn test_where_select_limit_nln() {
        let engine = MemoryEngine::new();
        run_vector(
            &engine,
            &["-where", "kind=county", "-select", "name", "-limit", "1", "-nln", "counties"],
        )
        .unwrap();
        let stored = engine.snapshot("out.gpkg").unwrap();
        let layer = &stored.layers[0];
        assert_eq!(layer.name, "counties");
        assert_eq!(layer.fields, vec!["name".to_string()]);
        assert_eq!(layer.features.len(), 1);
        assert_eq!(layer.features[0].fid, 2);
        assert_eq!(layer.features[0].field("name"), Some(&FieldValue::from("park 2")));
        assert_eq!(layer.features[0].field("kind"), None);
    }

    #[test]
    fn test_unknown_field_in_where() {
        let engine = MemoryEngine::new();
        let err = run_vector(&engine, &["-where", "color=red"]).unwrap_err();
        assert!(matches!(err, NativeError::InvalidArgument(_)));
    }

    #[test]
    fn test_unknown_driver() {
        let engine = MemoryEngine::new();
        let err = run_vector(&engine, &["-f", "nope"]).unwrap_err();
        assert_eq!(err, NativeError::Failed("Unable to find driver `nope'.".into()));
    }

    #[test]
    fn test_progress_reaches_one() {
        let engine = MemoryEngine::new();
        let src = parks();
        let mut seen = Vec::new();
        engine
            .execute(
                ExecuteRequest {
                    kind: OperationKind::VectorTranslate,
                    sources: vec![&src as &dyn NativeDataset],
                    destination: NativeDestination::Path("out.json"),
                    options: &[],
                },
                &mut |fraction, _| {
                    seen.push(fraction);
                    true
                },
            )
            .unwrap();
        assert_eq!(seen, vec![0.25, 0.5, 0.75, 1.0]);
        assert_eq!(engine.snapshot("out.json").unwrap().driver, "GeoJSON");
    }
}
