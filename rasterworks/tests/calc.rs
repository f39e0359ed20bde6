//! Integration tests for block-wise raster algebra.
//!
//! The AROME fixtures reproduce the classic cloud-base estimate
//! `espy = 125 * (T2m - D2m)` with NoData in both inputs.

mod common;

use common::{d2m_values, t2m_values, toolkit, AROME_SIZE, D2M, SAMPLE, T2M};
use parking_lot::Mutex;
use rasterworks::calc::{calc, calc_async, CalcBindings, CalcFunction, CalcOptions};
use rasterworks::native::{CreateOptions, DataType, OpenMode, RasterSize, Window};
use rasterworks::toolkit::{Band, Dataset, Toolkit};
use rasterworks::OperationError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const ESPY_NO_DATA: f64 = -1e38;

fn espy_destination(toolkit: &Toolkit, path: &str) -> Dataset {
    let create = CreateOptions::new(AROME_SIZE, 1, DataType::Float64)
        .with_block_size(RasterSize::new(4, 2));
    let espy = toolkit
        .open_with(path, OpenMode::Create, None, Some(create))
        .unwrap();
    espy.band(1).unwrap().set_no_data(Some(ESPY_NO_DATA)).unwrap();
    espy
}

fn arome(toolkit: &Toolkit) -> (Band, Band) {
    let t2m = toolkit.open(T2M).unwrap().band(1).unwrap();
    let d2m = toolkit.open(D2M).unwrap().band(1).unwrap();
    (t2m, d2m)
}

fn espy() -> CalcFunction {
    CalcFunction::element(|args| Ok(125.0 * (args.value("t")? - args.value("td")?)))
}

fn expected_espy() -> Vec<f64> {
    t2m_values()
        .iter()
        .zip(d2m_values())
        .map(|(&t, td)| {
            if t == common::AROME_NO_DATA || td == common::AROME_NO_DATA {
                ESPY_NO_DATA
            } else {
                125.0 * (t - td)
            }
        })
        .collect()
}

fn assert_close(actual: &[f64], expected: &[f64]) {
    assert_eq!(actual.len(), expected.len());
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        let tolerance = 1e-6 * e.abs().max(1.0);
        assert!((a - e).abs() <= tolerance, "element {i}: {a} != {e}");
    }
}

#[test]
fn test_espy_with_no_data_conversion() {
    let (toolkit, _) = toolkit(4);
    let (t2m, d2m) = arome(&toolkit);
    let espy_ds = espy_destination(&toolkit, "/out/espy.tiff");
    let bindings = CalcBindings::new().bind("t", &t2m).bind("td", &d2m);

    let summary = calc(
        &bindings,
        &espy_ds.band(1).unwrap(),
        espy(),
        CalcOptions::new().with_convert_no_data(true),
    )
    .unwrap();

    assert_eq!(summary.blocks, 4);
    assert_eq!(summary.elements, 24);
    assert_eq!(summary.no_data_elements, 3);
    let written = espy_ds.band(1).unwrap().read(Window::full(AROME_SIZE)).unwrap();
    assert_close(&written, &expected_espy());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_espy_async() {
    let (toolkit, engine) = toolkit(3);
    let (t2m, d2m) = arome(&toolkit);
    let espy_ds = espy_destination(&toolkit, "/out/espy_async.tiff");
    let bindings = CalcBindings::new().bind("t", &t2m).bind("td", &d2m);

    calc_async(
        &bindings,
        &espy_ds.band(1).unwrap(),
        espy(),
        CalcOptions::new().with_convert_no_data(true),
    )
    .unwrap()
    .await
    .unwrap();
    espy_ds.close().unwrap();

    let reopened = toolkit.open("/out/espy_async.tiff").unwrap();
    let written = reopened.band(1).unwrap().read(Window::full(AROME_SIZE)).unwrap();
    assert_close(&written, &expected_espy());
    assert!(engine.exists("/out/espy_async.tiff"));
}

#[test]
fn test_without_conversion_function_sees_no_data() {
    let (toolkit, _) = toolkit(2);
    let (t2m, _) = arome(&toolkit);
    let out = espy_destination(&toolkit, "/out/raw.tiff");
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    calc(
        &CalcBindings::new().bind("t", &t2m),
        &out.band(1).unwrap(),
        CalcFunction::element(move |args| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(args["t"])
        }),
        CalcOptions::new(),
    )
    .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 24);
    let written = out.band(1).unwrap().read(Window::new(0, 0, 1, 1)).unwrap();
    assert_eq!(written, vec![common::AROME_NO_DATA]);
}

#[test]
fn test_callback_error_propagates() {
    let (toolkit, _) = toolkit(4);
    let (t2m, d2m) = arome(&toolkit);
    let out = espy_destination(&toolkit, "/out/fail.tiff");
    let err = calc(
        &CalcBindings::new().bind("t", &t2m).bind("td", &d2m),
        &out.band(1).unwrap(),
        CalcFunction::element(|_| Err("propagate this".into())),
        CalcOptions::new(),
    )
    .unwrap_err();
    assert_eq!(err, OperationError::UserCallbackFailed("propagate this".into()));
}

#[test]
fn test_dimension_mismatch() {
    let (toolkit, _) = toolkit(2);
    let (t2m, _) = arome(&toolkit);
    let sample = toolkit
        .open_with(SAMPLE, OpenMode::Update, None, None)
        .unwrap();
    let err = calc(
        &CalcBindings::new().bind("t", &t2m),
        &sample.band(1).unwrap(),
        espy(),
        CalcOptions::new(),
    )
    .unwrap_err();
    assert!(err.is_invalid_argument());
    assert!(err.to_string().contains("dimensions must match"));
}

#[test]
fn test_duplicate_names_rejected() {
    let (toolkit, _) = toolkit(1);
    let (t2m, d2m) = arome(&toolkit);
    let out = espy_destination(&toolkit, "/out/dup.tiff");
    let err = calc(
        &CalcBindings::new().bind("t", &t2m).bind("t", &d2m),
        &out.band(1).unwrap(),
        espy(),
        CalcOptions::new(),
    )
    .unwrap_err();
    assert!(err.is_invalid_argument());
}

#[test]
fn test_block_function_and_progress() {
    let (toolkit, _) = toolkit(2);
    let (t2m, d2m) = arome(&toolkit);
    let out = espy_destination(&toolkit, "/out/block.tiff");
    let fractions = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&fractions);

    let summary = calc(
        &CalcBindings::new().bind("t", &t2m).bind("td", &d2m),
        &out.band(1).unwrap(),
        CalcFunction::block(|block| {
            let t = block.input("t").ok_or("no t")?;
            let td = block.input("td").ok_or("no td")?;
            Ok(t.iter().zip(td).map(|(t, td)| 125.0 * (t - td)).collect())
        }),
        CalcOptions::new()
            .with_convert_no_data(true)
            .with_progress(move |note| {
                seen.lock().push(note.fraction);
                Ok(())
            }),
    )
    .unwrap();

    assert_eq!(summary.blocks, 4);
    assert_eq!(*fractions.lock(), vec![0.25, 0.5, 0.75, 1.0]);
    let written = out.band(1).unwrap().read(Window::full(AROME_SIZE)).unwrap();
    assert_close(&written, &expected_espy());
}
