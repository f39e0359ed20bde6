//! Evaluation of one block.

use super::bindings::{CalcArgs, CalcBlock, CalcFunction};
use crate::error::{CallbackError, OperationError};
use crate::native::{NativeDataset, Window};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Where a bound band is read from inside a block task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Source {
    /// Position in the task's input list.
    Input(usize),
    /// The destination dataset itself (a different band of it).
    Destination,
}

#[derive(Clone, Debug)]
pub(crate) struct CalcInput {
    pub source: Source,
    pub band: usize,
    pub no_data: Option<f64>,
}

/// Everything a block task needs, shared by all blocks of one calc.
#[derive(Debug)]
pub(crate) struct CalcPlan {
    pub names: Vec<String>,
    pub inputs: Vec<CalcInput>,
    pub destination_band: usize,
    pub destination_no_data: Option<f64>,
    pub convert_no_data: bool,
    pub function: CalcFunction,
}

/// Counters for one evaluated block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct BlockStats {
    pub elements: u64,
    pub no_data: u64,
}

/// NoData comparison; a NaN NoData value matches NaN elements.
fn is_no_data(value: f64, no_data: f64) -> bool {
    value == no_data || (value.is_nan() && no_data.is_nan())
}

impl CalcPlan {
    /// Reads every bound band over `window`.
    ///
    /// `destination` is only needed when an input lives on the destination
    /// dataset; it is borrowed shared, like the sources.
    pub fn read_inputs(
        &self,
        sources: &[&dyn NativeDataset],
        destination: Option<&dyn NativeDataset>,
        window: Window,
    ) -> Result<Vec<Vec<f64>>, OperationError> {
        self.inputs
            .iter()
            .map(|input| -> Result<Vec<f64>, OperationError> {
                let dataset = match input.source {
                    Source::Input(i) => sources.get(i).copied().ok_or_else(|| {
                        OperationError::invalid(format!("calc block has no input #{i}"))
                    })?,
                    Source::Destination => destination.ok_or_else(|| {
                        OperationError::invalid("calc block has no destination")
                    })?,
                };
                Ok(dataset.read_window(input.band, window)?)
            })
            .collect()
    }

    /// Applies the function to one block of input values.
    ///
    /// Runs without touching any dataset. Masked positions come back as the
    /// destination NoData value.
    pub fn compute(
        &self,
        values: &[Vec<f64>],
        window: Window,
    ) -> Result<(Vec<f64>, BlockStats), OperationError> {
        let mask = self.no_data_mask(values, window.len());
        let output = catch_unwind(AssertUnwindSafe(|| self.apply(values, &mask, window)))
            .map_err(|panic| OperationError::callback_panic(panic.as_ref()))?
            .map_err(|err| OperationError::callback(err.as_ref()))?;

        if output.len() != window.len() {
            return Err(OperationError::UserCallbackFailed(format!(
                "calc function returned {} values for a block of {}",
                output.len(),
                window.len()
            )));
        }

        let output = match (&mask, self.destination_no_data) {
            (Some(mask), Some(fill)) => output
                .into_iter()
                .zip(mask)
                .map(|(value, &masked)| if masked { fill } else { value })
                .collect(),
            _ => output,
        };

        let no_data = mask
            .as_ref()
            .map_or(0, |m| m.iter().filter(|&&masked| masked).count());
        let stats = BlockStats {
            elements: window.len() as u64,
            no_data: no_data as u64,
        };
        Ok((output, stats))
    }

    /// Writes a computed block to the destination band.
    pub fn write(
        &self,
        destination: &mut dyn NativeDataset,
        window: Window,
        output: &[f64],
    ) -> Result<(), OperationError> {
        destination.write_window(self.destination_band, window, output)?;
        Ok(())
    }

    /// Positions where some input holds its NoData value, when conversion is on.
    fn no_data_mask(&self, values: &[Vec<f64>], len: usize) -> Option<Vec<bool>> {
        if !self.convert_no_data {
            return None;
        }
        let mut mask = vec![false; len];
        for (input, data) in self.inputs.iter().zip(values) {
            if let Some(nd) = input.no_data {
                for (slot, &value) in mask.iter_mut().zip(data) {
                    *slot |= is_no_data(value, nd);
                }
            }
        }
        Some(mask)
    }

    fn apply(
        &self,
        values: &[Vec<f64>],
        mask: &Option<Vec<bool>>,
        window: Window,
    ) -> Result<Vec<f64>, CallbackError> {
        match &self.function {
            CalcFunction::Element(f) => {
                let fill = self.destination_no_data.unwrap_or(f64::NAN);
                let mut row = vec![0.0; values.len()];
                let mut output = Vec::with_capacity(window.len());
                for i in 0..window.len() {
                    if mask.as_ref().is_some_and(|m| m[i]) {
                        output.push(fill);
                        continue;
                    }
                    for (slot, data) in row.iter_mut().zip(values) {
                        *slot = data[i];
                    }
                    output.push(f(&CalcArgs::new(&self.names, &row))?);
                }
                Ok(output)
            }
            CalcFunction::Block(f) => f(&CalcBlock::new(&self.names, values, window)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::memory::{DatasetData, MemDataset};
    use crate::native::{DataType, RasterSize};
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn raster(values: &[f64], no_data: Option<f64>) -> MemDataset {
        let mut data =
            DatasetData::raster("MEM", RasterSize::new(values.len(), 1), 1, DataType::Float64)
                .with_band_values(1, values);
        if let Some(nd) = no_data {
            data = data.with_no_data(1, nd);
        }
        MemDataset::anonymous("calc", data)
    }

    fn plan(function: CalcFunction, no_data: [Option<f64>; 2], convert: bool) -> CalcPlan {
        CalcPlan {
            names: vec!["a".into(), "b".into()],
            inputs: vec![
                CalcInput {
                    source: Source::Input(0),
                    band: 1,
                    no_data: no_data[0],
                },
                CalcInput {
                    source: Source::Input(1),
                    band: 1,
                    no_data: no_data[1],
                },
            ],
            destination_band: 1,
            destination_no_data: Some(-1.0),
            convert_no_data: convert,
            function,
        }
    }

    fn sum() -> CalcFunction {
        CalcFunction::element(|args| Ok(args["a"] + args["b"]))
    }

    fn run(
        plan: &CalcPlan,
        a: &MemDataset,
        b: &MemDataset,
        len: usize,
    ) -> (Result<BlockStats, OperationError>, Vec<f64>) {
        let mut out = raster(&vec![0.0; len], Some(-1.0));
        let sources = vec![a as &dyn NativeDataset, b];
        let window = Window::new(0, 0, len, 1);
        let result = plan
            .read_inputs(&sources, Some(&out as &dyn NativeDataset), window)
            .and_then(|values| plan.compute(&values, window))
            .and_then(|(output, stats)| {
                plan.write(&mut out, window, &output)?;
                Ok(stats)
            });
        let written = out.read_window(1, window).unwrap();
        (result, written)
    }

    #[test]
    fn test_element_function() {
        let (a, b) = (raster(&[1.0, 2.0, 3.0], None), raster(&[10.0, 20.0, 30.0], None));
        let (stats, out) = run(&plan(sum(), [None, None], false), &a, &b, 3);
        assert_eq!(out, vec![11.0, 22.0, 33.0]);
        assert_eq!(stats.unwrap(), BlockStats { elements: 3, no_data: 0 });
    }

    #[test]
    fn test_no_data_short_circuits_function() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let f = CalcFunction::element(move |args| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(args["a"] * args["b"])
        });
        let a = raster(&[2.0, -9999.0, 4.0], Some(-9999.0));
        let b = raster(&[3.0, 3.0, f64::NAN], Some(f64::NAN));
        let (stats, out) = run(&plan(f, [Some(-9999.0), Some(f64::NAN)], true), &a, &b, 3);
        assert_eq!(out, vec![6.0, -1.0, -1.0]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(stats.unwrap().no_data, 2);
    }

    #[test]
    fn test_no_data_ignored_without_conversion() {
        let a = raster(&[-9999.0], Some(-9999.0));
        let b = raster(&[1.0], None);
        let (_, out) = run(&plan(sum(), [Some(-9999.0), None], false), &a, &b, 1);
        assert_eq!(out, vec![-9998.0]);
    }

    #[test]
    fn test_callback_error_message_is_kept() {
        let f = CalcFunction::element(|_| Err("propagate this".into()));
        let (a, b) = (raster(&[1.0], None), raster(&[1.0], None));
        let (result, out) = run(&plan(f, [None, None], false), &a, &b, 1);
        assert_eq!(
            result.unwrap_err(),
            OperationError::UserCallbackFailed("propagate this".into())
        );
        assert_eq!(out, vec![0.0]);
    }

    #[test]
    fn test_callback_panic_is_caught() {
        let f = CalcFunction::element(|args| Ok(args["missing"]));
        let (a, b) = (raster(&[1.0], None), raster(&[1.0], None));
        let (result, _) = run(&plan(f, [None, None], false), &a, &b, 1);
        let err = result.unwrap_err();
        assert!(err.is_callback_failure());
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_block_function_and_mask() {
        let f = CalcFunction::block(|block| {
            let a = block.input("a").ok_or("no a")?;
            let b = block.input("b").ok_or("no b")?;
            Ok(a.iter().zip(b).map(|(x, y)| x - y).collect())
        });
        let a = raster(&[5.0, 0.0, 7.0], Some(0.0));
        let b = raster(&[1.0, 1.0, 2.0], None);
        let (_, out) = run(&plan(f, [Some(0.0), None], true), &a, &b, 3);
        assert_eq!(out, vec![4.0, -1.0, 5.0]);
    }

    #[test]
    fn test_block_function_wrong_length() {
        let f = CalcFunction::block(|_| Ok(vec![1.0]));
        let (a, b) = (raster(&[1.0, 2.0], None), raster(&[1.0, 2.0], None));
        let (result, _) = run(&plan(f, [None, None], false), &a, &b, 2);
        let err = result.unwrap_err();
        assert!(err.is_callback_failure());
        assert!(err.to_string().contains("returned 1 values for a block of 2"));
    }

    #[test]
    fn test_destination_source_needs_destination() {
        let mut p = plan(sum(), [None, None], false);
        p.inputs[1].source = Source::Destination;
        let a = raster(&[1.0], None);
        let sources = vec![&a as &dyn NativeDataset];
        let err = p
            .read_inputs(&sources, None, Window::new(0, 0, 1, 1))
            .unwrap_err();
        assert!(err.is_invalid_argument());

        let out = raster(&[4.0], None);
        let values = p
            .read_inputs(&sources, Some(&out as &dyn NativeDataset), Window::new(0, 0, 1, 1))
            .unwrap();
        assert_eq!(values, vec![vec![1.0], vec![4.0]]);
    }

    #[test]
    fn test_is_no_data_handles_nan() {
        assert!(is_no_data(f64::NAN, f64::NAN));
        assert!(is_no_data(-1e38, -1e38));
        assert!(!is_no_data(0.0, f64::NAN));
    }

    proptest! {
        #[test]
        fn prop_no_data_positions_take_destination_no_data(
            pairs in prop::collection::vec((0i32..5, 0i32..5), 1..64),
        ) {
            let a: Vec<f64> = pairs.iter().map(|p| p.0 as f64).collect();
            let b: Vec<f64> = pairs.iter().map(|p| p.1 as f64).collect();
            let (da, db) = (raster(&a, Some(0.0)), raster(&b, Some(0.0)));
            let (result, out) = run(&plan(sum(), [Some(0.0), Some(0.0)], true), &da, &db, a.len());
            prop_assert!(result.is_ok());
            for i in 0..a.len() {
                if a[i] == 0.0 || b[i] == 0.0 {
                    prop_assert_eq!(out[i], -1.0);
                } else {
                    prop_assert_eq!(out[i], a[i] + b[i]);
                }
            }
        }
    }
}
