//! Block-wise raster algebra.
//!
//! [`calc`] evaluates a caller function over N aligned input bands and writes
//! the result to a destination band. The raster is split into blocks (the
//! destination band's natural block size); each block is one dispatcher task
//! that reads every input window, applies the function and writes the
//! destination window. Up to one block per worker is kept in flight, so reads,
//! compute and writes of different blocks overlap.
//!
//! A block holds shared locks while reading and no lock while the function
//! runs. The destination's exclusive lock is taken only for the write.
//!
//! ```text
//!   bindings ─► validate (alive, dimensions, NoData) ─► BlockPlan
//!                                                          │
//!        ┌───────────── FuturesUnordered (≤ workers) ◄─────┘
//!        ▼
//!   CalcBlock task: read inputs ─► fn / NoData mask ─► write destination
//!                   (shared)        (unlocked)          (exclusive)
//! ```
//!
//! # Example
//!
//! ```ignore
//! let bindings = CalcBindings::new().bind("t", &t2m).bind("td", &d2m);
//! let summary = calc(
//!     &bindings,
//!     &espy,
//!     CalcFunction::element(|args| Ok(125.0 * (args["t"] - args["td"]))),
//!     CalcOptions::new().with_convert_no_data(true),
//! )?;
//! ```

mod bindings;
mod blocks;
mod engine;

pub use bindings::{BlockFn, CalcArgs, CalcBindings, CalcBlock, CalcFunction, ElementFn};
pub use blocks::BlockPlan;

use crate::dispatch::{
    progress_sink, DatasetResource, Dispatcher, ProgressNotification, ProgressSink, TaskHandle,
    TaskRequest,
};
use crate::error::{CallbackError, OperationError};
use crate::native::{OperationKind, Window};
use crate::toolkit::Band;
use engine::{BlockStats, CalcInput, CalcPlan, Source};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::IntoFuture;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

// =============================================================================
// Options and results
// =============================================================================

/// Configuration of one calc invocation.
#[derive(Default)]
pub struct CalcOptions {
    convert_no_data: bool,
    progress: Option<ProgressSink>,
}

impl CalcOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// When enabled, any element where an input equals its NoData value is
    /// written as the destination's NoData value without calling the function.
    /// Requires the destination band to have a NoData value.
    pub fn with_convert_no_data(mut self, convert: bool) -> Self {
        self.convert_no_data = convert;
        self
    }

    /// Reports progress once per finished block.
    pub fn with_progress<F>(mut self, sink: F) -> Self
    where
        F: FnMut(&ProgressNotification) -> Result<(), CallbackError> + Send + 'static,
    {
        self.progress = Some(progress_sink(sink));
        self
    }

    pub fn convert_no_data(&self) -> bool {
        self.convert_no_data
    }
}

impl std::fmt::Debug for CalcOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalcOptions")
            .field("convert_no_data", &self.convert_no_data)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// What a finished calc did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CalcSummary {
    pub blocks: usize,
    pub elements: u64,
    /// Elements written as NoData because an input was NoData.
    pub no_data_elements: u64,
}

impl CalcSummary {
    fn absorb(&mut self, stats: BlockStats) {
        self.blocks += 1;
        self.elements += stats.elements;
        self.no_data_elements += stats.no_data;
    }
}

// =============================================================================
// Entry points
// =============================================================================

/// Runs a calc and blocks until every block has been written.
pub fn calc(
    bindings: &CalcBindings,
    destination: &Band,
    function: CalcFunction,
    options: CalcOptions,
) -> Result<CalcSummary, OperationError> {
    calc_async(bindings, destination, function, options)?.wait_blocking()
}

/// Validates a calc and returns a task that runs it when awaited.
///
/// Liveness, dimensions and NoData configuration are checked here, before
/// any block is read or written.
pub fn calc_async(
    bindings: &CalcBindings,
    destination: &Band,
    function: CalcFunction,
    options: CalcOptions,
) -> Result<CalcTask, OperationError> {
    bindings.validate()?;

    let size = destination.size()?;
    let mut resources: Vec<DatasetResource> = Vec::new();
    let mut inputs = Vec::with_capacity(bindings.len());
    for (name, band) in bindings.iter() {
        let band_size = band.size()?;
        if band_size != size {
            return Err(OperationError::invalid(format!(
                "dimensions must match: input `{name}' is {band_size}, destination is {size}"
            )));
        }
        let resource = band.dataset().resource();
        let source = if resource.ptr_eq(destination.dataset().resource()) {
            Source::Destination
        } else {
            let position = resources.iter().position(|r| r.ptr_eq(resource));
            Source::Input(position.unwrap_or_else(|| {
                resources.push(resource.clone());
                resources.len() - 1
            }))
        };
        inputs.push(CalcInput {
            source,
            band: band.index(),
            no_data: band.no_data()?,
        });
    }

    let destination_no_data = destination.no_data()?;
    if options.convert_no_data && destination_no_data.is_none() {
        return Err(OperationError::invalid(
            "convert_no_data requires the destination band to have a NoData value",
        ));
    }
    let blocks = BlockPlan::new(size, destination.block_size()?);

    debug!(
        inputs = bindings.len(),
        size = %size,
        blocks = blocks.len(),
        convert_no_data = options.convert_no_data,
        "Calc validated"
    );

    Ok(CalcTask {
        dispatcher: Arc::clone(destination.dataset().dispatcher()),
        plan: Arc::new(CalcPlan {
            names: bindings.names().into_iter().map(str::to_owned).collect(),
            inputs,
            destination_band: destination.index(),
            destination_no_data,
            convert_no_data: options.convert_no_data,
            function,
        }),
        inputs: resources,
        output: destination.dataset().resource().clone(),
        blocks,
        progress: options.progress,
        abort: CancellationToken::new(),
    })
}

// =============================================================================
// Calc task
// =============================================================================

/// A validated calc, run block by block when awaited.
pub struct CalcTask {
    dispatcher: Arc<Dispatcher>,
    plan: Arc<CalcPlan>,
    inputs: Vec<DatasetResource>,
    output: DatasetResource,
    blocks: BlockPlan,
    progress: Option<ProgressSink>,
    /// Cancelled on the first failure; blocks check it before computing and
    /// before writing.
    abort: CancellationToken,
}

impl CalcTask {
    /// Block layout this calc will use.
    pub fn blocks(&self) -> BlockPlan {
        self.blocks
    }

    /// Runs every block, keeping up to one per worker in flight.
    ///
    /// The first failure stops the calc. That can be a failing block or a
    /// failing progress sink. No further blocks are submitted, blocks still
    /// in flight are aborted and waited for, then the error is returned.
    /// Once this returns, no block of the calc computes or writes anything.
    /// Blocks written before the failure stay written.
    pub async fn wait(mut self) -> Result<CalcSummary, OperationError> {
        let total = self.blocks.len();
        let slots = self.dispatcher.workers().max(1);
        let mut windows = self.blocks.iter().collect::<Vec<_>>().into_iter();
        let mut pending = FuturesUnordered::new();
        let mut summary = CalcSummary::default();
        let mut failure = None;

        while failure.is_none() {
            while pending.len() < slots {
                let Some(window) = windows.next() else { break };
                match self.submit_block(window) {
                    Ok(handle) => pending.push(handle.wait()),
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }
            if failure.is_some() {
                break;
            }
            let Some(result) = pending.next().await else { break };
            match result {
                Ok(stats) => {
                    summary.absorb(stats);
                    if let Err(err) = self.report(summary.blocks as f64 / total as f64) {
                        failure = Some(err);
                    }
                }
                Err(err) => failure = Some(err),
            }
        }

        if let Some(err) = failure {
            self.abort.cancel();
            let in_flight = pending.len();
            while pending.next().await.is_some() {}
            debug!(
                blocks = summary.blocks,
                in_flight,
                error = %err,
                "Calc stopped"
            );
            return Err(err);
        }

        debug!(
            blocks = summary.blocks,
            elements = summary.elements,
            no_data = summary.no_data_elements,
            "Calc finished"
        );
        Ok(summary)
    }

    /// Blocks the current thread until the calc finishes.
    pub fn wait_blocking(self) -> Result<CalcSummary, OperationError> {
        futures::executor::block_on(self.wait())
    }

    fn submit_block(&self, window: Window) -> Result<TaskHandle<BlockStats>, OperationError> {
        let request = self
            .inputs
            .iter()
            .fold(TaskRequest::new(OperationKind::CalcBlock), |request, r| {
                request.input(r)
            })
            .output(&self.output);
        let plan = Arc::clone(&self.plan);
        let abort = self.abort.clone();
        self.dispatcher.submit(request, move |ctx| {
            let values = {
                let shared = ctx.lock_shared()?;
                plan.read_inputs(&shared.sources(), shared.output(), window)?
            };
            if abort.is_cancelled() {
                return Err(aborted());
            }
            let (output, stats) = plan.compute(&values, window)?;
            if abort.is_cancelled() {
                return Err(aborted());
            }
            let mut destination = ctx.output()?.write()?;
            plan.write(&mut **destination, window, &output)?;
            Ok(stats)
        })
    }

    fn report(&mut self, fraction: f64) -> Result<(), OperationError> {
        let Some(sink) = self.progress.as_mut() else {
            return Ok(());
        };
        let note = ProgressNotification {
            fraction,
            message: None,
        };
        match catch_unwind(AssertUnwindSafe(|| sink(&note))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(OperationError::callback(err.as_ref())),
            Err(panic) => Err(OperationError::callback_panic(panic.as_ref())),
        }
    }
}

fn aborted() -> OperationError {
    OperationError::native("calc aborted")
}

impl Drop for CalcTask {
    fn drop(&mut self) {
        // Blocks of an abandoned calc stop before computing or writing.
        self.abort.cancel();
    }
}

impl IntoFuture for CalcTask {
    type Output = Result<CalcSummary, OperationError>;
    type IntoFuture = BoxFuture<'static, Result<CalcSummary, OperationError>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

impl std::fmt::Debug for CalcTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalcTask")
            .field("plan", &self.plan)
            .field("blocks", &self.blocks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatcherConfig;
    use crate::native::memory::{DatasetData, MemoryEngine};
    use crate::native::{DataType, RasterSize, Window};
    use crate::toolkit::Toolkit;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn toolkit() -> Toolkit {
        let engine = MemoryEngine::new();
        let block = RasterSize::new(2, 2);
        engine.insert(
            "/calc/a.tif",
            DatasetData::raster("GTiff", RasterSize::new(5, 3), 2, DataType::Float64)
                .with_band_values(1, &[1.0, 2.0, 3.0, 4.0, 5.0])
                .with_band_values(2, &[10.0])
                .with_block_size(block),
        );
        engine.insert(
            "/calc/out.tif",
            DatasetData::raster("GTiff", RasterSize::new(5, 3), 1, DataType::Float64)
                .with_no_data(1, -1.0)
                .with_block_size(block),
        );
        engine.insert(
            "/calc/small.tif",
            DatasetData::raster("GTiff", RasterSize::new(4, 3), 1, DataType::Float64),
        );
        Toolkit::new(Arc::new(engine), DispatcherConfig::default().with_workers(3))
    }

    fn update(toolkit: &Toolkit, path: &str) -> crate::toolkit::Dataset {
        toolkit
            .open_with(path, crate::native::OpenMode::Update, None, None)
            .unwrap()
    }

    #[test]
    fn test_calc_writes_every_block() {
        let toolkit = toolkit();
        let a = toolkit.open("/calc/a.tif").unwrap();
        let out = update(&toolkit, "/calc/out.tif");
        let bindings = CalcBindings::new()
            .bind("x", &a.band(1).unwrap())
            .bind("y", &a.band(2).unwrap());
        let dest = out.band(1).unwrap();

        let summary = calc(
            &bindings,
            &dest,
            CalcFunction::element(|args| Ok(args["x"] * args["y"])),
            CalcOptions::new(),
        )
        .unwrap();

        assert_eq!(summary.blocks, 6);
        assert_eq!(summary.elements, 15);
        let values = dest.read(Window::new(0, 0, 5, 3)).unwrap();
        assert_eq!(&values[..5], &[10.0, 20.0, 30.0, 40.0, 50.0]);
        assert_eq!(values.len(), 15);
    }

    #[test]
    fn test_dimension_mismatch_is_rejected_before_any_block() {
        let toolkit = toolkit();
        let small = toolkit.open("/calc/small.tif").unwrap();
        let out = update(&toolkit, "/calc/out.tif");
        let bindings = CalcBindings::new().bind("s", &small.band(1).unwrap());
        let before = toolkit.dispatcher().stats().submitted;

        let err = calc_async(
            &bindings,
            &out.band(1).unwrap(),
            CalcFunction::element(|_| Ok(0.0)),
            CalcOptions::new(),
        )
        .unwrap_err();

        assert!(err.is_invalid_argument());
        assert!(err.to_string().contains("dimensions must match"));
        assert_eq!(toolkit.dispatcher().stats().submitted, before);
    }

    #[test]
    fn test_convert_no_data_needs_destination_no_data() {
        let toolkit = toolkit();
        let a = update(&toolkit, "/calc/a.tif");
        let bindings = CalcBindings::new().bind("x", &a.band(1).unwrap());
        let err = calc_async(
            &bindings,
            &a.band(2).unwrap(),
            CalcFunction::element(|args| Ok(args["x"])),
            CalcOptions::new().with_convert_no_data(true),
        )
        .unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn test_input_from_destination_dataset() {
        let toolkit = toolkit();
        let a = update(&toolkit, "/calc/a.tif");
        let bindings = CalcBindings::new().bind("x", &a.band(1).unwrap());
        let dest = a.band(2).unwrap();
        calc(
            &bindings,
            &dest,
            CalcFunction::element(|args| Ok(args["x"] + 0.5)),
            CalcOptions::new(),
        )
        .unwrap();
        assert_eq!(dest.read(Window::new(0, 0, 2, 1)).unwrap(), vec![1.5, 2.5]);
    }

    #[test]
    fn test_closed_input_is_resource_destroyed() {
        let toolkit = toolkit();
        let a = toolkit.open("/calc/a.tif").unwrap();
        let out = update(&toolkit, "/calc/out.tif");
        let bindings = CalcBindings::new().bind("x", &a.band(1).unwrap());
        a.close().unwrap();
        let err = calc(
            &bindings,
            &out.band(1).unwrap(),
            CalcFunction::element(|args| Ok(args["x"])),
            CalcOptions::new(),
        )
        .unwrap_err();
        assert!(err.is_resource_destroyed());
    }

    #[test]
    fn test_progress_per_block() {
        let toolkit = toolkit();
        let a = toolkit.open("/calc/a.tif").unwrap();
        let out = update(&toolkit, "/calc/out.tif");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_by_sink = Arc::clone(&seen);
        let bindings = CalcBindings::new().bind("x", &a.band(1).unwrap());

        calc(
            &bindings,
            &out.band(1).unwrap(),
            CalcFunction::element(|args| Ok(args["x"])),
            CalcOptions::new().with_progress(move |note| {
                seen_by_sink.lock().push(note.fraction);
                Ok(())
            }),
        )
        .unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 6);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.last().copied(), Some(1.0));
    }

    #[test]
    fn test_failing_progress_sink_stops_calc() {
        let toolkit = toolkit();
        let a = toolkit.open("/calc/a.tif").unwrap();
        let out = update(&toolkit, "/calc/out.tif");
        let bindings = CalcBindings::new().bind("x", &a.band(1).unwrap());
        let err = calc(
            &bindings,
            &out.band(1).unwrap(),
            CalcFunction::element(|args| Ok(args["x"])),
            CalcOptions::new().with_progress(|_| Err("enough".into())),
        )
        .unwrap_err();
        assert_eq!(err, OperationError::UserCallbackFailed("enough".into()));
    }

    #[test]
    fn test_blocks_compute_concurrently() {
        let toolkit = toolkit();
        let a = toolkit.open("/calc/a.tif").unwrap();
        let out = update(&toolkit, "/calc/out.tif");
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (active_in_fn, peak_in_fn) = (Arc::clone(&active), Arc::clone(&peak));
        let bindings = CalcBindings::new().bind("x", &a.band(1).unwrap());

        let summary = calc(
            &bindings,
            &out.band(1).unwrap(),
            CalcFunction::block(move |block| {
                let now = active_in_fn.fetch_add(1, Ordering::SeqCst) + 1;
                peak_in_fn.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(50));
                active_in_fn.fetch_sub(1, Ordering::SeqCst);
                Ok(block.inputs()[0].to_vec())
            }),
            CalcOptions::new(),
        )
        .unwrap();

        assert_eq!(summary.blocks, 6);
        // Three workers share one destination; the function must not run one
        // block at a time.
        assert!(peak.load(Ordering::SeqCst) > 1);
    }

    #[test]
    fn test_no_block_runs_after_calc_returns_error() {
        let toolkit = toolkit();
        let a = toolkit.open("/calc/a.tif").unwrap();
        let out = update(&toolkit, "/calc/out.tif");
        let dest = out.band(1).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let bindings = CalcBindings::new().bind("x", &a.band(1).unwrap());

        let err = calc(
            &bindings,
            &dest,
            CalcFunction::block(move |block| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err("boom".into());
                }
                thread::sleep(Duration::from_millis(100));
                Ok(vec![7.0; block.len()])
            }),
            CalcOptions::new(),
        )
        .unwrap_err();
        assert_eq!(err, OperationError::UserCallbackFailed("boom".into()));

        let calls_at_return = calls.load(Ordering::SeqCst);
        let written = dest.read(Window::new(0, 0, 5, 3)).unwrap();
        thread::sleep(Duration::from_millis(300));
        assert_eq!(calls.load(Ordering::SeqCst), calls_at_return);
        assert_eq!(dest.read(Window::new(0, 0, 5, 3)).unwrap(), written);
    }

    #[test]
    fn test_failing_sink_leaves_no_block_in_flight() {
        let toolkit = toolkit();
        let a = toolkit.open("/calc/a.tif").unwrap();
        let out = update(&toolkit, "/calc/out.tif");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let bindings = CalcBindings::new().bind("x", &a.band(1).unwrap());

        let err = calc(
            &bindings,
            &out.band(1).unwrap(),
            CalcFunction::block(move |block| {
                counter.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                Ok(block.inputs()[0].to_vec())
            }),
            CalcOptions::new().with_progress(|_| Err("enough".into())),
        )
        .unwrap_err();
        assert_eq!(err, OperationError::UserCallbackFailed("enough".into()));

        let calls_at_return = calls.load(Ordering::SeqCst);
        assert!(calls_at_return < 6);
        thread::sleep(Duration::from_millis(150));
        assert_eq!(calls.load(Ordering::SeqCst), calls_at_return);
    }

    #[tokio::test]
    async fn test_calc_task_is_awaitable() {
        let toolkit = toolkit();
        let a = toolkit.open("/calc/a.tif").unwrap();
        let out = update(&toolkit, "/calc/out.tif");
        let bindings = CalcBindings::new().bind("x", &a.band(1).unwrap());
        let task = calc_async(
            &bindings,
            &out.band(1).unwrap(),
            CalcFunction::block(|block| Ok(block.inputs()[0].iter().map(|v| v * 2.0).collect())),
            CalcOptions::new(),
        )
        .unwrap();
        assert_eq!(task.blocks().len(), 6);
        let summary = task.await.unwrap();
        assert_eq!(summary.elements, 15);
    }
}
