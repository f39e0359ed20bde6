//! The utility operations: translate, vector translate, info and warp.
//!
//! All four share one path: validate on the caller's thread, submit one task
//! holding every source shared and the in-place destination (if any)
//! exclusive, run the engine with the task's progress bridge, and map the
//! engine's output back to a handle or report.

use super::dataset::Dataset;
use super::options::{Destination, UtilityOptions};
use super::Toolkit;
use crate::dispatch::{lock_resources, Dispatcher, TaskHandle, TaskParts, TaskRequest};
use crate::error::OperationError;
use crate::native::{ExecuteOutput, ExecuteRequest, NativeDestination, OperationKind};
use std::sync::Arc;

/// Everything one utility invocation needs, captured for the worker.
struct Invocation {
    kind: OperationKind,
    path: Option<String>,
    target: Option<Dataset>,
    sources: Vec<Dataset>,
    args: Vec<String>,
    options: UtilityOptions,
}

impl Invocation {
    fn new(kind: OperationKind, sources: &[&Dataset], args: &[&str], options: UtilityOptions) -> Self {
        Self {
            kind,
            path: None,
            target: None,
            sources: sources.iter().map(|ds| (*ds).clone()).collect(),
            args: args.iter().map(|a| a.to_string()).collect(),
            options,
        }
    }

    fn destination(mut self, destination: Destination) -> Self {
        match destination {
            Destination::Path(path) => self.path = Some(path),
            Destination::Dataset(ds) => self.target = Some(ds),
        }
        self
    }
}

impl Toolkit {
    // =========================================================================
    // translate
    // =========================================================================

    /// Converts a raster, creating `destination` or updating it in place.
    ///
    /// Recognized options include `-b`, `-of`, `-ot`, `-a_nodata`, `-a_srs`
    /// and `-outsize`. When `destination` is an existing dataset, that same
    /// dataset is returned.
    pub fn translate(
        &self,
        destination: impl Into<Destination>,
        source: &Dataset,
        args: &[&str],
        options: UtilityOptions,
    ) -> Result<Dataset, OperationError> {
        self.translate_async(destination, source, args, options)?
            .wait_blocking()
    }

    pub fn translate_async(
        &self,
        destination: impl Into<Destination>,
        source: &Dataset,
        args: &[&str],
        options: UtilityOptions,
    ) -> Result<TaskHandle<Dataset>, OperationError> {
        let invocation = Invocation::new(OperationKind::Translate, &[source], args, options)
            .destination(destination.into());
        self.dispatch_dataset(invocation)
    }

    // =========================================================================
    // vector translate
    // =========================================================================

    /// Converts vector data, creating `destination` or appending to it.
    ///
    /// Recognized options include `-f`, `-nln`, `-select`, `-where` and
    /// `-limit`. Layer, feature and field content is passed through untouched.
    pub fn vector_translate(
        &self,
        destination: impl Into<Destination>,
        source: &Dataset,
        args: &[&str],
        options: UtilityOptions,
    ) -> Result<Dataset, OperationError> {
        self.vector_translate_async(destination, source, args, options)?
            .wait_blocking()
    }

    pub fn vector_translate_async(
        &self,
        destination: impl Into<Destination>,
        source: &Dataset,
        args: &[&str],
        options: UtilityOptions,
    ) -> Result<TaskHandle<Dataset>, OperationError> {
        let invocation = Invocation::new(OperationKind::VectorTranslate, &[source], args, options)
            .destination(destination.into());
        self.dispatch_dataset(invocation)
    }

    // =========================================================================
    // info
    // =========================================================================

    /// Describes a dataset. `-json` switches to a JSON report.
    pub fn info(&self, source: &Dataset, args: &[&str]) -> Result<String, OperationError> {
        self.info_async(source, args)?.wait_blocking()
    }

    pub fn info_async(
        &self,
        source: &Dataset,
        args: &[&str],
    ) -> Result<TaskHandle<String>, OperationError> {
        let invocation = Invocation::new(OperationKind::Info, &[source], args, UtilityOptions::new());
        self.dispatch(invocation, |output, _| match output {
            ExecuteOutput::Report(text) => Ok(text),
            other => Err(unexpected(OperationKind::Info, &other)),
        })
    }

    // =========================================================================
    // warp
    // =========================================================================

    /// Mosaics and resamples `sources` onto a destination.
    ///
    /// The destination is either a new dataset at `destination` or the
    /// existing `target`, which is updated in place and returned. Fails with
    /// [`OperationError::InvalidArgument`] when neither is given or when
    /// `sources` is empty.
    pub fn warp(
        &self,
        destination: Option<&str>,
        target: Option<&Dataset>,
        sources: &[&Dataset],
        args: &[&str],
        options: UtilityOptions,
    ) -> Result<Dataset, OperationError> {
        self.warp_async(destination, target, sources, args, options)?
            .wait_blocking()
    }

    pub fn warp_async(
        &self,
        destination: Option<&str>,
        target: Option<&Dataset>,
        sources: &[&Dataset],
        args: &[&str],
        options: UtilityOptions,
    ) -> Result<TaskHandle<Dataset>, OperationError> {
        let destination = match (target, destination) {
            (Some(ds), _) => Destination::from(ds),
            (None, Some(path)) => Destination::from(path),
            (None, None) => {
                return Err(OperationError::invalid(
                    "Either a destination path or a target dataset must be given",
                ))
            }
        };
        if sources.is_empty() {
            return Err(OperationError::invalid(
                "warp needs at least one source dataset",
            ));
        }
        let invocation =
            Invocation::new(OperationKind::Warp, sources, args, options).destination(destination);
        self.dispatch_dataset(invocation)
    }

    // =========================================================================
    // Shared dispatch path
    // =========================================================================

    fn dispatch_dataset(&self, invocation: Invocation) -> Result<TaskHandle<Dataset>, OperationError> {
        let kind = invocation.kind;
        let target = invocation.target.clone();
        self.dispatch(invocation, move |output, dispatcher| match (output, target) {
            (ExecuteOutput::Created(native), _) => Ok(Dataset::from_native(native, dispatcher)),
            (ExecuteOutput::Updated, Some(target)) => Ok(target),
            (other, _) => Err(unexpected(kind, &other)),
        })
    }

    fn dispatch<T, F>(&self, invocation: Invocation, finish: F) -> Result<TaskHandle<T>, OperationError>
    where
        T: Send + 'static,
        F: FnOnce(ExecuteOutput, Arc<Dispatcher>) -> Result<T, OperationError> + Send + 'static,
    {
        let Invocation {
            kind,
            path,
            target,
            sources,
            args,
            options,
        } = invocation;

        if let Some(target) = &target {
            if sources.iter().any(|s| Dataset::same(s, target)) {
                return Err(OperationError::invalid(
                    "the destination dataset cannot also be one of the sources",
                ));
            }
        }

        let mut request = TaskRequest::new(kind).progress(options.into_progress());
        for source in &sources {
            request = request.input(source.resource());
        }
        if let Some(target) = &target {
            request = request.output(target.resource());
        }

        let engine = Arc::clone(self.engine());
        let dispatcher = Arc::clone(self.dispatcher());
        self.dispatcher().submit(request, move |ctx| {
            let TaskParts {
                inputs,
                output,
                progress,
            } = ctx.parts();
            let mut locked = lock_resources(inputs, output)?;
            let (sources, existing) = locked.split();
            let destination = match (existing, path.as_deref()) {
                (Some(ds), _) => NativeDestination::Existing(ds),
                (None, Some(path)) => NativeDestination::Path(path),
                (None, None) => NativeDestination::None,
            };
            let request = ExecuteRequest {
                kind,
                sources,
                destination,
                options: &args,
            };
            let output = engine.execute(request, &mut |fraction, message| {
                progress.emit(fraction, message)
            })?;
            drop(locked);
            finish(output, dispatcher)
        })
    }
}

fn unexpected(kind: OperationKind, output: &ExecuteOutput) -> OperationError {
    OperationError::native(format!("{kind} produced an unexpected result: {output:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatcherConfig;
    use crate::native::memory::{DatasetData, MemoryEngine};
    use crate::native::{DataType, RasterSize};

    fn toolkit() -> Toolkit {
        let engine = MemoryEngine::new();
        engine.insert(
            "/data/rgb.tif",
            DatasetData::raster("GTiff", RasterSize::new(4, 4), 3, DataType::Byte),
        );
        Toolkit::new(Arc::new(engine), DispatcherConfig::default().with_workers(2))
    }

    #[test]
    fn test_warp_requires_destination_before_sources() {
        let toolkit = toolkit();
        let err = toolkit
            .warp(None, None, &[], &[], UtilityOptions::new())
            .unwrap_err();
        assert!(err.is_invalid_argument());
        assert!(err.to_string().contains("must be given"));
    }

    #[test]
    fn test_warp_requires_sources() {
        let toolkit = toolkit();
        let err = toolkit
            .warp(Some("/out.tif"), None, &[], &[], UtilityOptions::new())
            .unwrap_err();
        assert!(err.is_invalid_argument());
        assert!(err.to_string().contains("at least one"));
    }

    #[test]
    fn test_in_place_destination_cannot_be_source() {
        let toolkit = toolkit();
        let ds = toolkit.open("/data/rgb.tif").unwrap();
        let err = toolkit
            .translate(&ds, &ds, &[], UtilityOptions::new())
            .unwrap_err();
        assert!(err.is_invalid_argument());
        assert_eq!(toolkit.dispatcher().stats().submitted, 1);
    }

    #[test]
    fn test_info_report() {
        let toolkit = toolkit();
        let ds = toolkit.open("/data/rgb.tif").unwrap();
        let report = toolkit.info(&ds, &[]).unwrap();
        assert!(report.contains("Driver: GTiff"));
        assert!(report.contains("Size is 4, 4"));
    }
}
