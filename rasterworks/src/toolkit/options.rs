//! Per-call configuration for the utility operations.

use super::dataset::Dataset;
use crate::dispatch::{progress_sink, ProgressNotification, ProgressSink};
use crate::error::CallbackError;

/// Configuration accepted by every utility operation.
///
/// # Example
///
/// ```
/// use rasterworks::toolkit::UtilityOptions;
///
/// let options = UtilityOptions::new().with_progress(|note| {
///     println!("{:.0}%", note.fraction * 100.0);
///     Ok(())
/// });
/// assert!(options.has_progress());
/// ```
#[derive(Default)]
pub struct UtilityOptions {
    progress: Option<ProgressSink>,
}

impl UtilityOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports progress to `sink`. An error returned by the sink aborts the
    /// operation and becomes its result.
    pub fn with_progress<F>(mut self, sink: F) -> Self
    where
        F: FnMut(&ProgressNotification) -> Result<(), CallbackError> + Send + 'static,
    {
        self.progress = Some(progress_sink(sink));
        self
    }

    pub fn has_progress(&self) -> bool {
        self.progress.is_some()
    }

    pub(crate) fn into_progress(self) -> Option<ProgressSink> {
        self.progress
    }
}

impl std::fmt::Debug for UtilityOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UtilityOptions")
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Where a utility writes its result.
#[derive(Clone, Debug)]
pub enum Destination {
    /// Create a new dataset at this path.
    Path(String),
    /// Update this dataset in place; it is returned as the result.
    Dataset(Dataset),
}

impl From<&str> for Destination {
    fn from(path: &str) -> Self {
        Self::Path(path.to_string())
    }
}

impl From<String> for Destination {
    fn from(path: String) -> Self {
        Self::Path(path)
    }
}

impl From<Dataset> for Destination {
    fn from(dataset: Dataset) -> Self {
        Self::Dataset(dataset)
    }
}

impl From<&Dataset> for Destination {
    fn from(dataset: &Dataset) -> Self {
        Self::Dataset(dataset.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_no_progress() {
        assert!(!UtilityOptions::default().has_progress());
        assert!(UtilityOptions::new().into_progress().is_none());
    }

    #[test]
    fn test_progress_sink_is_kept() {
        let options = UtilityOptions::new().with_progress(|_| Ok(()));
        assert_eq!(format!("{options:?}"), "UtilityOptions { progress: true }");
        let mut sink = options.into_progress().unwrap();
        let note = ProgressNotification {
            fraction: 0.5,
            message: None,
        };
        assert!(sink(&note).is_ok());
    }

    #[test]
    fn test_destination_from_path() {
        match Destination::from("/out.tif") {
            Destination::Path(p) => assert_eq!(p, "/out.tif"),
            Destination::Dataset(_) => panic!("expected a path"),
        }
    }
}
