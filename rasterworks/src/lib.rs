//! rasterworks - raster and vector processing off the caller's thread
//!
//! This library wraps a native raster/vector engine behind handles that are
//! safe to share between threads, runs every blocking native call on a
//! bounded worker pool, and offers each operation in a blocking and an
//! awaitable form.
//!
//! # High-Level API
//!
//! The [`toolkit`] module is the entry point; [`calc`] adds block-wise
//! raster algebra on top of it:
//!
//! ```ignore
//! use rasterworks::calc::{calc, CalcBindings, CalcFunction, CalcOptions};
//! use rasterworks::toolkit::{Toolkit, UtilityOptions};
//!
//! let toolkit = Toolkit::new(engine, DispatcherConfig::default());
//! let source = toolkit.open("/data/dem.tif")?;
//! let copy = toolkit.translate_async("/data/copy.tif", &source, &[], UtilityOptions::new())?.await?;
//!
//! let bindings = CalcBindings::new().bind("z", &copy.band(1)?);
//! calc(&bindings, &copy.band(1)?, CalcFunction::element(|a| Ok(a["z"] * 2.0)), CalcOptions::new())?;
//! ```

pub mod calc;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod native;
pub mod resource;
pub mod toolkit;

pub use error::{CallbackError, OperationError};

/// Version of the rasterworks library.
///
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
        assert_eq!(VERSION.split('.').count(), 3);
    }
}
