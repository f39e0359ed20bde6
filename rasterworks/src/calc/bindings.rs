//! Named inputs and the caller's function.

use crate::error::{CallbackError, OperationError};
use crate::native::Window;
use crate::toolkit::Band;
use std::collections::HashSet;
use std::fmt;
use std::ops::Index;
use std::sync::Arc;

/// Ordered mapping from argument name to input band.
///
/// # Example
///
/// ```ignore
/// let bindings = CalcBindings::new()
///     .bind("t", &temperature)
///     .bind("td", &dew_point);
/// ```
#[derive(Clone, Debug, Default)]
pub struct CalcBindings {
    entries: Vec<(String, Band)>,
}

impl CalcBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `band` to `name`. Names are checked when the calc starts.
    pub fn bind(mut self, name: impl Into<String>, band: &Band) -> Self {
        self.entries.push((name.into(), band.clone()));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Argument names in binding order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Band)> {
        self.entries.iter().map(|(name, band)| (name.as_str(), band))
    }

    /// Rejects empty sets, empty names and duplicate names.
    pub(crate) fn validate(&self) -> Result<(), OperationError> {
        if self.entries.is_empty() {
            return Err(OperationError::invalid("calc needs at least one input band"));
        }
        let mut seen = HashSet::new();
        for (name, _) in &self.entries {
            if name.is_empty() {
                return Err(OperationError::invalid("calc input names cannot be empty"));
            }
            if !seen.insert(name.as_str()) {
                return Err(OperationError::invalid(format!(
                    "calc input `{name}' is bound more than once"
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Function arguments
// =============================================================================

/// Values of every input at one element position.
#[derive(Clone, Copy)]
pub struct CalcArgs<'a> {
    names: &'a [String],
    values: &'a [f64],
}

impl<'a> CalcArgs<'a> {
    pub(crate) fn new(names: &'a [String], values: &'a [f64]) -> Self {
        Self { names, values }
    }

    /// Value of the input bound to `name`.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.values[i])
    }

    /// Like [`get`](Self::get), as an error a calc function can propagate with `?`.
    pub fn value(&self, name: &str) -> Result<f64, CallbackError> {
        self.get(name)
            .ok_or_else(|| format!("no calc input named `{name}'").into())
    }

    /// Values in binding order.
    pub fn values(&self) -> &'a [f64] {
        self.values
    }

    pub fn names(&self) -> impl Iterator<Item = &'a str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// `args["t"]`. Panics, and so fails the calc, when `name` is not bound.
impl Index<&str> for CalcArgs<'_> {
    type Output = f64;

    fn index(&self, name: &str) -> &f64 {
        match self.names.iter().position(|n| n == name) {
            Some(i) => &self.values[i],
            None => panic!("no calc input named `{name}'"),
        }
    }
}

impl fmt::Debug for CalcArgs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.names.iter().zip(self.values))
            .finish()
    }
}

/// Every input's values over one block, for vectorized functions.
pub struct CalcBlock<'a> {
    names: &'a [String],
    inputs: &'a [Vec<f64>],
    window: Window,
}

impl<'a> CalcBlock<'a> {
    pub(crate) fn new(names: &'a [String], inputs: &'a [Vec<f64>], window: Window) -> Self {
        Self {
            names,
            inputs,
            window,
        }
    }

    /// Row-major values of the input bound to `name`.
    pub fn input(&self, name: &str) -> Option<&'a [f64]> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.inputs[i].as_slice())
    }

    /// Inputs in binding order.
    pub fn inputs(&self) -> &'a [Vec<f64>] {
        self.inputs
    }

    /// Raster window this block covers.
    pub fn window(&self) -> Window {
        self.window
    }

    /// Number of elements the function must return.
    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}

// =============================================================================
// Functions
// =============================================================================

/// Per-element function.
pub type ElementFn = dyn Fn(&CalcArgs<'_>) -> Result<f64, CallbackError> + Send + Sync;

/// Per-block (vectorized) function. Must return one value per element.
pub type BlockFn = dyn Fn(&CalcBlock<'_>) -> Result<Vec<f64>, CallbackError> + Send + Sync;

/// The caller's function, applied per element or per block.
#[derive(Clone)]
pub enum CalcFunction {
    Element(Arc<ElementFn>),
    Block(Arc<BlockFn>),
}

impl CalcFunction {
    pub fn element<F>(f: F) -> Self
    where
        F: Fn(&CalcArgs<'_>) -> Result<f64, CallbackError> + Send + Sync + 'static,
    {
        Self::Element(Arc::new(f))
    }

    pub fn block<F>(f: F) -> Self
    where
        F: Fn(&CalcBlock<'_>) -> Result<Vec<f64>, CallbackError> + Send + Sync + 'static,
    {
        Self::Block(Arc::new(f))
    }
}

impl fmt::Debug for CalcFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Element(_) => write!(f, "CalcFunction::Element"),
            Self::Block(_) => write!(f, "CalcFunction::Block"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        vec!["t".to_string(), "td".to_string()]
    }

    #[test]
    fn test_args_lookup() {
        let names = names();
        let args = CalcArgs::new(&names, &[20.0, 12.5]);
        assert_eq!(args.get("td"), Some(12.5));
        assert_eq!(args.get("x"), None);
        assert_eq!(args["t"], 20.0);
        assert_eq!(args.len(), 2);
        assert_eq!(args.names().collect::<Vec<_>>(), vec!["t", "td"]);
        assert_eq!(
            args.value("x").unwrap_err().to_string(),
            "no calc input named `x'"
        );
    }

    #[test]
    #[should_panic(expected = "no calc input named `q'")]
    fn test_args_index_panics_on_unknown_name() {
        let names = names();
        let args = CalcArgs::new(&names, &[1.0, 2.0]);
        let _ = args["q"];
    }

    #[test]
    fn test_block_lookup() {
        let names = names();
        let inputs = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
        let block = CalcBlock::new(&names, &inputs, Window::new(0, 0, 2, 1));
        assert_eq!(block.input("td"), Some(&[3.0, 4.0][..]));
        assert_eq!(block.len(), 2);
        assert!(block.input("nope").is_none());
    }

    #[test]
    fn test_element_function_is_callable() {
        let f = CalcFunction::element(|args| Ok(125.0 * (args.value("t")? - args.value("td")?)));
        let names = names();
        match f {
            CalcFunction::Element(f) => {
                let out = f(&CalcArgs::new(&names, &[20.0, 19.0])).unwrap();
                assert!((out - 125.0).abs() < 1e-9);
            }
            CalcFunction::Block(_) => panic!("expected an element function"),
        }
    }

    #[test]
    fn test_empty_bindings_rejected() {
        assert!(CalcBindings::new().validate().unwrap_err().is_invalid_argument());
    }
}
