//! Command-line style option reader shared by the utilities.

use crate::native::{NativeError, NativeResult, RasterSize};
use std::str::FromStr;

/// Walks an option list, one flag at a time.
pub(crate) struct OptionReader<'a> {
    args: &'a [String],
    pos: usize,
}

impl<'a> OptionReader<'a> {
    pub fn new(args: &'a [String]) -> Self {
        Self { args, pos: 0 }
    }

    /// Returns the next flag, or `None` at the end of the list.
    pub fn next_flag(&mut self) -> Option<&'a str> {
        let flag = self.args.get(self.pos)?;
        self.pos += 1;
        Some(flag.as_str())
    }

    /// Takes the value following `flag`.
    pub fn value(&mut self, flag: &str) -> NativeResult<&'a str> {
        let value = self.args.get(self.pos).ok_or_else(|| {
            NativeError::InvalidArgument(format!("{flag} option requires an argument"))
        })?;
        self.pos += 1;
        Ok(value.as_str())
    }

    /// Takes and parses the value following `flag`.
    pub fn parse<T: FromStr>(&mut self, flag: &str) -> NativeResult<T> {
        let value = self.value(flag)?;
        value.parse().map_err(|_| {
            NativeError::InvalidArgument(format!("Invalid value '{value}' for {flag}"))
        })
    }

    /// Takes a `<xsize> <ysize>` pair.
    pub fn size(&mut self, flag: &str) -> NativeResult<RasterSize> {
        let x = self.parse(flag)?;
        let y = self.parse(flag)?;
        if x == 0 || y == 0 {
            return Err(NativeError::InvalidArgument(format!(
                "{flag} requires non-zero sizes"
            )));
        }
        Ok(RasterSize::new(x, y))
    }
}

/// Error for a flag the utility does not know.
pub(crate) fn unknown(flag: &str) -> NativeError {
    NativeError::InvalidArgument(format!("Unknown option name '{flag}'"))
}

/// Error raised when the progress callback asks to stop.
pub(crate) fn user_terminated() -> NativeError {
    NativeError::Failed("User terminated".to_string())
}
