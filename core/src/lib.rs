// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

//! Core types and helpers shared by the mirfill crates.
//!
//! The `notify` module, which depends on `anyhow`, `clap`, and `termcolor`,
//! is only available when the `notifications` feature is enabled.

pub use ndarray::{self, Array, Array2, Array3};
pub use num_complex::Complex;

pub mod io;

#[cfg(feature = "notifications")]
#[macro_use]
pub mod notify;

/// A “chained try” macro.
///
/// Attempts an operation that returns a Result and returns its Ok value if
/// the operation is successful. If not, it returns an `anyhow::Error` that
/// wraps the original error with explanatory text formatted using the
/// `format!` macro. Example:
///
/// ```rust,ignore
/// ctry!(write!(myfile, "hello"); "couldn't write to {}", myfile_path);
/// ```
///
/// Note that the operation to be attempted and the arguments to `format!` are
/// separated by a semicolon within the `ctry!()` parentheses.
#[cfg(feature = "notifications")]
#[macro_export]
macro_rules! ctry {
    ($op:expr ; $( $chain_fmt_args:expr ),*) => {
        {
            use anyhow::Context;
            $op.with_context(|| format!($( $chain_fmt_args ),*))?
        }
    }
}
