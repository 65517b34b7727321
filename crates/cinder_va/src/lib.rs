//! AMD64 System V `va_list` marshaling for the cinder interpreter.
//!
//! Interpreted bitcode that calls variadic functions must observe the
//! exact memory layout a native compiler would produce for
//! `va_start`/`va_arg`/`va_copy`/`va_end`. This crate classifies call
//! arguments into the register save area and the overflow (stack) area,
//! tracks the cursors a `va_list` carries through a call, and can
//! materialize a byte-exact native image of the whole structure on
//! demand (address taken, handed to native code).

pub mod abi;
pub mod area;
pub mod convert;
pub mod error;
pub mod foreign;
mod native;
pub mod va_list;

pub use error::{VaError, VaResult};
pub use foreign::ForeignVaList;
pub use va_list::VaList;
