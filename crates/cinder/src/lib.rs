//! Runtime core for the cinder bitcode interpreter.
//!
//! Hosts the pieces the execution engine and the calling-convention
//! machinery share: the runtime value model, the static type model, and
//! the addressable native memory arena with its frame-scoped stack
//! allocator.

pub mod memory;
pub mod types;
pub mod values;
