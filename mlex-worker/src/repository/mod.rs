//! Repository layer
//!
//! The registry is reached through the [`Registry`] trait so the controller
//! can be exercised against an in-memory double. [`HttpRegistry`] is the
//! production implementation backed by `mlex-client`.

mod registry;

pub use registry::{HttpRegistry, Registry};
