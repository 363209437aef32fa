//! Data Transfer Objects for registry communication
//!
//! Request bodies that only exist on the wire between the worker and the
//! job registry.

pub mod job;
