//! Core domain types
//!
//! These structures mirror the records owned by the remote job registry.
//! The worker only ever holds read-mostly copies of them.

pub mod job;
pub mod worker;
