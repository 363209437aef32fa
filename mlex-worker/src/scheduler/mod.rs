//! Scheduler layer for the worker
//!
//! This layer claims jobs from the registry and drives each one from launch
//! to its terminal status.

pub mod controller;
pub mod launch;
pub mod outcome;

pub use controller::JobController;
