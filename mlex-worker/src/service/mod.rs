//! Service layer
//!
//! Services hold the per-job logic the controller leans on: forwarding log
//! output incrementally and working out which assets a job produced.

pub mod assets;
pub mod log_streamer;

pub use assets::collect_assets;
pub use log_streamer::LogStreamer;
