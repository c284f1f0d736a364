//! Records a test runner's lifecycle hooks as a Robot Framework report.
//!
//! Directories and files become nested suites, tests become tests, and the
//! setup, body and teardown phases of a test become keywords inside it.

pub mod config;
pub mod events;
pub mod plugin;
pub mod recorder;
pub mod utils;

pub use events::{EventDriver, HostEvent, RunSummary};
pub use plugin::TraceRobotPlugin;
pub use recorder::{Recorder, TraceRecorder};
