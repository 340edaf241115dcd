//! Shared data model for the benchmark orchestrator: the entities of
//! §3 of the specification (Experiment, Profile, Pair, Workload,
//! CoreAssignment, SampleSeries) plus the invocation `Config`.
//!
//! This crate has no I/O of its own; it is pure types, parsing, and
//! validation so every other crate can depend on it without pulling in
//! cluster or shell concerns.

pub mod cancel;
pub mod config;
pub mod core_assignment;
pub mod experiment;
pub mod pair;
pub mod profile;
pub mod sample;
pub mod workload;

pub use cancel::CancelToken;
pub use config::{Config, ConfigError};
pub use core_assignment::CoreAssignment;
pub use experiment::ExperimentId;
pub use pair::{Pair, PairError};
pub use profile::{FlowMode, Profile, ProfileParseError};
pub use sample::SampleSeries;
pub use workload::{Workload, WorkloadError};
