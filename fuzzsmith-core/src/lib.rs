//! Core domain model and shared services for fuzzsmith.
//!
//! This crate holds everything the execution backends and the orchestrator
//! agree on: the job and result model, the durable status projection, the
//! backend and generator trait seams, configuration loading, the fuzzer log
//! metrics extractor, and the transient-failure retry controller.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod logging;
pub mod paths;

pub use config::Config;
pub use logging::init_tracing;
