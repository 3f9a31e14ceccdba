//! Local execution backend.
//!
//! Runs one build+fuzz cycle as sandboxed subprocesses on this host: the
//! generated build script first, then the fuzzer through the configured
//! container runtime with explicit resource caps. Output is streamed to a
//! durable log as it is produced, so a crash or hang never loses
//! already-captured diagnostics. The call blocks until the run exits or
//! the wall clock timeout fires.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::executor::LocalSandbox;
pub use domain::limits::ResourceLimits;
