//! Job orchestration for fuzzsmith.
//!
//! Drives submitted jobs through generate → build → run → analyze cycles
//! on a bounded worker pool, keeps the durable status store current after
//! every stage, and hides the local/remote execution split behind one
//! backend seam. Callers interact through [`application::service::FuzzService`]
//! and never see internal file layouts.

pub mod app;
pub mod application;
pub mod infrastructure;

pub use app::App;
pub use application::service::FuzzService;
