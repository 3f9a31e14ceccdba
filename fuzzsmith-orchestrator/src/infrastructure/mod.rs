pub mod generator;
pub mod remote;
pub mod status_store;
pub mod worker_pool;
