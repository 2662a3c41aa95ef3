//! Infrastructure layer: configuration, Redis adapters, code execution and
//! the execution worker.

pub mod config;
pub mod executor;
pub mod queue;
pub mod redis_pool;
pub mod result_store;
pub mod workers;
