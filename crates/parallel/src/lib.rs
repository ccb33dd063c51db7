//! # Habitat Parallel
//!
//! Execution strategies for habitat batch jobs.
//!
//! This crate provides:
//! - Order-preserving parallel map using Rayon (sequential without the
//!   `parallel` feature)
//! - Task runs with progress callbacks and cooperative cancellation

pub mod strategy;
pub mod task;

pub use strategy::{num_cpus, ParallelStrategy, ProcessingMode};
pub use task::{no_progress, run_tasks, CancelToken, Progress};
