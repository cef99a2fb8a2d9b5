//! lockreplay - post-mortem replay of pthread lock traces
//!
//! Reconstructs mutex and rwlock ownership from a serialized trace, reports
//! lock protocol violations (double locks, invalid unlocks, tracer-flagged
//! deadlocks) and derives hold duration, acquisition latency and contention
//! statistics per lock.

pub mod anomaly;
pub mod cli;
pub mod config;
pub mod error;
pub mod event;
pub mod html_output;
pub mod json_output;
pub mod lock_stack;
pub mod mutex_tracker;
pub mod replay;
pub mod report;
pub mod rwlock_tracker;
pub mod stats;
pub mod symbols;
pub mod text_output;
pub mod trace_file;
