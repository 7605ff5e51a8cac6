//! taskq: a persistent hierarchical task queue.
//!
//! This module exports the core components for testing and integration.

pub mod cli;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod exec;
pub mod format;
pub mod logging;
pub mod payload;
pub mod queue;
pub mod types;
pub mod validate;
