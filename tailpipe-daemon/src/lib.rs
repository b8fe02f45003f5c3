//! tailpipe daemon library.
//!
//! This library exposes internal modules for integration testing.
//! In production, `tailpipe-daemon` is used as the `tailpipe` binary (main.rs).

pub mod cli;
pub mod logging;
pub mod metrics_server;
pub mod orchestrator;
pub mod pid_file;
