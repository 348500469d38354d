//! Container entrypoint library: provisioning, web server supervision,
//! refresh scheduling. Exposed for the binary and integration tests.

pub mod atomic;
pub mod batch;
pub mod command;
pub mod config;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod materialize;
pub mod monitor;
pub mod paths;
pub mod provision;
pub mod scheduler;
pub mod signal;
pub mod state;
pub mod status;
pub mod web;
