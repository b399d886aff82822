//! `printopt-api`
//!
//! HTTP surface and process wiring of the task engine: submission and
//! polling endpoints, plus the worker and beat roles of the binary.

pub mod app;
pub mod config;
pub mod dev;
