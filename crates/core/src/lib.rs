//! `printopt-core`: shared building blocks for the task engine.
//!
//! This crate contains **pure** primitives (no IO, no runtime).

pub mod error;
pub mod id;
pub mod lane;

pub use error::{DomainError, DomainResult};
pub use id::{EntityKey, TaskId};
pub use lane::Lane;
