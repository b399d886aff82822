//! `printopt-ai`
//!
//! **Responsibility:** AI subsystem boundary.
//!
//! This crate only describes *what* the engine asks of a model backend:
//! - typed requests and results (complexity, print time)
//! - the [`MetadataGenerator`] trait implemented by a backend
//! - a uniform [`AiError`]
//!
//! It performs no IO and never touches the result store.

pub mod generator;
pub mod result;

pub use generator::{MetadataGenerator, UnconfiguredGenerator};
pub use result::{
    AiError, ComplexityReport, ComplexityRequest, PrintTimeEstimate, PrintTimeRequest, non_empty,
};
