//! Result persistence.
//!
//! Task outcomes are stored per entity (model id) rather than per task. Each
//! AI task type owns a disjoint set of fields of [`ModelMetadata`] and writes
//! them through a [`MetadataPatch`]; a merge never touches absent fields.

pub mod postgres;
pub mod record;
pub mod store;

pub use postgres::PostgresResultStore;
pub use record::{MetadataPatch, ModelMetadata};
pub use store::{InMemoryResultStore, ResultStore, ResultStoreError};
