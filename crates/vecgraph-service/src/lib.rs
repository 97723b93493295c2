//! # vecgraph-service
//!
//! Wires one built [`vecgraph_graph::Index`] to storage and both evaluators.
//!
//! - [`App::ingest`] evaluates entity records and writes vectors plus stored fields
//! - [`App::ingest_events`] folds events into the affected entities' vectors
//! - [`App::query`] builds a query vector and runs a k-NN search
//!
//! [`init_tracing`] and [`open_storage`] set up the process from [`vecgraph_types::Settings`].

pub mod app;
pub mod error;
pub mod request;
pub mod storage;
pub mod telemetry;

pub use app::App;
pub use error::{Result, ServiceError};
pub use request::QueryRequest;
pub use storage::open_storage;
pub use telemetry::init_tracing;
