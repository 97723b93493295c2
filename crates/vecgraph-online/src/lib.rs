//! # vecgraph-online
//!
//! Ingestion side of the computation graph.
//!
//! The [`OnlineSchemaDagCompiler`] turns each schema projection of a
//! [`vecgraph_graph::Dag`] into level-ordered online nodes. The
//! [`OnlineDagEvaluator`] runs record batches through them and applies events
//! per effect group, folding affecting vectors into stored aggregates with
//! time decay.
//!
//! All writes of one evaluation are staged in an [`EntityCache`] and reach
//! storage in a single batch.

pub mod compiler;
pub mod decay;
pub mod entity_cache;
pub mod error;
pub mod evaluator;
pub mod event;
pub mod executor;
pub mod node;
pub mod record;

pub use compiler::{OnlineSchemaDag, OnlineSchemaDagCompiler};
pub use decay::{DecayStrategy, LinearDecay};
pub use entity_cache::EntityCache;
pub use error::{OnlineError, Result};
pub use evaluator::{GroupGuards, OnlineDagEvaluator};
pub use event::{EventAggregator, EventMetadata, EventMetadataHandler};
pub use executor::{ConcurrentExecutor, MAX_WORKER_COUNT};
pub use node::{split_text, NodeResults, OnlineNode, OnlineOperator, ORIGIN_ID_FIELD};
pub use record::{EvaluationResult, EventRecord, OnlineInput, ParsedRecord};
