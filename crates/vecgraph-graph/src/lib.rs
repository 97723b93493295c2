//! # vecgraph-graph
//!
//! The node graph shared by ingestion and query.
//!
//! Spaces and effects are declared once and turned by [`IndexBuilder`] into a
//! content-addressed [`Dag`]. Evaluators work on projections of it: one
//! [`SchemaDag`] per entity schema and one per group of equivalent effects.

pub mod builder;
pub mod dag;
pub mod effect;
pub mod error;
pub mod node;
pub mod space;

pub use builder::{Index, IndexBuilder, SpaceNodes, MAX_DAG_DEPTH};
pub use dag::{Dag, SchemaDag};
pub use effect::{DagEffect, DagEffectGroup, EffectModifier, ResolvedSchemaReference};
pub use error::{GraphError, Result};
pub use node::{
    ChunkingConfig, EventAggregationParams, NamedFunction, Node, NodeArena, NodeId, NodeKind,
};
pub use space::{Effect, EffectFilter, Space};
