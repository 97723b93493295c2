//! # vecgraph-query
//!
//! Query side of the computation graph.
//!
//! [`QueryDagCompiler`] drops the ingestion-only nodes of an index dag and
//! yields a [`QueryDag`] whose embedding nodes take caller inputs directly.
//! Evaluating it produces one vector in the layout of the stored index
//! vectors of the queried schema. Stored vectors can be fed back as inputs
//! to invert, or split with [`QueryDag::get_vector_parts`].

pub mod compiler;
pub mod dag;
pub mod error;
pub mod input;
pub mod node;

pub use compiler::QueryDagCompiler;
pub use dag::QueryDag;
pub use error::{QueryError, Result};
pub use input::{QueryInputs, QueryNodeInput};
pub use node::{QueryNode, QueryOperator};
