//! Tool catalog and execution pipeline.
//!
//! The agent runtime hands canonical [`proto::ToolCall`]s to
//! [`ToolPipeline::execute`], which validates and reshapes the arguments,
//! serializes them for the worker's scripting runtime, dispatches them over
//! the worker transport, and interprets the reply.

pub mod catalog;
pub mod envelope;
pub mod literal;
pub mod pipeline;
pub mod reshape;
pub mod validate;

pub use catalog::{CATALOG, Dispatch, FieldKind, FieldSpec, Reshape, ToolSpec, definitions};
pub use literal::to_table_literal;
pub use pipeline::{PreparedCall, ToolPipeline, prepare};
