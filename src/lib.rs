//! rewire is a graph IR and rewrite engine for compiling machine learning
//! models.
//!
//! A model is represented as a [`Graph`](graph::Graph): a DAG of nodes, each
//! applying an operator kind identified by a `(name, version)` pair to the
//! outputs of other nodes. Every output carries an inferred element type and
//! [`PartialShape`](rewire_shape_inference::PartialShape), which may be
//! partially dynamic. Dynamic dimensions can carry labels, so that
//! dimensions known to be equal are recognized as such even when their size
//! is unknown.
//!
//! # Compiling models
//!
//! The basic workflow is:
//!
//! 1. Describe the source model as a [`SourceModel`](frontend::SourceModel)
//!    and translate it into a graph using [`frontend::convert_model`].
//!    Operators without a translator are kept as opaque
//!    [`FrameworkNode`](ops::FrameworkNode)s.
//! 2. Compile the graph using a [`CompileSession`]. This runs a pipeline of
//!    passes which decode framework nodes, fuse common subgraphs into single
//!    operators, fold constants and convert operators to the variants of a
//!    target opset.
//! 3. Hand the compiled graph to a backend, or inspect it using
//!    [`export::ModelDescription`].
//!
//! # Writing passes
//!
//! Passes are built from the types in [`optimize`]. Most rewrites are
//! expressed as a [`Pattern`](optimize::Pattern) describing a subgraph plus a
//! callback which replaces the matched subgraph, combined into a
//! [`MatcherPass`](optimize::MatcherPass). Related matcher passes are grouped
//! into a [`GraphRewrite`](optimize::GraphRewrite) which applies them until
//! the graph stops changing.
//!
//! # Configuration
//!
//! [`CompileOptions::from_env`] reads the following environment variables:
//!
//! - `REWIRE_DIAGNOSTICS`: report optimizations through the `log` crate.
//!   `warn` reports unsuccessful optimizations and `info` reports all of
//!   them.
//! - `REWIRE_NO_FUSIONS`: disable fusion passes.
//! - `REWIRE_NO_CONSTANT_FOLDING`: disable constant folding.
//! - `REWIRE_TARGET_OPSET`: require every operator to be part of a given
//!   opset after compilation.

mod env;
mod op_registry;
mod rt_info;
mod session;
mod tensor;

pub mod export;
pub mod frontend;
pub mod graph;
pub mod operator;
pub mod ops;
pub mod optimize;

pub use op_registry::{OpRegistry, ReadOp, ReadOpError};
pub use rt_info::{keys, RtInfo, RtValue};
pub use session::{CompileError, CompileOptions, CompileSession};
pub use tensor::{Tensor, TensorData, TensorError};

pub use rewire_shape_inference as shape_inference;
