//! Graph rewriting.
//!
//! Rewrites are organized as passes implementing [`ModelPass`]. The building
//! blocks are:
//!
//! - [`Pattern`]s, which describe subgraphs and are matched against a value
//!   in a graph without modifying it.
//! - [`MatcherPass`], which pairs a pattern with a callback that edits the
//!   graph when the pattern matches.
//! - [`GraphRewrite`], which applies a group of matcher passes repeatedly
//!   until the graph stops changing.
//! - [`PassManager`], which runs a sequence of passes in order.
//!
//! Callbacks edit the graph through [`Graph`](crate::graph::Graph) methods
//! such as `replace_node`, which keep the graph acyclic and re-infer shapes
//! downstream of each edit.

mod constant_folding;
mod conversions;
mod decode;
mod diagnostics;
mod fusions;
mod pass;
mod pattern_matcher;
mod validate;

pub use constant_folding::ConstantFolding;
pub use conversions::{
    convert_gather7_to_gather1, convert_gather8_to_gather7, convert_opset3_to_opset2,
    convert_opset8_to_opset7, convert_reduce_to_reshape, convert_shapeof3,
    convert_softmax8_to_softmax1,
};
pub use decode::DecodeFrameworkNodes;
pub use diagnostics::{DiagnosticLevel, Diagnostics};
pub use fusions::{align_eltwise_input_ranks, gelu_fusion, hsigmoid_fusion, softmax_fusion};
pub use pass::{
    replace_with_copy, subgraph_nodes, GraphRewrite, MatcherPass, ModelPass, PassContext,
    PassError, PassManager, DEFAULT_MAX_NODE_ATTEMPTS, DEFAULT_MAX_SWEEPS,
};
pub use pattern_matcher::{
    consumers_count, has_static_rank, has_static_shape, rank_equals, type_matches, Match,
    Pattern, Predicate,
};
pub use validate::{CheckFullyConverted, CheckOpset, InitNodeInfo, Validate};
