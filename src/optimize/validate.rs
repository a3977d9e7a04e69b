//! Passes that initialize or check a graph without rewriting it.

use super::pass::{ModelPass, PassContext, PassError};
use crate::graph::Graph;
use crate::ops::FrameworkNode;
use crate::rt_info::{keys, RtValue};

/// Re-run shape and type inference over the whole graph.
#[derive(Default)]
pub struct Validate;

impl ModelPass for Validate {
    fn name(&self) -> &str {
        "Validate"
    }

    fn run_on_model(&self, graph: &mut Graph, _ctx: &PassContext) -> Result<bool, PassError> {
        graph.validate()?;
        Ok(false)
    }
}

/// Record each node's friendly name in its `fused_names` runtime info.
///
/// Nodes that already have `fused_names` are left alone.
#[derive(Default)]
pub struct InitNodeInfo;

impl ModelPass for InitNodeInfo {
    fn name(&self) -> &str {
        "InitNodeInfo"
    }

    fn run_on_model(&self, graph: &mut Graph, _ctx: &PassContext) -> Result<bool, PassError> {
        let pending: Vec<_> = graph
            .iter()
            .filter(|(_, node)| !node.rt_info().contains(keys::FUSED_NAMES))
            .map(|(id, node)| (id, node.name().to_string()))
            .collect();
        for (id, name) in pending {
            if let Some(rt_info) = graph.rt_info_mut(id) {
                rt_info.insert(keys::FUSED_NAMES, RtValue::List(vec![name]));
            }
        }
        Ok(false)
    }
}

/// Collect the names of framework nodes in a graph and its subgraphs.
fn unconverted_nodes(graph: &Graph, names: &mut Vec<String>) {
    for (_, node) in graph.iter() {
        if let Some(fw) = node.op().downcast_ref::<FrameworkNode>() {
            names.push(format!("{} ({})", node.name(), fw.op_name));
        }
        if let Some(subgraph_op) = node.op().as_subgraph_op() {
            for body in subgraph_op.subgraphs() {
                unconverted_nodes(body, names);
            }
        }
    }
}

/// Fail if any source operator was left without a native translation.
///
/// Translation records unsupported operators as
/// [`FrameworkNode`]s so that later passes get a chance to decode them. This
/// check reports the ones that remain.
#[derive(Default)]
pub struct CheckFullyConverted;

impl ModelPass for CheckFullyConverted {
    fn name(&self) -> &str {
        "CheckFullyConverted"
    }

    fn run_on_model(&self, graph: &mut Graph, _ctx: &PassContext) -> Result<bool, PassError> {
        let mut names = Vec::new();
        unconverted_nodes(graph, &mut names);
        if names.is_empty() {
            Ok(false)
        } else {
            Err(PassError::NotFullyConverted(names))
        }
    }
}

/// Fail if any node's operator kind is not part of `opset`.
pub struct CheckOpset {
    pub opset: u32,
}

impl ModelPass for CheckOpset {
    fn name(&self) -> &str {
        "CheckOpset"
    }

    fn run_on_model(&self, graph: &mut Graph, ctx: &PassContext) -> Result<bool, PassError> {
        for id in graph.topological_order()? {
            let Some(node) = graph.node(id) else {
                continue;
            };
            let op_type = node.op_type();
            if !ctx.registry.is_in_opset(op_type, self.opset) {
                return Err(PassError::NotInOpset {
                    node: node.name().to_string(),
                    op_type,
                    opset: self.opset,
                });
            }
        }
        Ok(false)
    }
}
