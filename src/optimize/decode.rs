use log::trace;

use super::pass::{ModelPass, PassContext, PassError};
use crate::graph::{Graph, NodeId};
use crate::ops::FrameworkNode;

/// Replace framework nodes with native operators where the registry knows
/// how to create one from the node's operator name and attributes.
///
/// The latest variant not newer than `opset` is used. Framework nodes that
/// can't be decoded, or whose decoded operator has a different number of
/// outputs, are left for [`CheckFullyConverted`](super::CheckFullyConverted)
/// to report.
pub struct DecodeFrameworkNodes {
    pub opset: u32,
}

impl DecodeFrameworkNodes {
    /// Decode node `id`, returning the ID of the replacement.
    fn decode(
        &self,
        graph: &mut Graph,
        id: NodeId,
        ctx: &PassContext,
    ) -> Result<Option<NodeId>, PassError> {
        let Some(node) = graph.node(id) else {
            return Ok(None);
        };
        let Some(fw) = node.op().downcast_ref::<FrameworkNode>() else {
            return Ok(None);
        };
        let op = match ctx.registry.create_latest(&fw.op_name, self.opset, &fw.attrs) {
            Ok(op) => op,
            Err(err) => {
                ctx.diagnostics
                    .warn(graph, id, format_args!("not decoded: {}", err));
                return Ok(None);
            }
        };
        let name = node.name().to_string();
        let inputs = node.inputs().to_vec();
        let num_outputs = node.outputs().len();

        let new_id = match graph.add_node(Some(&name), op, &inputs) {
            Ok(new_id) => new_id,
            Err(err) => {
                ctx.diagnostics
                    .warn(graph, id, format_args!("not decoded: {}", err));
                return Ok(None);
            }
        };
        let new_outputs = graph.node(new_id).map(|n| n.outputs().len());
        if new_outputs != Some(num_outputs) {
            ctx.diagnostics.warn(
                graph,
                id,
                format_args!("decoded operator has {:?} outputs", new_outputs),
            );
            graph.remove_if_unused(new_id);
            return Ok(None);
        }

        graph.replace_node(id, new_id)?;
        Ok(Some(new_id))
    }
}

impl ModelPass for DecodeFrameworkNodes {
    fn name(&self) -> &str {
        "DecodeFrameworkNodes"
    }

    fn run_on_model(&self, graph: &mut Graph, ctx: &PassContext) -> Result<bool, PassError> {
        let mut changed = false;
        for id in graph.topological_order()? {
            if let Some(new_id) = self.decode(graph, id, ctx)? {
                trace!("decoded framework node {} as node {}", id, new_id);
                changed = true;
            }
        }
        Ok(changed)
    }
}
