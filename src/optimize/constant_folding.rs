use log::trace;

use super::pass::{ModelPass, PassContext, PassError};
use crate::graph::{Graph, NodeId, OutputRef};
use crate::ops::{Constant, Parameter, ResultOp};
use crate::rt_info::keys;
use crate::tensor::Tensor;

/// Replace nodes whose outputs are known at compile time with constants.
///
/// A node is folded when all of its inputs are constants and its operator
/// can be evaluated, or when its outputs are determined by the metadata of
/// its inputs (eg. the shape of a statically shaped value). Folding runs in
/// topological order, so chains of foldable nodes collapse in one run.
///
/// Nodes marked with [`keys::DISABLE_CONST_FOLDING`] or
/// [`keys::DECOMPRESSION`] are kept, as are operators with subgraphs.
#[derive(Default)]
pub struct ConstantFolding;

impl ConstantFolding {
    /// Compute the output values of node `id`, if they are known.
    fn fold_values(
        &self,
        graph: &Graph,
        id: NodeId,
        ctx: &PassContext,
    ) -> Option<Vec<Tensor>> {
        let node = graph.node(id)?;
        let op = node.op();
        if op.downcast_ref::<Parameter>().is_some()
            || op.downcast_ref::<Constant>().is_some()
            || op.downcast_ref::<ResultOp>().is_some()
            || op.as_subgraph_op().is_some()
        {
            return None;
        }
        let rt_info = node.rt_info();
        if node.outputs().is_empty()
            || rt_info.flag(keys::DISABLE_CONST_FOLDING)
            || rt_info.flag(keys::DECOMPRESSION)
        {
            return None;
        }

        let constants: Option<Vec<&Tensor>> = node
            .inputs()
            .iter()
            .map(|&input| graph.constant_value(input))
            .collect();
        if let (Some(constants), true) = (constants, op.has_evaluate()) {
            return match op.evaluate(&constants) {
                Ok(values) if values.len() == node.outputs().len() => Some(values),
                Ok(values) => {
                    ctx.diagnostics.warn(
                        graph,
                        id,
                        format_args!(
                            "evaluation produced {} values for {} outputs",
                            values.len(),
                            node.outputs().len()
                        ),
                    );
                    None
                }
                Err(err) => {
                    ctx.diagnostics
                        .warn(graph, id, format_args!("constant folding failed: {}", err));
                    None
                }
            };
        }

        (0..node.outputs().len())
            .map(|port| graph.static_value(OutputRef::new(id, port)))
            .collect()
    }
}

impl ModelPass for ConstantFolding {
    fn name(&self) -> &str {
        "ConstantFolding"
    }

    fn run_on_model(&self, graph: &mut Graph, ctx: &PassContext) -> Result<bool, PassError> {
        let mut changed = false;
        for id in graph.topological_order()? {
            let Some(values) = self.fold_values(graph, id, ctx) else {
                continue;
            };
            let Some(name) = graph.node(id).map(|n| n.name().to_string()) else {
                continue;
            };

            ctx.diagnostics
                .info(graph, id, format_args!("folded into a constant"));
            let num_outputs = values.len();
            for (port, value) in values.into_iter().enumerate() {
                let const_name = if num_outputs > 1 {
                    format!("{}.{}", name, port)
                } else {
                    name.clone()
                };
                let constant = graph.add_constant(Some(&const_name), value);
                graph.copy_runtime_info(&[id], constant);
                graph.replace_output(OutputRef::new(id, port), constant.into())?;
            }
            trace!("folded node \"{}\"", name);
            changed = true;
        }
        Ok(changed)
    }
}
