//! Passes that replace subgraphs with a single fused operator.

use std::f32::consts::{PI, SQRT_2};

use rewire_shape_inference::normalize_axis;

use super::pass::{replace_with_copy, subgraph_nodes, GraphRewrite, MatcherPass, PassError};
use super::pattern_matcher::{has_static_rank, Match, Pattern};
use crate::graph::{Graph, NodeId, OutputRef};
use crate::operator::{Attributes, Operator};
use crate::ops::{Clamp, Gelu, GeluApproximation, HSigmoid, ReduceMax, ReduceSum, Softmax, Softmax8};

/// Replace the root of a match with a new node reading `inputs`.
///
/// The new node takes the friendly name of the root and the runtime info of
/// every node between the root and `inputs`.
///
/// Returns false, leaving the graph unchanged, if the output of the new node
/// is incompatible with the root's output.
fn fuse<Op: Operator>(
    graph: &mut Graph,
    root: NodeId,
    op: Op,
    inputs: &[OutputRef],
) -> Result<bool, PassError> {
    let sources = subgraph_nodes(graph, root, inputs);
    let fused = graph.add_op(op, inputs)?;

    // The fused value must be usable wherever the root's value is.
    let root_info = graph.output_info(OutputRef::new(root, 0));
    let fused_info = graph.output_info(OutputRef::new(fused, 0));
    let compatible = match (root_info, fused_info) {
        (Some(root_info), Some(fused_info)) => root_info.merge(fused_info).is_some(),
        _ => false,
    };
    if !compatible {
        graph.remove_if_unused(fused);
        return Ok(false);
    }

    replace_with_copy(graph, root, fused, &sources)?;
    Ok(true)
}

/// Fuse the subgraph of a match into a unary operator reading symbol `x`.
fn fuse_unary<Op: Operator>(graph: &mut Graph, m: &Match, op: Op) -> Result<bool, PassError> {
    let Some(x) = m.get("x") else {
        return Ok(false);
    };
    fuse(graph, m.root().node, op, &[x])
}

fn gelu_matcher(name: &str, pattern: Pattern, approximation: GeluApproximation) -> MatcherPass {
    MatcherPass::new(name, pattern, &["x"], move |graph, m, _ctx| {
        fuse_unary(graph, m, Gelu { approximation })
    })
}

/// Fuse the expanded forms of the GELU activation into [`Gelu`].
pub fn gelu_fusion() -> GraphRewrite {
    let x = || Pattern::symbol("x");
    let erf = |input: Pattern| Pattern::unary_op("Erf", input);

    // (0.5 * x) * (1 + erf(x / sqrt(2)))
    let erf_one = (x() * 0.5) * (erf(x() / SQRT_2) + 1.0);

    // 0.5 * (x * (1 + erf(x / sqrt(2))))
    let erf_two = 0.5 * (x() * (erf(x() / SQRT_2) + 1.0));

    // x * (0.5 * (1 + erf(x / sqrt(2))))
    let erf_three = x() * (0.5 * (erf(x() / SQRT_2) + 1.0));

    // x * (0.5 + 0.5 * erf(x * (1 / sqrt(2))))
    let erf_four = x() * (0.5 + 0.5 * erf(x() * (1.0 / SQRT_2)));

    // x * (0.5 * (1 + tanh(sqrt(2 / pi) * (x + 0.044715 * x^3))))
    let cubic = Pattern::binary_op("Power", x(), 3.0);
    let inner = (2.0 / PI).sqrt() * (x() + 0.044715 * cubic);
    let tanh = x() * (0.5 * (Pattern::unary_op("Tanh", inner) + 1.0));

    GraphRewrite::new("GeluFusion")
        .with_matcher(gelu_matcher("GeluFusionWithErfOne", erf_one, GeluApproximation::Erf))
        .with_matcher(gelu_matcher("GeluFusionWithErfTwo", erf_two, GeluApproximation::Erf))
        .with_matcher(gelu_matcher(
            "GeluFusionWithErfThree",
            erf_three,
            GeluApproximation::Erf,
        ))
        .with_matcher(gelu_matcher(
            "GeluFusionWithErfFour",
            erf_four,
            GeluApproximation::Erf,
        ))
        .with_matcher(gelu_matcher("GeluFusionWithTanh", tanh, GeluApproximation::Tanh))
}

/// Return the single axis stored in a constant.
fn single_axis(graph: &Graph, axes: OutputRef) -> Option<i64> {
    match graph.constant_value(axes)?.as_i64()? {
        [axis] => Some(*axis),
        _ => None,
    }
}

/// Fuse `exp(x - max(x)) / sum(exp(x - max(x)))` into [`Softmax`].
///
/// Both reductions must keep dimensions and reduce the same single axis.
pub fn softmax_fusion() -> MatcherPass {
    let x = Pattern::symbol("x");
    let reduce_max =
        Pattern::operator("ReduceMax", [x.clone(), Pattern::const_symbol("max_axes")])
            .with_name("reduce_max");
    let exp = Pattern::unary_op("Exp", Pattern::binary_op("Subtract", x, reduce_max))
        .with_name("exp");
    let reduce_sum =
        Pattern::operator("ReduceSum", [exp.clone(), Pattern::const_symbol("sum_axes")])
            .with_name("reduce_sum");
    let pattern = Pattern::binary_op("Divide", exp, reduce_sum);

    MatcherPass::new(
        "SoftmaxFusion",
        pattern,
        &["x", "max_axes", "sum_axes", "reduce_max", "reduce_sum"],
        |graph, m, _ctx| {
            let (Some(x), Some(max_axes), Some(sum_axes)) =
                (m.get("x"), m.get("max_axes"), m.get("sum_axes"))
            else {
                return Ok(false);
            };
            let keeps_dims = |key: &str| {
                let Some(node) = m.node(key).and_then(|id| graph.node(id)) else {
                    return false;
                };
                node.op()
                    .downcast_ref::<ReduceMax>()
                    .map(|op| op.keep_dims)
                    .or_else(|| node.op().downcast_ref::<ReduceSum>().map(|op| op.keep_dims))
                    .unwrap_or(false)
            };
            if !keeps_dims("reduce_max") || !keeps_dims("reduce_sum") {
                return Ok(false);
            }
            let (Some(max_axis), Some(sum_axis)) =
                (single_axis(graph, max_axes), single_axis(graph, sum_axes))
            else {
                return Ok(false);
            };

            let root = m.root().node;
            let rank = graph.output_info(x).and_then(|info| info.shape.rank());
            match rank {
                Some(rank) => {
                    let (Ok(max_axis), Ok(sum_axis)) =
                        (normalize_axis(max_axis, rank), normalize_axis(sum_axis, rank))
                    else {
                        return Ok(false);
                    };
                    if max_axis != sum_axis {
                        return Ok(false);
                    }
                    fuse(graph, root, Softmax { axis: max_axis }, &[x])
                }
                None if max_axis != sum_axis => Ok(false),
                None if max_axis < 0 => fuse(graph, root, Softmax8 { axis: max_axis }, &[x]),
                None => fuse(graph, root, Softmax { axis: max_axis as usize }, &[x]),
            }
        },
    )
}

/// Fuse the piecewise-linear forms of hard sigmoid into [`HSigmoid`].
pub fn hsigmoid_fusion() -> GraphRewrite {
    let x_plus_3 = || Pattern::symbol("x") + 3.0;
    let min6 = |input: Pattern| Pattern::binary_op("Minimum", input, 6.0);

    // min(relu(x + 3), 6) / 6
    let relu_div = min6(Pattern::unary_op("Relu", x_plus_3())) / 6.0;

    // min(relu(x + 3), 6) * (1 / 6)
    let relu_mul = min6(Pattern::unary_op("Relu", x_plus_3())) * (1.0 / 6.0);

    // min(max(x + 3, 0), 6) * (1 / 6)
    let without_relu = min6(Pattern::binary_op("Maximum", x_plus_3(), 0.0)) * (1.0 / 6.0);

    let clamp = || Pattern::unary_op("Clamp", x_plus_3()).with_name("clamp");

    // clamp(x + 3, 0, 6) * (1 / 6)
    let clamp_mul = clamp() * (1.0 / 6.0);

    // clamp(x + 3, 0, 6) / 6
    let clamp_div = clamp() / 6.0;

    let plain = |name: &str, pattern: Pattern| {
        MatcherPass::new(name, pattern, &["x"], |graph, m, _ctx| {
            fuse_unary(graph, m, HSigmoid)
        })
    };
    let clamped = |name: &str, pattern: Pattern| {
        MatcherPass::new(name, pattern, &["x", "clamp"], |graph, m, _ctx| {
            let in_range = m
                .node("clamp")
                .and_then(|id| graph.node(id))
                .and_then(|node| node.op().downcast_ref::<Clamp>().cloned())
                .is_some_and(|clamp| clamp.min == 0. && clamp.max == 6.);
            if !in_range {
                return Ok(false);
            }
            fuse_unary(graph, m, HSigmoid)
        })
    };

    GraphRewrite::new("HSigmoidFusion")
        .with_matcher(plain("HSigmoidFusionWithReluDiv", relu_div))
        .with_matcher(plain("HSigmoidFusionWithReluMul", relu_mul))
        .with_matcher(plain("HSigmoidFusionWithoutRelu", without_relu))
        .with_matcher(clamped("HSigmoidFusionWithClampMul", clamp_mul))
        .with_matcher(clamped("HSigmoidFusionWithClampDiv", clamp_div))
}

/// Operators whose constant inputs are padded to the output rank.
const ELTWISE_OPS: [&str; 9] = [
    "Add",
    "Subtract",
    "Multiply",
    "Divide",
    "Power",
    "Maximum",
    "Minimum",
    "Equal",
    "FakeQuantize",
];

/// Reshape lower-rank constant inputs of broadcasting elementwise operators
/// so that every constant has the rank of the output.
///
/// Leading dimensions of size 1 are added, which does not change the result
/// under numpy broadcasting. This pass always reports that the graph is
/// unchanged.
pub fn align_eltwise_input_ranks() -> MatcherPass {
    let pattern = Pattern::any_of(
        ELTWISE_OPS
            .iter()
            .map(|&name| Pattern::operator_any_inputs(name).with_predicate(has_static_rank()))
            .collect::<Vec<_>>(),
    );

    MatcherPass::new("AlignEltwiseInputRanks", pattern, &[], |graph, m, _ctx| {
        let root = m.root().node;
        let Some(node) = graph.node(root) else {
            return Ok(false);
        };
        let attrs = Attributes::from_op(node.op().as_ref());
        if attrs.get_string("auto_broadcast") != Some("numpy") {
            return Ok(false);
        }
        let Some(rank) = node.output_info(0).and_then(|info| info.shape.rank()) else {
            return Ok(false);
        };

        let mut updates = Vec::new();
        for (index, &input) in node.inputs().iter().enumerate() {
            let Some(value) = graph.constant_value(input) else {
                continue;
            };
            if value.ndim() >= rank {
                continue;
            }
            let mut shape = vec![1; rank - value.ndim()];
            shape.extend_from_slice(value.shape());
            let Ok(reshaped) = value.clone().reshape(shape) else {
                continue;
            };
            let name = graph.node(input.node).map(|n| n.name().to_string());
            updates.push((index, input.node, name, reshaped));
        }

        for (index, old, name, value) in updates {
            let new = graph.add_constant(name.as_deref(), value);
            graph.copy_runtime_info(&[old], new);
            graph.set_input(root, index, new.into())?;
        }
        Ok(false)
    })
}
