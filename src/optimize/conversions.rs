//! Passes that lower operators to simpler or older equivalents.

use rewire_shape_inference::{normalize_axis, ElementType};

use super::pass::{replace_with_copy, GraphRewrite, MatcherPass, PassError};
use super::pattern_matcher::{has_static_shape, Match, Pattern};
use crate::graph::{Graph, NodeId, OutputRef};
use crate::operator::Operator;
use crate::ops::{Convert, Gather, Gather7, Gather8, Reshape, ShapeOf, ShapeOf3, Softmax, Softmax8};
use crate::tensor::Tensor;

/// Return the operator of a match's root, if it has type `T`.
fn root_op<'a, T: 'static>(graph: &'a Graph, m: &Match) -> Option<&'a T> {
    graph.node(m.root().node)?.op().downcast_ref::<T>()
}

/// Replace `root` with a new operator node reading `inputs`.
fn replace_op<Op: Operator>(
    graph: &mut Graph,
    root: NodeId,
    op: Op,
    inputs: &[OutputRef],
) -> Result<bool, PassError> {
    let new = graph.add_op(op, inputs)?;
    replace_with_copy(graph, root, new, &[root])?;
    Ok(true)
}

const REDUCTIONS: [(&str, &str); 6] = [
    ("ConvertReduceMeanToReshape", "ReduceMean"),
    ("ConvertReduceSumToReshape", "ReduceSum"),
    ("ConvertReduceMaxToReshape", "ReduceMax"),
    ("ConvertReduceMinToReshape", "ReduceMin"),
    ("ConvertReduceLogicalAndToReshape", "ReduceLogicalAnd"),
    ("ConvertReduceLogicalOrToReshape", "ReduceLogicalOr"),
];

/// Maximum input rank for which a reduction is turned into a reshape.
const MAX_RESHAPE_RANK: usize = 6;

/// Replace reductions that don't change the number of elements with a
/// [`Reshape`] to the output shape.
///
/// Input and output shapes must be static.
pub fn convert_reduce_to_reshape() -> GraphRewrite {
    let mut rewrite = GraphRewrite::new("ConvertReduceToReshape");
    for (pass_name, op_name) in REDUCTIONS {
        let pattern = Pattern::operator(
            op_name,
            [
                Pattern::symbol("data").with_predicate(has_static_shape()),
                Pattern::any(),
            ],
        )
        .with_predicate(has_static_shape());

        rewrite.add_matcher(MatcherPass::new(
            pass_name,
            pattern,
            &["data"],
            |graph, m, _ctx| {
                let Some(data) = m.get("data") else {
                    return Ok(false);
                };
                let input_shape = graph.output_info(data).and_then(|i| i.shape.to_shape());
                let output_shape = graph.output_info(m.root()).and_then(|i| i.shape.to_shape());
                let (Some(input_shape), Some(output_shape)) = (input_shape, output_shape) else {
                    return Ok(false);
                };
                let redundant = input_shape.iter().product::<usize>()
                    == output_shape.iter().product::<usize>();
                if !redundant || input_shape.len() >= MAX_RESHAPE_RANK {
                    return Ok(false);
                }

                let target: Vec<i64> = output_shape.iter().map(|&d| d as i64).collect();
                let target = graph.add_constant(None, Tensor::vector_i64(target));
                replace_op(
                    graph,
                    m.root().node,
                    Reshape { special_zero: true },
                    &[data, target.into()],
                )
            },
        ));
    }
    rewrite
}

fn gather_pattern() -> Pattern {
    Pattern::operator(
        "Gather",
        [
            Pattern::symbol("data"),
            Pattern::symbol("indices"),
            Pattern::const_symbol("axis"),
        ],
    )
}

/// Replace [`Gather8`] with [`Gather7`].
///
/// Negative indices are resolved against the size of the gathered axis, which
/// must then be static. Non-constant indices are left alone, since they may
/// be negative at run time.
pub fn convert_gather8_to_gather7() -> MatcherPass {
    MatcherPass::new(
        "ConvertGather8ToGather7",
        gather_pattern(),
        &["data", "indices", "axis"],
        |graph, m, _ctx| {
            let Some(batch_dims) = root_op::<Gather8>(graph, m).map(|op| op.batch_dims) else {
                return Ok(false);
            };
            let (Some(data), Some(indices), Some(axis)) =
                (m.get("data"), m.get("indices"), m.get("axis"))
            else {
                return Ok(false);
            };
            let Some(index_values) = graph.constant_value(indices).cloned() else {
                return Ok(false);
            };
            let Some(index_data) = index_values.as_i64() else {
                return Ok(false);
            };

            let mut new_indices = indices;
            if index_data.iter().any(|&i| i < 0) {
                let axis_len = graph
                    .constant_value(axis)
                    .and_then(|t| t.item_i64())
                    .zip(graph.output_info(data))
                    .and_then(|(axis, info)| {
                        let rank = info.shape.rank()?;
                        let axis = normalize_axis(axis, rank).ok()?;
                        info.shape.dim(axis)?.get_length()
                    });
                let Some(axis_len) = axis_len else {
                    return Ok(false);
                };
                let resolved: Vec<i64> = index_data
                    .iter()
                    .map(|&i| if i < 0 { i + axis_len as i64 } else { i })
                    .collect();
                let Ok(resolved) = Tensor::from_i64(index_values.shape(), resolved) else {
                    return Ok(false);
                };
                let name = graph.node(indices.node).map(|n| n.name().to_string());
                let id = graph.add_constant(name.as_deref(), resolved);
                graph.copy_runtime_info(&[indices.node], id);
                new_indices = id.into();
            }

            replace_op(
                graph,
                m.root().node,
                Gather7 { batch_dims },
                &[data, new_indices, axis],
            )
        },
    )
}

/// Replace [`Gather7`] with [`Gather`] when `batch_dims` is zero.
pub fn convert_gather7_to_gather1() -> MatcherPass {
    MatcherPass::new(
        "ConvertGather7ToGather1",
        gather_pattern(),
        &["data", "indices", "axis"],
        |graph, m, _ctx| {
            if root_op::<Gather7>(graph, m).map(|op| op.batch_dims) != Some(0) {
                return Ok(false);
            }
            let (Some(data), Some(indices), Some(axis)) =
                (m.get("data"), m.get("indices"), m.get("axis"))
            else {
                return Ok(false);
            };
            replace_op(graph, m.root().node, Gather, &[data, indices, axis])
        },
    )
}

/// Replace [`Softmax8`] with [`Softmax`].
///
/// Negative axes are resolved using the input rank, which must then be
/// static.
pub fn convert_softmax8_to_softmax1() -> MatcherPass {
    MatcherPass::new(
        "ConvertSoftMax8ToSoftMax1",
        Pattern::unary_op("Softmax", Pattern::symbol("x")),
        &["x"],
        |graph, m, _ctx| {
            let Some(axis) = root_op::<Softmax8>(graph, m).map(|op| op.axis) else {
                return Ok(false);
            };
            let Some(x) = m.get("x") else {
                return Ok(false);
            };
            let rank = graph.output_info(x).and_then(|info| info.shape.rank());
            let axis = match (rank, axis) {
                (Some(rank), axis) => match normalize_axis(axis, rank) {
                    Ok(axis) => axis,
                    Err(_) => return Ok(false),
                },
                (None, axis) if axis >= 0 => axis as usize,
                (None, _) => return Ok(false),
            };
            replace_op(graph, m.root().node, Softmax { axis }, &[x])
        },
    )
}

/// Replace [`ShapeOf3`] with [`ShapeOf`], followed by a [`Convert`] if the
/// requested output type is not `i64`.
pub fn convert_shapeof3() -> MatcherPass {
    MatcherPass::new(
        "ConvertShapeOf3",
        Pattern::unary_op("ShapeOf", Pattern::symbol("x")),
        &["x"],
        |graph, m, _ctx| {
            let Some(output_type) = root_op::<ShapeOf3>(graph, m).map(|op| op.output_type) else {
                return Ok(false);
            };
            let Some(x) = m.get("x") else {
                return Ok(false);
            };
            let root = m.root().node;
            if output_type == ElementType::I64 {
                return replace_op(graph, root, ShapeOf, &[x]);
            }
            let shape_of = graph.add_op(ShapeOf, &[x])?;
            graph.copy_runtime_info(&[root], shape_of);
            replace_op(graph, root, Convert { to: output_type }, &[shape_of.into()])
        },
    )
}

/// Lower operators introduced in opset 8 to their opset 7 forms.
pub fn convert_opset8_to_opset7() -> GraphRewrite {
    GraphRewrite::new("ConvertOpSet8ToOpSet7")
        .with_matcher(convert_gather8_to_gather7())
        .with_matcher(convert_softmax8_to_softmax1())
}

/// Lower operators introduced in opset 3 to their opset 2 forms.
pub fn convert_opset3_to_opset2() -> GraphRewrite {
    GraphRewrite::new("ConvertOpSet3ToOpSet2").with_matcher(convert_shapeof3())
}
