use rewire_shape_inference::{pshape, Dimension, ElementType, Label, PartialShape};
use rewire_testing::TestCases;

use super::{Graph, GraphError, InputRef, NodeId, OutputRef};
use crate::operator::Attributes;
use crate::ops::{
    Abs, Concat, FrameworkNode, Gather8, Relu, Reshape, ShapeOf, Sigmoid, Unsqueeze,
};
use crate::rt_info::{keys, RtValue};
use crate::tensor::Tensor;

/// Build `x -> Relu -> Abs -> result`, returning the graph and the IDs of
/// `x`, the Relu and the Abs.
fn relu_abs_graph() -> (Graph, NodeId, NodeId, NodeId) {
    let mut g = Graph::new();
    let x = g.add_parameter("x", ElementType::F32, pshape![2, 3]);
    let relu = g.add_named_op("relu", Relu, &[x.into()]).unwrap();
    let abs = g.add_named_op("abs", Abs, &[relu.into()]).unwrap();
    g.add_result(abs.into()).unwrap();
    (g, x, relu, abs)
}

/// Create a dynamic shape of the given rank where every dimension is
/// labeled, starting from label `first`.
fn labeled_shape(rank: usize, first: u64) -> PartialShape {
    (0..rank)
        .map(|i| Dimension::dynamic().with_label(Label::new(first + i as u64)))
        .collect()
}

#[test]
fn test_add_node_infers_outputs() {
    #[derive(Debug)]
    struct Case {
        axis: i64,
        expected: Option<PartialShape>,
    }

    let cases = [
        Case {
            axis: 1,
            expected: Some(pshape![3, 6, 1]),
        },
        Case {
            axis: -2,
            expected: Some(pshape![3, 6, 1]),
        },
        // Shapes differ at axis 1.
        Case {
            axis: 0,
            expected: None,
        },
        Case {
            axis: 3,
            expected: None,
        },
    ];

    cases.test_each(|case| {
        let mut g = Graph::new();
        let a = g.add_parameter("a", ElementType::F32, pshape![3, 2, 1]);
        let b = g.add_parameter("b", ElementType::F32, pshape![3, 4, 1]);
        let result = g.add_op(Concat { axis: case.axis }, &[a.into(), b.into()]);

        match (&case.expected, result) {
            (Some(shape), Ok(id)) => {
                let info = g.node(id).and_then(|n| n.output_info(0)).unwrap();
                assert_eq!(&info.shape, shape);
                assert_eq!(info.element_type, ElementType::F32);
            }
            (None, Err(GraphError::Validation(err))) => {
                assert_eq!(err.op_type.name, "Concat");
                assert!(err.to_string().starts_with("validation of node \"Concat_2\""));
            }
            (expected, actual) => {
                panic!("expected {:?} but got {:?}", expected, actual);
            }
        }
    });
}

#[test]
fn test_unsqueeze_with_constant_axes() {
    let mut g = Graph::new();
    let x = g.add_parameter("x", ElementType::F32, pshape![2, 3, 4]);
    let axes = g.add_constant(None, Tensor::vector_i64(vec![0, 4, 0]));
    let unsqueeze = g.add_op(Unsqueeze, &[x.into(), axes.into()]).unwrap();
    assert_eq!(
        g.output_info(unsqueeze.into()).map(|i| &i.shape),
        Some(&pshape![1, 2, 3, 4, 1])
    );

    // Without a known value for the axes, duplicates can't be detected so
    // even the rank is unknown.
    let axes_param = g.add_parameter("axes", ElementType::I64, pshape![2]);
    let unsqueeze = g.add_op(Unsqueeze, &[x.into(), axes_param.into()]).unwrap();
    assert_eq!(
        g.output_info(unsqueeze.into()).map(|i| &i.shape),
        Some(&PartialShape::dynamic())
    );
}

#[test]
fn test_add_result_names() {
    let (g, _, _, abs) = relu_abs_graph();
    let result = g.results()[0];
    assert_eq!(g.node(result).map(|n| n.name()), Some("abs"));
    assert_eq!(g.node(result).and_then(|n| n.input(0)), Some(abs.into()));
}

#[test]
fn test_topological_order() {
    let (mut g, x, relu, abs) = relu_abs_graph();
    let result = g.results()[0];
    let order = g.topological_order().unwrap();
    assert_eq!(order, [x, relu, abs, result]);

    // A node added later which feeds an earlier consumer is still placed
    // before that consumer.
    let sigmoid = g.add_op(Sigmoid, &[x.into()]).unwrap();
    g.set_input(abs, 0, sigmoid.into()).unwrap();
    let order = g.topological_order().unwrap();
    assert_eq!(order, [x, sigmoid, abs, result]);
    assert_eq!(g.topological_order().unwrap(), order);
}

#[test]
fn test_ancestors_and_consumers() {
    let (g, x, relu, abs) = relu_abs_graph();
    let result = g.results()[0];
    assert_eq!(g.ancestors(result), [x, relu, abs]);
    assert_eq!(g.ancestors(x), []);
    assert_eq!(
        g.consumers(relu.into()),
        [InputRef {
            node: abs,
            index: 0
        }]
    );
    assert!(g.consumers(OutputRef::new(relu, 1)).is_empty());
}

#[test]
fn test_replace_node() {
    let (mut g, x, relu, abs) = relu_abs_graph();
    g.rt_info_mut(relu)
        .unwrap()
        .insert(keys::FUSED_NAMES, RtValue::List(vec!["relu".into()]));

    let sigmoid = g.add_named_op("sigmoid", Sigmoid, &[x.into()]).unwrap();
    g.replace_node(relu, sigmoid).unwrap();

    assert!(!g.contains(relu));
    assert_eq!(g.node(abs).and_then(|n| n.input(0)), Some(sigmoid.into()));
    let sigmoid_node = g.node(sigmoid).unwrap();
    assert_eq!(sigmoid_node.name(), "sigmoid");
    assert_eq!(sigmoid_node.rt_info().fused_names(), ["relu"]);
    assert!(g.contains(x));
    g.validate().unwrap();
}

#[test]
fn test_replace_node_keeps_uses_by_replacement() {
    // Replace `relu` with `sigmoid(relu)`. The new node still reads the old
    // one, so the old node must be kept.
    let (mut g, _, relu, abs) = relu_abs_graph();
    let sigmoid = g.add_op(Sigmoid, &[relu.into()]).unwrap();
    g.replace_node(relu, sigmoid).unwrap();

    assert!(g.contains(relu));
    assert_eq!(g.node(abs).and_then(|n| n.input(0)), Some(sigmoid.into()));
    assert_eq!(g.node(sigmoid).and_then(|n| n.input(0)), Some(relu.into()));
}

#[test]
fn test_replace_node_errors() {
    let (mut g, x, relu, abs) = relu_abs_graph();

    // Reading a consumer of `relu` would create a cycle.
    let sigmoid = g.add_op(Sigmoid, &[abs.into()]).unwrap();
    let err = g.replace_node(relu, sigmoid).err();
    assert!(matches!(err, Some(GraphError::Cycle(_))));
    assert_eq!(g.node(abs).and_then(|n| n.input(0)), Some(relu.into()));

    // Output counts differ.
    let split = g
        .add_op(
            FrameworkNode {
                op_name: "Split".into(),
                attrs: Attributes::new(),
                num_outputs: 2,
            },
            &[x.into()],
        )
        .unwrap();
    let err = g.replace_node(relu, split).err();
    assert_eq!(
        err,
        Some(GraphError::OutputCountMismatch {
            expected: 1,
            actual: 2
        })
    );
    assert!(g.contains(relu));

    let err = g.replace_node(relu, NodeId::from_index(100)).err();
    assert!(matches!(err, Some(GraphError::InvalidNodeId(_))));
}

#[test]
fn test_remove_if_unused_cascades() {
    let (mut g, x, relu, abs) = relu_abs_graph();

    // A dead chain hanging off `x`.
    let c = g.add_constant(None, Tensor::scalar_f32(1.0));
    let dead_a = g.add_op(crate::ops::Add::default(), &[x.into(), c.into()]).unwrap();
    let dead_b = g.add_op(Abs, &[dead_a.into()]).unwrap();
    assert!(g.remove_if_unused(dead_b));
    assert!(!g.contains(dead_b));
    assert!(!g.contains(dead_a));
    assert!(!g.contains(c));
    assert!(g.contains(x));

    // Nodes which are still used are kept.
    assert!(!g.remove_if_unused(relu));
    assert!(g.contains(relu) && g.contains(abs));
    assert_eq!(g.len(), 4);
    g.validate().unwrap();
}

#[test]
fn test_set_input_rejects_cycle() {
    let (mut g, _, relu, abs) = relu_abs_graph();
    let err = g.set_input(relu, 0, abs.into()).err();
    assert_eq!(err, Some(GraphError::Cycle(relu)));
    assert!(g.topological_order().is_ok());
}

#[test]
fn test_set_parameter_info() {
    let mut g = Graph::new();
    let a = g.add_parameter("a", ElementType::F32, pshape![3, 2]);
    let b = g.add_parameter("b", ElementType::F32, pshape![3, 4]);
    let concat = g.add_op(Concat { axis: 1 }, &[a.into(), b.into()]).unwrap();
    let relu = g.add_op(Relu, &[concat.into()]).unwrap();
    g.add_result(relu.into()).unwrap();

    // Inferred info may become less specific when overridden.
    g.set_parameter_info(a, ElementType::F32, pshape![?, 2]).unwrap();
    assert_eq!(
        g.output_info(relu.into()).map(|i| &i.shape),
        Some(&pshape![3, 6])
    );

    // Dims of `a` and `b` outside the concat axis no longer agree.
    let err = g.set_parameter_info(a, ElementType::F32, pshape![5, 2]).err();
    assert!(matches!(err, Some(GraphError::Validation(_))));

    let err = g
        .set_parameter_info(relu, ElementType::F32, pshape![1])
        .err();
    assert_eq!(err, Some(GraphError::NotAParameter(relu)));
}

#[test]
fn test_validate() {
    let (mut g, ..) = relu_abs_graph();
    g.validate().unwrap();

    let mut g = Graph::new();
    let a = g.add_parameter("a", ElementType::F32, pshape![3, 2]);
    let b = g.add_parameter("b", ElementType::I64, pshape![3, 2]);
    let relu = g.add_op(Relu, &[a.into()]).unwrap();
    let add = g.add_op(crate::ops::Add::default(), &[relu.into(), a.into()]);
    assert!(add.is_ok());

    // Types of binary operator inputs must agree.
    let err = g.set_input(add.unwrap(), 1, b.into()).err();
    assert!(matches!(err, Some(GraphError::Validation(_))));
}

#[test]
fn test_clone_node_with_new_inputs() {
    let (mut g, x, relu, _) = relu_abs_graph();
    g.rt_info_mut(relu)
        .unwrap()
        .insert(keys::PRIMITIVES_PRIORITY, "cpu:ref");
    let y = g.add_parameter("y", ElementType::F32, pshape![4]);
    let copy = g.clone_node_with_new_inputs(relu, &[y.into()]).unwrap();

    let node = g.node(copy).unwrap();
    assert_eq!(node.name(), "relu");
    assert_eq!(node.output_info(0).map(|i| &i.shape), Some(&pshape![4]));
    assert!(node.rt_info().contains(keys::PRIMITIVES_PRIORITY));
    assert_ne!(g.node(relu).and_then(|n| n.input(0)), Some(y.into()));
    assert_eq!(g.node(relu).and_then(|n| n.input(0)), Some(x.into()));
}

#[test]
fn test_static_value() {
    let mut g = Graph::new();
    let x = g.add_parameter("x", ElementType::F32, pshape![2, 5]);
    let y = g.add_parameter("y", ElementType::F32, pshape![?, 5]);
    let static_shape = g.add_op(ShapeOf, &[x.into()]).unwrap();
    let dynamic_shape = g.add_op(ShapeOf, &[y.into()]).unwrap();

    let value = g.static_value(static_shape.into()).unwrap();
    assert_eq!(value.as_i64(), Some([2, 5].as_slice()));
    assert!(g.static_value(dynamic_shape.into()).is_none());
    assert!(g.constant_value(static_shape.into()).is_none());
}

#[test]
fn test_label_chain() {
    // Gather the dims of `x` in reverse order, append a fixed size and use
    // the result as the target shape of a Reshape. The output dims of the
    // Reshape should be labeled like the dims of `x` they came from.
    let mut g = Graph::new();
    let x = g.add_parameter("x", ElementType::F32, labeled_shape(2, 1));
    let data = g.add_parameter("data", ElementType::F32, PartialShape::dynamic());

    let shape = g.add_op(ShapeOf, &[x.into()]).unwrap();
    let indices = g.add_constant(None, Tensor::vector_i64(vec![1, 0]));
    let axis = g.add_constant(None, Tensor::scalar_i64(0));
    let gather = g
        .add_op(
            Gather8::default(),
            &[shape.into(), indices.into(), axis.into()],
        )
        .unwrap();
    let fixed = g.add_constant(None, Tensor::vector_i64(vec![4]));
    let target = g
        .add_op(Concat { axis: 0 }, &[gather.into(), fixed.into()])
        .unwrap();
    let reshape = g
        .add_op(
            Reshape {
                special_zero: false,
            },
            &[data.into(), target.into()],
        )
        .unwrap();

    let shape_labels = g.output(shape.into()).and_then(|o| o.labels.clone());
    assert_eq!(shape_labels, Some(vec![Label::new(1), Label::new(2)]));

    let gather_labels = g.output(gather.into()).and_then(|o| o.labels.clone());
    assert_eq!(gather_labels, Some(vec![Label::new(2), Label::new(1)]));

    let out_shape = &g.output_info(reshape.into()).unwrap().shape;
    assert_eq!(out_shape.rank(), Some(3));
    assert_eq!(
        out_shape.labels(),
        Some(vec![Label::new(2), Label::new(1), None])
    );
}

#[test]
fn test_concat_labels_agree_with_values() {
    // Labels of a concatenation must be laid out like its values.
    let mut g = Graph::new();
    let a = g.add_parameter("a", ElementType::F32, labeled_shape(2, 1));
    let b = g.add_parameter("b", ElementType::F32, pshape![7]);
    let c = g.add_parameter("c", ElementType::F32, labeled_shape(1, 10));
    let shapes: Vec<OutputRef> = [a, b, c]
        .into_iter()
        .map(|p| g.add_op(ShapeOf, &[p.into()]).unwrap().into())
        .collect();
    let concat = g.add_op(Concat { axis: 0 }, &shapes).unwrap();

    let labels = g.output(concat.into()).and_then(|o| o.labels.clone());
    assert_eq!(
        labels,
        Some(vec![Label::new(1), Label::new(2), None, Label::new(10)])
    );

    // Once all shapes are known, the value is known and labels are no longer
    // attached to the static positions.
    g.set_parameter_info(a, ElementType::F32, pshape![2, 3]).unwrap();
    g.set_parameter_info(c, ElementType::F32, pshape![5]).unwrap();
    assert_eq!(g.output(concat.into()).and_then(|o| o.labels.clone()), None);
    assert_eq!(
        g.output_info(concat.into()).map(|i| &i.shape),
        Some(&pshape![4])
    );
}
