//! Translation of models from a source framework into a [`Graph`].
//!
//! A source model is described by [`SourceModel`], a plain list of inputs,
//! constants and nodes in which values are referred to by name. Each source
//! node is translated by the function registered for its operator type in a
//! [`TranslatorRegistry`]. Nodes without a translator become
//! [`FrameworkNode`]s, which later passes may decode further. Graphs that
//! still contain framework nodes fail the
//! [`CheckFullyConverted`](crate::optimize::CheckFullyConverted) pass.

use std::sync::Arc;

use log::debug;
use rewire_shape_inference::{AutoBroadcast, ElementType, LabelGen, PartialShape};
use rustc_hash::FxHashMap;

use crate::graph::{Graph, GraphError, NodeId, OutputRef};
use crate::operator::{Attributes, Operator};
use crate::ops;
use crate::tensor::Tensor;

/// Errors that occur while translating a source model.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum FrontendError {
    /// A node reads a value that is not defined before it.
    #[error("node \"{node}\" reads undefined value \"{value}\"")]
    UndefinedValue { node: String, value: String },

    /// A model output refers to a value that is not defined.
    #[error("model output \"{0}\" is not defined")]
    UndefinedOutput(String),

    /// A value name is defined more than once.
    #[error("value \"{0}\" is defined more than once")]
    DuplicateValue(String),

    #[error("node \"{node}\" is missing input {index}")]
    MissingInput { node: String, index: usize },

    #[error("node \"{node}\" is missing attribute \"{name}\"")]
    MissingAttribute { node: String, name: String },

    #[error("node \"{node}\" has invalid attribute \"{name}\": {reason}")]
    InvalidAttribute {
        node: String,
        name: String,
        reason: String,
    },

    /// A translator produced a different number of outputs than the source
    /// node declares.
    #[error("translation of node \"{node}\" produced {actual} outputs but {expected} are declared")]
    OutputCount {
        node: String,
        expected: usize,
        actual: usize,
    },

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// A graph input in a source model.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceInput {
    pub name: String,
    pub element_type: ElementType,
    pub shape: PartialShape,
}

/// A constant value in a source model.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceConstant {
    pub name: String,
    pub value: Tensor,
}

/// An operator node in a source model.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SourceNode {
    /// Name of the node, used for diagnostics and as the friendly name of
    /// the translated node.
    pub name: String,

    /// Operator type in the source framework (eg. "Relu").
    pub op_type: String,

    /// Names of the values read by this node. An empty name marks an omitted
    /// optional input.
    pub inputs: Vec<String>,

    /// Names of the values produced by this node.
    pub outputs: Vec<String>,

    pub attrs: Attributes,
}

impl SourceNode {
    pub fn new(name: &str, op_type: &str) -> SourceNode {
        SourceNode {
            name: name.to_string(),
            op_type: op_type.to_string(),
            outputs: [name.to_string()].into(),
            ..Default::default()
        }
    }

    pub fn with_inputs(mut self, inputs: &[&str]) -> SourceNode {
        self.inputs = inputs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_outputs(mut self, outputs: &[&str]) -> SourceNode {
        self.outputs = outputs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_attrs(mut self, attrs: Attributes) -> SourceNode {
        self.attrs = attrs;
        self
    }
}

/// A model from a source framework.
///
/// Nodes must be listed so that every value is defined before it is read.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SourceModel {
    pub inputs: Vec<SourceInput>,
    pub constants: Vec<SourceConstant>,
    pub nodes: Vec<SourceNode>,

    /// Names of the values that are outputs of the model.
    pub outputs: Vec<String>,
}

impl SourceModel {
    pub fn new() -> SourceModel {
        SourceModel::default()
    }

    pub fn add_input(&mut self, name: &str, element_type: ElementType, shape: PartialShape) {
        self.inputs.push(SourceInput {
            name: name.to_string(),
            element_type,
            shape,
        });
    }

    pub fn add_constant(&mut self, name: &str, value: Tensor) {
        self.constants.push(SourceConstant {
            name: name.to_string(),
            value,
        });
    }

    pub fn add_node(&mut self, node: SourceNode) {
        self.nodes.push(node);
    }

    pub fn add_output(&mut self, name: &str) {
        self.outputs.push(name.to_string());
    }
}

/// State available to a translator for one source node.
pub struct NodeContext<'a> {
    graph: &'a mut Graph,
    node: &'a SourceNode,
    inputs: Vec<Option<OutputRef>>,
}

impl NodeContext<'_> {
    /// Name of the source node.
    pub fn name(&self) -> &str {
        &self.node.name
    }

    /// Operator type of the source node.
    pub fn op_type(&self) -> &str {
        &self.node.op_type
    }

    pub fn attrs(&self) -> &Attributes {
        &self.node.attrs
    }

    /// Number of inputs declared by the source node, including omitted
    /// optional inputs.
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Return input `index`, or `None` if it is absent.
    pub fn get_input(&self, index: usize) -> Option<OutputRef> {
        self.inputs.get(index).copied().flatten()
    }

    /// Return input `index`, failing if it is absent.
    pub fn input(&self, index: usize) -> Result<OutputRef, FrontendError> {
        self.get_input(index).ok_or_else(|| FrontendError::MissingInput {
            node: self.node.name.clone(),
            index,
        })
    }

    pub fn graph(&self) -> &Graph {
        self.graph
    }

    /// Add an operator to the graph, returning its first output.
    pub fn add_op<Op: Operator>(
        &mut self,
        op: Op,
        inputs: &[OutputRef],
    ) -> Result<OutputRef, FrontendError> {
        let id = self.graph.add_node(None, Arc::new(op), inputs)?;
        Ok(id.into())
    }

    /// Add a constant to the graph.
    pub fn add_constant(&mut self, value: Tensor) -> OutputRef {
        self.graph.add_constant(None, value).into()
    }

    fn missing_attr(&self, name: &str) -> FrontendError {
        FrontendError::MissingAttribute {
            node: self.node.name.clone(),
            name: name.to_string(),
        }
    }

    /// Create an error for an attribute with an invalid value.
    pub fn invalid_attr(&self, name: &str, reason: impl Into<String>) -> FrontendError {
        FrontendError::InvalidAttribute {
            node: self.node.name.clone(),
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.node.attrs.get(name).is_some()
    }

    pub fn attr_int(&self, name: &str) -> Result<i64, FrontendError> {
        self.node
            .attrs
            .get_int(name)
            .ok_or_else(|| self.missing_attr(name))
    }

    pub fn attr_int_or(&self, name: &str, default: i64) -> i64 {
        self.node.attrs.get_int(name).unwrap_or(default)
    }

    pub fn attr_float_or(&self, name: &str, default: f64) -> f64 {
        self.node.attrs.get_float(name).unwrap_or(default)
    }

    pub fn attr_bool_or(&self, name: &str, default: bool) -> bool {
        self.node.attrs.get_bool(name).unwrap_or(default)
    }

    pub fn attr_string_or<'s>(&'s self, name: &str, default: &'s str) -> &'s str {
        self.node.attrs.get_string(name).unwrap_or(default)
    }

    pub fn attr_ints(&self, name: &str) -> Result<&[i64], FrontendError> {
        self.node
            .attrs
            .get_ints(name)
            .ok_or_else(|| self.missing_attr(name))
    }

    pub fn attr_element_type(&self, name: &str) -> Result<ElementType, FrontendError> {
        self.node
            .attrs
            .get_element_type(name)
            .ok_or_else(|| self.missing_attr(name))
    }
}

/// Function which translates a source node into graph values.
///
/// The returned outputs correspond to the outputs declared by the source
/// node, in order.
pub type Translator = fn(&mut NodeContext) -> Result<Vec<OutputRef>, FrontendError>;

/// Maps source operator types to translators.
pub struct TranslatorRegistry {
    translators: FxHashMap<String, Translator>,
}

impl Default for TranslatorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl TranslatorRegistry {
    /// Create an empty registry.
    pub fn new() -> TranslatorRegistry {
        TranslatorRegistry {
            translators: FxHashMap::default(),
        }
    }

    /// Register a translator for `op_type`, replacing any existing one.
    pub fn register(&mut self, op_type: &str, translator: Translator) {
        self.translators.insert(op_type.to_string(), translator);
    }

    pub fn contains(&self, op_type: &str) -> bool {
        self.translators.contains_key(op_type)
    }

    pub fn get(&self, op_type: &str) -> Option<Translator> {
        self.translators.get(op_type).copied()
    }

    /// Create a registry with translators for common operators.
    pub fn with_defaults() -> TranslatorRegistry {
        let mut reg = TranslatorRegistry::new();

        macro_rules! binary {
            ($source:literal, $op:ident) => {
                reg.register($source, |ctx| {
                    let (a, b) = (ctx.input(0)?, ctx.input(1)?);
                    let op = ops::$op {
                        auto_broadcast: AutoBroadcast::Numpy,
                    };
                    Ok([ctx.add_op(op, &[a, b])?].into())
                })
            };
        }

        macro_rules! unary {
            ($source:literal, $op:ident) => {
                reg.register($source, |ctx| {
                    let x = ctx.input(0)?;
                    Ok([ctx.add_op(ops::$op, &[x])?].into())
                })
            };
        }

        macro_rules! reduction {
            ($source:literal, $op:ident) => {
                reg.register($source, |ctx| {
                    let keep_dims = ctx.attr_int_or("keepdims", 1) != 0;
                    translate_reduction(ctx, ops::$op { keep_dims })
                })
            };
        }

        binary!("Add", Add);
        binary!("Sub", Subtract);
        binary!("Mul", Multiply);
        binary!("Div", Divide);
        binary!("Pow", Power);
        binary!("Max", Maximum);
        binary!("Min", Minimum);
        binary!("Equal", Equal);

        unary!("Abs", Abs);
        unary!("Erf", Erf);
        unary!("Exp", Exp);
        unary!("Neg", Negative);
        unary!("Relu", Relu);
        unary!("Sigmoid", Sigmoid);
        unary!("Sign", Sign);
        unary!("Softsign", SoftSign);
        unary!("Sqrt", Sqrt);
        unary!("Tanh", Tanh);

        reduction!("ReduceMean", ReduceMean);
        reduction!("ReduceSum", ReduceSum);
        reduction!("ReduceMax", ReduceMax);
        reduction!("ReduceMin", ReduceMin);

        reg.register("Identity", |ctx| Ok([ctx.input(0)?].into()));
        reg.register("Clip", translate_clip);
        reg.register("Cast", |ctx| {
            let to = ctx.attr_element_type("to")?;
            let x = ctx.input(0)?;
            Ok([ctx.add_op(ops::Convert { to }, &[x])?].into())
        });
        reg.register("Gelu", |ctx| {
            let approximation = match ctx.attr_string_or("approximate", "none") {
                "none" => ops::GeluApproximation::Erf,
                "tanh" => ops::GeluApproximation::Tanh,
                other => {
                    return Err(ctx.invalid_attr("approximate", format!("unknown mode {}", other)))
                }
            };
            let x = ctx.input(0)?;
            Ok([ctx.add_op(ops::Gelu { approximation }, &[x])?].into())
        });
        reg.register("Concat", |ctx| {
            let axis = ctx.attr_int("axis")?;
            let inputs: Vec<OutputRef> = (0..ctx.input_count())
                .map(|i| ctx.input(i))
                .collect::<Result<_, _>>()?;
            Ok([ctx.add_op(ops::Concat { axis }, &inputs)?].into())
        });
        reg.register("Unsqueeze", |ctx| {
            translate_with_axes(ctx, |ctx, x, axes| ctx.add_op(ops::Unsqueeze, &[x, axes]))
        });
        reg.register("Squeeze", |ctx| {
            translate_with_axes(ctx, |ctx, x, axes| ctx.add_op(ops::Squeeze, &[x, axes]))
        });
        reg.register("Reshape", |ctx| {
            let special_zero = ctx.attr_int_or("allowzero", 0) == 0;
            let (x, shape) = (ctx.input(0)?, ctx.input(1)?);
            Ok([ctx.add_op(ops::Reshape { special_zero }, &[x, shape])?].into())
        });
        reg.register("Transpose", |ctx| {
            let x = ctx.input(0)?;
            let perm = match ctx.attrs().get_ints("perm") {
                Some(perm) => perm.to_vec(),
                None => {
                    let rank = ctx
                        .graph()
                        .output_info(x)
                        .and_then(|info| info.shape.rank())
                        .ok_or_else(|| ctx.invalid_attr("perm", "required for unknown rank"))?;
                    (0..rank as i64).rev().collect()
                }
            };
            let perm = ctx.add_constant(Tensor::vector_i64(perm));
            Ok([ctx.add_op(ops::Transpose, &[x, perm])?].into())
        });
        reg.register("Shape", |ctx| {
            let x = ctx.input(0)?;
            let op = ops::ShapeOf3 {
                output_type: ElementType::I64,
            };
            Ok([ctx.add_op(op, &[x])?].into())
        });
        reg.register("Gather", |ctx| {
            let (data, indices) = (ctx.input(0)?, ctx.input(1)?);
            let axis = ctx.attr_int_or("axis", 0);
            let axis = ctx.add_constant(Tensor::scalar_i64(axis));
            let op = ops::Gather8 { batch_dims: 0 };
            Ok([ctx.add_op(op, &[data, indices, axis])?].into())
        });
        reg.register("Softmax", |ctx| {
            let axis = ctx.attr_int_or("axis", -1);
            let x = ctx.input(0)?;
            Ok([ctx.add_op(ops::Softmax8 { axis }, &[x])?].into())
        });

        reg
    }
}

/// Translate a reduction whose axes are given by an `axes` attribute or an
/// optional second input. Without axes, all dimensions are reduced.
fn translate_reduction<Op: Operator>(
    ctx: &mut NodeContext,
    op: Op,
) -> Result<Vec<OutputRef>, FrontendError> {
    let x = ctx.input(0)?;
    let axes_attr = ctx.attrs().get_ints("axes").map(|axes| axes.to_vec());
    let axes = match (ctx.get_input(1), axes_attr) {
        (Some(axes), _) => axes,
        (None, Some(axes)) => ctx.add_constant(Tensor::vector_i64(axes)),
        (None, None) => {
            let rank = ctx
                .graph()
                .output_info(x)
                .and_then(|info| info.shape.rank())
                .ok_or_else(|| ctx.invalid_attr("axes", "required for unknown rank"))?;
            ctx.add_constant(Tensor::vector_i64((0..rank as i64).collect()))
        }
    };
    Ok([ctx.add_op(op, &[x, axes])?].into())
}

/// Translate an operator whose axes are given by an `axes` attribute or a
/// second input.
fn translate_with_axes(
    ctx: &mut NodeContext,
    add: impl FnOnce(&mut NodeContext, OutputRef, OutputRef) -> Result<OutputRef, FrontendError>,
) -> Result<Vec<OutputRef>, FrontendError> {
    let x = ctx.input(0)?;
    let axes = match ctx.get_input(1) {
        Some(axes) => axes,
        None => {
            let axes = ctx.attr_ints("axes")?.to_vec();
            ctx.add_constant(Tensor::vector_i64(axes))
        }
    };
    Ok([add(ctx, x, axes)?].into())
}

/// Read a `Clip` bound from a scalar constant input or an attribute.
fn clip_bound(
    ctx: &NodeContext,
    index: usize,
    name: &str,
    default: f64,
) -> Result<f64, FrontendError> {
    let Some(input) = ctx.get_input(index) else {
        return Ok(ctx.attr_float_or(name, default));
    };
    ctx.graph()
        .constant_value(input)
        .and_then(|value| value.item_f32())
        .map(f64::from)
        .ok_or_else(|| ctx.invalid_attr(name, "bound must be a scalar constant"))
}

/// Translate `Clip`, whose bounds are attributes or constant inputs.
fn translate_clip(ctx: &mut NodeContext) -> Result<Vec<OutputRef>, FrontendError> {
    let x = ctx.input(0)?;
    let min = clip_bound(ctx, 1, "min", f64::NEG_INFINITY)?;
    let max = clip_bound(ctx, 2, "max", f64::INFINITY)?;
    Ok([ctx.add_op(ops::Clamp { min, max }, &[x])?].into())
}

/// Translate a node without a translator into a [`FrameworkNode`].
fn translate_fallback(ctx: &mut NodeContext) -> Result<Vec<OutputRef>, FrontendError> {
    let inputs: Vec<OutputRef> = ctx.inputs.iter().flatten().copied().collect();
    let op = ops::FrameworkNode {
        op_name: ctx.node.op_type.clone(),
        attrs: ctx.node.attrs.clone(),
        num_outputs: ctx.node.outputs.len(),
    };
    let id = ctx.graph.add_node(None, Arc::new(op), &inputs)?;
    Ok((0..ctx.node.outputs.len())
        .map(|port| OutputRef::new(id, port))
        .collect())
}

/// Translate a source model into a graph.
///
/// Dynamic dimensions of the model inputs are given fresh labels, so that
/// dimensions derived from them can be recognized as equal. Nodes which
/// produce the outputs of a source node take its name.
pub fn convert_model(
    model: &SourceModel,
    registry: &TranslatorRegistry,
) -> Result<Graph, FrontendError> {
    let mut graph = Graph::new();
    let mut label_gen = LabelGen::new();
    let mut values: FxHashMap<&str, OutputRef> = FxHashMap::default();

    for input in &model.inputs {
        let mut shape = input.shape.clone();
        label_gen.label_dynamic_dims(&mut shape);
        let id = graph.add_parameter(&input.name, input.element_type, shape);
        define_value(&mut values, input.name.as_str(), id.into())?;
    }

    for constant in &model.constants {
        let id = graph.add_constant(Some(&constant.name), constant.value.clone());
        define_value(&mut values, constant.name.as_str(), id.into())?;
    }

    for node in &model.nodes {
        let inputs = node
            .inputs
            .iter()
            .map(|name| {
                if name.is_empty() {
                    return Ok(None);
                }
                values
                    .get(name.as_str())
                    .copied()
                    .map(Some)
                    .ok_or_else(|| FrontendError::UndefinedValue {
                        node: node.name.clone(),
                        value: name.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let first_new = graph.next_node_id();
        let translator = registry.get(&node.op_type).unwrap_or_else(|| {
            debug!(
                "no translator for {}, keeping \"{}\" as a framework node",
                node.op_type, node.name
            );
            translate_fallback as Translator
        });
        let mut ctx = NodeContext {
            graph: &mut graph,
            node,
            inputs,
        };
        let outputs = translator(&mut ctx)?;

        if outputs.len() != node.outputs.len() {
            return Err(FrontendError::OutputCount {
                node: node.name.clone(),
                expected: node.outputs.len(),
                actual: outputs.len(),
            });
        }
        name_outputs(&mut graph, node, &outputs, first_new)?;
        for (name, output) in node.outputs.iter().zip(outputs) {
            define_value(&mut values, name.as_str(), output)?;
        }
    }

    for name in &model.outputs {
        let output = values
            .get(name.as_str())
            .copied()
            .ok_or_else(|| FrontendError::UndefinedOutput(name.clone()))?;
        graph.add_result(output)?;
    }

    Ok(graph)
}

fn define_value<'m>(
    values: &mut FxHashMap<&'m str, OutputRef>,
    name: &'m str,
    output: OutputRef,
) -> Result<(), FrontendError> {
    if values.insert(name, output).is_some() {
        return Err(FrontendError::DuplicateValue(name.to_string()));
    }
    Ok(())
}

/// Give the nodes created for `node` which produce its outputs a friendly
/// name taken from the source model.
///
/// Nodes with several outputs take the source node's name. When a source
/// node with several outputs is translated into one node per output, each
/// takes the name of its output value instead.
fn name_outputs(
    graph: &mut Graph,
    node: &SourceNode,
    outputs: &[OutputRef],
    first_new: NodeId,
) -> Result<(), GraphError> {
    let mut named: Vec<NodeId> = Vec::new();
    for (port, output) in outputs.iter().enumerate() {
        if output.node < first_new || named.contains(&output.node) {
            continue;
        }
        let single_output = graph.node(output.node).map(|n| n.outputs().len()) == Some(1);
        let name = match node.outputs.get(port) {
            Some(value_name) if single_output && outputs.len() > 1 => value_name,
            _ => &node.name,
        };
        graph.set_friendly_name(output.node, name)?;
        named.push(output.node);
    }
    Ok(())
}
