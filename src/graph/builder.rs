//! Tools to simplify building graphs in tests.

use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::ops::{Add, Div, Mul, Sub};
use std::rc::Rc;
use std::sync::Arc;

use rewire_shape_inference::{ElementType, PartialShape};

use crate::graph::{Graph, OutputRef};
use crate::operator::Operator;
use crate::tensor::Tensor;

enum ExprKind {
    /// Expression representing a graph input.
    Parameter(ParameterExpr),
    /// Expression representing a constant node.
    Constant(Tensor),
    /// Expression representing an operator node.
    Operator(OperatorExpr),
}

/// Values which can be used as constants in expressions.
pub trait ConstantValue {
    fn into_tensor(self) -> Tensor;
}

impl ConstantValue for Tensor {
    fn into_tensor(self) -> Tensor {
        self
    }
}

impl ConstantValue for f32 {
    fn into_tensor(self) -> Tensor {
        Tensor::scalar_f32(self)
    }
}

impl ConstantValue for i64 {
    fn into_tensor(self) -> Tensor {
        Tensor::scalar_i64(self)
    }
}

impl ConstantValue for Vec<i64> {
    fn into_tensor(self) -> Tensor {
        Tensor::vector_i64(self)
    }
}

/// An expression describing a [`Graph`].
///
/// Expressions are constructed using constructor methods and math operators.
/// They are then converted into a graph using [`Expr::build_graph`].
///
/// The following builds a graph for the GELU activation function, which has
/// the equation `x * 0.5 * (1 + Erf(x / Sqrt(2)))`:
///
/// ```text
/// let x = Expr::value("x");
/// let expr = x.clone() * ((x / 2f32.sqrt()).unary(Erf) + 1.0) * 0.5;
/// let graph: Graph = expr.build_graph();
/// ```
///
/// This graph has a single parameter named "x", and one result which reads
/// the output of the final `Multiply` operator.
#[derive(Clone)]
pub struct Expr {
    kind: Rc<ExprKind>,
}

impl From<ExprKind> for Expr {
    fn from(kind: ExprKind) -> Expr {
        Expr { kind: kind.into() }
    }
}

impl Expr {
    /// Create an `f32` graph input of unknown shape.
    pub fn value(name: &str) -> Expr {
        Expr::parameter(name, ElementType::F32, PartialShape::dynamic())
    }

    /// Create a graph input with the given type and shape.
    pub fn parameter(name: &str, element_type: ElementType, shape: PartialShape) -> Expr {
        Expr::from(ExprKind::Parameter(ParameterExpr {
            name: name.to_string(),
            element_type,
            shape,
        }))
    }

    /// Create an expression representing a constant value.
    pub fn constant<V: ConstantValue>(value: V) -> Expr {
        Expr::from(ExprKind::Constant(value.into_tensor()))
    }

    /// Create an expression which applies a unary operator to this expression.
    pub fn unary<Op: Operator>(&self, op: Op) -> Expr {
        self.apply(op, &[])
    }

    /// Create an expression which applies a binary operator to this expression.
    pub fn binary<Op: Operator>(&self, op: Op, rhs: Expr) -> Expr {
        self.apply(op, &[rhs])
    }

    /// Create an expression which applies an operator to this expression.
    pub fn apply<Op: Operator>(&self, op: Op, operands: &[Expr]) -> Expr {
        let mut inputs: Vec<_> = [self.clone()].into();
        inputs.extend(operands.iter().cloned());
        Expr::from(ExprKind::Operator(OperatorExpr {
            op: Arc::new(op),
            name: None,
            inputs,
        }))
    }

    /// Return a copy of this operator expression with a friendly name.
    pub fn named(&self, name: &str) -> Expr {
        let ExprKind::Operator(op_info) = self.kind.as_ref() else {
            panic!("can only name an operator expression");
        };
        Expr::from(ExprKind::Operator(OperatorExpr {
            op: op_info.op.clone(),
            name: Some(name.to_string()),
            inputs: op_info.inputs.clone(),
        }))
    }

    /// Convert this expression into a graph with one result, which reads the
    /// value of `self`.
    pub fn build_graph(self) -> Graph {
        Self::make_graph([self])
    }

    /// Create a graph with a result for each expression in `outputs`.
    pub fn make_graph<O: AsRef<[Expr]>>(outputs: O) -> Graph {
        let mut graph = Graph::new();
        let mut expr_outputs = HashMap::new();
        let mut name_gen = NodeNameGenerator::new();

        for output in outputs.as_ref() {
            for value in output.add_to_graph(&mut graph, &mut name_gen, &mut expr_outputs) {
                graph.add_result(value).expect("failed to add result");
            }
        }
        graph
    }

    fn add_to_graph(
        &self,
        graph: &mut Graph,
        name_gen: &mut NodeNameGenerator,
        expr_outputs: &mut HashMap<ExprRef, Vec<OutputRef>>,
    ) -> Vec<OutputRef> {
        if let Some(outputs) = expr_outputs.get(&ExprRef(self.clone())) {
            return outputs.clone();
        }

        let outputs: Vec<OutputRef> = match self.kind.as_ref() {
            ExprKind::Parameter(param) => {
                let name = name_gen.generate(&param.name);
                let id = graph.add_parameter(&name, param.element_type, param.shape.clone());
                [id.into()].into()
            }
            ExprKind::Constant(value) => {
                let name = name_gen.generate("const");
                [graph.add_constant(Some(&name), value.clone()).into()].into()
            }
            ExprKind::Operator(op_info) => {
                let inputs: Vec<OutputRef> = op_info
                    .inputs
                    .iter()
                    .flat_map(|input| input.add_to_graph(graph, name_gen, expr_outputs))
                    .collect();
                let prefix = op_info
                    .name
                    .clone()
                    .unwrap_or_else(|| op_info.op.op_type().name.to_string());
                let name = name_gen.generate(&prefix);
                let id = graph
                    .add_node(Some(&name), op_info.op.clone(), &inputs)
                    .expect("failed to add operator");
                let num_outputs = graph.node(id).map(|n| n.outputs().len()).unwrap_or(0);
                (0..num_outputs).map(|port| OutputRef::new(id, port)).collect()
            }
        };
        expr_outputs.insert(ExprRef(self.clone()), outputs.clone());

        outputs
    }
}

/// Wrapper around an `Expr` which uses reference-equality.
struct ExprRef(Expr);

impl PartialEq for ExprRef {
    fn eq(&self, other: &ExprRef) -> bool {
        Rc::ptr_eq(&self.0.kind, &other.0.kind)
    }
}

impl Eq for ExprRef {}

impl Hash for ExprRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Rc::as_ptr(&self.0.kind).hash(state)
    }
}

struct OperatorExpr {
    op: Arc<dyn Operator>,
    name: Option<String>,
    inputs: Vec<Expr>,
}

struct ParameterExpr {
    name: String,
    element_type: ElementType,
    shape: PartialShape,
}

struct NodeNameGenerator {
    used_names: HashSet<String>,
}

impl NodeNameGenerator {
    fn new() -> NodeNameGenerator {
        NodeNameGenerator {
            used_names: HashSet::new(),
        }
    }

    fn generate(&mut self, prefix: &str) -> String {
        let mut name = prefix.to_string();
        let mut suffix = 0;
        while self.used_names.contains(&name) {
            suffix += 1;
            name = format!("{}_{}", prefix, suffix);
        }
        self.used_names.insert(name.clone());
        name
    }
}

macro_rules! impl_binary_op {
    ($op_trait:ident, $op_method:ident, $op_struct: ident) => {
        impl $op_trait for Expr {
            type Output = Expr;

            fn $op_method(self, rhs: Expr) -> Expr {
                self.binary(crate::ops::$op_struct::default(), rhs)
            }
        }

        impl<V: ConstantValue> $op_trait<V> for Expr {
            type Output = Expr;

            fn $op_method(self, rhs: V) -> Expr {
                self.binary(crate::ops::$op_struct::default(), Expr::constant(rhs))
            }
        }
    };
}

impl_binary_op!(Add, add, Add);
impl_binary_op!(Mul, mul, Multiply);
impl_binary_op!(Div, div, Divide);
impl_binary_op!(Sub, sub, Subtract);

#[cfg(test)]
mod tests {
    use rewire_shape_inference::{pshape, ElementType};

    use super::Expr;

    #[test]
    fn test_build_graph() {
        // Build an expression featuring parameters, operators and constants,
        // including re-use of the same expression (`x_sqr`).
        let x = Expr::parameter("x", ElementType::F32, pshape![2, 3]);
        let x_sqr = x.clone() * x.clone();
        let expr = x_sqr.clone() * x_sqr.clone() + 2.0;
        let graph = expr.build_graph();

        assert_eq!(graph.parameters().len(), 1);
        assert_eq!(graph.results().len(), 1);

        // x, x_sqr, x_sqr * x_sqr, const, add, result
        assert_eq!(graph.len(), 6);

        let result = graph.node(graph.results()[0]).unwrap();
        assert_eq!(result.name(), "Add");
        assert_eq!(
            result.output_info(0).map(|info| info.shape.clone()),
            Some(pshape![2, 3])
        );
    }
}
