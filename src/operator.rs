use std::any::Any;
use std::fmt::{self, Debug, Display};

use rewire_shape_inference::{
    ElementType, InferShapesError, InputValues, PartialShape, TensorInfo, TensorLabels,
};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use smallvec::SmallVec;

use crate::graph::Graph;
use crate::tensor::{Tensor, TensorError};

/// Identity of an operator kind: its name and the opset version in which
/// this variant was introduced.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpType {
    pub name: &'static str,
    pub version: u32,
}

impl OpType {
    pub const fn new(name: &'static str, version: u32) -> OpType {
        OpType { name, version }
    }
}

impl Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-v{}", self.name, self.version)
    }
}

/// Errors that occur when evaluating an operator.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum OpError {
    /// The operator cannot be evaluated at compile time.
    #[error("operator does not support evaluation")]
    NotSupported,

    /// Too few inputs were provided.
    #[error("missing input {0}")]
    MissingInput(usize),

    /// An input has a type that the evaluation doesn't support.
    #[error("input {index} has unsupported type {element_type}")]
    UnsupportedType {
        index: usize,
        element_type: ElementType,
    },

    /// Input shapes are incompatible.
    #[error("incompatible input shapes {0:?} and {1:?}")]
    IncompatibleShapes(Vec<usize>, Vec<usize>),

    /// An input value is invalid.
    #[error("{0}")]
    InvalidValue(String),

    #[error(transparent)]
    Tensor(#[from] TensorError),
}

fn serialize_element_type<S: Serializer>(
    element_type: &ElementType,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(element_type.name())
}

fn serialize_shape<S: Serializer>(shape: &PartialShape, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(shape)
}

/// Value of an operator attribute.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    ElementType(#[serde(serialize_with = "serialize_element_type")] ElementType),
    Shape(#[serde(serialize_with = "serialize_shape")] PartialShape),
}

/// Receives the attributes of an operator.
///
/// This is the generic introspection interface used to serialize, compare
/// and re-create operators.
pub trait AttributeVisitor {
    fn on_attribute(&mut self, name: &str, value: AttrValue);
}

/// Ordered collection of named attribute values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Attributes {
    entries: Vec<(String, AttrValue)>,
}

impl Attributes {
    pub fn new() -> Attributes {
        Attributes::default()
    }

    /// Collect the attributes of an operator.
    pub fn from_op(op: &dyn Operator) -> Attributes {
        let mut attrs = Attributes::new();
        op.visit_attributes(&mut attrs);
        attrs
    }

    /// Add or replace an attribute.
    pub fn with<V: Into<AttrValue>>(mut self, name: &str, value: V) -> Attributes {
        self.set(name, value.into());
        self
    }

    pub fn set(&mut self, name: &str, value: AttrValue) {
        if let Some(entry) = self.entries.iter_mut().find(|(n, _)| n == name) {
            entry.1 = value;
        } else {
            self.entries.push((name.to_string(), value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.entries
            .iter()
            .find_map(|(n, v)| (n == name).then_some(v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.get(name)? {
            AttrValue::Bool(v) => Some(*v),
            AttrValue::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            AttrValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_float(&self, name: &str) -> Option<f64> {
        match self.get(name)? {
            AttrValue::Float(v) => Some(*v),
            AttrValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn get_string(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            AttrValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_ints(&self, name: &str) -> Option<&[i64]> {
        match self.get(name)? {
            AttrValue::Ints(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_element_type(&self, name: &str) -> Option<ElementType> {
        match self.get(name)? {
            AttrValue::ElementType(v) => Some(*v),
            AttrValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn get_shape(&self, name: &str) -> Option<&PartialShape> {
        match self.get(name)? {
            AttrValue::Shape(v) => Some(v),
            _ => None,
        }
    }
}

impl AttributeVisitor for Attributes {
    fn on_attribute(&mut self, name: &str, value: AttrValue) {
        self.set(name, value);
    }
}

impl Serialize for Attributes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

macro_rules! impl_attr_from {
    ($type:ty, $variant:ident) => {
        impl From<$type> for AttrValue {
            fn from(value: $type) -> AttrValue {
                AttrValue::$variant(value.into())
            }
        }
    };
}

impl_attr_from!(bool, Bool);
impl_attr_from!(i64, Int);
impl_attr_from!(f64, Float);
impl_attr_from!(String, String);
impl_attr_from!(&str, String);
impl_attr_from!(Vec<i64>, Ints);
impl_attr_from!(Vec<f64>, Floats);
impl_attr_from!(ElementType, ElementType);
impl_attr_from!(PartialShape, Shape);

/// An operator kind in a graph.
///
/// Operators are immutable once created. Rewrites that change an operator's
/// attributes create a new operator and a new node.
pub trait Operator: Any + Debug + Send + Sync {
    /// Return the identity of this operator kind.
    fn op_type(&self) -> OpType;

    /// Infer output types and shapes from the inputs.
    fn infer(
        &self,
        inputs: &[TensorInfo],
        values: &InputValues,
    ) -> Result<Vec<TensorInfo>, InferShapesError>;

    /// Compute the value labels of outputs, for operators that propagate
    /// them. See [`EvaluateLabels`](rewire_shape_inference::EvaluateLabels).
    fn evaluate_labels(
        &self,
        _inputs: &[TensorInfo],
        _values: &InputValues,
    ) -> Option<Vec<TensorLabels>> {
        None
    }

    /// Report this operator's attributes to `visitor`.
    fn visit_attributes(&self, _visitor: &mut dyn AttributeVisitor) {}

    /// Return true if [`evaluate`](Operator::evaluate) is implemented.
    fn has_evaluate(&self) -> bool {
        false
    }

    /// Compute the outputs from constant inputs.
    fn evaluate(&self, _inputs: &[&Tensor]) -> Result<Vec<Tensor>, OpError> {
        Err(OpError::NotSupported)
    }

    /// Compute output values from input metadata alone, if they are fully
    /// determined by it (eg. the shape of a statically shaped input).
    fn evaluate_from_info(&self, _inputs: &[TensorInfo]) -> Option<Vec<Tensor>> {
        None
    }

    /// Return true if this operator is a commutative binary operator.
    ///
    /// The pattern matcher uses this to match inputs in either order.
    fn is_commutative(&self) -> bool {
        false
    }

    /// Return the [`SubgraphOperator`] implementation for this operator, if
    /// this operator has a body graph.
    fn as_subgraph_op(&self) -> Option<&dyn SubgraphOperator> {
        None
    }
}

impl dyn Operator {
    /// Downcast this operator to a concrete type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        (self as &dyn Any).downcast_ref()
    }

    /// Return true if this is an operator of kind `name`, in any version.
    pub fn is(&self, name: &str) -> bool {
        self.op_type().name == name
    }
}

/// Trait for operators which contain subgraphs.
pub trait SubgraphOperator: Operator {
    /// Return the subgraphs of this operator.
    fn subgraphs(&self) -> SmallVec<[&Graph; 1]>;
}

#[cfg(test)]
mod tests {
    use rewire_shape_inference::{pshape, ElementType};

    use super::{AttrValue, Attributes, OpType, Operator};
    use crate::ops::{Add, Concat, Parameter};

    #[test]
    fn test_downcast() {
        let op: &dyn Operator = &Concat { axis: 1 };
        assert_eq!(op.downcast_ref::<Concat>().map(|c| c.axis), Some(1));
        assert!(op.downcast_ref::<Add>().is_none());
        assert!(op.is("Concat"));
    }

    #[test]
    fn test_op_type_display() {
        assert_eq!(OpType::new("Gather", 8).to_string(), "Gather-v8");
    }

    #[test]
    fn test_collect_attributes() {
        let op = Parameter {
            element_type: ElementType::F32,
            shape: pshape![?, 3],
        };
        let attrs = Attributes::from_op(&op);
        assert_eq!(
            attrs.get("element_type"),
            Some(&AttrValue::ElementType(ElementType::F32))
        );
        assert_eq!(attrs.get_shape("shape"), Some(&pshape![?, 3]));

        let json = serde_json::to_string(&attrs).unwrap();
        assert_eq!(json, r#"{"element_type":"f32","shape":"[?,3]"}"#);
    }

    #[test]
    fn test_attribute_getters() {
        let attrs = Attributes::new()
            .with("axis", -1i64)
            .with("keep_dims", true)
            .with("to", "i32");
        assert_eq!(attrs.get_int("axis"), Some(-1));
        assert_eq!(attrs.get_bool("keep_dims"), Some(true));
        assert_eq!(attrs.get_element_type("to"), Some(ElementType::I32));
        assert_eq!(attrs.get_float("missing"), None);
    }
}
