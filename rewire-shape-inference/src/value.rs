//! Descriptions of operator inputs and outputs used during inference.

use rustc_hash::FxHashMap;

use crate::dimension::Label;
use crate::element_type::ElementType;
use crate::partial_shape::PartialShape;

/// Element type and shape of a value in a graph.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TensorInfo {
    pub element_type: ElementType,
    pub shape: PartialShape,
}

impl TensorInfo {
    pub fn new(element_type: ElementType, shape: PartialShape) -> TensorInfo {
        TensorInfo {
            element_type,
            shape,
        }
    }

    /// Create an info with a dynamic type and a shape of unknown rank.
    pub fn dynamic() -> TensorInfo {
        TensorInfo::default()
    }

    /// Create an info with a static type and shape.
    pub fn from_static(element_type: ElementType, shape: &[usize]) -> TensorInfo {
        TensorInfo::new(element_type, PartialShape::from_static(shape))
    }

    /// Merge two infos which are required to describe the same value.
    pub fn merge(&self, other: &TensorInfo) -> Option<TensorInfo> {
        Some(TensorInfo {
            element_type: self.element_type.merge(other.element_type)?,
            shape: self.shape.merge(&other.shape)?,
        })
    }
}

/// Labels for the elements of a value, in row-major order. `None` entries
/// are unlabeled.
pub type TensorLabels = Vec<Option<Label>>;

/// Materialized contents of a constant input, in row-major order.
#[derive(Clone, Debug, PartialEq)]
pub enum ConstValue {
    Int(Vec<i64>),
    Float(Vec<f64>),
    Bool(Vec<bool>),
}

impl ConstValue {
    pub fn len(&self) -> usize {
        match self {
            ConstValue::Int(v) => v.len(),
            ConstValue::Float(v) => v.len(),
            ConstValue::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the elements if this is an integer value.
    pub fn as_ints(&self) -> Option<&[i64]> {
        match self {
            ConstValue::Int(v) => Some(v),
            _ => None,
        }
    }
}

/// Values and value labels of operator inputs that are known at compile
/// time, keyed by input index.
///
/// Some operators, such as `Unsqueeze` or `Reshape`, need the value of an
/// input and not just its shape to determine their output shape.
#[derive(Clone, Debug, Default)]
pub struct InputValues {
    values: FxHashMap<usize, ConstValue>,
    labels: FxHashMap<usize, TensorLabels>,
}

impl InputValues {
    pub fn new() -> InputValues {
        InputValues::default()
    }

    /// Record the value of input `index`.
    pub fn with_value(mut self, index: usize, value: ConstValue) -> InputValues {
        self.insert_value(index, value);
        self
    }

    /// Record the value labels of input `index`.
    pub fn with_labels(mut self, index: usize, labels: TensorLabels) -> InputValues {
        self.insert_labels(index, labels);
        self
    }

    pub fn insert_value(&mut self, index: usize, value: ConstValue) {
        self.values.insert(index, value);
    }

    pub fn insert_labels(&mut self, index: usize, labels: TensorLabels) {
        self.labels.insert(index, labels);
    }

    pub fn value(&self, index: usize) -> Option<&ConstValue> {
        self.values.get(&index)
    }

    /// Return the value of input `index` if it is a known integer tensor.
    pub fn ints(&self, index: usize) -> Option<&[i64]> {
        self.value(index).and_then(|v| v.as_ints())
    }

    pub fn labels(&self, index: usize) -> Option<&[Option<Label>]> {
        self.labels.get(&index).map(|l| l.as_slice())
    }
}
