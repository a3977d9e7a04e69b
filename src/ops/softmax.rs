use rewire_shape_inference::ops as shape_ops;
use rewire_shape_inference::{InferShapes, InferShapesError, InputValues, TensorInfo};

use crate::operator::{AttributeVisitor, OpType, Operator};

/// Softmax from opset 1. The axis is non-negative.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Softmax {
    pub axis: usize,
}

impl Operator for Softmax {
    fn op_type(&self) -> OpType {
        OpType::new("Softmax", 1)
    }

    fn infer(
        &self,
        inputs: &[TensorInfo],
        values: &InputValues,
    ) -> Result<Vec<TensorInfo>, InferShapesError> {
        let axis = i64::try_from(self.axis).map_err(|_| {
            InferShapesError::InvalidValue(format!("softmax axis {} is too large", self.axis))
        })?;
        shape_ops::Softmax { axis }.infer_shapes(inputs, values)
    }

    fn visit_attributes(&self, visitor: &mut dyn AttributeVisitor) {
        visitor.on_attribute("axis", (self.axis as i64).into());
    }
}

/// Softmax from opset 8, which accepts negative axes.
#[derive(Clone, Debug, PartialEq)]
pub struct Softmax8 {
    pub axis: i64,
}

impl Default for Softmax8 {
    fn default() -> Self {
        Softmax8 { axis: -1 }
    }
}

impl Operator for Softmax8 {
    fn op_type(&self) -> OpType {
        OpType::new("Softmax", 8)
    }

    fn infer(
        &self,
        inputs: &[TensorInfo],
        values: &InputValues,
    ) -> Result<Vec<TensorInfo>, InferShapesError> {
        shape_ops::Softmax { axis: self.axis }.infer_shapes(inputs, values)
    }

    fn visit_attributes(&self, visitor: &mut dyn AttributeVisitor) {
        visitor.on_attribute("axis", self.axis.into());
    }
}
