use rewire_shape_inference::ops as shape_ops;
use rewire_shape_inference::{
    AutoBroadcast, InferShapes, InferShapesError, InputValues, TensorInfo,
};

use crate::operator::{AttributeVisitor, OpType, Operator};

/// Quantize and de-quantize a value in one step.
///
/// Inputs are `[data, input_low, input_high, output_low, output_high]`.
/// Values are clamped to the input range, snapped to one of `levels`
/// evenly spaced steps and mapped to the output range.
#[derive(Clone, Debug, PartialEq)]
pub struct FakeQuantize {
    pub levels: u64,
    pub auto_broadcast: AutoBroadcast,
}

impl Operator for FakeQuantize {
    fn op_type(&self) -> OpType {
        OpType::new("FakeQuantize", 1)
    }

    fn infer(
        &self,
        inputs: &[TensorInfo],
        values: &InputValues,
    ) -> Result<Vec<TensorInfo>, InferShapesError> {
        shape_ops::FakeQuantize {
            levels: self.levels,
            broadcast: self.auto_broadcast,
        }
        .infer_shapes(inputs, values)
    }

    fn visit_attributes(&self, visitor: &mut dyn AttributeVisitor) {
        visitor.on_attribute("levels", (self.levels as i64).into());
        visitor.on_attribute("auto_broadcast", self.auto_broadcast.name().into());
    }
}
