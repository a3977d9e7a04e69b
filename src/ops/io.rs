use rewire_shape_inference::{
    ElementType, InferShapesError, InputValues, PartialShape, TensorInfo,
};

use crate::operator::{AttributeVisitor, OpError, OpType, Operator};
use crate::tensor::Tensor;

fn check_no_inputs(inputs: &[TensorInfo]) -> Result<(), InferShapesError> {
    if !inputs.is_empty() {
        return Err(InferShapesError::IncorrectInputCount {
            expected: "0",
            actual: inputs.len(),
        });
    }
    Ok(())
}

/// A graph input.
#[derive(Clone, Debug, PartialEq)]
pub struct Parameter {
    pub element_type: ElementType,
    pub shape: PartialShape,
}

impl Operator for Parameter {
    fn op_type(&self) -> OpType {
        OpType::new("Parameter", 1)
    }

    fn infer(
        &self,
        inputs: &[TensorInfo],
        _values: &InputValues,
    ) -> Result<Vec<TensorInfo>, InferShapesError> {
        check_no_inputs(inputs)?;
        Ok([TensorInfo::new(self.element_type, self.shape.clone())].into())
    }

    fn visit_attributes(&self, visitor: &mut dyn AttributeVisitor) {
        visitor.on_attribute("element_type", self.element_type.into());
        visitor.on_attribute("shape", self.shape.clone().into());
    }
}

/// A compile-time constant value.
#[derive(Clone, Debug, PartialEq)]
pub struct Constant {
    pub value: Tensor,
}

impl Operator for Constant {
    fn op_type(&self) -> OpType {
        OpType::new("Constant", 1)
    }

    fn infer(
        &self,
        inputs: &[TensorInfo],
        _values: &InputValues,
    ) -> Result<Vec<TensorInfo>, InferShapesError> {
        check_no_inputs(inputs)?;
        Ok([self.value.info()].into())
    }

    fn visit_attributes(&self, visitor: &mut dyn AttributeVisitor) {
        let shape = PartialShape::from_static(self.value.shape());
        visitor.on_attribute("element_type", self.value.element_type().into());
        visitor.on_attribute("shape", shape.into());
    }

    fn has_evaluate(&self) -> bool {
        true
    }

    fn evaluate(&self, _inputs: &[&Tensor]) -> Result<Vec<Tensor>, OpError> {
        Ok([self.value.clone()].into())
    }
}

/// The `Result` operator: a graph output.
///
/// The output describes the same value as the input.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResultOp;

impl Operator for ResultOp {
    fn op_type(&self) -> OpType {
        OpType::new("Result", 1)
    }

    fn infer(
        &self,
        inputs: &[TensorInfo],
        _values: &InputValues,
    ) -> Result<Vec<TensorInfo>, InferShapesError> {
        match inputs {
            [input] => Ok([input.clone()].into()),
            _ => Err(InferShapesError::IncorrectInputCount {
                expected: "1",
                actual: inputs.len(),
            }),
        }
    }
}
