use rewire_shape_inference::ops as shape_ops;
use rewire_shape_inference::{
    normalize_axis, ElementType, EvaluateLabels, InferShapes, InferShapesError, InputValues,
    TensorInfo, TensorLabels,
};

use super::{infer_static_shape, require_input, typed_slices};
use crate::operator::{AttributeVisitor, OpError, OpType, Operator};
use crate::tensor::{Tensor, TensorData};

/// Join inputs along an axis.
#[derive(Clone, Debug, PartialEq)]
pub struct Concat {
    pub axis: i64,
}

impl Concat {
    fn shape_op(&self) -> shape_ops::Concat {
        shape_ops::Concat { axis: self.axis }
    }
}

impl Operator for Concat {
    fn op_type(&self) -> OpType {
        OpType::new("Concat", 1)
    }

    fn infer(
        &self,
        inputs: &[TensorInfo],
        values: &InputValues,
    ) -> Result<Vec<TensorInfo>, InferShapesError> {
        self.shape_op().infer_shapes(inputs, values)
    }

    fn evaluate_labels(
        &self,
        inputs: &[TensorInfo],
        values: &InputValues,
    ) -> Option<Vec<TensorLabels>> {
        self.shape_op().evaluate_labels(inputs, values)
    }

    fn visit_attributes(&self, visitor: &mut dyn AttributeVisitor) {
        visitor.on_attribute("axis", self.axis.into());
    }

    fn has_evaluate(&self) -> bool {
        true
    }

    fn evaluate(&self, inputs: &[&Tensor]) -> Result<Vec<Tensor>, OpError> {
        let first = require_input(inputs, 0)?;
        let out_shape = infer_static_shape(&self.shape_op(), inputs)?;
        let axis = normalize_axis(self.axis, out_shape.len())
            .map_err(|err| OpError::InvalidValue(err.to_string()))?;
        let shapes: Vec<&[usize]> = inputs.iter().map(|t| t.shape()).collect();

        let data = match first.data() {
            TensorData::Float(_) => TensorData::Float(shape_ops::concat_values(
                &shapes,
                &typed_slices(inputs, Tensor::as_f32)?,
                axis,
            )),
            TensorData::Int(_) => TensorData::Int(shape_ops::concat_values(
                &shapes,
                &typed_slices(inputs, Tensor::as_i64)?,
                axis,
            )),
            TensorData::Bool(_) => TensorData::Bool(shape_ops::concat_values(
                &shapes,
                &typed_slices(inputs, Tensor::as_bool)?,
                axis,
            )),
        };
        Ok([Tensor::new(first.element_type(), out_shape, data)?].into())
    }
}

/// Evaluate an operator which only changes the shape of its first input.
fn eval_reshape_like(op: &impl InferShapes, inputs: &[&Tensor]) -> Result<Vec<Tensor>, OpError> {
    let data = require_input(inputs, 0)?;
    let out_shape = infer_static_shape(op, inputs)?;
    Ok([data.clone().reshape(out_shape)?].into())
}

/// Insert 1-sized dimensions.
///
/// Inputs are `[data, axes]`. Axes are de-duplicated and inserted in
/// ascending order. An axis beyond the rank accumulated so far is appended.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Unsqueeze;

impl Operator for Unsqueeze {
    fn op_type(&self) -> OpType {
        OpType::new("Unsqueeze", 1)
    }

    fn infer(
        &self,
        inputs: &[TensorInfo],
        values: &InputValues,
    ) -> Result<Vec<TensorInfo>, InferShapesError> {
        shape_ops::Unsqueeze.infer_shapes(inputs, values)
    }

    fn evaluate_labels(
        &self,
        inputs: &[TensorInfo],
        values: &InputValues,
    ) -> Option<Vec<TensorLabels>> {
        shape_ops::Unsqueeze.evaluate_labels(inputs, values)
    }

    fn has_evaluate(&self) -> bool {
        true
    }

    fn evaluate(&self, inputs: &[&Tensor]) -> Result<Vec<Tensor>, OpError> {
        eval_reshape_like(&shape_ops::Unsqueeze, inputs)
    }
}

/// Remove 1-sized dimensions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Squeeze;

impl Operator for Squeeze {
    fn op_type(&self) -> OpType {
        OpType::new("Squeeze", 1)
    }

    fn infer(
        &self,
        inputs: &[TensorInfo],
        values: &InputValues,
    ) -> Result<Vec<TensorInfo>, InferShapesError> {
        shape_ops::Squeeze.infer_shapes(inputs, values)
    }

    fn evaluate_labels(
        &self,
        inputs: &[TensorInfo],
        values: &InputValues,
    ) -> Option<Vec<TensorLabels>> {
        shape_ops::Squeeze.evaluate_labels(inputs, values)
    }

    fn has_evaluate(&self) -> bool {
        true
    }

    fn evaluate(&self, inputs: &[&Tensor]) -> Result<Vec<Tensor>, OpError> {
        eval_reshape_like(&shape_ops::Squeeze, inputs)
    }
}

/// Change the shape of a value without changing its elements.
#[derive(Clone, Debug, PartialEq)]
pub struct Reshape {
    pub special_zero: bool,
}

impl Reshape {
    fn shape_op(&self) -> shape_ops::Reshape {
        shape_ops::Reshape {
            special_zero: self.special_zero,
        }
    }
}

impl Operator for Reshape {
    fn op_type(&self) -> OpType {
        OpType::new("Reshape", 1)
    }

    fn infer(
        &self,
        inputs: &[TensorInfo],
        values: &InputValues,
    ) -> Result<Vec<TensorInfo>, InferShapesError> {
        self.shape_op().infer_shapes(inputs, values)
    }

    fn evaluate_labels(
        &self,
        inputs: &[TensorInfo],
        values: &InputValues,
    ) -> Option<Vec<TensorLabels>> {
        self.shape_op().evaluate_labels(inputs, values)
    }

    fn visit_attributes(&self, visitor: &mut dyn AttributeVisitor) {
        visitor.on_attribute("special_zero", self.special_zero.into());
    }

    fn has_evaluate(&self) -> bool {
        true
    }

    fn evaluate(&self, inputs: &[&Tensor]) -> Result<Vec<Tensor>, OpError> {
        eval_reshape_like(&self.shape_op(), inputs)
    }
}

/// Permute dimensions.
///
/// An empty permutation reverses the dimensions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Transpose;

impl Operator for Transpose {
    fn op_type(&self) -> OpType {
        OpType::new("Transpose", 1)
    }

    fn infer(
        &self,
        inputs: &[TensorInfo],
        values: &InputValues,
    ) -> Result<Vec<TensorInfo>, InferShapesError> {
        shape_ops::Transpose.infer_shapes(inputs, values)
    }
}

/// Create a shape value with the given element type.
fn shape_tensor(shape: &[usize], element_type: ElementType) -> Result<Tensor, OpError> {
    let dims = shape.iter().map(|&d| d as i64).collect();
    Ok(Tensor::new(element_type, vec![shape.len()], TensorData::Int(dims))?)
}

/// Produce the shape of the input as an `i64` vector.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ShapeOf;

/// Produce the shape of the input as a vector of `output_type`, which is
/// `i32` or `i64`.
#[derive(Clone, Debug, PartialEq)]
pub struct ShapeOf3 {
    pub output_type: ElementType,
}

impl Default for ShapeOf3 {
    fn default() -> Self {
        ShapeOf3 {
            output_type: ElementType::I64,
        }
    }
}

macro_rules! impl_shape_of {
    ($op:ident, $version:literal, $output_type:expr) => {
        impl Operator for $op {
            fn op_type(&self) -> OpType {
                OpType::new("ShapeOf", $version)
            }

            fn infer(
                &self,
                inputs: &[TensorInfo],
                values: &InputValues,
            ) -> Result<Vec<TensorInfo>, InferShapesError> {
                shape_ops::ShapeOf {
                    output_type: $output_type(self),
                }
                .infer_shapes(inputs, values)
            }

            fn evaluate_labels(
                &self,
                inputs: &[TensorInfo],
                values: &InputValues,
            ) -> Option<Vec<TensorLabels>> {
                shape_ops::ShapeOf {
                    output_type: $output_type(self),
                }
                .evaluate_labels(inputs, values)
            }

            fn visit_attributes(&self, visitor: &mut dyn AttributeVisitor) {
                if $version >= 3 {
                    visitor.on_attribute("output_type", $output_type(self).into());
                }
            }

            fn has_evaluate(&self) -> bool {
                true
            }

            fn evaluate(&self, inputs: &[&Tensor]) -> Result<Vec<Tensor>, OpError> {
                let data = require_input(inputs, 0)?;
                Ok([shape_tensor(data.shape(), $output_type(self))?].into())
            }

            fn evaluate_from_info(&self, inputs: &[TensorInfo]) -> Option<Vec<Tensor>> {
                let shape = inputs.first()?.shape.to_shape()?;
                shape_tensor(&shape, $output_type(self)).ok().map(|t| vec![t])
            }
        }
    };
}

impl_shape_of!(ShapeOf, 1, |_: &ShapeOf| ElementType::I64);
impl_shape_of!(ShapeOf3, 3, |op: &ShapeOf3| op.output_type);

#[cfg(test)]
mod tests {
    use rewire_shape_inference::{pshape, ElementType, InputValues, Label, TensorInfo};

    use super::{Concat, Reshape, ShapeOf, ShapeOf3, Unsqueeze};
    use crate::operator::Operator;
    use crate::tensor::Tensor;

    #[test]
    fn test_concat_evaluate() {
        let a = Tensor::from_i64(&[2, 1], vec![1, 2]).unwrap();
        let b = Tensor::from_i64(&[2, 2], vec![3, 4, 5, 6]).unwrap();
        let result = Concat { axis: -1 }.evaluate(&[&a, &b]).unwrap();
        assert_eq!(result[0].shape(), &[2, 3]);
        assert_eq!(result[0].as_i64(), Some([1, 3, 4, 2, 5, 6].as_slice()));
    }

    #[test]
    fn test_unsqueeze_evaluate() {
        let data = Tensor::from_f32(&[2, 3, 4], vec![0.; 24]).unwrap();
        let axes = Tensor::vector_i64(vec![0, 4, 0]);
        let result = Unsqueeze.evaluate(&[&data, &axes]).unwrap();
        assert_eq!(result[0].shape(), &[1, 2, 3, 4, 1]);
    }

    #[test]
    fn test_reshape_evaluate() {
        let data = Tensor::from_f32(&[2, 3], vec![0.; 6]).unwrap();
        let shape = Tensor::vector_i64(vec![0, -1]);
        let result = Reshape { special_zero: true }
            .evaluate(&[&data, &shape])
            .unwrap();
        assert_eq!(result[0].shape(), &[2, 3]);
    }

    #[test]
    fn test_shape_of() {
        let static_input = [TensorInfo::new(ElementType::F32, pshape![2, 5])];
        let value = ShapeOf.evaluate_from_info(&static_input).unwrap();
        assert_eq!(value[0].as_i64(), Some([2, 5].as_slice()));

        let op = ShapeOf3 {
            output_type: ElementType::I32,
        };
        let value = op.evaluate_from_info(&static_input).unwrap();
        assert_eq!(value[0].element_type(), ElementType::I32);

        let dynamic_input = [TensorInfo::new(ElementType::F32, pshape![?, 5])];
        assert!(ShapeOf.evaluate_from_info(&dynamic_input).is_none());
    }

    #[test]
    fn test_shape_of_labels() {
        let mut shape = pshape![?, 5];
        let label = Label::new(7);
        if let Some(dims) = shape.dims_mut() {
            dims[0].set_label(label);
        }
        let inputs = [TensorInfo::new(ElementType::F32, shape)];
        let labels = ShapeOf
            .evaluate_labels(&inputs, &InputValues::new())
            .unwrap();
        assert_eq!(labels, [vec![label, None]]);
    }
}
