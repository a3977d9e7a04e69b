use rewire_shape_inference::ops as shape_ops;
use rewire_shape_inference::{
    normalize_axis, EvaluateLabels, InferShapes, InferShapesError, InputValues, TensorInfo,
    TensorLabels,
};

use super::{infer_static_shape, require_input};
use crate::operator::{AttributeVisitor, OpError, OpType, Operator};
use crate::tensor::{Tensor, TensorData};

/// Select slices of `data` along `axis`.
///
/// For each outer position, the slices at `indices` are copied in order.
/// Negative indices count from the end of the axis if `allow_negative` is
/// set.
fn gather_slices<T: Clone>(
    data: &[T],
    shape: &[usize],
    axis: usize,
    indices: &[i64],
    allow_negative: bool,
) -> Result<Vec<T>, OpError> {
    let axis_len = shape[axis];
    let outer: usize = shape[..axis].iter().product();
    let inner: usize = shape[axis + 1..].iter().product();

    let mut out = Vec::with_capacity(outer * indices.len() * inner);
    for o in 0..outer {
        for &index in indices {
            let resolved = if index < 0 && allow_negative {
                index + axis_len as i64
            } else {
                index
            };
            if resolved < 0 || resolved as usize >= axis_len {
                return Err(OpError::InvalidValue(format!(
                    "gather index {} is out of range for axis of size {}",
                    index, axis_len
                )));
            }
            let start = (o * axis_len + resolved as usize) * inner;
            out.extend_from_slice(&data[start..start + inner]);
        }
    }
    Ok(out)
}

/// Evaluate a gather with `batch_dims == 0`.
fn eval_gather(
    shape_op: &shape_ops::Gather,
    inputs: &[&Tensor],
    allow_negative: bool,
) -> Result<Vec<Tensor>, OpError> {
    if shape_op.batch_dims != 0 {
        return Err(OpError::NotSupported);
    }
    let data = require_input(inputs, 0)?;
    let indices = require_input(inputs, 1)?;
    let axis = require_input(inputs, 2)?;

    let indices_data = indices.as_i64().ok_or(OpError::UnsupportedType {
        index: 1,
        element_type: indices.element_type(),
    })?;
    let axis = axis
        .item_i64()
        .ok_or_else(|| OpError::InvalidValue("gather axis must be a scalar".to_string()))?;
    let axis = normalize_axis(axis, data.ndim())
        .map_err(|err| OpError::InvalidValue(err.to_string()))?;
    let out_shape = infer_static_shape(shape_op, inputs)?;

    let shape = data.shape();
    let out = match data.data() {
        TensorData::Float(v) => {
            TensorData::Float(gather_slices(v, shape, axis, indices_data, allow_negative)?)
        }
        TensorData::Int(v) => {
            TensorData::Int(gather_slices(v, shape, axis, indices_data, allow_negative)?)
        }
        TensorData::Bool(v) => {
            TensorData::Bool(gather_slices(v, shape, axis, indices_data, allow_negative)?)
        }
    };
    Ok([Tensor::new(data.element_type(), out_shape, out)?].into())
}

macro_rules! impl_gather {
    ($op:ident, $version:literal, allow_negative = $allow_negative:literal) => {
        impl $op {
            fn shape_op(&self) -> shape_ops::Gather {
                shape_ops::Gather {
                    batch_dims: self.batch_dims(),
                }
            }
        }

        impl Operator for $op {
            fn op_type(&self) -> OpType {
                OpType::new("Gather", $version)
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
                if $version >= 7 {
                    visitor.on_attribute("batch_dims", self.batch_dims().into());
                }
            }

            fn has_evaluate(&self) -> bool {
                self.batch_dims() == 0
            }

            fn evaluate(&self, inputs: &[&Tensor]) -> Result<Vec<Tensor>, OpError> {
                eval_gather(&self.shape_op(), inputs, $allow_negative)
            }
        }
    };
}

/// Gather from opset 1. Indices must be non-negative.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Gather;

impl Gather {
    fn batch_dims(&self) -> i64 {
        0
    }
}

/// Gather from opset 7, which adds `batch_dims`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Gather7 {
    pub batch_dims: i64,
}

impl Gather7 {
    fn batch_dims(&self) -> i64 {
        self.batch_dims
    }
}

/// Gather from opset 8, which also accepts negative indices.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Gather8 {
    pub batch_dims: i64,
}

impl Gather8 {
    fn batch_dims(&self) -> i64 {
        self.batch_dims
    }
}

impl_gather!(Gather, 1, allow_negative = false);
impl_gather!(Gather7, 7, allow_negative = false);
impl_gather!(Gather8, 8, allow_negative = true);

#[cfg(test)]
mod tests {
    use super::{Gather, Gather7, Gather8};
    use crate::operator::{OpError, Operator};
    use crate::tensor::Tensor;

    fn data() -> Tensor {
        Tensor::from_i64(&[2, 3], vec![1, 2, 3, 4, 5, 6]).unwrap()
    }

    #[test]
    fn test_gather_evaluate() {
        let indices = Tensor::vector_i64(vec![2, 0]);
        let axis = Tensor::scalar_i64(1);
        let result = Gather.evaluate(&[&data(), &indices, &axis]).unwrap();
        assert_eq!(result[0].shape(), &[2, 2]);
        assert_eq!(result[0].as_i64(), Some([3, 1, 6, 4].as_slice()));

        let indices = Tensor::scalar_i64(1);
        let axis = Tensor::scalar_i64(0);
        let result = Gather7::default()
            .evaluate(&[&data(), &indices, &axis])
            .unwrap();
        assert_eq!(result[0].shape(), &[3]);
        assert_eq!(result[0].as_i64(), Some([4, 5, 6].as_slice()));
    }

    #[test]
    fn test_negative_indices() {
        let indices = Tensor::vector_i64(vec![-1]);
        let axis = Tensor::scalar_i64(1);
        let inputs = [&data(), &indices, &axis];

        let result = Gather8::default().evaluate(&inputs).unwrap();
        assert_eq!(result[0].as_i64(), Some([3, 6].as_slice()));

        let err = Gather7::default().evaluate(&inputs).err();
        assert!(matches!(err, Some(OpError::InvalidValue(_))));
    }

    #[test]
    fn test_batch_dims_not_evaluated() {
        let op = Gather7 { batch_dims: 1 };
        assert!(!op.has_evaluate());
    }
}
