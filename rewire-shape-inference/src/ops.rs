//! Shape inference for operators whose rules are not shared with other
//! operators.
//!
//! Elementwise, reduction and conversion operators use the generic
//! implementations in [`infer_shapes`](crate::infer_shapes).

use crate::infer_shapes::{check_input_count, normalize_axis, InferShapes, InferShapesError};
use crate::value::{InputValues, TensorInfo};

mod dft;
mod gather;
mod layout;
mod quantize;

pub use dft::Dft;
pub use gather::Gather;
pub use layout::{concat_values, Concat, Reshape, ShapeOf, Squeeze, Transpose, Unsqueeze};
pub use quantize::FakeQuantize;

/// Softmax operator.
///
/// The output has the same shape as the input. The axis must be valid for
/// the input rank, if it is known.
#[derive(Clone, Debug, PartialEq)]
pub struct Softmax {
    pub axis: i64,
}

impl InferShapes for Softmax {
    fn infer_shapes(
        &self,
        inputs: &[TensorInfo],
        _values: &InputValues,
    ) -> Result<Vec<TensorInfo>, InferShapesError> {
        check_input_count(inputs, 1, 1, "1")?;
        let data = &inputs[0];
        if !data.element_type.is_dynamic() && !data.element_type.is_real() {
            return Err(InferShapesError::UnsupportedType {
                input: 0,
                element_type: data.element_type,
            });
        }
        if let Some(rank) = data.shape.rank() {
            normalize_axis(self.axis, rank)?;
        }
        Ok([data.clone()].into())
    }
}

#[cfg(test)]
mod tests {
    use super::Softmax;
    use crate::infer_shapes::{InferShapes, InferShapesError};
    use crate::value::{InputValues, TensorInfo};
    use crate::{pshape, ElementType, PartialShape};

    #[test]
    fn test_softmax() {
        let input = TensorInfo::new(ElementType::F32, pshape![?, 10]);
        let values = InputValues::new();
        let outputs = Softmax { axis: -1 }
            .infer_shapes(&[input.clone()], &values)
            .unwrap();
        assert_eq!(outputs, [input.clone()]);

        let err = Softmax { axis: 2 }.infer_shapes(&[input], &values).err();
        assert_eq!(
            err,
            Some(InferShapesError::AxisOutOfRange { axis: 2, rank: 2 })
        );

        let input = TensorInfo::new(ElementType::I32, PartialShape::dynamic());
        let err = Softmax { axis: 0 }.infer_shapes(&[input], &values).err();
        assert!(matches!(err, Some(InferShapesError::UnsupportedType { .. })));
    }
}
