use rewire_shape_inference::ops as shape_ops;
use rewire_shape_inference::{InferShapes, InferShapesError, InputValues, TensorInfo};

use crate::operator::{OpType, Operator};

/// Discrete Fourier transform over complex values.
///
/// Inputs are `[data, axes]` or `[data, axes, signal_size]`. The last
/// dimension of `data` holds the real and imaginary parts.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Dft;

impl Operator for Dft {
    fn op_type(&self) -> OpType {
        OpType::new("DFT", 7)
    }

    fn infer(
        &self,
        inputs: &[TensorInfo],
        values: &InputValues,
    ) -> Result<Vec<TensorInfo>, InferShapesError> {
        shape_ops::Dft.infer_shapes(inputs, values)
    }
}
