//! Operator kinds.
//!
//! Each kind is a struct implementing [`Operator`](crate::operator::Operator),
//! identified by a `(name, version)` pair where the version is the opset in
//! which that variant was introduced. Shape inference is delegated to the
//! per-kind algorithms in [`rewire_shape_inference`]. Kinds that support
//! constant folding also implement `evaluate`.

use rewire_shape_inference::{InferShapes, InputValues, TensorInfo};

use crate::operator::OpError;
use crate::tensor::Tensor;

mod binary;
mod control_flow;
mod fft;
mod framework;
mod gather;
mod io;
mod layout;
mod quantize;
mod reduce;
mod softmax;
mod unary;

pub use binary::{Add, Divide, Equal, Maximum, Minimum, Multiply, Power, Subtract};
pub use control_flow::Loop;
pub use fft::Dft;
pub use framework::FrameworkNode;
pub use gather::{Gather, Gather7, Gather8};
pub use io::{Constant, Parameter, ResultOp};
pub use layout::{Concat, Reshape, ShapeOf, ShapeOf3, Squeeze, Transpose, Unsqueeze};
pub use quantize::FakeQuantize;
pub use reduce::{
    ReduceLogicalAnd, ReduceLogicalOr, ReduceMax, ReduceMean, ReduceMin, ReduceSum,
};
pub use softmax::{Softmax, Softmax8};
pub use unary::{
    Abs, Clamp, Convert, Erf, Exp, Gelu, GeluApproximation, HSigmoid, Negative, Relu, Sigmoid,
    Sign, SoftSign, Sqrt, Tanh,
};

/// Get a required input in [`Operator::evaluate`](crate::operator::Operator::evaluate).
fn require_input<'a>(inputs: &[&'a Tensor], index: usize) -> Result<&'a Tensor, OpError> {
    inputs.get(index).copied().ok_or(OpError::MissingInput(index))
}

/// Extract the elements of every input as slices of one type.
fn typed_slices<'a, T>(
    inputs: &[&'a Tensor],
    get: impl Fn(&'a Tensor) -> Option<&'a [T]>,
) -> Result<Vec<&'a [T]>, OpError> {
    inputs
        .iter()
        .enumerate()
        .map(|(index, &t)| {
            get(t).ok_or(OpError::UnsupportedType {
                index,
                element_type: t.element_type(),
            })
        })
        .collect()
}

/// Run shape inference with fully known inputs and return the shape of the
/// first output.
fn infer_static_shape(op: &impl InferShapes, inputs: &[&Tensor]) -> Result<Vec<usize>, OpError> {
    let infos: Vec<TensorInfo> = inputs.iter().map(|t| t.info()).collect();
    let mut values = InputValues::new();
    for (index, input) in inputs.iter().enumerate() {
        values.insert_value(index, input.to_const_value());
    }
    let outputs = op
        .infer_shapes(&infos, &values)
        .map_err(|err| OpError::InvalidValue(err.to_string()))?;
    outputs
        .first()
        .and_then(|output| output.shape.to_shape())
        .ok_or_else(|| OpError::InvalidValue("output shape is not static".to_string()))
}
