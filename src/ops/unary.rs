use rewire_shape_inference::{
    Convert as ConvertShape, ElementType, InferShapes, InferShapesError, InputValues, TensorInfo,
    UnaryOp,
};

use super::require_input;
use crate::operator::{AttributeVisitor, OpError, OpType, Operator};
use crate::tensor::{Tensor, TensorData};

/// Apply a function to each element of a float tensor.
fn map_float(inputs: &[&Tensor], f: impl Fn(f32) -> f32) -> Result<Vec<Tensor>, OpError> {
    let x = require_input(inputs, 0)?;
    let TensorData::Float(data) = x.data() else {
        return Err(OpError::UnsupportedType {
            index: 0,
            element_type: x.element_type(),
        });
    };
    let data = TensorData::Float(data.iter().map(|&v| f(v)).collect());
    Ok([Tensor::new(x.element_type(), x.shape().to_vec(), data)?].into())
}

/// Apply a function to each element of a float or int tensor.
fn map_numeric(
    inputs: &[&Tensor],
    float_op: fn(f32) -> f32,
    int_op: fn(i64) -> i64,
) -> Result<Vec<Tensor>, OpError> {
    let x = require_input(inputs, 0)?;
    let data = match x.data() {
        TensorData::Float(data) => TensorData::Float(data.iter().map(|&v| float_op(v)).collect()),
        TensorData::Int(data) => TensorData::Int(data.iter().map(|&v| int_op(v)).collect()),
        TensorData::Bool(_) => {
            return Err(OpError::UnsupportedType {
                index: 0,
                element_type: x.element_type(),
            })
        }
    };
    Ok([Tensor::new(x.element_type(), x.shape().to_vec(), data)?].into())
}

/// Error function, using the approximation from Abramowitz and Stegun
/// (equation 7.1.26). The maximum error is 1.5e-7.
fn erf(x: f32) -> f32 {
    let sign = x.signum();
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t
        * (0.254_829_6
            + t * (-0.284_496_74 + t * (1.421_413_7 + t * (-1.453_152 + t * 1.061_405_4))));
    sign * (1.0 - poly * (-x * x).exp())
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

macro_rules! unary_op {
    ($op:ident, $name:literal, $version:literal, $eval:expr) => {
        #[derive(Clone, Debug, Default, PartialEq)]
        pub struct $op;

        impl Operator for $op {
            fn op_type(&self) -> OpType {
                OpType::new($name, $version)
            }

            fn infer(
                &self,
                inputs: &[TensorInfo],
                values: &InputValues,
            ) -> Result<Vec<TensorInfo>, InferShapesError> {
                UnaryOp.infer_shapes(inputs, values)
            }

            fn has_evaluate(&self) -> bool {
                true
            }

            fn evaluate(&self, inputs: &[&Tensor]) -> Result<Vec<Tensor>, OpError> {
                #[allow(clippy::redundant_closure_call)]
                ($eval)(inputs)
            }
        }
    };
}

unary_op!(Abs, "Abs", 1, |inputs| {
    map_numeric(inputs, f32::abs, i64::wrapping_abs)
});
unary_op!(Erf, "Erf", 1, |inputs| map_float(inputs, erf));
unary_op!(Exp, "Exp", 1, |inputs| map_float(inputs, f32::exp));
unary_op!(Negative, "Negative", 1, |inputs| {
    map_numeric(inputs, |x| -x, i64::wrapping_neg)
});
unary_op!(Relu, "Relu", 1, |inputs| {
    map_numeric(inputs, |x| x.max(0.), |x| x.max(0))
});
unary_op!(Sigmoid, "Sigmoid", 1, |inputs| map_float(inputs, sigmoid));
unary_op!(Sign, "Sign", 1, |inputs| {
    map_numeric(inputs, |x| if x == 0. { 0. } else { x.signum() }, i64::signum)
});
unary_op!(SoftSign, "SoftSign", 9, |inputs| {
    map_float(inputs, |x| x / (1. + x.abs()))
});
unary_op!(Sqrt, "Sqrt", 1, |inputs| map_float(inputs, f32::sqrt));
unary_op!(Tanh, "Tanh", 1, |inputs| map_float(inputs, f32::tanh));
unary_op!(HSigmoid, "HSigmoid", 5, |inputs| {
    map_float(inputs, |x| (x + 3.).clamp(0., 6.) / 6.)
});

/// Clamp elements to `[min, max]`.
#[derive(Clone, Debug, PartialEq)]
pub struct Clamp {
    pub min: f64,
    pub max: f64,
}

impl Operator for Clamp {
    fn op_type(&self) -> OpType {
        OpType::new("Clamp", 1)
    }

    fn infer(
        &self,
        inputs: &[TensorInfo],
        values: &InputValues,
    ) -> Result<Vec<TensorInfo>, InferShapesError> {
        if self.min > self.max {
            return Err(InferShapesError::InvalidValue(format!(
                "clamp min {} is greater than max {}",
                self.min, self.max
            )));
        }
        UnaryOp.infer_shapes(inputs, values)
    }

    fn visit_attributes(&self, visitor: &mut dyn AttributeVisitor) {
        visitor.on_attribute("min", self.min.into());
        visitor.on_attribute("max", self.max.into());
    }

    fn has_evaluate(&self) -> bool {
        true
    }

    fn evaluate(&self, inputs: &[&Tensor]) -> Result<Vec<Tensor>, OpError> {
        let (min, max) = (self.min as f32, self.max as f32);
        map_float(inputs, |x| x.clamp(min, max))
    }
}

/// Element type conversion.
#[derive(Clone, Debug, PartialEq)]
pub struct Convert {
    pub to: ElementType,
}

impl Operator for Convert {
    fn op_type(&self) -> OpType {
        OpType::new("Convert", 1)
    }

    fn infer(
        &self,
        inputs: &[TensorInfo],
        values: &InputValues,
    ) -> Result<Vec<TensorInfo>, InferShapesError> {
        ConvertShape { to: self.to }.infer_shapes(inputs, values)
    }

    fn visit_attributes(&self, visitor: &mut dyn AttributeVisitor) {
        visitor.on_attribute("destination_type", self.to.into());
    }

    fn has_evaluate(&self) -> bool {
        true
    }

    fn evaluate(&self, inputs: &[&Tensor]) -> Result<Vec<Tensor>, OpError> {
        Ok([require_input(inputs, 0)?.convert(self.to)?].into())
    }
}

/// Approximation used by [`Gelu`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum GeluApproximation {
    #[default]
    Erf,
    Tanh,
}

impl GeluApproximation {
    pub fn name(self) -> &'static str {
        match self {
            GeluApproximation::Erf => "erf",
            GeluApproximation::Tanh => "tanh",
        }
    }
}

/// Gaussian error linear unit.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Gelu {
    pub approximation: GeluApproximation,
}

impl Operator for Gelu {
    fn op_type(&self) -> OpType {
        OpType::new("Gelu", 7)
    }

    fn infer(
        &self,
        inputs: &[TensorInfo],
        values: &InputValues,
    ) -> Result<Vec<TensorInfo>, InferShapesError> {
        UnaryOp.infer_shapes(inputs, values)
    }

    fn visit_attributes(&self, visitor: &mut dyn AttributeVisitor) {
        visitor.on_attribute("approximation_mode", self.approximation.name().into());
    }

    fn has_evaluate(&self) -> bool {
        true
    }

    fn evaluate(&self, inputs: &[&Tensor]) -> Result<Vec<Tensor>, OpError> {
        match self.approximation {
            GeluApproximation::Erf => {
                map_float(inputs, |x| 0.5 * x * (1. + erf(x / std::f32::consts::SQRT_2)))
            }
            GeluApproximation::Tanh => {
                let scale = (2. / std::f32::consts::PI).sqrt();
                map_float(inputs, |x| {
                    0.5 * x * (1. + (scale * (x + 0.044715 * x * x * x)).tanh())
                })
            }
        }
    }
}
