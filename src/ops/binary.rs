use rewire_shape_inference::{
    AutoBroadcast, BinaryOp, ComparisonOp, ElementType, InferShapes, InferShapesError,
    InputValues, TensorInfo,
};

use super::require_input;
use crate::operator::{AttributeVisitor, OpError, OpType, Operator};
use crate::tensor::{broadcast_map, Tensor, TensorData};

/// Check that two evaluation inputs can be combined under `broadcast`.
fn check_operands<'a>(
    inputs: &[&'a Tensor],
    broadcast: AutoBroadcast,
) -> Result<(&'a Tensor, &'a Tensor), OpError> {
    let a = require_input(inputs, 0)?;
    let b = require_input(inputs, 1)?;
    if a.element_type() != b.element_type() {
        return Err(OpError::UnsupportedType {
            index: 1,
            element_type: b.element_type(),
        });
    }
    if broadcast == AutoBroadcast::None && a.shape() != b.shape() {
        return Err(OpError::IncompatibleShapes(
            a.shape().to_vec(),
            b.shape().to_vec(),
        ));
    }
    Ok((a, b))
}

/// Evaluate an arithmetic operator. Integer functions return `None` on
/// overflow or division by zero.
fn eval_arithmetic(
    inputs: &[&Tensor],
    broadcast: AutoBroadcast,
    float_op: fn(f32, f32) -> f32,
    int_op: fn(i64, i64) -> Option<i64>,
) -> Result<Vec<Tensor>, OpError> {
    let (a, b) = check_operands(inputs, broadcast)?;
    let mismatch = || OpError::IncompatibleShapes(a.shape().to_vec(), b.shape().to_vec());

    let (shape, data) = match (a.data(), b.data()) {
        (TensorData::Float(x), TensorData::Float(y)) => {
            let (shape, data) = broadcast_map(
                (a.shape(), x.as_slice()),
                (b.shape(), y.as_slice()),
                float_op,
            )
            .ok_or_else(mismatch)?;
            (shape, TensorData::Float(data))
        }
        (TensorData::Int(x), TensorData::Int(y)) => {
            let (shape, data) =
                broadcast_map((a.shape(), x.as_slice()), (b.shape(), y.as_slice()), int_op)
                    .ok_or_else(mismatch)?;
            let data: Option<Vec<i64>> = data.into_iter().collect();
            let data = data.ok_or_else(|| {
                OpError::InvalidValue("integer overflow or division by zero".to_string())
            })?;
            (shape, TensorData::Int(data))
        }
        _ => {
            return Err(OpError::UnsupportedType {
                index: 0,
                element_type: a.element_type(),
            })
        }
    };
    Ok([Tensor::new(a.element_type(), shape, data)?].into())
}

macro_rules! arithmetic_op {
    ($op:ident, $name:literal, $float_op:expr, $int_op:expr) => {
        arithmetic_op!($op, $name, $float_op, $int_op, commutative = false);
    };
    ($op:ident, $name:literal, $float_op:expr, $int_op:expr, commutative = $commutative:literal) => {
        #[derive(Clone, Debug, Default, PartialEq)]
        pub struct $op {
            pub auto_broadcast: AutoBroadcast,
        }

        impl Operator for $op {
            fn op_type(&self) -> OpType {
                OpType::new($name, 1)
            }

            fn infer(
                &self,
                inputs: &[TensorInfo],
                values: &InputValues,
            ) -> Result<Vec<TensorInfo>, InferShapesError> {
                BinaryOp {
                    broadcast: self.auto_broadcast,
                }
                .infer_shapes(inputs, values)
            }

            fn visit_attributes(&self, visitor: &mut dyn AttributeVisitor) {
                visitor.on_attribute("auto_broadcast", self.auto_broadcast.name().into());
            }

            fn has_evaluate(&self) -> bool {
                true
            }

            fn evaluate(&self, inputs: &[&Tensor]) -> Result<Vec<Tensor>, OpError> {
                eval_arithmetic(inputs, self.auto_broadcast, $float_op, $int_op)
            }

            fn is_commutative(&self) -> bool {
                $commutative
            }
        }
    };
}

arithmetic_op!(Add, "Add", |x, y| x + y, i64::checked_add, commutative = true);
arithmetic_op!(Subtract, "Subtract", |x, y| x - y, i64::checked_sub);
arithmetic_op!(
    Multiply,
    "Multiply",
    |x, y| x * y,
    i64::checked_mul,
    commutative = true
);
arithmetic_op!(Divide, "Divide", |x, y| x / y, i64::checked_div);
arithmetic_op!(Power, "Power", f32::powf, |x, y| {
    u32::try_from(y).ok().and_then(|y| x.checked_pow(y))
});
arithmetic_op!(
    Maximum,
    "Maximum",
    f32::max,
    |x, y| Some(x.max(y)),
    commutative = true
);
arithmetic_op!(
    Minimum,
    "Minimum",
    f32::min,
    |x, y| Some(x.min(y)),
    commutative = true
);

/// Elementwise equality. The output is boolean.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Equal {
    pub auto_broadcast: AutoBroadcast,
}

impl Operator for Equal {
    fn op_type(&self) -> OpType {
        OpType::new("Equal", 1)
    }

    fn infer(
        &self,
        inputs: &[TensorInfo],
        values: &InputValues,
    ) -> Result<Vec<TensorInfo>, InferShapesError> {
        ComparisonOp {
            broadcast: self.auto_broadcast,
        }
        .infer_shapes(inputs, values)
    }

    fn visit_attributes(&self, visitor: &mut dyn AttributeVisitor) {
        visitor.on_attribute("auto_broadcast", self.auto_broadcast.name().into());
    }

    fn has_evaluate(&self) -> bool {
        true
    }

    fn evaluate(&self, inputs: &[&Tensor]) -> Result<Vec<Tensor>, OpError> {
        let (a, b) = check_operands(inputs, self.auto_broadcast)?;
        let result = match (a.data(), b.data()) {
            (TensorData::Float(x), TensorData::Float(y)) => {
                broadcast_map((a.shape(), x.as_slice()), (b.shape(), y.as_slice()), |x, y| x == y)
            }
            (TensorData::Int(x), TensorData::Int(y)) => {
                broadcast_map((a.shape(), x.as_slice()), (b.shape(), y.as_slice()), |x, y| x == y)
            }
            (TensorData::Bool(x), TensorData::Bool(y)) => {
                broadcast_map((a.shape(), x.as_slice()), (b.shape(), y.as_slice()), |x, y| x == y)
            }
            _ => None,
        };
        let (shape, data) = result
            .ok_or_else(|| OpError::IncompatibleShapes(a.shape().to_vec(), b.shape().to_vec()))?;
        Ok([Tensor::new(ElementType::Boolean, shape, TensorData::Bool(data))?].into())
    }

    fn is_commutative(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use rewire_shape_inference::AutoBroadcast;

    use super::{Add, Divide, Equal, Power};
    use crate::operator::{OpError, Operator};
    use crate::tensor::Tensor;

    #[test]
    fn test_add_broadcast() {
        let a = Tensor::from_f32(&[2, 2], vec![1., 2., 3., 4.]).unwrap();
        let b = Tensor::from_f32(&[2], vec![10., 20.]).unwrap();
        let result = Add::default().evaluate(&[&a, &b]).unwrap();
        assert_eq!(result[0].shape(), &[2, 2]);
        assert_eq!(result[0].as_f32(), Some([11., 22., 13., 24.].as_slice()));
    }

    #[test]
    fn test_no_broadcast_requires_equal_shapes() {
        let a = Tensor::from_f32(&[2, 2], vec![1., 2., 3., 4.]).unwrap();
        let b = Tensor::from_f32(&[2], vec![10., 20.]).unwrap();
        let op = Add {
            auto_broadcast: AutoBroadcast::None,
        };
        assert!(matches!(
            op.evaluate(&[&a, &b]),
            Err(OpError::IncompatibleShapes(..))
        ));
    }

    #[test]
    fn test_int_division_by_zero() {
        let a = Tensor::vector_i64(vec![4, 6]);
        let b = Tensor::vector_i64(vec![2, 0]);
        let result = Divide::default().evaluate(&[&a, &b]);
        assert!(matches!(result, Err(OpError::InvalidValue(_))));
    }

    #[test]
    fn test_int_power() {
        let a = Tensor::vector_i64(vec![2, 3]);
        let b = Tensor::scalar_i64(3);
        let result = Power::default().evaluate(&[&a, &b]).unwrap();
        assert_eq!(result[0].as_i64(), Some([8, 27].as_slice()));
    }

    #[test]
    fn test_equal() {
        let a = Tensor::vector_i64(vec![1, 2, 3]);
        let b = Tensor::scalar_i64(2);
        let result = Equal::default().evaluate(&[&a, &b]).unwrap();
        assert_eq!(result[0].as_bool(), Some([false, true, false].as_slice()));
        assert!(Equal::default().is_commutative());
    }
}
