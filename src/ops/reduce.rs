use rewire_shape_inference::{
    ElementType, InferShapes, InferShapesError, InputValues, ReductionOp, TensorInfo,
};

use crate::operator::{AttributeVisitor, OpType, Operator};

/// Check that the data input of a logical reduction is boolean.
fn check_boolean_input(inputs: &[TensorInfo]) -> Result<(), InferShapesError> {
    match inputs.first() {
        Some(data)
            if !matches!(
                data.element_type,
                ElementType::Boolean | ElementType::Dynamic
            ) =>
        {
            Err(InferShapesError::UnsupportedType {
                input: 0,
                element_type: data.element_type,
            })
        }
        _ => Ok(()),
    }
}

macro_rules! reduction_op {
    ($op:ident, $name:literal, logical = $logical:literal) => {
        #[derive(Clone, Debug, Default, PartialEq)]
        pub struct $op {
            pub keep_dims: bool,
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
                if $logical {
                    check_boolean_input(inputs)?;
                }
                ReductionOp {
                    keep_dims: self.keep_dims,
                }
                .infer_shapes(inputs, values)
            }

            fn visit_attributes(&self, visitor: &mut dyn AttributeVisitor) {
                visitor.on_attribute("keep_dims", self.keep_dims.into());
            }
        }
    };
}

reduction_op!(ReduceMean, "ReduceMean", logical = false);
reduction_op!(ReduceSum, "ReduceSum", logical = false);
reduction_op!(ReduceMax, "ReduceMax", logical = false);
reduction_op!(ReduceMin, "ReduceMin", logical = false);
reduction_op!(ReduceLogicalAnd, "ReduceLogicalAnd", logical = true);
reduction_op!(ReduceLogicalOr, "ReduceLogicalOr", logical = true);

#[cfg(test)]
mod tests {
    use rewire_shape_inference::{pshape, ConstValue, ElementType, InputValues, TensorInfo};

    use super::{ReduceLogicalOr, ReduceMean};
    use crate::operator::Operator;

    #[test]
    fn test_reduce_mean_keep_dims() {
        let inputs = [
            TensorInfo::new(ElementType::F32, pshape![1, 8]),
            TensorInfo::new(ElementType::I64, pshape![1]),
        ];
        let values = InputValues::new().with_value(1, ConstValue::Int(vec![0]));
        let op = ReduceMean { keep_dims: true };
        let outputs = op.infer(&inputs, &values).unwrap();
        assert_eq!(outputs[0].shape, pshape![1, 8]);

        let op = ReduceMean { keep_dims: false };
        let outputs = op.infer(&inputs, &values).unwrap();
        assert_eq!(outputs[0].shape, pshape![8]);
    }

    #[test]
    fn test_logical_reduction_requires_boolean() {
        let inputs = [
            TensorInfo::new(ElementType::F32, pshape![2, 3]),
            TensorInfo::new(ElementType::I64, pshape![]),
        ];
        let op = ReduceLogicalOr { keep_dims: false };
        assert!(op.infer(&inputs, &InputValues::new()).is_err());
    }
}
