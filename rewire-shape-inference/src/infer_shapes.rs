//! Traits for shape inference and common implementations.

use smallvec::SmallVec;

use crate::dimension::Dimension;
use crate::element_type::ElementType;
use crate::partial_shape::PartialShape;
use crate::value::{InputValues, TensorInfo};

/// Errors reported when an operator's inputs or attributes are inconsistent.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum InferShapesError {
    /// Too many or too few inputs were provided for this operator.
    #[error("expected {expected} inputs but got {actual}")]
    IncorrectInputCount {
        expected: &'static str,
        actual: usize,
    },

    /// The input shapes are incompatible.
    ///
    /// Operator execution would fail if given inputs with these shapes.
    #[error("input shapes {0} and {1} are incompatible")]
    IncompatibleShapes(PartialShape, PartialShape),

    /// The input element types are incompatible.
    #[error("input element types {0} and {1} are incompatible")]
    IncompatibleTypes(ElementType, ElementType),

    /// An input's rank does not match that expected by the operator.
    #[error("input {input} has rank {actual} but the operator requires rank {expected}")]
    IncorrectRank {
        input: usize,
        expected: &'static str,
        actual: usize,
    },

    /// An axis is outside `[-rank, rank)`.
    #[error("axis {axis} is out of range for rank {rank}")]
    AxisOutOfRange { axis: i64, rank: usize },

    /// An input has an element type the operator does not support.
    #[error("input {input} has unsupported element type {element_type}")]
    UnsupportedType {
        input: usize,
        element_type: ElementType,
    },

    /// An operator input or attribute has an invalid value.
    #[error("{0}")]
    InvalidValue(String),
}

/// Infer the types and shapes of an operator's outputs given its inputs.
pub trait InferShapes {
    /// Infer output infos from input infos.
    ///
    /// `values` contains the contents of inputs whose values are known at
    /// compile time. Operators that need the value of an input to determine
    /// the output shape, and find it missing, should return a less specific
    /// shape rather than an error, unless the value is mandatory.
    fn infer_shapes(
        &self,
        inputs: &[TensorInfo],
        values: &InputValues,
    ) -> Result<Vec<TensorInfo>, InferShapesError>;
}

/// Check that the number of inputs is in `[min, max]`.
pub(crate) fn check_input_count(
    inputs: &[TensorInfo],
    min: usize,
    max: usize,
    expected: &'static str,
) -> Result<(), InferShapesError> {
    if inputs.len() < min || inputs.len() > max {
        return Err(InferShapesError::IncorrectInputCount {
            expected,
            actual: inputs.len(),
        });
    }
    Ok(())
}

/// Check that an input which holds a list of axes, or a single axis, has
/// rank 0 or 1.
pub(crate) fn check_axes_rank(inputs: &[TensorInfo], index: usize) -> Result<(), InferShapesError> {
    match inputs.get(index).and_then(|inp| inp.shape.rank()) {
        Some(rank) if rank > 1 => Err(InferShapesError::IncorrectRank {
            input: index,
            expected: "0 or 1",
            actual: rank,
        }),
        _ => Ok(()),
    }
}

/// Merge the element types of several inputs, which must all be equal.
pub(crate) fn merge_types<'a, I: IntoIterator<Item = &'a TensorInfo>>(
    inputs: I,
) -> Result<ElementType, InferShapesError> {
    let mut merged = ElementType::Dynamic;
    for input in inputs {
        merged = merged
            .merge(input.element_type)
            .ok_or(InferShapesError::IncompatibleTypes(
                merged,
                input.element_type,
            ))?;
    }
    Ok(merged)
}

/// Normalize an axis given as a value in `[-rank, rank-1]` to a positive
/// index in `[0, rank)`.
///
/// Negative axis values count backwards from the last dimension.
pub fn normalize_axis(axis: i64, rank: usize) -> Result<usize, InferShapesError> {
    let signed_rank = rank.min(i64::MAX as usize) as i64;
    if axis < -signed_rank || axis >= signed_rank {
        return Err(InferShapesError::AxisOutOfRange { axis, rank });
    }
    if axis >= 0 {
        Ok(axis as usize)
    } else {
        Ok((signed_rank + axis) as usize)
    }
}

/// Normalize a list of axes. See [`normalize_axis`].
pub fn normalize_axes(axes: &[i64], rank: usize) -> Result<SmallVec<[usize; 4]>, InferShapesError> {
    axes.iter().map(|&axis| normalize_axis(axis, rank)).collect()
}

/// Shape inference for unary operators.
///
/// These operators take at least one input and return a single output with
/// the same type and shape as the first input. Additional inputs (eg. clamp
/// bounds) don't affect the output.
pub struct UnaryOp;

impl InferShapes for UnaryOp {
    fn infer_shapes(
        &self,
        inputs: &[TensorInfo],
        _values: &InputValues,
    ) -> Result<Vec<TensorInfo>, InferShapesError> {
        let Some(data) = inputs.first() else {
            return Err(InferShapesError::IncorrectInputCount {
                expected: "at least 1",
                actual: 0,
            });
        };
        Ok([data.clone()].into())
    }
}

/// Broadcasting rule applied by elementwise operators.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum AutoBroadcast {
    /// Input shapes must be equal.
    None,
    /// Inputs are broadcast following numpy rules.
    #[default]
    Numpy,
}

impl AutoBroadcast {
    pub fn name(self) -> &'static str {
        match self {
            AutoBroadcast::None => "none",
            AutoBroadcast::Numpy => "numpy",
        }
    }

    /// Combine two shapes under this broadcasting rule.
    pub fn apply(
        self,
        lhs: &PartialShape,
        rhs: &PartialShape,
    ) -> Result<PartialShape, InferShapesError> {
        let combined = match self {
            AutoBroadcast::None => lhs.merge(rhs),
            AutoBroadcast::Numpy => lhs.broadcast(rhs),
        };
        combined.ok_or_else(|| InferShapesError::IncompatibleShapes(lhs.clone(), rhs.clone()))
    }
}

/// Shape inference for binary elementwise operators.
///
/// The output shape is the result of broadcasting the two input shapes
/// together. With [`AutoBroadcast::None`] the shapes must be equal, so an
/// input of unknown rank takes the shape of the other input.
pub struct BinaryOp {
    pub broadcast: AutoBroadcast,
}

impl InferShapes for BinaryOp {
    fn infer_shapes(
        &self,
        inputs: &[TensorInfo],
        _values: &InputValues,
    ) -> Result<Vec<TensorInfo>, InferShapesError> {
        let [a, b] = inputs else {
            return Err(InferShapesError::IncorrectInputCount {
                expected: "2",
                actual: inputs.len(),
            });
        };
        let element_type = merge_types(inputs)?;
        let shape = self.broadcast.apply(&a.shape, &b.shape)?;
        Ok([TensorInfo::new(element_type, shape)].into())
    }
}

/// Shape inference for elementwise comparison operators.
///
/// This is the same as [`BinaryOp`] except that the output is boolean.
pub struct ComparisonOp {
    pub broadcast: AutoBroadcast,
}

impl InferShapes for ComparisonOp {
    fn infer_shapes(
        &self,
        inputs: &[TensorInfo],
        values: &InputValues,
    ) -> Result<Vec<TensorInfo>, InferShapesError> {
        let mut outputs = BinaryOp {
            broadcast: self.broadcast,
        }
        .infer_shapes(inputs, values)?;
        for output in &mut outputs {
            output.element_type = ElementType::Boolean;
        }
        Ok(outputs)
    }
}

/// Shape inference for reduction operators.
///
/// Reductions take a data input and an axes input. The reduced axes are
/// removed from the output shape, or replaced with 1 if `keep_dims` is true.
#[derive(Clone, Debug, PartialEq)]
pub struct ReductionOp {
    /// True if the reduced dimensions are retained as 1-sized dimensions in
    /// the output.
    pub keep_dims: bool,
}

impl InferShapes for ReductionOp {
    fn infer_shapes(
        &self,
        inputs: &[TensorInfo],
        values: &InputValues,
    ) -> Result<Vec<TensorInfo>, InferShapesError> {
        check_input_count(inputs, 2, 2, "2")?;
        check_axes_rank(inputs, 1)?;

        let data = &inputs[0];
        let dynamic = |shape| Ok([TensorInfo::new(data.element_type, shape)].into());

        let Some(data_dims) = data.shape.dims() else {
            return dynamic(PartialShape::dynamic());
        };
        let Some(axes) = values.ints(1) else {
            return if self.keep_dims {
                dynamic(PartialShape::dynamic_of_rank(data_dims.len()))
            } else {
                dynamic(PartialShape::dynamic())
            };
        };

        let mut axes = normalize_axes(axes, data_dims.len())?;
        axes.sort();
        axes.dedup();

        let mut out_dims = Vec::with_capacity(data_dims.len());
        for (i, dim) in data_dims.iter().enumerate() {
            if !axes.contains(&i) {
                out_dims.push(*dim);
            } else if self.keep_dims {
                out_dims.push(Dimension::fixed(1));
            }
        }

        dynamic(PartialShape::from_dims(out_dims))
    }
}

/// Shape inference for type conversion.
pub struct Convert {
    pub to: ElementType,
}

impl InferShapes for Convert {
    fn infer_shapes(
        &self,
        inputs: &[TensorInfo],
        _values: &InputValues,
    ) -> Result<Vec<TensorInfo>, InferShapesError> {
        check_input_count(inputs, 1, 1, "1")?;
        Ok([TensorInfo::new(self.to, inputs[0].shape.clone())].into())
    }
}

#[cfg(test)]
mod tests {
    use rewire_testing::TestCases;

    use super::{
        normalize_axis, AutoBroadcast, BinaryOp, ComparisonOp, InferShapes, InferShapesError,
        ReductionOp, UnaryOp,
    };
    use crate::value::{ConstValue, InputValues, TensorInfo};
    use crate::{pshape, ElementType, PartialShape};

    fn f32_info(shape: PartialShape) -> TensorInfo {
        TensorInfo::new(ElementType::F32, shape)
    }

    #[test]
    fn test_unary_op() {
        let input = f32_info(pshape![?, 16, ?, 24]);
        let values = InputValues::new();
        let outputs = UnaryOp.infer_shapes(&[input.clone()], &values).unwrap();
        assert_eq!(outputs, [input]);

        let err = UnaryOp.infer_shapes(&[], &values).err().unwrap();
        assert!(matches!(err, InferShapesError::IncorrectInputCount { .. }));
    }

    #[test]
    fn test_binary_op() {
        #[derive(Debug)]
        struct Case {
            lhs: PartialShape,
            rhs: PartialShape,
            broadcast: AutoBroadcast,
            expected: Result<PartialShape, ()>,
        }

        let cases = [
            Case {
                lhs: pshape![2, 3],
                rhs: pshape![2, 3],
                broadcast: AutoBroadcast::Numpy,
                expected: Ok(pshape![2, 3]),
            },
            Case {
                lhs: pshape![1, 5],
                rhs: pshape![4, 1],
                broadcast: AutoBroadcast::Numpy,
                expected: Ok(pshape![4, 5]),
            },
            Case {
                lhs: pshape![5],
                rhs: pshape![3],
                broadcast: AutoBroadcast::Numpy,
                expected: Err(()),
            },
            Case {
                lhs: pshape![1, 5],
                rhs: pshape![4, 1],
                broadcast: AutoBroadcast::None,
                expected: Err(()),
            },
            // Without broadcasting, the rank of an input of unknown rank is
            // inferred from the other operand.
            Case {
                lhs: PartialShape::dynamic(),
                rhs: pshape![4, ?],
                broadcast: AutoBroadcast::None,
                expected: Ok(pshape![4, ?]),
            },
            Case {
                lhs: PartialShape::dynamic(),
                rhs: pshape![4, ?],
                broadcast: AutoBroadcast::Numpy,
                expected: Ok(PartialShape::dynamic()),
            },
        ];

        cases.test_each(|case| {
            let op = BinaryOp {
                broadcast: case.broadcast,
            };
            let inputs = [f32_info(case.lhs.clone()), f32_info(case.rhs.clone())];
            let result = op.infer_shapes(&inputs, &InputValues::new());
            match &case.expected {
                Ok(shape) => assert_eq!(result.unwrap(), [f32_info(shape.clone())]),
                Err(()) => assert!(matches!(
                    result,
                    Err(InferShapesError::IncompatibleShapes(..))
                )),
            }
        });
    }

    #[test]
    fn test_binary_op_type_mismatch() {
        let op = BinaryOp {
            broadcast: AutoBroadcast::Numpy,
        };
        let inputs = [
            TensorInfo::from_static(ElementType::F32, &[2]),
            TensorInfo::from_static(ElementType::I64, &[2]),
        ];
        let err = op.infer_shapes(&inputs, &InputValues::new()).err();
        assert_eq!(
            err,
            Some(InferShapesError::IncompatibleTypes(
                ElementType::F32,
                ElementType::I64
            ))
        );
    }

    #[test]
    fn test_comparison_op() {
        let op = ComparisonOp {
            broadcast: AutoBroadcast::Numpy,
        };
        let inputs = [f32_info(pshape![3, 1]), f32_info(pshape![4])];
        let outputs = op.infer_shapes(&inputs, &InputValues::new()).unwrap();
        assert_eq!(
            outputs,
            [TensorInfo::new(ElementType::Boolean, pshape![3, 4])]
        );
    }

    #[test]
    fn test_reduction_op() {
        #[derive(Debug)]
        struct Case {
            data: PartialShape,
            axes: Option<Vec<i64>>,
            keep_dims: bool,
            expected: PartialShape,
        }

        let cases = [
            // Reduce single axis
            Case {
                data: pshape![?, 4, 5],
                axes: Some(vec![1]),
                keep_dims: false,
                expected: pshape![?, 5],
            },
            // Reduce single axis with `keep_dims=true`
            Case {
                data: pshape![?, 4, 5],
                axes: Some(vec![1]),
                keep_dims: true,
                expected: pshape![?, 1, 5],
            },
            // Negative and repeated axes
            Case {
                data: pshape![2, 4, 5],
                axes: Some(vec![-1, 2, 0]),
                keep_dims: false,
                expected: pshape![4],
            },
            // Empty axes reduce nothing
            Case {
                data: pshape![2, 4],
                axes: Some(vec![]),
                keep_dims: false,
                expected: pshape![2, 4],
            },
            // Unknown axes, rank is preserved only with `keep_dims`
            Case {
                data: pshape![2, 4],
                axes: None,
                keep_dims: true,
                expected: pshape![?, ?],
            },
            Case {
                data: pshape![2, 4],
                axes: None,
                keep_dims: false,
                expected: PartialShape::dynamic(),
            },
            Case {
                data: PartialShape::dynamic(),
                axes: Some(vec![0]),
                keep_dims: true,
                expected: PartialShape::dynamic(),
            },
        ];

        cases.test_each(|case| {
            let op = ReductionOp {
                keep_dims: case.keep_dims,
            };
            let axes_len = case.axes.as_ref().map(|a| a.len()).unwrap_or(1);
            let inputs = [
                f32_info(case.data.clone()),
                TensorInfo::from_static(ElementType::I64, &[axes_len]),
            ];
            let mut values = InputValues::new();
            if let Some(axes) = &case.axes {
                values.insert_value(1, ConstValue::Int(axes.clone()));
            }
            let outputs = op.infer_shapes(&inputs, &values).unwrap();
            assert_eq!(outputs, [f32_info(case.expected.clone())]);
        });
    }

    #[test]
    fn test_reduction_op_invalid() {
        let op = ReductionOp { keep_dims: false };

        // Axes input must be a scalar or vector.
        let inputs = [
            f32_info(pshape![2, 3]),
            TensorInfo::from_static(ElementType::I64, &[1, 1]),
        ];
        let err = op.infer_shapes(&inputs, &InputValues::new()).err();
        assert_eq!(
            err,
            Some(InferShapesError::IncorrectRank {
                input: 1,
                expected: "0 or 1",
                actual: 2
            })
        );

        // Axis out of range.
        let inputs = [
            f32_info(pshape![2, 3]),
            TensorInfo::from_static(ElementType::I64, &[1]),
        ];
        let values = InputValues::new().with_value(1, ConstValue::Int(vec![2]));
        let err = op.infer_shapes(&inputs, &values).err();
        assert_eq!(
            err,
            Some(InferShapesError::AxisOutOfRange { axis: 2, rank: 2 })
        );
    }

    #[test]
    fn test_normalize_axis() {
        assert_eq!(normalize_axis(-1, 3), Ok(2));
        assert_eq!(normalize_axis(-3, 3), Ok(0));
        assert_eq!(normalize_axis(2, 3), Ok(2));
        assert!(normalize_axis(3, 3).is_err());
        assert!(normalize_axis(-4, 3).is_err());
        assert!(normalize_axis(0, 0).is_err());
    }
}
