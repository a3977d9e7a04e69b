use crate::dimension::Dimension;
use crate::infer_shapes::{check_axes_rank, normalize_axis, InferShapes, InferShapesError};
use crate::labels::EvaluateLabels;
use crate::partial_shape::PartialShape;
use crate::value::{InputValues, TensorInfo, TensorLabels};

/// Gather operator.
///
/// Inputs are `[data, indices, axis]`. The output shape is
/// `data[..axis] ++ indices[batch_dims..] ++ data[axis + 1..]`, where the
/// first `batch_dims` dimensions of `data` and `indices` are shared.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Gather {
    pub batch_dims: i64,
}

impl Gather {
    /// Return the normalized axis, if the axis input is a known scalar or
    /// one-element vector.
    fn axis(values: &InputValues, data_rank: usize) -> Result<Option<usize>, InferShapesError> {
        match values.ints(2) {
            Some([axis]) => normalize_axis(*axis, data_rank).map(Some),
            Some(axes) => Err(InferShapesError::InvalidValue(format!(
                "gather axis must be a single value, got {:?}",
                axes
            ))),
            None => Ok(None),
        }
    }

    fn batch_dims(&self, indices_rank: usize) -> Result<usize, InferShapesError> {
        let batch_dims = if self.batch_dims < 0 {
            self.batch_dims + indices_rank as i64
        } else {
            self.batch_dims
        };
        if batch_dims < 0 || batch_dims as usize > indices_rank {
            return Err(InferShapesError::InvalidValue(format!(
                "batch_dims {} is out of range for indices of rank {}",
                self.batch_dims, indices_rank
            )));
        }
        Ok(batch_dims as usize)
    }
}

impl InferShapes for Gather {
    fn infer_shapes(
        &self,
        inputs: &[TensorInfo],
        values: &InputValues,
    ) -> Result<Vec<TensorInfo>, InferShapesError> {
        let [data, indices, _axis] = inputs else {
            return Err(InferShapesError::IncorrectInputCount {
                expected: "3",
                actual: inputs.len(),
            });
        };
        check_axes_rank(inputs, 2)?;
        if !indices.element_type.is_dynamic() && !indices.element_type.is_integral() {
            return Err(InferShapesError::UnsupportedType {
                input: 1,
                element_type: indices.element_type,
            });
        }

        let output = |shape| Ok([TensorInfo::new(data.element_type, shape)].into());

        let (Some(data_dims), Some(index_dims)) = (data.shape.dims(), indices.shape.dims()) else {
            return output(PartialShape::dynamic());
        };
        let batch_dims = self.batch_dims(index_dims.len())?;

        let Some(axis) = Gather::axis(values, data_dims.len())? else {
            let out_rank = (data_dims.len() + index_dims.len()).checked_sub(1 + batch_dims);
            return match out_rank {
                Some(rank) => output(PartialShape::dynamic_of_rank(rank)),
                None => output(PartialShape::dynamic()),
            };
        };
        if batch_dims > axis {
            return Err(InferShapesError::InvalidValue(format!(
                "batch_dims {} must not exceed axis {}",
                batch_dims, axis
            )));
        }

        let mut out_dims: Vec<Dimension> =
            Vec::with_capacity(data_dims.len() + index_dims.len() - 1 - batch_dims);
        for (data_dim, index_dim) in data_dims.iter().zip(index_dims).take(batch_dims) {
            let dim = data_dim.merge(index_dim).ok_or_else(|| {
                InferShapesError::IncompatibleShapes(data.shape.clone(), indices.shape.clone())
            })?;
            out_dims.push(dim);
        }
        out_dims.extend_from_slice(&data_dims[batch_dims..axis]);
        out_dims.extend_from_slice(&index_dims[batch_dims..]);
        out_dims.extend_from_slice(&data_dims[axis + 1..]);

        output(PartialShape::from_dims(out_dims))
    }
}

impl EvaluateLabels for Gather {
    /// Labels are propagated when gathering from a labeled vector, such as
    /// the output of `ShapeOf`, using constant indices.
    fn evaluate_labels(
        &self,
        inputs: &[TensorInfo],
        values: &InputValues,
    ) -> Option<Vec<TensorLabels>> {
        let labels = values.labels(0)?;
        if inputs.first()?.shape.rank() != Some(1) {
            return None;
        }
        if Gather::axis(values, 1).ok()? != Some(0) {
            return None;
        }
        let indices = values.ints(1)?;
        let out = indices
            .iter()
            .map(|&index| {
                let index = normalize_axis(index, labels.len()).ok()?;
                Some(labels[index])
            })
            .collect::<Option<TensorLabels>>()?;
        Some(vec![out])
    }
}

#[cfg(test)]
mod tests {
    use rewire_testing::TestCases;

    use super::Gather;
    use crate::infer_shapes::InferShapes;
    use crate::labels::EvaluateLabels;
    use crate::value::{ConstValue, InputValues, TensorInfo};
    use crate::{pshape, ElementType, Label, PartialShape};

    #[test]
    fn test_gather() {
        #[derive(Debug)]
        struct Case {
            data: PartialShape,
            indices: PartialShape,
            axis: Option<i64>,
            batch_dims: i64,
            expected: Result<PartialShape, ()>,
        }

        let cases = [
            Case {
                data: pshape![5, 6, 7],
                indices: pshape![2, 3],
                axis: Some(1),
                batch_dims: 0,
                expected: Ok(pshape![5, 2, 3, 7]),
            },
            Case {
                data: pshape![5, 6, 7],
                indices: pshape![],
                axis: Some(-1),
                batch_dims: 0,
                expected: Ok(pshape![5, 6]),
            },
            Case {
                data: pshape![4, 6, 7],
                indices: pshape![?, 3],
                axis: Some(1),
                batch_dims: 1,
                expected: Ok(pshape![4, 3, 7]),
            },
            Case {
                data: pshape![4, 6, 7],
                indices: pshape![4, 3],
                axis: Some(2),
                batch_dims: -1,
                expected: Ok(pshape![4, 6, 3]),
            },
            Case {
                data: pshape![4, 6, 7],
                indices: pshape![5, 3],
                axis: Some(1),
                batch_dims: 1,
                expected: Err(()),
            },
            Case {
                data: pshape![4, 6, 7],
                indices: pshape![4, 3],
                axis: Some(0),
                batch_dims: 1,
                expected: Err(()),
            },
            Case {
                data: pshape![4, 6, 7],
                indices: pshape![2],
                axis: None,
                batch_dims: 0,
                expected: Ok(pshape![?, ?, ?]),
            },
        ];

        cases.test_each(|case| {
            let op = Gather {
                batch_dims: case.batch_dims,
            };
            let inputs = [
                TensorInfo::new(ElementType::F32, case.data.clone()),
                TensorInfo::new(ElementType::I64, case.indices.clone()),
                TensorInfo::from_static(ElementType::I64, &[]),
            ];
            let mut values = InputValues::new();
            if let Some(axis) = case.axis {
                values.insert_value(2, ConstValue::Int(vec![axis]));
            }
            let result = op.infer_shapes(&inputs, &values);
            match &case.expected {
                Ok(shape) => assert_eq!(result.unwrap()[0].shape, *shape),
                Err(()) => assert!(result.is_err()),
            }
        });
    }

    #[test]
    fn test_gather_labels() {
        let inputs = [
            TensorInfo::from_static(ElementType::I64, &[3]),
            TensorInfo::from_static(ElementType::I64, &[2]),
            TensorInfo::from_static(ElementType::I64, &[]),
        ];
        let values = InputValues::new()
            .with_labels(0, vec![Label::new(1), None, Label::new(3)])
            .with_value(1, ConstValue::Int(vec![2, -3]))
            .with_value(2, ConstValue::Int(vec![0]));
        let labels = Gather::default().evaluate_labels(&inputs, &values);
        assert_eq!(labels, Some(vec![vec![Label::new(3), Label::new(1)]]));
    }
}
