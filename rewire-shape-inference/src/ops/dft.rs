use crate::dimension::Dimension;
use crate::infer_shapes::{check_input_count, normalize_axes, InferShapes, InferShapesError};
use crate::partial_shape::PartialShape;
use crate::value::{InputValues, TensorInfo};

/// Discrete Fourier transform.
///
/// Inputs are `[data, axes, signal_size?]`. `data` holds complex numbers as
/// pairs of reals, so its last dimension must be 2, and `axes` refer to the
/// other dimensions. Without a signal size input the output shape equals the
/// input shape. Otherwise each transformed axis is resized to the matching
/// signal size, where `-1` keeps the input size.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Dft;

impl InferShapes for Dft {
    fn infer_shapes(
        &self,
        inputs: &[TensorInfo],
        values: &InputValues,
    ) -> Result<Vec<TensorInfo>, InferShapesError> {
        check_input_count(inputs, 2, 3, "2 or 3")?;
        for (index, input) in inputs.iter().enumerate().skip(1) {
            match input.shape.rank() {
                Some(rank) if rank != 1 => {
                    return Err(InferShapesError::IncorrectRank {
                        input: index,
                        expected: "1",
                        actual: rank,
                    });
                }
                _ => {}
            }
        }
        if let (Some(axes_len), Some(sizes_len)) = (
            inputs[1].shape.dim(0).and_then(|d| d.get_length()),
            inputs.get(2).and_then(|s| s.shape.dim(0)?.get_length()),
        ) {
            if axes_len != sizes_len {
                return Err(InferShapesError::IncompatibleShapes(
                    inputs[1].shape.clone(),
                    inputs[2].shape.clone(),
                ));
            }
        }

        let data = &inputs[0];
        let output = |shape| Ok([TensorInfo::new(data.element_type, shape)].into());
        let Some(in_dims) = data.shape.dims() else {
            return output(PartialShape::dynamic());
        };
        if in_dims.len() < 2 {
            return Err(InferShapesError::IncorrectRank {
                input: 0,
                expected: "at least 2",
                actual: in_dims.len(),
            });
        }
        if let Some(last) = in_dims.last() {
            if !last.contains(2) {
                return Err(InferShapesError::InvalidValue(format!(
                    "last dimension of complex input must be 2, got {}",
                    last
                )));
            }
        }

        // The trailing complex dimension cannot be transformed.
        let signal_rank = in_dims.len() - 1;
        let axes = match values.ints(1) {
            Some(axes) => {
                let norm_axes = normalize_axes(axes, signal_rank)?;
                let mut sorted = norm_axes.clone();
                sorted.sort();
                if sorted.windows(2).any(|w| w[0] == w[1]) {
                    return Err(InferShapesError::InvalidValue(format!(
                        "DFT axes {:?} contain duplicates",
                        axes
                    )));
                }
                Some(norm_axes)
            }
            None => None,
        };

        if inputs.len() == 2 {
            return output(data.shape.clone());
        }

        let mut out_dims: Vec<Dimension> = in_dims.to_vec();
        match (axes, values.ints(2)) {
            (Some(axes), Some(sizes)) => {
                if axes.len() != sizes.len() {
                    return Err(InferShapesError::InvalidValue(format!(
                        "DFT has {} axes but {} signal sizes",
                        axes.len(),
                        sizes.len()
                    )));
                }
                for (&axis, &size) in axes.iter().zip(sizes) {
                    match size {
                        -1 => {}
                        size if size >= 0 => out_dims[axis] = Dimension::fixed(size as usize),
                        size => {
                            return Err(InferShapesError::InvalidValue(format!(
                                "invalid signal size {}",
                                size
                            )));
                        }
                    }
                }
            }
            (Some(axes), None) => {
                for axis in axes {
                    out_dims[axis] = Dimension::dynamic();
                }
            }
            (None, _) => {
                for dim in &mut out_dims[..signal_rank] {
                    *dim = Dimension::dynamic();
                }
            }
        }

        output(PartialShape::from_dims(out_dims))
    }
}

#[cfg(test)]
mod tests {
    use rewire_testing::TestCases;

    use super::Dft;
    use crate::infer_shapes::InferShapes;
    use crate::value::{ConstValue, InputValues, TensorInfo};
    use crate::{pshape, ElementType, PartialShape};

    #[test]
    fn test_dft() {
        #[derive(Debug)]
        struct Case {
            data: PartialShape,
            axes: Option<Vec<i64>>,
            signal_size: Option<Option<Vec<i64>>>,
            expected: Result<PartialShape, ()>,
        }

        let cases = [
            Case {
                data: pshape![2, 16, 16, 2],
                axes: Some([1, 2].into()),
                signal_size: None,
                expected: Ok(pshape![2, 16, 16, 2]),
            },
            Case {
                data: pshape![2, 16, 16, 2],
                axes: Some([-2, -1].into()),
                signal_size: Some(Some([8, -1].into())),
                expected: Ok(pshape![2, 8, 16, 2]),
            },
            Case {
                data: pshape![2, 16, 16, 2],
                axes: Some([1].into()),
                signal_size: Some(None),
                expected: Ok(pshape![2, ?, 16, 2]),
            },
            Case {
                data: pshape![2, 16, 16, 2],
                axes: None,
                signal_size: Some(None),
                expected: Ok(pshape![?, ?, ?, 2]),
            },
            // Last dimension must hold (real, imaginary) pairs.
            Case {
                data: pshape![2, 16, 3],
                axes: Some([0].into()),
                signal_size: None,
                expected: Err(()),
            },
            // Axes cannot refer to the complex dimension.
            Case {
                data: pshape![2, 16, 2],
                axes: Some([2].into()),
                signal_size: None,
                expected: Err(()),
            },
            Case {
                data: pshape![2, 16, 2],
                axes: Some([0, 0].into()),
                signal_size: None,
                expected: Err(()),
            },
        ];

        cases.test_each(|case| {
            let axes_len = case.axes.as_ref().map(|a| a.len()).unwrap_or(2);
            let mut inputs = vec![
                TensorInfo::new(ElementType::F32, case.data.clone()),
                TensorInfo::from_static(ElementType::I64, &[axes_len]),
            ];
            let mut values = InputValues::new();
            if let Some(axes) = &case.axes {
                values.insert_value(1, ConstValue::Int(axes.clone()));
            }
            if let Some(sizes) = &case.signal_size {
                inputs.push(TensorInfo::from_static(ElementType::I64, &[axes_len]));
                if let Some(sizes) = sizes {
                    values.insert_value(2, ConstValue::Int(sizes.clone()));
                }
            }

            let result = Dft.infer_shapes(&inputs, &values);
            match &case.expected {
                Ok(shape) => assert_eq!(result.unwrap()[0].shape, *shape),
                Err(()) => assert!(result.is_err()),
            }
        });
    }
}
