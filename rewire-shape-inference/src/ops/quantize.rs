use crate::infer_shapes::{merge_types, AutoBroadcast, InferShapes, InferShapesError};
use crate::value::{InputValues, TensorInfo};

/// FakeQuantize operator.
///
/// Inputs are `[data, input_low, input_high, output_low, output_high]`. The
/// range inputs are broadcast against `data`.
#[derive(Clone, Debug, PartialEq)]
pub struct FakeQuantize {
    pub levels: u64,
    pub broadcast: AutoBroadcast,
}

impl InferShapes for FakeQuantize {
    fn infer_shapes(
        &self,
        inputs: &[TensorInfo],
        _values: &InputValues,
    ) -> Result<Vec<TensorInfo>, InferShapesError> {
        let [data, ranges @ ..] = inputs else {
            return Err(InferShapesError::IncorrectInputCount {
                expected: "5",
                actual: 0,
            });
        };
        if ranges.len() != 4 {
            return Err(InferShapesError::IncorrectInputCount {
                expected: "5",
                actual: inputs.len(),
            });
        }
        if self.levels < 2 {
            return Err(InferShapesError::InvalidValue(format!(
                "fake quantize requires at least 2 levels, got {}",
                self.levels
            )));
        }

        let element_type = merge_types(inputs)?;
        let mut out_shape = data.shape.clone();
        for range in ranges {
            out_shape = self.broadcast.apply(&out_shape, &range.shape)?;
        }
        Ok([TensorInfo::new(element_type, out_shape)].into())
    }
}

#[cfg(test)]
mod tests {
    use super::FakeQuantize;
    use crate::infer_shapes::{AutoBroadcast, InferShapes, InferShapesError};
    use crate::value::{InputValues, TensorInfo};
    use crate::{pshape, ElementType, PartialShape};

    fn inputs(data: PartialShape, range: PartialShape) -> Vec<TensorInfo> {
        let mut inputs = vec![TensorInfo::new(ElementType::F32, data)];
        inputs.extend((0..4).map(|_| TensorInfo::new(ElementType::F32, range.clone())));
        inputs
    }

    #[test]
    fn test_fake_quantize() {
        let op = FakeQuantize {
            levels: 256,
            broadcast: AutoBroadcast::Numpy,
        };
        let outputs = op
            .infer_shapes(&inputs(pshape![1, 3, ?, ?], pshape![1, 3, 1, 1]), &InputValues::new())
            .unwrap();
        assert_eq!(outputs[0].shape, pshape![1, 3, ?, ?]);

        let err = op
            .infer_shapes(&inputs(pshape![1, 3, 4, 4], pshape![1, 2, 1, 1]), &InputValues::new())
            .err()
            .unwrap();
        assert!(matches!(err, InferShapesError::IncompatibleShapes(..)));

        let op = FakeQuantize {
            levels: 1,
            broadcast: AutoBroadcast::Numpy,
        };
        let err = op
            .infer_shapes(&inputs(pshape![4], pshape![]), &InputValues::new())
            .err()
            .unwrap();
        assert!(matches!(err, InferShapesError::InvalidValue(_)));
    }
}
