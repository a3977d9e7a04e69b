use std::collections::BTreeSet;

use smallvec::SmallVec;

use crate::dimension::{Dimension, Label};
use crate::element_type::ElementType;
use crate::infer_shapes::{
    check_axes_rank, check_input_count, merge_types, normalize_axes, normalize_axis, InferShapes,
    InferShapesError,
};
use crate::labels::{any_input_labels, labels_or_empty, passthrough_labels, EvaluateLabels};
use crate::partial_shape::PartialShape;
use crate::value::{InputValues, TensorInfo, TensorLabels};

fn single_output(element_type: ElementType, shape: PartialShape) -> Vec<TensorInfo> {
    [TensorInfo::new(element_type, shape)].into()
}

/// Concatenate row-major buffers along `axis`.
///
/// `shapes[i]` is the shape of `values[i]`. All shapes must have the same
/// rank and the same sizes outside of `axis`.
pub fn concat_values<T: Clone>(shapes: &[&[usize]], values: &[&[T]], axis: usize) -> Vec<T> {
    let outer: usize = shapes
        .first()
        .map(|shape| shape[..axis].iter().product())
        .unwrap_or(0);
    let inner: Vec<usize> = shapes
        .iter()
        .map(|shape| shape[axis..].iter().product())
        .collect();

    let mut out = Vec::with_capacity(values.iter().map(|v| v.len()).sum());
    for o in 0..outer {
        for (chunk, buf) in inner.iter().zip(values) {
            out.extend_from_slice(&buf[o * chunk..(o + 1) * chunk]);
        }
    }
    out
}

/// Concat operator.
///
/// Dimensions other than `axis` must be compatible across inputs. The
/// output size along `axis` is the sum of the input sizes.
#[derive(Clone, Debug, PartialEq)]
pub struct Concat {
    pub axis: i64,
}

impl InferShapes for Concat {
    fn infer_shapes(
        &self,
        inputs: &[TensorInfo],
        _values: &InputValues,
    ) -> Result<Vec<TensorInfo>, InferShapesError> {
        if inputs.is_empty() {
            return Err(InferShapesError::IncorrectInputCount {
                expected: "at least 1",
                actual: 0,
            });
        }
        let element_type = merge_types(inputs)?;

        let Some(first_ranked) = inputs.iter().find(|inp| inp.shape.is_rank_static()) else {
            return Ok(single_output(element_type, PartialShape::dynamic()));
        };
        let rank = first_ranked.shape.rank().unwrap_or(0);
        if rank == 0 {
            return Err(InferShapesError::IncorrectRank {
                input: 0,
                expected: "at least 1",
                actual: 0,
            });
        }
        let axis = normalize_axis(self.axis, rank)?;

        let incompatible = |shape: &PartialShape| {
            InferShapesError::IncompatibleShapes(first_ranked.shape.clone(), shape.clone())
        };

        let mut merged = PartialShape::dynamic_of_rank(rank);
        let mut concat_dim = Dimension::fixed(0);
        for input in inputs {
            let Some(dims) = input.shape.dims() else {
                concat_dim = concat_dim + Dimension::dynamic();
                continue;
            };
            if dims.len() != rank {
                return Err(incompatible(&input.shape));
            }
            concat_dim = concat_dim + dims[axis];

            let mut masked = input.shape.clone();
            if let Some(masked_dims) = masked.dims_mut() {
                masked_dims[axis] = Dimension::dynamic();
            }
            merged = merged
                .merge(&masked)
                .ok_or_else(|| incompatible(&input.shape))?;
        }

        if let Some(dims) = merged.dims_mut() {
            dims[axis] = concat_dim;
        }
        Ok(single_output(element_type, merged))
    }
}

impl EvaluateLabels for Concat {
    fn evaluate_labels(
        &self,
        inputs: &[TensorInfo],
        values: &InputValues,
    ) -> Option<Vec<TensorLabels>> {
        if !any_input_labels(values, inputs.len()) {
            return None;
        }

        let shapes: Vec<Vec<usize>> = inputs
            .iter()
            .map(|inp| inp.shape.to_shape())
            .collect::<Option<_>>()?;
        let rank = shapes.first()?.len();
        let axis = normalize_axis(self.axis, rank).ok()?;

        let labels: Vec<TensorLabels> = shapes
            .iter()
            .enumerate()
            .map(|(i, shape)| labels_or_empty(values, i, shape.iter().product()))
            .collect::<Option<_>>()?;

        let shape_refs: Vec<&[usize]> = shapes.iter().map(|s| s.as_slice()).collect();
        let label_refs: Vec<&[Option<Label>]> = labels.iter().map(|l| l.as_slice()).collect();
        Some(vec![concat_values(&shape_refs, &label_refs, axis)])
    }
}

/// Unsqueeze operator.
///
/// Inserts 1-sized dimensions at the positions given by the axes input.
/// Axes are resolved against the output rank, which is the input rank plus
/// the number of unique axes.
#[derive(Clone, Debug, PartialEq)]
pub struct Unsqueeze;

impl InferShapes for Unsqueeze {
    fn infer_shapes(
        &self,
        inputs: &[TensorInfo],
        values: &InputValues,
    ) -> Result<Vec<TensorInfo>, InferShapesError> {
        check_input_count(inputs, 2, 2, "2")?;
        check_axes_rank(inputs, 1)?;

        let data = &inputs[0];
        let (Some(axes), Some(in_rank)) = (values.ints(1), data.shape.rank()) else {
            return Ok(single_output(data.element_type, PartialShape::dynamic()));
        };
        if axes.is_empty() {
            return Err(InferShapesError::InvalidValue(
                "unsqueeze axes must not be empty".into(),
            ));
        }

        let unique_axes: BTreeSet<i64> = axes.iter().copied().collect();
        let out_rank = in_rank + unique_axes.len();
        let norm_axes = unique_axes
            .iter()
            .map(|&axis| normalize_axis(axis, out_rank))
            .collect::<Result<BTreeSet<usize>, _>>()?;

        // Axes that are distinct before normalization may resolve to the same
        // position (eg. `-1` and `3` for output rank 4). In that case fewer
        // dimensions are inserted than the output rank assumed, and an axis
        // beyond the current end appends instead.
        let mut out_shape = data.shape.clone();
        for axis in norm_axes {
            let len = out_shape.rank().unwrap_or(0);
            if axis > len + 1 {
                return Err(InferShapesError::AxisOutOfRange {
                    axis: axis as i64,
                    rank: len + 1,
                });
            }
            if axis <= len {
                out_shape.insert(axis, Dimension::fixed(1));
            } else {
                out_shape.push(Dimension::fixed(1));
            }
        }

        Ok(single_output(data.element_type, out_shape))
    }
}

impl EvaluateLabels for Unsqueeze {
    fn evaluate_labels(
        &self,
        _inputs: &[TensorInfo],
        values: &InputValues,
    ) -> Option<Vec<TensorLabels>> {
        passthrough_labels(values)
    }
}

/// Squeeze operator.
///
/// Removes the 1-sized dimensions listed in the optional axes input, or
/// every 1-sized dimension if there is no axes input.
#[derive(Clone, Debug, PartialEq)]
pub struct Squeeze;

impl InferShapes for Squeeze {
    fn infer_shapes(
        &self,
        inputs: &[TensorInfo],
        values: &InputValues,
    ) -> Result<Vec<TensorInfo>, InferShapesError> {
        check_input_count(inputs, 1, 2, "1 or 2")?;
        check_axes_rank(inputs, 1)?;

        let data = &inputs[0];
        let Some(dims) = data.shape.dims() else {
            return Ok(single_output(data.element_type, PartialShape::dynamic()));
        };

        if inputs.len() == 1 {
            if dims.iter().any(|d| d.is_dynamic() && d.contains(1)) {
                return Ok(single_output(data.element_type, PartialShape::dynamic()));
            }
            let out_shape = dims.iter().filter(|d| d.get_length() != Some(1)).copied();
            return Ok(single_output(data.element_type, out_shape.collect()));
        }

        let Some(axes) = values.ints(1) else {
            return Ok(single_output(data.element_type, PartialShape::dynamic()));
        };
        let mut axes = normalize_axes(axes, dims.len())?;
        axes.sort();
        axes.dedup();

        for &axis in &axes {
            match dims[axis].get_length() {
                Some(1) | None => {}
                Some(size) => {
                    return Err(InferShapesError::InvalidValue(format!(
                        "dimension {} has size {} and cannot be squeezed",
                        axis, size
                    )));
                }
            }
        }

        let out_shape = dims
            .iter()
            .enumerate()
            .filter(|(i, _)| !axes.contains(i))
            .map(|(_, d)| *d);
        Ok(single_output(data.element_type, out_shape.collect()))
    }
}

impl EvaluateLabels for Squeeze {
    fn evaluate_labels(
        &self,
        _inputs: &[TensorInfo],
        values: &InputValues,
    ) -> Option<Vec<TensorLabels>> {
        passthrough_labels(values)
    }
}

/// Reshape operator.
///
/// The target shape input may contain one `-1` entry, whose size is
/// inferred from the element count. If `special_zero` is true, a `0` entry
/// copies the input dimension at the same index.
#[derive(Clone, Debug, PartialEq)]
pub struct Reshape {
    pub special_zero: bool,
}

impl Reshape {
    fn resolve_target(
        &self,
        data: &PartialShape,
        target: &[i64],
    ) -> Result<PartialShape, InferShapesError> {
        let mut inferred_index = None;
        let mut dims: SmallVec<[Dimension; 4]> = SmallVec::with_capacity(target.len());

        for (i, &size) in target.iter().enumerate() {
            let dim = match size {
                -1 => {
                    if inferred_index.replace(i).is_some() {
                        return Err(InferShapesError::InvalidValue(
                            "at most one reshape target dimension can be -1".into(),
                        ));
                    }
                    Dimension::dynamic()
                }
                0 if self.special_zero => match data.dims() {
                    Some(in_dims) => *in_dims.get(i).ok_or_else(|| {
                        InferShapesError::InvalidValue(format!(
                            "reshape target dimension {} copies a missing input dimension",
                            i
                        ))
                    })?,
                    None => Dimension::dynamic(),
                },
                size if size >= 0 => Dimension::fixed(size as usize),
                size => {
                    return Err(InferShapesError::InvalidValue(format!(
                        "invalid reshape target dimension {}",
                        size
                    )));
                }
            };
            dims.push(dim);
        }

        let in_count = match data.to_shape() {
            Some(shape) => element_count(shape.into_iter().map(Some))?,
            None => None,
        };
        let known_count = element_count(
            dims.iter()
                .enumerate()
                .filter(|(i, _)| Some(*i) != inferred_index)
                .map(|(_, d)| d.get_length()),
        )?;

        if let (Some(in_count), Some(known_count)) = (in_count, known_count) {
            let mismatch = || {
                InferShapesError::InvalidValue(format!(
                    "cannot reshape {} to {:?}",
                    data, target
                ))
            };
            match inferred_index {
                Some(index) => {
                    if known_count == 0 || in_count % known_count != 0 {
                        return Err(mismatch());
                    }
                    dims[index] = Dimension::fixed(in_count / known_count);
                }
                None if known_count != in_count => return Err(mismatch()),
                None => {}
            }
        }

        Ok(PartialShape::from_dims(dims))
    }
}

/// Attach value labels of the target shape to the dynamic dimensions of
/// `shape` which don't already have a label.
/// Return the product of `sizes`, or `None` if any size is unknown.
fn element_count(
    sizes: impl IntoIterator<Item = Option<usize>>,
) -> Result<Option<usize>, InferShapesError> {
    let mut count = Some(1usize);
    for size in sizes {
        count = match (count, size) {
            (Some(count), Some(size)) => Some(count.checked_mul(size).ok_or_else(|| {
                InferShapesError::InvalidValue("reshape element count overflows".to_string())
            })?),
            _ => None,
        };
    }
    Ok(count)
}

fn label_dims_from_values(shape: &mut PartialShape, labels: Option<&[Option<Label>]>) {
    let (Some(dims), Some(labels)) = (shape.dims_mut(), labels) else {
        return;
    };
    if dims.len() != labels.len() {
        return;
    }
    for (dim, label) in dims.iter_mut().zip(labels) {
        if dim.is_dynamic() && dim.label().is_none() {
            dim.set_label(*label);
        }
    }
}

impl InferShapes for Reshape {
    fn infer_shapes(
        &self,
        inputs: &[TensorInfo],
        values: &InputValues,
    ) -> Result<Vec<TensorInfo>, InferShapesError> {
        let [data, shape] = inputs else {
            return Err(InferShapesError::IncorrectInputCount {
                expected: "2",
                actual: inputs.len(),
            });
        };
        check_axes_rank(inputs, 1)?;
        if !shape.element_type.is_dynamic() && !shape.element_type.is_integral() {
            return Err(InferShapesError::UnsupportedType {
                input: 1,
                element_type: shape.element_type,
            });
        }

        let mut out_shape = match values.ints(1) {
            Some(target) => self.resolve_target(&data.shape, target)?,
            None => match shape.shape.dims() {
                Some([]) => PartialShape::dynamic_of_rank(1),
                Some([len]) => match len.get_length() {
                    Some(rank) => PartialShape::dynamic_of_rank(rank),
                    None => PartialShape::dynamic(),
                },
                _ => PartialShape::dynamic(),
            },
        };
        label_dims_from_values(&mut out_shape, values.labels(1));

        Ok(single_output(data.element_type, out_shape))
    }
}

impl EvaluateLabels for Reshape {
    fn evaluate_labels(
        &self,
        _inputs: &[TensorInfo],
        values: &InputValues,
    ) -> Option<Vec<TensorLabels>> {
        passthrough_labels(values)
    }
}

/// Transpose operator.
///
/// An empty permutation reverses the order of dimensions.
#[derive(Clone, Debug, PartialEq)]
pub struct Transpose;

impl InferShapes for Transpose {
    fn infer_shapes(
        &self,
        inputs: &[TensorInfo],
        values: &InputValues,
    ) -> Result<Vec<TensorInfo>, InferShapesError> {
        check_input_count(inputs, 2, 2, "2")?;
        check_axes_rank(inputs, 1)?;

        let data = &inputs[0];
        let perm = values.ints(1);
        let Some(in_dims) = data.shape.dims() else {
            let out_shape = match perm {
                Some(perm) if !perm.is_empty() => PartialShape::dynamic_of_rank(perm.len()),
                _ => PartialShape::dynamic(),
            };
            return Ok(single_output(data.element_type, out_shape));
        };
        let rank = in_dims.len();
        let Some(perm) = perm else {
            return Ok(single_output(
                data.element_type,
                PartialShape::dynamic_of_rank(rank),
            ));
        };

        let order: SmallVec<[usize; 4]> = if perm.is_empty() {
            (0..rank).rev().collect()
        } else {
            if perm.len() != rank {
                return Err(InferShapesError::InvalidValue(format!(
                    "permutation {:?} does not match input rank {}",
                    perm, rank
                )));
            }
            let order = normalize_axes(perm, rank)?;
            let mut seen = vec![false; rank];
            for &axis in &order {
                if std::mem::replace(&mut seen[axis], true) {
                    return Err(InferShapesError::InvalidValue(format!(
                        "permutation {:?} repeats axis {}",
                        perm, axis
                    )));
                }
            }
            order
        };

        let out_shape = order.iter().map(|&axis| in_dims[axis]);
        Ok(single_output(data.element_type, out_shape.collect()))
    }
}

/// ShapeOf operator.
///
/// Produces a vector containing the input's shape.
#[derive(Clone, Debug, PartialEq)]
pub struct ShapeOf {
    pub output_type: ElementType,
}

impl InferShapes for ShapeOf {
    fn infer_shapes(
        &self,
        inputs: &[TensorInfo],
        _values: &InputValues,
    ) -> Result<Vec<TensorInfo>, InferShapesError> {
        check_input_count(inputs, 1, 1, "1")?;
        if !matches!(self.output_type, ElementType::I32 | ElementType::I64) {
            return Err(InferShapesError::InvalidValue(format!(
                "shape output type must be i32 or i64, got {}",
                self.output_type
            )));
        }

        let out_shape = match inputs[0].shape.rank() {
            Some(rank) => PartialShape::from_static(&[rank]),
            None => PartialShape::dynamic_of_rank(1),
        };
        Ok(single_output(self.output_type, out_shape))
    }
}

impl EvaluateLabels for ShapeOf {
    fn evaluate_labels(
        &self,
        inputs: &[TensorInfo],
        _values: &InputValues,
    ) -> Option<Vec<TensorLabels>> {
        let shape = &inputs.first()?.shape;
        if !shape.has_labels() {
            return None;
        }
        Some(vec![shape.labels()?])
    }
}
