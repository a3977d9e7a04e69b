//! Propagation of value labels.
//!
//! A value label tags an element of a small integer tensor (typically a
//! shape vector) with the [`Label`](crate::Label) of the dimension it was
//! read from. Following labels through shape subgraphs such as
//! `ShapeOf -> Gather -> Concat -> Reshape` lets inference attach the
//! original dimension labels to the output of `Reshape`, even though the
//! sizes themselves are unknown.

use crate::value::{InputValues, TensorInfo, TensorLabels};

/// Compute the value labels of an operator's outputs.
pub trait EvaluateLabels {
    /// Return the labels of each output, or `None` if no output carries
    /// labels or they cannot be determined from the inputs.
    fn evaluate_labels(
        &self,
        inputs: &[TensorInfo],
        values: &InputValues,
    ) -> Option<Vec<TensorLabels>>;
}

/// Return true if any of the first `count` inputs has value labels.
pub(crate) fn any_input_labels(values: &InputValues, count: usize) -> bool {
    (0..count).any(|i| values.labels(i).is_some())
}

/// Return the value labels of input `index`, or a buffer of `len` empty
/// labels if it has none.
///
/// Returns `None` if the input's labels don't have `len` entries.
pub(crate) fn labels_or_empty(values: &InputValues, index: usize, len: usize) -> Option<TensorLabels> {
    match values.labels(index) {
        Some(labels) if labels.len() == len => Some(labels.to_vec()),
        Some(_) => None,
        None => Some(vec![None; len]),
    }
}

/// Labels pass through unchanged from the first input.
///
/// This applies to operators which change the shape of a value but not the
/// order of its elements.
pub(crate) fn passthrough_labels(values: &InputValues) -> Option<Vec<TensorLabels>> {
    values.labels(0).map(|labels| vec![labels.to_vec()])
}
