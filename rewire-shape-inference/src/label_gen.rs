//! Label generator.

use std::num::NonZero;

use crate::dimension::{Dimension, Label};
use crate::partial_shape::PartialShape;

/// Generates fresh dimension labels.
///
/// Labels from the same generator are unique. Frontends typically label the
/// dynamic dimensions of graph inputs, so that dimensions derived from the
/// same input dimension can later be recognized as equal.
pub struct LabelGen {
    issued: u64,
}

impl Default for LabelGen {
    fn default() -> Self {
        Self::new()
    }
}

impl LabelGen {
    pub fn new() -> Self {
        Self { issued: 0 }
    }

    /// Generate a new label.
    pub fn next_label(&mut self) -> Label {
        let id = NonZero::<u64>::MIN.saturating_add(self.issued);
        self.issued += 1;
        Label::from(id)
    }

    /// Attach a new label to every dynamic, unlabeled dimension of `shape`.
    pub fn label_dynamic_dims(&mut self, shape: &mut PartialShape) {
        let Some(dims) = shape.dims_mut() else {
            return;
        };
        for dim in dims.iter_mut().filter(|d| d.is_dynamic() && d.label().is_none()) {
            *dim = dim.with_label(Some(self.next_label()));
        }
    }

    /// Create a new dynamic dimension with a fresh label.
    pub fn labeled_dim(&mut self) -> Dimension {
        Dimension::dynamic().with_label(Some(self.next_label()))
    }
}
