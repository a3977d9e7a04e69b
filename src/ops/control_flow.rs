use rewire_shape_inference::{
    Dimension, ElementType, InferShapesError, InputValues, PartialShape, TensorInfo,
};
use smallvec::SmallVec;

use crate::graph::Graph;
use crate::operator::{AttributeVisitor, OpType, Operator, SubgraphOperator};

/// Repeat a body graph while a condition holds.
///
/// Inputs are `[trip_count, condition, carried...]`. The body has one
/// parameter per carried value and produces `[condition, carried...]` as its
/// results. The loop outputs the final carried values.
pub struct Loop {
    pub body: Graph,
}

impl std::fmt::Debug for Loop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "Loop {{ ... }}")
    }
}

/// Combine the info of a carried value on entry with its info after one
/// iteration, giving an info that covers every iteration.
fn join_infos(initial: &TensorInfo, updated: &TensorInfo) -> TensorInfo {
    let element_type = initial
        .element_type
        .merge(updated.element_type)
        .unwrap_or(ElementType::Dynamic);

    let shape = match (initial.shape.dims(), updated.shape.dims()) {
        (Some(a), Some(b)) if a.len() == b.len() => a
            .iter()
            .zip(b)
            .map(|(a, b)| {
                if a == b {
                    *a
                } else {
                    let max = a.max_length().zip(b.max_length()).map(|(x, y)| x.max(y));
                    Dimension::bounded(a.min_length().min(b.min_length()), max)
                }
            })
            .collect(),
        _ => PartialShape::dynamic(),
    };
    TensorInfo::new(element_type, shape)
}

impl Loop {
    /// Return the info of body result `index`.
    fn body_result_info(&self, index: usize) -> Option<&TensorInfo> {
        let id = *self.body.results().get(index)?;
        self.body.node(id)?.output_info(0)
    }
}

impl Operator for Loop {
    fn op_type(&self) -> OpType {
        OpType::new("Loop", 5)
    }

    fn infer(
        &self,
        inputs: &[TensorInfo],
        _values: &InputValues,
    ) -> Result<Vec<TensorInfo>, InferShapesError> {
        let [trip_count, condition, carried @ ..] = inputs else {
            return Err(InferShapesError::IncorrectInputCount {
                expected: "at least 2",
                actual: inputs.len(),
            });
        };
        if !trip_count.element_type.is_dynamic() && !trip_count.element_type.is_integral() {
            return Err(InferShapesError::UnsupportedType {
                input: 0,
                element_type: trip_count.element_type,
            });
        }
        if !matches!(
            condition.element_type,
            ElementType::Boolean | ElementType::Dynamic
        ) {
            return Err(InferShapesError::UnsupportedType {
                input: 1,
                element_type: condition.element_type,
            });
        }

        let params = self.body.parameters();
        if params.len() != carried.len() || self.body.results().len() != carried.len() + 1 {
            return Err(InferShapesError::InvalidValue(format!(
                "loop has {} carried values but body has {} parameters and {} results",
                carried.len(),
                params.len(),
                self.body.results().len()
            )));
        }

        let mut outputs = Vec::with_capacity(carried.len());
        for (i, (initial, &param)) in carried.iter().zip(params).enumerate() {
            let param_info = self
                .body
                .node(param)
                .and_then(|n| n.output_info(0))
                .cloned()
                .unwrap_or_default();
            if initial.merge(&param_info).is_none() {
                return Err(InferShapesError::IncompatibleShapes(
                    initial.shape.clone(),
                    param_info.shape,
                ));
            }
            let updated = self.body_result_info(i + 1).cloned().unwrap_or_default();
            outputs.push(join_infos(initial, &updated));
        }
        Ok(outputs)
    }

    fn visit_attributes(&self, visitor: &mut dyn AttributeVisitor) {
        visitor.on_attribute("body_nodes", (self.body.len() as i64).into());
    }

    fn as_subgraph_op(&self) -> Option<&dyn SubgraphOperator> {
        Some(self as &dyn SubgraphOperator)
    }
}

impl SubgraphOperator for Loop {
    fn subgraphs(&self) -> SmallVec<[&Graph; 1]> {
        [&self.body].into()
    }
}
