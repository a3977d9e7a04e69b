use rewire_shape_inference::{InferShapesError, InputValues, TensorInfo};

use crate::operator::{AttrValue, AttributeVisitor, Attributes, OpType, Operator};

/// Opaque node for a source operator that has no native translation.
///
/// Outputs have a dynamic type and shape. Later passes may decode these
/// nodes into native operators. Any that remain make the graph fail the
/// fully-converted check.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameworkNode {
    /// Operator type in the source format.
    pub op_name: String,
    pub attrs: Attributes,
    pub num_outputs: usize,
}

impl Operator for FrameworkNode {
    fn op_type(&self) -> OpType {
        OpType::new("FrameworkNode", 0)
    }

    fn infer(
        &self,
        _inputs: &[TensorInfo],
        _values: &InputValues,
    ) -> Result<Vec<TensorInfo>, InferShapesError> {
        Ok(vec![TensorInfo::dynamic(); self.num_outputs])
    }

    fn visit_attributes(&self, visitor: &mut dyn AttributeVisitor) {
        visitor.on_attribute("op_name", AttrValue::String(self.op_name.clone()));
        for (name, value) in self.attrs.iter() {
            visitor.on_attribute(name, value.clone());
        }
    }
}
