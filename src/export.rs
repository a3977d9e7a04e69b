//! Serializable description of a graph.
//!
//! [`ModelDescription`] captures the structure of a compiled graph: its
//! inputs and outputs, and for each node the operator kind, attributes,
//! runtime info and connections. It is intended for inspecting the result of
//! compilation and comparing graphs in tests, not for re-loading a model.

use rewire_shape_inference::TensorInfo;
use serde::Serialize;

use crate::graph::{Graph, GraphError, NodeId};
use crate::operator::Attributes;
use crate::rt_info::RtInfo;

/// Element type and shape of a value.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ValueDescription {
    pub element_type: String,
    pub shape: String,
}

impl From<&TensorInfo> for ValueDescription {
    fn from(info: &TensorInfo) -> ValueDescription {
        ValueDescription {
            element_type: info.element_type.to_string(),
            shape: info.shape.to_string(),
        }
    }
}

/// A graph input or output.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PortDescription {
    pub name: String,
    #[serde(flatten)]
    pub value: ValueDescription,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NodeDescription {
    pub id: usize,
    pub name: String,
    pub op: &'static str,
    pub version: u32,

    #[serde(skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,

    #[serde(skip_serializing_if = "RtInfo::is_empty")]
    pub rt_info: RtInfo,

    /// Values read by the node, formatted as `{node_id}:{port}`.
    pub inputs: Vec<String>,
    pub outputs: Vec<ValueDescription>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub subgraphs: Vec<ModelDescription>,
}

/// Description of a whole graph. Nodes are listed in topological order.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ModelDescription {
    pub parameters: Vec<PortDescription>,
    pub results: Vec<PortDescription>,
    pub nodes: Vec<NodeDescription>,
}

fn port_description(graph: &Graph, id: NodeId) -> Result<PortDescription, GraphError> {
    let node = graph.node(id).ok_or(GraphError::InvalidNodeId(id))?;
    let info = match node.outputs().first() {
        Some(output) => &output.info,
        None => {
            // Results have no outputs. Describe the value they read.
            let input = node.inputs().first().copied().ok_or(GraphError::InvalidNodeId(id))?;
            graph
                .output_info(input)
                .ok_or(GraphError::InvalidOutput(input))?
        }
    };
    Ok(PortDescription {
        name: node.name().to_string(),
        value: info.into(),
    })
}

impl ModelDescription {
    /// Describe `graph`.
    pub fn from_graph(graph: &Graph) -> Result<ModelDescription, GraphError> {
        let parameters = graph
            .parameters()
            .iter()
            .map(|&id| port_description(graph, id))
            .collect::<Result<_, _>>()?;
        let results = graph
            .results()
            .iter()
            .map(|&id| port_description(graph, id))
            .collect::<Result<_, _>>()?;

        let mut nodes = Vec::with_capacity(graph.len());
        for id in graph.topological_order()? {
            let node = graph.node(id).ok_or(GraphError::InvalidNodeId(id))?;
            let op = node.op();
            let op_type = op.op_type();
            let subgraphs = match op.as_subgraph_op() {
                Some(sg_op) => sg_op
                    .subgraphs()
                    .into_iter()
                    .map(ModelDescription::from_graph)
                    .collect::<Result<_, _>>()?,
                None => Vec::new(),
            };
            nodes.push(NodeDescription {
                id: id.as_usize(),
                name: node.name().to_string(),
                op: op_type.name,
                version: op_type.version,
                attributes: Attributes::from_op(op.as_ref()),
                rt_info: node.rt_info().clone(),
                inputs: node.inputs().iter().map(|input| input.to_string()).collect(),
                outputs: node.outputs().iter().map(|o| (&o.info).into()).collect(),
                subgraphs,
            });
        }

        Ok(ModelDescription {
            parameters,
            results,
            nodes,
        })
    }

    /// Serialize the description as pretty-printed JSON.
    pub fn to_json(&self) -> String {
        // Serialization of these types cannot fail: all map keys are strings.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Return the node with a given friendly name, excluding results.
    pub fn node(&self, name: &str) -> Option<&NodeDescription> {
        self.nodes
            .iter()
            .find(|n| n.name == name && n.op != "Result")
    }
}

#[cfg(test)]
mod tests {
    use rewire_shape_inference::{pshape, ElementType};
    use serde_json::Value;

    use super::ModelDescription;
    use crate::graph::Graph;
    use crate::ops::{Add, Concat, Relu};
    use crate::rt_info::keys;
    use crate::tensor::Tensor;

    fn make_graph() -> Graph {
        let mut g = Graph::new();
        let x = g.add_parameter("x", ElementType::F32, pshape![?, 4]);
        let one = g.add_constant(Some("one"), Tensor::scalar_f32(1.));
        let add = g
            .add_named_op("add", Add::default(), &[x.into(), one.into()])
            .unwrap();
        let relu = g.add_named_op("relu", Relu, &[add.into()]).unwrap();
        let concat = g
            .add_named_op("concat", Concat { axis: 1 }, &[relu.into(), x.into()])
            .unwrap();
        g.rt_info_mut(relu)
            .unwrap()
            .insert(keys::DISABLE_CONST_FOLDING, true);
        g.add_result(concat.into()).unwrap();
        g
    }

    #[test]
    fn test_describe_graph() {
        let g = make_graph();
        let desc = ModelDescription::from_graph(&g).unwrap();

        assert_eq!(desc.parameters.len(), 1);
        assert_eq!(desc.parameters[0].name, "x");
        assert_eq!(desc.parameters[0].value.element_type, "f32");
        assert_eq!(desc.parameters[0].value.shape, "[?,4]");

        assert_eq!(desc.results.len(), 1);
        assert_eq!(desc.results[0].name, "concat");
        assert_eq!(desc.results[0].value.shape, "[?,8]");

        let names: Vec<&str> = desc.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["x", "one", "add", "relu", "concat", "concat"]);

        let add = desc.node("add").unwrap();
        assert_eq!(add.op, "Add");
        assert_eq!(add.version, 1);
        assert_eq!(add.attributes.get_string("auto_broadcast"), Some("numpy"));
        assert_eq!(add.inputs, ["0:0", "1:0"]);

        let relu = desc.node("relu").unwrap();
        assert!(relu.rt_info.flag(keys::DISABLE_CONST_FOLDING));
    }

    #[test]
    fn test_to_json() {
        let g = make_graph();
        let json = ModelDescription::from_graph(&g).unwrap().to_json();
        let value: Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["parameters"][0]["name"], "x");
        assert_eq!(value["parameters"][0]["element_type"], "f32");

        let nodes = value["nodes"].as_array().unwrap();
        let concat = nodes.iter().find(|n| n["op"] == "Concat").unwrap();
        assert_eq!(concat["attributes"]["axis"], 1);

        // Empty attributes and runtime info are omitted.
        let relu = nodes.iter().find(|n| n["name"] == "relu").unwrap();
        assert!(relu.get("attributes").is_none());
        assert_eq!(relu["rt_info"][keys::DISABLE_CONST_FOLDING], true);
        let add = nodes.iter().find(|n| n["name"] == "add").unwrap();
        assert!(add.get("rt_info").is_none());
        assert!(add.get("subgraphs").is_none());
    }
}
