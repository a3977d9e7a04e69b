//! Graph container and the node replacement protocol.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use rewire_shape_inference::{
    ElementType, InferShapesError, InputValues, PartialShape, TensorInfo,
};
// Hash keys in this module are `NodeId`s which we allocate ourselves, so DOS
// resistance is not a concern.
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::operator::{OpType, Operator};
use crate::ops::{Constant, Parameter, ResultOp};
use crate::rt_info::RtInfo;
use crate::tensor::Tensor;

#[cfg(test)]
pub(crate) mod builder;
mod node;
mod node_id;

pub use node::{InputRef, Node, Output, OutputRef};
pub use node_id::NodeId;

/// Shape or type inference failed for a node.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("validation of node \"{node}\" ({op_type}) failed: {source}")]
pub struct ValidationError {
    /// Friendly name of the node.
    pub node: String,
    pub op_type: OpType,
    pub source: InferShapesError,
}

/// Errors reported by graph construction and mutation.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum GraphError {
    #[error("node {0} does not exist")]
    InvalidNodeId(NodeId),

    #[error("output {0} does not exist")]
    InvalidOutput(OutputRef),

    #[error("node {node} has no input {index}")]
    InvalidInput { node: NodeId, index: usize },

    #[error("node {0} is not a parameter")]
    NotAParameter(NodeId),

    /// The graph contains a cycle, or an edit would introduce one.
    #[error("cycle through node {0}")]
    Cycle(NodeId),

    /// A node refers to an output of a node that no longer exists.
    #[error("input {index} of node {node} refers to a missing value")]
    DanglingInput { node: NodeId, index: usize },

    /// A replacement node has a different number of outputs.
    #[error("replacement has {actual} outputs but {expected} are required")]
    OutputCountMismatch { expected: usize, actual: usize },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// A computation graph.
///
/// Nodes are stored in an arena indexed by [`NodeId`]. Edges are stored on
/// both ends: each node lists the outputs it reads, and the graph keeps a
/// list of consumers for each node. The graph is a DAG. Repetition is
/// expressed by operators with body subgraphs, never by back-edges.
///
/// Parameters are the inputs of the graph and results are its sinks. Nodes
/// are removed when they are no longer consumed, except for parameters and
/// results.
#[derive(Clone, Debug, Default)]
pub struct Graph {
    nodes: Vec<Option<Node>>,
    consumers: Vec<SmallVec<[InputRef; 2]>>,
    parameters: Vec<NodeId>,
    results: Vec<NodeId>,
}

impl Graph {
    pub fn new() -> Graph {
        Graph::default()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.as_usize()).and_then(|n| n.as_ref())
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.as_usize()).and_then(|n| n.as_mut())
    }

    fn require(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.node(id).ok_or(GraphError::InvalidNodeId(id))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    /// Return the number of live nodes.
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over live nodes in ID order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_ref().map(|n| (NodeId::from_index(i), n)))
    }

    pub fn parameters(&self) -> &[NodeId] {
        &self.parameters
    }

    pub fn results(&self) -> &[NodeId] {
        &self.results
    }

    /// Return the ID that the next node added to the graph will have.
    ///
    /// Nodes with IDs greater than or equal to this were created afterwards.
    pub fn next_node_id(&self) -> NodeId {
        NodeId::from_index(self.nodes.len())
    }

    pub fn output(&self, output: OutputRef) -> Option<&Output> {
        self.node(output.node)?.output(output.port)
    }

    pub fn output_info(&self, output: OutputRef) -> Option<&TensorInfo> {
        self.output(output).map(|o| &o.info)
    }

    /// Return the value of an output produced by a constant node.
    pub fn constant_value(&self, output: OutputRef) -> Option<&Tensor> {
        if output.port != 0 {
            return None;
        }
        let node = self.node(output.node)?;
        node.op.downcast_ref::<Constant>().map(|c| &c.value)
    }

    /// Return the value of an output if it is known at compile time.
    ///
    /// This includes constants and values that are fully determined by the
    /// metadata of the producer's inputs, such as the shape of a statically
    /// shaped value.
    pub fn static_value(&self, output: OutputRef) -> Option<Tensor> {
        if let Some(value) = self.constant_value(output) {
            return Some(value.clone());
        }
        let node = self.node(output.node)?;
        let infos = self.input_infos(node.inputs()).ok()?;
        let mut values = node.op.evaluate_from_info(&infos)?;
        (output.port < values.len()).then(|| values.swap_remove(output.port))
    }

    fn input_infos(&self, inputs: &[OutputRef]) -> Result<Vec<TensorInfo>, GraphError> {
        inputs
            .iter()
            .map(|&input| {
                self.output_info(input)
                    .cloned()
                    .ok_or(GraphError::InvalidOutput(input))
            })
            .collect()
    }

    /// Collect known values and value labels of a list of inputs.
    fn input_values(&self, inputs: &[OutputRef]) -> InputValues {
        let mut values = InputValues::new();
        for (index, &input) in inputs.iter().enumerate() {
            if let Some(value) = self.static_value(input) {
                values.insert_value(index, value.to_const_value());
            }
            if let Some(labels) = self.output(input).and_then(|o| o.labels.clone()) {
                values.insert_labels(index, labels);
            }
        }
        values
    }

    /// Run shape inference for an operator with the given inputs.
    fn infer_outputs(
        &self,
        name: &str,
        op: &dyn Operator,
        inputs: &[OutputRef],
    ) -> Result<SmallVec<[Output; 1]>, GraphError> {
        let infos = self.input_infos(inputs)?;
        let values = self.input_values(inputs);
        let out_infos = op
            .infer(&infos, &values)
            .map_err(|source| ValidationError {
                node: name.to_string(),
                op_type: op.op_type(),
                source,
            })?;
        let labels = op.evaluate_labels(&infos, &values);

        let outputs = out_infos
            .into_iter()
            .enumerate()
            .map(|(i, info)| Output {
                info,
                labels: labels
                    .as_ref()
                    .and_then(|l| l.get(i).cloned())
                    .filter(|l| l.iter().any(|label| label.is_some())),
            })
            .collect();
        Ok(outputs)
    }

    fn push_node(&mut self, node: Node) -> NodeId {
        let id = self.next_node_id();
        for (index, input) in node.inputs.iter().enumerate() {
            if let Some(consumers) = self.consumers.get_mut(input.node.as_usize()) {
                consumers.push(InputRef { node: id, index });
            }
        }
        self.nodes.push(Some(node));
        self.consumers.push(SmallVec::new());
        id
    }

    /// Add an operator node and infer its outputs.
    ///
    /// If `name` is `None` a name is generated from the operator name and
    /// node ID.
    pub fn add_node(
        &mut self,
        name: Option<&str>,
        op: Arc<dyn Operator>,
        inputs: &[OutputRef],
    ) -> Result<NodeId, GraphError> {
        let name = match name {
            Some(name) => name.to_string(),
            None => format!("{}_{}", op.op_type().name, self.next_node_id()),
        };
        let outputs = self.infer_outputs(&name, op.as_ref(), inputs)?;
        Ok(self.push_node(Node {
            name,
            op,
            inputs: inputs.into(),
            outputs,
            rt_info: RtInfo::new(),
        }))
    }

    /// Add an operator node with a generated name.
    pub fn add_op<Op: Operator>(
        &mut self,
        op: Op,
        inputs: &[OutputRef],
    ) -> Result<NodeId, GraphError> {
        self.add_node(None, Arc::new(op), inputs)
    }

    /// Add an operator node with a given friendly name.
    pub fn add_named_op<Op: Operator>(
        &mut self,
        name: &str,
        op: Op,
        inputs: &[OutputRef],
    ) -> Result<NodeId, GraphError> {
        self.add_node(Some(name), Arc::new(op), inputs)
    }

    /// Add a graph input.
    pub fn add_parameter(
        &mut self,
        name: &str,
        element_type: ElementType,
        shape: PartialShape,
    ) -> NodeId {
        let info = TensorInfo::new(element_type, shape.clone());
        let id = self.push_node(Node {
            name: name.to_string(),
            op: Arc::new(Parameter {
                element_type,
                shape,
            }),
            inputs: SmallVec::new(),
            outputs: [Output::new(info)].into_iter().collect(),
            rt_info: RtInfo::new(),
        });
        self.parameters.push(id);
        id
    }

    /// Add a constant node.
    pub fn add_constant(&mut self, name: Option<&str>, value: Tensor) -> NodeId {
        let name = match name {
            Some(name) => name.to_string(),
            None => format!("Constant_{}", self.next_node_id()),
        };
        let info = value.info();
        self.push_node(Node {
            name,
            op: Arc::new(Constant { value }),
            inputs: SmallVec::new(),
            outputs: [Output::new(info)].into_iter().collect(),
            rt_info: RtInfo::new(),
        })
    }

    /// Add a graph output which reads `input`.
    ///
    /// The result node takes the friendly name of the value's producer.
    pub fn add_result(&mut self, input: OutputRef) -> Result<NodeId, GraphError> {
        let producer = self.require(input.node)?;
        let name = if producer.outputs.len() > 1 {
            format!("{}.{}", producer.name, input.port)
        } else {
            producer.name.clone()
        };
        let id = self.add_node(Some(&name), Arc::new(ResultOp), &[input])?;
        self.results.push(id);
        Ok(id)
    }

    pub fn set_friendly_name(&mut self, id: NodeId, name: &str) -> Result<(), GraphError> {
        let node = self.node_mut(id).ok_or(GraphError::InvalidNodeId(id))?;
        node.name = name.to_string();
        Ok(())
    }

    pub fn rt_info_mut(&mut self, id: NodeId) -> Option<&mut RtInfo> {
        self.node_mut(id).map(|n| &mut n.rt_info)
    }

    /// Merge the runtime info of `from` nodes into `to`.
    pub fn copy_runtime_info(&mut self, from: &[NodeId], to: NodeId) {
        let sources: Vec<RtInfo> = from
            .iter()
            .filter(|&&id| id != to)
            .filter_map(|&id| self.node(id).map(|n| n.rt_info.clone()))
            .collect();
        if let Some(target) = self.node_mut(to) {
            for info in &sources {
                target.rt_info.merge_from(info);
            }
        }
    }

    /// Return all consumers of all outputs of a node.
    pub fn node_consumers(&self, id: NodeId) -> &[InputRef] {
        self.consumers
            .get(id.as_usize())
            .map(|c| c.as_slice())
            .unwrap_or(&[])
    }

    /// Return the input slots which read `output`.
    pub fn consumers(&self, output: OutputRef) -> Vec<InputRef> {
        self.node_consumers(output.node)
            .iter()
            .filter(|c| {
                self.node(c.node)
                    .and_then(|n| n.input(c.index))
                    .is_some_and(|input| input == output)
            })
            .copied()
            .collect()
    }

    /// Return the producers that `id` depends on, directly or indirectly,
    /// in ascending ID order.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut visited = FxHashSet::default();
        let mut stack: Vec<NodeId> = self
            .node(id)
            .map(|n| n.inputs.iter().map(|i| i.node).collect())
            .unwrap_or_default();
        while let Some(node_id) = stack.pop() {
            if !visited.insert(node_id) {
                continue;
            }
            if let Some(node) = self.node(node_id) {
                stack.extend(node.inputs.iter().map(|i| i.node));
            }
        }
        let mut ancestors: Vec<_> = visited.into_iter().collect();
        ancestors.sort();
        ancestors
    }

    /// Return true if `target` is `from` or one of its ancestors.
    fn reaches(&self, from: NodeId, target: NodeId) -> bool {
        let mut visited = FxHashSet::default();
        let mut stack = vec![from];
        while let Some(node_id) = stack.pop() {
            if node_id == target {
                return true;
            }
            if !visited.insert(node_id) {
                continue;
            }
            if let Some(node) = self.node(node_id) {
                stack.extend(node.inputs.iter().map(|i| i.node));
            }
        }
        false
    }

    /// Return the live nodes in a topological order.
    ///
    /// Among nodes whose inputs are all available, the lowest ID comes
    /// first, so the order is stable for a given graph state.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, GraphError> {
        let mut in_degree = vec![0usize; self.nodes.len()];
        let mut ready = BinaryHeap::new();
        for (id, node) in self.iter() {
            in_degree[id.as_usize()] = node.inputs.len();
            if node.inputs.is_empty() {
                ready.push(Reverse(id));
            }
        }

        let mut order = Vec::with_capacity(in_degree.len());
        while let Some(Reverse(id)) = ready.pop() {
            order.push(id);
            for consumer in self.node_consumers(id) {
                let degree = &mut in_degree[consumer.node.as_usize()];
                *degree = degree.saturating_sub(1);
                if *degree == 0 {
                    ready.push(Reverse(consumer.node));
                }
            }
        }

        if order.len() != self.len() {
            let placed: FxHashSet<NodeId> = order.iter().copied().collect();
            let stuck = self
                .iter()
                .map(|(id, _)| id)
                .find(|id| !placed.contains(id));
            if let Some(id) = stuck {
                return Err(GraphError::Cycle(id));
            }
        }
        Ok(order)
    }

    /// Point one input slot at a new value, keeping consumer lists in sync.
    fn set_input_unchecked(&mut self, target: InputRef, new: OutputRef) {
        let Some(slot) = self
            .node_mut(target.node)
            .and_then(|n| n.inputs.get_mut(target.index))
        else {
            return;
        };
        let old = std::mem::replace(slot, new);
        if let Some(consumers) = self.consumers.get_mut(old.node.as_usize()) {
            if let Some(pos) = consumers.iter().position(|c| *c == target) {
                consumers.remove(pos);
            }
        }
        if let Some(consumers) = self.consumers.get_mut(new.node.as_usize()) {
            consumers.push(target);
        }
    }

    /// Return the consumers of `old` which should be moved to `new`, checking
    /// that doing so won't create a cycle.
    fn rewire_targets(&self, old: OutputRef, new: OutputRef) -> Result<Vec<InputRef>, GraphError> {
        self.output(old).ok_or(GraphError::InvalidOutput(old))?;
        self.output(new).ok_or(GraphError::InvalidOutput(new))?;

        let targets: Vec<InputRef> = self
            .consumers(old)
            .into_iter()
            .filter(|c| c.node != new.node)
            .collect();
        for target in &targets {
            if self.reaches(new.node, target.node) {
                return Err(GraphError::Cycle(target.node));
            }
        }
        Ok(targets)
    }

    /// Replace all uses of `old` with `new`.
    ///
    /// Uses by the node which produces `new` are kept, so that `new` may be
    /// computed from `old`. If the producer of `old` is left unused it is
    /// removed, along with any of its producers that become unused.
    /// Consumers are then re-validated.
    pub fn replace_output(&mut self, old: OutputRef, new: OutputRef) -> Result<(), GraphError> {
        let targets = self.rewire_targets(old, new)?;
        for target in &targets {
            self.set_input_unchecked(*target, new);
        }
        self.remove_if_unused(old.node);
        let touched: Vec<NodeId> = targets.iter().map(|t| t.node).collect();
        self.revalidate(&touched, false)
    }

    /// Replace node `old` with `new`.
    ///
    /// Consumers of each output of `old` are moved to the corresponding
    /// output of `new`, the runtime info of `old` is merged into `new` and
    /// `old` is removed once unused. The friendly name is not transferred.
    ///
    /// Fails without modifying the graph if the nodes have different output
    /// counts or if the replacement would create a cycle.
    pub fn replace_node(&mut self, old: NodeId, new: NodeId) -> Result<(), GraphError> {
        let expected = self.require(old)?.outputs.len();
        let actual = self.require(new)?.outputs.len();
        if expected != actual {
            return Err(GraphError::OutputCountMismatch { expected, actual });
        }
        if old == new {
            return Ok(());
        }

        let mut rewires = Vec::new();
        for port in 0..expected {
            let (old_out, new_out) = (OutputRef::new(old, port), OutputRef::new(new, port));
            for target in self.rewire_targets(old_out, new_out)? {
                rewires.push((target, new_out));
            }
        }
        for &(target, new_out) in &rewires {
            self.set_input_unchecked(target, new_out);
        }
        if let Some(pos) = self.results.iter().position(|&r| r == old) {
            self.results[pos] = new;
        }

        self.copy_runtime_info(&[old], new);
        self.remove_if_unused(old);

        let touched: Vec<NodeId> = rewires.iter().map(|(t, _)| t.node).collect();
        self.revalidate(&touched, false)
    }

    /// Change input `index` of `node` to read `new`.
    ///
    /// The previous producer is removed if it is left unused, and `node` and
    /// its consumers are re-validated.
    pub fn set_input(
        &mut self,
        node: NodeId,
        index: usize,
        new: OutputRef,
    ) -> Result<(), GraphError> {
        let old = self
            .require(node)?
            .input(index)
            .ok_or(GraphError::InvalidInput { node, index })?;
        self.output(new).ok_or(GraphError::InvalidOutput(new))?;
        if self.reaches(new.node, node) {
            return Err(GraphError::Cycle(node));
        }

        self.set_input_unchecked(InputRef { node, index }, new);
        self.remove_if_unused(old.node);
        self.revalidate(&[node], false)
    }

    /// Remove a node if nothing consumes it, then do the same for its
    /// producers. Parameters and results are never removed.
    ///
    /// Returns true if any node was removed.
    pub fn remove_if_unused(&mut self, id: NodeId) -> bool {
        let mut removed = false;
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            let removable = self.contains(id)
                && self.node_consumers(id).is_empty()
                && !self.parameters.contains(&id)
                && !self.results.contains(&id);
            if !removable {
                continue;
            }
            let Some(node) = self.nodes.get_mut(id.as_usize()).and_then(|n| n.take()) else {
                continue;
            };
            for (index, input) in node.inputs.iter().enumerate() {
                if let Some(consumers) = self.consumers.get_mut(input.node.as_usize()) {
                    consumers.retain(|c| *c != InputRef { node: id, index });
                }
                stack.push(input.node);
            }
            removed = true;
        }
        removed
    }

    /// Add a copy of node `id` that reads `inputs`.
    ///
    /// The copy shares the operator, friendly name and runtime info of the
    /// original.
    pub fn clone_node_with_new_inputs(
        &mut self,
        id: NodeId,
        inputs: &[OutputRef],
    ) -> Result<NodeId, GraphError> {
        let node = self.require(id)?;
        let (name, op, rt_info) = (node.name.clone(), node.op.clone(), node.rt_info.clone());
        let new_id = self.add_node(Some(&name), op, inputs)?;
        if let Some(new_node) = self.node_mut(new_id) {
            new_node.rt_info = rt_info;
        }
        Ok(new_id)
    }

    /// Override the type and shape of a parameter.
    ///
    /// Unlike other edits, this may make inferred information less specific
    /// or change it incompatibly. Downstream nodes are re-inferred from
    /// scratch.
    pub fn set_parameter_info(
        &mut self,
        id: NodeId,
        element_type: ElementType,
        shape: PartialShape,
    ) -> Result<(), GraphError> {
        if !self.parameters.contains(&id) {
            return Err(GraphError::NotAParameter(id));
        }
        let node = self.node_mut(id).ok_or(GraphError::InvalidNodeId(id))?;
        node.op = Arc::new(Parameter {
            element_type,
            shape: shape.clone(),
        });
        node.outputs = [Output::new(TensorInfo::new(element_type, shape))]
            .into_iter()
            .collect();

        let consumers: Vec<NodeId> = self.node_consumers(id).iter().map(|c| c.node).collect();
        self.revalidate(&consumers, true)
    }

    /// Re-run inference for every node in topological order.
    ///
    /// Fails if an input refers to a missing value, if the graph has a cycle
    /// or if a node's inputs are no longer consistent with its operator.
    pub fn validate(&mut self) -> Result<(), GraphError> {
        for (id, node) in self.iter() {
            for (index, input) in node.inputs.iter().enumerate() {
                if self.output(*input).is_none() {
                    return Err(GraphError::DanglingInput { node: id, index });
                }
            }
        }
        let order = self.topological_order()?;
        self.revalidate_nodes(&order, false)
    }

    /// Re-infer `start` and everything downstream of it.
    fn revalidate(&mut self, start: &[NodeId], override_info: bool) -> Result<(), GraphError> {
        if start.is_empty() {
            return Ok(());
        }
        let mut affected = FxHashSet::default();
        let mut stack: Vec<NodeId> = start.to_vec();
        while let Some(id) = stack.pop() {
            if !self.contains(id) || !affected.insert(id) {
                continue;
            }
            stack.extend(self.node_consumers(id).iter().map(|c| c.node));
        }
        let order: Vec<NodeId> = self
            .topological_order()?
            .into_iter()
            .filter(|id| affected.contains(id))
            .collect();
        self.revalidate_nodes(&order, override_info)
    }

    /// Re-infer a list of nodes, which must be in topological order.
    ///
    /// New results are merged with the previous ones, so inferred
    /// information never becomes less specific, unless `override_info` is
    /// set.
    fn revalidate_nodes(&mut self, order: &[NodeId], override_info: bool) -> Result<(), GraphError> {
        for &id in order {
            let node = self.require(id)?;
            let mut outputs = self.infer_outputs(&node.name, node.op.as_ref(), &node.inputs)?;

            if !override_info {
                let invalid = |source| ValidationError {
                    node: node.name.clone(),
                    op_type: node.op_type(),
                    source,
                };
                if outputs.len() != node.outputs.len() {
                    return Err(invalid(InferShapesError::InvalidValue(format!(
                        "output count changed from {} to {}",
                        node.outputs.len(),
                        outputs.len()
                    )))
                    .into());
                }
                for (new, old) in outputs.iter_mut().zip(&node.outputs) {
                    if new.info.element_type.merge(old.info.element_type).is_none() {
                        return Err(invalid(InferShapesError::IncompatibleTypes(
                            old.info.element_type,
                            new.info.element_type,
                        ))
                        .into());
                    }
                    new.info = new.info.merge(&old.info).ok_or_else(|| {
                        invalid(InferShapesError::IncompatibleShapes(
                            old.info.shape.clone(),
                            new.info.shape.clone(),
                        ))
                    })?;
                }
            }

            if let Some(node) = self.node_mut(id) {
                node.outputs = outputs;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
