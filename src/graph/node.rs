use std::fmt;
use std::sync::Arc;

use rewire_shape_inference::{TensorInfo, TensorLabels};
use smallvec::SmallVec;

use super::NodeId;
use crate::operator::{OpType, Operator};
use crate::rt_info::RtInfo;

/// Reference to an output of a node: the edge source of a value.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputRef {
    pub node: NodeId,
    pub port: usize,
}

impl OutputRef {
    pub fn new(node: NodeId, port: usize) -> OutputRef {
        OutputRef { node, port }
    }
}

impl From<NodeId> for OutputRef {
    /// Refer to the first output of a node.
    fn from(node: NodeId) -> OutputRef {
        OutputRef { node, port: 0 }
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.port)
    }
}

impl fmt::Debug for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutputRef({}:{})", self.node, self.port)
    }
}

/// Reference to an input slot of a node: the edge target of a value.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InputRef {
    pub node: NodeId,
    pub index: usize,
}

/// A value produced by a node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Output {
    /// Inferred element type and shape.
    pub info: TensorInfo,

    /// Labels of the value's elements, for shape-like values.
    pub labels: Option<TensorLabels>,
}

impl Output {
    pub fn new(info: TensorInfo) -> Output {
        Output { info, labels: None }
    }
}

/// A vertex in a [`Graph`](super::Graph).
///
/// A node owns its outputs. Its inputs are references to outputs owned by
/// other nodes.
#[derive(Clone, Debug)]
pub struct Node {
    pub(super) name: String,
    pub(super) op: Arc<dyn Operator>,
    pub(super) inputs: SmallVec<[OutputRef; 4]>,
    pub(super) outputs: SmallVec<[Output; 1]>,
    pub(super) rt_info: RtInfo,
}

impl Node {
    /// Return the friendly name of this node.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn op(&self) -> &Arc<dyn Operator> {
        &self.op
    }

    pub fn op_type(&self) -> OpType {
        self.op.op_type()
    }

    pub fn inputs(&self) -> &[OutputRef] {
        &self.inputs
    }

    pub fn input(&self, index: usize) -> Option<OutputRef> {
        self.inputs.get(index).copied()
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    pub fn output(&self, port: usize) -> Option<&Output> {
        self.outputs.get(port)
    }

    /// Return the inferred type and shape of output `port`.
    pub fn output_info(&self, port: usize) -> Option<&TensorInfo> {
        self.outputs.get(port).map(|o| &o.info)
    }

    pub fn rt_info(&self) -> &RtInfo {
        &self.rt_info
    }
}
