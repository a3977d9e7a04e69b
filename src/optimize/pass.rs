use std::collections::VecDeque;

use log::{debug, trace, warn};

use super::diagnostics::Diagnostics;
use super::pattern_matcher::{Match, Pattern};
use crate::graph::{Graph, GraphError, NodeId, OutputRef};
use crate::op_registry::OpRegistry;
use crate::operator::OpType;

/// Errors that stop a pass pipeline.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum PassError {
    /// A graph edit or validation failed.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Operators without a native translation remain after conversion.
    #[error("operators without a native translation remain: {}", .0.join(", "))]
    NotFullyConverted(Vec<String>),

    /// A node's kind is not part of the required opset.
    #[error("node \"{node}\" ({op_type}) is not part of opset {opset}")]
    NotInOpset {
        node: String,
        op_type: OpType,
        opset: u32,
    },
}

/// Shared state available to passes while a pipeline runs.
pub struct PassContext<'a> {
    pub registry: &'a OpRegistry,
    pub diagnostics: &'a Diagnostics,
}

/// A pass which receives the whole graph.
pub trait ModelPass {
    /// Name of the pass, used in log messages.
    fn name(&self) -> &str;

    /// Run the pass and return true if the graph was changed.
    fn run_on_model(&self, graph: &mut Graph, ctx: &PassContext) -> Result<bool, PassError>;
}

type MatcherCallback =
    dyn Fn(&mut Graph, &Match, &PassContext) -> Result<bool, PassError> + Send + Sync;

/// A pass which rewrites subgraphs that match a pattern.
///
/// The callback is invoked with each successful match and returns true if
/// it changed the graph. Callbacks are responsible for carrying over
/// friendly names and runtime info to the nodes they create.
pub struct MatcherPass {
    name: String,
    pattern: Pattern,
    callback: Box<MatcherCallback>,
}

impl MatcherPass {
    /// Create a matcher pass.
    ///
    /// `required` lists the names the callback looks up in a [`Match`].
    ///
    /// # Panics
    ///
    /// Panics if the pattern is malformed or does not bind every name in
    /// `required`.
    pub fn new<F>(name: &str, pattern: Pattern, required: &[&str], callback: F) -> MatcherPass
    where
        F: Fn(&mut Graph, &Match, &PassContext) -> Result<bool, PassError> + Send + Sync + 'static,
    {
        pattern.check(required);
        MatcherPass {
            name: name.to_string(),
            pattern,
            callback: Box::new(callback),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Try to match the pattern at node `id` and apply the callback.
    pub fn apply(
        &self,
        graph: &mut Graph,
        id: NodeId,
        ctx: &PassContext,
    ) -> Result<bool, PassError> {
        let Some(pat_match) = self.pattern.test_node(id, graph) else {
            return Ok(false);
        };
        let node_name = graph
            .node(id)
            .map(|n| n.name().to_string())
            .unwrap_or_default();
        let changed = (self.callback)(graph, &pat_match, ctx)?;
        if changed {
            trace!("{} rewrote node \"{}\"", self.name, node_name);
        }
        Ok(changed)
    }
}

impl ModelPass for MatcherPass {
    fn name(&self) -> &str {
        &self.name
    }

    /// Visit each node once in topological order.
    fn run_on_model(&self, graph: &mut Graph, ctx: &PassContext) -> Result<bool, PassError> {
        let mut changed = false;
        for id in graph.topological_order()? {
            if graph.contains(id) {
                changed |= self.apply(graph, id, ctx)?;
            }
        }
        Ok(changed)
    }
}

/// Default number of times one node is re-visited after a change.
pub const DEFAULT_MAX_NODE_ATTEMPTS: usize = 16;

/// Default number of traversals over the whole graph.
pub const DEFAULT_MAX_SWEEPS: usize = 8;

/// A group of matcher passes applied together until the graph stops
/// changing.
///
/// Each traversal visits nodes in topological order and tries every matcher
/// at each node, in registration order. When a matcher changes the graph,
/// the current node is tried again against all matchers, and nodes created
/// by the change are visited before the rest of the traversal. Traversals
/// repeat until one makes no change.
///
/// Both loops are capped so that rewrites which undo each other still
/// terminate. Hitting a cap logs a warning but is not an error.
pub struct GraphRewrite {
    name: String,
    matchers: Vec<MatcherPass>,
    max_node_attempts: usize,
    max_sweeps: usize,
}

impl GraphRewrite {
    pub fn new(name: &str) -> GraphRewrite {
        GraphRewrite {
            name: name.to_string(),
            matchers: Vec::new(),
            max_node_attempts: DEFAULT_MAX_NODE_ATTEMPTS,
            max_sweeps: DEFAULT_MAX_SWEEPS,
        }
    }

    /// Set the iteration caps. Values are clamped to at least 1.
    pub fn with_limits(mut self, max_node_attempts: usize, max_sweeps: usize) -> GraphRewrite {
        self.max_node_attempts = max_node_attempts.max(1);
        self.max_sweeps = max_sweeps.max(1);
        self
    }

    pub fn add_matcher(&mut self, matcher: MatcherPass) {
        self.matchers.push(matcher);
    }

    pub fn with_matcher(mut self, matcher: MatcherPass) -> GraphRewrite {
        self.add_matcher(matcher);
        self
    }

    /// Return the names of the matchers in the group.
    pub fn matcher_names(&self) -> Vec<&str> {
        self.matchers.iter().map(|m| m.name()).collect()
    }

    /// Apply the first matcher that changes the graph at `id`.
    fn apply_once(&self, graph: &mut Graph, id: NodeId, ctx: &PassContext) -> Result<bool, PassError> {
        for matcher in &self.matchers {
            if !graph.contains(id) {
                break;
            }
            if matcher.apply(graph, id, ctx)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Do one traversal of the graph and return true if anything changed.
    ///
    /// Nodes created by a rewrite inherit the attempt count of the node that
    /// was being rewritten, so a chain of rewrites is capped as a whole.
    fn sweep(&self, graph: &mut Graph, ctx: &PassContext) -> Result<bool, PassError> {
        let mut queue: VecDeque<(NodeId, usize)> = graph
            .topological_order()?
            .into_iter()
            .map(|id| (id, 0))
            .collect();
        let mut changed = false;

        while let Some((id, mut attempts)) = queue.pop_front() {
            while graph.contains(id) {
                if attempts >= self.max_node_attempts {
                    warn!(
                        "{}: stopped rewriting node {} after {} attempts",
                        self.name, id, attempts
                    );
                    break;
                }
                let first_new = graph.next_node_id();
                if !self.apply_once(graph, id, ctx)? {
                    break;
                }
                changed = true;
                attempts += 1;

                let new_nodes: Vec<NodeId> = graph
                    .topological_order()?
                    .into_iter()
                    .filter(|&n| n >= first_new)
                    .collect();
                for &node in new_nodes.iter().rev() {
                    queue.push_front((node, attempts));
                }
            }
        }
        Ok(changed)
    }
}

impl ModelPass for GraphRewrite {
    fn name(&self) -> &str {
        &self.name
    }

    fn run_on_model(&self, graph: &mut Graph, ctx: &PassContext) -> Result<bool, PassError> {
        let mut changed = false;
        for _ in 0..self.max_sweeps {
            if !self.sweep(graph, ctx)? {
                return Ok(changed);
            }
            changed = true;
        }
        warn!(
            "{}: graph still changing after {} sweeps",
            self.name, self.max_sweeps
        );
        Ok(changed)
    }
}

/// Runs a list of passes in order.
///
/// Every pass runs regardless of whether earlier passes changed the graph.
/// The first error stops the pipeline. The graph is not rolled back.
#[derive(Default)]
pub struct PassManager {
    passes: Vec<Box<dyn ModelPass + Send + Sync>>,
    validate_each: bool,
}

impl PassManager {
    pub fn new() -> PassManager {
        PassManager::default()
    }

    pub fn register<P: ModelPass + Send + Sync + 'static>(&mut self, pass: P) -> &mut Self {
        self.passes.push(Box::new(pass));
        self
    }

    /// Re-validate the whole graph after each pass.
    pub fn set_validate_each(&mut self, validate_each: bool) {
        self.validate_each = validate_each;
    }

    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Run all passes and return true if any of them changed the graph.
    pub fn run(&self, graph: &mut Graph, ctx: &PassContext) -> Result<bool, PassError> {
        let mut changed = false;
        for pass in &self.passes {
            let pass_changed = pass.run_on_model(graph, ctx)?;
            debug!(
                "pass {} {}",
                pass.name(),
                if pass_changed {
                    "changed the graph"
                } else {
                    "made no changes"
                }
            );
            if self.validate_each {
                graph.validate()?;
            }
            changed |= pass_changed;
        }
        Ok(changed)
    }
}

/// Return the nodes of the subgraph computing `root` from `boundary`.
///
/// The walk stops at boundary values and constants. Constants are shared
/// inputs rather than part of the computation, so they are not included.
pub fn subgraph_nodes(graph: &Graph, root: NodeId, boundary: &[OutputRef]) -> Vec<NodeId> {
    let mut nodes = Vec::new();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        if nodes.contains(&id) || boundary.iter().any(|b| b.node == id) {
            continue;
        }
        let Some(node) = graph.node(id) else {
            continue;
        };
        if graph.constant_value(OutputRef::new(id, 0)).is_some() {
            continue;
        }
        nodes.push(id);
        stack.extend(node.inputs().iter().map(|input| input.node));
    }
    nodes.sort();
    nodes
}

/// Replace `old` with `new`, giving `new` the friendly name of `old` and the
/// runtime info of every node in `sources`.
pub fn replace_with_copy(
    graph: &mut Graph,
    old: NodeId,
    new: NodeId,
    sources: &[NodeId],
) -> Result<(), PassError> {
    let name = graph
        .node(old)
        .map(|n| n.name().to_string())
        .ok_or(GraphError::InvalidNodeId(old))?;
    graph.set_friendly_name(new, &name)?;
    graph.copy_runtime_info(sources, new);
    graph.replace_node(old, new)?;
    Ok(())
}
