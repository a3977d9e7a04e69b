use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::sync::Arc;

use rewire_shape_inference::ElementType;

use crate::graph::{Graph, NodeId, OutputRef};

/// Tracks an association between named symbols (variables) in a pattern and
/// the values they have been resolved to.
struct SymbolMap {
    // Map of `(name, output)` for resolved symbols. This is modified only
    // by extending and truncating it.
    symbols: Vec<(&'static str, OutputRef)>,

    // Stack of checkpoints. Each is the length of `symbols` at the time of
    // the checkpoint.
    checkpoints: Vec<usize>,
}

impl SymbolMap {
    fn new() -> SymbolMap {
        SymbolMap {
            symbols: Vec::new(),
            checkpoints: Vec::new(),
        }
    }

    /// Save the current state of the map.
    ///
    /// This is useful if we need to backtrack during pattern matching.
    fn checkpoint(&mut self) {
        self.checkpoints.push(self.symbols.len());
    }

    /// Discard any new symbols recorded since the last call to `checkpoint`.
    fn revert(&mut self) {
        if let Some(checkpoint) = self.checkpoints.pop() {
            self.symbols.truncate(checkpoint);
        }
    }

    /// Drop the last checkpoint, keeping symbols recorded since.
    fn commit(&mut self) {
        self.checkpoints.pop();
    }

    fn add(&mut self, name: &'static str, output: OutputRef) {
        self.symbols.push((name, output));
    }

    fn find(&self, name: &str) -> Option<OutputRef> {
        self.symbols
            .iter()
            .find_map(|(sym_name, output)| (*sym_name == name).then_some(*output))
    }

    /// Bind `name` to `output`, or check that an existing binding agrees.
    fn bind(&mut self, name: &'static str, output: OutputRef) -> bool {
        match self.find(name) {
            Some(resolved) => resolved == output,
            None => {
                self.add(name, output);
                true
            }
        }
    }
}

/// The result of matching a [`Pattern`] against a graph node.
pub struct Match {
    root: OutputRef,
    symbols: SymbolMap,
}

impl Match {
    /// Return the value at which matching started.
    pub fn root(&self) -> OutputRef {
        self.root
    }

    /// Return the value that a symbol or keyed operator was resolved to.
    pub fn get(&self, name: &str) -> Option<OutputRef> {
        self.symbols.find(name)
    }

    /// Return the node that produces the value bound to `name`.
    pub fn node(&self, name: &str) -> Option<NodeId> {
        self.get(name).map(|output| output.node)
    }
}

impl fmt::Debug for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Match")
            .field("root", &self.root)
            .field("symbols", &self.symbols.symbols)
            .finish()
    }
}

type PredicateFn = dyn Fn(&Graph, OutputRef) -> bool + Send + Sync;

/// A named check on a value, used to constrain what a pattern node matches.
#[derive(Clone)]
pub struct Predicate {
    name: &'static str,
    check: Arc<PredicateFn>,
}

impl Predicate {
    pub fn new<F>(name: &'static str, check: F) -> Predicate
    where
        F: Fn(&Graph, OutputRef) -> bool + Send + Sync + 'static,
    {
        Predicate {
            name,
            check: Arc::new(check),
        }
    }

    pub fn test(&self, graph: &Graph, output: OutputRef) -> bool {
        (self.check)(graph, output)
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Predicate({})", self.name)
    }
}

/// Value has a known rank.
pub fn has_static_rank() -> Predicate {
    Predicate::new("has_static_rank", |graph, output| {
        graph
            .output_info(output)
            .is_some_and(|info| info.shape.rank().is_some())
    })
}

/// Value has a known rank equal to `rank`.
pub fn rank_equals(rank: usize) -> Predicate {
    Predicate::new("rank_equals", move |graph, output| {
        graph
            .output_info(output)
            .is_some_and(|info| info.shape.rank() == Some(rank))
    })
}

/// Every dimension of the value is known.
pub fn has_static_shape() -> Predicate {
    Predicate::new("has_static_shape", |graph, output| {
        graph
            .output_info(output)
            .is_some_and(|info| info.shape.to_shape().is_some())
    })
}

/// Value is read by exactly `count` inputs.
pub fn consumers_count(count: usize) -> Predicate {
    Predicate::new("consumers_count", move |graph, output| {
        graph.consumers(output).len() == count
    })
}

/// Value has element type `element_type`.
pub fn type_matches(element_type: ElementType) -> Predicate {
    Predicate::new("type_matches", move |graph, output| {
        graph
            .output_info(output)
            .is_some_and(|info| info.element_type == element_type)
    })
}

/// Absolute tolerance for matching float constants against constant patterns.
const CONST_TOLERANCE: f32 = 1e-4;

#[derive(Clone, Debug, PartialEq)]
pub struct ConstantPattern {
    value: f32,
}

impl ConstantPattern {
    fn matches(&self, graph: &Graph, output: OutputRef) -> bool {
        graph
            .constant_value(output)
            .and_then(|value| value.item_f32())
            .is_some_and(|x| (x - self.value).abs() <= CONST_TOLERANCE)
    }
}

#[derive(Clone, Debug)]
pub struct OpPattern {
    /// Name of the operator (eg. "Multiply"). Any version matches.
    name: &'static str,

    /// Patterns that the inputs must match, or `None` to accept any inputs.
    inputs: Option<Vec<Pattern>>,

    /// Checks on the operator's output.
    predicates: Vec<Predicate>,

    /// Identifier which can be used to look up the operator node after a
    /// successful match.
    key: Option<&'static str>,
}

impl OpPattern {
    fn matches(&self, output: OutputRef, graph: &Graph, symbols: &mut SymbolMap) -> bool {
        let Some(node) = graph.node(output.node) else {
            return false;
        };
        if node.op().op_type().name != self.name {
            return false;
        }
        if !self.predicates.iter().all(|p| p.test(graph, output)) {
            return false;
        }
        let Some(inputs) = &self.inputs else {
            return true;
        };
        if inputs.len() != node.inputs().len() {
            return false;
        }

        // For commutative binary operators, we allow the pattern to match
        // either way around.
        if let (true, [pat_a, pat_b], [input_a, input_b]) =
            (node.op().is_commutative(), &inputs[..], node.inputs())
        {
            symbols.checkpoint();
            if pat_a.test_impl(*input_a, graph, symbols)
                && pat_b.test_impl(*input_b, graph, symbols)
            {
                symbols.commit();
                return true;
            }
            symbols.revert();

            pat_b.test_impl(*input_a, graph, symbols) && pat_a.test_impl(*input_b, graph, symbols)
        } else {
            inputs
                .iter()
                .zip(node.inputs())
                .all(|(pattern, input)| pattern.test_impl(*input, graph, symbols))
        }
    }
}

#[derive(Clone, Debug)]
pub struct SymbolPattern {
    /// Name under which the bound value is recorded. Anonymous symbols match
    /// anything and record nothing.
    name: Option<&'static str>,

    /// True if this symbol can only match a constant.
    constant: bool,

    predicates: Vec<Predicate>,
}

/// Specifies a pattern for a subgraph within a [`Graph`].
///
/// Patterns consist of matchers for operators, constants and symbols
/// (variables), plus alternatives. These are matched against a value in a
/// [`Graph`]. The value matches if it is the output of a subgraph that
/// matches the pattern.
///
/// Patterns are created using constructor methods and combined to form
/// patterns that can match sub-graphs within a graph. For example
/// `Pattern::constant(1.0) + Pattern::symbol("x")` describes a graph with an
/// `Add` operator that takes the float constant `1.0` and a free variable `x`
/// as inputs.
///
/// Matching only reads the graph.
#[derive(Clone, Debug)]
pub enum Pattern {
    /// Matches an operator.
    Operator(OpPattern),
    /// Matches a constant value.
    Constant(ConstantPattern),
    /// Matches any value, optionally restricted to constants.
    Symbol(SymbolPattern),
    /// Matches if any alternative matches. The first match wins.
    AnyOf(Vec<Pattern>),
}

impl Pattern {
    /// Create a pattern that matches an operator.
    pub fn operator<I: Into<Vec<Pattern>>>(name: &'static str, inputs: I) -> Pattern {
        Pattern::Operator(OpPattern {
            name,
            inputs: Some(inputs.into()),
            predicates: Vec::new(),
            key: None,
        })
    }

    /// Create a pattern that matches an operator with any inputs.
    pub fn operator_any_inputs(name: &'static str) -> Pattern {
        Pattern::Operator(OpPattern {
            name,
            inputs: None,
            predicates: Vec::new(),
            key: None,
        })
    }

    /// Create a pattern that matches a binary operator.
    pub fn binary_op<A: Into<Pattern>, B: Into<Pattern>>(
        name: &'static str,
        input_a: A,
        input_b: B,
    ) -> Pattern {
        let inputs: [Pattern; 2] = [input_a.into(), input_b.into()];
        Pattern::operator(name, inputs)
    }

    /// Create a pattern that matches a unary operator.
    pub fn unary_op<I: Into<Pattern>>(name: &'static str, input: I) -> Pattern {
        let inputs: [Pattern; 1] = [input.into()];
        Pattern::operator(name, inputs)
    }

    /// Set the identifier for a pattern, used to look up the bound value in
    /// a match using [`Match::get`].
    pub fn with_name(self, name: &'static str) -> Pattern {
        match self {
            Pattern::Operator(mut op) => {
                op.key = Some(name);
                Pattern::Operator(op)
            }
            Pattern::Symbol(mut symbol) => {
                symbol.name = Some(name);
                Pattern::Symbol(symbol)
            }
            Pattern::AnyOf(alternatives) => Pattern::AnyOf(
                alternatives
                    .into_iter()
                    .map(|alt| alt.with_name(name))
                    .collect(),
            ),
            // Constants don't currently support keys.
            Pattern::Constant(constant) => Pattern::Constant(constant),
        }
    }

    /// Add a check that the matched value must pass.
    pub fn with_predicate(self, predicate: Predicate) -> Pattern {
        match self {
            Pattern::Operator(mut op) => {
                op.predicates.push(predicate);
                Pattern::Operator(op)
            }
            Pattern::Symbol(mut symbol) => {
                symbol.predicates.push(predicate);
                Pattern::Symbol(symbol)
            }
            Pattern::AnyOf(alternatives) => Pattern::AnyOf(
                alternatives
                    .into_iter()
                    .map(|alt| alt.with_predicate(predicate.clone()))
                    .collect(),
            ),
            Pattern::Constant(constant) => Pattern::Constant(constant),
        }
    }

    /// Create a pattern that matches a constant node with a given value.
    pub fn constant(value: f32) -> Pattern {
        Pattern::Constant(ConstantPattern { value })
    }

    /// Create a pattern that matches any value.
    ///
    /// In order for a pattern to match a node, all symbols with the same name
    /// must resolve to the same value.
    pub fn symbol(name: &'static str) -> Pattern {
        Pattern::Symbol(SymbolPattern {
            name: Some(name),
            constant: false,
            predicates: Vec::new(),
        })
    }

    /// Create a pattern that matches any value without recording it.
    pub fn any() -> Pattern {
        Pattern::Symbol(SymbolPattern {
            name: None,
            constant: false,
            predicates: Vec::new(),
        })
    }

    /// Create a pattern that matches a constant.
    ///
    /// Unlike [`constant`](Self::constant), the value of the constant is not specified.
    pub fn const_symbol(name: &'static str) -> Pattern {
        Pattern::Symbol(SymbolPattern {
            name: Some(name),
            constant: true,
            predicates: Vec::new(),
        })
    }

    /// Create a pattern that matches if any of `alternatives` does.
    pub fn any_of<I: Into<Vec<Pattern>>>(alternatives: I) -> Pattern {
        Pattern::AnyOf(alternatives.into())
    }

    /// Return the names that are bound by every successful match.
    pub fn bound_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        self.collect_bound_names(&mut names);
        names.sort();
        names.dedup();
        names
    }

    fn collect_bound_names(&self, names: &mut Vec<&'static str>) {
        match self {
            Pattern::Operator(op) => {
                names.extend(op.key);
                for input in op.inputs.iter().flatten() {
                    input.collect_bound_names(names);
                }
            }
            Pattern::Symbol(symbol) => names.extend(symbol.name),
            Pattern::Constant(_) => {}
            Pattern::AnyOf(alternatives) => {
                let mut per_alt = alternatives.iter().map(|alt| alt.bound_names());
                let Some(mut common) = per_alt.next() else {
                    return;
                };
                for alt_names in per_alt {
                    common.retain(|name| alt_names.contains(name));
                }
                names.extend(common);
            }
        }
    }

    /// Check that a pattern is well-formed and that every name in
    /// `required` is bound by a successful match.
    ///
    /// Panics if not. Patterns are fixed when a pass is written, so a
    /// malformed pattern is a programming error.
    pub fn check(&self, required: &[&str]) {
        self.check_structure();
        let bound = self.bound_names();
        for name in required {
            assert!(
                bound.contains(name),
                "pattern does not always bind \"{}\"",
                name
            );
        }
    }

    fn check_structure(&self) {
        match self {
            Pattern::Operator(op) => {
                assert!(!op.name.is_empty(), "operator pattern has no name");
                for input in op.inputs.iter().flatten() {
                    input.check_structure();
                }
            }
            Pattern::AnyOf(alternatives) => {
                assert!(!alternatives.is_empty(), "pattern has no alternatives");
                for alt in alternatives {
                    alt.check_structure();
                }
            }
            Pattern::Constant(_) | Pattern::Symbol(_) => {}
        }
    }

    /// Test if the subgraph producing `output` matches this pattern.
    ///
    /// If the pattern matches, this returns a [`Match`] which allows looking
    /// up the values that any symbols in the pattern were resolved to.
    pub fn test(&self, output: OutputRef, graph: &Graph) -> Option<Match> {
        let mut symbols = SymbolMap::new();
        if self.test_impl(output, graph, &mut symbols) {
            Some(Match {
                root: output,
                symbols,
            })
        } else {
            None
        }
    }

    /// Test this pattern against the first output of node `id`.
    pub fn test_node(&self, id: NodeId, graph: &Graph) -> Option<Match> {
        self.test(OutputRef::new(id, 0), graph)
    }

    /// Match this pattern against a subgraph with output `output` and record
    /// symbol associations in `symbols`.
    fn test_impl(&self, output: OutputRef, graph: &Graph, symbols: &mut SymbolMap) -> bool {
        if graph.output(output).is_none() {
            return false;
        }

        match self {
            Pattern::Operator(op_pat) => {
                if !op_pat.matches(output, graph, symbols) {
                    return false;
                }
                match op_pat.key {
                    Some(key) => symbols.bind(key, output),
                    None => true,
                }
            }
            Pattern::Constant(const_pat) => const_pat.matches(graph, output),
            Pattern::Symbol(sym_pat) => {
                if sym_pat.constant && graph.constant_value(output).is_none() {
                    return false;
                }
                if !sym_pat.predicates.iter().all(|p| p.test(graph, output)) {
                    return false;
                }

                // If we have seen this symbol before, it must resolve to the
                // same value. Otherwise it always matches.
                match sym_pat.name {
                    Some(name) => symbols.bind(name, output),
                    None => true,
                }
            }
            Pattern::AnyOf(alternatives) => {
                for alt in alternatives {
                    symbols.checkpoint();
                    if alt.test_impl(output, graph, symbols) {
                        symbols.commit();
                        return true;
                    }
                    symbols.revert();
                }
                false
            }
        }
    }
}

impl From<f32> for Pattern {
    fn from(val: f32) -> Pattern {
        Pattern::constant(val)
    }
}

macro_rules! impl_binop_for_pattern {
    ($trait:ident, $method:ident, $op_name:expr) => {
        impl<I: Into<Pattern>> $trait<I> for Pattern {
            type Output = Pattern;

            fn $method(self, rhs: I) -> Pattern {
                Pattern::binary_op($op_name, self, rhs.into())
            }
        }

        impl $trait<Pattern> for f32 {
            type Output = Pattern;

            fn $method(self, rhs: Pattern) -> Pattern {
                Pattern::binary_op($op_name, Pattern::constant(self), rhs)
            }
        }
    };
}
impl_binop_for_pattern!(Add, add, "Add");
impl_binop_for_pattern!(Mul, mul, "Multiply");
impl_binop_for_pattern!(Div, div, "Divide");
impl_binop_for_pattern!(Sub, sub, "Subtract");

impl Neg for Pattern {
    type Output = Pattern;

    fn neg(self) -> Pattern {
        Pattern::unary_op("Negative", self)
    }
}
