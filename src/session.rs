//! Compilation of graphs through the default pass pipeline.

use log::debug;
use rayon::prelude::*;

use crate::env::{env_flag, env_value};
use crate::graph::Graph;
use crate::op_registry::OpRegistry;
use crate::optimize::{
    align_eltwise_input_ranks, convert_opset3_to_opset2, convert_opset8_to_opset7,
    convert_reduce_to_reshape, gelu_fusion, hsigmoid_fusion, softmax_fusion, CheckFullyConverted,
    CheckOpset, ConstantFolding, DecodeFrameworkNodes, DiagnosticLevel, Diagnostics,
    GraphRewrite, InitNodeInfo, PassContext, PassError, PassManager, Validate,
    DEFAULT_MAX_NODE_ATTEMPTS, DEFAULT_MAX_SWEEPS,
};

/// Opset used to decode framework nodes when no target opset is set.
const LATEST_OPSET: u32 = 8;

/// Options which control the compilation pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct CompileOptions {
    /// Maximum number of consecutive rewrites of one node in a rewrite group.
    pub max_node_attempts: usize,

    /// Maximum number of traversals of the graph by a rewrite group.
    pub max_sweeps: usize,

    pub diagnostics: DiagnosticLevel,

    /// Run fusion passes.
    pub fusions: bool,

    /// Run constant folding.
    pub constant_folding: bool,

    /// Require every node to belong to this opset after conversion.
    pub target_opset: Option<u32>,

    /// Re-validate the whole graph after each pass.
    pub validate_each: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            max_node_attempts: DEFAULT_MAX_NODE_ATTEMPTS,
            max_sweeps: DEFAULT_MAX_SWEEPS,
            diagnostics: DiagnosticLevel::Off,
            fusions: true,
            constant_folding: true,
            target_opset: None,
            validate_each: false,
        }
    }
}

impl CompileOptions {
    /// Return the default options, overridden by environment variables.
    ///
    /// - `REWIRE_DIAGNOSTICS`: diagnostic level (`off`, `warn` or `info`)
    /// - `REWIRE_NO_FUSIONS`: disable fusions
    /// - `REWIRE_NO_CONSTANT_FOLDING`: disable constant folding
    /// - `REWIRE_TARGET_OPSET`: target opset version
    pub fn from_env() -> CompileOptions {
        let mut opts = CompileOptions::default();
        if let Ok(level) = std::env::var("REWIRE_DIAGNOSTICS") {
            match DiagnosticLevel::parse(&level) {
                Some(level) => opts.diagnostics = level,
                None => log::warn!("Unrecognized diagnostic level \"{}\"", level),
            }
        }
        opts.fusions = !env_flag("REWIRE_NO_FUSIONS", false);
        opts.constant_folding = !env_flag("REWIRE_NO_CONSTANT_FOLDING", false);
        if let Some(opset) = env_value("REWIRE_TARGET_OPSET") {
            opts.target_opset = Some(opset);
        }
        opts
    }
}

/// Errors from compiling a graph.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum CompileError {
    /// A pass failed. The graph is left in the state the failing pass left
    /// it in and must not be used.
    #[error("pass pipeline failed: {0}")]
    Pass(#[from] PassError),
}

/// Compiles graphs by running the default pass pipeline.
///
/// The pipeline is:
///
/// 1. Initialization and validation (`InitNodeInfo`, `Validate`)
/// 2. Decoding of framework nodes
/// 3. Fusions, if enabled
/// 4. Constant folding, if enabled
/// 5. Opset conversions and reduce-to-reshape
/// 6. Checks that the graph is fully converted and, if a target opset is
///    set, that every node belongs to it
pub struct CompileSession {
    registry: OpRegistry,
    options: CompileOptions,
}

impl Default for CompileSession {
    fn default() -> Self {
        Self::new(CompileOptions::default())
    }
}

impl CompileSession {
    /// Create a session with all built-in operators.
    pub fn new(options: CompileOptions) -> CompileSession {
        Self::with_registry(OpRegistry::with_all_ops(), options)
    }

    pub fn with_registry(registry: OpRegistry, options: CompileOptions) -> CompileSession {
        CompileSession { registry, options }
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn registry(&self) -> &OpRegistry {
        &self.registry
    }

    fn rewrite(&self, rewrite: GraphRewrite) -> GraphRewrite {
        rewrite.with_limits(self.options.max_node_attempts, self.options.max_sweeps)
    }

    /// Build the pass pipeline for the session's options.
    pub fn pipeline(&self) -> PassManager {
        let opts = &self.options;
        let mut manager = PassManager::new();
        manager.set_validate_each(opts.validate_each);

        manager.register(InitNodeInfo).register(Validate);
        manager.register(DecodeFrameworkNodes {
            opset: opts.target_opset.unwrap_or(LATEST_OPSET),
        });

        if opts.fusions {
            manager
                .register(align_eltwise_input_ranks())
                .register(self.rewrite(gelu_fusion()))
                .register(softmax_fusion())
                .register(self.rewrite(hsigmoid_fusion()));
        }
        if opts.constant_folding {
            manager.register(ConstantFolding);
        }

        manager
            .register(self.rewrite(convert_reduce_to_reshape()))
            .register(self.rewrite(convert_opset8_to_opset7()))
            .register(self.rewrite(convert_opset3_to_opset2()))
            .register(CheckFullyConverted);
        if let Some(opset) = opts.target_opset {
            manager.register(CheckOpset { opset });
        }
        manager
    }

    /// Compile a graph in place. Returns true if the graph was changed.
    pub fn compile(&self, graph: &mut Graph) -> Result<bool, CompileError> {
        let pipeline = self.pipeline();
        let diagnostics = Diagnostics::with_level(self.options.diagnostics);
        let ctx = PassContext {
            registry: &self.registry,
            diagnostics: &diagnostics,
        };
        let changed = pipeline.run(graph, &ctx)?;
        debug!(
            "compiled graph with {} nodes, {} warnings",
            graph.len(),
            diagnostics.warning_count()
        );
        Ok(changed)
    }

    /// Compile several independent graphs in parallel.
    ///
    /// Each graph is compiled by one task, with its own diagnostics. Results
    /// are returned in the same order as `graphs`.
    pub fn compile_all(&self, graphs: &mut [Graph]) -> Vec<Result<bool, CompileError>> {
        graphs
            .par_iter_mut()
            .map(|graph| self.compile(graph))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use rewire_shape_inference::{pshape, ElementType};
    use rewire_testing::TestCases;

    use super::{CompileError, CompileOptions, CompileSession};
    use crate::graph::builder::Expr;
    use crate::graph::Graph;
    use crate::operator::Attributes;
    use crate::ops::{Erf, FrameworkNode, Gather8, ReduceMean, Softmax8};
    use crate::optimize::{DiagnosticLevel, PassError};

    fn operators(graph: &Graph) -> Vec<String> {
        graph
            .topological_order()
            .unwrap()
            .into_iter()
            .filter_map(|id| graph.node(id))
            .map(|node| node.op_type())
            .filter(|op_type| !matches!(op_type.name, "Parameter" | "Constant" | "Result"))
            .map(|op_type| op_type.to_string())
            .collect()
    }

    /// `gelu(x) -> Softmax8(axis=-1) -> ReduceMean(axis=0)`, where gelu is
    /// written in terms of `Erf`.
    fn make_graph() -> Graph {
        let x = Expr::parameter("x", ElementType::F32, pshape![1, 8]);
        let erf = (x.clone() / std::f32::consts::SQRT_2).unary(Erf);
        let gelu = (x * 0.5) * (erf + 1.0);
        gelu.unary(Softmax8 { axis: -1 })
            .apply(ReduceMean { keep_dims: false }, &[Expr::constant(vec![0i64])])
            .named("mean")
            .build_graph()
    }

    #[test]
    fn test_pipeline() {
        #[derive(Debug)]
        struct Case {
            options: CompileOptions,
            expected_passes: Vec<&'static str>,
        }

        let cases = [
            Case {
                options: CompileOptions::default(),
                expected_passes: [
                    "InitNodeInfo",
                    "Validate",
                    "DecodeFrameworkNodes",
                    "AlignEltwiseInputRanks",
                    "GeluFusion",
                    "SoftmaxFusion",
                    "HSigmoidFusion",
                    "ConstantFolding",
                    "ConvertReduceToReshape",
                    "ConvertOpSet8ToOpSet7",
                    "ConvertOpSet3ToOpSet2",
                    "CheckFullyConverted",
                ]
                .into(),
            },
            Case {
                options: CompileOptions {
                    fusions: false,
                    constant_folding: false,
                    target_opset: Some(7),
                    ..Default::default()
                },
                expected_passes: [
                    "InitNodeInfo",
                    "Validate",
                    "DecodeFrameworkNodes",
                    "ConvertReduceToReshape",
                    "ConvertOpSet8ToOpSet7",
                    "ConvertOpSet3ToOpSet2",
                    "CheckFullyConverted",
                    "CheckOpset",
                ]
                .into(),
            },
        ];

        cases.test_each(|case| {
            let session = CompileSession::new(case.options.clone());
            assert_eq!(session.pipeline().pass_names(), case.expected_passes);
        })
    }

    #[test]
    fn test_compile() {
        let session = CompileSession::new(CompileOptions {
            target_opset: Some(7),
            diagnostics: DiagnosticLevel::Info,
            ..Default::default()
        });
        let mut graph = make_graph();

        assert_eq!(session.compile(&mut graph), Ok(true));
        assert_eq!(operators(&graph), ["Gelu-v7", "Softmax-v1", "Reshape-v1"]);

        // A compiled graph is a fixed point of the pipeline.
        assert_eq!(session.compile(&mut graph), Ok(false));
    }

    #[test]
    fn test_compile_without_fusions() {
        let session = CompileSession::new(CompileOptions {
            fusions: false,
            ..Default::default()
        });
        let mut graph = make_graph();
        session.compile(&mut graph).unwrap();

        let ops = operators(&graph);
        assert!(ops.contains(&"Erf-v1".to_string()));
        assert!(!ops.contains(&"Gelu-v7".to_string()));
    }

    #[test]
    fn test_compile_errors() {
        let session = CompileSession::new(CompileOptions {
            target_opset: Some(1),
            ..Default::default()
        });

        // Softmax is converted down to opset 1, but Gelu has no opset 1
        // variant.
        let mut graph = make_graph();
        let err = session.compile(&mut graph).err();
        assert!(matches!(
            err,
            Some(CompileError::Pass(PassError::NotInOpset { opset: 1, .. }))
        ));

        let data = Expr::parameter("data", ElementType::F32, pshape![4, 3]);
        let op = FrameworkNode {
            op_name: "MyOp".into(),
            attrs: Attributes::new(),
            num_outputs: 1,
        };
        let mut graph = data
            .apply(
                Gather8 { batch_dims: 0 },
                &[Expr::constant(vec![1i64, 0]), Expr::constant(0i64)],
            )
            .unary(op)
            .named("custom")
            .build_graph();
        let err = CompileSession::default().compile(&mut graph).err();
        assert_eq!(
            err,
            Some(CompileError::Pass(PassError::NotFullyConverted(vec![
                "custom (MyOp)".into()
            ])))
        );
    }

    #[test]
    fn test_compile_all() {
        let session = CompileSession::default();
        let mut graphs: Vec<Graph> = (0..4).map(|_| make_graph()).collect();

        let results = session.compile_all(&mut graphs);

        assert_eq!(results.len(), 4);
        for (graph, result) in graphs.iter().zip(results) {
            assert_eq!(result, Ok(true));
            assert_eq!(operators(graph), ["Gelu-v7", "Softmax-v1", "Reshape-v1"]);
        }
    }
}
