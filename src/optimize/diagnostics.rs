use std::cell::RefCell;

use rustc_hash::FxHashSet;

use crate::graph::{Graph, NodeId};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticLevel {
    /// Don't show any diagnostics.
    #[default]
    Off,
    /// Report only unsuccessful optimizations.
    Warn,
    /// Report all optimizations.
    Info,
}

impl DiagnosticLevel {
    /// Parse a level name. Unknown names return `None`.
    pub fn parse(name: &str) -> Option<DiagnosticLevel> {
        match name.trim().to_ascii_lowercase().as_str() {
            "off" | "0" => Some(DiagnosticLevel::Off),
            "warn" | "1" => Some(DiagnosticLevel::Warn),
            "info" | "2" => Some(DiagnosticLevel::Info),
            _ => None,
        }
    }
}

/// Diagnostic reporter for graph optimizations.
///
/// Messages are emitted through the `log` facade.
#[derive(Default)]
pub struct Diagnostics {
    /// Nodes against which diagnostics have been reported at the `Warn` level
    /// or higher.
    warned_nodes: RefCell<FxHashSet<NodeId>>,
    level: DiagnosticLevel,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(level: DiagnosticLevel) -> Self {
        Self {
            warned_nodes: RefCell::new(FxHashSet::default()),
            level,
        }
    }

    /// Enable reporting of all messages at or above a given level.
    pub fn set_level(&mut self, level: DiagnosticLevel) {
        self.level = level;
    }

    /// Return true if diagnostic messages are enabled at a given level.
    pub fn enabled(&self, level: DiagnosticLevel) -> bool {
        self.level >= level
    }

    /// Log a diagnostic message for a given node at the [`Info`](DiagnosticLevel::Info) level.
    pub fn info(&self, graph: &Graph, node: NodeId, message: std::fmt::Arguments<'_>) {
        if self.level < DiagnosticLevel::Info {
            return;
        }
        log::info!("I| {}: {}", self.node_name(graph, node), message);
    }

    /// Log a diagnostic message for a given node at the [`Warn`](DiagnosticLevel::Warn) level.
    ///
    /// Only the first warning for each node is reported.
    pub fn warn(&self, graph: &Graph, node: NodeId, message: std::fmt::Arguments<'_>) {
        if self.level < DiagnosticLevel::Warn || !self.warned_nodes.borrow_mut().insert(node) {
            return;
        }
        log::warn!("W| {}: {}", self.node_name(graph, node), message);
    }

    /// Return the number of nodes that have been warned about.
    pub fn warning_count(&self) -> usize {
        self.warned_nodes.borrow().len()
    }

    fn node_name<'a>(&self, g: &'a Graph, id: NodeId) -> &'a str {
        g.node(id).map(|n| n.name()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use rewire_shape_inference::{pshape, ElementType};

    use super::{DiagnosticLevel, Diagnostics};
    use crate::graph::Graph;

    #[test]
    fn test_warn_once_per_node() {
        let mut g = Graph::new();
        let x = g.add_parameter("x", ElementType::F32, pshape![1]);
        let y = g.add_parameter("y", ElementType::F32, pshape![1]);

        let diag = Diagnostics::with_level(DiagnosticLevel::Warn);
        diag.warn(&g, x, format_args!("first"));
        diag.warn(&g, x, format_args!("second"));
        diag.info(&g, y, format_args!("ignored"));
        assert_eq!(diag.warning_count(), 1);

        let off = Diagnostics::new();
        off.warn(&g, x, format_args!("ignored"));
        assert_eq!(off.warning_count(), 0);
        assert!(!off.enabled(DiagnosticLevel::Warn));
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(DiagnosticLevel::parse("WARN"), Some(DiagnosticLevel::Warn));
        assert_eq!(DiagnosticLevel::parse("2"), Some(DiagnosticLevel::Info));
        assert_eq!(DiagnosticLevel::parse("loud"), None);
    }
}
