use std::num::NonZero;

/// ID of a node in a [`Graph`](crate::graph::Graph).
///
/// IDs are assigned in creation order and are never reused within a graph,
/// so an ID compares greater than the IDs of all nodes created before it.
#[derive(Copy, Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NodeId(NonZero<u32>);

impl NodeId {
    /// Return the underlying u32 value of the ID.
    pub fn as_u32(self) -> u32 {
        self.0.get() - 1
    }

    /// Return the underlying ID value as a usize, for slice indexing.
    pub fn as_usize(self) -> usize {
        self.as_u32() as usize
    }

    /// Construct a node ID from a slice index.
    ///
    /// IDs are stored as `index + 1` so that `Option<NodeId>` is the same
    /// size as `NodeId`. Indices beyond `u32::MAX - 1` saturate.
    pub fn from_index(index: usize) -> NodeId {
        let index = u32::try_from(index).unwrap_or(u32::MAX);
        NodeId(NonZero::<u32>::MIN.saturating_add(index))
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.as_u32().fmt(f)
    }
}

impl std::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeId({})", self.as_u32())
    }
}

#[cfg(test)]
mod tests {
    use super::NodeId;

    #[test]
    fn test_node_id() {
        let id = NodeId::from_index(5);
        assert_eq!(id.as_usize(), 5);
        assert_eq!(id.to_string(), "5");
        assert!(NodeId::from_index(2) < id);
        assert_eq!(
            std::mem::size_of::<Option<NodeId>>(),
            std::mem::size_of::<NodeId>()
        );
    }
}
