//! Node naming and global id allocation.

use std::collections::HashMap;
use std::fmt;

/// A circuit node's global solution id.
/// Node 0 is always ground.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl NodeId {
    /// The ground node (always index 0).
    pub const GROUND: NodeId = NodeId(0);

    /// Check if this is the ground node.
    pub fn is_ground(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ground() {
            write!(f, "GND")
        } else {
            write!(f, "N{}", self.0)
        }
    }
}

/// Name reserved for the ground variable.
pub const GROUND_NAME: &str = "gnd";

/// Whether a node name refers to ground.
pub fn is_ground_name(name: &str) -> bool {
    name == "0" || name.eq_ignore_ascii_case(GROUND_NAME)
}

/// Resolved circuit nodes, ground first.
///
/// Node names are case-insensitive; `0` and `gnd` both name ground.
#[derive(Debug, Clone)]
pub struct Topology {
    names: Vec<String>,
    lookup: HashMap<String, NodeId>,
}

impl Default for Topology {
    fn default() -> Self {
        Self::new()
    }
}

impl Topology {
    /// A topology holding only ground.
    pub fn new() -> Self {
        Self {
            names: vec![GROUND_NAME.to_string()],
            lookup: HashMap::new(),
        }
    }

    /// Build from node names in first-seen order.
    pub fn from_nodes<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut topo = Self::new();
        for name in names {
            topo.add_node(name);
        }
        topo
    }

    /// Get or create the node called `name`.
    pub fn add_node(&mut self, name: &str) -> NodeId {
        if is_ground_name(name) {
            return NodeId::GROUND;
        }
        let key = name.to_ascii_lowercase();
        if let Some(&id) = self.lookup.get(&key) {
            return id;
        }
        let id = NodeId(self.names.len());
        self.names.push(name.to_string());
        self.lookup.insert(key, id);
        id
    }

    /// Look up an existing node.
    pub fn node(&self, name: &str) -> Option<NodeId> {
        if is_ground_name(name) {
            return Some(NodeId::GROUND);
        }
        self.lookup.get(&name.to_ascii_lowercase()).copied()
    }

    /// Number of nodes including ground.
    pub fn num_nodes(&self) -> usize {
        self.names.len()
    }

    /// Node names indexed by id.
    pub fn names(&self) -> &[String] {
        &self.names
    }
}
