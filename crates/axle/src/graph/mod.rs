//! Minimal dataflow-graph model consumed by the dispatch core.
//!
//! The surrounding compiler owns a much richer IR; dispatch only needs
//! operator types, data edges, sub-graph nesting, and a place to record its
//! decisions. Nodes and sub-graphs live in an arena owned by [`Graph`] and
//! are addressed through the stable ids minted by that arena.

use smallvec::SmallVec;

/// Stable identifier for a node in a [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Stable identifier for a sub-graph in a [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubgraphId(pub u32);

/// Composite-engine attribute attached to nodes and sub-graphs.
///
/// `Unset` means the entity was never resolved and is distinct from
/// `NonComposite`, which records that resolution ran and concluded no
/// composite engine applies. Only `Engine` values are ever adopted by
/// neighboring entities.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CompositeAttr {
    #[default]
    Unset,
    NonComposite,
    Engine(String),
}

impl CompositeAttr {
    pub fn is_unset(&self) -> bool {
        matches!(self, CompositeAttr::Unset)
    }

    /// Returns the composite engine name, if one was assigned.
    pub fn engine(&self) -> Option<&str> {
        match self {
            CompositeAttr::Engine(name) => Some(name),
            _ => None,
        }
    }
}

/// Resolution results the dispatch core records on each node.
///
/// Written once per compilation, but upstream passes may clear and recompute
/// them when inputs change; every write is idempotent.
#[derive(Debug, Clone, Default)]
pub struct ResolutionState {
    pub engine: Option<String>,
    pub kernel_library: Option<String>,
    pub is_blocking: bool,
    pub composite: CompositeAttr,
    pub composite_kernel_library: Option<String>,
}

/// One operator instance in the dataflow graph.
#[derive(Debug, Clone)]
pub struct Node {
    name: String,
    op_type: String,
    inputs: SmallVec<[NodeId; 4]>,
    no_task: bool,
    recursive: bool,
    subgraphs: SmallVec<[SubgraphId; 2]>,
    requested_engine: Option<String>,
    requested_kernel_library: Option<String>,
    state: ResolutionState,
}

impl Node {
    pub fn new(name: impl Into<String>, op_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op_type: op_type.into(),
            inputs: SmallVec::new(),
            no_task: false,
            recursive: false,
            subgraphs: SmallVec::new(),
            requested_engine: None,
            requested_kernel_library: None,
            state: ResolutionState::default(),
        }
    }

    /// Appends data-input producer edges.
    pub fn with_inputs(mut self, inputs: impl IntoIterator<Item = NodeId>) -> Self {
        self.inputs.extend(inputs);
        self
    }

    /// Marks the node as contributing no physical instruction.
    pub fn no_task(mut self) -> Self {
        self.no_task = true;
        self
    }

    /// Marks the node as call-like even without attached sub-graph instances.
    pub fn recursive(mut self) -> Self {
        self.recursive = true;
        self
    }

    /// Attaches a nested sub-graph instance.
    pub fn with_subgraph(mut self, subgraph: SubgraphId) -> Self {
        self.subgraphs.push(subgraph);
        self
    }

    /// Pins the node to an explicit (engine, kernel library) pair.
    pub fn with_engine_override(
        mut self,
        engine: impl Into<String>,
        kernel_library: impl Into<String>,
    ) -> Self {
        self.requested_engine = Some(engine.into());
        self.requested_kernel_library = Some(kernel_library.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    pub fn data_inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    pub fn is_no_task(&self) -> bool {
        self.no_task
    }

    /// A node is call-like when flagged so or when it carries sub-graph
    /// instances.
    pub fn is_recursive(&self) -> bool {
        self.recursive || !self.subgraphs.is_empty()
    }

    pub fn subgraph_instances(&self) -> &[SubgraphId] {
        &self.subgraphs
    }

    /// Returns the explicit (engine, kernel library) pair when both halves
    /// are present and non-empty.
    pub fn engine_override(&self) -> Option<(&str, &str)> {
        match (
            self.requested_engine.as_deref(),
            self.requested_kernel_library.as_deref(),
        ) {
            (Some(engine), Some(library)) if !engine.is_empty() && !library.is_empty() => {
                Some((engine, library))
            }
            _ => None,
        }
    }

    pub fn state(&self) -> &ResolutionState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ResolutionState {
        &mut self.state
    }
}

/// A nested sub-graph instance: a set of member nodes plus the designated
/// output node, which never contributes to composite agreement.
#[derive(Debug, Clone)]
pub struct Subgraph {
    name: String,
    nodes: SmallVec<[NodeId; 8]>,
    output: Option<NodeId>,
    pub(crate) composite: CompositeAttr,
}

impl Subgraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: SmallVec::new(),
            output: None,
            composite: CompositeAttr::Unset,
        }
    }

    pub fn with_nodes(mut self, nodes: impl IntoIterator<Item = NodeId>) -> Self {
        self.nodes.extend(nodes);
        self
    }

    pub fn with_output(mut self, output: NodeId) -> Self {
        self.output = Some(output);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn output(&self) -> Option<NodeId> {
        self.output
    }

    /// Cached composite attribute for the sub-graph.
    pub fn composite(&self) -> &CompositeAttr {
        &self.composite
    }
}

/// Arena owning the nodes and sub-graphs of one compilation unit.
///
/// Ids index directly into the arena; they are only minted by `add_node` /
/// `add_subgraph` on the same graph, so indexed access does not fail.
#[derive(Debug, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    subgraphs: Vec<Subgraph>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn add_subgraph(&mut self, subgraph: Subgraph) -> SubgraphId {
        let id = SubgraphId(self.subgraphs.len() as u32);
        self.subgraphs.push(subgraph);
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    pub fn subgraph(&self, id: SubgraphId) -> &Subgraph {
        &self.subgraphs[id.0 as usize]
    }

    pub fn subgraph_mut(&mut self, id: SubgraphId) -> &mut Subgraph {
        &mut self.subgraphs[id.0 as usize]
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Clears every cached composite attribute, node and sub-graph alike.
    ///
    /// Upstream passes call this when atomic assignments change, so the next
    /// composite walk recomputes from current state instead of reading stale
    /// caches.
    pub fn clear_composite_state(&mut self) {
        for node in &mut self.nodes {
            node.state.composite = CompositeAttr::Unset;
            node.state.composite_kernel_library = None;
        }
        for subgraph in &mut self.subgraphs {
            subgraph.composite = CompositeAttr::Unset;
        }
    }
}
