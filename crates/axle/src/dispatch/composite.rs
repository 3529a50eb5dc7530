//! Composite-engine resolution: deciding when adjacent atomic-engine
//! regions coalesce into one fused execution region.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::{debug, warn};

use crate::graph::{CompositeAttr, Graph, NodeId, SubgraphId};

use super::diag::{Diagnostic, DiagnosticSink};
use super::resolve::EngineResolver;

/// Nesting bound for composite resolution across call-like nodes. Guards
/// against malformed or cyclic sub-graph nesting.
pub const MAX_COMPOSITE_DEPTH: usize = 10;

/// Plugin-declared composite engines: which atomic engines each one fuses
/// and which kernel library executes the fused region.
///
/// The atomic-to-composite direction is derived lazily on first use and
/// dropped whenever the membership mutates.
#[derive(Debug, Default)]
pub struct CompositeMembership {
    members: BTreeMap<String, BTreeSet<String>>,
    libraries: BTreeMap<String, String>,
    derived: OnceCell<HashMap<String, String>>,
}

impl CompositeMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a composite engine. A missing kernel library is accepted
    /// here; such a composite never survives re-validation at assignment
    /// time.
    pub fn insert(
        &mut self,
        composite: impl Into<String>,
        members: impl IntoIterator<Item = impl Into<String>>,
        library: Option<String>,
    ) {
        let composite = composite.into();
        self.members.insert(
            composite.clone(),
            members.into_iter().map(Into::into).collect(),
        );
        if let Some(library) = library {
            self.libraries.insert(composite, library);
        }
        self.derived = OnceCell::new();
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members_of(&self, composite: &str) -> Option<&BTreeSet<String>> {
        self.members.get(composite)
    }

    pub fn kernel_library(&self, composite: &str) -> Option<&str> {
        self.libraries.get(composite).map(String::as_str)
    }

    /// Maps an atomic engine to the composite engine that fuses it.
    pub fn composite_of(&self, atomic: &str) -> Option<&str> {
        let derived = self.derived.get_or_init(|| {
            let mut map = HashMap::new();
            for (composite, members) in &self.members {
                for member in members {
                    map.insert(member.clone(), composite.clone());
                }
            }
            map
        });
        derived.get(atomic).map(String::as_str)
    }
}

#[derive(Debug, Error)]
pub enum CompositeError {
    #[error("composite resolution exceeded the nesting depth limit ({limit}) at node '{node}'")]
    RecursionLimitExceeded { node: String, limit: usize },
}

/// Resolves composite-engine labels over nodes, call-like nodes, and
/// sub-graphs.
///
/// The three rules recurse into each other with an explicit depth; the
/// graph's attribute storage is the memoization handle. Aborting one
/// sub-resolution on the depth bound leaves sibling caches intact.
pub struct CompositeResolver<'a> {
    resolver: &'a EngineResolver<'a>,
    membership: &'a CompositeMembership,
    sink: &'a dyn DiagnosticSink,
}

impl<'a> CompositeResolver<'a> {
    pub fn new(
        resolver: &'a EngineResolver<'a>,
        membership: &'a CompositeMembership,
        sink: &'a dyn DiagnosticSink,
    ) -> Self {
        Self {
            resolver,
            membership,
            sink,
        }
    }

    /// Top-level entry: the composite attribute for one node.
    pub fn resolve(
        &self,
        graph: &mut Graph,
        node_id: NodeId,
    ) -> Result<CompositeAttr, CompositeError> {
        if self.membership.is_empty() {
            return Ok(CompositeAttr::NonComposite);
        }
        self.resolve_entity(graph, node_id, 1)
    }

    fn resolve_entity(
        &self,
        graph: &mut Graph,
        node_id: NodeId,
        depth: usize,
    ) -> Result<CompositeAttr, CompositeError> {
        if graph.node(node_id).is_recursive() {
            self.resolve_function_node(graph, node_id, depth)
        } else {
            self.resolve_node(graph, node_id)
        }
    }

    /// Call-like nodes take the unanimous value of their nested sub-graph
    /// instances.
    fn resolve_function_node(
        &self,
        graph: &mut Graph,
        node_id: NodeId,
        depth: usize,
    ) -> Result<CompositeAttr, CompositeError> {
        if depth > MAX_COMPOSITE_DEPTH {
            let node = graph.node(node_id).name().to_string();
            self.sink.report(Diagnostic::CompositeDepth {
                node: node.clone(),
                depth,
            });
            return Err(CompositeError::RecursionLimitExceeded {
                node,
                limit: MAX_COMPOSITE_DEPTH,
            });
        }

        let instances: Vec<SubgraphId> = graph.node(node_id).subgraph_instances().to_vec();
        match self.fold_agreement(graph, instances, depth, Self::resolve_subgraph)? {
            Some(engine) => Ok(self.apply(graph, node_id, engine)),
            None => {
                self.clear(graph, node_id);
                Ok(CompositeAttr::NonComposite)
            }
        }
    }

    /// Sub-graphs take the unanimous value of their member nodes, skipping
    /// no-task nodes and the designated output node. Memoized on the
    /// sub-graph attribute.
    fn resolve_subgraph(
        &self,
        graph: &mut Graph,
        subgraph_id: SubgraphId,
        depth: usize,
    ) -> Result<CompositeAttr, CompositeError> {
        let cached = graph.subgraph(subgraph_id).composite.clone();
        if !cached.is_unset() {
            return Ok(cached);
        }

        let output = graph.subgraph(subgraph_id).output();
        let members: Vec<NodeId> = graph
            .subgraph(subgraph_id)
            .nodes()
            .iter()
            .copied()
            .filter(|id| Some(*id) != output)
            .filter(|id| !graph.node(*id).is_no_task())
            .collect();
        if members.is_empty() {
            // Trivially empty regions belong to the default engine; the
            // verdict is not worth caching.
            return Ok(CompositeAttr::NonComposite);
        }

        match self.fold_agreement(graph, members, depth, |this, graph, id, depth| {
            this.resolve_entity(graph, id, depth + 1)
        })? {
            Some(engine) => {
                graph.subgraph_mut(subgraph_id).composite = CompositeAttr::Engine(engine.clone());
                debug!(subgraph = %graph.subgraph(subgraph_id).name(), engine = %engine, "composite region");
                Ok(CompositeAttr::Engine(engine))
            }
            None => {
                graph.subgraph_mut(subgraph_id).composite = CompositeAttr::Unset;
                Ok(CompositeAttr::NonComposite)
            }
        }
    }

    /// Plain nodes: no-task nodes adopt the unanimous attribute of their
    /// data-input producers; everything else maps its own atomic engine
    /// through the membership.
    fn resolve_node(
        &self,
        graph: &mut Graph,
        node_id: NodeId,
    ) -> Result<CompositeAttr, CompositeError> {
        let mut chosen: Option<String> = None;

        if graph.node(node_id).is_no_task() {
            let inputs = graph.node(node_id).data_inputs().to_vec();
            let mut values = inputs
                .iter()
                .map(|id| graph.node(*id).state().composite.clone());
            if let Some(first) = values.next() {
                if let CompositeAttr::Engine(engine) = &first {
                    if values.all(|value| value == first) {
                        chosen = Some(engine.clone());
                    }
                }
            }
        }

        if chosen.is_none() {
            if graph.node(node_id).state().engine.is_none()
                && self.resolver.resolve(graph, node_id).is_err()
            {
                // The node stays unresolved; the failure was already
                // reported through the resolver's sink.
                self.clear(graph, node_id);
                return Ok(CompositeAttr::NonComposite);
            }
            chosen = graph
                .node(node_id)
                .state()
                .engine
                .as_deref()
                .and_then(|engine| self.membership.composite_of(engine))
                .map(str::to_string);
        }

        match chosen {
            Some(engine) => Ok(self.apply(graph, node_id, engine)),
            None => {
                self.clear(graph, node_id);
                Ok(CompositeAttr::NonComposite)
            }
        }
    }

    /// Folds per-item results into a unanimous `Engine` value, or `None` on
    /// disagreement, emptiness, or any non-engine verdict.
    fn fold_agreement<T: Copy>(
        &self,
        graph: &mut Graph,
        items: Vec<T>,
        depth: usize,
        resolve: impl Fn(&Self, &mut Graph, T, usize) -> Result<CompositeAttr, CompositeError>,
    ) -> Result<Option<String>, CompositeError> {
        let mut agreed: Option<CompositeAttr> = None;
        for item in items {
            let value = resolve(self, graph, item, depth)?;
            match &agreed {
                None => agreed = Some(value),
                Some(previous) if *previous == value => {}
                Some(_) => return Ok(None),
            }
        }
        match agreed {
            Some(CompositeAttr::Engine(engine)) => Ok(Some(engine)),
            _ => Ok(None),
        }
    }

    /// Writes the composite pair onto the node, re-validating that the
    /// composite engine has a registered kernel library. The two attributes
    /// are always set or cleared together.
    fn apply(&self, graph: &mut Graph, node_id: NodeId, engine: String) -> CompositeAttr {
        match self.membership.kernel_library(&engine) {
            Some(library) => {
                let library = library.to_string();
                let state = graph.node_mut(node_id).state_mut();
                state.composite = CompositeAttr::Engine(engine.clone());
                state.composite_kernel_library = Some(library);
                CompositeAttr::Engine(engine)
            }
            None => {
                warn!(engine = %engine, "composite engine has no kernel library; clearing assignment");
                self.clear(graph, node_id);
                CompositeAttr::NonComposite
            }
        }
    }

    fn clear(&self, graph: &mut Graph, node_id: NodeId) {
        let state = graph.node_mut(node_id).state_mut();
        state.composite = CompositeAttr::Unset;
        state.composite_kernel_library = None;
    }
}
