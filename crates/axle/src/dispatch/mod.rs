//! Engine/kernel dispatch core.
//!
//! Owns the engine registry, the kernel catalog, scheduler stream policy,
//! composite-engine membership, and the probe cost ledger, and assigns each
//! graph node the (engine, kernel library) pair it will execute on plus an
//! optional composite-region label. Downstream passes consume only names;
//! task generation and stream assignment happen elsewhere.

mod composite;
mod diag;
mod engine;
mod kernel;
mod ledger;
mod plugin;
mod resolve;
mod sched;

use thiserror::Error;
use tracing::warn;

use crate::graph::{CompositeAttr, Graph, NodeId};

pub use composite::{
    CompositeError, CompositeMembership, CompositeResolver, MAX_COMPOSITE_DEPTH,
};
pub use diag::{
    Diagnostic, DiagnosticSink, KernelRejection, NullSink, RecordingSink, ResolutionDiagnostic,
};
pub use engine::{
    Engine, EngineRegistry, RegistryError, RuntimeLocality, AI_CORE_ENGINE,
    DEVICE_RESIDENT_MEMORY, HOST_CPU_ENGINE, HOST_MEMORY, VECTOR_CORE_ENGINE,
};
pub use kernel::{KernelCatalog, KernelLibrary, OpDescriptor, OpInfo, SupportVerdict};
pub use ledger::ProbeCostLedger;
pub use plugin::{KernelLibraryRegistration, PluginManifest};
pub use resolve::{
    engine_name, CoreType, EngineResolver, GraphResolveStats, ResolveError, ResolveOptions,
    HOST_EXEC_EXEMPT_OPS,
};
pub use sched::{EngineStreamPolicy, SchedulerConfig, SchedulerConfigError, SchedulerTable};

/// Initialization failures. All fatal: the dispatcher is not constructed.
#[derive(Debug, Error)]
pub enum InitError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    SchedulerConfig(#[from] SchedulerConfigError),
}

/// The dispatch service for one compilation context.
///
/// Bundles the registries populated from plugin manifests and scheduler
/// configs into one explicitly constructed object; independent compilations
/// construct independent dispatchers instead of sharing process-wide state.
pub struct Dispatcher {
    registry: EngineRegistry,
    catalog: KernelCatalog,
    schedulers: SchedulerTable,
    membership: CompositeMembership,
    ledger: ProbeCostLedger,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Builds and validates the dispatcher from plugin-provided data and
    /// reader-supplied scheduler configs.
    ///
    /// An empty scheduler config set is tolerated only while the kernel
    /// catalog is also empty; otherwise every registered engine must appear
    /// in exactly one scheduler.
    pub fn initialize(
        manifest: PluginManifest,
        configs: impl IntoIterator<Item = SchedulerConfig>,
    ) -> Result<Self, InitError> {
        let mut registry = EngineRegistry::new();
        registry.register_engines(manifest.engines)?;

        let mut catalog = KernelCatalog::new();
        for registration in manifest.libraries {
            catalog.register_library(registration.library, registration.declarations);
        }

        let schedulers = SchedulerTable::from_configs(configs)?;
        if !(schedulers.is_empty() && catalog.is_empty()) {
            registry.validate(&schedulers)?;
        }

        let mut membership = CompositeMembership::new();
        for (name, members) in manifest.composite_members {
            let library = manifest.composite_libraries.get(&name).cloned();
            membership.insert(name, members, library);
        }

        Ok(Self {
            registry,
            catalog,
            schedulers,
            membership,
            ledger: ProbeCostLedger::new(),
        })
    }

    pub fn registry(&self) -> &EngineRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &KernelCatalog {
        &self.catalog
    }

    pub fn schedulers(&self) -> &SchedulerTable {
        &self.schedulers
    }

    pub fn membership(&self) -> &CompositeMembership {
        &self.membership
    }

    pub fn ledger(&self) -> &ProbeCostLedger {
        &self.ledger
    }

    /// Re-checks the 1:1 engine/scheduler invariant.
    pub fn validate(&self) -> Result<(), RegistryError> {
        self.registry.validate(&self.schedulers)
    }

    /// Stream-policy query by engine name (lenient, see
    /// [`SchedulerTable::is_stream_assign_skip`]).
    pub fn is_stream_assign_skip(&self, engine: &str) -> bool {
        self.schedulers.is_stream_assign_skip(engine)
    }

    /// Stream-policy query by node. Unresolved nodes never skip.
    pub fn is_stream_assign_skip_node(&self, graph: &Graph, node_id: NodeId) -> bool {
        match engine_name(graph, node_id) {
            Some(engine) => self.is_stream_assign_skip(engine),
            None => {
                warn!(
                    node = %graph.node(node_id).name(),
                    "stream-policy query on an unresolved node"
                );
                false
            }
        }
    }

    /// Resolved engine name for a node.
    pub fn engine_name<'g>(&self, graph: &'g Graph, node_id: NodeId) -> Option<&'g str> {
        engine_name(graph, node_id)
    }

    /// A resolver borrowing this dispatcher's registries.
    pub fn resolver<'a>(
        &'a self,
        options: ResolveOptions,
        sink: &'a dyn DiagnosticSink,
    ) -> EngineResolver<'a> {
        EngineResolver::new(&self.registry, &self.catalog, &self.ledger, options, sink)
    }

    /// Resolves one node.
    pub fn resolve_node(
        &self,
        graph: &mut Graph,
        node_id: NodeId,
        options: ResolveOptions,
        sink: &dyn DiagnosticSink,
    ) -> Result<(), ResolveError> {
        self.resolver(options, sink).resolve(graph, node_id)
    }

    /// Resolves every node of a graph, resetting the ledger first.
    pub fn resolve_graph(
        &self,
        graph: &mut Graph,
        options: ResolveOptions,
        sink: &dyn DiagnosticSink,
    ) -> GraphResolveStats {
        self.resolver(options, sink).resolve_graph(graph)
    }

    /// Composite label for one node; `NonComposite` when no composite
    /// engines are registered or no agreement is reached.
    pub fn composite_engine_name(
        &self,
        graph: &mut Graph,
        node_id: NodeId,
        options: ResolveOptions,
        sink: &dyn DiagnosticSink,
    ) -> Result<CompositeAttr, CompositeError> {
        let resolver = self.resolver(options, sink);
        CompositeResolver::new(&resolver, &self.membership, sink).resolve(graph, node_id)
    }

    /// Tears down the registries. A finalized dispatcher resolves nothing.
    pub fn finalize(&mut self) {
        self.registry.finalize();
        self.catalog.finalize();
        self.ledger.reset();
    }
}
