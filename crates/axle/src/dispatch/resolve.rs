//! Per-node engine/kernel resolution.

use std::time::Instant;

use smallvec::SmallVec;
use thiserror::Error;
use tracing::debug;

use crate::graph::{Graph, NodeId};

use super::diag::{Diagnostic, DiagnosticSink, KernelRejection, ResolutionDiagnostic};
use super::engine::{EngineRegistry, AI_CORE_ENGINE, HOST_CPU_ENGINE, VECTOR_CORE_ENGINE};
use super::kernel::{KernelCatalog, OpDescriptor, OpInfo, SupportVerdict};
use super::ledger::ProbeCostLedger;

/// Operator types exempt from host-exec redirection: pure graph plumbing
/// with no compute kernel of its own.
pub const HOST_EXEC_EXEMPT_OPS: &[&str] = &["Const", "Constant", "Data", "Variable", "NetOutput"];

/// Which device core family the compilation targets. When set, candidates
/// bound to the other family are filtered out during resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreType {
    AiCore,
    VectorCore,
}

impl CoreType {
    /// The engine excluded by this core type.
    pub fn excluded_engine(self) -> &'static str {
        match self {
            CoreType::AiCore => VECTOR_CORE_ENGINE,
            CoreType::VectorCore => AI_CORE_ENGINE,
        }
    }
}

/// Knobs for one resolution run.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Route every non-exempt operator to the host-CPU engine.
    pub host_exec: bool,
    pub core_type: Option<CoreType>,
    /// Also require the accuracy predicate to pass after a support success.
    pub check_accuracy: bool,
}

impl ResolveOptions {
    /// Defaults with the host-exec flag seeded from `AXLE_HOST_EXEC`.
    pub fn from_env() -> Self {
        Self {
            host_exec: crate::env::host_exec_enabled(),
            ..Self::default()
        }
    }
}

/// Per-node resolution failures. All recoverable: the node is left without
/// an assignment and the caller decides whether the compilation aborts.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no kernel information is registered for op type '{op_type}'")]
    NoKernelInfo { op_type: String },
    #[error("op '{op_name}' (type {op_type}) has no host-CPU kernel in host-exec mode")]
    HostCpuUnsupported { op_type: String, op_name: String },
    #[error("{0}")]
    NoSupportedKernel(ResolutionDiagnostic),
}

/// Outcome of a whole-graph resolution walk.
#[derive(Debug, Default)]
pub struct GraphResolveStats {
    pub resolved: usize,
    pub failures: Vec<(NodeId, ResolveError)>,
}

impl GraphResolveStats {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Chooses the single best (engine, kernel library) pair for each node.
///
/// Borrows the registries read-only; the only state it mutates is the node
/// attributes it is asked to resolve and the probe cost ledger.
pub struct EngineResolver<'a> {
    registry: &'a EngineRegistry,
    catalog: &'a KernelCatalog,
    ledger: &'a ProbeCostLedger,
    options: ResolveOptions,
    sink: &'a dyn DiagnosticSink,
}

impl<'a> EngineResolver<'a> {
    pub fn new(
        registry: &'a EngineRegistry,
        catalog: &'a KernelCatalog,
        ledger: &'a ProbeCostLedger,
        options: ResolveOptions,
        sink: &'a dyn DiagnosticSink,
    ) -> Self {
        Self {
            registry,
            catalog,
            ledger,
            options,
            sink,
        }
    }

    pub fn options(&self) -> &ResolveOptions {
        &self.options
    }

    /// Resolves one node, writing engine name, kernel-library name, and the
    /// blocking flag onto it on success.
    pub fn resolve(&self, graph: &mut Graph, node_id: NodeId) -> Result<(), ResolveError> {
        let node = graph.node(node_id);
        let op_type = node.op_type().to_string();
        let op_name = node.name().to_string();
        let override_pair = node
            .engine_override()
            .map(|(engine, library)| (engine.to_string(), library.to_string()));

        let candidates: Vec<OpInfo> = if let Some((engine, library)) = override_pair {
            // An explicit pair is the only candidate; no ranking, no
            // exclusion filter. The declared async flag still applies.
            let declared = self.catalog.candidates(&op_type, self.registry);
            let is_async = declared
                .iter()
                .find(|row| row.engine == engine && row.kernel_library == library)
                .is_some_and(|row| row.is_async);
            let mut row = OpInfo::new(op_type.clone(), engine, library);
            row.is_async = is_async;
            vec![row]
        } else {
            let ranked = self.catalog.candidates(&op_type, self.registry);
            if ranked.is_empty() {
                return Err(ResolveError::NoKernelInfo { op_type });
            }

            if self.options.host_exec && !HOST_EXEC_EXEMPT_OPS.contains(&op_type.as_str()) {
                return match ranked.iter().find(|row| row.engine == HOST_CPU_ENGINE) {
                    Some(row) => {
                        self.assign(graph, node_id, row);
                        debug!(op = %op_name, engine = HOST_CPU_ENGINE, "host-exec resolution");
                        Ok(())
                    }
                    None => Err(ResolveError::HostCpuUnsupported { op_type, op_name }),
                };
            }

            let excluded = self.options.core_type.map(CoreType::excluded_engine);
            ranked
                .iter()
                .filter(|row| Some(row.engine.as_str()) != excluded)
                .cloned()
                .collect()
        };

        let mut rejections: SmallVec<[KernelRejection; 4]> = SmallVec::new();
        for row in &candidates {
            let Some(library) = self.catalog.library(&row.kernel_library) else {
                rejections.push(KernelRejection {
                    kernel_library: row.kernel_library.clone(),
                    reason: "kernel library is not registered".to_string(),
                });
                continue;
            };

            let started = Instant::now();
            let verdict = library.supports(graph.node(node_id));
            self.ledger.record(&row.kernel_library, started.elapsed());

            match verdict {
                SupportVerdict::Supported => {
                    if self.options.check_accuracy {
                        let descriptor = OpDescriptor {
                            op_type: op_type.clone(),
                            name: op_name.clone(),
                        };
                        if let SupportVerdict::Rejected { reason } =
                            library.accuracy_supported(&descriptor)
                        {
                            rejections.push(KernelRejection {
                                kernel_library: row.kernel_library.clone(),
                                reason: format!("accuracy: {reason}"),
                            });
                            continue;
                        }
                    }
                    self.assign(graph, node_id, row);
                    debug!(
                        op = %op_name,
                        engine = %row.engine,
                        kernel_library = %row.kernel_library,
                        "resolved"
                    );
                    return Ok(());
                }
                SupportVerdict::Rejected { reason } => {
                    rejections.push(KernelRejection {
                        kernel_library: row.kernel_library.clone(),
                        reason,
                    });
                }
            }
        }

        let diagnostic = ResolutionDiagnostic {
            op_type,
            op_name,
            rejections: rejections.into_vec(),
        };
        self.sink.report(Diagnostic::Resolution(diagnostic.clone()));
        Err(ResolveError::NoSupportedKernel(diagnostic))
    }

    /// Resolves every node in id order, collecting failures instead of
    /// aborting the walk. Resets the probe cost ledger first.
    pub fn resolve_graph(&self, graph: &mut Graph) -> GraphResolveStats {
        self.ledger.reset();
        let mut stats = GraphResolveStats::default();
        let node_ids: Vec<NodeId> = graph.node_ids().collect();
        for node_id in node_ids {
            match self.resolve(graph, node_id) {
                Ok(()) => stats.resolved += 1,
                Err(err) => stats.failures.push((node_id, err)),
            }
        }
        stats
    }

    fn assign(&self, graph: &mut Graph, node_id: NodeId, row: &OpInfo) {
        let state = graph.node_mut(node_id).state_mut();
        state.engine = Some(row.engine.clone());
        state.kernel_library = Some(row.kernel_library.clone());
        if row.is_async {
            state.is_blocking = true;
        }
    }
}

/// Resolved engine name for a node, the query downstream passes consume.
pub fn engine_name(graph: &Graph, node_id: NodeId) -> Option<&str> {
    graph.node(node_id).state().engine.as_deref()
}
