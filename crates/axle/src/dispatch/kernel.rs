//! Kernel libraries and the per-operator-type candidate catalog.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use crate::graph::Node;

use super::engine::EngineRegistry;

/// Outcome of a capability probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupportVerdict {
    Supported,
    Rejected { reason: String },
}

impl SupportVerdict {
    pub fn rejected(reason: impl Into<String>) -> Self {
        SupportVerdict::Rejected {
            reason: reason.into(),
        }
    }

    pub fn is_supported(&self) -> bool {
        matches!(self, SupportVerdict::Supported)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            SupportVerdict::Rejected { reason } => Some(reason),
            SupportVerdict::Supported => None,
        }
    }
}

/// Lightweight operator identity handed to accuracy probes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpDescriptor {
    pub op_type: String,
    pub name: String,
}

/// A plugin-supplied capability provider bound to one engine.
///
/// The support probe may be expensive; callers time every invocation into
/// the probe cost ledger. Implementations must not assume they are probed at
/// most once per node.
pub trait KernelLibrary: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this library can execute the given operator instance.
    fn supports(&self, node: &Node) -> SupportVerdict;

    /// Whether this library meets accuracy requirements for the operator.
    fn accuracy_supported(&self, _op: &OpDescriptor) -> SupportVerdict {
        SupportVerdict::Supported
    }
}

/// One candidate row: a kernel library claiming an operator type on behalf
/// of its engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpInfo {
    pub op_type: String,
    pub engine: String,
    pub kernel_library: String,
    pub is_async: bool,
}

impl OpInfo {
    pub fn new(
        op_type: impl Into<String>,
        engine: impl Into<String>,
        kernel_library: impl Into<String>,
    ) -> Self {
        Self {
            op_type: op_type.into(),
            engine: engine.into(),
            kernel_library: kernel_library.into(),
            is_async: false,
        }
    }

    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }
}

/// Holds, per operator type, the ordered candidate list contributed by all
/// registered kernel libraries.
///
/// Candidate lists are built lazily per operator type: a stable sort on the
/// ascending compute cost of each row's engine, unregistered engines last,
/// ties keeping declaration order. Registration drops the cached lists so
/// they are rebuilt against the updated declarations.
pub struct KernelCatalog {
    libraries: HashMap<String, Arc<dyn KernelLibrary>>,
    declarations: Vec<OpInfo>,
    ranked: RwLock<HashMap<String, Arc<[OpInfo]>>>,
}

impl Default for KernelCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelCatalog {
    pub fn new() -> Self {
        Self {
            libraries: HashMap::new(),
            declarations: Vec::new(),
            ranked: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a kernel library together with the operator types it
    /// declares supported.
    pub fn register_library(
        &mut self,
        library: Arc<dyn KernelLibrary>,
        declarations: impl IntoIterator<Item = OpInfo>,
    ) {
        self.libraries.insert(library.name().to_string(), library);
        self.declarations.extend(declarations);
        self.ranked.write().expect("kernel catalog poisoned").clear();
    }

    pub fn library(&self, name: &str) -> Option<&Arc<dyn KernelLibrary>> {
        self.libraries.get(name)
    }

    pub fn library_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.libraries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn op_types(&self) -> BTreeSet<String> {
        self.declarations
            .iter()
            .map(|row| row.op_type.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    /// The ranked candidate list for an operator type. Empty when no library
    /// declared the type.
    pub fn candidates(&self, op_type: &str, registry: &EngineRegistry) -> Arc<[OpInfo]> {
        if let Some(rows) = self
            .ranked
            .read()
            .expect("kernel catalog poisoned")
            .get(op_type)
        {
            return Arc::clone(rows);
        }

        let mut rows: Vec<OpInfo> = self
            .declarations
            .iter()
            .filter(|row| row.op_type == op_type)
            .cloned()
            .collect();
        // Stable sort: declaration order breaks cost ties.
        rows.sort_by_key(|row| match registry.compute_cost(&row.engine) {
            Some(cost) => (0u8, cost),
            None => (1u8, 0),
        });

        let rows: Arc<[OpInfo]> = rows.into();
        self.ranked
            .write()
            .expect("kernel catalog poisoned")
            .insert(op_type.to_string(), Arc::clone(&rows));
        rows
    }

    /// Drops all libraries and declarations.
    pub fn finalize(&mut self) {
        self.libraries.clear();
        self.declarations.clear();
        self.ranked.write().expect("kernel catalog poisoned").clear();
    }
}
