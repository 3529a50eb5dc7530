//! Execution engines and the registry that owns them.

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;

use super::sched::SchedulerTable;

/// Engine name of the host-CPU fallback backend.
pub const HOST_CPU_ENGINE: &str = "HostCpu";
/// Engine name of the AI-core backend.
pub const AI_CORE_ENGINE: &str = "AiCore";
/// Engine name of the vector-core backend.
pub const VECTOR_CORE_ENGINE: &str = "VectorCore";

/// The distinguished device-resident memory kind. Device-locality engines
/// must declare exactly this kind and nothing else.
pub const DEVICE_RESIDENT_MEMORY: &str = "DeviceHbm";
/// Default memory kind declared by host-locality engines.
pub const HOST_MEMORY: &str = "HostDdr";

/// Where an engine's kernels execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeLocality {
    Host,
    Device,
}

/// A named execution backend able to run certain operator types.
///
/// Created once at registration and immutable afterward.
#[derive(Debug, Clone)]
pub struct Engine {
    name: String,
    locality: RuntimeLocality,
    memory_kinds: BTreeSet<String>,
    compute_cost: u32,
    atomic: bool,
}

impl Engine {
    /// A host-locality engine declaring the default host memory kind.
    pub fn host(name: impl Into<String>, compute_cost: u32) -> Self {
        Self {
            name: name.into(),
            locality: RuntimeLocality::Host,
            memory_kinds: BTreeSet::from([HOST_MEMORY.to_string()]),
            compute_cost,
            atomic: true,
        }
    }

    /// A device-locality engine declaring the device-resident memory kind.
    pub fn device(name: impl Into<String>, compute_cost: u32) -> Self {
        Self {
            name: name.into(),
            locality: RuntimeLocality::Device,
            memory_kinds: BTreeSet::from([DEVICE_RESIDENT_MEMORY.to_string()]),
            compute_cost,
            atomic: true,
        }
    }

    /// Replaces the declared memory kinds.
    pub fn with_memory_kinds(
        mut self,
        kinds: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.memory_kinds = kinds.into_iter().map(Into::into).collect();
        self
    }

    /// Marks the engine as a declared fusion of other engines.
    pub fn composite(mut self) -> Self {
        self.atomic = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn locality(&self) -> RuntimeLocality {
        self.locality
    }

    pub fn memory_kinds(&self) -> &BTreeSet<String> {
        &self.memory_kinds
    }

    pub fn compute_cost(&self) -> u32 {
        self.compute_cost
    }

    pub fn is_atomic(&self) -> bool {
        self.atomic
    }
}

/// Errors surfaced while populating or validating the engine registry. All
/// of these abort initialization.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(
        "device engine '{engine}' must declare exactly the device-resident \
         memory kind '{DEVICE_RESIDENT_MEMORY}', got {kinds:?}"
    )]
    MemoryKind { engine: String, kinds: Vec<String> },
    #[error("engine '{engine}' appears in {count} scheduler configs, expected exactly one")]
    ConfigInconsistency { engine: String, count: usize },
    #[error("engine registry is already initialized")]
    AlreadyInitialized,
}

/// Owns all registered engines by name.
///
/// Populated once from plugin-provided data and read-mostly afterward;
/// lookups never fail, they return an empty result on a miss.
#[derive(Debug, Default)]
pub struct EngineRegistry {
    engines: HashMap<String, Engine>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the full engine set in one batch.
    ///
    /// Device-locality engines must declare exactly the device-resident
    /// memory kind; a second batch on a populated registry is rejected.
    pub fn register_engines(
        &mut self,
        engines: impl IntoIterator<Item = Engine>,
    ) -> Result<(), RegistryError> {
        if !self.engines.is_empty() {
            return Err(RegistryError::AlreadyInitialized);
        }
        for engine in engines {
            if engine.locality == RuntimeLocality::Device {
                let kinds = &engine.memory_kinds;
                if kinds.len() != 1 || !kinds.contains(DEVICE_RESIDENT_MEMORY) {
                    return Err(RegistryError::MemoryKind {
                        engine: engine.name.clone(),
                        kinds: kinds.iter().cloned().collect(),
                    });
                }
            }
            self.engines.insert(engine.name.clone(), engine);
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Engine> {
        self.engines.get(name)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.engines.contains_key(name)
    }

    pub fn compute_cost(&self, name: &str) -> Option<u32> {
        self.engines.get(name).map(Engine::compute_cost)
    }

    pub fn engine_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.engines.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Checks the 1:1 engine/scheduler mapping: every registered engine must
    /// appear in the policy map of exactly one scheduler.
    pub fn validate(&self, schedulers: &SchedulerTable) -> Result<(), RegistryError> {
        for name in self.engine_names() {
            let count = schedulers.occurrences(&name);
            if count != 1 {
                return Err(RegistryError::ConfigInconsistency {
                    engine: name,
                    count,
                });
            }
        }
        Ok(())
    }

    /// Drops all registered engines; the registry may be populated again.
    pub fn finalize(&mut self) {
        self.engines.clear();
    }
}
