//! The capability interface through which an external loader hands plugin
//! data to the core. The core never loads dynamic libraries itself.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::engine::Engine;
use super::kernel::{KernelLibrary, OpInfo};

/// One kernel library plus the operator types it declares supported.
pub struct KernelLibraryRegistration {
    pub library: Arc<dyn KernelLibrary>,
    pub declarations: Vec<OpInfo>,
}

/// Everything a plugin contributes: engines, kernel libraries with their
/// declarations, and composite-engine membership.
#[derive(Default)]
pub struct PluginManifest {
    pub engines: Vec<Engine>,
    pub libraries: Vec<KernelLibraryRegistration>,
    pub composite_members: BTreeMap<String, BTreeSet<String>>,
    pub composite_libraries: BTreeMap<String, String>,
}

impl PluginManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn engine(mut self, engine: Engine) -> Self {
        self.engines.push(engine);
        self
    }

    pub fn library(
        mut self,
        library: Arc<dyn KernelLibrary>,
        declarations: impl IntoIterator<Item = OpInfo>,
    ) -> Self {
        self.libraries.push(KernelLibraryRegistration {
            library,
            declarations: declarations.into_iter().collect(),
        });
        self
    }

    /// Declares a composite engine fusing the given atomic engines, executed
    /// by the given kernel library.
    pub fn composite(
        mut self,
        name: impl Into<String>,
        members: impl IntoIterator<Item = impl Into<String>>,
        kernel_library: impl Into<String>,
    ) -> Self {
        let name = name.into();
        self.composite_members.insert(
            name.clone(),
            members.into_iter().map(Into::into).collect(),
        );
        self.composite_libraries.insert(name, kernel_library.into());
        self
    }

    /// Folds another plugin's contributions into this manifest.
    pub fn merge(mut self, other: PluginManifest) -> Self {
        self.engines.extend(other.engines);
        self.libraries.extend(other.libraries);
        self.composite_members.extend(other.composite_members);
        self.composite_libraries.extend(other.composite_libraries);
        self
    }
}
