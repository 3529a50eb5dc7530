//! Reference host-CPU engine plugin.
//!
//! Contributes the host-CPU engine and its kernel library to an axle
//! dispatcher. Production deployments register richer device plugins next
//! to this one; host-CPU is the portable fallback that keeps every graph
//! compilable.

use std::sync::Arc;

use axle::dispatch::{
    Engine, KernelLibrary, OpInfo, PluginManifest, SupportVerdict, HOST_CPU_ENGINE,
};
use axle::graph::Node;

/// Name the host-CPU kernel library registers under.
pub const HOST_CPU_KERNEL_LIBRARY: &str = "HostCpuKernels";

/// Operator types with a host-CPU kernel.
pub const HOST_CPU_OPS: &[&str] = &[
    "Add", "Sub", "Mul", "Div", "MatMul", "Relu", "Sigmoid", "Softmax", "Reshape", "Transpose",
    "Cast", "Concat", "Slice", "Const", "Constant", "Data", "Variable", "NetOutput",
];

/// Capability provider for the host-CPU engine.
#[derive(Debug, Default)]
pub struct HostCpuKernelLibrary;

impl KernelLibrary for HostCpuKernelLibrary {
    fn name(&self) -> &str {
        HOST_CPU_KERNEL_LIBRARY
    }

    fn supports(&self, node: &Node) -> SupportVerdict {
        if HOST_CPU_OPS.contains(&node.op_type()) {
            SupportVerdict::Supported
        } else {
            SupportVerdict::rejected(format!(
                "op type {} has no host-CPU kernel",
                node.op_type()
            ))
        }
    }
}

/// The manifest handed to [`axle::Dispatcher::initialize`].
pub fn host_cpu_manifest() -> PluginManifest {
    let declarations = HOST_CPU_OPS.iter().map(|op_type| {
        OpInfo::new(*op_type, HOST_CPU_ENGINE, HOST_CPU_KERNEL_LIBRARY)
    });
    PluginManifest::new()
        .engine(Engine::host(HOST_CPU_ENGINE, 0))
        .library(Arc::new(HostCpuKernelLibrary), declarations)
}
