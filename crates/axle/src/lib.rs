pub mod dispatch;
mod env;
pub mod graph;

pub use dispatch::{Dispatcher, PluginManifest};
pub use graph::{Graph, NodeId, SubgraphId};
