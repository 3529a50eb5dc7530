use std::collections::BTreeSet;
use std::sync::Arc;

use axle::dispatch::{
    CompositeError, Diagnostic, Dispatcher, Engine, EngineStreamPolicy, KernelLibrary, NullSink,
    OpInfo, PluginManifest, RecordingSink, ResolveOptions, SchedulerConfig, SupportVerdict,
    AI_CORE_ENGINE, HOST_CPU_ENGINE, VECTOR_CORE_ENGINE,
};
use axle::graph::{CompositeAttr, Graph, Node, NodeId, Subgraph};

/// Library accepting exactly one operator type.
struct SingleOpLibrary {
    name: String,
    op_type: String,
}

impl SingleOpLibrary {
    fn new(name: &str, op_type: &str) -> Arc<SingleOpLibrary> {
        Arc::new(SingleOpLibrary {
            name: name.to_string(),
            op_type: op_type.to_string(),
        })
    }
}

impl KernelLibrary for SingleOpLibrary {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, node: &Node) -> SupportVerdict {
        if node.op_type() == self.op_type {
            SupportVerdict::Supported
        } else {
            SupportVerdict::rejected(format!("{} only", self.op_type))
        }
    }
}

fn schedulers() -> Vec<SchedulerConfig> {
    vec![SchedulerConfig {
        scheduler_id: "default".to_string(),
        engine_policies: [HOST_CPU_ENGINE, AI_CORE_ENGINE, VECTOR_CORE_ENGINE]
            .iter()
            .map(|id| EngineStreamPolicy {
                id: id.to_string(),
                ..EngineStreamPolicy::default()
            })
            .collect(),
    }]
}

fn base_manifest() -> PluginManifest {
    // "Conv" lands on AiCore, "Mul" on VectorCore, "Print" on HostCpu.
    PluginManifest::new()
        .engine(Engine::host(HOST_CPU_ENGINE, 0))
        .engine(Engine::device(AI_CORE_ENGINE, 5))
        .engine(Engine::device(VECTOR_CORE_ENGINE, 10))
        .library(
            SingleOpLibrary::new("LibA", "Conv"),
            [OpInfo::new("Conv", AI_CORE_ENGINE, "LibA")],
        )
        .library(
            SingleOpLibrary::new("LibB", "Mul"),
            [OpInfo::new("Mul", VECTOR_CORE_ENGINE, "LibB")],
        )
        .library(
            SingleOpLibrary::new("HostLib", "Print"),
            [OpInfo::new("Print", HOST_CPU_ENGINE, "HostLib")],
        )
}

/// Fixture with the Fused composite over {AiCore, VectorCore}.
fn fused_dispatcher() -> Dispatcher {
    let manifest =
        base_manifest().composite("Fused", [AI_CORE_ENGINE, VECTOR_CORE_ENGINE], "FusedLib");
    Dispatcher::initialize(manifest, schedulers()).expect("fixture initializes")
}

/// A function node whose single sub-graph holds a Conv, a Mul, and the
/// designated output node.
fn call_over_conv_mul(graph: &mut Graph) -> (NodeId, NodeId, NodeId, axle::graph::SubgraphId) {
    let conv = graph.add_node(Node::new("conv1", "Conv"));
    let mul = graph.add_node(Node::new("mul1", "Mul"));
    let out = graph.add_node(Node::new("out1", "NetOutput"));
    let subgraph = graph.add_subgraph(
        Subgraph::new("body")
            .with_nodes([conv, mul, out])
            .with_output(out),
    );
    let call = graph.add_node(Node::new("call1", "Call").with_subgraph(subgraph));
    (call, conv, mul, subgraph)
}

#[test]
fn empty_membership_short_circuits() {
    let dispatcher = Dispatcher::initialize(base_manifest(), schedulers()).expect("initializes");
    let mut graph = Graph::new();
    // The op type does not even need kernel info; the fast path answers
    // before resolution is attempted.
    let node = graph.add_node(Node::new("odd1", "Atan2"));

    let attr = dispatcher
        .composite_engine_name(&mut graph, node, ResolveOptions::default(), &NullSink)
        .expect("fast path never fails");
    assert_eq!(attr, CompositeAttr::NonComposite);
    assert!(graph.node(node).state().engine.is_none());
}

#[test]
fn agreeing_region_coalesces_into_the_composite() {
    let dispatcher = fused_dispatcher();
    let mut graph = Graph::new();
    let (call, conv, mul, subgraph) = call_over_conv_mul(&mut graph);

    let attr = dispatcher
        .composite_engine_name(&mut graph, call, ResolveOptions::default(), &NullSink)
        .expect("resolution succeeds");
    assert_eq!(attr, CompositeAttr::Engine("Fused".to_string()));

    // Atomic assignments happened on demand.
    assert_eq!(graph.node(conv).state().engine.as_deref(), Some(AI_CORE_ENGINE));
    assert_eq!(graph.node(mul).state().engine.as_deref(), Some(VECTOR_CORE_ENGINE));

    // The verdict is cached on the sub-graph and mirrored on the call node
    // together with the composite kernel library.
    assert_eq!(
        *graph.subgraph(subgraph).composite(),
        CompositeAttr::Engine("Fused".to_string())
    );
    let call_state = graph.node(call).state();
    assert_eq!(call_state.composite, CompositeAttr::Engine("Fused".to_string()));
    assert_eq!(call_state.composite_kernel_library.as_deref(), Some("FusedLib"));
}

#[test]
fn resolution_is_idempotent() {
    let dispatcher = fused_dispatcher();
    let mut graph = Graph::new();
    let (call, _, _, subgraph) = call_over_conv_mul(&mut graph);

    let first = dispatcher
        .composite_engine_name(&mut graph, call, ResolveOptions::default(), &NullSink)
        .expect("first resolution succeeds");
    let cached = graph.subgraph(subgraph).composite().clone();
    let state = graph.node(call).state().clone();

    let second = dispatcher
        .composite_engine_name(&mut graph, call, ResolveOptions::default(), &NullSink)
        .expect("second resolution succeeds");

    assert_eq!(first, second);
    assert_eq!(*graph.subgraph(subgraph).composite(), cached);
    assert_eq!(graph.node(call).state().composite, state.composite);
    assert_eq!(
        graph.node(call).state().composite_kernel_library,
        state.composite_kernel_library
    );
}

#[test]
fn disagreeing_region_resolves_to_nothing_and_clears_the_cache() {
    let dispatcher = fused_dispatcher();
    let mut graph = Graph::new();
    let (call, _, mul, subgraph) = call_over_conv_mul(&mut graph);

    let attr = dispatcher
        .composite_engine_name(&mut graph, call, ResolveOptions::default(), &NullSink)
        .expect("initial resolution succeeds");
    assert_eq!(attr, CompositeAttr::Engine("Fused".to_string()));

    // Upstream re-places one node on HostCpu, which no composite fuses,
    // and invalidates the cached verdicts.
    {
        let state = graph.node_mut(mul).state_mut();
        state.engine = Some(HOST_CPU_ENGINE.to_string());
        state.kernel_library = Some("HostLib".to_string());
    }
    graph.clear_composite_state();

    let attr = dispatcher
        .composite_engine_name(&mut graph, call, ResolveOptions::default(), &NullSink)
        .expect("re-resolution succeeds");
    assert_eq!(attr, CompositeAttr::NonComposite);
    assert!(graph.subgraph(subgraph).composite().is_unset());
    let call_state = graph.node(call).state();
    assert!(call_state.composite.is_unset());
    assert!(call_state.composite_kernel_library.is_none());
}

#[test]
fn no_task_nodes_adopt_the_unanimous_producer_attribute() {
    let dispatcher = fused_dispatcher();
    let mut graph = Graph::new();
    let conv = graph.add_node(Node::new("conv1", "Conv"));
    let mul = graph.add_node(Node::new("mul1", "Mul"));
    let ident = graph.add_node(Node::new("ident1", "Identity").with_inputs([conv, mul]).no_task());

    for node in [conv, mul] {
        dispatcher
            .composite_engine_name(&mut graph, node, ResolveOptions::default(), &NullSink)
            .expect("producer resolves");
    }

    let attr = dispatcher
        .composite_engine_name(&mut graph, ident, ResolveOptions::default(), &NullSink)
        .expect("adoption succeeds");
    assert_eq!(attr, CompositeAttr::Engine("Fused".to_string()));
    let state = graph.node(ident).state();
    assert_eq!(state.composite_kernel_library.as_deref(), Some("FusedLib"));
    // Adoption never forced an atomic assignment on the no-task node.
    assert!(state.engine.is_none());
}

#[test]
fn no_task_nodes_without_agreement_fall_back_to_their_own_engine() {
    let dispatcher = fused_dispatcher();
    let mut graph = Graph::new();
    let conv = graph.add_node(Node::new("conv1", "Conv"));
    let print = graph.add_node(Node::new("print1", "Print"));
    let ident = graph.add_node(
        Node::new("ident1", "Identity")
            .with_inputs([conv, print])
            .no_task(),
    );

    for node in [conv, print] {
        dispatcher
            .composite_engine_name(&mut graph, node, ResolveOptions::default(), &NullSink)
            .expect("producer resolves");
    }

    // Producers disagree, and "Identity" has no kernel info of its own, so
    // nothing composite applies.
    let attr = dispatcher
        .composite_engine_name(&mut graph, ident, ResolveOptions::default(), &NullSink)
        .expect("fallback succeeds");
    assert_eq!(attr, CompositeAttr::NonComposite);
    assert!(graph.node(ident).state().composite.is_unset());
}

#[test]
fn composite_without_kernel_library_is_cleared() {
    let mut manifest = base_manifest();
    manifest.composite_members.insert(
        "Fused".to_string(),
        BTreeSet::from([AI_CORE_ENGINE.to_string(), VECTOR_CORE_ENGINE.to_string()]),
    );
    // Deliberately no composite_libraries entry for "Fused".
    let dispatcher = Dispatcher::initialize(manifest, schedulers()).expect("initializes");

    let mut graph = Graph::new();
    let conv = graph.add_node(Node::new("conv1", "Conv"));
    let attr = dispatcher
        .composite_engine_name(&mut graph, conv, ResolveOptions::default(), &NullSink)
        .expect("resolution succeeds");

    // The atomic engine maps to "Fused", but re-validation finds no kernel
    // library and clears the pair.
    assert_eq!(attr, CompositeAttr::NonComposite);
    let state = graph.node(conv).state();
    assert!(state.composite.is_unset());
    assert!(state.composite_kernel_library.is_none());
    assert_eq!(state.engine.as_deref(), Some(AI_CORE_ENGINE));
}

#[test]
fn trivially_empty_subgraphs_resolve_to_nothing_uncached() {
    let dispatcher = fused_dispatcher();
    let mut graph = Graph::new();
    let out = graph.add_node(Node::new("out1", "NetOutput"));
    let subgraph = graph.add_subgraph(Subgraph::new("body").with_nodes([out]).with_output(out));
    let call = graph.add_node(Node::new("call1", "Call").with_subgraph(subgraph));

    let attr = dispatcher
        .composite_engine_name(&mut graph, call, ResolveOptions::default(), &NullSink)
        .expect("resolution succeeds");
    assert_eq!(attr, CompositeAttr::NonComposite);
    assert!(graph.subgraph(subgraph).composite().is_unset());
}

/// Builds a chain of `levels` nested call nodes; the innermost sub-graph
/// holds a single Conv node. Returns the outermost call node.
fn nested_calls(graph: &mut Graph, levels: usize) -> NodeId {
    let leaf = graph.add_node(Node::new("leaf", "Conv"));
    let mut subgraph = graph.add_subgraph(Subgraph::new("body0").with_nodes([leaf]));
    let mut call = graph.add_node(Node::new("call1", "Call").with_subgraph(subgraph));
    for level in 1..levels {
        subgraph = graph.add_subgraph(
            Subgraph::new(format!("body{level}")).with_nodes([call]),
        );
        call = graph.add_node(
            Node::new(format!("call{}", level + 1), "Call").with_subgraph(subgraph),
        );
    }
    call
}

#[test]
fn ten_levels_of_nesting_resolve() {
    let dispatcher = fused_dispatcher();
    let mut graph = Graph::new();
    let outer = nested_calls(&mut graph, 10);

    let attr = dispatcher
        .composite_engine_name(&mut graph, outer, ResolveOptions::default(), &NullSink)
        .expect("depth 10 stays within the bound");
    assert_eq!(attr, CompositeAttr::Engine("Fused".to_string()));
}

#[test]
fn eleven_levels_of_nesting_hit_the_recursion_bound() {
    let dispatcher = fused_dispatcher();
    let mut graph = Graph::new();
    let outer = nested_calls(&mut graph, 11);

    let sink = RecordingSink::new();
    let err = dispatcher
        .composite_engine_name(&mut graph, outer, ResolveOptions::default(), &sink)
        .expect_err("depth 11 exceeds the bound");
    assert!(matches!(
        err,
        CompositeError::RecursionLimitExceeded { limit: 10, .. }
    ));

    // The analyzer heard about it too.
    let reports = sink.take();
    assert!(reports
        .iter()
        .any(|report| matches!(report, Diagnostic::CompositeDepth { depth: 11, .. })));
}
