// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use petgraph::dot::{Config, Dot};
use petgraph::graph::{DefaultIx, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Graph;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;

use crate::ir::analysis_context::AnalysisContext;
use crate::ir::call_site::{BaseCallSite, CSBaseCallSite};
use crate::ir::context::EMPTY_CONTEXT_ID;
use crate::ir::program::{CSMethodId, MethodId};
use crate::ir::statement::CallKind;
use crate::util::chunked_queue::{self, ChunkedQueue};

/// Unique identifiers for call graph nodes.
pub type CGNodeId = NodeIndex<DefaultIx>;
/// Unique identifiers for call graph edges.
pub type CGEdgeId = EdgeIndex<DefaultIx>;
/// Context-sensitive call graph.
pub type CSCallGraph = CallGraph<CSMethodId, CSBaseCallSite>;
/// Context-insensitive call graph, also the projection target of a
/// context-sensitive one.
pub type CICallGraph = CallGraph<MethodId, BaseCallSite>;

pub trait CGMethod: Copy + Clone + PartialEq + Eq + Hash + Debug {
    fn dot_label(&self, acx: &AnalysisContext) -> String;
}

impl CGMethod for MethodId {
    fn dot_label(&self, acx: &AnalysisContext) -> String {
        acx.method_name(*self)
    }
}

impl CGMethod for CSMethodId {
    fn dot_label(&self, acx: &AnalysisContext) -> String {
        if self.cid == EMPTY_CONTEXT_ID {
            acx.method_name(self.method)
        } else {
            format!("{} [{}]", acx.method_name(self.method), self.cid.index())
        }
    }
}

pub trait CGCallSite: Copy + Clone + PartialEq + Eq + Hash + Debug {
    fn dot_label(&self) -> String;
}

impl CGCallSite for BaseCallSite {
    fn dot_label(&self) -> String {
        format!("stmt {}", self.stmt)
    }
}

impl CGCallSite for CSBaseCallSite {
    fn dot_label(&self) -> String {
        format!("stmt {}", self.stmt)
    }
}

#[derive(Debug)]
pub struct CallGraphNode<F: CGMethod> {
    pub(crate) method: F,
}

impl<F: CGMethod> CallGraphNode<F> {
    pub fn new(method: F) -> Self {
        CallGraphNode { method }
    }

    #[inline]
    pub fn method(&self) -> F {
        self.method
    }
}

#[derive(Debug)]
pub struct CallGraphEdge<S: CGCallSite> {
    pub(crate) callsite: S,
    pub(crate) kind: CallKind,
}

impl<S: CGCallSite> CallGraphEdge<S> {
    pub fn new(callsite: S, kind: CallKind) -> Self {
        CallGraphEdge { callsite, kind }
    }
}

pub struct CallGraph<F: CGMethod, S: CGCallSite> {
    /// The graph structure capturing call relationships.
    pub graph: Graph<CallGraphNode<F>, CallGraphEdge<S>>,
    /// A map from methods to their corresponding call graph nodes. Interning
    /// a method here is what makes it reachable.
    pub method_nodes: HashMap<F, CGNodeId>,
    /// A map from call sites to call graph edges.
    pub callsite_to_edges: HashMap<S, HashSet<CGEdgeId>>,
    /// Every method ever interned, in discovery order. The analysis drains
    /// this log through resumable cursors.
    pub(crate) reach_methods: ChunkedQueue<F>,
}

impl<F: CGMethod, S: CGCallSite> CallGraph<F, S> {
    pub fn new() -> Self {
        CallGraph {
            graph: Graph::<CallGraphNode<F>, CallGraphEdge<S>>::new(),
            method_nodes: HashMap::new(),
            callsite_to_edges: HashMap::new(),
            reach_methods: ChunkedQueue::new(),
        }
    }

    /// Adds a method to the call graph, marking it reachable.
    pub fn add_node(&mut self, method: F) {
        self.get_or_insert_node(method);
    }

    /// Helper function to get a node or insert a new
    /// node if it does not exist in the map.
    fn get_or_insert_node(&mut self, method: F) -> CGNodeId {
        match self.method_nodes.entry(method) {
            Entry::Occupied(o) => o.get().to_owned(),
            Entry::Vacant(v) => {
                // First sighting; log it for the reachability drain.
                self.reach_methods.push(method);
                let node_id = self.graph.add_node(CallGraphNode::new(method));
                *v.insert(node_id)
            }
        }
    }

    pub fn contains_method(&self, method: F) -> bool {
        self.method_nodes.contains_key(&method)
    }

    pub fn edge_endpoints(&self, edge_id: CGEdgeId) -> Option<(CGNodeId, CGNodeId)> {
        self.graph.edge_endpoints(edge_id)
    }

    pub fn get_callee_id_of_edge(&self, edge_id: CGEdgeId) -> Option<F> {
        let (_, callee_node) = self.edge_endpoints(edge_id)?;
        self.graph.node_weight(callee_node).map(|n| n.method)
    }

    /// All methods the given callsite has been resolved to so far.
    pub fn get_callees(&self, callsite: &S) -> HashSet<F> {
        if let Some(edges) = self.callsite_to_edges.get(callsite) {
            edges
                .iter()
                .filter_map(|edge_id| match self.graph.edge_endpoints(*edge_id) {
                    Some((_, target)) => Some(self.graph.node_weight(target).unwrap().method),
                    None => None,
                })
                .collect::<HashSet<F>>()
        } else {
            HashSet::new()
        }
    }

    /// Returns true if an edge to the callee already exists for the callsite.
    pub fn has_edge(&self, callsite: &S, callee_id: F) -> bool {
        let callees = self.get_callees(callsite);
        callees.contains(&callee_id)
    }

    /// Adds a call from `caller_id` to `callee_id` at `callsite`, interning
    /// both endpoints. Returns false if the edge already existed, and true
    /// otherwise.
    pub fn add_edge(&mut self, callsite: S, caller_id: F, callee_id: F, kind: CallKind) -> bool {
        let caller_node = self.get_or_insert_node(caller_id);
        let callee_node = self.get_or_insert_node(callee_id);

        let callees = self.get_callees(&callsite);
        if !callees.contains(&callee_id) {
            let edge = CallGraphEdge::new(callsite, kind);
            let edge_id = self.graph.add_edge(caller_node, callee_node, edge);
            self.callsite_to_edges
                .entry(callsite)
                .or_default()
                .insert(edge_id);
            true
        } else {
            false
        }
    }

    /// Returns an iterator over the reachable methods, in discovery order.
    /// The cursor survives later insertions and resumes where it stopped.
    pub fn reach_methods_iter(&self) -> chunked_queue::QueueReader<F> {
        self.reach_methods.reader()
    }

    pub fn num_nodes(&self) -> usize {
        self.graph.node_count()
    }

    pub fn num_edges(&self) -> usize {
        self.graph.edge_count()
    }

    /// Produces a dot file representation of the call graph
    /// for displaying with Graphviz.
    pub fn to_dot(&self, acx: &AnalysisContext, dot_path: &std::path::Path) {
        let node_attr = |_: &Graph<CallGraphNode<F>, CallGraphEdge<S>>,
                         (_, node): (CGNodeId, &CallGraphNode<F>)| {
            format!("label=\"{}\"", node.method.dot_label(acx))
        };
        let edge_attr = |_: &Graph<CallGraphNode<F>, CallGraphEdge<S>>,
                         edge: petgraph::graph::EdgeReference<'_, CallGraphEdge<S>>| {
            format!("label=\"{}\"", edge.weight().callsite.dot_label())
        };

        let output = format!(
            "{:?}",
            Dot::with_attr_getters(
                &self.graph,
                &[Config::NodeNoLabel, Config::EdgeNoLabel],
                &edge_attr,
                &node_attr,
            )
        );
        match std::fs::write(dot_path, output) {
            Ok(_) => (),
            Err(e) => panic!("Failed to write dot file output: {:?}", e),
        };
    }
}

impl<F: CGMethod, S: CGCallSite> Default for CallGraph<F, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl CSCallGraph {
    /// Projects the context-sensitive call graph down to methods. Edges
    /// that differ only in context collapse into one.
    pub fn to_context_insensitive(&self) -> CICallGraph {
        let mut ci = CICallGraph::new();
        for node_id in self.graph.node_indices() {
            ci.add_node(self.graph[node_id].method.into());
        }
        for edge in self.graph.edge_references() {
            let caller: MethodId = self.graph[edge.source()].method.into();
            let callee: MethodId = self.graph[edge.target()].method.into();
            let callsite: BaseCallSite = edge.weight().callsite.into();
            ci.add_edge(callsite, caller, callee, edge.weight().kind);
        }
        ci
    }
}
