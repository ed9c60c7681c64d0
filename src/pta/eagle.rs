// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! The selective pre-analysis and the guided two-run driver.
//!
//! Context-sensitivity only pays off where a value flows into an object
//! and later comes back out. To find those places cheaply, the driver
//! first runs the insensitive analysis, then recasts its result as a
//! transition graph: every variable, object and field gets a forward and
//! a backward node, assignments connect them level, and heap entries and
//! exits carry parenthesis weights. A mark is pushed from every boundary
//! node; an exit through an object is only taken once an entry on the
//! same object has fired, which splices in that object's match edge.
//! Whatever ends up marked in both directions forms the
//! [`EagleSelection`]; the main run gives contexts to exactly those
//! variables, objects, fields and methods and keeps the rest in the
//! empty context.

use log::*;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;
use std::time::Instant;

use crate::graph::pag::{
    AllocKey, LocalKey, LocalVarKey, NodeKey, PAGEdgeKind, PAGNodeId, PagField, PAG,
};
use crate::ir::analysis_context::AnalysisContext;
use crate::ir::call_site::{CSBaseCallSite, CallSite};
use crate::ir::context::EMPTY_CONTEXT_ID;
use crate::ir::program::{CSMethodId, MethodId};
use crate::ir::statement::CallKind;
use crate::pta::context_sensitive::ContextSensitivePTA;
use crate::pta::context_strategy::{ContextInsensitive, KSensitive};
use crate::pta::{PTAPattern, PointerAnalysis};
use crate::util::options::StaticContextMode;

/// The pre-analysis verdict: everything that may carry a value into an
/// object and out again, and therefore deserves its contexts. Keys are
/// program-level so the selection made on the baseline's graph transfers
/// to the main run's.
#[derive(Clone, Debug, Default)]
pub struct EagleSelection {
    pub vars: HashSet<LocalVarKey>,
    pub allocs: HashSet<AllocKey>,
    pub fields: HashSet<PagField>,
    pub methods: HashSet<MethodId>,
}

/// What a transition node stands for in the baseline graph. Field slots
/// are shared per field rather than per object, which is why exits taken
/// through them get the extra ownership check during propagation.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
enum TransOrigin {
    Var(PAGNodeId),
    Alloc(PAGNodeId),
    Field(PagField),
}

/// One polarity of an origin: the forward node follows the value flow,
/// the backward one runs against it. Which polarity a node carries is
/// recorded in the graph's index key.
struct PolarNode {
    origin: TransOrigin,
    cs: bool,
    /// Successors with the weight of the connecting edge. The first
    /// recorded weight for a successor wins; no rule below ever produces
    /// the same arc with two different weights.
    out: HashMap<usize, i32>,
}

#[derive(Default)]
struct TransGraph {
    nodes: Vec<PolarNode>,
    index: HashMap<(TransOrigin, bool), usize>,
    /// Boundary nodes the propagation starts from.
    entries: HashSet<usize>,
}

impl TransGraph {
    fn node(&mut self, origin: TransOrigin, forward: bool) -> usize {
        match self.index.entry((origin, forward)) {
            Entry::Occupied(o) => *o.get(),
            Entry::Vacant(v) => {
                let idx = self.nodes.len();
                self.nodes.push(PolarNode {
                    origin,
                    cs: false,
                    out: HashMap::new(),
                });
                *v.insert(idx)
            }
        }
    }

    fn add_out(&mut self, from: usize, to: usize, weight: i32) -> bool {
        match self.nodes[from].out.entry(to) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert(weight);
                true
            }
        }
    }

    /// `to = new ...`: the object flows level into the variable.
    fn add_new(&mut self, alloc: PAGNodeId, to: PAGNodeId) {
        let from_f = self.node(TransOrigin::Alloc(alloc), true);
        let to_f = self.node(TransOrigin::Var(to), true);
        self.add_out(from_f, to_f, 0);
        let to_b = self.node(TransOrigin::Var(to), false);
        let from_b = self.node(TransOrigin::Alloc(alloc), false);
        self.add_out(to_b, from_b, 0);
    }

    fn add_assign(&mut self, from: PAGNodeId, to: PAGNodeId) {
        let from_f = self.node(TransOrigin::Var(from), true);
        let to_f = self.node(TransOrigin::Var(to), true);
        self.add_out(from_f, to_f, 0);
        let to_b = self.node(TransOrigin::Var(to), false);
        let from_b = self.node(TransOrigin::Var(from), false);
        self.add_out(to_b, from_b, 0);
    }

    /// `base.f = from` and argument passing: the stored value runs
    /// against the base variable so a later read through it can pick the
    /// value up, and vice versa.
    fn add_store(&mut self, from: PAGNodeId, base: PAGNodeId) {
        let from_f = self.node(TransOrigin::Var(from), true);
        let base_b = self.node(TransOrigin::Var(base), false);
        self.add_out(from_f, base_b, 0);
        let base_f = self.node(TransOrigin::Var(base), true);
        let from_b = self.node(TransOrigin::Var(from), false);
        self.add_out(base_f, from_b, 0);
    }

    /// A value enters `obj`: the forward arc closes a parenthesis, the
    /// backward arc opens one, and the backward side of the source
    /// becomes a boundary.
    fn add_hstore(&mut self, from: TransOrigin, obj: PAGNodeId) {
        let from_f = self.node(from, true);
        let obj_f = self.node(TransOrigin::Alloc(obj), true);
        self.add_out(from_f, obj_f, -1);
        let obj_b = self.node(TransOrigin::Alloc(obj), false);
        let from_b = self.node(from, false);
        self.add_out(obj_b, from_b, 1);
        self.entries.insert(from_b);
    }

    /// A value leaves `obj` towards `to`.
    fn add_hload(&mut self, obj: PAGNodeId, to: TransOrigin) {
        let obj_b = self.node(TransOrigin::Alloc(obj), false);
        let to_f = self.node(to, true);
        self.add_out(obj_b, to_f, 1);
        let to_b = self.node(to, false);
        let obj_f = self.node(TransOrigin::Alloc(obj), true);
        self.add_out(to_b, obj_f, -1);
        self.entries.insert(to_f);
    }

    /// Marks every polar node a boundary value can reach. Zero and
    /// opening weights propagate freely; a closing weight exits through
    /// an object and is only taken once the object is matched, which adds
    /// the object's backward-to-forward match edge. Exits reached on a
    /// field slot must additionally sit on an object whose own slot fed
    /// the field, since slot nodes are shared across objects.
    fn propagate(&mut self) {
        let mut worklist: Vec<usize> = Vec::new();
        for &entry in &self.entries {
            self.nodes[entry].cs = true;
            worklist.push(entry);
        }
        let mut matched: HashSet<PAGNodeId> = HashSet::new();
        while let Some(node) = worklist.pop() {
            // Match edges can land on an already-processed node, so
            // snapshot the adjacency and re-push on insertion.
            let out: Vec<(usize, i32)> =
                self.nodes[node].out.iter().map(|(&t, &w)| (t, w)).collect();
            for (succ, weight) in out {
                if weight >= 0 {
                    if !self.nodes[succ].cs {
                        self.nodes[succ].cs = true;
                        worklist.push(succ);
                    }
                    continue;
                }
                // Closing weights always point at an object's forward
                // node.
                let obj = match self.nodes[succ].origin {
                    TransOrigin::Alloc(obj) => obj,
                    other => unreachable!("exit edge into {:?}", other),
                };
                let obj_b = self.node(TransOrigin::Alloc(obj), false);
                if matches!(self.nodes[node].origin, TransOrigin::Field(_))
                    && !self.nodes[obj_b].out.contains_key(&node)
                {
                    continue;
                }
                if matched.insert(obj) && self.add_out(obj_b, succ, 0) && self.nodes[obj_b].cs {
                    worklist.push(obj_b);
                }
            }
        }
        debug!(
            "Propagated over {} polar nodes from {} boundaries, {} objects matched",
            self.nodes.len(),
            self.entries.len(),
            matched.len()
        );
    }

    /// Reads the verdict off the marks: an entity is selected when both
    /// of its polarities were reached.
    fn selection(&self, acx: &AnalysisContext, pag: &PAG) -> EagleSelection {
        let mut selection = EagleSelection::default();
        for (&(origin, forward), &idx) in &self.index {
            if !forward {
                continue;
            }
            let backward = match self.index.get(&(origin, false)) {
                Some(&backward) => backward,
                None => continue,
            };
            if !(self.nodes[idx].cs && self.nodes[backward].cs) {
                continue;
            }
            match origin {
                TransOrigin::Var(node) => {
                    if let NodeKey::LocalVar(key) = pag.node_key(node) {
                        selection.vars.insert(key);
                        selection.methods.insert(key.method);
                    }
                }
                TransOrigin::Alloc(node) => {
                    if let NodeKey::Alloc(key) = pag.node_key(node) {
                        selection.allocs.insert(key);
                        if let AllocKey::Site(site) = key {
                            selection.methods.insert(acx.program.alloc_site(site).method);
                        }
                    }
                }
                TransOrigin::Field(field) => {
                    selection.fields.insert(field);
                }
            }
        }
        selection
    }
}

/// Runs the insensitive baseline, distills it into a selection and hands
/// the selection to a full run under the requested sensitivity.
pub struct EagleGuidedPTA<'pta> {
    acx: &'pta AnalysisContext,
    pattern: PTAPattern,
    pub selection: Option<EagleSelection>,
    pub main: Option<ContextSensitivePTA<'pta, KSensitive>>,
}

impl<'pta> EagleGuidedPTA<'pta> {
    pub fn new(acx: &'pta AnalysisContext, pattern: &PTAPattern) -> Self {
        EagleGuidedPTA {
            acx,
            pattern: pattern.clone(),
            selection: None,
            main: None,
        }
    }

    /// Recasts the solved baseline as the transition graph and extracts
    /// the both-ways-reachable entities.
    fn select(&self, pre: &mut ContextSensitivePTA<'pta, ContextInsensitive>) -> EagleSelection {
        let mut graph = TransGraph::default();
        self.add_trans_edges(pre, &mut graph);
        debug!(
            "Transition graph has {} polar nodes, {} of them boundaries",
            graph.nodes.len(),
            graph.entries.len()
        );
        graph.propagate();
        graph.selection(self.acx, &pre.pag)
    }

    fn add_trans_edges(
        &self,
        pre: &mut ContextSensitivePTA<'pta, ContextInsensitive>,
        graph: &mut TransGraph,
    ) {
        let static_this = if self.acx.options.static_context != StaticContextMode::Empty {
            self.static_this_sets(pre)
        } else {
            HashMap::new()
        };

        let reachable: Vec<MethodId> = pre
            .call_graph
            .method_nodes
            .keys()
            .map(|cs_method| cs_method.method)
            .collect();

        for method in reachable {
            // Bodyless methods contribute no flow.
            let (mut edges, sites) = match pre.pag.get_method_graph(&method) {
                Some(mg) => (mg.internal_edge_iter(), mg.invoke_sites().to_vec()),
                None => continue,
            };

            while let Some((from, to)) = edges.next() {
                match (pre.pag.node_key(from), pre.pag.node_key(to)) {
                    (NodeKey::LocalVar(_), NodeKey::LocalVar(_)) => graph.add_assign(from, to),
                    (NodeKey::LocalVar(_), NodeKey::FieldRef { base, .. }) => {
                        graph.add_store(from, base)
                    }
                    (NodeKey::Alloc(_), NodeKey::LocalVar(_)) => graph.add_new(from, to),
                    (NodeKey::FieldRef { base, .. }, NodeKey::LocalVar(_)) => {
                        graph.add_assign(base, to)
                    }
                    // Globals carry no context either way.
                    _ => {}
                }
            }

            self.add_boundary_edges(pre, graph, method, &static_this);
            self.add_invoke_edges(pre, graph, method, &sites);
        }

        // Field slots materialized by the baseline solver tie each field
        // to the objects it was accessed on. Outgoing copies on a slot
        // are loads, incoming ones stores.
        for node in pre.pag.node_indices() {
            if pre.pag.is_merged_away(node) {
                continue;
            }
            if let NodeKey::AllocDotField { base, field } = pre.pag.node_key(node) {
                if pre.pag.out_edges(node, PAGEdgeKind::Simple).next().is_some() {
                    graph.add_hstore(TransOrigin::Field(field), base);
                }
                if pre.pag.in_edges(node, PAGEdgeKind::Simple).next().is_some() {
                    graph.add_hload(base, TransOrigin::Field(field));
                }
            }
        }
    }

    /// Connects a method's `this`, reference parameters and return to the
    /// objects the method may run on. Static methods use their synthetic
    /// receiver sets and are skipped entirely when static calls keep the
    /// empty context.
    fn add_boundary_edges(
        &self,
        pre: &mut ContextSensitivePTA<'pta, ContextInsensitive>,
        graph: &mut TransGraph,
        method: MethodId,
        static_this: &HashMap<MethodId, HashSet<PAGNodeId>>,
    ) {
        let data = self.acx.program.method_data(method);
        let param_types = data.param_types.clone();
        let ret_type = data.ret_type;

        let receivers: Vec<PAGNodeId> = if data.is_static {
            match static_this.get(&method) {
                Some(set) => set.iter().copied().collect(),
                None => return,
            }
        } else {
            let this = pre
                .pag
                .get_or_insert_local_var(self.acx, LocalVarKey::new(method, LocalKey::This));
            baseline_pointees(pre, this)
        };
        if receivers.is_empty() {
            return;
        }

        let this = pre
            .pag
            .get_or_insert_local_var(self.acx, LocalVarKey::new(method, LocalKey::This));
        let mut params = Vec::new();
        for (i, &ty) in param_types.iter().enumerate() {
            if self.acx.is_ref_like(ty) {
                params.push(pre.pag.get_or_insert_local_var(
                    self.acx,
                    LocalVarKey::new(method, LocalKey::Param(i as u32)),
                ));
            }
        }
        let ret = match ret_type {
            Some(ty) if self.acx.is_ref_like(ty) => Some(
                pre.pag
                    .get_or_insert_local_var(self.acx, LocalVarKey::new(method, LocalKey::Ret)),
            ),
            _ => None,
        };

        for &obj in &receivers {
            graph.add_hload(obj, TransOrigin::Var(this));
            for &param in &params {
                graph.add_hload(obj, TransOrigin::Var(param));
            }
            if let Some(ret) = ret {
                graph.add_hstore(TransOrigin::Var(ret), obj);
            }
        }
    }

    /// Folds the calls the baseline resolved into the graph: arguments
    /// store into the receiver variable, returns copy back out of it, and
    /// the receiver re-enters itself once per callee. Static calls run
    /// against the caller's own `this` when static contexts are in play.
    fn add_invoke_edges(
        &self,
        pre: &mut ContextSensitivePTA<'pta, ContextInsensitive>,
        graph: &mut TransGraph,
        method: MethodId,
        sites: &[Rc<CallSite>],
    ) {
        let caller = CSMethodId::new(EMPTY_CONTEXT_ID, method);
        for site in sites {
            let receiver = match site.receiver {
                Some(receiver) => Some(receiver),
                None if self.acx.options.static_context != StaticContextMode::Empty => {
                    Some(pre.pag.get_or_insert_local_var(
                        self.acx,
                        LocalVarKey::new(method, LocalKey::This),
                    ))
                }
                None => None,
            };
            let receiver = match receiver {
                Some(receiver) => receiver,
                None => continue,
            };
            let cs_site = CSBaseCallSite::new(caller, site.callsite.stmt);
            for callee in pre.call_graph.get_callees(&cs_site) {
                let callee_data = self.acx.program.method_data(callee.method);
                for (i, arg) in site.args.iter().enumerate() {
                    let arg = match arg {
                        Some(arg) => *arg,
                        None => continue,
                    };
                    match callee_data.param_types.get(i) {
                        Some(&ty) if self.acx.is_ref_like(ty) => {}
                        _ => continue,
                    }
                    if matches!(pre.pag.node_key(arg), NodeKey::LocalVar(_)) {
                        graph.add_store(arg, receiver);
                    }
                }
                if let (Some(dest), Some(ret_type)) = (site.dest, callee_data.ret_type) {
                    if self.acx.is_ref_like(ret_type) {
                        graph.add_assign(receiver, dest);
                    }
                }
                graph.add_store(receiver, receiver);
            }
        }
    }

    /// Synthetic receiver sets for static methods: every static callee
    /// inherits the pointees of its caller's `this`, and under the
    /// synthetic-this mode the sets close transitively over
    /// static-to-static calls. Static chains no instance method ever
    /// calls keep empty sets.
    fn static_this_sets(
        &self,
        pre: &mut ContextSensitivePTA<'pta, ContextInsensitive>,
    ) -> HashMap<MethodId, HashSet<PAGNodeId>> {
        let mut sets: HashMap<MethodId, HashSet<PAGNodeId>> = HashMap::new();
        let mut worklist: Vec<MethodId> = Vec::new();

        let reachable: Vec<MethodId> = pre
            .call_graph
            .method_nodes
            .keys()
            .map(|cs_method| cs_method.method)
            .collect();
        for method in reachable {
            if self.acx.program.method_data(method).is_static {
                continue;
            }
            let sites = match pre.pag.get_method_graph(&method) {
                Some(mg) => mg.invoke_sites().to_vec(),
                None => continue,
            };
            let this = pre
                .pag
                .get_or_insert_local_var(self.acx, LocalVarKey::new(method, LocalKey::This));
            let pointees = baseline_pointees(pre, this);
            let caller = CSMethodId::new(EMPTY_CONTEXT_ID, method);
            for site in sites {
                if site.kind != CallKind::Static {
                    continue;
                }
                let cs_site = CSBaseCallSite::new(caller, site.callsite.stmt);
                for callee in pre.call_graph.get_callees(&cs_site) {
                    let set = sets.entry(callee.method).or_default();
                    let mut changed = false;
                    for &obj in &pointees {
                        changed |= set.insert(obj);
                    }
                    if changed && self.acx.options.static_context == StaticContextMode::This {
                        worklist.push(callee.method);
                    }
                }
            }
        }

        while let Some(method) = worklist.pop() {
            let pointees: Vec<PAGNodeId> = match sets.get(&method) {
                Some(set) => set.iter().copied().collect(),
                None => continue,
            };
            let sites = match pre.pag.get_method_graph(&method) {
                Some(mg) => mg.invoke_sites().to_vec(),
                None => continue,
            };
            let caller = CSMethodId::new(EMPTY_CONTEXT_ID, method);
            for site in sites {
                if site.kind != CallKind::Static {
                    continue;
                }
                let cs_site = CSBaseCallSite::new(caller, site.callsite.stmt);
                for callee in pre.call_graph.get_callees(&cs_site) {
                    let set = sets.entry(callee.method).or_default();
                    let mut changed = false;
                    for &obj in &pointees {
                        changed |= set.insert(obj);
                    }
                    if changed {
                        worklist.push(callee.method);
                    }
                }
            }
        }

        sets
    }
}

/// Both generations of the baseline's points-to facts for one node.
fn baseline_pointees(
    pre: &ContextSensitivePTA<'_, ContextInsensitive>,
    node: PAGNodeId,
) -> Vec<PAGNodeId> {
    let mut pointees = Vec::new();
    for set in [
        pre.pt_data.get_propa_pts(node),
        pre.pt_data.get_diff_pts(node),
    ]
    .into_iter()
    .flatten()
    {
        pointees.extend(set);
    }
    pointees
}

impl PointerAnalysis for EagleGuidedPTA<'_> {
    fn analyze(&mut self) {
        let now = Instant::now();
        let mut pre = ContextSensitivePTA::new(self.acx, ContextInsensitive::new(), None);
        pre.initialize();
        pre.propagate();
        info!(
            "Baseline analysis done in {}",
            humantime::format_duration(now.elapsed())
        );

        let now = Instant::now();
        let selection = self.select(&mut pre);
        info!(
            "Selected {} variables, {} objects, {} fields and {} methods in {}",
            selection.vars.len(),
            selection.allocs.len(),
            selection.fields.len(),
            selection.methods.len(),
            humantime::format_duration(now.elapsed())
        );
        drop(pre);

        let mut main = ContextSensitivePTA::new(
            self.acx,
            KSensitive::from_pattern(&self.pattern),
            Some(selection.clone()),
        );
        main.analyze();

        self.selection = Some(selection);
        self.main = Some(main);
    }
}

impl fmt::Debug for EagleGuidedPTA<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        "EagleGuidedPTA".fmt(f)
    }
}
