// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! The worklist solver behind [`ContextSensitivePTA`].
//!
//! Propagation is generational: each variable carries a propagated set and
//! an unpropagated difference, and only differences ever travel along
//! edges. The worklist is ordered by a topological rank over the simple
//! edges so that sources drain before sinks; nodes the call graph creates
//! after the sort keep rank zero and are processed eagerly.

use log::*;
use std::collections::BTreeSet;

use crate::graph::pag::{
    AllocKey, LocalKey, LocalVarKey, NodeKey, PAGEdgeId, PAGEdgeKind, PAGNodeId, PagField,
    SpecialAlloc, PAG,
};
use crate::pta::context_sensitive::ContextSensitivePTA;
use crate::pta::context_strategy::ContextStrategy;
use crate::pts_set::points_to::PointsToSet;
use crate::util::chunked_queue::QueueReader;
use crate::util::options::StaticContextMode;

type Worklist = BTreeSet<(u32, PAGNodeId)>;

impl<'pta, S: ContextStrategy> ContextSensitivePTA<'pta, S> {
    /// Runs constraint propagation to a fixed point.
    pub(crate) fn propagate(&mut self) {
        let mut alloc_iter = self.pag.alloc_edge_iter();
        let mut simple_iter = self.pag.simple_edge_iter();
        let mut store_iter = self.pag.store_edge_iter();
        let mut load_iter = self.pag.load_edge_iter();

        self.process_reach_methods();
        self.seed_root_object();

        let ranks = if self.acx.options.topo_sort {
            topo_ranks(&self.pag)
        } else {
            Vec::new()
        };
        let mut worklist = Worklist::new();
        self.handle_added_simple_edges(&mut alloc_iter, &mut simple_iter, &ranks, &mut worklist);

        let mut processed = 0usize;
        while let Some((_, src)) = worklist.pop_first() {
            processed += 1;
            self.propagate_from_src(src, &ranks, &mut worklist);
            self.update_call_graph(src);
            self.handle_added_complex_edges(&mut store_iter, &mut load_iter);
            self.handle_store_load_on_base(src);
            self.pt_data.flush(src);
            self.handle_added_simple_edges(&mut alloc_iter, &mut simple_iter, &ranks, &mut worklist);
        }
        debug!("worklist drained after {} pops", processed);
    }

    /// Under the synthetic-this mode every static chain starts from a
    /// distinguished root object held by the harness `this`.
    fn seed_root_object(&mut self) {
        if self.acx.options.static_context != StaticContextMode::This
            || !self.strategy.is_sensitive()
        {
            return;
        }
        let root = self
            .pag
            .get_or_insert_alloc(self.acx, AllocKey::Special(SpecialAlloc::Root));
        let this = self.pag.get_or_insert_local_var(
            self.acx,
            LocalVarKey::new(self.acx.entry, LocalKey::This),
        );
        self.pag.add_edge(self.acx, root, this);
    }

    /// Moves the difference of `src` along its outgoing simple edges.
    fn propagate_from_src(&mut self, src: PAGNodeId, ranks: &[u32], worklist: &mut Worklist) {
        let diff = match self.pt_data.get_diff_pts(src) {
            Some(diff) if !diff.is_empty() => diff.clone(),
            _ => return,
        };
        let targets: Vec<PAGNodeId> = self
            .pag
            .out_edges(src, PAGEdgeKind::Simple)
            .map(|e| self.pag.edge_ends(e).1)
            .collect();
        for tgt in targets {
            if self.pt_data.union_pts_to(tgt, &diff) {
                enqueue(worklist, ranks, tgt);
            }
            if let NodeKey::AllocDotField { base, .. } = self.pag.node_key(tgt) {
                if self.pag.is_constant_alloc(base) {
                    panic!("writing through a constant object: {:?} <- {:?}", tgt, src);
                }
            }
        }
    }

    /// Feeds new pointees of `src` to the call sites dispatched on it,
    /// then replays sites recorded by the resulting splices against the
    /// pointees their receivers already accumulated.
    fn update_call_graph(&mut self, src: PAGNodeId) {
        let new_pts = self.diff_of(src);
        if !new_pts.is_empty() {
            for idx in self.sites_on(src) {
                let (_, caller, site) = self.pending_site(idx);
                for &pointee in &new_pts {
                    self.dispatch_site(caller, &site, pointee);
                }
            }
        }
        self.process_reach_methods();

        loop {
            let mut drained = false;
            while let Some(idx) = self.site_iter.next() {
                drained = true;
                let (receiver, caller, site) = self.pending_site(idx);
                for pointee in self.propa_of(receiver) {
                    self.dispatch_site(caller, &site, pointee);
                }
                if receiver == src {
                    for pointee in self.diff_of(src) {
                        self.dispatch_site(caller, &site, pointee);
                    }
                }
            }
            if !drained {
                break;
            }
            self.process_reach_methods();
        }
    }

    /// Lowers store and load edges added since the last pop against the
    /// pointees their base has already propagated.
    fn handle_added_complex_edges(
        &mut self,
        store_iter: &mut QueueReader<PAGEdgeId>,
        load_iter: &mut QueueReader<PAGEdgeId>,
    ) {
        while let Some(eid) = store_iter.next() {
            let (src, fr) = self.pag.edge_ends(eid);
            let (base, field) = field_ref_parts(&self.pag, fr);
            for alloc in self.propa_of(base) {
                if self.pag.is_constant_alloc(alloc) {
                    continue;
                }
                let slot = self.alloc_dot_field(alloc, field);
                self.pag.add_simple_edge(src, slot);
            }
        }
        while let Some(eid) = load_iter.next() {
            let (fr, tgt) = self.pag.edge_ends(eid);
            let (base, field) = field_ref_parts(&self.pag, fr);
            for alloc in self.propa_of(base) {
                let slot = self.alloc_dot_field(alloc, field);
                self.pag.add_simple_edge(slot, tgt);
            }
        }
    }

    /// Lowers the store and load edges hanging off `src`'s field
    /// dereferences against its new pointees.
    fn handle_store_load_on_base(&mut self, src: PAGNodeId) {
        let new_pts = self.diff_of(src);
        if new_pts.is_empty() {
            return;
        }
        let frs = self.pag.field_refs_of(src).to_vec();
        for fr in frs {
            let (_, field) = field_ref_parts(&self.pag, fr);
            let stores: Vec<PAGNodeId> = self
                .pag
                .in_edges(fr, PAGEdgeKind::Store)
                .map(|e| self.pag.edge_ends(e).0)
                .collect();
            for var in stores {
                for &alloc in &new_pts {
                    if self.pag.is_constant_alloc(alloc) {
                        continue;
                    }
                    let slot = self.alloc_dot_field(alloc, field);
                    self.pag.add_simple_edge(var, slot);
                }
            }
            let loads: Vec<PAGNodeId> = self
                .pag
                .out_edges(fr, PAGEdgeKind::Load)
                .map(|e| self.pag.edge_ends(e).1)
                .collect();
            for var in loads {
                for &alloc in &new_pts {
                    let slot = self.alloc_dot_field(alloc, field);
                    self.pag.add_simple_edge(slot, var);
                }
            }
        }
    }

    /// Activates alloc and simple edges added since the last pop. New
    /// simple edges catch their target up on everything the source already
    /// propagated; the difference travels when the source pops.
    fn handle_added_simple_edges(
        &mut self,
        alloc_iter: &mut QueueReader<PAGEdgeId>,
        simple_iter: &mut QueueReader<PAGEdgeId>,
        ranks: &[u32],
        worklist: &mut Worklist,
    ) {
        while let Some(eid) = alloc_iter.next() {
            let (obj, tgt) = self.pag.edge_ends(eid);
            if self.pt_data.add_pts(tgt, obj) {
                enqueue(worklist, ranks, tgt);
            }
        }
        while let Some(eid) = simple_iter.next() {
            let (src, tgt) = self.pag.edge_ends(eid);
            if let Some(old) = self.pt_data.get_propa_pts(src) {
                let old = old.clone();
                if self.pt_data.union_pts_to(tgt, &old) {
                    enqueue(worklist, ranks, tgt);
                }
            }
        }
    }

    fn diff_of(&self, node: PAGNodeId) -> Vec<PAGNodeId> {
        match self.pt_data.get_diff_pts(node) {
            Some(diff) => diff.iter().collect(),
            None => Vec::new(),
        }
    }

    fn propa_of(&self, node: PAGNodeId) -> Vec<PAGNodeId> {
        match self.pt_data.get_propa_pts(node) {
            Some(propa) => propa.iter().collect(),
            None => Vec::new(),
        }
    }
}

fn field_ref_parts(pag: &PAG, node: PAGNodeId) -> (PAGNodeId, PagField) {
    match pag.node_key(node) {
        NodeKey::FieldRef { base, field } => (base, field),
        other => panic!("complex edge on a non-field node: {:?}", other),
    }
}

fn enqueue(worklist: &mut Worklist, ranks: &[u32], node: PAGNodeId) {
    let rank = ranks.get(node.index()).copied().unwrap_or(0);
    worklist.insert((rank, node));
}

/// Ranks every node by reverse finishing order of a depth-first walk over
/// the simple edges, so that sources rank lower than their sinks. Cycles
/// are tolerated; back edges just keep the rank the walk already fixed.
fn topo_ranks(pag: &PAG) -> Vec<u32> {
    struct Frame {
        node: PAGNodeId,
        succs: Vec<PAGNodeId>,
        next: usize,
    }

    let n = pag.num_nodes();
    let mut ranks = vec![0u32; n];
    let mut state = vec![0u8; n]; // 0 unvisited, 1 on stack, 2 finished
    let mut finished = 0u32;

    let successors = |node: PAGNodeId| -> Vec<PAGNodeId> {
        pag.out_edges(node, PAGEdgeKind::Simple)
            .map(|e| pag.edge_ends(e).1)
            .collect()
    };

    for root in pag.node_indices() {
        if state[root.index()] != 0 {
            continue;
        }
        state[root.index()] = 1;
        let mut stack = vec![Frame {
            node: root,
            succs: successors(root),
            next: 0,
        }];
        while let Some(frame) = stack.last_mut() {
            if frame.next < frame.succs.len() {
                let child = frame.succs[frame.next];
                frame.next += 1;
                if state[child.index()] == 0 {
                    state[child.index()] = 1;
                    stack.push(Frame {
                        node: child,
                        succs: successors(child),
                        next: 0,
                    });
                }
            } else {
                state[frame.node.index()] = 2;
                finished += 1;
                ranks[frame.node.index()] = n as u32 - finished;
                stack.pop();
            }
        }
    }
    ranks
}
