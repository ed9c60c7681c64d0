// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! The pointer assignment graph (PAG).
//!
//! One arena holds every node the analysis ever talks about: abstract
//! objects, variables, field dereferences, object field slots, and their
//! context-qualified versions. Nodes are interned, so structural identity
//! and node identity coincide. Edges come in four kinds; `add_edge` infers
//! the kind from its endpoints, which is what lets method graphs record
//! plain node pairs and replay them under any context.

use log::*;
use petgraph::graph::{DefaultIx, EdgeIndex, NodeIndex};
use petgraph::Graph;
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};

use crate::builder::method_graph_builder::MethodGraphBuilder;
use crate::graph::method_graph::MethodGraph;
use crate::ir::analysis_context::AnalysisContext;
use crate::ir::context::ContextId;
use crate::ir::program::{AllocId, FieldId, LocalId, MethodId, StringId, TypeId};
use crate::util::bit_vec::Idx;
use crate::util::chunked_queue::{self, ChunkedQueue};

// Unique identifiers for graph nodes and edges.
pub type PAGNodeId = NodeIndex<DefaultIx>;
pub type PAGEdgeId = EdgeIndex<DefaultIx>;

impl Idx for PAGNodeId {
    #[inline]
    fn new(idx: usize) -> Self {
        NodeIndex::new(idx)
    }

    #[inline]
    fn index(self) -> usize {
        self.index()
    }
}

/// A pointer variable inside one method.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum LocalKey {
    Var(LocalId),
    This,
    /// Zero-based declared parameter position, the receiver excluded.
    Param(u32),
    /// The value the method returns.
    Ret,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct LocalVarKey {
    pub method: MethodId,
    pub which: LocalKey,
}

impl LocalVarKey {
    pub fn new(method: MethodId, which: LocalKey) -> Self {
        LocalVarKey { method, which }
    }
}

/// A pointer variable not owned by any method.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum GlobalKey {
    StaticField(FieldId),
    /// All instance accesses of one field under `--field-based`.
    FieldPool(FieldId),
    /// All array element accesses under `--field-based`.
    ArrayElemPool,
    /// The single variable every local collapses into under `--rta`.
    Unified,
    /// Receives every thrown value.
    Throw,
    /// Holds the shared canonical path string.
    CanonicalPath,
    /// Holds one string literal. Lets a constant appear wherever a variable
    /// is expected without a per-use temporary.
    StringLit(StringId),
    /// Holds the class literal of the named type.
    ClassLit(TypeId),
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum SpecialAlloc {
    /// The object the synthetic entry method runs on.
    Root,
    /// The string returned by filesystem canonicalization.
    CanonicalPath,
}

/// An abstract heap object.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum AllocKey {
    Site(AllocId),
    /// All sites allocating one type under `--types-for-sites`.
    TypeSite(TypeId),
    /// All string constants merged into one object (the default).
    StringPool,
    StringConst(StringId),
    /// The class literal of the named type.
    ClassConst(TypeId),
    Special(SpecialAlloc),
}

/// A field as the PAG sees it; all indices of an array collapse into one
/// element pseudo-field.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum PagField {
    Instance(FieldId),
    ArrayElement,
}

/// Interning key of a PAG node. Derived nodes embed the node id of their
/// base, so a context-qualified base yields a distinct derived node.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum NodeKey {
    Alloc(AllocKey),
    GlobalVar(GlobalKey),
    LocalVar(LocalVarKey),
    /// A field dereference `base.f` of a variable node.
    FieldRef { base: PAGNodeId, field: PagField },
    /// The field slot `o.f` of an abstract object node.
    AllocDotField { base: PAGNodeId, field: PagField },
    ContextVar { cid: ContextId, base: PAGNodeId },
    ContextAlloc { cid: ContextId, base: PAGNodeId },
}

impl NodeKey {
    /// Abstract objects: sources of points-to facts.
    #[inline]
    pub fn is_alloc(&self) -> bool {
        matches!(self, NodeKey::Alloc(_) | NodeKey::ContextAlloc { .. })
    }

    /// Pointer variables: the nodes that carry points-to sets.
    #[inline]
    pub fn is_var(&self) -> bool {
        matches!(
            self,
            NodeKey::GlobalVar(_) | NodeKey::LocalVar(_) | NodeKey::ContextVar { .. }
        )
    }

    #[inline]
    pub fn is_field_ref(&self) -> bool {
        matches!(self, NodeKey::FieldRef { .. })
    }

    #[inline]
    pub fn is_alloc_dot_field(&self) -> bool {
        matches!(self, NodeKey::AllocDotField { .. })
    }
}

#[derive(Debug)]
pub struct PAGNode {
    key: NodeKey,
    /// Declared type for variables, allocated type for objects.
    ty: TypeId,
}

impl PAGNode {
    pub fn new(key: NodeKey, ty: TypeId) -> Self {
        PAGNode { key, ty }
    }

    #[inline]
    pub fn key(&self) -> NodeKey {
        self.key
    }

    #[inline]
    pub fn node_type(&self) -> TypeId {
        self.ty
    }
}

#[derive(Debug)]
pub struct PAGEdge {
    pub kind: PAGEdgeKind,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PAGEdgeKind {
    /// Object creation flowing into a variable.
    Alloc,
    /// Direct assignment between two variables.
    Simple,
    /// Assignment of a variable into a field dereference.
    Store,
    /// Assignment of a field dereference into a variable.
    Load,
}

type EdgeMap = HashMap<PAGNodeId, BTreeSet<PAGEdgeId>>;

pub struct PAG {
    /// The graph structure capturing assignment relations between nodes.
    pub(crate) graph: Graph<PAGNode, PAGEdge>,
    /// A map from interning keys to node ids.
    pub(crate) values: HashMap<NodeKey, PAGNodeId>,
    /// Union-find table. A node is its own replacement until merged away.
    replacements: Vec<PAGNodeId>,
    /// Field dereference nodes hanging off each variable node.
    field_refs_of: HashMap<PAGNodeId, Vec<PAGNodeId>>,
    /// Field slots materialized under each abstract object.
    fields_of: HashMap<PAGNodeId, Vec<PAGNodeId>>,
    /// Per-method graphs, translated on demand when a method first
    /// becomes reachable.
    method_graphs: HashMap<MethodId, MethodGraph>,

    // Iterated by the solver. Newly added edges of each kind queue up here
    // so constraints they induce can be activated incrementally.
    pub(crate) alloc_edges_queue: ChunkedQueue<PAGEdgeId>,
    pub(crate) simple_edges_queue: ChunkedQueue<PAGEdgeId>,
    pub(crate) store_edges_queue: ChunkedQueue<PAGEdgeId>,
    pub(crate) load_edges_queue: ChunkedQueue<PAGEdgeId>,

    alloc_in_edges: EdgeMap,
    alloc_out_edges: EdgeMap,
    simple_in_edges: EdgeMap,
    simple_out_edges: EdgeMap,
    store_in_edges: EdgeMap,
    store_out_edges: EdgeMap,
    load_in_edges: EdgeMap,
    load_out_edges: EdgeMap,
}

impl PAG {
    pub fn new() -> Self {
        PAG {
            graph: Graph::<PAGNode, PAGEdge>::new(),
            values: HashMap::new(),
            replacements: Vec::new(),
            field_refs_of: HashMap::new(),
            fields_of: HashMap::new(),
            method_graphs: HashMap::new(),
            alloc_edges_queue: ChunkedQueue::new(),
            simple_edges_queue: ChunkedQueue::new(),
            store_edges_queue: ChunkedQueue::new(),
            load_edges_queue: ChunkedQueue::new(),
            alloc_in_edges: EdgeMap::new(),
            alloc_out_edges: EdgeMap::new(),
            simple_in_edges: EdgeMap::new(),
            simple_out_edges: EdgeMap::new(),
            store_in_edges: EdgeMap::new(),
            store_out_edges: EdgeMap::new(),
            load_in_edges: EdgeMap::new(),
            load_out_edges: EdgeMap::new(),
        }
    }

    /// Returns a reference to the pag graph.
    #[inline]
    pub fn graph(&self) -> &Graph<PAGNode, PAGEdge> {
        &self.graph
    }

    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.graph.node_count()
    }

    #[inline]
    pub fn num_edges(&self) -> usize {
        self.graph.edge_count()
    }

    /// Translates the body of `method` into its method graph, if that has
    /// not happened yet. Returns false for methods without a body.
    pub fn build_method_graph(&mut self, acx: &AnalysisContext, method: MethodId) -> bool {
        if self.method_graphs.contains_key(&method) {
            return true;
        }
        if acx.program.method_data(method).body.is_none()
            && !MethodGraphBuilder::models_method(acx, method)
        {
            trace!("Skipping bodyless method {}", acx.method_name(method));
            return false;
        }
        let mgraph = MethodGraphBuilder::new(acx, method).build(self);
        self.method_graphs.insert(method, mgraph);
        true
    }

    pub fn get_method_graph(&self, method: &MethodId) -> Option<&MethodGraph> {
        self.method_graphs.get(method)
    }

    pub fn node_indices(&self) -> petgraph::graph::NodeIndices {
        self.graph.node_indices()
    }

    /// Returns the node for the given node_id.
    pub fn get_node(&self, node_id: PAGNodeId) -> &PAGNode {
        self.graph.node_weight(node_id).unwrap()
    }

    #[inline]
    pub fn node_key(&self, node_id: PAGNodeId) -> NodeKey {
        self.get_node(node_id).key
    }

    #[inline]
    pub fn node_type(&self, node_id: PAGNodeId) -> TypeId {
        self.get_node(node_id).ty
    }

    /// Returns the node_id interned for the given key.
    pub fn get_node_id(&self, key: &NodeKey) -> Option<PAGNodeId> {
        self.values.get(key).copied()
    }

    /// Returns the edge for the given edge_id.
    pub fn get_edge(&self, edge_id: PAGEdgeId) -> &PAGEdge {
        self.graph.edge_weight(edge_id).unwrap()
    }

    pub fn edge_ends(&self, edge_id: PAGEdgeId) -> (PAGNodeId, PAGNodeId) {
        self.graph.edge_endpoints(edge_id).unwrap()
    }

    /// The representative of `id`, compressing the lookup path.
    pub fn get_replacement(&mut self, id: PAGNodeId) -> PAGNodeId {
        let mut root = id;
        while self.replacements[root.index()] != root {
            root = self.replacements[root.index()];
        }
        let mut cur = id;
        while cur != root {
            let next = self.replacements[cur.index()];
            self.replacements[cur.index()] = root;
            cur = next;
        }
        root
    }

    /// The representative of `id` without path compression.
    pub fn find(&self, mut id: PAGNodeId) -> PAGNodeId {
        while self.replacements[id.index()] != id {
            id = self.replacements[id.index()];
        }
        id
    }

    #[inline]
    pub fn is_merged_away(&self, id: PAGNodeId) -> bool {
        self.replacements[id.index()] != id
    }

    /// Merges `other` into `host`. Afterwards both ids resolve to the same
    /// representative, and the absorbed node's adjacency and derived-node
    /// lists hang off the representative; the caller is responsible for
    /// unioning their points-to sets. Returns the representative.
    pub fn merge_nodes(&mut self, host: PAGNodeId, other: PAGNodeId) -> PAGNodeId {
        let host = self.get_replacement(host);
        let other = self.get_replacement(other);
        if host == other {
            return host;
        }
        self.replacements[other.index()] = host;
        if let Some(mut refs) = self.field_refs_of.remove(&other) {
            self.field_refs_of.entry(host).or_default().append(&mut refs);
        }
        if let Some(mut fields) = self.fields_of.remove(&other) {
            self.fields_of.entry(host).or_default().append(&mut fields);
        }
        for map in [
            &mut self.alloc_in_edges,
            &mut self.alloc_out_edges,
            &mut self.simple_in_edges,
            &mut self.simple_out_edges,
            &mut self.store_in_edges,
            &mut self.store_out_edges,
            &mut self.load_in_edges,
            &mut self.load_out_edges,
        ] {
            if let Some(edges) = map.remove(&other) {
                map.entry(host).or_default().extend(edges);
            }
        }
        host
    }

    fn intern_node(&mut self, key: NodeKey, ty: TypeId) -> PAGNodeId {
        match self.values.entry(key) {
            Entry::Occupied(o) => *o.get(),
            Entry::Vacant(v) => {
                let node_id = self.graph.add_node(PAGNode::new(key, ty));
                self.replacements.push(node_id);
                *v.insert(node_id)
            }
        }
    }

    /// Interns the variable node of a method-local pointer. Under `--rta`
    /// every local collapses into the single unified variable.
    pub fn get_or_insert_local_var(
        &mut self,
        acx: &AnalysisContext,
        key: LocalVarKey,
    ) -> PAGNodeId {
        if acx.options.rta {
            return self.get_or_insert_global_var(acx, GlobalKey::Unified);
        }
        let ty = local_var_type(acx, key);
        self.intern_node(NodeKey::LocalVar(key), ty)
    }

    pub fn get_or_insert_global_var(&mut self, acx: &AnalysisContext, key: GlobalKey) -> PAGNodeId {
        let wk = &acx.program.well_known;
        let ty = match key {
            GlobalKey::StaticField(f) | GlobalKey::FieldPool(f) => acx.program.field_data(f).ty,
            GlobalKey::ArrayElemPool | GlobalKey::Unified => wk.object,
            GlobalKey::Throw => wk.throwable.unwrap_or(wk.object),
            GlobalKey::CanonicalPath | GlobalKey::StringLit(_) => wk.string.unwrap_or(wk.object),
            GlobalKey::ClassLit(_) => wk.class.unwrap_or(wk.object),
        };
        self.intern_node(NodeKey::GlobalVar(key), ty)
    }

    /// Interns the abstract object of an allocation. Merging options rewrite
    /// the key: `--types-for-sites` folds sites into their type, and string
    /// constants share one pool object unless `--string-constants` is on.
    pub fn get_or_insert_alloc(&mut self, acx: &AnalysisContext, key: AllocKey) -> PAGNodeId {
        let key = match key {
            AllocKey::Site(site) if acx.options.types_for_sites => {
                AllocKey::TypeSite(acx.program.alloc_site(site).ty)
            }
            AllocKey::StringConst(_) if !acx.options.string_constants => AllocKey::StringPool,
            k => k,
        };
        let ty = alloc_type(acx, key);
        if let Some(&id) = self.values.get(&NodeKey::Alloc(key)) {
            let present = self.graph[id].ty;
            if present != ty {
                panic!(
                    "allocation node {:?} registered with type {}, but is already present with type {}",
                    key,
                    acx.type_name(ty),
                    acx.type_name(present)
                );
            }
            return id;
        }
        self.intern_node(NodeKey::Alloc(key), ty)
    }

    /// Interns the field dereference node `base.field`. Under `--field-based`
    /// field accesses collapse into per-field global variables instead, which
    /// turns the surrounding stores and loads into simple edges.
    pub fn get_or_insert_field_ref(
        &mut self,
        acx: &AnalysisContext,
        base: PAGNodeId,
        field: PagField,
    ) -> PAGNodeId {
        if acx.options.field_based {
            let key = match field {
                PagField::Instance(f) => GlobalKey::FieldPool(f),
                PagField::ArrayElement => GlobalKey::ArrayElemPool,
            };
            return self.get_or_insert_global_var(acx, key);
        }
        let base = self.get_replacement(base);
        debug_assert!(self.graph[base].key.is_var(), "field ref off {:?}", base);
        let key = NodeKey::FieldRef { base, field };
        if let Some(&id) = self.values.get(&key) {
            return id;
        }
        let ty = pag_field_type(acx, field);
        let id = self.intern_node(key, ty);
        self.field_refs_of.entry(base).or_default().push(id);
        id
    }

    /// Interns the field slot `base.field` of an abstract object.
    pub fn get_or_insert_alloc_dot_field(
        &mut self,
        acx: &AnalysisContext,
        base: PAGNodeId,
        field: PagField,
    ) -> PAGNodeId {
        let base = self.get_replacement(base);
        debug_assert!(self.graph[base].key.is_alloc(), "field slot off {:?}", base);
        let key = NodeKey::AllocDotField { base, field };
        if let Some(&id) = self.values.get(&key) {
            return id;
        }
        let ty = pag_field_type(acx, field);
        let id = self.intern_node(key, ty);
        self.fields_of.entry(base).or_default().push(id);
        id
    }

    /// Interns the context-qualified version of a local variable node.
    pub fn get_or_insert_context_var(&mut self, cid: ContextId, base: PAGNodeId) -> PAGNodeId {
        let base = self.get_replacement(base);
        debug_assert!(
            matches!(self.graph[base].key, NodeKey::LocalVar(_)),
            "cannot context-qualify {:?}",
            self.graph[base].key
        );
        let ty = self.graph[base].ty;
        self.intern_node(NodeKey::ContextVar { cid, base }, ty)
    }

    /// Interns the heap-context-qualified version of an allocation node.
    pub fn get_or_insert_context_alloc(&mut self, cid: ContextId, base: PAGNodeId) -> PAGNodeId {
        let base = self.get_replacement(base);
        debug_assert!(
            matches!(self.graph[base].key, NodeKey::Alloc(_)),
            "cannot heap-qualify {:?}",
            self.graph[base].key
        );
        let ty = self.graph[base].ty;
        self.intern_node(NodeKey::ContextAlloc { cid, base }, ty)
    }

    /// The context-free node underneath any chain of context wrappers.
    pub fn base_node(&self, id: PAGNodeId) -> PAGNodeId {
        match self.graph[id].key {
            NodeKey::ContextVar { base, .. } | NodeKey::ContextAlloc { base, .. } => base,
            _ => id,
        }
    }

    /// Whether `id` is an object nobody may write into, such as an interned
    /// string. Stores into constant objects are dropped.
    pub fn is_constant_alloc(&self, id: PAGNodeId) -> bool {
        match self.graph[id].key {
            NodeKey::Alloc(key) => matches!(
                key,
                AllocKey::StringPool
                    | AllocKey::StringConst(_)
                    | AllocKey::ClassConst(_)
                    | AllocKey::Special(SpecialAlloc::CanonicalPath)
            ),
            NodeKey::ContextAlloc { base, .. } => self.is_constant_alloc(base),
            _ => false,
        }
    }

    pub fn field_refs_of(&self, var: PAGNodeId) -> &[PAGNodeId] {
        self.field_refs_of.get(&var).map_or(&[], |v| v.as_slice())
    }

    pub fn fields_of(&self, alloc: PAGNodeId) -> &[PAGNodeId] {
        self.fields_of.get(&alloc).map_or(&[], |v| v.as_slice())
    }

    /// Returns true if the edge from `src` to `dst` of the `kind` exists.
    pub fn contains_edge(&self, src: PAGNodeId, dst: PAGNodeId, kind: PAGEdgeKind) -> bool {
        for edge in self.graph.edges_connecting(src, dst) {
            if edge.weight().kind == kind {
                return true;
            }
        }
        false
    }

    /// Adds the edge for an assignment from `src` to `dst`, inferring the
    /// edge kind from the endpoint node kinds. Allocation edges are subject
    /// to a declared-type filter: an object that could never be stored in
    /// the destination variable is dropped here once instead of being
    /// filtered on every propagation.
    ///
    /// Returns the edge id if this edge is newly added to the graph.
    pub fn add_edge(
        &mut self,
        acx: &AnalysisContext,
        src: PAGNodeId,
        dst: PAGNodeId,
    ) -> Option<PAGEdgeId> {
        let src = self.get_replacement(src);
        let dst = self.get_replacement(dst);
        let src_key = self.graph[src].key;
        let dst_key = self.graph[dst].key;
        if src_key.is_alloc() && dst_key.is_var() {
            let obj_ty = self.graph[src].ty;
            let var_ty = self.graph[dst].ty;
            if !acx.can_store_type(obj_ty, var_ty) {
                trace!(
                    "dropping alloc edge {:?} -> {:?} failing the type filter",
                    src_key,
                    dst_key
                );
                return None;
            }
            self.add_alloc_edge(src, dst)
        } else if src_key.is_var() && dst_key.is_var() {
            let edge_id = self.add_simple_edge(src, dst);
            if acx.options.bidirectional_simple_edges {
                self.add_simple_edge(dst, src);
            }
            edge_id
        } else if src_key.is_var() && dst_key.is_field_ref() {
            self.add_store_edge(src, dst)
        } else if src_key.is_field_ref() && dst_key.is_var() {
            self.add_load_edge(src, dst)
        } else {
            panic!(
                "malformed assignment from {:?} to {:?} reached the graph",
                src_key, dst_key
            );
        }
    }

    pub fn add_alloc_edge(&mut self, src: PAGNodeId, dst: PAGNodeId) -> Option<PAGEdgeId> {
        if self.contains_edge(src, dst, PAGEdgeKind::Alloc) {
            return None;
        }
        let edge_id = self.graph.add_edge(
            src,
            dst,
            PAGEdge {
                kind: PAGEdgeKind::Alloc,
            },
        );
        self.alloc_edges_queue.push(edge_id);
        self.alloc_out_edges.entry(src).or_default().insert(edge_id);
        self.alloc_in_edges.entry(dst).or_default().insert(edge_id);
        Some(edge_id)
    }

    pub fn add_simple_edge(&mut self, src: PAGNodeId, dst: PAGNodeId) -> Option<PAGEdgeId> {
        if src == dst || self.contains_edge(src, dst, PAGEdgeKind::Simple) {
            return None;
        }
        let edge_id = self.graph.add_edge(
            src,
            dst,
            PAGEdge {
                kind: PAGEdgeKind::Simple,
            },
        );
        self.simple_edges_queue.push(edge_id);
        self.simple_out_edges.entry(src).or_default().insert(edge_id);
        self.simple_in_edges.entry(dst).or_default().insert(edge_id);
        Some(edge_id)
    }

    pub fn add_store_edge(&mut self, src: PAGNodeId, dst: PAGNodeId) -> Option<PAGEdgeId> {
        if self.contains_edge(src, dst, PAGEdgeKind::Store) {
            return None;
        }
        let edge_id = self.graph.add_edge(
            src,
            dst,
            PAGEdge {
                kind: PAGEdgeKind::Store,
            },
        );
        self.store_edges_queue.push(edge_id);
        self.store_out_edges.entry(src).or_default().insert(edge_id);
        self.store_in_edges.entry(dst).or_default().insert(edge_id);
        Some(edge_id)
    }

    pub fn add_load_edge(&mut self, src: PAGNodeId, dst: PAGNodeId) -> Option<PAGEdgeId> {
        if self.contains_edge(src, dst, PAGEdgeKind::Load) {
            return None;
        }
        let edge_id = self.graph.add_edge(
            src,
            dst,
            PAGEdge {
                kind: PAGEdgeKind::Load,
            },
        );
        self.load_edges_queue.push(edge_id);
        self.load_out_edges.entry(src).or_default().insert(edge_id);
        self.load_in_edges.entry(dst).or_default().insert(edge_id);
        Some(edge_id)
    }

    /// A resumable cursor over all allocation edges ever added.
    pub fn alloc_edge_iter(&self) -> chunked_queue::QueueReader<PAGEdgeId> {
        self.alloc_edges_queue.reader()
    }

    pub fn simple_edge_iter(&self) -> chunked_queue::QueueReader<PAGEdgeId> {
        self.simple_edges_queue.reader()
    }

    pub fn store_edge_iter(&self) -> chunked_queue::QueueReader<PAGEdgeId> {
        self.store_edges_queue.reader()
    }

    pub fn load_edge_iter(&self) -> chunked_queue::QueueReader<PAGEdgeId> {
        self.load_edges_queue.reader()
    }

    pub fn out_edges(
        &self,
        node: PAGNodeId,
        kind: PAGEdgeKind,
    ) -> impl Iterator<Item = PAGEdgeId> + '_ {
        let map = match kind {
            PAGEdgeKind::Alloc => &self.alloc_out_edges,
            PAGEdgeKind::Simple => &self.simple_out_edges,
            PAGEdgeKind::Store => &self.store_out_edges,
            PAGEdgeKind::Load => &self.load_out_edges,
        };
        map.get(&node).into_iter().flatten().copied()
    }

    pub fn in_edges(
        &self,
        node: PAGNodeId,
        kind: PAGEdgeKind,
    ) -> impl Iterator<Item = PAGEdgeId> + '_ {
        let map = match kind {
            PAGEdgeKind::Alloc => &self.alloc_in_edges,
            PAGEdgeKind::Simple => &self.simple_in_edges,
            PAGEdgeKind::Store => &self.store_in_edges,
            PAGEdgeKind::Load => &self.load_in_edges,
        };
        map.get(&node).into_iter().flatten().copied()
    }
}

impl Default for PAG {
    fn default() -> Self {
        Self::new()
    }
}

fn local_var_type(acx: &AnalysisContext, key: LocalVarKey) -> TypeId {
    let data = acx.program.method_data(key.method);
    let wk = &acx.program.well_known;
    match key.which {
        LocalKey::Var(l) => data
            .body
            .as_ref()
            .map_or(wk.object, |b| b.local_types[l.index()]),
        // Static methods still get a `this` variable (the static-context
        // `this` mode dispatches static calls through it); it is typed as
        // the root object type so any receiver object can flow in.
        LocalKey::This => {
            if data.is_static {
                wk.object
            } else {
                data.declaring_class
            }
        }
        LocalKey::Param(i) => data
            .param_types
            .get(i as usize)
            .copied()
            .unwrap_or(wk.object),
        LocalKey::Ret => data.ret_type.unwrap_or(wk.object),
    }
}

fn alloc_type(acx: &AnalysisContext, key: AllocKey) -> TypeId {
    let wk = &acx.program.well_known;
    match key {
        AllocKey::Site(site) => acx.program.alloc_site(site).ty,
        AllocKey::TypeSite(ty) => ty,
        AllocKey::StringPool | AllocKey::StringConst(_) => wk.string.unwrap_or(wk.object),
        AllocKey::ClassConst(_) => wk.class.unwrap_or(wk.object),
        AllocKey::Special(SpecialAlloc::Root) => wk.object,
        AllocKey::Special(SpecialAlloc::CanonicalPath) => wk.string.unwrap_or(wk.object),
    }
}

fn pag_field_type(acx: &AnalysisContext, field: PagField) -> TypeId {
    match field {
        PagField::Instance(f) => acx.program.field_data(f).ty,
        // Array element types vary per array object.
        PagField::ArrayElement => acx.program.well_known.object,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::testing::ProgramBuilder;
    use crate::util::options::AnalysisOptions;

    fn small_acx(options: AnalysisOptions) -> AnalysisContext {
        let mut b = ProgramBuilder::new();
        let a = b.class("A", None);
        let c = b.class("C", Some(a));
        let unrelated = b.class("B", None);
        let main = b.main_method(a);
        b.set_body(main, &[a, c, unrelated], vec![]);
        b.alloc(main, c);
        b.alloc(main, unrelated);
        b.field(a, "f", a, false);
        AnalysisContext::new(b.finish(Some(main)), options).unwrap()
    }

    fn local_key(method: MethodId, n: usize) -> LocalVarKey {
        LocalVarKey::new(method, LocalKey::Var(LocalId::new(n)))
    }

    #[test]
    fn nodes_are_interned_by_key() {
        let acx = small_acx(AnalysisOptions::default());
        let main = acx.entries[0];
        let mut pag = PAG::new();
        let v1 = pag.get_or_insert_local_var(&acx, local_key(main, 0));
        let v2 = pag.get_or_insert_local_var(&acx, local_key(main, 0));
        let v3 = pag.get_or_insert_local_var(&acx, local_key(main, 1));
        assert_eq!(v1, v2);
        assert_ne!(v1, v3);

        let o1 = pag.get_or_insert_alloc(&acx, AllocKey::Site(AllocId::new(0)));
        let o2 = pag.get_or_insert_alloc(&acx, AllocKey::Site(AllocId::new(0)));
        assert_eq!(o1, o2);
        assert_eq!(pag.num_nodes(), 3);
    }

    #[test]
    fn edge_kinds_follow_from_endpoints() {
        let acx = small_acx(AnalysisOptions::default());
        let main = acx.entries[0];
        let mut pag = PAG::new();
        let x = pag.get_or_insert_local_var(&acx, local_key(main, 0));
        let y = pag.get_or_insert_local_var(&acx, local_key(main, 1));
        let o = pag.get_or_insert_alloc(&acx, AllocKey::Site(AllocId::new(0)));
        let fr = pag.get_or_insert_field_ref(&acx, x, PagField::Instance(FieldId::new(0)));

        let e1 = pag.add_edge(&acx, o, y).unwrap();
        assert_eq!(pag.get_edge(e1).kind, PAGEdgeKind::Alloc);
        let e2 = pag.add_edge(&acx, y, x).unwrap();
        assert_eq!(pag.get_edge(e2).kind, PAGEdgeKind::Simple);
        let e3 = pag.add_edge(&acx, y, fr).unwrap();
        assert_eq!(pag.get_edge(e3).kind, PAGEdgeKind::Store);
        let e4 = pag.add_edge(&acx, fr, y).unwrap();
        assert_eq!(pag.get_edge(e4).kind, PAGEdgeKind::Load);

        // Re-adding is a no-op per kind and stays out of the new-edge queues.
        let mut reader = pag.simple_edge_iter();
        assert_eq!(reader.next(), Some(e2));
        assert_eq!(reader.next(), None);
        assert!(pag.add_edge(&acx, y, x).is_none());
        assert_eq!(reader.next(), None);
        assert_eq!(pag.num_edges(), 4);
    }

    #[test]
    fn alloc_edges_respect_the_declared_type() {
        let acx = small_acx(AnalysisOptions::default());
        let main = acx.entries[0];
        let mut pag = PAG::new();
        // local 0 is declared `A`; alloc 0 is a `C` (subtype), alloc 1 a `B`.
        let a_var = pag.get_or_insert_local_var(&acx, local_key(main, 0));
        let c_obj = pag.get_or_insert_alloc(&acx, AllocKey::Site(AllocId::new(0)));
        let b_obj = pag.get_or_insert_alloc(&acx, AllocKey::Site(AllocId::new(1)));

        assert!(pag.add_edge(&acx, c_obj, a_var).is_some());
        assert!(pag.add_edge(&acx, b_obj, a_var).is_none());
    }

    #[test]
    fn types_for_sites_folds_allocations_by_type() {
        let acx = small_acx(AnalysisOptions {
            types_for_sites: true,
            ..Default::default()
        });
        let mut pag = PAG::new();
        let o1 = pag.get_or_insert_alloc(&acx, AllocKey::Site(AllocId::new(0)));
        let o2 = pag.get_or_insert_alloc(&acx, AllocKey::Site(AllocId::new(0)));
        assert_eq!(o1, o2);
        assert!(matches!(
            pag.node_key(o1),
            NodeKey::Alloc(AllocKey::TypeSite(_))
        ));
    }

    #[test]
    fn string_constants_share_a_pool_by_default() {
        let acx = small_acx(AnalysisOptions::default());
        let mut pag = PAG::new();
        let s1 = pag.get_or_insert_alloc(&acx, AllocKey::StringConst(StringId::new(0)));
        let s2 = pag.get_or_insert_alloc(&acx, AllocKey::StringConst(StringId::new(1)));
        assert_eq!(s1, s2);
        assert!(pag.is_constant_alloc(s1));

        let acx = small_acx(AnalysisOptions {
            string_constants: true,
            ..Default::default()
        });
        let mut pag = PAG::new();
        let s1 = pag.get_or_insert_alloc(&acx, AllocKey::StringConst(StringId::new(0)));
        let s2 = pag.get_or_insert_alloc(&acx, AllocKey::StringConst(StringId::new(1)));
        assert_ne!(s1, s2);
    }

    #[test]
    fn field_based_collapses_field_refs_into_globals() {
        let acx = small_acx(AnalysisOptions {
            field_based: true,
            ..Default::default()
        });
        let main = acx.entries[0];
        let mut pag = PAG::new();
        let x = pag.get_or_insert_local_var(&acx, local_key(main, 0));
        let y = pag.get_or_insert_local_var(&acx, local_key(main, 1));
        let f = FieldId::new(0);
        let fr_x = pag.get_or_insert_field_ref(&acx, x, PagField::Instance(f));
        let fr_y = pag.get_or_insert_field_ref(&acx, y, PagField::Instance(f));
        assert_eq!(fr_x, fr_y);
        // The collapsed node is a variable, so stores become simple edges.
        let e = pag.add_edge(&acx, x, fr_x).unwrap();
        assert_eq!(pag.get_edge(e).kind, PAGEdgeKind::Simple);
    }

    #[test]
    fn rta_unifies_every_local() {
        let acx = small_acx(AnalysisOptions {
            rta: true,
            ..Default::default()
        });
        let main = acx.entries[0];
        let mut pag = PAG::new();
        let x = pag.get_or_insert_local_var(&acx, local_key(main, 0));
        let t = pag.get_or_insert_local_var(&acx, LocalVarKey::new(main, LocalKey::This));
        assert_eq!(x, t);
        assert!(matches!(
            pag.node_key(x),
            NodeKey::GlobalVar(GlobalKey::Unified)
        ));
    }

    #[test]
    fn context_wrappers_are_distinct_per_context() {
        let acx = small_acx(AnalysisOptions::default());
        let main = acx.entries[0];
        let mut pag = PAG::new();
        let base = pag.get_or_insert_local_var(&acx, LocalVarKey::new(main, LocalKey::This));
        let c0 = pag.get_or_insert_context_var(ContextId::new(0), base);
        let c1 = pag.get_or_insert_context_var(ContextId::new(1), base);
        assert_ne!(c0, c1);
        assert_eq!(pag.get_or_insert_context_var(ContextId::new(1), base), c1);
        assert_eq!(pag.base_node(c1), base);
        assert_eq!(pag.node_type(c1), pag.node_type(base));
    }

    #[test]
    fn merged_nodes_share_a_representative() {
        let acx = small_acx(AnalysisOptions::default());
        let main = acx.entries[0];
        let mut pag = PAG::new();
        let x = pag.get_or_insert_local_var(&acx, local_key(main, 0));
        let y = pag.get_or_insert_local_var(&acx, local_key(main, 1));
        let f = FieldId::new(0);
        let fr_y = pag.get_or_insert_field_ref(&acx, y, PagField::Instance(f));
        let o = pag.get_or_insert_alloc(&acx, AllocKey::Site(AllocId::new(0)));
        pag.add_edge(&acx, o, y).unwrap();

        let host = pag.merge_nodes(x, y);
        assert_eq!(host, pag.get_replacement(y));
        assert_eq!(host, pag.get_replacement(x));
        assert!(pag.is_merged_away(y) || pag.is_merged_away(x));
        // The merged-away node's field refs and edges now hang off the
        // representative.
        assert!(pag.field_refs_of(host).contains(&fr_y));
        assert_eq!(pag.in_edges(host, PAGEdgeKind::Alloc).count(), 1);
        // Self assignments collapse to nothing after a merge.
        assert!(pag.add_edge(&acx, x, y).is_none());

        // Same contract on the object side: slots of an absorbed object
        // hang off the representative, and new slot lookups through the
        // absorbed id land on the representative's key.
        let o2 = pag.get_or_insert_alloc(&acx, AllocKey::Site(AllocId::new(1)));
        let slot = pag.get_or_insert_alloc_dot_field(&acx, o2, PagField::Instance(f));
        let ohost = pag.merge_nodes(o, o2);
        assert!(pag.fields_of(ohost).contains(&slot));
        let relooked = pag.get_or_insert_alloc_dot_field(&acx, o2, PagField::Instance(f));
        assert_eq!(
            relooked,
            pag.get_or_insert_alloc_dot_field(&acx, o, PagField::Instance(f))
        );
    }
}
