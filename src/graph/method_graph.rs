// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Per-method assignment summaries.
//!
//! A method body is translated exactly once, into a log of assignment pairs
//! between context-free PAG nodes plus the metadata a context-sensitive
//! analysis needs per call: the invocation sites and the classes whose
//! initializers the body triggers. Splicing the summary into the PAG under
//! a concrete context replays the pair log through a cursor.

use std::rc::Rc;

use crate::graph::pag::PAGNodeId;
use crate::ir::call_site::CallSite;
use crate::ir::program::{MethodId, TypeId};
use crate::util::chunked_queue::{ChunkedQueue, QueueReader};

pub struct MethodGraph {
    method: MethodId,
    /// Assignments between context-free nodes, in body order.
    internal_edges: ChunkedQueue<(PAGNodeId, PAGNodeId)>,
    /// Cursor positioned at the start of the log; handed out by copy.
    internal_reader: QueueReader<(PAGNodeId, PAGNodeId)>,
    invoke_sites: Vec<Rc<CallSite>>,
    clinit_classes: Vec<TypeId>,
}

impl MethodGraph {
    pub fn new(method: MethodId) -> Self {
        let internal_edges = ChunkedQueue::new();
        let internal_reader = internal_edges.reader();
        MethodGraph {
            method,
            internal_edges,
            internal_reader,
            invoke_sites: Vec::new(),
            clinit_classes: Vec::new(),
        }
    }

    #[inline]
    pub fn method(&self) -> MethodId {
        self.method
    }

    pub fn add_internal_edge(&mut self, src: PAGNodeId, dst: PAGNodeId) {
        self.internal_edges.push((src, dst));
    }

    /// A cursor over the whole pair log. Each splice consumes its own copy.
    pub fn internal_edge_iter(&self) -> QueueReader<(PAGNodeId, PAGNodeId)> {
        self.internal_reader
    }

    pub fn add_invoke_site(&mut self, site: Rc<CallSite>) {
        self.invoke_sites.push(site);
    }

    pub fn invoke_sites(&self) -> &[Rc<CallSite>] {
        &self.invoke_sites
    }

    pub fn add_clinit_class(&mut self, class: TypeId) {
        if !self.clinit_classes.contains(&class) {
            self.clinit_classes.push(class);
        }
    }

    pub fn clinit_classes(&self) -> &[TypeId] {
        &self.clinit_classes
    }
}
