// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use std::rc::Rc;

use crate::graph::pag::PAGNodeId;
use crate::ir::program::{CSMethodId, MethodId};
use crate::ir::statement::CallKind;

pub type BaseCallSite = BaseCallSiteS<MethodId>;
pub type CSBaseCallSite = BaseCallSiteS<CSMethodId>;

/// A call site, identified by the containing method and the statement index
/// of the invocation inside its body.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct BaseCallSiteS<F> {
    pub method: F,
    pub stmt: usize,
}

impl<F> BaseCallSiteS<F> {
    pub fn new(method: F, stmt: usize) -> Self {
        BaseCallSiteS { method, stmt }
    }
}

impl From<CSBaseCallSite> for BaseCallSite {
    fn from(callsite: CSBaseCallSite) -> Self {
        BaseCallSiteS {
            method: callsite.method.into(),
            stmt: callsite.stmt,
        }
    }
}

impl From<&CSBaseCallSite> for BaseCallSite {
    fn from(callsite: &CSBaseCallSite) -> Self {
        BaseCallSiteS {
            method: callsite.method.into(),
            stmt: callsite.stmt,
        }
    }
}

/// An invocation in the shape the call graph builder consumes. The operands
/// of the invoke expression are resolved to their base graph nodes when the
/// containing method graph is built; operands without a node (primitives,
/// null literals) are kept as `None` so argument positions stay aligned with
/// the callee's parameter list.
#[derive(Clone, Debug)]
pub struct CallSite {
    pub callsite: BaseCallSite,
    pub kind: CallKind,
    /// The statically named target.
    pub callee: MethodId,
    pub receiver: Option<PAGNodeId>,
    pub args: Rc<Vec<Option<PAGNodeId>>>,
    pub dest: Option<PAGNodeId>,
}

impl CallSite {
    pub fn new(
        callsite: BaseCallSite,
        kind: CallKind,
        callee: MethodId,
        receiver: Option<PAGNodeId>,
        args: Vec<Option<PAGNodeId>>,
        dest: Option<PAGNodeId>,
    ) -> Self {
        CallSite {
            callsite,
            kind,
            callee,
            receiver,
            args: Rc::new(args),
            dest,
        }
    }

    /// Whether this site is resolved against the receiver's points-to set.
    /// Special calls have a statically known target but still take their
    /// calling context from the receiver object.
    pub fn is_dispatched(&self) -> bool {
        self.receiver.is_some()
    }
}

impl From<Rc<CallSite>> for BaseCallSite {
    fn from(callsite: Rc<CallSite>) -> Self {
        callsite.callsite
    }
}

impl From<&Rc<CallSite>> for BaseCallSite {
    fn from(callsite: &Rc<CallSite>) -> Self {
        callsite.callsite
    }
}
