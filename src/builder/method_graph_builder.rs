// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Translates one method body into its method graph.
//!
//! Each body is visited exactly once, context-free. Assignments lower to
//! pairs of base PAG nodes, invocations are recorded with their operands
//! pre-resolved to nodes, and string and class constants are lowered
//! through a per-literal global variable so that a constant can stand
//! wherever a variable is expected.

use log::*;
use std::rc::Rc;

use crate::graph::method_graph::MethodGraph;
use crate::graph::pag::{
    AllocKey, GlobalKey, LocalKey, LocalVarKey, PAGNodeId, PagField, SpecialAlloc, PAG,
};
use crate::ir::analysis_context::AnalysisContext;
use crate::ir::call_site::{BaseCallSite, CallSite};
use crate::ir::program::{LocalId, MethodId, TypeId, TypeKind};
use crate::ir::statement::{Body, CallKind, IdentityValue, InvokeExpr, Statement, Value};

/// A visitor that walks one method body and lowers every pointer-relevant
/// statement into the method's graph.
pub struct MethodGraphBuilder<'b> {
    acx: &'b AnalysisContext,
    method: MethodId,
    body: Option<&'b Body>,
    mgraph: MethodGraph,
}

impl<'b> MethodGraphBuilder<'b> {
    pub fn new(acx: &'b AnalysisContext, method: MethodId) -> Self {
        debug!("Building the method graph for {}", acx.method_name(method));
        let body = acx.program.method_data(method).body.as_ref();
        MethodGraphBuilder {
            acx,
            method,
            body,
            mgraph: MethodGraph::new(method),
        }
    }

    /// Whether a bodyless `method` carries modeled behavior and therefore
    /// still deserves a method graph.
    pub fn models_method(acx: &AnalysisContext, method: MethodId) -> bool {
        is_canonicalize(acx, method)
    }

    pub fn build(mut self, pag: &mut PAG) -> MethodGraph {
        if let Some(body) = self.body {
            for (index, stmt) in body.stmts.iter().enumerate() {
                match stmt {
                    Statement::Assign { lhs, rhs } => self.visit_assign(pag, lhs, rhs),
                    Statement::Identity { local, value } => {
                        self.visit_identity(pag, *local, *value)
                    }
                    Statement::Return { op } => self.visit_return(pag, op),
                    Statement::Throw { op } => self.visit_throw(pag, op),
                    Statement::Invoke { expr } => self.visit_invoke(pag, index, expr),
                }
            }
        }
        self.add_model_edges(pag);
        self.mgraph
    }

    fn visit_assign(&mut self, pag: &mut PAG, lhs: &Value, rhs: &Value) {
        // A phi fans each incoming value into the destination.
        if let Value::Phi(ops) = rhs {
            for op in ops {
                self.visit_assign(pag, lhs, op);
            }
            return;
        }
        let dst = match self.value_node(pag, lhs) {
            Some(n) => n,
            None => return,
        };
        let src = match self.value_node(pag, rhs) {
            Some(n) => n,
            None => return,
        };
        let src_key = pag.node_key(src);
        let dst_key = pag.node_key(dst);
        // The frontend flattens dereference chains, so a store must have a
        // plain variable source.
        let well_formed = if dst_key.is_var() {
            true
        } else if dst_key.is_field_ref() {
            src_key.is_var()
        } else {
            false
        };
        if !well_formed {
            warn!(
                "skipping a malformed assignment {:?} <- {:?} in {}",
                dst_key,
                src_key,
                self.acx.method_name(self.method)
            );
            return;
        }
        self.mgraph.add_internal_edge(src, dst);
    }

    fn visit_identity(&mut self, pag: &mut PAG, local: LocalId, value: IdentityValue) {
        let dst = match self.local_node(pag, local) {
            Some(n) => n,
            None => return,
        };
        let src = match value {
            IdentityValue::This => pag
                .get_or_insert_local_var(self.acx, LocalVarKey::new(self.method, LocalKey::This)),
            IdentityValue::Param(i) => {
                let data = self.acx.program.method_data(self.method);
                match data.param_types.get(i as usize) {
                    Some(&ty) if self.acx.is_ref_like(ty) => pag.get_or_insert_local_var(
                        self.acx,
                        LocalVarKey::new(self.method, LocalKey::Param(i)),
                    ),
                    _ => return,
                }
            }
            IdentityValue::CaughtException => {
                pag.get_or_insert_global_var(self.acx, GlobalKey::Throw)
            }
        };
        self.mgraph.add_internal_edge(src, dst);
    }

    fn visit_return(&mut self, pag: &mut PAG, op: &Value) {
        match self.acx.program.method_data(self.method).ret_type {
            Some(ty) if self.acx.is_ref_like(ty) => {}
            _ => return,
        }
        let src = match self.value_node(pag, op) {
            Some(n) => n,
            None => return,
        };
        let ret =
            pag.get_or_insert_local_var(self.acx, LocalVarKey::new(self.method, LocalKey::Ret));
        self.mgraph.add_internal_edge(src, ret);
    }

    fn visit_throw(&mut self, pag: &mut PAG, op: &Value) {
        let src = match self.value_node(pag, op) {
            Some(n) => n,
            None => return,
        };
        let throw = pag.get_or_insert_global_var(self.acx, GlobalKey::Throw);
        self.mgraph.add_internal_edge(src, throw);
    }

    fn visit_invoke(&mut self, pag: &mut PAG, index: usize, expr: &InvokeExpr) {
        if expr.kind == CallKind::Static {
            let class = self.acx.program.method_data(expr.callee).declaring_class;
            self.mgraph.add_clinit_class(class);
        }
        let receiver = expr.receiver.and_then(|l| self.local_node(pag, l));
        if expr.receiver.is_some() && receiver.is_none() {
            warn!(
                "an invocation in {} dereferences a primitive receiver; the site is dropped",
                self.acx.method_name(self.method)
            );
            return;
        }
        let args: Vec<Option<PAGNodeId>> = expr
            .args
            .iter()
            .map(|arg| self.value_node(pag, arg))
            .collect();
        let dest = expr.dest.and_then(|l| self.local_node(pag, l));
        let site = CallSite::new(
            BaseCallSite::new(self.method, index),
            expr.kind,
            expr.callee,
            receiver,
            args,
            dest,
        );
        self.mgraph.add_invoke_site(Rc::new(site));
    }

    /// Edges for modeled library behavior that no body shows.
    fn add_model_edges(&mut self, pag: &mut PAG) {
        if is_canonicalize(self.acx, self.method) {
            // Canonicalization returns the one shared path string.
            let alloc =
                pag.get_or_insert_alloc(self.acx, AllocKey::Special(SpecialAlloc::CanonicalPath));
            let var = pag.get_or_insert_global_var(self.acx, GlobalKey::CanonicalPath);
            pag.add_edge(self.acx, alloc, var);
            let ret =
                pag.get_or_insert_local_var(self.acx, LocalVarKey::new(self.method, LocalKey::Ret));
            self.mgraph.add_internal_edge(var, ret);
        }
    }

    /// Resolves a value to its context-free node. `None` means the value
    /// cannot hold a reference.
    fn value_node(&mut self, pag: &mut PAG, value: &Value) -> Option<PAGNodeId> {
        match value {
            Value::Local(l) => self.local_node(pag, *l),
            Value::StaticField(f) => {
                let data = self.acx.program.field_data(*f);
                self.mgraph.add_clinit_class(data.declaring_class);
                if !self.acx.is_ref_like(data.ty) {
                    return None;
                }
                Some(pag.get_or_insert_global_var(self.acx, GlobalKey::StaticField(*f)))
            }
            Value::InstanceField { base, field } => {
                if !self.acx.is_ref_like(self.acx.program.field_data(*field).ty) {
                    return None;
                }
                let base = self.local_node(pag, *base)?;
                Some(pag.get_or_insert_field_ref(self.acx, base, PagField::Instance(*field)))
            }
            Value::ArrayElem { base } => {
                if let Some(elem) = self.acx.program.array_elem(self.local_type(*base)) {
                    if !self.acx.is_ref_like(elem) {
                        return None;
                    }
                }
                let base = self.local_node(pag, *base)?;
                Some(pag.get_or_insert_field_ref(self.acx, base, PagField::ArrayElement))
            }
            Value::New(site) => {
                let ty = self.acx.program.alloc_site(*site).ty;
                if matches!(self.acx.program.type_data(ty).kind, TypeKind::Class(_)) {
                    self.mgraph.add_clinit_class(ty);
                }
                Some(pag.get_or_insert_alloc(self.acx, AllocKey::Site(*site)))
            }
            Value::Cast { ty, op } => {
                // Casts are looked through; a failing cast throws instead of
                // narrowing the set.
                if !self.acx.is_ref_like(*ty) {
                    return None;
                }
                self.value_node(pag, op)
            }
            Value::StringConst(s) => {
                let alloc = pag.get_or_insert_alloc(self.acx, AllocKey::StringConst(*s));
                let var = pag.get_or_insert_global_var(self.acx, GlobalKey::StringLit(*s));
                pag.add_edge(self.acx, alloc, var);
                Some(var)
            }
            Value::ClassConst(ty) => {
                let alloc = pag.get_or_insert_alloc(self.acx, AllocKey::ClassConst(*ty));
                let var = pag.get_or_insert_global_var(self.acx, GlobalKey::ClassLit(*ty));
                pag.add_edge(self.acx, alloc, var);
                Some(var)
            }
            Value::Null => None,
            Value::Phi(_) => {
                warn!(
                    "a phi outside an assignment right-hand side in {} is dropped",
                    self.acx.method_name(self.method)
                );
                None
            }
        }
    }

    /// The variable node of `local`, or `None` for primitive locals.
    fn local_node(&self, pag: &mut PAG, local: LocalId) -> Option<PAGNodeId> {
        if !self.acx.is_ref_like(self.local_type(local)) {
            return None;
        }
        Some(pag.get_or_insert_local_var(
            self.acx,
            LocalVarKey::new(self.method, LocalKey::Var(local)),
        ))
    }

    fn local_type(&self, local: LocalId) -> TypeId {
        self.body
            .map_or(self.acx.program.well_known.object, |b| {
                b.local_types[local.index()]
            })
    }
}

fn is_canonicalize(acx: &AnalysisContext, method: MethodId) -> bool {
    let wk = &acx.program.well_known;
    let (fs, sig) = match (wk.filesystem, wk.canonicalize_sig) {
        (Some(fs), Some(sig)) => (fs, sig),
        _ => return false,
    };
    let data = acx.program.method_data(method);
    data.sig == sig && acx.supertypes(data.declaring_class).contains(fs)
}
