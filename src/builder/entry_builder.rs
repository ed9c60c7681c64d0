// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! The synthetic harness method the analysis starts from.
//!
//! All entry methods are invoked from one synthesized static method: static
//! entries directly, instance entries on a freshly allocated receiver. A
//! `main(String[])` entry additionally receives an argument array holding
//! one string object. Class initializers discovered while solving are folded
//! in afterwards as synthetic static call sites.

use log::*;
use std::collections::HashSet;
use std::rc::Rc;

use crate::ir::analysis_context::AnalysisContext;
use crate::ir::call_site::{BaseCallSite, CallSite};
use crate::ir::program::{
    ClassData, LocalId, MethodData, MethodId, Program, TypeData, TypeId, TypeKind,
};
use crate::ir::statement::{Body, CallKind, InvokeExpr, Statement, Value};

/// Hands out the harness call sites of class initializers as they become
/// reachable.
pub struct EntryBuilder {
    entry: MethodId,
    /// Initializer methods already folded into the harness.
    folded: HashSet<MethodId>,
    /// Statement indices for synthetic initializer sites, starting past the
    /// harness body.
    next_stmt: usize,
}

impl EntryBuilder {
    pub fn new(acx: &AnalysisContext) -> Self {
        let entry = acx.entry;
        let next_stmt = acx
            .program
            .method_data(entry)
            .body
            .as_ref()
            .map_or(0, |b| b.stmts.len());
        EntryBuilder {
            entry,
            folded: HashSet::new(),
            next_stmt,
        }
    }

    #[inline]
    pub fn entry(&self) -> MethodId {
        self.entry
    }

    /// Creates the harness class and method unless the program already has
    /// one. Called once while the analysis context is being set up.
    pub fn synthesize(program: &mut Program, entries: &[MethodId]) -> MethodId {
        if let Some(entry) = program.synthetic_entry {
            return entry;
        }
        let class = program.add_type(TypeData {
            name: "<harness>".to_string(),
            kind: TypeKind::Class(ClassData {
                superclass: Some(program.well_known.object),
                is_application: true,
                ..ClassData::default()
            }),
        });
        let sig = program.intern_sig("void <harness>()");
        let entry = program.add_method(MethodData {
            sig,
            declaring_class: class,
            is_static: true,
            is_abstract: false,
            is_constructor: false,
            is_private: false,
            param_types: Vec::new(),
            ret_type: None,
            body: None,
        });

        let mut locals: Vec<TypeId> = Vec::new();
        let mut stmts: Vec<Statement> = Vec::new();

        // The argument array handed to `main`, holding one string object.
        let mut argv = None;
        if let Some(string) = program.well_known.string {
            let arr_ty = program.array_of(string);
            let arr_site = program.add_alloc_site(arr_ty, entry);
            let str_site = program.add_alloc_site(string, entry);
            let arr = LocalId::new(locals.len());
            locals.push(arr_ty);
            let elem = LocalId::new(locals.len());
            locals.push(string);
            stmts.push(Statement::Assign {
                lhs: Value::Local(arr),
                rhs: Value::New(arr_site),
            });
            stmts.push(Statement::Assign {
                lhs: Value::Local(elem),
                rhs: Value::New(str_site),
            });
            stmts.push(Statement::Assign {
                lhs: Value::ArrayElem { base: arr },
                rhs: Value::Local(elem),
            });
            argv = Some((arr, arr_ty));
        }

        for &m in entries {
            let data = program.method_data(m).clone();
            let args: Vec<Value> = data
                .param_types
                .iter()
                .map(|&p| match argv {
                    Some((l, arr_ty)) if p == arr_ty => Value::Local(l),
                    _ => Value::Null,
                })
                .collect();
            if data.is_static {
                stmts.push(Statement::Invoke {
                    expr: InvokeExpr {
                        kind: CallKind::Static,
                        callee: m,
                        receiver: None,
                        args,
                        dest: None,
                    },
                });
            } else {
                let site = program.add_alloc_site(data.declaring_class, entry);
                let recv = LocalId::new(locals.len());
                locals.push(data.declaring_class);
                stmts.push(Statement::Assign {
                    lhs: Value::Local(recv),
                    rhs: Value::New(site),
                });
                stmts.push(Statement::Invoke {
                    expr: InvokeExpr {
                        kind: CallKind::Special,
                        callee: m,
                        receiver: Some(recv),
                        args,
                        dest: None,
                    },
                });
            }
        }

        program.methods[entry.index()].body = Some(Body {
            local_types: locals,
            stmts,
        });
        program.synthetic_entry = Some(entry);
        entry
    }

    /// Folds the `<clinit>` chain of `class` into the harness, returning
    /// sites for the initializers that were not folded before.
    pub fn fold_clinits(&mut self, acx: &AnalysisContext, class: TypeId) -> Vec<Rc<CallSite>> {
        let mut sites = Vec::new();
        for clinit in acx.program.clinits_of(class) {
            if !self.folded.insert(clinit) {
                continue;
            }
            debug!("Folding {} into the harness", acx.method_name(clinit));
            let site = CallSite::new(
                BaseCallSite::new(self.entry, self.next_stmt),
                CallKind::Static,
                clinit,
                None,
                Vec::new(),
                None,
            );
            self.next_stmt += 1;
            sites.push(Rc::new(site));
        }
        sites
    }

    /// Folds every initializer of the program, for `--clinit eager`.
    pub fn fold_all(&mut self, acx: &AnalysisContext) -> Vec<Rc<CallSite>> {
        let mut sites = Vec::new();
        for i in 0..acx.program.num_types() {
            sites.extend(self.fold_clinits(acx, TypeId::new(i)));
        }
        sites
    }
}
