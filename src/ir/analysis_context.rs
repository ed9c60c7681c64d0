// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Analysis-wide state: the program, the options it is analyzed under, and
//! memoized hierarchy queries.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use anyhow::{anyhow, ensure, Result};

use crate::builder::entry_builder::EntryBuilder;
use crate::ir::program::{MethodId, Program, SigId, TypeId};
use crate::util::bit_vec::BitVec;
use crate::util::options::AnalysisOptions;

pub struct AnalysisContext {
    pub program: Program,
    pub options: AnalysisOptions,
    /// Resolved entry methods, `main` first.
    pub entries: Vec<MethodId>,
    /// The synthetic harness method the analysis starts from.
    pub entry: MethodId,
    supertypes_cache: RefCell<HashMap<TypeId, Rc<BitVec<TypeId>>>>,
    dispatch_cache: RefCell<HashMap<(TypeId, SigId), Option<MethodId>>>,
}

impl AnalysisContext {
    pub fn new(mut program: Program, options: AnalysisOptions) -> Result<Self> {
        let entries = Self::resolve_entries(&program, &options)?;
        let entry = EntryBuilder::synthesize(&mut program, &entries);
        Ok(AnalysisContext {
            program,
            options,
            entries,
            entry,
            supertypes_cache: RefCell::new(HashMap::new()),
            dispatch_cache: RefCell::new(HashMap::new()),
        })
    }

    fn resolve_entries(program: &Program, options: &AnalysisOptions) -> Result<Vec<MethodId>> {
        let mut entries = Vec::new();
        if let Some(name) = &options.main_class {
            let ty = program
                .find_type_by_name(name)
                .ok_or_else(|| anyhow!("main class `{}` not found in the program", name))?;
            let main = program
                .find_main_of(ty)
                .ok_or_else(|| anyhow!("class `{}` declares no static main method", name))?;
            entries.push(main);
        } else if let Some(main) = program.main {
            entries.push(main);
        }
        if !options.single_entry {
            for &entry in &program.entry_points {
                if !entries.contains(&entry) {
                    entries.push(entry);
                }
            }
        }
        ensure!(
            !entries.is_empty(),
            "no entry methods; pass --main or provide a program with a main method"
        );
        Ok(entries)
    }

    #[inline]
    pub fn is_ref_like(&self, ty: TypeId) -> bool {
        self.program.is_ref_like(ty)
    }

    #[inline]
    pub fn is_application(&self, method: MethodId) -> bool {
        self.program.is_application(method)
    }

    /// The supertype closure of `ty` as a bit set, including `ty` itself.
    pub fn supertypes(&self, ty: TypeId) -> Rc<BitVec<TypeId>> {
        if let Some(supers) = self.supertypes_cache.borrow().get(&ty) {
            return supers.clone();
        }
        let mut supers = BitVec::with_capacity(self.program.num_types());
        for t in self.program.supertypes(ty) {
            supers.insert(t);
        }
        let supers = Rc::new(supers);
        self.supertypes_cache
            .borrow_mut()
            .insert(ty, supers.clone());
        supers
    }

    /// Whether a value of runtime type `src` may be stored in a location of
    /// declared type `dst`. Arrays are covariant in their reference element
    /// types.
    pub fn can_store_type(&self, src: TypeId, dst: TypeId) -> bool {
        if src == dst {
            return true;
        }
        if dst == self.program.well_known.object {
            return self.program.is_ref_like(src);
        }
        match (self.program.array_elem(src), self.program.array_elem(dst)) {
            (Some(se), Some(de)) => {
                if self.program.is_ref_like(se) && self.program.is_ref_like(de) {
                    self.can_store_type(se, de)
                } else {
                    se == de
                }
            }
            _ => self.supertypes(src).contains(dst),
        }
    }

    /// Looks up the implementation of `sig` a receiver of runtime type
    /// `runtime_ty` dispatches to. Arrays dispatch like `Object`.
    pub fn dispatch(&self, runtime_ty: TypeId, sig: SigId) -> Option<MethodId> {
        let key = (runtime_ty, sig);
        if let Some(&cached) = self.dispatch_cache.borrow().get(&key) {
            return cached;
        }
        let start = if self.program.array_elem(runtime_ty).is_some() {
            self.program.well_known.object
        } else {
            runtime_ty
        };
        let mut found = None;
        let mut cur = Some(start);
        while let Some(t) = cur {
            if let Some(m) = self.program.declared_method(t, sig) {
                // An abstract match ends the walk unresolved.
                if !self.program.method_data(m).is_abstract {
                    found = Some(m);
                }
                break;
            }
            cur = self.program.superclass(t);
        }
        self.dispatch_cache.borrow_mut().insert(key, found);
        found
    }

    /// Resolves a virtual or interface call against one pointee type.
    /// Returns `None` when `runtime_ty` cannot flow into the declared
    /// receiver type, or when dispatch finds no concrete target.
    pub fn resolve_virtual(&self, callee: MethodId, runtime_ty: TypeId) -> Option<MethodId> {
        let data = self.program.method_data(callee);
        if !self.can_store_type(runtime_ty, data.declaring_class) {
            return None;
        }
        self.dispatch(runtime_ty, data.sig)
    }

    /// Resolves a special call. Constructors and private methods bind to the
    /// named target; `super.m()` calls re-dispatch from the caller's
    /// superclass.
    pub fn resolve_special(&self, caller: MethodId, callee: MethodId) -> MethodId {
        let data = self.program.method_data(callee);
        if data.is_constructor || data.is_private {
            return callee;
        }
        let caller_class = self.program.method_data(caller).declaring_class;
        if self.can_store_type(caller_class, data.declaring_class) {
            if let Some(sup) = self.program.superclass(caller_class) {
                if let Some(m) = self.dispatch(sup, data.sig) {
                    return m;
                }
            }
        }
        callee
    }

    /// Human-readable method signature, e.g. `<com.foo.A: void m()>`.
    pub fn method_name(&self, method: MethodId) -> String {
        let data = self.program.method_data(method);
        format!(
            "<{}: {}>",
            self.program.type_data(data.declaring_class).name,
            self.program.sig_str(data.sig)
        )
    }

    pub fn type_name(&self, ty: TypeId) -> &str {
        &self.program.type_data(ty).name
    }
}
