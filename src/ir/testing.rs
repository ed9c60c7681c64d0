// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Helpers for assembling small programs in unit tests.

use crate::ir::program::{
    AllocId, ClassData, FieldData, FieldId, LocalId, MethodData, MethodId, Program, SigId,
    StringId, TypeData, TypeId, TypeKind, WellKnown,
};
use crate::ir::statement::{
    Body, CallKind, IdentityValue, InvokeExpr, Statement, Value,
};

pub(crate) struct ProgramBuilder {
    program: Program,
}

impl ProgramBuilder {
    pub(crate) fn new() -> Self {
        let object = TypeData {
            name: "java.lang.Object".to_string(),
            kind: TypeKind::Class(ClassData::default()),
        };
        let program = Program {
            types: vec![object],
            sigs: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
            alloc_sites: Vec::new(),
            string_consts: Vec::new(),
            main: None,
            entry_points: Vec::new(),
            well_known: WellKnown {
                object: TypeId::new(0),
                string: None,
                class: None,
                throwable: None,
                main_sig: None,
                runnable: None,
                run_sig: None,
                filesystem: None,
                canonicalize_sig: None,
            },
            synthetic_entry: None,
        };
        ProgramBuilder { program }
    }

    pub(crate) fn program(&self) -> &Program {
        &self.program
    }

    pub(crate) fn object(&self) -> TypeId {
        self.program.well_known.object
    }

    /// Adds an application class; `superclass` defaults to `Object`.
    pub(crate) fn class(&mut self, name: &str, superclass: Option<TypeId>) -> TypeId {
        let superclass = superclass.unwrap_or(self.program.well_known.object);
        self.program.add_type(TypeData {
            name: name.to_string(),
            kind: TypeKind::Class(ClassData {
                superclass: Some(superclass),
                is_application: true,
                ..ClassData::default()
            }),
        })
    }

    pub(crate) fn interface(&mut self, name: &str) -> TypeId {
        self.program.add_type(TypeData {
            name: name.to_string(),
            kind: TypeKind::Interface(ClassData::default()),
        })
    }

    pub(crate) fn interface_extending(&mut self, name: &str, parent: TypeId) -> TypeId {
        self.program.add_type(TypeData {
            name: name.to_string(),
            kind: TypeKind::Interface(ClassData {
                interfaces: vec![parent],
                ..ClassData::default()
            }),
        })
    }

    pub(crate) fn implements(&mut self, class: TypeId, iface: TypeId) {
        match &mut self.program.types[class.index()].kind {
            TypeKind::Class(c) | TypeKind::Interface(c) => c.interfaces.push(iface),
            _ => panic!("{:?} cannot implement an interface", class),
        }
    }

    pub(crate) fn array_of(&mut self, elem: TypeId) -> TypeId {
        self.program.array_of(elem)
    }

    pub(crate) fn primitive(&mut self, name: &str) -> TypeId {
        self.program.add_type(TypeData {
            name: name.to_string(),
            kind: TypeKind::Primitive,
        })
    }

    /// Interns `java.lang.String` and hooks it up as the well-known string
    /// type on first use.
    pub(crate) fn string_type(&mut self) -> TypeId {
        if let Some(ty) = self.program.well_known.string {
            return ty;
        }
        let ty = self.class("java.lang.String", None);
        self.program.well_known.string = Some(ty);
        ty
    }

    /// Interns `Runnable` with its `run()` signature for thread dispatch.
    pub(crate) fn runnable_type(&mut self) -> TypeId {
        if let Some(ty) = self.program.well_known.runnable {
            return ty;
        }
        let ty = self.interface("java.lang.Runnable");
        let run_sig = self.program.intern_sig("void run()");
        self.program.well_known.runnable = Some(ty);
        self.program.well_known.run_sig = Some(run_sig);
        ty
    }

    pub(crate) fn method(
        &mut self,
        class: TypeId,
        sig: &str,
        is_static: bool,
        param_types: &[TypeId],
        ret_type: Option<TypeId>,
    ) -> MethodId {
        let sig = self.program.intern_sig(sig);
        self.program.add_method(MethodData {
            sig,
            declaring_class: class,
            is_static,
            is_abstract: false,
            is_constructor: false,
            is_private: false,
            param_types: param_types.to_vec(),
            ret_type,
            body: None,
        })
    }

    /// Adds a static `main(String[])` and registers its signature as the
    /// well-known main signature.
    pub(crate) fn main_method(&mut self, class: TypeId) -> MethodId {
        let m = self.method(class, "void main(java.lang.String[])", true, &[], None);
        let sig = self.program.method_data(m).sig;
        self.program.well_known.main_sig = Some(sig);
        m
    }

    pub(crate) fn constructor(&mut self, class: TypeId) -> MethodId {
        let m = self.method(class, "void <init>()", false, &[], None);
        self.program.methods[m.index()].is_constructor = true;
        m
    }

    pub(crate) fn clinit(&mut self, class: TypeId) -> MethodId {
        let m = self.method(class, "void <clinit>()", true, &[], None);
        match &mut self.program.types[class.index()].kind {
            TypeKind::Class(c) | TypeKind::Interface(c) => c.clinit = Some(m),
            _ => panic!("{:?} cannot have a class initializer", class),
        }
        m
    }

    pub(crate) fn mark_abstract(&mut self, method: MethodId) {
        self.program.methods[method.index()].is_abstract = true;
    }

    pub(crate) fn mark_private(&mut self, method: MethodId) {
        self.program.methods[method.index()].is_private = true;
    }

    pub(crate) fn mark_library(&mut self, class: TypeId) {
        match &mut self.program.types[class.index()].kind {
            TypeKind::Class(c) | TypeKind::Interface(c) => c.is_application = false,
            _ => {}
        }
    }

    pub(crate) fn set_body(&mut self, method: MethodId, locals: &[TypeId], stmts: Vec<Statement>) {
        self.program.methods[method.index()].body = Some(Body {
            local_types: locals.to_vec(),
            stmts,
        });
    }

    pub(crate) fn field(
        &mut self,
        class: TypeId,
        name: &str,
        ty: TypeId,
        is_static: bool,
    ) -> FieldId {
        self.program.add_field(FieldData {
            name: name.to_string(),
            declaring_class: class,
            ty,
            is_static,
        })
    }

    pub(crate) fn alloc(&mut self, method: MethodId, ty: TypeId) -> AllocId {
        self.program.add_alloc_site(ty, method)
    }

    pub(crate) fn string_const(&mut self, value: &str) -> StringId {
        self.program.add_string_const(value)
    }

    pub(crate) fn sig(&mut self, sig: &str) -> SigId {
        self.program.intern_sig(sig)
    }

    pub(crate) fn add_entry_point(&mut self, method: MethodId) {
        self.program.entry_points.push(method);
    }

    pub(crate) fn well_known_mut(&mut self) -> &mut WellKnown {
        &mut self.program.well_known
    }

    pub(crate) fn finish(mut self, main: Option<MethodId>) -> Program {
        self.program.main = main;
        self.program
    }
}

pub(crate) fn lid(n: usize) -> LocalId {
    LocalId::new(n)
}

pub(crate) fn local(l: LocalId) -> Value {
    Value::Local(l)
}

pub(crate) fn new_obj(site: AllocId) -> Value {
    Value::New(site)
}

pub(crate) fn ifield(base: LocalId, field: FieldId) -> Value {
    Value::InstanceField { base, field }
}

pub(crate) fn sfield(field: FieldId) -> Value {
    Value::StaticField(field)
}

pub(crate) fn elem(base: LocalId) -> Value {
    Value::ArrayElem { base }
}

pub(crate) fn assign(lhs: Value, rhs: Value) -> Statement {
    Statement::Assign { lhs, rhs }
}

pub(crate) fn ident(local: LocalId, value: IdentityValue) -> Statement {
    Statement::Identity { local, value }
}

pub(crate) fn ret(op: Value) -> Statement {
    Statement::Return { op }
}

pub(crate) fn invoke(
    kind: CallKind,
    callee: MethodId,
    receiver: Option<LocalId>,
    args: Vec<Value>,
    dest: Option<LocalId>,
) -> Statement {
    Statement::Invoke {
        expr: InvokeExpr {
            kind,
            callee,
            receiver,
            args,
            dest,
        },
    }
}
