// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Typed tables describing the analyzed program.
//!
//! A [`Program`] is the input of the analysis: interned types, methods,
//! fields, allocation sites and string constants, together with the class
//! hierarchy facts needed to resolve calls. Programs are usually
//! deserialized from JSON (see [`crate::ir::loader`]); unit tests assemble
//! them directly.

use serde::{Deserialize, Serialize};

use crate::ir::context::ContextId;
use crate::ir::statement::Body;
use crate::new_index_type;

new_index_type! {
    /// Identifies a type (class, interface, array or primitive).
    pub struct TypeId;
}

new_index_type! {
    /// Identifies an interned method signature (name plus descriptor).
    /// Two methods override each other only if their `SigId`s are equal.
    pub struct SigId;
}

new_index_type! {
    /// Identifies a method.
    pub struct MethodId;
}

new_index_type! {
    /// Identifies a field.
    pub struct FieldId;
}

new_index_type! {
    /// Identifies an allocation site.
    pub struct AllocId;
}

new_index_type! {
    /// Identifies an interned string constant.
    pub struct StringId;
}

new_index_type! {
    /// Identifies a local slot of a method body.
    pub struct LocalId;
}

/// Context-sensitive method consisting of a context id (cid) and a method id.
#[derive(Copy, Clone, Debug, Eq, PartialOrd, PartialEq, Hash, Ord)]
pub struct CSMethodId {
    pub cid: ContextId,
    pub method: MethodId,
}

impl CSMethodId {
    pub fn new(cid: ContextId, method: MethodId) -> Self {
        Self { cid, method }
    }
}

impl From<CSMethodId> for MethodId {
    fn from(m: CSMethodId) -> Self {
        m.method
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Program {
    pub types: Vec<TypeData>,
    /// Interned subsignature strings, e.g. `"java.lang.String toString()"`.
    pub sigs: Vec<String>,
    pub methods: Vec<MethodData>,
    pub fields: Vec<FieldData>,
    pub alloc_sites: Vec<AllocSite>,
    #[serde(default)]
    pub string_consts: Vec<String>,
    #[serde(default)]
    pub main: Option<MethodId>,
    /// Methods the analysis starts from in addition to `main`.
    #[serde(default)]
    pub entry_points: Vec<MethodId>,
    pub well_known: WellKnown,
    /// The synthetic entry method, created on first use. Never part of the
    /// serialized input.
    #[serde(skip)]
    pub(crate) synthetic_entry: Option<MethodId>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TypeData {
    pub name: String,
    pub kind: TypeKind,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum TypeKind {
    Class(ClassData),
    Interface(ClassData),
    Array { elem: TypeId },
    Primitive,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ClassData {
    #[serde(default)]
    pub superclass: Option<TypeId>,
    /// Directly implemented (for classes) or extended (for interfaces)
    /// interfaces.
    #[serde(default)]
    pub interfaces: Vec<TypeId>,
    /// Methods declared by this type, in declaration order.
    #[serde(default)]
    pub methods: Vec<MethodId>,
    #[serde(default)]
    pub clinit: Option<MethodId>,
    /// Application classes get special treatment under an API call depth
    /// bound; everything else counts as library code.
    #[serde(default)]
    pub is_application: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MethodData {
    pub sig: SigId,
    pub declaring_class: TypeId,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_abstract: bool,
    #[serde(default)]
    pub is_constructor: bool,
    #[serde(default)]
    pub is_private: bool,
    /// Declared parameter types, excluding the receiver.
    #[serde(default)]
    pub param_types: Vec<TypeId>,
    /// `None` for void methods.
    #[serde(default)]
    pub ret_type: Option<TypeId>,
    /// Abstract and native methods have no body.
    #[serde(default)]
    pub body: Option<Body>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldData {
    pub name: String,
    pub declaring_class: TypeId,
    pub ty: TypeId,
    #[serde(default)]
    pub is_static: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AllocSite {
    pub ty: TypeId,
    /// The method whose body contains this site.
    pub method: MethodId,
}

/// Hooks into the modeled runtime library. Only `object` is mandatory;
/// leaving an entry unset disables the corresponding special handling.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WellKnown {
    /// The root of the class hierarchy.
    pub object: TypeId,
    #[serde(default)]
    pub string: Option<TypeId>,
    /// The class-literal type (`java.lang.Class`).
    #[serde(default)]
    pub class: Option<TypeId>,
    #[serde(default)]
    pub throwable: Option<TypeId>,
    /// Subsignature of `main(String[])`, used to resolve a `--main` class.
    #[serde(default)]
    pub main_sig: Option<SigId>,
    /// The interface dispatched against at thread-start sites.
    #[serde(default)]
    pub runnable: Option<TypeId>,
    /// Subsignature of `run()`.
    #[serde(default)]
    pub run_sig: Option<SigId>,
    /// Class whose `canonicalize` returns the shared canonical path string.
    #[serde(default)]
    pub filesystem: Option<TypeId>,
    #[serde(default)]
    pub canonicalize_sig: Option<SigId>,
}

impl Program {
    #[inline]
    pub fn type_data(&self, ty: TypeId) -> &TypeData {
        &self.types[ty.index()]
    }

    #[inline]
    pub fn method_data(&self, method: MethodId) -> &MethodData {
        &self.methods[method.index()]
    }

    #[inline]
    pub fn field_data(&self, field: FieldId) -> &FieldData {
        &self.fields[field.index()]
    }

    #[inline]
    pub fn alloc_site(&self, alloc: AllocId) -> &AllocSite {
        &self.alloc_sites[alloc.index()]
    }

    #[inline]
    pub fn sig_str(&self, sig: SigId) -> &str {
        &self.sigs[sig.index()]
    }

    #[inline]
    pub fn string_const(&self, id: StringId) -> &str {
        &self.string_consts[id.index()]
    }

    pub fn num_types(&self) -> usize {
        self.types.len()
    }

    pub fn num_methods(&self) -> usize {
        self.methods.len()
    }

    /// Whether values of `ty` are pointers, i.e. participate in the analysis.
    pub fn is_ref_like(&self, ty: TypeId) -> bool {
        !matches!(self.type_data(ty).kind, TypeKind::Primitive)
    }

    pub fn is_application(&self, method: MethodId) -> bool {
        self.class_data(self.method_data(method).declaring_class)
            .map_or(false, |c| c.is_application)
    }

    /// The class or interface data of `ty`, if it has any.
    pub fn class_data(&self, ty: TypeId) -> Option<&ClassData> {
        match &self.type_data(ty).kind {
            TypeKind::Class(c) | TypeKind::Interface(c) => Some(c),
            _ => None,
        }
    }

    pub fn superclass(&self, ty: TypeId) -> Option<TypeId> {
        self.class_data(ty).and_then(|c| c.superclass)
    }

    pub fn array_elem(&self, ty: TypeId) -> Option<TypeId> {
        match self.type_data(ty).kind {
            TypeKind::Array { elem } => Some(elem),
            _ => None,
        }
    }

    /// All class and interface supertypes of `ty`, including `ty` itself.
    /// Array types only report themselves and `Object`; element covariance
    /// is handled separately by subtyping checks.
    pub fn supertypes(&self, ty: TypeId) -> Vec<TypeId> {
        let mut supers = Vec::new();
        match self.type_data(ty).kind {
            TypeKind::Class(_) | TypeKind::Interface(_) => {
                let mut worklist = vec![ty];
                while let Some(t) = worklist.pop() {
                    if supers.contains(&t) {
                        continue;
                    }
                    supers.push(t);
                    if let Some(c) = self.class_data(t) {
                        worklist.extend(c.superclass);
                        worklist.extend(c.interfaces.iter().copied());
                    }
                }
            }
            TypeKind::Array { .. } => {
                supers.push(ty);
                supers.push(self.well_known.object);
            }
            TypeKind::Primitive => supers.push(ty),
        }
        supers
    }

    /// The `<clinit>` methods that initializing `ty` runs, following the
    /// superclass chain from `ty` upwards.
    pub fn clinits_of(&self, ty: TypeId) -> Vec<MethodId> {
        let mut clinits = Vec::new();
        let mut cur = Some(ty);
        while let Some(t) = cur {
            if let Some(c) = self.class_data(t) {
                clinits.extend(c.clinit);
                cur = c.superclass;
            } else {
                cur = None;
            }
        }
        clinits
    }

    /// The method with subsignature `sig` declared directly by `ty`.
    pub fn declared_method(&self, ty: TypeId, sig: SigId) -> Option<MethodId> {
        let class = self.class_data(ty)?;
        class
            .methods
            .iter()
            .copied()
            .find(|&m| self.method_data(m).sig == sig)
    }

    pub fn find_type_by_name(&self, name: &str) -> Option<TypeId> {
        self.types
            .iter()
            .position(|t| t.name == name)
            .map(TypeId::new)
    }

    /// The static `main(String[])` declared by `class`, if any.
    pub fn find_main_of(&self, class: TypeId) -> Option<MethodId> {
        let main_sig = self.well_known.main_sig?;
        let m = self.declared_method(class, main_sig)?;
        self.method_data(m).is_static.then_some(m)
    }

    /// Interns the array type over `elem`, creating it on first use.
    pub fn array_of(&mut self, elem: TypeId) -> TypeId {
        let existing = self
            .types
            .iter()
            .position(|t| matches!(t.kind, TypeKind::Array { elem: e } if e == elem));
        match existing {
            Some(i) => TypeId::new(i),
            None => {
                let name = format!("{}[]", self.type_data(elem).name);
                self.add_type(TypeData {
                    name,
                    kind: TypeKind::Array { elem },
                })
            }
        }
    }

    pub fn intern_sig(&mut self, sig: &str) -> SigId {
        match self.sigs.iter().position(|s| s == sig) {
            Some(i) => SigId::new(i),
            None => {
                self.sigs.push(sig.to_string());
                SigId::new(self.sigs.len() - 1)
            }
        }
    }

    pub fn add_type(&mut self, data: TypeData) -> TypeId {
        self.types.push(data);
        TypeId::new(self.types.len() - 1)
    }

    /// Adds a method and registers it with its declaring class.
    pub fn add_method(&mut self, data: MethodData) -> MethodId {
        let class = data.declaring_class;
        self.methods.push(data);
        let method = MethodId::new(self.methods.len() - 1);
        match &mut self.types[class.index()].kind {
            TypeKind::Class(c) | TypeKind::Interface(c) => c.methods.push(method),
            _ => panic!("method declared by non-class type {:?}", class),
        }
        method
    }

    pub fn add_field(&mut self, data: FieldData) -> FieldId {
        self.fields.push(data);
        FieldId::new(self.fields.len() - 1)
    }

    pub fn add_alloc_site(&mut self, ty: TypeId, method: MethodId) -> AllocId {
        self.alloc_sites.push(AllocSite { ty, method });
        AllocId::new(self.alloc_sites.len() - 1)
    }

    pub fn add_string_const(&mut self, value: &str) -> StringId {
        match self.string_consts.iter().position(|s| s == value) {
            Some(i) => StringId::new(i),
            None => {
                self.string_consts.push(value.to_string());
                StringId::new(self.string_consts.len() - 1)
            }
        }
    }
}
