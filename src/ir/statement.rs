// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Method bodies in a flat, pointer-relevant statement form.
//!
//! Statements that cannot affect points-to sets (arithmetic, branches,
//! monitors) are absent. The frontend flattens all dereference chains, so
//! at most one side of an [`Statement::Assign`] touches memory.

use serde::{Deserialize, Serialize};

use crate::ir::program::{AllocId, FieldId, LocalId, MethodId, StringId, TypeId};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Body {
    /// Declared type of each local slot.
    pub local_types: Vec<TypeId>,
    pub stmts: Vec<Statement>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Statement {
    /// `lhs = rhs`.
    Assign { lhs: Value, rhs: Value },
    /// Binds a local to the receiver or to a declared parameter.
    Identity { local: LocalId, value: IdentityValue },
    Return { op: Value },
    Throw { op: Value },
    Invoke { expr: InvokeExpr },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentityValue {
    This,
    /// Zero-based position among the declared parameters, the receiver
    /// excluded.
    Param(u32),
    /// Binds the handler local of a catch block. All thrown values are
    /// merged into one global pool.
    CaughtException,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    Local(LocalId),
    StaticField(FieldId),
    InstanceField { base: LocalId, field: FieldId },
    /// Any element of the array held by `base`; indices are not
    /// distinguished.
    ArrayElem { base: LocalId },
    New(AllocId),
    Cast { ty: TypeId, op: Box<Value> },
    StringConst(StringId),
    /// A class literal of the named type.
    ClassConst(TypeId),
    Null,
    /// Merge of several incoming values.
    Phi(Vec<Value>),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InvokeExpr {
    pub kind: CallKind,
    /// The statically named target. For virtual and interface calls the
    /// runtime target is re-resolved against each pointee of the receiver.
    pub callee: MethodId,
    pub receiver: Option<LocalId>,
    pub args: Vec<Value>,
    /// Local receiving the returned reference, if the result is used.
    pub dest: Option<LocalId>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallKind {
    Static,
    Virtual,
    Interface,
    /// Constructor, private and `super.m()` calls; resolved without
    /// consulting points-to information.
    Special,
    /// `Thread.start()`-like sites. The started method runs on a fresh
    /// thread, so the callee is dispatched against `Runnable.run()`.
    Thread,
}
