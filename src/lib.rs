// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! A whole-program pointer analysis framework for class-based bytecode
//! programs.
//!
//! The analyzed program arrives as a serialized model (see
//! [`ir::loader`]); the analyses resolve which abstract objects every
//! pointer variable may refer to while discovering the call graph on the
//! fly. Call-site-, object-, type- and parameter-sensitive variants share
//! one engine, and a pre-analysis can restrict context qualification to
//! the nodes that profit from it.

pub mod builder;
pub mod graph;
pub mod ir;
pub mod pta;
pub mod pts_set;
pub mod util;
