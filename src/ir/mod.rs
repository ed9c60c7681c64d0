// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Frontend-independent representation of the analyzed program.

pub mod analysis_context;
pub mod call_site;
pub mod context;
pub mod loader;
pub mod program;
pub mod statement;

#[cfg(test)]
pub(crate) mod testing;
