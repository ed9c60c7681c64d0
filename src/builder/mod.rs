// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Translation of program bodies into the graphs the analysis runs on.

pub mod entry_builder;
pub mod method_graph_builder;
