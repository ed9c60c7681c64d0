// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Writers for the artifacts the options ask for: points-to sets merged
//! over contexts and grouped per method, and the assignment graph in
//! Graphviz form.

use log::*;
use petgraph::dot::{Config, Dot};
use petgraph::graph::Graph;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::graph::pag::{
    AllocKey, GlobalKey, LocalKey, NodeKey, PAGEdge, PAGEdgeKind, PAGNode, PAGNodeId, PagField,
    SpecialAlloc, PAG,
};
use crate::ir::analysis_context::AnalysisContext;
use crate::ir::program::MethodId;
use crate::pta::DiffPTDataTy;
use crate::pts_set::points_to::PointsToSet;

/// Human-readable name of a node, e.g. `<com.foo.A: void m()>/v3` or
/// `new com.foo.B #7.next`.
pub fn node_label(acx: &AnalysisContext, pag: &PAG, node: PAGNodeId) -> String {
    match pag.node_key(node) {
        NodeKey::LocalVar(v) => {
            format!("{}/{}", acx.method_name(v.method), local_label(v.which))
        }
        NodeKey::GlobalVar(g) => global_label(acx, g),
        NodeKey::Alloc(a) => alloc_label(acx, a),
        NodeKey::FieldRef { base, field } | NodeKey::AllocDotField { base, field } => {
            format!(
                "{}.{}",
                node_label(acx, pag, base),
                field_label(acx, field)
            )
        }
        NodeKey::ContextVar { cid, base } | NodeKey::ContextAlloc { cid, base } => {
            format!("{} [{}]", node_label(acx, pag, base), cid.index())
        }
    }
}

fn local_label(which: LocalKey) -> String {
    match which {
        LocalKey::Var(l) => format!("v{}", l.index()),
        LocalKey::This => "this".to_string(),
        LocalKey::Param(i) => format!("p{}", i),
        LocalKey::Ret => "ret".to_string(),
    }
}

fn global_label(acx: &AnalysisContext, key: GlobalKey) -> String {
    match key {
        GlobalKey::StaticField(f) => {
            let fd = acx.program.field_data(f);
            format!("{}.{}", acx.type_name(fd.declaring_class), fd.name)
        }
        GlobalKey::FieldPool(f) => format!("<pool of .{}>", acx.program.field_data(f).name),
        GlobalKey::ArrayElemPool => "<pool of array elements>".to_string(),
        GlobalKey::Unified => "<unified>".to_string(),
        GlobalKey::Throw => "<thrown values>".to_string(),
        GlobalKey::CanonicalPath => "<canonical path>".to_string(),
        GlobalKey::StringLit(s) => format!("'{}'", acx.program.string_const(s)),
        GlobalKey::ClassLit(t) => format!("{}.class", acx.type_name(t)),
    }
}

fn alloc_label(acx: &AnalysisContext, key: AllocKey) -> String {
    match key {
        AllocKey::Site(a) => {
            let site = acx.program.alloc_site(a);
            format!("new {} #{}", acx.type_name(site.ty), a.index())
        }
        AllocKey::TypeSite(t) => format!("new {}*", acx.type_name(t)),
        AllocKey::StringPool => "<string pool object>".to_string(),
        AllocKey::StringConst(s) => format!("'{}'", acx.program.string_const(s)),
        AllocKey::ClassConst(t) => format!("class<{}>", acx.type_name(t)),
        AllocKey::Special(SpecialAlloc::Root) => "<root object>".to_string(),
        AllocKey::Special(SpecialAlloc::CanonicalPath) => "<canonical path object>".to_string(),
    }
}

fn field_label(acx: &AnalysisContext, field: PagField) -> String {
    match field {
        PagField::Instance(f) => acx.program.field_data(f).name.clone(),
        PagField::ArrayElement => "[]".to_string(),
    }
}

/// Writes each variable's objects to `pts_path`, contexts merged away and
/// variables grouped under their method. Library methods join the dump
/// only when the `dump-lib-pts` option is set.
pub fn dump_pts(acx: &AnalysisContext, pag: &PAG, pt_data: &DiffPTDataTy, pts_path: &Path) {
    info!("Dumping points-to results...");
    let mut writer = open_writer(pts_path);
    let grouped = group_pts(acx, pag, pt_data, |m| {
        acx.is_application(m) || acx.options.dump_lib_pts
    });
    write_grouped(acx, &mut writer, &grouped);
}

/// Writes the points-to sets of library variables to stdout.
pub fn dump_lib_pts(acx: &AnalysisContext, pag: &PAG, pt_data: &DiffPTDataTy) {
    info!("Dumping library points-to results...");
    let mut writer = BufWriter::new(Box::new(std::io::stdout()) as Box<dyn Write>);
    let grouped = group_pts(acx, pag, pt_data, |m| !acx.is_application(m));
    write_grouped(acx, &mut writer, &grouped);
}

/// Produces a dot rendering of the assignment graph for Graphviz.
pub fn dump_pag(acx: &AnalysisContext, pag: &PAG, dot_path: &Path) {
    info!("Dumping the assignment graph...");
    let node_attr = |_: &Graph<PAGNode, PAGEdge>, (id, _): (PAGNodeId, &PAGNode)| {
        format!("label=\"{}\"", node_label(acx, pag, id))
    };
    let edge_attr = |_: &Graph<PAGNode, PAGEdge>,
                     edge: petgraph::graph::EdgeReference<'_, PAGEdge>| {
        let kind = match edge.weight().kind {
            PAGEdgeKind::Alloc => "alloc",
            PAGEdgeKind::Simple => "copy",
            PAGEdgeKind::Store => "store",
            PAGEdgeKind::Load => "load",
        };
        format!("label=\"{}\"", kind)
    };

    let output = format!(
        "{:?}",
        Dot::with_attr_getters(
            pag.graph(),
            &[Config::NodeNoLabel, Config::EdgeNoLabel],
            &edge_attr,
            &node_attr,
        )
    );
    match std::fs::write(dot_path, output) {
        Ok(_) => (),
        Err(e) => panic!("Failed to write dot file output: {:?}", e),
    };
}

fn open_writer(path: &Path) -> BufWriter<Box<dyn Write>> {
    BufWriter::new(match path.to_str() {
        Some("stdout") => Box::new(std::io::stdout()) as Box<dyn Write>,
        _ => Box::new(File::create(path).expect("Unable to create file")) as Box<dyn Write>,
    })
}

/// Projects the solved sets down to base nodes and buckets local
/// variables under their methods. Sorted maps keep the output stable.
fn group_pts(
    acx: &AnalysisContext,
    pag: &PAG,
    pt_data: &DiffPTDataTy,
    keep: impl Fn(MethodId) -> bool,
) -> BTreeMap<MethodId, BTreeMap<String, BTreeSet<String>>> {
    let mut grouped: BTreeMap<MethodId, BTreeMap<String, BTreeSet<String>>> = BTreeMap::new();
    for (node, pts) in &pt_data.propa_pts_map {
        if pts.is_empty() {
            continue;
        }
        let base = pag.base_node(*node);
        let method = match pag.node_key(base) {
            NodeKey::LocalVar(v) => v.method,
            _ => continue,
        };
        if !keep(method) {
            continue;
        }
        let var_pts = grouped
            .entry(method)
            .or_default()
            .entry(node_label(acx, pag, base))
            .or_default();
        for pointee in pts {
            var_pts.insert(node_label(acx, pag, pag.base_node(pointee)));
        }
    }
    grouped
}

fn write_grouped<W: Write>(
    acx: &AnalysisContext,
    writer: &mut BufWriter<W>,
    grouped: &BTreeMap<MethodId, BTreeMap<String, BTreeSet<String>>>,
) {
    for (method, vars) in grouped {
        writer
            .write_all(format!("{}\n", acx.method_name(*method)).as_bytes())
            .expect("Unable to write data");
        for (var, pts) in vars {
            writer
                .write_all(format!("\t{} ({}) ==> {{ ", var, pts.len()).as_bytes())
                .expect("Unable to write data");
            for pointee in pts {
                writer
                    .write_all(format!("{} ", pointee).as_bytes())
                    .expect("Unable to write data");
            }
            writer
                .write_all("}\n".as_bytes())
                .expect("Unable to write data");
        }
    }
}
