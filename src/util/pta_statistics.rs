// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! End-of-run analysis statistics, both in context-qualified form and
//! projected down to the context-free view.

use log::*;
use std::collections::{HashMap, HashSet};
use std::io::{BufWriter, Write};

use crate::graph::call_graph::CSCallGraph;
use crate::graph::pag::{PAGNodeId, PAG};
use crate::ir::analysis_context::AnalysisContext;
use crate::pta::DiffPTDataTy;
use crate::pts_set::points_to::PointsToSet;

pub struct PTAStatistics {
    pub reachable_methods: usize,
    pub app_methods: usize,
    pub method_instances: usize,
    pub call_edges: usize,
    pub contexts: usize,
    pub pag_nodes: usize,
    pub pag_edges: usize,
    pub cs_pointers: usize,
    pub cs_pts_relations: usize,
    pub ci_pointers: usize,
    pub ci_pts_relations: usize,
}

impl PTAStatistics {
    pub fn collect(
        acx: &AnalysisContext,
        pag: &PAG,
        call_graph: &CSCallGraph,
        pt_data: &DiffPTDataTy,
        contexts: usize,
    ) -> Self {
        let mut methods = HashSet::new();
        for cs_method in call_graph.method_nodes.keys() {
            methods.insert(cs_method.method);
        }
        let app_methods = methods.iter().filter(|&&m| acx.is_application(m)).count();

        let cs_pointers = pt_data.propa_pts_map.len();
        let mut cs_pts_relations = 0;
        let mut ci_pts_map: HashMap<PAGNodeId, HashSet<PAGNodeId>> = HashMap::new();
        for (node, pts) in &pt_data.propa_pts_map {
            cs_pts_relations += pts.count();
            let ci_pts = ci_pts_map.entry(pag.base_node(*node)).or_default();
            for pointee in pts {
                ci_pts.insert(pag.base_node(pointee));
            }
        }
        let ci_pointers = ci_pts_map.len();
        let ci_pts_relations = ci_pts_map.values().map(HashSet::len).sum();

        PTAStatistics {
            reachable_methods: methods.len(),
            app_methods,
            method_instances: call_graph.method_nodes.len(),
            call_edges: call_graph.num_edges(),
            contexts,
            pag_nodes: pag.num_nodes(),
            pag_edges: pag.num_edges(),
            cs_pointers,
            cs_pts_relations,
            ci_pointers,
            ci_pts_relations,
        }
    }

    pub fn report(&self) {
        info!(
            "Reachable methods: {} ({} application)",
            self.reachable_methods, self.app_methods
        );
        info!(
            "Method instances: {} over {} contexts",
            self.method_instances, self.contexts
        );
        info!("Call graph edges: {}", self.call_edges);
        info!("PAG: {} nodes, {} edges", self.pag_nodes, self.pag_edges);
        info!(
            "CS points-to: {} relations over {} pointers (avg {:.2})",
            self.cs_pts_relations,
            self.cs_pointers,
            avg(self.cs_pts_relations, self.cs_pointers)
        );
        info!(
            "CI points-to: {} relations over {} pointers (avg {:.2})",
            self.ci_pts_relations,
            self.ci_pointers,
            avg(self.ci_pts_relations, self.ci_pointers)
        );
    }

    /// Writes the full statistics block to stdout.
    pub fn dump(&self) {
        let mut stat_writer = BufWriter::new(Box::new(std::io::stdout()) as Box<dyn Write>);

        info!("Dumping pta statistics...");
        stat_writer
            .write_all("##########################################################\n".as_bytes())
            .expect("Unable to write data");
        self.dump_call_graph_stat(&mut stat_writer);
        stat_writer
            .write_all("----------------------------------------------------------\n".as_bytes())
            .expect("Unable to write data");
        self.dump_pts_stat(&mut stat_writer);
        stat_writer
            .write_all("##########################################################\n".as_bytes())
            .expect("Unable to write data");
    }

    fn dump_call_graph_stat<W: Write>(&self, stat_writer: &mut BufWriter<W>) {
        stat_writer
            .write_all("Call Graph Statistics: \n".as_bytes())
            .expect("Unable to write data");
        stat_writer
            .write_all(format!("#Reachable methods: {}\n", self.reachable_methods).as_bytes())
            .expect("Unable to write data");
        stat_writer
            .write_all(format!("#Application methods: {}\n", self.app_methods).as_bytes())
            .expect("Unable to write data");
        stat_writer
            .write_all(format!("#Method instances: {}\n", self.method_instances).as_bytes())
            .expect("Unable to write data");
        stat_writer
            .write_all(format!("#Call edges: {}\n", self.call_edges).as_bytes())
            .expect("Unable to write data");
        stat_writer
            .write_all(format!("#Contexts: {}\n", self.contexts).as_bytes())
            .expect("Unable to write data");
        stat_writer
            .write_all(format!("#PAG nodes: {}\n", self.pag_nodes).as_bytes())
            .expect("Unable to write data");
        stat_writer
            .write_all(format!("#PAG edges: {}\n", self.pag_edges).as_bytes())
            .expect("Unable to write data");
    }

    fn dump_pts_stat<W: Write>(&self, stat_writer: &mut BufWriter<W>) {
        stat_writer
            .write_all("CS Points-to Statistics: \n".as_bytes())
            .expect("Unable to write data");
        stat_writer
            .write_all(format!("#Pointers: {}\n", self.cs_pointers).as_bytes())
            .expect("Unable to write data");
        stat_writer
            .write_all(format!("#Points-to relations: {}\n", self.cs_pts_relations).as_bytes())
            .expect("Unable to write data");
        stat_writer
            .write_all(
                format!(
                    "#Avg points-to size: {}\n",
                    avg(self.cs_pts_relations, self.cs_pointers)
                )
                .as_bytes(),
            )
            .expect("Unable to write data");

        stat_writer
            .write_all("CI Points-to Statistics: \n".as_bytes())
            .expect("Unable to write data");
        stat_writer
            .write_all(format!("#Pointers: {}\n", self.ci_pointers).as_bytes())
            .expect("Unable to write data");
        stat_writer
            .write_all(format!("#Points-to relations: {}\n", self.ci_pts_relations).as_bytes())
            .expect("Unable to write data");
        stat_writer
            .write_all(
                format!(
                    "#Avg points-to size: {}\n",
                    avg(self.ci_pts_relations, self.ci_pointers)
                )
                .as_bytes(),
            )
            .expect("Unable to write data");
    }
}

fn avg(relations: usize, pointers: usize) -> f64 {
    if pointers == 0 {
        0.0
    } else {
        relations as f64 / pointers as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::statement::{CallKind, IdentityValue};
    use crate::ir::testing::*;
    use crate::pta::context_sensitive::ContextSensitivePTA;
    use crate::pta::context_strategy::{ContextStrategy, KSensitive};
    use crate::pta::{ContextKind, PointerAnalysis};
    use crate::util::options::AnalysisOptions;

    #[test]
    fn projection_collapses_context_instances() {
        let mut b = ProgramBuilder::new();
        let a = b.class("A", None);
        let id = b.method(a, "A id(A)", false, &[a], Some(a));
        b.set_body(
            id,
            &[a, a],
            vec![ident(lid(0), IdentityValue::Param(0)), ret(local(lid(0)))],
        );
        let main = b.main_method(a);
        let o1 = b.alloc(main, a);
        let o2 = b.alloc(main, a);
        b.set_body(
            main,
            &[a, a, a, a],
            vec![
                assign(local(lid(0)), new_obj(o1)),
                assign(local(lid(1)), new_obj(o2)),
                invoke(CallKind::Virtual, id, Some(lid(0)), vec![local(lid(0))], Some(lid(2))),
                invoke(CallKind::Virtual, id, Some(lid(1)), vec![local(lid(1))], Some(lid(3))),
            ],
        );
        let acx = AnalysisContext::new(b.finish(Some(main)), AnalysisOptions::default()).unwrap();

        let mut pta =
            ContextSensitivePTA::new(&acx, KSensitive::new(ContextKind::Object, 2, 1), None);
        pta.analyze();

        let stat = PTAStatistics::collect(
            &acx,
            &pta.pag,
            &pta.call_graph,
            &pta.pt_data,
            pta.strategy.num_contexts(),
        );

        // `id` runs once per receiver object, everything else once.
        assert!(stat.method_instances > stat.reachable_methods);
        assert!(stat.contexts >= 2);
        assert!(stat.ci_pointers <= stat.cs_pointers);
        assert!(stat.ci_pts_relations <= stat.cs_pts_relations);
        // The test program has no library classes.
        assert_eq!(stat.app_methods, stat.reachable_methods);
    }
}
