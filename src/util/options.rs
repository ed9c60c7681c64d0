// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Analysis options.

use std::str::FromStr;

use clap::parser::ValueSource;
use clap::{Arg, Command};

use crate::pta::PTAPattern;

const JPTA_USAGE: &str = r#"jpta [OPTIONS] INPUT"#;

/// The version information from Cargo.toml.
fn version() -> &'static str {
    let version_info = rustc_tools_util::get_version_info!();
    let version = format!("v{}.{}.{}", version_info.major, version_info.minor, version_info.patch);
    Box::leak(version.into_boxed_str())
}

/// Creates the clap::Command metadata for argument parsing.
fn make_options_parser() -> Command<'static> {
    // We could put this into lazy_static! with a Mutex around, but we really do not expect
    // to construct this more then once per regular program run.
    let parser = Command::new("jpta")
        .no_binary_name(true)
        .override_usage(JPTA_USAGE)
        .version(version())
        .arg(Arg::new("pta")
            .long("pta")
            .takes_value(true)
            .default_value("insens")
            .value_parser(PTAPattern::from_str)
            .help("The analysis to run, e.g. `insens`, `2o`, `1c+1h` or `eagle-2o`.")
            .long_help("An optional `eagle-` prefix selects the guided analysis, a digit \
                        gives the context depth, then a context kind (callsite, object, \
                        type, param or insensitive), then an optional `+Nh` heap depth."))
        .arg(Arg::new("main-class")
            .long("main")
            .takes_value(true)
            .help("The class whose main method anchors the entry set."))
        .arg(Arg::new("single-entry")
            .long("single-entry")
            .takes_value(false)
            .help("Use only the main method of the main class as an entry point."))
        .arg(Arg::new("clinit")
            .long("clinit")
            .takes_value(true)
            .value_parser(["eager", "lazy"])
            .default_value("lazy")
            .help("When class initializers become reachable.")
            .long_help("`eager` folds every class initializer into the entry method up \
                        front; `lazy` discovers them as their classes are first used."))
        .arg(Arg::new("static-context")
            .long("static-context")
            .takes_value(true)
            .value_parser(["caller", "empty", "this"])
            .default_value("this")
            .help("How contexts are chosen for static call targets.")
            .long_help("`caller` reuses the calling context, `empty` analyzes static \
                        targets context-insensitively, and `this` dispatches them on the \
                        objects the caller's receiver may be."))
        .arg(Arg::new("api-call-depth")
            .long("api-call-depth")
            .takes_value(true)
            .value_parser(clap::value_parser!(u32))
            .help("Bound on call chains that never leave library code.")
            .long_help("Call edges whose target sits deeper than this many library-only \
                        hops are dropped. An application target resets the depth to zero. \
                        Unset means unbounded."))
        .arg(Arg::new("string-constants")
            .long("string-constants")
            .takes_value(false)
            .help("Distinguish string constants instead of merging them into one object."))
        .arg(Arg::new("types-for-sites")
            .long("types-for-sites")
            .takes_value(false)
            .help("Merge allocation sites of the same type into one abstract object."))
        .arg(Arg::new("field-based")
            .long("field-based")
            .takes_value(false)
            .help("Collapse instance field accesses into one variable per field."))
        .arg(Arg::new("rta")
            .long("rta")
            .takes_value(false)
            .help("Collapse every local into a single variable, degrading to rapid type analysis."))
        .arg(Arg::new("simple-edges-bidirectional")
            .long("simple-edges-bidirectional")
            .takes_value(false)
            .help("Treat every copy between variables as flowing both ways."))
        .arg(Arg::new("no-topo-sort")
            .long("no-topo-sort")
            .takes_value(false)
            .hide(true)
            .help("Process worklist entries in creation order instead of topological order."))
        .arg(Arg::new("dump-stats")
            .long("dump-stats")
            .takes_value(false)
            .help("Dump the statistics of the analysis results."))
        .arg(Arg::new("dump-lib-pts")
            .long("dump-lib-pts")
            .takes_value(false)
            .help("Include library variables in the points-to dump."))
        .arg(Arg::new("call-graph-output")
            .long("dump-call-graph")
            .takes_value(true)
            .help("Dump the call graph in DOT format to the output file."))
        .arg(Arg::new("pts-output")
            .long("dump-pts")
            .takes_value(true)
            .help("Dump points-to results to the output file."))
        .arg(Arg::new("pag-output")
            .long("dump-pag")
            .takes_value(true)
            .help("Dump the pointer assignment graph in DOT format to the output file."))
        .arg(Arg::new("INPUT")
            .help("The program model file to be analyzed.")
        );
    parser
}

/// When class initializers are folded into the synthetic entry method.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ClinitMode {
    /// All initializers of all classes, before the analysis starts.
    Eager,
    /// Only initializers of classes the analysis has seen used.
    Lazy,
}

/// Context choice for the target of a static call.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum StaticContextMode {
    /// The static target inherits the caller's context.
    Caller,
    /// The static target is analyzed under the empty context.
    Empty,
    /// The static target is dispatched on the pointees of the caller's
    /// receiver, as if it had one.
    This,
}

#[derive(Clone, Debug)]
pub struct AnalysisOptions {
    pub pta: PTAPattern,
    /// The program model file to analyze.
    pub program: Option<String>,
    pub main_class: Option<String>,
    pub single_entry: bool,
    pub clinit_mode: ClinitMode,
    pub static_context: StaticContextMode,
    /// `None` leaves library call chains unbounded.
    pub api_call_depth: Option<u32>,
    // object and variable merging switches
    pub string_constants: bool,
    pub types_for_sites: bool,
    pub field_based: bool,
    pub rta: bool,
    /// Insert the reverse of every simple edge as well.
    pub bidirectional_simple_edges: bool,

    pub topo_sort: bool,

    pub dump_stats: bool,
    pub dump_lib_pts: bool,
    pub call_graph_output: Option<String>,
    pub pts_output: Option<String>,
    pub pag_output: Option<String>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            pta: PTAPattern::insensitive(),
            program: None,
            main_class: None,
            single_entry: false,
            clinit_mode: ClinitMode::Lazy,
            static_context: StaticContextMode::This,
            api_call_depth: None,
            string_constants: false,
            types_for_sites: false,
            field_based: false,
            rta: false,
            bidirectional_simple_edges: false,
            topo_sort: true,
            dump_stats: false,
            dump_lib_pts: false,
            call_graph_output: None,
            pts_output: None,
            pag_output: None,
        }
    }
}

impl AnalysisOptions {
    /// Parses options from a list of strings, layering them over whatever is
    /// already set. Called once for the flags environment variable and once
    /// for the command line, so that the latter wins.
    pub fn parse_from_args(&mut self, args: &[String]) {
        let matches = match make_options_parser().try_get_matches_from(args.iter()) {
            Ok(matches) => matches,
            Err(e) => e.exit(),
        };

        if matches.value_source("pta") == Some(ValueSource::CommandLine) {
            self.pta = matches
                .get_one::<PTAPattern>("pta")
                .expect("defaulted")
                .clone();
        }
        if let Some(main) = matches.get_one::<String>("main-class") {
            self.main_class = Some(main.clone());
        }
        self.single_entry |= matches.contains_id("single-entry");

        if matches.value_source("clinit") == Some(ValueSource::CommandLine) {
            self.clinit_mode = match matches.get_one::<String>("clinit").expect("defaulted").as_str() {
                "eager" => ClinitMode::Eager,
                "lazy" => ClinitMode::Lazy,
                _ => unreachable!(),
            };
        }
        if matches.value_source("static-context") == Some(ValueSource::CommandLine) {
            self.static_context = match matches
                .get_one::<String>("static-context")
                .expect("defaulted")
                .as_str()
            {
                "caller" => StaticContextMode::Caller,
                "empty" => StaticContextMode::Empty,
                "this" => StaticContextMode::This,
                _ => unreachable!(),
            };
        }
        if let Some(depth) = matches.get_one::<u32>("api-call-depth") {
            self.api_call_depth = Some(*depth);
        }

        self.string_constants |= matches.contains_id("string-constants");
        self.types_for_sites |= matches.contains_id("types-for-sites");
        self.field_based |= matches.contains_id("field-based");
        self.rta |= matches.contains_id("rta");
        self.bidirectional_simple_edges |= matches.contains_id("simple-edges-bidirectional");
        self.topo_sort &= !matches.contains_id("no-topo-sort");

        self.dump_stats |= matches.contains_id("dump-stats");
        self.dump_lib_pts |= matches.contains_id("dump-lib-pts");
        if let Some(path) = matches.get_one::<String>("call-graph-output") {
            self.call_graph_output = Some(path.clone());
        }
        if let Some(path) = matches.get_one::<String>("pts-output") {
            self.pts_output = Some(path.clone());
        }
        if let Some(path) = matches.get_one::<String>("pag-output") {
            self.pag_output = Some(path.clone());
        }

        if let Some(input) = matches.get_one::<String>("INPUT") {
            self.program = Some(input.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pta::ContextKind;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn defaults_survive_an_empty_command_line() {
        let mut options = AnalysisOptions::default();
        options.parse_from_args(&args(&[]));
        assert!(options.pta.is_insensitive());
        assert_eq!(options.clinit_mode, ClinitMode::Lazy);
        assert_eq!(options.static_context, StaticContextMode::This);
        assert!(options.topo_sort);
        assert!(options.program.is_none());
    }

    #[test]
    fn later_layers_override_earlier_ones() {
        let mut options = AnalysisOptions::default();
        options.parse_from_args(&args(&["--pta", "2o", "--single-entry"]));
        options.parse_from_args(&args(&["--main", "App", "prog.json"]));

        // Settings from the first layer are kept unless re-specified.
        assert_eq!(options.pta.kind, ContextKind::Object);
        assert!(options.single_entry);
        assert_eq!(options.main_class.as_deref(), Some("App"));
        assert_eq!(options.program.as_deref(), Some("prog.json"));
    }

    #[test]
    fn dump_options_take_paths() {
        let mut options = AnalysisOptions::default();
        options.parse_from_args(&args(&[
            "--dump-call-graph",
            "cg.dot",
            "--dump-pts",
            "pts.txt",
            "--dump-stats",
        ]));
        assert_eq!(options.call_graph_output.as_deref(), Some("cg.dot"));
        assert_eq!(options.pts_output.as_deref(), Some("pts.txt"));
        assert!(options.dump_stats);
        assert!(options.pag_output.is_none());
    }
}
