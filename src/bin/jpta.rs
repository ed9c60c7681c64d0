// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! The main routine of `jpta`.
//!
//! Loads a serialized program model, runs the pointer analysis the options
//! select and writes whatever artifacts they ask for.

use log::*;
use std::env;
use std::path::Path;
use std::time::Instant;

use anyhow::{bail, Result};

use jpta::ir::analysis_context::AnalysisContext;
use jpta::ir::loader;
use jpta::pta;
use jpta::util::options::AnalysisOptions;

fn main() -> Result<()> {
    // Initialize loggers.
    if env::var("JPTA_LOG").is_ok() {
        let e = env_logger::Env::new()
            .filter("JPTA_LOG")
            .write_style("JPTA_LOG_STYLE");
        env_logger::init_from_env(e);
    }

    // Get any options specified via the JPTA_FLAGS environment variable.
    let mut options = AnalysisOptions::default();
    let jpta_flags = env::var("JPTA_FLAGS").unwrap_or_default();
    let jpta_args: Vec<String> = serde_json::from_str(&jpta_flags).unwrap_or_default();
    options.parse_from_args(&jpta_args);

    // Arguments supplied on the command line override the environment.
    let args: Vec<String> = env::args().skip(1).collect();
    options.parse_from_args(&args);
    info!("PTA Options: {:?}", options);

    let program_path = match &options.program {
        Some(path) => path.clone(),
        None => bail!("no program model file given; see `jpta --help`"),
    };

    let now = Instant::now();
    let program = loader::load_program(Path::new(&program_path))?;
    info!(
        "Loaded {} in {}",
        program_path,
        humantime::format_duration(now.elapsed())
    );

    let acx = AnalysisContext::new(program, options)?;
    pta::run_pta(&acx);
    Ok(())
}
