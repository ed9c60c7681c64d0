// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Loads a serialized [`Program`] from disk and checks its index integrity.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{ensure, Context, Result};

use crate::ir::program::{Program, TypeKind};

pub fn load_program(path: &Path) -> Result<Program> {
    let file = File::open(path)
        .with_context(|| format!("cannot open program file `{}`", path.display()))?;
    let program: Program = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("malformed program file `{}`", path.display()))?;
    validate(&program)
        .with_context(|| format!("inconsistent program file `{}`", path.display()))?;
    Ok(program)
}

/// Bounds-checks every cross-table index so the analysis can use plain
/// indexing afterwards. Statement-level problems are left to the method
/// graph builder, which skips malformed statements with a warning.
fn validate(program: &Program) -> Result<()> {
    let num_types = program.types.len();
    let num_methods = program.methods.len();
    let num_sigs = program.sigs.len();
    let ty_ok = |t: crate::ir::program::TypeId| t.index() < num_types;

    ensure!(
        ty_ok(program.well_known.object),
        "well-known Object type is out of bounds"
    );
    ensure!(
        matches!(
            program.type_data(program.well_known.object).kind,
            TypeKind::Class(_)
        ),
        "well-known Object must be a class"
    );

    for (i, ty) in program.types.iter().enumerate() {
        match &ty.kind {
            TypeKind::Class(c) | TypeKind::Interface(c) => {
                if let Some(sup) = c.superclass {
                    ensure!(ty_ok(sup), "type `{}`: superclass out of bounds", ty.name);
                    ensure!(
                        sup.index() != i,
                        "type `{}` is its own superclass",
                        ty.name
                    );
                }
                for &iface in &c.interfaces {
                    ensure!(ty_ok(iface), "type `{}`: interface out of bounds", ty.name);
                }
                for &m in &c.methods {
                    ensure!(
                        m.index() < num_methods,
                        "type `{}`: declared method out of bounds",
                        ty.name
                    );
                }
                if let Some(clinit) = c.clinit {
                    ensure!(
                        clinit.index() < num_methods,
                        "type `{}`: clinit out of bounds",
                        ty.name
                    );
                }
            }
            TypeKind::Array { elem } => {
                ensure!(ty_ok(*elem), "array type `{}`: element out of bounds", ty.name);
            }
            TypeKind::Primitive => {}
        }
    }

    for (i, m) in program.methods.iter().enumerate() {
        ensure!(m.sig.index() < num_sigs, "method {}: sig out of bounds", i);
        ensure!(
            ty_ok(m.declaring_class),
            "method {}: declaring class out of bounds",
            i
        );
        for &p in &m.param_types {
            ensure!(ty_ok(p), "method {}: parameter type out of bounds", i);
        }
        if let Some(ret) = m.ret_type {
            ensure!(ty_ok(ret), "method {}: return type out of bounds", i);
        }
        if let Some(body) = &m.body {
            for &l in &body.local_types {
                ensure!(ty_ok(l), "method {}: local type out of bounds", i);
            }
        }
    }

    for (i, f) in program.fields.iter().enumerate() {
        ensure!(
            ty_ok(f.declaring_class),
            "field `{}` ({}): declaring class out of bounds",
            f.name,
            i
        );
        ensure!(ty_ok(f.ty), "field `{}` ({}): type out of bounds", f.name, i);
    }

    for (i, a) in program.alloc_sites.iter().enumerate() {
        ensure!(ty_ok(a.ty), "alloc site {}: type out of bounds", i);
        ensure!(
            a.method.index() < num_methods,
            "alloc site {}: method out of bounds",
            i
        );
    }

    if let Some(main) = program.main {
        ensure!(main.index() < num_methods, "main method is out of bounds");
    }
    for &e in &program.entry_points {
        ensure!(e.index() < num_methods, "entry point is out of bounds");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::program::{MethodId, TypeId};
    use crate::ir::testing::ProgramBuilder;

    #[test]
    fn round_trips_through_json() {
        let mut b = ProgramBuilder::new();
        let a = b.class("A", None);
        let main = b.main_method(a);
        let program = b.finish(Some(main));

        let json = serde_json::to_string(&program).unwrap();
        let back: Program = serde_json::from_str(&json).unwrap();
        validate(&back).unwrap();
        assert_eq!(back.types.len(), program.types.len());
        assert_eq!(back.main, Some(main));
    }

    #[test]
    fn rejects_dangling_indices() {
        let mut b = ProgramBuilder::new();
        let a = b.class("A", None);
        let main = b.main_method(a);
        let mut program = b.finish(Some(main));
        program.main = Some(MethodId::new(99));
        assert!(validate(&program).is_err());

        program.main = Some(main);
        program.methods[main.index()].declaring_class = TypeId::new(99);
        assert!(validate(&program).is_err());
    }
}
