// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! The pointer analyses.
//!
//! Which analysis runs is selected by a compact command such as `2o`,
//! `callsite+1h` or `eagle-2obj`, parsed into a [`PTAPattern`]. All
//! variants share the engine in [`context_sensitive`]; the insensitive
//! analysis is the degenerate case where every context is empty.

use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use lazy_static::lazy_static;
use regex::Regex;

use self::context_sensitive::ContextSensitivePTA;
use self::context_strategy::{ContextInsensitive, KSensitive};
use crate::graph::pag::{PAGEdgeId, PAGNodeId};
use crate::ir::analysis_context::AnalysisContext;
use crate::pts_set::points_to::HybridPointsToSet;
use crate::pts_set::pt_data::DiffPTData;
use crate::util::mem_watcher::MemoryWatcher;

pub mod context_sensitive;
pub mod context_strategy;
pub mod eagle;
pub mod propagator;

pub type NodeId = PAGNodeId;
pub type EdgeId = PAGEdgeId;
pub type PointsTo<T> = HybridPointsToSet<T>;
pub type DiffPTDataTy = DiffPTData<NodeId, NodeId, PointsTo<NodeId>>;

pub trait PointerAnalysis {
    fn analyze(&mut self);
}

/// What a context element records about the call that opened it.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ContextKind {
    Insensitive,
    /// The call site itself.
    CallSite,
    /// The receiver's abstract object.
    Object,
    /// The class that allocated the receiver.
    Type,
    /// The receiver object together with the syntactic argument list.
    Param,
}

lazy_static! {
    static ref PTA_CMD: Regex = Regex::new(
        r"^((eagle|e)-)?(\d*)(insensitive|insens|ci|callsite|call|c|object|obj|o|type|t|param|p)(\+?(\d*)h(eap)?)?$"
    )
    .unwrap();
}

/// A parsed analysis command: an optional `eagle-` prefix, a context depth,
/// a context kind and an optional `+Nh[eap]` heap depth.
///
/// Omitted depths default to `k = 1` and `hk = k - 1`; a bare `h` means
/// `hk = 1`. Depth zero degrades to the insensitive analysis.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PTAPattern {
    pub kind: ContextKind,
    /// Run the selective pre-analysis before the main analysis.
    pub eagle: bool,
    k: usize,
    hk: usize,
}

impl PTAPattern {
    pub fn insensitive() -> Self {
        PTAPattern {
            kind: ContextKind::Insensitive,
            eagle: false,
            k: 0,
            hk: 0,
        }
    }

    pub fn new(kind: ContextKind, k: usize, hk: usize) -> Self {
        if kind == ContextKind::Insensitive || k == 0 {
            return Self::insensitive();
        }
        PTAPattern {
            kind,
            eagle: false,
            k,
            hk,
        }
    }

    pub fn is_insensitive(&self) -> bool {
        self.kind == ContextKind::Insensitive
    }

    /// Maximum number of context elements carried by a method context.
    pub fn context_depth(&self) -> usize {
        self.k
    }

    /// Maximum number of context elements carried by a heap context.
    pub fn heap_context_depth(&self) -> usize {
        self.hk
    }
}

impl FromStr for PTAPattern {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = match PTA_CMD.captures(s) {
            Some(caps) => caps,
            None => bail!("unsupported pta command `{}`", s),
        };
        let eagle = caps.get(2).is_some();
        let k: usize = match &caps[3] {
            "" => 1,
            digits => digits.parse()?,
        };
        let kind = match &caps[4] {
            "insensitive" | "insens" | "ci" => ContextKind::Insensitive,
            "callsite" | "call" | "c" => ContextKind::CallSite,
            "object" | "obj" | "o" => ContextKind::Object,
            "type" | "t" => ContextKind::Type,
            "param" | "p" => ContextKind::Param,
            other => unreachable!("alias `{}` escaped the pattern", other),
        };
        if kind == ContextKind::Insensitive || k == 0 {
            return Ok(Self::insensitive());
        }
        if eagle && kind == ContextKind::CallSite {
            bail!("the pre-analysis is not designed for call-site sensitivity");
        }
        let hk: usize = match caps.get(6) {
            None => k - 1,
            Some(digits) if digits.as_str().is_empty() => 1,
            Some(digits) => digits.as_str().parse()?,
        };
        if kind == ContextKind::CallSite {
            if hk > k {
                bail!("heap context depth cannot exceed method context depth");
            }
        } else if hk > k || hk + 1 < k {
            bail!("heap context depth can only be k or k-1 for this kind of analysis");
        }
        // The guided analysis always truncates heap contexts by one.
        let hk = if eagle { k - 1 } else { hk };
        Ok(PTAPattern { kind, eagle, k, hk })
    }
}

impl fmt::Display for PTAPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_insensitive() {
            return f.write_str("insensitive");
        }
        if self.eagle {
            f.write_str("eagle-")?;
        }
        let kind = match self.kind {
            ContextKind::CallSite => "callsite",
            ContextKind::Object => "object",
            ContextKind::Type => "type",
            ContextKind::Param => "param",
            ContextKind::Insensitive => unreachable!(),
        };
        write!(f, "{}{}+{}heap", self.k, kind, self.hk)
    }
}

/// Runs the analysis selected by the options in `acx` and dumps whatever
/// results the options ask for.
pub fn run_pta(acx: &AnalysisContext) {
    let mut mem_watcher = MemoryWatcher::new();
    mem_watcher.start();

    let pattern = acx.options.pta.clone();
    if pattern.eagle {
        eagle::EagleGuidedPTA::new(acx, &pattern).analyze();
    } else if pattern.is_insensitive() {
        ContextSensitivePTA::new(acx, ContextInsensitive::new(), None).analyze();
    } else {
        ContextSensitivePTA::new(acx, KSensitive::from_pattern(&pattern), None).analyze();
    }

    mem_watcher.stop();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> PTAPattern {
        s.parse().unwrap()
    }

    #[test]
    fn defaults_fill_in_depth_and_heap_depth() {
        let p = parse("obj");
        assert_eq!(p.kind, ContextKind::Object);
        assert_eq!(p.context_depth(), 1);
        assert_eq!(p.heap_context_depth(), 0);

        let p = parse("2o");
        assert_eq!((p.context_depth(), p.heap_context_depth()), (2, 1));

        // A bare `h` asks for one heap element.
        let p = parse("2o+h");
        assert_eq!(p.heap_context_depth(), 1);
    }

    #[test]
    fn aliases_and_kinds() {
        assert_eq!(parse("ci").kind, ContextKind::Insensitive);
        assert_eq!(parse("insens").kind, ContextKind::Insensitive);
        assert_eq!(parse("3callsite").kind, ContextKind::CallSite);
        assert_eq!(parse("2t").kind, ContextKind::Type);
        assert_eq!(parse("2p").kind, ContextKind::Param);
    }

    #[test]
    fn depth_zero_is_insensitive() {
        let p = parse("0o");
        assert!(p.is_insensitive());
        assert_eq!(p.to_string(), "insensitive");
    }

    #[test]
    fn callsite_allows_shallow_heap_contexts() {
        // hk may be anywhere in [0, k] for call-site sensitivity.
        assert_eq!(parse("2c+0h").heap_context_depth(), 0);
        assert_eq!(parse("2c+2h").heap_context_depth(), 2);
        assert!("2c+3h".parse::<PTAPattern>().is_err());
    }

    #[test]
    fn object_heap_depth_is_k_or_k_minus_one() {
        assert!("2o+0h".parse::<PTAPattern>().is_err());
        assert_eq!(parse("2o+2h").heap_context_depth(), 2);
        assert!("3t+1h".parse::<PTAPattern>().is_err());
        // Heap contexts can never be deeper than method contexts.
        assert!("2o+3h".parse::<PTAPattern>().is_err());
    }

    #[test]
    fn eagle_prefix() {
        let p = parse("eagle-2o");
        assert!(p.eagle);
        assert_eq!(p.kind, ContextKind::Object);
        assert_eq!(p.to_string(), "eagle-2object+1heap");

        let p = parse("e-2t");
        assert!(p.eagle);

        assert!("e-2c".parse::<PTAPattern>().is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!("2x".parse::<PTAPattern>().is_err());
        assert!("o2".parse::<PTAPattern>().is_err());
        assert!("".parse::<PTAPattern>().is_err());
    }

    #[test]
    fn display_round_trips() {
        for cmd in ["2object+1heap", "3callsite+2heap", "insensitive"] {
            assert_eq!(parse(cmd).to_string(), cmd);
        }
    }
}
