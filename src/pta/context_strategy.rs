// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

//! Context selection policies.
//!
//! A [`ContextStrategy`] decides which calling context the target of a call
//! is analyzed under and how much of that context its allocations keep.
//! The four built-in policies share one implementation, [`KSensitive`],
//! dispatching on the parsed [`ContextKind`]; [`ContextInsensitive`] pins
//! everything to the empty context. Custom policies implement the trait.

use std::rc::Rc;

use crate::graph::pag::{AllocKey, NodeKey, PAGNodeId, PAG};
use crate::ir::analysis_context::AnalysisContext;
use crate::ir::call_site::{BaseCallSite, CallSite};
use crate::ir::context::{Context, ContextCache, ContextElement, ContextId, EMPTY_CONTEXT_ID};
use crate::ir::program::TypeId;
use crate::pta::{ContextKind, PTAPattern};
use crate::util::options::StaticContextMode;

/// One element of a calling context.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum ContextElem {
    /// The call site that opened the context.
    CallSite(BaseCallSite),
    /// The receiver's abstract object, as its context-free alloc node.
    HeapObj(PAGNodeId),
    /// The class whose code allocated the receiver.
    Type(TypeId),
    /// The receiver object together with the site's syntactic arguments.
    Params {
        base: Option<PAGNodeId>,
        args: Rc<Vec<Option<PAGNodeId>>>,
    },
}

impl ContextElement for ContextElem {}

/// Chooses contexts for call targets and for heap objects.
///
/// Implementations own the cache that maps contexts to dense ids, so every
/// [`ContextId`] in an analysis run comes from one place.
pub trait ContextStrategy {
    type E: ContextElement;

    /// Method context depth; zero means insensitive.
    fn context_depth(&self) -> usize;

    fn is_sensitive(&self) -> bool {
        self.context_depth() > 0
    }

    fn num_contexts(&self) -> usize;

    /// The interned context behind an id this strategy produced.
    fn get_context(&self, id: ContextId) -> Rc<Context<Self::E>>;

    /// The context the target of `site` is analyzed under. `receiver` is
    /// the pointee the call is being dispatched to; `None` stands for a
    /// static target, which makes the receiver-based policies fall back
    /// per the static-context mode.
    fn select_context(
        &mut self,
        acx: &AnalysisContext,
        pag: &PAG,
        caller_ctx: ContextId,
        site: &CallSite,
        receiver: Option<PAGNodeId>,
    ) -> ContextId;

    /// Truncates a method context to the part its allocations keep.
    fn select_heap_context(&mut self, ctx: ContextId) -> ContextId;
}

/// Every method and object lives in the empty context.
pub struct ContextInsensitive {
    empty: Rc<Context<ContextElem>>,
}

impl ContextInsensitive {
    pub fn new() -> Self {
        ContextInsensitive {
            empty: Context::new_empty(),
        }
    }
}

impl Default for ContextInsensitive {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextStrategy for ContextInsensitive {
    type E = ContextElem;

    fn context_depth(&self) -> usize {
        0
    }

    fn num_contexts(&self) -> usize {
        1
    }

    fn get_context(&self, _id: ContextId) -> Rc<Context<ContextElem>> {
        self.empty.clone()
    }

    fn select_context(
        &mut self,
        _acx: &AnalysisContext,
        _pag: &PAG,
        _caller_ctx: ContextId,
        _site: &CallSite,
        _receiver: Option<PAGNodeId>,
    ) -> ContextId {
        EMPTY_CONTEXT_ID
    }

    fn select_heap_context(&mut self, _ctx: ContextId) -> ContextId {
        EMPTY_CONTEXT_ID
    }
}

/// The built-in k-limited policies.
///
/// Call-site sensitivity prepends the site to the caller's context; object
/// and type sensitivity prepend a token of the receiver object to the
/// *receiver's* heap context; parameter sensitivity keys the context on the
/// receiver object plus the site's argument list and never grows deeper
/// than one element.
pub struct KSensitive {
    kind: ContextKind,
    k: usize,
    hk: usize,
    cache: ContextCache<ContextElem>,
}

impl KSensitive {
    /// Builds the strategy a parsed analysis command asks for. The pattern
    /// has already validated the depth constraints.
    pub fn from_pattern(pattern: &PTAPattern) -> Self {
        debug_assert!(!pattern.is_insensitive());
        KSensitive::new(
            pattern.kind,
            pattern.context_depth(),
            pattern.heap_context_depth(),
        )
    }

    pub fn new(kind: ContextKind, k: usize, hk: usize) -> Self {
        KSensitive {
            kind,
            k,
            hk,
            cache: ContextCache::new(),
        }
    }

    /// The receiver's context-free alloc node together with its heap
    /// context.
    fn receiver_parts(&self, pag: &PAG, obj: PAGNodeId) -> (PAGNodeId, Rc<Context<ContextElem>>) {
        match pag.node_key(obj) {
            NodeKey::ContextAlloc { cid, base } => (base, self.cache.get_context(cid).unwrap()),
            _ => (obj, self.cache.get_context(EMPTY_CONTEXT_ID).unwrap()),
        }
    }

    fn static_fallback(&self, acx: &AnalysisContext, caller_ctx: ContextId) -> ContextId {
        match acx.options.static_context {
            StaticContextMode::Caller => caller_ctx,
            _ => EMPTY_CONTEXT_ID,
        }
    }
}

impl ContextStrategy for KSensitive {
    type E = ContextElem;

    fn context_depth(&self) -> usize {
        self.k
    }

    fn num_contexts(&self) -> usize {
        self.cache.num_contexts()
    }

    fn get_context(&self, id: ContextId) -> Rc<Context<ContextElem>> {
        self.cache.get_context(id).unwrap()
    }

    fn select_context(
        &mut self,
        acx: &AnalysisContext,
        pag: &PAG,
        caller_ctx: ContextId,
        site: &CallSite,
        receiver: Option<PAGNodeId>,
    ) -> ContextId {
        let ctx = match self.kind {
            ContextKind::CallSite => {
                let caller = self.get_context(caller_ctx);
                Context::new_k_limited_context(
                    &caller,
                    ContextElem::CallSite(site.callsite),
                    self.k,
                )
            }
            ContextKind::Object => {
                let obj = match receiver {
                    Some(obj) => obj,
                    None => return self.static_fallback(acx, caller_ctx),
                };
                let (base, heap_ctx) = self.receiver_parts(pag, obj);
                Context::new_k_limited_context(&heap_ctx, ContextElem::HeapObj(base), self.k)
            }
            ContextKind::Type => {
                let obj = match receiver {
                    Some(obj) => obj,
                    None => return self.static_fallback(acx, caller_ctx),
                };
                let (base, heap_ctx) = self.receiver_parts(pag, obj);
                let class = allocating_class(acx, pag, base);
                Context::new_k_limited_context(&heap_ctx, ContextElem::Type(class), self.k)
            }
            ContextKind::Param => {
                let base = receiver.map(|obj| pag.base_node(obj));
                Context::new(vec![ContextElem::Params {
                    base,
                    args: site.args.clone(),
                }])
            }
            ContextKind::Insensitive => return EMPTY_CONTEXT_ID,
        };
        self.cache.get_context_id(&ctx)
    }

    fn select_heap_context(&mut self, ctx: ContextId) -> ContextId {
        if self.hk >= self.k {
            return ctx;
        }
        if self.hk == 0 {
            return EMPTY_CONTEXT_ID;
        }
        let full = self.get_context(ctx);
        if full.len() <= self.hk {
            return ctx;
        }
        let truncated = Context::k_limited_context(&full, self.hk);
        self.cache.get_context_id(&truncated)
    }
}

/// The class whose code contains the allocation, used as the type-context
/// token. Merged and special objects fall back to their own type.
fn allocating_class(acx: &AnalysisContext, pag: &PAG, alloc: PAGNodeId) -> TypeId {
    if let NodeKey::Alloc(AllocKey::Site(site)) = pag.node_key(alloc) {
        let method = acx.program.alloc_site(site).method;
        acx.program.method_data(method).declaring_class
    } else {
        pag.node_type(alloc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::program::MethodId;
    use crate::ir::statement::CallKind;
    use crate::ir::testing::ProgramBuilder;
    use crate::util::options::AnalysisOptions;

    struct Fixture {
        acx: AnalysisContext,
        pag: PAG,
        method: MethodId,
        allocs: Vec<PAGNodeId>,
    }

    fn fixture(options: AnalysisOptions) -> Fixture {
        let mut b = ProgramBuilder::new();
        let a = b.class("A", None);
        let c = b.class("C", None);
        let main = b.main_method(a);
        let m = b.method(a, "void m()", false, &[], None);
        let s1 = b.alloc(m, c);
        let s2 = b.alloc(m, c);
        let acx = AnalysisContext::new(b.finish(Some(main)), options).unwrap();

        let mut pag = PAG::new();
        let allocs = vec![
            pag.get_or_insert_alloc(&acx, AllocKey::Site(s1)),
            pag.get_or_insert_alloc(&acx, AllocKey::Site(s2)),
        ];
        Fixture {
            acx,
            pag,
            method: m,
            allocs,
        }
    }

    fn site_at(method: MethodId, stmt: usize) -> CallSite {
        CallSite::new(
            BaseCallSite::new(method, stmt),
            CallKind::Virtual,
            method,
            None,
            Vec::new(),
            None,
        )
    }

    fn elems(strategy: &impl ContextStrategy<E = ContextElem>, id: ContextId) -> Vec<ContextElem> {
        strategy.get_context(id).context_elems.clone()
    }

    #[test]
    fn callsite_contexts_nest_and_truncate() {
        let f = fixture(AnalysisOptions::default());
        let mut s = KSensitive::new(ContextKind::CallSite, 2, 1);
        let (s0, s1, s2) = (site_at(f.method, 0), site_at(f.method, 1), site_at(f.method, 2));

        let c0 = s.select_context(&f.acx, &f.pag, EMPTY_CONTEXT_ID, &s0, None);
        let c1 = s.select_context(&f.acx, &f.pag, c0, &s1, None);
        let c2 = s.select_context(&f.acx, &f.pag, c1, &s2, None);

        assert_eq!(elems(&s, c0), vec![ContextElem::CallSite(s0.callsite)]);
        assert_eq!(
            elems(&s, c1),
            vec![
                ContextElem::CallSite(s1.callsite),
                ContextElem::CallSite(s0.callsite)
            ]
        );
        // The oldest site falls off at depth two.
        assert_eq!(
            elems(&s, c2),
            vec![
                ContextElem::CallSite(s2.callsite),
                ContextElem::CallSite(s1.callsite)
            ]
        );
        // Re-selecting reuses the interned id.
        assert_eq!(s.select_context(&f.acx, &f.pag, c0, &s1, None), c1);
    }

    #[test]
    fn object_contexts_stack_receiver_objects() {
        let mut f = fixture(AnalysisOptions::default());
        let mut s = KSensitive::new(ContextKind::Object, 2, 1);
        let site = site_at(f.method, 0);
        let (o1, o2) = (f.allocs[0], f.allocs[1]);

        // A context-free receiver contributes only itself.
        let c1 = s.select_context(&f.acx, &f.pag, EMPTY_CONTEXT_ID, &site, Some(o1));
        assert_eq!(elems(&s, c1), vec![ContextElem::HeapObj(o1)]);

        // An object allocated under c1 carries its heap context along.
        let h1 = s.select_heap_context(c1);
        let o2_in_c1 = f.pag.get_or_insert_context_alloc(h1, o2);
        let c2 = s.select_context(&f.acx, &f.pag, EMPTY_CONTEXT_ID, &site, Some(o2_in_c1));
        assert_eq!(
            elems(&s, c2),
            vec![ContextElem::HeapObj(o2), ContextElem::HeapObj(o1)]
        );
    }

    #[test]
    fn static_calls_fall_back_by_mode() {
        for (mode, expect_caller) in [
            (StaticContextMode::Caller, true),
            (StaticContextMode::Empty, false),
        ] {
            let options = AnalysisOptions {
                static_context: mode,
                ..AnalysisOptions::default()
            };
            let f = fixture(options);
            let mut s = KSensitive::new(ContextKind::Object, 2, 1);
            let site = site_at(f.method, 0);
            let caller = s.select_context(&f.acx, &f.pag, EMPTY_CONTEXT_ID, &site, Some(f.allocs[0]));
            assert_ne!(caller, EMPTY_CONTEXT_ID);

            let got = s.select_context(&f.acx, &f.pag, caller, &site, None);
            if expect_caller {
                assert_eq!(got, caller);
            } else {
                assert_eq!(got, EMPTY_CONTEXT_ID);
            }
        }
    }

    #[test]
    fn type_contexts_use_the_allocating_class() {
        let f = fixture(AnalysisOptions::default());
        let mut s = KSensitive::new(ContextKind::Type, 1, 0);
        let site = site_at(f.method, 0);
        let a_class = f.acx.program.method_data(f.method).declaring_class;

        let c = s.select_context(&f.acx, &f.pag, EMPTY_CONTEXT_ID, &site, Some(f.allocs[0]));
        assert_eq!(elems(&s, c), vec![ContextElem::Type(a_class)]);
    }

    #[test]
    fn merged_objects_fall_back_to_their_own_type() {
        let options = AnalysisOptions {
            types_for_sites: true,
            ..AnalysisOptions::default()
        };
        let f = fixture(options);
        let mut s = KSensitive::new(ContextKind::Type, 1, 0);
        let site = site_at(f.method, 0);

        // Under --types-for-sites the alloc node has no single creating
        // method; the token degrades to the allocated type.
        let obj_ty = f.pag.node_type(f.allocs[0]);
        let c = s.select_context(&f.acx, &f.pag, EMPTY_CONTEXT_ID, &site, Some(f.allocs[0]));
        assert_eq!(elems(&s, c), vec![ContextElem::Type(obj_ty)]);
    }

    #[test]
    fn param_contexts_collapse_to_one_element() {
        let f = fixture(AnalysisOptions::default());
        let mut s = KSensitive::new(ContextKind::Param, 2, 1);
        let site = site_at(f.method, 0);

        let c1 = s.select_context(&f.acx, &f.pag, EMPTY_CONTEXT_ID, &site, Some(f.allocs[0]));
        assert_eq!(elems(&s, c1).len(), 1);

        // Nesting never deepens the context; the same receiver and argument
        // list always map to the same id.
        let c2 = s.select_context(&f.acx, &f.pag, c1, &site, Some(f.allocs[0]));
        assert_eq!(c1, c2);

        let c3 = s.select_context(&f.acx, &f.pag, c1, &site, Some(f.allocs[1]));
        assert_ne!(c1, c3);
    }

    #[test]
    fn heap_contexts_truncate_to_the_declared_depth() {
        let f = fixture(AnalysisOptions::default());
        let (s0, s1) = (site_at(f.method, 0), site_at(f.method, 1));
        let mut nested = |s: &mut KSensitive| {
            let c0 = s.select_context(&f.acx, &f.pag, EMPTY_CONTEXT_ID, &s0, None);
            let c1 = s.select_context(&f.acx, &f.pag, c0, &s1, None);
            assert_eq!(s.get_context(c1).len(), 2);
            c1
        };

        let mut shallow = KSensitive::new(ContextKind::CallSite, 2, 0);
        let c1 = nested(&mut shallow);
        assert_eq!(shallow.select_heap_context(c1), EMPTY_CONTEXT_ID);

        let mut partial = KSensitive::new(ContextKind::CallSite, 2, 1);
        let c1 = nested(&mut partial);
        let h = partial.select_heap_context(c1);
        assert_eq!(elems(&partial, h), vec![ContextElem::CallSite(s1.callsite)]);

        let mut full = KSensitive::new(ContextKind::CallSite, 2, 2);
        let c1 = nested(&mut full);
        assert_eq!(full.select_heap_context(c1), c1);
    }

    #[test]
    fn the_insensitive_strategy_never_leaves_the_empty_context() {
        let f = fixture(AnalysisOptions::default());
        let mut s = ContextInsensitive::new();
        let site = site_at(f.method, 0);

        assert!(!s.is_sensitive());
        let c = s.select_context(&f.acx, &f.pag, EMPTY_CONTEXT_ID, &site, Some(f.allocs[0]));
        assert_eq!(c, EMPTY_CONTEXT_ID);
        assert_eq!(s.select_heap_context(c), EMPTY_CONTEXT_ID);
        assert!(s.get_context(EMPTY_CONTEXT_ID).is_empty());
    }
}
