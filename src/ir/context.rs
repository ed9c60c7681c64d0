// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use std::collections::HashMap;
use std::fmt::{Debug, Formatter, Result};
use std::hash::Hash;
use std::rc::Rc;

use crate::new_index_type;

new_index_type! {
    /// The unique identifier for each context.
    pub struct ContextId;
}

/// The id every [`ContextCache`] assigns to the empty context.
pub const EMPTY_CONTEXT_ID: ContextId = ContextId::new(0);

pub trait ContextElement: Clone + Eq + PartialEq + Debug + Hash {}

/// A calling context: a sequence of context elements, newest first, at most
/// `k` long for a depth-`k` analysis.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Context<E: ContextElement> {
    pub(crate) context_elems: Vec<E>,
}

impl<E: ContextElement> Debug for Context<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        self.context_elems.fmt(f)
    }
}

impl<E: ContextElement> Context<E> {
    pub fn new_empty() -> Rc<Self> {
        Rc::new(Context {
            context_elems: Vec::new(),
        })
    }

    pub fn new(context_elems: Vec<E>) -> Rc<Self> {
        Rc::new(Context { context_elems })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.context_elems.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.context_elems.is_empty()
    }

    /// Composes a new context from a given context and a new element.
    /// Discards the oldest elements once the length exceeds the depth limit.
    pub fn new_k_limited_context(old_ctx: &Rc<Context<E>>, elem: E, k: usize) -> Rc<Self> {
        let mut elems = Vec::with_capacity(k);
        if k > 0 {
            elems.push(elem);
            if old_ctx.len() < k {
                elems.extend_from_slice(&old_ctx.context_elems[..]);
            } else {
                elems.extend_from_slice(&old_ctx.context_elems[..k - 1]);
            }
        }
        Rc::new(Context { context_elems: elems })
    }

    /// Truncates `ctx` to its newest `k` elements.
    pub fn k_limited_context(ctx: &Rc<Context<E>>, k: usize) -> Rc<Self> {
        if ctx.len() <= k {
            ctx.clone()
        } else {
            let elems = ctx.context_elems[..k].to_vec();
            Rc::new(Context { context_elems: elems })
        }
    }

    pub fn first_context_element(&self) -> Option<&E> {
        self.context_elems.first()
    }

    pub fn last_context_element(&self) -> Option<&E> {
        self.context_elems.last()
    }
}

/// Hash-conses contexts to dense [`ContextId`]s. The empty context is
/// interned at construction, so [`EMPTY_CONTEXT_ID`] is always valid.
#[derive(Debug)]
pub struct ContextCache<E: ContextElement> {
    context_list: Vec<Rc<Context<E>>>,
    context_to_index_map: HashMap<Rc<Context<E>>, ContextId>,
}

impl<E: ContextElement> Default for ContextCache<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: ContextElement> ContextCache<E> {
    pub fn new() -> ContextCache<E> {
        let mut cache = ContextCache {
            context_list: Vec::new(),
            context_to_index_map: HashMap::new(),
        };
        let empty = Context::new_empty();
        let id = cache.get_context_id(&empty);
        debug_assert_eq!(id, EMPTY_CONTEXT_ID);
        cache
    }

    /// Returns the index under which `context` is interned, assigning a
    /// fresh one on first sight.
    pub fn get_context_id(&mut self, context: &Rc<Context<E>>) -> ContextId {
        if let Some(id) = self.context_to_index_map.get(context) {
            *id
        } else {
            let id = ContextId::new(self.context_list.len());
            self.context_list.push(context.clone());
            self.context_to_index_map.insert(context.clone(), id);
            id
        }
    }

    /// Returns the context stored at this index, or None for an id this
    /// cache never produced.
    pub fn get_context(&self, id: ContextId) -> Option<Rc<Context<E>>> {
        self.context_list.get(id.index()).cloned()
    }

    pub fn num_contexts(&self) -> usize {
        self.context_list.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl ContextElement for u32 {}

    #[test]
    fn k_limiting_keeps_the_newest_elements() {
        let empty = Context::<u32>::new_empty();
        let c1 = Context::new_k_limited_context(&empty, 1, 2);
        let c21 = Context::new_k_limited_context(&c1, 2, 2);
        let c321 = Context::new_k_limited_context(&c21, 3, 2);
        assert_eq!(c321.context_elems, vec![3, 2]);

        let truncated = Context::k_limited_context(&c321, 1);
        assert_eq!(truncated.context_elems, vec![3]);
        assert_eq!(Context::k_limited_context(&c321, 0).len(), 0);
    }

    #[test]
    fn zero_depth_contexts_stay_empty() {
        let empty = Context::<u32>::new_empty();
        let c = Context::new_k_limited_context(&empty, 7, 0);
        assert!(c.is_empty());
    }

    #[test]
    fn cache_interns_the_empty_context_first() {
        let mut cache = ContextCache::<u32>::new();
        let empty = Context::new_empty();
        assert_eq!(cache.get_context_id(&empty), EMPTY_CONTEXT_ID);

        let c = Context::new(vec![4, 2]);
        let id = cache.get_context_id(&c);
        assert_ne!(id, EMPTY_CONTEXT_ID);
        assert_eq!(cache.get_context_id(&c), id);
        assert_eq!(cache.get_context(id).unwrap().context_elems, vec![4, 2]);
    }
}
