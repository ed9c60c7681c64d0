// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

pub mod bit_vec;
pub mod chunked_queue;
pub mod mem_watcher;
pub mod options;
pub mod pta_statistics;
pub mod results_dumper;

/// Defines a `u32`-backed index type. The generated type implements
/// [`crate::util::bit_vec::Idx`] so it can key bit vectors and other dense
/// side tables, and serializes transparently as a plain integer.
#[macro_export]
macro_rules! new_index_type {
    ($(#[$attr:meta])* $vis:vis struct $name:ident;) => {
        $(#[$attr])*
        #[derive(
            Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash,
            serde::Serialize, serde::Deserialize,
        )]
        $vis struct $name(u32);

        impl $name {
            #[inline]
            $vis const fn new(idx: usize) -> Self {
                $name(idx as u32)
            }

            #[inline]
            $vis const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl $crate::util::bit_vec::Idx for $name {
            #[inline]
            fn new(idx: usize) -> Self {
                $name(idx as u32)
            }

            #[inline]
            fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }
    };
}
