// Copyright (c) 2024 <Wei Li>.
//
// This source code is licensed under the GNU license found in the
// LICENSE file in the root directory of this source tree.

use arrayvec::ArrayVec;
use std::fmt::{Debug, Formatter, Result};
use std::marker::PhantomData;
use std::ptr::NonNull;

// The maximum number of elements a chunk can hold.
const CHUNK_CAP: usize = 60;

/// An append-only queue implemented as a linked list of small chunks.
///
/// Elements are never removed, so any number of [`QueueReader`]s can walk
/// the queue independently while it keeps growing. A reader that has caught
/// up with the tail yields `None` and resumes from the same position once
/// more elements have been pushed. This is the backbone of every
/// "log with replay" structure in the analysis: per-method edge logs, the
/// per-kind new-edge queues of the PAG, the reachable-method log and the
/// pending call-site logs.
pub struct ChunkedQueue<T> {
    head: NonNull<Chunk<T>>,
    tail: NonNull<Chunk<T>>,
    len: usize,
    marker: PhantomData<Box<Chunk<T>>>,
}

impl<T: Debug> Debug for ChunkedQueue<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T> Drop for ChunkedQueue<T> {
    fn drop(&mut self) {
        unsafe {
            let mut all_dropped = false;
            while !all_dropped {
                let chunk = Box::from_raw(self.head.as_ptr());
                if let Some(next) = chunk.next {
                    self.head = next;
                } else {
                    all_dropped = true;
                }
                drop(chunk);
            }
        }
    }
}

pub struct Chunk<T> {
    next: Option<NonNull<Chunk<T>>>,
    prev: Option<NonNull<Chunk<T>>>,
    elems: ArrayVec<T, CHUNK_CAP>,
}

impl<T: Debug> Debug for Chunk<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        self.elems.fmt(f)
    }
}

impl<T> Chunk<T> {
    fn new() -> Self {
        Chunk {
            next: None,
            prev: None,
            elems: ArrayVec::new(),
        }
    }

    fn len(&self) -> usize {
        self.elems.len()
    }

    fn get_elem_ref(&self, index: usize) -> Option<&T> {
        if index < self.elems.len() {
            unsafe { Some(&*self.elems.as_ptr().add(index)) }
        } else {
            None
        }
    }
}

impl<T: Copy> Chunk<T> {
    fn get_elem(&self, index: usize) -> Option<T> {
        if index < self.elems.len() {
            unsafe { Some(*self.elems.as_ptr().add(index)) }
        } else {
            None
        }
    }
}

impl<T> Default for ChunkedQueue<T> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ChunkedQueue<T> {
    /// Creates an empty `ChunkedQueue`.
    #[inline]
    pub fn new() -> Self {
        let chunk = Self::new_chunk();
        ChunkedQueue {
            head: chunk,
            tail: chunk,
            len: 0,
            marker: PhantomData,
        }
    }

    /// Returns the number of elements pushed so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends an element to the back of the queue.
    pub fn push(&mut self, elem: T) {
        // If the tail chunk is full, link in a fresh chunk.
        let is_full = unsafe { (*self.tail.as_ptr()).elems.is_full() };
        if is_full {
            let chunk = Self::new_chunk();
            unsafe {
                (*self.tail.as_ptr()).next = Some(chunk);
                (*chunk.as_ptr()).prev = Some(self.tail);
            }
            self.tail = chunk;
        }
        unsafe {
            let chunk = &mut *self.tail.as_ptr();
            chunk.elems.push(elem);
        }
        self.len += 1;
    }

    /// Provides a borrowing forward iterator over the current contents.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            chunk: self.head,
            index: 0,
            marker: PhantomData,
        }
    }

    #[inline]
    fn new_chunk() -> NonNull<Chunk<T>> {
        let chunk: Box<Chunk<T>> = Box::new(Chunk::new());
        Box::leak(chunk).into()
    }
}

impl<T: Copy> ChunkedQueue<T> {
    /// Creates a reader positioned at the start of the queue.
    ///
    /// The reader replays the full history and then follows the growing
    /// tail. Callers that only want elements "from now on" keep a single
    /// reader around and drain it incrementally; its position persists
    /// between drains.
    #[inline]
    pub fn reader(&self) -> QueueReader<T> {
        QueueReader {
            chunk: self.head,
            index: 0,
            marker: PhantomData,
        }
    }
}

pub struct Iter<'a, T> {
    /// A pointer to the current chunk.
    chunk: NonNull<Chunk<T>>,

    /// The index of the next element in the chunk.
    index: usize,

    marker: PhantomData<&'a T>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        if self.index == CHUNK_CAP {
            // Move onto the next chunk if one has been linked in.
            if let Some(chunk) = unsafe { (*self.chunk.as_ptr()).next } {
                self.chunk = chunk;
                self.index = 0;
            } else {
                return None;
            }
        }
        let elem = unsafe { (*self.chunk.as_ptr()).get_elem_ref(self.index) };
        if elem.is_some() {
            self.index += 1;
        }
        elem
    }
}

/// A resumable cursor into a [`ChunkedQueue`] of copyable elements.
///
/// Readers are cheap `Copy` values; copying one forks the position. A
/// reader must not outlive its queue.
#[derive(Copy, Clone)]
pub struct QueueReader<T> {
    /// A pointer to the current chunk.
    chunk: NonNull<Chunk<T>>,

    /// The index of the next element in the chunk.
    index: usize,

    marker: PhantomData<T>,
}

impl<T: Copy> Iterator for QueueReader<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.index == CHUNK_CAP {
            // Move onto the next chunk if one has been linked in.
            if let Some(chunk) = unsafe { (*self.chunk.as_ptr()).next } {
                self.chunk = chunk;
                self.index = 0;
            } else {
                return None;
            }
        }
        let chunk = unsafe { &*self.chunk.as_ptr() };
        if self.index < chunk.len() {
            let elem = chunk.get_elem(self.index);
            self.index += 1;
            elem
        } else {
            None
        }
    }
}
