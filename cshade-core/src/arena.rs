//! Typed index arenas.
//!
//! Every AST and SSA node lives in an [`Arena`] owned by its program or
//! function context and is referred to by a [`Handle`]. Handles are plain
//! indices, so cyclic graphs (phis, use lists, predecessor lists) need no
//! shared ownership.

use std::{cmp::Ordering, fmt, hash, marker::PhantomData, ops};

/// A strongly typed reference to an arena item.
pub struct Handle<T> {
    index: u32,
    marker: PhantomData<T>,
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Handle<T> {}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index.cmp(&other.index)
    }
}

impl<T> hash::Hash for Handle<T> {
    fn hash<H: hash::Hasher>(&self, hasher: &mut H) {
        self.index.hash(hasher)
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "[{}]", self.index)
    }
}

impl<T> Handle<T> {
    fn from_usize(index: usize) -> Self {
        let index = u32::try_from(index).expect("Failed to insert into arena. Handle overflows");
        Handle { index, marker: PhantomData }
    }

    /// Returns the index of this handle.
    pub const fn index(self) -> usize {
        self.index as usize
    }
}

/// An append-only vector addressed by [`Handle`]s.
pub struct Arena<T> {
    data: Vec<T>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for Arena<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<T> Arena<T> {
    pub const fn new() -> Self {
        Arena { data: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Adds a new value and returns its handle. Handles are never reused.
    pub fn append(&mut self, value: T) -> Handle<T> {
        let handle = Handle::from_usize(self.data.len());
        self.data.push(value);
        handle
    }

    /// The handle the next `append` will return.
    pub fn next_handle(&self) -> Handle<T> {
        Handle::from_usize(self.data.len())
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (Handle<T>, &T)> {
        self.data.iter().enumerate().map(|(i, v)| (Handle::from_usize(i), v))
    }

    pub fn iter_mut(&mut self) -> impl DoubleEndedIterator<Item = (Handle<T>, &mut T)> {
        self.data.iter_mut().enumerate().map(|(i, v)| (Handle::from_usize(i), v))
    }

    pub fn handles(&self) -> impl DoubleEndedIterator<Item = Handle<T>> {
        (0..self.data.len()).map(Handle::from_usize)
    }

    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        self.data.get(handle.index())
    }
}

impl<T> ops::Index<Handle<T>> for Arena<T> {
    type Output = T;
    fn index(&self, handle: Handle<T>) -> &T {
        &self.data[handle.index()]
    }
}

impl<T> ops::IndexMut<Handle<T>> for Arena<T> {
    fn index_mut(&mut self, handle: Handle<T>) -> &mut T {
        &mut self.data[handle.index()]
    }
}
