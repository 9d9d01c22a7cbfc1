//! Ordered table of live connections
//!
//! Each entry owns both its connection and the readiness interest the
//! multiplexer watches for it, so they are added and removed together.
//! Iteration during a dispatch pass goes through a [`Cursor`]: removing the
//! entry under the cursor hands back a cursor that already points at the
//! next unvisited entry.

use crate::poll::{Interest, Readiness};
use std::os::fd::{AsRawFd, RawFd};

#[derive(Debug)]
pub struct Entry<T> {
    pub interest: Interest,
    /// Events from the most recent wait; empty for entries inserted since.
    pub ready: Readiness,
    pub conn: T,
}

/// Position in the registry during one dispatch pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cursor(usize);

impl Cursor {
    pub fn start() -> Self {
        Cursor(0)
    }

    pub fn next(self) -> Self {
        Cursor(self.0 + 1)
    }
}

#[derive(Debug)]
pub struct Registry<T> {
    entries: Vec<Entry<T>>,
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Registry { entries: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append at the end of the visiting order.
    pub fn insert(&mut self, interest: Interest, conn: T) {
        self.entries.push(Entry {
            interest,
            ready: Readiness::NONE,
            conn,
        });
    }

    pub fn get_mut(&mut self, cursor: Cursor) -> Option<&mut Entry<T>> {
        self.entries.get_mut(cursor.0)
    }

    /// Remove the entry under `cursor`. Returns it with the cursor to use
    /// for continuing the pass.
    pub fn remove(&mut self, cursor: Cursor) -> Option<(Entry<T>, Cursor)> {
        if cursor.0 >= self.entries.len() {
            return None;
        }
        Some((self.entries.remove(cursor.0), cursor))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entry<T>> {
        self.entries.iter_mut()
    }

    /// Remove every entry, in registry order.
    pub fn drain(&mut self) -> impl Iterator<Item = Entry<T>> + '_ {
        self.entries.drain(..)
    }
}

impl<T: AsRawFd> Registry<T> {
    /// Descriptor/interest pairs in visiting order, for the multiplexer.
    pub fn sources(&self) -> impl Iterator<Item = (RawFd, Interest)> + '_ {
        self.entries.iter().map(|e| (e.conn.as_raw_fd(), e.interest))
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}
