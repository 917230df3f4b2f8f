//! Engine-level iteration over live keys.
//!
//! Wraps an index iterator and resolves each position to its value on
//! demand, so iterating keys costs no data-file reads until `value()` is
//! called. Supports prefix filtering and reverse order.

use index::IndexIterator;

use crate::db::Engine;
use crate::options::IteratorOptions;
use crate::Result;

/// Iterator over the live keys of an [`Engine`].
///
/// Observes a snapshot of the index taken at construction; writes made
/// afterwards are not visible to it.
pub struct EngineIterator<'a> {
    engine: &'a Engine,
    index_iter: Box<dyn IndexIterator>,
    options: IteratorOptions,
}

impl Engine {
    /// Opens an iterator configured by `options`, positioned at the first
    /// matching key.
    pub fn iter(&self, options: IteratorOptions) -> EngineIterator<'_> {
        let index_iter = self.index.iterator(options.reverse);
        let mut iter = EngineIterator {
            engine: self,
            index_iter,
            options,
        };
        iter.skip_to_next();
        iter
    }
}

impl EngineIterator<'_> {
    /// Repositions at the first matching key.
    pub fn rewind(&mut self) {
        self.index_iter.rewind();
        self.skip_to_next();
    }

    /// Positions at the first matching key `>= key` (`<=` when reverse).
    pub fn seek(&mut self, key: &[u8]) {
        self.index_iter.seek(key);
        self.skip_to_next();
    }

    /// Advances to the next matching key.
    pub fn next(&mut self) {
        self.index_iter.next();
        self.skip_to_next();
    }

    /// Whether the iterator points at an entry.
    pub fn valid(&self) -> bool {
        self.index_iter.valid()
    }

    /// Key at the current position. Only valid while [`valid`](Self::valid)
    /// returns true.
    pub fn key(&self) -> &[u8] {
        self.index_iter.key()
    }

    /// Reads the value at the current position from its data file.
    pub fn value(&self) -> Result<Vec<u8>> {
        self.engine.value_at(self.index_iter.value())
    }

    /// Releases the underlying index iterator.
    pub fn close(&mut self) {
        self.index_iter.close();
    }

    /// Skips entries that do not carry the configured prefix.
    fn skip_to_next(&mut self) {
        if self.options.prefix.is_empty() {
            return;
        }
        while self.index_iter.valid() {
            if self.index_iter.key().starts_with(&self.options.prefix) {
                break;
            }
            self.index_iter.next();
        }
    }
}
