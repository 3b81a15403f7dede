//! Owned, growable byte buffer fed straight from a socket.

use std::io::{self, Read};

/// Accumulates bytes read from a connection.
///
/// Data is only ever appended, so offsets recorded by a parser stay valid
/// until the buffer is split or cleared.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ByteBuffer {
    data: Vec<u8>,
}

impl ByteBuffer {
    #[inline]
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    #[inline(always)]
    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    #[inline(always)]
    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub(crate) fn reserve(&mut self, additional: usize) {
        self.data.reserve(additional);
    }

    #[inline]
    pub(crate) fn clear(&mut self) {
        self.data.clear();
    }

    /// Performs one `read` of at most `max` bytes, appending what arrived.
    pub(crate) fn read_from<R: Read>(&mut self, source: &mut R, max: usize) -> io::Result<usize> {
        let start = self.data.len();
        self.data.resize(start + max, 0);

        let result = source.read(&mut self.data[start..]);
        let read = *result.as_ref().unwrap_or(&0);

        self.data.truncate(start + read);
        result
    }

    /// Takes everything from `at` onwards, leaving the head in place.
    #[inline]
    pub(crate) fn split_off(&mut self, at: usize) -> Vec<u8> {
        let at = at.min(self.data.len());
        self.data.split_off(at)
    }

    #[inline]
    pub(crate) fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

impl From<Vec<u8>> for ByteBuffer {
    #[inline]
    fn from(data: Vec<u8>) -> Self {
        Self { data }
    }
}
