// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;

use bytes::Bytes;

/// An opaque unit of payload that is written to the output file exactly once.
///
/// A chunk of length zero is the end-of-stream sentinel. It never carries payload and
/// is never written; observing it finalizes the stream.
///
/// Cloning a chunk is cheap, the underlying bytes are reference counted.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Chunk {
    data: Bytes,
}

impl Chunk {
    /// Creates a chunk from any byte container.
    ///
    /// An empty container yields the sentinel.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// Creates the end-of-stream sentinel.
    #[must_use]
    pub fn sentinel() -> Self {
        Self::default()
    }

    /// Creates a chunk of `len` bytes, each set to `fill`.
    #[must_use]
    pub fn filled(len: usize, fill: u8) -> Self {
        Self::new(vec![fill; len])
    }

    /// Whether this chunk is the end-of-stream sentinel.
    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of payload bytes in the chunk.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the chunk holds no bytes. Equivalent to [`is_sentinel`](Self::is_sentinel).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The payload bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the chunk, returning the underlying buffer.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

impl From<Bytes> for Chunk {
    fn from(data: Bytes) -> Self {
        Self { data }
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<&'static [u8]> for Chunk {
    fn from(data: &'static [u8]) -> Self {
        Self::new(Bytes::from_static(data))
    }
}

impl AsRef<[u8]> for Chunk {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

// Payloads can be half a megabyte, so only the length is printed.
impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_sentinel() {
            f.write_str("Chunk(sentinel)")
        } else {
            f.debug_struct("Chunk").field("len", &self.len()).finish()
        }
    }
}
