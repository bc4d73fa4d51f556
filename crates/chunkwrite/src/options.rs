// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::num::NonZeroUsize;
use std::time::Duration;

/// How long the write loop waits for the next chunk before polling again.
pub const DEFAULT_CHUNK_WAIT: Duration = Duration::from_millis(100);

/// Upper bound for the length of a randomly sized chunk.
pub const DEFAULT_MAX_CHUNK_LEN: NonZeroUsize = NonZeroUsize::MIN.saturating_add(512 * 1024 - 1);

/// Byte pattern used to fill randomly sized chunks.
pub const DEFAULT_FILL_BYTE: u8 = b'A';

/// Settings for the write loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct WriteLoopOptions {
    chunk_wait: Duration,
}

impl WriteLoopOptions {
    /// Creates options with default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            chunk_wait: DEFAULT_CHUNK_WAIT,
        }
    }

    /// Sets how long each poll of the chunk source may block.
    ///
    /// A poll that times out is repeated; this is not a stream timeout.
    #[must_use]
    pub const fn with_chunk_wait(mut self, chunk_wait: Duration) -> Self {
        self.chunk_wait = chunk_wait;
        self
    }

    /// How long each poll of the chunk source may block.
    #[must_use]
    pub const fn chunk_wait(&self) -> Duration {
        self.chunk_wait
    }
}

impl Default for WriteLoopOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Shape of the chunks generated by [`ChunkProducer::produce_random`][1].
///
/// [1]: crate::ChunkProducer::produce_random
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct RandomChunkOptions {
    max_len: NonZeroUsize,
    fill: u8,
}

impl RandomChunkOptions {
    /// Creates options with default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_len: DEFAULT_MAX_CHUNK_LEN,
            fill: DEFAULT_FILL_BYTE,
        }
    }

    /// Sets the inclusive upper bound of a random chunk length.
    #[must_use]
    pub const fn with_max_len(mut self, max_len: NonZeroUsize) -> Self {
        self.max_len = max_len;
        self
    }

    /// Sets the byte every random chunk is filled with.
    #[must_use]
    pub const fn with_fill(mut self, fill: u8) -> Self {
        self.fill = fill;
        self
    }

    /// Inclusive upper bound of a random chunk length.
    #[must_use]
    pub const fn max_len(&self) -> NonZeroUsize {
        self.max_len
    }

    /// Byte every random chunk is filled with.
    #[must_use]
    pub const fn fill(&self) -> u8 {
        self.fill
    }
}

impl Default for RandomChunkOptions {
    fn default() -> Self {
        Self::new()
    }
}
