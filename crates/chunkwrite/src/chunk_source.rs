// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, Sender};

use crate::{Chunk, Error, RandomChunkOptions, Result};

/// The consuming end of an ordered, unbounded chunk queue.
///
/// Chunks are returned in the order they were produced, each exactly once. Any number of
/// [`ChunkProducer`] handles may feed the queue from any thread.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use chunkwrite::{Chunk, ChunkSource};
///
/// let (source, producer) = ChunkSource::new();
/// producer.produce(Chunk::from(&b"hello"[..]))?;
/// producer.produce_sentinel()?;
///
/// assert_eq!(source.next_chunk(Duration::from_millis(10))?.len(), 5);
/// assert!(source.next_chunk(Duration::from_millis(10))?.is_sentinel());
/// # Ok::<(), chunkwrite::Error>(())
/// ```
pub struct ChunkSource {
    receiver: Receiver<Chunk>,
}

impl ChunkSource {
    /// Creates a new queue whose producer generates random chunks with default settings.
    #[must_use]
    pub fn new() -> (Self, ChunkProducer) {
        Self::with_random_options(RandomChunkOptions::default())
    }

    /// Creates a new queue whose producer generates random chunks shaped by `options`.
    #[must_use]
    pub fn with_random_options(options: RandomChunkOptions) -> (Self, ChunkProducer) {
        let (sender, receiver) = flume::unbounded();

        let producer = ChunkProducer {
            sender,
            rng: fastrand::Rng::new(),
            options,
        };

        (Self { receiver }, producer)
    }

    /// Removes and returns the oldest chunk, blocking for up to `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProducerTimeout`] if no chunk arrives within `timeout` and
    /// [`Error::InterruptedWait`] if the queue is empty and every producer has been dropped.
    pub fn next_chunk(&self, timeout: Duration) -> Result<Chunk> {
        match self.receiver.recv_timeout(timeout) {
            Ok(chunk) => Ok(chunk),
            Err(RecvTimeoutError::Timeout) => Err(Error::ProducerTimeout { waited: timeout }),
            Err(RecvTimeoutError::Disconnected) => Err(Error::InterruptedWait),
        }
    }

    /// Number of chunks produced but not yet consumed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}

impl fmt::Debug for ChunkSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkSource")
            .field("pending", &self.pending())
            .field("producers", &self.receiver.sender_count())
            .finish()
    }
}

/// The producing end of a chunk queue.
///
/// Cloning yields another handle to the same queue with an independent random generator.
pub struct ChunkProducer {
    sender: Sender<Chunk>,
    rng: fastrand::Rng,
    options: RandomChunkOptions,
}

impl ChunkProducer {
    /// Reseeds the random generator so that chunk lengths are reproducible.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng.seed(seed);
        self
    }

    /// Appends `chunk` to the queue.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Canceled`] if the consuming [`ChunkSource`] no longer exists.
    pub fn produce(&self, chunk: Chunk) -> Result<()> {
        self.sender.send(chunk).map_err(|_disconnected| Error::Canceled)
    }

    /// Appends a chunk of random length filled with the configured byte pattern and
    /// returns its length.
    ///
    /// The length is drawn from `1..=max_len`, so a random chunk is never the sentinel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Canceled`] if the consuming [`ChunkSource`] no longer exists.
    pub fn produce_random(&mut self) -> Result<usize> {
        let len = self.rng.usize(1..=self.options.max_len().get());
        self.produce(Chunk::filled(len, self.options.fill()))?;
        Ok(len)
    }

    /// Appends the end-of-stream sentinel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Canceled`] if the consuming [`ChunkSource`] no longer exists.
    pub fn produce_sentinel(&self) -> Result<()> {
        self.produce(Chunk::sentinel())
    }
}

impl Clone for ChunkProducer {
    fn clone(&self) -> Self {
        let mut rng = self.rng.clone();
        Self {
            sender: self.sender.clone(),
            rng: rng.fork(),
            options: self.options,
        }
    }
}

impl fmt::Debug for ChunkProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkProducer").field("options", &self.options).finish_non_exhaustive()
    }
}
