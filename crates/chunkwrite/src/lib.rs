// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Sequential file writer driven by write-completion notifications.
//!
//! This crate writes a stream of variable-length chunks to a single file without issuing a
//! blocking write per chunk. Each write is submitted to a [`FileSink`], which returns right
//! away and reports the outcome later. The next chunk is only submitted once the previous
//! write has completed, so writes reach the file in strictly increasing, contiguous,
//! non-overlapping offset order.
//!
//! # Moving parts
//!
//! | Type | Role |
//! |------|------|
//! | [`ChunkSource`] / [`ChunkProducer`] | Ordered queue of [`Chunk`]s with a bounded-wait receive |
//! | [`AsyncFileSink`] | Positional writes executed on a dedicated I/O thread |
//! | [`WriteCursor`] | Offset of the next write, the running sum of completed write sizes |
//! | [`WriteLoopController`] | State machine reacting to completion events |
//! | [`CompletionGate`] | One-shot latch released once the file is flushed and closed |
//! | [`WriteLoop`] / [`WriteLoopHandle`] | Starts the controller on its own thread and observes it |
//!
//! # End of stream
//!
//! A zero-length chunk is the sentinel. When the loop takes it from the source, the sink is
//! flushed to stable storage and closed, and the gate is signaled. This is the only way a
//! stream ends: a producer that never sends the sentinel leaves the loop polling the source
//! forever.
//!
//! # Failures
//!
//! A failed write or flush halts the loop in [`LoopState::Errored`]. Nothing is retried and
//! the gate is never signaled, so [`WriteLoopHandle::wait`] does not return. Use
//! [`WriteLoopHandle::wait_timeout`] and [`WriteLoopHandle::state`] to observe a failed
//! stream.
//!
//! # Example
//!
//! ```no_run
//! use chunkwrite::{AsyncFileSink, Chunk, ChunkSource, WriteLoop, WriteLoopOptions};
//!
//! let (source, producer) = ChunkSource::new();
//! producer.produce(Chunk::from(&b"hello "[..]))?;
//!
//! let sink = AsyncFileSink::open("/tmp/greeting.txt")?;
//! let handle = WriteLoop::start(source, sink, WriteLoopOptions::default())?;
//!
//! producer.produce(Chunk::from(&b"world"[..]))?;
//! producer.produce_sentinel()?;
//!
//! handle.wait();
//! assert_eq!(handle.bytes_written(), 11);
//! # Ok::<(), chunkwrite::Error>(())
//! ```

mod chunk;
mod chunk_source;
mod controller;
mod cursor;
mod dispatcher;
mod error;
mod gate;
mod options;
mod sink;
mod write_loop;

pub use chunk::Chunk;
pub use chunk_source::{ChunkProducer, ChunkSource};
pub use controller::{LoopState, StreamState, WriteLoopController};
pub use cursor::WriteCursor;
pub use error::{Error, Result};
pub use gate::CompletionGate;
pub use options::{DEFAULT_CHUNK_WAIT, DEFAULT_FILL_BYTE, DEFAULT_MAX_CHUNK_LEN, RandomChunkOptions, WriteLoopOptions};
pub use sink::{AsyncFileSink, CompletionCallback, FileSink};
pub use write_loop::{WriteLoop, WriteLoopHandle};
