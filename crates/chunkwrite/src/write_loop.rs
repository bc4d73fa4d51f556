// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use crate::controller::Status;
use crate::{ChunkSource, CompletionGate, FileSink, LoopState, Result, StreamState, WriteLoopController, WriteLoopOptions};

/// Entry point that wires a [`ChunkSource`] and a [`FileSink`] into a running write loop.
#[derive(Debug)]
pub struct WriteLoop;

impl WriteLoop {
    /// Starts writing chunks from `source` to `sink`.
    ///
    /// The first chunk is obtained and submitted on the calling thread, which blocks until
    /// the source yields it. If it is the sentinel, the stream is finalized before this
    /// returns. Otherwise the controller moves to a dedicated `chunkwrite-loop` thread that
    /// handles every later completion, and the caller only interacts with the returned
    /// handle.
    ///
    /// # Errors
    ///
    /// Returns the error that stopped the loop during the start step, such as every
    /// producer having been dropped or a failure to finalize an empty stream, or an error
    /// if the loop thread cannot be spawned.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use chunkwrite::{AsyncFileSink, ChunkSource, WriteLoop, WriteLoopOptions};
    ///
    /// let (source, mut producer) = ChunkSource::new();
    /// let sink = AsyncFileSink::open("/tmp/output.bin")?;
    ///
    /// producer.produce_random()?;
    /// let handle = WriteLoop::start(source, sink, WriteLoopOptions::default())?;
    ///
    /// for _ in 0..16 {
    ///     producer.produce_random()?;
    /// }
    /// producer.produce_sentinel()?;
    ///
    /// handle.wait();
    /// println!("wrote {} bytes", handle.bytes_written());
    /// # Ok::<(), chunkwrite::Error>(())
    /// ```
    pub fn start<S>(source: ChunkSource, sink: S, options: WriteLoopOptions) -> Result<WriteLoopHandle>
    where
        S: FileSink + 'static,
    {
        let mut controller = WriteLoopController::new(source, sink, options);
        controller.start()?;

        let gate = controller.gate().clone();
        let status = controller.status();

        let thread = if controller.state().is_terminal() {
            None
        } else {
            Some(
                std::thread::Builder::new()
                    .name("chunkwrite-loop".into())
                    .spawn(move || controller.run())?,
            )
        };

        Ok(WriteLoopHandle { gate, status, thread })
    }
}

/// Observer of a running write loop.
///
/// The handle never touches the cursor or the sink; it reads a snapshot the controller
/// publishes on every transition.
#[derive(Debug)]
pub struct WriteLoopHandle {
    gate: CompletionGate,
    status: Arc<Mutex<Status>>,
    thread: Option<JoinHandle<LoopState>>,
}

impl WriteLoopHandle {
    /// The gate signaled once the stream is durably written and closed.
    #[must_use]
    pub fn gate(&self) -> &CompletionGate {
        &self.gate
    }

    /// Blocks until the stream is durably written and closed.
    ///
    /// If the loop halts on an error this never returns; use
    /// [`wait_timeout`](Self::wait_timeout) together with [`state`](Self::state) to detect
    /// that case.
    pub fn wait(&self) {
        self.gate.wait();
    }

    /// Blocks until the stream is closed or `timeout` elapses. Returns `true` if closed.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.gate.wait_timeout(timeout)
    }

    /// The loop's current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LoopState {
        self.status.lock().state
    }

    /// Whether the stream has been finalized.
    #[must_use]
    pub fn stream_state(&self) -> StreamState {
        self.status.lock().stream_state
    }

    /// Total size of all completed writes.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.status.lock().bytes_written
    }

    /// Number of writes that completed successfully.
    #[must_use]
    pub fn chunks_written(&self) -> u64 {
        self.status.lock().chunks_written
    }

    /// Waits for the loop thread to exit and returns its final state.
    ///
    /// The thread exits once the loop reaches [`LoopState::Done`] or
    /// [`LoopState::Errored`]; a loop parked on a silent producer keeps this blocked.
    ///
    /// # Panics
    ///
    /// Re-raises a panic that occurred on the loop thread.
    pub fn join(mut self) -> LoopState {
        match self.thread.take() {
            Some(thread) => thread.join().unwrap_or_else(|payload| std::panic::resume_unwind(payload)),
            None => self.state(),
        }
    }
}
