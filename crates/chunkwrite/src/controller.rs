// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{Level, event};

use crate::{Chunk, ChunkSource, CompletionGate, Error, FileSink, Result, WriteCursor, WriteLoopOptions};

/// Lifecycle of a write loop.
///
/// ```text
/// AwaitingFirstChunk -> Writing -> (Writing)* -> Finalizing -> Done
/// ```
///
/// `Errored` is reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// The loop has not yet obtained its first chunk.
    AwaitingFirstChunk,
    /// A write is in flight, or the loop is waiting for the chunk that follows a completed
    /// write.
    Writing,
    /// The sentinel was observed and the file is being flushed and closed.
    Finalizing,
    /// The file is flushed and closed and the completion gate is signaled.
    Done,
    /// The loop halted on an error. The completion gate is never signaled.
    Errored,
}

impl LoopState {
    /// Whether the loop will make no further progress.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Errored)
    }
}

/// Whether the output stream has been finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Chunks may still be written.
    Open,
    /// The sentinel was processed and the file is durably closed.
    Closed,
}

/// The outcome of one submitted write, reported back to the controller.
#[derive(Debug)]
pub(crate) struct Completion {
    offset: u64,
    result: Result<usize>,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    offset: u64,
    len: usize,
}

/// Observer view of a controller, updated on every transition.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Status {
    pub(crate) state: LoopState,
    pub(crate) stream_state: StreamState,
    pub(crate) bytes_written: u64,
    pub(crate) chunks_written: u64,
}

/// State machine that writes chunks from a [`ChunkSource`] to a [`FileSink`], one write at a
/// time.
///
/// Every write after the first is submitted while handling the completion of the previous
/// one. Completions arrive as events on a queue owned by the controller, so at most one
/// write is ever in flight and the cursor has a single owner.
///
/// Most callers should use [`WriteLoop::start`](crate::WriteLoop::start), which drives the
/// controller on a dedicated thread. The controller can also be driven by hand with
/// [`start`](Self::start) and [`process_next`](Self::process_next).
pub struct WriteLoopController<S> {
    source: ChunkSource,
    sink: S,
    options: WriteLoopOptions,
    cursor: WriteCursor,
    state: LoopState,
    stream_state: StreamState,
    in_flight: Option<InFlight>,
    chunks_written: u64,
    gate: CompletionGate,
    completions_tx: flume::Sender<Completion>,
    completions_rx: flume::Receiver<Completion>,
    status: Arc<Mutex<Status>>,
}

impl<S: FileSink> WriteLoopController<S> {
    /// Creates a controller that has not yet consumed any chunk.
    #[must_use]
    pub fn new(source: ChunkSource, sink: S, options: WriteLoopOptions) -> Self {
        let (completions_tx, completions_rx) = flume::unbounded();

        let status = Status {
            state: LoopState::AwaitingFirstChunk,
            stream_state: StreamState::Open,
            bytes_written: 0,
            chunks_written: 0,
        };

        Self {
            source,
            sink,
            options,
            cursor: WriteCursor::new(),
            state: LoopState::AwaitingFirstChunk,
            stream_state: StreamState::Open,
            in_flight: None,
            chunks_written: 0,
            gate: CompletionGate::new(),
            completions_tx,
            completions_rx,
            status: Arc::new(Mutex::new(status)),
        }
    }

    /// Obtains the first chunk and submits it at offset 0, or finalizes the stream right
    /// away if the first chunk is the sentinel.
    ///
    /// Blocks until the source yields a chunk.
    ///
    /// # Errors
    ///
    /// Returns the error that moved the loop to [`LoopState::Errored`]: the source lost all
    /// producers, or finalizing an empty stream failed. Calling `start` on a loop that has
    /// already started is a [`Error::ContractViolation`] and leaves the loop untouched.
    pub fn start(&mut self) -> Result<()> {
        if self.state != LoopState::AwaitingFirstChunk {
            return Err(Error::ContractViolation(format!("write loop already started, state is {:?}", self.state)));
        }

        let result = self.next_chunk().and_then(|chunk| self.accept(chunk));
        if let Err(error) = &result {
            self.fail(error);
        }
        result
    }

    /// Waits up to `timeout` for the next completion event and handles it.
    ///
    /// Returns the resulting state, or `None` if no completion arrived in time.
    pub fn process_next(&mut self, timeout: Duration) -> Option<LoopState> {
        let completion = self.completions_rx.recv_timeout(timeout).ok()?;
        Some(self.process(completion))
    }

    /// Handles completions until the loop reaches a terminal state.
    pub fn run(&mut self) -> LoopState {
        while !self.state.is_terminal() {
            // The controller holds a sender, so the queue never disconnects.
            let Ok(completion) = self.completions_rx.recv() else {
                break;
            };
            let _ = self.process(completion);
        }
        self.state
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Whether the stream has been finalized.
    #[must_use]
    pub fn stream_state(&self) -> StreamState {
        self.stream_state
    }

    /// The offset of the next write, equal to the total size of all completed writes.
    #[must_use]
    pub fn cursor(&self) -> u64 {
        self.cursor.offset()
    }

    /// Number of writes that completed successfully.
    #[must_use]
    pub fn chunks_written(&self) -> u64 {
        self.chunks_written
    }

    /// The gate signaled once the stream is durably written and closed.
    #[must_use]
    pub fn gate(&self) -> &CompletionGate {
        &self.gate
    }

    /// The sink the controller writes to.
    #[must_use]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub(crate) fn status(&self) -> Arc<Mutex<Status>> {
        Arc::clone(&self.status)
    }

    fn process(&mut self, completion: Completion) -> LoopState {
        if self.state.is_terminal() {
            event!(Level::TRACE, message = "ignoring completion after loop ended", offset = completion.offset, state = ?self.state);
            return self.state;
        }

        if let Err(error) = self.on_completion(completion) {
            self.fail(&error);
        }
        self.state
    }

    fn on_completion(&mut self, completion: Completion) -> Result<()> {
        let in_flight = self
            .in_flight
            .take()
            .ok_or_else(|| Error::ContractViolation(format!("completion for offset {} without a write in flight", completion.offset)))?;

        if in_flight.offset != completion.offset {
            return Err(Error::ContractViolation(format!(
                "completion for offset {} while offset {} is in flight",
                completion.offset, in_flight.offset
            )));
        }

        let bytes_written = completion.result?;
        let offset = self.cursor.advance(bytes_written)?;
        self.chunks_written += 1;
        self.publish();

        event!(
            Level::TRACE,
            message = "write completed",
            offset = in_flight.offset,
            requested = in_flight.len,
            bytes_written,
            next_offset = offset
        );

        let chunk = self.next_chunk()?;
        self.accept(chunk)
    }

    /// Polls the source until it yields a chunk. A stalled producer parks the loop here.
    fn next_chunk(&self) -> Result<Chunk> {
        loop {
            match self.source.next_chunk(self.options.chunk_wait()) {
                Err(Error::ProducerTimeout { waited }) => {
                    event!(Level::DEBUG, message = "no chunk available yet", waited = ?waited, offset = self.cursor.offset());
                }
                other => return other,
            }
        }
    }

    fn accept(&mut self, chunk: Chunk) -> Result<()> {
        if chunk.is_sentinel() {
            self.finalize()
        } else {
            self.submit(chunk)
        }
    }

    fn submit(&mut self, chunk: Chunk) -> Result<()> {
        if let Some(in_flight) = self.in_flight {
            return Err(Error::ContractViolation(format!(
                "write submitted while offset {} is in flight",
                in_flight.offset
            )));
        }

        let offset = self.cursor.offset();
        let len = chunk.len();
        self.in_flight = Some(InFlight { offset, len });
        self.set_state(LoopState::Writing);

        event!(Level::TRACE, message = "submitting write", offset, len);

        let completions_tx = self.completions_tx.clone();
        self.sink.submit_write(
            chunk,
            offset,
            Box::new(move |result| {
                let _ = completions_tx.send(Completion { offset, result });
            }),
        );
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        self.set_state(LoopState::Finalizing);
        self.sink.flush_and_close()?;

        self.stream_state = StreamState::Closed;
        self.set_state(LoopState::Done);

        event!(
            Level::INFO,
            message = "stream finalized",
            bytes_written = self.cursor.offset(),
            chunks_written = self.chunks_written
        );

        self.gate.signal();
        Ok(())
    }

    fn fail(&mut self, error: &Error) {
        event!(
            Level::ERROR,
            message = "write loop halted",
            error = %error,
            state = ?self.state,
            offset = self.cursor.offset()
        );
        self.set_state(LoopState::Errored);
    }

    fn set_state(&mut self, state: LoopState) {
        self.state = state;
        self.publish();
    }

    fn publish(&self) {
        *self.status.lock() = Status {
            state: self.state,
            stream_state: self.stream_state,
            bytes_written: self.cursor.offset(),
            chunks_written: self.chunks_written,
        };
    }
}

impl<S> fmt::Debug for WriteLoopController<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteLoopController")
            .field("state", &self.state)
            .field("stream_state", &self.stream_state)
            .field("cursor", &self.cursor)
            .field("in_flight", &self.in_flight)
            .field("chunks_written", &self.chunks_written)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::io::ErrorKind;

    use mockall::Sequence;
    use mockall::predicate::{always, eq};

    use super::*;
    use crate::ChunkProducer;
    use crate::sink::MockFileSink;

    const WAIT: Duration = Duration::from_millis(10);
    const TIMEOUT: Duration = Duration::from_secs(10);

    fn controller(sink: MockFileSink) -> (WriteLoopController<MockFileSink>, ChunkProducer) {
        let (source, producer) = ChunkSource::new();
        let options = WriteLoopOptions::new().with_chunk_wait(WAIT);
        (WriteLoopController::new(source, sink, options), producer)
    }

    fn complete_with_len(sink: &mut MockFileSink, offset: u64, len: usize, seq: &mut Sequence) {
        let _ = sink
            .expect_submit_write()
            .withf(move |chunk, o, _| chunk.len() == len && *o == offset)
            .times(1)
            .in_sequence(seq)
            .returning(|chunk, _, on_complete| on_complete(Ok(chunk.len())));
    }

    #[test]
    fn single_chunk_then_sentinel() {
        let mut seq = Sequence::new();
        let mut sink = MockFileSink::new();
        complete_with_len(&mut sink, 0, 10, &mut seq);
        let _ = sink.expect_flush_and_close().times(1).in_sequence(&mut seq).returning(|| Ok(()));

        let (mut controller, producer) = controller(sink);
        producer.produce(Chunk::filled(10, b'A')).unwrap();
        producer.produce_sentinel().unwrap();

        controller.start().unwrap();
        assert_eq!(controller.state(), LoopState::Writing);
        assert_eq!(controller.cursor(), 0);

        assert_eq!(controller.process_next(TIMEOUT), Some(LoopState::Done));
        assert_eq!(controller.cursor(), 10);
        assert_eq!(controller.chunks_written(), 1);
        assert_eq!(controller.stream_state(), StreamState::Closed);
        assert!(controller.gate().is_signaled());
    }

    #[test]
    fn sentinel_first_finalizes_without_writing() {
        let mut sink = MockFileSink::new();
        let _ = sink.expect_submit_write().never();
        let _ = sink.expect_flush_and_close().times(1).returning(|| Ok(()));

        let (mut controller, producer) = controller(sink);
        producer.produce_sentinel().unwrap();

        controller.start().unwrap();
        assert_eq!(controller.state(), LoopState::Done);
        assert_eq!(controller.cursor(), 0);
        assert!(controller.gate().is_signaled());
    }

    #[test]
    fn offsets_follow_prefix_sum() {
        let lens = [3_usize, 1, 7, 2];
        let mut seq = Sequence::new();
        let mut sink = MockFileSink::new();
        let mut offset = 0_u64;
        for len in lens {
            complete_with_len(&mut sink, offset, len, &mut seq);
            offset += len as u64;
        }
        let _ = sink.expect_flush_and_close().times(1).in_sequence(&mut seq).returning(|| Ok(()));

        let (mut controller, producer) = controller(sink);
        for len in lens {
            producer.produce(Chunk::filled(len, b'A')).unwrap();
        }
        producer.produce_sentinel().unwrap();

        controller.start().unwrap();
        let mut expected = 0_u64;
        for len in &lens[..lens.len() - 1] {
            expected += *len as u64;
            assert_eq!(controller.process_next(TIMEOUT), Some(LoopState::Writing));
            assert_eq!(controller.cursor(), expected);
        }
        assert_eq!(controller.process_next(TIMEOUT), Some(LoopState::Done));
        assert_eq!(controller.cursor(), 13);
        assert_eq!(controller.chunks_written(), 4);
    }

    #[test]
    fn write_failure_halts_without_signal() {
        let mut sink = MockFileSink::new();
        let _ = sink
            .expect_submit_write()
            .with(always(), eq(0), always())
            .times(1)
            .returning(|_, _, on_complete| on_complete(Err(std::io::Error::new(ErrorKind::StorageFull, "disk full").into())));
        let _ = sink.expect_flush_and_close().never();

        let (mut controller, producer) = controller(sink);
        producer.produce(Chunk::filled(4, b'A')).unwrap();
        producer.produce(Chunk::filled(4, b'A')).unwrap();
        producer.produce_sentinel().unwrap();

        controller.start().unwrap();
        assert_eq!(controller.process_next(TIMEOUT), Some(LoopState::Errored));
        assert_eq!(controller.cursor(), 0);
        assert_eq!(controller.stream_state(), StreamState::Open);
        assert!(!controller.gate().wait_timeout(WAIT));
    }

    #[test]
    fn flush_failure_halts_without_signal() {
        let mut sink = MockFileSink::new();
        let _ = sink
            .expect_flush_and_close()
            .times(1)
            .returning(|| Err(std::io::Error::other("fsync failed").into()));

        let (mut controller, producer) = controller(sink);
        producer.produce_sentinel().unwrap();

        assert!(matches!(controller.start(), Err(Error::Io(_))));
        assert_eq!(controller.state(), LoopState::Errored);
        assert_eq!(controller.stream_state(), StreamState::Open);
        assert!(!controller.gate().is_signaled());
    }

    #[test]
    fn timeout_keeps_polling_until_chunk_arrives() {
        let mut seq = Sequence::new();
        let mut sink = MockFileSink::new();
        complete_with_len(&mut sink, 0, 5, &mut seq);
        complete_with_len(&mut sink, 5, 6, &mut seq);

        let (mut controller, producer) = controller(sink);
        producer.produce(Chunk::filled(5, b'A')).unwrap();
        controller.start().unwrap();

        let late = std::thread::spawn(move || {
            // Several chunk waits elapse before the next chunk shows up.
            std::thread::sleep(WAIT * 5);
            producer.produce(Chunk::filled(6, b'A')).unwrap();
            producer
        });

        assert_eq!(controller.process_next(TIMEOUT), Some(LoopState::Writing));
        assert_eq!(controller.cursor(), 5);
        let _producer = late.join().unwrap();
    }

    #[test]
    fn lost_producers_halt_the_loop() {
        let mut seq = Sequence::new();
        let mut sink = MockFileSink::new();
        complete_with_len(&mut sink, 0, 2, &mut seq);
        let _ = sink.expect_flush_and_close().never();

        let (mut controller, producer) = controller(sink);
        producer.produce(Chunk::filled(2, b'A')).unwrap();
        drop(producer);

        controller.start().unwrap();
        assert_eq!(controller.process_next(TIMEOUT), Some(LoopState::Errored));
        assert_eq!(controller.cursor(), 2);
        assert!(!controller.gate().is_signaled());
    }

    #[test]
    fn start_without_producers_fails() {
        let sink = MockFileSink::new();
        let (mut controller, producer) = controller(sink);
        drop(producer);

        assert!(matches!(controller.start(), Err(Error::InterruptedWait)));
        assert_eq!(controller.state(), LoopState::Errored);
    }

    #[test]
    fn start_twice_is_contract_violation() {
        let mut sink = MockFileSink::new();
        let _ = sink.expect_flush_and_close().times(1).returning(|| Ok(()));

        let (mut controller, producer) = controller(sink);
        producer.produce_sentinel().unwrap();

        controller.start().unwrap();
        assert!(matches!(controller.start(), Err(Error::ContractViolation(_))));
        assert_eq!(controller.state(), LoopState::Done);
    }

    #[test]
    fn mismatched_completion_offset_is_contract_violation() {
        let mut sink = MockFileSink::new();
        let _ = sink.expect_submit_write().times(1).returning(|_, _, _| ());

        let (mut controller, producer) = controller(sink);
        producer.produce(Chunk::filled(2, b'A')).unwrap();
        controller.start().unwrap();

        controller
            .completions_tx
            .send(Completion { offset: 99, result: Ok(2) })
            .unwrap();

        assert_eq!(controller.process_next(TIMEOUT), Some(LoopState::Errored));
        assert_eq!(controller.cursor(), 0);
    }

    #[test]
    fn completions_after_termination_are_ignored() {
        let mut seq = Sequence::new();
        let mut sink = MockFileSink::new();
        complete_with_len(&mut sink, 0, 1, &mut seq);
        let _ = sink.expect_flush_and_close().times(1).in_sequence(&mut seq).returning(|| Ok(()));

        let (mut controller, producer) = controller(sink);
        producer.produce(Chunk::filled(1, b'A')).unwrap();
        producer.produce_sentinel().unwrap();
        producer.produce(Chunk::filled(1, b'A')).unwrap();

        controller.start().unwrap();
        assert_eq!(controller.run(), LoopState::Done);

        controller
            .completions_tx
            .send(Completion { offset: 1, result: Ok(1) })
            .unwrap();
        assert_eq!(controller.process_next(TIMEOUT), Some(LoopState::Done));
        assert_eq!(controller.cursor(), 1);
    }

    #[test]
    fn status_mirrors_controller() {
        let mut sink = MockFileSink::new();
        let _ = sink.expect_flush_and_close().times(1).returning(|| Ok(()));

        let (mut controller, producer) = controller(sink);
        let status = controller.status();
        assert_eq!(status.lock().state, LoopState::AwaitingFirstChunk);

        producer.produce_sentinel().unwrap();
        controller.start().unwrap();

        let snapshot = *status.lock();
        assert_eq!(snapshot.state, LoopState::Done);
        assert_eq!(snapshot.stream_state, StreamState::Closed);
        assert_eq!(snapshot.bytes_written, 0);
    }
}
