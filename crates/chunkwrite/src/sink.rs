// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fs::File;
use std::io::{ErrorKind, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{Level, event};

use crate::dispatcher::Dispatcher;
use crate::{Chunk, Error, Result};

/// Receives the outcome of one submitted write: the number of bytes written or the error
/// that stopped the write.
pub type CompletionCallback = Box<dyn FnOnce(Result<usize>) + Send + 'static>;

/// A file that accepts positional writes without blocking the submitter.
///
/// Implementations impose no ordering between writes. Callers that need writes to land
/// contiguously must wait for each completion before submitting the next write.
#[cfg_attr(test, mockall::automock)]
pub trait FileSink: Send {
    /// Schedules a write of the whole `chunk` at absolute byte `offset` and returns
    /// immediately.
    ///
    /// `on_complete` is invoked exactly once, later and possibly on another thread, with
    /// the number of bytes written or the error that occurred.
    fn submit_write(&self, chunk: Chunk, offset: u64, on_complete: CompletionCallback);

    /// Forces all written data to stable storage and closes the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails or the sink is already closed.
    fn flush_and_close(&mut self) -> Result<()>;
}

/// A [`FileSink`] backed by a regular file and a dedicated I/O worker thread.
///
/// Writes are performed on the worker in submission order and their completion callbacks
/// are invoked there, one at a time.
///
/// # Examples
///
/// ```no_run
/// use chunkwrite::{AsyncFileSink, Chunk, FileSink};
///
/// let mut sink = AsyncFileSink::open("/tmp/output.bin")?;
/// let (tx, rx) = std::sync::mpsc::channel();
///
/// sink.submit_write(Chunk::filled(10, b'A'), 0, Box::new(move |result| {
///     let _ = tx.send(result);
/// }));
///
/// assert_eq!(rx.recv().unwrap()?, 10);
/// sink.flush_and_close()?;
/// # Ok::<(), chunkwrite::Error>(())
/// ```
#[derive(Debug)]
pub struct AsyncFileSink {
    file: Arc<Mutex<Option<File>>>,
    dispatcher: Dispatcher,
    path: PathBuf,
}

impl AsyncFileSink {
    /// Creates the file at `path` for writing, truncating it if it already exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be created or opened, or if the I/O worker
    /// thread cannot be started.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        let dispatcher = Dispatcher::new("chunkwrite-io")?;

        event!(Level::TRACE, message = "opened sink", path = %path.display());

        Ok(Self {
            file: Arc::new(Mutex::new(Some(file))),
            dispatcher,
            path,
        })
    }

    /// The path of the output file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether [`flush_and_close`](FileSink::flush_and_close) has completed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.file.lock().is_none()
    }
}

impl FileSink for AsyncFileSink {
    fn submit_write(&self, chunk: Chunk, offset: u64, on_complete: CompletionCallback) {
        let file = Arc::clone(&self.file);

        self.dispatcher.dispatch(move || {
            let result = write_chunk(&file, &chunk, offset);
            on_complete(result);
        });
    }

    fn flush_and_close(&mut self) -> Result<()> {
        let mut file = self.file.lock().take().ok_or(Error::Canceled)?;

        file.flush()?;
        file.sync_all()?;
        drop(file);

        event!(Level::TRACE, message = "closed sink", path = %self.path.display());
        Ok(())
    }
}

/// Performs one write on the worker thread. The lock is released before the completion
/// callback runs.
fn write_chunk(file: &Mutex<Option<File>>, chunk: &Chunk, offset: u64) -> Result<usize> {
    let guard = file.lock();
    let file = guard.as_ref().ok_or(Error::Canceled)?;

    positional_write_all(file, chunk.as_bytes(), offset)?;
    Ok(chunk.len())
}

/// Writes bytes at `offset` without affecting the cursor.
#[cfg(unix)]
fn positional_write(file: &File, buf: &[u8], offset: u64) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.write_at(buf, offset)
}

/// Writes bytes at `offset`. Moves the OS cursor as a side effect, which is harmless here
/// because every write is positional.
#[cfg(windows)]
fn positional_write(file: &File, buf: &[u8], offset: u64) -> std::io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_write(buf, offset)
}

/// Writes all of `buf` at `offset`, retrying on short writes.
fn positional_write_all(file: &File, mut buf: &[u8], mut offset: u64) -> std::io::Result<()> {
    while !buf.is_empty() {
        match positional_write(file, buf, offset) {
            Ok(0) => {
                return Err(std::io::Error::new(ErrorKind::WriteZero, "failed to write whole buffer"));
            }
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
