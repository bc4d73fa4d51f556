// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Writes a stream of randomly sized chunks to a file through the completion-driven write
//! loop.
//!
//! # Usage
//!
//! ```bash
//! chunkwrite <PATH>
//! ```
//!
//! The file is created or truncated. Each chunk holds up to 512 KiB of `A` bytes and fewer
//! than 2048 chunks are produced. Log verbosity follows `RUST_LOG` (default `info`).
//!
//! Exits with an error if the write loop halts on a storage failure.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chunkwrite::{AsyncFileSink, ChunkSource, LoopState, WriteLoop, WriteLoopOptions};
use clap::Parser;
use tracing::{Level, event};
use tracing_subscriber::EnvFilter;

/// Exclusive upper bound for the number of chunks produced after the first one.
const MAX_EXTRA_CHUNKS: usize = 2048;

/// How often the main thread checks whether a stream that has not closed yet has failed.
const STATE_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Parser, Debug)]
#[command(name = "chunkwrite", version, about = "Writes randomly sized chunks to a file using completion-driven writes")]
struct Cli {
    /// Destination file; created or truncated
    #[arg(value_name = "PATH")]
    path: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let sink = AsyncFileSink::open(&cli.path).with_context(|| format!("failed to open {}", cli.path.display()))?;

    let (source, mut producer) = ChunkSource::new();

    // The loop needs something to start with.
    let _ = producer.produce_random()?;
    let handle = WriteLoop::start(source, sink, WriteLoopOptions::default()).context("failed to start the write loop")?;

    let extra_chunks = fastrand::usize(..MAX_EXTRA_CHUNKS);
    event!(Level::INFO, message = "producing chunks", count = extra_chunks, max_len = chunkwrite::DEFAULT_MAX_CHUNK_LEN.get());

    for _ in 0..extra_chunks {
        let _ = producer.produce_random()?;
    }
    producer.produce_sentinel()?;

    // The gate is never signaled for a failed stream, so poll the loop state alongside it.
    while !handle.wait_timeout(STATE_POLL_INTERVAL) {
        if handle.state() == LoopState::Errored {
            bail!("writing {} failed after {} bytes", cli.path.display(), handle.bytes_written());
        }
    }

    event!(
        Level::INFO,
        message = "file written",
        path = %cli.path.display(),
        bytes = handle.bytes_written(),
        chunks = handle.chunks_written()
    );

    Ok(())
}
