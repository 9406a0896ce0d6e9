//! Output relay: fan-out of ordered shell output to every subscriber.
//!
//! A producer task per child stream reads raw bytes off the pipe, decodes
//! them incrementally, and publishes [`SessionEvent`]s onto a broadcast
//! channel. The terminal renderer and the diagnostic scanner each hold their
//! own receiver and drain the same ordered sequence independently, so a slow
//! or failed consumer cannot reorder or stall the other.

use std::path::PathBuf;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

/// Capacity of the session event channel. Consumers that fall further behind
/// than this lose the oldest events rather than blocking the producers.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Read buffer size for a single chunk off the child pipe.
const CHUNK_BUF_SIZE: usize = 4096;

/// Which child stream a chunk arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkSource {
    Stdout,
    Stderr,
}

/// One delivered unit of decoded shell output, in arrival order.
///
/// Chunks are never merged across the stdout/stderr boundary; per-stream
/// order is the order the OS delivered the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub source: ChunkSource,
    pub text: String,
}

/// Events published by the session manager for UI consumption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A chunk of shell output, delivered in arrival order.
    Output(OutputChunk),
    /// The environment probe located a toolchain and activated it in the
    /// session. Carries the discovered `bin` directory so command builders
    /// outside the core can use it.
    EnvironmentDiscovered { bin_path: PathBuf },
    /// The session was rebound to a new project directory.
    DirectorySynchronized { path: PathBuf },
    /// The session's output streams ended (shell exited or was killed).
    Closed,
}

/// Spawn a reader task that pumps one child stream into the event channel.
///
/// Bytes are decoded as UTF-8 incrementally so multi-byte sequences split
/// across reads survive chunk boundaries. The task ends at EOF or on the
/// first read error; `emit_closed` selects which stream announces the end of
/// the session (exactly one reader should, or `Closed` would fire twice).
pub(crate) fn spawn_reader<R>(
    mut stream: R,
    source: ChunkSource,
    events: broadcast::Sender<SessionEvent>,
    emit_closed: bool,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut decoder = encoding_rs::UTF_8.new_decoder();
        let mut buf = [0u8; CHUNK_BUF_SIZE];

        loop {
            match stream.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let mut text = String::with_capacity(n + 4);
                    let _ = decoder.decode_to_string(&buf[..n], &mut text, false);
                    if !text.is_empty() {
                        // Send only fails when no receiver exists; the relay
                        // keeps no backlog in that case.
                        let _ = events.send(SessionEvent::Output(OutputChunk { source, text }));
                    }
                }
                Err(err) => {
                    debug!(?source, %err, "pipe read failed, stopping relay");
                    break;
                }
            }
        }

        // Flush any bytes the decoder is still holding from a split sequence.
        let mut tail = String::new();
        let _ = decoder.decode_to_string(&[], &mut tail, true);
        if !tail.is_empty() {
            let _ = events.send(SessionEvent::Output(OutputChunk { source, text: tail }));
        }

        if emit_closed {
            let _ = events.send(SessionEvent::Closed);
        }
    })
}
