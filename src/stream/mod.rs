//! Streaming adapter: byte-producing sources as lazy sequences of chunks.
//!
//! [`stream_chunks`] alternates between draining whatever the source has
//! buffered and suspending until it signals more data or completion. A
//! completion signal does not end the stream by itself: one more drain pass
//! runs, since data may still be buffered when completion was signalled.
//!
//! [`stream_text`] decodes those chunks incrementally, so a multi-byte
//! character split across chunks comes out whole.
//!
//! # Example
//!
//! ```ignore
//! use futures::StreamExt;
//! use sigbridge::stream::{Encoding, stream_text};
//!
//! let mut lines = stream_text(process.clone(), Encoding::Utf8);
//! while let Some(text) = lines.next().await {
//!     print!("{}", text?);
//! }
//! ```

pub mod decoder;

pub use decoder::{Encoding, IncrementalDecoder};

use crate::error::{Error, Result};
use crate::signal::{EventQueue, Signal, SourceId};

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use futures::stream::{self, LocalBoxStream, StreamExt};

/// A resource that produces bytes over time.
pub trait ReadableSource {
    /// Takes up to `max` buffered bytes (all of them if `max` is 0); empty
    /// when nothing is buffered.
    fn read_available(&self, max: usize) -> Vec<u8>;

    /// True once the source will produce no more bytes.
    fn is_read_finished(&self) -> bool;

    /// Fires whenever new bytes are buffered.
    fn ready_read(&self) -> &Signal;

    /// Fires once when the source reaches end of stream.
    fn read_finished(&self) -> &Signal;
}

struct PipeInner {
    buffer: RefCell<Vec<u8>>,
    closed: Cell<bool>,
    ready_read: Signal,
    read_finished: Signal,
}

/// In-memory byte source written by application code.
///
/// Cheap to clone; clones share the buffer.
#[derive(Clone)]
pub struct Pipe {
    inner: Rc<PipeInner>,
}

impl Pipe {
    pub fn new() -> Self {
        let sender = SourceId::new();

        Self {
            inner: Rc::new(PipeInner {
                buffer: RefCell::new(Vec::new()),
                closed: Cell::new(false),
                ready_read: Signal::with_sender(sender, "ready_read"),
                read_finished: Signal::with_sender(sender, "read_channel_finished"),
            }),
        }
    }

    /// Appends `data` and fires `ready_read`.
    ///
    /// # Errors
    /// [`Error::SourceClosed`] after [`Pipe::close`].
    pub fn write(&self, data: &[u8]) -> Result<()> {
        if self.inner.closed.get() {
            return Err(Error::SourceClosed { kind: "pipe" });
        }

        self.inner.buffer.borrow_mut().extend_from_slice(data);
        self.inner.ready_read.emit([]);

        Ok(())
    }

    /// Marks end of stream; buffered bytes stay readable.
    pub fn close(&self) {
        if !self.inner.closed.replace(true) {
            self.inner.read_finished.emit([]);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.inner.buffer.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.buffer.borrow().is_empty()
    }
}

impl Default for Pipe {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadableSource for Pipe {
    fn read_available(&self, max: usize) -> Vec<u8> {
        let mut buffer = self.inner.buffer.borrow_mut();
        let take = if max == 0 {
            buffer.len()
        } else {
            max.min(buffer.len())
        };
        buffer.drain(..take).collect()
    }

    fn is_read_finished(&self) -> bool {
        self.inner.closed.get()
    }

    fn ready_read(&self) -> &Signal {
        &self.inner.ready_read
    }

    fn read_finished(&self) -> &Signal {
        &self.inner.read_finished
    }
}

impl fmt::Debug for Pipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipe")
            .field("buffered", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

struct Chunks<S> {
    source: S,
    wakeups: EventQueue,
    max: usize,
    done: bool,
}

/// Lazily yields the bytes of `source` in chunks of at most `max_chunk_size`
/// (unbounded if 0), ending after the source completes and is drained.
///
/// The stream is finite and cannot be restarted. It must be polled from
/// inside a computation.
pub fn stream_chunks<S>(source: S, max_chunk_size: usize) -> LocalBoxStream<'static, Result<Vec<u8>>>
where
    S: ReadableSource + 'static,
{
    // One pending wake-up is enough: every pass drains everything buffered.
    let wakeups = EventQueue::bounded(1);
    wakeups.attach(source.ready_read());
    wakeups.attach(source.read_finished());

    let state = Chunks {
        source,
        wakeups,
        max: max_chunk_size,
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if state.done {
                return None;
            }

            // Completion is sampled before draining so that bytes buffered
            // alongside it are still yielded.
            let finished = state.source.is_read_finished();
            let chunk = state.source.read_available(state.max);
            if !chunk.is_empty() {
                return Some((Ok(chunk), state));
            }
            if finished {
                return None;
            }

            if let Err(error) = state.wakeups.wait().await {
                state.done = true;
                return Some((Err(error), state));
            }
        }
    })
    .fuse()
    .boxed_local()
}

struct Text {
    chunks: LocalBoxStream<'static, Result<Vec<u8>>>,
    decoder: IncrementalDecoder,
    done: bool,
}

/// Decodes the bytes of `source` incrementally, yielding non-empty text
/// fragments.
///
/// At end of stream the decoder is flushed; leftover bytes that cannot form a
/// character end the stream with [`Error::Decode`].
pub fn stream_text<S>(source: S, encoding: Encoding) -> LocalBoxStream<'static, Result<String>>
where
    S: ReadableSource + 'static,
{
    let state = Text {
        chunks: stream_chunks(source, 0),
        decoder: IncrementalDecoder::new(encoding),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if state.done {
                return None;
            }

            let decoded = match state.chunks.next().await {
                Some(Ok(bytes)) => state.decoder.decode(&bytes),
                Some(Err(error)) => Err(error),
                None => {
                    state.done = true;
                    state.decoder.finish()
                }
            };

            match decoded {
                Ok(text) if text.is_empty() => continue,
                Ok(text) => return Some((Ok(text), state)),
                Err(error) => {
                    state.done = true;
                    return Some((Err(error), state));
                }
            }
        }
    })
    .fuse()
    .boxed_local()
}
