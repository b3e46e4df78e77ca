//! `data: ` frame decoding
//!
//! The agent server writes one JSON payload per line, prefixed with `data: `,
//! and ends the stream with `data: [DONE]`. Network chunks carry no alignment
//! guarantee, so partial lines are held until their newline arrives.

use super::StreamingEvent;
use bytes::Bytes;
use futures::Stream;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;

const DATA_PREFIX: &[u8] = b"data: ";
const DONE_SENTINEL: &[u8] = b"[DONE]";

/// Why a `data: ` line was dropped
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("malformed frame payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown event kind `{0}`")]
    UnknownKind(String),
}

/// A decoded line
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event(StreamingEvent),
    /// `data: [DONE]` was seen; nothing after it is decoded
    Done,
}

/// Incremental line decoder. Holds nothing but the pending partial line.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: Vec<u8>,
    done: bool,
    dropped: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the `[DONE]` sentinel has been decoded
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Number of `data: ` lines dropped as malformed or of unknown kind
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Feed one network chunk, returning every frame completed by it
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        if self.done {
            return frames;
        }

        self.pending.extend_from_slice(chunk);
        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            let Some(frame) = self.decode_line(&line[..newline]) else {
                continue;
            };
            if frame == Frame::Done {
                self.done = true;
                self.pending.clear();
                frames.push(frame);
                break;
            }
            frames.push(frame);
        }
        frames
    }

    /// Decode whatever is left once the body has closed
    pub fn finish(&mut self) -> Option<Frame> {
        if self.done || self.pending.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.pending);
        let frame = self.decode_line(&line);
        if frame == Some(Frame::Done) {
            self.done = true;
        }
        frame
    }

    fn decode_line(&mut self, line: &[u8]) -> Option<Frame> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let payload = line.strip_prefix(DATA_PREFIX)?;
        if payload == DONE_SENTINEL {
            return Some(Frame::Done);
        }

        let decoded = std::str::from_utf8(payload)
            .map_err(DecodeError::from)
            .and_then(StreamingEvent::from_json);
        match decoded {
            Ok(event) => Some(Frame::Event(event)),
            Err(e) => {
                self.dropped += 1;
                tracing::warn!(
                    error = %e,
                    payload = %String::from_utf8_lossy(payload),
                    "Dropping undecodable frame"
                );
                None
            }
        }
    }
}

/// Adapts a byte stream into a stream of decoded events.
///
/// Ends after `[DONE]` without polling the body again, or when the body
/// closes. A body error is yielded once and ends the stream.
pub struct FrameStream<S> {
    inner: S,
    decoder: FrameDecoder,
    ready: VecDeque<StreamingEvent>,
    finished: bool,
}

impl<S> FrameStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(),
            ready: VecDeque::new(),
            finished: false,
        }
    }

    /// True if the stream ended on the sentinel rather than on body closure
    pub fn saw_done(&self) -> bool {
        self.decoder.is_done()
    }

    pub fn dropped_frames(&self) -> usize {
        self.decoder.dropped()
    }

    fn enqueue(&mut self, frames: impl IntoIterator<Item = Frame>) {
        for frame in frames {
            match frame {
                Frame::Event(event) => self.ready.push_back(event),
                Frame::Done => self.finished = true,
            }
        }
    }
}

impl<S, E> Stream for FrameStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<StreamingEvent, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(event) = this.ready.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }
            if this.finished {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    let frames = this.decoder.push(&chunk);
                    this.enqueue(frames);
                }
                Poll::Ready(Some(Err(e))) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    let tail = this.decoder.finish();
                    this.enqueue(tail);
                    this.finished = true;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
