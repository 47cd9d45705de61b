//! Decoding of the upstream chunked event stream.
//!
//! The upstream body is a sequence of newline-delimited lines. Lines that
//! start with `data:` carry either a JSON chunk or the `[DONE]` sentinel.
//! Everything else (comments, blank lines, unparseable JSON) is noise and
//! never aborts the stream.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use serde::Deserialize;
use tracing::debug;

use super::error::LLMError;
use super::types::Frame;

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

/// Decode one line of the upstream stream.
pub fn decode_line(line: &str) -> Frame {
    let line = line.trim();
    let Some(data) = line.strip_prefix(DATA_PREFIX) else {
        return Frame::Noise;
    };
    let data = data.trim_start();

    if data == DONE_SENTINEL {
        return Frame::Done;
    }

    let chunk = match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            debug!(data = %data, error = %e, "Skipping unparseable stream frame");
            return Frame::Noise;
        }
    };

    if let Some(error) = chunk.error {
        return Frame::Error(error.into_message());
    }

    match chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
    {
        Some(content) if !content.is_empty() => Frame::Delta(content),
        _ => Frame::Noise,
    }
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<ChunkError>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ChunkError {
    Object {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        code: Option<serde_json::Value>,
    },
    Text(String),
}

impl ChunkError {
    fn into_message(self) -> String {
        match self {
            ChunkError::Text(text) => text,
            ChunkError::Object { message, code } => message.unwrap_or_else(|| match code {
                Some(code) => format!("upstream error ({code})"),
                None => "upstream error".to_string(),
            }),
        }
    }
}

/// Turns a byte stream into a stream of [`Frame`]s.
///
/// Bytes are buffered until a full line is available, so multi-byte
/// characters split across network chunks decode correctly. The stream ends
/// after [`Frame::Done`]. A body that ends without the sentinel yields a
/// final `Done` as well.
pub struct FrameStream<S> {
    inner: S,
    buffer: Vec<u8>,
    done: bool,
}

impl<S> FrameStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            done: false,
        }
    }

    fn next_line(&mut self) -> Option<String> {
        let line_end = self.buffer.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = self.buffer.drain(..=line_end).collect();
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

impl<S, E> Stream for FrameStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    LLMError: From<E>,
{
    type Item = Result<Frame, LLMError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        loop {
            if let Some(line) = self.next_line() {
                if line.trim().is_empty() {
                    continue;
                }
                let frame = decode_line(&line);
                if frame == Frame::Done {
                    self.done = true;
                }
                return Poll::Ready(Some(Ok(frame)));
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    self.buffer.extend_from_slice(&bytes);
                }
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(LLMError::from(e))));
                }
                Poll::Ready(None) => {
                    if !self.buffer.is_empty() {
                        // Treat a trailing partial line as complete.
                        self.buffer.push(b'\n');
                        continue;
                    }
                    self.done = true;
                    return Poll::Ready(Some(Ok(Frame::Done)));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
