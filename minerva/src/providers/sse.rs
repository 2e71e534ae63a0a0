//! Incremental decoding of `text/event-stream` bodies.
//!
//! Network reads don't respect line boundaries, so the decoder keeps the
//! trailing partial line between reads. Lines are split on raw bytes before
//! UTF-8 decoding so a multi-byte character cut in half by a read is rejoined.

use super::{ProviderError, TokenStream};
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Line splitter that carries incomplete lines across chunks.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every line it completed, without terminators.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(rel) = self.buf[start..].iter().position(|b| *b == b'\n') {
            let end = start + rel;
            lines.push(decode_line(&self.buf[start..end]));
            start = end + 1;
        }
        self.buf.drain(..start);
        lines
    }

    /// Take whatever is left once the body has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        let line = decode_line(&rest);
        (!line.is_empty()).then_some(line)
    }

    /// Bytes held back waiting for a newline.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// What a single event-stream line means to a chat decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseLine<'a> {
    /// Payload of a `data:` field.
    Data(&'a str),
    /// The `[DONE]` sentinel.
    Done,
    /// Blank lines, comments and fields other than `data`.
    Ignored,
}

impl<'a> SseLine<'a> {
    pub fn classify(line: &'a str) -> Self {
        let Some(payload) = line.strip_prefix("data:") else {
            return SseLine::Ignored;
        };
        let payload = payload.strip_prefix(' ').unwrap_or(payload).trim_end();
        match payload {
            "" => SseLine::Ignored,
            "[DONE]" => SseLine::Done,
            data => SseLine::Data(data),
        }
    }
}

/// Run `fut` unless `signal` fires first.
pub async fn abortable<F: Future>(
    signal: Option<&CancellationToken>,
    fut: F,
) -> Result<F::Output, ProviderError> {
    match signal {
        Some(token) => {
            if token.is_cancelled() {
                return Err(ProviderError::Aborted);
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(ProviderError::Aborted),
                out = fut => Ok(out),
            }
        }
        None => Ok(fut.await),
    }
}

/// What a provider decoder wants done with one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Token(String),
    Skip,
    /// End the reply; the rest of the body is not read.
    Finish,
    /// End the reply with an error the provider reported in-band.
    Fail(String),
}

/// Drive `body` through a [`LineDecoder`], handing each complete line to
/// `on_line` and yielding the tokens it produces in order.
///
/// `signal` is checked while waiting for every chunk and again before every
/// token, so nothing is yielded once it has fired. Dropping the returned
/// stream drops `body`.
pub fn decode_body<S, E, F>(body: S, signal: Option<CancellationToken>, mut on_line: F) -> TokenStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<ProviderError> + Send + 'static,
    F: FnMut(SseLine<'_>) -> Step + Send + 'static,
{
    let s = async_stream::stream! {
        let mut body = Box::pin(body);
        let mut decoder = LineDecoder::new();
        loop {
            let next = match abortable(signal.as_ref(), body.next()).await {
                Ok(next) => next,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            let ended = next.is_none();
            let lines = match next {
                Some(Ok(chunk)) => decoder.feed(&chunk),
                Some(Err(e)) => {
                    yield Err(e.into());
                    return;
                }
                None => decoder.finish().into_iter().collect(),
            };
            for line in lines {
                match on_line(SseLine::classify(&line)) {
                    Step::Token(token) => {
                        if signal.as_ref().is_some_and(CancellationToken::is_cancelled) {
                            yield Err(ProviderError::Aborted);
                            return;
                        }
                        yield Ok(token);
                    }
                    Step::Skip => {}
                    Step::Finish => return,
                    Step::Fail(message) => {
                        yield Err(ProviderError::Other(message));
                        return;
                    }
                }
            }
            if ended {
                return;
            }
        }
    };
    Box::pin(s)
}
