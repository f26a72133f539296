//! Line-oriented reader and writer halves of a shell channel.

use std::time::Duration;

use bytes::BytesMut;
use regex::bytes::Regex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{Instant, timeout_at};
use tracing::{trace, warn};

use super::LineRead;
use crate::constants::MAX_PENDING_LINE;
use crate::error::{Error, Result};

/// Initial read buffer capacity.
const READ_CHUNK: usize = 8 * 1024;

/// A successful `expect` match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expected {
    /// Index of the pattern that matched.
    pub index: usize,
    /// Output consumed before the match.
    pub before: String,
    /// The matched text.
    pub matched: String,
}

/// Buffered reader over the remote shell's output.
///
/// All reads go through one buffer so pattern matching (`expect`) and line
/// reading can be mixed freely: whatever `expect` does not consume is still
/// there for the next `read_line`.
///
/// A line that grows past `MAX_PENDING_LINE` without a newline is noise no
/// frame could produce; it is dropped up to and including its newline.
#[derive(Debug)]
pub struct ShellReader<R> {
    inner: R,
    buf: BytesMut,
    eof: bool,
    discarding: bool,
}

impl<R: AsyncRead + Unpin> ShellReader<R> {
    /// Wrap a reader.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_CHUNK),
            eof: false,
            discarding: false,
        }
    }

    /// Read one line, waiting at most `timeout` for it to complete.
    ///
    /// A partial line left when the stream ends is returned as a line; the
    /// following call reports `Eof`.
    pub async fn read_line(&mut self, timeout: Duration) -> Result<LineRead> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let line = self.buf.split_to(pos + 1);
                if self.discarding {
                    self.discarding = false;
                    continue;
                }
                return Ok(LineRead::Line(
                    String::from_utf8_lossy(&line[..pos]).into_owned(),
                ));
            }
            if self.buf.len() > MAX_PENDING_LINE {
                if !self.discarding {
                    warn!(bytes = self.buf.len(), "Discarding overlong line from remote shell");
                }
                self.buf.clear();
                self.discarding = true;
            }
            if self.eof {
                if self.discarding {
                    self.buf.clear();
                    self.discarding = false;
                }
                if self.buf.is_empty() {
                    return Ok(LineRead::Eof);
                }
                let rest = self.buf.split();
                return Ok(LineRead::Line(String::from_utf8_lossy(&rest).into_owned()));
            }
            match timeout_at(deadline, self.fill()).await {
                Ok(result) => result?,
                Err(_) => return Ok(LineRead::Timeout),
            }
        }
    }

    /// Wait until one of `patterns` appears in the output.
    ///
    /// The earliest match in the stream wins; on a tie the lower pattern
    /// index wins. Everything up to the end of the match is consumed. Fails
    /// with a channel error on timeout or end of stream.
    pub async fn expect(&mut self, patterns: &[Regex], timeout: Duration) -> Result<Expected> {
        match self.expect_inner(patterns, timeout, false).await? {
            Some(expected) => Ok(expected),
            None => Err(Error::channel(format!(
                "remote shell closed while waiting for {}",
                describe(patterns)
            ))),
        }
    }

    /// Like `expect`, but end of stream is an acceptable outcome (`None`).
    pub async fn expect_or_eof(
        &mut self,
        patterns: &[Regex],
        timeout: Duration,
    ) -> Result<Option<Expected>> {
        self.expect_inner(patterns, timeout, true).await
    }

    async fn expect_inner(
        &mut self,
        patterns: &[Regex],
        timeout: Duration,
        eof_ok: bool,
    ) -> Result<Option<Expected>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some((index, start, end)) = earliest_match(patterns, &self.buf) {
                let consumed = self.buf.split_to(end);
                let expected = Expected {
                    index,
                    before: String::from_utf8_lossy(&consumed[..start]).into_owned(),
                    matched: String::from_utf8_lossy(&consumed[start..]).into_owned(),
                };
                trace!(index, matched = %expected.matched, "expect matched");
                return Ok(Some(expected));
            }
            if self.eof {
                if eof_ok {
                    return Ok(None);
                }
                return Err(Error::channel(format!(
                    "remote shell closed while waiting for {}",
                    describe(patterns)
                )));
            }
            match timeout_at(deadline, self.fill()).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(Error::channel(format!(
                        "timed out after {:?} waiting for {}",
                        timeout,
                        describe(patterns)
                    )));
                }
            }
        }
    }

    async fn fill(&mut self) -> Result<()> {
        self.buf.reserve(READ_CHUNK);
        let n = self
            .inner
            .read_buf(&mut self.buf)
            .await
            .map_err(|e| Error::channel(format!("failed to read from remote shell: {e}")))?;
        if n == 0 {
            self.eof = true;
        }
        Ok(())
    }
}

/// Line writer into the remote shell's input.
#[derive(Debug)]
pub struct ShellWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> ShellWriter<W> {
    /// Wrap a writer.
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write `line` plus a newline and flush.
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        let mut out = Vec::with_capacity(line.len() + 1);
        out.extend_from_slice(line.as_bytes());
        out.push(b'\n');
        self.send_raw(&out).await
    }

    /// Write raw bytes (e.g. a control character) and flush.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner
            .write_all(bytes)
            .await
            .map_err(|e| Error::channel(format!("failed to write to remote shell: {e}")))?;
        self.inner
            .flush()
            .await
            .map_err(|e| Error::channel(format!("failed to flush remote shell input: {e}")))
    }
}

fn earliest_match(patterns: &[Regex], haystack: &[u8]) -> Option<(usize, usize, usize)> {
    patterns
        .iter()
        .enumerate()
        .filter_map(|(index, re)| re.find(haystack).map(|m| (index, m.start(), m.end())))
        .min_by_key(|&(index, start, _)| (start, index))
}

fn describe(patterns: &[Regex]) -> String {
    let list: Vec<String> = patterns.iter().map(|re| format!("'{}'", re.as_str())).collect();
    list.join(" or ")
}

// =============================================================================
// Tests
// =============================================================================
