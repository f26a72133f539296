//! Interactive remote shell session.

use std::process::Stdio;
use std::time::Duration;

use regex::bytes::Regex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{Instrument, Span, debug, info, info_span, warn};

use super::{ChannelConfig, Expected, LineRead, ShellReader, ShellWriter};
use crate::constants::{CLOSE_GRACE, CLOSE_TIMEOUT};
use crate::error::{Error, Result};

/// Channel over a spawned process's stdin/stdout.
pub type ProcessChannel = ShellChannel<ChildStdout, ChildStdin>;

/// Handle to an interactive remote shell.
///
/// Owns the session process (if any). `close` asks the shell to exit and
/// then makes sure the process is gone; dropping the handle without
/// closing kills the process.
pub struct ShellChannel<R, W> {
    reader: ShellReader<R>,
    writer: ShellWriter<W>,
    config: ChannelConfig,
    prompt: Regex,
    child: Option<Child>,
    closed: bool,
    span: Span,
}

impl ProcessChannel {
    /// Spawn `command` and wait until the remote shell prompt appears.
    ///
    /// `command` is the program followed by its arguments, e.g.
    /// `["ssh", "-tt", "host"]`. The process is killed again if the prompt
    /// never shows up.
    pub async fn open(command: &[String], config: ChannelConfig) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| Error::channel("no remote shell command given"))?;

        let span = info_span!("channel", program = %program);
        info!(parent: &span, command = %command.join(" "), "Spawning remote shell");

        let mut process = Command::new(program);
        process
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = process
            .spawn()
            .map_err(|e| Error::channel(format!("failed to spawn {program}: {e}")))?;
        debug!(parent: &span, pid = ?child.id(), "Remote shell spawned");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::channel("failed to capture remote shell stdout"))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::channel("failed to capture remote shell stdin"))?;

        let mut channel = Self::build(stdout, stdin, config, Some(child), span)?;
        if let Err(e) = channel.sync_prompt().await {
            channel.close().await;
            return Err(e);
        }
        Ok(channel)
    }
}

impl<R, W> ShellChannel<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Wrap an already-connected reader/writer pair (no process to manage).
    pub fn from_io(reader: R, writer: W, config: ChannelConfig) -> Result<Self> {
        let span = info_span!("channel", program = "io");
        Self::build(reader, writer, config, None, span)
    }

    fn build(
        reader: R,
        writer: W,
        config: ChannelConfig,
        child: Option<Child>,
        span: Span,
    ) -> Result<Self> {
        let prompt = compile(&config.prompt)?;
        Ok(Self {
            reader: ShellReader::new(reader),
            writer: ShellWriter::new(writer),
            config,
            prompt,
            child,
            closed: false,
            span,
        })
    }

    /// Bring the shell into a predictable state.
    ///
    /// Waits for the prompt, turns off input echo and changes to the home
    /// directory, waiting for the prompt after each step.
    pub async fn sync_prompt(&mut self) -> Result<()> {
        let span = self.span.clone();
        async {
            let first = self.wait_for_prompt().await?;
            if !first.before.trim().is_empty() {
                debug!(banner = %first.before.trim(), "Remote shell banner");
            }
            debug!(prompt = %first.matched, "Remote shell prompt seen");

            self.send_line("stty -echo").await?;
            self.wait_for_prompt().await?;

            self.send_line("cd").await?;
            self.wait_for_prompt().await?;
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn wait_for_prompt(&mut self) -> Result<Expected> {
        let timeout = self.config.prompt_timeout;
        self.reader
            .expect(std::slice::from_ref(&self.prompt), timeout)
            .await
    }

    /// Wait for one of `patterns` (regular expressions) in the output.
    pub async fn expect(&mut self, patterns: &[&str], timeout: Duration) -> Result<Expected> {
        let compiled = patterns
            .iter()
            .map(|p| compile(p))
            .collect::<Result<Vec<_>>>()?;
        self.reader.expect(&compiled, timeout).await
    }

    /// Send one line.
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        self.writer.send_line(line).await
    }

    /// Read one line, bounded by the configured read timeout.
    pub async fn read_line(&mut self) -> Result<LineRead> {
        let timeout = self.config.read_timeout;
        self.reader.read_line(timeout).await
    }

    /// Borrow the reader and writer halves independently.
    pub fn split(&mut self) -> (&mut ShellReader<R>, &mut ShellWriter<W>) {
        (&mut self.reader, &mut self.writer)
    }

    /// Whether `close` has run.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// End the session.
    ///
    /// Sends Ctrl-C to stop whatever runs in the foreground, then `exit`,
    /// and waits briefly for the session to end. The process is killed if it
    /// is still alive afterwards. Never fails; calling it again is a no-op.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let span = self.span.clone();
        async {
            debug!("Closing remote shell");
            if let Err(e) = self.graceful_exit().await {
                debug!(error = %e, "Graceful exit failed");
            }

            let Some(mut child) = self.child.take() else {
                return;
            };
            match tokio::time::timeout(CLOSE_GRACE, child.wait()).await {
                Ok(Ok(status)) => debug!(%status, "Remote shell exited"),
                _ => {
                    if let Err(e) = child.kill().await {
                        warn!(error = %e, "Failed to kill remote shell process");
                    } else {
                        debug!("Remote shell process killed");
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn graceful_exit(&mut self) -> Result<()> {
        self.writer.send_raw(b"\x03").await?;
        tokio::time::sleep(CLOSE_GRACE).await;
        self.writer.send_line("exit").await?;
        let exiting = compile("Exiting session")?;
        match self
            .reader
            .expect_or_eof(std::slice::from_ref(&exiting), CLOSE_TIMEOUT)
            .await?
        {
            Some(_) => debug!("Remote session exiting"),
            None => debug!("Remote shell closed its output"),
        }
        Ok(())
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::Config {
        message: format!("invalid pattern '{pattern}': {e}"),
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, duplex, split};

    #[tokio::test]
    async fn open_without_command_fails() {
        let result = ProcessChannel::open(&[], ChannelConfig::default()).await;
        assert!(matches!(result, Err(Error::Channel { .. })));
    }

    #[tokio::test]
    async fn open_missing_program_fails() {
        let command = vec!["/nonexistent/shtun-remote-shell".to_string()];
        let result = ProcessChannel::open(&command, ChannelConfig::default()).await;
        assert!(matches!(result, Err(Error::Channel { .. })));
    }

    #[test]
    fn invalid_prompt_is_config_error() {
        let (a, _b) = duplex(64);
        let (r, w) = split(a);
        let config = ChannelConfig {
            prompt: "(".into(),
            ..ChannelConfig::default()
        };
        let result = ShellChannel::from_io(r, w, config);
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn sync_prompt_sends_setup_commands() {
        let (local, remote) = duplex(4096);
        let (r, w) = split(local);
        let mut channel = ShellChannel::from_io(r, w, ChannelConfig::default()).unwrap();

        let (remote_r, mut remote_w) = split(remote);
        let shell = tokio::spawn(async move {
            let mut lines = BufReader::new(remote_r).lines();
            let mut received = Vec::new();
            remote_w.write_all(b"Welcome\r\nsh-5.1$ ").await.unwrap();
            for _ in 0..2 {
                let line = lines.next_line().await.unwrap().unwrap();
                received.push(line);
                remote_w.write_all(b"sh-5.1$ ").await.unwrap();
            }
            received
        });

        channel.sync_prompt().await.unwrap();
        assert_eq!(shell.await.unwrap(), vec!["stty -echo", "cd"]);
    }

    #[tokio::test(start_paused = true)]
    async fn close_is_graceful_and_idempotent() {
        let (local, remote) = duplex(4096);
        let (r, w) = split(local);
        let mut channel = ShellChannel::from_io(r, w, ChannelConfig::default()).unwrap();

        let shell = tokio::spawn(async move {
            let (remote_r, mut remote_w) = split(remote);
            let mut lines = BufReader::new(remote_r).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            remote_w.write_all(b"\r\nExiting session with sessionId: x\r\n").await.unwrap();
            line
        });

        channel.close().await;
        assert!(channel.is_closed());
        assert_eq!(shell.await.unwrap(), "\x03exit");

        // second close must not touch the (now dead) remote
        channel.close().await;
    }
}
