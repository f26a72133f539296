//! In-memory remote shell for channel tests.

use shtun_core::channel::{ChannelConfig, ShellChannel};
use tokio::io::{
    AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf, duplex, split,
};

/// Channel type produced by [`memory_channel`].
pub type MemoryChannel = ShellChannel<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

const PIPE_CAPACITY: usize = 64 * 1024;

/// Create a channel whose remote end is driven by the returned [`RemoteShell`].
pub fn memory_channel(config: ChannelConfig) -> (MemoryChannel, RemoteShell) {
    let (local, remote) = duplex(PIPE_CAPACITY);
    let (r, w) = split(local);
    let channel = ShellChannel::from_io(r, w, config).unwrap();

    let (remote_r, remote_w) = split(remote);
    let shell = RemoteShell {
        reader: BufReader::new(remote_r),
        writer: remote_w,
    };
    (channel, shell)
}

/// The remote side of a [`MemoryChannel`]: reads what the channel sends and
/// writes what the channel should see.
#[derive(Debug)]
pub struct RemoteShell {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl RemoteShell {
    /// Write raw output towards the channel.
    pub async fn send(&mut self, text: &str) {
        self.writer.write_all(text.as_bytes()).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Read one line sent by the channel, without the line ending. `None`
    /// once the channel side is gone.
    pub async fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await.ok()?;
        if n == 0 {
            return None;
        }
        Some(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Play the shell side of prompt synchronization and return the
    /// commands the channel sent.
    pub async fn serve_prompt_sync(&mut self, prompt: &str) -> Vec<String> {
        let mut commands = Vec::new();
        self.send(prompt).await;
        for _ in 0..2 {
            if let Some(line) = self.read_line().await {
                commands.push(line);
            }
            self.send(prompt).await;
        }
        commands
    }

    /// Close the remote side's output (the channel then sees EOF).
    pub async fn close_output(&mut self) {
        let _ = self.writer.shutdown().await;
    }
}
