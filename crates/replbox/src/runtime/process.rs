//! Process spawning and stream pumping for interpreter sessions
//!
//! An interpreter runs as a child process (the container runtime client, or
//! the interpreter itself for direct execution). Reader tasks decode stdout
//! and stderr and forward the chunks over a channel, so callers can `select!`
//! on output and timers at the same time.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::runtime::{LaunchSpec, RuntimeError};

/// Bound on in-flight output chunks per session
const EVENT_CHANNEL_CAPACITY: usize = 256;

const READ_BUFFER_SIZE: usize = 4096;

/// Upper bound on `<runtime> kill`
const KILL_TIMEOUT: Duration = Duration::from_secs(5);

/// Which output stream an event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    Stdout,
    Stderr,
}

/// Event produced by the reader tasks of a session process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Decoded text received on a stream
    Data(StreamSource, String),

    /// The stream reached end of file
    Closed(StreamSource),
}

/// Handle to a running interpreter process
#[derive(Debug)]
pub struct SessionProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    events: mpsc::Receiver<StreamEvent>,
    readers: Vec<JoinHandle<()>>,
    /// Runtime command that kills the container backing this process
    kill_command: Option<Vec<String>>,
    stdout_closed: bool,
    stderr_closed: bool,
}

impl SessionProcess {
    /// Spawn the process described by `launch`
    ///
    /// For isolated launches the container is killed through the runtime on
    /// [`kill`](Self::kill), so it does not outlive its client.
    #[instrument(skip(launch), fields(container = launch.container.as_deref()))]
    pub fn spawn(launch: &LaunchSpec) -> Result<Self, RuntimeError> {
        let args = &launch.args;
        debug!(?args, "spawning session process");

        let program = args
            .first()
            .ok_or_else(|| RuntimeError::CommandFailed("empty command arguments".to_string()))?;
        let mut child = Command::new(program)
            .args(&args[1..])
            .envs(launch.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(RuntimeError::SpawnFailed)?;

        let stdin = child.stdin.take();
        let (tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let mut readers = Vec::with_capacity(2);
        let mut stdout_closed = true;
        let mut stderr_closed = true;
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, StreamSource::Stdout, tx.clone()));
            stdout_closed = false;
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, StreamSource::Stderr, tx));
            stderr_closed = false;
        }

        Ok(Self {
            child,
            stdin,
            events,
            readers,
            kill_command: launch.kill_command.clone(),
            stdout_closed,
            stderr_closed,
        })
    }

    /// OS process id of the child, if it is still running
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Write to the process stdin
    pub async fn write(&mut self, data: &[u8]) -> Result<(), RuntimeError> {
        let stdin = self.stdin.as_mut().ok_or(RuntimeError::StdinClosed)?;
        stdin.write_all(data).await?;
        stdin.flush().await?;
        debug!(len = data.len(), "wrote to stdin");
        Ok(())
    }

    /// Close stdin to signal EOF
    pub fn close_stdin(&mut self) {
        self.stdin = None;
    }

    /// Receive the next stream event
    ///
    /// Returns `None` once both streams are closed and drained.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        let event = self.events.recv().await;
        if let Some(StreamEvent::Closed(source)) = &event {
            self.mark_closed(*source);
        }
        event
    }

    /// Drop events that are already buffered, returning how many were discarded
    ///
    /// Close events are still recorded so [`streams_closed`](Self::streams_closed)
    /// stays accurate.
    pub fn discard_pending(&mut self) -> usize {
        let mut discarded = 0;
        while let Ok(event) = self.events.try_recv() {
            if let StreamEvent::Closed(source) = event {
                self.mark_closed(source);
            }
            discarded += 1;
        }
        discarded
    }

    /// Check if both output streams reached end of file
    pub fn streams_closed(&self) -> bool {
        self.stdout_closed && self.stderr_closed
    }

    /// Check if the process has exited (non-blocking)
    pub fn has_exited(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(e) => {
                warn!(?e, "failed to poll session process");
                true
            }
        }
    }

    /// Wait for the process to exit after closing stdin
    pub async fn wait(&mut self) -> Result<ExitStatus, RuntimeError> {
        self.stdin = None;
        Ok(self.child.wait().await?)
    }

    /// Kill the process, and the container behind it when there is one
    pub async fn kill(&mut self) -> Result<(), RuntimeError> {
        self.stdin = None;

        if let Some(args) = self.kill_command.take()
            && let Err(e) = run_kill_command(&args).await
        {
            warn!(?e, "failed to kill container");
        }

        if !self.has_exited() {
            self.child.kill().await?;
        }

        for reader in self.readers.drain(..) {
            reader.abort();
        }
        Ok(())
    }

    fn mark_closed(&mut self, source: StreamSource) {
        match source {
            StreamSource::Stdout => self.stdout_closed = true,
            StreamSource::Stderr => self.stderr_closed = true,
        }
    }
}

async fn run_kill_command(args: &[String]) -> Result<(), RuntimeError> {
    let program = args
        .first()
        .ok_or_else(|| RuntimeError::CommandFailed("empty command arguments".to_string()))?;

    debug!(?args, "killing container");
    let output = Command::new(program)
        .args(&args[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(KILL_TIMEOUT, output).await {
        Ok(Ok(output)) if output.status.success() => Ok(()),
        Ok(Ok(output)) => Err(RuntimeError::KillFailed(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        )),
        Ok(Err(e)) => Err(RuntimeError::SpawnFailed(e)),
        Err(_) => Err(RuntimeError::TimedOut(KILL_TIMEOUT)),
    }
}

fn spawn_reader<R>(
    mut reader: R,
    source: StreamSource,
    tx: mpsc::Sender<StreamEvent>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut pending = Vec::new();

        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let text = decode_chunk(&mut pending, &buf[..n]);
                    if !text.is_empty()
                        && tx.send(StreamEvent::Data(source, text)).await.is_err()
                    {
                        // Receiver gone, the session was dropped
                        return;
                    }
                }
                Err(e) => {
                    warn!(?e, ?source, "stream read error");
                    break;
                }
            }
        }

        if !pending.is_empty() {
            let tail = String::from_utf8_lossy(&pending).into_owned();
            let _ = tx.send(StreamEvent::Data(source, tail)).await;
        }
        let _ = tx.send(StreamEvent::Closed(source)).await;
    })
}

/// Decode as much of `pending + data` as forms complete UTF-8
///
/// An incomplete multi-byte sequence at the end stays in `pending` for the
/// next chunk. Invalid bytes become U+FFFD.
pub(crate) fn decode_chunk(pending: &mut Vec<u8>, data: &[u8]) -> String {
    pending.extend_from_slice(data);
    let mut out = String::new();

    loop {
        match std::str::from_utf8(pending) {
            Ok(text) => {
                out.push_str(text);
                pending.clear();
                break;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&pending[..valid]));
                match e.error_len() {
                    Some(len) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        pending.drain(..valid + len);
                    }
                    None => {
                        pending.drain(..valid);
                        break;
                    }
                }
            }
        }
    }

    out
}
