//! Supervision of a running transcoder process.

use futures::StreamExt;
use homestead_core::{MediaError, MediaResult};
use homestead_storage::ByteStream;
use std::io;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, Command};

/// Diagnostic output kept per process; older output is discarded first.
pub const MAX_STDERR_BYTES: usize = 64 * 1024;

/// Summary of a successful transcode.
#[derive(Debug, Clone, Default)]
pub struct TranscodeReport {
    pub input_bytes: u64,
    pub duration_ms: f64,
    /// Tail of the transcoder's diagnostic output.
    pub diagnostics: String,
}

/// A live transcoder reading its input from stdin.
///
/// Dropping the handle (or the future of [`TranscodeProcess::run`]) kills the
/// child process.
#[derive(Debug)]
pub struct TranscodeProcess {
    child: Child,
    started: Instant,
}

impl TranscodeProcess {
    /// Spawn `command` with piped stdin and stderr.
    ///
    /// Failure to start is reported as `TranscodeProcess` without an exit code.
    pub fn spawn(mut command: Command) -> MediaResult<Self> {
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| {
            tracing::error!(error = %e, "Failed to start transcoder process");
            MediaError::transcode_spawn(e)
        })?;

        tracing::debug!(pid = ?child.id(), "Transcoder process started");

        Ok(Self {
            child,
            started: Instant::now(),
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Pipe `input` into the process while collecting its diagnostics, then
    /// wait for it to exit.
    ///
    /// Exit code 0 yields a report; any other exit is a `TranscodeProcess`
    /// error carrying the exit code and the diagnostic output.
    pub async fn run(mut self, input: ByteStream) -> MediaResult<TranscodeReport> {
        let stdin = self
            .child
            .stdin
            .take()
            .ok_or_else(|| MediaError::transcode_spawn("stdin was not captured"))?;
        let stderr = self
            .child
            .stderr
            .take()
            .ok_or_else(|| MediaError::transcode_spawn("stderr was not captured"))?;

        let drain = tokio::spawn(drain_stderr(stderr));

        let input_bytes = match feed_input(input, stdin).await {
            Ok(written) => written,
            Err(err) => {
                // The source stream broke; partial input must not produce output.
                let _ = self.child.start_kill();
                let _ = self.child.wait().await;
                let _ = drain.await;
                return Err(err);
            }
        };

        let status = self.child.wait().await?;
        let diagnostics = drain.await.unwrap_or_default();
        let duration_ms = self.started.elapsed().as_secs_f64() * 1000.0;

        if status.success() {
            return Ok(TranscodeReport {
                input_bytes,
                duration_ms,
                diagnostics,
            });
        }

        let message = match status.code() {
            Some(_) => "transcoder exited unsuccessfully".to_string(),
            None => "transcoder was terminated by a signal".to_string(),
        };

        tracing::error!(
            exit_code = ?status.code(),
            duration_ms = duration_ms,
            stderr = %diagnostics,
            "Transcoder failed"
        );

        Err(MediaError::TranscodeProcess {
            exit_code: status.code(),
            message,
            stderr: diagnostics,
        })
    }
}

async fn feed_input(mut input: ByteStream, mut stdin: ChildStdin) -> MediaResult<u64> {
    let mut written = 0u64;

    while let Some(chunk) = input.next().await {
        let chunk = chunk.map_err(MediaError::from)?;
        match stdin.write_all(&chunk).await {
            Ok(()) => written += chunk.len() as u64,
            // The process stopped reading; its exit status tells why.
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => return Ok(written),
            Err(e) => return Err(MediaError::Io(e)),
        }
    }

    match stdin.shutdown().await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {}
        Err(e) => return Err(MediaError::Io(e)),
    }

    Ok(written)
}

async fn drain_stderr(mut stderr: ChildStderr) -> String {
    let mut tail = StderrTail::new(MAX_STDERR_BYTES);
    let mut buf = vec![0u8; 8192];

    loop {
        match stderr.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                tracing::trace!(bytes = n, "Transcoding in progress");
                tail.push(&buf[..n]);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read transcoder diagnostics");
                break;
            }
        }
    }

    tail.into_string()
}

/// Bounded buffer keeping the most recent bytes pushed into it.
#[derive(Debug)]
struct StderrTail {
    buf: Vec<u8>,
    cap: usize,
}

impl StderrTail {
    fn new(cap: usize) -> Self {
        Self {
            buf: Vec::new(),
            cap,
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        if self.buf.len() > self.cap {
            let excess = self.buf.len() - self.cap;
            self.buf.drain(..excess);
        }
    }

    fn into_string(self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }
}
