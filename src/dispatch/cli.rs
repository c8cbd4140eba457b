//! Subprocess transport.
//!
//! Spawns the provider command in its own process group, feeds the prompt
//! on stdin, and collects stdout/stderr while the child runs. A deadline
//! and an optional cancellation token race the child. On timeout or
//! cancellation the whole group is killed and the child reaped before the
//! error is returned.
//!
//! Output is complete once the child exits and its pipes close. Background
//! helpers that inherited the pipes get [`PIPE_GRACE`] to let go before
//! the group is killed.

use std::pin::pin;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::dispatch::transport::{ExecutionResult, Invocation, Target, Transport};
use crate::util::{elapsed_ms, strip_ansi};
use crate::{rlog_debug, rlog_trace, rlog_warn, Error, Result};

/// How long inherited pipes may stay open after the child has exited.
pub const PIPE_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Default)]
pub struct CliTransport {
    cancel: CancellationToken,
}

enum Outcome {
    Finished(std::io::Result<(ExitStatus, Vec<u8>, Vec<u8>)>),
    TimedOut,
    Cancelled,
}

impl CliTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run `command args`, delivering `input` on stdin.
    ///
    /// # Errors
    ///
    /// - `Spawn` if the command cannot be started
    /// - `TransportExit` on a non-zero exit, carrying stderr
    /// - `TransportTimeout` if the child outlives `timeout`
    /// - `Cancelled` if the cancellation token fires first
    pub async fn run(
        &self,
        command: &str,
        args: &[String],
        cwd: Option<&std::path::Path>,
        input: &str,
        timeout: Duration,
    ) -> Result<ExecutionResult> {
        let start = Instant::now();
        rlog_debug!(
            "CliTransport: spawn {} {:?} timeout={:?}",
            command,
            args,
            timeout
        );

        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        let mut child = cmd.spawn().map_err(|source| Error::Spawn {
            command: command.to_string(),
            source,
        })?;
        // With process_group(0) the group id is the child's pid.
        let group = child.id();

        let outcome = {
            let run = collect(&mut child, group, input);
            tokio::select! {
                result = tokio::time::timeout(timeout, run) => match result {
                    Ok(finished) => Outcome::Finished(finished),
                    Err(_) => Outcome::TimedOut,
                },
                _ = self.cancel.cancelled() => Outcome::Cancelled,
            }
        };

        let (status, stdout, stderr) = match outcome {
            Outcome::Finished(result) => result?,
            Outcome::TimedOut => {
                terminate(&mut child, group, command).await;
                rlog_warn!("CliTransport: {} timed out after {:?}", command, timeout);
                return Err(Error::TransportTimeout { timeout });
            }
            Outcome::Cancelled => {
                terminate(&mut child, group, command).await;
                return Err(Error::Cancelled);
            }
        };

        let latency_ms = elapsed_ms(start);
        let stdout = String::from_utf8_lossy(&stdout);
        let stderr = String::from_utf8_lossy(&stderr);

        if !status.success() {
            let code = status.code().unwrap_or(-1);
            rlog_debug!(
                "CliTransport: {} exited with code {} after {}ms",
                command,
                code,
                latency_ms
            );
            return Err(Error::TransportExit {
                code,
                stderr: stderr.trim().to_string(),
            });
        }

        rlog_debug!("CliTransport: {} ok in {}ms", command, latency_ms);
        rlog_trace!("CliTransport: stdout={}", stdout);
        Ok(ExecutionResult {
            response: strip_ansi(&stdout),
            model: command.to_string(),
            latency_ms,
            tokens: 0,
        })
    }
}

#[async_trait]
impl Transport for CliTransport {
    async fn execute(&self, invocation: &Invocation) -> Result<ExecutionResult> {
        match &invocation.target {
            Target::Process { command, args, cwd } => {
                self.run(
                    command,
                    args,
                    cwd.as_deref(),
                    &invocation.input,
                    invocation.timeout,
                )
                .await
            }
            Target::Http { url, .. } => Err(Error::Validation(format!(
                "cli transport cannot call http target {url}"
            ))),
        }
    }
}

/// Feed stdin and drain both pipes concurrently so a chatty child can
/// never block on a full pipe while we are still writing. The child's exit
/// ends the call; pipes still held by its descendants after [`PIPE_GRACE`]
/// are closed by killing the group.
async fn collect(
    child: &mut Child,
    group: Option<u32>,
    input: &str,
) -> std::io::Result<(ExitStatus, Vec<u8>, Vec<u8>)> {
    let feeder = tokio::spawn(feed_stdin(child.stdin.take(), input.to_owned()));
    let stdout = tokio::spawn(read_pipe(child.stdout.take()));
    let stderr = tokio::spawn(read_pipe(child.stderr.take()));

    let status = child.wait().await?;
    feeder.abort();

    let mut pipes = pin!(async { tokio::try_join!(joined(stdout), joined(stderr)) });
    let (out, err) = match tokio::time::timeout(PIPE_GRACE, pipes.as_mut()).await {
        Ok(drained) => drained?,
        Err(_) => {
            rlog_debug!("CliTransport: output pipes still open after exit, killing group");
            kill_group(group);
            pipes.await?
        }
    };
    Ok((status, out, err))
}

async fn feed_stdin(stdin: Option<ChildStdin>, input: String) -> std::io::Result<()> {
    if let Some(mut stdin) = stdin {
        match stdin.write_all(input.as_bytes()).await {
            // The child may exit without reading its input.
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
            other => other?,
        }
        // Dropping stdin closes it and signals EOF.
    }
    Ok(())
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

async fn joined(reader: JoinHandle<std::io::Result<Vec<u8>>>) -> std::io::Result<Vec<u8>> {
    reader.await.map_err(std::io::Error::other)?
}

/// Kill the child's process group, then the child itself, and reap it.
async fn terminate(child: &mut Child, group: Option<u32>, command: &str) {
    kill_group(group);
    if let Err(e) = child.kill().await {
        rlog_warn!("CliTransport: failed to kill {}: {}", command, e);
    }
}

#[cfg(unix)]
fn kill_group(group: Option<u32>) {
    let Some(pgid) = group.and_then(|id| i32::try_from(id).ok()) else {
        return;
    };
    // SAFETY: kill(2) takes plain integers and touches no memory we own.
    if unsafe { libc::kill(-pgid, libc::SIGKILL) } != 0 {
        rlog_debug!(
            "CliTransport: kill of group {} failed: {}",
            pgid,
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn kill_group(_group: Option<u32>) {}
