//! Helpers for supervising child processes with timeouts, cancellation and
//! bounded output.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How often the supervisor checks for cancellation while the child runs.
const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(100);
/// How long output readers may keep draining after the child has exited.
/// Descendants that inherited the pipes can hold them open indefinitely.
const READER_GRACE: Duration = Duration::from_millis(500);

/// Captured child process result. stdout and stderr share one buffer in
/// arrival order.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub output: Vec<u8>,
    pub truncated: usize,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl CommandOutput {
    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    pub fn truncated_notice(&self, label: &str) -> String {
        if self.truncated > 0 {
            format!("\n[{label} output truncated {} bytes]\n", self.truncated)
        } else {
            String::new()
        }
    }
}

#[derive(Debug, Default)]
struct SharedOutput {
    collected: Vec<u8>,
    truncated: usize,
}

/// Run a command with a deadline, capturing combined stdout/stderr.
///
/// Both pipes are drained on their own threads while the child runs so a
/// chatty child cannot deadlock. At most `output_limit_bytes` are kept; the
/// rest is counted and discarded. When `cancel` fires or the deadline passes
/// the child is killed and reaped.
///
/// Once the child is gone the readers get [`READER_GRACE`] to reach EOF.
/// Readers still blocked after that (a descendant holds the pipe) are
/// detached and the output collected so far is returned.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes = output_limit_bytes))]
pub fn run_command_supervised(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
    cancel: &CancellationToken,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let shared = Arc::new(Mutex::new(SharedOutput::default()));
    let (done_tx, done_rx) = mpsc::channel();
    spawn_reader("stdout", stdout, output_limit_bytes, &shared, done_tx.clone());
    spawn_reader("stderr", stderr, output_limit_bytes, &shared, done_tx);

    let (status, timed_out, cancelled) = wait_supervised(&mut child, timeout, cancel)?;

    let detached = await_readers(&done_rx, 2, READER_GRACE)?;
    if detached > 0 {
        warn!(detached, "output pipes held open by descendant processes, detaching readers");
    }

    let shared = {
        let out = shared
            .lock()
            .map_err(|_| anyhow!("output buffer lock poisoned"))?;
        SharedOutput {
            collected: out.collected.clone(),
            truncated: out.truncated,
        }
    };

    if shared.truncated > 0 {
        warn!(truncated = shared.truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, cancelled, "command finished");
    Ok(CommandOutput {
        status,
        output: shared.collected,
        truncated: shared.truncated,
        timed_out,
        cancelled,
    })
}

/// Wait for `child`, killing it on deadline or cancellation.
///
/// Returns `(status, timed_out, cancelled)`.
fn wait_supervised(
    child: &mut Child,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(ExitStatus, bool, bool)> {
    let deadline = Instant::now() + timeout;
    loop {
        if cancel.is_cancelled() {
            warn!("command cancelled, killing");
            child.kill().context("kill command")?;
            let status = child.wait().context("wait command after kill")?;
            return Ok((status, false, true));
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            child.kill().context("kill command")?;
            let status = child.wait().context("wait command after kill")?;
            return Ok((status, true, false));
        }

        let slice = remaining.min(CANCEL_CHECK_INTERVAL);
        if let Some(status) = child.wait_timeout(slice).context("wait for command")? {
            return Ok((status, false, false));
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    label: &'static str,
    reader: R,
    limit: usize,
    shared: &Arc<Mutex<SharedOutput>>,
    done: Sender<Result<()>>,
) {
    let shared = shared.clone();
    thread::spawn(move || {
        let result = read_into(reader, limit, &shared).with_context(|| format!("read {label}"));
        let _ = done.send(result);
    });
}

/// Wait up to `grace` for `readers` reader threads to finish.
///
/// Returns how many were still running when the grace period ran out.
fn await_readers(done: &Receiver<Result<()>>, readers: usize, grace: Duration) -> Result<usize> {
    let deadline = Instant::now() + grace;
    let mut pending = readers;
    while pending > 0 {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match done.recv_timeout(remaining) {
            Ok(result) => {
                result?;
                pending -= 1;
            }
            Err(RecvTimeoutError::Timeout) => break,
            Err(RecvTimeoutError::Disconnected) => {
                return Err(anyhow!("output reader thread panicked"));
            }
        }
    }
    Ok(pending)
}

/// Append `reader` into the shared buffer, up to `limit` bytes total.
///
/// Works on the reader's internal buffer, one line or one buffer-full at a
/// time, so a long line without a newline never grows memory past `limit`.
fn read_into<R: Read>(reader: R, limit: usize, shared: &Mutex<SharedOutput>) -> Result<()> {
    let mut buf_reader = BufReader::new(reader);
    loop {
        let chunk = buf_reader.fill_buf().context("read output")?;
        if chunk.is_empty() {
            break;
        }
        let n = chunk
            .iter()
            .position(|b| *b == b'\n')
            .map_or(chunk.len(), |idx| idx + 1);

        {
            let mut out = shared
                .lock()
                .map_err(|_| anyhow!("output buffer lock poisoned"))?;
            let keep = n.min(limit.saturating_sub(out.collected.len()));
            out.collected.extend_from_slice(&chunk[..keep]);
            out.truncated += n - keep;
        }
        buf_reader.consume(n);
    }
    Ok(())
}
