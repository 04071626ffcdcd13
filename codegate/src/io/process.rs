//! Child processes with timeouts and bounded output.
//!
//! Search tools, the test command, `git apply` and the suggestion command all
//! run through [`run_command_with_timeout`], so a hung subprocess costs at
//! most its timeout and never blocks the round loop indefinitely.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// How long output readers may keep running once the child has exited.
pub const READER_GRACE: Duration = Duration::from_secs(2);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Exited on its own with status zero.
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Error raised when the program itself could not be started.
#[derive(Debug)]
pub struct SpawnError {
    pub program: String,
    pub source: std::io::Error,
}

impl std::fmt::Display for SpawnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "spawn {}: {}", self.program, self.source)
    }
}

impl std::error::Error for SpawnError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// True when `err` came from a program that is not installed.
pub fn is_program_missing(err: &anyhow::Error) -> bool {
    err.downcast_ref::<SpawnError>()
        .is_some_and(|spawn| spawn.source.kind() == std::io::ErrorKind::NotFound)
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Stdin is fed and output is drained on helper threads while the child runs.
/// `output_limit_bytes` bounds how much of each stream is kept in memory; the
/// rest is read and discarded. On timeout the child's whole process group is
/// killed and the output collected so far is returned with `timed_out` set.
/// Descendants that keep the output pipes open after the child exits are
/// killed too, so the call never outlives `timeout` by more than two
/// [`READER_GRACE`] periods.
#[instrument(skip_all, fields(program = ?cmd.get_program(), timeout_secs = timeout.as_secs()))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let program = cmd.get_program().to_string_lossy().into_owned();
    debug!("spawning child process");
    let mut child = cmd.spawn().map_err(|source| SpawnError {
        program: program.clone(),
        source,
    })?;

    let stdin_handle = match stdin {
        Some(input) => Some(feed_stdin(&mut child, input.to_vec())?),
        None => None,
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_reader = StreamReader::spawn(stdout, output_limit_bytes);
    let stderr_reader = StreamReader::spawn(stderr, output_limit_bytes);

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(program = %program, timeout_secs = timeout.as_secs(), "command timed out, killing");
            timed_out = true;
            kill_process_group(&child);
            if let Err(err) = child.kill() {
                debug!(err = %err, "child already gone");
            }
            child.wait().context("wait command after kill")?
        }
    };

    let deadline = Instant::now() + READER_GRACE;
    if !(stdout_reader.wait_until(deadline) && stderr_reader.wait_until(deadline)) {
        warn!(program = %program, "output pipes still open after exit, killing process group");
        kill_process_group(&child);
        let deadline = Instant::now() + READER_GRACE;
        stdout_reader.wait_until(deadline);
        stderr_reader.wait_until(deadline);
    }

    match stdin_handle {
        Some(handle) if handle.is_finished() => {
            if let Err(err) = join_thread(handle) {
                // A child that exits without reading its input closes the pipe early.
                debug!(err = %err, "stdin writer stopped early");
            }
        }
        Some(_) => debug!("abandoning blocked stdin writer"),
        None => {}
    }
    let (stdout, stdout_truncated) = stdout_reader.finish().context("collect stdout")?;
    let (stderr, stderr_truncated) = stderr_reader.finish().context("collect stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

/// Kill every process in the child's group. The child leads its own group.
#[cfg(unix)]
fn kill_process_group(child: &Child) {
    let group = format!("-{}", child.id());
    let status = Command::new("kill")
        .args(["-KILL", "--", &group])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(err) = status {
        warn!(err = %err, "kill process group");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: usize,
    error: Option<String>,
}

/// Drains one output pipe on a helper thread into a shared buffer, so the
/// bytes read so far survive a reader that never sees EOF.
struct StreamReader {
    captured: Arc<Mutex<Captured>>,
    done: mpsc::Receiver<()>,
}

impl StreamReader {
    fn spawn<R: Read + Send + 'static>(reader: R, limit: usize) -> Self {
        let captured = Arc::new(Mutex::new(Captured::default()));
        let (tx, done) = mpsc::channel();
        let sink = Arc::clone(&captured);
        thread::spawn(move || {
            if let Err(err) = read_stream_limited(reader, limit, &sink)
                && let Ok(mut captured) = sink.lock()
            {
                captured.error = Some(format!("{err:#}"));
            }
            // The receiver is gone once the caller stopped waiting.
            let _ = tx.send(());
        });
        Self { captured, done }
    }

    /// True once the stream reached EOF (or failed) before `deadline`.
    fn wait_until(&self, deadline: Instant) -> bool {
        let wait = deadline.saturating_duration_since(Instant::now());
        match self.done.recv_timeout(wait) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => true,
            Err(mpsc::RecvTimeoutError::Timeout) => false,
        }
    }

    fn finish(self) -> Result<(Vec<u8>, usize)> {
        let mut captured = self
            .captured
            .lock()
            .map_err(|_| anyhow!("output reader panicked"))?;
        if let Some(err) = captured.error.take() {
            return Err(anyhow!(err));
        }
        Ok((std::mem::take(&mut captured.bytes), captured.truncated))
    }
}

fn feed_stdin(child: &mut Child, input: Vec<u8>) -> Result<thread::JoinHandle<Result<()>>> {
    let mut child_stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("stdin was not piped"))?;
    Ok(thread::spawn(move || {
        child_stdin.write_all(&input).context("write stdin")?;
        Ok(())
    }))
}

fn join_thread<T>(handle: thread::JoinHandle<Result<T>>) -> Result<T> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("process helper thread panicked")),
    }
}

fn read_stream_limited<R: Read>(
    mut reader: R,
    limit: usize,
    sink: &Mutex<Captured>,
) -> Result<()> {
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let mut captured = sink
            .lock()
            .map_err(|_| anyhow!("output buffer poisoned"))?;
        let remaining = limit.saturating_sub(captured.bytes.len());
        let keep = n.min(remaining);
        captured.bytes.extend_from_slice(&chunk[..keep]);
        captured.truncated += n - keep;
    }

    Ok(())
}

/// Last `max_bytes` of `text`, cut on a char boundary.
pub fn tail(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// First `max_bytes` of `text`, cut on a char boundary.
pub fn head(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_and_feeds_stdin() {
        let mut cmd = Command::new("cat");
        cmd.arg("-");
        let out = run_command_with_timeout(cmd, Some(b"hello"), Duration::from_secs(10), 1024)
            .expect("run cat");
        assert!(out.success());
        assert_eq!(out.stdout_lossy(), "hello");
    }

    #[test]
    fn bounds_captured_output() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "printf 'abcdefghij'"]);
        let out = run_command_with_timeout(cmd, None, Duration::from_secs(10), 4).expect("run sh");
        assert_eq!(out.stdout, b"abcd");
        assert_eq!(out.stdout_truncated, 6);
    }

    #[test]
    fn kills_on_timeout() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let out = run_command_with_timeout(cmd, None, Duration::from_millis(100), 1024)
            .expect("run sleep");
        assert!(out.timed_out);
        assert!(!out.success());
    }

    #[test]
    fn timeout_kills_forked_descendants() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 6; echo done"]);
        let started = Instant::now();
        let out = run_command_with_timeout(cmd, None, Duration::from_millis(500), 1024)
            .expect("run sh");
        assert!(out.timed_out);
        assert!(started.elapsed() < Duration::from_secs(3), "took {:?}", started.elapsed());
        assert!(!out.stdout_lossy().contains("done"));
    }

    #[test]
    fn background_descendant_holding_pipes_does_not_block() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 8 & echo started"]);
        let started = Instant::now();
        let out = run_command_with_timeout(cmd, None, Duration::from_secs(10), 1024)
            .expect("run sh");
        assert!(!out.timed_out);
        assert!(out.success());
        assert_eq!(out.stdout_lossy(), "started\n");
        assert!(started.elapsed() < Duration::from_secs(6), "took {:?}", started.elapsed());
    }

    #[test]
    fn missing_program_is_detected() {
        let cmd = Command::new("codegate-definitely-not-installed");
        let err = run_command_with_timeout(cmd, None, Duration::from_secs(1), 1024).unwrap_err();
        assert!(is_program_missing(&err));
    }

    #[test]
    fn head_and_tail_respect_char_boundaries() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(head("abcdef", 3), "abc");
        assert_eq!(tail("héllo", 4), "llo");
        assert_eq!(head("héllo", 2), "h");
        assert_eq!(head("ab", 10), "ab");
    }
}
