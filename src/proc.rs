//! Subprocess execution with bounded capture and hard timeouts.
//!
//! stdout and stderr are drained on two independent threads so a chatty
//! child can never deadlock against a full pipe; both drains are joined
//! before the command counts as finished. Capture is hard-capped per
//! stream, which bounds harness memory regardless of child output volume.
use crate::classify::{classify, ClassifyOptions, Outcome};
use crate::report::CommandRecord;
use crate::util::truncate_string;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Hard cap on the recorded copy of each stream.
pub const CAPTURE_CAP_BYTES: usize = 200 * 1024;

/// Diagnostics excerpt embedded in every command record.
pub const STDERR_EXCERPT_CHARS: usize = 2000;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Everything needed to spawn and judge one command.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub bin: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env_overrides: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
    pub expect_failure: bool,
    pub expect_timeout: bool,
    /// Stream captured chunks live to the harness's own stdout/stderr.
    pub mirror: bool,
}

impl CommandSpec {
    pub fn new(bin: PathBuf, args: Vec<String>, cwd: PathBuf) -> Self {
        Self {
            bin,
            args,
            cwd,
            env_overrides: BTreeMap::new(),
            timeout: None,
            expect_failure: false,
            expect_timeout: false,
            mirror: false,
        }
    }

    pub fn command_line(&self) -> String {
        let mut parts = vec![self.bin.display().to_string()];
        parts.extend(self.args.iter().cloned());
        shell_words::join(parts)
    }
}

/// Raw result of one invocation, before classification context is applied.
#[derive(Debug)]
pub struct RunResult {
    /// -1 sentinel for timeout, signal death, or spawn failure.
    pub exit_code: i32,
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

#[derive(Clone, Copy)]
enum MirrorTarget {
    Stdout,
    Stderr,
}

fn drain_stream<R: Read + Send + 'static>(
    mut reader: R,
    mirror: Option<MirrorTarget>,
) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut captured = Vec::new();
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = &buf[..n];
                    // Mirroring streams the full output even past the cap.
                    match mirror {
                        Some(MirrorTarget::Stdout) => {
                            let _ = std::io::stdout().write_all(chunk);
                        }
                        Some(MirrorTarget::Stderr) => {
                            let _ = std::io::stderr().write_all(chunk);
                        }
                        None => {}
                    }
                    if captured.len() < CAPTURE_CAP_BYTES {
                        let room = CAPTURE_CAP_BYTES - captured.len();
                        captured.extend_from_slice(&chunk[..n.min(room)]);
                    }
                }
                Err(_) => break,
            }
        }
        captured
    })
}

#[cfg(unix)]
fn spawn_in_own_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn spawn_in_own_group(_cmd: &mut Command) {}

/// Kill the child's whole process group on unix so direct helpers die with
/// it. Descendants that moved to their own group or session (daemonizing
/// dev servers) are not reaped; that limitation is accepted, not hidden.
#[cfg(unix)]
fn kill_process_group(child: &mut Child) {
    let pgid = child.id() as i32;
    // SAFETY: plain signal send to a pgid we created; no memory involved.
    unsafe {
        let _ = libc::kill(-pgid, libc::SIGKILL);
    }
    let _ = child.kill();
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) {
    let _ = child.kill();
}

/// Spawn, drain, and wait for one command, then classify it.
///
/// Spawn failures are absorbed into the result (exit -1, OS error text on
/// stderr) and classified like any other runtime failure; only the caller's
/// configuration layer treats unresolvable binaries as fatal.
pub fn run(spec: &CommandSpec) -> (RunResult, CommandRecord) {
    let started = Instant::now();
    let mut cmd = Command::new(&spec.bin);
    cmd.args(&spec.args)
        .current_dir(&spec.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in &spec.env_overrides {
        cmd.env(key, value);
    }
    spawn_in_own_group(&mut cmd);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            let result = RunResult {
                exit_code: -1,
                timed_out: false,
                stdout: String::new(),
                stderr: format!("spawn {} failed: {err}", spec.bin.display()),
                duration: started.elapsed(),
            };
            let record = build_record(spec, &result);
            return (result, record);
        }
    };

    let stdout_handle = child
        .stdout
        .take()
        .map(|out| drain_stream(out, spec.mirror.then_some(MirrorTarget::Stdout)));
    let stderr_handle = child
        .stderr
        .take()
        .map(|err| drain_stream(err, spec.mirror.then_some(MirrorTarget::Stderr)));

    let mut timed_out = false;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) => {}
            Err(_) => break None,
        }
        if let Some(timeout) = spec.timeout {
            if started.elapsed() >= timeout {
                timed_out = true;
                kill_process_group(&mut child);
                break child.wait().ok();
            }
        }
        thread::sleep(POLL_INTERVAL);
    };

    let stdout_bytes = stdout_handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default();
    let stderr_bytes = stderr_handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default();
    // Duration only counts once both drains have been joined.
    let duration = started.elapsed();

    let exit_code = if timed_out {
        -1
    } else {
        status.and_then(|s| s.code()).unwrap_or(-1)
    };

    let result = RunResult {
        exit_code,
        timed_out,
        stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
        stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
        duration,
    };
    let record = build_record(spec, &result);
    (result, record)
}

fn build_record(spec: &CommandSpec, result: &RunResult) -> CommandRecord {
    let outcome: Outcome = classify(
        result.exit_code,
        result.timed_out,
        &result.stderr,
        &result.stdout,
        ClassifyOptions {
            expect_failure: spec.expect_failure,
            expect_timeout: spec.expect_timeout,
        },
    );
    CommandRecord {
        bin: spec.bin.display().to_string(),
        args: spec.args.clone(),
        cwd: spec.cwd.display().to_string(),
        env_overrides: spec.env_overrides.clone(),
        timeout_secs: spec.timeout.map(|t| t.as_secs()),
        exit_code: result.exit_code,
        timed_out: result.timed_out,
        duration_ms: result.duration.as_millis() as u64,
        outcome,
        expect_failure: spec.expect_failure,
        output_check_failed: None,
        stderr_excerpt: truncate_string(&result.stderr, STDERR_EXCERPT_CHARS),
    }
}
