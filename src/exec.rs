use std::io::{self, BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{FoldError, Result};

/// Interval at which captured tool output is forwarded to the log.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// An external command as an argument vector; never passed through a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Space-joined rendering for logs only.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }
        command
    }

    fn spawn_error(&self, source: io::Error) -> FoldError {
        FoldError::Spawn {
            program: self.program.clone(),
            source,
        }
    }
}

/// Runs every external tool inside a container image: `<runtime> exec [-B binds] <image> <argv>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerWrap {
    pub runtime: String,
    pub image: String,
    pub binds: Vec<String>,
}

impl ContainerWrap {
    pub fn wrap(&self, spec: CommandSpec) -> CommandSpec {
        let mut wrapped = CommandSpec::new(&self.runtime).arg("exec");
        if !self.binds.is_empty() {
            wrapped = wrapped.arg("-B").arg(self.binds.join(","));
        }
        wrapped.current_dir = spec.current_dir;
        wrapped
            .arg(&self.image)
            .arg(spec.program)
            .args(spec.args)
    }
}

pub fn maybe_wrap(spec: CommandSpec, container: Option<&ContainerWrap>) -> CommandSpec {
    match container {
        Some(container) => container.wrap(spec),
        None => spec,
    }
}

/// Result of one external invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub command: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl Invocation {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn code_or_signal(&self) -> i32 {
        self.exit_code.unwrap_or(-1)
    }

    pub fn error_text(&self) -> String {
        let mut text = format!(
            "Command '{}' returned non-zero exit status {}.",
            self.command,
            self.code_or_signal()
        );
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            text.push(' ');
            text.push_str(stderr);
        }
        text
    }
}

/// Run to completion with both streams captured in memory.
pub fn run_captured(spec: &CommandSpec) -> Result<Invocation> {
    debug!("Running command: {}", spec.display());
    let started = Instant::now();
    let output = spec
        .command()
        .stdin(Stdio::null())
        .output()
        .map_err(|e| spec.spawn_error(e))?;
    Ok(Invocation {
        command: spec.display(),
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        elapsed: started.elapsed(),
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Append-only destination for captured tool output.
pub trait LineSink: Sync {
    fn emit(&self, stream: StreamKind, line: &str);
}

/// Stdout lines at INFO, stderr lines at WARN.
pub struct TracingSink;

impl LineSink for TracingSink {
    fn emit(&self, stream: StreamKind, line: &str) {
        match stream {
            StreamKind::Stdout => info!("{line}"),
            StreamKind::Stderr => warn!("{line}"),
        }
    }
}

/// Read `reader` to end of stream, forwarding lines to `sink` in batches whenever
/// `flush_interval` has passed since the last batch. Whatever is still buffered at end
/// of stream is forwarded before returning. Returns the number of lines read.
pub fn drain_buffered<R: Read>(
    reader: R,
    stream: StreamKind,
    sink: &dyn LineSink,
    flush_interval: Duration,
) -> io::Result<usize> {
    let mut reader = BufReader::new(reader);
    let mut raw = Vec::new();
    let mut pending: Vec<String> = Vec::new();
    let mut last_flush = Instant::now();
    let mut total = 0usize;

    let flush = |pending: &mut Vec<String>| {
        for line in pending.drain(..) {
            sink.emit(stream, &line);
        }
    };

    loop {
        raw.clear();
        if reader.read_until(b'\n', &mut raw)? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&raw);
        pending.push(line.trim_end_matches(&['\n', '\r'][..]).to_string());
        total += 1;

        if last_flush.elapsed() >= flush_interval {
            flush(&mut pending);
            last_flush = Instant::now();
        }
    }
    flush(&mut pending);
    Ok(total)
}

/// Spawn `spec` and drain stdout and stderr on two threads so neither pipe can fill up
/// and stall the child. Both readers are joined before the exit status is collected.
pub fn run_streaming(
    spec: &CommandSpec,
    sink: &dyn LineSink,
    flush_interval: Duration,
) -> Result<Invocation> {
    debug!("Running command: {}", spec.display());
    let started = Instant::now();
    let mut child = spec
        .command()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| spec.spawn_error(e))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("child stdout was not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::other("child stderr was not captured"))?;

    let (out_lines, err_lines) = thread::scope(|scope| {
        let out = scope.spawn(|| drain_buffered(stdout, StreamKind::Stdout, sink, flush_interval));
        let err = scope.spawn(|| drain_buffered(stderr, StreamKind::Stderr, sink, flush_interval));
        (join_reader(out), join_reader(err))
    });

    let status = child.wait()?;
    let out_lines = out_lines?;
    let err_lines = err_lines?;
    debug!("{}: {out_lines} stdout lines, {err_lines} stderr lines", spec.program);

    Ok(Invocation {
        command: spec.display(),
        exit_code: status.code(),
        stdout: String::new(),
        stderr: String::new(),
        elapsed: started.elapsed(),
    })
}

fn join_reader(handle: thread::ScopedJoinHandle<'_, io::Result<usize>>) -> io::Result<usize> {
    handle
        .join()
        .unwrap_or_else(|_| Err(io::Error::other("stream reader thread panicked")))
}
