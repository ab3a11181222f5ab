//! Launching the provisioning tool as a subprocess.
//!
//! A [`Runner`] turns a [`Launch`] into a [`ProcessHandle`]. The handle
//! yields the child's output line by line, tagged with the stream it came
//! from, and resolves to success only when the child exits with status 0.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;

use crate::error::VagabondError;

/// Which pipe a line of output was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    /// stdout
    Normal,
    /// stderr
    Diagnostic,
}

/// One line of subprocess output, without its line terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub stream: OutputStream,
    pub line: String,
}

impl OutputChunk {
    pub fn normal(line: impl Into<String>) -> Self {
        Self {
            stream: OutputStream::Normal,
            line: line.into(),
        }
    }

    pub fn diagnostic(line: impl Into<String>) -> Self {
        Self {
            stream: OutputStream::Diagnostic,
            line: line.into(),
        }
    }
}

/// A command line to run, with optional working directory and environment
/// overrides layered over the parent's environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launch {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl Launch {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Short form used in logs and error messages. Script bodies passed to
    /// `bash -c` are elided.
    pub fn display(&self) -> String {
        let mut out = self.program.clone();
        for arg in &self.args {
            out.push(' ');
            if arg.contains('\n') {
                out.push_str("<script>");
            } else {
                out.push_str(arg);
            }
        }
        out
    }
}

impl fmt::Display for Launch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

/// Exit code of a finished child; `None` when it was killed by a signal.
pub type ExitCode = Option<i32>;

type Completion = Pin<Box<dyn Future<Output = std::io::Result<ExitCode>> + Send>>;

/// A running subprocess: a stream of output lines and a completion future.
///
/// Lines from one process arrive in the order the process wrote them
/// (per stream; stdout and stderr are read concurrently).
pub struct ProcessHandle {
    command: String,
    output: mpsc::UnboundedReceiver<OutputChunk>,
    completion: Completion,
}

impl ProcessHandle {
    pub fn new(
        command: String,
        output: mpsc::UnboundedReceiver<OutputChunk>,
        completion: impl Future<Output = std::io::Result<ExitCode>> + Send + 'static,
    ) -> Self {
        Self {
            command,
            output,
            completion: Box::pin(completion),
        }
    }

    /// The command line this handle was launched from.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Next line of output, or `None` once both pipes are closed.
    pub async fn next_chunk(&mut self) -> Option<OutputChunk> {
        self.output.recv().await
    }

    /// Wait for the process to exit. Any status other than 0 is a
    /// [`VagabondError::ProcessFailed`], whatever its value.
    pub async fn wait(self) -> Result<(), VagabondError> {
        let code = self.completion.await.map_err(|e| VagabondError::Io {
            context: format!("waiting for `{}`", self.command),
            source: e,
        })?;

        match code {
            Some(0) => Ok(()),
            code => Err(VagabondError::ProcessFailed {
                command: self.command,
                code,
            }),
        }
    }

    /// Drain all output from both streams into a single string, then wait for
    /// exit.
    pub async fn capture(mut self) -> Result<String, VagabondError> {
        let mut combined = String::new();
        while let Some(chunk) = self.next_chunk().await {
            combined.push_str(&chunk.line);
            combined.push('\n');
        }
        self.wait().await?;
        Ok(combined)
    }
}

/// Starts subprocesses. Implemented by [`ToolRunner`] for real processes.
pub trait Runner: Send + Sync {
    fn spawn(&self, launch: &Launch) -> Result<ProcessHandle, VagabondError>;
}

/// Spawns real child processes on the tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolRunner;

impl Runner for ToolRunner {
    fn spawn(&self, launch: &Launch) -> Result<ProcessHandle, VagabondError> {
        let command = launch.display();

        let mut cmd = tokio::process::Command::new(&launch.program);
        cmd.args(&launch.args)
            .envs(&launch.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &launch.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| VagabondError::Spawn {
            command: command.clone(),
            source: e,
        })?;
        tracing::debug!(command = %command, pid = ?child.id(), "spawned");

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(out) = child.stdout.take() {
            tokio::spawn(forward_lines(out, OutputStream::Normal, tx.clone()));
        }
        if let Some(err) = child.stderr.take() {
            tokio::spawn(forward_lines(err, OutputStream::Diagnostic, tx));
        }

        Ok(ProcessHandle::new(command, rx, async move {
            child.wait().await.map(|status| status.code())
        }))
    }
}

/// Read `pipe` until EOF, sending each line. Invalid UTF-8 is replaced
/// rather than ending the stream.
async fn forward_lines<R>(pipe: R, stream: OutputStream, tx: mpsc::UnboundedSender<OutputChunk>)
where
    R: AsyncRead + Unpin,
{
    let mut segments = BufReader::new(pipe).split(b'\n');
    while let Ok(Some(segment)) = segments.next_segment().await {
        let line = String::from_utf8_lossy(&segment)
            .trim_end_matches('\r')
            .to_string();
        if tx.send(OutputChunk { stream, line }).is_err() {
            break;
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_elides_script_bodies() {
        let launch = Launch::new("bash").args(["-c", "set -e\nvagrant up\n", "provision"]);
        assert_eq!(launch.display(), "bash -c <script> provision");
    }

    #[test]
    fn env_overrides_win_on_conflict() {
        let launch = Launch::new("env").env("VM_IP", "a").env("VM_IP", "b");
        assert_eq!(launch.env.get("VM_IP").map(String::as_str), Some("b"));
    }

    #[tokio::test]
    async fn zero_exit_resolves() {
        let handle = ToolRunner.spawn(&Launch::new("true")).unwrap();
        handle.wait().await.unwrap();
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_process_failure() {
        for script in ["exit 1", "exit 7"] {
            let handle = ToolRunner
                .spawn(&Launch::new("sh").args(["-c", script]))
                .unwrap();
            let err = handle.wait().await.unwrap_err();
            assert!(matches!(err, VagabondError::ProcessFailed { .. }));
            assert!(!err.is_fatal());
        }
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let err = match ToolRunner.spawn(&Launch::new("vagabond-definitely-missing-tool")) {
            Err(e) => e,
            Ok(_) => panic!("spawn should fail"),
        };
        assert!(matches!(err, VagabondError::Spawn { .. }));
    }

    #[tokio::test]
    async fn output_is_tagged_by_stream() {
        let mut handle = ToolRunner
            .spawn(&Launch::new("sh").args(["-c", "echo out; echo err 1>&2"]))
            .unwrap();

        let mut chunks = Vec::new();
        while let Some(chunk) = handle.next_chunk().await {
            chunks.push(chunk);
        }
        handle.wait().await.unwrap();

        assert!(chunks.contains(&OutputChunk::normal("out")));
        assert!(chunks.contains(&OutputChunk::diagnostic("err")));
    }

    #[tokio::test]
    async fn working_dir_and_env_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let launch = Launch::new("sh")
            .args(["-c", "pwd; echo \"$VM_BOX\"; test -n \"$PATH\""])
            .working_dir(dir.path())
            .env("VM_BOX", "trusty64");

        let output = ToolRunner.spawn(&launch).unwrap().capture().await.unwrap();
        let lines: Vec<&str> = output.lines().collect();
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(
            std::path::Path::new(lines[0]).canonicalize().unwrap(),
            expected
        );
        assert_eq!(lines[1], "trusty64");
    }

    #[tokio::test]
    async fn lines_from_one_stream_keep_their_order() {
        let handle = ToolRunner
            .spawn(&Launch::new("sh").args(["-c", "for i in 1 2 3 4 5; do echo $i; done"]))
            .unwrap();
        let output = handle.capture().await.unwrap();
        assert_eq!(output, "1\n2\n3\n4\n5\n");
    }
}
