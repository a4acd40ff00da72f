//! External process execution.
//!
//! Everything kubemirror does to the outside world (kubeadm, apt-get, docker)
//! goes through [`CommandRunner`], so the pipeline can be driven by an
//! in-memory fake in tests.

use crate::error::{MirrorError, Result};
use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout, Command};
use tracing::debug;

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was killed by a signal.
    pub code: Option<i32>,

    /// stdout and stderr interleaved in arrival order.
    pub combined: Vec<u8>,
}

impl CommandOutput {
    /// Successful output with the given combined bytes.
    pub fn ok(combined: impl Into<Vec<u8>>) -> Self {
        Self {
            code: Some(0),
            combined: combined.into(),
        }
    }

    /// Failed output with the given exit code and combined bytes.
    pub fn failed(code: i32, combined: impl Into<Vec<u8>>) -> Self {
        Self {
            code: Some(code),
            combined: combined.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Human readable exit status.
    pub fn status_label(&self) -> String {
        match self.code {
            Some(code) => format!("exit status {code}"),
            None => "terminated by signal".to_string(),
        }
    }

    /// Combined output as lossy UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.combined).into_owned()
    }

    /// Turn a non-zero exit into [`MirrorError::ExternalTool`], keeping the
    /// captured output for diagnostics.
    pub fn into_checked(self, command_line: &str) -> Result<Vec<u8>> {
        if self.success() {
            Ok(self.combined)
        } else {
            Err(MirrorError::external(
                command_line,
                self.status_label(),
                &self.combined,
            ))
        }
    }
}

/// Render `program args...` for logs and error messages.
pub fn command_line(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

/// Process invocation capability.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Resolve `name` on PATH.
    async fn look_path(&self, name: &str) -> Result<PathBuf>;

    /// Run a program to completion. A non-zero exit is reported through
    /// [`CommandOutput::code`], not as an error.
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;

    /// Like [`CommandRunner::run`], feeding `input` to the child's stdin.
    async fn run_with_input(
        &self,
        program: &str,
        args: &[&str],
        input: &[u8],
    ) -> Result<CommandOutput>;
}

/// [`CommandRunner`] backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }

    async fn spawn_combined(
        &self,
        program: &str,
        args: &[&str],
        input: Option<&[u8]>,
    ) -> Result<CommandOutput> {
        let rendered = command_line(program, args);
        debug!(command = %rendered, "spawning");

        let mut child = Command::new(program)
            .args(args)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| MirrorError::ExternalTool {
                command: rendered.clone(),
                status: "spawn failed".to_string(),
                output: e.to_string(),
            })?;

        // stdin is written concurrently with draining stdout and stderr.
        let writer = match (input, child.stdin.take()) {
            (Some(bytes), Some(mut stdin)) => {
                let bytes = bytes.to_vec();
                Some(tokio::spawn(async move {
                    stdin.write_all(&bytes).await?;
                    stdin.shutdown().await
                }))
            }
            _ => None,
        };

        let collected = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => read_combined(stdout, stderr).await,
            _ => Err(io::Error::other("child output was not captured")),
        };
        let combined = match collected {
            Ok(combined) => combined,
            Err(e) => {
                child.kill().await.ok();
                return Err(e.into());
            }
        };

        let status = child.wait().await?;
        debug!(command = %rendered, code = ?status.code(), "finished");

        if let Some(writer) = writer {
            match writer.await {
                Ok(Ok(())) => {}
                // The child exited without draining stdin; its exit status says the rest.
                Ok(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe => {
                    debug!(command = %rendered, "stdin closed early");
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(e) => return Err(MirrorError::TaskFailed(e.to_string())),
            }
        }

        Ok(CommandOutput {
            code: status.code(),
            combined,
        })
    }
}

/// Drain both pipes, interleaving lines in the order they arrive.
async fn read_combined(stdout: ChildStdout, stderr: ChildStderr) -> io::Result<Vec<u8>> {
    let mut out_segments = BufReader::new(stdout).split(b'\n');
    let mut err_segments = BufReader::new(stderr).split(b'\n');
    let mut combined = Vec::new();
    let mut out_done = false;
    let mut err_done = false;

    while !(out_done && err_done) {
        tokio::select! {
            segment = out_segments.next_segment(), if !out_done => match segment? {
                Some(line) => append_line(&mut combined, &line),
                None => out_done = true,
            },
            segment = err_segments.next_segment(), if !err_done => match segment? {
                Some(line) => append_line(&mut combined, &line),
                None => err_done = true,
            },
        }
    }
    Ok(combined)
}

fn append_line(buf: &mut Vec<u8>, line: &[u8]) {
    buf.extend_from_slice(line);
    buf.push(b'\n');
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn look_path(&self, name: &str) -> Result<PathBuf> {
        which::which(name).map_err(|e| MirrorError::ToolNotFound {
            tool: name.to_string(),
            detail: e.to_string(),
        })
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        self.spawn_combined(program, args, None).await
    }

    async fn run_with_input(
        &self,
        program: &str,
        args: &[&str],
        input: &[u8],
    ) -> Result<CommandOutput> {
        self.spawn_combined(program, args, Some(input)).await
    }
}
