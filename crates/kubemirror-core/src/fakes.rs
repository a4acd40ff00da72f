//! In-memory fakes for the process and container runtime seams (testing only)
//!
//! [`ScriptedRunner`] answers [`CommandRunner`] calls from a table of canned
//! outputs; [`RecordingClient`] implements [`ImageClient`] and records every
//! operation it is asked to perform.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::client::{Credentials, ImageClient};
use crate::error::{MirrorError, Result};
use crate::exec::{command_line, CommandOutput, CommandRunner};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// ScriptedRunner
// ---------------------------------------------------------------------------

/// One invocation seen by [`ScriptedRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// Rendered command line, e.g. `kubeadm version -o json`.
    pub command: String,
    /// Bytes written to stdin, if any.
    pub input: Option<Vec<u8>>,
}

/// Command runner answering from a table keyed by rendered command line.
///
/// Unknown commands succeed with empty output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    responses: HashMap<String, CommandOutput>,
    missing: HashSet<String>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `command` with `output`.
    pub fn respond(mut self, command: &str, output: CommandOutput) -> Self {
        self.responses.insert(command.to_string(), output);
        self
    }

    /// Make `tool` unresolvable on PATH.
    pub fn missing(mut self, tool: &str) -> Self {
        self.missing.insert(tool.to_string());
        self
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    /// Whether `command` was run.
    pub fn ran(&self, command: &str) -> bool {
        lock(&self.calls).iter().any(|c| c.command == command)
    }

    fn answer(&self, program: &str, args: &[&str], input: Option<&[u8]>) -> CommandOutput {
        let command = command_line(program, args);
        let output = self
            .responses
            .get(&command)
            .cloned()
            .unwrap_or_else(|| CommandOutput::ok(Vec::new()));
        lock(&self.calls).push(RecordedCall {
            command,
            input: input.map(<[u8]>::to_vec),
        });
        output
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn look_path(&self, name: &str) -> Result<PathBuf> {
        if self.missing.contains(name) {
            Err(MirrorError::ToolNotFound {
                tool: name.to_string(),
                detail: "cannot find binary path".to_string(),
            })
        } else {
            Ok(PathBuf::from("/usr/bin").join(name))
        }
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        Ok(self.answer(program, args, None))
    }

    async fn run_with_input(
        &self,
        program: &str,
        args: &[&str],
        input: &[u8],
    ) -> Result<CommandOutput> {
        Ok(self.answer(program, args, Some(input)))
    }
}

// ---------------------------------------------------------------------------
// RecordingClient
// ---------------------------------------------------------------------------

/// Image client that records operations and fails on demand.
#[derive(Debug, Default)]
pub struct RecordingClient {
    reject_login: bool,
    unreachable: bool,
    failing_pulls: HashSet<String>,
    failing_pushes: HashSet<String>,
    delay: Option<Duration>,
    ops: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every login.
    pub fn reject_login(mut self) -> Self {
        self.reject_login = true;
        self
    }

    /// Fail every ping.
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// Fail pulls of `image`.
    pub fn fail_pull(mut self, image: &str) -> Self {
        self.failing_pulls.insert(image.to_string());
        self
    }

    /// Fail pushes of `target`.
    pub fn fail_push(mut self, target: &str) -> Self {
        self.failing_pushes.insert(target.to_string());
        self
    }

    /// Hold every pull for `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Operations in the order they happened, e.g. `pull docker.io/nginx:latest`.
    pub fn ops(&self) -> Vec<String> {
        lock(&self.ops).clone()
    }

    /// Highest number of pulls observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, op: String) {
        lock(&self.ops).push(op);
    }
}

#[async_trait]
impl ImageClient for RecordingClient {
    async fn login(&self, registry: &str, credentials: &Credentials) -> Result<()> {
        self.record(format!("login {} {}", registry, credentials.user));
        if self.reject_login {
            return Err(MirrorError::Authentication {
                registry: registry.to_string(),
                output: "unauthorized".to_string(),
            });
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.record("ping".to_string());
        if self.unreachable {
            return Err(MirrorError::Connectivity(
                "Cannot connect to the Docker daemon".to_string(),
            ));
        }
        Ok(())
    }

    async fn pull(&self, image: &str) -> Result<String> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.record(format!("pull {image}"));
        if self.failing_pulls.contains(image) {
            return Err(MirrorError::external(
                &format!("docker pull {image}"),
                "exit status 1",
                b"manifest unknown",
            ));
        }
        Ok(format!("{image}: Pull complete\n"))
    }

    async fn tag(&self, source: &str, target: &str) -> Result<()> {
        self.record(format!("tag {source} {target}"));
        Ok(())
    }

    async fn push(&self, target: &str) -> Result<()> {
        self.record(format!("push {target}"));
        if self.failing_pushes.contains(target) {
            return Err(MirrorError::external(
                &format!("docker push {target}"),
                "exit status 1",
                b"denied: requested access to the resource is denied",
            ));
        }
        Ok(())
    }
}
