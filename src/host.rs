use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::USER_AGENT;
use std::env;
use std::ffi::OsString;
use std::fmt;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;

use crate::error::ProvisionError;
use crate::layout::Layout;

const DEFAULT_USER_AGENT: &str = "aisec/0.1";

/// An external program invocation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<Vec<u8>>,
    /// Stdout goes to the terminal instead of being captured.
    pub passthrough: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
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

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: Vec<u8>) -> Self {
        self.stdin = Some(input);
        self
    }

    pub fn passthrough(mut self) -> Self {
        self.passthrough = true;
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{arg}'")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Result of a finished program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub status: String,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Turn an unsuccessful exit into a [`ProvisionError::CommandFailed`].
    pub fn ensure_success(self, spec: &CommandSpec) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(ProvisionError::CommandFailed {
                command: spec.to_string(),
                status: self.status,
                stderr: self.stderr,
            }
            .into())
        }
    }
}

/// Runs external programs. `Err` means the program could not be started.
pub trait CommandRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Fetches remote content.
pub trait Fetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Runs programs on the local machine, blocking until they exit.
#[derive(Debug, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        tracing::debug!(command = %spec, "running");

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k, v)))
            .stdout(if spec.passthrough {
                Stdio::inherit()
            } else {
                Stdio::piped()
            })
            .stderr(Stdio::piped())
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to start '{}'", spec.program))?;

        // Written from a separate thread: the child may fill its stdout pipe
        // before it drains stdin.
        let writer = match &spec.stdin {
            Some(input) => {
                let mut pipe = child
                    .stdin
                    .take()
                    .context("Child process has no stdin pipe")?;
                let input = input.clone();
                Some(thread::spawn(move || pipe.write_all(&input)))
            }
            None => None,
        };

        let output = child
            .wait_with_output()
            .with_context(|| format!("Failed to wait for '{}'", spec.program))?;

        if let Some(writer) = writer {
            match writer.join() {
                Ok(Ok(())) => {}
                // The child may exit without draining stdin; its status says what happened.
                Ok(Err(err)) => tracing::debug!(error = %err, "stdin closed early"),
                Err(_) => anyhow::bail!("stdin writer for '{}' panicked", spec.program),
            }
        }

        let result = CommandOutput {
            success: output.status.success(),
            status: output.status.to_string(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        tracing::debug!(command = %spec, status = %result.status, "finished");
        Ok(result)
    }
}

/// Blocking HTTP fetcher.
pub struct HttpFetcher {
    http: Client,
    user_agent: String,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        let user_agent = env::var("AISEC_USER_AGENT")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        Ok(Self { http, user_agent })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .with_context(|| format!("Failed to request {url}"))?;

        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!("{url} returned {status}");
        }

        let bytes = response
            .bytes()
            .with_context(|| format!("Failed to read response body from {url}"))?;
        Ok(bytes.to_vec())
    }
}

/// Everything an action may touch: the filesystem layout, programs and the
/// network.
pub struct Host {
    pub layout: Layout,
    runner: Box<dyn CommandRunner>,
    fetcher: Box<dyn Fetcher>,
    search_path: Option<OsString>,
}

impl Host {
    pub fn new(
        layout: Layout,
        runner: Box<dyn CommandRunner>,
        fetcher: Box<dyn Fetcher>,
    ) -> Self {
        Self {
            layout,
            runner,
            fetcher,
            search_path: env::var_os("PATH"),
        }
    }

    /// Host backed by real programs and HTTP.
    pub fn system(layout: Layout) -> Result<Self> {
        Ok(Self::new(
            layout,
            Box::new(SystemRunner),
            Box::new(HttpFetcher::new()?),
        ))
    }

    /// Override the directories searched by [`Host::which`].
    pub fn with_search_path(mut self, search_path: Option<OsString>) -> Self {
        self.search_path = search_path;
        self
    }

    pub fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.runner.run(spec)
    }

    /// Run a command that changes the host and fail on a non-zero exit.
    /// Its stdout reaches the terminal; stderr is kept for the error.
    pub fn run_checked(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let spec = spec.clone().passthrough();
        self.run(&spec)?.ensure_success(&spec)
    }

    /// Whether the program ran and exited successfully. Failing to start
    /// counts as `false`.
    pub fn succeeds(&self, spec: &CommandSpec) -> bool {
        match self.run(spec) {
            Ok(output) => output.success,
            Err(err) => {
                tracing::debug!(command = %spec, error = %err, "check could not run");
                false
            }
        }
    }

    pub fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.fetcher.fetch(url)
    }

    /// Locate an executable on the search path.
    pub fn which(&self, name: &str) -> Option<PathBuf> {
        let search_path = self.search_path.as_ref()?;
        env::split_paths(search_path)
            .map(|dir| dir.join(name))
            .find(|candidate| {
                candidate
                    .metadata()
                    .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
                    .unwrap_or(false)
            })
    }
}

/// Effective identity of the running process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Privilege {
    Root,
    User(String),
}

impl Privilege {
    pub fn current() -> Self {
        if nix::unistd::geteuid().is_root() {
            Privilege::Root
        } else {
            Privilege::User(whoami::username())
        }
    }

    pub fn ensure_root(&self) -> Result<(), ProvisionError> {
        match self {
            Privilege::Root => Ok(()),
            Privilege::User(user) => Err(ProvisionError::NotRoot { user: user.clone() }),
        }
    }
}
