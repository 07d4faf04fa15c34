//! Code-execution sandbox.
//!
//! Every call runs in a brand-new interpreter process with a cleared
//! environment and its own scratch directory, so nothing one invocation
//! defines (variables, imports, files) is visible to the next.

use crate::config::SandboxConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// Reads a program from stdin, runs it, and echoes the repr of a trailing
/// expression the way an interactive interpreter would.
pub const PYTHON_REPL_SHIM: &str = r#"
import ast, sys
src = sys.stdin.read()
tree = ast.parse(src, "<sandbox>", "exec")
last = None
if tree.body and isinstance(tree.body[-1], ast.Expr):
    last = ast.Expression(tree.body.pop().value)
ns = {"__name__": "__main__"}
exec(compile(tree, "<sandbox>", "exec"), ns)
if last is not None:
    value = eval(compile(last, "<sandbox>", "eval"), ns)
    if value is not None:
        print(repr(value))
"#;

/// Outcome of one sandboxed execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxOutput {
    pub stdout: String,
    pub error: Option<String>,
}

/// Executes untrusted code with no state shared between calls.
#[async_trait]
pub trait CodeSandbox: Send + Sync {
    async fn execute(&self, code: &str) -> Result<SandboxOutput>;
}

/// Sandbox backed by a fresh interpreter subprocess per call.
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    max_output_bytes: usize,
    env_passthrough: Vec<String>,
    scratch_root: PathBuf,
}

impl ProcessSandbox {
    /// Run `program args...` with the code on stdin.
    pub fn new(program: &str, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            args,
            timeout,
            max_output_bytes: 10_000,
            env_passthrough: vec!["PATH".into(), "LANG".into()],
            scratch_root: std::env::temp_dir(),
        }
    }

    /// Python in isolated mode with the REPL shim.
    pub fn python(interpreter: &str, timeout: Duration) -> Self {
        Self::new(
            interpreter,
            vec!["-I".into(), "-c".into(), PYTHON_REPL_SHIM.into()],
            timeout,
        )
    }

    pub fn from_config(config: &SandboxConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs);
        let mut sandbox = if config.python_shim {
            Self::python(&config.interpreter, timeout)
        } else {
            Self::new(&config.interpreter, config.args.clone(), timeout)
        };
        sandbox.max_output_bytes = config.max_output_bytes;
        sandbox.env_passthrough = config.env_passthrough.clone();
        if !config.scratch_dir.is_empty() {
            sandbox.scratch_root = PathBuf::from(shellexpand::tilde(&config.scratch_dir).into_owned());
        }
        sandbox
    }

    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }

    async fn run_in(&self, dir: &Path, code: &str) -> Result<SandboxOutput> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(dir)
            .env_clear()
            .env("HOME", dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for key in &self.env_passthrough {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to start interpreter '{}'", self.program))?;

        // One byte past the cap is enough to know the output was cut.
        let cap = self.max_output_bytes.saturating_add(1);
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let run = async move {
            let feed = async move {
                if let Some(mut stdin) = stdin {
                    if let Err(e) = stdin.write_all(code.as_bytes()).await {
                        // The program may exit without reading its input.
                        if e.kind() != std::io::ErrorKind::BrokenPipe {
                            return Err(e);
                        }
                    }
                }
                Ok(())
            };
            let (fed, out, err) = tokio::join!(feed, read_capped(stdout, cap), read_capped(stderr, cap));
            fed?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, out?, err?))
        };

        let (status, out, err) = match tokio::time::timeout(self.timeout, run).await {
            Ok(result) => result.context("Interpreter process failed")?,
            Err(_) => {
                warn!("Sandbox execution timed out after {:?}", self.timeout);
                return Ok(SandboxOutput {
                    stdout: String::new(),
                    error: Some(format!(
                        "Execution timed out after {} ms",
                        self.timeout.as_millis()
                    )),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&out).into_owned();
        let stderr = String::from_utf8_lossy(&err).trim().to_string();

        let error = if status.success() {
            None
        } else if stderr.is_empty() {
            Some(format!("exit code: {}", status.code().unwrap_or(-1)))
        } else {
            Some(truncate(&stderr, self.max_output_bytes))
        };

        let mut text = stdout;
        if error.is_none() && !stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str("[stderr] ");
            text.push_str(&stderr);
        }

        Ok(SandboxOutput {
            stdout: truncate(&text, self.max_output_bytes),
            error,
        })
    }
}

#[async_trait]
impl CodeSandbox for ProcessSandbox {
    async fn execute(&self, code: &str) -> Result<SandboxOutput> {
        let scratch = self
            .scratch_root
            .join(format!("taskrouter-{}", ulid::Ulid::new().to_string().to_lowercase()));
        tokio::fs::create_dir_all(&scratch)
            .await
            .with_context(|| format!("Failed to create scratch dir {}", scratch.display()))?;

        debug!("Sandbox exec in {} ({} bytes)", scratch.display(), code.len());
        let result = self.run_in(&scratch, code).await;

        if let Err(e) = tokio::fs::remove_dir_all(&scratch).await {
            warn!("Failed to remove scratch dir {}: {}", scratch.display(), e);
        }
        result
    }
}

/// Read a pipe to the end, keeping at most `cap` bytes and dropping the rest.
async fn read_capped<R>(pipe: Option<R>, cap: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut kept = Vec::new();
    let Some(mut pipe) = pipe else {
        return Ok(kept);
    };
    let mut buf = [0u8; 8192];
    loop {
        let n = pipe.read(&mut buf).await?;
        if n == 0 {
            return Ok(kept);
        }
        let room = cap.saturating_sub(kept.len());
        kept.extend_from_slice(&buf[..n.min(room)]);
    }
}

/// Cut `text` to at most `max` bytes on a char boundary.
pub(crate) fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n... [output truncated]", &text[..end])
}
