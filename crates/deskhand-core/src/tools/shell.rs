use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use deskhand_config::{resolve_workspace, ExecutorConfig};
use regex::Regex;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::subagent::Executor;

/// Sub-agent executor that runs the instructions as a shell command.
///
/// `input` is written to the command's stdin. A non-zero exit is an error.
/// The child is killed once `max_runtime` passes, so work the orchestrator
/// has abandoned does not linger.
pub struct ShellExecutor {
    shell: String,
    working_dir: PathBuf,
    deny_patterns: Vec<Regex>,
    restrict_to_workspace: bool,
    posix_path_re: Regex,
    max_output_chars: usize,
    max_runtime: Option<Duration>,
}

impl ShellExecutor {
    pub fn new(working_dir: PathBuf, restrict_to_workspace: bool) -> Result<Self> {
        let deny_patterns = [
            r"\brm\s+-[rf]{1,2}\b",
            r"\bdel\s+/[fq]\b",
            r"\brmdir\s+/s\b",
            r"\b(format|mkfs|diskpart)\b",
            r"\bdd\s+if=",
            r">\s*/dev/sd",
            r"\b(shutdown|reboot|poweroff)\b",
            r":\(\)\s*\{.*\};\s*:",
        ]
        .iter()
        .map(|p| Regex::new(p))
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            shell: "sh".to_string(),
            working_dir,
            deny_patterns,
            restrict_to_workspace,
            posix_path_re: Regex::new(r#"(?:^|[\s|>])(/[^\s"'>]+)"#)?,
            max_output_chars: 10_000,
            max_runtime: None,
        })
    }

    pub fn from_config(config: &ExecutorConfig) -> Result<Self> {
        let mut executor = Self::new(
            resolve_workspace(&config.workspace),
            config.restrict_to_workspace,
        )?;
        executor.shell = config.shell.clone();
        executor.max_output_chars = config.max_output_chars;
        Ok(executor)
    }

    pub fn with_max_runtime(mut self, limit: Duration) -> Self {
        self.max_runtime = Some(limit);
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    fn guard_command(&self, command: &str) -> Option<&'static str> {
        let lower = command.to_lowercase();

        if self.deny_patterns.iter().any(|re| re.is_match(&lower)) {
            return Some("dangerous pattern detected");
        }

        if self.restrict_to_workspace {
            if command.contains("../") || command.contains("..\\") {
                return Some("path traversal detected");
            }

            let cwd = self
                .working_dir
                .canonicalize()
                .unwrap_or_else(|_| self.working_dir.clone());
            for cap in self.posix_path_re.captures_iter(command) {
                if let Some(m) = cap.get(1) {
                    let p = Path::new(m.as_str());
                    let resolved = p.canonicalize().unwrap_or_else(|_| p.to_path_buf());
                    if !resolved.starts_with(&cwd) {
                        return Some("path outside working dir");
                    }
                }
            }
        }

        None
    }

    async fn run(&self, command: &str, input: Option<&str>) -> Result<std::process::Output> {
        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .current_dir(&self.working_dir)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start '{}'", self.shell))?;

        if let (Some(data), Some(mut stdin)) = (input, child.stdin.take()) {
            // A command that ignores stdin may close it early.
            if let Err(e) = stdin.write_all(data.as_bytes()).await {
                debug!("stdin write failed: {e}");
            }
        }

        Ok(child.wait_with_output().await?)
    }

    fn render(&self, output: &std::process::Output) -> String {
        let mut parts = Vec::new();

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.is_empty() {
            parts.push(stdout.to_string());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            parts.push(format!("STDERR:\n{stderr}"));
        }

        let text = if parts.is_empty() {
            "(no output)".to_string()
        } else {
            parts.join("\n")
        };
        truncate(text, self.max_output_chars)
    }
}

#[async_trait]
impl Executor for ShellExecutor {
    async fn execute(&self, instructions: &str, input: Option<&str>) -> Result<String> {
        if let Some(reason) = self.guard_command(instructions) {
            bail!("Command blocked by safety guard ({reason})");
        }

        let output = match self.max_runtime {
            Some(limit) => tokio::time::timeout(limit, self.run(instructions, input))
                .await
                .map_err(|_| anyhow!("Command killed after {}ms", limit.as_millis()))??,
            None => self.run(instructions, input).await?,
        };

        let text = self.render(&output);
        if output.status.success() {
            Ok(text)
        } else {
            bail!(
                "Exit code {}: {}",
                output.status.code().unwrap_or(-1),
                text.trim()
            )
        }
    }
}

fn truncate(text: String, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text;
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!("{kept}\n... (truncated, {} more chars)", total - max_chars)
}
