//! Target process launching.
//!
//! The target runtime is started with its inspector enabled on an
//! OS-assigned port; the runtime announces the WebSocket endpoint on its
//! standard-error stream ("Debugger listening on ws://127.0.0.1:<port>/<uuid>")
//! and we scan for that line under a deadline.

use crate::{Error, Result};
use regex::Regex;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// How the target starts relative to the debugger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnMode {
    /// `--inspect-brk=0`: the runtime blocks before the first statement until
    /// a debugger attaches and resumes it.
    Break,
    /// `--inspect=0`: the runtime starts executing immediately.
    Running,
}

impl SpawnMode {
    fn inspector_flag(self) -> &'static str {
        match self {
            SpawnMode::Break => "--inspect-brk=0",
            SpawnMode::Running => "--inspect=0",
        }
    }
}

/// Launch description for one target process.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<String>,
    pub mode: SpawnMode,
    /// Deadline for the WebSocket URL to appear on stderr.
    pub url_timeout: Duration,
}

impl SpawnConfig {
    pub fn new(command: impl Into<String>, args: Vec<String>, mode: SpawnMode) -> Self {
        Self {
            command: command.into(),
            args,
            cwd: None,
            mode,
            url_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_cwd(mut self, cwd: Option<String>) -> Self {
        self.cwd = cwd;
        self
    }
}

/// A started target: the child handle plus the inspector endpoint it
/// announced.
pub struct SpawnedTarget {
    pub child: Child,
    pub ws_url: String,
}

/// Package runners execute a named tool rather than a script path, so the
/// script-existence check does not apply to their first argument.
const WRAPPER_COMMANDS: &[&str] = &["npx", "npm", "yarn", "pnpm", "bun"];

const SCRIPT_EXTENSIONS: &[&str] = &[".js", ".mjs", ".cjs", ".ts", ".tsx", ".jsx"];

pub struct ProcessSpawner;

impl ProcessSpawner {
    /// Spawn the target with the inspector enabled and wait for it to
    /// announce its WebSocket URL.
    pub async fn spawn(config: &SpawnConfig) -> Result<SpawnedTarget> {
        Self::validate(config)?;

        let mut args: Vec<String> = vec![
            config.mode.inspector_flag().to_string(),
            "--enable-source-maps".to_string(),
        ];
        args.extend(config.args.iter().cloned());

        info!("Spawning target: {} {:?}", config.command, args);

        let mut command = Command::new(&config.command);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(cwd) = &config.cwd {
            command.current_dir(shellexpand::tilde(cwd).as_ref());
        }

        let mut child = command
            .spawn()
            .map_err(|e| Error::Spawn(format!("failed to spawn '{}': {}", config.command, e)))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Spawn("failed to capture target stderr".to_string()))?;

        let ws_url = match tokio::time::timeout(
            config.url_timeout,
            Self::scan_for_ws_url(stderr),
        )
        .await
        {
            Ok(Ok(url)) => url,
            Ok(Err(e)) => {
                let _ = child.start_kill();
                return Err(e);
            }
            Err(_) => {
                let _ = child.start_kill();
                return Err(Error::Spawn(format!(
                    "target did not announce an inspector URL within {:?}",
                    config.url_timeout
                )));
            }
        };

        info!("Target inspector listening at {}", ws_url);
        Ok(SpawnedTarget { child, ws_url })
    }

    fn validate(config: &SpawnConfig) -> Result<()> {
        if let Some(cwd) = &config.cwd {
            let expanded = shellexpand::tilde(cwd);
            if !Path::new(expanded.as_ref()).is_dir() {
                return Err(Error::Spawn(format!(
                    "working directory does not exist: {}",
                    cwd
                )));
            }
        }

        let command_name = Path::new(&config.command)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(config.command.as_str());
        if WRAPPER_COMMANDS.contains(&command_name) {
            return Ok(());
        }

        if let Some(first) = config.args.first() {
            if Self::looks_like_script(first) {
                let expanded = shellexpand::tilde(first);
                let path = Path::new(expanded.as_ref());
                let resolved = match (&config.cwd, path.is_relative()) {
                    (Some(cwd), true) => {
                        Path::new(shellexpand::tilde(cwd).as_ref()).join(path)
                    }
                    _ => path.to_path_buf(),
                };
                if !resolved.is_file() {
                    return Err(Error::Spawn(format!("script not found: {}", first)));
                }
            }
        }

        Ok(())
    }

    fn looks_like_script(arg: &str) -> bool {
        SCRIPT_EXTENSIONS.iter().any(|ext| arg.ends_with(ext))
    }

    /// Read stderr lines until the inspector endpoint shows up. Once found,
    /// the remaining stream is drained in the background so the pipe never
    /// fills up and stalls the target.
    async fn scan_for_ws_url(stderr: tokio::process::ChildStderr) -> Result<String> {
        let url_pattern =
            Regex::new(r"ws://127\.0\.0\.1:\d+/[a-f0-9-]+").expect("static pattern");
        let mut lines = BufReader::new(stderr).lines();

        loop {
            let line = lines
                .next_line()
                .await
                .map_err(|e| Error::Spawn(format!("failed reading target stderr: {}", e)))?;

            let Some(line) = line else {
                // EOF: the target exited before the inspector came up.
                return Err(Error::Spawn(
                    "target exited before announcing an inspector URL".to_string(),
                ));
            };

            debug!("target stderr: {}", line);

            if let Some(found) = url_pattern.find(&line) {
                let url = found.as_str().to_string();
                tokio::spawn(async move {
                    while let Ok(Some(rest)) = lines.next_line().await {
                        debug!("target stderr: {}", rest);
                    }
                });
                return Ok(url);
            }
        }
    }
}

/// Best-effort kill used by cleanup paths.
pub async fn kill_child(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        warn!("Failed to kill target process: {}", e);
        return;
    }
    let _ = child.wait().await;
}
