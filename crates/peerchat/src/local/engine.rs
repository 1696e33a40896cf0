//! Chat engine launch configuration.

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use super::process::EngineHandle;

/// External chat engine configuration.
///
/// `args` is a template; `{ip}`, `{port}`, `{name}`, `{room}` and
/// `{history}` are replaced with the peer's identity before launch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Launch the engine with `serve` (default: true). `serve --no-engine`
    /// turns it off for a headless peer.
    pub enabled: bool,
    /// Program to execute (default: `go`).
    pub program: String,
    /// Argument template.
    pub args: Vec<String>,
    /// Working directory for the engine (default: `node`).
    pub working_dir: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: "go".to_string(),
            args: vec![
                "run".to_string(),
                ".".to_string(),
                "-ip={ip}".to_string(),
                "-port={port}".to_string(),
                "-user={name}".to_string(),
                "-room={room}".to_string(),
            ],
            working_dir: Some("node".to_string()),
        }
    }
}

/// Startup parameters handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineIdentity {
    pub ip: String,
    pub port: u16,
    pub display_name: String,
    pub room: String,
    /// History file the engine should append to.
    pub history_file: PathBuf,
}

/// Substitute identity placeholders into an argument template.
pub fn render_args(template: &[String], identity: &EngineIdentity) -> Vec<String> {
    let port = identity.port.to_string();
    let history = identity.history_file.to_string_lossy();
    template
        .iter()
        .map(|arg| {
            arg.replace("{ip}", &identity.ip)
                .replace("{port}", &port)
                .replace("{name}", &identity.display_name)
                .replace("{room}", &identity.room)
                .replace("{history}", &history)
        })
        .collect()
}

/// Launcher for the external chat engine.
pub struct ChatEngine;

impl ChatEngine {
    /// Start the engine once.
    ///
    /// The engine is interactive, so it inherits the terminal. It is killed
    /// if the handle is dropped.
    pub fn launch(config: &EngineConfig, identity: &EngineIdentity) -> Result<EngineHandle> {
        let args = render_args(&config.args, identity);
        debug!("Launching {} {:?}", config.program, args);

        let mut cmd = Command::new(&config.program);
        cmd.args(&args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        if let Some(dir) = config.working_dir.as_deref().filter(|d| !d.is_empty()) {
            cmd.current_dir(dir);
        }

        let child = cmd
            .spawn()
            .with_context(|| format!("spawning chat engine '{}'", config.program))?;
        let handle = EngineHandle::new(child, config.program.clone())
            .context("chat engine exited before it could be tracked")?;

        info!(
            "Chat engine {} started with PID {} for {}:{} in room '{}'",
            config.program, handle.pid, identity.ip, identity.port, identity.room
        );
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> EngineIdentity {
        EngineIdentity {
            ip: "10.0.0.2".to_string(),
            port: 9001,
            display_name: "alice".to_string(),
            room: "general".to_string(),
            history_file: PathBuf::from("/tmp/messages.json"),
        }
    }

    #[test]
    fn test_default_template_renders_go_flags() {
        let config = EngineConfig::default();
        assert!(config.enabled);
        let args = render_args(&config.args, &identity());
        assert_eq!(
            args,
            vec![
                "run",
                ".",
                "-ip=10.0.0.2",
                "-port=9001",
                "-user=alice",
                "-room=general"
            ]
        );
    }

    #[test]
    fn test_render_args_leaves_plain_args_alone() {
        let template = vec!["--history".to_string(), "{history}".to_string(), "-v".to_string()];
        let args = render_args(&template, &identity());
        assert_eq!(args, vec!["--history", "/tmp/messages.json", "-v"]);
    }

    #[tokio::test]
    async fn test_launch_and_kill() {
        let config = EngineConfig {
            enabled: true,
            program: "sleep".to_string(),
            args: vec!["30".to_string()],
            working_dir: None,
        };
        let mut handle = ChatEngine::launch(&config, &identity()).unwrap();
        assert!(handle.is_running());
        handle.kill().await.unwrap();
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn test_launch_missing_program_fails() {
        let config = EngineConfig {
            enabled: true,
            program: "peerchat-no-such-engine".to_string(),
            args: vec![],
            working_dir: None,
        };
        let err = ChatEngine::launch(&config, &identity()).unwrap_err();
        assert!(err.to_string().contains("peerchat-no-such-engine"));
    }

    #[tokio::test]
    async fn test_launch_missing_working_dir_fails() {
        let config = EngineConfig {
            enabled: true,
            program: "true".to_string(),
            args: vec![],
            working_dir: Some("/nonexistent/peerchat/node".to_string()),
        };
        assert!(ChatEngine::launch(&config, &identity()).is_err());
    }
}
