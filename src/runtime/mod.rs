use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::Config;
use crate::error::{LabError, Result};

/// Everything a runtime needs to address one published lab
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeTarget {
    pub lab: String,
    pub project_name: String,
    /// Lab directory; relative paths in the descriptor resolve against it
    pub dir: PathBuf,
    pub compose_file: PathBuf,
    pub env_file: PathBuf,
}

/// Starts and stops labs. Implementations must not retry.
#[async_trait]
pub trait OrchestrationRuntime: Send + Sync {
    async fn start(&self, target: &ComposeTarget) -> Result<()>;

    async fn stop(&self, target: &ComposeTarget) -> Result<()>;
}

/// Drives labs through the `docker compose` CLI
#[derive(Debug, Clone)]
pub struct DockerComposeRuntime {
    argv: Vec<String>,
}

impl DockerComposeRuntime {
    /// `argv` is the program followed by any leading arguments, e.g. `["docker", "compose"]`
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Ok(Self::new(cfg.compose_argv()?))
    }

    fn command_args(&self, target: &ComposeTarget, action: &[&str]) -> Vec<String> {
        let mut args: Vec<String> = self.argv[1..].to_vec();
        args.push("--project-name".to_string());
        args.push(target.project_name.clone());
        args.push("--file".to_string());
        args.push(target.compose_file.display().to_string());
        args.push("--env-file".to_string());
        args.push(target.env_file.display().to_string());
        args.extend(action.iter().map(|s| s.to_string()));
        args
    }

    async fn run(&self, target: &ComposeTarget, action: &[&str]) -> Result<()> {
        let program = self
            .argv
            .first()
            .ok_or_else(|| LabError::InvalidConfig("COMPOSE_COMMAND is empty".to_string()))?;
        let args = self.command_args(target, action);
        tracing::debug!("Running {} {}", program, args.join(" "));

        let output = Command::new(program)
            .args(&args)
            .current_dir(&target.dir)
            .output()
            .await
            .map_err(|e| {
                LabError::runtime_unavailable(&target.lab, format!("failed to run {}: {}", program, e))
            })?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(LabError::runtime_unavailable(
            &target.lab,
            format!("{} {} exited with {}: {}", program, action.join(" "), output.status, stderr.trim_end()),
        ))
    }
}

#[async_trait]
impl OrchestrationRuntime for DockerComposeRuntime {
    async fn start(&self, target: &ComposeTarget) -> Result<()> {
        self.run(target, &["up", "-d"]).await?;
        tracing::info!("Lab {} started", target.lab);
        Ok(())
    }

    async fn stop(&self, target: &ComposeTarget) -> Result<()> {
        self.run(target, &["down", "--remove-orphans"]).await?;
        tracing::info!("Lab {} stopped", target.lab);
        Ok(())
    }
}
