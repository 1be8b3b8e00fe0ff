use anyhow::{Context, Result};
use chrono::Local;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::info;

use crate::config::Config;
use crate::models::{CandidateRecord, FilteredCandidate};
use crate::snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Enrich,
    Sync,
}

impl Stage {
    pub const ORDER: [Stage; 3] = [Stage::Fetch, Stage::Enrich, Stage::Sync];

    pub fn subcommand(self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Enrich => "enrich",
            Stage::Sync => "sync",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Stage::Fetch => "Step 1: fetching candidates from Lever",
            Stage::Enrich => "Step 2: enriching candidates with LinkedIn URLs and emails",
            Stage::Sync => "Step 3: syncing candidates to the Google Sheet",
        }
    }

    /// File the stage must leave behind for the next one.
    pub fn artifact(self, config: &Config) -> Option<&Path> {
        match self {
            Stage::Fetch => Some(config.candidates_file.as_path()),
            Stage::Enrich => Some(config.filtered_file.as_path()),
            Stage::Sync => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum StageFailure {
    #[error("{stage} could not be started: {source}")]
    Spawn {
        stage: &'static str,
        source: std::io::Error,
    },

    #[error("{stage} exited with {code}")]
    Exit { stage: &'static str, code: String },

    #[error("{stage} timed out after {} seconds", .timeout.as_secs())]
    Timeout { stage: &'static str, timeout: Duration },

    #[error("{stage} finished but expected output {} is missing", .path.display())]
    MissingArtifact { stage: &'static str, path: PathBuf },
}

/// A child process invocation for one stage.
#[derive(Debug, Clone)]
pub struct StageCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl StageCommand {
    /// Re-invoke this executable with the stage's subcommand.
    pub fn for_stage(exe: &Path, stage: Stage, env_file: &Path, verbose: u8) -> Self {
        let mut args: Vec<OsString> = vec![
            stage.subcommand().into(),
            "--env-file".into(),
            env_file.as_os_str().to_os_string(),
        ];
        args.extend((0..verbose).map(|_| OsString::from("-v")));
        Self {
            program: exe.to_path_buf(),
            args,
        }
    }
}

pub async fn run_stage(stage: &'static str, command: &StageCommand, timeout: Duration) -> Result<(), StageFailure> {
    let mut child = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| StageFailure::Spawn { stage, source })?;

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) if status.success() => Ok(()),
        Ok(Ok(status)) => Err(StageFailure::Exit {
            stage,
            code: status
                .code()
                .map(|c| format!("code {}", c))
                .unwrap_or_else(|| "a signal".to_string()),
        }),
        Ok(Err(source)) => Err(StageFailure::Spawn { stage, source }),
        Err(_) => {
            // Best effort; kill_on_drop covers us if this fails.
            let _ = child.kill().await;
            Err(StageFailure::Timeout { stage, timeout })
        }
    }
}

pub fn verify_artifact(stage: &'static str, path: &Path) -> Result<(), StageFailure> {
    if path.exists() {
        Ok(())
    } else {
        Err(StageFailure::MissingArtifact {
            stage,
            path: path.to_path_buf(),
        })
    }
}

/// Run fetch, enrich and sync in order, stopping at the first failure.
pub fn run(config: &Config, env_file: &Path, verbose: u8) -> Result<()> {
    let exe = std::env::current_exe().context("Failed to locate the running executable")?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    println!("Candidate pipeline: Lever -> enrich -> Google Sheets");
    println!("Started at: {}", Local::now().format("%Y-%m-%d %H:%M:%S"));

    for stage in Stage::ORDER {
        println!("\n{}", stage.description());
        println!("{}", "=".repeat(60));

        let command = StageCommand::for_stage(&exe, stage, env_file, verbose);
        runtime
            .block_on(run_stage(stage.subcommand(), &command, config.stage_timeout))
            .with_context(|| format!("Pipeline aborted at {}", stage.subcommand()))?;

        if let Some(path) = stage.artifact(config) {
            verify_artifact(stage.subcommand(), path)
                .with_context(|| format!("Pipeline aborted at {}", stage.subcommand()))?;
            println!("Output verified: {}", path.display());
        }
        info!(stage = stage.subcommand(), "stage completed");
    }

    println!("\n{}", "=".repeat(60));
    println!("Pipeline completed successfully");
    println!("Completed at: {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
    print_summary(config);
    Ok(())
}

fn print_summary(config: &Config) {
    let raw: Vec<CandidateRecord> = snapshot::load_or_empty(&config.candidates_file);
    let filtered: Vec<FilteredCandidate> = snapshot::load_or_empty(&config.filtered_file);
    let with_linkedin = filtered.iter().filter(|c| !c.linkedin_url.is_empty()).count();

    println!("\nSummary:");
    println!("  Raw candidates:      {}", raw.len());
    println!("  Filtered candidates: {}", filtered.len());
    println!("  With LinkedIn URL:   {}/{}", with_linkedin, filtered.len());
    println!("\nFiles:");
    println!("  {}", config.candidates_file.display());
    println!("  {}", config.filtered_file.display());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_and_artifacts() {
        let config = Config::from_lookup(|_| None).unwrap();
        let names: Vec<&str> = Stage::ORDER.iter().map(|s| s.subcommand()).collect();
        assert_eq!(names, vec!["fetch", "enrich", "sync"]);
        assert_eq!(Stage::Fetch.artifact(&config), Some(config.candidates_file.as_path()));
        assert_eq!(Stage::Enrich.artifact(&config), Some(config.filtered_file.as_path()));
        assert_eq!(Stage::Sync.artifact(&config), None);
    }

    #[test]
    fn test_stage_command_forwards_env_file_and_verbosity() {
        let command = StageCommand::for_stage(Path::new("/bin/recruit-sync"), Stage::Enrich, Path::new("prod.env"), 2);
        let args: Vec<&str> = command.args.iter().map(|a| a.to_str().unwrap()).collect();
        assert_eq!(args, vec!["enrich", "--env-file", "prod.env", "-v", "-v"]);
    }

    #[test]
    fn test_verify_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        assert!(matches!(
            verify_artifact("fetch", &path),
            Err(StageFailure::MissingArtifact { .. })
        ));
        std::fs::write(&path, "[]").unwrap();
        assert!(verify_artifact("fetch", &path).is_ok());
    }

    fn shell(script: &str) -> StageCommand {
        StageCommand {
            program: PathBuf::from("sh"),
            args: vec!["-c".into(), script.into()],
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_stage_success_and_exit_code() {
        assert!(run_stage("fetch", &shell("exit 0"), Duration::from_secs(10)).await.is_ok());

        let err = run_stage("enrich", &shell("exit 3"), Duration::from_secs(10)).await.unwrap_err();
        assert!(matches!(err, StageFailure::Exit { .. }));
        assert!(err.to_string().contains("code 3"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_stage_timeout_kills_child() {
        let err = run_stage("sync", &shell("sleep 30"), Duration::from_millis(200)).await.unwrap_err();
        assert!(matches!(err, StageFailure::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_run_stage_spawn_failure() {
        let command = StageCommand {
            program: PathBuf::from("/definitely/not/a/real/binary"),
            args: vec![],
        };
        let err = run_stage("fetch", &command, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, StageFailure::Spawn { .. }));
    }
}
