use async_trait::async_trait;
use std::{process::Stdio, time::Duration};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::track::{PlaybackState, TrackMetadata};

#[derive(thiserror::Error, Debug)]
pub enum PlayerError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    Exit {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("`{command}` did not answer within {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("`{command}` printed non UTF-8 output")]
    Encoding { command: String },
}

/// Read side of the music player.
///
/// Neither call fails: query errors are logged and folded into the
/// fail-safe answer (not playing / no track).
#[async_trait]
pub trait PlayerStatus: Send + Sync {
    async fn is_playing(&self) -> PlaybackState;
    async fn current_track(&self) -> Option<TrackMetadata>;
}

/// Talks to a Spotify command line client (`sp status`, `sp current`).
///
/// `command` is split on whitespace; the subcommand is appended to it.
pub struct PlayerCli {
    command: String,
    timeout: Duration,
}

impl PlayerCli {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }

    async fn query(&self, subcommand: &str) -> Result<String, PlayerError> {
        let command = format!("{} {subcommand}", self.command);
        let mut words = self.command.split_whitespace();
        let program = words.next().unwrap_or("sp");
        let output = Command::new(program)
            .args(words)
            .arg(subcommand)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, output).await {
            Ok(result) => result.map_err(|source| PlayerError::Spawn {
                command: command.clone(),
                source,
            })?,
            Err(_) => {
                return Err(PlayerError::Timeout {
                    command,
                    timeout: self.timeout,
                })
            }
        };

        if !output.status.success() {
            return Err(PlayerError::Exit {
                command,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8(output.stdout).map_err(|_| PlayerError::Encoding {
            command: command.clone(),
        })?;
        debug!(%command, output = %stdout.trim(), "player query");
        Ok(stdout)
    }
}

#[async_trait]
impl PlayerStatus for PlayerCli {
    async fn is_playing(&self) -> PlaybackState {
        match self.query("status").await {
            Ok(status) => PlaybackState::from_status(&status),
            Err(err) => {
                warn!(error = %err, "Failed to check player status");
                PlaybackState::NotPlaying
            }
        }
    }

    async fn current_track(&self) -> Option<TrackMetadata> {
        match self.query("current").await {
            Ok(output) => Some(TrackMetadata::parse(&output)),
            Err(err) => {
                warn!(error = %err, "Failed to get current song");
                None
            }
        }
    }
}
