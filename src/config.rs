//! Command-line parsing and validation.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SPEAKER_PIPE: &str = "/tmp/voicebridge_speaker_input.pcm";
pub const DEFAULT_LISTENER_PIPE: &str = "/tmp/voicebridge_listener_output.pcm";

/// Bridge configuration. Validated values feed the controller and pipe
/// manager directly, so validation runs before anything touches the
/// filesystem.
#[derive(Debug, Parser, Clone)]
#[command(about = "Bridge a remote voice session to a pair of named pipes", version)]
pub struct BridgeConfig {
    /// Session authentication token
    #[arg(long, env = "VOICEBRIDGE_TOKEN", default_value = "", hide_env_values = true)]
    pub token: String,

    /// FIFO external producers write outbound audio into (s16le 48kHz stereo)
    #[arg(long, default_value = DEFAULT_SPEAKER_PIPE)]
    pub speaker_pipe: PathBuf,

    /// FIFO external consumers read captured audio from (s16le 48kHz stereo)
    #[arg(long, default_value = DEFAULT_LISTENER_PIPE)]
    pub listener_pipe: PathBuf,

    /// Voice channel to join on startup
    #[arg(long)]
    pub channel: Option<u64>,

    /// Run against the in-process loopback transport (no token required)
    #[arg(long, default_value_t = false)]
    pub loopback: bool,

    /// Maximum wait for session authentication (milliseconds)
    #[arg(long = "startup-timeout-ms", default_value_t = 30_000)]
    pub startup_timeout_ms: u64,

    /// Maximum wait for connect/disconnect to complete (milliseconds)
    #[arg(long = "request-timeout-ms", default_value_t = 10_000)]
    pub request_timeout_ms: u64,

    /// Teardown grace period on close (milliseconds)
    #[arg(long = "close-grace-ms", default_value_t = 5_000)]
    pub close_grace_ms: u64,

    /// Background loop tick between audio pumps (milliseconds)
    #[arg(long = "pump-interval-ms", default_value_t = 20)]
    pub pump_interval_ms: u64,
}

impl BridgeConfig {
    /// Reject configurations that would wedge or cross-wire the bridge.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.speaker_pipe == self.listener_pipe {
            anyhow::bail!(
                "speaker and listener pipes must be distinct paths (both are {})",
                self.speaker_pipe.display()
            );
        }
        if self.startup_timeout_ms == 0 || self.request_timeout_ms == 0 {
            anyhow::bail!("timeouts must be non-zero");
        }
        if self.pump_interval_ms == 0 {
            anyhow::bail!("pump interval must be non-zero");
        }
        if !self.loopback && self.token.is_empty() {
            anyhow::bail!("a token is required unless running with --loopback");
        }
        Ok(())
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }

    pub fn pump_interval(&self) -> Duration {
        Duration::from_millis(self.pump_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> BridgeConfig {
        let mut full = vec!["voicebridge"];
        full.extend_from_slice(args);
        BridgeConfig::parse_from(full)
    }

    #[test]
    fn loopback_defaults_validate() {
        let cfg = parse(&["--loopback"]);
        cfg.validate().expect("defaults should be valid");
        assert_eq!(cfg.speaker_pipe, PathBuf::from(DEFAULT_SPEAKER_PIPE));
    }

    #[test]
    fn missing_token_without_loopback_is_rejected() {
        let mut cfg = parse(&[]);
        // The parse may have picked a token up from VOICEBRIDGE_TOKEN.
        cfg.token.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn identical_pipe_paths_are_rejected() {
        let cfg = parse(&[
            "--loopback",
            "--speaker-pipe",
            "/tmp/same.pcm",
            "--listener-pipe",
            "/tmp/same.pcm",
        ]);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let cfg = parse(&["--loopback", "--request-timeout-ms", "0"]);
        assert!(cfg.validate().is_err());
        let cfg = parse(&["--loopback", "--pump-interval-ms", "0"]);
        assert!(cfg.validate().is_err());
    }
}
