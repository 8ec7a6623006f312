//! Newline-delimited JSON lifecycle events for supervising processes.
//!
//! The binary emits these on stdout so an external producer/consumer knows
//! when the pipes are safe to attach to. Logs stay on stderr.

use serde::Serialize;
use std::io::{self, Write};

/// Events emitted by the `voicebridge` binary.
///
/// Serialized as JSON with an `"event"` tag field for type discrimination.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum LifecycleEvent {
    /// Session authenticated; pipes exist and the bridge accepts connects.
    #[serde(rename = "ready")]
    Ready {
        speaker_pipe: String,
        listener_pipe: String,
    },

    /// Voice connection established on the given channel.
    #[serde(rename = "connected")]
    Connected { channel: u64 },

    /// Voice connection torn down.
    #[serde(rename = "disconnected")]
    Disconnected,

    /// Fatal or operation-level error.
    #[serde(rename = "error")]
    Error { message: String },
}

/// Write one event as a JSON line on stdout.
pub fn emit(event: &LifecycleEvent) {
    let Ok(json) = serde_json::to_string(event) else {
        return;
    };
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let _ = writeln!(out, "{json}");
    let _ = out.flush();
}
