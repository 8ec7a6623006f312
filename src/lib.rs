//! Bridge between a persistent remote voice session and two named pipes.
//!
//! External processes feed outbound audio into the speaker pipe and read
//! captured audio from the listener pipe; all of the session's
//! event-loop-bound machinery stays on one background thread behind
//! [`SessionController`]. Both pipes carry raw s16le PCM, 48 kHz stereo.

pub mod bridge;
pub mod config;
pub mod controller;
pub mod decode;
pub mod error;
pub mod pipes;
pub mod playback;
pub mod protocol;
pub mod sink;
mod telemetry;
pub mod transport;

pub use bridge::AudioBridge;
pub use config::BridgeConfig;
pub use controller::{ControllerSettings, SessionController};
pub use error::BridgeError;
pub use pipes::PipeManager;
pub use telemetry::init_tracing;
pub use transport::{ChannelId, VoiceTransport};
