//! High-level public interface.
//!
//! Composes the pipe manager and the singleton controller: construction
//! blocks until the session authenticates, then the two pipe endpoints are
//! available to external processes while connect/disconnect drive the
//! voice channel binding.

use crate::config::BridgeConfig;
use crate::controller::{ControllerSettings, SessionController};
use crate::error::BridgeError;
use crate::pipes::PipeManager;
use crate::transport::{ChannelId, VoiceTransport};
use std::fs::File;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Synchronous façade over the background voice session.
pub struct AudioBridge {
    pipes: PipeManager,
    controller: Arc<SessionController>,
    close_grace: Duration,
}

impl AudioBridge {
    /// Stand up the bridge on the process-wide controller.
    ///
    /// Blocks until the session authenticates or fails fatally
    /// (`StartupTimeout`, `AuthFailed`, `Resource`). The first call wins:
    /// a later construction returns the existing controller and ignores
    /// its own transport and timing configuration.
    pub fn with_transport(
        config: &BridgeConfig,
        transport: Box<dyn VoiceTransport>,
    ) -> Result<Self, BridgeError> {
        let pipes = PipeManager::new(config.speaker_pipe.clone(), config.listener_pipe.clone());
        let settings = ControllerSettings {
            token: config.token.clone(),
            startup_timeout: config.startup_timeout(),
            request_timeout: config.request_timeout(),
            pump_interval: config.pump_interval(),
        };
        let controller =
            SessionController::get_or_create(settings, pipes.clone(), move || transport)?;
        Ok(Self {
            pipes,
            controller,
            close_grace: config.close_grace(),
        })
    }

    /// Join a voice channel and activate both audio paths.
    pub fn connect(&self, channel: ChannelId) -> Result<(), BridgeError> {
        self.controller.connect(channel)
    }

    /// Tear down the active voice connection, if any.
    pub fn disconnect(&self) -> Result<(), BridgeError> {
        self.controller.disconnect()
    }

    /// Blocking byte sink external producers write outbound audio into.
    /// The open blocks until a connection has attached the session-side
    /// reader, so call this after [`connect`](Self::connect).
    pub fn speaker(&self) -> io::Result<File> {
        self.pipes.open_speaker_writer()
    }

    /// Blocking byte source of captured session audio.
    pub fn listener(&self) -> io::Result<File> {
        self.pipes.open_listener_reader()
    }

    pub fn pipes(&self) -> &PipeManager {
        &self.pipes
    }

    /// Disconnect within the close grace period. Teardown failures are
    /// logged, never raised; the authenticated session itself stays up
    /// until process exit.
    pub fn close(&self) {
        if let Err(err) = self.controller.disconnect_within(self.close_grace) {
            warn!(error = %err, "bridge close: teardown did not confirm in time");
        }
    }

    /// Close the bridge and stop the controller loop. For binary exit
    /// paths; library embedders normally just [`close`](Self::close).
    pub fn shutdown(self) {
        self.close();
        self.controller.shutdown(self.close_grace);
    }
}
