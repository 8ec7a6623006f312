//! The external voice-session capability, behind a trait.
//!
//! The bridge never implements the wire protocol, codec, or network
//! transport. It drives an opaque [`VoiceTransport`] from the background
//! loop: authenticate once, connect/disconnect calls, attach a playback
//! source and a capture sink, and pump I/O one tick at a time.
//!
//! [`LoopbackTransport`] is the in-process implementation used by the test
//! suite and by `voicebridge --loopback` for credential-free smoke runs.

use crate::decode::PacketDecode;
use crate::error::BridgeError;
use crate::playback::FRAME_BYTES;
use anyhow::{ensure, Context, Result};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

/// Identifier of a voice channel on the remote session.
pub type ChannelId = u64;

/// Handle to one live session-to-channel binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallId(pub(crate) u64);

/// Outbound audio provider. `read_frame` must fill the whole buffer every
/// call (silence where no real audio is available) and must not block.
pub trait AudioSource: Send {
    fn read_frame(&mut self, frame: &mut [u8]) -> io::Result<()>;
}

/// Inbound decoded-audio consumer attached to a call.
pub trait FrameSink: Send {
    fn deliver(&mut self, pcm: &[u8]);
    fn cleanup(&mut self);
}

/// Opaque remote voice session.
///
/// All methods are called from the background loop thread only; the
/// foreground never touches the transport directly.
pub trait VoiceTransport: Send {
    /// Authenticate the session. Called once, before anything else.
    fn authenticate(&mut self, token: &str) -> Result<()>;

    /// Hand out the native per-packet decode step so the bridge can wrap
    /// it. Called once at controller spawn.
    fn take_raw_decoder(&mut self) -> Box<dyn PacketDecode>;

    /// Install the decode step used for every inbound packet from now on.
    fn set_decoder(&mut self, decoder: Box<dyn PacketDecode>);

    /// Join a channel. At most one call is active at a time; the
    /// controller enforces that policy, not the transport.
    fn connect(&mut self, channel: ChannelId) -> Result<CallId, BridgeError>;

    /// Attach the playback source pulled on every pump tick.
    fn play(&mut self, call: CallId, source: Box<dyn AudioSource>) -> Result<()>;

    /// Attach the capture sink fed with one decoded frame per packet.
    fn listen(&mut self, call: CallId, sink: Box<dyn FrameSink>) -> Result<()>;

    /// Stop pulling the playback source. First step of teardown.
    fn stop(&mut self, call: CallId);

    /// Detach the capture sink, running its `cleanup`. Second step of
    /// teardown, after `stop`.
    fn detach(&mut self, call: CallId);

    /// Close the session-to-channel binding. Last step of teardown.
    fn disconnect(&mut self, call: CallId) -> Result<()>;

    /// One scheduling tick: pull a playback frame, decode and deliver any
    /// pending inbound packets. No-op without an active call.
    fn pump(&mut self) -> Result<()>;
}

// ============================================================================
// Loopback transport
// ============================================================================

/// First byte of a well-formed loopback packet.
const PACKET_TAG_PCM: u8 = 0x01;

/// Build a well-formed loopback packet around a PCM payload.
pub fn loopback_packet(pcm: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(pcm.len() + 1);
    packet.push(PACKET_TAG_PCM);
    packet.extend_from_slice(pcm);
    packet
}

/// Raw decode step of the loopback transport: strips the tag byte and
/// rejects anything that is not tagged, even-length PCM.
struct LoopbackDecoder;

impl PacketDecode for LoopbackDecoder {
    fn decode_packet(&mut self, packet: &[u8]) -> Result<Vec<u8>> {
        let (&tag, pcm) = packet.split_first().context("empty packet")?;
        ensure!(tag == PACKET_TAG_PCM, "unknown packet tag {tag:#04x}");
        ensure!(pcm.len() % 2 == 0, "truncated sample in packet");
        Ok(pcm.to_vec())
    }
}

/// How `authenticate` should behave, for exercising startup failure modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthBehavior {
    Succeed,
    /// Report failure immediately.
    Fail,
    /// Never complete within any reasonable startup timeout.
    Stall,
}

/// State shared between a running [`LoopbackTransport`] and the handle its
/// creator keeps after the transport moves into the background thread.
#[derive(Default)]
struct LoopbackShared {
    /// Encoded packets waiting to be decoded and delivered on pump.
    inbound: Mutex<VecDeque<Vec<u8>>>,
    /// Playback frames the transport pulled, in pull order.
    outbound: Mutex<Vec<Vec<u8>>>,
    /// Call-management operations in invocation order.
    ops: Mutex<Vec<&'static str>>,
}

impl LoopbackShared {
    fn record(&self, op: &'static str) {
        self.ops.lock().unwrap_or_else(|e| e.into_inner()).push(op);
    }
}

/// Feed/inspect side of a loopback transport.
#[derive(Clone)]
pub struct LoopbackHandle {
    shared: Arc<LoopbackShared>,
}

impl LoopbackHandle {
    /// Queue one inbound packet for the next pump tick.
    pub fn push_packet(&self, packet: Vec<u8>) {
        self.shared
            .inbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(packet);
    }

    /// Whether all queued inbound packets have been consumed.
    pub fn inbound_drained(&self) -> bool {
        self.shared
            .inbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }

    /// Snapshot of every playback frame pulled so far.
    pub fn outbound_frames(&self) -> Vec<Vec<u8>> {
        self.shared
            .outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Call-management operations (`connect`, `stop`, `detach`,
    /// `disconnect`) in the order the transport saw them.
    pub fn ops(&self) -> Vec<&'static str> {
        self.shared
            .ops
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

struct ActiveCall {
    id: CallId,
    source: Option<Box<dyn AudioSource>>,
    sink: Option<Box<dyn FrameSink>>,
}

/// In-process [`VoiceTransport`]: scripted inbound packets, recorded
/// outbound frames, optionally echoing playback back through the capture
/// path.
pub struct LoopbackTransport {
    channels: Vec<ChannelId>,
    auth: AuthBehavior,
    authenticated: bool,
    echo: bool,
    connect_delay: std::time::Duration,
    decoder: Option<Box<dyn PacketDecode>>,
    next_call: u64,
    call: Option<ActiveCall>,
    shared: Arc<LoopbackShared>,
}

impl LoopbackTransport {
    /// Transport that accepts connects to the given channels.
    pub fn new(channels: Vec<ChannelId>) -> Self {
        Self {
            channels,
            auth: AuthBehavior::Succeed,
            authenticated: false,
            echo: false,
            connect_delay: std::time::Duration::ZERO,
            decoder: Some(Box::new(LoopbackDecoder)),
            next_call: 0,
            call: None,
            shared: Arc::new(LoopbackShared::default()),
        }
    }

    pub fn with_auth(mut self, auth: AuthBehavior) -> Self {
        self.auth = auth;
        self
    }

    /// Make every `connect` take this long, for exercising slow-channel
    /// joins against the request timeout.
    pub fn with_connect_delay(mut self, delay: std::time::Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Re-queue every pulled playback frame as an inbound packet, so
    /// whatever enters the speaker pipe comes back out the listener pipe.
    pub fn with_echo(mut self) -> Self {
        self.echo = true;
        self
    }

    /// Handle for feeding packets and inspecting pulled frames after the
    /// transport has moved into the controller.
    pub fn handle(&self) -> LoopbackHandle {
        LoopbackHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl VoiceTransport for LoopbackTransport {
    fn authenticate(&mut self, _token: &str) -> Result<()> {
        match self.auth {
            AuthBehavior::Succeed => {
                self.authenticated = true;
                Ok(())
            }
            AuthBehavior::Fail => anyhow::bail!("loopback auth rejected"),
            AuthBehavior::Stall => {
                std::thread::sleep(std::time::Duration::from_secs(2));
                anyhow::bail!("loopback auth stalled out")
            }
        }
    }

    fn take_raw_decoder(&mut self) -> Box<dyn PacketDecode> {
        self.decoder
            .take()
            .unwrap_or_else(|| Box::new(LoopbackDecoder))
    }

    fn set_decoder(&mut self, decoder: Box<dyn PacketDecode>) {
        self.decoder = Some(decoder);
    }

    fn connect(&mut self, channel: ChannelId) -> Result<CallId, BridgeError> {
        if !self.authenticated {
            return Err(BridgeError::ConnectFailed("not authenticated".into()));
        }
        if !self.channels.contains(&channel) {
            return Err(BridgeError::ChannelNotFound(channel));
        }
        if !self.connect_delay.is_zero() {
            std::thread::sleep(self.connect_delay);
        }
        self.shared.record("connect");
        self.next_call += 1;
        let id = CallId(self.next_call);
        self.call = Some(ActiveCall {
            id,
            source: None,
            sink: None,
        });
        Ok(id)
    }

    fn play(&mut self, call: CallId, source: Box<dyn AudioSource>) -> Result<()> {
        let active = self.call.as_mut().filter(|c| c.id == call);
        let active = active.context("play on unknown call")?;
        active.source = Some(source);
        Ok(())
    }

    fn listen(&mut self, call: CallId, sink: Box<dyn FrameSink>) -> Result<()> {
        let active = self.call.as_mut().filter(|c| c.id == call);
        let active = active.context("listen on unknown call")?;
        active.sink = Some(sink);
        Ok(())
    }

    fn stop(&mut self, call: CallId) {
        self.shared.record("stop");
        if let Some(active) = self.call.as_mut().filter(|c| c.id == call) {
            active.source = None;
        }
    }

    fn detach(&mut self, call: CallId) {
        self.shared.record("detach");
        if let Some(active) = self.call.as_mut().filter(|c| c.id == call) {
            if let Some(mut sink) = active.sink.take() {
                sink.cleanup();
            }
        }
    }

    fn disconnect(&mut self, call: CallId) -> Result<()> {
        self.shared.record("disconnect");
        if self.call.as_ref().map_or(false, |c| c.id == call) {
            if let Some(mut active) = self.call.take() {
                // Teardown order is the controller's job; this is the
                // backstop for a call dropped without stop/detach.
                active.source = None;
                if let Some(mut sink) = active.sink.take() {
                    sink.cleanup();
                }
            }
        }
        Ok(())
    }

    fn pump(&mut self) -> Result<()> {
        let Some(active) = self.call.as_mut() else {
            return Ok(());
        };

        if let Some(source) = active.source.as_mut() {
            let mut frame = vec![0u8; FRAME_BYTES];
            source.read_frame(&mut frame)?;
            if self.echo {
                self.shared
                    .inbound
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push_back(loopback_packet(&frame));
            }
            self.shared
                .outbound
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(frame);
        }

        // Bounded drain so one tick cannot monopolize the loop.
        for _ in 0..64 {
            let packet = self
                .shared
                .inbound
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front();
            let Some(packet) = packet else { break };
            let Some(decoder) = self.decoder.as_mut() else { break };
            let pcm = decoder.decode_packet(&packet)?;
            if let Some(sink) = active.sink.as_mut() {
                sink.deliver(&pcm);
            }
        }
        Ok(())
    }
}
