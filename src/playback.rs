//! Outbound playback path: a perpetual silence heartbeat with the speaker
//! pipe mixed on top.
//!
//! Continuous outbound audio keeps the transport path alive, so the source
//! always yields a full frame: silence when the pipe has nothing, pipe
//! bytes where they are available.

use crate::pipes;
use crate::transport::AudioSource;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tracing::debug;

/// Wire format on both pipes: raw s16le PCM at 48 kHz stereo.
pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: u16 = 2;
pub const BYTES_PER_SAMPLE: usize = 2;

/// One playback scheduler tick worth of audio.
pub const FRAME_MS: u64 = 20;
pub const FRAME_BYTES: usize =
    (SAMPLE_RATE as usize / 1000 * FRAME_MS as usize) * CHANNELS as usize * BYTES_PER_SAMPLE;

/// Saturating-add `overlay` onto `base`, both interpreted as s16le PCM.
/// Overlay may be shorter; the tail of `base` is left untouched.
pub fn mix_into(base: &mut [u8], overlay: &[u8]) {
    let len = base.len().min(overlay.len()) & !1;
    for i in (0..len).step_by(2) {
        let a = i16::from_le_bytes([base[i], base[i + 1]]);
        let b = i16::from_le_bytes([overlay[i], overlay[i + 1]]);
        let mixed = a.saturating_add(b).to_le_bytes();
        base[i] = mixed[0];
        base[i + 1] = mixed[1];
    }
}

/// Playback source bound to the speaker pipe.
///
/// The read side is opened non-blocking at connect time, so the source
/// never waits on an absent producer; it just keeps the heartbeat going.
pub struct HeartbeatSource {
    pipe: File,
    scratch: Vec<u8>,
    /// Bytes read from the pipe but not yet mixed. A pipe read can return
    /// an odd count; the trailing half-sample waits here so the s16 stream
    /// never loses alignment.
    pending: Vec<u8>,
}

impl HeartbeatSource {
    pub fn open(speaker_path: &Path) -> io::Result<Self> {
        let pipe = pipes::open_reader_nonblocking(speaker_path)?;
        debug!(path = %speaker_path.display(), "speaker pipe attached to playback source");
        Ok(Self {
            pipe,
            scratch: vec![0u8; FRAME_BYTES],
            pending: Vec::with_capacity(FRAME_BYTES + 1),
        })
    }
}

impl AudioSource for HeartbeatSource {
    fn read_frame(&mut self, frame: &mut [u8]) -> io::Result<()> {
        frame.fill(0);
        self.scratch.resize(frame.len(), 0);
        match self.pipe.read(&mut self.scratch) {
            // 0 also covers "no writer attached yet": stay on the heartbeat.
            Ok(n) => self.pending.extend_from_slice(&self.scratch[..n]),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
        let take = self.pending.len().min(frame.len()) & !1;
        mix_into(frame, &self.pending[..take]);
        self.pending.drain(..take);
        Ok(())
    }
}
