//! Write side of the listener pipe: captured audio out of the session.
//!
//! Absence of a consumer is a steady-state condition, not an error. The
//! sink connects lazily once a reader shows up, drops frames while none is
//! attached, and heals itself after the reader goes away again. Every call
//! costs at most one non-blocking syscall on top of the write, because it
//! runs on the real-time capture path.

use crate::pipes;
use crate::transport::FrameSink;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Outcome of one lazy connection attempt.
#[derive(Debug)]
pub enum SinkConnect {
    Connected,
    NoReaderYet,
    Failed(io::Error),
}

/// Lazily connected byte sink over a FIFO.
pub struct LazyConnectSink {
    path: PathBuf,
    pipe: Option<File>,
    bytes_written: u64,
    frames_dropped: u64,
}

impl LazyConnectSink {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            pipe: None,
            bytes_written: 0,
            frames_dropped: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.pipe.is_some()
    }

    /// Total PCM bytes that made it into the pipe.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Frames dropped because no reader was attached or a write failed.
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    /// One non-blocking attempt to acquire the write side of the pipe.
    pub fn try_connect(&mut self) -> SinkConnect {
        if self.pipe.is_some() {
            return SinkConnect::Connected;
        }
        match pipes::open_writer_nonblocking(&self.path) {
            Ok(pipe) => {
                info!(path = %self.path.display(), "listener pipe connected");
                self.pipe = Some(pipe);
                SinkConnect::Connected
            }
            // ENXIO: FIFO has no reader yet. Expected; retry on next frame.
            Err(err) if err.raw_os_error() == Some(libc::ENXIO) => SinkConnect::NoReaderYet,
            Err(err) => SinkConnect::Failed(err),
        }
    }

    /// Forward one decoded frame. Never blocks and never fails: frames that
    /// cannot be written right now are dropped, and a dead descriptor is
    /// discarded so the next call can reconnect.
    pub fn deliver(&mut self, pcm: &[u8]) {
        if pcm.is_empty() {
            // Silent frame (e.g. an absorbed corrupt packet): nothing to write.
            return;
        }
        match self.try_connect() {
            SinkConnect::Connected => {}
            SinkConnect::NoReaderYet => {
                self.frames_dropped += 1;
                return;
            }
            SinkConnect::Failed(err) => {
                warn!(path = %self.path.display(), error = %err, "listener pipe open failed");
                self.frames_dropped += 1;
                return;
            }
        }
        let Some(pipe) = self.pipe.as_mut() else {
            return;
        };
        match pipe.write_all(pcm) {
            Ok(()) => self.bytes_written += pcm.len() as u64,
            Err(err)
                if err.kind() == io::ErrorKind::BrokenPipe
                    || err.kind() == io::ErrorKind::WouldBlock =>
            {
                // Reader went away or stopped keeping up. Reset and let the
                // next delivery reconnect.
                debug!(path = %self.path.display(), "listener pipe reader lost, resetting");
                self.frames_dropped += 1;
                self.pipe = None;
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "listener pipe write failed");
                self.frames_dropped += 1;
                self.pipe = None;
            }
        }
    }

    /// Close the descriptor if open. Safe to call repeatedly.
    pub fn cleanup(&mut self) {
        if self.pipe.take().is_some() {
            info!(
                path = %self.path.display(),
                bytes_written = self.bytes_written,
                frames_dropped = self.frames_dropped,
                "listener sink detached"
            );
        }
    }
}

impl FrameSink for LazyConnectSink {
    fn deliver(&mut self, pcm: &[u8]) {
        LazyConnectSink::deliver(self, pcm);
    }

    fn cleanup(&mut self) {
        LazyConnectSink::cleanup(self);
    }
}

impl Drop for LazyConnectSink {
    fn drop(&mut self) {
        self.cleanup();
    }
}
