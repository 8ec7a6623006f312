//! Named pipe (FIFO) lifecycle and open helpers.
//!
//! Two pipes bridge the session to the outside world: external producers
//! write outbound audio into the speaker pipe, and external consumers read
//! captured audio from the listener pipe. Both are recreated from scratch
//! on every controller initialization so no stale pipe state survives a
//! restart.

use crate::error::BridgeError;
use std::ffi::CString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Owns the two FIFO paths and their filesystem lifecycle.
#[derive(Debug, Clone)]
pub struct PipeManager {
    speaker_path: PathBuf,
    listener_path: PathBuf,
}

impl PipeManager {
    pub fn new(speaker_path: PathBuf, listener_path: PathBuf) -> Self {
        Self {
            speaker_path,
            listener_path,
        }
    }

    /// Pipe external producers write outbound audio into.
    pub fn speaker_path(&self) -> &Path {
        &self.speaker_path
    }

    /// Pipe external consumers read captured audio from.
    pub fn listener_path(&self) -> &Path {
        &self.listener_path
    }

    /// Unlink and recreate both FIFOs. Failure here is fatal to startup.
    pub fn create_pipes(&self) -> Result<(), BridgeError> {
        for path in [&self.speaker_path, &self.listener_path] {
            if path.exists() {
                fs::remove_file(path).map_err(BridgeError::Resource)?;
            }
            mkfifo(path).map_err(BridgeError::Resource)?;
            debug!(path = %path.display(), "FIFO created");
        }
        Ok(())
    }

    /// Blocking write handle on the speaker pipe. Standard FIFO semantics:
    /// the open blocks until the session side has attached its reader.
    pub fn open_speaker_writer(&self) -> io::Result<File> {
        OpenOptions::new().write(true).open(&self.speaker_path)
    }

    /// Non-blocking write handle on the speaker pipe. Fails with `ENXIO`
    /// while no reader is attached.
    pub fn open_speaker_writer_nonblocking(&self) -> io::Result<File> {
        open_writer_nonblocking(&self.speaker_path)
    }

    /// Blocking read handle on the listener pipe.
    pub fn open_listener_reader(&self) -> io::Result<File> {
        OpenOptions::new().read(true).open(&self.listener_path)
    }

    /// Non-blocking read handle on the listener pipe.
    pub fn open_listener_reader_nonblocking(&self) -> io::Result<File> {
        open_reader_nonblocking(&self.listener_path)
    }
}

pub(crate) fn mkfifo(path: &Path) -> io::Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pipe path contains NUL"))?;
    // 0o644: single writer, world-readable, same as a plain capture file.
    if unsafe { libc::mkfifo(c_path.as_ptr(), 0o644) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Open the read side without blocking. Succeeds even when no writer has
/// attached yet; reads then report no data until one does.
pub(crate) fn open_reader_nonblocking(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
}

/// Open the write side without blocking. FIFO semantics make this fail
/// with `ENXIO` while the far end has no reader.
pub(crate) fn open_writer_nonblocking(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::FileTypeExt;

    fn scratch_pipes(dir: &tempfile::TempDir) -> PipeManager {
        PipeManager::new(
            dir.path().join("speaker.pcm"),
            dir.path().join("listener.pcm"),
        )
    }

    #[test]
    fn create_pipes_makes_two_fifos() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipes = scratch_pipes(&dir);
        pipes.create_pipes().expect("create pipes");
        for path in [pipes.speaker_path(), pipes.listener_path()] {
            let meta = fs::metadata(path).expect("pipe metadata");
            assert!(meta.file_type().is_fifo(), "{} is not a FIFO", path.display());
        }
    }

    #[test]
    fn create_pipes_replaces_stale_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipes = scratch_pipes(&dir);
        // A regular file left over from a crashed run must not survive.
        fs::write(pipes.speaker_path(), b"stale").expect("write stale file");
        pipes.create_pipes().expect("create pipes over stale entry");
        let meta = fs::metadata(pipes.speaker_path()).expect("pipe metadata");
        assert!(meta.file_type().is_fifo());
    }

    #[test]
    fn create_pipes_is_repeatable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipes = scratch_pipes(&dir);
        pipes.create_pipes().expect("first create");
        pipes.create_pipes().expect("second create");
    }

    #[test]
    fn create_pipes_fails_in_missing_directory() {
        let pipes = PipeManager::new(
            PathBuf::from("/nonexistent-voicebridge-dir/speaker.pcm"),
            PathBuf::from("/nonexistent-voicebridge-dir/listener.pcm"),
        );
        match pipes.create_pipes() {
            Err(BridgeError::Resource(_)) => {}
            other => panic!("expected resource error, got {other:?}"),
        }
    }

    #[test]
    fn nonblocking_reader_open_succeeds_without_writer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipes = scratch_pipes(&dir);
        pipes.create_pipes().expect("create pipes");
        pipes
            .open_listener_reader_nonblocking()
            .expect("non-blocking reader open");
    }

    #[test]
    fn nonblocking_writer_open_reports_no_reader() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipes = scratch_pipes(&dir);
        pipes.create_pipes().expect("create pipes");
        let err = pipes
            .open_speaker_writer_nonblocking()
            .expect_err("writer open must fail without a reader");
        assert_eq!(err.raw_os_error(), Some(libc::ENXIO));
    }
}
