//! Fault-tolerant wrapper around the transport's per-packet decode step.
//!
//! One corrupted network packet must cost one silent frame, not the capture
//! path. The wrapper composes over the raw decode capability taken from the
//! transport and is put back in its place exactly once at controller spawn.

use anyhow::Result;
use tracing::{debug, warn};

/// Decode one inbound packet into raw s16le PCM.
///
/// Implementations are supplied by the transport; the bridge never looks
/// inside the codec. An empty frame means silence.
pub trait PacketDecode: Send {
    fn decode_packet(&mut self, packet: &[u8]) -> Result<Vec<u8>>;

    /// Whether this decoder already absorbs corrupt packets. Lets
    /// [`FaultTolerantDecoder::harden`] be a no-op on a second install.
    fn is_hardened(&self) -> bool {
        false
    }
}

/// Decorator that converts decode failures into silence.
pub struct FaultTolerantDecoder {
    inner: Box<dyn PacketDecode>,
    dropped: u64,
}

impl FaultTolerantDecoder {
    /// Wrap a raw decoder. Hardening an already-hardened decoder returns it
    /// unchanged, so installing twice cannot stack wrappers.
    pub fn harden(inner: Box<dyn PacketDecode>) -> Box<dyn PacketDecode> {
        if inner.is_hardened() {
            return inner;
        }
        debug!("fault tolerance applied to packet decoder");
        Box::new(Self { inner, dropped: 0 })
    }
}

impl PacketDecode for FaultTolerantDecoder {
    fn decode_packet(&mut self, packet: &[u8]) -> Result<Vec<u8>> {
        match self.inner.decode_packet(packet) {
            Ok(pcm) => Ok(pcm),
            Err(err) => {
                self.dropped += 1;
                // First drop is always worth a warning; after that, sample
                // so a corrupted stream cannot flood the log.
                if self.dropped == 1 || self.dropped % 50 == 0 {
                    warn!(dropped = self.dropped, error = %err, "dropped corrupted packet");
                }
                Ok(Vec::new())
            }
        }
    }

    fn is_hardened(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    /// Decoder that fails on odd-length packets and echoes the rest.
    struct FlakyDecoder;

    impl PacketDecode for FlakyDecoder {
        fn decode_packet(&mut self, packet: &[u8]) -> Result<Vec<u8>> {
            if packet.len() % 2 != 0 {
                return Err(anyhow!("malformed packet"));
            }
            Ok(packet.to_vec())
        }
    }

    #[test]
    fn valid_packets_pass_through_unchanged() {
        let mut decoder = FaultTolerantDecoder::harden(Box::new(FlakyDecoder));
        let frame = decoder.decode_packet(&[1, 2, 3, 4]).expect("decode");
        assert_eq!(frame, vec![1, 2, 3, 4]);
    }

    #[test]
    fn corrupt_packets_become_silence_not_errors() {
        let mut decoder = FaultTolerantDecoder::harden(Box::new(FlakyDecoder));
        for _ in 0..100 {
            let frame = decoder.decode_packet(&[0xFF]).expect("never raises");
            assert!(frame.is_empty());
        }
        // The decoder stays usable after a corrupted run.
        let frame = decoder.decode_packet(&[9, 9]).expect("decode");
        assert_eq!(frame, vec![9, 9]);
    }

    #[test]
    fn hardening_is_idempotent() {
        let once = FaultTolerantDecoder::harden(Box::new(FlakyDecoder));
        assert!(once.is_hardened());
        let mut twice = FaultTolerantDecoder::harden(once);
        assert!(twice.is_hardened());
        // Still absorbs corruption after the second (no-op) install.
        let frame = twice.decode_packet(&[0xFF]).expect("never raises");
        assert!(frame.is_empty());
    }
}
