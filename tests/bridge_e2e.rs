//! End-to-end façade test over the loopback transport and real FIFOs.
//!
//! Uses the process-wide controller, so everything runs in one test
//! function (this file gets its own process; the singleton cannot be
//! rebuilt).

use std::io::{Read, Write};
use std::time::{Duration, Instant};
use voicebridge::playback::FRAME_BYTES;
use voicebridge::transport::{loopback_packet, LoopbackTransport};
use voicebridge::{AudioBridge, BridgeConfig};

const CHANNEL: u64 = 42;

fn test_config(dir: &tempfile::TempDir) -> BridgeConfig {
    use clap::Parser;
    BridgeConfig::parse_from([
        "voicebridge",
        "--loopback",
        "--speaker-pipe",
        dir.path().join("speaker.pcm").to_str().unwrap(),
        "--listener-pipe",
        dir.path().join("listener.pcm").to_str().unwrap(),
        "--startup-timeout-ms",
        "2000",
        "--request-timeout-ms",
        "2000",
        "--close-grace-ms",
        "2000",
        "--pump-interval-ms",
        "2",
    ])
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    done()
}

#[test]
fn bridge_end_to_end() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(&dir);
    config.validate().expect("config valid");

    let transport = LoopbackTransport::new(vec![CHANNEL]);
    let handle = transport.handle();
    let bridge = AudioBridge::with_transport(&config, Box::new(transport)).expect("bridge up");

    bridge.connect(CHANNEL).expect("connect");

    // ---- Listener path: corruption degrades to silence, order holds ----
    // Attach the consumer before feeding packets so nothing is dropped.
    let mut listener = bridge
        .pipes()
        .open_listener_reader_nonblocking()
        .expect("listener reader");

    let mut expected = Vec::new();
    for _ in 0..100 {
        handle.push_packet(vec![0xFF]); // corrupt: decodes to silence
    }
    for i in 0..100u16 {
        let pcm = [i.to_le_bytes(), (i ^ 0xA5A5).to_le_bytes()].concat();
        expected.extend_from_slice(&pcm);
        handle.push_packet(loopback_packet(&pcm));
    }

    let mut captured = Vec::new();
    let all_read = wait_until(Duration::from_secs(3), || {
        let mut buf = [0u8; 4096];
        match listener.read(&mut buf) {
            Ok(n) => captured.extend_from_slice(&buf[..n]),
            Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(err) => panic!("listener read failed: {err}"),
        }
        captured.len() >= expected.len()
    });
    assert!(all_read, "listener pipe never produced the decoded frames");
    assert_eq!(
        captured, expected,
        "valid frames must arrive byte-for-byte in delivery order, corrupt ones as silence"
    );
    assert!(handle.inbound_drained());

    // ---- Speaker path: 4 seconds of silence mixed with the heartbeat ----
    let mut speaker = bridge.speaker().expect("speaker writer");
    let silent = vec![0u8; FRAME_BYTES];
    for _ in 0..200 {
        // 200 * 20ms = 4s
        speaker.write_all(&silent).expect("write silent buffer");
    }

    // A recognizable tone rides on top of the heartbeat and must surface
    // in the transport's pulled frames, in order.
    let tone = vec![0x07u8; 2 * FRAME_BYTES];
    speaker.write_all(&tone).expect("write tone");
    drop(speaker);

    let tone_delivered = wait_until(Duration::from_secs(8), || {
        let nonzero: usize = handle
            .outbound_frames()
            .iter()
            .flatten()
            .filter(|&&b| b != 0)
            .count();
        nonzero >= tone.len()
    });
    let nonzero: Vec<u8> = handle
        .outbound_frames()
        .iter()
        .flatten()
        .copied()
        .filter(|&b| b != 0)
        .collect();
    assert!(tone_delivered, "tone never surfaced in playback frames");
    assert_eq!(nonzero, tone, "playback must deliver the tone mixed over silence");

    // ---- Reconnect policy through the façade ----
    assert!(matches!(
        bridge.connect(CHANNEL),
        Err(voicebridge::BridgeError::AlreadyConnected)
    ));
    bridge.disconnect().expect("disconnect");
    bridge.disconnect().expect("disconnect is idempotent");
    bridge.connect(CHANNEL).expect("reconnect");

    bridge.close();
    bridge.shutdown();
}
