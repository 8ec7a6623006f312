use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::{self, BufRead};
use voicebridge::protocol::{emit, LifecycleEvent};
use voicebridge::transport::LoopbackTransport;
use voicebridge::{init_tracing, AudioBridge, BridgeConfig};

fn main() {
    let config = BridgeConfig::parse();
    if let Err(err) = run(config) {
        emit(&LifecycleEvent::Error {
            message: format!("{err:#}"),
        });
        eprintln!("voicebridge: {err:#}");
        std::process::exit(1);
    }
}

fn run(config: BridgeConfig) -> Result<()> {
    config.validate()?;
    init_tracing();

    if !config.loopback {
        // The wire protocol lives outside this crate; embedders supply a
        // real VoiceTransport through AudioBridge::with_transport.
        bail!("no built-in network transport; run with --loopback or embed voicebridge as a library");
    }

    let channel = config.channel.unwrap_or(1);
    let transport = LoopbackTransport::new(vec![channel]).with_echo();

    let bridge =
        AudioBridge::with_transport(&config, Box::new(transport)).context("bridge startup")?;
    emit(&LifecycleEvent::Ready {
        speaker_pipe: config.speaker_pipe.display().to_string(),
        listener_pipe: config.listener_pipe.display().to_string(),
    });

    bridge.connect(channel).context("connect")?;
    emit(&LifecycleEvent::Connected { channel });

    // Run until the supervising process closes stdin or says quit. A read
    // error counts as a closed stdin; looping on it would spin forever.
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        match line.trim() {
            "quit" | "exit" => break,
            _ => {}
        }
    }

    bridge.close();
    emit(&LifecycleEvent::Disconnected);
    bridge.shutdown();
    Ok(())
}
