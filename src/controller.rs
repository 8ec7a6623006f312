//! Cross-thread session controller.
//!
//! Exactly one background thread per process owns the voice transport and
//! runs its event loop. Foreground callers never touch session state: they
//! enqueue a typed request with a reply slot and block on the slot with a
//! timeout. The loop executes requests strictly in submission order and
//! pumps transport I/O between them.

use crate::decode::FaultTolerantDecoder;
use crate::error::BridgeError;
use crate::pipes::PipeManager;
use crate::playback::HeartbeatSource;
use crate::sink::LazyConnectSink;
use crate::transport::{CallId, ChannelId, VoiceTransport};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

static INSTANCE: OnceLock<Arc<SessionController>> = OnceLock::new();
static CREATE_LOCK: Mutex<()> = Mutex::new(());

/// Tuning knobs for the controller, derived from [`crate::config::BridgeConfig`].
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub token: String,
    pub startup_timeout: Duration,
    pub request_timeout: Duration,
    /// Event-loop tick between transport pumps while idle on requests.
    pub pump_interval: Duration,
}

/// Requests the foreground submits to the background loop.
enum Request {
    Connect {
        channel: ChannelId,
        reply: Sender<Result<(), BridgeError>>,
    },
    Disconnect {
        reply: Sender<Result<(), BridgeError>>,
    },
    Shutdown {
        reply: Sender<()>,
    },
}

/// Thread-safe handle to the background voice session.
#[derive(Debug)]
pub struct SessionController {
    requests: Sender<Request>,
    request_timeout: Duration,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl SessionController {
    /// Return the process-wide controller, creating it on first call.
    ///
    /// Construction blocks until the session authenticates or the startup
    /// timeout elapses. Policy: once the instance exists, later calls get
    /// it back untouched; their `settings`, `pipes`, and factory are
    /// ignored, so callers must not assume per-call config takes effect
    /// after the first.
    pub fn get_or_create<F>(
        settings: ControllerSettings,
        pipes: PipeManager,
        transport_factory: F,
    ) -> Result<Arc<Self>, BridgeError>
    where
        F: FnOnce() -> Box<dyn VoiceTransport>,
    {
        if let Some(existing) = INSTANCE.get() {
            return Ok(Arc::clone(existing));
        }
        let _guard = CREATE_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = INSTANCE.get() {
            return Ok(Arc::clone(existing));
        }
        let controller = Arc::new(Self::spawn(settings, pipes, transport_factory())?);
        let _ = INSTANCE.set(Arc::clone(&controller));
        Ok(controller)
    }

    /// Create a detached (non-singleton) controller.
    ///
    /// `get_or_create` is the normal entry point; this exists so embedders
    /// and tests can run a controller per scratch pipe pair.
    pub fn spawn(
        settings: ControllerSettings,
        pipes: PipeManager,
        transport: Box<dyn VoiceTransport>,
    ) -> Result<Self, BridgeError> {
        // No stale pipe state survives a controller initialization.
        pipes.create_pipes()?;

        let (request_tx, request_rx) = bounded::<Request>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);
        let loop_settings = settings.clone();
        let handle = thread::Builder::new()
            .name("voicebridge-session".into())
            .spawn(move || {
                EventLoop::new(transport, pipes, loop_settings, request_rx, ready_tx).run();
            })
            .map_err(BridgeError::Resource)?;

        match ready_rx.recv_timeout(settings.startup_timeout) {
            Ok(Ok(())) => {
                info!("session authenticated, controller ready");
                Ok(Self {
                    requests: request_tx,
                    request_timeout: settings.request_timeout,
                    thread: Mutex::new(Some(handle)),
                })
            }
            Ok(Err(reason)) => Err(BridgeError::AuthFailed(reason)),
            Err(_) => Err(BridgeError::StartupTimeout {
                waited_ms: settings.startup_timeout.as_millis() as u64,
            }),
        }
    }

    /// Join the given channel and stand up both audio paths.
    ///
    /// Fails with `AlreadyConnected` while another connection is active;
    /// disconnect first, reconnect policy is never implicit.
    pub fn connect(&self, channel: ChannelId) -> Result<(), BridgeError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.submit(
            Request::Connect {
                channel,
                reply: reply_tx,
            },
            reply_rx,
            "connect",
        )?
    }

    /// Tear down the active connection. A no-op when none is active.
    pub fn disconnect(&self) -> Result<(), BridgeError> {
        self.disconnect_within(self.request_timeout)
    }

    pub(crate) fn disconnect_within(&self, timeout: Duration) -> Result<(), BridgeError> {
        let (reply_tx, reply_rx) = bounded(1);
        if self
            .requests
            .send(Request::Disconnect { reply: reply_tx })
            .is_err()
        {
            return Err(BridgeError::ControllerClosed);
        }
        match reply_rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(_) => Err(BridgeError::RequestTimeout("disconnect")),
        }
    }

    /// Stop the event loop, tearing down any active connection first.
    /// Best-effort: a loop that outlives the grace period is logged and
    /// left to finish on its own.
    pub fn shutdown(&self, grace: Duration) {
        let (reply_tx, reply_rx) = bounded(1);
        if self
            .requests
            .send(Request::Shutdown { reply: reply_tx })
            .is_err()
        {
            // Loop already gone.
            self.join_thread();
            return;
        }
        if reply_rx.recv_timeout(grace).is_err() {
            warn!(grace_ms = grace.as_millis() as u64, "shutdown grace period elapsed");
            return;
        }
        self.join_thread();
    }

    fn submit<T>(
        &self,
        request: Request,
        reply_rx: Receiver<T>,
        op: &'static str,
    ) -> Result<T, BridgeError> {
        if self.requests.send(request).is_err() {
            return Err(BridgeError::ControllerClosed);
        }
        match reply_rx.recv_timeout(self.request_timeout) {
            Ok(result) => Ok(result),
            // The loop may still complete the request after this; state
            // stays consistent because only the loop mutates it.
            Err(_) => Err(BridgeError::RequestTimeout(op)),
        }
    }

    fn join_thread(&self) {
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

// ============================================================================
// Background event loop
// ============================================================================

struct ActiveConnection {
    call: CallId,
    channel: ChannelId,
}

struct EventLoop {
    transport: Box<dyn VoiceTransport>,
    pipes: PipeManager,
    settings: ControllerSettings,
    requests: Receiver<Request>,
    ready: Sender<Result<(), String>>,
    active: Option<ActiveConnection>,
}

impl EventLoop {
    fn new(
        transport: Box<dyn VoiceTransport>,
        pipes: PipeManager,
        settings: ControllerSettings,
        requests: Receiver<Request>,
        ready: Sender<Result<(), String>>,
    ) -> Self {
        Self {
            transport,
            pipes,
            settings,
            requests,
            ready,
            active: None,
        }
    }

    fn run(mut self) {
        // Harden the decode path before any packet can arrive. The wrapper
        // refuses to stack, so this holds even if a transport comes in
        // pre-hardened.
        let raw = self.transport.take_raw_decoder();
        self.transport.set_decoder(FaultTolerantDecoder::harden(raw));

        if let Err(err) = self.transport.authenticate(&self.settings.token) {
            error!(error = %err, "session authentication failed");
            let _ = self.ready.send(Err(format!("{err:#}")));
            return;
        }
        let _ = self.ready.send(Ok(()));

        loop {
            match self.requests.recv_timeout(self.settings.pump_interval) {
                Ok(Request::Connect { channel, reply }) => {
                    let result = self.handle_connect(channel);
                    let _ = reply.send(result);
                }
                Ok(Request::Disconnect { reply }) => {
                    let result = self.handle_disconnect();
                    let _ = reply.send(result);
                }
                Ok(Request::Shutdown { reply }) => {
                    if self.active.is_some() {
                        let _ = self.handle_disconnect();
                    }
                    debug!("session loop shutting down");
                    let _ = reply.send(());
                    return;
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.active.is_some() {
                        if let Err(err) = self.transport.pump() {
                            warn!(error = %err, "transport pump failed");
                        }
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    // Every controller handle dropped; tear down and exit.
                    if self.active.is_some() {
                        let _ = self.handle_disconnect();
                    }
                    return;
                }
            }
        }
    }

    fn handle_connect(&mut self, channel: ChannelId) -> Result<(), BridgeError> {
        if self.active.is_some() {
            return Err(BridgeError::AlreadyConnected);
        }
        let call = self.transport.connect(channel)?;

        // Speaker path: silence heartbeat + speaker pipe.
        let source = match HeartbeatSource::open(self.pipes.speaker_path()) {
            Ok(source) => source,
            Err(err) => {
                self.abandon_call(call);
                return Err(BridgeError::ConnectFailed(format!(
                    "speaker pipe open failed: {err}"
                )));
            }
        };
        if let Err(err) = self.transport.play(call, Box::new(source)) {
            self.abandon_call(call);
            return Err(BridgeError::ConnectFailed(format!("{err:#}")));
        }

        // Listener path: lazily connected capture sink.
        let sink = LazyConnectSink::new(self.pipes.listener_path().to_path_buf());
        if let Err(err) = self.transport.listen(call, Box::new(sink)) {
            self.transport.stop(call);
            self.abandon_call(call);
            return Err(BridgeError::ConnectFailed(format!("{err:#}")));
        }

        info!(channel, "voice connection established");
        self.active = Some(ActiveConnection { call, channel });
        Ok(())
    }

    /// Teardown in the required order: stop playback, detach the capture
    /// sink, then close the binding. Idempotent and best-effort; teardown
    /// must always complete.
    fn handle_disconnect(&mut self) -> Result<(), BridgeError> {
        let Some(active) = self.active.take() else {
            return Ok(());
        };
        self.transport.stop(active.call);
        self.transport.detach(active.call);
        if let Err(err) = self.transport.disconnect(active.call) {
            warn!(channel = active.channel, error = %err, "transport disconnect failed");
        } else {
            info!(channel = active.channel, "voice connection closed");
        }
        Ok(())
    }

    fn abandon_call(&mut self, call: CallId) {
        if let Err(err) = self.transport.disconnect(call) {
            warn!(error = %err, "cleanup disconnect failed");
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        // Dropping the sender disconnects the loop, which tears down any
        // active call on its way out. The singleton instance lives in a
        // static and only drops at process exit.
        let (reply_tx, _reply_rx) = bounded(1);
        let _ = self.requests.send(Request::Shutdown { reply: reply_tx });
        self.join_thread();
    }
}
