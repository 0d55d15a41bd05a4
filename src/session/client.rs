use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::error::SessionError;
use super::events::SessionEvent;
use super::state::ConnectionState;
use super::stats::SessionStats;
use crate::audio::{spawn_capture, AudioFrame, AudioFrameEncoder, AudioInput, AudioOutput, AudioSampleSource};
use crate::heartbeat::HeartbeatMonitor;
use crate::timer::Scheduler;
use crate::transport::{
    ControlMessage, DuplexChannel, EphemeralCredential, InboundMessage, Negotiator, PeerConnector,
    PeerTransport,
};
use crate::watchdog::{InactivityStatus, InactivityWatchdog, WatchdogObserver};

/// External collaborators of a session client
#[derive(Clone)]
pub struct SessionDeps {
    pub connector: Arc<dyn PeerConnector>,
    pub negotiator: Arc<dyn Negotiator>,
    pub input: Arc<dyn AudioInput>,
    pub output: Arc<dyn AudioOutput>,
}

/// Client for one voice session at a time
///
/// Owns connection setup and teardown, the control channel, the microphone
/// uplink and remote audio playback, and composes a [`HeartbeatMonitor`] and
/// an [`InactivityWatchdog`]. Everything the application needs to react to
/// arrives on the event receiver returned by [`VoiceSessionClient::new`].
///
/// `send_text` and `send_audio_frame` return [`SessionError::NotConnected`]
/// outside the `connected` state.
pub struct VoiceSessionClient {
    config: SessionConfig,
    deps: SessionDeps,
    shared: Arc<ClientShared>,
}

struct ClientShared {
    state: Mutex<ClientState>,
    /// Serializes connect finalization against disconnect
    lifecycle: tokio::sync::Mutex<()>,
    counters: Counters,
    events: mpsc::UnboundedSender<SessionEvent>,
    heartbeat: HeartbeatMonitor,
    watchdog: InactivityWatchdog,
}

struct ClientState {
    connection: ConnectionState,
    /// Bumped by every connect attempt and every disconnect
    generation: u64,
    connection_id: Option<String>,
    connected_at: Option<DateTime<Utc>>,
    live: Option<LiveSession>,
}

/// Resources of an established connection
struct LiveSession {
    transport: Arc<dyn PeerTransport>,
    channel: Arc<dyn DuplexChannel>,
    tasks: Vec<AbortHandle>,
}

impl LiveSession {
    async fn shut_down(self) {
        for task in &self.tasks {
            task.abort();
        }
        self.channel.close().await;
        self.transport.close().await;
    }
}

/// Negotiated but not yet published connection
struct PendingSession {
    transport: Arc<dyn PeerTransport>,
    channel: Arc<dyn DuplexChannel>,
    source: Box<dyn AudioSampleSource>,
    encoder: AudioFrameEncoder,
}

#[derive(Default)]
struct Counters {
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    malformed_messages: AtomicU64,
}

impl Counters {
    fn reset(&self) {
        for counter in [
            &self.frames_sent,
            &self.frames_received,
            &self.messages_sent,
            &self.messages_received,
            &self.malformed_messages,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
    }
}

/// Forwards watchdog transitions onto the event stream
struct WatchdogEvents {
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl WatchdogObserver for WatchdogEvents {
    fn on_warning(&self) {
        let _ = self.events.send(SessionEvent::InactivityWarning);
    }

    fn on_countdown(&self, seconds_remaining: u32) {
        let _ = self.events.send(SessionEvent::Countdown { seconds_remaining });
    }

    fn on_timeout(&self) {
        let _ = self.events.send(SessionEvent::InactivityTimeout);
    }
}

impl ClientShared {
    fn emit(&self, event: SessionEvent) {
        // The application may have dropped its receiver; that is not our problem
        let _ = self.events.send(event);
    }

    fn transition(&self, state: &mut ClientState, next: ConnectionState) {
        if state.connection != next {
            debug!("Voice session {} -> {}", state.connection, next);
            state.connection = next;
            self.emit(SessionEvent::StateChanged { state: next });
        }
    }

    /// Feed the watchdog, unless this connection has been torn down meanwhile
    fn record_activity(&self, generation: u64) {
        let state = self.state.lock();
        if state.generation == generation && state.connection == ConnectionState::Connected {
            self.watchdog.record_activity();
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.state.lock().generation == generation
    }
}

impl VoiceSessionClient {
    pub fn new(
        config: SessionConfig,
        deps: SessionDeps,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::new();

        let watchdog = InactivityWatchdog::new(
            config.inactivity.clone(),
            scheduler,
            Arc::new(WatchdogEvents {
                events: events.clone(),
            }),
        );

        let shared = Arc::new(ClientShared {
            state: Mutex::new(ClientState {
                connection: ConnectionState::Disconnected,
                generation: 0,
                connection_id: None,
                connected_at: None,
                live: None,
            }),
            lifecycle: tokio::sync::Mutex::new(()),
            counters: Counters::default(),
            events,
            heartbeat: HeartbeatMonitor::new(config.heartbeat.clone(), scheduler),
            watchdog,
        });

        (
            Self {
                config,
                deps,
                shared,
            },
            events_rx,
        )
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.lock().connection
    }

    pub fn inactivity_status(&self) -> InactivityStatus {
        self.shared.watchdog.status()
    }

    pub fn connection_id(&self) -> Option<String> {
        self.shared.state.lock().connection_id.clone()
    }

    /// Establish the session using a single-use credential
    ///
    /// On success the session is `connected`, the heartbeat is running and
    /// the inactivity watchdog is armed. On failure the session is `failed`
    /// and the error says which step failed.
    pub async fn connect(&self, credential: EphemeralCredential) -> Result<(), SessionError> {
        let (generation, stale) = {
            let mut state = self.shared.state.lock();
            if !state.connection.can_connect() {
                return Err(SessionError::AlreadyActive(state.connection));
            }

            state.generation += 1;
            let connection_id = uuid::Uuid::new_v4().to_string();
            info!("Connecting voice session {}", connection_id);
            state.connection_id = Some(connection_id);
            state.connected_at = None;
            self.shared.counters.reset();
            self.shared.transition(&mut state, ConnectionState::Connecting);
            // A lost connection stays live until it is replaced or disconnected
            (state.generation, state.live.take())
        };

        if let Some(stale) = stale {
            debug!("Releasing transport of the previous connection");
            self.shared.heartbeat.stop();
            stale.shut_down().await;
        }

        let result = match self.establish(generation, credential).await {
            Ok(pending) => self.finalize(generation, pending).await,
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            let mut state = self.shared.state.lock();
            if state.generation == generation && state.connection == ConnectionState::Connecting {
                error!("Voice session failed to connect: {}", e);
                self.shared.transition(&mut state, ConnectionState::Failed);
            } else {
                debug!("Abandoned connect attempt ended: {}", e);
            }
        }

        result
    }

    /// Microphone, transport, data channel, offer/answer
    async fn establish(
        &self,
        generation: u64,
        credential: EphemeralCredential,
    ) -> Result<PendingSession, SessionError> {
        if credential.is_blank() {
            return Err(SessionError::CredentialMissing);
        }
        if credential.is_expired_at(Utc::now()) {
            return Err(SessionError::CredentialExpired);
        }

        let encoder = AudioFrameEncoder::new(self.config.encoder_config())
            .map_err(|e| SessionError::InvalidConfig(e.to_string()))?;

        let source = self.deps.input.open().await?;
        debug!("Microphone '{}' opened", self.deps.input.name());

        if !self.shared.is_current(generation) {
            return Err(SessionError::Aborted);
        }

        let transport = self.deps.connector.create().await?;

        match self.negotiate(generation, &transport, credential).await {
            Ok(channel) => Ok(PendingSession {
                transport,
                channel,
                source,
                encoder,
            }),
            Err(e) => {
                transport.close().await;
                Err(e)
            }
        }
    }

    async fn negotiate(
        &self,
        generation: u64,
        transport: &Arc<dyn PeerTransport>,
        credential: EphemeralCredential,
    ) -> Result<Arc<dyn DuplexChannel>, SessionError> {
        transport.add_audio_track().await?;
        let channel = transport
            .create_data_channel(&self.config.data_channel_label)
            .await?;

        let offer = transport.create_offer().await?;
        let answer = self.deps.negotiator.negotiate(&offer, &credential).await;
        drop(credential);
        let answer = answer?;

        if !self.shared.is_current(generation) {
            channel.close().await;
            return Err(SessionError::Aborted);
        }

        if let Err(e) = transport.apply_answer(answer).await {
            channel.close().await;
            return Err(e.into());
        }

        Ok(channel)
    }

    /// Publish the negotiated connection and start everything that runs
    /// alongside it
    async fn finalize(&self, generation: u64, pending: PendingSession) -> Result<(), SessionError> {
        let _lifecycle = self.shared.lifecycle.lock().await;

        let PendingSession {
            transport,
            channel,
            source,
            encoder,
        } = pending;

        let still_wanted = {
            let mut state = self.shared.state.lock();
            let wanted =
                state.generation == generation && state.connection == ConnectionState::Connecting;
            if wanted {
                state.connected_at = Some(Utc::now());
                self.shared.transition(&mut state, ConnectionState::Connected);
            }
            wanted
        };

        if !still_wanted {
            channel.close().await;
            transport.close().await;
            return Err(SessionError::Aborted);
        }

        let lost = Arc::downgrade(&self.shared);
        self.shared.heartbeat.start(
            Arc::clone(&channel),
            Arc::new(move || connection_lost(&lost, generation, false)),
        );
        self.shared.watchdog.record_activity();

        let mut tasks = vec![
            self.spawn_inbound(generation, Arc::clone(&channel)),
            self.spawn_playback(Arc::clone(&transport)),
        ];
        tasks.extend(self.spawn_uplink(generation, Arc::clone(&transport), source, encoder));

        let mut state = self.shared.state.lock();
        state.live = Some(LiveSession {
            transport,
            channel,
            tasks,
        });
        info!(
            "Voice session {} connected",
            state.connection_id.as_deref().unwrap_or("?")
        );
        Ok(())
    }

    fn spawn_inbound(&self, generation: u64, channel: Arc<dyn DuplexChannel>) -> AbortHandle {
        let shared = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            while let Some(text) = channel.recv().await {
                let Some(client) = shared.upgrade() else {
                    return;
                };
                client.counters.messages_received.fetch_add(1, Ordering::SeqCst);

                match InboundMessage::parse(&text) {
                    Ok(InboundMessage::Pong { .. }) => client.heartbeat.handle_pong(),
                    Ok(InboundMessage::AudioLevel { level }) => {
                        client.record_activity(generation);
                        client.emit(SessionEvent::AudioLevel { level });
                    }
                    Ok(message) => {
                        client.record_activity(generation);
                        client.emit(SessionEvent::Message { message });
                    }
                    Err(e) => {
                        warn!("Dropping malformed control message: {}", e);
                        client.counters.malformed_messages.fetch_add(1, Ordering::SeqCst);
                        client.emit(SessionEvent::MalformedMessage {
                            error: e.to_string(),
                        });
                    }
                }
            }

            debug!("Control channel '{}' closed", channel.label());
            connection_lost(&shared, generation, true);
        })
        .abort_handle()
    }

    fn spawn_playback(&self, transport: Arc<dyn PeerTransport>) -> AbortHandle {
        let output = Arc::clone(&self.deps.output);
        let shared = Arc::downgrade(&self.shared);
        let remote = transport.take_remote_audio();
        tokio::spawn(async move {
            let Some(mut remote) = remote else {
                debug!("Transport has no remote audio stream");
                return;
            };
            while let Some(frame) = remote.recv().await {
                if let Err(e) = output.play(&frame) {
                    warn!("Audio output failed: {}", e);
                }
                if let Some(client) = shared.upgrade() {
                    client.counters.frames_received.fetch_add(1, Ordering::SeqCst);
                }
            }
        })
        .abort_handle()
    }

    fn spawn_uplink(
        &self,
        generation: u64,
        transport: Arc<dyn PeerTransport>,
        source: Box<dyn AudioSampleSource>,
        encoder: AudioFrameEncoder,
    ) -> Vec<AbortHandle> {
        let (frame_tx, mut frame_rx) = mpsc::channel::<AudioFrame>(32);
        let capture = spawn_capture(source, encoder, frame_tx);

        let shared = Arc::downgrade(&self.shared);
        let threshold = self.config.voice_activity_threshold;
        let forward = tokio::spawn(async move {
            while let Some(frame) = frame_rx.recv().await {
                let Some(client) = shared.upgrade() else {
                    return;
                };
                match transport.send_audio(&frame).await {
                    Ok(()) => {
                        client.counters.frames_sent.fetch_add(1, Ordering::SeqCst);
                        if frame.peak() > threshold {
                            client.record_activity(generation);
                        }
                    }
                    Err(e) => warn!("Failed to send audio frame {}: {}", frame.sequence, e),
                }
            }
            debug!("Microphone uplink finished");
        });

        vec![capture.abort_handle(), forward.abort_handle()]
    }

    /// Send user text over the control channel
    pub async fn send_text(&self, text: &str) -> Result<(), SessionError> {
        let (generation, channel) = self.live_channel()?;
        let message = ControlMessage::Text {
            text: text.to_string(),
        };
        channel.send(message.to_json()?).await?;

        self.shared.counters.messages_sent.fetch_add(1, Ordering::SeqCst);
        self.shared.record_activity(generation);
        Ok(())
    }

    /// Send one encoded frame on the audio track
    pub async fn send_audio_frame(&self, frame: &AudioFrame) -> Result<(), SessionError> {
        let (generation, transport) = {
            let state = self.shared.state.lock();
            match (&state.connection, &state.live) {
                (ConnectionState::Connected, Some(live)) => {
                    (state.generation, Arc::clone(&live.transport))
                }
                _ => return Err(SessionError::NotConnected),
            }
        };
        transport.send_audio(frame).await?;

        self.shared.counters.frames_sent.fetch_add(1, Ordering::SeqCst);
        self.shared.record_activity(generation);
        Ok(())
    }

    fn live_channel(&self) -> Result<(u64, Arc<dyn DuplexChannel>), SessionError> {
        let state = self.shared.state.lock();
        match (&state.connection, &state.live) {
            (ConnectionState::Connected, Some(live)) => Ok((state.generation, Arc::clone(&live.channel))),
            _ => Err(SessionError::NotConnected),
        }
    }

    /// Tear the session down. Idempotent; safe from any state.
    ///
    /// All timers are cancelled before the transport is closed, and no
    /// connection-lost or timeout event is produced for this session once
    /// the call returns. A `connect()` still in flight returns
    /// [`SessionError::Aborted`].
    pub async fn disconnect(&self) {
        let _lifecycle = self.shared.lifecycle.lock().await;

        let live = {
            let mut state = self.shared.state.lock();
            state.generation += 1;
            state.connected_at = None;
            self.shared.transition(&mut state, ConnectionState::Disconnected);
            state.live.take()
        };

        self.shared.heartbeat.stop();
        self.shared.watchdog.stop_monitoring();

        if let Some(live) = live {
            live.shut_down().await;
            info!("Voice session disconnected");
        }
    }

    pub fn stats(&self) -> SessionStats {
        let (state, connection_id, connected_at) = {
            let state = self.shared.state.lock();
            (state.connection, state.connection_id.clone(), state.connected_at)
        };
        let counters = &self.shared.counters;

        SessionStats {
            state,
            connection_id,
            connected_at,
            duration_secs: connected_at
                .map(|at| Utc::now().signed_duration_since(at).num_milliseconds() as f64 / 1000.0)
                .unwrap_or(0.0),
            frames_sent: counters.frames_sent.load(Ordering::SeqCst),
            frames_received: counters.frames_received.load(Ordering::SeqCst),
            messages_sent: counters.messages_sent.load(Ordering::SeqCst),
            messages_received: counters.messages_received.load(Ordering::SeqCst),
            malformed_messages: counters.malformed_messages.load(Ordering::SeqCst),
            inactivity: self.shared.watchdog.status(),
            missed_pongs: self.shared.heartbeat.snapshot().missed_pongs,
        }
    }
}

/// Move a live connection to `failed` and report it once
///
/// `stop_heartbeat` is false when called from the heartbeat itself, which has
/// already stopped and still holds its own lock.
fn connection_lost(shared: &Weak<ClientShared>, generation: u64, stop_heartbeat: bool) {
    let Some(client) = shared.upgrade() else {
        return;
    };

    {
        let mut state = client.state.lock();
        if state.generation != generation || state.connection != ConnectionState::Connected {
            return;
        }
        warn!("Voice session connection lost");
        client.transition(&mut state, ConnectionState::Failed);
        client.emit(SessionEvent::ConnectionLost);
        client.watchdog.stop_monitoring();
    }

    if stop_heartbeat {
        client.heartbeat.stop();
    }
}
