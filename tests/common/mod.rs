// In-memory fakes for the transport, negotiation and audio seams
//
// Everything here is driven by the test: inbound messages are injected with
// `deliver`, outbound traffic is recorded, and slow steps can be held open
// with a `Notify` gate.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Notify};
use voicelink::audio::{AudioFrame, AudioInput, AudioInputError, AudioOutput, AudioSampleSource};
use voicelink::transport::{
    DuplexChannel, EphemeralCredential, NegotiationError, Negotiator, PeerConnector, PeerTransport,
    SessionDescription, TransportError,
};

// ============================================================================
// Control channel
// ============================================================================

pub struct FakeChannel {
    label: String,
    open: AtomicBool,
    fail_sends: AtomicBool,
    sent: Mutex<Vec<String>>,
    inbound_tx: mpsc::UnboundedSender<String>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    closed_tx: watch::Sender<bool>,
}

impl FakeChannel {
    pub fn new(label: &str) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (closed_tx, _) = watch::channel(false);
        Arc::new(Self {
            label: label.to_string(),
            open: AtomicBool::new(true),
            fail_sends: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            closed_tx,
        })
    }

    /// Inject a message from the remote side
    pub fn deliver(&self, text: &str) {
        let _ = self.inbound_tx.send(text.to_string());
    }

    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn sent_of_type(&self, kind: &str) -> usize {
        self.sent()
            .iter()
            .filter_map(|text| serde_json::from_str::<serde_json::Value>(text).ok())
            .filter(|value| value["type"] == kind)
            .count()
    }

    pub fn pings_sent(&self) -> usize {
        self.sent_of_type("ping")
    }

    /// Remote side hangs up
    pub fn close_remote(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.closed_tx.send_replace(true);
    }
}

#[async_trait]
impl DuplexChannel for FakeChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send(&self, text: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Send("simulated failure".to_string()));
        }
        self.sent.lock().push(text);
        Ok(())
    }

    async fn recv(&self) -> Option<String> {
        let mut closed = self.closed_tx.subscribe();
        if *closed.borrow() {
            return None;
        }
        let mut rx = self.inbound_rx.lock().await;
        tokio::select! {
            msg = rx.recv() => msg,
            _ = closed.changed() => None,
        }
    }

    async fn close(&self) {
        self.close_remote();
    }
}

// ============================================================================
// Peer transport
// ============================================================================

pub struct FakeTransport {
    pub channel: Arc<FakeChannel>,
    audio_track: AtomicBool,
    answered: AtomicBool,
    closed: AtomicBool,
    audio_sent: Mutex<Vec<AudioFrame>>,
    remote_tx: mpsc::Sender<AudioFrame>,
    remote_rx: Mutex<Option<mpsc::Receiver<AudioFrame>>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        let (remote_tx, remote_rx) = mpsc::channel(64);
        Arc::new(Self {
            channel: FakeChannel::new("control"),
            audio_track: AtomicBool::new(false),
            answered: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            audio_sent: Mutex::new(Vec::new()),
            remote_tx,
            remote_rx: Mutex::new(Some(remote_rx)),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn has_audio_track(&self) -> bool {
        self.audio_track.load(Ordering::SeqCst)
    }

    pub fn is_answered(&self) -> bool {
        self.answered.load(Ordering::SeqCst)
    }

    pub fn audio_sent(&self) -> Vec<AudioFrame> {
        self.audio_sent.lock().clone()
    }

    /// Push a frame of remote audio towards the client
    pub async fn play_remote(&self, frame: AudioFrame) {
        let _ = self.remote_tx.send(frame).await;
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn add_audio_track(&self) -> Result<(), TransportError> {
        self.audio_track.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn create_data_channel(&self, _label: &str) -> Result<Arc<dyn DuplexChannel>, TransportError> {
        Ok(self.channel.clone())
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        Ok(SessionDescription::offer("fake-offer"))
    }

    async fn apply_answer(&self, _answer: SessionDescription) -> Result<(), TransportError> {
        self.answered.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send_audio(&self, frame: &AudioFrame) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.audio_sent.lock().push(frame.clone());
        Ok(())
    }

    fn take_remote_audio(&self) -> Option<mpsc::Receiver<AudioFrame>> {
        self.remote_rx.lock().take()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.channel.close_remote();
    }
}

pub struct FakeConnector {
    pub transport: Arc<FakeTransport>,
    /// Handed out by later `create` calls, in order
    later: Mutex<VecDeque<Arc<FakeTransport>>>,
    pub created: AtomicUsize,
}

impl FakeConnector {
    pub fn new(transport: Arc<FakeTransport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            later: Mutex::new(VecDeque::new()),
            created: AtomicUsize::new(0),
        })
    }

    /// Queue a transport for the next connect after the first
    pub fn then(&self, transport: Arc<FakeTransport>) {
        self.later.lock().push_back(transport);
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn create(&self) -> Result<Arc<dyn PeerTransport>, TransportError> {
        let previous = self.created.fetch_add(1, Ordering::SeqCst);
        if previous > 0 {
            if let Some(next) = self.later.lock().pop_front() {
                return Ok(next);
            }
        }
        Ok(self.transport.clone())
    }
}

// ============================================================================
// Negotiation
// ============================================================================

pub enum NegotiationOutcome {
    Answer,
    Reject(u16),
    Status(u16),
    Network,
}

pub struct FakeNegotiator {
    outcome: NegotiationOutcome,
    /// When set, `negotiate` waits here until the test releases it
    gate: Option<Arc<Notify>>,
    pub calls: AtomicUsize,
    pub last_credential: Mutex<Option<String>>,
}

impl FakeNegotiator {
    pub fn new(outcome: NegotiationOutcome) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            gate: None,
            calls: AtomicUsize::new(0),
            last_credential: Mutex::new(None),
        })
    }

    pub fn gated(gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            outcome: NegotiationOutcome::Answer,
            gate: Some(gate),
            calls: AtomicUsize::new(0),
            last_credential: Mutex::new(None),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Negotiator for FakeNegotiator {
    async fn negotiate(
        &self,
        _offer: &SessionDescription,
        credential: &EphemeralCredential,
    ) -> Result<SessionDescription, NegotiationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_credential.lock() = Some(credential.expose().to_string());

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        match self.outcome {
            NegotiationOutcome::Answer => Ok(SessionDescription::answer("fake-answer")),
            NegotiationOutcome::Reject(status) => Err(NegotiationError::from_status(status, "denied".into())),
            NegotiationOutcome::Status(status) => Err(NegotiationError::from_status(status, "upstream".into())),
            NegotiationOutcome::Network => Err(NegotiationError::Network("connection refused".into())),
        }
    }
}

// ============================================================================
// Audio
// ============================================================================

/// Microphone yielding fixed chunks, then ending
pub struct FakeInput {
    deny: bool,
    chunks: Vec<Vec<f32>>,
    pub opened: AtomicUsize,
}

impl FakeInput {
    pub fn with_chunks(chunks: Vec<Vec<f32>>) -> Arc<Self> {
        Arc::new(Self {
            deny: false,
            chunks,
            opened: AtomicUsize::new(0),
        })
    }

    pub fn silent() -> Arc<Self> {
        Self::with_chunks(Vec::new())
    }

    pub fn denied() -> Arc<Self> {
        Arc::new(Self {
            deny: true,
            chunks: Vec::new(),
            opened: AtomicUsize::new(0),
        })
    }
}

pub struct ChunkSource {
    chunks: std::vec::IntoIter<Vec<f32>>,
    sample_rate: u32,
}

impl ChunkSource {
    pub fn new(chunks: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        Self {
            chunks: chunks.into_iter(),
            sample_rate,
        }
    }
}

#[async_trait]
impl AudioSampleSource for ChunkSource {
    async fn next_chunk(&mut self) -> Option<Vec<f32>> {
        self.chunks.next()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[async_trait]
impl AudioInput for FakeInput {
    async fn open(&self) -> Result<Box<dyn AudioSampleSource>, AudioInputError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        if self.deny {
            return Err(AudioInputError::PermissionDenied("user dismissed prompt".into()));
        }
        Ok(Box::new(ChunkSource::new(self.chunks.clone(), 24000)))
    }

    fn name(&self) -> &str {
        "fake-mic"
    }
}

/// Output device that keeps what it was given
#[derive(Default)]
pub struct CollectingOutput {
    pub frames: Mutex<Vec<AudioFrame>>,
}

impl AudioOutput for CollectingOutput {
    fn play(&self, frame: &AudioFrame) -> anyhow::Result<()> {
        self.frames.lock().push(frame.clone());
        Ok(())
    }
}

/// Let spawned tasks run without moving the (paused) clock
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Yield until `condition` holds, without moving the clock
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..1000 {
        if condition() {
            return true;
        }
        tokio::task::yield_now().await;
    }
    condition()
}
