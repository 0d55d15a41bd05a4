// NATS relay transport
//
// A media relay bridges NATS subjects to the speech model. Each session gets
// its own subject namespace:
//   voice.<session>.<label>.up / .down   data channels (JSON text)
//   voice.<session>.audio.up / .down     PCM16 frames (AudioFrameMessage)
// The offer announces the namespace; the relay's answer echoes the session id.

use async_nats::{Client, Subscriber};
use async_trait::async_trait;
use futures::stream::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::messages::AudioFrameMessage;
use super::{DuplexChannel, PeerConnector, PeerTransport, SdpKind, SessionDescription, TransportError};
use crate::audio::AudioFrame;

/// Creates one [`NatsPeer`] (and one NATS connection) per session
#[derive(Debug, Clone)]
pub struct NatsConnector {
    url: String,
}

impl NatsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl PeerConnector for NatsConnector {
    async fn create(&self) -> Result<Arc<dyn PeerTransport>, TransportError> {
        info!("Connecting to NATS relay at {}", self.url);

        let client = async_nats::connect(&self.url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let peer = NatsPeer::new(client, uuid::Uuid::new_v4().to_string());
        info!("Relay transport created for session {}", peer.session_id());
        Ok(Arc::new(peer))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RelayOffer {
    session_id: String,
    codec: String,
    audio: bool,
    channels: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RelayAnswer {
    session_id: String,
    #[serde(default)]
    sample_rate: Option<u32>,
}

fn channel_subject(session_id: &str, label: &str, direction: &str) -> String {
    format!("voice.{}.{}.{}", session_id, label, direction)
}

pub struct NatsPeer {
    client: Client,
    session_id: String,
    audio_track: AtomicBool,
    negotiated: AtomicBool,
    closed: AtomicBool,
    channels: Mutex<Vec<Arc<NatsDataChannel>>>,
    remote_audio_tx: Mutex<Option<mpsc::Sender<AudioFrame>>>,
    remote_audio_rx: Mutex<Option<mpsc::Receiver<AudioFrame>>>,
    remote_audio_task: Mutex<Option<JoinHandle<()>>>,
}

impl NatsPeer {
    pub fn new(client: Client, session_id: String) -> Self {
        let (tx, rx) = mpsc::channel(100);
        Self {
            client,
            session_id,
            audio_track: AtomicBool::new(false),
            negotiated: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            channels: Mutex::new(Vec::new()),
            remote_audio_tx: Mutex::new(Some(tx)),
            remote_audio_rx: Mutex::new(Some(rx)),
            remote_audio_task: Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn audio_subject(&self, direction: &str) -> String {
        channel_subject(&self.session_id, "audio", direction)
    }
}

#[async_trait]
impl PeerTransport for NatsPeer {
    async fn add_audio_track(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.audio_track.store(true, Ordering::SeqCst);
        debug!("Audio track attached ({})", self.audio_subject("up"));
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DuplexChannel>, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if label == "audio" {
            return Err(TransportError::Connect(
                "`audio` is reserved for the media subjects".to_string(),
            ));
        }

        // Subscribe before the offer goes out so nothing sent right after
        // negotiation is lost
        let inbound = channel_subject(&self.session_id, label, "down");
        let subscriber = self
            .client
            .subscribe(inbound.clone())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let channel = Arc::new(NatsDataChannel::new(
            label.to_string(),
            self.client.clone(),
            channel_subject(&self.session_id, label, "up"),
            subscriber,
        ));
        self.channels.lock().push(Arc::clone(&channel));

        debug!("Data channel '{}' listening on {}", label, inbound);
        Ok(channel)
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        let offer = RelayOffer {
            session_id: self.session_id.clone(),
            codec: "pcm16".to_string(),
            audio: self.audio_track.load(Ordering::SeqCst),
            channels: self
                .channels
                .lock()
                .iter()
                .map(|c| c.label.clone())
                .collect(),
        };

        let sdp = serde_json::to_string(&offer)
            .map_err(|e| TransportError::InvalidDescription(e.to_string()))?;
        Ok(SessionDescription::offer(sdp))
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), TransportError> {
        if answer.kind != SdpKind::Answer {
            return Err(TransportError::InvalidDescription(
                "expected an answer".to_string(),
            ));
        }

        let parsed: RelayAnswer = serde_json::from_str(&answer.sdp)
            .map_err(|e| TransportError::InvalidDescription(e.to_string()))?;

        if parsed.session_id != self.session_id {
            return Err(TransportError::InvalidDescription(format!(
                "answer is for session {}, expected {}",
                parsed.session_id, self.session_id
            )));
        }

        let mut subscriber = self
            .client
            .subscribe(self.audio_subject("down"))
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let tx = self.remote_audio_tx.lock().take();
        if let Some(tx) = tx {
            let task = tokio::spawn(async move {
                while let Some(msg) = subscriber.next().await {
                    let frame = serde_json::from_slice::<AudioFrameMessage>(&msg.payload)
                        .map_err(anyhow::Error::from)
                        .and_then(AudioFrameMessage::into_frame);

                    match frame {
                        Ok(frame) => {
                            if tx.send(frame).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Dropping malformed remote audio frame: {}", e),
                    }
                }
                debug!("Remote audio subscription ended");
            });
            *self.remote_audio_task.lock() = Some(task);
        }

        self.negotiated.store(true, Ordering::SeqCst);
        info!(
            "Relay answer applied for session {} (remote rate: {:?})",
            self.session_id, parsed.sample_rate
        );
        Ok(())
    }

    async fn send_audio(&self, frame: &AudioFrame) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if !self.negotiated.load(Ordering::SeqCst) {
            return Err(TransportError::Send("transport is not negotiated".to_string()));
        }

        let message = AudioFrameMessage::from_frame(&self.session_id, frame);
        let payload = serde_json::to_vec(&message).map_err(|e| TransportError::Send(e.to_string()))?;

        self.client
            .publish(self.audio_subject("up"), payload.into())
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    fn take_remote_audio(&self) -> Option<mpsc::Receiver<AudioFrame>> {
        self.remote_audio_rx.lock().take()
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Closing relay transport for session {}", self.session_id);

        let channels: Vec<_> = self.channels.lock().drain(..).collect();
        for channel in channels {
            channel.close().await;
        }

        if let Some(task) = self.remote_audio_task.lock().take() {
            task.abort();
        }
        self.remote_audio_tx.lock().take();

        if let Err(e) = self.client.flush().await {
            debug!("NATS flush on close failed: {}", e);
        }
    }
}

/// Data channel mapped onto a pair of NATS subjects
pub struct NatsDataChannel {
    label: String,
    client: Client,
    subject_out: String,
    subscriber: tokio::sync::Mutex<Option<Subscriber>>,
    open: AtomicBool,
    closed_tx: watch::Sender<bool>,
}

impl NatsDataChannel {
    fn new(label: String, client: Client, subject_out: String, subscriber: Subscriber) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            label,
            client,
            subject_out,
            subscriber: tokio::sync::Mutex::new(Some(subscriber)),
            open: AtomicBool::new(true),
            closed_tx,
        }
    }
}

#[async_trait]
impl DuplexChannel for NatsDataChannel {
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

        self.client
            .publish(self.subject_out.clone(), text.into_bytes().into())
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&self) -> Option<String> {
        let mut closed = self.closed_tx.subscribe();
        if *closed.borrow() {
            return None;
        }

        let mut guard = self.subscriber.lock().await;
        loop {
            let subscriber = guard.as_mut()?;
            tokio::select! {
                msg = subscriber.next() => match msg {
                    Some(msg) => match String::from_utf8(msg.payload.to_vec()) {
                        Ok(text) => return Some(text),
                        Err(e) => warn!("Dropping non-UTF-8 message on '{}': {}", self.label, e),
                    },
                    None => {
                        self.open.store(false, Ordering::SeqCst);
                        return None;
                    }
                },
                _ = closed.changed() => return None,
            }
        }
    }

    async fn close(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        self.closed_tx.send_replace(true);

        if let Some(mut subscriber) = self.subscriber.lock().await.take() {
            if let Err(e) = subscriber.unsubscribe().await {
                debug!("Unsubscribe on close failed: {}", e);
            }
        }
        debug!("Data channel '{}' closed", self.label);
    }
}
