use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

use crate::audio::{
    AudioInput, AudioInputError, AudioOutput, AudioSampleSource, NullOutput, WavFileInput,
    WavFileOutput,
};
use crate::session::{SessionConfig, SessionDeps, SessionEvent, VoiceSessionClient};
use crate::transport::{Negotiator, PeerConnector};

/// Events kept per session for status queries
const RECENT_EVENTS: usize = 50;

/// Voice sessions started through the API (session_id → session)
pub type SessionMap = Arc<RwLock<HashMap<String, Arc<ManagedSession>>>>;

/// A freshly built client with its event stream and audio output
pub struct BuiltSession {
    pub client: VoiceSessionClient,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
    pub output: Arc<dyn AudioOutput>,
}

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionMap,
    pub factory: Arc<SessionFactory>,
}

impl AppState {
    pub fn new(factory: SessionFactory) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            factory: Arc::new(factory),
        }
    }
}

/// Builds session clients from service configuration
pub struct SessionFactory {
    pub session: SessionConfig,
    pub connector: Arc<dyn PeerConnector>,
    pub negotiator: Arc<dyn Negotiator>,
    /// WAV file used as the microphone; sessions fail to connect without one
    pub input_wav: Option<String>,
    /// Remote audio recording path; `{id}` is replaced by the session id
    pub output_wav: Option<String>,
}

impl SessionFactory {
    pub fn build(&self, session_id: &str) -> anyhow::Result<BuiltSession> {
        let input: Arc<dyn AudioInput> = match &self.input_wav {
            Some(path) => Arc::new(WavFileInput::new(path, self.session.sample_rate)),
            None => Arc::new(NoInput),
        };

        let output: Arc<dyn AudioOutput> = match &self.output_wav {
            Some(template) => Arc::new(WavFileOutput::create(
                template.replace("{id}", session_id),
                self.session.sample_rate,
            )?),
            None => Arc::new(NullOutput),
        };

        let (client, events) = VoiceSessionClient::new(
            self.session.clone(),
            SessionDeps {
                connector: Arc::clone(&self.connector),
                negotiator: Arc::clone(&self.negotiator),
                input,
                output: Arc::clone(&output),
            },
        );
        Ok(BuiltSession {
            client,
            events,
            output,
        })
    }
}

/// Stand-in when no input is configured
struct NoInput;

#[async_trait]
impl AudioInput for NoInput {
    async fn open(&self) -> Result<Box<dyn AudioSampleSource>, AudioInputError> {
        Err(AudioInputError::Unavailable(
            "no audio input configured (voice.input_wav)".to_string(),
        ))
    }

    fn name(&self) -> &str {
        "none"
    }
}

/// A session owned by the API, plus its recent events
pub struct ManagedSession {
    pub id: String,
    pub client: VoiceSessionClient,
    output: Arc<dyn AudioOutput>,
    recent: Mutex<VecDeque<SessionEvent>>,
}

impl ManagedSession {
    /// Wrap a built session and start draining its events
    ///
    /// Inactivity timeouts and lost connections are answered with a
    /// `disconnect()`, as the session expects of its owner, after which the
    /// session drops itself from `sessions`.
    pub fn start(id: String, built: BuiltSession, sessions: &SessionMap) -> Arc<Self> {
        let BuiltSession {
            client,
            mut events,
            output,
        } = built;
        let session = Arc::new(Self {
            id,
            client,
            output,
            recent: Mutex::new(VecDeque::with_capacity(RECENT_EVENTS)),
        });

        let weak: Weak<Self> = Arc::downgrade(&session);
        let registry = Arc::downgrade(sessions);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(session) = weak.upgrade() else {
                    break;
                };
                session.remember(event.clone());

                let ended = match event {
                    SessionEvent::InactivityTimeout => {
                        info!("Session {} idle, disconnecting", session.id);
                        true
                    }
                    SessionEvent::ConnectionLost => {
                        warn!("Session {} lost its connection, disconnecting", session.id);
                        true
                    }
                    _ => false,
                };

                if ended {
                    session.close().await;
                    if let Some(sessions) = registry.upgrade() {
                        session.forget(&sessions).await;
                    }
                    break;
                }
            }
        });

        session
    }

    /// Disconnect and finalize the remote audio recording
    pub async fn close(&self) {
        self.client.disconnect().await;
        if let Err(e) = self.output.finish() {
            warn!("Failed to finish audio output for session {}: {}", self.id, e);
        }
    }

    /// Remove this session from `sessions` unless the id now maps elsewhere
    async fn forget(self: &Arc<Self>, sessions: &RwLock<HashMap<String, Arc<ManagedSession>>>) {
        let mut sessions = sessions.write().await;
        if sessions
            .get(&self.id)
            .is_some_and(|current| Arc::ptr_eq(current, self))
        {
            sessions.remove(&self.id);
            info!("Session {} removed", self.id);
        }
    }

    fn remember(&self, event: SessionEvent) {
        let mut recent = self.recent.lock();
        if recent.len() == RECENT_EVENTS {
            recent.pop_front();
        }
        recent.push_back(event);
    }

    pub fn recent_events(&self) -> Vec<SessionEvent> {
        self.recent.lock().iter().cloned().collect()
    }
}
