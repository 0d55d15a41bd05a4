use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

use crate::heartbeat::HeartbeatConfig;
use crate::session::SessionConfig;
use crate::watchdog::WatchdogConfig;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    pub nats: NatsConfig,
    pub negotiation: NegotiationConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub frame_size: usize,
    pub sample_rate: u32,
    pub data_channel_label: String,
    pub voice_activity_threshold: f32,
    pub heartbeat_interval_secs: u64,
    pub pong_timeout_secs: u64,
    pub max_missed_pongs: u32,
    pub silence_secs: u64,
    pub countdown_secs: u32,
    /// WAV file used as the microphone when the service starts sessions
    pub input_wav: Option<String>,
    /// Where to record remote audio (one file per session, `{id}` is replaced)
    pub output_wav: Option<String>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            frame_size: session.frame_size,
            sample_rate: session.sample_rate,
            data_channel_label: session.data_channel_label,
            voice_activity_threshold: session.voice_activity_threshold,
            heartbeat_interval_secs: session.heartbeat.interval.as_secs(),
            pong_timeout_secs: session.heartbeat.pong_timeout.as_secs(),
            max_missed_pongs: session.heartbeat.max_missed_pongs,
            silence_secs: session.inactivity.silence.as_secs(),
            countdown_secs: session.inactivity.countdown_secs,
            input_wav: None,
            output_wav: None,
        }
    }
}

impl VoiceConfig {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            frame_size: self.frame_size,
            sample_rate: self.sample_rate,
            data_channel_label: self.data_channel_label.clone(),
            voice_activity_threshold: self.voice_activity_threshold,
            heartbeat: HeartbeatConfig {
                interval: Duration::from_secs(self.heartbeat_interval_secs),
                pong_timeout: Duration::from_secs(self.pong_timeout_secs),
                max_missed_pongs: self.max_missed_pongs,
            },
            inactivity: WatchdogConfig {
                silence: Duration::from_secs(self.silence_secs),
                countdown_secs: self.countdown_secs,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NatsConfig {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct NegotiationConfig {
    /// Offer/answer endpoint
    pub url: String,
    /// Ephemeral credential endpoint (optional; credentials may be supplied directly)
    pub token_url: Option<String>,
}

impl Config {
    /// Load `path` (any format the `config` crate understands), then apply
    /// `VOICELINK__SECTION__KEY` environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("VOICELINK").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
