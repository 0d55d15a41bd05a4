use std::time::Duration;

use crate::audio::EncoderConfig;
use crate::heartbeat::HeartbeatConfig;
use crate::watchdog::WatchdogConfig;

/// Configuration for one voice session client
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Samples per outbound audio frame
    /// Default: 1024 (~43ms at 24kHz)
    pub frame_size: usize,

    /// Microphone sample rate (the speech model expects 24kHz PCM16)
    pub sample_rate: u32,

    /// Label of the control data channel
    pub data_channel_label: String,

    /// Captured frames louder than this peak level count as user activity
    pub voice_activity_threshold: f32,

    pub heartbeat: HeartbeatConfig,

    pub inactivity: WatchdogConfig,
}

impl SessionConfig {
    pub fn encoder_config(&self) -> EncoderConfig {
        EncoderConfig {
            frame_size: self.frame_size,
            sample_rate: self.sample_rate,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            frame_size: 1024,
            sample_rate: 24000,
            data_channel_label: "control".to_string(),
            voice_activity_threshold: 0.02,
            heartbeat: HeartbeatConfig {
                interval: Duration::from_secs(15),
                pong_timeout: Duration::from_secs(30),
                max_missed_pongs: 2,
            },
            inactivity: WatchdogConfig {
                silence: Duration::from_secs(15),
                countdown_secs: 10,
            },
        }
    }
}
