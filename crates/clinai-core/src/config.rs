//! Client configuration.
//!
//! | Key | Default | Description |
//! |-----|---------|-------------|
//! | api_base_url | http://127.0.0.1:8000 | Remote agent base URL (`/start_session`, `/turn`, `/voice_turn`). |
//! | request_timeout_secs | 60 | HTTP client timeout. |
//! | silence_threshold | 0.01 | RMS below this counts as silence ([-1, 1] scale). |
//! | silence_timeout_ms | 3000 | Continuous silence that auto-finalizes a recording. |
//! | frame_interval_ms | 16 | Analysis cadence of the silence detector. |
//! | analysis_frame_size | 2048 | Samples per RMS frame. |
//! | sample_rate | 16000 | Capture rate after down-mix/resample. |
//! | agent_voice_enabled | true | Play agent speech (mute switch). |

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8000";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub silence_threshold: f32,
    pub silence_timeout_ms: u64,
    pub frame_interval_ms: u64,
    pub analysis_frame_size: usize,
    pub sample_rate: u32,
    pub agent_voice_enabled: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_secs: 60,
            silence_threshold: 0.01,
            silence_timeout_ms: 3000,
            frame_interval_ms: 16,
            analysis_frame_size: 2048,
            sample_rate: 16000,
            agent_voice_enabled: true,
        }
    }
}

impl ClientConfig {
    /// Load config from file and environment. Precedence: `CLINAI__*` env > file at
    /// `CLINAI_CONFIG` (default `config/client`) > defaults.
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("CLINAI_CONFIG").unwrap_or_else(|_| "config/client".to_string());
        Self::load_from(Path::new(&config_path))
    }

    /// Same as [`ClientConfig::load`] with an explicit file path. A missing file is not an error.
    pub fn load_from(path: &Path) -> Result<Self, config::ConfigError> {
        let d = Self::default();
        let builder = config::Config::builder()
            .set_default("api_base_url", d.api_base_url)?
            .set_default("request_timeout_secs", d.request_timeout_secs as i64)?
            .set_default("silence_threshold", d.silence_threshold as f64)?
            .set_default("silence_timeout_ms", d.silence_timeout_ms as i64)?
            .set_default("frame_interval_ms", d.frame_interval_ms as i64)?
            .set_default("analysis_frame_size", d.analysis_frame_size as i64)?
            .set_default("sample_rate", d.sample_rate as i64)?
            .set_default("agent_voice_enabled", d.agent_voice_enabled)?;

        let with_ext = path.with_extension("toml");
        let builder = if path.is_file() {
            builder.add_source(config::File::from(path))
        } else if with_ext.is_file() {
            builder.add_source(config::File::from(with_ext))
        } else {
            builder
        };

        let built = builder
            .add_source(config::Environment::with_prefix("CLINAI").separator("__"))
            .build()?;

        let mut cfg: Self = built.try_deserialize()?;
        cfg.normalize();
        Ok(cfg)
    }

    fn normalize(&mut self) {
        self.api_base_url = self.api_base_url.trim().trim_end_matches('/').to_string();
        self.silence_threshold = self.silence_threshold.clamp(0.0, 1.0);
        self.frame_interval_ms = self.frame_interval_ms.max(1);
        self.analysis_frame_size = self.analysis_frame_size.max(1);
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn silence_timeout(&self) -> Duration {
        Duration::from_millis(self.silence_timeout_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}
