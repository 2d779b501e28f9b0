//! Meeting engine configuration.
//!
//! Configuration is loaded from environment variables. The videoserver
//! `apisecret` is redacted in Debug output.

use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default videoserver HTTP request timeout in milliseconds.
pub const DEFAULT_VIDEOSERVER_TIMEOUT_MS: u64 = 10_000;

/// Default videoserver HTTP connect timeout in milliseconds.
pub const DEFAULT_VIDEOSERVER_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Default audio room sampling rate.
pub const DEFAULT_AUDIO_SAMPLING_RATE: u32 = 16_000;

/// Default number of packets used for talk detection.
pub const DEFAULT_AUDIO_ACTIVE_PACKETS: u32 = 10;

/// Default average audio level used for talk detection.
pub const DEFAULT_AUDIO_LEVEL_AVERAGE: u32 = 55;

/// Default directory prefix for per-user audio recordings.
pub const DEFAULT_AUDIO_RECORDING_DIR: &str = "/var/lib/meeting-engine/recordings";

/// Default publisher bitrate cap in bits per second.
pub const DEFAULT_VIDEO_BITRATE: u32 = 600_000;

/// Default maximum number of publishers per video room.
pub const DEFAULT_VIDEO_PUBLISHERS: u32 = 100;

/// Default codec preference list.
pub const DEFAULT_VIDEO_CODECS: &str = "vp8,h264,vp9";

/// Default timeout for a mutating operation to complete.
pub const DEFAULT_OPERATION_TIMEOUT_SECONDS: u64 = 30;

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8090";

/// Room parameters sent to the videoserver when a meeting starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSettings {
    /// Audio room sampling rate (Hz).
    pub sampling_rate: u32,
    /// Packets considered for talk detection.
    pub audio_active_packets: u32,
    /// Average level threshold for talk detection.
    pub audio_level_average: u32,
    /// Prefix for per-user recording filenames.
    pub recording_dir: String,
    /// Publisher bitrate cap.
    pub video_bitrate: u32,
    /// Maximum publishers in a video room.
    pub video_publishers: u32,
    /// Codec preference list, most preferred first.
    pub video_codecs: Vec<String>,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            sampling_rate: DEFAULT_AUDIO_SAMPLING_RATE,
            audio_active_packets: DEFAULT_AUDIO_ACTIVE_PACKETS,
            audio_level_average: DEFAULT_AUDIO_LEVEL_AVERAGE,
            recording_dir: DEFAULT_AUDIO_RECORDING_DIR.to_string(),
            video_bitrate: DEFAULT_VIDEO_BITRATE,
            video_publishers: DEFAULT_VIDEO_PUBLISHERS,
            video_codecs: split_codecs(DEFAULT_VIDEO_CODECS),
        }
    }
}

/// Meeting engine configuration.
///
/// Loaded from environment variables with sensible defaults.
/// Sensitive fields are redacted in Debug output.
#[derive(Clone)]
pub struct Config {
    /// Videoserver base URL (e.g. `http://videoserver:8088`).
    pub videoserver_url: String,

    /// Videoserver `apisecret`.
    /// Protected by `SecretString` to prevent accidental logging.
    pub videoserver_api_secret: SecretString,

    /// HTTP request timeout for videoserver calls.
    pub videoserver_timeout: Duration,

    /// HTTP connect timeout for videoserver calls.
    pub videoserver_connect_timeout: Duration,

    /// Parameters for the audio and video rooms.
    pub room_settings: RoomSettings,

    /// How long a caller waits for a meeting actor to complete a mutation.
    pub operation_timeout: Duration,

    /// Health and metrics server bind address.
    pub health_bind_address: String,

    /// Reconciliation interval; `None` disables the task.
    pub reconcile_interval: Option<Duration>,

    /// Emit logs as JSON.
    pub log_json: bool,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("videoserver_url", &self.videoserver_url)
            .field("videoserver_api_secret", &"[REDACTED]")
            .field("videoserver_timeout", &self.videoserver_timeout)
            .field(
                "videoserver_connect_timeout",
                &self.videoserver_connect_timeout,
            )
            .field("room_settings", &self.room_settings)
            .field("operation_timeout", &self.operation_timeout)
            .field("health_bind_address", &self.health_bind_address)
            .field("reconcile_interval", &self.reconcile_interval)
            .field("log_json", &self.log_json)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let videoserver_url = vars
            .get("VIDEOSERVER_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("VIDEOSERVER_URL".to_string()))?
            .trim_end_matches('/')
            .to_string();

        if !videoserver_url.starts_with("http://") && !videoserver_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(format!(
                "VIDEOSERVER_URL must be an http(s) URL, got '{videoserver_url}'"
            )));
        }

        let videoserver_api_secret = SecretString::from(
            vars.get("VIDEOSERVER_API_SECRET")
                .ok_or_else(|| ConfigError::MissingEnvVar("VIDEOSERVER_API_SECRET".to_string()))?
                .clone(),
        );

        let videoserver_timeout = Duration::from_millis(parse_var(
            vars,
            "VIDEOSERVER_TIMEOUT_MS",
            DEFAULT_VIDEOSERVER_TIMEOUT_MS,
        )?);

        let videoserver_connect_timeout = Duration::from_millis(parse_var(
            vars,
            "VIDEOSERVER_CONNECT_TIMEOUT_MS",
            DEFAULT_VIDEOSERVER_CONNECT_TIMEOUT_MS,
        )?);

        let video_codecs = split_codecs(
            vars.get("VIDEO_CODECS")
                .map_or(DEFAULT_VIDEO_CODECS, String::as_str),
        );
        if video_codecs.is_empty() {
            return Err(ConfigError::InvalidValue(
                "VIDEO_CODECS must list at least one codec".to_string(),
            ));
        }

        let room_settings = RoomSettings {
            sampling_rate: parse_var(vars, "AUDIO_SAMPLING_RATE", DEFAULT_AUDIO_SAMPLING_RATE)?,
            audio_active_packets: parse_var(
                vars,
                "AUDIO_ACTIVE_PACKETS",
                DEFAULT_AUDIO_ACTIVE_PACKETS,
            )?,
            audio_level_average: parse_var(
                vars,
                "AUDIO_LEVEL_AVERAGE",
                DEFAULT_AUDIO_LEVEL_AVERAGE,
            )?,
            recording_dir: vars
                .get("AUDIO_RECORDING_DIR")
                .map(|dir| dir.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_AUDIO_RECORDING_DIR.to_string()),
            video_bitrate: parse_var(vars, "VIDEO_BITRATE", DEFAULT_VIDEO_BITRATE)?,
            video_publishers: parse_var(vars, "VIDEO_PUBLISHERS", DEFAULT_VIDEO_PUBLISHERS)?,
            video_codecs,
        };

        let operation_timeout_seconds: u64 = parse_var(
            vars,
            "ENGINE_OPERATION_TIMEOUT_SECONDS",
            DEFAULT_OPERATION_TIMEOUT_SECONDS,
        )?;
        if operation_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "ENGINE_OPERATION_TIMEOUT_SECONDS must be greater than zero".to_string(),
            ));
        }

        let health_bind_address = vars
            .get("ENGINE_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        // Reconciliation is opt-in
        let reconcile_interval = match vars.get("ENGINE_RECONCILE_INTERVAL_SECONDS") {
            None => None,
            Some(raw) => {
                let seconds: u64 = raw.parse().map_err(|e| {
                    ConfigError::InvalidValue(format!(
                        "ENGINE_RECONCILE_INTERVAL_SECONDS='{raw}': {e}"
                    ))
                })?;
                (seconds > 0).then(|| Duration::from_secs(seconds))
            }
        };

        let log_json = parse_var(vars, "ENGINE_LOG_JSON", false)?;

        Ok(Config {
            videoserver_url,
            videoserver_api_secret,
            videoserver_timeout,
            videoserver_connect_timeout,
            room_settings,
            operation_timeout: Duration::from_secs(operation_timeout_seconds),
            health_bind_address,
            reconcile_interval,
            log_json,
        })
    }
}

fn parse_var<T>(vars: &HashMap<String, String>, name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match vars.get(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidValue(format!("{name}='{raw}': {e}"))),
    }
}

fn split_codecs(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|codec| !codec.is_empty())
        .map(str::to_lowercase)
        .collect()
}
