use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_CAMERA_INDEX: u32 = 0;
pub const DEFAULT_FRAME_WIDTH: u32 = 640;
pub const DEFAULT_FRAME_HEIGHT: u32 = 480;
pub const DEFAULT_DETECT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_NARRATE_TIMEOUT_MS: u64 = 20_000;
pub const DEFAULT_VOICE_TIMEOUT_MS: u64 = 20_000;
pub const ENV_GEMINI_API_KEY: &str = "GEMINI_API_KEY";
pub const ENV_ELEVENLABS_API_KEY: &str = "ELEVENLABS_API_KEY";
pub const ENV_CAMERA_INDEX: &str = "CALMCAM_CAMERA_INDEX";
pub const ENV_DETECTOR_URL: &str = "CALMCAM_DETECTOR_URL";

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new<S: Into<String>>(value: S) -> Result<Self, ConfigError> {
        let v = value.into();
        if v.trim().is_empty() {
            return Err(ConfigError::EmptyApiKey);
        }
        Ok(Self(v))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(**redacted**)")
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiKeys {
    pub gemini: Option<ApiKey>,
    pub elevenlabs: Option<ApiKey>,
}

/// Per-call deadlines for the three external suspension points of a capture.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallBudget {
    pub detect_ms: u64,
    pub narrate_ms: u64,
    pub voice_ms: u64,
}

impl CallBudget {
    pub fn new(detect_ms: u64, narrate_ms: u64, voice_ms: u64) -> Result<Self, ConfigError> {
        if detect_ms == 0 || narrate_ms == 0 || voice_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(Self {
            detect_ms,
            narrate_ms,
            voice_ms,
        })
    }

    pub fn detect(&self) -> Duration {
        Duration::from_millis(self.detect_ms)
    }

    pub fn narrate(&self) -> Duration {
        Duration::from_millis(self.narrate_ms)
    }

    pub fn voice(&self) -> Duration {
        Duration::from_millis(self.voice_ms)
    }
}

impl Default for CallBudget {
    fn default() -> Self {
        Self {
            detect_ms: DEFAULT_DETECT_TIMEOUT_MS,
            narrate_ms: DEFAULT_NARRATE_TIMEOUT_MS,
            voice_ms: DEFAULT_VOICE_TIMEOUT_MS,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CameraConfig {
    pub index: u32,
    pub width: u32,
    pub height: u32,
}

impl CameraConfig {
    pub fn new(index: u32, width: u32, height: u32) -> Result<Self, ConfigError> {
        if width == 0 || height == 0 {
            return Err(ConfigError::ZeroFrameDimension);
        }
        Ok(Self {
            index,
            width,
            height,
        })
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: DEFAULT_CAMERA_INDEX,
            width: DEFAULT_FRAME_WIDTH,
            height: DEFAULT_FRAME_HEIGHT,
        }
    }
}

/// Whether a finished narration starts playing on its own or waits for an
/// explicit play request.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum DisplayMode {
    #[default]
    Manual,
    AutoPlay,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    pub camera: CameraConfig,
    pub api_keys: ApiKeys,
    pub budget: CallBudget,
    pub display: DisplayMode,
    pub gemini_model: String,
    pub detector_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig::default(),
            api_keys: ApiKeys::default(),
            budget: CallBudget::default(),
            display: DisplayMode::default(),
            gemini_model: DEFAULT_GEMINI_MODEL.to_owned(),
            detector_url: None,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("api key must not be empty")]
    EmptyApiKey,
    #[error("call timeout must be > 0 ms")]
    ZeroTimeout,
    #[error("camera frame dimensions must be > 0")]
    ZeroFrameDimension,
}

pub trait Env {
    fn var(&self, key: &str) -> Option<String>;
}

#[derive(Clone, Debug, Default)]
pub struct StdEnv;

impl Env for StdEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Clone, Debug, Default)]
pub struct MapEnv {
    vars: std::collections::BTreeMap<String, String>,
}

impl MapEnv {
    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_owned(), value.to_owned());
        self
    }
}

impl Env for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

pub fn resolve_api_key(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
) -> Result<Option<ApiKey>, ConfigError> {
    match cli_value {
        Some(v) => Ok(Some(ApiKey::new(v)?)),
        None => match env.var(env_key) {
            Some(v) => Ok(Some(ApiKey::new(v)?)),
            None => Ok(None),
        },
    }
}

pub fn resolve_optional_string(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
) -> Option<String> {
    match cli_value {
        Some(v) => Some(v),
        None => env.var(env_key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_cli_takes_precedence_over_env() {
        let env = MapEnv::default().with_var(ENV_GEMINI_API_KEY, "env-key");
        let key = resolve_api_key(Some("cli-key".to_owned()), ENV_GEMINI_API_KEY, &env)
            .expect("valid key")
            .expect("present");
        assert_eq!(key.expose(), "cli-key");
    }

    #[test]
    fn api_key_env_used_when_cli_missing() {
        let env = MapEnv::default().with_var(ENV_GEMINI_API_KEY, "env-key");
        let key = resolve_api_key(None, ENV_GEMINI_API_KEY, &env)
            .expect("valid key")
            .expect("present");
        assert_eq!(key.expose(), "env-key");
    }

    #[test]
    fn api_key_absent_when_neither_set() {
        let env = MapEnv::default();
        let key = resolve_api_key(None, ENV_GEMINI_API_KEY, &env).expect("no error");
        assert!(key.is_none());
    }

    #[test]
    fn api_key_debug_is_redacted() {
        let key = ApiKey::new("super-secret").expect("valid key");
        assert_eq!(format!("{key:?}"), "ApiKey(**redacted**)");
    }

    #[test]
    fn call_budget_rejects_zero() {
        assert_eq!(CallBudget::new(0, 1, 1), Err(ConfigError::ZeroTimeout));
        assert_eq!(CallBudget::new(1, 0, 1), Err(ConfigError::ZeroTimeout));
        assert_eq!(CallBudget::new(1, 1, 0), Err(ConfigError::ZeroTimeout));
    }

    #[test]
    fn call_budget_durations() {
        let budget = CallBudget::new(500, 1_000, 2_000).expect("nonzero");
        assert_eq!(budget.detect(), Duration::from_millis(500));
        assert_eq!(budget.narrate(), Duration::from_millis(1_000));
        assert_eq!(budget.voice(), Duration::from_millis(2_000));
    }

    #[test]
    fn camera_config_rejects_zero_dimensions() {
        assert_eq!(
            CameraConfig::new(0, 0, 480),
            Err(ConfigError::ZeroFrameDimension)
        );
        assert_eq!(
            CameraConfig::new(0, 640, 0),
            Err(ConfigError::ZeroFrameDimension)
        );
    }

    #[test]
    fn resolve_optional_string_cli_takes_precedence() {
        let env = MapEnv::default().with_var(ENV_DETECTOR_URL, "http://env");
        let v = resolve_optional_string(Some("http://cli".to_owned()), ENV_DETECTOR_URL, &env);
        assert_eq!(v.as_deref(), Some("http://cli"));
    }

    #[test]
    fn resolve_optional_string_env_used_when_cli_missing() {
        let env = MapEnv::default().with_var(ENV_DETECTOR_URL, "http://env");
        let v = resolve_optional_string(None, ENV_DETECTOR_URL, &env);
        assert_eq!(v.as_deref(), Some("http://env"));
    }
}
