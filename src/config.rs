use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::defaults;
use crate::error::{RedraftError, Result};
use crate::generate::{RetryPolicy, SamplingParams, WatchdogConfig};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub endpoint: EndpointConfig,
    pub sampling: SamplingOverrides,
    pub chunking: ChunkingConfig,
    pub watchdog: WatchdogSettings,
    pub retry: RetrySettings,
    pub dedup: DedupSettings,
    pub output: OutputConfig,
}

/// Generation endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EndpointConfig {
    pub url: String,
    pub model: String,
    pub protocol: Protocol,
    /// Request streamed output (the watchdogs need incremental deltas; only
    /// disable for endpoints without a streaming mode).
    pub stream: bool,
}

/// Wire protocol spoken by the endpoint
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Ollama native `/api/generate` NDJSON
    Ollama,
    /// OpenAI-style `/v1/chat/completions`
    Openai,
}

impl Protocol {
    /// Parse protocol from string (case-insensitive)
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" | "openai-compatible" | "llamacpp" => Ok(Self::Openai),
            other => Err(RedraftError::ConfigInvalidValue {
                key: "endpoint.protocol".to_string(),
                message: format!("unknown protocol '{other}' (expected: ollama, openai)"),
            }),
        }
    }
}

/// Optional overrides applied on top of the per-stage sampling defaults
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct SamplingOverrides {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub repeat_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub context_window: Option<u32>,
    pub max_output_tokens: Option<u32>,
}

/// Segmentation configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkingConfig {
    pub polish_max_chars: usize,
    pub translate_max_chars: usize,
}

/// Watchdog thresholds for the streaming supervisor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WatchdogSettings {
    pub idle_interval_secs: u64,
    pub max_idle_strikes: u32,
    pub hard_timeout_secs: u64,
    pub repetition_window: usize,
    pub repetition_check_interval: usize,
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub min_acceptable_ratio: f64,
}

/// Deduplication configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DedupSettings {
    pub similarity_threshold: f64,
}

/// Output file configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: defaults::ENDPOINT_URL.to_string(),
            model: defaults::MODEL.to_string(),
            protocol: Protocol::Ollama,
            stream: true,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            polish_max_chars: defaults::POLISH_MAX_CHARS,
            translate_max_chars: defaults::TRANSLATE_MAX_CHARS,
        }
    }
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            idle_interval_secs: defaults::IDLE_INTERVAL.as_secs(),
            max_idle_strikes: defaults::MAX_IDLE_STRIKES,
            hard_timeout_secs: defaults::HARD_TIMEOUT.as_secs(),
            repetition_window: defaults::REPETITION_WINDOW,
            repetition_check_interval: defaults::REPETITION_CHECK_INTERVAL,
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: defaults::MAX_RETRIES,
            min_acceptable_ratio: defaults::MIN_ACCEPTABLE_RATIO,
        }
    }
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            similarity_threshold: defaults::SIMILARITY_THRESHOLD,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(defaults::OUTPUT_DIR),
        }
    }
}

impl SamplingOverrides {
    /// Applies the overrides that are set onto a stage's defaults.
    pub fn apply(&self, mut params: SamplingParams) -> SamplingParams {
        if let Some(v) = self.temperature {
            params.temperature = v;
        }
        if let Some(v) = self.top_p {
            params.top_p = v;
        }
        if let Some(v) = self.top_k {
            params.top_k = v;
        }
        if let Some(v) = self.repeat_penalty {
            params.repeat_penalty = v;
        }
        if let Some(v) = self.presence_penalty {
            params.presence_penalty = v;
        }
        if let Some(v) = self.frequency_penalty {
            params.frequency_penalty = v;
        }
        if let Some(v) = self.context_window {
            params.context_window = v;
        }
        if let Some(v) = self.max_output_tokens {
            params.max_output_tokens = v;
        }
        params
    }
}

impl WatchdogSettings {
    pub fn to_watchdog_config(&self) -> WatchdogConfig {
        WatchdogConfig {
            idle_interval: Duration::from_secs(self.idle_interval_secs),
            max_idle_strikes: self.max_idle_strikes,
            hard_timeout: Duration::from_secs(self.hard_timeout_secs),
            repetition_window: self.repetition_window,
            repetition_check_interval: self.repetition_check_interval,
        }
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            min_acceptable_ratio: self.min_acceptable_ratio,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                if e.downcast_ref::<std::io::Error>()
                    .map(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
                    .unwrap_or(false)
                {
                    Self::default()
                } else {
                    // Re-panic on invalid TOML or other errors
                    panic!("Failed to load config from {}: {}", path.display(), e);
                }
            }
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - REDRAFT_ENDPOINT → endpoint.url
    /// - REDRAFT_MODEL → endpoint.model
    /// - REDRAFT_PROTOCOL → endpoint.protocol
    /// - REDRAFT_OUTPUT_DIR → output.dir
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("REDRAFT_ENDPOINT")
            && !url.is_empty()
        {
            self.endpoint.url = url;
        }

        if let Ok(model) = std::env::var("REDRAFT_MODEL")
            && !model.is_empty()
        {
            self.endpoint.model = model;
        }

        if let Ok(protocol) = std::env::var("REDRAFT_PROTOCOL")
            && !protocol.is_empty()
            && let Ok(parsed) = Protocol::parse(&protocol)
        {
            self.endpoint.protocol = parsed;
        }

        if let Ok(dir) = std::env::var("REDRAFT_OUTPUT_DIR")
            && !dir.is_empty()
        {
            self.output.dir = PathBuf::from(dir);
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/redraft/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("redraft")
            .join("config.toml")
    }

    /// Looks up a value by dotted path, e.g. `watchdog.idle_interval_secs`.
    pub fn get_value_by_path(&self, key: &str) -> Result<String> {
        let root = toml::Value::try_from(self).map_err(|e| RedraftError::Other(e.to_string()))?;

        let mut current = &root;
        for part in key.split('.') {
            current = current.get(part).ok_or_else(|| RedraftError::ConfigInvalidValue {
                key: key.to_string(),
                message: "unknown configuration key".to_string(),
            })?;
        }

        Ok(match current {
            toml::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Sets a value by dotted path in the config file, creating the file if
    /// it does not exist. The result is validated by deserializing back into
    /// `Config` before anything is written.
    pub fn set_value_by_path(config_path: &Path, key: &str, raw: &str) -> Result<()> {
        let mut root: toml::Value = if config_path.exists() {
            toml::from_str(&fs::read_to_string(config_path)?)?
        } else {
            toml::Value::Table(toml::value::Table::new())
        };

        let parts: Vec<&str> = key.split('.').collect();
        let invalid = |message: &str| RedraftError::ConfigInvalidValue {
            key: key.to_string(),
            message: message.to_string(),
        };
        if parts.iter().any(|p| p.is_empty()) {
            return Err(invalid("empty path component"));
        }

        let mut current = &mut root;
        for part in &parts[..parts.len() - 1] {
            let table = current
                .as_table_mut()
                .ok_or_else(|| invalid("path passes through a non-table value"))?;
            current = table
                .entry(part.to_string())
                .or_insert_with(|| toml::Value::Table(toml::value::Table::new()));
        }
        let table = current
            .as_table_mut()
            .ok_or_else(|| invalid("path passes through a non-table value"))?;
        // SAFETY: parts is non-empty after the empty-component check
        #[allow(clippy::expect_used)]
        let leaf = parts.last().expect("non-empty key path");
        table.insert(leaf.to_string(), parse_scalar(raw));

        // Validate before writing.
        let serialized =
            toml::to_string_pretty(&root).map_err(|e| RedraftError::Other(e.to_string()))?;
        let _validated: Config = toml::from_str(&serialized).map_err(|e| {
            invalid(&format!("rejected by configuration schema: {e}"))
        })?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(config_path, serialized)?;
        Ok(())
    }

    /// Renders the effective configuration as TOML.
    pub fn to_display_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| RedraftError::Other(e.to_string()))
    }

    /// Renders one top-level section as TOML.
    pub fn display_section(&self, section: &str) -> Result<String> {
        let root = toml::Value::try_from(self).map_err(|e| RedraftError::Other(e.to_string()))?;
        let value = root
            .get(section)
            .ok_or_else(|| RedraftError::ConfigInvalidValue {
                key: section.to_string(),
                message: "unknown configuration section".to_string(),
            })?;
        toml::to_string_pretty(value).map_err(|e| RedraftError::Other(e.to_string()))
    }

    /// Returns a commented configuration template with all defaults.
    pub fn dump_template() -> String {
        CONFIG_TEMPLATE.to_string()
    }
}

/// Interprets a raw CLI value as the most specific TOML scalar.
fn parse_scalar(raw: &str) -> toml::Value {
    if let Ok(b) = raw.parse::<bool>() {
        toml::Value::Boolean(b)
    } else if let Ok(i) = raw.parse::<i64>() {
        toml::Value::Integer(i)
    } else if let Ok(f) = raw.parse::<f64>() {
        toml::Value::Float(f)
    } else {
        toml::Value::String(raw.to_string())
    }
}

const CONFIG_TEMPLATE: &str = r#"# redraft configuration (~/.config/redraft/config.toml)
# Every key is optional; values below are the defaults.

[endpoint]
# Base URL of the generation endpoint.
url = "http://localhost:11434"
# Model tag requested from the endpoint.
model = "yasserrmd/Qwen2.5-7B-Instruct-1M:latest"
# Wire protocol: "ollama" (native /api/generate) or "openai" (/v1/chat/completions).
protocol = "ollama"
# Request streamed output. The stall and repetition watchdogs need deltas;
# only disable for endpoints without a streaming mode.
stream = true

[sampling]
# Optional overrides on the per-stage sampling defaults, e.g.:
# temperature = 0.3
# top_p = 0.85
# max_output_tokens = 8192

[chunking]
polish_max_chars = 1000
translate_max_chars = 1500

[watchdog]
idle_interval_secs = 30
max_idle_strikes = 3
hard_timeout_secs = 180
repetition_window = 100
repetition_check_interval = 500

[retry]
max_retries = 2
# Output below this fraction of the input triggers one regeneration.
min_acceptable_ratio = 0.6

[dedup]
similarity_threshold = 0.8

[output]
dir = "processed"
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_redraft_env() {
        remove_env("REDRAFT_ENDPOINT");
        remove_env("REDRAFT_MODEL");
        remove_env("REDRAFT_PROTOCOL");
        remove_env("REDRAFT_OUTPUT_DIR");
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.endpoint.url, "http://localhost:11434");
        assert_eq!(config.endpoint.protocol, Protocol::Ollama);
        assert!(config.endpoint.stream);

        assert_eq!(config.chunking.polish_max_chars, 1000);
        assert_eq!(config.chunking.translate_max_chars, 1500);

        assert_eq!(config.watchdog.idle_interval_secs, 30);
        assert_eq!(config.watchdog.max_idle_strikes, 3);
        assert_eq!(config.watchdog.hard_timeout_secs, 180);
        assert_eq!(config.watchdog.repetition_window, 100);
        assert_eq!(config.watchdog.repetition_check_interval, 500);

        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.retry.min_acceptable_ratio, 0.6);
        assert_eq!(config.dedup.similarity_threshold, 0.8);
        assert_eq!(config.output.dir, PathBuf::from("processed"));
    }

    #[test]
    fn test_load_from_toml_file() {
        let toml_content = r#"
            [endpoint]
            url = "http://gpu-box:11434"
            model = "qwen2.5:32b"
            protocol = "openai"
            stream = false

            [watchdog]
            idle_interval_secs = 10
            max_idle_strikes = 5

            [retry]
            max_retries = 1
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.endpoint.url, "http://gpu-box:11434");
        assert_eq!(config.endpoint.model, "qwen2.5:32b");
        assert_eq!(config.endpoint.protocol, Protocol::Openai);
        assert!(!config.endpoint.stream);
        assert_eq!(config.watchdog.idle_interval_secs, 10);
        assert_eq!(config.watchdog.max_idle_strikes, 5);
        assert_eq!(config.retry.max_retries, 1);
        // Untouched sections keep defaults.
        assert_eq!(config.dedup.similarity_threshold, 0.8);
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let toml_content = r#"
            [dedup]
            similarity_threshold = 0.9
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.dedup.similarity_threshold, 0.9);
        assert_eq!(config.endpoint.url, "http://localhost:11434");
        assert_eq!(config.retry.max_retries, 2);
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let config = Config::load_or_default(Path::new("/nonexistent/redraft.toml"));
        assert_eq!(config, Config::default());
    }

    #[test]
    #[should_panic(expected = "Failed to load config")]
    fn test_load_or_default_panics_on_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"endpoint = not valid toml").unwrap();
        let _ = Config::load_or_default(temp_file.path());
    }

    #[test]
    fn test_env_override_endpoint_and_model() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_redraft_env();
        set_env("REDRAFT_ENDPOINT", "http://remote:11434");
        set_env("REDRAFT_MODEL", "qwen3:30b");

        let config = Config::default().with_env_overrides();
        assert_eq!(config.endpoint.url, "http://remote:11434");
        assert_eq!(config.endpoint.model, "qwen3:30b");

        clear_redraft_env();
    }

    #[test]
    fn test_env_override_protocol() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_redraft_env();
        set_env("REDRAFT_PROTOCOL", "openai");

        let config = Config::default().with_env_overrides();
        assert_eq!(config.endpoint.protocol, Protocol::Openai);

        clear_redraft_env();
    }

    #[test]
    fn test_env_override_empty_string_ignored() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_redraft_env();
        set_env("REDRAFT_MODEL", "");

        let config = Config::default().with_env_overrides();
        assert_eq!(config.endpoint.model, defaults::MODEL);

        clear_redraft_env();
    }

    #[test]
    fn test_protocol_parse() {
        assert_eq!(Protocol::parse("ollama").unwrap(), Protocol::Ollama);
        assert_eq!(Protocol::parse("OpenAI").unwrap(), Protocol::Openai);
        assert_eq!(Protocol::parse("llamacpp").unwrap(), Protocol::Openai);
        assert!(Protocol::parse("grpc").is_err());
    }

    #[test]
    fn test_sampling_overrides_apply_only_set_fields() {
        let overrides = SamplingOverrides {
            temperature: Some(0.7),
            max_output_tokens: Some(2048),
            ..Default::default()
        };
        let params = overrides.apply(SamplingParams::polish());

        assert_eq!(params.temperature, 0.7);
        assert_eq!(params.max_output_tokens, 2048);
        assert_eq!(params.top_p, SamplingParams::polish().top_p);
    }

    #[test]
    fn test_watchdog_settings_conversion() {
        let settings = WatchdogSettings {
            idle_interval_secs: 5,
            max_idle_strikes: 2,
            hard_timeout_secs: 60,
            repetition_window: 50,
            repetition_check_interval: 200,
        };
        let config = settings.to_watchdog_config();

        assert_eq!(config.idle_interval, Duration::from_secs(5));
        assert_eq!(config.max_idle_strikes, 2);
        assert_eq!(config.hard_timeout, Duration::from_secs(60));
        assert_eq!(config.repetition_window, 50);
        assert_eq!(config.repetition_check_interval, 200);
    }

    #[test]
    fn test_get_value_by_path() {
        let config = Config::default();
        assert_eq!(
            config.get_value_by_path("endpoint.url").unwrap(),
            "http://localhost:11434"
        );
        assert_eq!(
            config.get_value_by_path("watchdog.max_idle_strikes").unwrap(),
            "3"
        );
        assert!(config.get_value_by_path("nonexistent.key").is_err());
    }

    #[test]
    fn test_set_value_by_path_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        Config::set_value_by_path(&path, "retry.max_retries", "5").unwrap();
        Config::set_value_by_path(&path, "endpoint.model", "qwen3:8b").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.endpoint.model, "qwen3:8b");
    }

    #[test]
    fn test_set_value_by_path_rejects_schema_violations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let result = Config::set_value_by_path(&path, "retry.max_retries", "not-a-number");
        assert!(result.is_err());
        assert!(!path.exists(), "invalid config must not be written");
    }

    #[test]
    fn test_display_section() {
        let config = Config::default();
        let section = config.display_section("watchdog").unwrap();
        assert!(section.contains("idle_interval_secs = 30"));
        assert!(config.display_section("bogus").is_err());
    }

    #[test]
    fn test_dump_template_is_valid_toml_with_defaults() {
        let parsed: Config = toml::from_str(&Config::dump_template()).unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_default_path_is_xdg_compliant() {
        let path = Config::default_path();
        let path_str = path.to_string_lossy();
        assert!(path_str.contains("redraft"));
        assert!(path_str.ends_with("config.toml"));
    }
}
