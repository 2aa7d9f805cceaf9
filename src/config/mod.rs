//! Application configuration.
//!
//! `Config` is a flat, immutable value object: every field maps directly to
//! one of the environment variables documented in the external-interfaces
//! section, and all of them may also be set in a TOML file. Environment
//! variables always win over the file, mirroring the teacher's
//! `Figment::new().merge(Toml::file(...)).merge(Env::raw())` layering.

pub mod defaults;

use std::fmt;

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Deserializer, Serialize, de};

use defaults::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub timeout_connect: f64,
    #[serde(default)]
    pub timeout_read: f64,
    #[serde(default)]
    pub timeout_write: f64,
    #[serde(default)]
    pub timeout_pool: f64,
    #[serde(default = "default_stream_timeout")]
    pub stream_timeout: f64,

    #[serde(default = "default_max_redirects")]
    pub max_redirects: u32,
    #[serde(default = "default_stream_chunk_size")]
    pub stream_chunk_size: usize,
    #[serde(default = "default_max_range_size")]
    pub max_range_size: u64,
    #[serde(default = "default_max_request_size")]
    pub max_request_size: usize,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default)]
    pub use_proxy: bool,
    #[serde(default, deserialize_with = "deserialize_string_list")]
    pub proxy_list: Vec<String>,
    #[serde(default = "default_proxy_test_url")]
    pub proxy_test_url: String,
    #[serde(default = "default_proxy_test_timeout")]
    pub proxy_test_timeout: u64,
    #[serde(default = "default_max_proxy_retries")]
    pub max_proxy_retries: u32,

    /// Self scheme used when rewriting m3u8 URLs back through this proxy.
    #[serde(default = "default_our_scheme")]
    pub our_scheme: String,
    /// Self host[:port] used when rewriting m3u8 URLs; empty disables rewriting
    /// back to an externally-known host and falls back to the inbound Host header.
    #[serde(default)]
    pub our_domain: String,

    #[serde(default = "default_video_extensions")]
    pub video_extensions: Vec<String>,
    #[serde(default = "default_video_patterns")]
    pub video_patterns: Vec<String>,
    #[serde(default = "default_video_indicators")]
    pub video_indicators: Vec<String>,
    #[serde(default = "default_video_content_types")]
    pub video_content_types: Vec<String>,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_stream_timeout() -> f64 {
    DEFAULT_STREAM_TIMEOUT
}
fn default_max_redirects() -> u32 {
    DEFAULT_MAX_REDIRECTS
}
fn default_stream_chunk_size() -> usize {
    DEFAULT_STREAM_CHUNK_SIZE
}
fn default_max_range_size() -> u64 {
    DEFAULT_MAX_RANGE_SIZE
}
fn default_max_request_size() -> usize {
    DEFAULT_MAX_REQUEST_SIZE
}
fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}
fn default_proxy_test_url() -> String {
    DEFAULT_PROXY_TEST_URL.to_string()
}
fn default_proxy_test_timeout() -> u64 {
    DEFAULT_PROXY_TEST_TIMEOUT
}
fn default_max_proxy_retries() -> u32 {
    DEFAULT_MAX_PROXY_RETRIES
}
fn default_our_scheme() -> String {
    DEFAULT_OUR_SCHEME.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: default_log_level(),
            port: default_port(),
            timeout_connect: DEFAULT_TIMEOUT_CONNECT,
            timeout_read: DEFAULT_TIMEOUT_READ,
            timeout_write: DEFAULT_TIMEOUT_WRITE,
            timeout_pool: DEFAULT_TIMEOUT_POOL,
            stream_timeout: default_stream_timeout(),
            max_redirects: default_max_redirects(),
            stream_chunk_size: default_stream_chunk_size(),
            max_range_size: default_max_range_size(),
            max_request_size: default_max_request_size(),
            user_agent: default_user_agent(),
            use_proxy: DEFAULT_USE_PROXY,
            proxy_list: Vec::new(),
            proxy_test_url: default_proxy_test_url(),
            proxy_test_timeout: default_proxy_test_timeout(),
            max_proxy_retries: default_max_proxy_retries(),
            our_scheme: default_our_scheme(),
            our_domain: String::new(),
            video_extensions: default_video_extensions(),
            video_patterns: default_video_patterns(),
            video_indicators: default_video_indicators(),
            video_content_types: default_video_content_types(),
        }
    }
}

/// Accepts either a TOML/JSON array of strings or a single comma-separated
/// string (the shape `PROXY_LIST` arrives in from the environment).
fn deserialize_string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ListOrCsv;

    impl<'de> de::Visitor<'de> for ListOrCsv {
        type Value = Vec<String>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "a comma-separated string or an array of strings")
        }

        fn visit_str<E>(self, v: &str) -> Result<Vec<String>, E>
        where
            E: de::Error,
        {
            Ok(v
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect())
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Vec<String>, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            let mut out = Vec::new();
            while let Some(item) = seq.next_element::<String>()? {
                out.push(item);
            }
            Ok(out)
        }
    }

    deserializer.deserialize_any(ListOrCsv)
}

impl Config {
    /// Loads configuration from the file named by `CONFIG_FILE` (default
    /// `config.toml`), then overlays environment variables, which always win.
    pub fn load() -> Result<Self> {
        let config_file =
            std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());
        Self::load_from_file(&config_file)
    }

    pub fn load_from_file(config_file: &str) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if std::path::Path::new(config_file).exists() {
            figment = figment.merge(Toml::file(config_file));
        } else {
            tracing::warn!(
                "config file '{}' not found, using defaults overlaid by environment",
                config_file
            );
        }

        let config: Config = figment
            .merge(Env::raw())
            .extract()
            .context("failed to load configuration")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.timeout_connect <= 0.0
            || self.timeout_read <= 0.0
            || self.timeout_write <= 0.0
            || self.timeout_pool <= 0.0
        {
            anyhow::bail!("all upstream timeouts must be positive");
        }
        if self.stream_chunk_size == 0 {
            anyhow::bail!("stream_chunk_size must be positive");
        }
        if self.max_range_size == 0 {
            anyhow::bail!("max_range_size must be positive");
        }
        if self.max_request_size == 0 {
            anyhow::bail!("max_request_size must be positive");
        }
        Ok(())
    }
}
