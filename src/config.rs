use crate::breaker::BreakerOptions;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path, time::Duration};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String, // e.g., "0.0.0.0"
    pub port: u16,         // e.g., 5588
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}
fn default_request_timeout_ms() -> u64 { 30_000 }

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub url: String,
    #[serde(default = "default_upstream_timeout_ms")]
    pub timeout_ms: u64,
}
fn default_upstream_timeout_ms() -> u64 { 10_000 }

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_error_rate")]
    pub error_rate: f64,
    #[serde(default = "default_sample_size")]
    pub sample_size: u64,
    #[serde(default = "default_consecutive_failures")]
    pub consecutive_failures: u64,
    #[serde(default = "default_half_open_interval_ms")]
    pub half_open_interval_ms: u64,
    #[serde(default = "default_bucket_timeout_s")]
    pub bucket_timeout_s: u64,
}
fn default_error_rate() -> f64 { 0.1 }
fn default_sample_size() -> u64 { 100 }
fn default_consecutive_failures() -> u64 { 5 }
fn default_half_open_interval_ms() -> u64 { 5_000 }
fn default_bucket_timeout_s() -> u64 { 60 }

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            error_rate: default_error_rate(),
            sample_size: default_sample_size(),
            consecutive_failures: default_consecutive_failures(),
            half_open_interval_ms: default_half_open_interval_ms(),
            bucket_timeout_s: default_bucket_timeout_s(),
        }
    }
}

impl BreakerConfig {
    pub fn to_options(&self) -> BreakerOptions {
        BreakerOptions::new()
            .with_error_rate_threshold(self.error_rate)
            .with_min_sample_size(self.sample_size)
            .with_consecutive_failure_threshold(self.consecutive_failures)
            .with_half_open_interval(Duration::from_millis(self.half_open_interval_ms))
            .with_bucket_timeout(Duration::from_secs(self.bucket_timeout_s))
    }
}

impl Config {
    pub fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parses YAML, applies `TRIP_*` environment overrides, then validates.
    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let mut cfg: Self = serde_yaml::from_str(content).context("parsing config yaml")?;
        apply_env_overrides(&mut cfg);
        cfg.breaker.to_options().validate().context("invalid breaker section")?;
        Ok(cfg)
    }
}

pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(addr) = env::var("TRIP_HTTP_ADDR") { cfg.server.bind_addr = addr; }
    if let Ok(port) = env::var("TRIP_HTTP_PORT") {
        if let Ok(p) = port.parse::<u16>() { cfg.server.port = p; }
    }
    if let Ok(url) = env::var("TRIP_UPSTREAM_URL") { cfg.upstream.url = url; }
    if let Ok(ms) = env::var("TRIP_UPSTREAM_TIMEOUT_MS") {
        if let Ok(v) = ms.parse::<u64>() { cfg.upstream.timeout_ms = v.max(100); }
    }
    if let Ok(rate) = env::var("TRIP_ERROR_RATE") {
        if let Ok(v) = rate.parse::<f64>() { cfg.breaker.error_rate = v; }
    }
    if let Ok(n) = env::var("TRIP_SAMPLE_SIZE") {
        if let Ok(v) = n.parse::<u64>() { cfg.breaker.sample_size = v; }
    }
    if let Ok(n) = env::var("TRIP_CONSECUTIVE_FAILURES") {
        if let Ok(v) = n.parse::<u64>() { cfg.breaker.consecutive_failures = v; }
    }
    if let Ok(ms) = env::var("TRIP_HALF_OPEN_INTERVAL_MS") {
        if let Ok(v) = ms.parse::<u64>() { cfg.breaker.half_open_interval_ms = v; }
    }
}
