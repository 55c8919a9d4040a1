use serde::Deserialize;
use std::time::Duration;
use config::{Config as ConfigLoader, Environment, File};
use url::Url;

use crate::error::Result;
use crate::gate::GateOptions;
use crate::session::SessionConfig;

pub const ENV_PREFIX: &str = "CONSUMER_HOST";

#[derive(Debug, Deserialize, Clone)]
pub struct GateConfig {
    pub max_concurrent: usize,
    pub default_ttl_ms: u64,
    pub pending_wait_timeout_ms: u64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub queue_concurrency: usize,
    pub queue_min_interval_ms: u64,
}

impl From<&GateConfig> for GateOptions {
    fn from(cfg: &GateConfig) -> Self {
        Self {
            max_concurrent: cfg.max_concurrent,
            default_ttl: Duration::from_millis(cfg.default_ttl_ms),
            pending_wait_timeout: Duration::from_millis(cfg.pending_wait_timeout_ms),
            max_attempts: cfg.max_attempts,
            retry_delay: Duration::from_millis(cfg.retry_delay_ms),
            queue_concurrency: cfg.queue_concurrency,
            queue_min_interval: Duration::from_millis(cfg.queue_min_interval_ms),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    // General
    pub log_level: String,

    // Consumer host
    pub endpoint: String, // CONSUMER_HOST_ENDPOINT
    pub request_timeout_ms: u64,

    // Sign-in message
    pub domain: String,
    pub uri: String,
    pub statement: String,
    pub chain_id: u64,

    // Wallet
    pub private_key: Option<String>,
    pub token_dir: String,

    pub gate: GateConfig,
}

impl Config {
    /// Defaults, then an optional `consumer-host.{toml,yaml,json}` file, then
    /// `CONSUMER_HOST_*` environment variables (`.env` is loaded first).
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::build(environment())
    }

    fn build(env: Environment) -> Result<Self> {
        let config = ConfigLoader::builder()
            .set_default("log_level", "info")?
            .set_default("endpoint", "http://localhost:8010")?
            .set_default("request_timeout_ms", 30_000)?
            .set_default("domain", "localhost")?
            .set_default("uri", "http://localhost")?
            .set_default("statement", "Sign in to the consumer host to manage your API keys and hosting plans.")?
            .set_default("chain_id", 137)?
            .set_default("token_dir", ".consumer-host")?
            .set_default("gate.max_concurrent", 3)?
            .set_default("gate.default_ttl_ms", 3_000)?
            .set_default("gate.pending_wait_timeout_ms", 50_000)?
            .set_default("gate.max_attempts", 4)?
            .set_default("gate.retry_delay_ms", 10_000)?
            .set_default("gate.queue_concurrency", 2)?
            .set_default("gate.queue_min_interval_ms", 1_500)?
            .add_source(File::with_name("consumer-host").required(false))
            .add_source(env)
            .build()?;

        Ok(config.try_deserialize()?)
    }

    pub fn endpoint_url(&self) -> Result<Url> {
        Ok(Url::parse(&self.endpoint)?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn gate_options(&self) -> GateOptions {
        GateOptions::from(&self.gate)
    }

    pub fn session_config(&self) -> Result<SessionConfig> {
        Ok(SessionConfig {
            endpoint: self.endpoint_url()?,
            domain: self.domain.clone(),
            uri: self.uri.clone(),
            statement: Some(self.statement.clone()).filter(|s| !s.trim().is_empty()),
            chain_id: self.chain_id,
        })
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
