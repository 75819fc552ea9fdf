use anyhow::Result;
use clap_serde_derive::ClapSerde;
use serde::Deserialize;

#[derive(ClapSerde, Deserialize, Debug)]
pub struct Config {
    /// The address the listener binds to
    #[arg(short, long, env, default_value = "0.0.0.0")]
    pub(crate) address: String,

    /// The port the listener binds to
    #[arg(short, long, env, default_value = "10000")]
    pub(crate) port: u16,

    /// Credential for the hosted vision model, required at startup
    #[arg(long, env = "STYLE_API_KEY", default_value = "")]
    pub(crate) api_key: String,

    /// Base URL of the chat completions API
    #[arg(long, env, default_value = "https://api.openai.com/v1")]
    pub(crate) api_base_url: String,

    /// Model used for style detection and outfit suggestions
    #[arg(long, env, default_value = "gpt-4o")]
    pub(crate) model: String,

    /// Per-call timeout for outbound requests, in seconds
    #[arg(long, env, default_value = "15")]
    pub(crate) request_timeout_secs: u64,

    /// Upper bound on vision model calls per inbound request
    #[arg(long, env, default_value = "3")]
    pub(crate) max_attempts: u32,

    /// Wait between attempts, in seconds, growing linearly per attempt
    #[arg(long, env, default_value = "2")]
    pub(crate) backoff_base_secs: u64,

    /// Shortest suggestion accepted as complete, in characters
    #[arg(long, env, default_value = "80")]
    pub(crate) min_suggestion_chars: usize,

    /// Style returned when detection never yields a known label
    #[arg(long, env, default_value = "western")]
    pub(crate) fallback_style: String,

    /// OTLP endpoint telemetry is exported to, console only when empty
    #[arg(long, env, default_value = "")]
    pub(crate) otel_endpoint: String,

    /// Log to console even when an OTLP endpoint is set
    #[arg(long, env)]
    pub(crate) console: bool,
}

impl Config {
    pub fn from_toml(path: &str) -> Result<<Config as ClapSerde>::Opt> {
        let str = std::fs::read_to_string(path)?;
        let config = toml::from_str(&str)?;
        Ok(config)
    }
}
