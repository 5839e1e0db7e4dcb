use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs::read_to_string;

pub const CONFIG_FILE: &str = "Config.toml";

/// How the external decoder is invoked.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Decoder executable, looked up in PATH unless it contains a path
    pub executable: String,

    /// Tokens placed before the seek offset and input
    pub before_options: Vec<String>,

    /// Tokens placed after the output format and filter chain
    pub options: Vec<String>,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        DecoderConfig {
            executable: "ffmpeg".to_string(),
            before_options: tokens(&[
                "-reconnect",
                "1",
                "-reconnect_streamed",
                "1",
                "-reconnect_delay_max",
                "5",
            ]),
            options: tokens(&["-vn"]),
        }
    }
}

fn tokens(tokens: &[&str]) -> Vec<String> {
    tokens.iter().map(|t| t.to_string()).collect()
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Pull frames at the voice transport's 20 ms cadence instead of as fast
    /// as the decoder produces them
    pub paced: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig { paced: true }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    #[serde(flatten)]
    pub decoder: DecoderConfig,

    pub output: OutputConfig,
}

impl Config {
    pub fn from_toml(config: &str) -> Result<Config> {
        let config: Config = toml::from_str(config)?;

        Ok(config)
    }
}

pub async fn load() -> Result<Config> {
    load_from(CONFIG_FILE).await
}

pub async fn load_from(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let config = read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    Config::from_toml(&config).with_context(|| format!("Invalid config in {}", path.display()))
}
