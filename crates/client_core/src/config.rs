use std::{path::Path, time::Duration};

use anyhow::{anyhow, Context};
use serde::Deserialize;
use url::Url;

pub const DEFAULT_SETTINGS_FILE: &str = "cabinet.toml";
const ENV_PREFIX: &str = "CABINET";

#[derive(Debug, Clone, Deserialize)]
pub struct ClientSettings {
    pub backend_url: String,
    pub request_timeout_secs: u64,
    pub submission_timeout_secs: u64,
    pub max_recording_secs: u64,
    pub max_document_bytes: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:8000".into(),
            request_timeout_secs: 30,
            submission_timeout_secs: 300,
            max_recording_secs: 1800,
            max_document_bytes: 20 * 1024 * 1024,
        }
    }
}

impl ClientSettings {
    /// Defaults, then the optional settings file, then `CABINET__*` variables.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_SETTINGS_FILE).required(false),
        };
        let mut settings: Self = config::Config::builder()
            .set_default("backend_url", defaults.backend_url)?
            .set_default("request_timeout_secs", defaults.request_timeout_secs)?
            .set_default("submission_timeout_secs", defaults.submission_timeout_secs)?
            .set_default("max_recording_secs", defaults.max_recording_secs)?
            .set_default("max_document_bytes", defaults.max_document_bytes as u64)?
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("failed to read client settings")?
            .try_deserialize()
            .context("invalid client settings")?;
        settings.backend_url = normalize_backend_url(&settings.backend_url)?;
        Ok(settings)
    }

    pub fn with_backend_url(mut self, backend_url: &str) -> anyhow::Result<Self> {
        self.backend_url = normalize_backend_url(backend_url)?;
        Ok(self)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn submission_timeout(&self) -> Duration {
        Duration::from_secs(self.submission_timeout_secs.max(1))
    }

    pub fn max_recording(&self) -> Duration {
        Duration::from_secs(self.max_recording_secs.max(1))
    }
}

pub fn normalize_backend_url(raw: &str) -> anyhow::Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Ok(ClientSettings::default().backend_url);
    }
    let parsed =
        Url::parse(trimmed).with_context(|| format!("invalid backend url '{trimmed}'"))?;
    match parsed.scheme() {
        "http" | "https" => Ok(trimmed.to_string()),
        other => Err(anyhow!(
            "backend url must start with http:// or https:// (got scheme '{other}')"
        )),
    }
}
