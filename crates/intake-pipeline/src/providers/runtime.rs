//! Per-job provider resolution

use std::time::Duration;

use crate::config::ProvidersConfig;
use crate::error::{Error, Result};

/// Endpoint, models and credentials for one job; never shared across jobs
#[derive(Clone)]
pub struct ProviderRuntimeConfig {
    pub provider: String,
    pub base_url: String,
    pub chat_model: String,
    pub ocr_model: String,
    pub transcription_model: String,
    pub api_keys: Vec<String>,
    pub chat_timeout: Duration,
    pub ocr_timeout: Duration,
    pub transcription_timeout: Duration,
}

impl ProviderRuntimeConfig {
    /// Resolve a provider by id (or the default), preferring request-supplied keys
    pub fn resolve(
        config: &ProvidersConfig,
        provider: Option<&str>,
        request_keys: &[String],
    ) -> Result<Self> {
        let id = provider
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(&config.default_provider)
            .to_lowercase();

        let entry = config
            .entries
            .get(&id)
            .ok_or_else(|| Error::Config(format!("Unknown LLM provider '{}'", id)))?;

        if entry.base_url.trim().is_empty() {
            return Err(Error::Config(format!("Provider '{}' has no base_url", id)));
        }

        let api_keys: Vec<String> = if request_keys.iter().any(|k| !k.trim().is_empty()) {
            request_keys
                .iter()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect()
        } else {
            entry.api_keys.clone()
        };
        if api_keys.is_empty() {
            return Err(Error::Config(format!(
                "No API key configured for provider '{}'",
                id
            )));
        }

        Ok(Self {
            provider: id,
            base_url: entry.base_url.trim_end_matches('/').to_string(),
            chat_model: entry.chat_model.clone(),
            ocr_model: entry.ocr_model.clone(),
            transcription_model: entry.transcription_model.clone(),
            api_keys,
            chat_timeout: Duration::from_secs(entry.chat_timeout_secs),
            ocr_timeout: Duration::from_secs(entry.ocr_timeout_secs),
            transcription_timeout: Duration::from_secs(entry.transcription_timeout_secs),
        })
    }
}

impl std::fmt::Debug for ProviderRuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRuntimeConfig")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("chat_model", &self.chat_model)
            .field("ocr_model", &self.ocr_model)
            .field("transcription_model", &self.transcription_model)
            .field("api_keys", &format!("<{} redacted>", self.api_keys.len()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;

    fn providers() -> ProvidersConfig {
        let mut config = ProvidersConfig::default();
        config.entries.insert(
            "local".to_string(),
            ProviderConfig {
                base_url: "http://localhost:8000/v1/".to_string(),
                chat_model: "m".to_string(),
                api_keys: vec!["configured".to_string()],
                ..Default::default()
            },
        );
        config
    }

    #[test]
    fn test_request_keys_take_precedence() {
        let runtime =
            ProviderRuntimeConfig::resolve(&providers(), Some("Local"), &[" k1 ".into(), "".into()])
                .unwrap();
        assert_eq!(runtime.provider, "local");
        assert_eq!(runtime.api_keys, vec!["k1"]);
        assert_eq!(runtime.base_url, "http://localhost:8000/v1");
    }

    #[test]
    fn test_falls_back_to_configured_keys() {
        let runtime = ProviderRuntimeConfig::resolve(&providers(), Some("local"), &[]).unwrap();
        assert_eq!(runtime.api_keys, vec!["configured"]);
    }

    #[test]
    fn test_missing_credentials_is_config_error() {
        let err = ProviderRuntimeConfig::resolve(&providers(), Some("openai"), &[]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = ProviderRuntimeConfig::resolve(&providers(), Some("nope"), &["k".into()]).unwrap_err();
        assert!(err.to_string().contains("Unknown LLM provider"));
    }

    #[test]
    fn test_debug_redacts_keys() {
        let runtime =
            ProviderRuntimeConfig::resolve(&providers(), Some("local"), &["secret-key".into()]).unwrap();
        let debug = format!("{:?}", runtime);
        assert!(!debug.contains("secret-key"));
        assert!(debug.contains("<1 redacted>"));
    }
}
