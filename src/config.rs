//! Configuration loaded from `lingotrack.toml`.
//!
//! [`TrackerConfig`] holds every configurable parameter. Keys missing from
//! the file fall back to defaults. The `LINGOTEK_API_TOKEN` environment
//! variable takes precedence over the file.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::profile::{MANUAL, Profile, ProfileRegistry, ProfileSettings};
use crate::queue::RetryConfig;
use crate::tms::DEFAULT_BASE_URL;
use crate::tracker::TrackerSettings;

pub const DEFAULT_PATH: &str = "lingotrack.toml";
pub const TOKEN_ENV: &str = "LINGOTEK_API_TOKEN";

/// Upper bounds for the download retry settings.
pub const MAX_RETRIES_LIMIT: u32 = 20;
pub const MAX_BASE_DELAY_MS: u64 = 60 * 60 * 1000;

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token for the TMS API.
    #[serde(default)]
    pub api_token: String,

    #[serde(default)]
    pub project_id: String,

    /// Locale of units that do not carry one. Never a target.
    #[serde(default = "default_source_locale")]
    pub source_locale: String,

    #[serde(default)]
    pub target_locales: Vec<String>,

    /// Profile for units without a bundle default or unit override.
    #[serde(default = "default_profile")]
    pub default_profile: String,

    /// `"<type>.<bundle>" = "<profile>"`, e.g. `"node.article" = "automatic"`.
    #[serde(default)]
    pub bundle_profiles: BTreeMap<String, String>,

    /// Retries of a failed deferred download.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay in milliseconds for exponential backoff.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default)]
    pub profiles: Vec<Profile>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_source_locale() -> String {
    "en_US".to_string()
}

fn default_profile() -> String {
    MANUAL.to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_token: String::new(),
            project_id: String::new(),
            source_locale: default_source_locale(),
            target_locales: Vec::new(),
            default_profile: default_profile(),
            bundle_profiles: BTreeMap::new(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            profiles: Vec::new(),
        }
    }
}

impl TrackerConfig {
    /// Load `lingotrack.toml` from the current directory.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(DEFAULT_PATH))
    }

    /// Load the given file, using defaults when it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str::<TrackerConfig>(&contents)
                .with_context(|| format!("invalid config file {}", path.display()))?
        } else {
            Self::default()
        };

        if let Ok(token) = std::env::var(TOKEN_ENV)
            && !token.is_empty()
        {
            config.api_token = token;
        }

        config.validate()?;
        Ok(config)
    }

    /// Every profile name the config refers to must exist and the retry
    /// settings must stay within bounds.
    pub fn validate(&self) -> Result<()> {
        if self.max_retries > MAX_RETRIES_LIMIT {
            anyhow::bail!("max_retries must be at most {MAX_RETRIES_LIMIT}");
        }
        if self.base_delay_ms > MAX_BASE_DELAY_MS {
            anyhow::bail!("base_delay_ms must be at most {MAX_BASE_DELAY_MS}");
        }
        if self.source_locale.is_empty() {
            anyhow::bail!("source_locale must not be empty");
        }

        let registry = self.registry();
        registry
            .get(&self.default_profile)
            .context("default_profile")?;
        for (bundle, profile) in &self.bundle_profiles {
            if !bundle.contains('.') {
                anyhow::bail!("bundle_profiles key '{bundle}' must look like '<type>.<bundle>'");
            }
            registry
                .get(profile)
                .with_context(|| format!("bundle_profiles.\"{bundle}\""))?;
        }
        Ok(())
    }

    pub fn registry(&self) -> ProfileRegistry {
        ProfileRegistry::with_custom(self.profiles.iter().cloned())
    }

    pub fn resolver(&self) -> ProfileSettings {
        let mut settings = ProfileSettings::new(self.default_profile.clone());
        for (bundle, profile) in &self.bundle_profiles {
            if let Some((unit_type, bundle)) = bundle.split_once('.') {
                settings.set_bundle_default(unit_type, bundle, profile.clone());
            }
        }
        settings
    }

    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            project_id: self.project_id.clone(),
            source_locale: self.source_locale.clone(),
            target_locales: self
                .target_locales
                .iter()
                .filter(|locale| **locale != self.source_locale)
                .cloned()
                .collect(),
            retry: RetryConfig {
                max_retries: self.max_retries,
                base_delay_ms: self.base_delay_ms,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{AUTOMATIC, ProfileResolver};
    use crate::unit::ContentEntity;

    #[test]
    fn default_config_values() {
        let config = TrackerConfig::default();
        assert_eq!(config.base_url, "https://myaccount.lingotek.com");
        assert_eq!(config.default_profile, "manual");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay_ms, 1000);
        assert!(config.api_token.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            project_id = "p-1"
            target_locales = ["es_MX", "de_DE"]
            max_retries = 5

            [bundle_profiles]
            "node.article" = "automatic"

            [[profiles]]
            id = "reviewed"
            auto_upload = true
            [profiles.language_overrides.de_DE]
            mode = "disabled"
        "#;
        let config: TrackerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.project_id, "p-1");
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.source_locale, "en_US");
        assert!(config.validate().is_ok());

        let registry = config.registry();
        assert!(registry.get("reviewed").unwrap().locale_disabled("de_DE"));

        let article = ContentEntity::new("node", "article", "1", "Llamas", "en_US");
        let page = ContentEntity::new("node", "page", "2", "About", "en_US");
        let resolver = config.resolver();
        assert_eq!(resolver.resolve(&article), AUTOMATIC);
        assert_eq!(resolver.resolve(&page), MANUAL);

        let settings = config.tracker_settings();
        assert_eq!(settings.retry.max_retries, 5);
        assert_eq!(settings.target_locales.len(), 2);
    }

    #[test]
    fn source_locale_is_never_a_target() {
        let config: TrackerConfig = toml::from_str(
            r#"
            source_locale = "de_DE"
            target_locales = ["es_MX", "de_DE", "en_US"]
            "#,
        )
        .unwrap();
        let settings = config.tracker_settings();
        assert_eq!(settings.source_locale, "de_DE");
        assert_eq!(settings.target_locales, vec!["es_MX", "en_US"]);
    }

    #[test]
    fn retry_settings_are_bounded() {
        let config: TrackerConfig = toml::from_str("max_retries = 1000\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_retries"));

        let config: TrackerConfig = toml::from_str("base_delay_ms = 86400000\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("base_delay_ms"));

        let config: TrackerConfig =
            toml::from_str("max_retries = 20\nbase_delay_ms = 3600000\n").unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_profile_reference_is_rejected() {
        let config: TrackerConfig = toml::from_str(
            r#"
            [bundle_profiles]
            "node.article" = "nightly"
            "#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(format!("{err:#}").contains("Unknown profile: nightly"));
    }

    #[test]
    fn load_from_file_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lingotrack.toml");
        std::fs::write(&path, "project_id = \"from-file\"\n").unwrap();
        let config = TrackerConfig::load_from(&path).unwrap();
        assert_eq!(config.project_id, "from-file");

        let missing = TrackerConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(missing.max_retries, 3);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lingotrack.toml");
        std::fs::write(&path, "max_retries = \"many\"\n").unwrap();
        assert!(TrackerConfig::load_from(&path).is_err());
    }
}
