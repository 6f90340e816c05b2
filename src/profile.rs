//! Translation profiles and profile resolution.
//!
//! A [`Profile`] decides which steps of the document lifecycle run on their
//! own and which locales take part at all. Units are mapped to a profile by a
//! [`ProfileResolver`]; [`ProfileSettings`] is the configured implementation.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::TrackerError;
use crate::unit::TranslatableUnit;

pub const MANUAL: &str = "manual";
pub const AUTOMATIC: &str = "automatic";
pub const DISABLED: &str = "disabled";

/// Per-locale override inside a profile.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LanguageOverride {
    /// Follow the profile-wide settings.
    #[default]
    Default,
    /// The locale never takes part in translation.
    Disabled,
    /// Locale-specific automation.
    Custom {
        #[serde(default)]
        auto_request: bool,
        #[serde(default)]
        auto_download: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub auto_upload: bool,
    #[serde(default)]
    pub auto_request: bool,
    #[serde(default)]
    pub auto_download: bool,
    /// Downloads triggered by notifications go through the task queue.
    #[serde(default)]
    pub auto_download_worker: bool,
    #[serde(default)]
    pub language_overrides: BTreeMap<String, LanguageOverride>,
}

impl Profile {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            auto_upload: false,
            auto_request: false,
            auto_download: false,
            auto_download_worker: false,
            language_overrides: BTreeMap::new(),
        }
    }

    pub fn manual() -> Self {
        Self::new(MANUAL, "Manual")
    }

    pub fn automatic() -> Self {
        Self {
            auto_upload: true,
            auto_request: true,
            auto_download: true,
            ..Self::new(AUTOMATIC, "Automatic")
        }
    }

    pub fn disabled() -> Self {
        Self::new(DISABLED, "Disabled")
    }

    pub fn with_override(mut self, locale: impl Into<String>, value: LanguageOverride) -> Self {
        self.language_overrides.insert(locale.into(), value);
        self
    }

    /// True for the profile that switches translation off entirely.
    pub fn is_disabled(&self) -> bool {
        self.id == DISABLED
    }

    pub fn locale_disabled(&self, locale: &str) -> bool {
        self.is_disabled()
            || matches!(
                self.language_overrides.get(locale),
                Some(LanguageOverride::Disabled)
            )
    }

    pub fn auto_request_for(&self, locale: &str) -> bool {
        match self.language_overrides.get(locale) {
            Some(LanguageOverride::Disabled) => false,
            Some(LanguageOverride::Custom { auto_request, .. }) => *auto_request,
            _ => self.auto_request,
        }
    }

    pub fn auto_download_for(&self, locale: &str) -> bool {
        match self.language_overrides.get(locale) {
            Some(LanguageOverride::Disabled) => false,
            Some(LanguageOverride::Custom { auto_download, .. }) => *auto_download,
            _ => self.auto_download,
        }
    }
}

/// All profiles known to the tracker, keyed by id.
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: BTreeMap<String, Profile>,
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        let mut profiles = BTreeMap::new();
        for profile in [Profile::manual(), Profile::automatic(), Profile::disabled()] {
            profiles.insert(profile.id.clone(), profile);
        }
        Self { profiles }
    }
}

impl ProfileRegistry {
    /// Built-in profiles plus `custom`; a custom profile may replace a
    /// built-in one except `disabled`, which keeps its fixed meaning.
    pub fn with_custom(custom: impl IntoIterator<Item = Profile>) -> Self {
        let mut registry = Self::default();
        for profile in custom {
            if profile.id == DISABLED {
                continue;
            }
            registry.profiles.insert(profile.id.clone(), profile);
        }
        registry
    }

    pub fn get(&self, id: &str) -> Result<&Profile, TrackerError> {
        self.profiles
            .get(id)
            .ok_or_else(|| TrackerError::UnknownProfile(id.to_string()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }
}

/// Picks the profile id for a unit.
pub trait ProfileResolver {
    fn resolve(&self, unit: &dyn TranslatableUnit) -> String;
}

/// Resolution with precedence per-unit override, then bundle default, then
/// the global default.
#[derive(Debug, Clone)]
pub struct ProfileSettings {
    pub global_default: String,
    bundle_defaults: HashMap<(String, String), String>,
    unit_overrides: HashMap<(String, String), String>,
}

impl ProfileSettings {
    pub fn new(global_default: impl Into<String>) -> Self {
        Self {
            global_default: global_default.into(),
            bundle_defaults: HashMap::new(),
            unit_overrides: HashMap::new(),
        }
    }

    pub fn set_bundle_default(
        &mut self,
        unit_type: impl Into<String>,
        bundle: impl Into<String>,
        profile: impl Into<String>,
    ) {
        self.bundle_defaults
            .insert((unit_type.into(), bundle.into()), profile.into());
    }

    pub fn set_unit_override(
        &mut self,
        unit_type: impl Into<String>,
        unit_id: impl Into<String>,
        profile: impl Into<String>,
    ) {
        self.unit_overrides
            .insert((unit_type.into(), unit_id.into()), profile.into());
    }
}

impl ProfileResolver for ProfileSettings {
    fn resolve(&self, unit: &dyn TranslatableUnit) -> String {
        let unit_key = (unit.unit_type().to_string(), unit.id().to_string());
        if let Some(profile) = self.unit_overrides.get(&unit_key) {
            return profile.clone();
        }
        let bundle_key = (unit.unit_type().to_string(), unit.bundle().to_string());
        if let Some(profile) = self.bundle_defaults.get(&bundle_key) {
            return profile.clone();
        }
        self.global_default.clone()
    }
}
