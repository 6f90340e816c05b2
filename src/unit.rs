//! Local objects that can be translated.
//!
//! Content entities and configuration objects share one view, the
//! [`TranslatableUnit`] trait, so the tracker never needs to know which kind
//! of object it is handling.

use std::collections::BTreeMap;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::TrackerError;
use crate::state_machine::RecordKey;
use crate::tms::{SourceDocument, TranslatedDocument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    #[default]
    Text,
    /// A URI; malformed values are never sent to or accepted from the TMS.
    Link,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub kind: FieldKind,
    /// Maximum length in characters, if the storage imposes one.
    #[serde(default)]
    pub max_length: Option<usize>,
}

impl Field {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            kind: FieldKind::Text,
            max_length: None,
        }
    }

    pub fn link(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: FieldKind::Link,
            ..Self::text(name, value)
        }
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    fn has_valid_link(&self, value: &str) -> bool {
        value.is_empty() || Url::parse(value).is_ok()
    }
}

pub trait TranslatableUnit {
    fn id(&self) -> &str;
    /// Entity type id, or `config` for configuration objects.
    fn unit_type(&self) -> &str;
    fn bundle(&self) -> &str;
    fn title(&self) -> &str;
    fn locale(&self) -> &str;
    fn fields(&self) -> &[Field];

    fn key(&self) -> RecordKey {
        RecordKey::new(self.unit_type(), self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentEntity {
    pub entity_type: String,
    pub bundle: String,
    pub id: String,
    pub title: String,
    /// Empty falls back to the configured source locale.
    #[serde(default)]
    pub locale: String,
    #[serde(default)]
    pub fields: Vec<Field>,
}

impl ContentEntity {
    pub fn new(
        entity_type: impl Into<String>,
        bundle: impl Into<String>,
        id: impl Into<String>,
        title: impl Into<String>,
        locale: impl Into<String>,
    ) -> Self {
        let title = title.into();
        Self {
            entity_type: entity_type.into(),
            bundle: bundle.into(),
            id: id.into(),
            fields: vec![Field::text("title", title.clone())],
            title,
            locale: locale.into(),
        }
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.retain(|f| f.name != field.name);
        self.fields.push(field);
        self
    }

    /// Replace a field value, keeping its kind and limits.
    pub fn set_field(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        if name == "title" {
            self.title = value.clone();
        }
        match self.fields.iter_mut().find(|f| f.name == name) {
            Some(field) => field.value = value,
            None => self.fields.push(Field::text(name, value)),
        }
    }
}

impl TranslatableUnit for ContentEntity {
    fn id(&self) -> &str {
        &self.id
    }

    fn unit_type(&self) -> &str {
        &self.entity_type
    }

    fn bundle(&self) -> &str {
        &self.bundle
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn locale(&self) -> &str {
        &self.locale
    }

    fn fields(&self) -> &[Field] {
        &self.fields
    }
}

/// A configuration object such as `system.site` or `views.view.frontpage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigObject {
    pub name: String,
    pub label: String,
    #[serde(default)]
    pub locale: String,
    #[serde(default)]
    pub fields: Vec<Field>,
}

impl ConfigObject {
    pub fn new(name: impl Into<String>, label: impl Into<String>, locale: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            locale: locale.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.retain(|f| f.name != field.name);
        self.fields.push(field);
        self
    }
}

impl TranslatableUnit for ConfigObject {
    fn id(&self) -> &str {
        &self.name
    }

    fn unit_type(&self) -> &str {
        "config"
    }

    // The provider prefix, e.g. `system` for `system.site`.
    fn bundle(&self) -> &str {
        self.name.split('.').next().unwrap_or(&self.name)
    }

    fn title(&self) -> &str {
        &self.label
    }

    fn locale(&self) -> &str {
        &self.locale
    }

    fn fields(&self) -> &[Field] {
        &self.fields
    }
}

/// Owned form of any unit, as kept by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Unit {
    Content(ContentEntity),
    Config(ConfigObject),
}

impl Unit {
    fn inner(&self) -> &dyn TranslatableUnit {
        match self {
            Unit::Content(entity) => entity,
            Unit::Config(config) => config,
        }
    }
}

impl From<ContentEntity> for Unit {
    fn from(entity: ContentEntity) -> Self {
        Unit::Content(entity)
    }
}

impl From<ConfigObject> for Unit {
    fn from(config: ConfigObject) -> Self {
        Unit::Config(config)
    }
}

impl TranslatableUnit for Unit {
    fn id(&self) -> &str {
        self.inner().id()
    }

    fn unit_type(&self) -> &str {
        self.inner().unit_type()
    }

    fn bundle(&self) -> &str {
        self.inner().bundle()
    }

    fn title(&self) -> &str {
        self.inner().title()
    }

    fn locale(&self) -> &str {
        self.inner().locale()
    }

    fn fields(&self) -> &[Field] {
        self.inner().fields()
    }
}

/// Build the upload payload for a unit.
///
/// Link fields holding a malformed URI are left out and logged; the local
/// value is untouched.
pub fn source_document(unit: &dyn TranslatableUnit, job_id: Option<&str>) -> SourceDocument {
    let mut fields = BTreeMap::new();
    for field in unit.fields() {
        if field.kind == FieldKind::Link && !field.has_valid_link(&field.value) {
            warn!(
                unit = %unit.key(),
                field = %field.name,
                value = %field.value,
                "skipping malformed link value"
            );
            continue;
        }
        fields.insert(field.name.clone(), field.value.clone());
    }

    SourceDocument {
        title: unit.title().to_string(),
        locale: unit.locale().to_string(),
        job_id: job_id.map(str::to_string),
        fields,
    }
}

/// Validate a downloaded translation against the unit's fields and return
/// the translated field values.
///
/// A value longer than the field allows fails the whole download. A
/// malformed translated link is logged and the source value kept.
pub fn merge_translation(
    unit: &dyn TranslatableUnit,
    locale: &str,
    translated: &TranslatedDocument,
) -> Result<BTreeMap<String, String>, TrackerError> {
    let mut merged = BTreeMap::new();

    for field in unit.fields() {
        let Some(value) = translated.fields.get(&field.name) else {
            merged.insert(field.name.clone(), field.value.clone());
            continue;
        };

        if let Some(max) = field.max_length {
            if value.chars().count() > max {
                return Err(TrackerError::ContentTooLarge {
                    unit_type: unit.unit_type().to_string(),
                    title: unit.title().to_string(),
                    locale: locale.to_string(),
                    field: field.name.clone(),
                });
            }
        }

        if field.kind == FieldKind::Link && !field.has_valid_link(value) {
            warn!(
                unit = %unit.key(),
                locale,
                field = %field.name,
                value = %value,
                "ignoring malformed translated link, keeping source value"
            );
            merged.insert(field.name.clone(), field.value.clone());
            continue;
        }

        merged.insert(field.name.clone(), value.clone());
    }

    for name in translated.fields.keys() {
        if !merged.contains_key(name) {
            debug!(unit = %unit.key(), locale, field = %name, "dropping unknown translated field");
        }
    }

    Ok(merged)
}

/// Content fingerprint used to notice source edits between saves.
///
/// SHA-256 hex digest of the title and the fields sorted by name, encoded as
/// JSON. It is persisted, so it must not depend on the toolchain.
pub fn fingerprint(unit: &dyn TranslatableUnit) -> String {
    let mut fields: Vec<(&str, &str)> = unit
        .fields()
        .iter()
        .map(|f| (f.name.as_str(), f.value.as_str()))
        .collect();
    fields.sort_unstable();

    let canonical = serde_json::json!({ "title": unit.title(), "fields": fields });
    format!("{:x}", Sha256::digest(canonical.to_string().as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article() -> ContentEntity {
        ContentEntity::new("node", "article", "1", "Llamas are cool", "en_US")
            .with_field(Field::text("body", "Llamas are very cool").with_max_length(40))
            .with_field(Field::link("link", "https://example.com/llamas"))
    }

    fn translated(pairs: &[(&str, &str)]) -> TranslatedDocument {
        TranslatedDocument {
            fields: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn config_object_identity() {
        let config = ConfigObject::new("system.site", "System information", "en_US")
            .with_field(Field::text("name", "Drupal"));
        assert_eq!(config.unit_type(), "config");
        assert_eq!(config.bundle(), "system");
        assert_eq!(config.key().to_string(), "config:system.site");
        assert_eq!(config.title(), "System information");
    }

    #[test]
    fn unit_enum_delegates() {
        let unit: Unit = article().into();
        assert_eq!(unit.unit_type(), "node");
        assert_eq!(unit.bundle(), "article");
        assert_eq!(unit.fields().len(), 3);
    }

    #[test]
    fn source_document_skips_malformed_links() {
        let entity = article().with_field(Field::link("link", "not a uri"));
        let doc = source_document(&entity, Some("job-7"));
        assert_eq!(doc.title, "Llamas are cool");
        assert_eq!(doc.job_id.as_deref(), Some("job-7"));
        assert!(doc.fields.contains_key("body"));
        assert!(!doc.fields.contains_key("link"));
        // the local value is preserved
        assert_eq!(entity.fields()[2].value, "not a uri");
    }

    #[test]
    fn merge_translation_accepts_valid_values() {
        let merged = merge_translation(
            &article(),
            "es_MX",
            &translated(&[
                ("title", "Las llamas son chéveres"),
                ("body", "Las llamas son muy chéveres"),
                ("link", "https://example.com/es/llamas"),
                ("extra", "ignored"),
            ]),
        )
        .unwrap();
        assert_eq!(merged["title"], "Las llamas son chéveres");
        assert_eq!(merged["link"], "https://example.com/es/llamas");
        assert!(!merged.contains_key("extra"));
    }

    #[test]
    fn merge_translation_keeps_source_for_malformed_link() {
        let merged = merge_translation(
            &article(),
            "es_MX",
            &translated(&[("link", "ht tp://broken")]),
        )
        .unwrap();
        assert_eq!(merged["link"], "https://example.com/llamas");
        assert_eq!(merged["body"], "Llamas are very cool");
    }

    #[test]
    fn merge_translation_rejects_oversized_value() {
        let long = "x".repeat(41);
        let err = merge_translation(&article(), "es_MX", &translated(&[("body", &long)]))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "The download for node Llamas are cool failed because of the length of one field translation (es_MX) value: body."
        );
    }

    #[test]
    fn fingerprint_changes_with_content() {
        let mut entity = article();
        let before = fingerprint(&entity);
        assert_eq!(before, fingerprint(&article()));
        entity.set_field("body", "Llamas are even cooler");
        assert_ne!(before, fingerprint(&entity));
    }

    #[test]
    fn fingerprint_is_a_stable_digest() {
        let digest = fingerprint(&article());
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));

        // Field order does not matter, only names and values.
        let a = ContentEntity::new("node", "page", "2", "Title", "en_US")
            .with_field(Field::text("a", "1"))
            .with_field(Field::text("b", "2"));
        let b = ContentEntity::new("node", "page", "2", "Title", "en_US")
            .with_field(Field::text("b", "2"))
            .with_field(Field::text("a", "1"));
        assert_eq!(fingerprint(&a), fingerprint(&b));

        // Moving text between the title and a field changes the digest.
        let c = ContentEntity::new("node", "page", "2", "Title1", "en_US")
            .with_field(Field::text("a", ""));
        let d = ContentEntity::new("node", "page", "2", "Title", "en_US")
            .with_field(Field::text("a", "1"));
        assert_ne!(fingerprint(&c), fingerprint(&d));
    }

    #[test]
    fn set_field_updates_title() {
        let mut entity = article();
        entity.set_field("title", "Llamas are awesome");
        assert_eq!(entity.title(), "Llamas are awesome");
        assert_eq!(entity.fields()[0].value, "Llamas are awesome");
    }
}
