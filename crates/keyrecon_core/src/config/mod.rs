//! Caller-supplied reconciliation configuration.
//!
//! # Responsibility
//! - Declare per-kind natural keys, mutable attributes and creation defaults.
//! - Declare parent/child links and store-side validation schemas.
//! - Load and validate declarations from JSON.
//!
//! # Invariants
//! - Kind and attribute names match `[A-Za-z_][A-Za-z0-9_]*`.
//! - The engine never invents defaults; everything comes from here.

use crate::model::record::AttrValue;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid name regex"));

/// Returns whether `value` is a valid kind or attribute name.
pub fn is_valid_name(value: &str) -> bool {
    NAME_RE.is_match(value)
}

/// Default value applied to newly created records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultValue {
    /// Constant value, e.g. a starting stage.
    Fixed(AttrValue),
    /// Epoch milliseconds `days` after the reconciliation clock.
    DaysFromNow(i64),
}

impl DefaultValue {
    /// Resolves this default against the reconciliation clock.
    pub fn resolve(&self, now_epoch_ms: i64) -> AttrValue {
        match self {
            Self::Fixed(value) => value.clone(),
            Self::DaysFromNow(days) => {
                AttrValue::Integer(now_epoch_ms.saturating_add(days.saturating_mul(MILLIS_PER_DAY)))
            }
        }
    }
}

/// Reconciliation rules for one entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindConfig {
    pub kind: String,
    /// Attribute holding the natural key, e.g. `name`.
    pub key_attribute: String,
    /// Attributes a matched candidate may overwrite.
    ///
    /// `None` lets every candidate attribute except the key overwrite.
    #[serde(default)]
    pub mutable_attributes: Option<BTreeSet<String>>,
    /// Values stamped on newly created records when the candidate lacks them.
    #[serde(default)]
    pub defaults: BTreeMap<String, DefaultValue>,
}

impl KindConfig {
    pub fn new(kind: impl Into<String>, key_attribute: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            key_attribute: key_attribute.into(),
            mutable_attributes: None,
            defaults: BTreeMap::new(),
        }
    }

    /// Restricts updates of matched records to the given attributes.
    pub fn with_mutable<I, A>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.mutable_attributes = Some(attributes.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_default(mut self, attribute: impl Into<String>, value: DefaultValue) -> Self {
        self.defaults.insert(attribute.into(), value);
        self
    }

    /// Returns whether a matched record may take `attribute` from a candidate.
    pub fn is_mutable(&self, attribute: &str) -> bool {
        if attribute == self.key_attribute {
            return false;
        }
        match &self.mutable_attributes {
            Some(allowed) => allowed.contains(attribute),
            None => true,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_name(&self.kind, "kind")?;
        require_name(&self.key_attribute, "key_attribute")?;
        if let Some(allowed) = &self.mutable_attributes {
            for attribute in allowed {
                require_name(attribute, "mutable_attributes")?;
            }
        }
        for attribute in self.defaults.keys() {
            require_name(attribute, "defaults")?;
            if attribute == &self.key_attribute {
                return Err(ConfigError::DefaultForKey(self.kind.clone()));
            }
        }
        Ok(())
    }
}

/// Parent/child link declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSpec {
    /// Rules for the parent kind; its key is matched against the child reference.
    pub parent: KindConfig,
    /// Child attribute naming the parent's natural key, e.g. `last_name`.
    pub reference_attribute: String,
    /// Child attribute receiving the parent id, e.g. `account_id`.
    pub foreign_key_attribute: String,
}

impl LinkSpec {
    pub fn new(
        parent: KindConfig,
        reference_attribute: impl Into<String>,
        foreign_key_attribute: impl Into<String>,
    ) -> Self {
        Self {
            parent,
            reference_attribute: reference_attribute.into(),
            foreign_key_attribute: foreign_key_attribute.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.parent.validate()?;
        require_name(&self.reference_attribute, "reference_attribute")?;
        require_name(&self.foreign_key_attribute, "foreign_key_attribute")?;
        if self.reference_attribute == self.foreign_key_attribute {
            return Err(ConfigError::ForeignKeyShadowsReference(
                self.foreign_key_attribute.clone(),
            ));
        }
        Ok(())
    }

    /// Validates this link for children reconciled with `child`.
    ///
    /// Stamping the parent id must not overwrite the child's natural key.
    pub fn validate_for_child(&self, child: &KindConfig) -> Result<(), ConfigError> {
        self.validate()?;
        if self.foreign_key_attribute == child.key_attribute {
            return Err(ConfigError::ForeignKeyShadowsKey {
                kind: child.kind.clone(),
                attribute: self.foreign_key_attribute.clone(),
            });
        }
        Ok(())
    }
}

/// Store-side validation rules for one kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindSchema {
    pub kind: String,
    /// Attributes that must be present and non-null for a write to succeed.
    #[serde(default)]
    pub required_attributes: Vec<String>,
}

impl KindSchema {
    pub fn new<I, A>(kind: impl Into<String>, required_attributes: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self {
            kind: kind.into(),
            required_attributes: required_attributes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_name(&self.kind, "kind")?;
        for attribute in &self.required_attributes {
            require_name(attribute, "required_attributes")?;
        }
        Ok(())
    }
}

/// Full declaration file: kinds, links between them, and store schemas.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub kinds: Vec<KindConfig>,
    /// Links keyed by child kind.
    #[serde(default)]
    pub links: BTreeMap<String, LinkSpec>,
    #[serde(default)]
    pub schemas: Vec<KindSchema>,
}

impl EngineConfig {
    /// Parses and validates a JSON declaration.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(text).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON declaration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|err| ConfigError::Io(format!("{}: {err}", path.display())))?;
        Self::from_json(&text)
    }

    pub fn kind(&self, kind: &str) -> Option<&KindConfig> {
        self.kinds.iter().find(|config| config.kind == kind)
    }

    pub fn link_for(&self, child_kind: &str) -> Option<&LinkSpec> {
        self.links.get(child_kind)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        for config in &self.kinds {
            config.validate()?;
            if !seen.insert(config.kind.as_str()) {
                return Err(ConfigError::DuplicateKind(config.kind.clone()));
            }
        }

        for (child_kind, link) in &self.links {
            require_name(child_kind, "links")?;
            let child = self
                .kind(child_kind)
                .ok_or_else(|| ConfigError::UnknownKind(child_kind.clone()))?;
            let declared_parent = self
                .kind(&link.parent.kind)
                .ok_or_else(|| ConfigError::UnknownKind(link.parent.kind.clone()))?;
            if declared_parent != &link.parent {
                return Err(ConfigError::ParentMismatch(link.parent.kind.clone()));
            }
            link.validate_for_child(child)?;
        }

        for schema in &self.schemas {
            schema.validate()?;
        }
        Ok(())
    }
}

fn require_name(value: &str, field: &'static str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::EmptyName(field));
    }
    if !is_valid_name(value) {
        return Err(ConfigError::InvalidName {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Configuration declaration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Parse(String),
    Io(String),
    EmptyName(&'static str),
    InvalidName { field: &'static str, value: String },
    DuplicateKind(String),
    UnknownKind(String),
    DefaultForKey(String),
    ForeignKeyShadowsReference(String),
    ForeignKeyShadowsKey { kind: String, attribute: String },
    /// A link's parent rules differ from the declared rules of that kind.
    ParentMismatch(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(message) => write!(f, "invalid config json: {message}"),
            Self::Io(message) => write!(f, "cannot read config: {message}"),
            Self::EmptyName(field) => write!(f, "config field `{field}` cannot be empty"),
            Self::InvalidName { field, value } => {
                write!(f, "config field `{field}` has invalid name `{value}`")
            }
            Self::DuplicateKind(kind) => write!(f, "kind `{kind}` is declared twice"),
            Self::UnknownKind(kind) => write!(f, "kind `{kind}` is not declared"),
            Self::DefaultForKey(kind) => {
                write!(f, "kind `{kind}` declares a default for its natural key")
            }
            Self::ForeignKeyShadowsReference(attribute) => write!(
                f,
                "foreign key attribute `{attribute}` must differ from the reference attribute"
            ),
            Self::ForeignKeyShadowsKey { kind, attribute } => write!(
                f,
                "foreign key attribute `{attribute}` is the natural key of `{kind}`"
            ),
            Self::ParentMismatch(kind) => write!(
                f,
                "link parent `{kind}` does not match the declared `{kind}` rules"
            ),
        }
    }
}

impl Error for ConfigError {}
