//! Selectors: namespaced tokens describing one observed workload attribute.

use std::collections::BTreeSet;
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Errors from parsing a selector string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectorError {
    /// The input was empty.
    #[error("selector is empty")]
    Empty,

    /// No `namespace:` prefix, or the namespace has illegal characters.
    #[error("selector {0:?} has no valid namespace")]
    InvalidNamespace(String),

    /// Nothing follows the namespace separator.
    #[error("selector {0:?} has no value")]
    MissingValue(String),

    /// Control characters or surrounding whitespace.
    #[error("selector {0:?} contains control characters or surrounding whitespace")]
    IllegalCharacter(String),
}

/// A namespaced selector such as `unix:uid:1001` or `role:server`.
///
/// The namespace is everything before the first `:` and is restricted to
/// lowercase ASCII letters, digits, `-` and `_`. The value is opaque.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Selector(String);

impl Selector {
    /// Parse and validate a selector string.
    ///
    /// # Errors
    ///
    /// Returns a [`SelectorError`] describing the first violated rule.
    pub fn parse(raw: &str) -> Result<Self, SelectorError> {
        if raw.is_empty() {
            return Err(SelectorError::Empty);
        }
        if raw.trim() != raw || raw.chars().any(char::is_control) {
            return Err(SelectorError::IllegalCharacter(raw.to_owned()));
        }

        let (namespace, value) = raw
            .split_once(':')
            .ok_or_else(|| SelectorError::InvalidNamespace(raw.to_owned()))?;

        let namespace_ok = !namespace.is_empty()
            && namespace
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
        if !namespace_ok {
            return Err(SelectorError::InvalidNamespace(raw.to_owned()));
        }
        if value.is_empty() {
            return Err(SelectorError::MissingValue(raw.to_owned()));
        }

        Ok(Self(raw.to_owned()))
    }

    /// `unix:uid:<uid>`.
    pub fn unix_uid(uid: u32) -> Self {
        Self(format!("unix:uid:{uid}"))
    }

    /// `unix:gid:<gid>`.
    pub fn unix_gid(gid: u32) -> Self {
        Self(format!("unix:gid:{gid}"))
    }

    /// `unix:path:<absolute executable path>`.
    ///
    /// Paths that are not valid UTF-8 become `unix:path_hex:<hex bytes>`,
    /// so distinct byte paths never share a selector.
    pub fn unix_path(path: &Path) -> Self {
        match path.to_str() {
            Some(utf8) => Self(format!("unix:path:{utf8}")),
            None => Self(format!(
                "unix:path_hex:{}",
                hex::encode(path.as_os_str().as_bytes())
            )),
        }
    }

    /// The namespace portion (before the first `:`).
    pub fn namespace(&self) -> &str {
        self.0.split_once(':').map_or("", |(ns, _)| ns)
    }

    /// The full selector string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Selector {
    type Error = SelectorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Selector> for String {
    fn from(selector: Selector) -> Self {
        selector.0
    }
}

/// The full, ordered set of selectors produced for one workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SelectorSet(BTreeSet<Selector>);

impl SelectorSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a selector. Returns `false` when it was already present.
    pub fn insert(&mut self, selector: Selector) -> bool {
        self.0.insert(selector)
    }

    /// Whether `selector` is in the set.
    pub fn contains(&self, selector: &Selector) -> bool {
        self.0.contains(selector)
    }

    /// Whether every selector in `self` also appears in `other`.
    pub fn is_subset(&self, other: &SelectorSet) -> bool {
        self.0.is_subset(&other.0)
    }

    /// Number of selectors.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set has no selectors.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &Selector> {
        self.0.iter()
    }
}

impl FromIterator<Selector> for SelectorSet {
    fn from_iter<I: IntoIterator<Item = Selector>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<Selector> for SelectorSet {
    fn extend<I: IntoIterator<Item = Selector>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl fmt::Display for SelectorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items: Vec<&str> = self.0.iter().map(Selector::as_str).collect();
        write!(f, "[{}]", items.join(", "))
    }
}
