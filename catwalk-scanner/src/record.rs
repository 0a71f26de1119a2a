use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Extracted product fields, ordered by field name.
pub type Fields = BTreeMap<String, String>;

/// SHA-256 digest of a fetched page's bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentFingerprint([u8; 32]);

impl ContentFingerprint {
    pub fn compute(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&hasher.finalize());
        ContentFingerprint(digest)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(value: &str) -> Option<Self> {
        let bytes = hex::decode(value).ok()?;
        let digest: [u8; 32] = bytes.try_into().ok()?;
        Some(ContentFingerprint(digest))
    }
}

impl fmt::Display for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentFingerprint({})", &self.to_hex()[..12])
    }
}

impl TryFrom<String> for ContentFingerprint {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ContentFingerprint::from_hex(&value).ok_or_else(|| format!("invalid fingerprint '{}'", value))
    }
}

impl From<ContentFingerprint> for String {
    fn from(fingerprint: ContentFingerprint) -> Self {
        fingerprint.to_hex()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub identifier: String,
    pub url: String,
    pub fields: Fields,
    pub fingerprint: ContentFingerprint,
    pub fetched_at: DateTime<Utc>,
}

impl ProductRecord {
    /// Value of a field, treating blank values as absent.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Number of fields carrying a non-blank value.
    pub fn completeness(&self) -> usize {
        self.fields.values().filter(|v| !v.trim().is_empty()).count()
    }

    pub fn missing_fields(&self, required: &[String]) -> Vec<String> {
        required
            .iter()
            .filter(|name| self.field(name).is_none())
            .cloned()
            .collect()
    }
}

/// What the change-detection cache keeps per identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub identifier: String,
    pub fingerprint: ContentFingerprint,
    pub record: ProductRecord,
}

impl CacheEntry {
    pub fn from_record(record: &ProductRecord) -> Self {
        Self {
            identifier: record.identifier.clone(),
            fingerprint: record.fingerprint,
            record: record.clone(),
        }
    }
}

/// A node of the discovered category tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryNode {
    pub name: String,
    pub url: String,
    pub level: usize,
    pub children: Vec<CategoryNode>,
}

impl CategoryNode {
    pub fn new(name: impl Into<String>, url: impl Into<String>, level: usize) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            level,
            children: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Pre-order walk over this node and all of its descendants.
    pub fn iter(&self) -> impl Iterator<Item = &CategoryNode> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children.iter().rev());
            Some(node)
        })
    }

    pub fn node_count(&self) -> usize {
        self.iter().count()
    }
}

/// A URL that could not be turned into a record, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchFailure {
    pub url: String,
    pub error: String,
    pub attempts: u32,
}
