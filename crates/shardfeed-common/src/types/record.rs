//! The canonical record: the unit the indexing sink accepts.

use serde::{Deserialize, Serialize};

/// Identifier schemes carried in [`CanonicalRecord::identifiers`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierKind {
    Doi,
    Isbn,
    Pmid,
    Pmcid,
}

impl IdentifierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierKind::Doi => "doi",
            IdentifierKind::Isbn => "isbn",
            IdentifierKind::Pmid => "pmid",
            IdentifierKind::Pmcid => "pmcid",
        }
    }
}

/// A typed identifier such as `doi:10.1234/abc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    pub kind: IdentifierKind,
    pub value: String,
}

impl Identifier {
    pub fn new(kind: IdentifierKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.value)
    }
}

/// Normalized, sink-ready bibliographic item.
///
/// Optional fields are omitted from the JSON payload when absent rather than
/// being sent as `null`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub title: String,

    /// Creator list in raw form: `first\tlast` pairs separated by newlines.
    pub authors: String,

    #[serde(rename = "abstract", default, skip_serializing_if = "Option::is_none")]
    pub abstract_text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,

    /// Newline-joined `kind:value` entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifiers: Option<String>,

    /// Attachment fingerprint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl CanonicalRecord {
    /// Join identifiers in the wire layout; `None` when there are none.
    pub fn join_identifiers(identifiers: &[Identifier]) -> Option<String> {
        if identifiers.is_empty() {
            return None;
        }
        Some(
            identifiers
                .iter()
                .map(Identifier::to_string)
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }
}
