//! Row normalization: source row to [`CanonicalRecord`]

use regex::Regex;
use std::sync::LazyLock;

use crate::query::SourceRow;
use shardfeed_common::{CanonicalRecord, Identifier, IdentifierKind};

static DOI_PATTERN: LazyLock<Regex> = LazyLock::new(|| compile(r"10\.\d+/\S+"));
static ISBN_STRIP: LazyLock<Regex> = LazyLock::new(|| compile(r"[^0-9X ]"));
static ISBN_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| compile(r"^(?:[0-9X]{10}|[0-9X]{13})$"));
static PMID_PATTERN: LazyLock<Regex> = LazyLock::new(|| compile(r"PMID:\s(\d{1,9})"));
static PMCID_PATTERN: LazyLock<Regex> = LazyLock::new(|| compile(r"PMCID:\s(PMC\d{1,9})"));
static YEAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| compile(r"\d{4}"));

#[allow(clippy::expect_used)]
fn compile(pattern: &str) -> Regex {
    // patterns are literals above; a failure here is a programming error
    Regex::new(pattern).expect("static normalization pattern")
}

/// First DOI-shaped run in the raw field.
pub fn extract_doi(raw: &str) -> Option<String> {
    DOI_PATTERN.find(raw).map(|m| m.as_str().to_string())
}

/// ISBN-10/13 values in the raw field, after stripping punctuation.
pub fn extract_isbns(raw: &str) -> Vec<String> {
    let stripped = ISBN_STRIP.replace_all(raw, "");
    stripped
        .split_whitespace()
        .filter(|token| ISBN_TOKEN.is_match(token))
        .map(str::to_string)
        .collect()
}

pub fn extract_pmid(extra: &str) -> Option<String> {
    PMID_PATTERN.captures(extra).map(|c| c[1].to_string())
}

pub fn extract_pmcid(extra: &str) -> Option<String> {
    PMCID_PATTERN.captures(extra).map(|c| c[1].to_string())
}

/// First four consecutive digits in a free-text date, even inside a longer run.
pub fn extract_year(date: &str) -> Option<String> {
    YEAR_PATTERN.find(date).map(|m| m.as_str().to_string())
}

/// Typed identifiers in wire order: DOI, ISBNs, PMID, PMCID.
pub fn extract_identifiers(row: &SourceRow) -> Vec<Identifier> {
    let mut identifiers = Vec::new();

    if let Some(doi) = row.doi.as_deref().and_then(extract_doi) {
        identifiers.push(Identifier::new(IdentifierKind::Doi, doi));
    }

    if let Some(isbn) = row.isbn.as_deref() {
        identifiers.extend(
            extract_isbns(isbn)
                .into_iter()
                .map(|value| Identifier::new(IdentifierKind::Isbn, value)),
        );
    }

    if let Some(extra) = row.extra.as_deref() {
        if let Some(pmid) = extract_pmid(extra) {
            identifiers.push(Identifier::new(IdentifierKind::Pmid, pmid));
        }
        if let Some(pmcid) = extract_pmcid(extra) {
            identifiers.push(Identifier::new(IdentifierKind::Pmcid, pmcid));
        }
    }

    identifiers
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().filter(|v| !v.is_empty()).map(str::to_string)
}

/// Whether the row carries at least one author entry.
pub fn has_authors(row: &SourceRow) -> bool {
    row.authors.as_deref().is_some_and(|a| !a.is_empty())
}

/// Build the canonical record for `row`, or `None` for author-less rows.
pub fn normalize_row(row: &SourceRow) -> Option<CanonicalRecord> {
    if !has_authors(row) {
        return None;
    }

    Some(CanonicalRecord {
        title: row.title.clone(),
        authors: row.authors.clone().unwrap_or_default(),
        abstract_text: non_empty(&row.abstract_text),
        year: row.date.as_deref().and_then(extract_year),
        identifiers: CanonicalRecord::join_identifiers(&extract_identifiers(row)),
        hash: non_empty(&row.storage_hash),
    })
}
