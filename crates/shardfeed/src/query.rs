//! Incremental extraction query and the row shape it returns

use chrono::NaiveDateTime;

use crate::error::Result;
use shardfeed_common::Watermark;

/// Columns and joins shared by every scan. The caller appends the WHERE
/// predicate and the grouping.
const BASE_SELECT: &str = r#"
    SELECT CAST(I.itemID AS SIGNED) AS itemID,
        ID_Title.value AS title,
        (
            SELECT GROUP_CONCAT(CONCAT(C.firstName, '\t', C.lastName) ORDER BY IC.orderIndex SEPARATOR '\n')
            FROM creators C JOIN itemCreators IC USING (creatorID)
            WHERE IC.itemID = I.itemID
        ) AS authors,
        ID_Abstract.value AS abstract,
        ID_Date.value AS date,
        ID_DOI.value AS doi,
        ID_ISBN.value AS isbn,
        ID_Extra.value AS extra,
        IA.storageHash AS storageHash,
        I.serverDateModified AS itemModified,
        IAI.serverDateModified AS attachmentModified
    FROM items I
    JOIN itemData ID_Title ON (ID_Title.itemID = I.itemID AND ID_Title.fieldID IN (110, 111, 112, 113))
    LEFT JOIN itemData ID_Abstract ON (ID_Abstract.itemID = I.itemID AND ID_Abstract.fieldID = 90)
    LEFT JOIN itemData ID_Date ON (ID_Date.itemID = I.itemID AND ID_Date.fieldID = 14)
    LEFT JOIN itemData ID_DOI ON (ID_DOI.itemID = I.itemID AND ID_DOI.fieldID = 26)
    LEFT JOIN itemData ID_ISBN ON (ID_ISBN.itemID = I.itemID AND ID_ISBN.fieldID = 11)
    LEFT JOIN itemData ID_Extra ON (ID_Extra.itemID = I.itemID AND ID_Extra.fieldID = 22)
    LEFT JOIN itemAttachments IA ON (IA.sourceItemID = I.itemID AND IA.mimeType = 'application/pdf' AND IA.storageHash IS NOT NULL)
    LEFT JOIN items IAI ON (IAI.itemID = IA.itemID)
"#;

/// Notes and attachments are not indexed as items of their own.
const ITEM_TYPE_FILTER: &str = "I.itemTypeID NOT IN (1, 14)";

/// Which scan a shard pass runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanKind {
    /// Never synced: every row, no time predicate
    Full,
    /// Rows whose item or attachment changed at or after the mark
    Incremental,
}

/// A ready-to-run extraction query with its bind parameters
#[derive(Debug, Clone)]
pub struct ExtractQuery {
    kind: ScanKind,
    sql: String,
    params: Vec<NaiveDateTime>,
}

impl ExtractQuery {
    /// Pick the scan for a shard resuming from `since`.
    pub fn for_watermark(since: &Watermark) -> Result<Self> {
        if since.is_epoch() {
            return Ok(Self::full_scan());
        }
        Ok(Self::modified_since(since.to_naive_utc()?))
    }

    pub fn full_scan() -> Self {
        Self {
            kind: ScanKind::Full,
            sql: format!("{BASE_SELECT} WHERE {ITEM_TYPE_FILTER} GROUP BY I.itemID"),
            params: Vec::new(),
        }
    }

    /// Union of an item-modified half and an attachment-modified half. UNION
    /// (not UNION ALL) leaves deduplication of rows matching both to the
    /// server.
    pub fn modified_since(since: NaiveDateTime) -> Self {
        let sql = format!(
            "({BASE_SELECT} WHERE I.serverDateModified >= ? AND {ITEM_TYPE_FILTER} GROUP BY I.itemID) \
             UNION \
             ({BASE_SELECT} WHERE IAI.serverDateModified >= ? AND {ITEM_TYPE_FILTER} GROUP BY I.itemID)"
        );
        Self {
            kind: ScanKind::Incremental,
            sql,
            params: vec![since, since],
        }
    }

    pub fn kind(&self) -> ScanKind {
        self.kind
    }

    pub fn is_full_scan(&self) -> bool {
        self.kind == ScanKind::Full
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[NaiveDateTime] {
        &self.params
    }
}

/// One raw row as produced by [`ExtractQuery`]
#[derive(Debug, Clone, Default, PartialEq, Eq, sqlx::FromRow)]
pub struct SourceRow {
    #[sqlx(rename = "itemID")]
    pub item_id: i64,

    pub title: String,

    /// `first\tlast` pairs joined by newlines; `None` when the item has no creators
    pub authors: Option<String>,

    #[sqlx(rename = "abstract")]
    pub abstract_text: Option<String>,

    /// Free-text date field
    pub date: Option<String>,

    pub doi: Option<String>,
    pub isbn: Option<String>,

    /// Free-text "extra" notes, where PMID/PMCID lines live
    pub extra: Option<String>,

    #[sqlx(rename = "storageHash")]
    pub storage_hash: Option<String>,

    #[sqlx(rename = "itemModified")]
    pub item_modified: Option<NaiveDateTime>,

    #[sqlx(rename = "attachmentModified")]
    pub attachment_modified: Option<NaiveDateTime>,
}

impl SourceRow {
    /// Latest of the item and attachment modification times.
    pub fn latest_modification(&self) -> Option<Watermark> {
        match (self.item_modified, self.attachment_modified) {
            (Some(a), Some(b)) => Some(Watermark::from_naive_utc(a.max(b))),
            (Some(a), None) | (None, Some(a)) => Some(Watermark::from_naive_utc(a)),
            (None, None) => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn ts(raw: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn test_epoch_selects_full_scan() {
        let query = ExtractQuery::for_watermark(&Watermark::epoch()).unwrap();
        assert!(query.is_full_scan());
        assert!(query.params().is_empty());
        assert!(!query.sql().contains("serverDateModified >= ?"));
        assert!(!query.sql().contains("UNION"));
    }

    #[test]
    fn test_checkpoint_selects_dual_union() {
        let since = Watermark::parse("2023-04-05T06:07:08Z").unwrap();
        let query = ExtractQuery::for_watermark(&since).unwrap();

        assert_eq!(query.kind(), ScanKind::Incremental);
        assert_eq!(query.params(), &[ts("2023-04-05 06:07:08"), ts("2023-04-05 06:07:08")]);
        assert!(query.sql().contains("I.serverDateModified >= ?"));
        assert!(query.sql().contains("IAI.serverDateModified >= ?"));
        assert!(query.sql().contains(" UNION "));
        assert!(!query.sql().contains("UNION ALL"));
        assert_eq!(query.sql().matches('?').count(), 2);
    }

    #[test]
    fn test_latest_modification_takes_later_axis() {
        let mut row = SourceRow {
            item_modified: Some(ts("2020-01-01 00:00:00")),
            attachment_modified: Some(ts("2021-01-01 00:00:00")),
            ..SourceRow::default()
        };
        assert_eq!(
            row.latest_modification().unwrap().as_str(),
            "2021-01-01T00:00:00.000Z"
        );

        row.attachment_modified = None;
        assert_eq!(
            row.latest_modification().unwrap().as_str(),
            "2020-01-01T00:00:00.000Z"
        );

        row.item_modified = None;
        assert!(row.latest_modification().is_none());
    }
}
