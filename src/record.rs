//! Article record and work item types
//!
//! The checkpoint store and the upstream harvester share one fixed CSV
//! schema; `keywords` is the only column this pipeline fills in. Everything
//! else passes through untouched so the output row can be reconstructed
//! from the input row plus one annotation.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Terminal marker for payloads below the minimum length.
pub const SENTINEL_TOO_SHORT: &str = "[skipped: content too short]";

/// Terminal marker for content the service refused on policy grounds.
pub const SENTINEL_POLICY: &str = "[skipped: rejected by policy]";

/// Terminal marker for a well-formed but empty/too-short annotation.
pub const SENTINEL_EMPTY: &str = "[skipped: empty annotation]";

/// Marker for items that exhausted their retry budget. Rows carrying this
/// are *not* done: the next run retries them and `prune` drops them.
pub const MARKER_UNRESOLVED: &str = "[unresolved: retry next run]";

/// One row of the harvested-article store.
///
/// Column order matters: the CSV header is derived from field order here and
/// must match what the harvester wrote.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub topic: String,
    pub title: String,
    pub summary: String,
    pub url: String,
    pub keywords: String,
    pub public_time: String,
    pub content: String,
}

impl ArticleRecord {
    /// Whether this row counts as done for resume purposes.
    ///
    /// Successful annotations and sentinel rows are done; empty keywords and
    /// unresolved markers are pending and get retried on the next run.
    pub fn is_done(&self) -> bool {
        !self.keywords.is_empty() && self.keywords != MARKER_UNRESOLVED
    }

    /// Whether the keywords column carries a sentinel rather than a real
    /// annotation.
    pub fn is_sentinel(&self) -> bool {
        matches!(
            self.keywords.as_str(),
            SENTINEL_TOO_SHORT | SENTINEL_POLICY | SENTINEL_EMPTY
        )
    }
}

/// One backlog unit: an input row plus the payload selected for enrichment.
///
/// Owned by exactly one worker for the duration of one attempt; the record
/// inside is never mutated until a terminal outcome stamps its `keywords`.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub record: ArticleRecord,
    pub payload: String,
}

impl WorkItem {
    /// Build a work item from an input row, selecting and truncating the
    /// payload. Returns `None` when the payload is below `min_len`; the
    /// caller should checkpoint the row with [`SENTINEL_TOO_SHORT`] instead
    /// of dispatching it.
    pub fn from_record(record: ArticleRecord, min_len: usize, max_chars: usize) -> Option<Self> {
        // Length gates count chars, not bytes: on multibyte text a byte
        // gate would admit payloads well below the intended minimum.
        let text = if record.content.trim().chars().count() >= min_len {
            record.content.trim()
        } else {
            record.summary.trim()
        };

        if text.chars().count() < min_len {
            debug!(url = %record.url, chars = text.chars().count(), "payload below minimum, skipping");
            return None;
        }

        let payload = truncate_chars(text, max_chars);
        Some(Self { record, payload })
    }

    /// The unique key of this item.
    pub fn key(&self) -> &str {
        &self.record.url
    }
}

/// Truncate on a char boundary without allocating when the text fits.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}
