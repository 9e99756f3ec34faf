//! Deterministic classification of an observed document.

use serde::{Deserialize, Serialize};

/// Record left by the annotator after it wrote into a document.
///
/// `produced` is the fingerprint of the content the annotator wrote, when it
/// could be read back. A mark without a fingerprint suppresses unconditionally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfWrite {
    pub produced: Option<String>,
}

/// What the detector should do with one document this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Written by relay itself: refresh the stored fingerprint, emit nothing.
    SelfWrite,
    /// No stored fingerprint: store it and emit a `new` event.
    New,
    /// Stored fingerprint differs: update it and emit a `modified` event.
    Modified,
    /// Nothing to do.
    Unchanged,
}

/// Classify a document given its stored fingerprint, its current fingerprint
/// and any pending self-write mark.
///
/// Rules, in order:
/// - A mark with no recorded fingerprint, or whose fingerprint equals the
///   current one, yields `SelfWrite`.
/// - A mark whose fingerprint differs means a human edited after the
///   annotation; it is ignored and the document is classified normally.
/// - No stored fingerprint yields `New`; a differing one yields `Modified`.
pub fn classify(stored: Option<&str>, current: &str, mark: Option<&SelfWrite>) -> Classification {
    if let Some(mark) = mark {
        match mark.produced.as_deref() {
            None => return Classification::SelfWrite,
            Some(produced) if produced == current => return Classification::SelfWrite,
            Some(_) => {}
        }
    }

    match stored {
        None => Classification::New,
        Some(stored) if stored != current => Classification::Modified,
        Some(_) => Classification::Unchanged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn produced(fingerprint: &str) -> SelfWrite {
        SelfWrite {
            produced: Some(fingerprint.to_string()),
        }
    }

    #[test]
    fn unseen_document_is_new() {
        assert_eq!(classify(None, "aa", None), Classification::New);
    }

    #[test]
    fn equal_fingerprint_is_unchanged() {
        assert_eq!(classify(Some("aa"), "aa", None), Classification::Unchanged);
    }

    #[test]
    fn differing_fingerprint_is_modified() {
        assert_eq!(classify(Some("aa"), "bb", None), Classification::Modified);
    }

    #[test]
    fn matching_self_write_is_suppressed_even_though_fingerprint_moved() {
        let mark = produced("bb");
        assert_eq!(
            classify(Some("aa"), "bb", Some(&mark)),
            Classification::SelfWrite
        );
    }

    #[test]
    fn unknown_self_write_is_suppressed_unconditionally() {
        let mark = SelfWrite { produced: None };
        assert_eq!(
            classify(Some("aa"), "cc", Some(&mark)),
            Classification::SelfWrite
        );
        assert_eq!(classify(None, "cc", Some(&mark)), Classification::SelfWrite);
    }

    #[test]
    fn human_edit_after_self_write_is_not_swallowed() {
        let mark = produced("bb");
        assert_eq!(
            classify(Some("bb"), "cc", Some(&mark)),
            Classification::Modified
        );
    }
}
