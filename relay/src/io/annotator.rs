//! Appends agent questions to the source document.
//!
//! Every write is reported to the [`SelfWriteMarker`] so the next poll does
//! not treat the annotation as a human edit.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use tracing::{debug, info};

use crate::core::questions::{QuestionLimits, extract_questions};
use crate::io::detector::SelfWriteMarker;

pub struct FeedbackAnnotator {
    marker: SelfWriteMarker,
    limits: QuestionLimits,
}

impl FeedbackAnnotator {
    pub fn new(marker: SelfWriteMarker, limits: QuestionLimits) -> Self {
        Self { marker, limits }
    }

    pub fn extract_questions(&self, output: &str) -> Vec<String> {
        extract_questions(output, self.limits)
    }

    /// Append a questions section to `path` and mark it self-written.
    ///
    /// Returns `false` without touching the file when `questions` is empty.
    pub fn append_questions(&self, path: &Path, questions: &[String]) -> Result<bool> {
        self.append_questions_at(path, questions, Local::now())
    }

    pub fn append_questions_at(
        &self,
        path: &Path,
        questions: &[String],
        now: DateTime<Local>,
    ) -> Result<bool> {
        if questions.is_empty() {
            debug!(path = %path.display(), "no questions to append");
            return Ok(false);
        }

        let section = render_section(questions, now);
        self.marker.write_and_mark(path, || {
            let mut file = OpenOptions::new()
                .append(true)
                .open(path)
                .with_context(|| format!("open {} for append", path.display()))?;
            file.write_all(section.as_bytes())
                .with_context(|| format!("append questions to {}", path.display()))?;
            file.sync_all()
                .with_context(|| format!("flush {}", path.display()))
        })?;
        info!(path = %path.display(), count = questions.len(), "appended agent questions");
        Ok(true)
    }
}

fn render_section(questions: &[String], now: DateTime<Local>) -> String {
    let mut section = format!(
        "\n\n---\n## Questions from the agent ({})\n\n",
        now.format("%Y-%m-%d %H:%M:%S")
    );
    for (idx, question) in questions.iter().enumerate() {
        section.push_str(&format!("{}. {}\n", idx + 1, question));
    }
    section.push_str("\n*Answer the questions above by editing this file.*\n");
    section
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use chrono::TimeZone;

    use super::*;
    use crate::io::detector::ChangeDetector;
    use crate::io::fingerprint_store::FingerprintStore;

    struct Fixture {
        _temp: tempfile::TempDir,
        doc: std::path::PathBuf,
        detector: ChangeDetector,
    }

    fn fixture() -> Fixture {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("notes");
        fs::create_dir_all(&root).expect("create root");
        let doc = root.join("task.md");
        fs::write(&doc, "Build a calculator\n").expect("write doc");
        let store = Arc::new(FingerprintStore::new(&temp.path().join("cache")));
        let detector = ChangeDetector::open(&root, &["md".to_string()], store);
        Fixture {
            _temp: temp,
            doc,
            detector,
        }
    }

    #[test]
    fn appends_numbered_section() {
        let fx = fixture();
        let annotator = FeedbackAnnotator::new(fx.detector.marker(), QuestionLimits::default());
        let now = Local
            .with_ymd_and_hms(2026, 3, 14, 9, 30, 0)
            .single()
            .expect("valid time");

        let appended = annotator
            .append_questions_at(
                &fx.doc,
                &[
                    "Which language should I use?".to_string(),
                    "Do you need a GUI?".to_string(),
                ],
                now,
            )
            .expect("append");

        assert!(appended);
        let contents = fs::read_to_string(&fx.doc).expect("read doc");
        assert_eq!(
            contents,
            "Build a calculator\n\n\n---\n## Questions from the agent (2026-03-14 09:30:00)\n\n\
             1. Which language should I use?\n2. Do you need a GUI?\n\n\
             *Answer the questions above by editing this file.*\n"
        );
        assert!(fx.detector.marker().is_marked(&fx.doc));
    }

    #[test]
    fn empty_questions_leave_document_untouched() {
        let fx = fixture();
        let annotator = FeedbackAnnotator::new(fx.detector.marker(), QuestionLimits::default());

        assert!(!annotator.append_questions(&fx.doc, &[]).expect("append"));
        assert_eq!(
            fs::read_to_string(&fx.doc).expect("read doc"),
            "Build a calculator\n"
        );
        assert!(!fx.detector.marker().is_marked(&fx.doc));
    }

    #[test]
    fn annotation_does_not_retrigger_next_poll() {
        let mut fx = fixture();
        assert!(fx.detector.poll().expect("first poll").is_some());
        let annotator = FeedbackAnnotator::new(fx.detector.marker(), QuestionLimits::default());

        let questions = annotator.extract_questions("Done.\nWhat color scheme do you prefer?\n");
        annotator
            .append_questions(&fx.doc, &questions)
            .expect("append");

        assert_eq!(fx.detector.poll().expect("poll after annotation"), None);
        let current = crate::core::fingerprint::content_hash(&fs::read(&fx.doc).expect("read"));
        assert_eq!(fx.detector.fingerprint(&fx.doc), Some(current.as_str()));
        assert!(!fx.detector.marker().is_marked(&fx.doc));
    }

    #[test]
    fn missing_document_is_an_error() {
        let fx = fixture();
        let annotator = FeedbackAnnotator::new(fx.detector.marker(), QuestionLimits::default());
        let err = annotator
            .append_questions(&fx.doc.with_file_name("gone.md"), &["Why?".to_string()])
            .expect_err("missing file");
        assert!(err.to_string().contains("open"));
    }
}
