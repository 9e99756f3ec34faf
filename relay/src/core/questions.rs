//! Heuristic extraction of follow-up questions from agent output.
//!
//! Matches English and Japanese interrogative markers plus any line that is
//! itself a question by punctuation. Results are trimmed, deduplicated in
//! first-seen order and length-filtered.

use std::sync::LazyLock;

use regex::Regex;

/// Length bounds (in characters) for an extracted question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuestionLimits {
    /// Shorter candidates are noise.
    pub min_len: usize,
    /// Candidates at or above this length are paragraphs, not questions.
    pub max_len: usize,
}

impl Default for QuestionLimits {
    fn default() -> Self {
        Self {
            min_len: 6,
            max_len: 200,
        }
    }
}

/// Patterns with a capture group contribute the group; others the whole match.
static QUESTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?im)(?:質問|question|クエスチョン)[:：]\s*(.+)",
        r"(?im)(?:確認|confirm|コンファーム)[:：]\s*(.+)",
        r"(?im)(?:詳細|details|詳しく)[:：]\s*(.+)",
        r"(?im)(?:どの|which|どちら).*[？?]",
        r"(?im)(?:何|what|なに).*[？?]",
        r"(?im)(?:いつ|when|どこ|where|なぜ|why|どうやって|how).*[？?]",
        r"(?im)(?:してください|お聞かせください|教えてください|please).*[？?]",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).unwrap())
    .collect()
});

/// Extract question-like sentences from captured agent output.
pub fn extract_questions(output: &str, limits: QuestionLimits) -> Vec<String> {
    let mut candidates: Vec<&str> = Vec::new();

    for pattern in QUESTION_PATTERNS.iter() {
        for captures in pattern.captures_iter(output) {
            let matched = captures.get(1).or_else(|| captures.get(0));
            if let Some(matched) = matched {
                candidates.push(matched.as_str());
            }
        }
    }

    for line in output.lines() {
        let line = line.trim();
        if line.ends_with('?') || line.ends_with('？') {
            candidates.push(line);
        }
    }

    let mut questions: Vec<String> = Vec::new();
    for candidate in candidates {
        let candidate = candidate.trim();
        let len = candidate.chars().count();
        if len < limits.min_len || len >= limits.max_len {
            continue;
        }
        if questions.iter().any(|existing| existing == candidate) {
            continue;
        }
        questions.push(candidate.to_string());
    }
    questions
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLARIFYING_REPLY: &str = "
I'd be happy to help you create a Python calculator! However, I need some clarification to make sure I build exactly what you need:

1. What specific arithmetic operations should it support? (addition, subtraction, multiplication, division, or more advanced operations like exponents, square roots?)

2. Should this be a command-line interface or a GUI application?

3. Do you need error handling for invalid inputs?

Let me know your preferences and I'll create the calculator accordingly.
";

    #[test]
    fn extracts_numbered_clarifying_questions() {
        let questions = extract_questions(CLARIFYING_REPLY, QuestionLimits::default());

        assert!(
            questions
                .iter()
                .any(|q| q.starts_with("What specific arithmetic operations"))
        );
        assert!(questions.contains(
            &"2. Should this be a command-line interface or a GUI application?".to_string()
        ));
        assert!(questions.contains(&"3. Do you need error handling for invalid inputs?".to_string()));
        assert!(
            !questions
                .iter()
                .any(|q| q.contains("Let me know your preferences"))
        );
    }

    #[test]
    fn extracts_japanese_questions() {
        let output = "実装が完了しました。\nどのデータベースを使いますか？\n";
        let questions = extract_questions(output, QuestionLimits::default());
        assert_eq!(questions, vec!["どのデータベースを使いますか？".to_string()]);
    }

    #[test]
    fn explicit_question_prefix_captures_remainder() {
        let output = "Question: should the API be versioned\n";
        let questions = extract_questions(output, QuestionLimits::default());
        assert_eq!(questions, vec!["should the API be versioned".to_string()]);
    }

    #[test]
    fn duplicates_are_removed_in_first_seen_order() {
        let output = "Why is the build slow?\nWhy is the build slow?\n";
        let questions = extract_questions(output, QuestionLimits::default());
        assert_eq!(questions, vec!["Why is the build slow?".to_string()]);
    }

    #[test]
    fn short_and_long_candidates_are_dropped() {
        let long = format!("{}?", "x".repeat(250));
        let output = format!("Why?\n{long}\n");
        let questions = extract_questions(&output, QuestionLimits::default());
        assert!(questions.is_empty(), "got {questions:?}");
    }

    #[test]
    fn plain_report_has_no_questions() {
        let output = "Created src/main.rs\nAll tests pass.\n";
        assert!(extract_questions(output, QuestionLimits::default()).is_empty());
    }
}
