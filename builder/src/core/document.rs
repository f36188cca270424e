//! Virtual single-document store for the workflow source under construction.
//!
//! The session edits exactly one logical file. The buffer lives in memory;
//! every mutation is a full-buffer replace computed from the previous buffer,
//! so a failed operation can never leave a partially applied edit behind.

use std::fmt;

use crate::core::types::Replacement;

/// The one logical path the session is allowed to edit.
pub const WORKFLOW_PATH: &str = "workflow.json";

/// Shortest matching prefix (in chars) worth reporting in a near-match
/// diagnostic. Below this the "match" is usually coincidental.
const MIN_DIAGNOSTIC_PREFIX_CHARS: usize = 10;

/// Buffer lines shown before/after the divergence point in a diagnostic.
const DIAGNOSTIC_LINES_BEFORE: usize = 2;
const DIAGNOSTIC_LINES_AFTER: usize = 3;

/// Cap on the unmatched-tail preview in a diagnostic.
const DIAGNOSTIC_TAIL_CHARS: usize = 200;

/// Recoverable edit failures, formatted into tool responses so the model can
/// self-correct. Matched exhaustively at the response-formatting boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditError {
    /// No document buffer exists yet.
    FileNotFound { path: String },
    /// The call named a path other than the single supported file.
    InvalidPath { given: String },
    /// `old` was not found; carries a near-match diagnostic when one exists.
    NoMatchFound { diagnostic: Option<String> },
    /// `old` occurred more than once.
    MultipleMatches { count: usize },
    /// A line number fell outside the document.
    InvalidLineNumber { line: usize, max: usize },
    /// A view range ended before it started.
    InvalidViewRange { start: usize, end: usize },
    /// A batch step failed; the buffer was restored to its snapshot.
    BatchFailed {
        index: usize,
        total: usize,
        cause: Box<EditError>,
    },
}

impl EditError {
    /// Indices of batch steps that were never attempted because an earlier
    /// step failed. Empty for non-batch errors.
    pub fn not_attempted(&self) -> std::ops::Range<usize> {
        match self {
            EditError::BatchFailed { index, total, .. } => index + 1..*total,
            _ => 0..0,
        }
    }
}

impl fmt::Display for EditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditError::FileNotFound { path } => {
                write!(
                    f,
                    "no document exists at '{path}' yet; create it first with the create tool"
                )
            }
            EditError::InvalidPath { given } => {
                write!(
                    f,
                    "unsupported path '{given}'; this session edits exactly one file, '{WORKFLOW_PATH}'"
                )
            }
            EditError::NoMatchFound { diagnostic } => {
                write!(f, "old text not found in the document")?;
                if let Some(diagnostic) = diagnostic {
                    write!(f, "\n{diagnostic}")?;
                }
                Ok(())
            }
            EditError::MultipleMatches { count } => {
                write!(
                    f,
                    "old text matches {count} locations; include more surrounding context so the match is unique"
                )
            }
            EditError::InvalidLineNumber { line, max } => {
                write!(f, "line {line} is out of range; the document has {max} lines")
            }
            EditError::InvalidViewRange { start, end } => {
                write!(f, "invalid view range [{start}, {end}]; end must not precede start")
            }
            EditError::BatchFailed {
                index,
                total,
                cause,
            } => {
                write!(
                    f,
                    "batch replacement failed at index {index} of {total}: {cause}; the document was restored to its pre-batch state"
                )?;
                let skipped = self.not_attempted();
                if !skipped.is_empty() {
                    write!(
                        f,
                        "; replacements at indices {}..{} were not attempted",
                        skipped.start, skipped.end
                    )?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for EditError {}

/// The single mutable text buffer under edit.
#[derive(Debug, Clone, Default)]
pub struct Document {
    buffer: Option<String>,
}

impl Document {
    pub fn new() -> Self {
        Self { buffer: None }
    }

    /// Seed the buffer from an existing source (baseline editing).
    pub fn with_buffer(text: impl Into<String>) -> Self {
        Self {
            buffer: Some(text.into()),
        }
    }

    pub fn buffer(&self) -> Option<&str> {
        self.buffer.as_deref()
    }

    pub fn exists(&self) -> bool {
        self.buffer.is_some()
    }

    /// Reject any path other than the one supported logical file.
    pub fn check_path(&self, given: &str) -> Result<(), EditError> {
        if given == WORKFLOW_PATH {
            return Ok(());
        }
        Err(EditError::InvalidPath {
            given: given.to_string(),
        })
    }

    /// Render the buffer with 1-indexed line numbers, optionally restricted
    /// to an inclusive line range.
    pub fn view(&self, range: Option<(usize, usize)>) -> Result<String, EditError> {
        let buffer = self.require_buffer()?;
        let lines: Vec<&str> = buffer.lines().collect();
        let max = lines.len();

        let (start, end) = match range {
            None => (1, max),
            Some((start, end)) => {
                if start < 1 || start > max {
                    return Err(EditError::InvalidLineNumber { line: start, max });
                }
                if end < start {
                    return Err(EditError::InvalidViewRange { start, end });
                }
                if end > max {
                    return Err(EditError::InvalidLineNumber { line: end, max });
                }
                (start, end)
            }
        };

        let rendered: Vec<String> = lines[start.saturating_sub(1)..end]
            .iter()
            .enumerate()
            .map(|(offset, line)| format!("{}: {}", start + offset, line))
            .collect();
        Ok(rendered.join("\n"))
    }

    /// Set the buffer. Overwriting an existing buffer is allowed; this is a
    /// plain write, not an exclusive create.
    pub fn create(&mut self, path: &str, text: impl Into<String>) -> Result<(), EditError> {
        self.check_path(path)?;
        self.buffer = Some(text.into());
        Ok(())
    }

    /// Replace exactly one occurrence of `old` with `new`.
    ///
    /// Zero matches first retries with a trailing newline toggled on both
    /// strings; if that still does not produce exactly one match, the error
    /// carries a near-match diagnostic locating where the document diverges
    /// from `old`. The replacement text is spliced verbatim.
    pub fn replace(&mut self, old: &str, new: &str) -> Result<(), EditError> {
        let buffer = self.require_buffer()?.to_string();
        if old.is_empty() {
            return Err(EditError::NoMatchFound { diagnostic: None });
        }

        match count_occurrences(&buffer, old) {
            1 => {
                self.buffer = Some(buffer.replacen(old, new, 1));
                Ok(())
            }
            0 => {
                let (toggled_old, toggled_new) = toggle_trailing_newline(old, new);
                if count_occurrences(&buffer, &toggled_old) == 1 {
                    self.buffer = Some(buffer.replacen(&toggled_old, &toggled_new, 1));
                    return Ok(());
                }
                Err(EditError::NoMatchFound {
                    diagnostic: near_match_diagnostic(&buffer, old),
                })
            }
            count => Err(EditError::MultipleMatches { count }),
        }
    }

    /// Insert `text` as a new line immediately after 1-indexed `line`
    /// (0 inserts at the start of the file).
    pub fn insert(&mut self, line: usize, text: &str) -> Result<(), EditError> {
        let buffer = self.require_buffer()?.to_string();
        let max = buffer.lines().count();
        if line > max {
            return Err(EditError::InvalidLineNumber { line, max });
        }

        if buffer.is_empty() {
            self.buffer = Some(text.to_string());
            return Ok(());
        }

        let mut segments: Vec<&str> = buffer.split('\n').collect();
        segments.insert(line, text);
        self.buffer = Some(segments.join("\n"));
        Ok(())
    }

    /// Apply an ordered batch of replacements as a unit.
    ///
    /// A snapshot is taken up front; the first failing step restores it and
    /// reports the failing index, its cause, and the steps never attempted.
    /// Unlike `replace`, no newline-toggle fallback applies here.
    pub fn batch_replace(&mut self, replacements: &[Replacement]) -> Result<usize, EditError> {
        let snapshot = self.require_buffer()?.to_string();
        let total = replacements.len();
        let mut working = snapshot.clone();

        for (index, replacement) in replacements.iter().enumerate() {
            let cause = if replacement.old.is_empty() {
                Some(EditError::NoMatchFound { diagnostic: None })
            } else {
                match count_occurrences(&working, &replacement.old) {
                    1 => None,
                    0 => Some(EditError::NoMatchFound {
                        diagnostic: near_match_diagnostic(&working, &replacement.old),
                    }),
                    count => Some(EditError::MultipleMatches { count }),
                }
            };

            if let Some(cause) = cause {
                // The buffer was never published mid-batch, so restoring the
                // snapshot is just keeping it.
                self.buffer = Some(snapshot);
                return Err(EditError::BatchFailed {
                    index,
                    total,
                    cause: Box::new(cause),
                });
            }

            working = working.replacen(&replacement.old, &replacement.new, 1);
        }

        self.buffer = Some(working);
        Ok(total)
    }

    fn require_buffer(&self) -> Result<&str, EditError> {
        self.buffer.as_deref().ok_or_else(|| EditError::FileNotFound {
            path: WORKFLOW_PATH.to_string(),
        })
    }
}

/// Non-overlapping occurrence count.
fn count_occurrences(buffer: &str, needle: &str) -> usize {
    buffer.match_indices(needle).count()
}

/// Toggle one trailing newline on both sides of a replacement pair.
///
/// Models frequently copy the old text with the final newline missing or
/// doubled; toggling both strings keeps the edit shape intact.
fn toggle_trailing_newline(old: &str, new: &str) -> (String, String) {
    match old.strip_suffix('\n') {
        Some(stripped) => {
            let new = new.strip_suffix('\n').unwrap_or(new);
            (stripped.to_string(), new.to_string())
        }
        None => (format!("{old}\n"), format!("{new}\n")),
    }
}

/// Locate where the document diverges from an unmatched `old` string.
///
/// Binary-searches prefix lengths of `old` (on char boundaries, favoring the
/// longer match) for the longest prefix present verbatim in the buffer, then
/// renders the unmatched tail next to the real buffer lines around the
/// divergence point.
fn near_match_diagnostic(buffer: &str, old: &str) -> Option<String> {
    let boundaries: Vec<usize> = old
        .char_indices()
        .map(|(offset, _)| offset)
        .chain(std::iter::once(old.len()))
        .collect();

    // contains(prefix) is monotone in the prefix length, so the longest
    // matching prefix can be found by bisection.
    let mut lo = 0usize;
    let mut hi = boundaries.len() - 1;
    while lo < hi {
        let mid = (lo + hi).div_ceil(2);
        if buffer.contains(&old[..boundaries[mid]]) {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }

    let matched_chars = lo;
    if matched_chars < MIN_DIAGNOSTIC_PREFIX_CHARS {
        return None;
    }

    let matched_bytes = boundaries[matched_chars];
    let prefix_pos = buffer.find(&old[..matched_bytes])?;
    let divergence = prefix_pos + matched_bytes;
    let divergence_line = buffer[..divergence].matches('\n').count() + 1;

    let lines: Vec<&str> = buffer.lines().collect();
    let first = divergence_line.saturating_sub(DIAGNOSTIC_LINES_BEFORE).max(1);
    let last = (divergence_line + DIAGNOSTIC_LINES_AFTER).min(lines.len().max(1));

    let mut message = format!(
        "the first {matched_chars} characters of the old text match the document, then diverge at line {divergence_line}"
    );
    message.push_str("\nunmatched remainder of the old text:\n");
    message.push_str(&truncate_chars(&old[matched_bytes..], DIAGNOSTIC_TAIL_CHARS));
    message.push_str(&format!("\ndocument around line {divergence_line}:\n"));
    for (offset, line) in lines[first - 1..last].iter().enumerate() {
        message.push_str(&format!("{}: {}\n", first + offset, line));
    }
    Some(message)
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push_str("[...]");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{Document, EditError, WORKFLOW_PATH};
    use crate::core::types::Replacement;

    fn doc(text: &str) -> Document {
        Document::with_buffer(text)
    }

    #[test]
    fn view_numbers_lines_from_one() {
        let document = doc("alpha\nbeta");
        assert_eq!(document.view(None).expect("view"), "1: alpha\n2: beta");
    }

    #[test]
    fn view_without_buffer_is_file_not_found() {
        let document = Document::new();
        let err = document.view(None).expect_err("no buffer");
        assert_eq!(
            err,
            EditError::FileNotFound {
                path: WORKFLOW_PATH.to_string()
            }
        );
    }

    #[test]
    fn view_range_selects_inclusive_lines() {
        let document = doc("a\nb\nc\nd");
        assert_eq!(document.view(Some((2, 3))).expect("view"), "2: b\n3: c");
    }

    #[test]
    fn view_range_rejects_out_of_bounds_lines() {
        let document = doc("a\nb");
        assert_eq!(
            document.view(Some((0, 1))).expect_err("start too small"),
            EditError::InvalidLineNumber { line: 0, max: 2 }
        );
        assert_eq!(
            document.view(Some((1, 3))).expect_err("end too large"),
            EditError::InvalidLineNumber { line: 3, max: 2 }
        );
        assert_eq!(
            document.view(Some((2, 1))).expect_err("inverted"),
            EditError::InvalidViewRange { start: 2, end: 1 }
        );
    }

    #[test]
    fn create_overwrites_existing_buffer() {
        let mut document = doc("old");
        document.create(WORKFLOW_PATH, "new").expect("create");
        assert_eq!(document.buffer(), Some("new"));
    }

    #[test]
    fn create_rejects_other_paths() {
        let mut document = Document::new();
        let err = document
            .create("other.json", "text")
            .expect_err("wrong path");
        assert!(matches!(err, EditError::InvalidPath { .. }));
        assert!(!document.exists());
    }

    /// create then replace then view, end to end.
    #[test]
    fn create_replace_view_scenario() {
        let mut document = Document::new();
        document.create(WORKFLOW_PATH, "x=1").expect("create");
        document.replace("x=1", "x=2").expect("replace");
        assert_eq!(document.view(None).expect("view"), "1: x=2");
    }

    /// Replacing forward then backward restores the original buffer.
    #[test]
    fn replace_round_trips() {
        let original = "let value = compute();\nreturn value;";
        let mut document = doc(original);
        document.replace("value = compute()", "total = compute()").expect("forward");
        document.replace("total = compute()", "value = compute()").expect("backward");
        assert_eq!(document.buffer(), Some(original));
    }

    #[test]
    fn replace_reports_multiple_matches() {
        let mut document = doc("foo bar foo");
        assert_eq!(
            document.replace("foo", "baz").expect_err("ambiguous"),
            EditError::MultipleMatches { count: 2 }
        );
        assert_eq!(document.buffer(), Some("foo bar foo"));
    }

    #[test]
    fn replace_is_literal_even_with_metacharacters() {
        let mut document = doc("name: placeholder");
        document.replace("placeholder", "$1 and \\1").expect("replace");
        assert_eq!(document.buffer(), Some("name: $1 and \\1"));
    }

    /// The old text carries a trailing newline the buffer does not have.
    #[test]
    fn replace_tolerates_extra_trailing_newline() {
        let mut document = doc("line one\nline two");
        document.replace("line two\n", "line 2\n").expect("replace");
        assert_eq!(document.buffer(), Some("line one\nline 2"));
    }

    /// Only one newline is toggled; a doubled newline still strips down to a
    /// unique match against the end of the buffer.
    #[test]
    fn replace_strips_one_doubled_trailing_newline() {
        let mut document = doc("line one\nline two\n");
        document.replace("line two\n\n", "line 2\n\n").expect("replace");
        assert_eq!(document.buffer(), Some("line one\nline 2\n"));
    }

    #[test]
    fn no_match_includes_divergence_diagnostic() {
        let mut document = doc("first line\nsecond line here\nthird line\n");
        let err = document
            .replace("second line that never was", "x")
            .expect_err("no match");
        let EditError::NoMatchFound { diagnostic } = err else {
            panic!("expected NoMatchFound");
        };
        let diagnostic = diagnostic.expect("diagnostic");
        assert!(diagnostic.contains("line 2"), "diagnostic: {diagnostic}");
        assert!(diagnostic.contains("2: second line here"));
        assert!(diagnostic.contains("that never was"));
    }

    /// Matches shorter than the minimum prefix gate produce no diagnostic.
    #[test]
    fn short_near_matches_are_not_diagnosed() {
        let mut document = doc("abc def\n");
        let err = document.replace("abcXYZ", "x").expect_err("no match");
        assert_eq!(err, EditError::NoMatchFound { diagnostic: None });
    }

    #[test]
    fn diagnostic_respects_char_boundaries() {
        let mut document = doc("prefix \u{00e9}\u{00e9}\u{00e9} suffix\n");
        let err = document
            .replace("prefix \u{00e9}\u{00e9}\u{00e9} wrong tail", "x")
            .expect_err("no match");
        assert!(matches!(err, EditError::NoMatchFound { diagnostic: Some(_) }));
    }

    #[test]
    fn insert_at_zero_prepends() {
        let mut document = doc("b\nc");
        document.insert(0, "a").expect("insert");
        assert_eq!(document.buffer(), Some("a\nb\nc"));
    }

    #[test]
    fn insert_after_line_appends_below_it() {
        let mut document = doc("a\nc");
        document.insert(1, "b").expect("insert");
        assert_eq!(document.buffer(), Some("a\nb\nc"));
    }

    #[test]
    fn insert_at_last_line_appends_to_end() {
        let mut document = doc("a\nb");
        document.insert(2, "c").expect("insert");
        assert_eq!(document.buffer(), Some("a\nb\nc"));
    }

    #[test]
    fn insert_past_end_is_rejected() {
        let mut document = doc("a\nb");
        assert_eq!(
            document.insert(3, "c").expect_err("out of range"),
            EditError::InvalidLineNumber { line: 3, max: 2 }
        );
    }

    #[test]
    fn batch_applies_all_replacements_in_order() {
        let mut document = doc("a b c");
        let applied = document
            .batch_replace(&[
                Replacement {
                    old: "a".to_string(),
                    new: "x".to_string(),
                },
                Replacement {
                    old: "c".to_string(),
                    new: "z".to_string(),
                },
            ])
            .expect("batch");
        assert_eq!(applied, 2);
        assert_eq!(document.buffer(), Some("x b z"));
    }

    /// A later step may match text produced by an earlier step.
    #[test]
    fn batch_steps_see_prior_steps() {
        let mut document = doc("start");
        document
            .batch_replace(&[
                Replacement {
                    old: "start".to_string(),
                    new: "middle".to_string(),
                },
                Replacement {
                    old: "middle".to_string(),
                    new: "end".to_string(),
                },
            ])
            .expect("batch");
        assert_eq!(document.buffer(), Some("end"));
    }

    /// Atomic rollback: the failing batch leaves the buffer untouched and
    /// names the failing index out of the total.
    #[test]
    fn batch_failure_restores_snapshot_and_cites_index() {
        let mut document = doc("a only");
        let err = document
            .batch_replace(&[
                Replacement {
                    old: "a".to_string(),
                    new: "b".to_string(),
                },
                Replacement {
                    old: "c".to_string(),
                    new: "d".to_string(),
                },
            ])
            .expect_err("missing old");
        assert_eq!(document.buffer(), Some("a only"));
        let EditError::BatchFailed { index, total, cause } = &err else {
            panic!("expected BatchFailed");
        };
        assert_eq!((*index, *total), (1, 2));
        assert!(matches!(**cause, EditError::NoMatchFound { .. }));
        assert!(err.not_attempted().is_empty());
    }

    #[test]
    fn batch_failure_reports_unattempted_indices() {
        let mut document = doc("nothing matches here");
        let err = document
            .batch_replace(&[
                Replacement {
                    old: "absent".to_string(),
                    new: "x".to_string(),
                },
                Replacement {
                    old: "nothing".to_string(),
                    new: "y".to_string(),
                },
                Replacement {
                    old: "here".to_string(),
                    new: "z".to_string(),
                },
            ])
            .expect_err("first step fails");
        assert_eq!(err.not_attempted(), 1..3);
        assert!(err.to_string().contains("indices 1..3"));
        assert_eq!(document.buffer(), Some("nothing matches here"));
    }

    /// The batch path has no newline-toggle fallback.
    #[test]
    fn batch_does_not_toggle_trailing_newlines() {
        let mut document = doc("line one\nline two\n");
        let err = document
            .batch_replace(&[Replacement {
                old: "line two".to_string() + "\n\n",
                new: "x".to_string(),
            }])
            .expect_err("no fallback");
        assert!(matches!(err, EditError::BatchFailed { .. }));
        assert_eq!(document.buffer(), Some("line one\nline two\n"));
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let mut document = doc("unchanged");
        assert_eq!(document.batch_replace(&[]).expect("empty"), 0);
        assert_eq!(document.buffer(), Some("unchanged"));
    }
}
