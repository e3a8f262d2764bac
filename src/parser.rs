//! Line-oriented document parser.
//!
//! Converts raw markdown-style upload documents into an ordered sequence of
//! [`RawCandidate`]s with source-line provenance. The grammar is
//! order-significant within a block:
//!
//! ```text
//! # Topic: Accounting
//! ## Subtopic: Revenue Recognition
//! ### Difficulty: Basic
//! #### Type: Definition
//! **Question:** What is ASC 606?
//! **Answer:** The revenue recognition standard that...
//! **Notes for Tutor:** Optional follow-up prompts.
//! ```
//!
//! Each `**Question:**` marker opens a block; the block ends at the next
//! marker line or end of document. Malformed blocks (missing section
//! context, missing answer marker) yield a block-scoped [`ParseError`] and
//! parsing continues at the next block boundary — no block is silently
//! dropped, so candidates + errors always account for every question
//! marker in the document.

use crate::models::{ParseError, RawCandidate};

const TOPIC_MARKER: &str = "# Topic:";
const SUBTOPIC_MARKER: &str = "## ";
const SUBTOPIC_LABEL: &str = "## Subtopic";
const DIFFICULTY_MARKER: &str = "### Difficulty:";
const TYPE_MARKER: &str = "#### Type:";
const QUESTION_MARKER: &str = "**Question:**";
const ANSWER_MARKER: &str = "**Answer:**";
const NOTES_MARKER: &str = "**Notes for Tutor:**";

/// One classified input line.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Marker<'a> {
    Topic(&'a str),
    Subtopic(&'a str),
    Difficulty(&'a str),
    Type(&'a str),
    Question(&'a str),
    Answer(&'a str),
    Notes(&'a str),
}

fn classify(line: &str) -> Option<Marker<'_>> {
    let trimmed = line.trim_start();
    if let Some(rest) = line.strip_prefix(TOPIC_MARKER) {
        return Some(Marker::Topic(rest.trim()));
    }
    if line.starts_with(SUBTOPIC_MARKER) {
        // Accept both "## Subtopic: X" and a bare "## X" section heading.
        let rest = if line.starts_with(SUBTOPIC_LABEL) {
            line.split_once(':').map(|(_, v)| v).unwrap_or("")
        } else {
            &line[SUBTOPIC_MARKER.len()..]
        };
        return Some(Marker::Subtopic(rest.trim()));
    }
    if let Some(rest) = line.strip_prefix(DIFFICULTY_MARKER) {
        return Some(Marker::Difficulty(rest.trim()));
    }
    if let Some(rest) = line.strip_prefix(TYPE_MARKER) {
        return Some(Marker::Type(rest.trim()));
    }
    if let Some(rest) = trimmed.strip_prefix(QUESTION_MARKER) {
        return Some(Marker::Question(rest.trim()));
    }
    if let Some(rest) = trimmed.strip_prefix(ANSWER_MARKER) {
        return Some(Marker::Answer(rest.trim()));
    }
    if let Some(rest) = trimmed.strip_prefix(NOTES_MARKER) {
        return Some(Marker::Notes(rest.trim()));
    }
    None
}

/// Lazy, finite, non-restartable iterator over the document's blocks.
///
/// Yields one `Ok(RawCandidate)` or `Err(ParseError)` per detected
/// `**Question:**` boundary, in source order.
pub struct Blocks<'a> {
    lines: Vec<&'a str>,
    pos: usize,
    topic: Option<String>,
    subtopic: Option<String>,
    difficulty: Option<String>,
    qtype: Option<String>,
}

impl<'a> Blocks<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines().collect(),
            pos: 0,
            topic: None,
            subtopic: None,
            difficulty: None,
            qtype: None,
        }
    }

    /// Consumes one question block starting at `self.pos` (which sits on the
    /// `**Question:**` line). Leaves `self.pos` on the line that terminated
    /// the block so section markers are re-examined by the main loop.
    fn read_block(&mut self, first_text: &str) -> Result<RawCandidate, ParseError> {
        // 1-based line of the question marker
        let source_line = self.pos + 1;
        self.pos += 1;

        #[derive(PartialEq)]
        enum Section {
            Question,
            Answer,
            Notes,
        }

        let mut question = vec![first_text.to_string()];
        let mut answer: Option<Vec<String>> = None;
        let mut notes: Option<Vec<String>> = None;
        let mut section = Section::Question;

        while self.pos < self.lines.len() {
            let line = self.lines[self.pos];
            match classify(line) {
                Some(
                    Marker::Topic(_)
                    | Marker::Subtopic(_)
                    | Marker::Difficulty(_)
                    | Marker::Type(_)
                    | Marker::Question(_),
                ) => break,
                Some(Marker::Answer(v)) => {
                    answer.get_or_insert_with(Vec::new).push(v.to_string());
                    section = Section::Answer;
                    self.pos += 1;
                }
                Some(Marker::Notes(v)) => {
                    notes.get_or_insert_with(Vec::new).push(v.to_string());
                    section = Section::Notes;
                    self.pos += 1;
                }
                None => {
                    match section {
                        Section::Question => question.push(line.to_string()),
                        Section::Answer => {
                            if let Some(buf) = answer.as_mut() {
                                buf.push(line.to_string());
                            }
                        }
                        Section::Notes => {
                            if let Some(buf) = notes.as_mut() {
                                buf.push(line.to_string());
                            }
                        }
                    }
                    self.pos += 1;
                }
            }
        }

        let mut missing = Vec::new();
        if self.topic.is_none() {
            missing.push(TOPIC_MARKER);
        }
        if self.subtopic.is_none() {
            missing.push(SUBTOPIC_LABEL);
        }
        if self.difficulty.is_none() {
            missing.push(DIFFICULTY_MARKER);
        }
        if self.qtype.is_none() {
            missing.push(TYPE_MARKER);
        }
        if !missing.is_empty() {
            return Err(ParseError {
                line: source_line,
                reason: format!(
                    "question block has no preceding {} marker",
                    missing.join(", ")
                ),
            });
        }

        let answer = match answer {
            Some(buf) => buf.join("\n").trim().to_string(),
            None => {
                return Err(ParseError {
                    line: source_line,
                    reason: format!("question block is missing the {} marker", ANSWER_MARKER),
                });
            }
        };

        let notes = notes
            .map(|buf| buf.join("\n").trim().to_string())
            .filter(|n| !n.is_empty());

        Ok(RawCandidate {
            topic: self.topic.clone().unwrap_or_default(),
            subtopic: self.subtopic.clone().unwrap_or_default(),
            difficulty: self.difficulty.clone().unwrap_or_default(),
            qtype: self.qtype.clone().unwrap_or_default(),
            question: question.join("\n").trim().to_string(),
            answer,
            notes,
            source_line,
        })
    }
}

impl Iterator for Blocks<'_> {
    type Item = Result<RawCandidate, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.pos < self.lines.len() {
            let line = self.lines[self.pos];
            match classify(line) {
                Some(Marker::Topic(v)) => {
                    self.topic = Some(v.to_string());
                    self.pos += 1;
                }
                Some(Marker::Subtopic(v)) => {
                    self.subtopic = Some(v.to_string());
                    self.pos += 1;
                }
                Some(Marker::Difficulty(v)) => {
                    self.difficulty = Some(v.to_string());
                    self.pos += 1;
                }
                Some(Marker::Type(v)) => {
                    self.qtype = Some(v.to_string());
                    self.pos += 1;
                }
                Some(Marker::Question(first)) => {
                    let first = first.to_string();
                    return Some(self.read_block(&first));
                }
                // Stray answer/notes markers outside a block carry no
                // boundary of their own.
                Some(Marker::Answer(_) | Marker::Notes(_)) | None => {
                    self.pos += 1;
                }
            }
        }
        None
    }
}

/// Fully-drained parse of one document.
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    pub candidates: Vec<RawCandidate>,
    pub errors: Vec<ParseError>,
}

/// Drains [`Blocks`] into candidates and errors, preserving source order.
pub fn parse_document(text: &str) -> ParsedDocument {
    let mut doc = ParsedDocument::default();
    for block in Blocks::new(text) {
        match block {
            Ok(candidate) => doc.candidates.push(candidate),
            Err(err) => doc.errors.push(err),
        }
    }
    doc
}
