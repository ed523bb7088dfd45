//! Structural COBOL chunker with fixed-size windowing fallback.
//!
//! Splits a [`SourceDocument`] into line-addressable [`Chunk`]s that can be
//! cited as `path:start-end`. Two paths exist:
//!
//! - **Structural** (extensions in [`STRUCTURED_EXTENSIONS`]): a line scanner
//!   tracks the current division, section, and label, and starts a new chunk
//!   at every division header, section header, procedure paragraph label, and
//!   top-level (`01`/`77`) data item.
//! - **Fixed** (everything else): overlapping windows of roughly
//!   `max_chars` characters.
//!
//! # Algorithm
//!
//! 1. Split the text into 1-based [`LineRecord`]s.
//! 2. Fold the lines through [`ScanState::advance`], which either appends the
//!    line to the pending accumulator or flushes the accumulator (labeled
//!    with the state *before* the boundary) and opens a new one.
//! 3. Re-split any flushed segment longer than `2 × max_chars` with the
//!    windowing routine; parts are named `"<name> (part N)"`.
//! 4. Attach the document's `PROGRAM-ID` (if any) to every chunk.
//!
//! # Guarantees
//!
//! - Every line `1..=N` is covered by at least one chunk.
//! - Structural chunks that were not re-split are contiguous and disjoint.
//! - Windows advance by at least one line and overlap their predecessor by
//!   at most `overlap_lines`.
//! - Identical input yields identical chunks, including IDs.
//!
//! # Example
//!
//! ```rust
//! use cobol_lens_core::chunk::{chunk_document, ChunkOptions};
//! use cobol_lens_core::models::{ChunkType, SourceDocument};
//!
//! let doc = SourceDocument::new(
//!     "HELLO.cbl",
//!     "       IDENTIFICATION DIVISION.\n       PROGRAM-ID. HELLO.\n       PROCEDURE DIVISION.\n       MAIN-PARA.\n           DISPLAY 'HI'.",
//! );
//! let chunks = chunk_document(&doc, &ChunkOptions::default());
//! assert_eq!(chunks.len(), 3);
//! assert_eq!(chunks[2].chunk_type, ChunkType::Paragraph);
//! assert_eq!(chunks[2].program_id.as_deref(), Some("HELLO"));
//! ```

use regex::Regex;
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::ops::Range;
use std::sync::LazyLock;

use crate::models::{Chunk, ChunkType, SourceDocument};

/// Nominal chunk size in characters.
pub const DEFAULT_MAX_CHARS: usize = 1500;

/// Lines shared between adjacent fixed-size windows.
pub const DEFAULT_OVERLAP_LINES: usize = 5;

/// File extensions (lowercase) that take the structural path.
pub const STRUCTURED_EXTENSIONS: &[&str] = &["cbl", "cob", "cobol", "cpy"];

/// Label of the chunk that holds lines before the first header.
const PREAMBLE_NAME: &str = "PREAMBLE";

const PROCEDURE_DIVISION: &str = "PROCEDURE DIVISION";
const DATA_DIVISION: &str = "DATA DIVISION";

static DIVISION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*([A-Z][A-Z0-9-]*)\s+DIVISION(?:[\s.]|$)").expect("valid regex"));

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*([A-Z0-9][A-Z0-9-]*)\s+SECTION\s*\.").expect("valid regex")
});

static PARAGRAPH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[ \t]{0,10}([A-Z][A-Z0-9-]*)\s*\.\s*$").expect("valid regex")
});

static DATA_ITEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:01|77)\s+([A-Z][A-Z0-9-]*)").expect("valid regex")
});

static PROGRAM_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bPROGRAM-ID\b\.?\s*['"]?([A-Z0-9][A-Z0-9-]*)"#).expect("valid regex")
});

/// Statements that may sit alone on a line and look like paragraph labels.
const STATEMENT_KEYWORDS: &[&str] = &[
    "EXIT",
    "GOBACK",
    "CONTINUE",
    "STOP",
    "ELSE",
    "DECLARATIVES",
    "NEXT",
];

/// Chunk sizing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOptions {
    /// Nominal window size; structural chunks above twice this are re-split.
    pub max_chars: usize,
    /// Lines repeated at the start of each window after the first.
    pub overlap_lines: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_CHARS,
            overlap_lines: DEFAULT_OVERLAP_LINES,
        }
    }
}

/// One source line with its 1-based position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRecord<'a> {
    pub line_number: usize,
    pub text: &'a str,
}

/// Split a document into chunks.
///
/// Returns an empty vector for an empty document.
pub fn chunk_document(doc: &SourceDocument, opts: &ChunkOptions) -> Vec<Chunk> {
    let lines: Vec<LineRecord<'_>> = doc
        .content
        .lines()
        .enumerate()
        .map(|(i, text)| LineRecord {
            line_number: i + 1,
            text,
        })
        .collect();

    if lines.is_empty() {
        return Vec::new();
    }

    if is_structured(doc) {
        chunk_structural(&doc.path, &lines, opts)
    } else {
        chunk_fixed(doc, &lines, opts)
    }
}

/// Whether the document takes the structural path.
pub fn is_structured(doc: &SourceDocument) -> bool {
    doc.extension()
        .map(|ext| STRUCTURED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Deterministic chunk ID: first 128 bits of `SHA-256("{path}:{start_line}")`.
pub fn chunk_id(file_path: &str, start_line: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_path.as_bytes());
    hasher.update(b":");
    hasher.update(start_line.to_string().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..32].to_string()
}

/// True for fixed-format comment lines (`*` or `/` in column 7) and
/// free-format `*>` comments.
pub fn is_comment(line: &str) -> bool {
    matches!(line.as_bytes().get(6), Some(b'*') | Some(b'/')) || line.trim_start().starts_with("*>")
}

/// First `PROGRAM-ID` declaration, uppercased.
pub fn extract_program_id(lines: &[LineRecord<'_>]) -> Option<String> {
    lines
        .iter()
        .filter(|l| !is_comment(l.text))
        .find_map(|l| PROGRAM_ID_RE.captures(&code_area(l.text)).map(|c| c[1].to_ascii_uppercase()))
}

/// Drop the identification area (columns 73+) and blank out a numeric
/// sequence area (columns 1-6) so header patterns see the code columns only.
fn code_area(line: &str) -> Cow<'_, str> {
    let line = match line.char_indices().nth(72) {
        Some((end, _)) => &line[..end],
        None => line,
    };
    let bytes = line.as_bytes();
    if bytes.len() >= 6 && bytes[..6].iter().all(u8::is_ascii_digit) {
        Cow::Owned(format!("      {}", &line[6..]))
    } else {
        Cow::Borrowed(line)
    }
}

// ============ Structural path ============

/// A structural boundary recognized on one line.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Boundary {
    Division(String),
    Section(String),
    Paragraph(String),
    DataItem(String),
}

/// Classify a line against the fixed-priority boundary patterns.
fn classify(line: &str, division: Option<&str>) -> Option<Boundary> {
    let code = code_area(line);

    if let Some(c) = DIVISION_RE.captures(&code) {
        return Some(Boundary::Division(format!(
            "{} DIVISION",
            c[1].to_ascii_uppercase()
        )));
    }

    let comment = is_comment(line);

    if !comment {
        if let Some(c) = SECTION_RE.captures(&code) {
            let name = c[1].to_ascii_uppercase();
            if !is_statement_keyword(&name) {
                return Some(Boundary::Section(format!("{} SECTION", name)));
            }
        }
    }

    let trimmed = code.trim_start();

    if division == Some(PROCEDURE_DIVISION)
        && !comment
        && !trimmed.is_empty()
        && !trimmed.starts_with(|c: char| c.is_ascii_digit())
    {
        if let Some(c) = PARAGRAPH_RE.captures(&code) {
            let name = c[1].to_ascii_uppercase();
            if !is_statement_keyword(&name) {
                return Some(Boundary::Paragraph(name));
            }
        }
    }

    if division == Some(DATA_DIVISION) && !comment {
        if let Some(c) = DATA_ITEM_RE.captures(&code) {
            return Some(Boundary::DataItem(c[1].to_ascii_uppercase()));
        }
    }

    None
}

fn is_statement_keyword(name: &str) -> bool {
    name.starts_with("END-") || STATEMENT_KEYWORDS.contains(&name)
}

/// Label carried by the chunk currently being accumulated.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Label {
    chunk_type: ChunkType,
    name: String,
    parent: Option<String>,
}

/// A flushed run of lines with its label.
#[derive(Debug, Clone)]
struct Segment<'a> {
    label: Label,
    lines: Vec<LineRecord<'a>>,
}

/// Scanner state between lines. Each transition consumes the old state and
/// returns the next one.
#[derive(Debug, Clone)]
struct ScanState<'a> {
    division: Option<String>,
    section: Option<String>,
    label: Label,
    pending: Vec<LineRecord<'a>>,
}

impl<'a> ScanState<'a> {
    fn initial() -> Self {
        Self {
            division: None,
            section: None,
            label: Label {
                chunk_type: ChunkType::Division,
                name: PREAMBLE_NAME.to_string(),
                parent: None,
            },
            pending: Vec::new(),
        }
    }

    /// Consume one line. Returns the next state and the segment flushed by a
    /// boundary, if any.
    fn advance(self, line: LineRecord<'a>) -> (Self, Option<Segment<'a>>) {
        let boundary = match classify(line.text, self.division.as_deref()) {
            Some(b) => b,
            None => {
                let mut pending = self.pending;
                pending.push(line);
                return (ScanState { pending, ..self }, None);
            }
        };

        let ScanState {
            division,
            section,
            label,
            pending,
        } = self;

        let flushed = (!pending.is_empty()).then_some(Segment {
            label,
            lines: pending,
        });

        let (division, section, label) = match boundary {
            Boundary::Division(name) => (
                Some(name.clone()),
                None,
                Label {
                    chunk_type: ChunkType::Division,
                    name,
                    parent: None,
                },
            ),
            Boundary::Section(name) => {
                let parent = division.clone();
                (
                    division,
                    Some(name.clone()),
                    Label {
                        chunk_type: ChunkType::Section,
                        name,
                        parent,
                    },
                )
            }
            Boundary::Paragraph(name) => {
                let parent = section.clone().or_else(|| division.clone());
                (
                    division,
                    section,
                    Label {
                        chunk_type: ChunkType::Paragraph,
                        name,
                        parent,
                    },
                )
            }
            Boundary::DataItem(name) => {
                let parent = section.clone().or_else(|| division.clone());
                (
                    division,
                    section,
                    Label {
                        chunk_type: ChunkType::Data,
                        name,
                        parent,
                    },
                )
            }
        };

        let next = ScanState {
            division,
            section,
            label,
            pending: vec![line],
        };
        (next, flushed)
    }

    /// Flush whatever remains at end of input.
    fn finish(self) -> Option<Segment<'a>> {
        (!self.pending.is_empty()).then_some(Segment {
            label: self.label,
            lines: self.pending,
        })
    }
}

fn chunk_structural(path: &str, lines: &[LineRecord<'_>], opts: &ChunkOptions) -> Vec<Chunk> {
    let program_id = extract_program_id(lines);

    let (last, mut segments) = lines.iter().fold(
        (ScanState::initial(), Vec::new()),
        |(state, mut segments), line| {
            let (next, flushed) = state.advance(*line);
            segments.extend(flushed);
            (next, segments)
        },
    );
    segments.extend(last.finish());

    segments
        .into_iter()
        .flat_map(|seg| segment_to_chunks(path, seg, program_id.as_deref(), opts))
        .collect()
}

/// Turn a segment into one chunk, or into windowed parts when oversized.
fn segment_to_chunks(
    path: &str,
    seg: Segment<'_>,
    program_id: Option<&str>,
    opts: &ChunkOptions,
) -> Vec<Chunk> {
    let content = join_lines(&seg.lines);
    if content.len() <= opts.max_chars.saturating_mul(2) {
        return vec![make_chunk(path, &seg.lines, content, &seg.label, seg.label.name.clone(), program_id)];
    }

    window_ranges(&seg.lines, opts)
        .into_iter()
        .enumerate()
        .map(|(i, range)| {
            let part = &seg.lines[range];
            make_chunk(
                path,
                part,
                join_lines(part),
                &seg.label,
                format!("{} (part {})", seg.label.name, i + 1),
                program_id,
            )
        })
        .collect()
}

// ============ Fixed path ============

fn chunk_fixed(doc: &SourceDocument, lines: &[LineRecord<'_>], opts: &ChunkOptions) -> Vec<Chunk> {
    let ranges = window_ranges(lines, opts);
    let multi = ranges.len() > 1;
    let base = doc.file_name().to_string();
    let label = Label {
        chunk_type: ChunkType::Fixed,
        name: base.clone(),
        parent: None,
    };

    ranges
        .into_iter()
        .enumerate()
        .map(|(i, range)| {
            let part = &lines[range];
            let name = if multi {
                format!("{} (part {})", base, i + 1)
            } else {
                base.clone()
            };
            make_chunk(&doc.path, part, join_lines(part), &label, name, None)
        })
        .collect()
}

/// Compute overlapping window ranges over `lines`.
///
/// Each window accumulates `len + 1` per line until the running total
/// reaches `max_chars`, never growing past `2 × max_chars` once it holds a
/// line. The next window starts `overlap_lines` before the previous end,
/// but always at least one line after the previous start.
pub fn window_ranges(lines: &[LineRecord<'_>], opts: &ChunkOptions) -> Vec<Range<usize>> {
    let n = lines.len();
    let max = opts.max_chars.max(1);
    let hard_cap = max.saturating_mul(2);
    let mut ranges = Vec::new();
    let mut i = 0;

    while i < n {
        let start = i;
        let mut size = 0usize;
        while i < n && size < max {
            let cost = lines[i].text.len() + 1;
            if i > start && size + cost > hard_cap {
                break;
            }
            size += cost;
            i += 1;
        }
        ranges.push(start..i);
        if i >= n {
            break;
        }
        i = i.saturating_sub(opts.overlap_lines).max(start + 1);
    }

    ranges
}

fn join_lines(lines: &[LineRecord<'_>]) -> String {
    lines.iter().map(|l| l.text).collect::<Vec<_>>().join("\n")
}

fn make_chunk(
    path: &str,
    lines: &[LineRecord<'_>],
    content: String,
    label: &Label,
    name: String,
    program_id: Option<&str>,
) -> Chunk {
    let start_line = lines.first().map(|l| l.line_number).unwrap_or(1);
    let end_line = lines.last().map(|l| l.line_number).unwrap_or(start_line);
    Chunk {
        id: chunk_id(path, start_line),
        content,
        file_path: path.to_string(),
        start_line,
        end_line,
        chunk_type: label.chunk_type,
        name,
        parent_section: label.parent.clone(),
        program_id: program_id.map(str::to_string),
    }
}
