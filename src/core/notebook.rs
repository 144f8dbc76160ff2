//! Append-only Markdown notebooks, one per topic.
//!
//! A notebook is `<topics_dir>/<topic>.md`: a `# <topic>` title followed by
//! voice dump and commentary sections separated by `\n---\n\n`. Bytes already
//! in the file are never rewritten. Each append is one locked `write_all`, so
//! readers and sync tools see either the old file or the old file plus the
//! whole new block.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Local, NaiveDate};
use fs2::FileExt;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::router::sanitize_topic;
use crate::domain::Mode;

/// Written between consecutive sections
pub const SECTION_SEPARATOR: &str = "\n---\n\n";

/// Start of every commentary placeholder
pub const PLACEHOLDER_MARKER: &str = "(Commentary unavailable;";

const DUMP_HEADING: &str = "## Voice Dump — ";
const COMMENTARY_HEADING: &str = "## AI Commentary — ";

/// Errors that can occur with notebooks
#[derive(Debug, Error)]
pub enum NotebookError {
    #[error("Failed to write notebook {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read notebook {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// How much notebook history goes into a referee prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextLimits {
    pub voice_dumps: usize,
    pub commentaries: usize,
    pub max_chars: usize,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            voice_dumps: 3,
            commentaries: 1,
            max_chars: 20_000,
        }
    }
}

/// A transcript ready to be appended
#[derive(Debug, Clone)]
pub struct DumpSection {
    pub dumped_at: DateTime<Local>,
    /// Shown on the `**Source audio:**` line
    pub source_audio: String,
    pub mode: Mode,
    pub transcript: String,
}

impl DumpSection {
    /// Markdown block, heading first, ending in a single newline
    pub fn render(&self) -> String {
        format!(
            "{}{}\n**Source audio:** {}\n**Mode:** {}\n\n{}\n",
            DUMP_HEADING,
            self.dumped_at.format("%Y-%m-%d %H:%M"),
            self.source_audio,
            self.mode,
            clean_transcript(&self.transcript),
        )
    }
}

fn trailing_space_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t]+\n").expect("valid regex"))
}

fn blank_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").expect("valid regex"))
}

fn body_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^(## (?:Voice Dump|AI Commentary) — )").expect("valid regex"))
}

fn section_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^## (Voice Dump|AI Commentary) — .*$").expect("valid regex"))
}

/// Normalise line endings and blank runs, then trim
pub fn clean_transcript(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let text = trailing_space_re().replace_all(&text, "\n");
    let text = blank_run_re().replace_all(&text, "\n\n");
    escape_headings(text.trim())
}

/// Backslash-escape body lines that would read back as section headings
pub fn escape_headings(body: &str) -> String {
    body_heading_re().replace_all(body, r"\${1}").into_owned()
}

/// Kind of a notebook section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    VoiceDump,
    Commentary,
}

/// One section as read back from a notebook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub kind: SectionKind,
    /// Heading line plus body, trimmed, without the trailing separator
    pub markdown: String,
}

impl Section {
    pub fn heading(&self) -> &str {
        self.markdown.lines().next().unwrap_or_default()
    }

    /// Everything after the heading line
    pub fn body(&self) -> &str {
        self.markdown
            .split_once('\n')
            .map(|(_, rest)| rest.trim())
            .unwrap_or_default()
    }

    /// Dump body without the metadata lines
    pub fn transcript(&self) -> String {
        self.body()
            .lines()
            .filter(|l| !l.starts_with("**Source audio:**") && !l.starts_with("**Mode:**"))
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string()
    }

    /// Commentary that is only the "unavailable" placeholder
    pub fn is_placeholder(&self) -> bool {
        self.kind == SectionKind::Commentary && self.body().contains(PLACEHOLDER_MARKER)
    }
}

/// Most recent sections of a notebook
#[derive(Debug, Clone, Default)]
pub struct LatestSections {
    pub latest_dump: Option<Section>,
    pub latest_commentary: Option<Section>,
    pub last_kind: Option<SectionKind>,
}

/// Split notebook text into sections
pub fn parse_sections(text: &str) -> Vec<Section> {
    let starts: Vec<(usize, SectionKind)> = section_re()
        .captures_iter(text)
        .filter_map(|c| {
            let whole = c.get(0)?;
            let kind = match c.get(1)?.as_str() {
                "Voice Dump" => SectionKind::VoiceDump,
                _ => SectionKind::Commentary,
            };
            Some((whole.start(), kind))
        })
        .collect();

    starts
        .iter()
        .enumerate()
        .map(|(i, (start, kind))| {
            let end = starts.get(i + 1).map(|(s, _)| *s).unwrap_or(text.len());
            let mut block = text[*start..end].trim_end();
            if let Some(stripped) = block.strip_suffix("\n---") {
                block = stripped.trim_end();
            }
            Section {
                kind: *kind,
                markdown: block.to_string(),
            }
        })
        .collect()
}

/// Pick recent sections, newest first, within the limits, and join them
/// oldest first.
pub fn select_context(sections: &[Section], limits: &ContextLimits, skip_latest_dump: bool) -> String {
    const JOIN: &str = "\n\n---\n\n";

    let mut selected: Vec<&str> = Vec::new();
    let mut remaining_dumps = limits.voice_dumps;
    let mut remaining_commentaries = limits.commentaries;
    let mut total = 0usize;
    let mut skipped = !skip_latest_dump;

    for section in sections.iter().rev() {
        let remaining = match section.kind {
            SectionKind::VoiceDump => {
                if !skipped {
                    skipped = true;
                    continue;
                }
                &mut remaining_dumps
            }
            SectionKind::Commentary => &mut remaining_commentaries,
        };
        if *remaining == 0 {
            continue;
        }

        let block = section.markdown.as_str();
        let block_len = block.chars().count() + if selected.is_empty() { 0 } else { JOIN.len() };
        if !selected.is_empty() && total + block_len > limits.max_chars {
            break;
        }

        selected.push(block);
        total += block_len;
        *remaining -= 1;
        if remaining_dumps == 0 && remaining_commentaries == 0 {
            break;
        }
    }

    selected.reverse();
    selected.join(JOIN).trim().to_string()
}

/// Handle on a single notebook file
#[derive(Debug, Clone)]
pub struct Notebook {
    path: PathBuf,
    title: String,
}

impl Notebook {
    /// Existing (or future) notebook at `path`; the title is the file stem
    pub fn at(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Untitled".to_string());
        Self { path, title }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    fn write_err(&self, source: std::io::Error) -> NotebookError {
        NotebookError::Write {
            path: self.path.clone(),
            source,
        }
    }

    /// Append one block: title when the file is new, else separator
    fn append_block(&self, block: &str) -> Result<(), NotebookError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.write_err(e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.write_err(e))?;

        // Released when the file is dropped
        file.lock_exclusive().map_err(|e| self.write_err(e))?;

        let len = file.metadata().map_err(|e| self.write_err(e))?.len();
        let mut out = String::with_capacity(block.len() + 64);
        if len == 0 {
            out.push_str(&format!("# {}\n\n", self.title));
        } else {
            if !ends_with_newline(&mut file, len).map_err(|e| self.write_err(e))? {
                out.push('\n');
            }
            out.push_str(SECTION_SEPARATOR);
        }
        out.push_str(block.trim_end_matches('\n'));
        out.push('\n');

        file.write_all(out.as_bytes()).map_err(|e| self.write_err(e))?;
        file.sync_data().map_err(|e| self.write_err(e))?;
        Ok(())
    }

    /// Append a voice dump section
    pub fn append_dump(&self, dump: &DumpSection) -> Result<(), NotebookError> {
        self.append_block(&dump.render())
    }

    /// Append referee output as a commentary section
    pub fn append_commentary(&self, date: NaiveDate, body: &str) -> Result<(), NotebookError> {
        let body = body.trim();
        // Referees sometimes emit the heading themselves
        let block = match body.strip_prefix(COMMENTARY_HEADING) {
            Some(rest) => match rest.split_once('\n') {
                Some((heading, text)) => {
                    format!("{}{}\n{}", COMMENTARY_HEADING, heading, escape_headings(text))
                }
                None => body.to_string(),
            },
            None => format!(
                "{}{}\n\n{}",
                COMMENTARY_HEADING,
                date.format("%Y-%m-%d"),
                escape_headings(body)
            ),
        };
        self.append_block(&block)
    }

    /// Append the "commentary unavailable" placeholder
    pub fn append_placeholder(&self, date: NaiveDate, error: &str) -> Result<(), NotebookError> {
        let block = format!(
            "{}{}\n\n{} rerun: `voxnote rerun-commentary \"{}\"`)\n\nError: {}",
            COMMENTARY_HEADING,
            date.format("%Y-%m-%d"),
            PLACEHOLDER_MARKER,
            self.path.display(),
            error.trim(),
        );
        self.append_block(&block)
    }

    /// Full text; a missing notebook reads as empty
    pub fn read(&self) -> Result<String, NotebookError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(source) => Err(NotebookError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    pub fn read_sections(&self) -> Result<Vec<Section>, NotebookError> {
        Ok(parse_sections(&self.read()?))
    }

    pub fn latest_sections(&self) -> Result<LatestSections, NotebookError> {
        let sections = self.read_sections()?;
        Ok(LatestSections {
            latest_dump: sections
                .iter()
                .rev()
                .find(|s| s.kind == SectionKind::VoiceDump)
                .cloned(),
            latest_commentary: sections
                .iter()
                .rev()
                .find(|s| s.kind == SectionKind::Commentary)
                .cloned(),
            last_kind: sections.last().map(|s| s.kind),
        })
    }

    /// Recent history for a referee prompt
    pub fn extract_context(
        &self,
        limits: &ContextLimits,
        skip_latest_dump: bool,
    ) -> Result<String, NotebookError> {
        Ok(select_context(&self.read_sections()?, limits, skip_latest_dump))
    }
}

fn ends_with_newline(file: &mut File, len: u64) -> std::io::Result<bool> {
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

/// Owns the topics directory and maps topics to notebooks
#[derive(Debug, Clone)]
pub struct NotebookWriter {
    topics_dir: PathBuf,
}

impl NotebookWriter {
    pub fn new(topics_dir: impl Into<PathBuf>) -> Self {
        Self {
            topics_dir: topics_dir.into(),
        }
    }

    pub fn topics_dir(&self) -> &Path {
        &self.topics_dir
    }

    /// `<topics_dir>/<sanitized topic>.md`
    pub fn notebook_path(&self, topic: &str) -> PathBuf {
        self.topics_dir.join(format!("{}.md", sanitize_topic(topic)))
    }

    pub fn notebook(&self, topic: &str) -> Notebook {
        Notebook {
            path: self.notebook_path(topic),
            title: sanitize_topic(topic),
        }
    }

    pub fn append_dump(&self, topic: &str, dump: &DumpSection) -> Result<PathBuf, NotebookError> {
        let notebook = self.notebook(topic);
        notebook.append_dump(dump)?;
        Ok(notebook.path)
    }

    pub fn append_commentary(
        &self,
        topic: &str,
        date: NaiveDate,
        body: &str,
    ) -> Result<PathBuf, NotebookError> {
        let notebook = self.notebook(topic);
        notebook.append_commentary(date, body)?;
        Ok(notebook.path)
    }

    pub fn append_placeholder(
        &self,
        topic: &str,
        date: NaiveDate,
        error: &str,
    ) -> Result<PathBuf, NotebookError> {
        let notebook = self.notebook(topic);
        notebook.append_placeholder(date, error)?;
        Ok(notebook.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn dump(transcript: &str) -> DumpSection {
        DumpSection {
            dumped_at: Local.with_ymd_and_hms(2025, 12, 29, 9, 30, 0).unwrap(),
            source_audio: "2025-12-29 Spin.m4a".to_string(),
            mode: Mode::Brainstorming,
            transcript: transcript.to_string(),
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 12, 29).unwrap()
    }

    #[test]
    fn test_clean_transcript() {
        assert_eq!(clean_transcript("a  \r\nb\t\n\n\n\n c \r"), "a\nb\n\n c");
    }

    #[test]
    fn test_new_notebook_layout() {
        let temp = TempDir::new().unwrap();
        let writer = NotebookWriter::new(temp.path());

        let path = writer.append_dump("Spin", &dump("Test transcript.")).unwrap();
        assert_eq!(path, temp.path().join("Spin.md"));
        writer.append_commentary("Spin", date(), "Good point.").unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "# Spin\n\n\
             ## Voice Dump — 2025-12-29 09:30\n\
             **Source audio:** 2025-12-29 Spin.m4a\n\
             **Mode:** brainstorming\n\
             \n\
             Test transcript.\n\
             \n---\n\n\
             ## AI Commentary — 2025-12-29\n\
             \n\
             Good point.\n"
        );
    }

    #[test]
    fn test_appends_preserve_prefix() {
        let temp = TempDir::new().unwrap();
        let writer = NotebookWriter::new(temp.path().join("nested/topics"));

        let path = writer.append_dump("Spin", &dump("one")).unwrap();
        let mut previous = std::fs::read(&path).unwrap();

        for i in 0..3 {
            writer.append_placeholder("Spin", date(), "boom").unwrap();
            writer.append_dump("Spin", &dump(&format!("take {}", i))).unwrap();
            let current = std::fs::read(&path).unwrap();
            assert!(current.starts_with(&previous));
            assert!(current.len() > previous.len());
            previous = current;
        }
    }

    #[test]
    fn test_missing_trailing_newline_is_repaired() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("Hand.md");
        std::fs::write(&path, "# Hand\n\nedited by hand").unwrap();

        let notebook = Notebook::at(&path);
        notebook.append_commentary(date(), "ok").unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# Hand\n\nedited by hand\n\n---\n\n## AI Commentary"));
    }

    #[test]
    fn test_placeholder_format() {
        let temp = TempDir::new().unwrap();
        let writer = NotebookWriter::new(temp.path());
        writer.append_dump("Spin", &dump("x")).unwrap();
        let path = writer.append_placeholder("Spin", date(), "referee timed out").unwrap();

        let latest = Notebook::at(&path).latest_sections().unwrap();
        let placeholder = latest.latest_commentary.unwrap();
        assert!(placeholder.is_placeholder());
        assert_eq!(
            placeholder.body(),
            format!(
                "(Commentary unavailable; rerun: `voxnote rerun-commentary \"{}\"`)\n\nError: referee timed out",
                path.display()
            )
        );
        assert_eq!(latest.last_kind, Some(SectionKind::Commentary));
    }

    #[test]
    fn test_commentary_heading_not_duplicated() {
        let temp = TempDir::new().unwrap();
        let writer = NotebookWriter::new(temp.path());
        writer.append_dump("Spin", &dump("x")).unwrap();
        let path = writer
            .append_commentary("Spin", date(), "## AI Commentary — 2025-12-30\n\nAlready titled.")
            .unwrap();

        let sections = Notebook::at(&path).read_sections().unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[1].heading(), "## AI Commentary — 2025-12-30");
        assert_eq!(sections[1].body(), "Already titled.");
    }

    #[test]
    fn test_sections_and_transcript() {
        let temp = TempDir::new().unwrap();
        let writer = NotebookWriter::new(temp.path());
        writer.append_dump("Spin", &dump("first  \n\n\n\nsecond")).unwrap();
        let path = writer.append_commentary("Spin", date(), "Nice.").unwrap();

        let sections = Notebook::at(&path).read_sections().unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].kind, SectionKind::VoiceDump);
        assert_eq!(sections[0].transcript(), "first\n\nsecond");
        assert!(!sections[0].markdown.ends_with("---"));
        assert!(!sections[1].is_placeholder());
    }

    #[test]
    fn test_missing_notebook_reads_empty() {
        let temp = TempDir::new().unwrap();
        let notebook = Notebook::at(temp.path().join("Nope.md"));
        assert!(notebook.read_sections().unwrap().is_empty());
        let latest = notebook.latest_sections().unwrap();
        assert!(latest.latest_dump.is_none());
        assert!(latest.last_kind.is_none());
        assert_eq!(
            notebook.extract_context(&ContextLimits::default(), true).unwrap(),
            ""
        );
    }

    #[test]
    fn test_extract_context_limits() {
        let temp = TempDir::new().unwrap();
        let writer = NotebookWriter::new(temp.path());
        for i in 0..4 {
            writer.append_dump("Spin", &dump(&format!("dump {}", i))).unwrap();
            writer
                .append_commentary("Spin", date(), &format!("comment {}", i))
                .unwrap();
        }
        let path = writer.append_dump("Spin", &dump("latest")).unwrap();
        let notebook = Notebook::at(&path);

        let limits = ContextLimits {
            voice_dumps: 2,
            commentaries: 1,
            max_chars: 20_000,
        };
        let context = notebook.extract_context(&limits, true).unwrap();
        assert!(!context.contains("latest"));
        assert!(context.contains("dump 3"));
        assert!(context.contains("dump 2"));
        assert!(!context.contains("dump 1"));
        assert!(context.contains("comment 3"));
        assert!(!context.contains("comment 2"));
        // Oldest first
        assert!(context.find("dump 2").unwrap() < context.find("dump 3").unwrap());

        let tight = ContextLimits {
            voice_dumps: 3,
            commentaries: 3,
            max_chars: 10,
        };
        // The first block is always kept, nothing after it fits
        let context = notebook.extract_context(&tight, false).unwrap();
        assert!(context.contains("latest"));
        assert!(!context.contains("comment 3"));
    }

    #[test]
    fn test_notebook_path_is_sanitized() {
        let writer = NotebookWriter::new("/notes");
        assert_eq!(writer.notebook_path("a/b: c?"), PathBuf::from("/notes/a-b c.md"));
        assert_eq!(writer.notebook("a/b: c?").title(), "a-b c");
    }

    #[test]
    fn test_heading_lines_in_bodies_stay_inside_their_section() {
        let temp = TempDir::new().unwrap();
        let writer = NotebookWriter::new(temp.path());

        let path = writer
            .append_dump("Spin", &dump("First part.\n## Voice Dump — not a real heading\nSecond part."))
            .unwrap();
        writer
            .append_commentary("Spin", date(), "Fine.\n## AI Commentary — quoted")
            .unwrap();

        let sections = Notebook::at(&path).read_sections().unwrap();
        assert_eq!(sections.len(), 2);
        let transcript = sections[0].transcript();
        assert!(transcript.starts_with("First part."));
        assert!(transcript.contains("\\## Voice Dump — not a real heading"));
        assert!(transcript.ends_with("Second part."));
        assert!(sections[1].body().ends_with("\\## AI Commentary — quoted"));
    }

    #[test]
    fn test_concurrent_appends_do_not_interleave() {
        const WRITERS: usize = 8;
        const LINES: usize = 200;

        let temp = TempDir::new().unwrap();
        let dir = temp.path().to_path_buf();

        let handles: Vec<_> = (0..WRITERS)
            .map(|w| {
                let dir = dir.clone();
                std::thread::spawn(move || {
                    let writer = NotebookWriter::new(dir);
                    let text = (0..LINES)
                        .map(|l| format!("writer {w} line {l}"))
                        .collect::<Vec<_>>()
                        .join("\n");
                    writer.append_dump("Shared", &dump(&text)).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let path = dir.join("Shared.md");
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# Shared\n\n"));
        assert_eq!(text.lines().filter(|l| l.starts_with("# ")).count(), 1);

        let sections = Notebook::at(&path).read_sections().unwrap();
        assert_eq!(sections.len(), WRITERS);

        let mut seen: Vec<usize> = sections
            .iter()
            .map(|section| {
                let lines: Vec<String> = section.transcript().lines().map(str::to_string).collect();
                assert_eq!(lines.len(), LINES);
                let w: usize = lines[0]
                    .strip_prefix("writer ")
                    .and_then(|rest| rest.split(' ').next())
                    .and_then(|n| n.parse().ok())
                    .unwrap();
                for (l, line) in lines.iter().enumerate() {
                    assert_eq!(line, &format!("writer {w} line {l}"));
                }
                w
            })
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..WRITERS).collect::<Vec<_>>());
    }
}
