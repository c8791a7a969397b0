//! Splits textbook text into chunks for embedding and retrieval.
//!
//! Lines are cleaned one at a time, then greedily binned until the running word
//! count reaches the threshold. The threshold triggers a flush after a line is
//! added; it never splits inside a line, and the trailing partial bin is kept.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

/// Word count that triggers a flush of the current buffer.
pub const DEFAULT_MAX_WORDS: usize = 180;

/// Case-insensitive substrings that mark a source line as junk (print
/// footers, page-break rules).
pub const DEFAULT_JUNK_MARKERS: &[&str] = &["reprint", "print", "===="];

/// A chunk of textbook text with coarse topical labels.
///
/// Position in the persisted metadata array is the only link to its vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub class: String,
    pub subject: String,
    pub chapter: String,
    /// `Part {n}`, numbered from 1 in flush order.
    pub topic: String,
    pub text: String,
}

impl Chunk {
    /// The view handed to prompt-building consumers.
    pub fn passage(&self) -> Passage<'_> {
        Passage {
            subject: &self.subject,
            chapter: &self.chapter,
            topic: &self.topic,
            text: &self.text,
        }
    }

    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// Borrowed `{ subject, chapter, topic, text }` view of a [Chunk].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Passage<'a> {
    pub subject: &'a str,
    pub chapter: &'a str,
    pub topic: &'a str,
    pub text: &'a str,
}

/// Labels stamped on every chunk of one corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkLabels {
    pub class: String,
    pub subject: String,
    /// Initial chapter label; replaced by detected headings when enabled.
    pub chapter: String,
}

impl Default for ChunkLabels {
    fn default() -> Self {
        Self {
            class: "10".to_string(),
            subject: "maths".to_string(),
            chapter: "Class 10 Maths".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChunkerOptions {
    pub max_words: usize,
    /// Stored lowercase; see [ChunkerOptions::with_junk_markers].
    junk_markers: Vec<String>,
    pub labels: ChunkLabels,
    /// Track `CHAPTER n: TITLE` lines and use them as the chapter label.
    pub detect_chapters: bool,
}

impl Default for ChunkerOptions {
    fn default() -> Self {
        Self {
            max_words: DEFAULT_MAX_WORDS,
            junk_markers: DEFAULT_JUNK_MARKERS.iter().map(|m| m.to_string()).collect(),
            labels: ChunkLabels::default(),
            detect_chapters: false,
        }
    }
}

impl ChunkerOptions {
    /// Replace the junk marker list. Markers are matched case-insensitively.
    pub fn with_junk_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.junk_markers = markers
            .into_iter()
            .map(|m| m.as_ref().to_lowercase())
            .filter(|m| !m.is_empty())
            .collect();
        self
    }

    pub fn junk_markers(&self) -> &[String] {
        &self.junk_markers
    }
}

/// Returns the line unchanged if it is kept, `None` if it should be discarded.
/// Blank lines and lines containing any junk marker (case-insensitive) are discarded.
/// `junk_markers` must already be lowercase.
pub fn clean_line<'a>(line: &'a str, junk_markers: &[String]) -> Option<&'a str> {
    if line.trim().is_empty() {
        return None;
    }
    let low = line.to_lowercase();
    if junk_markers.iter().any(|m| low.contains(m.as_str())) {
        return None;
    }
    Some(line)
}

/// Chunk raw source text. Empty input yields no chunks.
pub fn build_chunks(source: &str, opts: &ChunkerOptions) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut buffer: Vec<&str> = Vec::new();
    let mut words = 0usize;
    let mut part = 1usize;
    let mut chapter = opts.labels.chapter.clone();
    // Chapter in effect when the current buffer received its first line.
    let mut buffer_chapter = chapter.clone();

    for raw in source.lines() {
        let Some(line) = clean_line(raw.trim(), &opts.junk_markers) else {
            continue;
        };
        if opts.detect_chapters {
            if let Some(heading) = chapter_heading(line) {
                chapter = heading.to_string();
            }
        }
        if buffer.is_empty() {
            buffer_chapter.clone_from(&chapter);
        }
        buffer.push(line);
        words += line.split_whitespace().count();

        if words >= opts.max_words {
            chunks.push(make_chunk(&opts.labels, &buffer_chapter, part, &buffer));
            buffer.clear();
            words = 0;
            part += 1;
        }
    }
    if !buffer.is_empty() {
        chunks.push(make_chunk(&opts.labels, &buffer_chapter, part, &buffer));
    }
    chunks
}

fn make_chunk(labels: &ChunkLabels, chapter: &str, part: usize, lines: &[&str]) -> Chunk {
    Chunk {
        class: labels.class.clone(),
        subject: labels.subject.clone(),
        chapter: chapter.to_string(),
        topic: format!("Part {part}"),
        text: lines.join(" "),
    }
}

/// Recognises `CHAPTER <n>: <title>` / `Chapter <n> <title>` headings.
/// Returns the whole heading line as the label.
fn chapter_heading(line: &str) -> Option<&str> {
    let head = line.get(..7)?;
    if !head.eq_ignore_ascii_case("chapter") {
        return None;
    }
    let rest = &line[7..];
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let rest = rest.trim_start();
    let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    match rest[digits..].chars().next() {
        None | Some(':') => Some(line),
        Some(c) if c.is_whitespace() => Some(line),
        _ => None,
    }
}

/// Reads a source file, dropping bytes that are not valid UTF-8.
pub fn read_source(path: &Path) -> Result<String, SourceError> {
    let bytes = std::fs::read(path).map_err(|e| SourceError::Read(path.to_path_buf(), e))?;
    Ok(bytes.utf8_chunks().map(|chunk| chunk.valid()).collect())
}

/// Read and chunk a source file.
pub fn chunk_file(path: &Path, opts: &ChunkerOptions) -> Result<Vec<Chunk>, SourceError> {
    let text = read_source(path)?;
    let chunks = build_chunks(&text, opts);
    info!(path = %path.display(), chunks = chunks.len(), "chunked source");
    Ok(chunks)
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("read error for {0}: {1}")]
    Read(PathBuf, std::io::Error),
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn words(n: usize, tag: &str) -> String {
        (0..n).map(|i| format!("{tag}{i}")).collect::<Vec<_>>().join(" ")
    }

    fn opts(max_words: usize) -> ChunkerOptions {
        ChunkerOptions {
            max_words,
            ..ChunkerOptions::default()
        }
    }

    #[test]
    fn clean_line_rejects_markers_case_insensitive() {
        let m = ChunkerOptions::default().junk_markers().to_vec();
        assert_eq!(clean_line("Reprint 2024-25", &m), None);
        assert_eq!(clean_line("NOT FOR PRINTING", &m), None);
        assert_eq!(clean_line("======== page 3", &m), None);
        assert_eq!(clean_line("   ", &m), None);
        assert_eq!(clean_line("Euclid's division lemma", &m), Some("Euclid's division lemma"));
    }

    #[test]
    fn clean_line_keeps_short_rules() {
        let m = ChunkerOptions::default().junk_markers().to_vec();
        assert_eq!(clean_line("a === b", &m), Some("a === b"));
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(build_chunks("", &ChunkerOptions::default()).is_empty());
        assert!(build_chunks("\n\n  \n", &ChunkerOptions::default()).is_empty());
    }

    #[test]
    fn short_input_becomes_one_partial_chunk() {
        let c = build_chunks("first line\nsecond line", &ChunkerOptions::default());
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].text, "first line second line");
        assert_eq!(c[0].topic, "Part 1");
        assert_eq!(c[0].class, "10");
        assert_eq!(c[0].subject, "maths");
        assert_eq!(c[0].chapter, "Class 10 Maths");
    }

    #[test]
    fn flushes_when_threshold_reached() {
        let src = format!("{}\n{}\n{}", words(3, "a"), words(2, "b"), words(4, "c"));
        let c = build_chunks(&src, &opts(5));
        assert_eq!(c.len(), 2);
        assert_eq!(c[0].word_count(), 5);
        assert_eq!(c[1].word_count(), 4);
        assert_eq!(c[0].topic, "Part 1");
        assert_eq!(c[1].topic, "Part 2");
    }

    #[test]
    fn long_single_line_is_not_split() {
        let c = build_chunks(&words(500, "w"), &ChunkerOptions::default());
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].word_count(), 500);
    }

    #[test]
    fn junk_lines_are_dropped() {
        let src = "keep one\nReprint 2024-25\n====\nkeep two";
        let c = build_chunks(src, &ChunkerOptions::default());
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].text, "keep one keep two");
    }

    #[test]
    fn every_chunk_but_last_meets_threshold() {
        let src: String = (0..60)
            .map(|i| words(1 + (i * 7) % 23, &format!("l{i}_")))
            .collect::<Vec<_>>()
            .join("\n");
        let c = build_chunks(&src, &ChunkerOptions::default());
        assert!(c.len() > 2);
        for chunk in &c[..c.len() - 1] {
            assert!(chunk.word_count() >= DEFAULT_MAX_WORDS);
        }
    }

    #[test]
    fn kept_lines_survive_exactly_once_in_order() {
        let lines: Vec<String> = (0..40).map(|i| words(11, &format!("x{i}_"))).collect();
        let mut src = String::new();
        for (i, l) in lines.iter().enumerate() {
            src.push_str(l);
            src.push('\n');
            if i % 9 == 0 {
                src.push_str("Reprint 2024-25\n\n");
            }
        }
        let c = build_chunks(&src, &opts(50));
        let joined = c.iter().map(|ch| ch.text.as_str()).collect::<Vec<_>>().join(" ");
        assert_eq!(joined, lines.join(" "));
    }

    #[test]
    fn lines_are_trimmed() {
        let c = build_chunks("   padded   \r\n\tnext\r\n", &ChunkerOptions::default());
        assert_eq!(c[0].text, "padded next");
    }

    #[test]
    fn chapter_headings_relabel_following_chunks() {
        let mut o = opts(6);
        o.detect_chapters = true;
        let src = "CHAPTER 1: REAL NUMBERS\none two three four\nChapter 2 Polynomials\nfive six seven";
        let c = build_chunks(src, &o);
        assert_eq!(c.len(), 2);
        assert_eq!(c[0].chapter, "CHAPTER 1: REAL NUMBERS");
        assert!(c[0].text.starts_with("CHAPTER 1"));
        assert_eq!(c[1].chapter, "Chapter 2 Polynomials");
    }

    #[test]
    fn chapter_detection_off_by_default() {
        let c = build_chunks("CHAPTER 1: REAL NUMBERS\nbody", &ChunkerOptions::default());
        assert_eq!(c[0].chapter, "Class 10 Maths");
    }

    #[test]
    fn chapter_heading_shapes() {
        assert_eq!(chapter_heading("CHAPTER 12"), Some("CHAPTER 12"));
        assert_eq!(chapter_heading("chapter 3:Triangles"), Some("chapter 3:Triangles"));
        assert_eq!(chapter_heading("Chapters 1 to 4"), None);
        assert_eq!(chapter_heading("Chapter one"), None);
        assert_eq!(chapter_heading("Chapter 1a"), None);
        assert_eq!(chapter_heading("Ch"), None);
    }

    #[test]
    fn custom_junk_markers_replace_defaults() {
        let o = ChunkerOptions::default().with_junk_markers(["EXERCISE"]);
        let c = build_chunks("Exercise 1.1\nprint this", &o);
        assert_eq!(c[0].text, "print this");
    }

    #[test]
    fn read_source_drops_invalid_bytes() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("maths.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"HCF of 24\xff and 36\n").unwrap();
        drop(f);
        assert_eq!(read_source(&path).unwrap(), "HCF of 24 and 36\n");
        let c = chunk_file(&path, &ChunkerOptions::default()).unwrap();
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn read_source_keeps_encoded_replacement_character() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("maths.txt");
        std::fs::write(&path, b"x \xef\xbf\xbd y\xc3 z\n").unwrap();
        assert_eq!(read_source(&path).unwrap(), "x \u{fffd} y z\n");
    }

    #[test]
    fn read_source_missing_file_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = read_source(&dir.path().join("nope.txt")).unwrap_err();
        assert!(matches!(err, SourceError::Read(..)));
    }
}
