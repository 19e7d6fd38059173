use crate::error::IngestError;
use crate::models::{Chunk, Document, MetadataValue, SECTION_KEY};
use regex::Regex;
use std::collections::VecDeque;
use tracing::warn;

/// Separator priority for length-based splitting. The empty separator splits into characters.
pub const DEFAULT_SEPARATORS: [&str; 9] = ["\n\n", "\n", "。", "！", "？", "；", ". ", " ", ""];

/// Section keywords of academic papers, English and Chinese, optionally numbered.
pub const PAPER_SECTION_PATTERNS: [&str; 2] = [
    r"(?i)^\s*(?:\d+(?:\.\d+)*\.?\s*)?(?:abstract|introduction|background|related\s+work|methods?|methodology|experiments?|evaluation|results|discussion|conclusions?|references|acknowledge?ments)\s*(?:[:：].*)?$",
    r"^\s*(?:\d+(?:\.\d+)*\.?\s*)?(?:摘要|引言|绪论|背景|相关工作|方法|实验|结果|讨论|结论|参考文献|致谢)\s*(?:[:：].*)?$",
];

/// Chapter and numbered heading forms found in textbooks.
pub const CHAPTER_HEADING_PATTERNS: [&str; 4] = [
    r"^\s*第[0-9零一二三四五六七八九十百]+[章节篇]",
    r"(?i)^\s*chapter\s*\d+",
    r"^\s*\d+(?:\.\d+)+\s*\S",
    r"^\s*\d+\s+\S",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SplitStrategy {
    #[default]
    Recursive,
    /// Paper-style sections (abstract, introduction, ...).
    Section,
    /// Chapter and numbered headings.
    Chapter,
}

#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    pub strategy: SplitStrategy,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Lines longer than this are never treated as headings.
    pub max_heading_chars: usize,
    /// Overrides the built-in heading patterns of the heading strategies.
    pub heading_patterns: Option<Vec<String>>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: SplitStrategy::Recursive,
            chunk_size: 500,
            chunk_overlap: 50,
            max_heading_chars: 30,
            heading_patterns: None,
        }
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn push_trimmed(target: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        target.push(trimmed.to_string());
    }
}

/// Length-bounded splitter that walks a separator hierarchy and merges small pieces
/// back together with a trailing overlap.
#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl RecursiveSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, IngestError> {
        if chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "chunk_overlap {chunk_overlap} must be smaller than chunk_size {chunk_size}"
            )));
        }

        Ok(Self {
            chunk_size,
            chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_with(text, &self.separators)
    }

    fn split_with(&self, text: &str, separators: &[String]) -> Vec<String> {
        let position = separators
            .iter()
            .position(|separator| separator.is_empty() || text.contains(separator.as_str()));
        let (separator, rest) = match position {
            Some(index) => (separators[index].as_str(), &separators[index + 1..]),
            None => ("", &separators[separators.len()..]),
        };

        let pieces: Vec<&str> = if separator.is_empty() {
            text.char_indices()
                .map(|(offset, ch)| &text[offset..offset + ch.len_utf8()])
                .collect()
        } else {
            text.split_inclusive(separator).collect()
        };

        let mut chunks = Vec::new();
        let mut fitting: Vec<&str> = Vec::new();

        for piece in pieces {
            if char_len(piece) <= self.chunk_size {
                fitting.push(piece);
                continue;
            }

            if !fitting.is_empty() {
                chunks.extend(self.merge(&fitting));
                fitting.clear();
            }

            if rest.is_empty() {
                push_trimmed(&mut chunks, piece);
            } else {
                chunks.extend(self.split_with(piece, rest));
            }
        }

        if !fitting.is_empty() {
            chunks.extend(self.merge(&fitting));
        }

        chunks
    }

    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut window: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);

            if total + len > self.chunk_size && !window.is_empty() {
                push_trimmed(&mut chunks, &join_window(&window));

                // keep at most `chunk_overlap` trailing chars, and room for the next piece
                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match window.pop_front() {
                        Some((_, dropped)) => total -= dropped,
                        None => break,
                    }
                }
            }

            window.push_back((piece, len));
            total += len;
        }

        if !window.is_empty() {
            push_trimmed(&mut chunks, &join_window(&window));
        }

        chunks
    }
}

fn join_window(window: &VecDeque<(&str, usize)>) -> String {
    window.iter().map(|(piece, _)| *piece).collect()
}

/// Segments text at heading lines, then hands oversized segments to a [`RecursiveSplitter`].
#[derive(Debug, Clone)]
pub struct HeadingSplitter {
    patterns: Vec<Regex>,
    max_heading_chars: usize,
    fallback: RecursiveSplitter,
}

impl HeadingSplitter {
    /// Patterns that fail to compile are skipped; with none left the text is one segment.
    pub fn new<S: AsRef<str>>(
        patterns: &[S],
        max_heading_chars: usize,
        fallback: RecursiveSplitter,
    ) -> Self {
        let patterns = patterns
            .iter()
            .map(|pattern| pattern.as_ref())
            .filter_map(|pattern: &str| match Regex::new(pattern) {
                Ok(compiled) => Some(compiled),
                Err(error) => {
                    warn!(pattern, %error, "skipping invalid heading pattern");
                    None
                }
            })
            .collect();

        Self {
            patterns,
            max_heading_chars,
            fallback,
        }
    }

    fn is_heading(&self, line: &str) -> bool {
        char_len(line) <= self.max_heading_chars
            && self.patterns.iter().any(|pattern| pattern.is_match(line))
    }

    /// Heading-delimited regions, blank regions dropped.
    pub fn segments(&self, text: &str) -> Vec<String> {
        let mut segments = Vec::new();
        let mut current: Vec<&str> = Vec::new();

        for line in text.lines() {
            if self.is_heading(line) && !current.is_empty() {
                push_trimmed(&mut segments, &current.join("\n"));
                current.clear();
            }
            current.push(line);
        }

        if !current.is_empty() {
            push_trimmed(&mut segments, &current.join("\n"));
        }

        if segments.is_empty() && !text.trim().is_empty() {
            segments.push(text.trim().to_string());
        }

        segments
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        for segment in self.segments(text) {
            if char_len(&segment) > self.fallback.chunk_size() {
                chunks.extend(self.fallback.split(&segment));
            } else {
                chunks.push(segment);
            }
        }
        chunks
    }
}

/// Splitting strategy selected from [`ChunkingConfig::strategy`].
#[derive(Debug, Clone)]
pub enum TextSplitter {
    Recursive(RecursiveSplitter),
    Section(HeadingSplitter),
    Chapter(HeadingSplitter),
}

impl TextSplitter {
    pub fn from_config(config: &ChunkingConfig) -> Result<Self, IngestError> {
        let recursive = RecursiveSplitter::new(config.chunk_size, config.chunk_overlap)?;

        let heading = |defaults: &[&str]| match &config.heading_patterns {
            Some(custom) => HeadingSplitter::new(
                custom.as_slice(),
                config.max_heading_chars,
                recursive.clone(),
            ),
            None => HeadingSplitter::new(defaults, config.max_heading_chars, recursive.clone()),
        };

        Ok(match config.strategy {
            SplitStrategy::Recursive => TextSplitter::Recursive(recursive.clone()),
            SplitStrategy::Section => TextSplitter::Section(heading(&PAPER_SECTION_PATTERNS[..])),
            SplitStrategy::Chapter => TextSplitter::Chapter(heading(&CHAPTER_HEADING_PATTERNS[..])),
        })
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        match self {
            TextSplitter::Recursive(splitter) => splitter.split(text),
            TextSplitter::Section(splitter) | TextSplitter::Chapter(splitter) => {
                splitter.split(text)
            }
        }
    }

    /// Splits each document and stamps `section` ordinals starting at 1 per document.
    pub fn split_documents(&self, documents: &[Document]) -> Vec<Chunk> {
        let mut chunks = Vec::new();

        for document in documents {
            for (position, content) in self.split(&document.content).into_iter().enumerate() {
                let mut metadata = document.metadata.clone();
                metadata.insert(
                    SECTION_KEY.to_string(),
                    MetadataValue::Integer(position as i64 + 1),
                );
                chunks.push(Chunk { content, metadata });
            }
        }

        chunks
    }
}
