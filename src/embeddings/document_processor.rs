// Content extraction: uploaded bytes -> ordered text chunks + metadata

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::types::{AppError, AppResult, SourceType};

const DEFAULT_MIN_WORDS: usize = 100;
const DEFAULT_MAX_CHARS: usize = 3000;

#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub chunks: Vec<String>,
    pub metadata: Map<String, Value>,
}

impl Extraction {
    /// `metadata.title` when present and non-empty, otherwise the filename.
    pub fn title_or(&self, filename: &str) -> String {
        match self.metadata.get("title").and_then(Value::as_str) {
            Some(title) if !title.trim().is_empty() => title.to_string(),
            _ => filename.to_string(),
        }
    }
}

#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract(
        &self,
        payload: &[u8],
        filename: &str,
        source_type: SourceType,
    ) -> AppResult<Extraction>;
}

/// Treats every export as UTF-8 text and chunks it by paragraphs.
pub struct PlainTextExtractor {
    min_words: usize,
    max_chars: usize,
}

impl Default for PlainTextExtractor {
    fn default() -> Self {
        Self {
            min_words: DEFAULT_MIN_WORDS,
            max_chars: DEFAULT_MAX_CHARS,
        }
    }
}

impl PlainTextExtractor {
    pub fn new(min_words: usize, max_chars: usize) -> Self {
        Self {
            min_words: min_words.max(1),
            max_chars: max_chars.max(1),
        }
    }
}

#[async_trait]
impl ContentExtractor for PlainTextExtractor {
    async fn extract(
        &self,
        payload: &[u8],
        filename: &str,
        source_type: SourceType,
    ) -> AppResult<Extraction> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| AppError::Extraction(format!("{} is not valid UTF-8: {}", filename, e)))?;

        let chunks = chunk_by_paragraphs(text, self.min_words, self.max_chars);
        if chunks.is_empty() {
            return Err(AppError::Extraction(format!("{} has no text content", filename)));
        }

        let mut metadata = Map::new();
        metadata.insert("title".into(), Value::String(title_for(text, filename)));
        metadata.insert("original_path".into(), Value::String(filename.to_string()));
        metadata.insert("source_type".into(), Value::String(source_type.to_string()));
        metadata.insert("word_count".into(), Value::from(count_words(text)));

        Ok(Extraction { chunks, metadata })
    }
}

/// First markdown H1, else the filename without its extension.
fn title_for(text: &str, filename: &str) -> String {
    text.lines()
        .find_map(|line| line.strip_prefix("# "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| match filename.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem.to_string(),
            _ => filename.to_string(),
        })
}

/// Groups paragraphs until a chunk holds `min_words` words. A chunk is closed
/// early rather than grow past `max_chars`.
pub fn chunk_by_paragraphs(text: &str, min_words: usize, max_chars: usize) -> Vec<String> {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut words = 0;

    for paragraph in normalized.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        if !current.is_empty() && current.len() + paragraph.len() > max_chars {
            chunks.push(std::mem::take(&mut current));
            words = 0;
        }

        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
        words += count_words(paragraph);

        if words >= min_words {
            chunks.push(std::mem::take(&mut current));
            words = 0;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn count_words(text: &str) -> usize {
    text.split(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
        .filter(|w| !w.is_empty())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunking_groups_short_paragraphs() {
        let text = "one two\n\nthree four\r\n\r\nfive six\n\n\n\nseven";
        let chunks = chunk_by_paragraphs(text, 4, 3000);
        assert_eq!(chunks, vec!["one two\n\nthree four", "five six\n\nseven"]);
    }

    #[test]
    fn test_chunking_respects_max_chars() {
        let text = "aaaa aaaa\n\nbbbb bbbb\n\ncccc";
        let chunks = chunk_by_paragraphs(text, 100, 12);
        assert_eq!(chunks, vec!["aaaa aaaa", "bbbb bbbb", "cccc"]);
    }

    #[tokio::test]
    async fn test_extract_title_and_metadata() {
        let extractor = PlainTextExtractor::new(10, 3000);
        let extraction = extractor
            .extract(b"# Reading list\n\nBooks to read soon.", "list.md", SourceType::Obsidian)
            .await
            .unwrap();

        assert_eq!(extraction.title_or("list.md"), "Reading list");
        assert_eq!(extraction.metadata["source_type"], "obsidian");
        assert_eq!(extraction.chunks.len(), 1);
    }

    #[tokio::test]
    async fn test_extract_rejects_empty_and_binary() {
        let extractor = PlainTextExtractor::default();
        assert!(matches!(
            extractor.extract(b"  \n\n ", "blank.md", SourceType::Standard).await,
            Err(AppError::Extraction(_))
        ));
        assert!(matches!(
            extractor.extract(&[0xff, 0xfe, 0x00], "blob.bin", SourceType::Standard).await,
            Err(AppError::Extraction(_))
        ));
    }

    #[test]
    fn test_title_falls_back_to_filename_stem() {
        assert_eq!(title_for("no heading here", "journal.txt"), "journal");
        assert_eq!(title_for("", ".hidden"), ".hidden");

        let extraction = Extraction::default();
        assert_eq!(extraction.title_or("raw.md"), "raw.md");
    }
}
