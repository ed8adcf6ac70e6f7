use std::collections::HashMap;
use std::fs;
use std::path::Path;

use encoding_rs::Encoding;
use tracing::{debug, info};

use crate::error::ParseError;

pub const DEFAULT_ENCODING: &str = "euc-jp";

/// Kanji glyph to its ordered component radicals, built from KRADFILE-style
/// tables.
#[derive(Debug, Clone, Default)]
pub struct RadicalIndex {
    entries: HashMap<String, Vec<String>>,
}

impl RadicalIndex {
    pub fn load(path: &Path, encoding: &str) -> Result<Self, ParseError> {
        let mut index = Self::default();
        index.load_into(path, encoding)?;
        Ok(index)
    }

    /// Adds a second table to the index. Glyphs already present are replaced.
    pub fn load_into(&mut self, path: &Path, encoding: &str) -> Result<usize, ParseError> {
        let document = path.display().to_string();
        let codec = Encoding::for_label(encoding.as_bytes()).ok_or_else(|| ParseError::Format {
            document: document.clone(),
            reason: format!("unknown encoding label {encoding:?}"),
        })?;

        let raw = fs::read(path).map_err(|source| ParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let text = codec
            .decode_without_bom_handling_and_without_replacement(&raw)
            .ok_or_else(|| ParseError::Format {
                document: document.clone(),
                reason: format!("input is not valid {}", codec.name()),
            })?;

        let parsed = self.parse_table(&text);
        info!(path = %document, kanji = parsed, "parsed radical table");

        Ok(parsed)
    }

    /// Parses already decoded table text, returning the number of lines
    /// accepted.
    pub fn parse_table(&mut self, text: &str) -> usize {
        let mut parsed = 0;

        for line in text.lines() {
            if line.is_empty() || line.starts_with('#') || line.starts_with(' ') {
                continue;
            }

            let Some((glyph, radicals)) = line.split_once(':') else {
                debug!(line = %line, "skipping radical line without separator");
                continue;
            };

            let glyph = glyph.trim();
            if glyph.is_empty() {
                continue;
            }

            let radicals = radicals.split_whitespace().map(ToOwned::to_owned).collect();
            self.entries.insert(glyph.to_string(), radicals);
            parsed += 1;
        }

        parsed
    }

    pub fn get(&self, glyph: &str) -> Option<&[String]> {
        self.entries.get(glyph).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
