use std::collections::HashMap;

use quick_xml::escape::{resolve_predefined_entity, unescape_with};

use crate::error::UnresolvedSymbol;

const ENTITY_OPEN: &str = "<!ENTITY";

/// Entity declarations local to one document.
///
/// `forward` maps the declared code to its expansion and `reverse` maps the
/// expansion back to the code. When two codes share an expansion the one
/// declared last owns the reverse slot.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    forward: HashMap<String, String>,
    reverse: HashMap<String, String>,
}

impl SymbolTable {
    /// Builds the table from a DOCTYPE internal subset.
    pub fn resolve(declarations: &str) -> Self {
        let mut table = Self::default();
        let mut rest = declarations;

        while let Some(start) = rest.find(ENTITY_OPEN) {
            rest = &rest[start + ENTITY_OPEN.len()..];
            if let Some((code, text, tail)) = parse_declaration(rest) {
                table.declare(code, text);
                rest = tail;
            }
        }

        table
    }

    fn declare(&mut self, code: &str, text: &str) {
        self.forward.insert(code.to_string(), text.to_string());
        self.reverse.insert(text.to_string(), code.to_string());
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub fn lookup(&self, code: &str) -> Option<&str> {
        self.forward.get(code).map(String::as_str)
    }

    pub fn code_for(&self, text: &str) -> Option<&str> {
        self.reverse.get(text).map(String::as_str)
    }

    /// Replaces entity references with their declared text. Unknown
    /// references leave the input untouched.
    pub fn expand(&self, raw: &str) -> String {
        match unescape_with(raw, |name| self.entity(name)) {
            Ok(text) => text.into_owned(),
            Err(_) => raw.to_string(),
        }
    }

    /// Maps a tag value to its declared code.
    ///
    /// The error carries the text the caller should keep instead: the
    /// expansion when expansion worked, the raw input otherwise.
    pub fn decode_tag(&self, raw: &str) -> Result<String, UnresolvedSymbol> {
        let expanded = unescape_with(raw, |name| self.entity(name)).map_err(|_| UnresolvedSymbol {
            text: raw.to_string(),
        })?;

        match self.code_for(&expanded) {
            Some(code) => Ok(code.to_string()),
            None => Err(UnresolvedSymbol {
                text: expanded.into_owned(),
            }),
        }
    }

    fn entity(&self, name: &str) -> Option<&str> {
        self.lookup(name).or_else(|| resolve_predefined_entity(name))
    }
}

/// Splits `name "text">` off the front of `input`. Parameter entities and
/// unquoted values are rejected.
fn parse_declaration(input: &str) -> Option<(&str, &str, &str)> {
    let input = input.trim_start();
    if input.starts_with('%') {
        return None;
    }

    let name_end = input.find(char::is_whitespace)?;
    let (code, rest) = input.split_at(name_end);
    let rest = rest.trim_start();

    let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let rest = &rest[quote.len_utf8()..];
    let text_end = rest.find(quote)?;
    let text = &rest[..text_end];
    let tail = &rest[text_end + quote.len_utf8()..];

    Some((code, text, tail))
}
