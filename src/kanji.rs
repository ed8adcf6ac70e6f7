use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::field::{Field, promote};
use crate::radicals::RadicalIndex;
use crate::store::Record;
use crate::xml::{Cursor, Node, Tag, parse_number};

pub const COLLECTION: &str = "kanji";

const CHARACTER: &[u8] = b"character";
const UNIVERSAL_CODEPOINT: &str = "ucs";
const MISCLASSIFICATION_SCHEME: &str = "skip_misclass";
const COMPOSITE_REFERENCE_SCHEME: &str = "moro";
const DEFAULT_MEANING_LANG: &str = "en";
const NANORI: &str = "nanori";

/// One normalized `<character>` element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterRecord {
    pub key: String,
    pub literal: String,
    pub codepoints: BTreeMap<String, String>,
    pub radicals: BTreeMap<String, u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub radical_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decomposition: Option<Vec<String>>,
    pub grade: u32,
    /// Set when the source carried a `<grade>` element, so an explicit 0 can
    /// be told apart from the default.
    #[serde(skip)]
    pub grade_declared: bool,
    pub stroke_counts: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freq: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jlpt: Option<u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variants: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dic_refs: BTreeMap<String, Field<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query_codes: BTreeMap<String, QueryCode>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub readings: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meanings: BTreeMap<String, Vec<String>>,
}

impl Record for CharacterRecord {
    fn key(&self) -> &str {
        &self.key
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryCode {
    Codes(Field<String>),
    Misclassified(Vec<SkipMisclassification>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipMisclassification {
    pub misclass: String,
    pub code: String,
}

/// Streams [`CharacterRecord`]s out of a KANJIDIC2 document in document
/// order.
///
/// A malformed `<character>` is yielded as a non-fatal
/// [`ParseError::Structural`] and the stream moves on. A fatal error is
/// yielded once and ends the stream.
pub struct CharacterStream<'a, R> {
    cursor: Cursor<R>,
    radicals: &'a RadicalIndex,
    elements_seen: usize,
    finished: bool,
}

impl<'a> CharacterStream<'a, BufReader<File>> {
    pub fn open(path: &Path, radicals: &'a RadicalIndex) -> Result<Self, ParseError> {
        Ok(Self::with_cursor(Cursor::open(path)?, radicals))
    }
}

impl<'a, R: BufRead> CharacterStream<'a, R> {
    pub fn from_reader(input: R, document: &str, radicals: &'a RadicalIndex) -> Self {
        Self::with_cursor(Cursor::new(input, document.to_string()), radicals)
    }

    fn with_cursor(cursor: Cursor<R>, radicals: &'a RadicalIndex) -> Self {
        Self {
            cursor,
            radicals,
            elements_seen: 0,
            finished: false,
        }
    }

    pub fn elements_seen(&self) -> usize {
        self.elements_seen
    }
}

impl<R: BufRead> Iterator for CharacterStream<'_, R> {
    type Item = Result<CharacterRecord, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            match self.cursor.next() {
                Ok(Node::Start(tag)) if tag.is(CHARACTER) => {
                    self.elements_seen += 1;
                    let start = self.cursor.event_start();
                    let result = read_character(&mut self.cursor, self.radicals, start);
                    self.cursor.release();
                    if matches!(&result, Err(err) if err.is_fatal()) {
                        self.finished = true;
                    }
                    return Some(result);
                }
                Ok(Node::Eof) => {
                    self.finished = true;
                    return None;
                }
                Ok(_) => {}
                Err(err) => {
                    self.finished = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

/// Accumulates one element. Value errors are remembered rather than
/// returned so the element is always read through to its end tag.
#[derive(Default)]
struct CharacterDraft {
    literal: Option<String>,
    codepoints: BTreeMap<String, String>,
    radicals: BTreeMap<String, u32>,
    radical_names: Vec<String>,
    grade: Option<u32>,
    stroke_counts: Vec<u32>,
    freq: Option<u32>,
    jlpt: Option<u32>,
    variants: BTreeMap<String, Vec<String>>,
    dic_refs: BTreeMap<String, Field<String>>,
    codes: BTreeMap<String, Field<String>>,
    misclassified: Vec<SkipMisclassification>,
    readings: BTreeMap<String, Vec<String>>,
    meanings: BTreeMap<String, Vec<String>>,
    problem: Option<String>,
}

impl CharacterDraft {
    fn reject(&mut self, reason: String) {
        self.problem.get_or_insert(reason);
    }

    fn number(&mut self, element: &str, raw: &str) -> Option<u32> {
        match parse_number(element, raw) {
            Ok(value) => Some(value),
            Err(reason) => {
                self.reject(reason);
                None
            }
        }
    }

    fn apply(&mut self, tag: &Tag, text: String) {
        match tag.name() {
            b"literal" => self.literal = Some(text),
            b"cp_value" => {
                let system = tag.attr("cp_type").unwrap_or_default();
                self.codepoints.insert(system.to_string(), text);
            }
            b"rad_value" => {
                let system = tag.attr("rad_type").unwrap_or_default().to_string();
                if let Some(value) = self.number("rad_value", &text) {
                    self.radicals.insert(system, value);
                }
            }
            b"rad_name" => self.radical_names.push(text),
            b"grade" => self.grade = self.number("grade", &text),
            b"stroke_count" => {
                if let Some(count) = self.number("stroke_count", &text) {
                    self.stroke_counts.push(count);
                }
            }
            b"freq" => self.freq = self.number("freq", &text),
            b"jlpt" => self.jlpt = self.number("jlpt", &text),
            b"variant" => {
                let kind = tag.attr("var_type").unwrap_or_default();
                self.variants.entry(kind.to_string()).or_default().push(text);
            }
            b"dic_ref" => {
                let scheme = tag.attr("dr_type").unwrap_or_default();
                let formatted = format_dictionary_reference(scheme, tag, text);
                promote(&mut self.dic_refs, scheme, formatted);
            }
            b"q_code" => {
                let scheme = tag.attr("qc_type").unwrap_or_default();
                match tag.attr("skip_misclass") {
                    Some(misclass) => self.misclassified.push(SkipMisclassification {
                        misclass: misclass.to_string(),
                        code: text,
                    }),
                    None => promote(&mut self.codes, scheme, text),
                }
            }
            b"reading" => {
                let kind = tag.attr("r_type").unwrap_or_default();
                self.readings.entry(kind.to_string()).or_default().push(text);
            }
            b"nanori" => self.readings.entry(NANORI.to_string()).or_default().push(text),
            b"meaning" => {
                let lang = tag.attr("m_lang").unwrap_or(DEFAULT_MEANING_LANG);
                self.meanings.entry(lang.to_string()).or_default().push(text);
            }
            _ => {}
        }
    }

    fn finish(self, radicals: &RadicalIndex) -> Result<CharacterRecord, String> {
        if let Some(problem) = self.problem {
            return Err(problem);
        }

        let key = self
            .codepoints
            .get(UNIVERSAL_CODEPOINT)
            .cloned()
            .ok_or_else(|| "missing ucs codepoint".to_string())?;
        if self.stroke_counts.is_empty() {
            return Err("missing stroke_count".to_string());
        }

        let literal = self.literal.unwrap_or_default();
        let decomposition = radicals.get(&literal).map(<[String]>::to_vec);

        let mut query_codes: BTreeMap<String, QueryCode> = self
            .codes
            .into_iter()
            .map(|(scheme, codes)| (scheme, QueryCode::Codes(codes)))
            .collect();
        if !self.misclassified.is_empty() {
            query_codes.insert(
                MISCLASSIFICATION_SCHEME.to_string(),
                QueryCode::Misclassified(self.misclassified),
            );
        }

        Ok(CharacterRecord {
            key,
            literal,
            codepoints: self.codepoints,
            radicals: self.radicals,
            radical_names: self.radical_names,
            decomposition,
            grade: self.grade.unwrap_or(0),
            grade_declared: self.grade.is_some(),
            stroke_counts: self.stroke_counts,
            freq: self.freq,
            jlpt: self.jlpt,
            variants: self.variants,
            dic_refs: self.dic_refs,
            query_codes,
            readings: self.readings,
            meanings: self.meanings,
        })
    }
}

fn read_character<R: BufRead>(
    cursor: &mut Cursor<R>,
    radicals: &RadicalIndex,
    start: u64,
) -> Result<CharacterRecord, ParseError> {
    let mut draft = CharacterDraft::default();

    loop {
        match cursor.next()? {
            Node::Start(tag) => {
                if is_leaf(tag.name()) {
                    let raw = cursor.read_text(tag.name())?;
                    draft.apply(&tag, plain_text(&raw));
                }
            }
            Node::Empty(tag) => {
                if is_leaf(tag.name()) {
                    draft.apply(&tag, String::new());
                }
            }
            Node::End(name) if name == CHARACTER => break,
            Node::Eof => return Err(cursor.truncated(CHARACTER)),
            Node::End(_) | Node::Text(_) | Node::DocType(_) => {}
        }
    }

    draft.finish(radicals).map_err(|reason| ParseError::Structural {
        document: cursor.document().to_string(),
        element: "character",
        position: start,
        reason,
    })
}

fn is_leaf(name: &[u8]) -> bool {
    matches!(
        name,
        b"literal"
            | b"cp_value"
            | b"rad_value"
            | b"rad_name"
            | b"grade"
            | b"stroke_count"
            | b"freq"
            | b"jlpt"
            | b"variant"
            | b"dic_ref"
            | b"q_code"
            | b"reading"
            | b"nanori"
            | b"meaning"
    )
}

fn plain_text(raw: &str) -> String {
    match quick_xml::escape::unescape(raw) {
        Ok(text) => text.into_owned(),
        Err(_) => raw.to_string(),
    }
}

/// `moro` references combine volume, page and index into `vol.page.index`.
/// Every other scheme keeps the source text.
fn format_dictionary_reference(scheme: &str, tag: &Tag, text: String) -> String {
    if scheme != COMPOSITE_REFERENCE_SCHEME {
        return text;
    }

    match (tag.attr("m_vol"), tag.attr("m_page")) {
        (Some(volume), Some(page)) => format!("{volume}.{page}.{text}"),
        _ => text,
    }
}
