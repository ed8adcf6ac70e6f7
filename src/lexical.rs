use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ParseError;
use crate::field::Field;
use crate::priority;
use crate::store::Record;
use crate::symbols::SymbolTable;
use crate::xml::{Cursor, Node, Tag};

const ENTRY: &[u8] = b"entry";
const DEFAULT_LANG: &str = "eng";

/// Which dictionary grammar an entry stream follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DictionaryKind {
    /// JMdict: entries carry `<sense>` blocks.
    Word,
    /// JMnedict: entries carry `<trans>` blocks.
    Name,
}

impl DictionaryKind {
    pub fn collection(self) -> &'static str {
        match self {
            Self::Word => "jmdict",
            Self::Name => "jmnedict",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LexicalEntry {
    pub key: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub orthography: Vec<OrthographyForm>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub readings: Vec<ReadingForm>,
    pub orthography_weight: i64,
    pub reading_weight: i64,
    #[serde(flatten)]
    pub body: EntryBody,
}

impl Record for LexicalEntry {
    fn key(&self) -> &str {
        &self.key
    }
}

/// Senses for word entries, translations for name entries. Never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryBody {
    Senses(Vec<Sense>),
    Translations(Vec<Translation>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrthographyForm {
    pub text: String,
    #[serde(default, skip_serializing_if = "Field::is_empty")]
    pub info: Field<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub priority: Vec<String>,
    pub weight: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadingForm {
    pub text: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub no_kanji: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub restrictions: Vec<String>,
    #[serde(default, skip_serializing_if = "Field::is_empty")]
    pub info: Field<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub priority: Vec<String>,
    pub weight: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sense {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub restrict_orthography: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub restrict_reading: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pos: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub misc: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dialects: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub xrefs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub antonyms: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub loan_sources: Vec<LoanSource>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub glosses: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanSource {
    pub lang: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub partial: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub wasei: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Translation {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub name_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub xrefs: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub translations: BTreeMap<String, Vec<String>>,
}

/// Streams [`LexicalEntry`] values out of a JMdict or JMnedict document.
///
/// The document's entity declarations are captured from its DOCTYPE and
/// turned into a [`SymbolTable`] when the first `<entry>` is reached; the
/// table is then shared read-only by every entry of the document.
pub struct EntryStream<R> {
    cursor: Cursor<R>,
    kind: DictionaryKind,
    declarations: Option<String>,
    symbols: Option<SymbolTable>,
    unresolved_symbols: usize,
    elements_seen: usize,
    finished: bool,
}

impl EntryStream<BufReader<File>> {
    pub fn open(path: &Path, kind: DictionaryKind) -> Result<Self, ParseError> {
        Ok(Self::with_cursor(Cursor::open(path)?, kind))
    }
}

impl<R: BufRead> EntryStream<R> {
    pub fn from_reader(input: R, document: &str, kind: DictionaryKind) -> Self {
        Self::with_cursor(Cursor::new(input, document.to_string()), kind)
    }

    fn with_cursor(cursor: Cursor<R>, kind: DictionaryKind) -> Self {
        Self {
            cursor,
            kind,
            declarations: None,
            symbols: None,
            unresolved_symbols: 0,
            elements_seen: 0,
            finished: false,
        }
    }

    /// The document's symbol table, once the first entry has been read.
    pub fn symbols(&self) -> Option<&SymbolTable> {
        self.symbols.as_ref()
    }

    pub fn unresolved_symbols(&self) -> usize {
        self.unresolved_symbols
    }

    pub fn elements_seen(&self) -> usize {
        self.elements_seen
    }

    fn read_next_entry(&mut self) -> Result<LexicalEntry, ParseError> {
        let document = self.cursor.document().to_string();
        let declarations = &mut self.declarations;
        let symbols = self.symbols.get_or_insert_with(|| {
            let table = SymbolTable::resolve(declarations.take().as_deref().unwrap_or_default());
            info!(document = %document, symbols = table.len(), "resolved entity declarations");
            table
        });

        let mut reader = EntryReader {
            symbols,
            kind: self.kind,
            unresolved: 0,
        };
        let result = reader.read(&mut self.cursor);
        self.unresolved_symbols += reader.unresolved;
        result
    }
}

impl<R: BufRead> Iterator for EntryStream<R> {
    type Item = Result<LexicalEntry, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            match self.cursor.next() {
                Ok(Node::DocType(text)) => self.declarations = Some(text),
                Ok(Node::Start(tag)) if tag.is(ENTRY) => {
                    self.elements_seen += 1;
                    let result = self.read_next_entry();
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

/// The block currently open inside an entry.
enum Block {
    None,
    Orthography(OrthographyForm),
    Reading(ReadingForm),
    Sense(Sense),
    Translation(Translation),
}

#[derive(Default)]
struct EntryDraft {
    key: Option<String>,
    orthography: Vec<OrthographyForm>,
    readings: Vec<ReadingForm>,
    senses: Vec<Sense>,
    translations: Vec<Translation>,
}

struct EntryReader<'s> {
    symbols: &'s SymbolTable,
    kind: DictionaryKind,
    unresolved: usize,
}

impl EntryReader<'_> {
    /// Reads the body of an entry whose start tag the cursor just returned.
    fn read<R: BufRead>(&mut self, cursor: &mut Cursor<R>) -> Result<LexicalEntry, ParseError> {
        let start = cursor.event_start();
        let mut draft = EntryDraft::default();
        let mut block = Block::None;

        loop {
            match cursor.next()? {
                Node::Start(tag) => match tag.name() {
                    b"k_ele" => block = Block::Orthography(OrthographyForm::default()),
                    b"r_ele" => block = Block::Reading(ReadingForm::default()),
                    b"sense" if self.kind == DictionaryKind::Word => block = Block::Sense(Sense::default()),
                    b"trans" if self.kind == DictionaryKind::Name => {
                        block = Block::Translation(Translation::default())
                    }
                    b"example" => {}
                    name => {
                        let raw = cursor.read_text(name)?;
                        self.apply(&mut draft, &mut block, &tag, &raw);
                    }
                },
                Node::Empty(tag) => self.apply(&mut draft, &mut block, &tag, ""),
                Node::End(name) => match name.as_slice() {
                    b"entry" => break,
                    b"k_ele" | b"r_ele" | b"sense" | b"trans" => {
                        close_block(&mut draft, std::mem::replace(&mut block, Block::None));
                    }
                    _ => {}
                },
                Node::Eof => return Err(cursor.truncated(ENTRY)),
                Node::Text(_) | Node::DocType(_) => {}
            }
        }

        self.finish(draft).map_err(|reason| ParseError::Structural {
            document: cursor.document().to_string(),
            element: "entry",
            position: start,
            reason,
        })
    }

    fn apply(&mut self, draft: &mut EntryDraft, block: &mut Block, tag: &Tag, raw: &str) {
        match (tag.name(), block) {
            (b"ent_seq", _) => draft.key = Some(self.text(raw)),

            (b"keb", Block::Orthography(form)) => form.text = self.text(raw),
            (b"ke_inf", Block::Orthography(form)) => form.info.push(self.tag(raw)),
            (b"ke_pri", Block::Orthography(form)) => form.priority.push(self.text(raw)),

            (b"reb", Block::Reading(form)) => form.text = self.text(raw),
            (b"re_nokanji", Block::Reading(form)) => form.no_kanji = true,
            (b"re_restr", Block::Reading(form)) => form.restrictions.push(self.text(raw)),
            (b"re_inf", Block::Reading(form)) => form.info.push(self.tag(raw)),
            (b"re_pri", Block::Reading(form)) => form.priority.push(self.text(raw)),

            (b"stagk", Block::Sense(sense)) => sense.restrict_orthography.push(self.text(raw)),
            (b"stagr", Block::Sense(sense)) => sense.restrict_reading.push(self.text(raw)),
            (b"pos", Block::Sense(sense)) => sense.pos.push(self.tag(raw)),
            (b"field", Block::Sense(sense)) => sense.fields.push(self.tag(raw)),
            (b"misc", Block::Sense(sense)) => sense.misc.push(self.tag(raw)),
            (b"dial", Block::Sense(sense)) => sense.dialects.push(self.tag(raw)),
            (b"xref", Block::Sense(sense)) => sense.xrefs.push(self.text(raw)),
            (b"ant", Block::Sense(sense)) => sense.antonyms.push(self.text(raw)),
            (b"s_inf", Block::Sense(sense)) => sense.notes.push(self.text(raw)),
            (b"ex_srce", Block::Sense(sense)) => sense.examples.push(self.text(raw)),
            (b"lsource", Block::Sense(sense)) => sense.loan_sources.push(LoanSource {
                lang: language(tag),
                text: self.text(raw),
                partial: tag.attr("ls_type") == Some("part"),
                wasei: tag.attr("ls_wasei") == Some("y"),
            }),
            (b"gloss", Block::Sense(sense)) => {
                let text = self.text(raw);
                sense.glosses.entry(language(tag)).or_default().push(text);
            }

            (b"name_type", Block::Translation(trans)) => trans.name_types.push(self.tag(raw)),
            (b"xref", Block::Translation(trans)) => trans.xrefs.push(self.text(raw)),
            (b"trans_det", Block::Translation(trans)) => {
                let text = self.text(raw);
                trans.translations.entry(language(tag)).or_default().push(text);
            }

            _ => {}
        }
    }

    fn finish(&self, draft: EntryDraft) -> Result<LexicalEntry, String> {
        let key = draft
            .key
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| "missing ent_seq".to_string())?;

        let orthography_weight = draft.orthography.iter().map(|form| form.weight).sum();
        let reading_weight = draft.readings.iter().map(|form| form.weight).sum();
        let body = match self.kind {
            DictionaryKind::Word => EntryBody::Senses(draft.senses),
            DictionaryKind::Name => EntryBody::Translations(draft.translations),
        };

        Ok(LexicalEntry {
            key,
            orthography: draft.orthography,
            readings: draft.readings,
            orthography_weight,
            reading_weight,
            body,
        })
    }

    fn text(&self, raw: &str) -> String {
        self.symbols.expand(raw)
    }

    /// Decodes a tag value to its entity code, keeping the declared text
    /// when no code matches.
    fn tag(&mut self, raw: &str) -> String {
        match self.symbols.decode_tag(raw) {
            Ok(code) => code,
            Err(miss) => {
                self.unresolved += 1;
                debug!(text = %miss.text, "keeping unresolved tag text");
                miss.text
            }
        }
    }
}

fn close_block(draft: &mut EntryDraft, block: Block) {
    match block {
        Block::None => {}
        Block::Orthography(mut form) => {
            form.weight = priority::score(&form.priority);
            draft.orthography.push(form);
        }
        Block::Reading(mut form) => {
            form.weight = priority::score(&form.priority);
            draft.readings.push(form);
        }
        Block::Sense(sense) => draft.senses.push(sense),
        Block::Translation(trans) => draft.translations.push(trans),
    }
}

fn language(tag: &Tag) -> String {
    tag.attr("xml:lang").unwrap_or(DEFAULT_LANG).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const JMDICT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE JMdict [
<!ELEMENT JMdict (entry*)>
<!ENTITY n "noun (common) (futsuumeishi)">
<!ENTITY iK "word containing irregular kanji usage">
<!ENTITY uk "word usually written using kana alone">
<!ENTITY comp "computing">
<!ENTITY ksb "Kansai-ben">
]>
<JMdict>
<entry>
<ent_seq>1000000</ent_seq>
<k_ele>
<keb>明白</keb>
<ke_inf>&iK;</ke_inf>
<ke_pri>news1</ke_pri>
</k_ele>
<r_ele>
<reb>めいはく</reb>
<re_nokanji/>
<re_restr>明白</re_restr>
</r_ele>
<sense>
<pos>&n;</pos>
<field>&comp;</field>
<misc>&uk;</misc>
<dial>&ksb;</dial>
<xref>明らか</xref>
<ant>曖昧</ant>
<lsource xml:lang="ger" ls_type="part" ls_wasei="y">Arbeit</lsource>
<s_inf>rare</s_inf>
<gloss>obvious</gloss>
<gloss xml:lang="dut">duidelijk</gloss>
<gloss>clear</gloss>
<example><ex_srce exsrc_type="tat">12345</ex_srce><ex_text>明白</ex_text></example>
</sense>
</entry>
</JMdict>"#;

    const JMNEDICT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE JMnedict [
<!ENTITY place "place name">
<!ENTITY surname "family or surname">
]>
<JMnedict>
<entry>
<ent_seq>5000000</ent_seq>
<k_ele><keb>ｕｌｆｉｔ</keb></k_ele>
<r_ele><reb>ウルフィット</reb></r_ele>
<trans>
<name_type>&surname;</name_type>
<name_type>&place;</name_type>
<trans_det>Ulfit</trans_det>
<trans_det xml:lang="ger">Ulfit (Ort)</trans_det>
</trans>
<sense><gloss>ignored</gloss></sense>
</entry>
</JMnedict>"#;

    fn parse(xml: &str, kind: DictionaryKind) -> Vec<Result<LexicalEntry, ParseError>> {
        EntryStream::from_reader(xml.as_bytes(), "inline.xml", kind).collect()
    }

    #[test]
    fn word_entry_weights_orthography_and_readings_separately() {
        let entry = parse(JMDICT, DictionaryKind::Word).remove(0).unwrap();

        assert_eq!(entry.key, "1000000");
        assert_eq!(entry.orthography_weight, 20);
        assert_eq!(entry.reading_weight, 0);
        assert_eq!(entry.orthography[0].priority, vec!["news1"]);
        assert_eq!(entry.orthography[0].weight, 20);
    }

    #[test]
    fn info_and_sense_tags_decode_to_entity_codes() {
        let entry = parse(JMDICT, DictionaryKind::Word).remove(0).unwrap();

        assert_eq!(entry.orthography[0].text, "明白");
        assert_eq!(entry.orthography[0].info, Field::One("iK".to_string()));

        let EntryBody::Senses(senses) = &entry.body else {
            panic!("word entries carry senses");
        };
        let sense = &senses[0];
        assert_eq!(sense.pos, vec!["n"]);
        assert_eq!(sense.fields, vec!["comp"]);
        assert_eq!(sense.misc, vec!["uk"]);
        assert_eq!(sense.dialects, vec!["ksb"]);
    }

    #[test]
    fn reading_and_sense_details_are_kept() {
        let entry = parse(JMDICT, DictionaryKind::Word).remove(0).unwrap();

        let reading = &entry.readings[0];
        assert_eq!(reading.text, "めいはく");
        assert!(reading.no_kanji);
        assert_eq!(reading.restrictions, vec!["明白"]);
        assert!(reading.info.is_empty());

        let EntryBody::Senses(senses) = &entry.body else {
            panic!("word entries carry senses");
        };
        let sense = &senses[0];
        assert_eq!(sense.glosses["eng"], vec!["obvious", "clear"]);
        assert_eq!(sense.glosses["dut"], vec!["duidelijk"]);
        assert_eq!(sense.xrefs, vec!["明らか"]);
        assert_eq!(sense.antonyms, vec!["曖昧"]);
        assert_eq!(sense.notes, vec!["rare"]);
        assert_eq!(sense.examples, vec!["12345"]);
        assert_eq!(
            sense.loan_sources,
            vec![LoanSource {
                lang: "ger".to_string(),
                text: "Arbeit".to_string(),
                partial: true,
                wasei: true,
            }]
        );
    }

    #[test]
    fn name_entries_carry_only_translations() {
        let mut stream = EntryStream::from_reader(JMNEDICT.as_bytes(), "inline.xml", DictionaryKind::Name);
        let entry = stream.next().unwrap().unwrap();
        assert!(stream.next().is_none());

        let EntryBody::Translations(translations) = &entry.body else {
            panic!("name entries carry translations");
        };
        assert_eq!(translations.len(), 1);
        assert_eq!(translations[0].name_types, vec!["surname", "place"]);
        assert_eq!(translations[0].translations["eng"], vec!["Ulfit"]);
        assert_eq!(translations[0].translations["ger"], vec!["Ulfit (Ort)"]);

        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("translations").is_some());
        assert!(json.get("senses").is_none());
        assert_eq!(stream.symbols().map(SymbolTable::len), Some(2));
    }

    #[test]
    fn unresolved_tags_keep_their_text() {
        let xml = r#"<!DOCTYPE JMdict [<!ENTITY n "noun">]>
<JMdict><entry><ent_seq>1</ent_seq>
<k_ele><keb>語</keb><ke_inf>not declared</ke_inf></k_ele>
<sense><pos>&n;</pos><pos>&vt;</pos></sense>
</entry></JMdict>"#;
        let mut stream = EntryStream::from_reader(xml.as_bytes(), "inline.xml", DictionaryKind::Word);
        let entry = stream.next().unwrap().unwrap();

        assert_eq!(entry.orthography[0].info, Field::One("not declared".to_string()));
        let EntryBody::Senses(senses) = &entry.body else {
            panic!("word entries carry senses");
        };
        assert_eq!(senses[0].pos, vec!["n", "&vt;"]);
        assert_eq!(stream.unresolved_symbols(), 2);
    }

    #[test]
    fn entry_without_sequence_is_skipped() {
        let xml = r#"<JMdict>
<entry><k_ele><keb>一</keb></k_ele></entry>
<entry><ent_seq>2</ent_seq><r_ele><reb>に</reb><re_pri>ichi1</re_pri><re_pri>nf01</re_pri></r_ele></entry>
</JMdict>"#;
        let mut stream = EntryStream::from_reader(xml.as_bytes(), "inline.xml", DictionaryKind::Word);
        let results: Vec<_> = stream.by_ref().collect();

        assert_eq!(results.len(), 2);
        assert_eq!(stream.elements_seen(), 2);
        assert!(matches!(&results[0], Err(err) if !err.is_fatal()));

        let entry = results[1].as_ref().unwrap();
        assert_eq!(entry.key, "2");
        assert_eq!(entry.reading_weight, 20 + 24);
        assert_eq!(entry.body, EntryBody::Senses(Vec::new()));
    }

    #[test]
    fn skipped_entry_reports_offset_of_its_start_tag() {
        let xml = "<JMdict><entry><ent_seq>1</ent_seq></entry><entry><k_ele><keb>二</keb></k_ele></entry></JMdict>";
        let results = parse(xml, DictionaryKind::Word);

        assert_eq!(results.len(), 2);
        let expected = xml.rfind("<entry>").unwrap() as u64;
        match &results[1] {
            Err(ParseError::Structural { element, position, .. }) => {
                assert_eq!(*element, "entry");
                assert_eq!(*position, expected);
            }
            other => panic!("expected structural error, got {other:?}"),
        }
    }

    #[test]
    fn entries_stream_in_document_order() {
        let xml = r#"<JMdict>
<entry><ent_seq>30</ent_seq></entry>
<entry><ent_seq>10</ent_seq></entry>
<entry><ent_seq>20</ent_seq></entry>
</JMdict>"#;
        let keys: Vec<String> = parse(xml, DictionaryKind::Word)
            .into_iter()
            .map(|result| result.unwrap().key)
            .collect();

        assert_eq!(keys, vec!["30", "10", "20"]);
    }
}
