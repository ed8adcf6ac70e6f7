use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};

use crate::error::ParseError;

const BUFFER_CAPACITY: usize = 8 * 1024;

/// An element header with its attributes decoded into owned strings.
#[derive(Debug, Clone)]
pub(crate) struct Tag {
    name: Vec<u8>,
    attributes: Vec<(String, String)>,
}

impl Tag {
    pub(crate) fn name(&self) -> &[u8] {
        &self.name
    }

    pub(crate) fn is(&self, name: &[u8]) -> bool {
        self.name == name
    }

    pub(crate) fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }
}

/// Owned view of one reader event. Nothing here borrows the cursor buffer,
/// so the buffer can be cleared as soon as the node is returned.
#[derive(Debug)]
pub(crate) enum Node {
    Start(Tag),
    Empty(Tag),
    End(Vec<u8>),
    Text(String),
    DocType(String),
    Eof,
}

/// Single-pass reader over a markup document.
pub(crate) struct Cursor<R> {
    reader: Reader<R>,
    buf: Vec<u8>,
    document: String,
    event_start: u64,
}

impl Cursor<BufReader<File>> {
    pub(crate) fn open(path: &Path) -> Result<Self, ParseError> {
        let file = File::open(path).map_err(|source| ParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(BufReader::new(file), path.display().to_string()))
    }
}

impl<R: BufRead> Cursor<R> {
    pub(crate) fn new(input: R, document: String) -> Self {
        let mut reader = Reader::from_reader(input);
        reader.config_mut().trim_text(true);

        Self {
            reader,
            buf: Vec::with_capacity(BUFFER_CAPACITY),
            document,
            event_start: 0,
        }
    }

    pub(crate) fn document(&self) -> &str {
        &self.document
    }

    pub(crate) fn position(&self) -> u64 {
        self.reader.buffer_position() as u64
    }

    /// Byte offset where reading of the most recently returned event began.
    /// Trimmed whitespace ahead of a tag is included.
    pub(crate) fn event_start(&self) -> u64 {
        self.event_start
    }

    pub(crate) fn next(&mut self) -> Result<Node, ParseError> {
        loop {
            self.buf.clear();
            let position = self.position();
            self.event_start = position;

            let event = self
                .reader
                .read_event_into(&mut self.buf)
                .map_err(|err| ParseError::Format {
                    document: self.document.clone(),
                    reason: format!("{err} near byte {position}"),
                })?;

            let node = match event {
                Event::Start(start) => Node::Start(owned_tag(&start, &self.document)?),
                Event::Empty(start) => Node::Empty(owned_tag(&start, &self.document)?),
                Event::End(end) => Node::End(end.name().as_ref().to_vec()),
                Event::Text(text) => Node::Text(utf8(&text, &self.document)?.to_string()),
                Event::CData(data) => Node::Text(escape(utf8(&data, &self.document)?).into_owned()),
                Event::DocType(doctype) => Node::DocType(utf8(&doctype, &self.document)?.to_string()),
                Event::Eof => Node::Eof,
                _ => continue,
            };

            return Ok(node);
        }
    }

    /// Collects the raw text of the element whose start tag was just read,
    /// consuming its end tag. Entity references are left unexpanded.
    pub(crate) fn read_text(&mut self, element: &[u8]) -> Result<String, ParseError> {
        let mut text = String::new();
        let mut depth = 0_usize;

        loop {
            match self.next()? {
                Node::Text(chunk) => text.push_str(&chunk),
                Node::Start(_) => depth += 1,
                Node::End(name) => {
                    if depth == 0 {
                        if name != element {
                            return Err(self.truncated(element));
                        }
                        return Ok(text);
                    }
                    depth -= 1;
                }
                Node::Eof => return Err(self.truncated(element)),
                Node::Empty(_) | Node::DocType(_) => {}
            }
        }
    }

    /// Drops the event buffer back to its initial size. Called between
    /// top-level elements so one oversized element cannot pin memory.
    pub(crate) fn release(&mut self) {
        self.buf.clear();
        self.buf.shrink_to(BUFFER_CAPACITY);
    }

    pub(crate) fn truncated(&self, element: &[u8]) -> ParseError {
        ParseError::Format {
            document: self.document.clone(),
            reason: format!(
                "unterminated <{}> near byte {}",
                String::from_utf8_lossy(element),
                self.position()
            ),
        }
    }
}

fn owned_tag(start: &BytesStart<'_>, document: &str) -> Result<Tag, ParseError> {
    let mut attributes = Vec::new();

    for attribute in start.attributes() {
        let attribute = attribute.map_err(|err| ParseError::Format {
            document: document.to_string(),
            reason: err.to_string(),
        })?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = match attribute.unescape_value() {
            Ok(value) => value.into_owned(),
            Err(_) => String::from_utf8_lossy(&attribute.value).into_owned(),
        };
        attributes.push((key, value));
    }

    Ok(Tag {
        name: start.name().as_ref().to_vec(),
        attributes,
    })
}

fn utf8<'a>(bytes: &'a [u8], document: &str) -> Result<&'a str, ParseError> {
    std::str::from_utf8(bytes).map_err(|err| ParseError::Format {
        document: document.to_string(),
        reason: err.to_string(),
    })
}

/// Parses an integer field, reporting the element name on failure.
pub(crate) fn parse_number<T: std::str::FromStr>(element: &str, raw: &str) -> Result<T, String> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| format!("<{element}> is not a number: {raw:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(xml: &str) -> Cursor<&[u8]> {
        Cursor::new(xml.as_bytes(), "inline".to_string())
    }

    #[test]
    fn read_text_keeps_entity_references_raw() {
        let mut cursor = cursor("<ke_inf>&iK;</ke_inf><next/>");

        let Node::Start(tag) = cursor.next().unwrap() else {
            panic!("expected start tag");
        };
        assert!(tag.is(b"ke_inf"));
        assert_eq!(cursor.read_text(tag.name()).unwrap(), "&iK;");
        assert!(matches!(cursor.next().unwrap(), Node::Empty(tag) if tag.is(b"next")));
    }

    #[test]
    fn event_start_marks_the_opening_bracket() {
        let xml = "<root><entry><a>x</a></entry></root>";
        let mut cursor = cursor(xml);

        cursor.next().unwrap();
        let Node::Start(tag) = cursor.next().unwrap() else {
            panic!("expected start tag");
        };
        assert!(tag.is(b"entry"));
        assert_eq!(cursor.event_start(), xml.find("<entry>").unwrap() as u64);

        cursor.next().unwrap();
        cursor.read_text(b"a").unwrap();
        assert!(cursor.position() > cursor.event_start());
    }

    #[test]
    fn attributes_are_decoded() {
        let mut cursor = cursor(r#"<gloss xml:lang="ger" g_type="lit">Arbeit</gloss>"#);

        let Node::Start(tag) = cursor.next().unwrap() else {
            panic!("expected start tag");
        };
        assert_eq!(tag.attr("xml:lang"), Some("ger"));
        assert_eq!(tag.attr("g_type"), Some("lit"));
        assert_eq!(tag.attr("missing"), None);
    }

    #[test]
    fn doctype_is_returned_verbatim() {
        let mut cursor = cursor("<?xml version=\"1.0\"?><!DOCTYPE JMdict [<!ENTITY n \"noun\">]><JMdict/>");

        let doctype = loop {
            match cursor.next().unwrap() {
                Node::DocType(text) => break text,
                Node::Eof => panic!("doctype missing"),
                _ => {}
            }
        };
        assert!(doctype.contains("<!ENTITY n \"noun\">"));
    }

    #[test]
    fn read_text_reports_truncated_element() {
        let mut cursor = cursor("<literal>亜");

        let Node::Start(tag) = cursor.next().unwrap() else {
            panic!("expected start tag");
        };
        let err = cursor.read_text(tag.name()).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn parse_number_names_the_element() {
        assert_eq!(parse_number::<u32>("grade", " 8 "), Ok(8));
        assert!(parse_number::<u32>("grade", "eight").unwrap_err().contains("<grade>"));
    }
}
