#![forbid(unsafe_code)]

//! XML output for building signature templates, backed by quick-xml.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use sigill_core::Error;

/// A small element-oriented XML writer.
pub struct XmlWriter {
    writer: Writer<Vec<u8>>,
}

fn write_err(e: impl std::fmt::Display) -> Error {
    Error::Other(format!("XML write failed: {e}"))
}

impl XmlWriter {
    pub fn new() -> Self {
        Self {
            writer: Writer::new(Vec::new()),
        }
    }

    /// Write `<?xml version="1.0" encoding="UTF-8"?>`.
    pub fn write_declaration(&mut self) -> Result<(), Error> {
        self.writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(write_err)
    }

    /// Start an element with the given qualified name and attributes.
    pub fn start_element(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), Error> {
        let mut start = BytesStart::new(name);
        for attr in attrs {
            start.push_attribute(*attr);
        }
        self.writer
            .write_event(Event::Start(start))
            .map_err(write_err)
    }

    /// Write a self-closing element.
    pub fn empty_element(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), Error> {
        let mut start = BytesStart::new(name);
        for attr in attrs {
            start.push_attribute(*attr);
        }
        self.writer
            .write_event(Event::Empty(start))
            .map_err(write_err)
    }

    pub fn end_element(&mut self, name: &str) -> Result<(), Error> {
        self.writer
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(write_err)
    }

    /// Write escaped character data.
    pub fn write_text(&mut self, text: &str) -> Result<(), Error> {
        self.writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(write_err)
    }

    /// `<name attrs>text</name>` in one call.
    pub fn text_element(&mut self, name: &str, attrs: &[(&str, &str)], text: &str) -> Result<(), Error> {
        self.start_element(name, attrs)?;
        self.write_text(text)?;
        self.end_element(name)
    }

    /// Splice already-serialized markup in verbatim.
    pub fn write_raw(&mut self, markup: &str) {
        self.writer.get_mut().extend_from_slice(markup.as_bytes());
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.writer.into_inner()
    }

    pub fn into_string(self) -> Result<String, Error> {
        String::from_utf8(self.writer.into_inner())
            .map_err(|e| Error::Other(format!("XML writer produced invalid UTF-8: {e}")))
    }
}

impl Default for XmlWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_elements() {
        let mut w = XmlWriter::new();
        w.start_element("ds:Reference", &[("URI", "#a&b")]).unwrap();
        w.empty_element("ds:DigestMethod", &[("Algorithm", "urn:x")]).unwrap();
        w.text_element("ds:DigestValue", &[], "<x>").unwrap();
        w.end_element("ds:Reference").unwrap();
        let out = w.into_string().unwrap();
        assert_eq!(
            out,
            r##"<ds:Reference URI="#a&amp;b"><ds:DigestMethod Algorithm="urn:x"/><ds:DigestValue>&lt;x&gt;</ds:DigestValue></ds:Reference>"##
        );
    }

    #[test]
    fn test_raw_splice() {
        let mut w = XmlWriter::new();
        w.start_element("a", &[]).unwrap();
        w.write_raw("<b c=\"1\"/>");
        w.end_element("a").unwrap();
        assert_eq!(w.into_string().unwrap(), "<a><b c=\"1\"/></a>");
    }
}
