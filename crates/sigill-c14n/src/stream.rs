#![forbid(unsafe_code)]

//! Streaming Canonical XML 2.0.
//!
//! Reads events from a `quick-xml` reader and writes canonical output to
//! a sink as each event is processed; no tree is built. Elements are
//! rendered through the same [`Renderer`] as the DOM mode, so both modes
//! produce identical bytes for the same input and parameters.
//!
//! Stream mode has no node-set or visibility filter: every node of the
//! input is output.

use crate::c14n2::{Content, RawAttr, RawElement, Renderer, Scope2};
use crate::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use sigill_core::{ns, Error};
use std::borrow::Cow;
use std::collections::{BTreeMap, VecDeque};
use std::io::{BufRead, Write};

pub(crate) struct StreamOptions<'c> {
    pub with_comments: bool,
    pub preserve_whitespace: bool,
    pub renderer: Renderer<'c>,
}

struct Frame {
    name: String,
    scope: Scope2,
    bindings: BTreeMap<String, String>,
    space_preserve: bool,
    content: Content,
}

/// Event source with a push-back queue for reading ahead.
struct Events<R> {
    reader: Reader<R>,
    buf: Vec<u8>,
    pending: VecDeque<Event<'static>>,
}

impl<R: BufRead> Events<R> {
    fn read(&mut self) -> Result<Event<'static>, Error> {
        let ev = self
            .reader
            .read_event_into(&mut self.buf)
            .map_err(|e| malformed(e.to_string()))?
            .into_owned();
        self.buf.clear();
        Ok(ev)
    }

    fn next(&mut self) -> Result<Event<'static>, Error> {
        match self.pending.pop_front() {
            Some(ev) => Ok(ev),
            None => self.read(),
        }
    }

    /// Direct text content of the element just started, leaving every
    /// event queued for normal processing.
    fn direct_text(&mut self) -> Result<String, Error> {
        let mut text = String::new();
        let mut depth = 0usize;
        let mut i = 0;
        loop {
            if i == self.pending.len() {
                let ev = self.read()?;
                self.pending.push_back(ev);
            }
            match &self.pending[i] {
                Event::Start(_) => depth += 1,
                Event::End(_) if depth == 0 => break,
                Event::End(_) => depth -= 1,
                Event::Text(t) if depth == 0 => text.push_str(&text_value(t)?),
                Event::CData(c) if depth == 0 => text.push_str(&normalize_newlines(utf8(c)?)),
                Event::Eof => break,
                _ => {}
            }
            i += 1;
        }
        Ok(text)
    }
}

fn malformed(msg: impl Into<String>) -> Error {
    Error::Canonicalization(msg.into())
}

fn utf8(bytes: &[u8]) -> Result<&str, Error> {
    std::str::from_utf8(bytes).map_err(|e| malformed(format!("invalid UTF-8: {e}")))
}

fn normalize_newlines(s: &str) -> Cow<'_, str> {
    if s.contains('\r') {
        Cow::Owned(s.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(s)
    }
}

fn unescape(raw: &str) -> Result<String, Error> {
    quick_xml::escape::unescape(raw)
        .map(Cow::into_owned)
        .map_err(|e| malformed(e.to_string()))
}

fn text_value(raw: &[u8]) -> Result<String, Error> {
    unescape(&normalize_newlines(utf8(raw)?))
}

/// Attribute-value normalization: literal whitespace becomes a space,
/// character references survive.
fn attr_value(raw: &[u8]) -> Result<String, Error> {
    let normalized: String = normalize_newlines(utf8(raw)?)
        .chars()
        .map(|c| if matches!(c, '\t' | '\n') { ' ' } else { c })
        .collect();
    unescape(&normalized)
}

fn split_qname(name: &str) -> (&str, &str) {
    name.split_once(':').unwrap_or(("", name))
}

pub(crate) fn canonicalize<R: BufRead, W: Write>(
    input: R,
    out: &mut W,
    opts: &StreamOptions<'_>,
) -> Result<(), Error> {
    let mut reader = Reader::from_reader(input);
    reader.config_mut().trim_text(false);
    let mut events = Events {
        reader,
        buf: Vec::new(),
        pending: VecDeque::new(),
    };

    let mut stack: Vec<Frame> = Vec::new();
    let mut root_done = false;
    let mut chunk = String::new();
    let mut written = 0usize;

    loop {
        match events.next()? {
            Event::Start(e) => {
                let frame = start_element(&e, false, &stack, &mut events, opts, &mut chunk)?;
                stack.push(frame);
            }
            Event::Empty(e) => {
                let frame = start_element(&e, true, &stack, &mut events, opts, &mut chunk)?;
                end_element(frame, &mut chunk);
                root_done = stack.is_empty();
            }
            Event::End(_) => {
                let frame = stack.pop().ok_or_else(|| malformed("unexpected end tag"))?;
                end_element(frame, &mut chunk);
                root_done = stack.is_empty();
            }
            Event::Text(t) => {
                if let Some(frame) = stack.last() {
                    write_text(&text_value(&t)?, frame, opts, &mut chunk);
                }
            }
            Event::CData(c) => {
                if let Some(frame) = stack.last() {
                    write_text(&normalize_newlines(utf8(&c)?), frame, opts, &mut chunk);
                }
            }
            Event::Comment(c) => {
                if opts.with_comments {
                    let body = normalize_newlines(utf8(&c)?).into_owned();
                    top_level(&stack, root_done, &mut chunk, |out| {
                        out.push_str("<!--");
                        out.push_str(&body);
                        out.push_str("-->");
                    });
                }
            }
            Event::PI(pi) => {
                let raw = normalize_newlines(utf8(&pi)?).into_owned();
                let (target, data) = raw
                    .split_once(char::is_whitespace)
                    .map_or((raw.as_str(), ""), |(t, d)| (t, d.trim_start()));
                top_level(&stack, root_done, &mut chunk, |out| {
                    out.push_str("<?");
                    out.push_str(target);
                    if !data.is_empty() {
                        out.push(' ');
                        out.push_str(&escape::escape_pi(data));
                    }
                    out.push_str("?>");
                });
            }
            Event::Eof => break,
            _ => {}
        }
        if !chunk.is_empty() {
            out.write_all(chunk.as_bytes())?;
            written += chunk.len();
            chunk.clear();
        }
    }

    if let Some(frame) = stack.last() {
        return Err(malformed(format!("unclosed element <{}>", frame.name)));
    }
    if !root_done {
        return Err(malformed("no document element"));
    }
    out.flush()?;
    tracing::trace!(bytes = written, "streamed C14N 2.0 output");
    Ok(())
}

fn start_element<R: BufRead>(
    e: &BytesStart<'_>,
    is_empty: bool,
    stack: &[Frame],
    events: &mut Events<R>,
    opts: &StreamOptions<'_>,
    out: &mut String,
) -> Result<Frame, Error> {
    let parent = stack.last();
    let mut bindings = parent.map(|f| f.bindings.clone()).unwrap_or_default();
    let mut space_preserve = parent.is_some_and(|f| f.space_preserve);

    let mut plain = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| malformed(e.to_string()))?;
        let key = utf8(attr.key.as_ref())?.to_owned();
        let value = attr_value(&attr.value)?;
        if key == "xmlns" {
            if value.is_empty() {
                bindings.remove("");
            } else {
                bindings.insert(String::new(), value);
            }
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            bindings.insert(prefix.to_owned(), value);
        } else {
            plain.push((key, value));
        }
    }

    let mut attrs = Vec::with_capacity(plain.len());
    for (key, value) in plain {
        let (prefix, local) = split_qname(&key);
        let ns_uri = match prefix {
            "" => String::new(),
            "xml" => ns::XML.to_owned(),
            p => bindings
                .get(p)
                .cloned()
                .ok_or_else(|| malformed(format!("unbound prefix '{p}' on attribute {key}")))?,
        };
        if ns_uri == ns::XML && local == "space" {
            space_preserve = value == "preserve";
        }
        attrs.push(RawAttr {
            prefix: prefix.to_owned(),
            local: local.to_owned(),
            ns_uri,
            value,
        });
    }

    let qname = utf8(e.name().as_ref())?.to_owned();
    let (prefix, local) = split_qname(&qname);
    let ns_uri = match bindings.get(prefix) {
        Some(uri) => uri.clone(),
        None if prefix.is_empty() => String::new(),
        None => return Err(malformed(format!("unbound prefix '{prefix}' on element {qname}"))),
    };
    let content = opts.renderer.qname_aware.content(&ns_uri, local);
    let text = match content {
        Content::Plain => None,
        _ if is_empty => Some(String::new()),
        _ => Some(events.direct_text()?),
    };

    let scope = parent.map(|f| f.scope.clone()).unwrap_or_default();
    let el = RawElement {
        prefix,
        local,
        ns_uri: &ns_uri,
        attrs: &attrs,
        bindings: &bindings,
        content,
        text: text.as_deref(),
    };
    let (name, scope) = opts.renderer.start(&el, &scope, out);
    Ok(Frame {
        name,
        scope,
        bindings,
        space_preserve,
        content,
    })
}

fn end_element(frame: Frame, out: &mut String) {
    out.push_str("</");
    out.push_str(&frame.name);
    out.push('>');
}

fn write_text(text: &str, frame: &Frame, opts: &StreamOptions<'_>, out: &mut String) {
    let text = if opts.preserve_whitespace || frame.space_preserve {
        text
    } else {
        text.trim()
    };
    if text.is_empty() {
        return;
    }
    opts.renderer
        .text(frame.content, text, &frame.bindings, &frame.scope, out);
}

/// Comments and PIs outside the document element: a line feed follows
/// them before it and precedes them after it.
fn top_level(stack: &[Frame], root_done: bool, out: &mut String, write: impl FnOnce(&mut String)) {
    if !stack.is_empty() {
        write(out);
    } else if root_done {
        out.push('\n');
        write(out);
    } else {
        write(out);
        out.push('\n');
    }
}
