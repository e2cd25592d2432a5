#![forbid(unsafe_code)]

//! Canonical XML 2.0.
//!
//! Namespaces are rendered like exclusive canonicalization (only prefixes
//! the element visibly utilizes), ancestor `xml:*` attributes are never
//! imported, and three extensions apply:
//!
//! - sequential prefix rewriting (`n0`, `n1`, ...), assigned per element
//!   over the sorted namespace URIs it utilizes;
//! - QName-aware attributes and elements whose value is itself a QName;
//! - XPath elements whose text is scanned for namespace prefixes.
//!
//! The element renderer here is shared by the DOM walker and the
//! streaming reader in [`crate::stream`].

use crate::escape;
use crate::inclusive::visible_namespaces;
use crate::render::{self, Attr, NsDecl};
use crate::walk::{ElementPolicy, Walker};
use roxmltree::Node;
use sigill_core::{ns, Error};
use sigill_xml::document::{attribute_prefix, element_prefix, in_scope_namespaces};
use std::collections::{BTreeMap, BTreeSet};

/// Attributes and elements whose content is namespace-aware.
///
/// Each entry is `(namespace URI, local name)`; the URI is empty for
/// names in no namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QNameAware {
    pub attributes: Vec<(String, String)>,
    pub elements: Vec<(String, String)>,
    pub xpath_elements: Vec<(String, String)>,
}

impl QNameAware {
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.elements.is_empty() && self.xpath_elements.is_empty()
    }

    fn has(list: &[(String, String)], ns_uri: &str, local: &str) -> bool {
        list.iter().any(|(n, l)| n == ns_uri && l == local)
    }

    pub fn is_attribute(&self, ns_uri: &str, local: &str) -> bool {
        Self::has(&self.attributes, ns_uri, local)
    }

    pub(crate) fn content(&self, ns_uri: &str, local: &str) -> Content {
        if Self::has(&self.elements, ns_uri, local) {
            Content::QName
        } else if Self::has(&self.xpath_elements, ns_uri, local) {
            Content::XPath
        } else {
            Content::Plain
        }
    }
}

/// How an element's text content is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Content {
    Plain,
    QName,
    XPath,
}

/// An attribute as written in the source.
#[derive(Debug, Clone)]
pub(crate) struct RawAttr {
    pub prefix: String,
    pub local: String,
    pub ns_uri: String,
    pub value: String,
}

/// An element start tag, independent of where it was read from.
pub(crate) struct RawElement<'a> {
    pub prefix: &'a str,
    pub local: &'a str,
    pub ns_uri: &'a str,
    pub attrs: &'a [RawAttr],
    /// In-scope `prefix → uri` bindings (`""` for the default namespace).
    pub bindings: &'a BTreeMap<String, String>,
    pub content: Content,
    /// Direct text content, read only for QName-aware and XPath elements.
    pub text: Option<&'a str>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Scope2 {
    /// Declarations in effect on the nearest output ancestor.
    rendered: BTreeMap<String, String>,
    /// Namespace URI → rewritten prefix.
    rewrite: BTreeMap<String, String>,
}

#[derive(Clone, Copy)]
pub(crate) struct Renderer<'c> {
    pub rewrite: bool,
    pub qname_aware: &'c QNameAware,
}

impl Renderer<'_> {
    fn utilized(&self, el: &RawElement<'_>) -> BTreeSet<String> {
        let mut set = BTreeSet::new();
        set.insert(el.prefix.to_owned());
        for a in el.attrs {
            if !a.prefix.is_empty() {
                set.insert(a.prefix.clone());
            }
            if self.qname_aware.is_attribute(&a.ns_uri, &a.local) {
                set.insert(qname_prefix(a.value.trim()).to_owned());
            }
        }
        match (el.content, el.text) {
            (Content::QName, Some(text)) => {
                set.insert(qname_prefix(text.trim()).to_owned());
            }
            (Content::XPath, Some(text)) => {
                set.extend(xpath_prefixes(text).into_iter().map(|(s, e)| text[s..e].to_owned()));
            }
            _ => {}
        }
        set.remove("xml");
        set
    }

    /// Write the start tag; returns the end-tag name and the child scope.
    pub fn start(&self, el: &RawElement<'_>, scope: &Scope2, out: &mut String) -> (String, Scope2) {
        let utilized = self.utilized(el);
        let mut child = scope.clone();
        let mut decls = Vec::new();

        if self.rewrite {
            let uris: BTreeSet<&String> = utilized.iter().filter_map(|p| el.bindings.get(p)).collect();
            for uri in &uris {
                if !child.rewrite.contains_key(*uri) {
                    let prefix = format!("n{}", child.rewrite.len());
                    child.rewrite.insert((*uri).clone(), prefix);
                }
            }
            for uri in uris {
                let prefix = &child.rewrite[uri];
                if child.rendered.get(prefix) != Some(uri) {
                    decls.push(NsDecl::new(prefix, uri));
                }
            }
        } else {
            for prefix in &utilized {
                match el.bindings.get(prefix) {
                    Some(uri) if scope.rendered.get(prefix) != Some(uri) => {
                        decls.push(NsDecl::new(prefix, uri))
                    }
                    Some(_) => {}
                    None if prefix.is_empty()
                        && scope.rendered.get("").is_some_and(|d| !d.is_empty()) =>
                    {
                        decls.push(NsDecl::new("", ""))
                    }
                    None => {}
                }
            }
        }
        for d in &decls {
            child.rendered.insert(d.prefix.clone(), d.uri.clone());
        }

        let qname = if self.rewrite {
            join_qname(child.rewrite.get(el.ns_uri).map_or("", String::as_str), el.local)
        } else {
            join_qname(el.prefix, el.local)
        };

        let mut attrs: Vec<Attr> = el
            .attrs
            .iter()
            .map(|a| {
                let prefix = if !self.rewrite || a.ns_uri.is_empty() {
                    a.prefix.as_str()
                } else if a.ns_uri == ns::XML {
                    "xml"
                } else {
                    child.rewrite.get(&a.ns_uri).map_or("", String::as_str)
                };
                let value = if self.rewrite && self.qname_aware.is_attribute(&a.ns_uri, &a.local) {
                    rewrite_qname(&a.value, el.bindings, &child.rewrite)
                } else {
                    a.value.clone()
                };
                Attr {
                    ns_uri: a.ns_uri.clone(),
                    local_name: a.local.clone(),
                    qualified_name: join_qname(prefix, &a.local),
                    value,
                }
            })
            .collect();

        render::start_tag(out, &qname, &mut decls, &mut attrs);
        (qname, child)
    }

    /// Write text content of an element whose content kind is `content`.
    pub fn text(
        &self,
        content: Content,
        text: &str,
        bindings: &BTreeMap<String, String>,
        scope: &Scope2,
        out: &mut String,
    ) {
        match content {
            _ if !self.rewrite => escape::text_into(out, text),
            Content::Plain => escape::text_into(out, text),
            Content::QName => escape::text_into(out, &rewrite_qname(text, bindings, &scope.rewrite)),
            Content::XPath => escape::text_into(out, &rewrite_xpath(text, bindings, &scope.rewrite)),
        }
    }
}

fn join_qname(prefix: &str, local: &str) -> String {
    if prefix.is_empty() {
        local.to_owned()
    } else {
        format!("{prefix}:{local}")
    }
}

fn qname_prefix(value: &str) -> &str {
    value.split_once(':').map_or("", |(p, _)| p)
}

/// Rewrite the prefix of a QName value, keeping surrounding whitespace.
fn rewrite_qname(
    value: &str,
    bindings: &BTreeMap<String, String>,
    rewrite: &BTreeMap<String, String>,
) -> String {
    let trimmed = value.trim();
    let lead = &value[..value.len() - value.trim_start().len()];
    let trail = &value[value.trim_end().len()..];
    let (prefix, local) = trimmed.split_once(':').unwrap_or(("", trimmed));
    match bindings.get(prefix).and_then(|uri| rewrite.get(uri)) {
        Some(new_prefix) => format!("{lead}{new_prefix}:{local}{trail}"),
        None => value.to_owned(),
    }
}

fn rewrite_xpath(
    expr: &str,
    bindings: &BTreeMap<String, String>,
    rewrite: &BTreeMap<String, String>,
) -> String {
    let mut out = String::with_capacity(expr.len());
    let mut last = 0;
    for (start, end) in xpath_prefixes(expr) {
        out.push_str(&expr[last..start]);
        let prefix = &expr[start..end];
        match bindings.get(prefix).and_then(|uri| rewrite.get(uri)) {
            Some(new_prefix) => out.push_str(new_prefix),
            None => out.push_str(prefix),
        }
        last = end;
    }
    out.push_str(&expr[last..]);
    out
}

/// Byte ranges of the namespace prefixes used in an XPath expression.
///
/// String literals are skipped; `axis::` separators are not prefixes.
fn xpath_prefixes(expr: &str) -> Vec<(usize, usize)> {
    let bytes = expr.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c == b'"' || c == b'\'' {
            i = expr[i + 1..].find(c as char).map_or(bytes.len(), |j| i + j + 2);
        } else if c.is_ascii_digit() {
            while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                i += 1;
            }
        } else if c.is_ascii_alphabetic() || c == b'_' || c >= 0x80 {
            let start = i;
            while i < bytes.len() && is_name_byte(bytes[i]) {
                i += 1;
            }
            let colon = bytes.get(i) == Some(&b':');
            let next = bytes.get(i + 1).copied();
            if colon && next.is_some_and(|n| n == b'*' || n.is_ascii_alphabetic() || n == b'_' || n >= 0x80) {
                spans.push((start, i));
            }
        } else {
            i += 1;
        }
    }
    spans
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.') || b >= 0x80
}

/// DOM-mode C14N 2.0.
pub(crate) struct C14n2<'c> {
    pub renderer: Renderer<'c>,
}

impl C14n2<'_> {
    fn content_of(&self, node: Node<'_, '_>) -> Content {
        let ns_uri = node.tag_name().namespace().unwrap_or("");
        self.renderer.qname_aware.content(ns_uri, node.tag_name().name())
    }
}

fn bindings_of(pairs: Vec<(&str, &str)>) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .map(|(p, u)| (p.to_owned(), u.to_owned()))
        .collect()
}

impl ElementPolicy for C14n2<'_> {
    type Scope = Scope2;

    fn open(
        &mut self,
        walker: &Walker<'_>,
        node: Node<'_, '_>,
        scope: &Self::Scope,
        _parent_rendered: bool,
        out: &mut String,
    ) -> Result<(String, Self::Scope), Error> {
        let bindings = visible_namespaces(walker, node);
        let attrs: Vec<RawAttr> = if walker.attrs_visible() {
            node.attributes()
                .map(|a| RawAttr {
                    prefix: attribute_prefix(node, &a).to_owned(),
                    local: a.name().to_owned(),
                    ns_uri: a.namespace().unwrap_or("").to_owned(),
                    value: a.value().to_owned(),
                })
                .collect()
        } else {
            Vec::new()
        };
        let content = self.content_of(node);
        let text: Option<String> = (content != Content::Plain).then(|| {
            node.children()
                .filter(|c| c.is_text())
                .filter_map(|c| c.text())
                .collect()
        });
        let el = RawElement {
            prefix: element_prefix(node),
            local: node.tag_name().name(),
            ns_uri: node.tag_name().namespace().unwrap_or(""),
            attrs: &attrs,
            bindings: &bindings,
            content,
            text: text.as_deref(),
        };
        Ok(self.renderer.start(&el, scope, out))
    }

    fn text(&mut self, node: Node<'_, '_>, text: &str, scope: &Self::Scope, out: &mut String) {
        let parent = node.parent().filter(|p| p.is_element());
        let content = parent.map_or(Content::Plain, |p| self.content_of(p));
        if content == Content::Plain {
            escape::text_into(out, text);
            return;
        }
        let bindings = parent.map(|p| bindings_of(in_scope_namespaces(p))).unwrap_or_default();
        self.renderer.text(content, text, &bindings, scope, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{C14nMode, CanonicalizationMethod, Canonicalizer};

    fn c14n2() -> Canonicalizer<'static> {
        Canonicalizer::new(C14nMode::new(CanonicalizationMethod::C14n20, false))
    }

    fn run(c: &Canonicalizer<'_>, xml: &str) -> String {
        String::from_utf8(c.canonicalize_str(xml).unwrap()).unwrap()
    }

    #[test]
    fn test_unused_namespaces_and_xml_attrs() {
        let xml = r#"<a xmlns:p="urn:p" xmlns:u="urn:u" xml:lang="en"><p:b/></a>"#;
        assert_eq!(
            run(&c14n2(), xml),
            r#"<a xml:lang="en"><p:b xmlns:p="urn:p"></p:b></a>"#
        );
    }

    #[test]
    fn test_sequential_prefix_rewrite() {
        let xml = r#"<x:a xmlns:x="urn:b" xmlns:y="urn:a" y:attr="1"><x:b/><c xmlns="urn:c"/></x:a>"#;
        let c = c14n2().rewrite_prefixes(true);
        assert_eq!(
            run(&c, xml),
            concat!(
                r#"<n1:a xmlns:n0="urn:a" xmlns:n1="urn:b" n0:attr="1">"#,
                r#"<n1:b></n1:b><n2:c xmlns:n2="urn:c"></n2:c></n1:a>"#
            )
        );
    }

    #[test]
    fn test_qname_aware_attribute_declares_prefix() {
        let xml = r#"<r xmlns:q="urn:q" xmlns:t="urn:t"><e t:type="q:Name"/></r>"#;
        let plain = run(&c14n2(), xml);
        assert_eq!(plain, r#"<r><e xmlns:t="urn:t" t:type="q:Name"></e></r>"#);

        let aware = c14n2().add_qname_aware_attribute("type", "urn:t");
        assert_eq!(
            run(&aware, xml),
            r#"<r><e xmlns:q="urn:q" xmlns:t="urn:t" t:type="q:Name"></e></r>"#
        );
    }

    #[test]
    fn test_qname_aware_element_rewritten() {
        let xml = r#"<r xmlns:q="urn:q"><v> q:Value </v></r>"#;
        let c = c14n2().rewrite_prefixes(true).add_qname_aware_element("v", "");
        assert_eq!(run(&c, xml), r#"<r><v xmlns:n0="urn:q"> n0:Value </v></r>"#);
    }

    #[test]
    fn test_xpath_element_prefixes() {
        let xml = r#"<r xmlns:a="urn:a" xmlns:b="urn:b"><x>self::a:e[@b:k='c:d'] | child::*</x></r>"#;
        let c = c14n2().add_qname_aware_xpath_element("x", "");
        assert_eq!(
            run(&c, xml),
            r#"<r><x xmlns:a="urn:a" xmlns:b="urn:b">self::a:e[@b:k='c:d'] | child::*</x></r>"#
        );
        let spans = xpath_prefixes("ancestor::p:x/@q:y");
        assert_eq!(spans.len(), 2);
    }

    #[test]
    fn test_trim_text_nodes() {
        let xml = "<a>\n  <b>  text  </b>\n  <c xml:space=\"preserve\">  kept  </c>\n</a>";
        let c = c14n2().preserve_whitespace(false);
        assert_eq!(
            run(&c, xml),
            "<a><b>text</b><c xml:space=\"preserve\">  kept  </c></a>"
        );
    }
}
