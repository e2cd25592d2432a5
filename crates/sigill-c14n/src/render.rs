#![forbid(unsafe_code)]

//! Namespace declaration and attribute ordering, and start-tag output.

use crate::escape;
use std::cmp::Ordering;

/// A namespace declaration to be rendered. An empty `uri` with an empty
/// prefix is the `xmlns=""` undeclaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsDecl {
    pub prefix: String,
    pub uri: String,
}

impl NsDecl {
    pub fn new(prefix: &str, uri: &str) -> Self {
        Self {
            prefix: prefix.to_owned(),
            uri: uri.to_owned(),
        }
    }

    fn render_into(&self, out: &mut String) {
        if self.prefix.is_empty() {
            out.push_str(" xmlns=\"");
        } else {
            out.push_str(" xmlns:");
            out.push_str(&self.prefix);
            out.push_str("=\"");
        }
        escape::attr_into(out, &self.uri);
        out.push('"');
    }
}

impl Ord for NsDecl {
    // Default namespace first, then by prefix.
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.prefix.is_empty(), other.prefix.is_empty()) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => self.prefix.cmp(&other.prefix),
        }
    }
}

impl PartialOrd for NsDecl {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// An attribute to be rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    /// Namespace URI, `""` when unqualified.
    pub ns_uri: String,
    pub local_name: String,
    /// Name as written to the output (`prefix:local` or `local`).
    pub qualified_name: String,
    pub value: String,
}

impl Attr {
    fn render_into(&self, out: &mut String) {
        out.push(' ');
        out.push_str(&self.qualified_name);
        out.push_str("=\"");
        escape::attr_into(out, &self.value);
        out.push('"');
    }
}

impl Ord for Attr {
    // Unqualified attributes first by local name, then qualified ones by
    // (namespace URI, local name).
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.ns_uri.is_empty(), other.ns_uri.is_empty()) {
            (true, true) => self.local_name.cmp(&other.local_name),
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self
                .ns_uri
                .cmp(&other.ns_uri)
                .then_with(|| self.local_name.cmp(&other.local_name)),
        }
    }
}

impl PartialOrd for Attr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Collect an element's attributes with their written prefixes.
pub(crate) fn element_attrs(node: roxmltree::Node<'_, '_>) -> Vec<Attr> {
    node.attributes()
        .map(|a| Attr {
            ns_uri: a.namespace().unwrap_or("").to_owned(),
            local_name: a.name().to_owned(),
            qualified_name: sigill_xml::document::attribute_qname(node, &a),
            value: a.value().to_owned(),
        })
        .collect()
}

/// Write `<qname decls attrs>`, sorting both lists.
pub(crate) fn start_tag(out: &mut String, qname: &str, decls: &mut [NsDecl], attrs: &mut [Attr]) {
    decls.sort();
    attrs.sort();
    out.push('<');
    out.push_str(qname);
    for d in decls.iter() {
        d.render_into(out);
    }
    for a in attrs.iter() {
        a.render_into(out);
    }
    out.push('>');
}

/// Write floating namespace declarations (visible namespace nodes of an
/// element that is itself outside the node-set).
pub(crate) fn floating_decls(out: &mut String, decls: &mut [NsDecl]) {
    decls.sort();
    for d in decls.iter() {
        d.render_into(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr(ns: &str, local: &str, qname: &str) -> Attr {
        Attr {
            ns_uri: ns.into(),
            local_name: local.into(),
            qualified_name: qname.into(),
            value: String::new(),
        }
    }

    #[test]
    fn test_ns_order() {
        let mut decls = vec![NsDecl::new("b", "u"), NsDecl::new("", "d"), NsDecl::new("a", "u")];
        decls.sort();
        let order: Vec<&str> = decls.iter().map(|d| d.prefix.as_str()).collect();
        assert_eq!(order, vec!["", "a", "b"]);
    }

    #[test]
    fn test_attr_order_by_namespace_uri_not_prefix() {
        let mut attrs = vec![
            attr("urn:b", "x", "a:x"),
            attr("urn:a", "y", "z:y"),
            attr("", "b", "b"),
            attr("", "a", "a"),
        ];
        attrs.sort();
        let order: Vec<&str> = attrs.iter().map(|a| a.qualified_name.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "z:y", "a:x"]);
    }

    #[test]
    fn test_start_tag() {
        let mut out = String::new();
        let mut decls = vec![NsDecl::new("p", "urn:p&q")];
        let mut attrs = vec![Attr {
            value: "v\"1".into(),
            ..attr("", "k", "k")
        }];
        start_tag(&mut out, "p:e", &mut decls, &mut attrs);
        assert_eq!(out, r#"<p:e xmlns:p="urn:p&amp;q" k="v&quot;1">"#);
    }
}
