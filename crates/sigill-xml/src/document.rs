#![forbid(unsafe_code)]

//! XML document wrapper over roxmltree with ID attribute registration,
//! plus the prefix helpers roxmltree leaves to the caller.

use sigill_core::{ns, Error};
use std::collections::HashMap;

/// An owned XML document.  Stores the text and pre-computed metadata.
///
/// To work with the parsed tree, call [`XmlDocument::parse_doc`] which
/// returns a temporary `roxmltree::Document` borrowing from the text.
/// Node ids are assigned in parse order, so they are stable across
/// re-parses of the same text.
#[derive(Debug, Clone)]
pub struct XmlDocument {
    text: String,
    /// Additional ID attribute names to register (beyond `Id`, `ID`, `id`).
    extra_id_attrs: Vec<String>,
}

impl XmlDocument {
    /// Parse and validate XML from a string, taking ownership.
    pub fn parse(text: String) -> Result<Self, Error> {
        parse_text(&text)?;
        Ok(Self {
            text,
            extra_id_attrs: Vec::new(),
        })
    }

    /// Parse and validate XML from bytes.
    pub fn parse_bytes(data: &[u8]) -> Result<Self, Error> {
        let text = std::str::from_utf8(data)
            .map_err(|e| Error::XmlParse(format!("invalid UTF-8: {e}")))?
            .to_owned();
        Self::parse(text)
    }

    /// Get the raw XML text.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    /// Register an additional ID attribute name (e.g. `"wsu:Id"` or a
    /// plain local name).
    pub fn add_id_attr(&mut self, name: &str) {
        self.extra_id_attrs.push(name.to_owned());
    }

    pub fn id_attrs(&self) -> &[String] {
        &self.extra_id_attrs
    }

    /// Parse the document and return a temporary `roxmltree::Document`.
    pub fn parse_doc(&self) -> Result<roxmltree::Document<'_>, Error> {
        parse_text(&self.text)
    }

    /// Build the ID → NodeId mapping for a parsed document.
    pub fn build_id_map(&self, doc: &roxmltree::Document<'_>) -> HashMap<String, roxmltree::NodeId> {
        build_id_map(doc, &self.extra_id_attrs)
    }

    /// Find an element by its registered ID value in a parsed document.
    pub fn find_by_id<'a, 'input>(
        doc: &'a roxmltree::Document<'input>,
        id_map: &HashMap<String, roxmltree::NodeId>,
        id: &str,
    ) -> Option<roxmltree::Node<'a, 'input>> {
        let node_id = id_map.get(id)?;
        doc.get_node(*node_id)
    }

    /// Find the first descendant element with the given local name and namespace.
    pub fn find_element<'a, 'input>(
        doc: &'a roxmltree::Document<'input>,
        ns: &str,
        local_name: &str,
    ) -> Option<roxmltree::Node<'a, 'input>> {
        doc.descendants().find(|n| is_element(*n, ns, local_name))
    }

    /// Find all descendant elements with the given local name and namespace.
    pub fn find_elements<'a, 'input>(
        doc: &'a roxmltree::Document<'input>,
        ns: &str,
        local_name: &str,
    ) -> Vec<roxmltree::Node<'a, 'input>> {
        doc.descendants()
            .filter(|n| is_element(*n, ns, local_name))
            .collect()
    }
}

/// Parse `text` with DTDs allowed.
pub fn parse_text(text: &str) -> Result<roxmltree::Document<'_>, Error> {
    roxmltree::Document::parse_with_options(text, crate::parsing_options())
        .map_err(|e| Error::XmlParse(e.to_string()))
}

/// Build an ID map over `Id`/`ID`/`id`/`xml:id` and any extra names.
///
/// Extra names may be given as `prefix:local` (matched through the
/// element's in-scope namespaces) or as a bare local name.
pub fn build_id_map(
    doc: &roxmltree::Document<'_>,
    extra_id_attrs: &[String],
) -> HashMap<String, roxmltree::NodeId> {
    let default_attrs = ["Id", "ID", "id"];
    let mut map = HashMap::new();
    for node in doc.descendants().filter(|n| n.is_element()) {
        for attr_name in &default_attrs {
            if let Some(val) = node.attribute(*attr_name) {
                map.insert(val.to_owned(), node.id());
            }
        }
        if let Some(val) = node.attribute((ns::XML, "id")) {
            map.insert(val.to_owned(), node.id());
        }
        for attr_name in extra_id_attrs {
            let val = match attr_name.split_once(':') {
                Some((prefix, local)) => node
                    .lookup_namespace_uri(Some(prefix))
                    .and_then(|uri| node.attribute((uri, local))),
                None => node
                    .attributes()
                    .find(|a| a.name() == attr_name.as_str())
                    .map(|a| a.value()),
            };
            if let Some(val) = val {
                map.insert(val.to_owned(), node.id());
            }
        }
    }
    map
}

/// Whether `node` is an element named `{ns}local_name`.
pub fn is_element(node: roxmltree::Node<'_, '_>, ns: &str, local_name: &str) -> bool {
    node.is_element()
        && node.tag_name().name() == local_name
        && node.tag_name().namespace().unwrap_or("") == ns
}

/// First child element named `{ns}local_name`.
pub fn child_element<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    ns: &str,
    local_name: &str,
) -> Option<roxmltree::Node<'a, 'input>> {
    node.children().find(|n| is_element(*n, ns, local_name))
}

/// All child elements named `{ns}local_name`, in document order.
pub fn child_elements<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    ns: &str,
    local_name: &str,
) -> Vec<roxmltree::Node<'a, 'input>> {
    node.children()
        .filter(|n| is_element(*n, ns, local_name))
        .collect()
}

/// The element's qualified name exactly as written in the source.
pub fn qualified_name<'input>(node: roxmltree::Node<'_, 'input>) -> &'input str {
    let text = node.document().input_text();
    let start = node.range().start;
    let rest = text.get(start + 1..).unwrap_or("");
    let end = rest
        .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .unwrap_or(rest.len());
    &rest[..end]
}

/// The element's namespace prefix, `""` when unprefixed.
pub fn element_prefix<'input>(node: roxmltree::Node<'_, 'input>) -> &'input str {
    match qualified_name(node).split_once(':') {
        Some((prefix, _)) => prefix,
        None => "",
    }
}

/// The prefix an attribute was written with, `""` when unqualified.
///
/// roxmltree resolves attribute names to namespace URIs and drops the
/// prefix, so the prefix is recovered from the element's in-scope
/// bindings. The `xml` namespace always maps to `xml`.
pub fn attribute_prefix<'a>(node: roxmltree::Node<'a, '_>, attr: &roxmltree::Attribute<'_, '_>) -> &'a str {
    match attr.namespace() {
        None => "",
        Some(ns::XML) => "xml",
        Some(uri) => node
            .namespaces()
            .find(|n| n.uri() == uri && n.name().is_some())
            .and_then(|n| n.name())
            .unwrap_or(""),
    }
}

/// `prefix:local` for a qualified attribute, `local` otherwise.
pub fn attribute_qname(node: roxmltree::Node<'_, '_>, attr: &roxmltree::Attribute<'_, '_>) -> String {
    let prefix = attribute_prefix(node, attr);
    if prefix.is_empty() {
        attr.name().to_owned()
    } else {
        format!("{prefix}:{}", attr.name())
    }
}

/// In-scope namespace bindings of an element as `(prefix, uri)`, with
/// `""` for the default namespace. The implicit `xml` binding and
/// empty URIs are left out.
pub fn in_scope_namespaces<'a>(node: roxmltree::Node<'a, '_>) -> Vec<(&'a str, &'a str)> {
    let mut out: Vec<(&str, &str)> = node
        .namespaces()
        .filter(|n| n.name() != Some("xml") && !n.uri().is_empty())
        .map(|n| (n.name().unwrap_or(""), n.uri()))
        .collect();
    out.sort();
    out.dedup_by(|a, b| a.0 == b.0);
    out
}

/// Text of the node's source range (the full element markup for
/// elements).
pub fn source_text<'input>(node: roxmltree::Node<'_, 'input>) -> &'input str {
    let text = node.document().input_text();
    text.get(node.range()).unwrap_or("")
}

/// Ancestor-or-self check on node ids.
pub fn is_ancestor_or_self(ancestor: roxmltree::NodeId, node: roxmltree::Node<'_, '_>) -> bool {
    node.ancestors().any(|n| n.id() == ancestor)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<a:root xmlns:a="urn:a" xmlns="urn:d" Id="r"><a:child xml:id="c" a:attr="1"/><plain ID="p"/></a:root>"#;

    #[test]
    fn test_id_map() {
        let doc = XmlDocument::parse(DOC.to_owned()).unwrap();
        let tree = doc.parse_doc().unwrap();
        let ids = doc.build_id_map(&tree);
        assert_eq!(ids.len(), 3);
        let c = XmlDocument::find_by_id(&tree, &ids, "c").unwrap();
        assert_eq!(c.tag_name().name(), "child");
        assert!(XmlDocument::find_by_id(&tree, &ids, "missing").is_none());
    }

    #[test]
    fn test_extra_id_attr() {
        let text = r#"<r xmlns:w="urn:w"><e w:Ident="x"/><f Name="y"/></r>"#;
        let mut doc = XmlDocument::parse(text.to_owned()).unwrap();
        doc.add_id_attr("w:Ident");
        doc.add_id_attr("Name");
        let tree = doc.parse_doc().unwrap();
        let ids = doc.build_id_map(&tree);
        assert!(ids.contains_key("x"));
        assert!(ids.contains_key("y"));
    }

    #[test]
    fn test_prefixes() {
        let tree = parse_text(DOC).unwrap();
        let root = tree.root_element();
        assert_eq!(qualified_name(root), "a:root");
        assert_eq!(element_prefix(root), "a");
        let child = root.first_child().unwrap();
        assert_eq!(qualified_name(child), "a:child");
        let names: Vec<String> = child
            .attributes()
            .map(|a| attribute_qname(child, &a))
            .collect();
        assert_eq!(names, vec!["xml:id".to_owned(), "a:attr".to_owned()]);
        let plain = child.next_sibling().unwrap();
        assert_eq!(element_prefix(plain), "");
    }

    #[test]
    fn test_in_scope_namespaces() {
        let tree = parse_text(DOC).unwrap();
        let child = tree.root_element().first_child().unwrap();
        assert_eq!(
            in_scope_namespaces(child),
            vec![("", "urn:d"), ("a", "urn:a")]
        );
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            XmlDocument::parse("<a><b></a>".into()),
            Err(Error::XmlParse(_))
        ));
    }
}
