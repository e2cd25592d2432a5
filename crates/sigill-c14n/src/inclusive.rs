#![forbid(unsafe_code)]

//! Canonical XML 1.0 and 1.1 (inclusive).
//!
//! Every in-scope namespace is rendered on the first output element where
//! it differs from what the nearest rendered ancestor already declared.
//! When an element is output but its parent is not, the `xml:*` attributes
//! of its ancestors are carried down: all of them for 1.0; `xml:lang` and
//! `xml:space` plus a resolved `xml:base` for 1.1 (which never inherits
//! `xml:id`).

use crate::render::{self, Attr, NsDecl};
use crate::walk::{ElementPolicy, Walker};
use roxmltree::Node;
use sigill_core::{ns, Error};
use sigill_xml::document::{in_scope_namespaces, qualified_name};
use std::collections::BTreeMap;

pub(crate) struct Inclusive {
    pub v11: bool,
}

impl ElementPolicy for Inclusive {
    type Scope = BTreeMap<String, String>;

    fn open(
        &mut self,
        walker: &Walker<'_>,
        node: Node<'_, '_>,
        scope: &Self::Scope,
        parent_rendered: bool,
        out: &mut String,
    ) -> Result<(String, Self::Scope), Error> {
        let visible_ns = visible_namespaces(walker, node);

        let mut decls: Vec<NsDecl> = visible_ns
            .iter()
            .filter(|(prefix, uri)| scope.get(*prefix) != Some(*uri))
            .map(|(prefix, uri)| NsDecl::new(prefix, uri))
            .collect();
        if scope.get("").is_some_and(|d| !d.is_empty()) && !visible_ns.contains_key("") {
            decls.push(NsDecl::new("", ""));
        }

        let mut attrs = if walker.attrs_visible() {
            render::element_attrs(node)
        } else {
            Vec::new()
        };
        if !parent_rendered {
            let inherited = if self.v11 {
                inherited_xml_attrs_11(walker, node, &attrs)
            } else {
                inherited_xml_attrs(node, &attrs)
            };
            if self.v11 {
                // 1.1 replaces the element's own xml:base with the resolved one.
                if inherited.iter().any(|a| a.local_name == "base") {
                    attrs.retain(|a| !(a.ns_uri == ns::XML && a.local_name == "base"));
                }
            }
            attrs.extend(inherited);
        }

        let qname = qualified_name(node).to_owned();
        render::start_tag(out, &qname, &mut decls, &mut attrs);
        Ok((qname, visible_ns))
    }

    fn hidden(
        &mut self,
        walker: &Walker<'_>,
        node: Node<'_, '_>,
        scope: &Self::Scope,
        out: &mut String,
    ) -> Self::Scope {
        // Namespace nodes selected on an element that is itself outside
        // the node-set are output on their own.
        if walker.filters_namespaces() {
            let mut decls: Vec<NsDecl> = visible_namespaces(walker, node)
                .iter()
                .filter(|(prefix, uri)| scope.get(*prefix) != Some(*uri))
                .map(|(prefix, uri)| NsDecl::new(prefix, uri))
                .collect();
            render::floating_decls(out, &mut decls);
        }
        scope.clone()
    }
}

/// In-scope namespaces whose namespace node is in the node-set.
pub(crate) fn visible_namespaces(walker: &Walker<'_>, node: Node<'_, '_>) -> BTreeMap<String, String> {
    in_scope_namespaces(node)
        .into_iter()
        .filter(|(prefix, _)| walker.ns_visible(node, prefix))
        .map(|(p, u)| (p.to_owned(), u.to_owned()))
        .collect()
}

fn xml_attr(name: &str, value: &str) -> Attr {
    Attr {
        ns_uri: ns::XML.to_owned(),
        local_name: name.to_owned(),
        qualified_name: format!("xml:{name}"),
        value: value.to_owned(),
    }
}

fn has_xml_attr(attrs: &[Attr], name: &str) -> bool {
    attrs
        .iter()
        .any(|a| a.ns_uri == ns::XML && a.local_name == name)
}

/// C14N 1.0: every `xml:*` attribute of an ancestor, nearest first,
/// unless the element carries its own.
fn inherited_xml_attrs(node: Node<'_, '_>, own: &[Attr]) -> Vec<Attr> {
    let mut found: BTreeMap<&str, &str> = BTreeMap::new();
    for ancestor in node.ancestors().skip(1).filter(|a| a.is_element()) {
        for attr in ancestor.attributes() {
            if attr.namespace() == Some(ns::XML) {
                found.entry(attr.name()).or_insert(attr.value());
            }
        }
    }
    found
        .into_iter()
        .filter(|(name, _)| !has_xml_attr(own, name))
        .map(|(name, value)| xml_attr(name, value))
        .collect()
}

/// C14N 1.1: inherit `xml:lang` and `xml:space`, resolve `xml:base`
/// against the omitted ancestors, never inherit `xml:id`.
fn inherited_xml_attrs_11(walker: &Walker<'_>, node: Node<'_, '_>, own: &[Attr]) -> Vec<Attr> {
    let mut out = Vec::new();
    for name in ["lang", "space"] {
        if has_xml_attr(own, name) {
            continue;
        }
        let value = node
            .ancestors()
            .skip(1)
            .find_map(|a| a.attribute((ns::XML, name)));
        if let Some(value) = value {
            out.push(xml_attr(name, value));
        }
    }

    // xml:base values of omitted ancestors, outermost first.
    let mut bases: Vec<&str> = node
        .ancestors()
        .skip(1)
        .take_while(|a| a.is_element() && !walker.is_rendered(*a))
        .filter_map(|a| a.attribute((ns::XML, "base")))
        .collect();
    bases.reverse();
    if bases.is_empty() {
        return out;
    }
    if let Some(own_base) = node.attribute((ns::XML, "base")) {
        bases.push(own_base);
    }
    let resolved = bases
        .iter()
        .skip(1)
        .fold(bases[0].to_owned(), |base, r| join_uri(&base, r));
    out.push(xml_attr("base", &resolved));
    out
}

/// Resolve `reference` against `base` (RFC 3986 section 5.2, keeping
/// leading `..` segments of relative results).
pub(crate) fn join_uri(base: &str, reference: &str) -> String {
    if reference.is_empty() {
        return base.to_owned();
    }
    if has_scheme(reference) {
        return reference.to_owned();
    }
    let (scheme, rest) = match base.find(':') {
        Some(i) if has_scheme(base) => (&base[..=i], &base[i + 1..]),
        _ => ("", base),
    };
    if reference.starts_with("//") {
        return format!("{scheme}{reference}");
    }
    let (authority, path) = if let Some(after) = rest.strip_prefix("//") {
        let end = after.find('/').unwrap_or(after.len());
        (&rest[..end + 2], &after[end..])
    } else {
        ("", rest)
    };
    let path = path.split(['?', '#']).next().unwrap_or("");
    let merged = if reference.starts_with('/') {
        reference.to_owned()
    } else if let Some(query_or_frag) = reference.strip_prefix(['?', '#']) {
        let marker = &reference[..1];
        return format!("{scheme}{authority}{path}{marker}{query_or_frag}");
    } else {
        match path.rfind('/') {
            Some(i) => format!("{}{}", &path[..=i], reference),
            None if !authority.is_empty() => format!("/{reference}"),
            None => reference.to_owned(),
        }
    };
    format!("{scheme}{authority}{}", remove_dot_segments(&merged))
}

fn has_scheme(s: &str) -> bool {
    match s.find(':') {
        Some(i) if i > 0 => {
            let scheme = &s[..i];
            scheme.starts_with(|c: char| c.is_ascii_alphabetic())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        _ => false,
    }
}

fn remove_dot_segments(path: &str) -> String {
    let absolute = path.starts_with('/');
    let trailing = path.ends_with('/') || path.ends_with("/.") || path.ends_with("/..");
    let mut stack: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if stack.last().is_some_and(|s| *s != "..") {
                    stack.pop();
                } else if !absolute {
                    stack.push("..");
                }
            }
            s => stack.push(s),
        }
    }
    let mut out = String::new();
    if absolute {
        out.push('/');
    }
    out.push_str(&stack.join("/"));
    if trailing && !stack.is_empty() {
        out.push('/');
    }
    out
}

#[cfg(test)]
mod tests {
    use crate::{canonicalize, C14nMode, CanonicalizationMethod};
    use sigill_xml::NodeSet;

    fn c14n(xml: &str) -> String {
        let out = canonicalize(xml, C14nMode::new(CanonicalizationMethod::C14n10, false), None, &[]).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_attribute_sorting_and_empty_elements() {
        assert_eq!(c14n(r#"<root><a b="1" a="2"/></root>"#), r#"<root><a a="2" b="1"></a></root>"#);
    }

    #[test]
    fn test_redundant_namespace_dropped() {
        let xml = r#"<a xmlns:p="urn:p"><p:b xmlns:p="urn:p"><c xmlns=""/></p:b></a>"#;
        assert_eq!(c14n(xml), r#"<a xmlns:p="urn:p"><p:b><c></c></p:b></a>"#);
    }

    #[test]
    fn test_default_namespace_undeclared() {
        let xml = r#"<a xmlns="urn:d"><b xmlns=""/></a>"#;
        assert_eq!(c14n(xml), r#"<a xmlns="urn:d"><b xmlns=""></b></a>"#);
    }

    #[test]
    fn test_text_and_attr_escaping() {
        let xml = "<r a=\"&quot;&#9;\">a &amp; b &lt; c &gt; d</r>";
        assert_eq!(c14n(xml), "<r a=\"&quot;&#x9;\">a &amp; b &lt; c &gt; d</r>");
    }

    #[test]
    fn test_prolog_comments_and_pis() {
        let xml = "<?xml version=\"1.0\"?>\n<?pi data?>\n<!--c1-->\n<doc/>\n<!--c2-->";
        let with = canonicalize(xml, C14nMode::new(CanonicalizationMethod::C14n10, true), None, &[]).unwrap();
        assert_eq!(
            String::from_utf8(with).unwrap(),
            "<?pi data?>\n<!--c1-->\n<doc></doc>\n<!--c2-->"
        );
        assert_eq!(c14n(xml), "<?pi data?>\n<doc></doc>");
    }

    #[test]
    fn test_subtree_inherits_namespaces_and_xml_attrs() {
        let xml = r#"<a xmlns:p="urn:p" xml:lang="en"><p:b><c/></p:b></a>"#;
        let doc = roxmltree::Document::parse(xml).unwrap();
        let b = doc.root_element().first_child().unwrap();
        let set = NodeSet::tree(b, false);
        let out = crate::canonicalize_doc(
            &doc,
            C14nMode::new(CanonicalizationMethod::C14n10, false),
            Some(&set),
            &[],
        )
        .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            r#"<p:b xmlns:p="urn:p" xml:lang="en"><c></c></p:b>"#
        );
    }

    #[test]
    fn test_c14n11_xml_id_not_inherited_and_base_joined() {
        let xml = r#"<a xml:id="i" xml:base="http://x.org/dir/"><b xml:base="sub/"><c xml:base="leaf"/></b></a>"#;
        let doc = roxmltree::Document::parse(xml).unwrap();
        let c = doc.descendants().find(|n| n.has_tag_name("c")).unwrap();
        let set = NodeSet::tree(c, false);
        let out = crate::canonicalize_doc(
            &doc,
            C14nMode::new(CanonicalizationMethod::C14n11, false),
            Some(&set),
            &[],
        )
        .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            r#"<c xml:base="http://x.org/dir/sub/leaf"></c>"#
        );
    }

    #[test]
    fn test_join_uri() {
        use super::join_uri;
        assert_eq!(join_uri("http://a/b/c/d", "../g"), "http://a/b/g");
        assert_eq!(join_uri("http://a/b/c/d", "/g"), "http://a/g");
        assert_eq!(join_uri("http://a/b/c/d", "x:y"), "x:y");
        assert_eq!(join_uri("dir/", "../../up"), "../up");
        assert_eq!(join_uri("http://a/b", "#f"), "http://a/b#f");
    }
}
