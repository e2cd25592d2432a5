#![forbid(unsafe_code)]

//! Exclusive Canonical XML 1.0 (exc-C14N).
//!
//! Only visibly utilized namespaces are output: the element's own prefix,
//! the prefixes of its attributes and any prefix named in the
//! InclusiveNamespaces PrefixList (`#default` for the default namespace).
//! Ancestor `xml:*` attributes are never imported.

use crate::inclusive::visible_namespaces;
use crate::render::{self, NsDecl};
use crate::walk::{ElementPolicy, Walker};
use roxmltree::Node;
use sigill_core::Error;
use sigill_xml::document::{attribute_prefix, element_prefix, qualified_name};
use std::collections::{BTreeMap, BTreeSet};

pub(crate) struct Exclusive {
    inclusive_prefixes: BTreeSet<String>,
}

impl Exclusive {
    pub fn new(prefix_list: &[String]) -> Self {
        let inclusive_prefixes = prefix_list
            .iter()
            .map(|p| if p == "#default" { String::new() } else { p.clone() })
            .collect();
        Self { inclusive_prefixes }
    }

    fn utilized_prefixes(&self, node: Node<'_, '_>) -> BTreeSet<String> {
        let mut utilized = self.inclusive_prefixes.clone();
        utilized.insert(element_prefix(node).to_owned());
        for attr in node.attributes() {
            let prefix = attribute_prefix(node, &attr);
            if !prefix.is_empty() {
                utilized.insert(prefix.to_owned());
            }
        }
        utilized.remove("xml");
        utilized
    }
}

impl ElementPolicy for Exclusive {
    type Scope = BTreeMap<String, String>;

    fn open(
        &mut self,
        walker: &Walker<'_>,
        node: Node<'_, '_>,
        scope: &Self::Scope,
        _parent_rendered: bool,
        out: &mut String,
    ) -> Result<(String, Self::Scope), Error> {
        let utilized = self.utilized_prefixes(node);
        let visible_ns = visible_namespaces(walker, node);

        let mut decls = Vec::new();
        for prefix in &utilized {
            match visible_ns.get(prefix) {
                Some(uri) if scope.get(prefix) != Some(uri) => decls.push(NsDecl::new(prefix, uri)),
                Some(_) => {}
                None if prefix.is_empty() && scope.get("").is_some_and(|d| !d.is_empty()) => {
                    decls.push(NsDecl::new("", ""));
                }
                None => {}
            }
        }

        let mut attrs = if walker.attrs_visible() {
            render::element_attrs(node)
        } else {
            Vec::new()
        };

        let qname = qualified_name(node).to_owned();
        render::start_tag(out, &qname, &mut decls, &mut attrs);

        let mut child_scope = scope.clone();
        for d in &decls {
            child_scope.insert(d.prefix.clone(), d.uri.clone());
        }
        // A utilized prefix whose namespace node was filtered out has no
        // rendered binding for descendants to rely on.
        if walker.filters_namespaces() {
            for prefix in &utilized {
                if !visible_ns.contains_key(prefix) {
                    child_scope.remove(prefix);
                }
            }
        }
        Ok((qname, child_scope))
    }

    fn hidden(
        &mut self,
        walker: &Walker<'_>,
        node: Node<'_, '_>,
        scope: &Self::Scope,
        out: &mut String,
    ) -> Self::Scope {
        // Prefixes from the PrefixList follow the inclusive rules, which
        // render selected namespace nodes of omitted elements.
        if walker.filters_namespaces() && !self.inclusive_prefixes.is_empty() {
            let mut decls: Vec<NsDecl> = visible_namespaces(walker, node)
                .iter()
                .filter(|(prefix, _)| self.inclusive_prefixes.contains(*prefix))
                .filter(|(prefix, uri)| scope.get(*prefix) != Some(*uri))
                .map(|(prefix, uri)| NsDecl::new(prefix, uri))
                .collect();
            render::floating_decls(out, &mut decls);
        }
        scope.clone()
    }
}
