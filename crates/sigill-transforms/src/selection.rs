#![forbid(unsafe_code)]

//! XML-DSig 2.0 selections.
//!
//! A `dsig2:Selection` replaces URI dereferencing: it names its own
//! input and ignores whatever the pipeline hands it.

use crate::base64_transform;
use crate::pipeline::{TransformContext, TransformData};
use crate::uri;
use crate::xpath_filter::{self, BoundXPath};
use roxmltree::Node;
use sigill_core::{algorithm, ns, Error, Result};
use sigill_xml::document::{build_id_map, child_elements, parse_text};
use sigill_xml::NodeSet;

/// What a selection produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionKind {
    /// A node-set, narrowed by included and excluded XPaths.
    Xml,
    /// The octets of an external resource.
    BinaryExternal,
    /// The base64-decoded text of a same-document element.
    BinaryFromBase64,
}

impl SelectionKind {
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            algorithm::DSIG2_XML_SELECTION => Some(SelectionKind::Xml),
            algorithm::DSIG2_BINARY_EXTERNAL => Some(SelectionKind::BinaryExternal),
            algorithm::DSIG2_BINARY_FROM_BASE64 => Some(SelectionKind::BinaryFromBase64),
            _ => None,
        }
    }

    pub fn uri(self) -> &'static str {
        match self {
            SelectionKind::Xml => algorithm::DSIG2_XML_SELECTION,
            SelectionKind::BinaryExternal => algorithm::DSIG2_BINARY_EXTERNAL,
            SelectionKind::BinaryFromBase64 => algorithm::DSIG2_BINARY_FROM_BASE64,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Selection {
    pub kind: SelectionKind,
    pub uri: String,
    pub included: Vec<BoundXPath>,
    pub excluded: Vec<BoundXPath>,
}

impl Selection {
    pub fn new(kind: SelectionKind, uri: impl Into<String>) -> Self {
        Self {
            kind,
            uri: uri.into(),
            included: Vec::new(),
            excluded: Vec::new(),
        }
    }

    /// Read the `URI` attribute and the `IncludedXPath` /
    /// `ExcludedXPath` children of a selection element.
    pub(crate) fn from_element(kind: SelectionKind, element: Node<'_, '_>) -> Result<Self> {
        let uri = element.attribute(ns::attr::URI).unwrap_or("");
        let mut selection = Self::new(kind, uri);
        for el in child_elements(element, ns::DSIG2, ns::node::INCLUDED_XPATH) {
            selection.included.push(BoundXPath::from_element(el)?);
        }
        for el in child_elements(element, ns::DSIG2, ns::node::EXCLUDED_XPATH) {
            selection.excluded.push(BoundXPath::from_element(el)?);
        }
        if kind != SelectionKind::Xml && !(selection.included.is_empty() && selection.excluded.is_empty()) {
            return Err(Error::MalformedInput(format!(
                "XPath parameters are only valid on {}",
                algorithm::DSIG2_XML_SELECTION
            )));
        }
        Ok(selection)
    }

    pub(crate) fn execute(&self, ctx: &TransformContext<'_>) -> Result<TransformData> {
        match self.kind {
            SelectionKind::BinaryExternal => Ok(TransformData::Binary(ctx.resolver.fetch(&self.uri)?)),
            SelectionKind::BinaryFromBase64 => {
                let data = uri::dereference(&self.uri, ctx)?;
                if !data.is_xml() {
                    return Err(Error::Transform(format!(
                        "{} must select a same-document element",
                        algorithm::DSIG2_BINARY_FROM_BASE64
                    )));
                }
                base64_transform::decode(data)
            }
            SelectionKind::Xml => {
                let (xml_text, node_set, same_document) = uri::dereference(&self.uri, ctx)?.into_xml()?;
                let doc = parse_text(&xml_text)?;
                let mut set = node_set.unwrap_or_else(|| NodeSet::all(&doc));
                let ids = build_id_map(&doc, ctx.id_attrs);
                let here_valid = same_document && ctx.signature.is_some();
                if !self.included.is_empty() {
                    let mut included = NodeSet::new();
                    for xpath in &self.included {
                        included = included.union(&xpath_filter::select_subtrees(&doc, xpath, &ids, here_valid)?);
                    }
                    set = set.intersection(&included);
                }
                for xpath in &self.excluded {
                    set = set.subtract(&xpath_filter::select_subtrees(&doc, xpath, &ids, here_valid)?);
                }
                Ok(TransformData::Xml {
                    xml_text,
                    node_set: Some(set),
                    same_document,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uri::UriResolver;

    const DOC: &str = r#"<doc><payload Id="p">aGVsbG8=</payload><keep><x>1</x><drop>2</drop></keep></doc>"#;

    #[test]
    fn test_xml_selection_include_exclude() {
        let resolver = UriResolver::new();
        let ctx = TransformContext::new(&resolver).with_document(DOC);
        let mut selection = Selection::new(SelectionKind::Xml, "");
        selection.included.push(BoundXPath::new("//keep").unwrap());
        selection.excluded.push(BoundXPath::new("//drop").unwrap());
        let out = selection.execute(&ctx).unwrap();
        assert_eq!(out.into_binary().unwrap(), b"<keep><x>1</x></keep>");
    }

    #[test]
    fn test_binary_from_base64() {
        let resolver = UriResolver::new();
        let ctx = TransformContext::new(&resolver).with_document(DOC);
        let selection = Selection::new(SelectionKind::BinaryFromBase64, "#p");
        assert_eq!(selection.execute(&ctx).unwrap().into_binary().unwrap(), b"hello");
    }

    #[test]
    fn test_binary_external() {
        let mut resolver = UriResolver::new();
        resolver.add_resource("urn:blob", vec![1, 2, 3]);
        let ctx = TransformContext::new(&resolver);
        let selection = Selection::new(SelectionKind::BinaryExternal, "urn:blob");
        assert_eq!(selection.execute(&ctx).unwrap().into_binary().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_parameters_only_on_xml_selection() {
        let xml = r#"<dsig2:Selection xmlns:dsig2="http://www.w3.org/2010/xmldsig2#" URI="urn:blob">
            <dsig2:IncludedXPath>//a</dsig2:IncludedXPath>
        </dsig2:Selection>"#;
        let doc = parse_text(xml).unwrap();
        let err = Selection::from_element(SelectionKind::BinaryExternal, doc.root_element()).unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)));
        let ok = Selection::from_element(SelectionKind::Xml, doc.root_element()).unwrap();
        assert_eq!(ok.included.len(), 1);
        assert_eq!(ok.uri, "urn:blob");
    }

    #[test]
    fn test_kind_uris() {
        for kind in [SelectionKind::Xml, SelectionKind::BinaryExternal, SelectionKind::BinaryFromBase64] {
            assert_eq!(SelectionKind::from_uri(kind.uri()), Some(kind));
        }
        assert_eq!(SelectionKind::from_uri(algorithm::BASE64), None);
    }
}
