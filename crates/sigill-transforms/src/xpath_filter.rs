#![forbid(unsafe_code)]

//! XPath (XML-DSig 1.0) and XPath Filter 2.0 transforms.
//!
//! The 1.0 transform evaluates its expression once per input node and
//! keeps the nodes for which it is true. Attributes travel with their
//! element, so the expression is evaluated on tree nodes only.
//!
//! Filter 2.0 evaluates each expression once from the document root,
//! expands every selected node to its subtree, and combines the results
//! into a filter that the input is finally intersected with.

use crate::pipeline::{TransformContext, TransformData};
use roxmltree::{Document, Node, NodeId};
use sigill_core::{ns, Error, Result};
use sigill_xml::document::{build_id_map, in_scope_namespaces, parse_text};
use sigill_xml::{NodeSet, XNode, XPath, XPathContext};
use std::collections::HashMap;

/// A compiled expression plus the prefix bindings and `here()` node it
/// is evaluated with.
#[derive(Debug, Clone)]
pub struct BoundXPath {
    pub expr: XPath,
    /// `(prefix, uri)` bindings in scope at the parameter element.
    pub namespaces: Vec<(String, String)>,
    /// The parameter element in the signature's document.
    pub here: Option<NodeId>,
}

impl BoundXPath {
    pub fn new(expr: &str) -> Result<Self> {
        Ok(Self {
            expr: XPath::parse(expr)?,
            namespaces: Vec::new(),
            here: None,
        })
    }

    pub fn with_namespace(mut self, prefix: &str, uri: &str) -> Self {
        self.namespaces.push((prefix.to_owned(), uri.to_owned()));
        self
    }

    /// Compile the text of a parameter element, binding its in-scope
    /// prefixes and remembering it as the `here()` node.
    pub fn from_element(element: Node<'_, '_>) -> Result<Self> {
        let text: String = element
            .children()
            .filter(|n| n.is_text())
            .filter_map(|n| n.text())
            .collect();
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::MalformedInput(format!(
                "empty <{}> expression",
                element.tag_name().name()
            )));
        }
        let namespaces = in_scope_namespaces(element)
            .into_iter()
            .filter(|(prefix, _)| !prefix.is_empty())
            .map(|(p, u)| (p.to_owned(), u.to_owned()))
            .collect();
        Ok(Self {
            expr: XPath::parse(text)?,
            namespaces,
            here: Some(element.id()),
        })
    }

    pub fn source(&self) -> &str {
        self.expr.source()
    }

    fn context<'a, 'input>(
        &self,
        doc: &'a Document<'input>,
        ids: &'a HashMap<String, NodeId>,
        here_valid: bool,
    ) -> XPathContext<'a, 'input> {
        let mut ctx = XPathContext::new(doc).with_ids(ids);
        for (prefix, uri) in &self.namespaces {
            ctx = ctx.with_namespace(prefix, uri);
        }
        match self.here {
            Some(here) if here_valid => ctx.with_here(here),
            _ => ctx,
        }
    }
}

/// How a Filter 2.0 step combines with the filter built so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Intersect,
    Subtract,
    Union,
}

impl FilterOp {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            ns::XPATH2_FILTER_INTERSECT => Ok(FilterOp::Intersect),
            ns::XPATH2_FILTER_SUBTRACT => Ok(FilterOp::Subtract),
            ns::XPATH2_FILTER_UNION => Ok(FilterOp::Union),
            other => Err(Error::MalformedInput(format!("unknown XPath filter type {other:?}"))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FilterOp::Intersect => ns::XPATH2_FILTER_INTERSECT,
            FilterOp::Subtract => ns::XPATH2_FILTER_SUBTRACT,
            FilterOp::Union => ns::XPATH2_FILTER_UNION,
        }
    }
}

/// One `dsig-xpath:XPath` element of a Filter 2.0 transform.
#[derive(Debug, Clone)]
pub struct Filter2Step {
    pub op: FilterOp,
    pub xpath: BoundXPath,
}

/// `here()` only names a node of the text being filtered when that text
/// is the document the signature lives in.
fn here_valid(same_document: bool, ctx: &TransformContext<'_>) -> bool {
    same_document && ctx.signature.is_some()
}

/// Apply an XML-DSig 1.0 XPath transform.
pub(crate) fn apply_xpath(
    filter: &BoundXPath,
    data: TransformData,
    ctx: &TransformContext<'_>,
) -> Result<TransformData> {
    let (xml_text, node_set, same_document) = data.into_xml()?;
    let doc = parse_text(&xml_text)?;
    let ids = build_id_map(&doc, ctx.id_attrs);
    let xctx = filter.context(&doc, &ids, here_valid(same_document, ctx));

    let input = node_set.unwrap_or_else(|| NodeSet::all(&doc));
    let mut rejected = NodeSet::new();
    for node in doc.descendants().filter(|n| input.contains(n.id())) {
        if !filter.expr.matches(&xctx, XNode::Node(node.id()))? {
            rejected.insert(node.id());
        }
    }
    let output = input.subtract(&rejected);
    tracing::debug!(
        xpath = filter.source(),
        kept = output.len(),
        dropped = rejected.len(),
        "XPath transform"
    );
    Ok(TransformData::Xml {
        xml_text,
        node_set: Some(output),
        same_document,
    })
}

/// Apply an XPath Filter 2.0 transform.
pub(crate) fn apply_filter2(
    steps: &[Filter2Step],
    data: TransformData,
    ctx: &TransformContext<'_>,
) -> Result<TransformData> {
    let (xml_text, node_set, same_document) = data.into_xml()?;
    let doc = parse_text(&xml_text)?;
    let ids = build_id_map(&doc, ctx.id_attrs);

    let mut filter = NodeSet::all(&doc);
    for step in steps {
        let selected = select_subtrees(&doc, &step.xpath, &ids, here_valid(same_document, ctx))?;
        filter = match step.op {
            FilterOp::Intersect => filter.intersection(&selected),
            FilterOp::Subtract => filter.subtract(&selected),
            FilterOp::Union => filter.union(&selected),
        };
    }

    let input = node_set.unwrap_or_else(|| NodeSet::all(&doc));
    Ok(TransformData::Xml {
        xml_text,
        node_set: Some(input.intersection(&filter)),
        same_document,
    })
}

/// Evaluate `xpath` from the document root and expand every selected
/// tree node to its subtree.
pub(crate) fn select_subtrees(
    doc: &Document<'_>,
    xpath: &BoundXPath,
    ids: &HashMap<String, NodeId>,
    here_valid: bool,
) -> Result<NodeSet> {
    let xctx = xpath.context(doc, ids, here_valid);
    let mut out = NodeSet::new();
    for hit in xpath.expr.select(&xctx, XNode::Node(doc.root().id()))? {
        let XNode::Node(id) = hit else { continue };
        let Some(node) = doc.get_node(id) else { continue };
        for n in node.descendants() {
            out.insert(n.id());
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uri::UriResolver;

    const DOC: &str = r#"<Doc xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><a>1</a><b><c>2</c></b><ds:Signature><ds:SignatureValue>x</ds:SignatureValue></ds:Signature></Doc>"#;

    fn render(data: TransformData) -> String {
        String::from_utf8(data.into_binary().unwrap()).unwrap()
    }

    fn whole(doc: &str) -> TransformData {
        TransformData::Xml {
            xml_text: doc.to_owned(),
            node_set: None,
            same_document: true,
        }
    }

    #[test]
    fn test_xpath_excludes_signature() {
        let resolver = UriResolver::new();
        let ctx = TransformContext::new(&resolver).with_document(DOC);
        let filter = BoundXPath::new("not(ancestor-or-self::ds:Signature)")
            .unwrap()
            .with_namespace("ds", ns::DSIG);
        let out = apply_xpath(&filter, whole(DOC), &ctx).unwrap();
        assert_eq!(
            render(out),
            r#"<Doc xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><a>1</a><b><c>2</c></b></Doc>"#
        );
    }

    #[test]
    fn test_xpath_hidden_element_keeps_children() {
        let resolver = UriResolver::new();
        let ctx = TransformContext::new(&resolver);
        let filter = BoundXPath::new("not(self::b)").unwrap();
        let out = apply_xpath(&filter, whole("<r><b><c>2</c></b></r>"), &ctx).unwrap();
        assert_eq!(render(out), "<r><c>2</c></r>");
    }

    #[test]
    fn test_filter2_subtract_then_union() {
        let resolver = UriResolver::new();
        let ctx = TransformContext::new(&resolver);
        let steps = vec![
            Filter2Step {
                op: FilterOp::Subtract,
                xpath: BoundXPath::new("//b").unwrap(),
            },
            Filter2Step {
                op: FilterOp::Union,
                xpath: BoundXPath::new("//c").unwrap(),
            },
        ];
        let out = apply_filter2(&steps, whole(DOC), &ctx).unwrap();
        let text = render(out);
        assert!(text.contains("<a>1</a>"));
        assert!(text.contains("<c>2</c>"));
        assert!(!text.contains("<b>"));
    }

    #[test]
    fn test_filter2_intersect_selects_subtree() {
        let resolver = UriResolver::new();
        let ctx = TransformContext::new(&resolver);
        let steps = vec![Filter2Step {
            op: FilterOp::Intersect,
            xpath: BoundXPath::new("//b").unwrap(),
        }];
        let out = apply_filter2(&steps, whole(DOC), &ctx).unwrap();
        assert_eq!(
            render(out),
            r#"<b xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><c>2</c></b>"#
        );
    }

    #[test]
    fn test_filter_op_names() {
        assert_eq!(FilterOp::parse("union").unwrap(), FilterOp::Union);
        assert_eq!(FilterOp::Subtract.as_str(), "subtract");
        assert!(matches!(FilterOp::parse("xor"), Err(Error::MalformedInput(_))));
    }

    #[test]
    fn test_parameter_element_binds_prefixes() {
        let xml = r#"<ds:XPath xmlns:ds="http://www.w3.org/2000/09/xmldsig#" xmlns:p="urn:p"> //p:x </ds:XPath>"#;
        let doc = parse_text(xml).unwrap();
        let bound = BoundXPath::from_element(doc.root_element()).unwrap();
        assert_eq!(bound.source(), "//p:x");
        assert!(bound.namespaces.contains(&("p".to_owned(), "urn:p".to_owned())));
        assert_eq!(bound.here, Some(doc.root_element().id()));

        let empty = parse_text("<XPath> </XPath>").unwrap();
        assert!(BoundXPath::from_element(empty.root_element()).is_err());
    }
}
