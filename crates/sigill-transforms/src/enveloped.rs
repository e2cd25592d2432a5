#![forbid(unsafe_code)]

//! Enveloped signature transform.
//!
//! Removes the enclosing `<Signature>` element and its descendants from
//! the node set.

use crate::pipeline::{TransformContext, TransformData};
use sigill_core::{Error, Result};
use sigill_xml::document::parse_text;
use sigill_xml::NodeSet;

pub(crate) fn apply(input: TransformData, ctx: &TransformContext<'_>) -> Result<TransformData> {
    let TransformData::Xml {
        xml_text,
        node_set,
        same_document,
    } = input
    else {
        return Err(Error::Transform(
            "enveloped-signature transform requires XML input".into(),
        ));
    };

    let Some(signature) = ctx.signature else {
        return Err(Error::Transform(
            "enveloped-signature transform has no enclosing Signature in scope".into(),
        ));
    };
    if !same_document {
        return Err(Error::Transform(
            "enveloped-signature transform applied outside the signature's document".into(),
        ));
    }

    let doc = parse_text(&xml_text)?;
    let sig = doc
        .get_node(signature)
        .filter(|n| n.is_element())
        .ok_or_else(|| Error::Transform("Signature element not found in document".into()))?;
    let mut set = node_set.unwrap_or_else(|| NodeSet::all(&doc));
    set.remove_subtree(sig);
    tracing::trace!(remaining = set.len(), "enveloped signature removed");

    Ok(TransformData::Xml {
        xml_text,
        node_set: Some(set),
        same_document,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uri::UriResolver;
    use sigill_core::ns;
    use sigill_xml::document::child_element;

    const DOC: &str = r#"<doc><v>1</v><ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:SignatureValue>AA==</ds:SignatureValue></ds:Signature></doc>"#;

    fn xml(same_document: bool) -> TransformData {
        TransformData::Xml {
            xml_text: DOC.into(),
            node_set: None,
            same_document,
        }
    }

    #[test]
    fn test_removes_signature_subtree() {
        let doc = parse_text(DOC).unwrap();
        let sig = child_element(doc.root_element(), ns::DSIG, ns::node::SIGNATURE).unwrap();
        let resolver = UriResolver::new();
        let ctx = TransformContext::new(&resolver)
            .with_document(DOC)
            .with_signature(sig.id());

        let out = apply(xml(true), &ctx).unwrap();
        assert_eq!(out.into_binary().unwrap(), b"<doc><v>1</v></doc>");
        assert!(apply(xml(false), &ctx).is_err());
        assert!(apply(TransformData::Binary(Vec::new()), &ctx).is_err());
    }

    #[test]
    fn test_no_signature_in_scope() {
        let resolver = UriResolver::new();
        let ctx = TransformContext::new(&resolver).with_document(DOC);
        let err = apply(xml(true), &ctx).unwrap_err();
        assert!(matches!(err, Error::Transform(_)));
    }
}
