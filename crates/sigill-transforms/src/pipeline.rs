#![forbid(unsafe_code)]

//! Transform pipeline: the data flowing between stages, the processing
//! context, and the ordered stage list of one reference.

use crate::stage::TransformStage;
use crate::uri::{self, UriResolver};
use roxmltree::{Node, NodeId};
use sigill_c14n::{C14nMode, CanonicalizationMethod};
use sigill_core::{algorithm, ns, Error, Result, SignatureVersion};
use sigill_xml::document::{child_elements, is_element};
use sigill_xml::NodeSet;

/// Data flowing through the transform pipeline.
#[derive(Debug, Clone)]
pub enum TransformData {
    /// XML text plus the selected nodes (`None` selects the whole
    /// document, comments included).
    Xml {
        xml_text: String,
        node_set: Option<NodeSet>,
        /// The text is the document holding the signature, so node ids
        /// from that document (signature, transform elements) apply.
        same_document: bool,
    },
    /// Character data, as produced by base64 encoding.
    Text(String),
    /// Raw octets.
    Binary(Vec<u8>),
}

impl TransformData {
    /// Octets of this value. Node-sets are serialized with inclusive
    /// C14N 1.0 without comments.
    pub fn to_binary(&self) -> Result<Vec<u8>> {
        match self {
            TransformData::Binary(data) => Ok(data.clone()),
            TransformData::Text(text) => Ok(text.as_bytes().to_vec()),
            TransformData::Xml {
                xml_text, node_set, ..
            } => {
                let mode = C14nMode::new(CanonicalizationMethod::C14n10, false);
                sigill_c14n::canonicalize(xml_text, mode, node_set.as_ref(), &[])
            }
        }
    }

    pub fn into_binary(self) -> Result<Vec<u8>> {
        match self {
            TransformData::Binary(data) => Ok(data),
            TransformData::Text(text) => Ok(text.into_bytes()),
            xml => xml.to_binary(),
        }
    }

    /// XML view of this value; octets and text are parsed as a fresh
    /// document.
    pub fn into_xml(self) -> Result<(String, Option<NodeSet>, bool)> {
        match self {
            TransformData::Xml {
                xml_text,
                node_set,
                same_document,
            } => Ok((xml_text, node_set, same_document)),
            TransformData::Text(text) => Ok((text, None, false)),
            TransformData::Binary(data) => {
                let text = String::from_utf8(data)
                    .map_err(|e| Error::XmlParse(format!("transform input is not UTF-8: {e}")))?;
                Ok((text, None, false))
            }
        }
    }

    pub fn is_xml(&self) -> bool {
        matches!(self, TransformData::Xml { .. })
    }

    fn describe(&self) -> String {
        match self {
            TransformData::Xml { node_set, .. } => match node_set {
                Some(set) => format!("node-set of {} nodes", set.len()),
                None => "whole document".into(),
            },
            TransformData::Text(t) => format!("{} chars of text", t.len()),
            TransformData::Binary(b) => format!("{} octets", b.len()),
        }
    }
}

/// Where a pipeline runs: the signature's document, the `Signature`
/// element within it, ID attribute names and external resources.
#[derive(Clone, Copy)]
pub struct TransformContext<'a> {
    pub document: Option<&'a str>,
    /// The enclosing `Signature` element. `None` while a signature is
    /// being generated and does not yet exist in the document.
    pub signature: Option<NodeId>,
    pub id_attrs: &'a [String],
    pub resolver: &'a UriResolver,
}

impl<'a> TransformContext<'a> {
    pub fn new(resolver: &'a UriResolver) -> Self {
        Self {
            document: None,
            signature: None,
            id_attrs: &[],
            resolver,
        }
    }

    pub fn with_document(mut self, text: &'a str) -> Self {
        self.document = Some(text);
        self
    }

    pub fn with_signature(mut self, signature: NodeId) -> Self {
        self.signature = Some(signature);
        self
    }

    pub fn with_id_attrs(mut self, id_attrs: &'a [String]) -> Self {
        self.id_attrs = id_attrs;
        self
    }
}

/// An ordered list of transform stages, executed strictly in order.
#[derive(Debug, Clone, Default)]
pub struct TransformPipeline {
    stages: Vec<TransformStage>,
}

impl TransformPipeline {
    /// Create an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stage: TransformStage) {
        self.stages.push(stage);
    }

    pub fn stages(&self) -> &[TransformStage] {
        &self.stages
    }

    pub fn stages_mut(&mut self) -> &mut [TransformStage] {
        &mut self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Build the pipeline described by a `Transforms` element.
    ///
    /// Children are `Transform` elements and, under 2.0, a leading
    /// `dsig2:Selection`. Every algorithm must be registered and
    /// permitted by `version`.
    pub fn from_element(transforms: Node<'_, '_>, version: SignatureVersion) -> Result<Self> {
        let mut pipeline = Self::new();
        for child in transforms.children().filter(|n| n.is_element()) {
            let recognised = is_element(child, ns::DSIG, ns::node::TRANSFORM)
                || is_element(child, ns::DSIG2, ns::node::SELECTION);
            if !recognised {
                return Err(Error::XmlStructure(format!(
                    "unexpected <{}> in Transforms",
                    child.tag_name().name()
                )));
            }
            let uri = child.attribute(ns::attr::ALGORITHM).ok_or_else(|| {
                Error::MissingAttribute(format!("Algorithm on {}", child.tag_name().name()))
            })?;
            algorithm::check_permitted(uri, version)?;
            pipeline.push(TransformStage::from_element(child)?);
        }
        Ok(pipeline)
    }

    /// Run every stage over `input`.
    pub fn execute(&self, input: TransformData, ctx: &TransformContext<'_>) -> Result<TransformData> {
        let mut data = input;
        for stage in &self.stages {
            data = stage.execute(data, ctx)?;
            tracing::trace!(stage = stage.uri(), output = %data.describe(), "transform applied");
        }
        Ok(data)
    }

    /// Dereference `uri` and run the pipeline over the result.
    ///
    /// A leading DSIG 2.0 selection supplies its own input, so the
    /// reference URI is not dereferenced then.
    pub fn process(&self, uri: &str, ctx: &TransformContext<'_>) -> Result<TransformData> {
        let input = match self.stages.first() {
            Some(stage) if stage.is_selection() => TransformData::Binary(Vec::new()),
            _ => uri::dereference(uri, ctx)?,
        };
        self.execute(input, ctx)
    }

    /// Run the pipeline and return the octets to digest.
    pub fn process_to_binary(&self, uri: &str, ctx: &TransformContext<'_>) -> Result<Vec<u8>> {
        self.process(uri, ctx)?.into_binary()
    }
}

/// Parse the `Transforms` child of a `Reference`, if any.
pub fn reference_pipeline(reference: Node<'_, '_>, version: SignatureVersion) -> Result<TransformPipeline> {
    match child_elements(reference, ns::DSIG, ns::node::TRANSFORMS).as_slice() {
        [] => Ok(TransformPipeline::new()),
        [transforms] => TransformPipeline::from_element(*transforms, version),
        _ => Err(Error::XmlStructure("more than one Transforms element".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::TransformStage;
    use sigill_xml::document::parse_text;

    const DOC: &str = r#"<root xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><a Id="x">hi<!--c--></a><b>there</b></root>"#;

    #[test]
    fn test_to_binary_of_node_set() {
        let resolver = UriResolver::new();
        let ctx = TransformContext::new(&resolver).with_document(DOC);
        let data = uri::dereference("#x", &ctx).unwrap();
        assert_eq!(
            data.to_binary().unwrap(),
            br#"<a xmlns:ds="http://www.w3.org/2000/09/xmldsig#" Id="x">hi</a>"#
        );
    }

    #[test]
    fn test_pipeline_runs_in_order() {
        let resolver = UriResolver::new();
        let ctx = TransformContext::new(&resolver).with_document(DOC);
        let mut pipeline = TransformPipeline::new();
        pipeline.push(TransformStage::from_uri(algorithm::EXC_C14N).unwrap());
        pipeline.push(TransformStage::Base64Encode);
        pipeline.push(TransformStage::from_uri(algorithm::BASE64).unwrap());
        let out = pipeline.process_to_binary("#x", &ctx).unwrap();
        assert_eq!(out, b"<a Id=\"x\">hi</a>");
        assert_eq!(pipeline.len(), 3);
    }

    #[test]
    fn test_from_element_rejects_unknown_and_gated() {
        let xml = r#"<ds:Transforms xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
            <ds:Transform Algorithm="urn:example:rot13"/>
        </ds:Transforms>"#;
        let doc = parse_text(xml).unwrap();
        let err = TransformPipeline::from_element(doc.root_element(), SignatureVersion::V2_0).unwrap_err();
        assert!(matches!(err, Error::UnsupportedAlgorithm(_)));

        let xml = r#"<ds:Transforms xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
            <ds:Transform Algorithm="http://www.w3.org/2010/xml-c14n2"/>
        </ds:Transforms>"#;
        let doc = parse_text(xml).unwrap();
        let err = TransformPipeline::from_element(doc.root_element(), SignatureVersion::V1_1).unwrap_err();
        assert!(matches!(err, Error::UnsupportedAlgorithm(_)));
        let ok = TransformPipeline::from_element(doc.root_element(), SignatureVersion::V2_0).unwrap();
        assert_eq!(ok.stages()[0].uri(), algorithm::C14N20);
    }

    #[test]
    fn test_binary_parsed_as_xml() {
        let data = TransformData::Binary(b"<x>1</x>".to_vec());
        let (text, set, same) = data.into_xml().unwrap();
        assert_eq!(text, "<x>1</x>");
        assert!(set.is_none());
        assert!(!same);
        assert!(TransformData::Binary(vec![0xff, 0xfe]).into_xml().is_err());
    }
}
