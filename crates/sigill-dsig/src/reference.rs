#![forbid(unsafe_code)]

//! `Reference` handling shared by signing and validation: the in-memory
//! reference description, digest computation through the transform
//! pipeline, and `SignedInfo` canonicalization.

use roxmltree::{Document, Node};
use sigill_core::{algorithm, ns, Error, Family, Result, SignatureVersion};
use sigill_transforms::{TransformContext, TransformPipeline, TransformStage};
use sigill_xml::document::build_id_map;
use sigill_xml::XmlWriter;

/// A reference to be signed: its URI, optional `Id` and `Type`, its
/// transform chain and digest method.
#[derive(Debug, Clone)]
pub struct Reference {
    /// `None` omits the `URI` attribute (DSIG 2.0 selections carry their
    /// own).
    pub uri: Option<String>,
    pub id: Option<String>,
    pub type_uri: Option<String>,
    pub transforms: TransformPipeline,
    /// `None` uses the processor's digest algorithm.
    pub digest_method: Option<&'static str>,
}

impl Reference {
    pub fn new(uri: &str) -> Self {
        Self {
            uri: Some(uri.to_owned()),
            id: None,
            type_uri: None,
            transforms: TransformPipeline::new(),
            digest_method: None,
        }
    }

    /// A reference whose input comes from a DSIG 2.0 selection.
    pub fn from_selection(selection: TransformStage) -> Result<Self> {
        if !selection.is_selection() {
            return Err(Error::Transform(format!("{} is not a selection", selection.uri())));
        }
        let mut transforms = TransformPipeline::new();
        transforms.push(selection);
        Ok(Self {
            uri: None,
            id: None,
            type_uri: None,
            transforms,
            digest_method: None,
        })
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_owned());
        self
    }

    pub fn with_type(mut self, type_uri: &str) -> Self {
        self.type_uri = Some(type_uri.to_owned());
        self
    }

    pub fn with_transform(mut self, stage: TransformStage) -> Self {
        self.transforms.push(stage);
        self
    }

    /// Digest with `uri` instead of the processor default.
    pub fn with_digest_method(mut self, uri: &str) -> Result<Self> {
        let alg = sigill_core::AlgorithmUri::parse(uri)?;
        if alg.family() != Family::Digest {
            return Err(Error::UnsupportedAlgorithm(format!("{uri} is not a digest algorithm")));
        }
        self.digest_method = Some(alg.as_str());
        Ok(self)
    }

    /// The URI the reference's input is dereferenced from: a leading
    /// selection's own URI, else the `URI` attribute.
    pub(crate) fn source_uri(&self) -> &str {
        match self.transforms.stages().first() {
            Some(TransformStage::Selection(selection)) => selection.uri.as_str(),
            _ => self.uri.as_deref().unwrap_or(""),
        }
    }

    /// Fail unless every algorithm of this reference is permitted by
    /// `version`.
    pub(crate) fn check_version(&self, version: SignatureVersion, digest_uri: &str) -> Result<()> {
        algorithm::check_permitted(digest_uri, version)?;
        for stage in self.transforms.stages() {
            algorithm::check_permitted(stage.uri(), version)?;
        }
        Ok(())
    }

    /// Run the transform chain and digest the result.
    pub(crate) fn compute_digest(&self, digest_uri: &str, ctx: &TransformContext<'_>) -> Result<Vec<u8>> {
        let uri = self.uri.as_deref().unwrap_or("");
        let data = self.transforms.process_to_binary(uri, ctx)?;
        tracing::debug!(uri, bytes = data.len(), digest = digest_uri, "pre-digest data");
        sigill_crypto::digest::digest(digest_uri, &data)
    }

    /// Write the `Reference` element with `prefix` as the already
    /// declared DSig prefix.
    pub(crate) fn write(&self, w: &mut XmlWriter, prefix: &str, digest_uri: &str, digest: &[u8]) -> Result<()> {
        self.write_with(w, prefix, &[], digest_uri, digest)
    }

    /// As [`Reference::write`], with `extra` attributes (such as a
    /// namespace declaration) leading the element's own.
    pub(crate) fn write_with(
        &self,
        w: &mut XmlWriter,
        prefix: &str,
        extra: &[(&str, &str)],
        digest_uri: &str,
        digest: &[u8],
    ) -> Result<()> {
        use base64::Engine;

        let name = qname(prefix, ns::node::REFERENCE);
        let mut attrs: Vec<(&str, &str)> = extra.to_vec();
        if let Some(id) = &self.id {
            attrs.push((ns::attr::ID, id.as_str()));
        }
        if let Some(uri) = &self.uri {
            attrs.push((ns::attr::URI, uri.as_str()));
        }
        if let Some(type_uri) = &self.type_uri {
            attrs.push((ns::attr::TYPE, type_uri.as_str()));
        }
        w.start_element(&name, &attrs)?;
        if !self.transforms.is_empty() {
            let transforms = qname(prefix, ns::node::TRANSFORMS);
            w.start_element(&transforms, &[])?;
            for stage in self.transforms.stages() {
                stage.write_element(w, prefix)?;
            }
            w.end_element(&transforms)?;
        }
        w.empty_element(&qname(prefix, ns::node::DIGEST_METHOD), &[(ns::attr::ALGORITHM, digest_uri)])?;
        w.text_element(
            &qname(prefix, ns::node::DIGEST_VALUE),
            &[],
            &base64::engine::general_purpose::STANDARD.encode(digest),
        )?;
        w.end_element(&name)
    }
}

/// A parsed `Reference` element.
pub(crate) struct ParsedReference<'a> {
    pub uri: &'a str,
    pub type_uri: Option<&'a str>,
    pub pipeline: TransformPipeline,
    pub digest_uri: &'a str,
    pub digest_value: Vec<u8>,
}

impl<'a> ParsedReference<'a> {
    pub fn parse(node: Node<'a, '_>, version: SignatureVersion) -> Result<Self> {
        let digest_method = sigill_xml::document::child_element(node, ns::DSIG, ns::node::DIGEST_METHOD)
            .ok_or_else(|| Error::MissingElement("DigestMethod".into()))?;
        let digest_uri = digest_method
            .attribute(ns::attr::ALGORITHM)
            .ok_or_else(|| Error::MissingAttribute("Algorithm on DigestMethod".into()))?;
        let alg = algorithm::check_permitted(digest_uri, version)?;
        if alg.family() != Family::Digest {
            return Err(Error::UnsupportedAlgorithm(format!("{digest_uri} is not a digest algorithm")));
        }
        let digest_value = sigill_xml::document::child_element(node, ns::DSIG, ns::node::DIGEST_VALUE)
            .ok_or_else(|| Error::MissingElement("DigestValue".into()))?;
        let digest_value = sigill_transforms::base64_transform::decode_text(digest_value.text().unwrap_or(""))?;

        Ok(Self {
            uri: node.attribute(ns::attr::URI).unwrap_or(""),
            type_uri: node.attribute(ns::attr::TYPE),
            pipeline: sigill_transforms::reference_pipeline(node, version)?,
            digest_uri,
            digest_value,
        })
    }

    /// The URI whose target decides which document the reference is
    /// resolved in.
    pub fn source_uri(&self) -> &str {
        match self.pipeline.stages().first() {
            Some(TransformStage::Selection(selection)) => selection.uri.as_str(),
            _ => self.uri,
        }
    }

    pub fn compute_digest(&self, ctx: &TransformContext<'_>) -> Result<Vec<u8>> {
        let data = self.pipeline.process_to_binary(self.uri, ctx)?;
        tracing::debug!(uri = self.uri, bytes = data.len(), "pre-digest data");
        sigill_crypto::digest::digest(self.digest_uri, &data)
    }
}

/// The ID named by a same-document fragment URI (`#id` or
/// `#xpointer(id('id'))`).
pub(crate) fn fragment_id(uri: &str) -> Option<&str> {
    let fragment = uri.strip_prefix('#')?;
    match fragment.strip_prefix("xpointer(") {
        Some(pointer) => pointer
            .strip_suffix(')')?
            .strip_prefix("id(")?
            .strip_suffix(')')
            .map(|id| id.trim_matches(|c| c == '\'' || c == '"')),
        None => Some(fragment),
    }
}

/// Whether `uri` names an element carrying an ID in `doc`.
pub(crate) fn resolves_in(doc: &Document<'_>, id_attrs: &[String], uri: &str) -> bool {
    fragment_id(uri).is_some_and(|id| build_id_map(doc, id_attrs).contains_key(id))
}

/// Canonicalize `SignedInfo` with the method it declares itself.
pub(crate) fn canonicalize_signed_info(signed_info: Node<'_, '_>, version: SignatureVersion) -> Result<Vec<u8>> {
    let method = sigill_xml::document::child_element(signed_info, ns::DSIG, ns::node::CANONICALIZATION_METHOD)
        .ok_or_else(|| Error::MissingElement("CanonicalizationMethod".into()))?;
    let uri = method
        .attribute(ns::attr::ALGORITHM)
        .ok_or_else(|| Error::MissingAttribute("Algorithm on CanonicalizationMethod".into()))?;
    algorithm::check_permitted(uri, version)?;
    let TransformStage::Canonicalize(params) = TransformStage::from_element(method)? else {
        return Err(Error::UnsupportedAlgorithm(format!("{uri} is not a canonicalization method")));
    };
    let canonical = params.canonicalizer().canonicalize_element(signed_info)?;
    tracing::debug!(method = uri, bytes = canonical.len(), "pre-signature data");
    Ok(canonical)
}

pub(crate) fn qname(prefix: &str, local: &str) -> String {
    if prefix.is_empty() {
        local.to_owned()
    } else {
        format!("{prefix}:{local}")
    }
}
