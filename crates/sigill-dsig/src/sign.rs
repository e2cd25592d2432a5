#![forbid(unsafe_code)]

//! XML-DSig signature creation.
//!
//! A [`SignatureProcessor`] accumulates references (directly or through an
//! internal `Manifest`), digests each through its transform chain,
//! assembles `SignedInfo`, canonicalizes it with its declared method and
//! signs the canonical bytes. Enveloped, enveloping and detached layouts
//! are supported.

use crate::context::DsigContext;
use crate::reference::{self, qname, Reference};
use crate::verify::{self, Documents, VerifyResult};
use base64::Engine;
use roxmltree::{Document, Node};
use sigill_c14n::{C14nMode, CanonicalizationMethod};
use sigill_core::{algorithm, ns, Error, Family, Result, SignatureVersion};
use sigill_crypto::SignatureMethod;
use sigill_keys::{KeyHandle, KeyUsage};
use sigill_transforms::{C14nParams, TransformStage};
use sigill_xml::document::{child_element, is_element, parse_text, qualified_name, source_text};
use sigill_xml::XmlWriter;

const PREFIX: &str = "ds";
const MANIFEST_ID: &str = "manifest";
const PROPERTIES_ID: &str = "props";
const EMBEDDING_SIGNATURE_ID: &str = "signature";

fn ds(local: &str) -> String {
    qname(PREFIX, local)
}

fn exclusive_c14n() -> Result<TransformStage> {
    TransformStage::from_uri(algorithm::EXC_C14N)
}

/// Builds and checks XML signatures for one signature version.
///
/// Algorithm and key problems are reported by the setters; generation
/// only fails on malformed input or an incomplete configuration.
#[derive(Debug, Clone)]
pub struct SignatureProcessor {
    ctx: DsigContext,
    digest_uri: &'static str,
    canonicalization: C14nParams,
    signature: Option<SignatureMethod>,
    hmac_output_length: Option<usize>,
    signature_id: Option<String>,
    enveloped: bool,
    references: Vec<Reference>,
    manifest: Vec<Reference>,
}

impl SignatureProcessor {
    pub fn new(version: SignatureVersion) -> Self {
        Self::with_context(DsigContext::new(version))
    }

    pub fn with_context(ctx: DsigContext) -> Self {
        let digest_uri = match ctx.version {
            SignatureVersion::V1_0 => algorithm::SHA1,
            _ => algorithm::SHA256,
        };
        Self {
            ctx,
            digest_uri,
            canonicalization: C14nParams::new(C14nMode::new(CanonicalizationMethod::ExclusiveC14n10, false)),
            signature: None,
            hmac_output_length: None,
            signature_id: None,
            enveloped: false,
            references: Vec::new(),
            manifest: Vec::new(),
        }
    }

    pub fn context(&self) -> &DsigContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut DsigContext {
        &mut self.ctx
    }

    pub fn version(&self) -> SignatureVersion {
        self.ctx.version
    }

    /// Digest algorithm for references that do not name their own.
    pub fn set_digest_algorithm(&mut self, uri: &str) -> Result<()> {
        let alg = algorithm::check_permitted(uri, self.ctx.version)?;
        if alg.family() != Family::Digest {
            return Err(Error::UnsupportedAlgorithm(format!("{uri} is not a digest algorithm")));
        }
        self.digest_uri = alg.as_str();
        Ok(())
    }

    pub fn digest_algorithm(&self) -> &'static str {
        self.digest_uri
    }

    /// Sign with `uri` and `key`. Fails when the version does not permit
    /// the algorithm or the key does not fit it.
    pub fn set_signature_algorithm(&mut self, uri: &str, key: KeyHandle) -> Result<()> {
        let alg = algorithm::check_permitted(uri, self.ctx.version)?;
        if !matches!(alg.family(), Family::Signature | Family::Mac) {
            return Err(Error::UnsupportedAlgorithm(format!("{uri} is not a signature algorithm")));
        }
        self.signature = Some(SignatureMethod::from_uri(alg.as_str(), key)?);
        self.hmac_output_length = None;
        Ok(())
    }

    /// Truncate an HMAC signature to `bits`.
    pub fn set_hmac_output_length(&mut self, bits: usize) -> Result<()> {
        let method = self
            .signature
            .as_mut()
            .ok_or_else(|| Error::MalformedInput("HMACOutputLength set before the signature algorithm".into()))?;
        method.set_hmac_output_length(bits)?;
        self.hmac_output_length = Some(bits);
        Ok(())
    }

    /// Canonicalization method declared in `SignedInfo`.
    pub fn set_canonicalization_method(&mut self, uri: &str) -> Result<()> {
        algorithm::check_permitted(uri, self.ctx.version)?;
        match TransformStage::from_uri(uri)? {
            TransformStage::Canonicalize(params) => {
                self.canonicalization = params;
                Ok(())
            }
            _ => Err(Error::UnsupportedAlgorithm(format!("{uri} is not a canonicalization method"))),
        }
    }

    /// As [`SignatureProcessor::set_canonicalization_method`], with
    /// parameters such as an inclusive prefix list.
    pub fn set_canonicalization_params(&mut self, params: C14nParams) -> Result<()> {
        algorithm::check_permitted(params.mode.uri(), self.ctx.version)?;
        self.canonicalization = params;
        Ok(())
    }

    /// Place the signature inside the signed document and strip it with
    /// the enveloped-signature transform.
    pub fn set_use_enveloped_signature_transform(&mut self, enveloped: bool) {
        self.enveloped = enveloped;
    }

    pub fn set_signature_id(&mut self, id: &str) {
        self.signature_id = Some(id.to_owned());
    }

    pub fn add_reference(&mut self, reference: Reference) {
        self.references.push(reference);
    }

    /// Add `reference` to the internal `Manifest`, which `SignedInfo`
    /// then references as a whole.
    pub fn append_manifest_reference(&mut self, reference: Reference) {
        self.manifest.push(reference);
    }

    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    pub fn manifest_references(&self) -> &[Reference] {
        &self.manifest
    }

    /// Sign the accumulated references.
    ///
    /// `document` is the document same-document references and `URI=""`
    /// resolve in. With the enveloped transform enabled the result is
    /// that document with the `Signature` appended to its root element;
    /// otherwise it is the `Signature` element alone.
    pub fn generate_signature_document(&self, document: Option<&str>) -> Result<String> {
        self.assemble(self.references.clone(), String::new(), document, self.signature_id.as_deref())
    }

    /// An enveloping signature: the root element of `document` is carried
    /// in `Object/SignatureProperties/SignatureProperty` and signed by ID.
    pub fn signature_for_embedded_document(&self, document: &str) -> Result<String> {
        if self.enveloped {
            return Err(Error::MalformedInput(
                "an enveloping signature cannot use the enveloped-signature transform".into(),
            ));
        }
        let doc = parse_text(document)?;
        let signature_id = self.signature_id.as_deref().unwrap_or(EMBEDDING_SIGNATURE_ID);
        let target = format!("#{signature_id}");

        let mut w = XmlWriter::new();
        w.start_element(&ds(ns::node::OBJECT), &[])?;
        w.start_element(&ds(ns::node::SIGNATURE_PROPERTIES), &[(ns::attr::ID, PROPERTIES_ID)])?;
        w.start_element(&ds(ns::node::SIGNATURE_PROPERTY), &[(ns::attr::TARGET, target.as_str())])?;
        w.write_raw(source_text(doc.root_element()));
        w.end_element(&ds(ns::node::SIGNATURE_PROPERTY))?;
        w.end_element(&ds(ns::node::SIGNATURE_PROPERTIES))?;
        w.end_element(&ds(ns::node::OBJECT))?;

        let mut references = self.references.clone();
        references.push(
            Reference::new(&format!("#{PROPERTIES_ID}"))
                .with_type(ns::TYPE_SIGNATURE_PROPERTIES)
                .with_transform(exclusive_c14n()?),
        );
        self.assemble(references, w.into_string()?, None, Some(signature_id))
    }

    /// A signature over the whole of `document` (`URI=""`), enveloped in
    /// it when the enveloped transform is enabled.
    pub fn signature_element_for_document(&self, document: &str) -> Result<String> {
        let mut whole = Reference::new("");
        if self.enveloped {
            whole = whole.with_transform(TransformStage::EnvelopedSignature);
        }
        let mut references = self.references.clone();
        references.push(whole.with_transform(exclusive_c14n()?));
        self.assemble(references, String::new(), Some(document), self.signature_id.as_deref())
    }

    /// A detached signature over the resource at `uri`, fetched through
    /// the context's resolver.
    pub fn signature_for_external_resource(&self, uri: &str) -> Result<String> {
        let mut references = self.references.clone();
        references.push(Reference::new(uri));
        self.assemble(references, String::new(), None, self.signature_id.as_deref())
    }

    /// Validate `signature_xml`, either a detached `Signature` element
    /// covering `document` or a document with a `Signature` inside.
    ///
    /// The configured signing key is tried when `KeyInfo` names none.
    pub fn validate_signature(&self, signature_xml: &str, document: Option<&str>) -> Result<VerifyResult> {
        let mut ctx = self.ctx.clone();
        if let Some(method) = &self.signature {
            let key = method.key();
            let key = match key.public_handle() {
                Some(public) if !key.permits(KeyUsage::VERIFY) => public,
                _ => key.clone(),
            };
            ctx.keys_manager.insert_key_first(key);
        }
        let standalone = is_element(parse_text(signature_xml)?.root_element(), ns::DSIG, ns::node::SIGNATURE);
        if standalone {
            verify::verify_detached(&ctx, signature_xml, document)
        } else {
            verify::verify(&ctx, signature_xml)
        }
    }

    /// Validate the first signature in `document` with `ctx`.
    pub fn validate_signature_in_document(ctx: &DsigContext, document: &str) -> Result<VerifyResult> {
        verify::verify(ctx, document)
    }

    /// Sign the whole of `document` with `algorithm` and `key`.
    pub fn signature_for_document(
        document: &str,
        algorithm: &str,
        key: KeyHandle,
        version: SignatureVersion,
        enveloped: bool,
    ) -> Result<String> {
        let mut processor = Self::new(version);
        processor.set_signature_algorithm(algorithm, key)?;
        processor.set_use_enveloped_signature_transform(enveloped);
        processor.signature_element_for_document(document)
    }

    /// A detached signature over `data`, referenced as `uri`.
    pub fn signature_referencing_data(
        data: &[u8],
        uri: &str,
        algorithm: &str,
        key: KeyHandle,
        version: SignatureVersion,
    ) -> Result<String> {
        let mut processor = Self::new(version);
        processor.set_signature_algorithm(algorithm, key)?;
        processor.context_mut().add_resource(uri, data.to_vec());
        processor.signature_for_external_resource(uri)
    }

    /// A standalone `Reference` element carrying `digest`.
    pub fn reference_element(reference: &Reference, digest_uri: &str, digest: &[u8]) -> Result<String> {
        let mut w = XmlWriter::new();
        reference.write_with(&mut w, PREFIX, &[("xmlns:ds", ns::DSIG)], digest_uri, digest)?;
        w.into_string()
    }

    fn assemble(
        &self,
        mut references: Vec<Reference>,
        mut objects: String,
        document: Option<&str>,
        signature_id: Option<&str>,
    ) -> Result<String> {
        let method = self
            .signature
            .as_ref()
            .ok_or_else(|| Error::MalformedInput("no signature algorithm configured".into()))?;
        if self.enveloped && document.is_none() {
            return Err(Error::MalformedInput("an enveloped signature needs a document".into()));
        }
        let external_doc = match document {
            Some(text) if !self.enveloped => Some(parse_text(text)?),
            _ => None,
        };
        let external = document.zip(external_doc.as_ref());

        if !self.manifest.is_empty() {
            let text = self.layout(&objects, document, signature_id)?;
            let doc = parse_text(&text)?;
            let docs = self.documents(&text, &doc, external)?;
            objects.push_str(&self.manifest_object(&docs)?);
            references.push(
                Reference::new(&format!("#{MANIFEST_ID}"))
                    .with_type(ns::TYPE_MANIFEST)
                    .with_transform(exclusive_c14n()?),
            );
        }
        if references.is_empty() {
            return Err(Error::MalformedInput("a signature needs at least one reference".into()));
        }

        let text = self.layout(&objects, document, signature_id)?;
        let doc = parse_text(&text)?;
        let docs = self.documents(&text, &doc, external)?;

        let signature_name = ds(ns::node::SIGNATURE);
        let signed_info = ds(ns::node::SIGNED_INFO);
        let signature_value = ds(ns::node::SIGNATURE_VALUE);

        let mut head = XmlWriter::new();
        head.start_element(&signature_name, &signature_attrs(signature_id))?;
        head.start_element(&signed_info, &[])?;
        TransformStage::Canonicalize(self.canonicalization.clone()).write_as(
            &mut head,
            PREFIX,
            &ds(ns::node::CANONICALIZATION_METHOD),
        )?;
        self.write_signature_method(&mut head, method)?;
        for reference in &references {
            self.write_reference(&mut head, reference, &docs)?;
        }
        head.end_element(&signed_info)?;
        head.start_element(&signature_value, &[])?;
        let head = head.into_string()?;

        let mut tail = XmlWriter::new();
        tail.end_element(&signature_value)?;
        sigill_keys::keyinfo::write_key_info(&mut tail, method.key(), PREFIX)?;
        tail.write_raw(&objects);
        tail.end_element(&signature_name)?;
        let tail = tail.into_string()?;

        let render = |value: &str| -> Result<String> {
            let signature = format!("{head}{value}{tail}");
            match document {
                Some(text) if self.enveloped => insert_as_last_child(text, &signature),
                _ => Ok(signature),
            }
        };

        let unsigned = render("")?;
        let unsigned_doc = parse_text(&unsigned)?;
        let signature = locate_signature(&unsigned_doc, self.enveloped)?;
        let signed_info = child_element(signature, ns::DSIG, ns::node::SIGNED_INFO)
            .ok_or_else(|| Error::MissingElement("SignedInfo".into()))?;
        let canonical = reference::canonicalize_signed_info(signed_info, self.ctx.version)?;
        let value = method.sign(&canonical)?;
        tracing::debug!(
            algorithm = method.algorithm().uri(),
            references = references.len(),
            enveloped = self.enveloped,
            "signature generated"
        );
        render(&base64::engine::general_purpose::STANDARD.encode(value))
    }

    /// The text references are resolved in: the `Signature` skeleton with
    /// its objects, inside the document when enveloped.
    fn layout(&self, objects: &str, document: Option<&str>, signature_id: Option<&str>) -> Result<String> {
        let name = ds(ns::node::SIGNATURE);
        let mut w = XmlWriter::new();
        w.start_element(&name, &signature_attrs(signature_id))?;
        w.write_raw(objects);
        w.end_element(&name)?;
        let skeleton = w.into_string()?;
        match document {
            Some(text) if self.enveloped => insert_as_last_child(text, &skeleton),
            _ => Ok(skeleton),
        }
    }

    fn documents<'a, 'sig, 'doc>(
        &self,
        text: &'a str,
        doc: &'a Document<'sig>,
        external: Option<(&'a str, &'a Document<'doc>)>,
    ) -> Result<Documents<'a, 'sig, 'doc>> {
        Ok(Documents {
            signature_text: text,
            signature_doc: doc,
            signature: locate_signature(doc, self.enveloped)?.id(),
            external,
        })
    }

    fn manifest_object(&self, docs: &Documents<'_, '_, '_>) -> Result<String> {
        let object = ds(ns::node::OBJECT);
        let manifest = ds(ns::node::MANIFEST);
        let mut w = XmlWriter::new();
        w.start_element(&object, &[])?;
        w.start_element(&manifest, &[(ns::attr::ID, MANIFEST_ID)])?;
        for reference in &self.manifest {
            self.write_reference(&mut w, reference, docs)?;
        }
        w.end_element(&manifest)?;
        w.end_element(&object)?;
        w.into_string()
    }

    fn write_reference(&self, w: &mut XmlWriter, reference: &Reference, docs: &Documents<'_, '_, '_>) -> Result<()> {
        let digest_uri = reference.digest_method.unwrap_or(self.digest_uri);
        reference.check_version(self.ctx.version, digest_uri)?;
        let tctx = docs.context(&self.ctx, reference.source_uri());
        let digest = reference.compute_digest(digest_uri, &tctx)?;
        reference.write(w, PREFIX, digest_uri, &digest)
    }

    fn write_signature_method(&self, w: &mut XmlWriter, method: &SignatureMethod) -> Result<()> {
        let name = ds(ns::node::SIGNATURE_METHOD);
        let attrs = [(ns::attr::ALGORITHM, method.algorithm().uri())];
        match self.hmac_output_length {
            Some(bits) => {
                w.start_element(&name, &attrs)?;
                w.text_element(&ds(ns::node::HMAC_OUTPUT_LENGTH), &[], &bits.to_string())?;
                w.end_element(&name)
            }
            None => w.empty_element(&name, &attrs),
        }
    }
}

fn signature_attrs(id: Option<&str>) -> Vec<(&str, &str)> {
    let mut attrs = vec![("xmlns:ds", ns::DSIG)];
    if let Some(id) = id {
        attrs.push((ns::attr::ID, id));
    }
    attrs
}

/// The generated `Signature`: the root element, or the last child of the
/// root when enveloped.
fn locate_signature<'a, 'input>(doc: &'a Document<'input>, enveloped: bool) -> Result<Node<'a, 'input>> {
    let root = doc.root_element();
    let signature = if enveloped { root.last_element_child() } else { Some(root) };
    signature
        .filter(|n| is_element(*n, ns::DSIG, ns::node::SIGNATURE))
        .ok_or_else(|| Error::MissingElement("Signature".into()))
}

/// Insert `fragment` as the last child of the root element of `document`,
/// leaving every other byte in place.
fn insert_as_last_child(document: &str, fragment: &str) -> Result<String> {
    let doc = parse_text(document)?;
    let root = doc.root_element();
    let range = root.range();
    let source = source_text(root);

    if !root.has_children() && source.ends_with("/>") {
        let cut = range.end - 2;
        return Ok(format!(
            "{}>{fragment}</{}>{}",
            &document[..cut],
            qualified_name(root),
            &document[range.end..]
        ));
    }
    let close = source
        .rfind("</")
        .map(|offset| range.start + offset)
        .ok_or_else(|| Error::XmlStructure("root element has no end tag".into()))?;
    Ok(format!("{}{fragment}{}", &document[..close], &document[close..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::Failure;
    use sigill_keys::{build_secret_key, KeyKind, KeyMaterial};

    fn rsa_key() -> KeyHandle {
        let sk = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        KeyHandle::new(KeyMaterial::RsaPrivate(sk), KeyUsage::SIGN | KeyUsage::VERIFY)
    }

    fn p256_key() -> KeyHandle {
        let sk = p256::ecdsa::SigningKey::random(&mut rand::thread_rng());
        KeyHandle::new(KeyMaterial::P256Private(sk), KeyUsage::SIGN | KeyUsage::VERIFY)
    }

    const RESOURCES: [(&str, &[u8]); 3] = [
        ("urn:res:one", b"first resource"),
        ("urn:res:two", b"second resource"),
        ("urn:res:three", b"third resource"),
    ];

    #[test]
    fn test_manifest_over_external_resources() {
        let mut processor = SignatureProcessor::new(SignatureVersion::V1_1);
        processor.set_digest_algorithm(algorithm::SHA256).unwrap();
        processor.set_signature_algorithm(algorithm::RSA_SHA256, rsa_key()).unwrap();
        for (uri, data) in RESOURCES {
            processor.context_mut().add_resource(uri, data.to_vec());
            processor.append_manifest_reference(Reference::new(uri));
        }
        let signature = processor.generate_signature_document(None).unwrap();
        assert!(signature.contains(r#"<ds:Manifest Id="manifest">"#));
        assert!(signature.contains(ns::TYPE_MANIFEST));
        assert!(processor.validate_signature(&signature, None).unwrap().is_valid());

        processor.context_mut().add_resource("urn:res:two", b"second resourcE".to_vec());
        let result = processor.validate_signature(&signature, None).unwrap();
        assert_eq!(
            result.failures(),
            &[Failure::ReferenceDigest {
                uri: "urn:res:two".into(),
                index: 1,
                in_manifest: true,
            }]
        );
    }

    #[test]
    fn test_manifest_failures_are_collected_on_request() {
        let mut processor = SignatureProcessor::new(SignatureVersion::V1_1);
        processor.set_signature_algorithm(algorithm::RSA_SHA256, rsa_key()).unwrap();
        for (uri, data) in RESOURCES {
            processor.context_mut().add_resource(uri, data.to_vec());
            processor.append_manifest_reference(Reference::new(uri));
        }
        let signature = processor.generate_signature_document(None).unwrap();

        processor.context_mut().add_resource("urn:res:one", b"changed".to_vec());
        processor.context_mut().add_resource("urn:res:three", b"changed".to_vec());
        assert_eq!(processor.validate_signature(&signature, None).unwrap().failures().len(), 1);

        processor.context_mut().continue_after_failure = true;
        assert_eq!(processor.validate_signature(&signature, None).unwrap().failures().len(), 2);

        processor.context_mut().continue_after_failure = false;
        processor.context_mut().check_manifests = false;
        assert!(processor.validate_signature(&signature, None).unwrap().is_valid());
    }

    #[test]
    fn test_version_gates_signature_algorithm() {
        let mut v10 = SignatureProcessor::new(SignatureVersion::V1_0);
        assert!(matches!(
            v10.set_signature_algorithm(algorithm::ECDSA_SHA512, p256_key()),
            Err(Error::UnsupportedAlgorithm(_))
        ));
        assert!(v10.set_digest_algorithm(algorithm::SHA256).is_err());
        assert_eq!(v10.digest_algorithm(), algorithm::SHA1);

        let mut v20 = SignatureProcessor::new(SignatureVersion::V2_0);
        assert!(v20.set_signature_algorithm(algorithm::ECDSA_SHA512, p256_key()).is_ok());
        assert!(v20.set_canonicalization_method(algorithm::C14N20).is_ok());
        assert!(matches!(
            v20.set_digest_algorithm(algorithm::RSA_SHA256),
            Err(Error::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_key_mismatch_fails_at_setup() {
        let mut processor = SignatureProcessor::new(SignatureVersion::V1_1);
        assert!(matches!(
            processor.set_signature_algorithm(algorithm::RSA_SHA256, p256_key()),
            Err(Error::KeyMismatch(_))
        ));
    }

    #[test]
    fn test_generation_needs_configuration() {
        let processor = SignatureProcessor::new(SignatureVersion::V1_1);
        assert!(matches!(
            processor.signature_element_for_document("<doc/>"),
            Err(Error::MalformedInput(_))
        ));

        let mut processor = SignatureProcessor::new(SignatureVersion::V1_1);
        processor.set_signature_algorithm(algorithm::RSA_SHA256, rsa_key()).unwrap();
        assert!(matches!(
            processor.generate_signature_document(None),
            Err(Error::MalformedInput(_))
        ));
        processor.set_use_enveloped_signature_transform(true);
        assert!(matches!(
            processor.signature_for_external_resource("urn:x"),
            Err(Error::MalformedInput(_))
        ));
    }

    #[test]
    fn test_enveloped_round_trip() {
        let document = r#"<?xml version="1.0"?>
<order xmlns="urn:orders" id="42"><item qty="2">widget</item></order>
"#;
        let signed = SignatureProcessor::signature_for_document(
            document,
            algorithm::RSA_SHA256,
            rsa_key(),
            SignatureVersion::V1_1,
            true,
        )
        .unwrap();
        assert!(signed.starts_with(r#"<?xml version="1.0"?>"#));
        assert!(signed.contains("</ds:Signature></order>"));
        assert!(signed.contains(algorithm::ENVELOPED_SIGNATURE));

        let ctx = DsigContext::new(SignatureVersion::V1_1);
        let result = SignatureProcessor::validate_signature_in_document(&ctx, &signed).unwrap();
        assert!(result.is_valid(), "{result:?}");

        let tampered = signed.replace("widget", "gadget");
        let result = SignatureProcessor::validate_signature_in_document(&ctx, &tampered).unwrap();
        assert!(matches!(result.failures(), [Failure::ReferenceDigest { in_manifest: false, .. }]));
    }

    #[test]
    fn test_enveloped_into_empty_root() {
        let signed = SignatureProcessor::signature_for_document(
            "<empty a=\"1\"/>",
            algorithm::ECDSA_SHA256,
            p256_key(),
            SignatureVersion::V1_1,
            true,
        )
        .unwrap();
        assert!(signed.starts_with("<empty a=\"1\"><ds:Signature"));
        assert!(signed.ends_with("</ds:Signature></empty>"));
        let ctx = DsigContext::new(SignatureVersion::V1_1);
        assert!(SignatureProcessor::validate_signature_in_document(&ctx, &signed)
            .unwrap()
            .is_valid());
    }

    #[test]
    fn test_enveloping_round_trip() {
        let mut processor = SignatureProcessor::new(SignatureVersion::V1_1);
        processor.set_signature_algorithm(algorithm::RSA_SHA1, rsa_key()).unwrap();
        let signature = processor
            .signature_for_embedded_document("<note><to>Ana</to></note>")
            .unwrap();
        assert!(signature.starts_with(r#"<ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#" Id="signature">"#));
        assert!(signature.contains(r##"<ds:SignatureProperty Target="#signature"><note><to>Ana</to></note>"##));
        assert!(signature.contains(r##"URI="#props""##));
        assert!(processor.validate_signature(&signature, None).unwrap().is_valid());

        let tampered = signature.replace("Ana", "Eve");
        assert!(!processor.validate_signature(&tampered, None).unwrap().is_valid());
    }

    #[test]
    fn test_detached_signature_over_document() {
        let document = r#"<doc><part Id="p1">signed</part><part>unsigned</part></doc>"#;
        let mut processor = SignatureProcessor::new(SignatureVersion::V1_1);
        processor.set_signature_algorithm(algorithm::ECDSA_SHA256, p256_key()).unwrap();
        processor.add_reference(Reference::new("#p1").with_transform(exclusive_c14n().unwrap()));
        let signature = processor.generate_signature_document(Some(document)).unwrap();

        assert!(processor.validate_signature(&signature, Some(document)).unwrap().is_valid());
        let changed = document.replace("<part>unsigned", "<part>changed");
        assert!(processor.validate_signature(&signature, Some(&changed)).unwrap().is_valid());
        let changed = document.replace(">signed", ">altered");
        assert!(!processor.validate_signature(&signature, Some(&changed)).unwrap().is_valid());
    }

    #[test]
    fn test_hmac_signature_over_data() {
        let key = build_secret_key(KeyKind::Hmac, b"secret").unwrap();
        let signature = SignatureProcessor::signature_referencing_data(
            b"payload",
            "urn:payload",
            algorithm::HMAC_SHA256,
            key.clone(),
            SignatureVersion::V1_1,
        )
        .unwrap();
        assert!(!signature.contains(ns::node::KEY_INFO));

        let mut ctx = DsigContext::new(SignatureVersion::V1_1);
        ctx.keys_manager.add_key(key);
        ctx.add_resource("urn:payload", b"payload".to_vec());
        assert!(verify::verify_detached(&ctx, &signature, None).unwrap().is_valid());

        ctx.add_resource("urn:payload", b"payloaD".to_vec());
        let result = verify::verify_detached(&ctx, &signature, None).unwrap();
        assert!(matches!(result.failures(), [Failure::ReferenceDigest { index: 0, .. }]));
    }

    #[test]
    fn test_hmac_output_length_is_written() {
        let mut processor = SignatureProcessor::new(SignatureVersion::V1_0);
        assert!(processor.set_hmac_output_length(160).is_err());
        let key = build_secret_key(KeyKind::Hmac, b"secret").unwrap();
        processor.set_signature_algorithm(algorithm::HMAC_SHA1, key).unwrap();
        processor.set_hmac_output_length(128).unwrap();
        processor.context_mut().add_resource("urn:x", b"x".to_vec());
        let signature = processor.signature_for_external_resource("urn:x").unwrap();
        assert!(signature.contains("<ds:HMACOutputLength>128</ds:HMACOutputLength>"));
        assert!(processor.validate_signature(&signature, None).unwrap().is_valid());
    }

    #[test]
    fn test_certificate_in_key_info() {
        let fixtures: [(&[u8], &[u8], &str); 2] = [
            (
                include_bytes!("../../sigill-keys/test_data/rsa_key.pem"),
                include_bytes!("../../sigill-keys/test_data/rsa_cert.pem"),
                algorithm::RSA_SHA256,
            ),
            (
                include_bytes!("../../sigill-keys/test_data/ec_key.pem"),
                include_bytes!("../../sigill-keys/test_data/ec_cert.der"),
                algorithm::ECDSA_SHA256,
            ),
        ];
        for (key, cert, method) in fixtures {
            let cert = sigill_keys::import_certificate_data(cert).unwrap();
            let key = sigill_keys::import_key_data(key, KeyUsage::SIGN)
                .unwrap()
                .with_certificate(cert.certificate().unwrap().to_vec());

            let mut processor = SignatureProcessor::new(SignatureVersion::V1_1);
            processor.set_signature_algorithm(method, key).unwrap();
            let signed = processor.signature_element_for_document("<doc><v>1</v></doc>").unwrap();
            assert!(signed.contains("<ds:X509Data><ds:X509Certificate>"), "{signed}");
            assert!(!signed.contains("KeyValue"));

            let ctx = DsigContext::default();
            assert!(verify::verify_detached(&ctx, &signed, Some("<doc><v>1</v></doc>")).unwrap().is_valid());
            assert!(!verify::verify_detached(&ctx, &signed, Some("<doc><v>2</v></doc>")).unwrap().is_valid());
            assert!(processor.validate_signature(&signed, Some("<doc><v>1</v></doc>")).unwrap().is_valid());
        }
    }

    #[test]
    fn test_reference_element() {
        let reference = Reference::new("urn:x").with_id("r");
        let xml = SignatureProcessor::reference_element(&reference, algorithm::SHA1, &[0u8; 20]).unwrap();
        assert_eq!(
            xml,
            concat!(
                r#"<ds:Reference xmlns:ds="http://www.w3.org/2000/09/xmldsig#" Id="r" URI="urn:x">"#,
                r#"<ds:DigestMethod Algorithm="http://www.w3.org/2000/09/xmldsig#sha1"/>"#,
                r#"<ds:DigestValue>AAAAAAAAAAAAAAAAAAAAAAAAAAA=</ds:DigestValue></ds:Reference>"#
            )
        );
    }

    #[test]
    fn test_insert_as_last_child() {
        assert_eq!(insert_as_last_child("<a><b/></a>", "<s/>").unwrap(), "<a><b/><s/></a>");
        assert_eq!(insert_as_last_child("<p:a xmlns:p=\"u\"/>\n", "<s/>").unwrap(), "<p:a xmlns:p=\"u\"><s/></p:a>\n");
        assert_eq!(insert_as_last_child("<a></a>", "<s/>").unwrap(), "<a><s/></a>");
    }
}
