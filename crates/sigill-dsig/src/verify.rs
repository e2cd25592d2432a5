#![forbid(unsafe_code)]

//! XML-DSig signature validation.
//!
//! Processing order:
//! 1. Locate `<Signature>` and `<SignedInfo>`
//! 2. Canonicalize `<SignedInfo>` with its own `CanonicalizationMethod`
//! 3. Resolve the key from `<KeyInfo>` (or the context's default key)
//!    and verify `<SignatureValue>`
//! 4. For each `<Reference>`: dereference, run transforms, digest and
//!    compare; `Manifest` references are followed when enabled

use crate::context::DsigContext;
use crate::reference::{self, ParsedReference};
use roxmltree::{Document, Node, NodeId};
use sigill_core::{algorithm, ns, Error, Family, Result};
use sigill_crypto::SignatureMethod;
use sigill_keys::KeyHandle;
use sigill_transforms::base64_transform::decode_text;
use sigill_transforms::TransformContext;
use sigill_xml::document::{build_id_map, child_element, child_elements, is_element, parse_text};
use std::collections::HashSet;
use std::fmt;

/// Why a signature failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// `SignatureValue` does not verify over the canonical `SignedInfo`.
    SignatureValue,
    /// A reference's recomputed digest differs from its `DigestValue`.
    ReferenceDigest {
        uri: String,
        /// Position among the references of its parent element.
        index: usize,
        in_manifest: bool,
    },
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::SignatureValue => f.write_str("signature value verification failed"),
            Failure::ReferenceDigest {
                uri,
                index,
                in_manifest,
            } => {
                let place = if *in_manifest { "manifest" } else { "SignedInfo" };
                write!(f, "digest mismatch for {place} reference #{index} ({uri:?})")
            }
        }
    }
}

/// Result of signature validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    /// Signature is valid.
    Valid,
    /// Signature is invalid; the first failure comes first.
    Invalid { failures: Vec<Failure> },
}

impl VerifyResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, VerifyResult::Valid)
    }

    pub fn failures(&self) -> &[Failure] {
        match self {
            VerifyResult::Valid => &[],
            VerifyResult::Invalid { failures } => failures,
        }
    }

    /// The error kind matching the first failure, for callers that want
    /// an `Err` instead of a verdict.
    pub fn into_result(self) -> Result<()> {
        match self.failures().first() {
            None => Ok(()),
            Some(failure @ Failure::SignatureValue) => Err(Error::SignatureInvalid(failure.to_string())),
            Some(failure) => Err(Error::DigestMismatch(failure.to_string())),
        }
    }
}

/// Where references are resolved.
pub(crate) struct Documents<'a, 'sig, 'doc> {
    pub signature_text: &'a str,
    pub signature_doc: &'a Document<'sig>,
    pub signature: NodeId,
    /// Separate document a detached signature covers.
    pub external: Option<(&'a str, &'a Document<'doc>)>,
}

impl Documents<'_, '_, '_> {
    /// Transform context for a reference whose input is named by `uri`.
    ///
    /// References resolve in the signature's document unless the
    /// signature is detached and `uri` names the whole document or an
    /// ID found only in the covered document.
    pub fn context<'c>(&'c self, ctx: &'c DsigContext, uri: &str) -> TransformContext<'c> {
        let base = TransformContext::new(&ctx.resolver).with_id_attrs(&ctx.id_attrs);
        let in_signature = TransformContext::new(&ctx.resolver)
            .with_id_attrs(&ctx.id_attrs)
            .with_document(self.signature_text)
            .with_signature(self.signature);
        let Some((text, doc)) = self.external else {
            return in_signature;
        };
        let whole_document = uri.is_empty() || uri == "#xpointer(/)";
        if !whole_document && reference::resolves_in(self.signature_doc, &ctx.id_attrs, uri) {
            return in_signature;
        }
        if whole_document || reference::resolves_in(doc, &ctx.id_attrs, uri) {
            return base.with_document(text);
        }
        in_signature
    }
}

/// Validate the first `Signature` element found in `document`.
pub fn verify(ctx: &DsigContext, document: &str) -> Result<VerifyResult> {
    let doc = parse_text(document)?;
    let signature = doc
        .descendants()
        .find(|n| is_element(*n, ns::DSIG, ns::node::SIGNATURE))
        .ok_or_else(|| Error::MissingElement("Signature".into()))?;
    let docs = Documents {
        signature_text: document,
        signature_doc: &doc,
        signature: signature.id(),
        external: None,
    };
    verify_signature(ctx, signature, &docs)
}

/// Validate a detached `Signature` whose references may point into a
/// separate `document`.
pub fn verify_detached(ctx: &DsigContext, signature_xml: &str, document: Option<&str>) -> Result<VerifyResult> {
    let sig_doc = parse_text(signature_xml)?;
    let signature = sig_doc.root_element();
    if !is_element(signature, ns::DSIG, ns::node::SIGNATURE) {
        return Err(Error::MissingElement("Signature".into()));
    }
    let external_doc = document.map(parse_text).transpose()?;
    let docs = Documents {
        signature_text: signature_xml,
        signature_doc: &sig_doc,
        signature: signature.id(),
        external: document.zip(external_doc.as_ref()),
    };
    verify_signature(ctx, signature, &docs)
}

fn verify_signature(ctx: &DsigContext, signature: Node<'_, '_>, docs: &Documents<'_, '_, '_>) -> Result<VerifyResult> {
    let signed_info = child_element(signature, ns::DSIG, ns::node::SIGNED_INFO)
        .ok_or_else(|| Error::MissingElement("SignedInfo".into()))?;
    let canonical = reference::canonicalize_signed_info(signed_info, ctx.version)?;

    let method = signature_method(ctx, signature, signed_info)?;
    let value = child_element(signature, ns::DSIG, ns::node::SIGNATURE_VALUE)
        .ok_or_else(|| Error::MissingElement("SignatureValue".into()))?;
    let value = decode_text(value.text().unwrap_or(""))?;

    let mut failures = Vec::new();
    if !method.verify(&value, &canonical)? {
        tracing::debug!(algorithm = method.algorithm().uri(), "SignatureValue does not verify");
        failures.push(Failure::SignatureValue);
        if !ctx.continue_after_failure {
            return Ok(VerifyResult::Invalid { failures });
        }
    }

    let references = child_elements(signed_info, ns::DSIG, ns::node::REFERENCE);
    if references.is_empty() {
        return Err(Error::MissingElement("Reference in SignedInfo".into()));
    }
    check_references(ctx, docs, &references, false, &mut HashSet::new(), &mut failures)?;

    if failures.is_empty() {
        tracing::debug!(references = references.len(), "signature valid");
        Ok(VerifyResult::Valid)
    } else {
        Ok(VerifyResult::Invalid { failures })
    }
}

/// Build the verifier named by `SignatureMethod` with the key `KeyInfo`
/// designates, falling back to the context's first key.
fn signature_method(ctx: &DsigContext, signature: Node<'_, '_>, signed_info: Node<'_, '_>) -> Result<SignatureMethod> {
    let node = child_element(signed_info, ns::DSIG, ns::node::SIGNATURE_METHOD)
        .ok_or_else(|| Error::MissingElement("SignatureMethod".into()))?;
    let uri = node
        .attribute(ns::attr::ALGORITHM)
        .ok_or_else(|| Error::MissingAttribute("Algorithm on SignatureMethod".into()))?;
    let alg = algorithm::check_permitted(uri, ctx.version)?;
    if !matches!(alg.family(), Family::Signature | Family::Mac) {
        return Err(Error::UnsupportedAlgorithm(format!("{uri} is not a signature algorithm")));
    }

    let key = resolve_key(ctx, signature, uri)?;
    let mut method = SignatureMethod::from_uri(uri, key)?;
    if let Some(len) = child_element(node, ns::DSIG, ns::node::HMAC_OUTPUT_LENGTH) {
        let bits = len
            .text()
            .unwrap_or("")
            .trim()
            .parse::<usize>()
            .map_err(|e| Error::MalformedInput(format!("HMACOutputLength: {e}")))?;
        method.set_hmac_output_length(bits)?;
    }
    Ok(method)
}

fn resolve_key(ctx: &DsigContext, signature: Node<'_, '_>, algorithm: &str) -> Result<KeyHandle> {
    if let Some(key_info) = child_element(signature, ns::DSIG, ns::node::KEY_INFO) {
        if let Some(key) = sigill_keys::keyinfo::resolve_key_info(key_info, &ctx.keys_manager, Some(algorithm))? {
            return Ok(key);
        }
        tracing::debug!("KeyInfo names no usable key, using default key");
    }
    ctx.keys_manager.first_key().cloned()
}

/// Check `references` in order. `open_manifests` holds the IDs of the
/// manifests currently being followed, so a manifest reachable from
/// itself is rejected instead of followed again.
fn check_references(
    ctx: &DsigContext,
    docs: &Documents<'_, '_, '_>,
    references: &[Node<'_, '_>],
    in_manifest: bool,
    open_manifests: &mut HashSet<String>,
    failures: &mut Vec<Failure>,
) -> Result<()> {
    for (index, node) in references.iter().enumerate() {
        let parsed = ParsedReference::parse(*node, ctx.version)?;
        let tctx = docs.context(ctx, parsed.source_uri());
        let computed = parsed.compute_digest(&tctx)?;
        if computed != parsed.digest_value {
            tracing::debug!(uri = parsed.uri, index, in_manifest, "reference digest mismatch");
            failures.push(Failure::ReferenceDigest {
                uri: parsed.uri.to_owned(),
                index,
                in_manifest,
            });
            if !ctx.continue_after_failure {
                return Ok(());
            }
            continue;
        }
        tracing::trace!(uri = parsed.uri, index, in_manifest, "reference digest ok");

        if ctx.check_manifests && parsed.type_uri == Some(ns::TYPE_MANIFEST) {
            let before = failures.len();
            check_manifest(ctx, docs, parsed.uri, open_manifests, failures)?;
            if failures.len() > before && !ctx.continue_after_failure {
                return Ok(());
            }
        }
    }
    Ok(())
}

fn check_manifest(
    ctx: &DsigContext,
    docs: &Documents<'_, '_, '_>,
    uri: &str,
    open_manifests: &mut HashSet<String>,
    failures: &mut Vec<Failure>,
) -> Result<()> {
    let id = reference::fragment_id(uri)
        .ok_or_else(|| Error::InvalidUri(format!("Manifest reference {uri:?} is not same-document")))?;
    let find = |doc: &Document<'_>| -> Option<NodeId> {
        build_id_map(doc, &ctx.id_attrs)
            .get(id)
            .copied()
            .filter(|n| doc.get_node(*n).is_some_and(|n| is_element(n, ns::DSIG, ns::node::MANIFEST)))
    };

    if let Some(manifest) = find(docs.signature_doc).and_then(|n| docs.signature_doc.get_node(n)) {
        let refs = child_elements(manifest, ns::DSIG, ns::node::REFERENCE);
        return follow_manifest(ctx, docs, id, &refs, open_manifests, failures);
    }
    if let Some((_, doc)) = docs.external {
        if let Some(manifest) = find(doc).and_then(|n| doc.get_node(n)) {
            let refs = child_elements(manifest, ns::DSIG, ns::node::REFERENCE);
            return follow_manifest(ctx, docs, id, &refs, open_manifests, failures);
        }
    }
    Err(Error::MissingElement(format!("Manifest {uri}")))
}

fn follow_manifest(
    ctx: &DsigContext,
    docs: &Documents<'_, '_, '_>,
    id: &str,
    refs: &[Node<'_, '_>],
    open_manifests: &mut HashSet<String>,
    failures: &mut Vec<Failure>,
) -> Result<()> {
    if !open_manifests.insert(id.to_owned()) {
        return Err(Error::MalformedInput(format!("Manifest {id:?} references itself")));
    }
    let result = check_references(ctx, docs, refs, true, open_manifests, failures);
    open_manifests.remove(id);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sign::SignatureProcessor;
    use sigill_core::SignatureVersion;
    use sigill_keys::{build_secret_key, KeyKind, KeyMaterial, KeyUsage};

    fn rsa_key() -> KeyHandle {
        let sk = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        KeyHandle::new(KeyMaterial::RsaPrivate(sk), KeyUsage::SIGN | KeyUsage::VERIFY)
    }

    fn enveloped(document: &str) -> String {
        SignatureProcessor::signature_for_document(
            document,
            algorithm::RSA_SHA256,
            rsa_key(),
            SignatureVersion::V1_1,
            true,
        )
        .unwrap()
    }

    #[test]
    fn test_tampered_signed_info_is_rejected() {
        let signed = enveloped("<doc><v>1</v></doc>");
        let ctx = DsigContext::default();
        assert!(verify(&ctx, &signed).unwrap().is_valid());

        let tampered = signed.replacen("<ds:SignedInfo>", r#"<ds:SignedInfo Id="si">"#, 1);
        let result = verify(&ctx, &tampered).unwrap();
        assert_eq!(result.failures(), &[Failure::SignatureValue]);
        assert!(matches!(result.into_result(), Err(Error::SignatureInvalid(_))));
    }

    #[test]
    fn test_signature_failure_gates_reference_checks() {
        let signed = enveloped("<doc><v>1</v></doc>");
        let tampered = signed
            .replacen("<ds:SignedInfo>", r#"<ds:SignedInfo Id="si">"#, 1)
            .replace("<v>1</v>", "<v>2</v>");
        let mut ctx = DsigContext::default();
        assert_eq!(verify(&ctx, &tampered).unwrap().failures(), &[Failure::SignatureValue]);

        ctx.continue_after_failure = true;
        let failures = verify(&ctx, &tampered).unwrap().failures().to_vec();
        assert_eq!(failures.len(), 2);
        assert!(matches!(&failures[1], Failure::ReferenceDigest { uri, index: 0, in_manifest: false } if uri.is_empty()));
    }

    #[test]
    fn test_key_name_selects_manager_key() {
        let key = build_secret_key(KeyKind::Hmac, b"shared secret").unwrap().with_name("shared");
        let mut processor = SignatureProcessor::new(SignatureVersion::V1_1);
        processor.set_signature_algorithm(algorithm::HMAC_SHA256, key.clone()).unwrap();
        let signed = processor.signature_element_for_document("<doc/>").unwrap();
        assert!(signed.contains("<ds:KeyName>shared</ds:KeyName>"));

        let other = build_secret_key(KeyKind::Hmac, b"other").unwrap();
        let mut manager = sigill_keys::KeysManager::new();
        manager.add_key(other);
        manager.add_key(key);
        let ctx = DsigContext::default().with_keys_manager(manager);
        assert!(verify_detached(&ctx, &signed, Some("<doc/>")).unwrap().is_valid());
        assert!(!verify_detached(&ctx, &signed, Some("<doc>x</doc>")).unwrap().is_valid());
    }

    #[test]
    fn test_structure_errors() {
        let ctx = DsigContext::default();
        assert!(matches!(verify(&ctx, "<doc/>"), Err(Error::MissingElement(_))));
        assert!(matches!(verify_detached(&ctx, "<doc/>", None), Err(Error::MissingElement(_))));

        let no_key = enveloped("<doc/>").replace("<ds:KeyInfo>", "<ds:Unused>").replace("</ds:KeyInfo>", "</ds:Unused>");
        assert!(matches!(verify(&ctx, &no_key), Err(Error::KeyNotFound(_))));
    }

    #[test]
    fn test_version_gates_validation() {
        let signed = enveloped("<doc/>");
        let ctx = DsigContext::new(SignatureVersion::V1_0);
        assert!(matches!(verify(&ctx, &signed), Err(Error::UnsupportedAlgorithm(_))));
    }

    #[test]
    fn test_enveloped_reference_in_detached_signature() {
        let signed = enveloped("<doc><v>1</v></doc>");
        let start = signed.find("<ds:Signature").unwrap();
        let end = signed.rfind("</ds:Signature>").unwrap() + "</ds:Signature>".len();
        let detached = &signed[start..end];

        let ctx = DsigContext::default();
        let err = verify_detached(&ctx, detached, Some("<doc><v>1</v></doc>")).unwrap_err();
        assert!(matches!(err, Error::Transform(_)));
    }

    const SELF_MANIFEST: &str = r##"<doc xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:Manifest Id="m"><ds:Reference URI="#m" Type="http://www.w3.org/2000/09/xmldsig#Manifest"><ds:Transforms><ds:Transform Algorithm="http://www.w3.org/TR/1999/REC-xpath-19991116"><ds:XPath>not(ancestor-or-self::ds:DigestValue)</ds:XPath></ds:Transform></ds:Transforms><ds:DigestMethod Algorithm="http://www.w3.org/2001/04/xmlenc#sha256"/><ds:DigestValue>AAAA</ds:DigestValue></ds:Reference></ds:Manifest></doc>"##;

    fn first_reference<'a, 'input>(doc: &'a Document<'input>) -> Node<'a, 'input> {
        doc.descendants()
            .find(|n| is_element(*n, ns::DSIG, ns::node::REFERENCE))
            .unwrap()
    }

    #[test]
    fn test_manifest_cycle_is_rejected() {
        use base64::Engine;

        let mut ctx = DsigContext::default();
        // The reference digests its own Manifest minus the DigestValue, so
        // the digest holds whatever value is filled in.
        let draft = parse_text(SELF_MANIFEST).unwrap();
        let docs = Documents {
            signature_text: SELF_MANIFEST,
            signature_doc: &draft,
            signature: draft.root_element().id(),
            external: None,
        };
        let parsed = ParsedReference::parse(first_reference(&draft), ctx.version).unwrap();
        let digest = parsed.compute_digest(&docs.context(&ctx, parsed.source_uri())).unwrap();
        let text = SELF_MANIFEST.replace("AAAA", &base64::engine::general_purpose::STANDARD.encode(digest));

        let doc = parse_text(&text).unwrap();
        let docs = Documents {
            signature_text: &text,
            signature_doc: &doc,
            signature: doc.root_element().id(),
            external: None,
        };
        let references = [first_reference(&doc)];
        let mut failures = Vec::new();
        let err = check_references(&ctx, &docs, &references, false, &mut HashSet::new(), &mut failures).unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)));

        ctx.check_manifests = false;
        check_references(&ctx, &docs, &references, false, &mut HashSet::new(), &mut failures).unwrap();
        assert!(failures.is_empty());
    }

    #[test]
    fn test_failure_display() {
        let failure = Failure::ReferenceDigest {
            uri: "urn:x".into(),
            index: 2,
            in_manifest: true,
        };
        assert_eq!(failure.to_string(), "digest mismatch for manifest reference #2 (\"urn:x\")");
        assert!(VerifyResult::Valid.into_result().is_ok());
    }
}
