#![forbid(unsafe_code)]

//! KeyInfo processing: reads `<ds:KeyInfo>` key material and writes it
//! back out for generated signatures.

use crate::builder::{self, CurveSpec, DsaParameters};
use crate::key::{KeyHandle, KeyMaterial};
use crate::manager::KeysManager;
use base64::Engine;
use roxmltree::Node;
use sigill_core::{ns, Error, Result};
use sigill_xml::document::child_element;
use sigill_xml::XmlWriter;

/// Decode a CryptoBinary value.
///
/// Base64 per the schema; some interop vectors carry hex instead, which
/// is accepted as a fallback.
pub fn decode_crypto_binary(text: &str) -> Result<Vec<u8>> {
    let clean: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if clean.is_empty() {
        return Err(Error::Base64("empty CryptoBinary value".into()));
    }
    let engine = base64::engine::general_purpose::STANDARD;
    match engine.decode(&clean) {
        Ok(bytes) => Ok(bytes),
        Err(e) if clean.len() % 2 == 0 && clean.chars().all(|c| c.is_ascii_hexdigit()) => {
            hex::decode(&clean).map_err(|_| Error::Base64(e.to_string()))
        }
        Err(e) => Err(Error::Base64(e.to_string())),
    }
}

fn child_binary(parent: Node<'_, '_>, ns_uri: &str, name: &str) -> Result<Option<Vec<u8>>> {
    child_element(parent, ns_uri, name)
        .map(|n| decode_crypto_binary(n.text().unwrap_or("")))
        .transpose()
}

fn required_binary(parent: Node<'_, '_>, ns_uri: &str, name: &str) -> Result<Vec<u8>> {
    child_binary(parent, ns_uri, name)?
        .ok_or_else(|| Error::MissingElement(format!("{name} in {}", parent.tag_name().name())))
}

/// Build a key from an `<RSAKeyValue>` element.
pub fn read_rsa_key_value(node: Node<'_, '_>) -> Result<KeyHandle> {
    let modulus = required_binary(node, ns::DSIG, ns::node::RSA_MODULUS)?;
    let exponent = required_binary(node, ns::DSIG, ns::node::RSA_EXPONENT)?;
    builder::build_rsa_key(&modulus, &exponent)
}

/// Build a key from a `<DSAKeyValue>` element.
pub fn read_dsa_key_value(node: Node<'_, '_>) -> Result<KeyHandle> {
    let p = required_binary(node, ns::DSIG, ns::node::DSA_P)?;
    let q = required_binary(node, ns::DSIG, ns::node::DSA_Q)?;
    let g = required_binary(node, ns::DSIG, ns::node::DSA_G)?;
    let y = required_binary(node, ns::DSIG, ns::node::DSA_Y)?;
    let j = child_binary(node, ns::DSIG, ns::node::DSA_J)?;
    let seed = child_binary(node, ns::DSIG, ns::node::DSA_SEED)?;
    let counter = child_binary(node, ns::DSIG, ns::node::DSA_PGEN_COUNTER)?;

    builder::build_dsa_key(&DsaParameters {
        p: &p,
        q: &q,
        g: &g,
        y: &y,
        j: j.as_deref(),
        seed: seed.as_deref(),
        pgen_counter: counter.as_deref(),
    })
}

/// Build a key from a `<dsig11:ECKeyValue>` element.
///
/// `algorithm` is the signature method the key is meant for; the curve
/// is checked against it.
pub fn read_ec_key_value(node: Node<'_, '_>, algorithm: Option<&str>) -> Result<KeyHandle> {
    let ec_ns = node.tag_name().namespace().unwrap_or(ns::DSIG11);

    let curve = if let Some(named) = child_element(node, ec_ns, ns::node::NAMED_CURVE) {
        let uri = named
            .attribute(ns::attr::URI)
            .ok_or_else(|| Error::MissingAttribute("URI on NamedCurve".into()))?;
        CurveSpec::Named(uri.to_owned())
    } else if let Some(params) = child_element(node, ec_ns, ns::node::EC_PARAMETERS) {
        let prime = child_element(params, ec_ns, ns::node::FIELD_ID)
            .and_then(|field| child_element(field, ec_ns, ns::node::PRIME))
            .ok_or_else(|| Error::MissingElement("FieldID/Prime in ECParameters".into()))?;
        CurveSpec::Explicit {
            prime: required_binary(prime, ec_ns, ns::node::EC_P)?,
            order: required_binary(params, ec_ns, ns::node::EC_ORDER)?,
        }
    } else {
        return Err(Error::MissingElement("NamedCurve or ECParameters".into()));
    };

    let point = required_binary(node, ec_ns, ns::node::PUBLIC_KEY)?;
    builder::build_ecdsa_key(&curve, &point, algorithm)
}

/// Build a key from the first recognized child of a `<KeyValue>`.
pub fn read_key_value(key_value: Node<'_, '_>, algorithm: Option<&str>) -> Result<KeyHandle> {
    for child in key_value.children().filter(|n| n.is_element()) {
        let ns_uri = child.tag_name().namespace().unwrap_or("");
        match (ns_uri, child.tag_name().name()) {
            (ns::DSIG, ns::node::RSA_KEY_VALUE) => return read_rsa_key_value(child),
            (ns::DSIG, ns::node::DSA_KEY_VALUE) => return read_dsa_key_value(child),
            (ns::DSIG11 | ns::DSIG, ns::node::EC_KEY_VALUE) => {
                return read_ec_key_value(child, algorithm)
            }
            _ => {}
        }
    }
    Err(Error::MissingElement("RSAKeyValue, DSAKeyValue or ECKeyValue in KeyValue".into()))
}

/// Resolve the key a `<KeyInfo>` designates.
///
/// Tries `KeyName` against the manager, then an inline `KeyValue`, then
/// the first `X509Certificate`. Returns `Ok(None)` when nothing in the
/// element names a usable key.
pub fn resolve_key_info(
    key_info: Node<'_, '_>,
    manager: &KeysManager,
    algorithm: Option<&str>,
) -> Result<Option<KeyHandle>> {
    let children: Vec<Node<'_, '_>> = key_info
        .children()
        .filter(|n| n.is_element() && n.tag_name().namespace() == Some(ns::DSIG))
        .collect();

    for child in children.iter().filter(|n| n.tag_name().name() == ns::node::KEY_NAME) {
        let name = child.text().unwrap_or("").trim();
        if let Some(key) = manager.find_by_name(name) {
            tracing::debug!(name, "KeyInfo resolved through KeyName");
            return Ok(Some(key.clone()));
        }
    }

    if let Some(key_value) = children.iter().find(|n| n.tag_name().name() == ns::node::KEY_VALUE) {
        return read_key_value(*key_value, algorithm).map(Some);
    }

    let certificate = children
        .iter()
        .filter(|n| n.tag_name().name() == ns::node::X509_DATA)
        .find_map(|data| child_element(*data, ns::DSIG, ns::node::X509_CERTIFICATE));
    if let Some(cert) = certificate {
        let der = decode_crypto_binary(cert.text().unwrap_or(""))?;
        return builder::import_certificate_data(&der).map(Some);
    }

    Ok(None)
}

fn b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn qname(prefix: &str, local: &str) -> String {
    if prefix.is_empty() {
        local.to_owned()
    } else {
        format!("{prefix}:{local}")
    }
}

/// Write a `<KeyInfo>` describing `key`, with `prefix` for the DSig
/// namespace (already declared by the caller).
///
/// A key carrying a certificate gets `X509Data` with it; other
/// asymmetric keys get a `KeyValue` with their public half. A named key
/// also gets a `KeyName`. Returns `false` and writes nothing when there
/// is nothing to say, as for an unnamed secret key.
pub fn write_key_info(w: &mut XmlWriter, key: &KeyHandle, prefix: &str) -> Result<bool> {
    let public = key.material().public_part();
    if public.is_none() && key.name().is_none() {
        return Ok(false);
    }

    let key_info = qname(prefix, ns::node::KEY_INFO);
    w.start_element(&key_info, &[])?;
    if let Some(name) = key.name() {
        w.text_element(&qname(prefix, ns::node::KEY_NAME), &[], name)?;
    }
    if let Some(der) = key.certificate() {
        let data = qname(prefix, ns::node::X509_DATA);
        w.start_element(&data, &[])?;
        w.text_element(&qname(prefix, ns::node::X509_CERTIFICATE), &[], &b64(der))?;
        w.end_element(&data)?;
    } else if let Some(public) = public {
        let key_value = qname(prefix, ns::node::KEY_VALUE);
        w.start_element(&key_value, &[])?;
        write_public_key(w, &public, prefix)?;
        w.end_element(&key_value)?;
    }
    w.end_element(&key_info)?;
    Ok(true)
}

fn write_public_key(w: &mut XmlWriter, public: &KeyMaterial, prefix: &str) -> Result<()> {
    use rsa::traits::PublicKeyParts;

    match public {
        KeyMaterial::RsaPublic(k) => {
            let el = qname(prefix, ns::node::RSA_KEY_VALUE);
            w.start_element(&el, &[])?;
            w.text_element(&qname(prefix, ns::node::RSA_MODULUS), &[], &b64(&k.n().to_bytes_be()))?;
            w.text_element(&qname(prefix, ns::node::RSA_EXPONENT), &[], &b64(&k.e().to_bytes_be()))?;
            w.end_element(&el)
        }
        KeyMaterial::DsaPublic(k) => {
            let el = qname(prefix, ns::node::DSA_KEY_VALUE);
            let c = k.components();
            w.start_element(&el, &[])?;
            for (name, value) in [
                (ns::node::DSA_P, c.p()),
                (ns::node::DSA_Q, c.q()),
                (ns::node::DSA_G, c.g()),
                (ns::node::DSA_Y, k.y()),
            ] {
                w.text_element(&qname(prefix, name), &[], &b64(&value.to_bytes_be()))?;
            }
            w.end_element(&el)
        }
        KeyMaterial::P256Public(k) => {
            write_ec_key_value(w, "urn:oid:1.2.840.10045.3.1.7", k.to_encoded_point(false).as_bytes())
        }
        KeyMaterial::P384Public(k) => {
            write_ec_key_value(w, "urn:oid:1.3.132.0.34", k.to_encoded_point(false).as_bytes())
        }
        other => Err(Error::KeyMismatch(format!(
            "{} keys have no KeyValue form",
            other.kind()
        ))),
    }
}

fn write_ec_key_value(w: &mut XmlWriter, curve_uri: &str, point: &[u8]) -> Result<()> {
    w.start_element("dsig11:ECKeyValue", &[("xmlns:dsig11", ns::DSIG11)])?;
    w.empty_element("dsig11:NamedCurve", &[(ns::attr::URI, curve_uri)])?;
    w.text_element("dsig11:PublicKey", &[], &b64(point))?;
    w.end_element("dsig11:ECKeyValue")
}
