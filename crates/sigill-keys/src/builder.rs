#![forbid(unsafe_code)]

//! Key construction from raw components and opaque blobs.
//!
//! Every builder validates its input up front: a key that comes out of
//! here is structurally sound, so failures at signing or verification
//! time are cryptographic rather than configuration faults.

use crate::key::{KeyHandle, KeyKind, KeyMaterial, KeyUsage};
use num_bigint_dig::prime::probably_prime;
use num_bigint_dig::BigUint;
use sha1::{Digest, Sha1};
use sigill_core::algorithm as alg;
use sigill_core::{Error, Result};

const RSA_MIN_BITS: usize = 512;
const DSA_MIN_P_BITS: usize = 512;
const FIPS186_2_MAX_COUNTER: u64 = 4095;

fn big(bytes: &[u8]) -> BigUint {
    BigUint::from_bytes_be(bytes)
}

fn one() -> BigUint {
    BigUint::from(1u32)
}

fn zero() -> BigUint {
    BigUint::from(0u32)
}

// ── RSA ──────────────────────────────────────────────────────────────

/// Build an RSA public key from its big-endian modulus and exponent.
pub fn build_rsa_key(modulus: &[u8], exponent: &[u8]) -> Result<KeyHandle> {
    let n = big(modulus);
    let e = big(exponent);

    if n.bits() < RSA_MIN_BITS {
        return Err(Error::InvalidKey(format!(
            "RSA modulus of {} bits is below the {RSA_MIN_BITS}-bit minimum",
            n.bits()
        )));
    }
    if &n % BigUint::from(2u32) == zero() {
        return Err(Error::InvalidKey("RSA modulus is even".into()));
    }
    if probably_prime(&n, 2) {
        return Err(Error::InvalidKey("RSA modulus is prime".into()));
    }
    if e < BigUint::from(3u32) || &e % BigUint::from(2u32) == zero() {
        return Err(Error::InvalidKey("RSA exponent must be odd and at least 3".into()));
    }

    let public = rsa::RsaPublicKey::new(n, e)
        .map_err(|err| Error::InvalidKey(format!("invalid RSA public key: {err}")))?;
    Ok(KeyHandle::new(
        KeyMaterial::RsaPublic(public),
        KeyUsage::VERIFY | KeyUsage::ENCRYPT,
    ))
}

// ── DSA ──────────────────────────────────────────────────────────────

/// The contents of a `DSAKeyValue`, as big-endian byte strings.
///
/// `seed` and `pgen_counter` are the FIPS 186-2 domain parameter
/// generation inputs; when present they must reproduce `q` and `p`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DsaParameters<'a> {
    pub p: &'a [u8],
    pub q: &'a [u8],
    pub g: &'a [u8],
    pub y: &'a [u8],
    pub j: Option<&'a [u8]>,
    pub seed: Option<&'a [u8]>,
    pub pgen_counter: Option<&'a [u8]>,
}

/// Build a DSA public key, validating the domain parameters.
pub fn build_dsa_key(params: &DsaParameters<'_>) -> Result<KeyHandle> {
    let p = big(params.p);
    let q = big(params.q);
    let g = big(params.g);
    let y = big(params.y);

    if p.bits() < DSA_MIN_P_BITS || q.bits() < 160 {
        return Err(Error::InvalidKey(format!(
            "DSA parameters too small: P has {} bits, Q has {} bits",
            p.bits(),
            q.bits()
        )));
    }
    if !probably_prime(&q, 20) {
        return Err(Error::InvalidKey("DSA Q is not prime".into()));
    }
    if !probably_prime(&p, 8) {
        return Err(Error::InvalidKey("DSA P is not prime".into()));
    }

    let p_minus_1 = &p - one();
    if &p_minus_1 % &q != zero() {
        return Err(Error::InvalidKey("DSA Q does not divide P-1".into()));
    }
    if g <= one() || g >= p || g.modpow(&q, &p) != one() {
        return Err(Error::InvalidKey("DSA G does not generate the order-Q subgroup".into()));
    }
    if let Some(j) = params.j {
        if big(j) != &p_minus_1 / &q {
            return Err(Error::InvalidKey("DSA J is not (P-1)/Q".into()));
        }
    }

    match (params.seed, params.pgen_counter) {
        (Some(seed), Some(counter)) => check_fips186_2(seed, counter, &p, &q)?,
        (None, None) => {}
        _ => {
            return Err(Error::InvalidKey(
                "DSA Seed and PgenCounter must be given together".into(),
            ))
        }
    }

    let components = dsa::Components::from_components(p, q, g)
        .map_err(|e| Error::InvalidKey(format!("invalid DSA components: {e}")))?;
    let public = dsa::VerifyingKey::from_components(components, y)
        .map_err(|e| Error::InvalidKey(format!("invalid DSA public key: {e}")))?;
    Ok(KeyHandle::new(KeyMaterial::DsaPublic(public), KeyUsage::VERIFY))
}

fn check_fips186_2(seed: &[u8], counter: &[u8], p: &BigUint, q: &BigUint) -> Result<()> {
    if seed.len() < 20 {
        return Err(Error::InvalidKey("DSA Seed is shorter than 160 bits".into()));
    }
    let counter = big(counter);
    if counter > BigUint::from(FIPS186_2_MAX_COUNTER) {
        return Err(Error::InvalidKey("DSA PgenCounter is out of range".into()));
    }
    if q.bits() != 160 {
        // Parameters generated under FIPS 186-3 use a different procedure.
        tracing::debug!(q_bits = q.bits(), "skipping FIPS 186-2 seed check");
        return Ok(());
    }
    if fips186_2_q(seed) != *q {
        return Err(Error::InvalidKey("DSA Q was not generated from Seed".into()));
    }
    let counter = counter
        .to_bytes_be()
        .iter()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
    if fips186_2_p(seed, q, p.bits(), counter) != *p {
        return Err(Error::InvalidKey(
            "DSA P was not generated from Seed and PgenCounter".into(),
        ));
    }
    Ok(())
}

/// SHA-1 of `(seed + offset) mod 2^seedlen`, as an integer.
fn sha1_at(seed: &[u8], offset: u64) -> BigUint {
    let modulus = one() << (seed.len() * 8);
    let value = (big(seed) + BigUint::from(offset)) % modulus;
    BigUint::from_bytes_be(&Sha1::digest(left_pad(&value.to_bytes_be(), seed.len())))
}

fn left_pad(bytes: &[u8], len: usize) -> Vec<u8> {
    let bytes = &bytes[bytes.len().saturating_sub(len)..];
    let mut out = vec![0u8; len - bytes.len()];
    out.extend_from_slice(bytes);
    out
}

/// Q from FIPS 186-2 appendix 2.2 steps 2 and 3.
pub(crate) fn fips186_2_q(seed: &[u8]) -> BigUint {
    let h0 = Sha1::digest(seed);
    let next = left_pad(&((big(seed) + one()) % (one() << (seed.len() * 8))).to_bytes_be(), seed.len());
    let h1 = Sha1::digest(next);
    let mut u: Vec<u8> = h0.iter().zip(h1.iter()).map(|(a, b)| a ^ b).collect();
    u[0] |= 0x80;
    u[19] |= 0x01;
    big(&u)
}

/// P candidate for `counter`, FIPS 186-2 appendix 2.2 steps 7 to 9.
pub(crate) fn fips186_2_p(seed: &[u8], q: &BigUint, l_bits: usize, counter: u64) -> BigUint {
    let n = (l_bits - 1) / 160;
    let b = (l_bits - 1) % 160;
    let offset = 2 + counter * (n as u64 + 1);

    let mut w = zero();
    for k in 0..=n {
        let mut v = sha1_at(seed, offset + k as u64);
        if k == n {
            v = v % (one() << b);
        }
        w = w + (v << (160 * k));
    }
    let x = w + (one() << (l_bits - 1));
    let c = &x % (q * BigUint::from(2u32));
    (x + one()) - c
}

// ── ECDSA ────────────────────────────────────────────────────────────

const P256_PRIME: &str = "ffffffff00000001000000000000000000000000ffffffffffffffffffffffff";
const P256_ORDER: &str = "ffffffff00000000ffffffffffffffffbce6faada7179e84f3b9cac2fc632551";
const P384_PRIME: &str = "fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffeffffffff0000000000000000ffffffff";
const P384_ORDER: &str = "ffffffffffffffffffffffffffffffffffffffffffffffffc7634d81f4372ddf581a0db248b0a77aecec196accc52973";

/// A supported elliptic curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcCurve {
    P256,
    P384,
}

impl EcCurve {
    /// Resolve a `NamedCurve` URI (`urn:oid:…`) or a plain curve name.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim() {
            "urn:oid:1.2.840.10045.3.1.7" | "1.2.840.10045.3.1.7" | "P-256" | "prime256v1"
            | "secp256r1" => Ok(EcCurve::P256),
            "urn:oid:1.3.132.0.34" | "1.3.132.0.34" | "P-384" | "secp384r1" => Ok(EcCurve::P384),
            other => Err(Error::UnsupportedAlgorithm(format!("EC curve: {other}"))),
        }
    }

    /// Recognize explicit domain parameters by their field prime and order.
    pub fn from_explicit(prime: &[u8], order: &[u8]) -> Result<Self> {
        let prime = hex::encode(big(prime).to_bytes_be());
        let order = hex::encode(big(order).to_bytes_be());
        match (prime.as_str(), order.as_str()) {
            (P256_PRIME, P256_ORDER) => Ok(EcCurve::P256),
            (P384_PRIME, P384_ORDER) => Ok(EcCurve::P384),
            _ => Err(Error::UnsupportedAlgorithm(
                "explicit EC parameters do not match a supported curve".into(),
            )),
        }
    }

    pub fn oid_uri(self) -> &'static str {
        match self {
            EcCurve::P256 => "urn:oid:1.2.840.10045.3.1.7",
            EcCurve::P384 => "urn:oid:1.3.132.0.34",
        }
    }

    pub fn field_bytes(self) -> usize {
        match self {
            EcCurve::P256 => 32,
            EcCurve::P384 => 48,
        }
    }
}

/// How an ECDSA key names its curve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CurveSpec {
    Named(String),
    /// Explicit prime-field parameters: the field prime and the group order.
    Explicit { prime: Vec<u8>, order: Vec<u8> },
}

impl CurveSpec {
    pub fn resolve(&self) -> Result<EcCurve> {
        match self {
            CurveSpec::Named(name) => EcCurve::from_name(name),
            CurveSpec::Explicit { prime, order } => EcCurve::from_explicit(prime, order),
        }
    }
}

fn ecdsa_digest_len(algorithm: &str) -> Option<usize> {
    match algorithm {
        alg::ECDSA_SHA1 => Some(20),
        alg::ECDSA_SHA256 => Some(32),
        alg::ECDSA_SHA384 => Some(48),
        alg::ECDSA_SHA512 => Some(64),
        _ => None,
    }
}

/// Build an ECDSA public key from an uncompressed SEC1 point.
///
/// With `algorithm` given, the curve must suit it: the URI has to be an
/// ECDSA signature method whose digest carries at least half the bits of
/// the curve field.
pub fn build_ecdsa_key(curve: &CurveSpec, public_key: &[u8], algorithm: Option<&str>) -> Result<KeyHandle> {
    let curve = curve.resolve()?;

    if let Some(uri) = algorithm {
        let digest_len = ecdsa_digest_len(uri).ok_or_else(|| {
            Error::KeyMismatch(format!("{uri} is not an ECDSA signature method"))
        })?;
        if digest_len * 2 < curve.field_bytes() {
            return Err(Error::KeyMismatch(format!(
                "{uri} is too weak for {}",
                curve.oid_uri()
            )));
        }
    }

    let expected = 1 + 2 * curve.field_bytes();
    if public_key.len() != expected || public_key[0] != 0x04 {
        return Err(Error::InvalidKey(format!(
            "EC public key must be an uncompressed point of {expected} bytes, got {}",
            public_key.len()
        )));
    }

    let material = match curve {
        EcCurve::P256 => {
            let vk = p256::ecdsa::VerifyingKey::from_sec1_bytes(public_key)
                .map_err(|e| Error::InvalidKey(format!("invalid P-256 point: {e}")))?;
            KeyMaterial::P256Public(vk)
        }
        EcCurve::P384 => {
            let vk = p384::ecdsa::VerifyingKey::from_sec1_bytes(public_key)
                .map_err(|e| Error::InvalidKey(format!("invalid P-384 point: {e}")))?;
            KeyMaterial::P384Public(vk)
        }
    };
    Ok(KeyHandle::new(material, KeyUsage::VERIFY))
}

// ── Secret keys ──────────────────────────────────────────────────────

/// Wrap raw secret bytes as an HMAC, AES or 3DES key.
pub fn build_secret_key(kind: KeyKind, bytes: &[u8]) -> Result<KeyHandle> {
    let material = match kind {
        KeyKind::Hmac if !bytes.is_empty() => KeyMaterial::Hmac(bytes.to_vec()),
        KeyKind::Aes if matches!(bytes.len(), 16 | 24 | 32) => KeyMaterial::Aes(bytes.to_vec()),
        KeyKind::Des3 if bytes.len() == 24 => KeyMaterial::Des3(bytes.to_vec()),
        KeyKind::Hmac | KeyKind::Aes | KeyKind::Des3 => {
            return Err(Error::InvalidKey(format!(
                "{} bytes is not a valid {kind} key length",
                bytes.len()
            )))
        }
        other => {
            return Err(Error::KeyMismatch(format!(
                "{other} keys cannot be built from raw secret bytes"
            )))
        }
    };
    Ok(KeyHandle::new(material, KeyUsage::ANY))
}

// ── Opaque import ────────────────────────────────────────────────────

/// Unwrap PEM armor if present; returns the label and DER bytes.
fn unarmor(data: &[u8]) -> Result<(Option<String>, Vec<u8>)> {
    let start = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(data.len());
    let trimmed = &data[start..];
    if !trimmed.starts_with(b"-----BEGIN ") {
        return Ok((None, data.to_vec()));
    }
    let (label, der) = pem_rfc7468::decode_vec(trimmed)
        .map_err(|e| Error::InvalidKey(format!("invalid PEM: {e}")))?;
    Ok((Some(label.to_owned()), der))
}

fn private_from_pkcs8(der: &[u8]) -> Option<KeyMaterial> {
    use pkcs8::der::Decode;
    use pkcs8::DecodePrivateKey;

    if let Ok(k) = rsa::RsaPrivateKey::from_pkcs8_der(der) {
        return Some(KeyMaterial::RsaPrivate(k));
    }
    if let Ok(k) = p256::ecdsa::SigningKey::from_pkcs8_der(der) {
        return Some(KeyMaterial::P256Private(k));
    }
    if let Ok(k) = p384::ecdsa::SigningKey::from_pkcs8_der(der) {
        return Some(KeyMaterial::P384Private(k));
    }
    let info = pkcs8::PrivateKeyInfo::from_der(der).ok()?;
    dsa::SigningKey::try_from(info).ok().map(KeyMaterial::DsaPrivate)
}

fn public_from_spki(der: &[u8]) -> Option<KeyMaterial> {
    use spki::der::Decode;
    use spki::DecodePublicKey;

    if let Ok(k) = rsa::RsaPublicKey::from_public_key_der(der) {
        return Some(KeyMaterial::RsaPublic(k));
    }
    if let Ok(k) = p256::ecdsa::VerifyingKey::from_public_key_der(der) {
        return Some(KeyMaterial::P256Public(k));
    }
    if let Ok(k) = p384::ecdsa::VerifyingKey::from_public_key_der(der) {
        return Some(KeyMaterial::P384Public(k));
    }
    let info = spki::SubjectPublicKeyInfoRef::from_der(der).ok()?;
    dsa::VerifyingKey::try_from(info).ok().map(KeyMaterial::DsaPublic)
}

fn rsa_from_pkcs1(der: &[u8]) -> Option<KeyMaterial> {
    use pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};

    if let Ok(k) = rsa::RsaPrivateKey::from_pkcs1_der(der) {
        return Some(KeyMaterial::RsaPrivate(k));
    }
    rsa::RsaPublicKey::from_pkcs1_der(der).ok().map(KeyMaterial::RsaPublic)
}

/// Import a PKCS#8, SPKI or PKCS#1 key (PEM or DER) for `usage`.
///
/// A public key cannot be imported for signing or decryption.
pub fn import_key_data(data: &[u8], usage: KeyUsage) -> Result<KeyHandle> {
    if usage.is_empty() {
        return Err(Error::InvalidKey("empty key usage set".into()));
    }
    let (label, der) = unarmor(data)?;

    let material = match label.as_deref() {
        Some("PRIVATE KEY") => private_from_pkcs8(&der),
        Some("PUBLIC KEY") => public_from_spki(&der),
        Some("RSA PRIVATE KEY") | Some("RSA PUBLIC KEY") => rsa_from_pkcs1(&der),
        Some("CERTIFICATE") => {
            let cert = import_certificate_data(&der)?;
            let key = restrict_usage(cert.material().clone(), usage)?;
            return Ok(key.with_certificate(der));
        }
        Some(other) => {
            return Err(Error::InvalidKey(format!("unsupported PEM label: {other}")));
        }
        None => private_from_pkcs8(&der)
            .or_else(|| public_from_spki(&der))
            .or_else(|| rsa_from_pkcs1(&der)),
    };

    let material = material.ok_or_else(|| {
        Error::InvalidKey("unrecognized key data (tried PKCS#8, SPKI and PKCS#1)".into())
    })?;
    tracing::debug!(key = ?material, "imported key data");
    restrict_usage(material, usage)
}

fn restrict_usage(material: KeyMaterial, usage: KeyUsage) -> Result<KeyHandle> {
    if !material.is_private()
        && (usage.contains(KeyUsage::SIGN) || usage.contains(KeyUsage::DECRYPT))
        && usage != KeyUsage::ANY
    {
        return Err(Error::KeyMismatch(format!(
            "{} public key cannot be used for signing or decryption",
            material.kind()
        )));
    }
    let usage = if usage == KeyUsage::ANY && !material.is_private() {
        KeyUsage::VERIFY | KeyUsage::ENCRYPT
    } else {
        usage
    };
    Ok(KeyHandle::new(material, usage))
}

/// Import an X.509 certificate (PEM or DER) and extract its public key.
pub fn import_certificate_data(data: &[u8]) -> Result<KeyHandle> {
    use der::{Decode, Encode};

    let (label, der) = unarmor(data)?;
    if let Some(label) = label.filter(|l| l != "CERTIFICATE") {
        return Err(Error::Certificate(format!("expected a CERTIFICATE, found {label}")));
    }
    let cert = x509_cert::Certificate::from_der(&der)
        .map_err(|e| Error::Certificate(format!("failed to parse X.509 certificate: {e}")))?;
    let spki_der = cert
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| Error::Certificate(format!("failed to encode SPKI: {e}")))?;
    let material = public_from_spki(&spki_der).ok_or_else(|| {
        Error::Certificate("unsupported public key algorithm in X.509 certificate".into())
    })?;
    Ok(KeyHandle::new(material, KeyUsage::VERIFY | KeyUsage::ENCRYPT).with_certificate(der))
}
