#![forbid(unsafe_code)]

//! Signature algorithm implementations (RSA PKCS#1 v1.5, DSA, ECDSA, HMAC).
//!
//! A [`SignatureAlgorithm`] is the identity behind a `SignatureMethod`
//! URI. Binding it to a key with [`SignatureMethod::new`] validates the
//! key's type and size, so a mismatched key is a configuration error
//! reported before any data is signed.

use sigill_core::{algorithm, Error, Result};
use sigill_keys::{KeyHandle, KeyKind, KeyMaterial, KeyUsage};

/// Hash function used inside a signature scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashType {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashType {
    pub fn name(self) -> &'static str {
        match self {
            HashType::Sha1 => "SHA-1",
            HashType::Sha256 => "SHA-256",
            HashType::Sha384 => "SHA-384",
            HashType::Sha512 => "SHA-512",
        }
    }

    /// Digest length in bytes.
    pub fn output_len(self) -> usize {
        match self {
            HashType::Sha1 => 20,
            HashType::Sha256 => 32,
            HashType::Sha384 => 48,
            HashType::Sha512 => 64,
        }
    }

    pub fn digest_uri(self) -> &'static str {
        match self {
            HashType::Sha1 => algorithm::SHA1,
            HashType::Sha256 => algorithm::SHA256,
            HashType::Sha384 => algorithm::SHA384,
            HashType::Sha512 => algorithm::SHA512,
        }
    }

    fn digest(self, data: &[u8]) -> Vec<u8> {
        use digest::Digest;
        match self {
            HashType::Sha1 => sha1::Sha1::digest(data).to_vec(),
            HashType::Sha256 => sha2::Sha256::digest(data).to_vec(),
            HashType::Sha384 => sha2::Sha384::digest(data).to_vec(),
            HashType::Sha512 => sha2::Sha512::digest(data).to_vec(),
        }
    }

    fn pkcs1v15(self) -> rsa::Pkcs1v15Sign {
        match self {
            HashType::Sha1 => rsa::Pkcs1v15Sign::new::<sha1::Sha1>(),
            HashType::Sha256 => rsa::Pkcs1v15Sign::new::<sha2::Sha256>(),
            HashType::Sha384 => rsa::Pkcs1v15Sign::new::<sha2::Sha384>(),
            HashType::Sha512 => rsa::Pkcs1v15Sign::new::<sha2::Sha512>(),
        }
    }

    /// Length of the DER DigestInfo prefix PKCS#1 v1.5 puts before the hash.
    fn digest_info_prefix_len(self) -> usize {
        match self {
            HashType::Sha1 => 15,
            _ => 19,
        }
    }
}

/// The signature scheme family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureScheme {
    RsaPkcs1v15,
    Dsa,
    Ecdsa,
    Hmac,
}

/// A signature algorithm identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignatureAlgorithm {
    uri: &'static str,
    scheme: SignatureScheme,
    hash: HashType,
}

const fn entry(uri: &'static str, scheme: SignatureScheme, hash: HashType) -> SignatureAlgorithm {
    SignatureAlgorithm { uri, scheme, hash }
}

static ALGORITHMS: &[SignatureAlgorithm] = &[
    entry(algorithm::RSA_SHA1, SignatureScheme::RsaPkcs1v15, HashType::Sha1),
    entry(algorithm::RSA_SHA256, SignatureScheme::RsaPkcs1v15, HashType::Sha256),
    entry(algorithm::RSA_SHA384, SignatureScheme::RsaPkcs1v15, HashType::Sha384),
    entry(algorithm::RSA_SHA512, SignatureScheme::RsaPkcs1v15, HashType::Sha512),
    entry(algorithm::DSA_SHA1, SignatureScheme::Dsa, HashType::Sha1),
    entry(algorithm::DSA_SHA256, SignatureScheme::Dsa, HashType::Sha256),
    entry(algorithm::ECDSA_SHA1, SignatureScheme::Ecdsa, HashType::Sha1),
    entry(algorithm::ECDSA_SHA256, SignatureScheme::Ecdsa, HashType::Sha256),
    entry(algorithm::ECDSA_SHA384, SignatureScheme::Ecdsa, HashType::Sha384),
    entry(algorithm::ECDSA_SHA512, SignatureScheme::Ecdsa, HashType::Sha512),
    entry(algorithm::HMAC_SHA1, SignatureScheme::Hmac, HashType::Sha1),
    entry(algorithm::HMAC_SHA256, SignatureScheme::Hmac, HashType::Sha256),
    entry(algorithm::HMAC_SHA384, SignatureScheme::Hmac, HashType::Sha384),
    entry(algorithm::HMAC_SHA512, SignatureScheme::Hmac, HashType::Sha512),
];

impl SignatureAlgorithm {
    pub fn from_uri(uri: &str) -> Result<Self> {
        ALGORITHMS
            .iter()
            .find(|a| a.uri == uri)
            .copied()
            .ok_or_else(|| Error::UnsupportedAlgorithm(format!("signature algorithm: {uri}")))
    }

    /// Every supported signature algorithm.
    pub fn all() -> &'static [SignatureAlgorithm] {
        ALGORITHMS
    }

    pub fn uri(&self) -> &'static str {
        self.uri
    }

    pub fn scheme(&self) -> SignatureScheme {
        self.scheme
    }

    pub fn hash(&self) -> HashType {
        self.hash
    }

    pub fn digest_name(&self) -> &'static str {
        self.hash.name()
    }

    pub fn digest_len(&self) -> usize {
        self.hash.output_len()
    }

    /// Key kinds this algorithm can be bound to.
    pub fn expected_key_kinds(&self) -> &'static [KeyKind] {
        match self.scheme {
            SignatureScheme::RsaPkcs1v15 => &[KeyKind::Rsa],
            SignatureScheme::Dsa => &[KeyKind::Dsa],
            SignatureScheme::Ecdsa => &[KeyKind::EcP256, KeyKind::EcP384],
            SignatureScheme::Hmac => &[KeyKind::Hmac],
        }
    }

    /// Check that `key` has the right type and size for this algorithm.
    pub fn check_key(&self, key: &KeyHandle) -> Result<()> {
        let kind = key.kind();
        if !self.expected_key_kinds().contains(&kind) {
            return Err(Error::KeyMismatch(format!(
                "{} cannot be used with a {kind} key",
                self.uri
            )));
        }
        let bits = key.material().bits();
        match self.scheme {
            SignatureScheme::RsaPkcs1v15 => {
                let needed = self.hash.digest_info_prefix_len() + self.hash.output_len() + 11;
                if bits / 8 < needed {
                    return Err(Error::KeyMismatch(format!(
                        "{bits}-bit RSA key is too small for {}",
                        self.uri
                    )));
                }
            }
            SignatureScheme::Ecdsa => {
                if self.hash.output_len() * 16 < bits {
                    return Err(Error::KeyMismatch(format!(
                        "{} is too weak for a {kind} key",
                        self.uri
                    )));
                }
            }
            SignatureScheme::Hmac if bits == 0 => {
                return Err(Error::KeyMismatch("empty HMAC key".into()));
            }
            SignatureScheme::Dsa | SignatureScheme::Hmac => {}
        }
        Ok(())
    }
}

/// A signature algorithm bound to a key.
#[derive(Debug, Clone)]
pub struct SignatureMethod {
    algorithm: SignatureAlgorithm,
    key: KeyHandle,
    hmac_output_bits: Option<usize>,
}

impl SignatureMethod {
    pub fn new(algorithm: SignatureAlgorithm, key: KeyHandle) -> Result<Self> {
        algorithm.check_key(&key)?;
        Ok(Self {
            algorithm,
            key,
            hmac_output_bits: None,
        })
    }

    pub fn from_uri(uri: &str, key: KeyHandle) -> Result<Self> {
        Self::new(SignatureAlgorithm::from_uri(uri)?, key)
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    pub fn key(&self) -> &KeyHandle {
        &self.key
    }

    /// Truncate HMAC output to `bits` (the `HMACOutputLength` parameter).
    ///
    /// Lengths below 80 bits or half the hash size are refused.
    pub fn set_hmac_output_length(&mut self, bits: usize) -> Result<()> {
        if self.algorithm.scheme != SignatureScheme::Hmac {
            return Err(Error::MalformedInput(format!(
                "HMACOutputLength given for non-HMAC algorithm {}",
                self.algorithm.uri
            )));
        }
        let full = self.algorithm.hash.output_len() * 8;
        if bits < 80 || bits < full / 2 || bits > full || bits % 8 != 0 {
            return Err(Error::MalformedInput(format!(
                "HMACOutputLength {bits} is not acceptable for {}",
                self.algorithm.uri
            )));
        }
        self.hmac_output_bits = Some(bits);
        Ok(())
    }

    fn private_key_missing(&self) -> Error {
        Error::KeyMismatch(format!(
            "{} signing needs a private {} key",
            self.algorithm.uri,
            self.key.kind()
        ))
    }

    /// Sign `data`, returning the raw `SignatureValue` bytes.
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.key.require_usage(KeyUsage::SIGN)?;
        let hash = self.algorithm.hash;
        match self.key.material() {
            KeyMaterial::RsaPrivate(k) => k
                .sign(hash.pkcs1v15(), &hash.digest(data))
                .map_err(|e| Error::Crypto(format!("RSA signing failed: {e}"))),
            KeyMaterial::DsaPrivate(k) => dsa_sign(k, hash, data),
            KeyMaterial::P256Private(k) => {
                use signature::hazmat::PrehashSigner;
                let sig: p256::ecdsa::Signature = k
                    .sign_prehash(&hash.digest(data))
                    .map_err(|e| Error::Crypto(format!("ECDSA signing failed: {e}")))?;
                Ok(sig.to_bytes().to_vec())
            }
            KeyMaterial::P384Private(k) => {
                use signature::hazmat::PrehashSigner;
                let sig: p384::ecdsa::Signature = k
                    .sign_prehash(&hash.digest(data))
                    .map_err(|e| Error::Crypto(format!("ECDSA signing failed: {e}")))?;
                Ok(sig.to_bytes().to_vec())
            }
            KeyMaterial::Hmac(k) => {
                let mut mac = compute_hmac(hash, k, data)?;
                if let Some(bits) = self.hmac_output_bits {
                    mac.truncate(bits / 8);
                }
                Ok(mac)
            }
            _ => Err(self.private_key_missing()),
        }
    }

    /// Verify `signature` over `data`.
    ///
    /// A signature that does not verify, including one that does not even
    /// decode, yields `Ok(false)`; errors are reserved for key problems.
    pub fn verify(&self, signature: &[u8], data: &[u8]) -> Result<bool> {
        self.key.require_usage(KeyUsage::VERIFY)?;
        let hash = self.algorithm.hash;
        let valid = match self.key.material() {
            KeyMaterial::RsaPrivate(k) => k
                .to_public_key()
                .verify(hash.pkcs1v15(), &hash.digest(data), signature)
                .is_ok(),
            KeyMaterial::RsaPublic(k) => k
                .verify(hash.pkcs1v15(), &hash.digest(data), signature)
                .is_ok(),
            KeyMaterial::DsaPrivate(k) => dsa_verify(k.verifying_key(), hash, signature, data),
            KeyMaterial::DsaPublic(k) => dsa_verify(k, hash, signature, data),
            KeyMaterial::P256Private(k) => p256_verify(k.verifying_key(), hash, signature, data),
            KeyMaterial::P256Public(k) => p256_verify(k, hash, signature, data),
            KeyMaterial::P384Private(k) => p384_verify(k.verifying_key(), hash, signature, data),
            KeyMaterial::P384Public(k) => p384_verify(k, hash, signature, data),
            KeyMaterial::Hmac(k) => {
                let mut expected = compute_hmac(hash, k, data)?;
                if let Some(bits) = self.hmac_output_bits {
                    expected.truncate(bits / 8);
                }
                constant_time_eq(&expected, signature)
            }
            other => {
                return Err(Error::KeyMismatch(format!(
                    "{} cannot verify with a {} key",
                    self.algorithm.uri,
                    other.kind()
                )))
            }
        };
        if !valid {
            tracing::debug!(algorithm = self.algorithm.uri, "signature did not verify");
        }
        Ok(valid)
    }
}

// ── DSA ──────────────────────────────────────────────────────────────

fn dsa_q_len(components: &dsa::Components) -> usize {
    components.q().bits().div_ceil(8)
}

fn dsa_sign(key: &dsa::SigningKey, hash: HashType, data: &[u8]) -> Result<Vec<u8>> {
    use digest::Digest;
    use signature::DigestSigner;

    macro_rules! do_sign {
        ($hasher:ty) => {
            key.try_sign_digest(<$hasher>::new_with_prefix(data))
        };
    }
    let sig: dsa::Signature = match hash {
        HashType::Sha1 => do_sign!(sha1::Sha1),
        HashType::Sha256 => do_sign!(sha2::Sha256),
        HashType::Sha384 => do_sign!(sha2::Sha384),
        HashType::Sha512 => do_sign!(sha2::Sha512),
    }
    .map_err(|e| Error::Crypto(format!("DSA signing failed: {e}")))?;

    let len = dsa_q_len(key.verifying_key().components());
    let mut out = Vec::with_capacity(len * 2);
    for part in [sig.r(), sig.s()] {
        let bytes = part.to_bytes_be();
        out.extend(std::iter::repeat(0u8).take(len.saturating_sub(bytes.len())));
        out.extend_from_slice(&bytes);
    }
    Ok(out)
}

fn dsa_verify(key: &dsa::VerifyingKey, hash: HashType, signature: &[u8], data: &[u8]) -> bool {
    use digest::Digest;
    use signature::DigestVerifier;

    let len = dsa_q_len(key.components());
    if signature.len() != len * 2 {
        return false;
    }
    let r = dsa::BigUint::from_bytes_be(&signature[..len]);
    let s = dsa::BigUint::from_bytes_be(&signature[len..]);
    let Ok(sig) = dsa::Signature::from_components(r, s) else {
        return false;
    };
    macro_rules! do_verify {
        ($hasher:ty) => {
            key.verify_digest(<$hasher>::new_with_prefix(data), &sig)
        };
    }
    match hash {
        HashType::Sha1 => do_verify!(sha1::Sha1),
        HashType::Sha256 => do_verify!(sha2::Sha256),
        HashType::Sha384 => do_verify!(sha2::Sha384),
        HashType::Sha512 => do_verify!(sha2::Sha512),
    }
    .is_ok()
}

// ── ECDSA ────────────────────────────────────────────────────────────

fn p256_verify(key: &p256::ecdsa::VerifyingKey, hash: HashType, signature: &[u8], data: &[u8]) -> bool {
    use signature::hazmat::PrehashVerifier;
    match p256::ecdsa::Signature::from_slice(signature) {
        Ok(sig) => key.verify_prehash(&hash.digest(data), &sig).is_ok(),
        Err(_) => false,
    }
}

fn p384_verify(key: &p384::ecdsa::VerifyingKey, hash: HashType, signature: &[u8], data: &[u8]) -> bool {
    use signature::hazmat::PrehashVerifier;
    match p384::ecdsa::Signature::from_slice(signature) {
        Ok(sig) => key.verify_prehash(&hash.digest(data), &sig).is_ok(),
        Err(_) => false,
    }
}

// ── HMAC ─────────────────────────────────────────────────────────────

/// HMAC of `data` under `key` with the given hash.
pub fn compute_hmac(hash: HashType, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    use hmac::{Hmac, Mac};
    macro_rules! hmac_compute {
        ($hasher:ty) => {{
            let mut mac = <Hmac<$hasher>>::new_from_slice(key)
                .map_err(|e| Error::Crypto(format!("HMAC key rejected: {e}")))?;
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }};
    }
    Ok(match hash {
        HashType::Sha1 => hmac_compute!(sha1::Sha1),
        HashType::Sha256 => hmac_compute!(sha2::Sha256),
        HashType::Sha384 => hmac_compute!(sha2::Sha384),
        HashType::Sha512 => hmac_compute!(sha2::Sha512),
    })
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigill_keys::build_secret_key;

    fn rsa_key(bits: usize) -> KeyHandle {
        let sk = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), bits).unwrap();
        KeyHandle::new(KeyMaterial::RsaPrivate(sk), KeyUsage::SIGN | KeyUsage::VERIFY)
    }

    fn p256_key() -> KeyHandle {
        let sk = p256::ecdsa::SigningKey::random(&mut rand::thread_rng());
        KeyHandle::new(KeyMaterial::P256Private(sk), KeyUsage::SIGN | KeyUsage::VERIFY)
    }

    fn p384_key() -> KeyHandle {
        let sk = p384::ecdsa::SigningKey::random(&mut rand::thread_rng());
        KeyHandle::new(KeyMaterial::P384Private(sk), KeyUsage::SIGN | KeyUsage::VERIFY)
    }

    fn assert_round_trip(method: &SignatureMethod) {
        let data = b"<SignedInfo>canonical bytes</SignedInfo>";
        let sig = method.sign(data).unwrap();
        assert!(method.verify(&sig, data).unwrap(), "{}", method.algorithm().uri());

        let mut tampered = data.to_vec();
        tampered[3] ^= 0x01;
        assert!(!method.verify(&sig, &tampered).unwrap());

        let mut bad_sig = sig.clone();
        bad_sig[0] ^= 0x80;
        assert!(!method.verify(&bad_sig, data).unwrap());
    }

    #[test]
    fn test_rsa_round_trip_all_digests() {
        let key = rsa_key(1024);
        for uri in [
            algorithm::RSA_SHA1,
            algorithm::RSA_SHA256,
            algorithm::RSA_SHA384,
            algorithm::RSA_SHA512,
        ] {
            assert_round_trip(&SignatureMethod::from_uri(uri, key.clone()).unwrap());
        }
    }

    #[test]
    fn test_ecdsa_round_trip() {
        let p256 = p256_key();
        for uri in [
            algorithm::ECDSA_SHA1,
            algorithm::ECDSA_SHA256,
            algorithm::ECDSA_SHA384,
            algorithm::ECDSA_SHA512,
        ] {
            let method = SignatureMethod::from_uri(uri, p256.clone()).unwrap();
            assert_round_trip(&method);
            assert_eq!(method.sign(b"x").unwrap().len(), 64);
        }
        let p384 = p384_key();
        for uri in [algorithm::ECDSA_SHA256, algorithm::ECDSA_SHA384, algorithm::ECDSA_SHA512] {
            let method = SignatureMethod::from_uri(uri, p384.clone()).unwrap();
            assert_round_trip(&method);
            assert_eq!(method.sign(b"x").unwrap().len(), 96);
        }
    }

    #[test]
    fn test_dsa_round_trip() {
        let mut rng = rand::thread_rng();
        let components = dsa::Components::generate(&mut rng, dsa::KeySize::DSA_1024_160);
        let sk = dsa::SigningKey::generate(&mut rng, components);
        let key = KeyHandle::new(KeyMaterial::DsaPrivate(sk), KeyUsage::SIGN | KeyUsage::VERIFY);
        let method = SignatureMethod::from_uri(algorithm::DSA_SHA1, key).unwrap();
        assert_round_trip(&method);
        assert_eq!(method.sign(b"x").unwrap().len(), 40);
    }

    #[test]
    fn test_hmac_round_trip_and_truncation() {
        let key = build_secret_key(KeyKind::Hmac, b"secret").unwrap();
        for uri in [
            algorithm::HMAC_SHA1,
            algorithm::HMAC_SHA256,
            algorithm::HMAC_SHA384,
            algorithm::HMAC_SHA512,
        ] {
            assert_round_trip(&SignatureMethod::from_uri(uri, key.clone()).unwrap());
        }

        let mut method = SignatureMethod::from_uri(algorithm::HMAC_SHA256, key).unwrap();
        assert!(method.set_hmac_output_length(40).is_err());
        assert!(method.set_hmac_output_length(100).is_err());
        method.set_hmac_output_length(128).unwrap();
        let sig = method.sign(b"data").unwrap();
        assert_eq!(sig.len(), 16);
        assert!(method.verify(&sig, b"data").unwrap());
    }

    #[test]
    fn test_hmac_rfc2202_vector() {
        let mac = compute_hmac(HashType::Sha1, b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(hex::encode(mac), "effcdf6ae5eb2fa2d27416d5f184df9c259a7c79");
    }

    #[test]
    fn test_key_type_mismatch_is_configuration_error() {
        let err = SignatureMethod::from_uri(algorithm::RSA_SHA256, p256_key()).unwrap_err();
        assert!(matches!(err, Error::KeyMismatch(_)));

        let err = SignatureMethod::from_uri(algorithm::ECDSA_SHA1, p384_key()).unwrap_err();
        assert!(matches!(err, Error::KeyMismatch(_)));

        let hmac = build_secret_key(KeyKind::Hmac, b"k").unwrap();
        let err = SignatureMethod::from_uri(algorithm::DSA_SHA1, hmac).unwrap_err();
        assert!(matches!(err, Error::KeyMismatch(_)));

        let err = SignatureMethod::from_uri("http://example.com/rot13", p256_key()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedAlgorithm(_)));
    }

    #[test]
    fn test_public_key_cannot_sign() {
        let public = p256_key().public_handle().unwrap();
        let method = SignatureMethod::from_uri(algorithm::ECDSA_SHA256, public).unwrap();
        assert!(matches!(method.sign(b"x"), Err(Error::KeyMismatch(_))));
    }

    #[test]
    fn test_key_usage_checked_both_ways() {
        let sk = p256::ecdsa::SigningKey::random(&mut rand::thread_rng());
        let sign_only = KeyHandle::new(KeyMaterial::P256Private(sk), KeyUsage::SIGN);
        let method = SignatureMethod::from_uri(algorithm::ECDSA_SHA256, sign_only.clone()).unwrap();
        let sig = method.sign(b"x").unwrap();
        assert!(matches!(method.verify(&sig, b"x"), Err(Error::KeyMismatch(_))));

        let public = sign_only.public_handle().unwrap();
        let method = SignatureMethod::from_uri(algorithm::ECDSA_SHA256, public).unwrap();
        assert!(method.verify(&sig, b"x").unwrap());
    }

    #[test]
    fn test_descriptors() {
        let alg = SignatureAlgorithm::from_uri(algorithm::RSA_SHA384).unwrap();
        assert_eq!(alg.digest_name(), "SHA-384");
        assert_eq!(alg.digest_len(), 48);
        assert_eq!(alg.expected_key_kinds(), &[KeyKind::Rsa]);
        assert_eq!(alg.hash().digest_uri(), algorithm::SHA384);
        assert_eq!(SignatureAlgorithm::all().len(), 14);
    }
}
