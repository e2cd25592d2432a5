#![forbid(unsafe_code)]

//! Algorithm registry mapping URIs to crypto implementations.

use crate::cipher::{BlockCipher, CipherKind};
use crate::digest::DigestAlgorithm;
use crate::keywrap::KeyWrap;
use crate::sign::{SignatureAlgorithm, SignatureMethod};
use sigill_core::algorithm::{AlgorithmUri, Family};
use sigill_core::{Error, Result};
use sigill_keys::KeyHandle;

/// What a crypto algorithm URI resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoAlgorithm {
    Digest(&'static str),
    Signature(SignatureAlgorithm),
    Cipher(CipherKind),
    KeyWrap(KeyWrap),
}

/// Central registry for the crypto algorithms.
pub struct AlgorithmRegistry;

impl AlgorithmRegistry {
    /// Look up a digest algorithm by URI.
    pub fn digest(uri: &str) -> Result<Box<dyn DigestAlgorithm>> {
        crate::digest::from_uri(uri)
    }

    /// Look up a signature (or MAC) algorithm by URI.
    pub fn signature(uri: &str) -> Result<SignatureAlgorithm> {
        SignatureAlgorithm::from_uri(uri)
    }

    /// Bind the signature algorithm named by `uri` to `key`.
    pub fn signature_method(uri: &str, key: KeyHandle) -> Result<SignatureMethod> {
        SignatureMethod::from_uri(uri, key)
    }

    /// Bind the block cipher named by `uri` to `key`.
    pub fn cipher(uri: &str, key: &KeyHandle) -> Result<BlockCipher> {
        BlockCipher::new(uri, key)
    }

    /// Look up a key wrap algorithm by URI.
    pub fn key_wrap(uri: &str) -> Result<KeyWrap> {
        KeyWrap::from_uri(uri)
    }

    /// Resolve any crypto URI.
    ///
    /// Key derivation, key transport and key agreement URIs are known to
    /// the algorithm table but have no implementation here.
    pub fn lookup(uri: &str) -> Result<CryptoAlgorithm> {
        let parsed = AlgorithmUri::parse(uri)?;
        match parsed.family() {
            Family::Digest => {
                crate::digest::from_uri(uri)?;
                Ok(CryptoAlgorithm::Digest(parsed.as_str()))
            }
            Family::Signature | Family::Mac => {
                SignatureAlgorithm::from_uri(uri).map(CryptoAlgorithm::Signature)
            }
            Family::BlockCipher => CipherKind::from_uri(uri).map(CryptoAlgorithm::Cipher),
            Family::KeyWrap => KeyWrap::from_uri(uri).map(CryptoAlgorithm::KeyWrap),
            Family::KeyDerivation | Family::KeyTransport | Family::KeyAgreement => Err(
                Error::UnsupportedAlgorithm(format!("{uri} is recognized but not implemented")),
            ),
            family => Err(Error::UnsupportedAlgorithm(format!(
                "{uri} is a {family:?} algorithm, not a crypto primitive"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigill_core::algorithm;

    #[test]
    fn test_lookup_families() {
        assert_eq!(
            AlgorithmRegistry::lookup(algorithm::SHA384_ENC).unwrap(),
            CryptoAlgorithm::Digest(algorithm::SHA384_ENC)
        );
        assert!(matches!(
            AlgorithmRegistry::lookup(algorithm::HMAC_SHA256).unwrap(),
            CryptoAlgorithm::Signature(_)
        ));
        assert_eq!(
            AlgorithmRegistry::lookup(algorithm::AES128_GCM).unwrap(),
            CryptoAlgorithm::Cipher(CipherKind::Aes128Gcm)
        );
        assert_eq!(
            AlgorithmRegistry::lookup(algorithm::KW_AES256_PAD).unwrap(),
            CryptoAlgorithm::KeyWrap(KeyWrap::AesPadded { kek_size: 32 })
        );
    }

    #[test]
    fn test_recognized_but_unimplemented() {
        for uri in [
            algorithm::RSA_OAEP,
            algorithm::RSA_PKCS1,
            algorithm::CONCAT_KDF,
            algorithm::PBKDF2,
            algorithm::ECDH_ES,
            algorithm::DH,
            algorithm::DH_ES,
        ] {
            assert!(matches!(
                AlgorithmRegistry::lookup(uri),
                Err(Error::UnsupportedAlgorithm(_))
            ));
        }
    }

    #[test]
    fn test_unknown_and_non_crypto_uris() {
        assert!(AlgorithmRegistry::lookup("urn:example:nothing").is_err());
        assert!(AlgorithmRegistry::lookup(algorithm::EXC_C14N).is_err());
        assert!(AlgorithmRegistry::digest(algorithm::SHA512).is_ok());
        assert!(AlgorithmRegistry::key_wrap(algorithm::KW_TRIPLEDES).is_ok());
    }
}
