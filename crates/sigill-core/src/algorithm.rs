#![forbid(unsafe_code)]

//! Algorithm URI constants and the fixed algorithm table.
//!
//! Every URI that may appear in an `Algorithm` attribute is listed here
//! together with its family and the first signature version that accepts
//! it. Lookups go through [`AlgorithmUri::parse`]; anything not in the
//! table is an unsupported algorithm, never a no-op.

use crate::error::{Error, Result};
use crate::version::SignatureVersion;

// ── Digest algorithms ────────────────────────────────────────────────

pub const SHA1: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
pub const SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
pub const SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#sha384";
pub const SHA384_ENC: &str = "http://www.w3.org/2001/04/xmlenc#sha384";
pub const SHA512: &str = "http://www.w3.org/2001/04/xmlenc#sha512";
pub const RIPEMD160: &str = "http://www.w3.org/2001/04/xmlenc#ripemd160";

// ── HMAC signature algorithms ────────────────────────────────────────

pub const HMAC_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#hmac-sha1";
pub const HMAC_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#hmac-sha256";
pub const HMAC_SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#hmac-sha384";
pub const HMAC_SHA512: &str = "http://www.w3.org/2001/04/xmldsig-more#hmac-sha512";

// ── Public key signature algorithms ──────────────────────────────────

pub const DSA_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#dsa-sha1";
pub const DSA_SHA256: &str = "http://www.w3.org/2009/xmldsig11#dsa-sha256";

pub const RSA_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
pub const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub const RSA_SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384";
pub const RSA_SHA512: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512";

pub const ECDSA_SHA1: &str = "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha1";
pub const ECDSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256";
pub const ECDSA_SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha384";
pub const ECDSA_SHA512: &str = "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha512";

// ── Canonicalization ─────────────────────────────────────────────────

pub const C14N: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
pub const C14N_WITH_COMMENTS: &str =
    "http://www.w3.org/TR/2001/REC-xml-c14n-20010315#WithComments";
pub const EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
pub const EXC_C14N_WITH_COMMENTS: &str = "http://www.w3.org/2001/10/xml-exc-c14n#WithComments";
pub const C14N11: &str = "http://www.w3.org/2006/12/xml-c14n11";
pub const C14N11_WITH_COMMENTS: &str = "http://www.w3.org/2006/12/xml-c14n11#WithComments";
pub const C14N20: &str = "http://www.w3.org/2010/xml-c14n2";

// ── Transform algorithms ─────────────────────────────────────────────

pub const BASE64: &str = "http://www.w3.org/2000/09/xmldsig#base64";
pub const ENVELOPED_SIGNATURE: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
pub const XPATH: &str = "http://www.w3.org/TR/1999/REC-xpath-19991116";
pub const XPATH2: &str = "http://www.w3.org/2002/06/xmldsig-filter2";
pub const XSLT: &str = "http://www.w3.org/TR/1999/REC-xslt-19991116";

// ── DSig 2.0 selections ──────────────────────────────────────────────

pub const DSIG2_XML_SELECTION: &str = "http://www.w3.org/2010/xmldsig2#xml";
pub const DSIG2_BINARY_EXTERNAL: &str = "http://www.w3.org/2010/xmldsig2#binaryExternal";
pub const DSIG2_BINARY_FROM_BASE64: &str = "http://www.w3.org/2010/xmldsig2#binaryfromBase64";

// ── Block cipher algorithms ──────────────────────────────────────────

pub const TRIPLEDES_CBC: &str = "http://www.w3.org/2001/04/xmlenc#tripledes-cbc";
pub const AES128_CBC: &str = "http://www.w3.org/2001/04/xmlenc#aes128-cbc";
pub const AES192_CBC: &str = "http://www.w3.org/2001/04/xmlenc#aes192-cbc";
pub const AES256_CBC: &str = "http://www.w3.org/2001/04/xmlenc#aes256-cbc";
pub const AES128_GCM: &str = "http://www.w3.org/2009/xmlenc11#aes128-gcm";
pub const AES256_GCM: &str = "http://www.w3.org/2009/xmlenc11#aes256-gcm";

// ── Key derivation algorithms ────────────────────────────────────────

pub const CONCAT_KDF: &str = "http://www.w3.org/2009/xmlenc11#ConcatKDF";
pub const PBKDF2: &str = "http://www.w3.org/2009/xmlenc11#pbkdf2";

// ── Key transport algorithms ─────────────────────────────────────────

pub const RSA_PKCS1: &str = "http://www.w3.org/2001/04/xmlenc#rsa-1_5";
pub const RSA_OAEP: &str = "http://www.w3.org/2001/04/xmlenc#rsa-oaep-mgf1p";
pub const RSA_OAEP_ENC11: &str = "http://www.w3.org/2009/xmlenc11#rsa-oaep";

// ── Key agreement algorithms ─────────────────────────────────────────

pub const ECDH_ES: &str = "http://www.w3.org/2009/xmlenc11#ECDH-ES";
pub const DH: &str = "http://www.w3.org/2001/04/xmlenc#dh";
pub const DH_ES: &str = "http://www.w3.org/2009/xmlenc11#dh-es";

// ── Key wrap algorithms ──────────────────────────────────────────────

pub const KW_TRIPLEDES: &str = "http://www.w3.org/2001/04/xmlenc#kw-tripledes";
pub const KW_AES128: &str = "http://www.w3.org/2001/04/xmlenc#kw-aes128";
pub const KW_AES192: &str = "http://www.w3.org/2001/04/xmlenc#kw-aes192";
pub const KW_AES256: &str = "http://www.w3.org/2001/04/xmlenc#kw-aes256";
pub const KW_AES128_PAD: &str = "http://www.w3.org/2009/xmlenc11#kw-aes-128-pad";
pub const KW_AES192_PAD: &str = "http://www.w3.org/2009/xmlenc11#kw-aes-192-pad";
pub const KW_AES256_PAD: &str = "http://www.w3.org/2009/xmlenc11#kw-aes-256-pad";

/// What kind of operation an algorithm URI names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Digest,
    Mac,
    Signature,
    Canonicalization,
    Encoding,
    Transform,
    Selection,
    BlockCipher,
    KeyDerivation,
    KeyTransport,
    KeyAgreement,
    KeyWrap,
}

struct Entry {
    uri: &'static str,
    family: Family,
    /// First signature version accepting the URI. `None` for encryption
    /// algorithms, which the signature version does not gate.
    since: Option<SignatureVersion>,
}

const fn sig(uri: &'static str, family: Family, since: SignatureVersion) -> Entry {
    Entry {
        uri,
        family,
        since: Some(since),
    }
}

const fn enc(uri: &'static str, family: Family) -> Entry {
    Entry {
        uri,
        family,
        since: None,
    }
}

use Family::*;
use SignatureVersion::{V1_0, V1_1, V2_0};

static TABLE: &[Entry] = &[
    sig(SHA1, Digest, V1_0),
    sig(SHA256, Digest, V1_1),
    sig(SHA384, Digest, V1_1),
    sig(SHA384_ENC, Digest, V1_1),
    sig(SHA512, Digest, V1_1),
    sig(RIPEMD160, Digest, V1_1),
    sig(HMAC_SHA1, Mac, V1_0),
    sig(HMAC_SHA256, Mac, V1_1),
    sig(HMAC_SHA384, Mac, V1_1),
    sig(HMAC_SHA512, Mac, V1_1),
    sig(DSA_SHA1, Signature, V1_0),
    sig(DSA_SHA256, Signature, V1_1),
    sig(RSA_SHA1, Signature, V1_0),
    sig(RSA_SHA256, Signature, V1_1),
    sig(RSA_SHA384, Signature, V1_1),
    sig(RSA_SHA512, Signature, V1_1),
    sig(ECDSA_SHA1, Signature, V1_1),
    sig(ECDSA_SHA256, Signature, V1_1),
    sig(ECDSA_SHA384, Signature, V1_1),
    sig(ECDSA_SHA512, Signature, V1_1),
    sig(C14N, Canonicalization, V1_0),
    sig(C14N_WITH_COMMENTS, Canonicalization, V1_0),
    sig(EXC_C14N, Canonicalization, V1_0),
    sig(EXC_C14N_WITH_COMMENTS, Canonicalization, V1_0),
    sig(C14N11, Canonicalization, V1_1),
    sig(C14N11_WITH_COMMENTS, Canonicalization, V1_1),
    sig(C14N20, Canonicalization, V2_0),
    sig(BASE64, Encoding, V1_0),
    sig(ENVELOPED_SIGNATURE, Transform, V1_0),
    sig(XPATH, Transform, V1_0),
    sig(XPATH2, Transform, V1_0),
    sig(XSLT, Transform, V1_0),
    sig(DSIG2_XML_SELECTION, Selection, V2_0),
    sig(DSIG2_BINARY_EXTERNAL, Selection, V2_0),
    sig(DSIG2_BINARY_FROM_BASE64, Selection, V2_0),
    enc(TRIPLEDES_CBC, BlockCipher),
    enc(AES128_CBC, BlockCipher),
    enc(AES192_CBC, BlockCipher),
    enc(AES256_CBC, BlockCipher),
    enc(AES128_GCM, BlockCipher),
    enc(AES256_GCM, BlockCipher),
    enc(CONCAT_KDF, KeyDerivation),
    enc(PBKDF2, KeyDerivation),
    enc(RSA_PKCS1, KeyTransport),
    enc(RSA_OAEP, KeyTransport),
    enc(RSA_OAEP_ENC11, KeyTransport),
    enc(ECDH_ES, KeyAgreement),
    enc(DH, KeyAgreement),
    enc(DH_ES, KeyAgreement),
    enc(KW_TRIPLEDES, KeyWrap),
    enc(KW_AES128, KeyWrap),
    enc(KW_AES192, KeyWrap),
    enc(KW_AES256, KeyWrap),
    enc(KW_AES128_PAD, KeyWrap),
    enc(KW_AES192_PAD, KeyWrap),
    enc(KW_AES256_PAD, KeyWrap),
];

/// An interned algorithm identifier.
///
/// Only obtainable through [`AlgorithmUri::parse`] (or the `TryFrom`
/// impl), so holding one proves the URI is in the algorithm table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlgorithmUri(&'static str);

impl AlgorithmUri {
    /// Look `uri` up in the algorithm table.
    pub fn parse(uri: &str) -> Result<Self> {
        lookup(uri)
            .map(|e| AlgorithmUri(e.uri))
            .ok_or_else(|| Error::UnsupportedAlgorithm(uri.to_owned()))
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }

    /// Every URI in the algorithm table, in table order.
    pub fn all() -> impl Iterator<Item = AlgorithmUri> {
        TABLE.iter().map(|e| AlgorithmUri(e.uri))
    }

    /// First signature version accepting this URI; `None` when the
    /// version does not gate it.
    pub fn since(&self) -> Option<SignatureVersion> {
        lookup(self.0).and_then(|e| e.since)
    }

    pub fn family(&self) -> Family {
        // Construction guarantees the entry exists.
        lookup(self.0).map(|e| e.family).unwrap_or(Transform)
    }

    /// Whether this algorithm may be used under `version`.
    pub fn permitted_in(&self, version: SignatureVersion) -> bool {
        match lookup(self.0).and_then(|e| e.since) {
            Some(since) => since <= version,
            None => true,
        }
    }

    /// Fail with [`Error::UnsupportedAlgorithm`] when the active version
    /// does not accept this algorithm.
    pub fn require_version(&self, version: SignatureVersion) -> Result<()> {
        if self.permitted_in(version) {
            Ok(())
        } else {
            Err(Error::UnsupportedAlgorithm(format!(
                "{} is not permitted by XML Signature {version}",
                self.0
            )))
        }
    }
}

impl std::fmt::Display for AlgorithmUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

impl TryFrom<&str> for AlgorithmUri {
    type Error = Error;

    fn try_from(uri: &str) -> Result<Self> {
        AlgorithmUri::parse(uri)
    }
}

fn lookup(uri: &str) -> Option<&'static Entry> {
    TABLE.iter().find(|e| e.uri == uri)
}

/// Shorthand for `AlgorithmUri::parse(uri)?.require_version(version)`.
pub fn check_permitted(uri: &str, version: SignatureVersion) -> Result<AlgorithmUri> {
    let alg = AlgorithmUri::parse(uri)?;
    alg.require_version(version)?;
    Ok(alg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_uri_is_unsupported() {
        let err = AlgorithmUri::parse("http://example.com/rot13").unwrap_err();
        assert!(matches!(err, Error::UnsupportedAlgorithm(_)));
    }

    #[test]
    fn test_table_has_no_duplicates() {
        for (i, a) in TABLE.iter().enumerate() {
            for b in &TABLE[i + 1..] {
                assert_ne!(a.uri, b.uri);
            }
        }
    }

    #[test]
    fn test_families() {
        assert_eq!(AlgorithmUri::parse(SHA256).unwrap().family(), Digest);
        assert_eq!(AlgorithmUri::parse(HMAC_SHA1).unwrap().family(), Mac);
        assert_eq!(AlgorithmUri::parse(C14N20).unwrap().family(), Canonicalization);
        assert_eq!(AlgorithmUri::parse(KW_AES256_PAD).unwrap().family(), KeyWrap);
        assert_eq!(AlgorithmUri::parse(DH_ES).unwrap().family(), KeyAgreement);
    }

    #[test]
    fn test_version_gating() {
        let ecdsa = AlgorithmUri::parse(ECDSA_SHA512).unwrap();
        assert!(!ecdsa.permitted_in(V1_0));
        assert!(ecdsa.permitted_in(V1_1));
        assert!(ecdsa.permitted_in(V2_0));
        assert!(ecdsa.require_version(V1_0).is_err());

        let rsa = AlgorithmUri::parse(RSA_SHA1).unwrap();
        assert!(rsa.permitted_in(V1_0));

        let c14n2 = AlgorithmUri::parse(C14N20).unwrap();
        assert!(!c14n2.permitted_in(V1_1));
        assert!(c14n2.permitted_in(V2_0));
    }

    #[test]
    fn test_encryption_uris_not_gated() {
        let gcm = AlgorithmUri::parse(AES256_GCM).unwrap();
        assert!(gcm.permitted_in(V1_0));
        assert!(check_permitted(KW_TRIPLEDES, V1_0).is_ok());
    }

    #[test]
    fn test_table_iteration() {
        let all: Vec<AlgorithmUri> = AlgorithmUri::all().collect();
        assert!(all.iter().any(|a| a.as_str() == C14N20 && a.since() == Some(SignatureVersion::V2_0)));
        assert!(all.iter().any(|a| a.as_str() == AES128_GCM && a.since().is_none()));
        assert!(all.iter().all(|a| AlgorithmUri::parse(a.as_str()).is_ok()));
    }
}
