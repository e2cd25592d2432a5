#![forbid(unsafe_code)]

//! Key handles and the material they wrap.

use sigill_core::{Error, Result};
use std::fmt;
use std::ops::BitOr;

/// Usage flags for a key.
///
/// A set of bits; combine with `|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyUsage(u8);

impl KeyUsage {
    pub const SIGN: KeyUsage = KeyUsage(0b0001);
    pub const VERIFY: KeyUsage = KeyUsage(0b0010);
    pub const ENCRYPT: KeyUsage = KeyUsage(0b0100);
    pub const DECRYPT: KeyUsage = KeyUsage(0b1000);
    pub const ANY: KeyUsage = KeyUsage(0b1111);

    pub const fn empty() -> Self {
        KeyUsage(0)
    }

    /// True when every bit of `other` is set in `self`.
    pub const fn contains(self, other: KeyUsage) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Parse a usage name (`sign`, `verify`, `encrypt`, `decrypt`, `any`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "sign" => Some(Self::SIGN),
            "verify" => Some(Self::VERIFY),
            "encrypt" => Some(Self::ENCRYPT),
            "decrypt" => Some(Self::DECRYPT),
            "any" => Some(Self::ANY),
            _ => None,
        }
    }
}

impl BitOr for KeyUsage {
    type Output = KeyUsage;

    fn bitor(self, rhs: KeyUsage) -> KeyUsage {
        KeyUsage(self.0 | rhs.0)
    }
}

/// Which algorithm family a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Rsa,
    Dsa,
    EcP256,
    EcP384,
    Hmac,
    Aes,
    Des3,
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KeyKind::Rsa => "RSA",
            KeyKind::Dsa => "DSA",
            KeyKind::EcP256 => "EC P-256",
            KeyKind::EcP384 => "EC P-384",
            KeyKind::Hmac => "HMAC",
            KeyKind::Aes => "AES",
            KeyKind::Des3 => "3DES",
        })
    }
}

/// The underlying key data. One variant per key shape.
#[derive(Clone)]
pub enum KeyMaterial {
    RsaPrivate(rsa::RsaPrivateKey),
    RsaPublic(rsa::RsaPublicKey),
    DsaPrivate(dsa::SigningKey),
    DsaPublic(dsa::VerifyingKey),
    P256Private(p256::ecdsa::SigningKey),
    P256Public(p256::ecdsa::VerifyingKey),
    P384Private(p384::ecdsa::SigningKey),
    P384Public(p384::ecdsa::VerifyingKey),
    Hmac(Vec<u8>),
    Aes(Vec<u8>),
    Des3(Vec<u8>),
}

impl KeyMaterial {
    pub fn kind(&self) -> KeyKind {
        match self {
            Self::RsaPrivate(_) | Self::RsaPublic(_) => KeyKind::Rsa,
            Self::DsaPrivate(_) | Self::DsaPublic(_) => KeyKind::Dsa,
            Self::P256Private(_) | Self::P256Public(_) => KeyKind::EcP256,
            Self::P384Private(_) | Self::P384Public(_) => KeyKind::EcP384,
            Self::Hmac(_) => KeyKind::Hmac,
            Self::Aes(_) => KeyKind::Aes,
            Self::Des3(_) => KeyKind::Des3,
        }
    }

    /// True for asymmetric private keys.
    pub fn is_private(&self) -> bool {
        matches!(
            self,
            Self::RsaPrivate(_) | Self::DsaPrivate(_) | Self::P256Private(_) | Self::P384Private(_)
        )
    }

    pub fn is_secret(&self) -> bool {
        matches!(self, Self::Hmac(_) | Self::Aes(_) | Self::Des3(_))
    }

    /// Key size in bits: the modulus for RSA, P for DSA, the field for EC.
    pub fn bits(&self) -> usize {
        use rsa::traits::PublicKeyParts;
        match self {
            Self::RsaPrivate(k) => k.n().bits(),
            Self::RsaPublic(k) => k.n().bits(),
            Self::DsaPrivate(k) => k.verifying_key().components().p().bits(),
            Self::DsaPublic(k) => k.components().p().bits(),
            Self::P256Private(_) | Self::P256Public(_) => 256,
            Self::P384Private(_) | Self::P384Public(_) => 384,
            Self::Hmac(k) | Self::Aes(k) | Self::Des3(k) => k.len() * 8,
        }
    }

    /// The public half of an asymmetric key. `None` for secret keys.
    pub fn public_part(&self) -> Option<KeyMaterial> {
        match self {
            Self::RsaPrivate(k) => Some(Self::RsaPublic(k.to_public_key())),
            Self::DsaPrivate(k) => Some(Self::DsaPublic(k.verifying_key().clone())),
            Self::P256Private(k) => Some(Self::P256Public(*k.verifying_key())),
            Self::P384Private(k) => Some(Self::P384Public(*k.verifying_key())),
            Self::RsaPublic(_) | Self::DsaPublic(_) | Self::P256Public(_) | Self::P384Public(_) => {
                Some(self.clone())
            }
            Self::Hmac(_) | Self::Aes(_) | Self::Des3(_) => None,
        }
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_secret() {
            write!(f, "{} key ({} bytes)", self.kind(), self.bits() / 8)
        } else if self.is_private() {
            write!(f, "{} private key ({} bits)", self.kind(), self.bits())
        } else {
            write!(f, "{} public key ({} bits)", self.kind(), self.bits())
        }
    }
}

/// An algorithm-tagged key with its permitted usages.
///
/// Immutable once built; clone it to hand the same key to several
/// algorithm objects.
#[derive(Clone)]
pub struct KeyHandle {
    material: KeyMaterial,
    usage: KeyUsage,
    name: Option<String>,
    certificate: Option<Vec<u8>>,
}

impl KeyHandle {
    pub fn new(material: KeyMaterial, usage: KeyUsage) -> Self {
        Self {
            material,
            usage,
            name: None,
            certificate: None,
        }
    }

    /// Set the key name used for `KeyName` lookups.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach the DER certificate the key was taken from.
    pub fn with_certificate(mut self, der: Vec<u8>) -> Self {
        self.certificate = Some(der);
        self
    }

    pub fn material(&self) -> &KeyMaterial {
        &self.material
    }

    pub fn kind(&self) -> KeyKind {
        self.material.kind()
    }

    pub fn usage(&self) -> KeyUsage {
        self.usage
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn certificate(&self) -> Option<&[u8]> {
        self.certificate.as_deref()
    }

    pub fn permits(&self, usage: KeyUsage) -> bool {
        self.usage.contains(usage)
    }

    /// Fail with [`Error::KeyMismatch`] unless the key may be used for `usage`.
    pub fn require_usage(&self, usage: KeyUsage) -> Result<()> {
        if self.permits(usage) {
            Ok(())
        } else {
            Err(Error::KeyMismatch(format!(
                "{} key is not usable for {usage:?}",
                self.kind()
            )))
        }
    }

    /// A verify-only copy holding just the public half.
    pub fn public_handle(&self) -> Option<KeyHandle> {
        let material = self.material.public_part()?;
        Some(KeyHandle {
            material,
            usage: KeyUsage::VERIFY | KeyUsage::ENCRYPT,
            name: self.name.clone(),
            certificate: self.certificate.clone(),
        })
    }

    /// The raw bytes of a secret (HMAC, AES or 3DES) key.
    ///
    /// Asymmetric keys never leave their typed representation.
    pub fn export_raw_bytes(&self) -> Result<&[u8]> {
        match &self.material {
            KeyMaterial::Hmac(k) | KeyMaterial::Aes(k) | KeyMaterial::Des3(k) => Ok(k),
            other => Err(Error::KeyMismatch(format!(
                "raw export is not available for {} keys",
                other.kind()
            ))),
        }
    }
}

impl fmt::Debug for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyHandle")
            .field("material", &self.material)
            .field("usage", &self.usage)
            .field("name", &self.name)
            .field("certificate", &self.certificate.as_ref().map(|c| c.len()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_bits() {
        let u = KeyUsage::SIGN | KeyUsage::VERIFY;
        assert!(u.contains(KeyUsage::SIGN));
        assert!(u.contains(KeyUsage::VERIFY));
        assert!(!u.contains(KeyUsage::DECRYPT));
        assert!(KeyUsage::ANY.contains(u));
        assert!(KeyUsage::empty().is_empty());
        assert_eq!(KeyUsage::from_name("Decrypt"), Some(KeyUsage::DECRYPT));
        assert_eq!(KeyUsage::from_name("wrap"), None);
    }

    #[test]
    fn test_export_raw_bytes_secret_only() {
        let hmac = KeyHandle::new(KeyMaterial::Hmac(b"secret".to_vec()), KeyUsage::ANY);
        assert_eq!(hmac.export_raw_bytes().unwrap(), b"secret");
        assert!(hmac.public_handle().is_none());

        let sk = p256::ecdsa::SigningKey::random(&mut rand::thread_rng());
        let ec = KeyHandle::new(KeyMaterial::P256Private(sk), KeyUsage::SIGN);
        let err = ec.export_raw_bytes().unwrap_err();
        assert!(matches!(err, Error::KeyMismatch(_)));
    }

    #[test]
    fn test_public_handle() {
        let sk = p256::ecdsa::SigningKey::random(&mut rand::thread_rng());
        let key = KeyHandle::new(KeyMaterial::P256Private(sk), KeyUsage::SIGN).with_name("ec");
        let public = key.public_handle().unwrap();
        assert!(!public.material().is_private());
        assert_eq!(public.kind(), KeyKind::EcP256);
        assert_eq!(public.name(), Some("ec"));
        assert!(public.permits(KeyUsage::VERIFY));
        assert!(public.require_usage(KeyUsage::SIGN).is_err());
    }

    #[test]
    fn test_debug_hides_secret() {
        let key = KeyHandle::new(KeyMaterial::Aes(vec![7u8; 16]), KeyUsage::ANY);
        let shown = format!("{key:?}");
        assert!(shown.contains("AES key (16 bytes)"));
        assert!(!shown.contains("7, 7"));
    }
}
