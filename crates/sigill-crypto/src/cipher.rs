#![forbid(unsafe_code)]

//! Block cipher algorithm implementations (AES-CBC, AES-GCM, 3DES-CBC).
//!
//! Ciphertext is framed the way XML Encryption stores it: CBC output is
//! `IV || ciphertext`, GCM output is `IV (96 bits) || ciphertext || tag (128 bits)`.

use sigill_core::{algorithm, Error, Result};
use sigill_keys::{KeyHandle, KeyKind, KeyMaterial};

const GCM_IV_LEN: usize = 12;
const GCM_TAG_LEN: usize = 16;

/// A supported block encryption algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherKind {
    TripleDesCbc,
    Aes128Cbc,
    Aes192Cbc,
    Aes256Cbc,
    Aes128Gcm,
    Aes256Gcm,
}

impl CipherKind {
    pub fn from_uri(uri: &str) -> Result<Self> {
        Ok(match uri {
            algorithm::TRIPLEDES_CBC => CipherKind::TripleDesCbc,
            algorithm::AES128_CBC => CipherKind::Aes128Cbc,
            algorithm::AES192_CBC => CipherKind::Aes192Cbc,
            algorithm::AES256_CBC => CipherKind::Aes256Cbc,
            algorithm::AES128_GCM => CipherKind::Aes128Gcm,
            algorithm::AES256_GCM => CipherKind::Aes256Gcm,
            _ => return Err(Error::UnsupportedAlgorithm(format!("cipher: {uri}"))),
        })
    }

    pub fn uri(self) -> &'static str {
        match self {
            CipherKind::TripleDesCbc => algorithm::TRIPLEDES_CBC,
            CipherKind::Aes128Cbc => algorithm::AES128_CBC,
            CipherKind::Aes192Cbc => algorithm::AES192_CBC,
            CipherKind::Aes256Cbc => algorithm::AES256_CBC,
            CipherKind::Aes128Gcm => algorithm::AES128_GCM,
            CipherKind::Aes256Gcm => algorithm::AES256_GCM,
        }
    }

    pub fn key_kind(self) -> KeyKind {
        match self {
            CipherKind::TripleDesCbc => KeyKind::Des3,
            _ => KeyKind::Aes,
        }
    }

    pub fn key_size(self) -> usize {
        match self {
            CipherKind::Aes128Cbc | CipherKind::Aes128Gcm => 16,
            CipherKind::Aes192Cbc | CipherKind::TripleDesCbc => 24,
            CipherKind::Aes256Cbc | CipherKind::Aes256Gcm => 32,
        }
    }

    pub fn block_size(self) -> usize {
        match self {
            CipherKind::TripleDesCbc => 8,
            _ => 16,
        }
    }

    pub fn is_gcm(self) -> bool {
        matches!(self, CipherKind::Aes128Gcm | CipherKind::Aes256Gcm)
    }

    pub fn iv_len(self) -> usize {
        if self.is_gcm() {
            GCM_IV_LEN
        } else {
            self.block_size()
        }
    }

    /// Authentication tag length; zero for CBC modes.
    pub fn tag_len(self) -> usize {
        if self.is_gcm() {
            GCM_TAG_LEN
        } else {
            0
        }
    }
}

/// A block cipher bound to a secret key.
#[derive(Clone)]
pub struct BlockCipher {
    kind: CipherKind,
    key: Vec<u8>,
}

impl std::fmt::Debug for BlockCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockCipher").field("kind", &self.kind).finish_non_exhaustive()
    }
}

impl BlockCipher {
    /// Bind the cipher named by `uri` to `key`.
    ///
    /// The key must be a secret key of the matching kind and length.
    pub fn new(uri: &str, key: &KeyHandle) -> Result<Self> {
        let kind = CipherKind::from_uri(uri)?;
        let bytes = match (kind.key_kind(), key.material()) {
            (KeyKind::Aes, KeyMaterial::Aes(k)) | (KeyKind::Des3, KeyMaterial::Des3(k)) => k,
            (_, other) => {
                return Err(Error::KeyMismatch(format!(
                    "{uri} needs a {} key, got {}",
                    kind.key_kind(),
                    other.kind()
                )))
            }
        };
        Self::with_key_bytes(kind, bytes)
    }

    pub(crate) fn with_key_bytes(kind: CipherKind, key: &[u8]) -> Result<Self> {
        if key.len() != kind.key_size() {
            return Err(Error::KeyMismatch(format!(
                "{} expects a {} byte key, got {}",
                kind.uri(),
                kind.key_size(),
                key.len()
            )));
        }
        Ok(Self {
            kind,
            key: key.to_vec(),
        })
    }

    pub fn kind(&self) -> CipherKind {
        self.kind
    }

    pub fn uri(&self) -> &'static str {
        self.kind.uri()
    }

    pub fn block_size(&self) -> usize {
        self.kind.block_size()
    }

    pub fn iv_len(&self) -> usize {
        self.kind.iv_len()
    }

    pub fn tag_len(&self) -> usize {
        self.kind.tag_len()
    }

    /// A fresh random IV of the right length.
    pub fn generate_iv(&self) -> Vec<u8> {
        use rand::RngCore;
        let mut iv = vec![0u8; self.iv_len()];
        rand::thread_rng().fill_bytes(&mut iv);
        iv
    }

    /// Encrypt `plaintext`, generating an IV when none is given.
    pub fn encrypt(&self, plaintext: &[u8], iv: Option<&[u8]>) -> Result<Vec<u8>> {
        let iv = match iv {
            Some(iv) if iv.len() != self.iv_len() => {
                return Err(Error::MalformedInput(format!(
                    "{} needs a {} byte IV, got {}",
                    self.uri(),
                    self.iv_len(),
                    iv.len()
                )))
            }
            Some(iv) => iv.to_vec(),
            None => self.generate_iv(),
        };

        let body = if self.kind.is_gcm() {
            self.gcm_encrypt(&iv, plaintext)?
        } else {
            self.cbc_encrypt(&iv, plaintext)?
        };

        let mut out = Vec::with_capacity(iv.len() + body.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&body);
        tracing::trace!(cipher = self.uri(), plaintext = plaintext.len(), output = out.len(), "encrypted");
        Ok(out)
    }

    /// Decrypt IV-framed `data`.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let iv_len = self.iv_len();
        if self.kind.is_gcm() {
            if data.len() < iv_len + GCM_TAG_LEN {
                return Err(Error::MalformedInput(format!(
                    "{} ciphertext too short: {} bytes",
                    self.uri(),
                    data.len()
                )));
            }
            return self.gcm_decrypt(&data[..iv_len], &data[iv_len..]);
        }

        let block = self.block_size();
        if data.len() < iv_len + block || (data.len() - iv_len) % block != 0 {
            return Err(Error::MalformedInput(format!(
                "{} ciphertext has invalid length {}",
                self.uri(),
                data.len()
            )));
        }
        let padded = self.cbc_decrypt(&data[..iv_len], &data[iv_len..])?;
        xmlenc_unpad(&padded, block)
    }

    // ── CBC ──────────────────────────────────────────────────────────

    fn cbc_encrypt(&self, iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        use cbc::cipher::{block_padding::NoPadding, BlockEncryptMut, KeyIvInit};

        let mut buf = pkcs7_pad(plaintext, self.block_size());
        let buf_len = buf.len();

        macro_rules! do_encrypt {
            ($c:ty) => {{
                cbc::Encryptor::<$c>::new_from_slices(&self.key, iv)
                    .map_err(|e| Error::Crypto(format!("{} init: {e}", self.uri())))?
                    .encrypt_padded_mut::<NoPadding>(&mut buf, buf_len)
                    .map_err(|e| Error::Crypto(format!("{} encrypt: {e}", self.uri())))?;
            }};
        }

        match self.kind {
            CipherKind::TripleDesCbc => do_encrypt!(des::TdesEde3),
            CipherKind::Aes128Cbc => do_encrypt!(aes::Aes128),
            CipherKind::Aes192Cbc => do_encrypt!(aes::Aes192),
            CipherKind::Aes256Cbc => do_encrypt!(aes::Aes256),
            CipherKind::Aes128Gcm | CipherKind::Aes256Gcm => {
                return Err(Error::Crypto("GCM cipher in CBC path".into()))
            }
        }
        Ok(buf)
    }

    fn cbc_decrypt(&self, iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, KeyIvInit};

        let mut buf = ciphertext.to_vec();

        macro_rules! do_decrypt {
            ($c:ty) => {{
                cbc::Decryptor::<$c>::new_from_slices(&self.key, iv)
                    .map_err(|e| Error::Crypto(format!("{} init: {e}", self.uri())))?
                    .decrypt_padded_mut::<NoPadding>(&mut buf)
                    .map_err(|e| Error::MalformedInput(format!("{} decrypt: {e}", self.uri())))?;
            }};
        }

        match self.kind {
            CipherKind::TripleDesCbc => do_decrypt!(des::TdesEde3),
            CipherKind::Aes128Cbc => do_decrypt!(aes::Aes128),
            CipherKind::Aes192Cbc => do_decrypt!(aes::Aes192),
            CipherKind::Aes256Cbc => do_decrypt!(aes::Aes256),
            CipherKind::Aes128Gcm | CipherKind::Aes256Gcm => {
                return Err(Error::Crypto("GCM cipher in CBC path".into()))
            }
        }
        Ok(buf)
    }

    // ── GCM ──────────────────────────────────────────────────────────

    fn gcm_encrypt(&self, iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        use aes_gcm::{aead::Aead, KeyInit, Nonce};

        let nonce = Nonce::from_slice(iv);
        let result = match self.kind {
            CipherKind::Aes128Gcm => aes_gcm::Aes128Gcm::new_from_slice(&self.key)
                .map_err(|e| Error::Crypto(format!("AES-GCM init: {e}")))?
                .encrypt(nonce, plaintext),
            CipherKind::Aes256Gcm => aes_gcm::Aes256Gcm::new_from_slice(&self.key)
                .map_err(|e| Error::Crypto(format!("AES-GCM init: {e}")))?
                .encrypt(nonce, plaintext),
            _ => return Err(Error::Crypto("CBC cipher in GCM path".into())),
        };
        result.map_err(|e| Error::Crypto(format!("AES-GCM encrypt: {e}")))
    }

    fn gcm_decrypt(&self, iv: &[u8], ct_and_tag: &[u8]) -> Result<Vec<u8>> {
        use aes_gcm::{aead::Aead, KeyInit, Nonce};

        let nonce = Nonce::from_slice(iv);
        let result = match self.kind {
            CipherKind::Aes128Gcm => aes_gcm::Aes128Gcm::new_from_slice(&self.key)
                .map_err(|e| Error::Crypto(format!("AES-GCM init: {e}")))?
                .decrypt(nonce, ct_and_tag),
            CipherKind::Aes256Gcm => aes_gcm::Aes256Gcm::new_from_slice(&self.key)
                .map_err(|e| Error::Crypto(format!("AES-GCM init: {e}")))?
                .decrypt(nonce, ct_and_tag),
            _ => return Err(Error::Crypto("CBC cipher in GCM path".into())),
        };
        result.map_err(|_| Error::Crypto("AES-GCM authentication failed".into()))
    }
}

// ── Padding ──────────────────────────────────────────────────────────

/// PKCS#7 pad; an aligned input gets a full block of padding.
fn pkcs7_pad(data: &[u8], block_size: usize) -> Vec<u8> {
    let pad_len = block_size - (data.len() % block_size);
    let mut padded = Vec::with_capacity(data.len() + pad_len);
    padded.extend_from_slice(data);
    padded.extend(std::iter::repeat(pad_len as u8).take(pad_len));
    padded
}

/// Strip XML Encryption padding.
///
/// Only the last byte is inspected, so ISO 10126 random filler is accepted
/// alongside PKCS#7.
fn xmlenc_unpad(data: &[u8], block_size: usize) -> Result<Vec<u8>> {
    let Some(&pad_byte) = data.last() else {
        return Err(Error::MalformedInput("empty padded block".into()));
    };
    let pad_len = pad_byte as usize;
    if pad_len == 0 || pad_len > block_size || pad_len > data.len() {
        return Err(Error::MalformedInput(format!(
            "invalid padding length {pad_len}"
        )));
    }
    Ok(data[..data.len() - pad_len].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigill_keys::build_secret_key;

    const ALL: &[(&str, KeyKind, usize)] = &[
        (algorithm::TRIPLEDES_CBC, KeyKind::Des3, 24),
        (algorithm::AES128_CBC, KeyKind::Aes, 16),
        (algorithm::AES192_CBC, KeyKind::Aes, 24),
        (algorithm::AES256_CBC, KeyKind::Aes, 32),
        (algorithm::AES128_GCM, KeyKind::Aes, 16),
        (algorithm::AES256_GCM, KeyKind::Aes, 32),
    ];

    fn cipher(uri: &str, kind: KeyKind, len: usize) -> BlockCipher {
        let bytes: Vec<u8> = (0..len as u8).map(|i| i.wrapping_mul(7) ^ 0x5a).collect();
        BlockCipher::new(uri, &build_secret_key(kind, &bytes).unwrap()).unwrap()
    }

    #[test]
    fn test_round_trip_all_ciphers_all_lengths() {
        for &(uri, kind, len) in ALL {
            let c = cipher(uri, kind, len);
            for n in 0..(4 * c.block_size() + 3) {
                let pt: Vec<u8> = (0..n as u8).collect();
                let ct = c.encrypt(&pt, None).unwrap();
                assert_eq!(c.decrypt(&ct).unwrap(), pt, "{uri} len {n}");
            }
        }
    }

    #[test]
    fn test_framing() {
        let c = cipher(algorithm::AES128_CBC, KeyKind::Aes, 16);
        let iv = [0x11u8; 16];
        let ct = c.encrypt(b"hello", Some(&iv)).unwrap();
        assert_eq!(&ct[..16], &iv);
        assert_eq!(ct.len(), 32);
        let aligned = c.encrypt(&[0u8; 16], Some(&iv)).unwrap();
        assert_eq!(aligned.len(), 16 + 32);

        let gcm = cipher(algorithm::AES256_GCM, KeyKind::Aes, 32);
        let nonce = [0x22u8; 12];
        let ct = gcm.encrypt(b"hello", Some(&nonce)).unwrap();
        assert_eq!(&ct[..12], &nonce);
        assert_eq!(ct.len(), 12 + 5 + 16);

        assert!(matches!(gcm.encrypt(b"x", Some(&[0u8; 16])), Err(Error::MalformedInput(_))));
    }

    #[test]
    fn test_aes128_cbc_five_bytes() {
        let c = cipher(algorithm::AES128_CBC, KeyKind::Aes, 16);
        let ct = c.encrypt(b"12345", None).unwrap();
        assert_eq!(c.decrypt(&ct).unwrap(), b"12345");
    }

    #[test]
    fn test_out_of_range_pad_byte_rejected() {
        let c = cipher(algorithm::AES128_CBC, KeyKind::Aes, 16);
        let iv = [0u8; 16];
        // Encrypt a block whose last byte is 0x20, then strip the padding
        // block so that byte is read as the pad length.
        let mut block = [0x41u8; 16];
        block[15] = 0x20;
        let ct = c.encrypt(&block, Some(&iv)).unwrap();
        let truncated = &ct[..32];
        assert!(matches!(c.decrypt(truncated), Err(Error::MalformedInput(_))));

        block[15] = 0;
        let ct = c.encrypt(&block, Some(&iv)).unwrap();
        assert!(matches!(c.decrypt(&ct[..32]), Err(Error::MalformedInput(_))));
    }

    #[test]
    fn test_iso10126_unpad() {
        let mut data = b"hello world!".to_vec();
        data.extend_from_slice(&[0xAB, 0xCD, 0xEF, 0x04]);
        assert_eq!(xmlenc_unpad(&data, 16).unwrap(), b"hello world!");
    }

    #[test]
    fn test_short_ciphertext_rejected() {
        let c = cipher(algorithm::TRIPLEDES_CBC, KeyKind::Des3, 24);
        assert!(matches!(c.decrypt(&[0u8; 8]), Err(Error::MalformedInput(_))));
        assert!(matches!(c.decrypt(&[0u8; 20]), Err(Error::MalformedInput(_))));

        let gcm = cipher(algorithm::AES128_GCM, KeyKind::Aes, 16);
        assert!(matches!(gcm.decrypt(&[0u8; 27]), Err(Error::MalformedInput(_))));
    }

    #[test]
    fn test_gcm_tag_failure() {
        let gcm = cipher(algorithm::AES128_GCM, KeyKind::Aes, 16);
        let mut ct = gcm.encrypt(b"authenticated", None).unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0xFF;
        assert!(matches!(gcm.decrypt(&ct), Err(Error::Crypto(_))));
    }

    #[test]
    fn test_key_mismatch() {
        let des = build_secret_key(KeyKind::Des3, &[1u8; 24]).unwrap();
        assert!(matches!(
            BlockCipher::new(algorithm::AES128_CBC, &des),
            Err(Error::KeyMismatch(_))
        ));
        let aes = build_secret_key(KeyKind::Aes, &[1u8; 16]).unwrap();
        assert!(matches!(
            BlockCipher::new(algorithm::AES256_GCM, &aes),
            Err(Error::KeyMismatch(_))
        ));
        assert!(matches!(
            BlockCipher::new("http://example.com/fake-cipher", &aes),
            Err(Error::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_descriptors() {
        let kind = CipherKind::from_uri(algorithm::AES256_GCM).unwrap();
        assert_eq!((kind.block_size(), kind.iv_len(), kind.tag_len()), (16, 12, 16));
        let kind = CipherKind::from_uri(algorithm::TRIPLEDES_CBC).unwrap();
        assert_eq!((kind.block_size(), kind.iv_len(), kind.tag_len()), (8, 8, 0));
    }
}
