#![forbid(unsafe_code)]

//! Key wrap algorithms: AES-KW (RFC 3394), AES-KW with padding (RFC 5649)
//! and CMS Triple-DES key wrap (RFC 3217).

use aes_kw::Kek;
use sigill_core::{algorithm, Error, Result};
use sigill_keys::{KeyHandle, KeyMaterial};

/// A key wrap algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyWrap {
    Aes { kek_size: usize },
    AesPadded { kek_size: usize },
    TripleDes,
}

impl KeyWrap {
    pub fn from_uri(uri: &str) -> Result<Self> {
        Ok(match uri {
            algorithm::KW_AES128 => KeyWrap::Aes { kek_size: 16 },
            algorithm::KW_AES192 => KeyWrap::Aes { kek_size: 24 },
            algorithm::KW_AES256 => KeyWrap::Aes { kek_size: 32 },
            algorithm::KW_AES128_PAD => KeyWrap::AesPadded { kek_size: 16 },
            algorithm::KW_AES192_PAD => KeyWrap::AesPadded { kek_size: 24 },
            algorithm::KW_AES256_PAD => KeyWrap::AesPadded { kek_size: 32 },
            algorithm::KW_TRIPLEDES => KeyWrap::TripleDes,
            _ => return Err(Error::UnsupportedAlgorithm(format!("key wrap: {uri}"))),
        })
    }

    pub fn uri(self) -> &'static str {
        match self {
            KeyWrap::Aes { kek_size: 16 } => algorithm::KW_AES128,
            KeyWrap::Aes { kek_size: 24 } => algorithm::KW_AES192,
            KeyWrap::Aes { .. } => algorithm::KW_AES256,
            KeyWrap::AesPadded { kek_size: 16 } => algorithm::KW_AES128_PAD,
            KeyWrap::AesPadded { kek_size: 24 } => algorithm::KW_AES192_PAD,
            KeyWrap::AesPadded { .. } => algorithm::KW_AES256_PAD,
            KeyWrap::TripleDes => algorithm::KW_TRIPLEDES,
        }
    }

    pub fn kek_size(self) -> usize {
        match self {
            KeyWrap::Aes { kek_size } | KeyWrap::AesPadded { kek_size } => kek_size,
            KeyWrap::TripleDes => 24,
        }
    }

    fn kek_bytes<'k>(self, kek: &'k KeyHandle) -> Result<&'k [u8]> {
        let bytes = match (self, kek.material()) {
            (KeyWrap::TripleDes, KeyMaterial::Des3(k)) => k,
            (KeyWrap::Aes { .. } | KeyWrap::AesPadded { .. }, KeyMaterial::Aes(k)) => k,
            (_, other) => {
                return Err(Error::KeyMismatch(format!(
                    "{} cannot use a {} key as KEK",
                    self.uri(),
                    other.kind()
                )))
            }
        };
        if bytes.len() != self.kek_size() {
            return Err(Error::KeyMismatch(format!(
                "{} expects a {} byte KEK, got {}",
                self.uri(),
                self.kek_size(),
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    /// Wrap `key_data` under `kek`.
    pub fn wrap(self, kek: &KeyHandle, key_data: &[u8]) -> Result<Vec<u8>> {
        let kek = self.kek_bytes(kek)?;
        match self {
            KeyWrap::Aes { .. } => {
                if key_data.len() < 16 || key_data.len() % 8 != 0 {
                    return Err(Error::MalformedInput(format!(
                        "AES-KW input must be a multiple of 8 bytes and at least 16, got {}",
                        key_data.len()
                    )));
                }
                aes_kw(kek, AesKwOp::Wrap, key_data)
            }
            KeyWrap::AesPadded { .. } => {
                if key_data.is_empty() {
                    return Err(Error::MalformedInput("nothing to wrap".into()));
                }
                aes_kw(kek, AesKwOp::WrapPadded, key_data)
            }
            KeyWrap::TripleDes => tdes_wrap(kek, key_data),
        }
    }

    /// Unwrap `wrapped` under `kek`.
    pub fn unwrap(self, kek: &KeyHandle, wrapped: &[u8]) -> Result<Vec<u8>> {
        let kek = self.kek_bytes(kek)?;
        if wrapped.len() < 16 || wrapped.len() % 8 != 0 {
            return Err(Error::MalformedInput(format!(
                "{}: wrapped key has invalid length {}",
                self.uri(),
                wrapped.len()
            )));
        }
        match self {
            KeyWrap::Aes { .. } => aes_kw(kek, AesKwOp::Unwrap, wrapped),
            KeyWrap::AesPadded { .. } => aes_kw(kek, AesKwOp::UnwrapPadded, wrapped),
            KeyWrap::TripleDes => tdes_unwrap(kek, wrapped),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum AesKwOp {
    Wrap,
    Unwrap,
    WrapPadded,
    UnwrapPadded,
}

fn aes_kw(kek: &[u8], op: AesKwOp, data: &[u8]) -> Result<Vec<u8>> {
    macro_rules! run {
        ($aes:ty) => {{
            let kek = Kek::<$aes>::new(kek.into());
            match op {
                AesKwOp::Wrap => kek.wrap_vec(data),
                AesKwOp::Unwrap => kek.unwrap_vec(data),
                AesKwOp::WrapPadded => kek.wrap_with_padding_vec(data),
                AesKwOp::UnwrapPadded => kek.unwrap_with_padding_vec(data),
            }
        }};
    }
    let result = match kek.len() {
        16 => run!(aes::Aes128),
        24 => run!(aes::Aes192),
        32 => run!(aes::Aes256),
        n => return Err(Error::KeyMismatch(format!("unsupported AES KEK size {n}"))),
    };
    result.map_err(|e| Error::Crypto(format!("AES-KW {op:?}: {e}")))
}

// ── CMS Triple-DES key wrap ──────────────────────────────────────────

/// Fixed IV for the second 3DES-CBC pass.
const TDES_KW_IV: [u8; 8] = [0x4a, 0xdd, 0xa2, 0x2c, 0x79, 0xe8, 0x21, 0x05];

/// First 8 bytes of SHA-1 over the key (the CMS key checksum).
fn cms_key_checksum(key_data: &[u8]) -> [u8; 8] {
    use sha1::Digest;
    let hash = sha1::Sha1::digest(key_data);
    let mut out = [0u8; 8];
    out.copy_from_slice(&hash[..8]);
    out
}

fn tdes_wrap(kek: &[u8], key_data: &[u8]) -> Result<Vec<u8>> {
    use rand::RngCore;

    if key_data.is_empty() || key_data.len() % 8 != 0 {
        return Err(Error::MalformedInput(format!(
            "3DES-KW input must be a non-empty multiple of 8 bytes, got {}",
            key_data.len()
        )));
    }
    let mut wkcks = Vec::with_capacity(key_data.len() + 8);
    wkcks.extend_from_slice(key_data);
    wkcks.extend_from_slice(&cms_key_checksum(key_data));

    let mut iv = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut iv);
    let temp1 = tdes_cbc(kek, &iv, &wkcks, true)?;

    let mut temp2 = Vec::with_capacity(8 + temp1.len());
    temp2.extend_from_slice(&iv);
    temp2.extend_from_slice(&temp1);
    temp2.reverse();

    tdes_cbc(kek, &TDES_KW_IV, &temp2, true)
}

fn tdes_unwrap(kek: &[u8], wrapped: &[u8]) -> Result<Vec<u8>> {
    let mut temp2 = tdes_cbc(kek, &TDES_KW_IV, wrapped, false)?;
    temp2.reverse();
    let (iv, temp1) = temp2.split_at(8);

    let wkcks = tdes_cbc(kek, iv, temp1, false)?;
    if wkcks.len() < 16 {
        return Err(Error::MalformedInput("3DES-KW: unwrapped data too short".into()));
    }
    let (key_data, checksum) = wkcks.split_at(wkcks.len() - 8);
    if checksum != cms_key_checksum(key_data) {
        return Err(Error::Crypto("3DES-KW: key checksum mismatch".into()));
    }
    Ok(key_data.to_vec())
}

/// Unpadded 3DES-CBC over block-aligned data.
fn tdes_cbc(key: &[u8], iv: &[u8], data: &[u8], encrypt: bool) -> Result<Vec<u8>> {
    use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};

    if data.len() % 8 != 0 {
        return Err(Error::MalformedInput("3DES-KW: data not block-aligned".into()));
    }
    let mut buf = data.to_vec();
    let len = buf.len();
    if encrypt {
        cbc::Encryptor::<des::TdesEde3>::new_from_slices(key, iv)
            .map_err(|e| Error::Crypto(format!("3DES init: {e}")))?
            .encrypt_padded_mut::<NoPadding>(&mut buf, len)
            .map_err(|e| Error::Crypto(format!("3DES-CBC encrypt: {e}")))?;
    } else {
        cbc::Decryptor::<des::TdesEde3>::new_from_slices(key, iv)
            .map_err(|e| Error::Crypto(format!("3DES init: {e}")))?
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .map_err(|e| Error::Crypto(format!("3DES-CBC decrypt: {e}")))?;
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigill_keys::{build_secret_key, KeyKind};

    fn aes_kek(hex_kek: &str) -> KeyHandle {
        build_secret_key(KeyKind::Aes, &hex::decode(hex_kek).unwrap()).unwrap()
    }

    fn kw_vector(uri: &str, kek: &str, plaintext: &str, expected: &str) {
        let kw = KeyWrap::from_uri(uri).unwrap();
        let kek = aes_kek(kek);
        let pt = hex::decode(plaintext).unwrap();
        let ct = hex::decode(expected).unwrap();
        assert_eq!(kw.wrap(&kek, &pt).unwrap(), ct, "wrap {uri}");
        assert_eq!(kw.unwrap(&kek, &ct).unwrap(), pt, "unwrap {uri}");
    }

    #[test]
    fn test_rfc3394_vectors() {
        kw_vector(
            algorithm::KW_AES128,
            "000102030405060708090A0B0C0D0E0F",
            "00112233445566778899AABBCCDDEEFF",
            "1FA68B0A8112B447AEF34BD8FB5A7B829D3E862371D2CFE5",
        );
        kw_vector(
            algorithm::KW_AES192,
            "000102030405060708090A0B0C0D0E0F1011121314151617",
            "00112233445566778899AABBCCDDEEFF0001020304050607",
            "031D33264E15D33268F24EC260743EDCE1C6C7DDEE725A936BA814915C6762D2",
        );
        kw_vector(
            algorithm::KW_AES256,
            "000102030405060708090A0B0C0D0E0F101112131415161718191A1B1C1D1E1F",
            "00112233445566778899AABBCCDDEEFF000102030405060708090A0B0C0D0E0F",
            "28C9F404C4B810F4CBCCB35CFB87F8263F5786E2D80ED326CBC7F0E71A99F43BFB988B9B7A02DD21",
        );
    }

    #[test]
    fn test_rfc5649_vectors() {
        let kek = "5840df6e29b02af1ab493b705bf16ea1ae8338f4dcc176a8";
        kw_vector(
            algorithm::KW_AES192_PAD,
            kek,
            "c37b7e6492584340bed12207808941155068f738",
            "138bdeaa9b8fa7fc61f97742e72248ee5ae6ae5360d1ae6a5f54f373fa543b6a",
        );
        kw_vector(
            algorithm::KW_AES192_PAD,
            kek,
            "466f7250617369",
            "afbeb0f07dfbf5419200f2ccb50bb24f",
        );
    }

    #[test]
    fn test_aes_kw_integrity_failure() {
        let kw = KeyWrap::from_uri(algorithm::KW_AES128).unwrap();
        let kek = aes_kek("000102030405060708090A0B0C0D0E0F");
        let mut wrapped = kw.wrap(&kek, &[0x33; 16]).unwrap();
        wrapped[0] ^= 0xFF;
        assert!(matches!(kw.unwrap(&kek, &wrapped), Err(Error::Crypto(_))));
    }

    #[test]
    fn test_kek_mismatch() {
        let kw = KeyWrap::from_uri(algorithm::KW_AES256).unwrap();
        let kek = aes_kek("000102030405060708090A0B0C0D0E0F");
        assert!(matches!(kw.wrap(&kek, &[0u8; 16]), Err(Error::KeyMismatch(_))));

        let des = build_secret_key(KeyKind::Des3, &[7u8; 24]).unwrap();
        let kw = KeyWrap::from_uri(algorithm::KW_AES128).unwrap();
        assert!(matches!(kw.wrap(&des, &[0u8; 16]), Err(Error::KeyMismatch(_))));
    }

    #[test]
    fn test_tdes_round_trip() {
        let kek = build_secret_key(KeyKind::Des3, &hex::decode(
            "0102030405060708090a0b0c0d0e0f101112131415161718",
        ).unwrap())
        .unwrap();
        let key_data = hex::decode("a1a2a3a4a5a6a7a8b1b2b3b4b5b6b7b8c1c2c3c4c5c6c7c8").unwrap();
        let kw = KeyWrap::from_uri(algorithm::KW_TRIPLEDES).unwrap();
        let wrapped = kw.wrap(&kek, &key_data).unwrap();
        assert_eq!(wrapped.len(), key_data.len() + 16);
        assert_eq!(kw.unwrap(&kek, &wrapped).unwrap(), key_data);

        let mut bad = wrapped.clone();
        bad[5] ^= 1;
        assert!(kw.unwrap(&kek, &bad).is_err());
    }

    #[test]
    fn test_uri_round_trip() {
        for uri in [
            algorithm::KW_AES128,
            algorithm::KW_AES192,
            algorithm::KW_AES256,
            algorithm::KW_AES128_PAD,
            algorithm::KW_AES192_PAD,
            algorithm::KW_AES256_PAD,
            algorithm::KW_TRIPLEDES,
        ] {
            assert_eq!(KeyWrap::from_uri(uri).unwrap().uri(), uri);
        }
        assert!(matches!(
            KeyWrap::from_uri(algorithm::RSA_OAEP),
            Err(Error::UnsupportedAlgorithm(_))
        ));
    }
}
