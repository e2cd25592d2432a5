#![forbid(unsafe_code)]

//! Key material for sigill.
//!
//! [`KeyHandle`] wraps one key of a supported algorithm together with its
//! permitted usages. The [`builder`] functions construct handles from raw
//! components or encoded blobs, [`keyinfo`] moves keys in and out of
//! `<ds:KeyInfo>`, and [`KeysManager`] holds the keys a processing context
//! can choose from.

pub mod builder;
pub mod key;
pub mod keyinfo;
pub mod manager;

pub use builder::{
    build_dsa_key, build_ecdsa_key, build_rsa_key, build_secret_key, import_certificate_data,
    import_key_data, CurveSpec, DsaParameters, EcCurve,
};
pub use key::{KeyHandle, KeyKind, KeyMaterial, KeyUsage};
pub use manager::KeysManager;
