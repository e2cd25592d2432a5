#![forbid(unsafe_code)]

//! Cryptographic algorithm layer for the Sigill XML Signature library.
//!
//! Digests, signature algorithms bound to keys, block ciphers with XML
//! Encryption IV/tag framing, and key wrapping, all addressed by their
//! algorithm URIs.

pub mod cipher;
pub mod digest;
pub mod keywrap;
pub mod registry;
pub mod sign;

pub use cipher::{BlockCipher, CipherKind};
pub use digest::DigestAlgorithm;
pub use keywrap::KeyWrap;
pub use registry::{AlgorithmRegistry, CryptoAlgorithm};
pub use sign::{compute_hmac, HashType, SignatureAlgorithm, SignatureMethod, SignatureScheme};
