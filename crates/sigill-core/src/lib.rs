#![forbid(unsafe_code)]

//! Shared building blocks for the sigill crates: the error type, the
//! algorithm URI table, signature versions and namespace constants.

pub mod algorithm;
pub mod error;
pub mod ns;
pub mod version;

pub use algorithm::{AlgorithmUri, Family};
pub use error::{Error, ErrorKind, Result};
pub use version::SignatureVersion;
