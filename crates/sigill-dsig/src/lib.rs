#![forbid(unsafe_code)]

//! XML Digital Signature (XML-DSig) creation and validation.
//!
//! [`SignatureProcessor`] builds enveloped, enveloping and detached
//! signatures (optionally over a `Manifest`) for XML Signature 1.0, 1.1
//! and 2.0; [`verify::verify`] and [`verify::verify_detached`] check them.

pub mod context;
pub mod reference;
pub mod sign;
pub mod verify;

pub use context::DsigContext;
pub use reference::Reference;
pub use sign::SignatureProcessor;
pub use verify::{Failure, VerifyResult};
