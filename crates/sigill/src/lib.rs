#![forbid(unsafe_code)]

//! XML Digital Signature and canonicalization, re-exported from the
//! workspace crates.

pub use sigill_c14n as c14n;
pub use sigill_core as core;
pub use sigill_crypto as crypto;
pub use sigill_dsig as dsig;
pub use sigill_keys as keys;
pub use sigill_transforms as transforms;
pub use sigill_xml as xml;
