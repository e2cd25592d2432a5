#![forbid(unsafe_code)]

//! Error type shared by every sigill crate.

/// Errors produced by sigill.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("XML parsing error: {0}")]
    XmlParse(String),

    #[error("invalid XML structure: {0}")]
    XmlStructure(String),

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("key does not match algorithm: {0}")]
    KeyMismatch(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("cryptographic error: {0}")]
    Crypto(String),

    #[error("signature verification failed: {0}")]
    SignatureInvalid(String),

    #[error("digest mismatch for reference: {0}")]
    DigestMismatch(String),

    #[error("canonicalization error: {0}")]
    Canonicalization(String),

    #[error("transform error: {0}")]
    Transform(String),

    #[error("base64 decode error: {0}")]
    Base64(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("missing required element: {0}")]
    MissingElement(String),

    #[error("missing required attribute: {0}")]
    MissingAttribute(String),

    #[error("invalid URI reference: {0}")]
    InvalidUri(String),

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("{0}")]
    Other(String),
}

/// Coarse classification of an [`Error`].
///
/// Callers that only care about the failure category (for example to map
/// errors onto exit codes or protocol status values) match on this instead
/// of the full error enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnsupportedAlgorithm,
    MalformedInput,
    KeyMismatch,
    DigestMismatch,
    SignatureInvalid,
    CanonicalizationFailure,
    Io,
    Other,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnsupportedAlgorithm(_) => ErrorKind::UnsupportedAlgorithm,
            Error::XmlParse(_)
            | Error::XmlStructure(_)
            | Error::MalformedInput(_)
            | Error::InvalidKey(_)
            | Error::Base64(_)
            | Error::MissingElement(_)
            | Error::MissingAttribute(_)
            | Error::InvalidUri(_)
            | Error::Certificate(_) => ErrorKind::MalformedInput,
            Error::KeyMismatch(_) | Error::KeyNotFound(_) => ErrorKind::KeyMismatch,
            Error::DigestMismatch(_) => ErrorKind::DigestMismatch,
            Error::SignatureInvalid(_) | Error::Crypto(_) => ErrorKind::SignatureInvalid,
            Error::Canonicalization(_) | Error::Transform(_) => {
                ErrorKind::CanonicalizationFailure
            }
            Error::Io(_) => ErrorKind::Io,
            Error::Other(_) => ErrorKind::Other,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            Error::UnsupportedAlgorithm("x".into()).kind(),
            ErrorKind::UnsupportedAlgorithm
        );
        assert_eq!(Error::Base64("x".into()).kind(), ErrorKind::MalformedInput);
        assert_eq!(Error::InvalidKey("x".into()).kind(), ErrorKind::MalformedInput);
        assert_eq!(Error::KeyMismatch("x".into()).kind(), ErrorKind::KeyMismatch);
        assert_eq!(
            Error::Canonicalization("x".into()).kind(),
            ErrorKind::CanonicalizationFailure
        );
    }

    #[test]
    fn test_io_from() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().contains("gone"));
    }
}
