#![forbid(unsafe_code)]

//! XML Signature versions.

use std::fmt;

/// The XML Signature recommendation a processor follows.
///
/// Ordered: later versions accept everything earlier ones do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum SignatureVersion {
    V1_0,
    #[default]
    V1_1,
    V2_0,
}

impl SignatureVersion {
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "1.0" | "1" => Some(Self::V1_0),
            "1.1" => Some(Self::V1_1),
            "2.0" | "2" => Some(Self::V2_0),
            _ => None,
        }
    }
}

impl fmt::Display for SignatureVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::V1_0 => "1.0",
            Self::V1_1 => "1.1",
            Self::V2_0 => "2.0",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_and_parse() {
        assert!(SignatureVersion::V1_0 < SignatureVersion::V2_0);
        assert_eq!(SignatureVersion::from_str_opt("2.0"), Some(SignatureVersion::V2_0));
        assert_eq!(SignatureVersion::from_str_opt("3.0"), None);
        assert_eq!(SignatureVersion::V1_1.to_string(), "1.1");
    }
}
