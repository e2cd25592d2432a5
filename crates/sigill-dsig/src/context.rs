#![forbid(unsafe_code)]

//! DSig context: keys, resource resolution and processing options for
//! signature operations.

use sigill_core::SignatureVersion;
use sigill_keys::KeysManager;
use sigill_transforms::UriResolver;
use std::path::PathBuf;

/// Context for XML-DSig operations.
#[derive(Debug, Clone)]
pub struct DsigContext {
    /// Signature version gating algorithm and transform URIs.
    pub version: SignatureVersion,
    /// Keys consulted for `KeyName` lookups and as the default key.
    pub keys_manager: KeysManager,
    /// Additional ID attribute names to register.
    pub id_attrs: Vec<String>,
    /// Resolution of references outside the signature's document.
    pub resolver: UriResolver,
    /// Validate the references of `Manifest`s named by `SignedInfo`.
    pub check_manifests: bool,
    /// Keep checking references after the first failure.
    pub continue_after_failure: bool,
}

impl Default for DsigContext {
    fn default() -> Self {
        Self::new(SignatureVersion::default())
    }
}

impl DsigContext {
    /// Create a context for `version` with an empty keys manager.
    pub fn new(version: SignatureVersion) -> Self {
        Self {
            version,
            keys_manager: KeysManager::new(),
            id_attrs: Vec::new(),
            resolver: UriResolver::new(),
            check_manifests: true,
            continue_after_failure: false,
        }
    }

    pub fn with_keys_manager(mut self, keys_manager: KeysManager) -> Self {
        self.keys_manager = keys_manager;
        self
    }

    /// Add an ID attribute name to register during processing.
    pub fn add_id_attr(&mut self, name: &str) {
        self.id_attrs.push(name.to_owned());
    }

    /// Map an external URI to a local file path.
    pub fn add_url_map(&mut self, url: &str, file_path: impl Into<PathBuf>) {
        self.resolver.add_url_map(url, file_path);
    }

    /// Serve an external URI from memory.
    pub fn add_resource(&mut self, uri: &str, data: Vec<u8>) {
        self.resolver.add_resource(uri, data);
    }

    /// Base directory for relative external references.
    pub fn set_base_dir(&mut self, dir: impl Into<PathBuf>) {
        self.resolver.set_base_dir(dir);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::Reference;
    use crate::sign::SignatureProcessor;
    use sigill_core::algorithm;
    use sigill_keys::{build_secret_key, KeyKind};

    #[test]
    fn test_defaults() {
        let ctx = DsigContext::default();
        assert_eq!(ctx.version, SignatureVersion::V1_1);
        assert!(ctx.check_manifests);
        assert!(!ctx.continue_after_failure);
        assert!(ctx.keys_manager.is_empty());
    }

    #[test]
    fn test_local_files_and_url_maps() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"beta").unwrap();

        let key = build_secret_key(KeyKind::Hmac, b"k").unwrap();
        let mut processor = SignatureProcessor::new(SignatureVersion::V1_1);
        processor.set_signature_algorithm(algorithm::HMAC_SHA256, key).unwrap();
        processor.context_mut().set_base_dir(dir.path());
        processor.context_mut().add_url_map("http://example.com/b", dir.path().join("b.txt"));
        processor.append_manifest_reference(Reference::new("a.txt"));
        processor.append_manifest_reference(Reference::new("http://example.com/b"));
        let signature = processor.generate_signature_document(None).unwrap();
        assert!(processor.validate_signature(&signature, None).unwrap().is_valid());

        std::fs::write(dir.path().join("b.txt"), b"gamma").unwrap();
        let result = processor.validate_signature(&signature, None).unwrap();
        assert_eq!(result.failures().len(), 1);
    }
}
