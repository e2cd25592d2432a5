#![forbid(unsafe_code)]

//! URI resolution for XML-DSig references.
//!
//! Handles:
//! - Empty URI (`""`): the whole document minus comments
//! - Same-document references (`#id`): the identified subtree minus comments
//! - XPointer (`#xpointer(/)`, `#xpointer(id('x'))`): as above, comments kept
//! - External references: in-memory resources, URL-to-file mappings and
//!   local files (relative to a base directory)

use crate::pipeline::{TransformContext, TransformData};
use sigill_core::{Error, Result};
use sigill_xml::document::{build_id_map, parse_text};
use sigill_xml::NodeSet;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Resolves references to content outside the signature's document.
#[derive(Debug, Clone, Default)]
pub struct UriResolver {
    url_maps: Vec<(String, PathBuf)>,
    resources: HashMap<String, Vec<u8>>,
    base_dir: Option<PathBuf>,
}

impl UriResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `url` (or anything under it) from a local file.
    pub fn add_url_map(&mut self, url: &str, path: impl Into<PathBuf>) {
        self.url_maps.push((url.to_owned(), path.into()));
    }

    /// Serve `uri` from memory.
    pub fn add_resource(&mut self, uri: &str, data: Vec<u8>) {
        self.resources.insert(uri.to_owned(), data);
    }

    pub fn resource(&self, uri: &str) -> Option<&[u8]> {
        self.resources.get(uri).map(Vec::as_slice)
    }

    /// Directory relative file references are resolved against.
    pub fn set_base_dir(&mut self, dir: impl Into<PathBuf>) {
        self.base_dir = Some(dir.into());
    }

    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }

    /// Fetch the octets of an external resource.
    pub fn fetch(&self, uri: &str) -> Result<Vec<u8>> {
        if let Some(data) = self.resources.get(uri) {
            tracing::debug!(uri, bytes = data.len(), "resolved in-memory resource");
            return Ok(data.clone());
        }
        for (url, path) in &self.url_maps {
            if uri == url || uri.starts_with(url.as_str()) {
                tracing::debug!(uri, path = %path.display(), "resolved through url map");
                return std::fs::read(path).map_err(|e| {
                    Error::InvalidUri(format!("url map for {uri} ({}): {e}", path.display()))
                });
            }
        }
        let path = self.local_path(uri)?;
        tracing::debug!(uri, path = %path.display(), "resolved local file");
        std::fs::read(&path)
            .map_err(|e| Error::InvalidUri(format!("cannot read {uri} ({}): {e}", path.display())))
    }

    fn local_path(&self, uri: &str) -> Result<PathBuf> {
        let raw = match uri.strip_prefix("file://") {
            Some(path) => path,
            None => match uri.split_once(':') {
                Some((scheme, _)) if scheme.len() > 1 && !scheme.contains('/') => {
                    return Err(Error::InvalidUri(format!(
                        "no resource registered for {uri}"
                    )))
                }
                _ => uri,
            },
        };
        let path = Path::new(raw);
        Ok(match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        })
    }
}

/// What a same-document URI selects.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SameDocument<'u> {
    Whole { comments: bool },
    Id { id: &'u str, comments: bool },
}

fn parse_same_document(uri: &str) -> Result<Option<SameDocument<'_>>> {
    if uri.is_empty() {
        return Ok(Some(SameDocument::Whole { comments: false }));
    }
    let Some(fragment) = uri.strip_prefix('#') else {
        return Ok(None);
    };
    let Some(pointer) = fragment
        .strip_prefix("xpointer(")
        .and_then(|p| p.strip_suffix(')'))
    else {
        if fragment.is_empty() {
            return Err(Error::InvalidUri("empty fragment identifier".into()));
        }
        return Ok(Some(SameDocument::Id {
            id: fragment,
            comments: false,
        }));
    };
    if pointer == "/" {
        return Ok(Some(SameDocument::Whole { comments: true }));
    }
    let id = pointer
        .strip_prefix("id(")
        .and_then(|p| p.strip_suffix(')'))
        .map(|p| p.trim_matches(|c| c == '\'' || c == '"'))
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::InvalidUri(format!("unsupported XPointer: {uri}")))?;
    Ok(Some(SameDocument::Id { id, comments: true }))
}

/// Dereference a reference URI into pipeline input.
pub fn dereference(uri: &str, ctx: &TransformContext<'_>) -> Result<TransformData> {
    let Some(target) = parse_same_document(uri)? else {
        return Ok(TransformData::Binary(ctx.resolver.fetch(uri)?));
    };
    let text = ctx.document.ok_or_else(|| {
        Error::InvalidUri(format!("same-document reference {uri:?} without a document"))
    })?;
    let doc = parse_text(text)?;
    let node_set = match target {
        SameDocument::Whole { comments: true } => NodeSet::all(&doc),
        SameDocument::Whole { comments: false } => NodeSet::all_without_comments(&doc),
        SameDocument::Id { id, comments } => {
            let ids = build_id_map(&doc, ctx.id_attrs);
            let node = ids
                .get(id)
                .and_then(|n| doc.get_node(*n))
                .ok_or_else(|| Error::InvalidUri(format!("no element with ID {id:?}")))?;
            NodeSet::tree(node, comments)
        }
    };
    Ok(TransformData::Xml {
        xml_text: text.to_owned(),
        node_set: Some(node_set),
        same_document: true,
    })
}
