#![forbid(unsafe_code)]

//! XML Canonicalization (C14N) for sigill.
//!
//! Implements the W3C canonicalization methods used by XML signatures:
//! - Canonical XML 1.0 (with and without comments)
//! - Exclusive Canonical XML 1.0 (with and without comments)
//! - Canonical XML 1.1 (with and without comments)
//! - Canonical XML 2.0, over a tree or as a stream
//!
//! [`Canonicalizer`] carries the options; [`canonicalize`] and
//! [`canonicalize_doc`] cover the common node-set case used by the
//! transform pipeline.

pub mod c14n2;
pub mod escape;
pub mod exclusive;
pub mod inclusive;
pub mod render;
mod stream;
mod walk;

pub use c14n2::QNameAware;

use roxmltree::{Document, Node, NodeId};
use sigill_core::{algorithm, Error};
use sigill_xml::NodeSet;
use std::io::{BufRead, Write};
use walk::{NodeFilter, Walker};

/// The canonicalization algorithm family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalizationMethod {
    C14n10,
    ExclusiveC14n10,
    C14n11,
    C14n20,
}

/// A canonicalization method plus the independent "with comments" flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct C14nMode {
    pub method: CanonicalizationMethod,
    pub with_comments: bool,
}

impl C14nMode {
    pub const fn new(method: CanonicalizationMethod, with_comments: bool) -> Self {
        Self {
            method,
            with_comments,
        }
    }

    /// Get the algorithm URI for this mode.
    ///
    /// C14N 2.0 has a single URI; comments are a parameter there.
    pub fn uri(&self) -> &'static str {
        use CanonicalizationMethod::*;
        match (self.method, self.with_comments) {
            (C14n10, false) => algorithm::C14N,
            (C14n10, true) => algorithm::C14N_WITH_COMMENTS,
            (ExclusiveC14n10, false) => algorithm::EXC_C14N,
            (ExclusiveC14n10, true) => algorithm::EXC_C14N_WITH_COMMENTS,
            (C14n11, false) => algorithm::C14N11,
            (C14n11, true) => algorithm::C14N11_WITH_COMMENTS,
            (C14n20, _) => algorithm::C14N20,
        }
    }

    /// Parse a C14N mode from an algorithm URI.
    pub fn from_uri(uri: &str) -> Option<Self> {
        use CanonicalizationMethod::*;
        let (method, with_comments) = match uri {
            algorithm::C14N => (C14n10, false),
            algorithm::C14N_WITH_COMMENTS => (C14n10, true),
            algorithm::EXC_C14N => (ExclusiveC14n10, false),
            algorithm::EXC_C14N_WITH_COMMENTS => (ExclusiveC14n10, true),
            algorithm::C14N11 => (C14n11, false),
            algorithm::C14N11_WITH_COMMENTS => (C14n11, true),
            algorithm::C14N20 => (C14n20, false),
            _ => return None,
        };
        Some(Self::new(method, with_comments))
    }

    pub fn is_exclusive(&self) -> bool {
        self.method == CanonicalizationMethod::ExclusiveC14n10
    }
}

/// Result of the node visibility predicate.
///
/// Ordered from least to most restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Visibility {
    Visible,
    /// Not output, but children are still visited.
    Hidden,
    /// Neither the node nor its subtree is output.
    Pruned,
}

impl Visibility {
    /// The more restrictive of two verdicts.
    pub fn combine(self, other: Visibility) -> Visibility {
        self.max(other)
    }
}

/// A configured canonicalization run.
///
/// ```no_run
/// use sigill_c14n::{C14nMode, CanonicalizationMethod, Canonicalizer};
///
/// let c14n = Canonicalizer::new(C14nMode::new(CanonicalizationMethod::C14n20, false))
///     .rewrite_prefixes(true)
///     .preserve_whitespace(false);
/// let bytes = c14n.canonicalize_data(b"<a:x xmlns:a='urn:a'/>")?;
/// # Ok::<(), sigill_core::Error>(())
/// ```
pub struct Canonicalizer<'f> {
    mode: C14nMode,
    preserve_whitespace: bool,
    rewrite_prefixes: bool,
    fragment: Option<String>,
    id_attrs: Vec<String>,
    inclusive_prefixes: Vec<String>,
    qname_aware: QNameAware,
    node_set: Option<&'f NodeSet>,
    filter: Option<Box<NodeFilter<'f>>>,
}

impl<'f> Canonicalizer<'f> {
    pub fn new(mode: C14nMode) -> Self {
        Self {
            mode,
            preserve_whitespace: true,
            rewrite_prefixes: false,
            fragment: None,
            id_attrs: Vec::new(),
            inclusive_prefixes: Vec::new(),
            qname_aware: QNameAware::default(),
            node_set: None,
            filter: None,
        }
    }

    pub fn mode(&self) -> C14nMode {
        self.mode
    }

    pub fn with_comments(mut self, on: bool) -> Self {
        self.mode.with_comments = on;
        self
    }

    /// When false, text is trimmed and whitespace-only text dropped,
    /// except under `xml:space="preserve"`.
    pub fn preserve_whitespace(mut self, on: bool) -> Self {
        self.preserve_whitespace = on;
        self
    }

    /// C14N 2.0 sequential prefix rewriting.
    pub fn rewrite_prefixes(mut self, on: bool) -> Self {
        self.rewrite_prefixes = on;
        self
    }

    /// Canonicalize only the element carrying this ID.
    pub fn fragment(mut self, id: impl Into<String>) -> Self {
        self.fragment = Some(id.into());
        self
    }

    /// Extra ID attribute name used to resolve the fragment.
    pub fn id_attr(mut self, name: impl Into<String>) -> Self {
        self.id_attrs.push(name.into());
        self
    }

    /// Exclusive C14N InclusiveNamespaces PrefixList.
    pub fn inclusive_prefixes(mut self, prefixes: &[String]) -> Self {
        self.inclusive_prefixes = prefixes.to_vec();
        self
    }

    pub fn node_set(mut self, set: &'f NodeSet) -> Self {
        self.node_set = Some(set);
        self
    }

    /// Visibility predicate, consulted once per node in DOM mode.
    pub fn visibility<F>(mut self, filter: F) -> Self
    where
        F: Fn(Node<'_, '_>) -> Visibility + 'f,
    {
        self.filter = Some(Box::new(filter));
        self
    }

    /// Boolean predicate; a rejected node is skipped with its subtree.
    pub fn node_predicate<F>(self, pred: F) -> Self
    where
        F: Fn(Node<'_, '_>) -> bool + 'f,
    {
        self.visibility(move |n| {
            if pred(n) {
                Visibility::Visible
            } else {
                Visibility::Pruned
            }
        })
    }

    pub fn add_qname_aware_attribute(mut self, name: &str, namespace_uri: &str) -> Self {
        self.qname_aware
            .attributes
            .push((namespace_uri.to_owned(), name.to_owned()));
        self
    }

    pub fn add_qname_aware_element(mut self, name: &str, namespace_uri: &str) -> Self {
        self.qname_aware
            .elements
            .push((namespace_uri.to_owned(), name.to_owned()));
        self
    }

    pub fn add_qname_aware_xpath_element(mut self, name: &str, namespace_uri: &str) -> Self {
        self.qname_aware
            .xpath_elements
            .push((namespace_uri.to_owned(), name.to_owned()));
        self
    }

    fn selects_nodes(&self) -> bool {
        self.filter.is_some() || self.node_set.is_some() || self.fragment.is_some()
    }

    fn renderer(&self) -> c14n2::Renderer<'_> {
        c14n2::Renderer {
            rewrite: self.rewrite_prefixes,
            qname_aware: &self.qname_aware,
        }
    }

    /// Canonicalize a whole parsed document (or its fragment).
    pub fn canonicalize_document(&self, doc: &Document<'_>) -> Result<Vec<u8>, Error> {
        if let Some(id) = &self.fragment {
            let ids = sigill_xml::document::build_id_map(doc, &self.id_attrs);
            let node = ids
                .get(id.as_str())
                .and_then(|n| doc.get_node(*n))
                .ok_or_else(|| Error::Canonicalization(format!("fragment not found: {id}")))?;
            return self.walk(node, Some(node.id()));
        }
        self.walk(doc.root(), None)
    }

    /// Canonicalize the subtree rooted at `element`.
    pub fn canonicalize_element(&self, element: Node<'_, '_>) -> Result<Vec<u8>, Error> {
        if !element.is_element() {
            return Err(Error::Canonicalization("not an element node".into()));
        }
        self.walk(element, Some(element.id()))
    }

    /// Parse `xml` and canonicalize it.
    pub fn canonicalize_str(&self, xml: &str) -> Result<Vec<u8>, Error> {
        let doc = sigill_xml::document::parse_text(xml)?;
        self.canonicalize_document(&doc)
    }

    /// Canonicalize serialized XML. C14N 2.0 without node selection runs
    /// in stream mode; everything else goes through the tree.
    pub fn canonicalize_data(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        if self.mode.method == CanonicalizationMethod::C14n20 && !self.selects_nodes() {
            let mut out = Vec::new();
            stream::canonicalize(data, &mut out, &self.stream_options())?;
            return Ok(out);
        }
        let text = std::str::from_utf8(data)
            .map_err(|e| Error::XmlParse(format!("invalid UTF-8: {e}")))?;
        self.canonicalize_str(text)
    }

    /// Canonicalize a local file given as a path or `file://` URI.
    pub fn canonicalize_content_at_uri(&self, uri: &str) -> Result<Vec<u8>, Error> {
        let data = std::fs::read(local_path(uri)?)?;
        self.canonicalize_data(&data)
    }

    /// Canonicalize from `input` into `out`.
    ///
    /// C14N 2.0 streams without building a tree and therefore cannot
    /// apply a node-set, visibility filter or fragment; those fail with
    /// [`Error::Canonicalization`]. Other methods buffer the input.
    pub fn canonicalize_to_writer<R: BufRead, W: Write>(&self, mut input: R, mut out: W) -> Result<(), Error> {
        if self.mode.method == CanonicalizationMethod::C14n20 {
            if self.selects_nodes() {
                return Err(Error::Canonicalization(
                    "C14N 2.0 stream mode does not support node selection".into(),
                ));
            }
            return stream::canonicalize(input, &mut out, &self.stream_options());
        }
        let mut data = Vec::new();
        input.read_to_end(&mut data)?;
        out.write_all(&self.canonicalize_data(&data)?)?;
        out.flush()?;
        Ok(())
    }

    /// Completion-handler form of [`Self::canonicalize_to_writer`]; runs
    /// synchronously and reports the outcome to `done`.
    pub fn canonicalize_with_completion<R, W, F>(&self, input: R, out: W, done: F)
    where
        R: BufRead,
        W: Write,
        F: FnOnce(Result<(), Error>),
    {
        done(self.canonicalize_to_writer(input, out));
    }

    fn stream_options(&self) -> stream::StreamOptions<'_> {
        stream::StreamOptions {
            with_comments: self.mode.with_comments,
            preserve_whitespace: self.preserve_whitespace,
            renderer: self.renderer(),
        }
    }

    fn walk(&self, start: Node<'_, '_>, apex: Option<NodeId>) -> Result<Vec<u8>, Error> {
        let walker = Walker {
            with_comments: self.mode.with_comments,
            preserve_whitespace: self.preserve_whitespace,
            node_set: self.node_set,
            filter: self.filter.as_deref(),
            apex,
        };
        let out = match self.mode.method {
            CanonicalizationMethod::C14n10 => walker.run(&mut inclusive::Inclusive { v11: false }, start),
            CanonicalizationMethod::C14n11 => walker.run(&mut inclusive::Inclusive { v11: true }, start),
            CanonicalizationMethod::ExclusiveC14n10 => {
                walker.run(&mut exclusive::Exclusive::new(&self.inclusive_prefixes), start)
            }
            CanonicalizationMethod::C14n20 => walker.run(
                &mut c14n2::C14n2 {
                    renderer: self.renderer(),
                },
                start,
            ),
        }?;
        tracing::trace!(method = self.mode.uri(), bytes = out.len(), "canonicalized");
        Ok(out)
    }
}

fn local_path(uri: &str) -> Result<&str, Error> {
    if let Some(path) = uri.strip_prefix("file://") {
        return Ok(path);
    }
    match uri.split_once(':') {
        // Windows drive letters are paths, not schemes.
        Some((scheme, _)) if scheme.len() > 1 && !scheme.contains('/') => {
            Err(Error::InvalidUri(format!("not a local resource: {uri}")))
        }
        _ => Ok(uri),
    }
}

/// Canonicalize an XML document.
///
/// - `xml`: the raw XML text
/// - `mode`: which C14N variant to use
/// - `node_set`: optional node set (for document-subset canonicalization)
/// - `inclusive_prefixes`: for exclusive C14N, the InclusiveNamespaces PrefixList
pub fn canonicalize(
    xml: &str,
    mode: C14nMode,
    node_set: Option<&NodeSet>,
    inclusive_prefixes: &[String],
) -> Result<Vec<u8>, Error> {
    let doc = sigill_xml::document::parse_text(xml)?;
    canonicalize_doc(&doc, mode, node_set, inclusive_prefixes)
}

/// Convenience: canonicalize with a pre-parsed document.
pub fn canonicalize_doc(
    doc: &Document<'_>,
    mode: C14nMode,
    node_set: Option<&NodeSet>,
    inclusive_prefixes: &[String],
) -> Result<Vec<u8>, Error> {
    let mut c = Canonicalizer::new(mode).inclusive_prefixes(inclusive_prefixes);
    if let Some(set) = node_set {
        c = c.node_set(set);
    }
    c.canonicalize_document(doc)
}
