#![forbid(unsafe_code)]

//! XML document layer for sigill.
//!
//! A thin adapter over `roxmltree` (the tree model) and `quick-xml` (the
//! writer): ID maps, prefix recovery, node-sets and the XPath subset used
//! by signature transforms.

pub mod document;
pub mod nodeset;
pub mod writer;
pub mod xpath;

pub use document::XmlDocument;
pub use nodeset::NodeSet;
pub use writer::XmlWriter;
pub use xpath::{XNode, XPath, XPathContext};

/// roxmltree parsing options that allow a DTD.
///
/// roxmltree never fetches external entities and only expands internal
/// ones, so accepting a DTD is safe. Many interop vectors carry one.
pub fn parsing_options() -> roxmltree::ParsingOptions {
    roxmltree::ParsingOptions {
        allow_dtd: true,
        ..roxmltree::ParsingOptions::default()
    }
}
