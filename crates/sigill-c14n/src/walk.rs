#![forbid(unsafe_code)]

//! Document-order traversal shared by every DOM-mode method.
//!
//! The walker decides which nodes are output and handles text, comments
//! and processing instructions. Element start tags and namespace rendering
//! are delegated to an [`ElementPolicy`], one per canonicalization method.

use crate::escape;
use crate::Visibility;
use roxmltree::{Node, NodeId, NodeType};
use sigill_core::{ns, Error};
use sigill_xml::NodeSet;
use std::borrow::Cow;

pub(crate) type NodeFilter<'f> = dyn Fn(Node<'_, '_>) -> Visibility + 'f;

/// Method-specific rendering of elements.
pub(crate) trait ElementPolicy {
    /// Output namespace context inherited from the nearest rendered
    /// ancestor.
    type Scope: Clone + Default;

    /// Write the start tag of a rendered element and return the name to
    /// close it with plus the scope for its children.
    fn open(
        &mut self,
        walker: &Walker<'_>,
        node: Node<'_, '_>,
        scope: &Self::Scope,
        parent_rendered: bool,
        out: &mut String,
    ) -> Result<(String, Self::Scope), Error>;

    /// An element outside the node-set whose children are still visited.
    fn hidden(
        &mut self,
        _walker: &Walker<'_>,
        _node: Node<'_, '_>,
        scope: &Self::Scope,
        _out: &mut String,
    ) -> Self::Scope {
        scope.clone()
    }

    /// Write a text node's (whitespace-processed) content.
    fn text(&mut self, _node: Node<'_, '_>, text: &str, _scope: &Self::Scope, out: &mut String) {
        escape::text_into(out, text);
    }
}

pub(crate) struct Walker<'f> {
    pub with_comments: bool,
    pub preserve_whitespace: bool,
    pub node_set: Option<&'f NodeSet>,
    pub filter: Option<&'f NodeFilter<'f>>,
    /// Element the walk starts at; its parent never counts as rendered.
    pub apex: Option<NodeId>,
}

impl<'f> Walker<'f> {
    pub fn visibility(&self, node: Node<'_, '_>) -> Visibility {
        let mut v = match self.node_set {
            Some(set) if !set.contains(node.id()) => Visibility::Hidden,
            _ => Visibility::Visible,
        };
        if let Some(filter) = self.filter {
            v = v.combine(filter(node));
        }
        v
    }

    /// Whether `node` is an element whose tags appear in the output.
    pub fn is_rendered(&self, node: Node<'_, '_>) -> bool {
        node.is_element() && self.visibility(node) == Visibility::Visible
    }

    /// Whether attributes of rendered elements are output.
    pub fn attrs_visible(&self) -> bool {
        !self.node_set.is_some_and(|s| s.excludes_attrs())
    }

    pub fn filters_namespaces(&self) -> bool {
        self.node_set.is_some_and(|s| s.has_ns_visibility())
    }

    pub fn ns_visible(&self, element: Node<'_, '_>, prefix: &str) -> bool {
        self.node_set
            .map_or(true, |s| s.is_ns_visible(element.id(), prefix))
    }

    pub fn run<P: ElementPolicy>(&self, policy: &mut P, start: Node<'_, '_>) -> Result<Vec<u8>, Error> {
        let mut out = String::new();
        self.node(policy, start, &P::Scope::default(), &mut out)?;
        Ok(out.into_bytes())
    }

    fn node<P: ElementPolicy>(
        &self,
        policy: &mut P,
        node: Node<'_, '_>,
        scope: &P::Scope,
        out: &mut String,
    ) -> Result<(), Error> {
        match node.node_type() {
            NodeType::Root => {
                for child in node.children() {
                    self.node(policy, child, scope, out)?;
                }
            }
            NodeType::Element => match self.visibility(node) {
                Visibility::Pruned => {}
                Visibility::Visible => {
                    let parent_rendered = self.apex != Some(node.id())
                        && node.parent().is_some_and(|p| self.is_rendered(p));
                    let (name, child_scope) = policy.open(self, node, scope, parent_rendered, out)?;
                    for child in node.children() {
                        self.node(policy, child, &child_scope, out)?;
                    }
                    out.push_str("</");
                    out.push_str(&name);
                    out.push('>');
                }
                Visibility::Hidden => {
                    let child_scope = policy.hidden(self, node, scope, out);
                    for child in node.children() {
                        self.node(policy, child, &child_scope, out)?;
                    }
                }
            },
            NodeType::Text => {
                if self.visibility(node) == Visibility::Visible {
                    if let Some(text) = self.text_content(node) {
                        policy.text(node, &text, scope, out);
                    }
                }
            }
            NodeType::Comment => {
                if self.with_comments && self.visibility(node) == Visibility::Visible {
                    self.top_level(node, out, |out| {
                        out.push_str("<!--");
                        out.push_str(node.text().unwrap_or(""));
                        out.push_str("-->");
                    });
                }
            }
            NodeType::PI => {
                if self.visibility(node) == Visibility::Visible {
                    if let Some(pi) = node.pi() {
                        self.top_level(node, out, |out| {
                            out.push_str("<?");
                            out.push_str(pi.target);
                            if let Some(value) = pi.value.filter(|v| !v.is_empty()) {
                                out.push(' ');
                                out.push_str(&escape::escape_pi(value));
                            }
                            out.push_str("?>");
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Comments and PIs outside the document element are separated from it
    /// by a line feed.
    fn top_level(&self, node: Node<'_, '_>, out: &mut String, write: impl FnOnce(&mut String)) {
        let at_root = node.parent().is_some_and(|p| p.is_root());
        if at_root && node.prev_siblings().any(|s| s.is_element()) {
            out.push('\n');
        }
        write(out);
        if at_root && node.next_siblings().any(|s| s.is_element()) {
            out.push('\n');
        }
    }

    /// Text after whitespace processing; `None` drops the node.
    fn text_content<'a>(&self, node: Node<'a, '_>) -> Option<Cow<'a, str>> {
        let text = node.text()?;
        if self.preserve_whitespace || space_preserved(node) {
            return Some(Cow::Borrowed(text));
        }
        let trimmed = text.trim();
        (!trimmed.is_empty()).then(|| Cow::Borrowed(trimmed))
    }
}

/// Whether the nearest `xml:space` in scope says `preserve`.
fn space_preserved(node: Node<'_, '_>) -> bool {
    node.ancestors()
        .find_map(|a| a.attribute((ns::XML, "space")))
        .is_some_and(|v| v == "preserve")
}
