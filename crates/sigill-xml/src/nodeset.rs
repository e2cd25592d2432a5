#![forbid(unsafe_code)]

//! Node-sets over a parsed document.
//!
//! A `NodeSet` names the tree nodes (root, elements, text, comments,
//! processing instructions) selected by a reference or transform.
//! Attributes travel with their element; namespace nodes can be hidden
//! individually through the namespace visibility map.

use roxmltree::{Document, Node, NodeId};
use std::collections::{HashMap, HashSet};

/// A set of XML document nodes identified by `NodeId`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSet {
    nodes: HashSet<NodeId>,
    /// `(element, prefix)` → visible. `None` means every namespace node
    /// of every selected element is visible.
    ns_visible: Option<HashMap<(NodeId, String), bool>>,
    /// Attributes of selected elements are dropped when set.
    exclude_attrs: bool,
}

impl NodeSet {
    /// Create an empty node set.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ids<I: IntoIterator<Item = NodeId>>(ids: I) -> Self {
        Self {
            nodes: ids.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Every node of the document, comments included.
    pub fn all(doc: &Document<'_>) -> Self {
        Self::from_ids(doc.descendants().map(|n| n.id()))
    }

    /// Every node except comments: the node-set selected by `URI=""`.
    pub fn all_without_comments(doc: &Document<'_>) -> Self {
        Self::from_ids(
            doc.descendants()
                .filter(|n| !n.is_comment())
                .map(|n| n.id()),
        )
    }

    /// The subtree rooted at `root`.
    pub fn tree(root: Node<'_, '_>, with_comments: bool) -> Self {
        Self::from_ids(
            root.descendants()
                .filter(|n| with_comments || !n.is_comment())
                .map(|n| n.id()),
        )
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().copied()
    }

    pub fn insert(&mut self, id: NodeId) {
        self.nodes.insert(id);
    }

    pub fn remove(&mut self, id: NodeId) {
        self.nodes.remove(&id);
    }

    /// Drop `root` and all of its descendants.
    pub fn remove_subtree(&mut self, root: Node<'_, '_>) {
        for n in root.descendants() {
            self.nodes.remove(&n.id());
        }
    }

    pub fn intersection(&self, other: &NodeSet) -> NodeSet {
        NodeSet {
            nodes: self.nodes.intersection(&other.nodes).copied().collect(),
            ns_visible: merge_intersection(&self.ns_visible, &other.ns_visible),
            exclude_attrs: self.exclude_attrs || other.exclude_attrs,
        }
    }

    pub fn union(&self, other: &NodeSet) -> NodeSet {
        NodeSet {
            nodes: self.nodes.union(&other.nodes).copied().collect(),
            ns_visible: merge_union(&self.ns_visible, &other.ns_visible),
            exclude_attrs: self.exclude_attrs && other.exclude_attrs,
        }
    }

    pub fn subtract(&self, other: &NodeSet) -> NodeSet {
        NodeSet {
            nodes: self.nodes.difference(&other.nodes).copied().collect(),
            ns_visible: self.ns_visible.clone(),
            exclude_attrs: self.exclude_attrs,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Mark a single namespace node (element + prefix) visible or not.
    pub fn set_ns_visible(&mut self, element: NodeId, prefix: &str, visible: bool) {
        self.ns_visible
            .get_or_insert_with(HashMap::new)
            .insert((element, prefix.to_owned()), visible);
    }

    /// Whether the namespace node `prefix` of `element` is visible.
    pub fn is_ns_visible(&self, element: NodeId, prefix: &str) -> bool {
        match &self.ns_visible {
            None => true,
            Some(map) => map
                .get(&(element, prefix.to_owned()))
                .copied()
                .unwrap_or(false),
        }
    }

    /// Whether namespace nodes are filtered individually.
    pub fn has_ns_visibility(&self) -> bool {
        self.ns_visible.is_some()
    }

    pub fn set_exclude_attrs(&mut self, val: bool) {
        self.exclude_attrs = val;
    }

    pub fn excludes_attrs(&self) -> bool {
        self.exclude_attrs
    }
}

type NsMap = Option<HashMap<(NodeId, String), bool>>;

fn merge_intersection(a: &NsMap, b: &NsMap) -> NsMap {
    match (a, b) {
        (None, None) => None,
        (Some(m), None) | (None, Some(m)) => Some(m.clone()),
        (Some(ma), Some(mb)) => Some(
            ma.iter()
                .filter(|(k, v)| **v && mb.get(*k).copied().unwrap_or(false))
                .map(|(k, _)| (k.clone(), true))
                .collect(),
        ),
    }
}

fn merge_union(a: &NsMap, b: &NsMap) -> NsMap {
    match (a, b) {
        (None, _) | (_, None) => None,
        (Some(ma), Some(mb)) => {
            let mut out = ma.clone();
            for (k, v) in mb {
                if *v {
                    out.insert(k.clone(), true);
                }
            }
            Some(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "<r><a>x<!--c--></a><b/></r>";

    #[test]
    fn test_all_without_comments() {
        let doc = Document::parse(DOC).unwrap();
        let all = NodeSet::all(&doc);
        let plain = NodeSet::all_without_comments(&doc);
        assert_eq!(all.len(), plain.len() + 1);
        assert!(plain.contains(doc.root().id()));
    }

    #[test]
    fn test_tree_and_subtract() {
        let doc = Document::parse(DOC).unwrap();
        let a = doc.root_element().first_child().unwrap();
        let sub = NodeSet::tree(a, true);
        assert_eq!(sub.len(), 3);
        let mut all = NodeSet::all(&doc);
        all.remove_subtree(a);
        assert_eq!(all.len(), NodeSet::all(&doc).subtract(&sub).len());
        assert!(!all.contains(a.id()));
    }

    #[test]
    fn test_set_operations() {
        let doc = Document::parse(DOC).unwrap();
        let root = doc.root_element();
        let a = root.first_child().unwrap();
        let b = a.next_sibling().unwrap();
        let x = NodeSet::from_ids([root.id(), a.id()]);
        let y = NodeSet::from_ids([a.id(), b.id()]);
        assert_eq!(x.intersection(&y).len(), 1);
        assert_eq!(x.union(&y).len(), 3);
        assert_eq!(x.subtract(&y).len(), 1);
    }

    #[test]
    fn test_ns_visibility() {
        let doc = Document::parse(DOC).unwrap();
        let root = doc.root_element().id();
        let mut set = NodeSet::from_ids([root]);
        assert!(set.is_ns_visible(root, "p"));
        set.set_ns_visible(root, "p", false);
        set.set_ns_visible(root, "q", true);
        assert!(!set.is_ns_visible(root, "p"));
        assert!(set.is_ns_visible(root, "q"));
        assert!(!set.is_ns_visible(root, "other"));
    }
}
