//! Hierarchical view over an archive's flat entry list

use super::entry::{depth_of, prefix_ends, ArchiveEntry};

/// Index of a node in an [`EntryTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug)]
struct Node {
    entry: Option<ArchiveEntry>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Arena of archive entries arranged by path
///
/// Every prefix of every entry path exists exactly once. Prefixes the
/// container never listed get a placeholder directory entry carrying the
/// timestamp of the entry that required it. A later entry with the same path
/// replaces the earlier one; the node keeps its children.
#[derive(Debug)]
pub struct EntryTree {
    nodes: Vec<Node>,
}

impl Default for EntryTree {
    fn default() -> Self {
        Self {
            nodes: vec![Node {
                entry: None,
                parent: None,
                children: Vec::new(),
            }],
        }
    }
}

impl EntryTree {
    /// The archive root; it carries no entry
    pub const ROOT: NodeId = NodeId(0);

    pub fn build(entries: impl IntoIterator<Item = ArchiveEntry>) -> Self {
        let mut tree = Self::default();
        for entry in entries {
            tree.insert(entry);
        }
        tree
    }

    pub fn insert(&mut self, entry: ArchiveEntry) {
        let ends = prefix_ends(entry.path());
        let last = ends.len() - 1;
        let mut current = Self::ROOT;

        for (depth, end) in ends.into_iter().enumerate() {
            let found = self.find_child(current, &entry.path()[..end]);

            match found {
                Some(node) if depth == last => {
                    self.nodes[node.0].entry = Some(entry);
                    return;
                }
                Some(node) => current = node,
                None if depth == last => {
                    self.attach(current, entry);
                    return;
                }
                None => {
                    let placeholder =
                        ArchiveEntry::placeholder_directory(&entry.path()[..end], entry.modified());
                    current = self.attach(current, placeholder);
                }
            }
        }
    }

    /// Node for a path relative to the archive root; a trailing `/` is optional
    pub fn lookup(&self, path: &str) -> Option<NodeId> {
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            return Some(Self::ROOT);
        }

        let mut current = Self::ROOT;
        for end in prefix_ends(path) {
            current = self.find_child(current, &path[..end])?;
        }
        Some(current)
    }

    /// Entry at a node; `None` only for the root
    pub fn entry(&self, id: NodeId) -> Option<&ArchiveEntry> {
        self.nodes.get(id.0).and_then(|n| n.entry.as_ref())
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes.get(id.0).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0).and_then(|n| n.parent)
    }

    /// Number of entries, placeholders included
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every entry in insertion order of their nodes
    pub fn entries(&self) -> impl Iterator<Item = &ArchiveEntry> {
        self.nodes.iter().filter_map(|n| n.entry.as_ref())
    }

    fn find_child(&self, parent: NodeId, prefix: &str) -> Option<NodeId> {
        let wanted = prefix.trim_end_matches('/');
        let wanted_depth = depth_of(prefix);

        self.children(parent).iter().copied().find(|&child| {
            self.entry(child).is_some_and(|e| {
                e.depth() == wanted_depth && e.path().trim_end_matches('/') == wanted
            })
        })
    }

    fn attach(&mut self, parent: NodeId, entry: ArchiveEntry) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            entry: Some(entry),
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        id
    }
}
