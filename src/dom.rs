//! Mutable mirror of a parsed HTML document.
//!
//! The sandbox holds its cloned page as a `DocumentTree`: an index-arena tree
//! built by one traversal of a `scraper`-parsed document. Asset inlining and
//! canvas substitution mutate this tree in place; the snapshotter then walks
//! it once to freeze the structure.

use ego_tree::NodeRef;
use scraper::node::Node;
use scraper::Html;

/// Identifier of a node inside a [`DocumentTree`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// The payload of a single document node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeData {
    /// The synthetic document root
    Document,
    /// `<!DOCTYPE ...>`
    Doctype { name: String },
    /// An element with its tag name and authored attribute list
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
    },
    /// A text run
    Text { contents: String },
    /// `<!-- ... -->`
    Comment { contents: String },
}

/// Closed dispatch over the node kinds the inlining stages care about.
///
/// Asset processing branches on this instead of probing attributes: images
/// and canvases each have their own inlining strategy, everything else is
/// carried through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeCategory {
    Image,
    Canvas,
    Element,
    Text,
}

impl NodeData {
    /// Categorize this node for inlining dispatch.
    pub fn category(&self) -> NodeCategory {
        match self {
            NodeData::Element { tag, .. } if tag == "img" => NodeCategory::Image,
            NodeData::Element { tag, .. } if tag == "canvas" => NodeCategory::Canvas,
            NodeData::Text { .. } => NodeCategory::Text,
            _ => NodeCategory::Element,
        }
    }
}

struct NodeSlot {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// An order-preserving, mutable tree of document nodes.
///
/// Nodes live in an arena and are addressed by [`NodeId`]; detaching a node
/// only unlinks it, slots are never reused within one tree's lifetime.
pub struct DocumentTree {
    nodes: Vec<NodeSlot>,
}

impl DocumentTree {
    /// Create an empty tree holding only the document root.
    pub fn new() -> Self {
        Self {
            nodes: vec![NodeSlot {
                data: NodeData::Document,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    /// Parse an HTML string into a mirror tree.
    ///
    /// Parsing is delegated to `scraper`; the resulting node tree is walked
    /// once, preserving document order, doctype, comments, and whitespace.
    pub fn parse(html: &str) -> Self {
        let parsed = Html::parse_document(html);
        let mut tree = DocumentTree::new();
        let root = tree.root();
        for child in parsed.tree.root().children() {
            convert_node(&mut tree, root, child);
        }
        tree
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn data(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.0].data
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    /// Allocate a detached node.
    pub fn create_node(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeSlot {
            data,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    /// Append `child` as the last child of `parent`.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    /// Structurally substitute `replacement` for `old`: same parent, same
    /// position among its siblings. `old` is detached but stays in the arena.
    pub fn replace_with(&mut self, old: NodeId, replacement: NodeId) {
        let parent = match self.nodes[old.0].parent {
            Some(p) => p,
            None => return,
        };
        if let Some(pos) = self.nodes[parent.0].children.iter().position(|&c| c == old) {
            self.nodes[parent.0].children[pos] = replacement;
            self.nodes[replacement.0].parent = Some(parent);
            self.nodes[old.0].parent = None;
        }
    }

    /// Element tag name, or `None` for non-element nodes.
    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id.0].data {
            NodeData::Element { tag, .. } => Some(tag.as_str()),
            _ => None,
        }
    }

    /// Value of an attribute on an element node.
    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        match &self.nodes[id.0].data {
            NodeData::Element { attrs, .. } => attrs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }

    /// Set (or replace) an attribute on an element node.
    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        if let NodeData::Element { attrs, .. } = &mut self.nodes[id.0].data {
            if let Some(slot) = attrs.iter_mut().find(|(k, _)| k == name) {
                slot.1 = value.to_string();
            } else {
                attrs.push((name.to_string(), value.to_string()));
            }
        }
    }

    /// All attached nodes in document order, starting at (and including) `from`.
    pub fn descendants(&self, from: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            out.push(id);
            // Push children in reverse so the traversal preserves document order.
            for &child in self.nodes[id.0].children.iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// Attached elements with the given tag name, in document order.
    pub fn elements_by_tag(&self, tag: &str) -> Vec<NodeId> {
        self.descendants(self.root())
            .into_iter()
            .filter(|&id| self.tag(id) == Some(tag))
            .collect()
    }

    /// Concatenated text content beneath `id`.
    pub fn text_of(&self, id: NodeId) -> String {
        let mut out = String::new();
        for node in self.descendants(id) {
            if let NodeData::Text { contents } = self.data(node) {
                out.push_str(contents);
            }
        }
        out
    }

    /// True when the document holds no element at all (an unusable clone).
    pub fn is_empty(&self) -> bool {
        !self
            .descendants(self.root())
            .iter()
            .any(|&id| matches!(self.data(id), NodeData::Element { .. }))
    }
}

impl Default for DocumentTree {
    fn default() -> Self {
        Self::new()
    }
}

fn convert_node(tree: &mut DocumentTree, parent: NodeId, node: NodeRef<'_, Node>) {
    match node.value() {
        Node::Doctype(d) => {
            let id = tree.create_node(NodeData::Doctype {
                name: d.name().to_string(),
            });
            tree.append_child(parent, id);
        }
        Node::Comment(c) => {
            let id = tree.create_node(NodeData::Comment {
                contents: c.comment.to_string(),
            });
            tree.append_child(parent, id);
        }
        Node::Text(t) => {
            let id = tree.create_node(NodeData::Text {
                contents: t.text.to_string(),
            });
            tree.append_child(parent, id);
        }
        Node::Element(el) => {
            let attrs = el
                .attrs()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            let id = tree.create_node(NodeData::Element {
                tag: el.name().to_string(),
                attrs,
            });
            tree.append_child(parent, id);
            for child in node.children() {
                convert_node(tree, id, child);
            }
        }
        // Document/fragment wrappers and processing instructions carry no
        // visual structure; descend through them.
        _ => {
            for child in node.children() {
                convert_node(tree, parent, child);
            }
        }
    }
}
