use crate::db::{Feed, Folder, TOP_LEVEL_FOLDER};

/// Zero-pad width for ids embedded in node names. Must exceed the digit
/// count of any realistic entity id so that string order equals id order.
const NODE_ID_PAD: usize = 10;

/// Identity of one selectable navigation scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeType {
    Empty,
    All,
    Unread,
    Starred,
    Folder(i64),
    Feed(i64),
}

impl NodeType {
    /// Stable sortable key: a rank prefix per type, then the zero-padded id.
    /// Lexicographic order of these names equals the display order
    /// (all, starred, folders by id, feeds by id).
    pub fn node_name(&self) -> String {
        match self {
            NodeType::Empty => String::new(),
            NodeType::All => "0_all".to_string(),
            NodeType::Unread => "0_unread".to_string(),
            NodeType::Starred => "1_starred".to_string(),
            NodeType::Folder(id) => format!("2_folder_{id:0width$}", width = NODE_ID_PAD),
            NodeType::Feed(id) => format!("3_feed_{id:0width$}", width = NODE_ID_PAD),
        }
    }
}

/// Index of a node within its forest's arena.
pub type NodeId = usize;

/// One navigation-tree entry. Children are owned as arena indices and the
/// parent is a non-owning index, so a forest is a plain acyclic value that
/// can be dropped and replaced wholesale.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub node_name: String,
    pub title: String,
    pub node_type: NodeType,
    pub error_count: i64,
    pub is_expanded: bool,
    pub is_top_level: bool,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// The derived navigation forest. Not authoritative data: rebuilt on demand
/// from folder/feed rows, and a rebuild always produces a fresh value;
/// nodes from a previous generation are never mutated in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeForest {
    nodes: Vec<Node>,
    roots: Vec<NodeId>,
}

impl NodeForest {
    /// Build the forest from entity rows.
    ///
    /// The synthetic `all` and `starred` roots come first and are always
    /// present, even with no feeds at all. Folders follow in id order, each
    /// with its feeds (id order) as children; feeds with no folder close the
    /// root list, again in id order.
    pub fn rebuild(folders: &[Folder], feeds: &[Feed]) -> NodeForest {
        let mut forest = NodeForest::default();

        forest.push_root(Node {
            node_name: NodeType::All.node_name(),
            title: "All Articles".to_string(),
            node_type: NodeType::All,
            error_count: 0,
            is_expanded: false,
            is_top_level: true,
            parent: None,
            children: Vec::new(),
        });
        forest.push_root(Node {
            node_name: NodeType::Starred.node_name(),
            title: "Starred Articles".to_string(),
            node_type: NodeType::Starred,
            error_count: 0,
            is_expanded: false,
            is_top_level: true,
            parent: None,
            children: Vec::new(),
        });

        let mut folders: Vec<&Folder> = folders.iter().collect();
        folders.sort_by_key(|f| f.id);
        let mut feeds: Vec<&Feed> = feeds.iter().collect();
        feeds.sort_by_key(|f| f.id);

        for folder in &folders {
            let folder_idx = forest.push_root(Node {
                node_name: NodeType::Folder(folder.id).node_name(),
                title: folder.name.clone().unwrap_or_default(),
                node_type: NodeType::Folder(folder.id),
                error_count: 0,
                is_expanded: folder.opened,
                is_top_level: true,
                parent: None,
                children: Vec::new(),
            });

            let mut folder_errors = 0;
            for feed in feeds.iter().copied().filter(|f| f.folder_id == folder.id) {
                folder_errors += feed.update_error_count;
                let child_idx = forest.nodes.len();
                forest.nodes.push(feed_node(feed, Some(folder_idx)));
                forest.nodes[folder_idx].children.push(child_idx);
            }
            forest.nodes[folder_idx].error_count = folder_errors;
        }

        for feed in feeds.iter().copied().filter(|f| f.folder_id == TOP_LEVEL_FOLDER) {
            let node = feed_node(feed, None);
            forest.push_root(node);
        }

        forest
    }

    fn push_root(&mut self, node: Node) -> NodeId {
        let idx = self.nodes.len();
        self.nodes.push(node);
        self.roots.push(idx);
        idx
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn roots(&self) -> impl Iterator<Item = &Node> {
        self.roots.iter().map(|&idx| &self.nodes[idx])
    }

    /// Find the node for a navigation identity, if it is in this generation.
    pub fn find(&self, node_type: NodeType) -> Option<&Node> {
        self.nodes.iter().find(|n| n.node_type == node_type)
    }

    /// All nodes in display order: roots in order, each folder's children
    /// directly after it.
    pub fn flattened(&self) -> Vec<&Node> {
        let mut out = Vec::with_capacity(self.nodes.len());
        for &root in &self.roots {
            out.push(&self.nodes[root]);
            for &child in &self.nodes[root].children {
                out.push(&self.nodes[child]);
            }
        }
        out
    }
}

fn feed_node(feed: &Feed, parent: Option<NodeId>) -> Node {
    Node {
        node_name: NodeType::Feed(feed.id).node_name(),
        title: feed.title.clone().unwrap_or_default(),
        node_type: NodeType::Feed(feed.id),
        error_count: feed.update_error_count,
        is_expanded: false,
        is_top_level: parent.is_none(),
        parent,
        children: Vec::new(),
    }
}
