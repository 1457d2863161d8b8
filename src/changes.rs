use std::collections::BTreeSet;

use crate::tree::NodeType;

/// Which aspect of a navigation scope went stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChangeField {
    Unread,
    Starred,
    Title,
    ErrorCount,
}

/// One "this scope must be redrawn" notice. Identity is the full pair:
/// the same node can appear once per changed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeChange {
    pub node_type: NodeType,
    pub field: ChangeField,
}

/// The complete set of scopes invalidated by one committed transaction.
///
/// Published as a replace-on-write value: consumers treat every publication
/// as the full current change set, never as a delta on top of the previous
/// one. `reload_folders`/`reload_feeds` flag structural changes (deletion
/// cascades are not enumerable without a fresh fetch, so the whole
/// collection snapshot is replaced instead of diffed).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    changes: BTreeSet<NodeChange>,
    pub reload_folders: bool,
    pub reload_feeds: bool,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one change. Duplicates of the same `(node, field)` pair
    /// collapse to a single entry.
    pub fn insert(&mut self, node_type: NodeType, field: ChangeField) {
        self.changes.insert(NodeChange { node_type, field });
    }

    pub fn contains(&self, node_type: NodeType, field: ChangeField) -> bool {
        self.changes.contains(&NodeChange { node_type, field })
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeChange> {
        self.changes.iter()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && !self.reload_folders && !self.reload_feeds
    }

    /// Fold another change set into this one.
    pub fn merge(&mut self, other: ChangeSet) {
        self.changes.extend(other.changes);
        self.reload_folders |= other.reload_folders;
        self.reload_feeds |= other.reload_feeds;
    }

    /// Record the scopes affected by an unread/starred change on an item:
    /// the item's feed, the feed's folder when it has one, and the two
    /// synthetic scopes (`all`, `starred`), which aggregate every feed.
    pub fn item_state_changed(&mut self, feed_id: i64, folder_id: Option<i64>, field: ChangeField) {
        self.insert(NodeType::Feed(feed_id), field);
        if let Some(folder_id) = folder_id {
            self.insert(NodeType::Folder(folder_id), field);
        }
        self.insert(NodeType::All, field);
        self.insert(NodeType::Starred, field);
    }

    /// Record an inserted item: a new article always affects the `all`
    /// listing and its unread aggregate.
    pub fn item_inserted(&mut self) {
        self.insert(NodeType::All, ChangeField::Unread);
    }
}
