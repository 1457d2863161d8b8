use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::watch;
use tracing::warn;

use crate::changes::{ChangeField, ChangeSet};
use crate::db::{self, Feed, Folder, Item, ItemQuery, MarkField, PendingMark, TOP_LEVEL_FOLDER};
use crate::error::StoreError;
use crate::tree::NodeType;

/// One buffered store mutation. Ops are staged in memory and applied by
/// [`Store::save`] as a single transaction.
#[derive(Debug, Clone)]
pub enum Op {
    UpsertFolder(Folder),
    UpsertFeed(Feed),
    UpsertItem(Box<Item>),
    SetItemUnread { id: i64, unread: bool },
    SetItemStarred { id: i64, starred: bool },
    MarkFeedRead { feed_id: i64 },
    DeleteFolders(Vec<i64>),
    DeleteFeeds(Vec<i64>),
    DeleteItemsOfFeed(i64),
    EnqueueMark { item_id: i64, field: MarkField, intended: bool },
    AckMark { item_id: i64, field: MarkField },
    BumpMarkAttempts { item_id: i64, field: MarkField },
}

/// The entity store: one SQLite connection, a staged-mutation queue, and
/// the publication side of the change tracker.
///
/// `save()` commits every staged op in one transaction and derives the
/// transaction's [`ChangeSet`] from the same rows it commits: the commit
/// and its diff are produced at a single boundary, and consumers are woken
/// exactly once per transaction, never before commit.
pub struct Store {
    conn: Connection,
    pending: Vec<Op>,
    changes_tx: watch::Sender<ChangeSet>,
    folders_tx: watch::Sender<Arc<Vec<Folder>>>,
    feeds_tx: watch::Sender<Arc<Vec<Feed>>>,
}

impl Store {
    /// Wrap an open connection. The schema must already exist
    /// (see [`db::initialize`] / [`db::apply_schema`]).
    pub fn new(conn: Connection) -> Self {
        let folders = db::get_folders(&conn).unwrap_or_default();
        let feeds = db::get_feeds(&conn).unwrap_or_default();
        let (changes_tx, _) = watch::channel(ChangeSet::new());
        let (folders_tx, _) = watch::channel(Arc::new(folders));
        let (feeds_tx, _) = watch::channel(Arc::new(feeds));
        Self {
            conn,
            pending: Vec::new(),
            changes_tx,
            folders_tx,
            feeds_tx,
        }
    }

    // -----------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------

    /// The latest committed change set. Replace-on-write: each publication
    /// is the complete current set, not a delta.
    pub fn subscribe_changes(&self) -> watch::Receiver<ChangeSet> {
        self.changes_tx.subscribe()
    }

    /// The current folder collection, replaced wholesale on structural change.
    pub fn subscribe_folders(&self) -> watch::Receiver<Arc<Vec<Folder>>> {
        self.folders_tx.subscribe()
    }

    /// The current feed collection, replaced wholesale on structural change.
    pub fn subscribe_feeds(&self) -> watch::Receiver<Arc<Vec<Feed>>> {
        self.feeds_tx.subscribe()
    }

    // -----------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------

    pub fn folders(&self) -> Result<Vec<Folder>, StoreError> {
        Ok(db::get_folders(&self.conn)?)
    }

    pub fn feeds(&self) -> Result<Vec<Feed>, StoreError> {
        Ok(db::get_feeds(&self.conn)?)
    }

    pub fn items(&self, query: &ItemQuery) -> Result<Vec<Item>, StoreError> {
        Ok(db::get_items(&self.conn, query)?)
    }

    pub fn item_count(&self, query: &ItemQuery) -> Result<i64, StoreError> {
        Ok(db::count_items(&self.conn, query)?)
    }

    pub fn folder(&self, id: i64) -> Result<Option<Folder>, StoreError> {
        Ok(db::get_folder(&self.conn, id)?)
    }

    pub fn feed(&self, id: i64) -> Result<Option<Feed>, StoreError> {
        Ok(db::get_feed(&self.conn, id)?)
    }

    pub fn item(&self, id: i64) -> Result<Option<Item>, StoreError> {
        Ok(db::get_item(&self.conn, id)?)
    }

    pub fn thumbnail(&self, item_id: i64) -> Result<Option<String>, StoreError> {
        Ok(db::get_thumbnail(&self.conn, item_id)?)
    }

    pub fn pending_marks(&self) -> Result<Vec<PendingMark>, StoreError> {
        Ok(db::get_pending_marks(&self.conn)?)
    }

    // -----------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------

    /// Buffer a mutation until the next `save()`.
    pub fn stage(&mut self, op: Op) {
        self.pending.push(op);
    }

    /// Stage a batch and save it in one call.
    pub fn apply(&mut self, ops: Vec<Op>) -> Result<ChangeSet, StoreError> {
        self.pending.extend(ops);
        self.save()
    }

    /// Commit all staged mutations as one transaction and publish the
    /// resulting change set. On failure nothing is committed, previously
    /// committed state is untouched, and the staged queue is discarded.
    pub fn save(&mut self) -> Result<ChangeSet, StoreError> {
        let ops = std::mem::take(&mut self.pending);
        if ops.is_empty() {
            return Ok(ChangeSet::new());
        }

        let mut set = ChangeSet::new();
        let tx = self.conn.transaction()?;
        for op in &ops {
            apply_op(&tx, op, &mut set)?;
        }
        tx.commit()?;

        self.refresh_snapshots(&set);
        self.changes_tx.send_replace(set.clone());
        Ok(set)
    }

    /// Replace the folder/feed snapshots after a structural change. A failed
    /// refresh fetch keeps the previous cached collection in place;
    /// stale-but-available beats empty.
    fn refresh_snapshots(&self, set: &ChangeSet) {
        if set.reload_folders {
            match db::get_folders(&self.conn) {
                Ok(folders) => {
                    self.folders_tx.send_replace(Arc::new(folders));
                }
                Err(err) => warn!(%err, "folder snapshot refresh failed, keeping stale data"),
            }
        }
        if set.reload_feeds {
            match db::get_feeds(&self.conn) {
                Ok(feeds) => {
                    self.feeds_tx.send_replace(Arc::new(feeds));
                }
                Err(err) => warn!(%err, "feed snapshot refresh failed, keeping stale data"),
            }
        }
    }
}

/// Execute one op inside the save transaction, folding the navigation
/// scopes it invalidates into `set`.
fn apply_op(tx: &Connection, op: &Op, set: &mut ChangeSet) -> Result<(), StoreError> {
    match op {
        Op::UpsertFolder(folder) => {
            let previous = db::get_folder(tx, folder.id)?;
            db::upsert_folder(tx, folder)?;
            set.reload_folders = true;
            if previous.map_or(true, |old| old.name != folder.name) {
                set.insert(NodeType::Folder(folder.id), ChangeField::Title);
            }
        }
        Op::UpsertFeed(feed) => {
            let previous = db::get_feed(tx, feed.id)?;
            db::upsert_feed(tx, feed)?;
            set.reload_feeds = true;
            match previous {
                None => set.insert(NodeType::Feed(feed.id), ChangeField::Title),
                Some(old) => {
                    if old.title != feed.title {
                        set.insert(NodeType::Feed(feed.id), ChangeField::Title);
                    }
                    if old.unread_count != feed.unread_count {
                        set.insert(NodeType::Feed(feed.id), ChangeField::Unread);
                    }
                    if old.update_error_count != feed.update_error_count {
                        set.insert(NodeType::Feed(feed.id), ChangeField::ErrorCount);
                    }
                }
            }
        }
        Op::UpsertItem(item) => {
            let previous = db::get_item(tx, item.id)?;
            db::upsert_item(tx, item)?;
            match previous {
                None => set.item_inserted(),
                Some(old) => {
                    if old.unread != item.unread {
                        item_scope(tx, set, item.feed_id, ChangeField::Unread)?;
                    }
                    if old.starred != item.starred {
                        item_scope(tx, set, item.feed_id, ChangeField::Starred)?;
                    }
                }
            }
        }
        Op::SetItemUnread { id, unread } => {
            if let Some(item) = db::get_item(tx, *id)? {
                db::set_item_unread(tx, *id, *unread)?;
                if item.unread != *unread {
                    item_scope(tx, set, item.feed_id, ChangeField::Unread)?;
                }
            }
        }
        Op::SetItemStarred { id, starred } => {
            if let Some(item) = db::get_item(tx, *id)? {
                db::set_item_starred(tx, *id, *starred)?;
                if item.starred != *starred {
                    item_scope(tx, set, item.feed_id, ChangeField::Starred)?;
                }
            }
        }
        Op::MarkFeedRead { feed_id } => {
            db::mark_feed_read(tx, *feed_id)?;
            item_scope(tx, set, *feed_id, ChangeField::Unread)?;
        }
        Op::DeleteFolders(ids) => {
            db::delete_folders(tx, ids)?;
            set.reload_folders = true;
            set.reload_feeds = true;
            set.insert(NodeType::All, ChangeField::Unread);
        }
        Op::DeleteFeeds(ids) => {
            db::delete_feeds(tx, ids)?;
            set.reload_feeds = true;
            set.insert(NodeType::All, ChangeField::Unread);
        }
        Op::DeleteItemsOfFeed(feed_id) => {
            db::delete_items_of_feed(tx, *feed_id)?;
            item_scope(tx, set, *feed_id, ChangeField::Unread)?;
        }
        Op::EnqueueMark { item_id, field, intended } => {
            db::enqueue_mark(tx, *item_id, *field, *intended)?;
        }
        Op::AckMark { item_id, field } => {
            db::ack_mark(tx, *item_id, *field)?;
        }
        Op::BumpMarkAttempts { item_id, field } => {
            db::bump_mark_attempts(tx, *item_id, *field)?;
        }
    }
    Ok(())
}

/// The scopes invalidated by an item-level unread/starred change: its feed,
/// the feed's folder when one exists, and the `all`/`starred` aggregates.
fn item_scope(
    tx: &Connection,
    set: &mut ChangeSet,
    feed_id: i64,
    field: ChangeField,
) -> Result<(), StoreError> {
    let folder_id = match db::get_feed(tx, feed_id)? {
        Some(feed) if feed.folder_id != TOP_LEVEL_FOLDER => {
            db::get_folder(tx, feed.folder_id)?.map(|f| f.id)
        }
        _ => None,
    };
    set.item_state_changed(feed_id, folder_id, field);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{sample_feed, sample_folder, sample_item, test_conn};

    fn test_store() -> Store {
        Store::new(test_conn())
    }

    fn seeded_store() -> Store {
        let mut store = test_store();
        store
            .apply(vec![
                Op::UpsertFolder(sample_folder(2)),
                Op::UpsertFeed(sample_feed(7, 2)),
                Op::UpsertFeed(sample_feed(9, 0)),
                Op::UpsertItem(Box::new(sample_item(1, 7))),
                Op::UpsertItem(Box::new(sample_item(2, 9))),
            ])
            .unwrap();
        store
    }

    #[test]
    fn save_with_nothing_staged_is_empty() {
        let mut store = test_store();
        let set = store.save().unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn insert_batch_commits_and_reports_structure() {
        let mut store = test_store();
        store.stage(Op::UpsertFolder(sample_folder(1)));
        store.stage(Op::UpsertFeed(sample_feed(10, 1)));
        store.stage(Op::UpsertItem(Box::new(sample_item(100, 10))));

        let set = store.save().unwrap();
        assert!(set.reload_folders);
        assert!(set.reload_feeds);
        assert!(set.contains(NodeType::All, ChangeField::Unread));

        assert_eq!(store.folders().unwrap().len(), 1);
        assert_eq!(store.feeds().unwrap().len(), 1);
        assert_eq!(store.item_count(&ItemQuery::default()).unwrap(), 1);
    }

    #[test]
    fn unread_toggle_invalidates_feed_folder_all_starred() {
        let mut store = seeded_store();
        let set = store
            .apply(vec![Op::SetItemUnread { id: 1, unread: false }])
            .unwrap();

        assert!(set.contains(NodeType::Feed(7), ChangeField::Unread));
        assert!(set.contains(NodeType::Folder(2), ChangeField::Unread));
        assert!(set.contains(NodeType::All, ChangeField::Unread));
        assert!(set.contains(NodeType::Starred, ChangeField::Unread));
    }

    #[test]
    fn starred_toggle_on_top_level_feed_skips_folder() {
        let mut store = seeded_store();
        let set = store
            .apply(vec![Op::SetItemStarred { id: 2, starred: true }])
            .unwrap();

        assert!(set.contains(NodeType::Feed(9), ChangeField::Starred));
        assert!(set.contains(NodeType::All, ChangeField::Starred));
        assert!(set.contains(NodeType::Starred, ChangeField::Starred));
        assert!(!set.iter().any(|c| matches!(c.node_type, NodeType::Folder(_))));
    }

    #[test]
    fn missing_folder_reference_is_not_reported() {
        let mut store = test_store();
        // Feed claims folder 5, which does not exist.
        store
            .apply(vec![
                Op::UpsertFeed(sample_feed(7, 5)),
                Op::UpsertItem(Box::new(sample_item(1, 7))),
            ])
            .unwrap();

        let set = store
            .apply(vec![Op::SetItemUnread { id: 1, unread: false }])
            .unwrap();
        assert!(set.contains(NodeType::Feed(7), ChangeField::Unread));
        assert!(!set.iter().any(|c| matches!(c.node_type, NodeType::Folder(_))));
    }

    #[test]
    fn toggle_to_same_value_reports_nothing() {
        let mut store = seeded_store();
        // Item 1 is already unread.
        let set = store
            .apply(vec![Op::SetItemUnread { id: 1, unread: true }])
            .unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn failed_save_commits_nothing() {
        let mut store = test_store();
        store.stage(Op::UpsertFeed(sample_feed(1, 0)));
        // Item referencing a feed that will not exist violates the
        // foreign key and fails the whole transaction.
        store.stage(Op::UpsertItem(Box::new(sample_item(1, 999))));

        assert!(store.save().is_err());
        assert!(store.feeds().unwrap().is_empty());
        assert_eq!(store.item_count(&ItemQuery::default()).unwrap(), 0);
    }

    #[test]
    fn change_set_is_published_once_per_transaction() {
        let mut store = seeded_store();
        let mut rx = store.subscribe_changes();
        assert!(!rx.has_changed().unwrap());

        let set = store
            .apply(vec![
                Op::SetItemUnread { id: 1, unread: false },
                Op::SetItemStarred { id: 1, starred: true },
            ])
            .unwrap();

        assert!(rx.has_changed().unwrap());
        let published = rx.borrow_and_update().clone();
        assert_eq!(published, set);
        // No second publication for the same save.
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn snapshots_replace_wholesale_on_structural_change() {
        let mut store = seeded_store();
        let feeds_rx = store.subscribe_feeds();
        assert_eq!(feeds_rx.borrow().len(), 2);

        store.apply(vec![Op::DeleteFeeds(vec![9])]).unwrap();
        assert_eq!(feeds_rx.borrow().len(), 1);
        assert_eq!(feeds_rx.borrow()[0].id, 7);
    }

    #[test]
    fn mark_feed_read_touches_feed_scope() {
        let mut store = seeded_store();
        let set = store.apply(vec![Op::MarkFeedRead { feed_id: 7 }]).unwrap();
        assert!(set.contains(NodeType::Feed(7), ChangeField::Unread));
        assert!(set.contains(NodeType::Folder(2), ChangeField::Unread));

        let q = ItemQuery { feed_id: Some(7), unread: Some(true), ..Default::default() };
        assert_eq!(store.item_count(&q).unwrap(), 0);
    }

    #[test]
    fn feed_update_diffs_fields() {
        let mut store = seeded_store();

        let mut updated = sample_feed(7, 2);
        updated.unread_count = 12;
        let set = store.apply(vec![Op::UpsertFeed(updated)]).unwrap();
        assert!(set.contains(NodeType::Feed(7), ChangeField::Unread));
        assert!(!set.contains(NodeType::Feed(7), ChangeField::Title));

        let mut errored = sample_feed(7, 2);
        errored.unread_count = 12;
        errored.update_error_count = 3;
        let set = store.apply(vec![Op::UpsertFeed(errored)]).unwrap();
        assert!(set.contains(NodeType::Feed(7), ChangeField::ErrorCount));
    }

    #[test]
    fn deleting_folder_flags_both_collections() {
        let mut store = seeded_store();
        let set = store.apply(vec![Op::DeleteFolders(vec![2])]).unwrap();
        assert!(set.reload_folders);
        assert!(set.reload_feeds);
        assert!(store.folder(2).unwrap().is_none());
        assert!(store.feed(7).unwrap().is_none());
    }
}
