//! Async access to the synchronous entity store.
//!
//! rusqlite is a synchronous library, so every store operation would
//! otherwise block the caller's async task. This module owns the [`Store`]
//! behind a single worker task: commands arrive over an unbounded channel,
//! each one runs in a blocking task against the store's lock, and the
//! result comes back over a oneshot. The lock is the write-serialization
//! point the rest of the crate relies on.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, oneshot};

use crate::changes::ChangeSet;
use crate::db::{Feed, Folder, Item, ItemQuery, MarkField, PendingMark};
use crate::error::StoreError;
use crate::store::{Op, Store};

/// Commands processed by the store worker.
pub enum StoreCommand {
    GetFolders {
        respond_to: oneshot::Sender<Result<Vec<Folder>, StoreError>>,
    },
    GetFeeds {
        respond_to: oneshot::Sender<Result<Vec<Feed>, StoreError>>,
    },
    GetItems {
        query: ItemQuery,
        respond_to: oneshot::Sender<Result<Vec<Item>, StoreError>>,
    },
    CountItems {
        query: ItemQuery,
        respond_to: oneshot::Sender<Result<i64, StoreError>>,
    },
    GetFolder {
        id: i64,
        respond_to: oneshot::Sender<Result<Option<Folder>, StoreError>>,
    },
    GetFeed {
        id: i64,
        respond_to: oneshot::Sender<Result<Option<Feed>, StoreError>>,
    },
    GetItem {
        id: i64,
        respond_to: oneshot::Sender<Result<Option<Item>, StoreError>>,
    },
    GetThumbnail {
        item_id: i64,
        respond_to: oneshot::Sender<Result<Option<String>, StoreError>>,
    },
    GetPendingMarks {
        respond_to: oneshot::Sender<Result<Vec<PendingMark>, StoreError>>,
    },
    /// Stage a batch of ops and save them as one transaction.
    Apply {
        ops: Vec<Op>,
        respond_to: oneshot::Sender<Result<ChangeSet, StoreError>>,
    },
}

/// Cloneable handle to the store worker. This is the one store handle the
/// rest of the system goes through; reads can be issued from any task, and
/// all writes funnel into the worker's serialized lock.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::UnboundedSender<StoreCommand>,
    changes_rx: tokio::sync::watch::Receiver<ChangeSet>,
    folders_rx: tokio::sync::watch::Receiver<Arc<Vec<Folder>>>,
    feeds_rx: tokio::sync::watch::Receiver<Arc<Vec<Feed>>>,
}

impl StoreHandle {
    /// Move a store into a worker task and return the handle.
    pub fn spawn(store: Store) -> Self {
        let changes_rx = store.subscribe_changes();
        let folders_rx = store.subscribe_folders();
        let feeds_rx = store.subscribe_feeds();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let store = Arc::new(Mutex::new(store));

        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                let store = Arc::clone(&store);
                // Awaited so commands execute strictly in arrival order;
                // the store never sees interleaved half-batches.
                let _ = tokio::task::spawn_blocking(move || {
                    let mut store = store.blocking_lock();
                    match cmd {
                        StoreCommand::GetFolders { respond_to } => {
                            let _ = respond_to.send(store.folders());
                        }
                        StoreCommand::GetFeeds { respond_to } => {
                            let _ = respond_to.send(store.feeds());
                        }
                        StoreCommand::GetItems { query, respond_to } => {
                            let _ = respond_to.send(store.items(&query));
                        }
                        StoreCommand::CountItems { query, respond_to } => {
                            let _ = respond_to.send(store.item_count(&query));
                        }
                        StoreCommand::GetFolder { id, respond_to } => {
                            let _ = respond_to.send(store.folder(id));
                        }
                        StoreCommand::GetFeed { id, respond_to } => {
                            let _ = respond_to.send(store.feed(id));
                        }
                        StoreCommand::GetItem { id, respond_to } => {
                            let _ = respond_to.send(store.item(id));
                        }
                        StoreCommand::GetThumbnail { item_id, respond_to } => {
                            let _ = respond_to.send(store.thumbnail(item_id));
                        }
                        StoreCommand::GetPendingMarks { respond_to } => {
                            let _ = respond_to.send(store.pending_marks());
                        }
                        StoreCommand::Apply { ops, respond_to } => {
                            let _ = respond_to.send(store.apply(ops));
                        }
                    }
                })
                .await;
            }
        });

        Self {
            tx,
            changes_rx,
            folders_rx,
            feeds_rx,
        }
    }

    fn send(&self, cmd: StoreCommand) -> Result<(), StoreError> {
        self.tx.send(cmd).map_err(|_| StoreError::ChannelClosed)
    }

    async fn receive<T>(rx: oneshot::Receiver<Result<T, StoreError>>) -> Result<T, StoreError> {
        rx.await.map_err(|_| StoreError::ChannelClosed)?
    }

    // -----------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------

    pub async fn folders(&self) -> Result<Vec<Folder>, StoreError> {
        let (tx, rx) = oneshot::channel();
        self.send(StoreCommand::GetFolders { respond_to: tx })?;
        Self::receive(rx).await
    }

    pub async fn feeds(&self) -> Result<Vec<Feed>, StoreError> {
        let (tx, rx) = oneshot::channel();
        self.send(StoreCommand::GetFeeds { respond_to: tx })?;
        Self::receive(rx).await
    }

    pub async fn items(&self, query: ItemQuery) -> Result<Vec<Item>, StoreError> {
        let (tx, rx) = oneshot::channel();
        self.send(StoreCommand::GetItems { query, respond_to: tx })?;
        Self::receive(rx).await
    }

    pub async fn item_count(&self, query: ItemQuery) -> Result<i64, StoreError> {
        let (tx, rx) = oneshot::channel();
        self.send(StoreCommand::CountItems { query, respond_to: tx })?;
        Self::receive(rx).await
    }

    pub async fn folder(&self, id: i64) -> Result<Option<Folder>, StoreError> {
        let (tx, rx) = oneshot::channel();
        self.send(StoreCommand::GetFolder { id, respond_to: tx })?;
        Self::receive(rx).await
    }

    pub async fn feed(&self, id: i64) -> Result<Option<Feed>, StoreError> {
        let (tx, rx) = oneshot::channel();
        self.send(StoreCommand::GetFeed { id, respond_to: tx })?;
        Self::receive(rx).await
    }

    pub async fn item(&self, id: i64) -> Result<Option<Item>, StoreError> {
        let (tx, rx) = oneshot::channel();
        self.send(StoreCommand::GetItem { id, respond_to: tx })?;
        Self::receive(rx).await
    }

    pub async fn thumbnail(&self, item_id: i64) -> Result<Option<String>, StoreError> {
        let (tx, rx) = oneshot::channel();
        self.send(StoreCommand::GetThumbnail { item_id, respond_to: tx })?;
        Self::receive(rx).await
    }

    pub async fn pending_marks(&self) -> Result<Vec<PendingMark>, StoreError> {
        let (tx, rx) = oneshot::channel();
        self.send(StoreCommand::GetPendingMarks { respond_to: tx })?;
        Self::receive(rx).await
    }

    // -----------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------

    /// Stage a batch of ops and commit them as one transaction.
    pub async fn apply(&self, ops: Vec<Op>) -> Result<ChangeSet, StoreError> {
        let (tx, rx) = oneshot::channel();
        self.send(StoreCommand::Apply { ops, respond_to: tx })?;
        Self::receive(rx).await
    }

    /// User toggle: set an item's unread state and queue the pending mark
    /// for reconciliation, in one transaction.
    pub async fn set_item_unread(&self, id: i64, unread: bool) -> Result<ChangeSet, StoreError> {
        self.apply(vec![
            Op::SetItemUnread { id, unread },
            Op::EnqueueMark {
                item_id: id,
                field: MarkField::Unread,
                intended: unread,
            },
        ])
        .await
    }

    /// User toggle: set an item's starred state and queue the pending mark
    /// for reconciliation, in one transaction.
    pub async fn set_item_starred(&self, id: i64, starred: bool) -> Result<ChangeSet, StoreError> {
        self.apply(vec![
            Op::SetItemStarred { id, starred },
            Op::EnqueueMark {
                item_id: id,
                field: MarkField::Starred,
                intended: starred,
            },
        ])
        .await
    }

    /// Mark every item in a feed as read.
    pub async fn mark_feed_read(&self, feed_id: i64) -> Result<ChangeSet, StoreError> {
        self.apply(vec![Op::MarkFeedRead { feed_id }]).await
    }

    /// Drop a pending mark whose write has been confirmed out of band.
    pub async fn ack_mark(&self, item_id: i64, field: MarkField) -> Result<ChangeSet, StoreError> {
        self.apply(vec![Op::AckMark { item_id, field }]).await
    }

    // -----------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------

    pub fn subscribe_changes(&self) -> tokio::sync::watch::Receiver<ChangeSet> {
        self.changes_rx.clone()
    }

    pub fn subscribe_folders(&self) -> tokio::sync::watch::Receiver<Arc<Vec<Folder>>> {
        self.folders_rx.clone()
    }

    pub fn subscribe_feeds(&self) -> tokio::sync::watch::Receiver<Arc<Vec<Feed>>> {
        self.feeds_rx.clone()
    }
}
