use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::{BoxFuture, join_all};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::cancel::CancelFlag;
use crate::changes::ChangeSet;
use crate::db::{Feed, Folder, Item, MarkField, TOP_LEVEL_FOLDER};
use crate::error::{DeletionError, StoreError};
use crate::store::Op;
use crate::store_async::StoreHandle;
use crate::text;

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

/// A folder as decoded by the sync-transport collaborator.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderDto {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
}

/// A feed as decoded by the sync-transport collaborator.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedDto {
    pub id: i64,
    #[serde(default)]
    pub folder_id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub favicon_link: Option<String>,
    #[serde(default)]
    pub added: i64,
    #[serde(default)]
    pub ordering: i64,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub unread_count: i64,
    #[serde(default)]
    pub update_error_count: i64,
    #[serde(default)]
    pub last_update_error: Option<String>,
    #[serde(default)]
    pub next_update_time: Option<i64>,
}

/// An article as decoded by the sync-transport collaborator.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDto {
    pub id: i64,
    pub feed_id: i64,
    #[serde(default)]
    pub guid: Option<String>,
    #[serde(default)]
    pub guid_hash: Option<String>,
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub media_thumbnail: Option<String>,
    #[serde(default)]
    pub media_description: Option<String>,
    #[serde(default)]
    pub enclosure_link: Option<String>,
    #[serde(default)]
    pub enclosure_mime: Option<String>,
    #[serde(default)]
    pub pub_date: i64,
    #[serde(default)]
    pub last_modified: i64,
    #[serde(default)]
    pub updated_date: Option<i64>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub rtl: bool,
    #[serde(default)]
    pub starred: bool,
    #[serde(default = "default_unread")]
    pub unread: bool,
    #[serde(default)]
    pub content_hash: Option<String>,
}

fn default_unread() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Page-metadata collaborator
// ---------------------------------------------------------------------------

/// The excluded network/HTML collaborator behind thumbnail resolution's
/// last resort: fetch an article page and read its `og:image` (falling back
/// to `twitter:image`). Implementations return `None` on any failure;
/// a missing thumbnail is never a reconciliation failure.
pub trait PageMeta: Send + Sync {
    fn image_for_page<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Option<Url>>;
}

/// Stub collaborator that never yields an image. The default when no
/// network-backed implementation is wired in.
pub struct NoPageMeta;

impl PageMeta for NoPageMeta {
    fn image_for_page<'a>(&'a self, _url: &'a Url) -> BoxFuture<'a, Option<Url>> {
        Box::pin(futures::future::ready(None))
    }
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// Makes the local mirror match a server snapshot: upserts with derived
/// display fields, pruning of absent entities, and acknowledgement of
/// pending local marks.
///
/// Callers must respect the dependency order within one sync pass:
/// folders, then feeds, then items, and only then rebuild the navigation
/// forest. Otherwise feed rows can reference not-yet-created folders, or
/// nodes can reference stale feeds.
pub struct Reconciler {
    store: StoreHandle,
    page_meta: Arc<dyn PageMeta>,
}

impl Reconciler {
    pub fn new(store: StoreHandle, page_meta: Arc<dyn PageMeta>) -> Self {
        Self { store, page_meta }
    }

    /// Upsert folder rows from a server snapshot. Locally tracked state
    /// (the opened flag) survives the upsert.
    pub async fn reconcile_folders(
        &self,
        folders: Vec<FolderDto>,
        cancel: &CancelFlag,
    ) -> Result<ChangeSet, StoreError> {
        let existing: HashMap<i64, Folder> = self
            .store
            .folders()
            .await?
            .into_iter()
            .map(|f| (f.id, f))
            .collect();

        let mut ops = Vec::with_capacity(folders.len());
        for dto in folders {
            if cancel.is_cancelled() {
                debug!("folder reconciliation cancelled");
                break;
            }
            let (opened, last_modified) = existing
                .get(&dto.id)
                .map(|f| (f.opened, f.last_modified))
                .unwrap_or((true, 0));
            ops.push(Op::UpsertFolder(Folder {
                id: dto.id,
                name: dto.name,
                opened,
                last_modified,
            }));
        }

        if ops.is_empty() {
            return Ok(ChangeSet::new());
        }
        self.store.apply(ops).await
    }

    /// Upsert feed rows from a server snapshot. A feed pointing at a folder
    /// the server no longer lists is clamped to the top level so the
    /// folder-reference invariant holds. Local reader-mode preferences
    /// survive the upsert.
    pub async fn reconcile_feeds(
        &self,
        feeds: Vec<FeedDto>,
        server_folder_ids: &[i64],
        cancel: &CancelFlag,
    ) -> Result<ChangeSet, StoreError> {
        let known: HashSet<i64> = server_folder_ids.iter().copied().collect();
        let existing: HashMap<i64, Feed> = self
            .store
            .feeds()
            .await?
            .into_iter()
            .map(|f| (f.id, f))
            .collect();

        let mut ops = Vec::with_capacity(feeds.len());
        for dto in feeds {
            if cancel.is_cancelled() {
                debug!("feed reconciliation cancelled");
                break;
            }

            let folder_id = if dto.folder_id != TOP_LEVEL_FOLDER && !known.contains(&dto.folder_id)
            {
                warn!(feed_id = dto.id, folder_id = dto.folder_id, "unknown folder, keeping feed at top level");
                TOP_LEVEL_FOLDER
            } else {
                dto.folder_id
            };

            let (prefer_web, use_reader) = existing
                .get(&dto.id)
                .map(|f| (f.prefer_web, f.use_reader))
                .unwrap_or((false, false));

            ops.push(Op::UpsertFeed(Feed {
                id: dto.id,
                folder_id,
                title: dto.title,
                url: dto.url,
                link: dto.link,
                favicon_link: dto.favicon_link,
                added: dto.added,
                ordering: dto.ordering,
                pinned: dto.pinned,
                unread_count: dto.unread_count,
                update_error_count: dto.update_error_count,
                last_update_error: dto.last_update_error,
                next_update_time: dto.next_update_time,
                prefer_web,
                use_reader,
            }));
        }

        if ops.is_empty() {
            return Ok(ChangeSet::new());
        }
        self.store.apply(ops).await
    }

    /// Upsert an item batch with freshly derived display fields.
    ///
    /// Thumbnails resolve concurrently per item, outside the store's write
    /// serialization; the whole batch then commits as one transaction, so
    /// the change tracker is woken once, never mid-batch. Pending marks
    /// whose intended state the snapshot now reflects are acknowledged;
    /// the rest record another attempt.
    pub async fn reconcile_items(
        &self,
        batch: Vec<ItemDto>,
        cancel: &CancelFlag,
    ) -> Result<ChangeSet, StoreError> {
        let thumbnails = join_all(batch.iter().map(|dto| {
            let store = self.store.clone();
            let page_meta = Arc::clone(&self.page_meta);
            async move {
                // A failed lookup degrades to re-resolution, not an error.
                let existing = store.thumbnail(dto.id).await.unwrap_or(None);
                resolve_thumbnail(existing, dto, page_meta.as_ref()).await
            }
        }))
        .await;

        let marks = self.store.pending_marks().await?;

        let mut ops = Vec::with_capacity(batch.len());
        for (dto, thumbnail) in batch.iter().zip(thumbnails) {
            if cancel.is_cancelled() {
                debug!(committed = ops.len(), "item batch cancelled, committing processed prefix");
                break;
            }

            for mark in marks.iter().filter(|m| m.item_id == dto.id) {
                let confirmed = match mark.field {
                    MarkField::Unread => dto.unread == mark.intended,
                    MarkField::Starred => dto.starred == mark.intended,
                };
                ops.push(if confirmed {
                    Op::AckMark {
                        item_id: mark.item_id,
                        field: mark.field,
                    }
                } else {
                    Op::BumpMarkAttempts {
                        item_id: mark.item_id,
                        field: mark.field,
                    }
                });
            }

            ops.push(Op::UpsertItem(Box::new(derive_item(dto, thumbnail))));
        }

        if ops.is_empty() {
            return Ok(ChangeSet::new());
        }
        self.store.apply(ops).await
    }

    /// Delete every local feed absent from the server's feed-id set, items
    /// first so no dangling references survive; the feed's navigation node
    /// disappears with the snapshot reload that triggers the next rebuild.
    /// Idempotent: a second run with the same set is a no-op.
    pub async fn prune_feeds(&self, server_feed_ids: &[i64]) -> Result<ChangeSet, DeletionError> {
        let keep: HashSet<i64> = server_feed_ids.iter().copied().collect();
        let local = self.store.feeds().await.map_err(DeletionError::Feed)?;
        let stale: Vec<i64> = local
            .iter()
            .map(|f| f.id)
            .filter(|id| !keep.contains(id))
            .collect();

        if stale.is_empty() {
            return Ok(ChangeSet::new());
        }

        let mut ops: Vec<Op> = stale.iter().map(|&id| Op::DeleteItemsOfFeed(id)).collect();
        ops.push(Op::DeleteFeeds(stale));
        self.store.apply(ops).await.map_err(DeletionError::Feed)
    }

    /// Delete every local folder absent from the server's folder-id set.
    /// The store's cascade removes each folder's feeds and their items.
    /// Idempotent: a second run with the same set is a no-op.
    pub async fn prune_folders(
        &self,
        server_folder_ids: &[i64],
    ) -> Result<ChangeSet, DeletionError> {
        let keep: HashSet<i64> = server_folder_ids.iter().copied().collect();
        let local = self.store.folders().await.map_err(DeletionError::Folder)?;
        let stale: Vec<i64> = local
            .iter()
            .map(|f| f.id)
            .filter(|id| !keep.contains(id))
            .collect();

        if stale.is_empty() {
            return Ok(ChangeSet::new());
        }
        self.store
            .apply(vec![Op::DeleteFolders(stale)])
            .await
            .map_err(DeletionError::Folder)
    }
}

// ---------------------------------------------------------------------------
// Derivation
// ---------------------------------------------------------------------------

/// Build the item row for a DTO, deriving the cached display fields.
fn derive_item(dto: &ItemDto, thumbnail: Option<Url>) -> Item {
    let display_title = text::extract_plain_text(dto.title.as_deref().unwrap_or(""));
    let raw_body = dto
        .body
        .as_deref()
        .or(dto.media_description.as_deref())
        .unwrap_or("");
    let display_body = text::extract_plain_text(&text::strip_style_block(raw_body));
    let date_feed_author = text::date_feed_author(dto.pub_date, dto.author.as_deref());

    Item {
        id: dto.id,
        feed_id: dto.feed_id,
        guid: dto.guid.clone(),
        guid_hash: dto.guid_hash.clone(),
        fingerprint: dto.fingerprint.clone(),
        title: dto.title.clone(),
        author: dto.author.clone(),
        body: dto.body.clone(),
        media_thumbnail: dto.media_thumbnail.clone(),
        media_description: dto.media_description.clone(),
        enclosure_link: dto.enclosure_link.clone(),
        enclosure_mime: dto.enclosure_mime.clone(),
        pub_date: dto.pub_date,
        last_modified: dto.last_modified,
        updated_date: dto.updated_date,
        url: dto.url.clone(),
        rtl: dto.rtl,
        starred: dto.starred,
        unread: dto.unread,
        thumbnail_url: thumbnail.map(|u| u.to_string()),
        display_title,
        display_body,
        date_feed_author,
    }
}

/// Resolve an item's thumbnail, short-circuiting at the first success:
/// the stored value, the explicit media thumbnail, the first usable body
/// image, then the page-metadata collaborator. Anything that fails along
/// the way simply falls through; the final fallback is no thumbnail.
async fn resolve_thumbnail(
    existing: Option<String>,
    dto: &ItemDto,
    page_meta: &dyn PageMeta,
) -> Option<Url> {
    if let Some(prev) = existing {
        if let Ok(url) = Url::parse(&prev) {
            return Some(url);
        }
    }
    if let Some(raw) = dto.media_thumbnail.as_deref() {
        if let Ok(url) = Url::parse(raw) {
            return Some(url);
        }
    }
    if let Some(body) = dto.body.as_deref() {
        if let Some(url) = text::first_image_url(body) {
            return Some(url);
        }
    }
    if let Some(page) = dto.url.as_deref().and_then(|u| Url::parse(u).ok()) {
        if let Some(url) = page_meta.image_for_page(&page).await {
            return Some(url);
        }
    }
    None
}
