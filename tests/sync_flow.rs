//! End-to-end flow against a real database file: migrations run first,
//! a full server snapshot reconciles in dependency order, the navigation
//! forest rebuilds from the committed rows, and offline edits publish the
//! expected change sets.

use std::sync::Arc;

use anyhow::Result;
use newsmirror::{
    CancelFlag, ChangeField, FeedDto, FolderDto, ItemDto, MigrationRunner, NoPageMeta, NodeForest,
    NodeType, Reconciler, Settings, Store, StoreHandle, db,
};

fn temp_db_path() -> std::path::PathBuf {
    std::env::temp_dir().join(format!("newsmirror-sync-flow-{}.db", std::process::id()))
}

fn cleanup(path: &std::path::Path) {
    for suffix in ["", "-wal", "-shm"] {
        let mut file = path.as_os_str().to_owned();
        file.push(suffix);
        let _ = std::fs::remove_file(std::path::PathBuf::from(file));
    }
}

#[tokio::test]
async fn full_sync_flow() -> Result<()> {
    let path = temp_db_path();
    cleanup(&path);

    // Startup: open the store and run migrations before anything else.
    let mut conn = db::initialize_at(&path)?;
    let cancel = CancelFlag::new();
    let mut runner = MigrationRunner::with_defaults(Settings::in_memory());
    let applied = runner.run_pending(&mut conn, &cancel)?;
    assert_eq!(applied, 2);
    // A second run is a no-op; the flags are set.
    assert_eq!(runner.run_pending(&mut conn, &cancel)?, 0);

    let handle = StoreHandle::spawn(Store::new(conn));
    let reconciler = Reconciler::new(handle.clone(), Arc::new(NoPageMeta));

    // Server snapshot, as the sync collaborator would deliver it.
    let folders: Vec<FolderDto> = serde_yaml::from_str(
        "- {id: 1, name: Tech}\n\
         - {id: 2, name: News}",
    )?;
    let feeds: Vec<FeedDto> = serde_yaml::from_str(
        "- {id: 10, folderId: 1, title: Ars, unreadCount: 2}\n\
         - {id: 20, folderId: 2, title: Wire}\n\
         - {id: 30, folderId: 0, title: Blog}",
    )?;
    let items: Vec<ItemDto> = serde_yaml::from_str(
        "- {id: 100, feedId: 10, title: First, body: '<p>Hello</p>', pubDate: 1700000000, author: Jane}\n\
         - {id: 101, feedId: 10, title: Second, pubDate: 1700000100}\n\
         - {id: 200, feedId: 20, title: Third, pubDate: 1700000200}\n\
         - {id: 300, feedId: 30, title: Fourth, pubDate: 1700000300}",
    )?;

    // Dependency order: folders, then feeds, then items.
    reconciler.reconcile_folders(folders, &cancel).await?;
    reconciler.reconcile_feeds(feeds, &[1, 2], &cancel).await?;
    reconciler.reconcile_items(items, &cancel).await?;

    let item = handle.item(100).await?.unwrap();
    assert_eq!(item.display_title, "First");
    assert_eq!(item.display_body, "Hello");
    assert!(item.date_feed_author.ends_with("| Jane"));

    // The navigation forest reflects the committed rows, in display order.
    let forest = NodeForest::rebuild(&handle.folders().await?, &handle.feeds().await?);
    let names: Vec<String> = forest
        .flattened()
        .iter()
        .map(|n| n.node_name.clone())
        .collect();
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);
    assert_eq!(forest.find(NodeType::Folder(1)).unwrap().children.len(), 1);
    assert!(forest.find(NodeType::Feed(30)).unwrap().is_top_level);

    // Offline edit: the change set names every affected scope and the
    // pending mark waits for server confirmation.
    let set = handle.set_item_unread(100, false).await?;
    assert!(set.contains(NodeType::Feed(10), ChangeField::Unread));
    assert!(set.contains(NodeType::Folder(1), ChangeField::Unread));
    assert!(set.contains(NodeType::All, ChangeField::Unread));
    assert!(set.contains(NodeType::Starred, ChangeField::Unread));
    assert_eq!(handle.pending_marks().await?.len(), 1);

    // The server catches up; the mark is acknowledged.
    let confirmed: Vec<ItemDto> = serde_yaml::from_str(
        "- {id: 100, feedId: 10, title: First, body: '<p>Hello</p>', pubDate: 1700000000, author: Jane, unread: false}",
    )?;
    reconciler.reconcile_items(confirmed, &cancel).await?;
    assert!(handle.pending_marks().await?.is_empty());

    // Folder 2 disappears from the server: its feed and items go with it.
    reconciler.prune_folders(&[1]).await?;
    assert!(handle.folder(2).await?.is_none());
    assert!(handle.feed(20).await?.is_none());
    assert!(handle.item(200).await?.is_none());
    assert!(handle.item(300).await?.is_some());

    cleanup(&path);
    Ok(())
}
