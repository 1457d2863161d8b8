//! Local mirror and reconciliation engine for a folder/feed/article
//! aggregation service.
//!
//! Data flows in one direction: the sync collaborator hands parsed DTOs to
//! the [`reconcile::Reconciler`], which upserts and prunes rows through the
//! single-writer [`store_async::StoreHandle`]; each committed transaction
//! publishes one [`changes::ChangeSet`] plus fresh folder/feed snapshots,
//! from which [`tree::NodeForest`] rebuilds the navigation forest on
//! demand. [`migrate::MigrationRunner`] runs once at startup, before any
//! reconciliation.

pub mod cancel;
pub mod changes;
pub mod db;
pub mod error;
pub mod migrate;
pub mod reconcile;
pub mod settings;
pub mod store;
pub mod store_async;
pub mod text;
pub mod tree;

// Re-export commonly used types
pub use cancel::CancelFlag;
pub use changes::{ChangeField, ChangeSet, NodeChange};
pub use db::{Feed, Folder, Item, ItemQuery, ItemSort, MarkField, PendingMark};
pub use error::{DeletionError, MigrationError, SettingsError, StoreError};
pub use migrate::{Migration, MigrationRunner};
pub use reconcile::{FeedDto, FolderDto, ItemDto, NoPageMeta, PageMeta, Reconciler};
pub use settings::Settings;
pub use store::{Op, Store};
pub use store_async::StoreHandle;
pub use tree::{Node, NodeForest, NodeId, NodeType};
