use thiserror::Error;

/// Errors surfaced by the entity store.
///
/// A failed `save()` leaves previously committed state untouched; there is
/// no partial commit to clean up after.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("persistence failure: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("store worker channel closed")]
    ChannelClosed,
}

/// Per-call deletion errors raised while pruning. The caller decides whether
/// to retry; nothing from the failing transaction has been committed.
#[derive(Debug, Error)]
pub enum DeletionError {
    #[error("error deleting node: {0}")]
    Node(#[source] StoreError),

    #[error("error deleting folder: {0}")]
    Folder(#[source] StoreError),

    #[error("error deleting feed: {0}")]
    Feed(#[source] StoreError),

    #[error("error deleting item: {0}")]
    Item(#[source] StoreError),
}

/// Errors from the durable settings file backing migration flags.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings encoding failed: {0}")]
    Encode(#[from] serde_yaml::Error),

    #[error("could not determine data directory")]
    NoDataDir,
}

/// A migration that fails leaves its completion flag unset, so it runs again
/// on the next launch. Migrations are written to tolerate partial
/// re-application.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration {id} failed: {source}")]
    Failed {
        id: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("could not persist migration flags: {0}")]
    Flags(#[from] SettingsError),
}
