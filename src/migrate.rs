use rusqlite::Connection;
use tracing::{debug, info};

use crate::cancel::CancelFlag;
use crate::error::MigrationError;
use crate::settings::Settings;
use crate::text;

/// One ordered, one-shot schema/data migration.
///
/// The completion flag and the data commit are separate writes: a crash
/// between them means the migration runs again on the next launch, so every
/// migration must either be idempotent or detect already-applied state
/// itself.
pub trait Migration: Send {
    /// Stable identifier the completion flag is keyed by.
    fn id(&self) -> &'static str;

    /// Apply the migration. Runs inside a transaction owned by the runner.
    fn apply(&self, conn: &Connection) -> Result<(), rusqlite::Error>;
}

/// Runs registered migrations in declaration order, skipping those whose
/// flag is already set. Must run before any reconciliation at startup.
pub struct MigrationRunner {
    settings: Settings,
    migrations: Vec<Box<dyn Migration>>,
}

impl MigrationRunner {
    /// A runner with an empty registry.
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            migrations: Vec::new(),
        }
    }

    /// A runner preloaded with the migrations this crate ships.
    pub fn with_defaults(settings: Settings) -> Self {
        let mut runner = Self::new(settings);
        runner.register(Box::new(AddReaderColumns));
        runner.register(Box::new(BackfillDisplayFields));
        runner
    }

    /// Append a migration. Order of registration is order of execution.
    pub fn register(&mut self, migration: Box<dyn Migration>) {
        self.migrations.push(migration);
    }

    /// Run every pending migration, marking each complete only after its
    /// own transaction has committed. Returns how many were applied.
    /// Cancellation is honored between migrations, never mid-migration.
    pub fn run_pending(
        &mut self,
        conn: &mut Connection,
        cancel: &CancelFlag,
    ) -> Result<usize, MigrationError> {
        let mut applied = 0;

        for migration in &self.migrations {
            if cancel.is_cancelled() {
                debug!("migration run cancelled; remaining migrations stay pending");
                break;
            }

            let id = migration.id();
            if self.settings.migration_complete(id) {
                debug!(id, "migration already complete, skipping");
                continue;
            }

            let tx = conn
                .transaction()
                .map_err(|source| MigrationError::Failed { id, source })?;
            migration
                .apply(&tx)
                .map_err(|source| MigrationError::Failed { id, source })?;
            tx.commit()
                .map_err(|source| MigrationError::Failed { id, source })?;

            // Flag write happens strictly after the data commit; a crash in
            // between retries the migration next launch.
            self.settings.mark_migration_complete(id)?;
            info!(id, "migration applied");
            applied += 1;
        }

        Ok(applied)
    }

    /// Clear one completion flag so the migration re-runs. Test/debug only.
    pub fn reset(&mut self, id: &str) -> Result<(), MigrationError> {
        self.settings.reset_migration(id)?;
        Ok(())
    }

    /// Clear every completion flag. Test/debug only.
    pub fn reset_all(&mut self) -> Result<(), MigrationError> {
        self.settings.reset_all_migrations()?;
        Ok(())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

// ---------------------------------------------------------------------------
// Shipped migrations
// ---------------------------------------------------------------------------

fn table_has_column(conn: &Connection, table: &str, column: &str) -> Result<bool, rusqlite::Error> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Adds the per-feed reader-mode columns to databases created before they
/// existed. Detects already-applied state via `PRAGMA table_info`.
pub struct AddReaderColumns;

impl Migration for AddReaderColumns {
    fn id(&self) -> &'static str {
        "0001_feed_reader_columns"
    }

    fn apply(&self, conn: &Connection) -> Result<(), rusqlite::Error> {
        if !table_has_column(conn, "feeds", "prefer_web")? {
            conn.execute_batch("ALTER TABLE feeds ADD COLUMN prefer_web INTEGER NOT NULL DEFAULT 0")?;
        }
        if !table_has_column(conn, "feeds", "use_reader")? {
            conn.execute_batch("ALTER TABLE feeds ADD COLUMN use_reader INTEGER NOT NULL DEFAULT 0")?;
        }
        Ok(())
    }
}

/// Recomputes cached display fields for rows written before derivation
/// moved into the reconciler. Only touches rows whose cache is empty, so
/// re-running after a partial application picks up where it stopped.
pub struct BackfillDisplayFields;

impl Migration for BackfillDisplayFields {
    fn id(&self) -> &'static str {
        "0002_backfill_display_fields"
    }

    fn apply(&self, conn: &Connection) -> Result<(), rusqlite::Error> {
        let mut stmt = conn.prepare(
            "SELECT id, title, body, media_description, pub_date, author
             FROM items WHERE display_title = '' OR date_feed_author = ''",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut update = conn.prepare(
            "UPDATE items SET display_title = ?2, display_body = ?3, date_feed_author = ?4
             WHERE id = ?1",
        )?;
        for (id, title, body, media_description, pub_date, author) in rows {
            let display_title = text::extract_plain_text(title.as_deref().unwrap_or(""));
            let raw_body = body.or(media_description).unwrap_or_default();
            let display_body = text::extract_plain_text(&text::strip_style_block(&raw_body));
            let byline = text::date_feed_author(pub_date, author.as_deref());
            update.execute(rusqlite::params![id, display_title, display_body, byline])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::db::tests::{sample_feed, sample_item};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingMigration {
        id: &'static str,
        runs: Arc<AtomicUsize>,
    }

    impl Migration for CountingMigration {
        fn id(&self) -> &'static str {
            self.id
        }

        fn apply(&self, _conn: &Connection) -> Result<(), rusqlite::Error> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingMigration;

    impl Migration for FailingMigration {
        fn id(&self) -> &'static str {
            "9999_failing"
        }

        fn apply(&self, conn: &Connection) -> Result<(), rusqlite::Error> {
            conn.execute_batch("INSERT INTO no_such_table DEFAULT VALUES")
        }
    }

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::apply_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn second_run_is_a_no_op() {
        let mut conn = test_conn();
        let runs = Arc::new(AtomicUsize::new(0));
        let mut runner = MigrationRunner::new(Settings::in_memory());
        runner.register(Box::new(CountingMigration {
            id: "0001_counting",
            runs: Arc::clone(&runs),
        }));

        let cancel = CancelFlag::new();
        assert_eq!(runner.run_pending(&mut conn, &cancel).unwrap(), 1);
        assert_eq!(runner.run_pending(&mut conn, &cancel).unwrap(), 0);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reset_allows_re_run() {
        let mut conn = test_conn();
        let runs = Arc::new(AtomicUsize::new(0));
        let mut runner = MigrationRunner::new(Settings::in_memory());
        runner.register(Box::new(CountingMigration {
            id: "0001_counting",
            runs: Arc::clone(&runs),
        }));

        let cancel = CancelFlag::new();
        runner.run_pending(&mut conn, &cancel).unwrap();
        runner.reset("0001_counting").unwrap();
        runner.run_pending(&mut conn, &cancel).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_migration_keeps_flag_unset() {
        let mut conn = test_conn();
        let mut runner = MigrationRunner::new(Settings::in_memory());
        runner.register(Box::new(FailingMigration));

        let cancel = CancelFlag::new();
        assert!(runner.run_pending(&mut conn, &cancel).is_err());
        assert!(!runner.settings().migration_complete("9999_failing"));

        // Still pending: a later run attempts it again.
        assert!(runner.run_pending(&mut conn, &cancel).is_err());
    }

    #[test]
    fn cancellation_stops_between_migrations() {
        let mut conn = test_conn();
        let runs = Arc::new(AtomicUsize::new(0));
        let mut runner = MigrationRunner::new(Settings::in_memory());
        runner.register(Box::new(CountingMigration {
            id: "0001_counting",
            runs: Arc::clone(&runs),
        }));

        let cancel = CancelFlag::new();
        cancel.cancel();
        assert_eq!(runner.run_pending(&mut conn, &cancel).unwrap(), 0);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn add_reader_columns_is_idempotent_on_current_schema() {
        let mut conn = test_conn();
        let mut runner = MigrationRunner::new(Settings::in_memory());
        runner.register(Box::new(AddReaderColumns));

        let cancel = CancelFlag::new();
        assert_eq!(runner.run_pending(&mut conn, &cancel).unwrap(), 1);
        // Columns already exist; the migration detected that and did nothing.
        assert!(table_has_column(&conn, "feeds", "prefer_web").unwrap());
        assert!(table_has_column(&conn, "feeds", "use_reader").unwrap());
    }

    #[test]
    fn backfill_fills_only_empty_display_fields() {
        let mut conn = test_conn();
        db::upsert_feed(&conn, &sample_feed(1, 0)).unwrap();

        let mut legacy = sample_item(1, 1);
        legacy.title = Some("Tom &amp; Jerry".into());
        legacy.body = Some("<p>Some body</p>".into());
        legacy.author = Some("Writer".into());
        legacy.display_title = String::new();
        legacy.display_body = String::new();
        legacy.date_feed_author = String::new();
        db::upsert_item(&conn, &legacy).unwrap();

        let mut derived = sample_item(2, 1);
        derived.display_title = "Already derived".into();
        derived.date_feed_author = "kept".into();
        db::upsert_item(&conn, &derived).unwrap();

        let mut runner = MigrationRunner::new(Settings::in_memory());
        runner.register(Box::new(BackfillDisplayFields));
        runner.run_pending(&mut conn, &CancelFlag::new()).unwrap();

        let filled = db::get_item(&conn, 1).unwrap().unwrap();
        assert_eq!(filled.display_title, "Tom & Jerry");
        assert_eq!(filled.display_body, "Some body");
        assert!(filled.date_feed_author.ends_with("| Writer"));

        let untouched = db::get_item(&conn, 2).unwrap().unwrap();
        assert_eq!(untouched.display_title, "Already derived");
        assert_eq!(untouched.date_feed_author, "kept");
    }
}
