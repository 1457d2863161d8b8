use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};

use crate::error::StoreError;

// ---------------------------------------------------------------------------
// Domain models
// ---------------------------------------------------------------------------

/// Reserved folder id meaning "no folder": the feed sits at the top level.
pub const TOP_LEVEL_FOLDER: i64 = 0;

/// A folder row. Owns zero or more feeds; deleting a folder deletes its
/// feeds (and, through them, their items) in the same transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Folder {
    pub id: i64,
    pub name: Option<String>,
    pub opened: bool,
    pub last_modified: i64,
}

/// A feed row mirrored from the server, enriched with sync bookkeeping.
/// `folder_id` is either a real folder id or [`TOP_LEVEL_FOLDER`].
#[derive(Debug, Clone, PartialEq)]
pub struct Feed {
    pub id: i64,
    pub folder_id: i64,
    pub title: Option<String>,
    pub url: Option<String>,
    pub link: Option<String>,
    pub favicon_link: Option<String>,
    pub added: i64,
    pub ordering: i64,
    pub pinned: bool,
    pub unread_count: i64,
    pub update_error_count: i64,
    pub last_update_error: Option<String>,
    pub next_update_time: Option<i64>,
    pub prefer_web: bool,
    pub use_reader: bool,
}

/// An article row. The `display_*` and `thumbnail_url` columns are derived
/// caches, recomputed only when the row is upserted.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: i64,
    pub feed_id: i64,
    pub guid: Option<String>,
    pub guid_hash: Option<String>,
    pub fingerprint: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub body: Option<String>,
    pub media_thumbnail: Option<String>,
    pub media_description: Option<String>,
    pub enclosure_link: Option<String>,
    pub enclosure_mime: Option<String>,
    pub pub_date: i64,
    pub last_modified: i64,
    pub updated_date: Option<i64>,
    pub url: Option<String>,
    pub rtl: bool,
    pub starred: bool,
    pub unread: bool,
    pub thumbnail_url: Option<String>,
    pub display_title: String,
    pub display_body: String,
    pub date_feed_author: String,
}

/// Which togglable item field a pending mark refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkField {
    Unread,
    Starred,
}

impl MarkField {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkField::Unread => "unread",
            MarkField::Starred => "starred",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "unread" => Some(MarkField::Unread),
            "starred" => Some(MarkField::Starred),
            _ => None,
        }
    }
}

/// One pending local mutation not yet confirmed by reconciliation: the user
/// toggled `field` on `item_id` to `intended` while offline. `attempts`
/// counts how many sync passes have picked the entry up so far.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMark {
    pub item_id: i64,
    pub field: MarkField,
    pub intended: bool,
    pub attempts: i64,
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Sort order for item fetches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ItemSort {
    /// Newest first, ties broken by id descending.
    #[default]
    PubDateDesc,
    IdAsc,
}

/// A typed predicate for item fetches. Filters are conjunctive; `Default`
/// matches every item.
#[derive(Debug, Clone, Default)]
pub struct ItemQuery {
    pub feed_id: Option<i64>,
    /// Restricts to items whose feed lives in this folder.
    pub folder_id: Option<i64>,
    pub unread: Option<bool>,
    pub starred: Option<bool>,
    pub sort: ItemSort,
    pub limit: Option<usize>,
}

impl ItemQuery {
    fn where_clause(&self) -> (String, Vec<i64>) {
        let mut clauses: Vec<&str> = Vec::new();
        let mut binds: Vec<i64> = Vec::new();

        if let Some(feed_id) = self.feed_id {
            clauses.push("feed_id = ?");
            binds.push(feed_id);
        }
        if let Some(folder_id) = self.folder_id {
            clauses.push("feed_id IN (SELECT id FROM feeds WHERE folder_id = ?)");
            binds.push(folder_id);
        }
        if let Some(unread) = self.unread {
            clauses.push("unread = ?");
            binds.push(unread as i64);
        }
        if let Some(starred) = self.starred {
            clauses.push("starred = ?");
            binds.push(starred as i64);
        }

        let sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        (sql, binds)
    }

    fn tail(&self) -> String {
        let order = match self.sort {
            ItemSort::PubDateDesc => " ORDER BY pub_date DESC, id DESC",
            ItemSort::IdAsc => " ORDER BY id ASC",
        };
        match self.limit {
            Some(n) => format!("{order} LIMIT {n}"),
            None => order.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Initialization
// ---------------------------------------------------------------------------

/// Open (or create) the mirror database at
/// `$XDG_DATA_HOME/newsmirror/mirror.db` and ensure the schema exists.
pub fn initialize() -> Result<Connection, StoreError> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| {
            StoreError::Persistence(rusqlite::Error::InvalidPath("no data directory".into()))
        })?
        .join("newsmirror");

    std::fs::create_dir_all(&data_dir)
        .map_err(|e| StoreError::Persistence(rusqlite::Error::InvalidPath(e.to_string().into())))?;

    initialize_at(&data_dir.join("mirror.db"))
}

/// Open (or create) the mirror database at an explicit path.
pub fn initialize_at(path: &std::path::Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path)?;
    apply_schema(&conn)?;
    Ok(conn)
}

/// Create the schema on an open connection. Idempotent.
pub fn apply_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS folders (
            id            INTEGER PRIMARY KEY,
            name          TEXT,
            opened        INTEGER NOT NULL DEFAULT 1,
            last_modified INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS feeds (
            id                 INTEGER PRIMARY KEY,
            folder_id          INTEGER NOT NULL DEFAULT 0,
            title              TEXT,
            url                TEXT,
            link               TEXT,
            favicon_link       TEXT,
            added              INTEGER NOT NULL DEFAULT 0,
            ordering           INTEGER NOT NULL DEFAULT 0,
            pinned             INTEGER NOT NULL DEFAULT 0,
            unread_count       INTEGER NOT NULL DEFAULT 0,
            update_error_count INTEGER NOT NULL DEFAULT 0,
            last_update_error  TEXT,
            next_update_time   INTEGER,
            prefer_web         INTEGER NOT NULL DEFAULT 0,
            use_reader         INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS items (
            id                INTEGER PRIMARY KEY,
            feed_id           INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
            guid              TEXT,
            guid_hash         TEXT,
            fingerprint       TEXT,
            title             TEXT,
            author            TEXT,
            body              TEXT,
            media_thumbnail   TEXT,
            media_description TEXT,
            enclosure_link    TEXT,
            enclosure_mime    TEXT,
            pub_date          INTEGER NOT NULL DEFAULT 0,
            last_modified     INTEGER NOT NULL DEFAULT 0,
            updated_date      INTEGER,
            url               TEXT,
            rtl               INTEGER NOT NULL DEFAULT 0,
            starred           INTEGER NOT NULL DEFAULT 0,
            unread            INTEGER NOT NULL DEFAULT 1,
            thumbnail_url     TEXT,
            display_title     TEXT NOT NULL DEFAULT '',
            display_body      TEXT NOT NULL DEFAULT '',
            date_feed_author  TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS outbox (
            item_id  INTEGER NOT NULL,
            field    TEXT NOT NULL,
            intended INTEGER NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (item_id, field)
        );

        CREATE INDEX IF NOT EXISTS idx_feeds_folder_id ON feeds(folder_id);
        CREATE INDEX IF NOT EXISTS idx_items_feed_id ON items(feed_id);
        CREATE INDEX IF NOT EXISTS idx_items_feed_id_unread ON items(feed_id, unread);
        CREATE INDEX IF NOT EXISTS idx_items_starred ON items(starred);",
    )
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn folder_from_row(row: &Row) -> rusqlite::Result<Folder> {
    Ok(Folder {
        id: row.get(0)?,
        name: row.get(1)?,
        opened: row.get::<_, i64>(2)? != 0,
        last_modified: row.get(3)?,
    })
}

const FEED_COLUMNS: &str = "id, folder_id, title, url, link, favicon_link, added, ordering, \
     pinned, unread_count, update_error_count, last_update_error, next_update_time, \
     prefer_web, use_reader";

fn feed_from_row(row: &Row) -> rusqlite::Result<Feed> {
    Ok(Feed {
        id: row.get(0)?,
        folder_id: row.get(1)?,
        title: row.get(2)?,
        url: row.get(3)?,
        link: row.get(4)?,
        favicon_link: row.get(5)?,
        added: row.get(6)?,
        ordering: row.get(7)?,
        pinned: row.get::<_, i64>(8)? != 0,
        unread_count: row.get(9)?,
        update_error_count: row.get(10)?,
        last_update_error: row.get(11)?,
        next_update_time: row.get(12)?,
        prefer_web: row.get::<_, i64>(13)? != 0,
        use_reader: row.get::<_, i64>(14)? != 0,
    })
}

const ITEM_COLUMNS: &str = "id, feed_id, guid, guid_hash, fingerprint, title, author, body, \
     media_thumbnail, media_description, enclosure_link, enclosure_mime, pub_date, \
     last_modified, updated_date, url, rtl, starred, unread, thumbnail_url, \
     display_title, display_body, date_feed_author";

fn item_from_row(row: &Row) -> rusqlite::Result<Item> {
    Ok(Item {
        id: row.get(0)?,
        feed_id: row.get(1)?,
        guid: row.get(2)?,
        guid_hash: row.get(3)?,
        fingerprint: row.get(4)?,
        title: row.get(5)?,
        author: row.get(6)?,
        body: row.get(7)?,
        media_thumbnail: row.get(8)?,
        media_description: row.get(9)?,
        enclosure_link: row.get(10)?,
        enclosure_mime: row.get(11)?,
        pub_date: row.get(12)?,
        last_modified: row.get(13)?,
        updated_date: row.get(14)?,
        url: row.get(15)?,
        rtl: row.get::<_, i64>(16)? != 0,
        starred: row.get::<_, i64>(17)? != 0,
        unread: row.get::<_, i64>(18)? != 0,
        thumbnail_url: row.get(19)?,
        display_title: row.get(20)?,
        display_body: row.get(21)?,
        date_feed_author: row.get(22)?,
    })
}

// ---------------------------------------------------------------------------
// Fetches
// ---------------------------------------------------------------------------

/// All folders ordered by id ascending.
pub fn get_folders(conn: &Connection) -> Result<Vec<Folder>, rusqlite::Error> {
    let mut stmt =
        conn.prepare("SELECT id, name, opened, last_modified FROM folders ORDER BY id ASC")?;
    let folders = stmt
        .query_map([], folder_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(folders)
}

/// All feeds ordered by id ascending.
pub fn get_feeds(conn: &Connection) -> Result<Vec<Feed>, rusqlite::Error> {
    let mut stmt = conn.prepare(&format!("SELECT {FEED_COLUMNS} FROM feeds ORDER BY id ASC"))?;
    let feeds = stmt
        .query_map([], feed_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(feeds)
}

/// Items matching the query, in the query's sort order.
pub fn get_items(conn: &Connection, query: &ItemQuery) -> Result<Vec<Item>, rusqlite::Error> {
    let (where_sql, binds) = query.where_clause();
    let sql = format!("SELECT {ITEM_COLUMNS} FROM items{where_sql}{}", query.tail());
    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map(params_from_iter(binds.iter()), item_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(items)
}

/// Number of items matching the query.
pub fn count_items(conn: &Connection, query: &ItemQuery) -> Result<i64, rusqlite::Error> {
    let (where_sql, binds) = query.where_clause();
    let sql = format!("SELECT COUNT(*) FROM items{where_sql}");
    conn.query_row(&sql, params_from_iter(binds.iter()), |row| row.get(0))
}

/// Look up a single folder. Absent is `None`, never an error.
pub fn get_folder(conn: &Connection, id: i64) -> Result<Option<Folder>, rusqlite::Error> {
    conn.query_row(
        "SELECT id, name, opened, last_modified FROM folders WHERE id = ?1 LIMIT 1",
        params![id],
        folder_from_row,
    )
    .optional()
}

/// Look up a single feed. Absent is `None`, never an error.
pub fn get_feed(conn: &Connection, id: i64) -> Result<Option<Feed>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?1 LIMIT 1"),
        params![id],
        feed_from_row,
    )
    .optional()
}

/// Look up a single item. Absent is `None`, never an error.
pub fn get_item(conn: &Connection, id: i64) -> Result<Option<Item>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?1 LIMIT 1"),
        params![id],
        item_from_row,
    )
    .optional()
}

/// The previously stored thumbnail URL for an item, if any. Lets the
/// reconciler skip re-resolution on re-upsert.
pub fn get_thumbnail(conn: &Connection, item_id: i64) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT thumbnail_url FROM items WHERE id = ?1 LIMIT 1",
        params![item_id],
        |row| row.get::<_, Option<String>>(0),
    )
    .optional()
    .map(|v| v.flatten())
}

// ---------------------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------------------

/// Insert or fully replace a folder row keyed by id.
pub fn upsert_folder(conn: &Connection, folder: &Folder) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO folders (id, name, opened, last_modified) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            opened = excluded.opened,
            last_modified = excluded.last_modified",
        params![folder.id, folder.name, folder.opened as i64, folder.last_modified],
    )?;
    Ok(())
}

/// Insert or fully replace a feed row keyed by id. `ON CONFLICT DO UPDATE`
/// rather than `INSERT OR REPLACE`: a REPLACE deletes the old row first,
/// which would cascade-delete the feed's items.
pub fn upsert_feed(conn: &Connection, feed: &Feed) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO feeds (id, folder_id, title, url, link, favicon_link, added, ordering,
            pinned, unread_count, update_error_count, last_update_error, next_update_time,
            prefer_web, use_reader)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
         ON CONFLICT(id) DO UPDATE SET
            folder_id = excluded.folder_id,
            title = excluded.title,
            url = excluded.url,
            link = excluded.link,
            favicon_link = excluded.favicon_link,
            added = excluded.added,
            ordering = excluded.ordering,
            pinned = excluded.pinned,
            unread_count = excluded.unread_count,
            update_error_count = excluded.update_error_count,
            last_update_error = excluded.last_update_error,
            next_update_time = excluded.next_update_time,
            prefer_web = excluded.prefer_web,
            use_reader = excluded.use_reader",
        params![
            feed.id,
            feed.folder_id,
            feed.title,
            feed.url,
            feed.link,
            feed.favicon_link,
            feed.added,
            feed.ordering,
            feed.pinned as i64,
            feed.unread_count,
            feed.update_error_count,
            feed.last_update_error,
            feed.next_update_time,
            feed.prefer_web as i64,
            feed.use_reader as i64,
        ],
    )?;
    Ok(())
}

/// Insert or fully replace an item row keyed by id, derived columns included.
pub fn upsert_item(conn: &Connection, item: &Item) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO items (id, feed_id, guid, guid_hash, fingerprint, title, author, body,
            media_thumbnail, media_description, enclosure_link, enclosure_mime, pub_date,
            last_modified, updated_date, url, rtl, starred, unread, thumbnail_url,
            display_title, display_body, date_feed_author)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
            ?17, ?18, ?19, ?20, ?21, ?22, ?23)
         ON CONFLICT(id) DO UPDATE SET
            feed_id = excluded.feed_id,
            guid = excluded.guid,
            guid_hash = excluded.guid_hash,
            fingerprint = excluded.fingerprint,
            title = excluded.title,
            author = excluded.author,
            body = excluded.body,
            media_thumbnail = excluded.media_thumbnail,
            media_description = excluded.media_description,
            enclosure_link = excluded.enclosure_link,
            enclosure_mime = excluded.enclosure_mime,
            pub_date = excluded.pub_date,
            last_modified = excluded.last_modified,
            updated_date = excluded.updated_date,
            url = excluded.url,
            rtl = excluded.rtl,
            starred = excluded.starred,
            unread = excluded.unread,
            thumbnail_url = excluded.thumbnail_url,
            display_title = excluded.display_title,
            display_body = excluded.display_body,
            date_feed_author = excluded.date_feed_author",
        params![
            item.id,
            item.feed_id,
            item.guid,
            item.guid_hash,
            item.fingerprint,
            item.title,
            item.author,
            item.body,
            item.media_thumbnail,
            item.media_description,
            item.enclosure_link,
            item.enclosure_mime,
            item.pub_date,
            item.last_modified,
            item.updated_date,
            item.url,
            item.rtl as i64,
            item.starred as i64,
            item.unread as i64,
            item.thumbnail_url,
            item.display_title,
            item.display_body,
            item.date_feed_author,
        ],
    )?;
    Ok(())
}

/// Set the unread flag on one item. Returns whether a row was updated.
pub fn set_item_unread(conn: &Connection, id: i64, unread: bool) -> Result<bool, rusqlite::Error> {
    let rows = conn.execute(
        "UPDATE items SET unread = ?2 WHERE id = ?1",
        params![id, unread as i64],
    )?;
    Ok(rows > 0)
}

/// Set the starred flag on one item. Returns whether a row was updated.
pub fn set_item_starred(conn: &Connection, id: i64, starred: bool) -> Result<bool, rusqlite::Error> {
    let rows = conn.execute(
        "UPDATE items SET starred = ?2 WHERE id = ?1",
        params![id, starred as i64],
    )?;
    Ok(rows > 0)
}

/// Mark every item in one feed as read.
pub fn mark_feed_read(conn: &Connection, feed_id: i64) -> Result<(), rusqlite::Error> {
    conn.execute("UPDATE items SET unread = 0 WHERE feed_id = ?1", params![feed_id])?;
    Ok(())
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

/// Delete folders and, manually, their feeds. `folder_id = 0` is a sentinel,
/// not a foreign key, so the feed cascade cannot live in the schema; item
/// rows are removed by the items→feeds foreign-key cascade.
pub fn delete_folders(conn: &Connection, ids: &[i64]) -> Result<(), rusqlite::Error> {
    if ids.is_empty() {
        return Ok(());
    }
    let ph = placeholders(ids.len());
    conn.execute(
        &format!("DELETE FROM feeds WHERE folder_id IN ({ph})"),
        params_from_iter(ids.iter()),
    )?;
    conn.execute(
        &format!("DELETE FROM folders WHERE id IN ({ph})"),
        params_from_iter(ids.iter()),
    )?;
    Ok(())
}

/// Delete feeds by id. Item rows follow via the foreign-key cascade.
pub fn delete_feeds(conn: &Connection, ids: &[i64]) -> Result<(), rusqlite::Error> {
    if ids.is_empty() {
        return Ok(());
    }
    conn.execute(
        &format!("DELETE FROM feeds WHERE id IN ({})", placeholders(ids.len())),
        params_from_iter(ids.iter()),
    )?;
    Ok(())
}

/// Delete every item belonging to one feed.
pub fn delete_items_of_feed(conn: &Connection, feed_id: i64) -> Result<(), rusqlite::Error> {
    conn.execute("DELETE FROM items WHERE feed_id = ?1", params![feed_id])?;
    Ok(())
}

/// Delete every item matching a query. Returns the number of deleted rows.
pub fn delete_items(conn: &Connection, query: &ItemQuery) -> Result<usize, rusqlite::Error> {
    let (where_sql, binds) = query.where_clause();
    conn.execute(
        &format!("DELETE FROM items{where_sql}"),
        params_from_iter(binds.iter()),
    )
}

// ---------------------------------------------------------------------------
// Outbox (pending marks)
// ---------------------------------------------------------------------------

/// Record a local toggle that still awaits confirmation. A repeated toggle
/// on the same item/field replaces the intended state and resets attempts.
pub fn enqueue_mark(
    conn: &Connection,
    item_id: i64,
    field: MarkField,
    intended: bool,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO outbox (item_id, field, intended, attempts) VALUES (?1, ?2, ?3, 0)
         ON CONFLICT(item_id, field) DO UPDATE SET intended = excluded.intended, attempts = 0",
        params![item_id, field.as_str(), intended as i64],
    )?;
    Ok(())
}

/// Drop a pending mark once reconciliation confirmed the write.
pub fn ack_mark(conn: &Connection, item_id: i64, field: MarkField) -> Result<(), rusqlite::Error> {
    conn.execute(
        "DELETE FROM outbox WHERE item_id = ?1 AND field = ?2",
        params![item_id, field.as_str()],
    )?;
    Ok(())
}

/// Count one more sync pass that saw the mark unconfirmed.
pub fn bump_mark_attempts(
    conn: &Connection,
    item_id: i64,
    field: MarkField,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE outbox SET attempts = attempts + 1 WHERE item_id = ?1 AND field = ?2",
        params![item_id, field.as_str()],
    )?;
    Ok(())
}

/// All pending marks, ordered by item id then field.
pub fn get_pending_marks(conn: &Connection) -> Result<Vec<PendingMark>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT item_id, field, intended, attempts FROM outbox ORDER BY item_id ASC, field ASC",
    )?;
    let marks = stmt
        .query_map([], |row| {
            let field: String = row.get(1)?;
            Ok(PendingMark {
                item_id: row.get(0)?,
                field: MarkField::parse(&field).unwrap_or(MarkField::Unread),
                intended: row.get::<_, i64>(2)? != 0,
                attempts: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(marks)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Create an in-memory database with the production schema.
    pub(crate) fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        conn
    }

    pub(crate) fn sample_folder(id: i64) -> Folder {
        Folder {
            id,
            name: Some(format!("Folder {id}")),
            opened: true,
            last_modified: 0,
        }
    }

    pub(crate) fn sample_feed(id: i64, folder_id: i64) -> Feed {
        Feed {
            id,
            folder_id,
            title: Some(format!("Feed {id}")),
            url: Some(format!("https://example.com/{id}/feed.xml")),
            link: Some(format!("https://example.com/{id}/")),
            favicon_link: None,
            added: 0,
            ordering: 0,
            pinned: false,
            unread_count: 0,
            update_error_count: 0,
            last_update_error: None,
            next_update_time: None,
            prefer_web: false,
            use_reader: false,
        }
    }

    pub(crate) fn sample_item(id: i64, feed_id: i64) -> Item {
        Item {
            id,
            feed_id,
            guid: Some(format!("guid-{id}")),
            guid_hash: None,
            fingerprint: None,
            title: Some(format!("Item {id}")),
            author: None,
            body: Some("<p>Body</p>".into()),
            media_thumbnail: None,
            media_description: None,
            enclosure_link: None,
            enclosure_mime: None,
            pub_date: 1_700_000_000 + id,
            last_modified: 0,
            updated_date: None,
            url: None,
            rtl: false,
            starred: false,
            unread: true,
            thumbnail_url: None,
            display_title: format!("Item {id}"),
            display_body: "Body".into(),
            date_feed_author: String::new(),
        }
    }

    #[test]
    fn upsert_folder_replaces_by_id() {
        let conn = test_conn();
        upsert_folder(&conn, &sample_folder(1)).unwrap();

        let mut renamed = sample_folder(1);
        renamed.name = Some("Renamed".into());
        upsert_folder(&conn, &renamed).unwrap();

        let folders = get_folders(&conn).unwrap();
        assert_eq!(folders.len(), 1);
        assert_eq!(folders[0].name.as_deref(), Some("Renamed"));
    }

    #[test]
    fn feed_upsert_preserves_items() {
        let conn = test_conn();
        upsert_feed(&conn, &sample_feed(7, 0)).unwrap();
        upsert_item(&conn, &sample_item(100, 7)).unwrap();

        // Re-upserting the feed must not cascade away its items.
        let mut updated = sample_feed(7, 0);
        updated.title = Some("Updated".into());
        upsert_feed(&conn, &updated).unwrap();

        assert_eq!(count_items(&conn, &ItemQuery::default()).unwrap(), 1);
    }

    #[test]
    fn item_query_filters_compose() {
        let conn = test_conn();
        upsert_folder(&conn, &sample_folder(2)).unwrap();
        upsert_feed(&conn, &sample_feed(7, 2)).unwrap();
        upsert_feed(&conn, &sample_feed(8, 0)).unwrap();
        upsert_item(&conn, &sample_item(1, 7)).unwrap();
        let mut read = sample_item(2, 7);
        read.unread = false;
        upsert_item(&conn, &read).unwrap();
        upsert_item(&conn, &sample_item(3, 8)).unwrap();

        let unread_in_folder = ItemQuery {
            folder_id: Some(2),
            unread: Some(true),
            ..Default::default()
        };
        let items = get_items(&conn, &unread_in_folder).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, 1);

        assert_eq!(count_items(&conn, &ItemQuery::default()).unwrap(), 3);
        assert_eq!(
            count_items(&conn, &ItemQuery { feed_id: Some(8), ..Default::default() }).unwrap(),
            1
        );
    }

    #[test]
    fn item_sort_orders_newest_first() {
        let conn = test_conn();
        upsert_feed(&conn, &sample_feed(1, 0)).unwrap();
        for id in [5, 9, 2] {
            upsert_item(&conn, &sample_item(id, 1)).unwrap();
        }

        let items = get_items(&conn, &ItemQuery::default()).unwrap();
        let ids: Vec<i64> = items.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![9, 5, 2]);
    }

    #[test]
    fn lookup_helpers_return_none_on_miss() {
        let conn = test_conn();
        assert!(get_folder(&conn, 42).unwrap().is_none());
        assert!(get_feed(&conn, 42).unwrap().is_none());
        assert!(get_item(&conn, 42).unwrap().is_none());
        assert!(get_thumbnail(&conn, 42).unwrap().is_none());
    }

    #[test]
    fn delete_folders_cascades_to_feeds_and_items() {
        let conn = test_conn();
        upsert_folder(&conn, &sample_folder(1)).unwrap();
        upsert_folder(&conn, &sample_folder(2)).unwrap();
        upsert_feed(&conn, &sample_feed(10, 1)).unwrap();
        upsert_feed(&conn, &sample_feed(20, 2)).unwrap();
        upsert_item(&conn, &sample_item(100, 10)).unwrap();
        upsert_item(&conn, &sample_item(200, 20)).unwrap();

        delete_folders(&conn, &[2]).unwrap();

        assert_eq!(get_folders(&conn).unwrap().len(), 1);
        let feeds = get_feeds(&conn).unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].id, 10);
        let items = get_items(&conn, &ItemQuery::default()).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, 100);
    }

    #[test]
    fn delete_feeds_cascades_to_items() {
        let conn = test_conn();
        upsert_feed(&conn, &sample_feed(10, 0)).unwrap();
        upsert_item(&conn, &sample_item(100, 10)).unwrap();

        delete_feeds(&conn, &[10]).unwrap();

        assert!(get_feeds(&conn).unwrap().is_empty());
        assert_eq!(count_items(&conn, &ItemQuery::default()).unwrap(), 0);
    }

    #[test]
    fn outbox_round_trip() {
        let conn = test_conn();
        enqueue_mark(&conn, 1, MarkField::Unread, false).unwrap();
        enqueue_mark(&conn, 1, MarkField::Starred, true).unwrap();
        bump_mark_attempts(&conn, 1, MarkField::Unread).unwrap();

        let marks = get_pending_marks(&conn).unwrap();
        assert_eq!(marks.len(), 2);
        let unread = marks.iter().find(|m| m.field == MarkField::Unread).unwrap();
        assert!(!unread.intended);
        assert_eq!(unread.attempts, 1);

        // Re-toggling replaces the intent and resets the attempt count.
        enqueue_mark(&conn, 1, MarkField::Unread, true).unwrap();
        let marks = get_pending_marks(&conn).unwrap();
        let unread = marks.iter().find(|m| m.field == MarkField::Unread).unwrap();
        assert!(unread.intended);
        assert_eq!(unread.attempts, 0);

        ack_mark(&conn, 1, MarkField::Unread).unwrap();
        ack_mark(&conn, 1, MarkField::Starred).unwrap();
        assert!(get_pending_marks(&conn).unwrap().is_empty());
    }

    #[test]
    fn delete_items_honors_predicates() {
        let conn = test_conn();
        upsert_feed(&conn, &sample_feed(1, 0)).unwrap();
        upsert_item(&conn, &sample_item(1, 1)).unwrap();
        let mut read = sample_item(2, 1);
        read.unread = false;
        upsert_item(&conn, &read).unwrap();

        let q = ItemQuery { unread: Some(false), ..Default::default() };
        assert_eq!(delete_items(&conn, &q).unwrap(), 1);
        let remaining = get_items(&conn, &ItemQuery::default()).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, 1);
    }

    #[test]
    fn mark_feed_read_clears_unread() {
        let conn = test_conn();
        upsert_feed(&conn, &sample_feed(1, 0)).unwrap();
        upsert_item(&conn, &sample_item(1, 1)).unwrap();
        upsert_item(&conn, &sample_item(2, 1)).unwrap();

        mark_feed_read(&conn, 1).unwrap();

        let q = ItemQuery { unread: Some(true), ..Default::default() };
        assert_eq!(count_items(&conn, &q).unwrap(), 0);
    }
}
