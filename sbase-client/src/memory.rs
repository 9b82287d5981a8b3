/// An in-process Syncbase database service.
///
/// Data lives in memory and is only visible to the current process, which
/// makes this service useful for tests and for embedding. It models the
/// server behaviors the client relies on: snapshot isolation for batches,
/// optimistic conflict detection at commit, an ordered change log with
/// resume markers, and a small subset of the query language.
use crate::service::{ChangeStream, DatabaseService, ExecStream, KeyValue, RowStream};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::StreamExt;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use regex::Regex;
use sbase_core::naming::{join, BATCH_SEPARATOR};
use sbase_core::watch::{STATE_DOES_NOT_EXIST, STATE_EXISTS};
use sbase_core::{BatchOptions, Error, RawChange, Result, ResumeMarker, RowRange};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use tokio::sync::broadcast;
use tracing::{debug, trace};

const CHANGE_CHANNEL_CAPACITY: usize = 1024;
/// Finished batches remembered per database for `TerminalBatch` replies.
const FINISHED_BATCH_LIMIT: usize = 1024;

lazy_static! {
    static ref SELECT: Regex = Regex::new(
        r#"(?i)^\s*select\s+(?P<columns>[\w\s,*]+?)\s+from\s+(?P<table>[^\s/;]+)(?:\s+where\s+k\s+like\s+"(?P<prefix>[^"%]*)%")?\s*;?\s*$"#
    )
    .unwrap();
}

type Rows = BTreeMap<String, Bytes>;
type Tables = BTreeMap<String, Rows>;
type RowId = (String, String);

fn marker(position: u64) -> ResumeMarker {
    ResumeMarker::new(position.to_string().into_bytes())
}

fn parse_marker(resume_marker: &ResumeMarker) -> Result<u64> {
    std::str::from_utf8(resume_marker.as_bytes())
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| Error::InvalidArgument(format!("malformed resume marker {}", resume_marker)))
}

/// Split "db##suffix" into its database and batch parts.
fn split_batch(name: &str) -> (&str, Option<&str>) {
    match name.split_once(BATCH_SEPARATOR) {
        Some((db, suffix)) => (db, Some(suffix)),
        None => (name, None),
    }
}

fn in_range(key: &str, range: &RowRange) -> bool {
    range.contains(key.as_bytes())
}

#[derive(Debug, Clone)]
struct LogEntry {
    db: String,
    table: String,
    key: String,
    value: Option<Bytes>,
    position: u64,
    continued: bool,
}

impl LogEntry {
    fn to_change(&self) -> RawChange {
        RawChange {
            name: join(&self.table, &self.key),
            state: if self.value.is_some() {
                STATE_EXISTS
            } else {
                STATE_DOES_NOT_EXIST
            },
            value: self.value.clone(),
            resume_marker: marker(self.position + 1),
            from_sync: Some(false),
            continued: Some(self.continued),
        }
    }
}

#[derive(Debug, Clone)]
struct WatchFilter {
    db: String,
    table: String,
    prefix: String,
}

impl WatchFilter {
    /// An empty table name watches every table.
    fn matches(&self, entry: &LogEntry) -> bool {
        entry.db == self.db
            && (self.table.is_empty() || entry.table == self.table)
            && entry.key.starts_with(&self.prefix)
    }
}

/// Server-side state of an open batch.
#[derive(Debug)]
struct Txn {
    snapshot: Tables,
    start_seq: u64,
    start_position: u64,
    read_only: bool,
    writes: BTreeMap<RowId, Option<Bytes>>,
    read_keys: BTreeSet<RowId>,
    read_ranges: Vec<(String, RowRange)>,
}

impl Txn {
    fn check_table(&self, table: &str) -> Result<()> {
        if self.snapshot.contains_key(table) {
            Ok(())
        } else {
            Err(Error::NotFound(format!("table {}", table)))
        }
    }

    fn check_writable(&self, op: &str) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnlyBatch(op.to_string()));
        }
        Ok(())
    }

    fn get(&mut self, table: &str, key: &str) -> Result<Option<Bytes>> {
        self.check_table(table)?;
        let id = (table.to_string(), key.to_string());
        let value = match self.writes.get(&id) {
            Some(write) => write.clone(),
            None => self.snapshot.get(table).and_then(|rows| rows.get(key)).cloned(),
        };
        self.read_keys.insert(id);
        Ok(value)
    }

    /// Snapshot rows in `range` with this batch's own writes applied.
    fn scan(&mut self, table: &str, range: &RowRange) -> Result<Vec<KeyValue>> {
        self.check_table(table)?;
        let mut rows: Rows = self
            .snapshot
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|(key, _)| in_range(key, range))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default();

        for ((write_table, key), write) in &self.writes {
            if write_table != table || !in_range(key, range) {
                continue;
            }
            match write {
                Some(value) => rows.insert(key.clone(), value.clone()),
                None => rows.remove(key),
            };
        }

        self.read_ranges.push((table.to_string(), range.clone()));
        Ok(rows
            .into_iter()
            .map(|(key, value)| KeyValue { key, value })
            .collect())
    }
}

#[derive(Debug, Default)]
struct DbState {
    tables: Tables,
    /// Commit sequence that last wrote each row, deletes included.
    versions: BTreeMap<RowId, u64>,
    /// Commit sequence that last created or dropped each table.
    table_versions: BTreeMap<String, u64>,
    seq: u64,
    log: Vec<LogEntry>,
    batches: HashMap<String, Txn>,
    finished: HashMap<String, &'static str>,
    /// Oldest first; bounds `finished`.
    finished_order: VecDeque<String>,
    next_batch: u64,
}

impl DbState {
    fn rows(&self, table: &str) -> Result<&Rows> {
        self.tables
            .get(table)
            .ok_or_else(|| Error::NotFound(format!("table {}", table)))
    }

    fn txn(&mut self, suffix: &str, op: &str) -> Result<&mut Txn> {
        match self.batches.get_mut(suffix) {
            Some(txn) => Ok(txn),
            None => Err(match self.finished.get(suffix) {
                Some(state) => Error::terminal(state, op),
                None => Error::NotFound(format!("batch {}", suffix)),
            }),
        }
    }

    fn finish(&mut self, suffix: &str, state: &'static str, op: &str) -> Result<Txn> {
        self.txn(suffix, op)?;
        self.finished.insert(suffix.to_string(), state);
        self.finished_order.push_back(suffix.to_string());
        while self.finished_order.len() > FINISHED_BATCH_LIMIT {
            if let Some(oldest) = self.finished_order.pop_front() {
                self.finished.remove(&oldest);
            }
        }
        self.batches
            .remove(suffix)
            .ok_or_else(|| Error::Internal(format!("batch {} vanished", suffix)))
    }

    fn has_conflict(&self, txn: &Txn) -> bool {
        let changed_since = |id: &RowId| {
            self.versions
                .get(id)
                .map_or(false, |version| *version > txn.start_seq)
        };

        let table_changed = |table: &String| {
            self.table_versions
                .get(table)
                .map_or(false, |version| *version > txn.start_seq)
        };

        txn.read_keys.iter().any(|id| changed_since(id) || table_changed(&id.0))
            || txn.read_ranges.iter().any(|(table, _)| table_changed(table))
            || txn.read_ranges.iter().any(|(table, range)| {
                self.versions.iter().any(|((t, key), version)| {
                    t == table && *version > txn.start_seq && in_range(key, range)
                })
            })
    }

    /// Apply a set of row writes as one commit and append them to the log.
    /// Deletes of rows that do not exist are dropped.
    fn apply(&mut self, db: &str, writes: Vec<(RowId, Option<Bytes>)>) -> Result<Vec<LogEntry>> {
        for ((table, _), _) in &writes {
            self.rows(table)?;
        }

        let writes: Vec<_> = writes
            .into_iter()
            .filter(|((table, key), value)| {
                value.is_some() || self.tables.get(table).map_or(false, |rows| rows.contains_key(key))
            })
            .collect();

        if writes.is_empty() {
            return Ok(Vec::new());
        }

        self.seq += 1;
        let count = writes.len();
        let mut entries = Vec::with_capacity(count);
        for (i, ((table, key), value)) in writes.into_iter().enumerate() {
            let rows = self.tables.entry(table.clone()).or_default();
            match &value {
                Some(bytes) => rows.insert(key.clone(), bytes.clone()),
                None => rows.remove(&key),
            };
            self.versions.insert((table.clone(), key.clone()), self.seq);

            let entry = LogEntry {
                db: db.to_string(),
                table,
                key,
                value,
                position: self.log.len() as u64,
                continued: i + 1 < count,
            };
            self.log.push(entry.clone());
            entries.push(entry);
        }
        Ok(entries)
    }

    fn initial_state(&self, filter: &WatchFilter) -> Vec<RawChange> {
        let resume_marker = marker(self.log.len() as u64);
        let prefix = filter.prefix.as_str();
        let mut changes: Vec<RawChange> = self
            .tables
            .iter()
            .filter(|(table, _)| filter.table.is_empty() || **table == filter.table)
            .flat_map(move |(table, rows)| {
                rows.iter()
                    .filter(move |(key, _)| key.starts_with(prefix))
                    .map(move |(key, value)| (table, key, value))
            })
            .map(|(table, key, value)| RawChange {
                name: join(table, key),
                state: STATE_EXISTS,
                value: Some(value.clone()),
                resume_marker: resume_marker.clone(),
                from_sync: Some(false),
                continued: Some(true),
            })
            .collect();

        if let Some(last) = changes.last_mut() {
            last.continued = Some(false);
        }
        changes
    }
}

#[derive(Debug, Default)]
struct State {
    databases: HashMap<String, DbState>,
}

impl State {
    fn db(&mut self, name: &str) -> &mut DbState {
        self.databases.entry(name.to_string()).or_default()
    }
}

/// Parsed form of the supported `select` statements.
#[derive(Debug, PartialEq, Eq)]
struct SelectQuery {
    columns: Vec<Column>,
    table: String,
    prefix: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Key,
    Value,
}

impl SelectQuery {
    /// Accepts `select k, v from <table> [where k like "<prefix>%"]`.
    fn parse(query: &str) -> Result<Self> {
        let unsupported = || Error::InvalidArgument(format!("unsupported query: {}", query));
        let captures = SELECT.captures(query).ok_or_else(unsupported)?;

        let mut columns = Vec::new();
        for column in captures["columns"].split(',') {
            match column.trim().to_ascii_lowercase().as_str() {
                "k" => columns.push(Column::Key),
                "v" => columns.push(Column::Value),
                "*" => columns.extend([Column::Key, Column::Value]),
                _ => return Err(unsupported()),
            }
        }

        Ok(Self {
            columns,
            table: captures["table"].to_string(),
            prefix: captures
                .name("prefix")
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
        })
    }

    fn headers(&self) -> Vec<Bytes> {
        self.columns
            .iter()
            .map(|column| match column {
                Column::Key => Bytes::from_static(b"k"),
                Column::Value => Bytes::from_static(b"v"),
            })
            .collect()
    }

    fn project(&self, row: KeyValue) -> Vec<Bytes> {
        self.columns
            .iter()
            .map(|column| match column {
                Column::Key => Bytes::from(row.key.clone()),
                Column::Value => row.value.clone(),
            })
            .collect()
    }
}

/// A [`DatabaseService`] which keeps every database in memory.
#[derive(Debug)]
pub struct MemoryService {
    state: Mutex<State>,
    changes: broadcast::Sender<LogEntry>,
}

impl Default for MemoryService {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryService {
    /// Create a new empty `MemoryService`.
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(State::default()),
            changes,
        }
    }

    fn publish(&self, entries: Vec<LogEntry>) {
        for entry in entries {
            // No receivers just means nobody is watching.
            let _ = self.changes.send(entry);
        }
    }

    /// Apply a single write outside of any batch.
    fn write_now(&self, db: &str, id: RowId, value: Option<Bytes>) -> Result<()> {
        let mut state = self.state.lock();
        let entries = state.db(db).apply(db, vec![(id, value)])?;
        self.publish(entries);
        Ok(())
    }

    fn rows_in_range(&self, name: &str, table: &str, range: &RowRange, op: &str) -> Result<Vec<KeyValue>> {
        let (db, suffix) = split_batch(name);
        let mut state = self.state.lock();
        let db_state = state.db(db);
        match suffix {
            Some(suffix) => db_state.txn(suffix, op)?.scan(table, range),
            None => Ok(db_state
                .rows(table)?
                .iter()
                .filter(|(key, _)| in_range(key, range))
                .map(|(key, value)| KeyValue::new(key.clone(), value.clone()))
                .collect()),
        }
    }
}

#[async_trait]
impl DatabaseService for MemoryService {
    async fn begin_batch(
        &self,
        db: &str,
        _schema_version: i32,
        options: &BatchOptions,
    ) -> Result<String> {
        let (db, suffix) = split_batch(db);
        if suffix.is_some() {
            return Err(Error::InvalidArgument(
                "cannot begin a batch inside a batch".to_string(),
            ));
        }

        let mut state = self.state.lock();
        let db_state = state.db(db);
        db_state.next_batch += 1;
        let suffix = db_state.next_batch.to_string();
        let txn = Txn {
            snapshot: db_state.tables.clone(),
            start_seq: db_state.seq,
            start_position: db_state.log.len() as u64,
            read_only: options.read_only,
            writes: BTreeMap::new(),
            read_keys: BTreeSet::new(),
            read_ranges: Vec::new(),
        };
        db_state.batches.insert(suffix.clone(), txn);

        debug!(db, batch = %suffix, read_only = options.read_only, hint = ?options.hint, "batch opened");
        Ok(suffix)
    }

    async fn commit(&self, batch: &str, _schema_version: i32) -> Result<()> {
        let (db, suffix) = split_batch(batch);
        let suffix = suffix.ok_or_else(|| Error::InvalidArgument(format!("{} is not a batch", batch)))?;

        let mut state = self.state.lock();
        let db_state = state.db(db);
        let txn = db_state.finish(suffix, "committed", "commit")?;
        txn.check_writable("commit")?;

        if db_state.has_conflict(&txn) {
            debug!(db, batch = %suffix, "commit conflict");
            return Err(Error::ConcurrentBatch(format!(
                "batch {} read rows changed by a concurrent commit",
                suffix
            )));
        }

        let entries = db_state.apply(db, txn.writes.into_iter().collect())?;
        debug!(db, batch = %suffix, writes = entries.len(), "batch committed");
        self.publish(entries);
        Ok(())
    }

    async fn abort(&self, batch: &str, _schema_version: i32) -> Result<()> {
        let (db, suffix) = split_batch(batch);
        let suffix = suffix.ok_or_else(|| Error::InvalidArgument(format!("{} is not a batch", batch)))?;

        let mut state = self.state.lock();
        state.db(db).finish(suffix, "aborted", "abort")?;
        debug!(db, batch = %suffix, "batch aborted");
        Ok(())
    }

    async fn list_tables(&self, db: &str) -> Result<Vec<String>> {
        let (db, suffix) = split_batch(db);
        let mut state = self.state.lock();
        let db_state = state.db(db);
        let tables = match suffix {
            Some(suffix) => db_state.txn(suffix, "list_tables")?.snapshot.keys().cloned().collect(),
            None => db_state.tables.keys().cloned().collect(),
        };
        Ok(tables)
    }

    async fn create_table(&self, db: &str, _schema_version: i32, table: &str) -> Result<()> {
        let mut state = self.state.lock();
        let db_state = state.db(db);
        if db_state.tables.contains_key(table) {
            return Err(Error::AlreadyExists(format!("table {}", table)));
        }
        db_state.tables.insert(table.to_string(), Rows::new());
        db_state.seq += 1;
        let seq = db_state.seq;
        db_state.table_versions.insert(table.to_string(), seq);
        Ok(())
    }

    async fn delete_table(&self, db: &str, _schema_version: i32, table: &str) -> Result<()> {
        let mut state = self.state.lock();
        let db_state = state.db(db);
        let rows = db_state
            .tables
            .remove(table)
            .ok_or_else(|| Error::NotFound(format!("table {}", table)))?;

        // Dropping a table counts as a write to every row it held.
        db_state.seq += 1;
        let seq = db_state.seq;
        for key in rows.into_keys() {
            db_state.versions.insert((table.to_string(), key), seq);
        }
        db_state.table_versions.insert(table.to_string(), seq);
        debug!(db, table, seq, "table dropped");
        Ok(())
    }

    async fn table_exists(&self, db: &str, _schema_version: i32, table: &str) -> Result<bool> {
        let (db, suffix) = split_batch(db);
        let mut state = self.state.lock();
        let db_state = state.db(db);
        let exists = match suffix {
            Some(suffix) => db_state.txn(suffix, "exists")?.snapshot.contains_key(table),
            None => db_state.tables.contains_key(table),
        };
        Ok(exists)
    }

    async fn get_resume_marker(&self, db: &str) -> Result<ResumeMarker> {
        let (db, suffix) = split_batch(db);
        let mut state = self.state.lock();
        let db_state = state.db(db);
        let position = match suffix {
            Some(suffix) => db_state.txn(suffix, "get_resume_marker")?.start_position,
            None => db_state.log.len() as u64,
        };
        Ok(marker(position))
    }

    async fn exec(&self, db: &str, _schema_version: i32, query: &str) -> Result<ExecStream> {
        let select = SelectQuery::parse(query)?;
        let rows = self.rows_in_range(db, &select.table, &RowRange::prefix(&select.prefix), "exec")?;
        trace!(query, rows = rows.len(), "exec");

        let mut output = Vec::with_capacity(rows.len() + 1);
        output.push(Ok(select.headers()));
        output.extend(rows.into_iter().map(|row| Ok(select.project(row))));
        Ok(futures::stream::iter(output).boxed())
    }

    async fn watch(
        &self,
        db: &str,
        table: &str,
        prefix: &str,
        resume_marker: Option<&ResumeMarker>,
    ) -> Result<ChangeStream> {
        if split_batch(db).1.is_some() {
            return Err(Error::InvalidArgument("watch is not available in a batch".to_string()));
        }
        let start = resume_marker
            .filter(|resume_marker| !resume_marker.is_empty())
            .map(parse_marker)
            .transpose()?;
        let filter = WatchFilter {
            db: db.to_string(),
            table: table.to_string(),
            prefix: prefix.to_string(),
        };

        let (history, receiver) = {
            let mut state = self.state.lock();
            let db_state = state.db(db);
            let history = match start {
                Some(position) => {
                    let log = &db_state.log;
                    if position > log.len() as u64 {
                        return Err(Error::InvalidArgument(format!(
                            "resume marker {} is ahead of the change log",
                            position
                        )));
                    }
                    log[position as usize..]
                        .iter()
                        .filter(|entry| filter.matches(entry))
                        .map(LogEntry::to_change)
                        .collect()
                }
                None => db_state.initial_state(&filter),
            };
            // Subscribe while holding the lock so no commit falls between
            // the history and the live feed.
            (history, self.changes.subscribe())
        };

        let live = futures::stream::unfold(Some(receiver), move |receiver| {
            let filter = filter.clone();
            async move {
                let mut receiver = receiver?;
                loop {
                    match receiver.recv().await {
                        Ok(entry) if filter.matches(&entry) => {
                            return Some((Ok(entry.to_change()), Some(receiver)))
                        }
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            let err = Error::Unavailable(format!(
                                "watcher fell behind by {} changes; resume from the last marker",
                                skipped
                            ));
                            return Some((Err(err), None));
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(futures::stream::iter(history.into_iter().map(Ok))
            .chain(live)
            .boxed())
    }

    async fn get(
        &self,
        db: &str,
        _schema_version: i32,
        table: &str,
        key: &str,
    ) -> Result<Option<Bytes>> {
        let (db, suffix) = split_batch(db);
        let mut state = self.state.lock();
        let db_state = state.db(db);
        match suffix {
            Some(suffix) => db_state.txn(suffix, "get")?.get(table, key),
            None => Ok(db_state.rows(table)?.get(key).cloned()),
        }
    }

    async fn put(
        &self,
        db: &str,
        _schema_version: i32,
        table: &str,
        key: &str,
        value: Bytes,
    ) -> Result<()> {
        let (db, suffix) = split_batch(db);
        let id = (table.to_string(), key.to_string());
        match suffix {
            Some(suffix) => {
                let mut state = self.state.lock();
                let txn = state.db(db).txn(suffix, "put")?;
                txn.check_writable("put")?;
                txn.check_table(table)?;
                txn.writes.insert(id, Some(value));
                Ok(())
            }
            None => self.write_now(db, id, Some(value)),
        }
    }

    async fn delete(&self, db: &str, _schema_version: i32, table: &str, key: &str) -> Result<()> {
        let (db, suffix) = split_batch(db);
        let id = (table.to_string(), key.to_string());
        match suffix {
            Some(suffix) => {
                let mut state = self.state.lock();
                let txn = state.db(db).txn(suffix, "delete")?;
                txn.check_writable("delete")?;
                txn.check_table(table)?;
                txn.writes.insert(id, None);
                Ok(())
            }
            None => self.write_now(db, id, None),
        }
    }

    async fn delete_range(
        &self,
        db: &str,
        _schema_version: i32,
        table: &str,
        range: &RowRange,
    ) -> Result<()> {
        let (db_name, suffix) = split_batch(db);
        let mut state = self.state.lock();
        let db_state = state.db(db_name);
        match suffix {
            Some(suffix) => {
                let txn = db_state.txn(suffix, "delete_range")?;
                txn.check_writable("delete_range")?;
                for row in txn.scan(table, range)? {
                    txn.writes.insert((table.to_string(), row.key), None);
                }
                Ok(())
            }
            None => {
                let writes = db_state
                    .rows(table)?
                    .keys()
                    .filter(|key| in_range(key, range))
                    .map(|key| ((table.to_string(), key.clone()), None))
                    .collect();
                let entries = db_state.apply(db_name, writes)?;
                self.publish(entries);
                Ok(())
            }
        }
    }

    async fn scan(
        &self,
        db: &str,
        _schema_version: i32,
        table: &str,
        range: &RowRange,
    ) -> Result<RowStream> {
        let rows = self.rows_in_range(db, table, range, "scan")?;
        Ok(futures::stream::iter(rows.into_iter().map(Ok)).boxed())
    }
}
