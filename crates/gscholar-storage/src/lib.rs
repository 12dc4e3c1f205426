//! Durable record store for opportunities, tasks and contacts, plus HTTP fetch utilities.
//!
//! Each collection lives in its own JSON file under the store root and is rewritten
//! atomically (temp file, fsync, rename) before a mutating call returns.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use gscholar_core::{Contact, Opportunity, Task, ValidationError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

mod fetch;

pub use fetch::{
    classify_reqwest_error, classify_status, BackoffPolicy, FetchError, FetchedResponse,
    HttpClientConfig, HttpFetcher, RetryDisposition,
};

pub const CRATE_NAME: &str = "gscholar-storage";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Opportunity,
    Task,
    Contact,
}

impl RecordKind {
    pub fn file_name(self) -> &'static str {
        match self {
            RecordKind::Opportunity => "opportunities.json",
            RecordKind::Task => "tasks.json",
            RecordKind::Contact => "contacts.json",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RecordKind::Opportunity => "opportunity",
            RecordKind::Task => "task",
            RecordKind::Contact => "contact",
        })
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {id} already exists")]
    DuplicateIdentifier { kind: RecordKind, id: Uuid },
    #[error("{kind} {id} not found")]
    NotFound { kind: RecordKind, id: Uuid },
    #[error("{kind} {id} is invalid: {source}")]
    Invalid {
        kind: RecordKind,
        id: Uuid,
        #[source]
        source: ValidationError,
    },
    #[error("update of {kind} {id} changed its identifier")]
    IdentifierChanged { kind: RecordKind, id: Uuid },
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("decoding {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("encoding {kind} collection: {source}")]
    Encode {
        kind: RecordKind,
        #[source]
        source: serde_json::Error,
    },
    #[error("persisting {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

pub type Table<T> = BTreeMap<Uuid, T>;

#[doc(hidden)]
#[derive(Debug, Default)]
pub struct Collections {
    opportunities: Table<Opportunity>,
    tasks: Table<Task>,
    contacts: Table<Contact>,
}

/// An entity the store knows how to key, validate, persist and merge.
pub trait Record: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: RecordKind;

    fn id(&self) -> Uuid;

    fn validate(&self) -> Result<(), ValidationError>;

    /// Folds `incoming` into the stored copy during an upsert, keeping local-only state.
    fn absorb(&mut self, incoming: Self);

    #[doc(hidden)]
    fn table(collections: &Collections) -> &Table<Self>;

    #[doc(hidden)]
    fn table_mut(collections: &mut Collections) -> &mut Table<Self>;
}

impl Record for Opportunity {
    const KIND: RecordKind = RecordKind::Opportunity;

    fn id(&self) -> Uuid {
        self.id
    }

    fn validate(&self) -> Result<(), ValidationError> {
        Opportunity::validate(self)
    }

    fn absorb(&mut self, incoming: Self) {
        self.apply_remote(incoming.into());
    }

    fn table(collections: &Collections) -> &Table<Self> {
        &collections.opportunities
    }

    fn table_mut(collections: &mut Collections) -> &mut Table<Self> {
        &mut collections.opportunities
    }
}

impl Record for Task {
    const KIND: RecordKind = RecordKind::Task;

    fn id(&self) -> Uuid {
        self.id
    }

    fn validate(&self) -> Result<(), ValidationError> {
        Task::validate(self)
    }

    // Completion and creation time are the user's.
    fn absorb(&mut self, incoming: Self) {
        self.school_abbr = incoming.school_abbr;
        self.school_name = incoming.school_name;
        self.program_name = incoming.program_name;
        self.title = incoming.title;
        self.deadline = incoming.deadline;
    }

    fn table(collections: &Collections) -> &Table<Self> {
        &collections.tasks
    }

    fn table_mut(collections: &mut Collections) -> &mut Table<Self> {
        &mut collections.tasks
    }
}

impl Record for Contact {
    const KIND: RecordKind = RecordKind::Contact;

    fn id(&self) -> Uuid {
        self.id
    }

    fn validate(&self) -> Result<(), ValidationError> {
        Contact::validate(self)
    }

    fn absorb(&mut self, incoming: Self) {
        self.name = incoming.name;
        self.title = incoming.title;
    }

    fn table(collections: &Collections) -> &Table<Self> {
        &collections.contacts
    }

    fn table_mut(collections: &mut Collections) -> &mut Table<Self> {
        &mut collections.contacts
    }
}

type Predicate<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;
type Comparator<T> = Box<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// Predicate + sort + limit over one collection. Defaults to every record in identifier order.
pub struct Query<T> {
    predicate: Option<Predicate<T>>,
    order: Option<Comparator<T>>,
    limit: Option<usize>,
}

impl<T> Default for Query<T> {
    fn default() -> Self {
        Self {
            predicate: None,
            order: None,
            limit: None,
        }
    }
}

impl<T> Query<T> {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn filter(mut self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Some(Box::new(predicate));
        self
    }

    pub fn sort_by(mut self, order: impl Fn(&T, &T) -> Ordering + Send + Sync + 'static) -> Self {
        self.order = Some(Box::new(order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn run<'a>(&self, records: impl Iterator<Item = &'a T>) -> Vec<T>
    where
        T: Clone + 'a,
    {
        let mut out: Vec<T> = records
            .filter(|r| self.predicate.as_ref().map_or(true, |p| p(*r)))
            .cloned()
            .collect();
        if let Some(order) = &self.order {
            out.sort_by(|a, b| order(a, b));
        }
        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertReport {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl UpsertReport {
    pub fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
        }
    }

    pub fn changed(&self) -> bool {
        self.inserted + self.updated > 0
    }
}

#[derive(Debug)]
pub struct RecordStore {
    root: PathBuf,
    state: RwLock<Collections>,
}

impl RecordStore {
    /// Opens (or creates) a store rooted at `root`, loading any persisted collections.
    pub async fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|source| StoreError::Persist {
                path: root.clone(),
                source,
            })?;

        let collections = Collections {
            opportunities: load_table(&root).await?,
            tasks: load_table(&root).await?,
            contacts: load_table(&root).await?,
        };
        info!(
            root = %root.display(),
            opportunities = collections.opportunities.len(),
            tasks = collections.tasks.len(),
            contacts = collections.contacts.len(),
            "record store opened"
        );

        Ok(Self {
            root,
            state: RwLock::new(collections),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn collection_path(&self, kind: RecordKind) -> PathBuf {
        self.root.join(kind.file_name())
    }

    pub async fn get<T: Record>(&self, id: Uuid) -> Option<T> {
        let state = self.state.read().await;
        T::table(&state).get(&id).cloned()
    }

    pub async fn contains<T: Record>(&self, id: Uuid) -> bool {
        let state = self.state.read().await;
        T::table(&state).contains_key(&id)
    }

    pub async fn count<T: Record>(&self) -> usize {
        let state = self.state.read().await;
        T::table(&state).len()
    }

    pub async fn all<T: Record>(&self) -> Vec<T> {
        self.query(Query::all()).await
    }

    pub async fn query<T: Record>(&self, query: Query<T>) -> Vec<T> {
        let state = self.state.read().await;
        query.run(T::table(&state).values())
    }

    pub async fn insert<T: Record>(&self, record: T) -> StoreResult<()> {
        let id = record.id();
        check_valid(&record)?;

        let mut state = self.state.write().await;
        let table = T::table_mut(&mut state);
        if table.contains_key(&id) {
            return Err(StoreError::DuplicateIdentifier { kind: T::KIND, id });
        }
        table.insert(id, record);

        if let Err(err) = self.flush(table).await {
            table.remove(&id);
            return Err(err);
        }
        debug!(kind = %T::KIND, %id, "record inserted");
        Ok(())
    }

    /// Applies `mutator` to the stored record and returns the updated copy.
    pub async fn update<T, F>(&self, id: Uuid, mutator: F) -> StoreResult<T>
    where
        T: Record,
        F: FnOnce(&mut T) + Send,
    {
        let mut state = self.state.write().await;
        let table = T::table_mut(&mut state);
        let current = table
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { kind: T::KIND, id })?;

        let mut next = current.clone();
        mutator(&mut next);
        if next.id() != id {
            return Err(StoreError::IdentifierChanged { kind: T::KIND, id });
        }
        check_valid(&next)?;
        if next == current {
            return Ok(next);
        }

        table.insert(id, next.clone());
        if let Err(err) = self.flush(table).await {
            table.insert(id, current);
            return Err(err);
        }
        debug!(kind = %T::KIND, %id, "record updated");
        Ok(next)
    }

    /// Removes and returns the record.
    pub async fn delete<T: Record>(&self, id: Uuid) -> StoreResult<T> {
        let mut state = self.state.write().await;
        let table = T::table_mut(&mut state);
        let removed = table
            .remove(&id)
            .ok_or(StoreError::NotFound { kind: T::KIND, id })?;

        if let Err(err) = self.flush(table).await {
            table.insert(id, removed);
            return Err(err);
        }
        debug!(kind = %T::KIND, %id, "record deleted");
        Ok(removed)
    }

    /// Update-if-exists-else-insert keyed by identifier. A merge that changes nothing
    /// does not touch disk.
    pub async fn upsert<T: Record>(&self, record: T) -> StoreResult<UpsertOutcome> {
        let mut state = self.state.write().await;
        let table = T::table_mut(&mut state);
        let id = record.id();
        let previous = table.get(&id).cloned();

        let outcome = merge_into(table, record)?;
        if outcome == UpsertOutcome::Unchanged {
            return Ok(outcome);
        }

        if let Err(err) = self.flush(table).await {
            match previous {
                Some(previous) => table.insert(id, previous),
                None => table.remove(&id),
            };
            return Err(err);
        }
        Ok(outcome)
    }

    /// Upserts every record under one write lock and flushes once. Either the whole batch
    /// lands on disk or the collection is left as it was.
    pub async fn upsert_batch<T: Record>(&self, records: Vec<T>) -> StoreResult<UpsertReport> {
        let mut state = self.state.write().await;
        let table = T::table_mut(&mut state);
        let snapshot = table.clone();

        let mut report = UpsertReport::default();
        for record in records {
            match merge_into(table, record) {
                Ok(outcome) => report.record(outcome),
                Err(err) => {
                    *table = snapshot;
                    return Err(err);
                }
            }
        }

        if report.changed() {
            if let Err(err) = self.flush(table).await {
                *table = snapshot;
                return Err(err);
            }
        }
        debug!(
            kind = %T::KIND,
            inserted = report.inserted,
            updated = report.updated,
            unchanged = report.unchanged,
            "batch upserted"
        );
        Ok(report)
    }

    async fn flush<T: Record>(&self, table: &Table<T>) -> StoreResult<()> {
        let records: Vec<&T> = table.values().collect();
        let bytes = serde_json::to_vec_pretty(&records).map_err(|source| StoreError::Encode {
            kind: T::KIND,
            source,
        })?;
        let path = self.collection_path(T::KIND);
        write_atomically(&path, &bytes)
            .await
            .map_err(|source| StoreError::Persist { path, source })
    }
}

fn check_valid<T: Record>(record: &T) -> StoreResult<()> {
    record.validate().map_err(|source| StoreError::Invalid {
        kind: T::KIND,
        id: record.id(),
        source,
    })
}

fn merge_into<T: Record>(table: &mut Table<T>, record: T) -> StoreResult<UpsertOutcome> {
    let id = record.id();
    match table.get_mut(&id) {
        Some(existing) => {
            let mut merged = existing.clone();
            merged.absorb(record);
            check_valid(&merged)?;
            if merged == *existing {
                return Ok(UpsertOutcome::Unchanged);
            }
            *existing = merged;
            Ok(UpsertOutcome::Updated)
        }
        None => {
            check_valid(&record)?;
            table.insert(id, record);
            Ok(UpsertOutcome::Inserted)
        }
    }
}

async fn load_table<T: Record>(root: &Path) -> StoreResult<Table<T>> {
    let path = root.join(T::KIND.file_name());
    let bytes = match fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Table::new()),
        Err(source) => return Err(StoreError::Read { path, source }),
    };
    let records: Vec<T> =
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Decode { path, source })?;
    Ok(records.into_iter().map(|r| (r.id(), r)).collect())
}

/// Replaces `path` with `bytes` via a sibling temp file, fsync and rename.
pub async fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).await?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await?;
    let written = async {
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await
    }
    .await;
    drop(file);

    if let Err(err) = written {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err);
    }
    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use gscholar_core::ContactStatus;
    use tempfile::tempdir;

    fn opportunity(program: &str) -> Opportunity {
        Opportunity {
            id: Uuid::new_v4(),
            school_name: "ETH Zurich".into(),
            school_abbr: "ETH".into(),
            is_official: true,
            program_name: program.into(),
            description: "Fellowship program for students.".into(),
            tags: vec!["Summer Research".into(), "CS".into()],
            deadline: Utc.with_ymd_and_hms(2027, 3, 1, 0, 0, 0).single().unwrap(),
            status: "Travel + Stipend".into(),
            location: "Zurich, Switzerland".into(),
            website_url: "https://inf.ethz.ch/".into(),
            image_url: None,
            is_saved: false,
            saved_at: None,
        }
    }

    #[tokio::test]
    async fn insert_rejects_duplicates_and_invalid_records() {
        let dir = tempdir().expect("tempdir");
        let store = RecordStore::open(dir.path()).await.expect("open");
        let opp = opportunity("SSRF");

        store.insert(opp.clone()).await.expect("first insert");
        let err = store.insert(opp.clone()).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateIdentifier { kind: RecordKind::Opportunity, id } if id == opp.id));

        let mut broken = opportunity("Broken");
        broken.is_saved = true;
        let err = store.insert(broken).await.unwrap_err();
        assert!(matches!(err, StoreError::Invalid { .. }));
        assert_eq!(store.count::<Opportunity>().await, 1);
    }

    #[tokio::test]
    async fn missing_ids_report_not_found() {
        let dir = tempdir().expect("tempdir");
        let store = RecordStore::open(dir.path()).await.expect("open");
        let id = Uuid::new_v4();

        let err = store.update::<Task, _>(id, |t| t.is_completed = true).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: RecordKind::Task, .. }));
        let err = store.delete::<Contact>(id).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: RecordKind::Contact, .. }));
    }

    #[tokio::test]
    async fn update_cannot_change_identifier() {
        let dir = tempdir().expect("tempdir");
        let store = RecordStore::open(dir.path()).await.expect("open");
        let contact = Contact::new("Dr. Alan Turing", "Professor of AI, MIT", ContactStatus::EmailSent);
        store.insert(contact.clone()).await.expect("insert");

        let err = store
            .update::<Contact, _>(contact.id, |c| c.id = Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::IdentifierChanged { .. }));

        let updated = store
            .update::<Contact, _>(contact.id, |c| c.status = ContactStatus::Replied)
            .await
            .expect("update");
        assert_eq!(updated.status, ContactStatus::Replied);
    }

    #[tokio::test]
    async fn query_filters_sorts_and_limits() {
        let dir = tempdir().expect("tempdir");
        let store = RecordStore::open(dir.path()).await.expect("open");
        for (program, day) in [("A", 3), ("B", 1), ("C", 2)] {
            let mut opp = opportunity(program);
            opp.deadline = Utc.with_ymd_and_hms(2027, 1, day, 0, 0, 0).single().unwrap();
            store.insert(opp).await.expect("insert");
        }

        let sorted = store
            .query(
                Query::<Opportunity>::all()
                    .filter(|o| o.program_name != "A")
                    .sort_by(|a, b| a.deadline.cmp(&b.deadline)),
            )
            .await;
        let names: Vec<_> = sorted.iter().map(|o| o.program_name.as_str()).collect();
        assert_eq!(names, vec!["B", "C"]);

        let limited = store.query(Query::<Opportunity>::all().limit(1)).await;
        assert_eq!(limited.len(), 1);

        let all = store.all::<Opportunity>().await;
        let ids: Vec<_> = all.iter().map(|o| o.id).collect();
        let mut sorted_ids = ids.clone();
        sorted_ids.sort();
        assert_eq!(ids, sorted_ids);
    }

    #[tokio::test]
    async fn unchanged_upsert_skips_the_write() {
        let dir = tempdir().expect("tempdir");
        let store = RecordStore::open(dir.path()).await.expect("open");
        let opp = opportunity("SSRF");

        assert_eq!(store.upsert(opp.clone()).await.expect("upsert"), UpsertOutcome::Inserted);
        let path = store.collection_path(RecordKind::Opportunity);
        let before = std::fs::read(&path).expect("read");

        assert_eq!(store.upsert(opp.clone()).await.expect("upsert"), UpsertOutcome::Unchanged);
        assert_eq!(std::fs::read(&path).expect("read"), before);

        let mut renamed = opp.clone();
        renamed.program_name = "SSRF 2027".into();
        assert_eq!(store.upsert(renamed).await.expect("upsert"), UpsertOutcome::Updated);
    }

    #[tokio::test]
    async fn write_atomically_leaves_no_temp_files() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("tasks.json");
        write_atomically(&path, b"[]").await.expect("first write");
        write_atomically(&path, b"[ ]").await.expect("second write");

        assert_eq!(std::fs::read(&path).expect("read"), b"[ ]");
        let leftovers = std::fs::read_dir(dir.path())
            .expect("read_dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }
}
