//! In-process document store
//!
//! Documents are held in a sorted map behind a lock. Every commit is
//! journaled before it becomes visible (when a data directory is given)
//! and announced on a broadcast channel that drives live queries.
//!
//! Transactions are optimistic: reads record document versions, and the
//! commit is refused if any of them moved. The body is then re-run, up to
//! `MAX_TRANSACTION_ATTEMPTS` times.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use super::document::{
    validate_collection_path, validate_document_path, Document, FieldOp, Fields, Query,
};
use super::error::{StoreError, StoreResult};
use super::journal::{Journal, JournalEntry, JournalSyncMode};
use super::listen::Subscription;
use super::transaction::{
    Transaction, TransactionFn, TransactionSource, MAX_TRANSACTION_ATTEMPTS,
};
use super::DocumentStore;

/// Journal file name inside the data directory
pub const JOURNAL_FILE: &str = "store.journal";

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Compact once the journal holds this many entries and is mostly stale
const COMPACT_MIN_ENTRIES: u64 = 10_000;

/// A committed write, as seen by listeners
#[derive(Debug, Clone)]
pub struct Change {
    pub collection: String,
    pub path: String,
    pub version: u64,
}

/// How a pending write combines with the stored document
#[derive(Debug, Clone)]
enum PendingWrite {
    /// Fail if the document exists
    Create(Fields),
    /// Replace the whole body
    Replace(Fields),
    /// Deep-merge into the body, creating the document if needed
    Merge(Fields),
    /// Field ops; the document must exist
    Ops(Vec<FieldOp>),
}

struct State {
    docs: BTreeMap<String, Document>,
    next_version: u64,
    journal: Option<Journal>,
}

struct Inner {
    state: RwLock<State>,
    changes: broadcast::Sender<Change>,
}

/// Reference document store
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    /// Volatile store, nothing is written to disk
    pub fn in_memory() -> Self {
        Self::from_state(State {
            docs: BTreeMap::new(),
            next_version: 1,
            journal: None,
        })
    }

    /// Open a durable store in `dir`, replaying its journal
    pub fn open(dir: impl AsRef<Path>, sync_mode: JournalSyncMode) -> StoreResult<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let mut journal = Journal::open(dir.join(JOURNAL_FILE), sync_mode)?;
        let entries = journal.recover()?;

        let mut docs = BTreeMap::new();
        let mut next_version = 1;
        for entry in &entries {
            next_version = next_version.max(entry.version + 1);
            docs.insert(
                entry.path.clone(),
                Document {
                    path: entry.path.clone(),
                    data: entry.data.clone(),
                    version: entry.version,
                },
            );
        }

        if journal.is_damaged() || needs_compaction(journal.entry_count(), docs.len()) {
            journal.rewrite(&Self::snapshot_entries(&docs))?;
        }

        tracing::info!(
            dir = %dir.display(),
            documents = docs.len(),
            replayed = entries.len(),
            "Document store opened"
        );

        Ok(Self::from_state(State {
            docs,
            next_version,
            journal: Some(journal),
        }))
    }

    fn from_state(state: State) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(state),
                changes,
            }),
        }
    }

    fn snapshot_entries(docs: &BTreeMap<String, Document>) -> Vec<JournalEntry> {
        docs.values()
            .map(|d| JournalEntry {
                path: d.path.clone(),
                version: d.version,
                data: d.data.clone(),
            })
            .collect()
    }

    /// Number of stored documents
    pub fn document_count(&self) -> StoreResult<usize> {
        Ok(self.inner.read_state()?.docs.len())
    }

    /// Receive every committed change
    pub fn changes(&self) -> broadcast::Receiver<Change> {
        self.inner.changes.subscribe()
    }

    /// Flush the journal to disk
    pub fn sync(&self) -> StoreResult<()> {
        if let Some(journal) = self.inner.write_state()?.journal.as_mut() {
            journal.sync()?;
        }
        Ok(())
    }

    fn commit_one(&self, path: &str, write: PendingWrite) -> StoreResult<Document> {
        validate_document_path(path)?;
        let committed = self
            .inner
            .commit(&HashMap::new(), vec![(path.to_string(), write)])?
            .ok_or_else(|| StoreError::TransactionAborted("unexpected conflict".to_string()))?;
        committed
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }
}

impl Inner {
    fn read_state(&self) -> StoreResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|e| StoreError::Lock(e.to_string()))
    }

    fn write_state(&self) -> StoreResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|e| StoreError::Lock(e.to_string()))
    }

    fn run_query(&self, query: &Query) -> StoreResult<Vec<Document>> {
        validate_collection_path(&query.collection)?;
        let state = self.read_state()?;
        let prefix = format!("{}/", query.collection);
        Ok(query.apply(
            state
                .docs
                .range(prefix.clone()..)
                .take_while(|(path, _)| path.starts_with(&prefix))
                .map(|(_, doc)| doc),
        ))
    }

    /// Apply writes atomically. Returns `None` if a read version moved.
    fn commit(
        &self,
        reads: &HashMap<String, Option<u64>>,
        writes: Vec<(String, PendingWrite)>,
    ) -> StoreResult<Option<Vec<Document>>> {
        let mut state = self.write_state()?;

        for (path, seen) in reads {
            let current = state.docs.get(path).map(|d| d.version);
            if current != *seen {
                return Ok(None);
            }
        }

        let mut staged: Vec<(String, Fields)> = Vec::new();
        for (path, write) in writes {
            let position = staged.iter().position(|(p, _)| *p == path);
            let existing = match position {
                Some(i) => Some(staged[i].1.clone()),
                None => state.docs.get(&path).map(|d| d.data.clone()),
            };

            let data = match (write, existing) {
                (PendingWrite::Create(_), Some(_)) => {
                    return Err(StoreError::AlreadyExists(path));
                }
                (PendingWrite::Create(data), None) | (PendingWrite::Replace(data), _) => data,
                (PendingWrite::Merge(patch), existing) => {
                    let mut data = existing.unwrap_or_default();
                    merge_into(&mut data, patch);
                    data
                }
                (PendingWrite::Ops(_), None) => return Err(StoreError::NotFound(path)),
                (PendingWrite::Ops(ops), Some(mut data)) => {
                    for op in &ops {
                        op.apply(&mut data)?;
                    }
                    data
                }
            };

            let mut data = data;
            data.remove("id");
            match position {
                Some(i) => staged[i].1 = data,
                None => staged.push((path, data)),
            }
        }

        let mut committed = Vec::with_capacity(staged.len());
        let mut version = state.next_version;
        for (path, data) in staged {
            committed.push(Document {
                path,
                data,
                version,
            });
            version += 1;
        }

        if let Some(journal) = state.journal.as_mut() {
            for doc in &committed {
                journal.append(&JournalEntry {
                    path: doc.path.clone(),
                    version: doc.version,
                    data: doc.data.clone(),
                })?;
            }
        }

        state.next_version = version;
        for doc in &committed {
            state.docs.insert(doc.path.clone(), doc.clone());
        }
        Self::maybe_compact(&mut *state)?;
        drop(state);

        for doc in &committed {
            let _ = self.changes.send(Change {
                collection: doc.collection().to_string(),
                path: doc.path.clone(),
                version: doc.version,
            });
        }

        Ok(Some(committed))
    }

    fn maybe_compact(state: &mut State) -> StoreResult<()> {
        let snapshot = match state.journal.as_ref() {
            Some(journal) if needs_compaction(journal.entry_count(), state.docs.len()) => {
                MemoryStore::snapshot_entries(&state.docs)
            }
            _ => return Ok(()),
        };
        if let Some(journal) = state.journal.as_mut() {
            journal.rewrite(&snapshot)?;
        }
        Ok(())
    }

    /// Run the body once and try to commit. `None` means conflict.
    fn attempt_transaction(&self, body: &TransactionFn<'_>) -> StoreResult<Option<()>> {
        let mut tx = Transaction::new(self);
        body(&mut tx)?;
        let (reads, writes) = tx.into_parts();
        if writes.is_empty() {
            return Ok(Some(()));
        }

        let writes = writes
            .into_iter()
            .map(|(path, ops)| (path, PendingWrite::Ops(ops)))
            .collect();
        Ok(self.commit(&reads, writes)?.map(|_| ()))
    }
}

impl TransactionSource for Inner {
    fn read(&self, path: &str) -> StoreResult<Option<Document>> {
        Ok(self.read_state()?.docs.get(path).cloned())
    }
}

fn needs_compaction(entry_count: u64, doc_count: usize) -> bool {
    entry_count >= COMPACT_MIN_ENTRIES && entry_count > doc_count as u64 * 4
}

fn merge_into(target: &mut Fields, patch: Fields) {
    for (key, value) in patch {
        if let Value::Object(incoming) = &value {
            if let Some(Value::Object(existing)) = target.get_mut(&key) {
                merge_into(existing, incoming.clone());
                continue;
            }
        }
        target.insert(key, value);
    }
}

struct ListenState {
    inner: Arc<Inner>,
    query: Query,
    changes: broadcast::Receiver<Change>,
    last: Option<Vec<Document>>,
    primed: bool,
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &str) -> StoreResult<Option<Document>> {
        validate_document_path(path)?;
        self.inner.read(path)
    }

    async fn add(&self, collection: &str, data: Fields) -> StoreResult<Document> {
        validate_collection_path(collection)?;
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.commit_one(
            &format!("{}/{}", collection, id),
            PendingWrite::Create(data),
        )
    }

    async fn create(&self, path: &str, data: Fields) -> StoreResult<Document> {
        self.commit_one(path, PendingWrite::Create(data))
    }

    async fn set(&self, path: &str, data: Fields) -> StoreResult<Document> {
        self.commit_one(path, PendingWrite::Replace(data))
    }

    async fn merge(&self, path: &str, data: Fields) -> StoreResult<Document> {
        self.commit_one(path, PendingWrite::Merge(data))
    }

    async fn update(&self, path: &str, ops: Vec<FieldOp>) -> StoreResult<Document> {
        self.commit_one(path, PendingWrite::Ops(ops))
    }

    async fn query(&self, query: &Query) -> StoreResult<Vec<Document>> {
        self.inner.run_query(query)
    }

    fn listen(&self, query: Query) -> Subscription<StoreResult<Vec<Document>>> {
        let state = ListenState {
            inner: Arc::clone(&self.inner),
            changes: self.inner.changes.subscribe(),
            query,
            last: None,
            primed: false,
        };

        Subscription::new(futures_util::stream::unfold(state, |mut st| async move {
            loop {
                if st.primed {
                    match st.changes.recv().await {
                        Ok(change) if change.collection != st.query.collection => continue,
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::debug!(skipped, "Listener lagged, recomputing snapshot");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
                st.primed = true;

                match st.inner.run_query(&st.query) {
                    Ok(docs) => {
                        if st.last.as_ref() == Some(&docs) {
                            continue;
                        }
                        st.last = Some(docs.clone());
                        return Some((Ok(docs), st));
                    }
                    Err(e) => return Some((Err(e), st)),
                }
            }
        }))
    }

    async fn run_transaction(&self, body: &TransactionFn<'_>) -> StoreResult<()> {
        for attempt in 1..=MAX_TRANSACTION_ATTEMPTS {
            if self.inner.attempt_transaction(body)?.is_some() {
                return Ok(());
            }
            tracing::debug!(attempt, "Transaction conflict, retrying");
            tokio::task::yield_now().await;
        }
        Err(StoreError::TransactionAborted(format!(
            "gave up after {} attempts",
            MAX_TRANSACTION_ATTEMPTS
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::document::Direction;
    use futures_util::StreamExt;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::tempdir;

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_set_get_and_add() {
        let store = MemoryStore::in_memory();

        store
            .set("users/u1", fields(json!({"name": "anna", "currentBaths": 0})))
            .await
            .unwrap();
        let doc = store.get("users/u1").await.unwrap().unwrap();
        assert_eq!(doc.id(), "u1");
        assert_eq!(doc.data["name"], "anna");

        let added = store
            .add("baths", fields(json!({"id": "ignored", "type": "logged"})))
            .await
            .unwrap();
        assert_eq!(added.collection(), "baths");
        assert!(!added.data.contains_key("id"));
        assert_eq!(store.document_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_update_missing_document() {
        let store = MemoryStore::in_memory();
        let err = store
            .update("baths/nope", vec![FieldOp::increment("commentCount", 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_create_refuses_existing() {
        let store = MemoryStore::in_memory();
        store.create("users/u1", Fields::new()).await.unwrap();
        let err = store.create("users/u1", Fields::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_merge_is_deep() {
        let store = MemoryStore::in_memory();
        store
            .set(
                "baths/B1",
                fields(json!({"reactions": {"thumbsUp": 1, "heart": 2}, "location": "Korsvika"})),
            )
            .await
            .unwrap();
        store
            .merge("baths/B1", fields(json!({"reactions": {"heart": 5}})))
            .await
            .unwrap();

        let doc = store.get("baths/B1").await.unwrap().unwrap();
        assert_eq!(doc.data["reactions"], json!({"thumbsUp": 1, "heart": 5}));
        assert_eq!(doc.data["location"], "Korsvika");
    }

    #[tokio::test]
    async fn test_subcollection_query_is_scoped() {
        let store = MemoryStore::in_memory();
        store.set("baths/B1", fields(json!({"n": 1}))).await.unwrap();
        store
            .set("baths/B1/comments/C1", fields(json!({"createdAt": 1})))
            .await
            .unwrap();
        store
            .set("baths/B10/comments/C2", fields(json!({"createdAt": 2})))
            .await
            .unwrap();

        let baths = store.query(&Query::collection("baths")).await.unwrap();
        assert_eq!(baths.len(), 1);

        let comments = store
            .query(&Query::collection("baths/B1/comments"))
            .await
            .unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].id(), "C1");
    }

    #[tokio::test]
    async fn test_persistence_across_opens() {
        let dir = tempdir().unwrap();

        {
            let store = MemoryStore::open(dir.path(), JournalSyncMode::Batched).unwrap();
            store
                .set("users/u1", fields(json!({"currentBaths": 0})))
                .await
                .unwrap();
            store
                .update("users/u1", vec![FieldOp::increment("currentBaths", 1)])
                .await
                .unwrap();
            store.sync().unwrap();
        }

        let store = MemoryStore::open(dir.path(), JournalSyncMode::EveryWrite).unwrap();
        let doc = store.get("users/u1").await.unwrap().unwrap();
        assert_eq!(doc.data["currentBaths"], 1);

        let next = store
            .update("users/u1", vec![FieldOp::increment("currentBaths", 1)])
            .await
            .unwrap();
        assert!(next.version > doc.version);
    }

    #[tokio::test]
    async fn test_transaction_retries_on_conflict() {
        let store = MemoryStore::in_memory();
        store
            .set("counters/c", fields(json!({"n": 0})))
            .await
            .unwrap();

        let attempts = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&store.inner);
        let counter = Arc::clone(&attempts);
        let body = move |tx: &mut Transaction<'_>| -> StoreResult<()> {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            tx.get("counters/c")?;
            if n == 0 {
                inner.commit(
                    &HashMap::new(),
                    vec![(
                        "counters/c".to_string(),
                        PendingWrite::Ops(vec![FieldOp::increment("n", 10)]),
                    )],
                )?;
            }
            tx.update("counters/c", vec![FieldOp::increment("n", 1)])
        };

        store.run_transaction(&body).await.unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        let doc = store.get("counters/c").await.unwrap().unwrap();
        assert_eq!(doc.data["n"], 11);
    }

    #[tokio::test]
    async fn test_transaction_gives_up() {
        let store = MemoryStore::in_memory();
        store
            .set("counters/c", fields(json!({"n": 0})))
            .await
            .unwrap();

        let attempts = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&store.inner);
        let counter = Arc::clone(&attempts);
        let body = move |tx: &mut Transaction<'_>| -> StoreResult<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            tx.get("counters/c")?;
            inner.commit(
                &HashMap::new(),
                vec![(
                    "counters/c".to_string(),
                    PendingWrite::Ops(vec![FieldOp::increment("n", 1)]),
                )],
            )?;
            tx.update("counters/c", vec![FieldOp::set("n", 0)])
        };

        let err = store.run_transaction(&body).await.unwrap_err();
        assert!(matches!(err, StoreError::TransactionAborted(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), MAX_TRANSACTION_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_transaction_body_error_is_not_retried() {
        let store = MemoryStore::in_memory();
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let body = move |tx: &mut Transaction<'_>| -> StoreResult<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            match tx.get("baths/missing")? {
                Some(_) => Ok(()),
                None => Err(StoreError::NotFound("baths/missing".to_string())),
            }
        };

        let err = store.run_transaction(&body).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transaction_body_borrows_locals() {
        let store = MemoryStore::in_memory();
        store
            .set("counters/c", fields(json!({"n": 4})))
            .await
            .unwrap();

        let path = String::from("counters/c");
        let seen = AtomicUsize::new(0);
        let body = |tx: &mut Transaction<'_>| -> StoreResult<()> {
            let doc = tx
                .get(&path)?
                .ok_or_else(|| StoreError::NotFound(path.clone()))?;
            let n = doc.data.get("n").and_then(Value::as_u64).unwrap_or(0);
            seen.store(n as usize, Ordering::SeqCst);
            tx.update(&path, vec![FieldOp::increment("n", 1)])
        };

        store.run_transaction(&body).await.unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 4);
        let doc = store.get(&path).await.unwrap().unwrap();
        assert_eq!(doc.data["n"], 5);
    }

    #[tokio::test]
    async fn test_listen_emits_initial_and_changes() {
        let store = MemoryStore::in_memory();
        store
            .set("baths/B1", fields(json!({"createdAt": 1})))
            .await
            .unwrap();

        let mut sub = store.listen(
            Query::collection("baths").order_by("createdAt", Direction::Descending),
        );

        let first = sub.next().await.unwrap().unwrap();
        assert_eq!(first.len(), 1);

        store
            .set("users/u1", fields(json!({"name": "anna"})))
            .await
            .unwrap();
        store
            .set("baths/B2", fields(json!({"createdAt": 2})))
            .await
            .unwrap();

        let second = sub.next().await.unwrap().unwrap();
        let ids: Vec<&str> = second.iter().map(|d| d.id()).collect();
        assert_eq!(ids, vec!["B2", "B1"]);

        let quiet = tokio::time::timeout(Duration::from_millis(50), sub.next()).await;
        assert!(quiet.is_err(), "no snapshot expected without changes");
    }

    #[tokio::test]
    async fn test_listen_skips_unchanged_results() {
        let store = MemoryStore::in_memory();
        store
            .set("baths/B1", fields(json!({"createdAt": 5})))
            .await
            .unwrap();

        let mut sub = store.listen(
            Query::collection("baths")
                .order_by("createdAt", Direction::Descending)
                .limit(1),
        );
        assert_eq!(sub.next().await.unwrap().unwrap()[0].id(), "B1");

        // Older entry falls outside the limit
        store
            .set("baths/B0", fields(json!({"createdAt": 1})))
            .await
            .unwrap();
        store
            .set("baths/B9", fields(json!({"createdAt": 9})))
            .await
            .unwrap();

        let next = sub.next().await.unwrap().unwrap();
        assert_eq!(next[0].id(), "B9");
    }

    #[tokio::test]
    async fn test_damaged_tail_is_dropped_on_open() {
        let dir = tempdir().unwrap();

        {
            let store = MemoryStore::open(dir.path(), JournalSyncMode::EveryWrite).unwrap();
            store.set("users/u1", fields(json!({"n": 1}))).await.unwrap();
        }

        {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(dir.path().join(JOURNAL_FILE))
                .unwrap();
            file.write_all(&[7, 0, 0, 0, b'{']).unwrap();
        }

        {
            let store = MemoryStore::open(dir.path(), JournalSyncMode::EveryWrite).unwrap();
            store.set("users/u2", fields(json!({"n": 2}))).await.unwrap();
        }

        let store = MemoryStore::open(dir.path(), JournalSyncMode::EveryWrite).unwrap();
        assert_eq!(store.document_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unsubscribe_releases_receiver() {
        let store = MemoryStore::in_memory();
        let sub = store.listen(Query::collection("baths"));
        assert_eq!(store.inner.changes.receiver_count(), 1);
        sub.unsubscribe();
        assert_eq!(store.inner.changes.receiver_count(), 0);
    }
}
