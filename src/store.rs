//! Storage boundary traits and the in-memory reference store.
//!
//! Handlers never talk to a database driver directly; they go through
//! [`SessionStore`] / [`StoreSession`], which expose exactly the operations
//! the sanitizers know how to protect. The in-memory implementation backs
//! tests and local development with real transactional semantics: writes
//! made inside a transaction are staged and become visible only on commit,
//! and a commit never disturbs what other sessions have already committed.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::error::{AppResult, SecurityError};
use crate::guard::QueryOptions;
use crate::token::Role;

/// Boxed future used by dyn-safe traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Current profile of a subject, looked up at token-rotation time.
#[derive(Debug, Clone)]
pub struct SubjectProfile {
    pub subject: String,
    pub email: Option<String>,
    pub role: Option<Role>,
}

/// Resolves a subject id to its current profile.
///
/// Dyn-safe so the application state can hold any backing directory behind
/// an `Arc<dyn SubjectDirectory>`.
pub trait SubjectDirectory: Send + Sync {
    /// Look up `subject`. `Ok(None)` means the subject no longer exists
    /// (deleted or disabled) and must not receive new tokens.
    fn resolve<'a>(&'a self, subject: &'a str) -> BoxFuture<'a, AppResult<Option<SubjectProfile>>>;
}

/// In-memory subject directory for tests and local development.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    profiles: RwLock<HashMap<String, SubjectProfile>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a profile.
    pub fn insert(&self, profile: SubjectProfile) {
        if let Ok(mut profiles) = self.profiles.write() {
            profiles.insert(profile.subject.clone(), profile);
        }
    }

    /// Remove a subject, simulating account deletion.
    pub fn remove(&self, subject: &str) {
        if let Ok(mut profiles) = self.profiles.write() {
            profiles.remove(subject);
        }
    }
}

impl SubjectDirectory for InMemoryDirectory {
    fn resolve<'a>(&'a self, subject: &'a str) -> BoxFuture<'a, AppResult<Option<SubjectProfile>>> {
        Box::pin(async move {
            let profiles = self
                .profiles
                .read()
                .map_err(|_| SecurityError::Store("directory lock poisoned".to_string()))?;
            Ok(profiles.get(subject).cloned())
        })
    }
}

/// Factory for store sessions.
pub trait SessionStore: Send + Sync + 'static {
    type Session: StoreSession;

    /// Open a new session. Sessions are cheap and short-lived; one per
    /// coordinated transaction.
    fn start_session(&self) -> impl Future<Output = AppResult<Self::Session>> + Send;
}

/// One session's view of the store, with explicit transaction control.
///
/// All document arguments are expected to be pre-sanitized by the guard
/// module; the store enforces nothing about operator keys.
pub trait StoreSession: Send {
    fn start_transaction(&mut self) -> impl Future<Output = AppResult<()>> + Send;
    fn commit_transaction(&mut self) -> impl Future<Output = AppResult<()>> + Send;
    fn abort_transaction(&mut self) -> impl Future<Output = AppResult<()>> + Send;

    /// Release the session. Infallible: a session that cannot be ended
    /// cleanly is simply dropped.
    fn end_session(self) -> impl Future<Output = ()> + Send;

    fn find(
        &mut self,
        collection: &str,
        filter: &Value,
        options: &QueryOptions,
    ) -> impl Future<Output = AppResult<Vec<Value>>> + Send;

    fn insert(
        &mut self,
        collection: &str,
        document: Value,
    ) -> impl Future<Output = AppResult<()>> + Send;

    /// Apply an update document to every matching record. Returns the number
    /// of records modified.
    fn update(
        &mut self,
        collection: &str,
        filter: &Value,
        update: &Value,
    ) -> impl Future<Output = AppResult<usize>> + Send;

    /// Delete every matching record. Returns the number removed.
    fn delete(
        &mut self,
        collection: &str,
        filter: &Value,
    ) -> impl Future<Output = AppResult<usize>> + Send;
}

type Collections = HashMap<String, Vec<Value>>;

/// In-memory store with snapshot-based transactions.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    committed: Arc<RwLock<Collections>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the committed contents of a collection, bypassing any session.
    pub fn committed_docs(&self, collection: &str) -> Vec<Value> {
        self.committed
            .read()
            .map(|c| c.get(collection).cloned().unwrap_or_default())
            .unwrap_or_default()
    }
}

impl SessionStore for MemoryStore {
    type Session = MemorySession;

    async fn start_session(&self) -> AppResult<MemorySession> {
        Ok(MemorySession {
            committed: Arc::clone(&self.committed),
            txn: None,
        })
    }
}

/// One write staged inside a transaction, replayed at commit.
#[derive(Debug, Clone)]
enum StagedWrite {
    Insert {
        collection: String,
        document: Value,
    },
    Update {
        collection: String,
        filter: Value,
        update: Value,
    },
    Delete {
        collection: String,
        filter: Value,
    },
}

/// In-flight transaction state: a snapshot merged with this session's own
/// writes (what `find` sees) plus the write log itself.
#[derive(Debug)]
struct ActiveTxn {
    working: Collections,
    staged: Vec<StagedWrite>,
}

/// Session over [`MemoryStore`].
///
/// Outside a transaction, operations hit the committed data directly. Inside
/// one, reads run against a snapshot taken at `start_transaction` (updated
/// with the session's own writes), and writes are logged; commit replays the
/// log onto the live committed data under the write lock, so writes committed
/// by other sessions in the meantime survive. Abort discards the log.
#[derive(Debug)]
pub struct MemorySession {
    committed: Arc<RwLock<Collections>>,
    txn: Option<ActiveTxn>,
}

impl MemorySession {
    fn read_committed(&self) -> AppResult<Collections> {
        self.committed
            .read()
            .map(|c| c.clone())
            .map_err(|_| SecurityError::Store("store lock poisoned".to_string()))
    }

    /// Inside a transaction: apply to the working view and log for replay.
    /// Outside: apply straight to the committed data.
    fn stage_or_apply(&mut self, write: StagedWrite) -> AppResult<usize> {
        match self.txn.as_mut() {
            Some(txn) => {
                let affected = apply_write(&mut txn.working, &write)?;
                txn.staged.push(write);
                Ok(affected)
            }
            None => {
                let mut guard = self
                    .committed
                    .write()
                    .map_err(|_| SecurityError::Store("store lock poisoned".to_string()))?;
                apply_write(&mut guard, &write)
            }
        }
    }
}

impl StoreSession for MemorySession {
    async fn start_transaction(&mut self) -> AppResult<()> {
        if self.txn.is_some() {
            return Err(SecurityError::Store(
                "transaction already in progress on this session".to_string(),
            ));
        }
        self.txn = Some(ActiveTxn {
            working: self.read_committed()?,
            staged: Vec::new(),
        });
        Ok(())
    }

    async fn commit_transaction(&mut self) -> AppResult<()> {
        let txn = self.txn.take().ok_or_else(|| {
            SecurityError::Store("commit without an active transaction".to_string())
        })?;
        let mut guard = self
            .committed
            .write()
            .map_err(|_| SecurityError::Store("store lock poisoned".to_string()))?;

        // Replay against a copy first so a failed replay leaves the
        // committed data untouched.
        let mut next = guard.clone();
        for write in &txn.staged {
            apply_write(&mut next, write)?;
        }
        *guard = next;
        Ok(())
    }

    async fn abort_transaction(&mut self) -> AppResult<()> {
        if self.txn.take().is_none() {
            return Err(SecurityError::Store(
                "abort without an active transaction".to_string(),
            ));
        }
        Ok(())
    }

    async fn end_session(mut self) {
        // An un-ended transaction is discarded, never committed
        self.txn = None;
    }

    async fn find(
        &mut self,
        collection: &str,
        filter: &Value,
        options: &QueryOptions,
    ) -> AppResult<Vec<Value>> {
        let collections = match self.txn.as_ref() {
            Some(txn) => txn.working.clone(),
            None => self.read_committed()?,
        };

        let mut matched: Vec<Value> = collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|d| matches_filter(d, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(Value::Object(sort)) = &options.sort {
            for (field, direction) in sort.iter().rev() {
                let descending = direction.as_i64() == Some(-1);
                matched.sort_by(|a, b| {
                    let ord = compare_values(a.get(field), b.get(field));
                    if descending { ord.reverse() } else { ord }
                });
            }
        }

        Ok(matched
            .into_iter()
            .skip(usize::try_from(options.skip).unwrap_or(usize::MAX))
            .take(options.limit as usize)
            .collect())
    }

    async fn insert(&mut self, collection: &str, document: Value) -> AppResult<()> {
        self.stage_or_apply(StagedWrite::Insert {
            collection: collection.to_string(),
            document,
        })
        .map(|_| ())
    }

    async fn update(
        &mut self,
        collection: &str,
        filter: &Value,
        update: &Value,
    ) -> AppResult<usize> {
        self.stage_or_apply(StagedWrite::Update {
            collection: collection.to_string(),
            filter: filter.clone(),
            update: update.clone(),
        })
    }

    async fn delete(&mut self, collection: &str, filter: &Value) -> AppResult<usize> {
        self.stage_or_apply(StagedWrite::Delete {
            collection: collection.to_string(),
            filter: filter.clone(),
        })
    }
}

/// Execute one write against a collection map. Returns the number of
/// documents affected (always 0 for inserts).
fn apply_write(collections: &mut Collections, write: &StagedWrite) -> AppResult<usize> {
    match write {
        StagedWrite::Insert {
            collection,
            document,
        } => {
            collections
                .entry(collection.clone())
                .or_default()
                .push(document.clone());
            Ok(0)
        }
        StagedWrite::Update {
            collection,
            filter,
            update,
        } => {
            let mut modified = 0;
            if let Some(docs) = collections.get_mut(collection) {
                for doc in docs.iter_mut() {
                    if matches_filter(doc, filter) {
                        apply_update(doc, update)?;
                        modified += 1;
                    }
                }
            }
            Ok(modified)
        }
        StagedWrite::Delete { collection, filter } => {
            let Some(docs) = collections.get_mut(collection) else {
                return Ok(0);
            };
            let before = docs.len();
            docs.retain(|d| !matches_filter(d, filter));
            Ok(before - docs.len())
        }
    }
}

/// Top-level equality matching: every filter key must equal the document's
/// value for that key. An empty filter matches everything.
fn matches_filter(document: &Value, filter: &Value) -> bool {
    match filter.as_object() {
        Some(map) => map.iter().all(|(key, expected)| {
            document.get(key).is_some_and(|actual| actual == expected)
        }),
        None => false,
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a, b) {
            (Value::Number(x), Value::Number(y)) => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
            (Value::String(x), Value::String(y)) => x.cmp(y),
            (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
            _ => Ordering::Equal,
        },
    }
}

/// Apply a sanitized update document (allowlisted operators only).
fn apply_update(document: &mut Value, update: &Value) -> AppResult<()> {
    let Some(operators) = update.as_object() else {
        return Err(SecurityError::Store("update must be an object".to_string()));
    };
    let Some(doc) = document.as_object_mut() else {
        return Err(SecurityError::Store("document must be an object".to_string()));
    };

    for (op, body) in operators {
        let Some(fields) = body.as_object() else {
            return Err(SecurityError::Store(format!(
                "body of '{op}' must be an object"
            )));
        };
        for (field, arg) in fields {
            match op.as_str() {
                "$set" => {
                    doc.insert(field.clone(), arg.clone());
                }
                "$unset" => {
                    doc.remove(field);
                }
                "$inc" => {
                    let current = doc.get(field).and_then(Value::as_f64).unwrap_or(0.0);
                    let delta = arg.as_f64().unwrap_or(0.0);
                    doc.insert(field.clone(), Value::from(current + delta));
                }
                "$push" => match doc.get_mut(field) {
                    Some(Value::Array(items)) => items.push(arg.clone()),
                    _ => {
                        doc.insert(field.clone(), Value::Array(vec![arg.clone()]));
                    }
                },
                "$pull" => {
                    if let Some(Value::Array(items)) = doc.get_mut(field) {
                        items.retain(|i| i != arg);
                    }
                }
                "$addToSet" => match doc.get_mut(field) {
                    Some(Value::Array(items)) => {
                        if !items.contains(arg) {
                            items.push(arg.clone());
                        }
                    }
                    _ => {
                        doc.insert(field.clone(), Value::Array(vec![arg.clone()]));
                    }
                },
                other => {
                    return Err(SecurityError::Store(format!(
                        "unsupported update operator '{other}'"
                    )));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn default_options() -> QueryOptions {
        QueryOptions {
            limit: 10,
            skip: 0,
            sort: None,
        }
    }

    #[tokio::test]
    async fn test_insert_and_find_outside_transaction() {
        let store = MemoryStore::new();
        let mut session = store.start_session().await.unwrap();

        session
            .insert("memories", json!({ "title": "first", "views": 0 }))
            .await
            .unwrap();

        let found = session
            .find("memories", &json!({ "title": "first" }), &default_options())
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_commit_makes_writes_visible() {
        let store = MemoryStore::new();
        let mut session = store.start_session().await.unwrap();

        session.start_transaction().await.unwrap();
        session
            .insert("memories", json!({ "title": "staged" }))
            .await
            .unwrap();
        assert!(store.committed_docs("memories").is_empty());

        session.commit_transaction().await.unwrap();
        assert_eq!(store.committed_docs("memories").len(), 1);
        session.end_session().await;
    }

    #[tokio::test]
    async fn test_abort_discards_writes() {
        let store = MemoryStore::new();
        let mut session = store.start_session().await.unwrap();

        session.start_transaction().await.unwrap();
        session
            .insert("memories", json!({ "title": "doomed" }))
            .await
            .unwrap();
        session.abort_transaction().await.unwrap();

        assert!(store.committed_docs("memories").is_empty());
        session.end_session().await;
    }

    #[tokio::test]
    async fn test_dropped_session_never_commits() {
        let store = MemoryStore::new();
        {
            let mut session = store.start_session().await.unwrap();
            session.start_transaction().await.unwrap();
            session
                .insert("memories", json!({ "title": "lost" }))
                .await
                .unwrap();
            session.end_session().await;
        }
        assert!(store.committed_docs("memories").is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_commits_preserve_each_other() {
        let store = MemoryStore::new();
        let mut a = store.start_session().await.unwrap();
        let mut b = store.start_session().await.unwrap();

        a.start_transaction().await.unwrap();
        b.start_transaction().await.unwrap();
        a.insert("albums", json!({ "owner": "a" })).await.unwrap();
        b.insert("journal", json!({ "owner": "b" })).await.unwrap();

        a.commit_transaction().await.unwrap();
        b.commit_transaction().await.unwrap();
        a.end_session().await;
        b.end_session().await;

        assert_eq!(store.committed_docs("albums").len(), 1);
        assert_eq!(store.committed_docs("journal").len(), 1);
    }

    #[tokio::test]
    async fn test_overlapping_inserts_to_one_collection_both_survive() {
        let store = MemoryStore::new();
        let mut a = store.start_session().await.unwrap();
        a.start_transaction().await.unwrap();
        a.insert("memories", json!({ "title": "early" })).await.unwrap();

        // A second session commits while the first is still open.
        let mut b = store.start_session().await.unwrap();
        b.start_transaction().await.unwrap();
        b.insert("memories", json!({ "title": "late" })).await.unwrap();
        b.commit_transaction().await.unwrap();
        b.end_session().await;

        a.commit_transaction().await.unwrap();
        a.end_session().await;

        assert_eq!(store.committed_docs("memories").len(), 2);
    }

    #[tokio::test]
    async fn test_commit_without_transaction_fails() {
        let store = MemoryStore::new();
        let mut session = store.start_session().await.unwrap();
        assert!(session.commit_transaction().await.is_err());
        assert!(session.abort_transaction().await.is_err());
    }

    #[tokio::test]
    async fn test_update_operators() {
        let store = MemoryStore::new();
        let mut session = store.start_session().await.unwrap();
        session
            .insert(
                "memories",
                json!({ "title": "a", "views": 1, "tags": ["x"] }),
            )
            .await
            .unwrap();

        let modified = session
            .update(
                "memories",
                &json!({ "title": "a" }),
                &json!({
                    "$set": { "title": "b" },
                    "$inc": { "views": 2 },
                    "$addToSet": { "tags": "x" },
                    "$push": { "tags": "y" }
                }),
            )
            .await
            .unwrap();
        assert_eq!(modified, 1);

        let found = session
            .find("memories", &json!({ "title": "b" }), &default_options())
            .await
            .unwrap();
        assert_eq!(found[0]["views"], json!(3.0));
        assert_eq!(found[0]["tags"], json!(["x", "y"]));
    }

    #[tokio::test]
    async fn test_delete_by_filter() {
        let store = MemoryStore::new();
        let mut session = store.start_session().await.unwrap();
        session
            .insert("memories", json!({ "status": "draft" }))
            .await
            .unwrap();
        session
            .insert("memories", json!({ "status": "published" }))
            .await
            .unwrap();

        let removed = session
            .delete("memories", &json!({ "status": "draft" }))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.committed_docs("memories").len(), 1);
    }

    #[tokio::test]
    async fn test_find_applies_sort_skip_limit() {
        let store = MemoryStore::new();
        let mut session = store.start_session().await.unwrap();
        for n in [3, 1, 2, 5, 4] {
            session
                .insert("memories", json!({ "n": n }))
                .await
                .unwrap();
        }

        let options = QueryOptions {
            limit: 2,
            skip: 1,
            sort: Some(json!({ "n": -1 })),
        };
        let found = session
            .find("memories", &json!({}), &options)
            .await
            .unwrap();
        let ns: Vec<i64> = found.iter().map(|d| d["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![4, 3]);
    }

    #[tokio::test]
    async fn test_directory_resolves_registered_subject() {
        let directory = InMemoryDirectory::new();
        directory.insert(SubjectProfile {
            subject: "user-1".to_string(),
            email: Some("ab@test.com".to_string()),
            role: Some(Role::User),
        });

        let profile = directory.resolve("user-1").await.unwrap().unwrap();
        assert_eq!(profile.subject, "user-1");
        assert!(directory.resolve("ghost").await.unwrap().is_none());

        directory.remove("user-1");
        assert!(directory.resolve("user-1").await.unwrap().is_none());
    }
}
