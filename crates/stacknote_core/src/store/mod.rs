//! Document store contract consumed by the sync engine.
//!
//! # Responsibility
//! - Describe owner-scoped live queries, one-shot reads and writes.
//! - Keep store-specific details (SQL, JSON bodies) behind one trait.
//!
//! # Invariants
//! - Every query and write is scoped by exactly one owner.
//! - Live queries deliver full ordered snapshots, never deltas.
//! - `commit` applies a batch completely or not at all.

use crate::db::DbError;
use crate::model::entity::OwnerId;
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::rc::Rc;
use std::sync::mpsc::Sender;
use uuid::Uuid;

pub mod sqlite_store;

pub use sqlite_store::SqliteDocumentStore;

/// Raw JSON fields of one document body.
pub type DocFields = Map<String, Value>;

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors reported by document store operations.
#[derive(Debug)]
pub enum StoreError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Document exists but belongs to another owner.
    PermissionDenied { collection: Collection, doc_id: Uuid },
    /// Update target does not exist.
    NotFound { collection: Collection, doc_id: Uuid },
    /// Persisted document cannot be decoded.
    InvalidDocument(String),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Store rejected the request for a transient reason.
    Unavailable(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::PermissionDenied { collection, doc_id } => {
                write!(f, "permission denied: {collection}/{doc_id}")
            }
            Self::NotFound { collection, doc_id } => {
                write!(f, "document not found: {collection}/{doc_id}")
            }
            Self::InvalidDocument(message) => write!(f, "invalid document: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "document store requires schema version {expected_version}, got {actual_version}"
            ),
            Self::Unavailable(message) => write!(f, "store unavailable: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Document collections known by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Categories,
    Stacks,
    Notes,
}

impl Collection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Categories => "categories",
            Self::Stacks => "stacks",
            Self::Notes => "notes",
        }
    }
}

impl Display for Collection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference fields that queries may filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefField {
    CategoryId,
    StackId,
}

impl RefField {
    /// Field name inside the JSON body.
    pub fn name(self) -> &'static str {
        match self {
            Self::CategoryId => "categoryId",
            Self::StackId => "stackId",
        }
    }

    pub(crate) fn json_path(self) -> &'static str {
        match self {
            Self::CategoryId => "$.categoryId",
            Self::StackId => "$.stackId",
        }
    }
}

/// Owner-scoped query with an optional reference equality predicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocQuery {
    pub collection: Collection,
    pub owner: OwnerId,
    pub field_eq: Option<(RefField, Uuid)>,
}

impl DocQuery {
    /// All documents of one owner in a collection.
    pub fn owned(collection: Collection, owner: OwnerId) -> Self {
        Self {
            collection,
            owner,
            field_eq: None,
        }
    }

    /// Narrows the query to documents whose reference field equals `value`.
    pub fn where_eq(mut self, field: RefField, value: Uuid) -> Self {
        self.field_eq = Some((field, value));
        self
    }
}

/// Owner-qualified address of one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocRef {
    pub collection: Collection,
    pub id: Uuid,
    pub owner: OwnerId,
}

impl DocRef {
    pub fn new(collection: Collection, id: Uuid, owner: OwnerId) -> Self {
        Self {
            collection,
            id,
            owner,
        }
    }
}

/// Document as delivered by reads and live snapshots.
///
/// Ids and owners stay textual here; validation happens during normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDocument {
    pub id: String,
    pub owner: String,
    /// Server timestamp in epoch milliseconds; `None` when missing or pending.
    pub created_at: Option<i64>,
    pub fields: DocFields,
}

/// One operation inside an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Merges `patch` into the body; `null` values remove the field.
    Update { doc: DocRef, patch: DocFields },
    /// Removes the document; missing documents are a no-op.
    Delete { doc: DocRef },
}

/// Ordered list of writes committed atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, doc: DocRef, patch: DocFields) -> &mut Self {
        self.ops.push(WriteOp::Update { doc, patch });
        self
    }

    pub fn delete(&mut self, doc: DocRef) -> &mut Self {
        self.ops.push(WriteOp::Delete { doc });
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Identifier of one registered live query. Never reused by a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

impl Display for ListenerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// One delivery on the change feed.
#[derive(Debug)]
pub struct FeedEvent {
    pub listener: ListenerId,
    /// Full ordered restatement of the query result, or the query failure.
    pub payload: StoreResult<Vec<RawDocument>>,
}

/// External document store contract.
pub trait DocumentStore {
    /// Registers a live query. The current snapshot is delivered to `sink`
    /// right away, and again after every committed change to its result.
    fn listen(&self, query: &DocQuery, sink: Sender<FeedEvent>) -> StoreResult<ListenerId>;

    /// Stops delivery for one live query. Unknown ids are ignored.
    fn unlisten(&self, listener: ListenerId);

    /// One-shot scoped read.
    fn read(&self, query: &DocQuery) -> StoreResult<Vec<RawDocument>>;

    /// Body of one document, or `None` when `doc.owner` has no such document.
    fn get(&self, doc: &DocRef) -> StoreResult<Option<DocFields>> {
        let wanted = doc.id.to_string();
        let docs = self.read(&DocQuery::owned(doc.collection, doc.owner))?;
        Ok(docs
            .into_iter()
            .find(|candidate| candidate.id == wanted)
            .map(|found| found.fields))
    }

    /// Creates a document with a store-issued id and server timestamp.
    fn create(&self, collection: Collection, owner: OwnerId, fields: DocFields)
        -> StoreResult<Uuid>;

    /// Atomically applies every op of `batch`, or none of them.
    fn commit(&self, batch: WriteBatch) -> StoreResult<()>;

    /// Single-document field update.
    fn update(&self, doc: &DocRef, patch: DocFields) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        batch.update(*doc, patch);
        self.commit(batch)
    }

    /// Single-document delete.
    fn delete(&self, doc: &DocRef) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        batch.delete(*doc);
        self.commit(batch)
    }
}

impl<T: DocumentStore + ?Sized> DocumentStore for Rc<T> {
    fn listen(&self, query: &DocQuery, sink: Sender<FeedEvent>) -> StoreResult<ListenerId> {
        (**self).listen(query, sink)
    }

    fn unlisten(&self, listener: ListenerId) {
        (**self).unlisten(listener)
    }

    fn read(&self, query: &DocQuery) -> StoreResult<Vec<RawDocument>> {
        (**self).read(query)
    }

    fn get(&self, doc: &DocRef) -> StoreResult<Option<DocFields>> {
        (**self).get(doc)
    }

    fn create(
        &self,
        collection: Collection,
        owner: OwnerId,
        fields: DocFields,
    ) -> StoreResult<Uuid> {
        (**self).create(collection, owner, fields)
    }

    fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        (**self).commit(batch)
    }

    fn update(&self, doc: &DocRef, patch: DocFields) -> StoreResult<()> {
        (**self).update(doc, patch)
    }

    fn delete(&self, doc: &DocRef) -> StoreResult<()> {
        (**self).delete(doc)
    }
}
