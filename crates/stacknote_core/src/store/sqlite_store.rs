//! SQLite-backed document store with in-process live queries.
//!
//! # Responsibility
//! - Persist owner-scoped JSON documents in the `documents` table.
//! - Re-run live queries after each committed write and deliver changed
//!   full snapshots to their sinks.
//!
//! # Invariants
//! - Snapshots are ordered by `doc_id ASC`.
//! - A listener receives a new snapshot only when its result changed.
//! - Writes touching another owner's document are rejected.
//! - Server timestamps are strictly increasing per store instance.

use crate::db::migrations::{latest_version, schema_version};
use crate::db::{open_db, open_db_in_memory};
use crate::model::entity::OwnerId;
use crate::store::{
    Collection, DocFields, DocQuery, DocRef, DocumentStore, FeedEvent, ListenerId, RawDocument,
    StoreError, StoreResult, WriteBatch, WriteOp,
};
use log::{debug, info, warn};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::mpsc::Sender;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

struct Listener {
    query: DocQuery,
    sink: Sender<FeedEvent>,
    last_delivered: Option<Vec<RawDocument>>,
}

/// Document store over one SQLite connection.
///
/// Single-threaded by construction: interior mutability uses `Cell`/`RefCell`.
pub struct SqliteDocumentStore {
    conn: Connection,
    listeners: RefCell<BTreeMap<ListenerId, Listener>>,
    next_listener_id: Cell<u64>,
    last_timestamp_ms: Cell<i64>,
}

impl SqliteDocumentStore {
    /// Opens (and migrates) a file-backed store.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::from_connection(open_db(path)?)
    }

    /// Opens (and migrates) an in-memory store.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(open_db_in_memory()?)
    }

    /// Wraps an already migrated connection.
    pub fn from_connection(conn: Connection) -> StoreResult<Self> {
        let expected_version = latest_version();
        let actual_version = schema_version(&conn)?;
        if actual_version != expected_version {
            return Err(StoreError::UninitializedConnection {
                expected_version,
                actual_version,
            });
        }

        Ok(Self {
            conn,
            listeners: RefCell::new(BTreeMap::new()),
            next_listener_id: Cell::new(1),
            last_timestamp_ms: Cell::new(0),
        })
    }

    /// Number of live queries currently registered.
    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// Writes a document verbatim, bypassing id and timestamp assignment.
    ///
    /// Used by import paths and fixtures where documents already exist
    /// externally (legacy bodies, pending timestamps).
    pub fn import_document(
        &self,
        collection: Collection,
        doc_id: &str,
        owner: &str,
        fields: DocFields,
        created_at: Option<i64>,
    ) -> StoreResult<()> {
        let body = encode_body(&fields)?;
        self.conn.execute(
            "INSERT INTO documents (collection, doc_id, owner, body, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (collection, doc_id) DO UPDATE SET
                owner = excluded.owner,
                body = excluded.body,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at;",
            params![
                collection.as_str(),
                doc_id,
                owner,
                body,
                created_at,
                now_ms()
            ],
        )?;
        self.notify(&BTreeSet::from([collection]));
        Ok(())
    }

    fn next_server_timestamp(&self) -> i64 {
        let candidate = now_ms();
        let last = self.last_timestamp_ms.get();
        let issued = if candidate > last { candidate } else { last + 1 };
        self.last_timestamp_ms.set(issued);
        issued
    }

    fn run_query(&self, query: &DocQuery) -> StoreResult<Vec<RawDocument>> {
        let mut sql = String::from(
            "SELECT doc_id, owner, body, created_at
             FROM documents
             WHERE collection = ?
               AND owner = ?",
        );
        let mut bind_values = vec![
            SqlValue::Text(query.collection.as_str().to_string()),
            SqlValue::Text(query.owner.to_string()),
        ];
        if let Some((field, value)) = query.field_eq {
            sql.push_str(" AND json_extract(body, ?) = ?");
            bind_values.push(SqlValue::Text(field.json_path().to_string()));
            bind_values.push(SqlValue::Text(value.to_string()));
        }
        sql.push_str(" ORDER BY doc_id ASC;");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut docs = Vec::new();
        while let Some(row) = rows.next()? {
            let body: String = row.get("body")?;
            docs.push(RawDocument {
                id: row.get("doc_id")?,
                owner: row.get("owner")?,
                created_at: row.get("created_at")?,
                fields: decode_body(&body)?,
            });
        }
        Ok(docs)
    }

    fn notify(&self, touched: &BTreeSet<Collection>) {
        let mut listeners = self.listeners.borrow_mut();
        let mut closed = Vec::new();

        for (id, listener) in listeners.iter_mut() {
            if !touched.contains(&listener.query.collection) {
                continue;
            }
            match self.run_query(&listener.query) {
                Ok(docs) => {
                    if listener.last_delivered.as_ref() == Some(&docs) {
                        continue;
                    }
                    let event = FeedEvent {
                        listener: *id,
                        payload: Ok(docs.clone()),
                    };
                    if listener.sink.send(event).is_err() {
                        closed.push(*id);
                        continue;
                    }
                    listener.last_delivered = Some(docs);
                }
                Err(err) => {
                    warn!(
                        "event=feed_deliver module=store status=error listener={} collection={} error={}",
                        id, listener.query.collection, err
                    );
                    listener.last_delivered = None;
                    let event = FeedEvent {
                        listener: *id,
                        payload: Err(err),
                    };
                    if listener.sink.send(event).is_err() {
                        closed.push(*id);
                    }
                }
            }
        }

        for id in closed {
            debug!("event=listener_prune module=store status=ok listener={id}");
            listeners.remove(&id);
        }
    }
}

impl DocumentStore for SqliteDocumentStore {
    fn listen(&self, query: &DocQuery, sink: Sender<FeedEvent>) -> StoreResult<ListenerId> {
        let id = ListenerId(self.next_listener_id.get());
        self.next_listener_id.set(id.0 + 1);

        let (payload, last_delivered) = match self.run_query(query) {
            Ok(docs) => (Ok(docs.clone()), Some(docs)),
            Err(err) => (Err(err), None),
        };
        // Dropped receivers are pruned by the next notify.
        let _ = sink.send(FeedEvent {
            listener: id,
            payload,
        });

        self.listeners.borrow_mut().insert(
            id,
            Listener {
                query: query.clone(),
                sink,
                last_delivered,
            },
        );
        info!(
            "event=listen module=store status=ok listener={} collection={} filtered={}",
            id,
            query.collection,
            query.field_eq.is_some()
        );
        Ok(id)
    }

    fn unlisten(&self, listener: ListenerId) {
        if self.listeners.borrow_mut().remove(&listener).is_some() {
            info!("event=unlisten module=store status=ok listener={listener}");
        }
    }

    fn read(&self, query: &DocQuery) -> StoreResult<Vec<RawDocument>> {
        self.run_query(query)
    }

    fn get(&self, doc: &DocRef) -> StoreResult<Option<DocFields>> {
        let body: Option<String> = self
            .conn
            .query_row(
                "SELECT body
                 FROM documents
                 WHERE collection = ?1
                   AND doc_id = ?2
                   AND owner = ?3;",
                params![
                    doc.collection.as_str(),
                    doc.id.to_string(),
                    doc.owner.to_string()
                ],
                |row| row.get(0),
            )
            .optional()?;
        body.as_deref().map(decode_body).transpose()
    }

    fn create(
        &self,
        collection: Collection,
        owner: OwnerId,
        fields: DocFields,
    ) -> StoreResult<Uuid> {
        let doc_id = Uuid::new_v4();
        let mut body = DocFields::new();
        merge_patch(&mut body, fields);
        let created_at = self.next_server_timestamp();

        self.conn.execute(
            "INSERT INTO documents (collection, doc_id, owner, body, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5);",
            params![
                collection.as_str(),
                doc_id.to_string(),
                owner.to_string(),
                encode_body(&body)?,
                created_at,
            ],
        )?;

        debug!("event=doc_create module=store status=ok collection={collection} doc_id={doc_id}");
        self.notify(&BTreeSet::from([collection]));
        Ok(doc_id)
    }

    fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let op_count = batch.len();
        let mut touched = BTreeSet::new();
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        for op in batch.into_ops() {
            // Dropping `tx` on the error path rolls back every earlier op.
            let collection = match op {
                WriteOp::Update { doc, patch } => {
                    apply_update(&tx, &doc, patch)?;
                    doc.collection
                }
                WriteOp::Delete { doc } => {
                    apply_delete(&tx, &doc)?;
                    doc.collection
                }
            };
            touched.insert(collection);
        }
        tx.commit()?;

        info!("event=batch_commit module=store status=ok ops={op_count}");
        self.notify(&touched);
        Ok(())
    }
}

fn apply_update(tx: &Transaction<'_>, doc: &DocRef, patch: DocFields) -> StoreResult<()> {
    let mut body = load_owned_body(tx, doc)?.ok_or(StoreError::NotFound {
        collection: doc.collection,
        doc_id: doc.id,
    })?;
    merge_patch(&mut body, patch);
    tx.execute(
        "UPDATE documents
         SET body = ?3,
             updated_at = ?4
         WHERE collection = ?1
           AND doc_id = ?2;",
        params![
            doc.collection.as_str(),
            doc.id.to_string(),
            encode_body(&body)?,
            now_ms()
        ],
    )?;
    Ok(())
}

fn apply_delete(tx: &Transaction<'_>, doc: &DocRef) -> StoreResult<()> {
    if load_owned_body(tx, doc)?.is_none() {
        return Ok(());
    }
    tx.execute(
        "DELETE FROM documents
         WHERE collection = ?1
           AND doc_id = ?2;",
        params![doc.collection.as_str(), doc.id.to_string()],
    )?;
    Ok(())
}

/// Loads a document body after checking ownership.
///
/// Returns `Ok(None)` for missing documents and `PermissionDenied` for
/// documents owned by someone else.
fn load_owned_body(conn: &Connection, doc: &DocRef) -> StoreResult<Option<DocFields>> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT owner, body
             FROM documents
             WHERE collection = ?1
               AND doc_id = ?2;",
            params![doc.collection.as_str(), doc.id.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match row {
        None => Ok(None),
        Some((owner, _)) if owner != doc.owner.to_string() => Err(StoreError::PermissionDenied {
            collection: doc.collection,
            doc_id: doc.id,
        }),
        Some((_, body)) => decode_body(&body).map(Some),
    }
}

fn merge_patch(body: &mut DocFields, patch: DocFields) {
    for (key, value) in patch {
        if value.is_null() {
            body.remove(&key);
        } else {
            body.insert(key, value);
        }
    }
}

fn encode_body(fields: &DocFields) -> StoreResult<String> {
    serde_json::to_string(fields)
        .map_err(|err| StoreError::InvalidDocument(format!("cannot encode body: {err}")))
}

fn decode_body(text: &str) -> StoreResult<DocFields> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(other) => Err(StoreError::InvalidDocument(format!(
            "body must be a JSON object, got `{other}`"
        ))),
        Err(err) => Err(StoreError::InvalidDocument(format!(
            "body is not valid JSON: {err}"
        ))),
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}
