#![allow(dead_code)]

use stacknote_core::model::entity::OwnerId;
use stacknote_core::store::{
    Collection, DocFields, DocQuery, DocumentStore, FeedEvent, ListenerId, RawDocument,
    SqliteDocumentStore, StoreError, StoreResult, WriteBatch,
};
use stacknote_core::{CascadeImpact, LocalIdentityProvider, NotesSession};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::mpsc::Sender;
use uuid::Uuid;

/// Store wrapper that can fail commits and break live queries on demand.
pub struct FlakyStore {
    inner: SqliteDocumentStore,
    fail_commits: Cell<bool>,
    sinks: RefCell<Vec<(ListenerId, Collection, Sender<FeedEvent>)>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: SqliteDocumentStore::open_in_memory().unwrap(),
            fail_commits: Cell::new(false),
            sinks: RefCell::new(Vec::new()),
        }
    }

    pub fn inner(&self) -> &SqliteDocumentStore {
        &self.inner
    }

    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.set(fail);
    }

    /// Delivers an error to every live query on `collection`.
    pub fn break_listeners(&self, collection: Collection) {
        for (listener, target, sink) in self.sinks.borrow().iter() {
            if *target == collection {
                let _ = sink.send(FeedEvent {
                    listener: *listener,
                    payload: Err(StoreError::Unavailable("connection reset".to_string())),
                });
            }
        }
    }
}

impl DocumentStore for FlakyStore {
    fn listen(&self, query: &DocQuery, sink: Sender<FeedEvent>) -> StoreResult<ListenerId> {
        let listener = self.inner.listen(query, sink.clone())?;
        self.sinks
            .borrow_mut()
            .push((listener, query.collection, sink));
        Ok(listener)
    }

    fn unlisten(&self, listener: ListenerId) {
        self.sinks.borrow_mut().retain(|(id, _, _)| *id != listener);
        self.inner.unlisten(listener);
    }

    fn read(&self, query: &DocQuery) -> StoreResult<Vec<RawDocument>> {
        self.inner.read(query)
    }

    fn create(
        &self,
        collection: Collection,
        owner: OwnerId,
        fields: DocFields,
    ) -> StoreResult<Uuid> {
        self.inner.create(collection, owner, fields)
    }

    fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        if self.fail_commits.get() {
            return Err(StoreError::Unavailable("commit rejected".to_string()));
        }
        self.inner.commit(batch)
    }
}

/// Session over a shared in-memory store, signed in as a full principal.
pub fn signed_in_session(
) -> (Rc<SqliteDocumentStore>, LocalIdentityProvider, NotesSession<Rc<SqliteDocumentStore>>) {
    let store = Rc::new(SqliteDocumentStore::open_in_memory().unwrap());
    let identity = LocalIdentityProvider::new();
    identity.ensure_guest();
    identity.sign_in(Some("tester".to_string()));
    let mut session = NotesSession::start(Rc::clone(&store), &identity);
    session.pump();
    (store, identity, session)
}

pub fn accept_all() -> impl FnMut(&CascadeImpact) -> bool {
    |_: &CascadeImpact| true
}

pub fn decline_all() -> impl FnMut(&CascadeImpact) -> bool {
    |_: &CascadeImpact| false
}

pub fn fields(value: serde_json::Value) -> DocFields {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}
