//! Logical-query handle registry.
//!
//! # Responsibility
//! - Map each logical query key to its single live store handle.
//! - Close the old handle before opening a new one when the scope changes.
//!
//! # Invariants
//! - `open` with an unchanged scope is a no-op.
//! - Handles never escape this registry; callers only see `ListenerId`s
//!   when routing deliveries.

use crate::model::entity::{CategoryId, OwnerId};
use crate::store::{
    Collection, DocQuery, DocumentStore, FeedEvent, ListenerId, RefField, StoreResult,
};
use log::{debug, info};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::mpsc::Sender;

/// Logical queries held by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueryKey {
    /// `Categories(owner)`.
    Categories,
    /// `Notes(owner)`.
    Notes,
    /// `Stacks(owner, categoryId = active filter)`.
    FilterStacks,
    /// `Stacks(owner, categoryId = creation category)`.
    CreationStacks,
}

impl QueryKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Categories => "categories",
            Self::Notes => "notes",
            Self::FilterStacks => "filter_stacks",
            Self::CreationStacks => "creation_stacks",
        }
    }

    /// Builds the store query for this key in the given scope.
    ///
    /// Stack keys require a category; `None` means the key has no scope and
    /// must stay closed.
    pub fn scoped_query(self, owner: OwnerId, category: Option<CategoryId>) -> Option<DocQuery> {
        match self {
            Self::Categories => Some(DocQuery::owned(Collection::Categories, owner)),
            Self::Notes => Some(DocQuery::owned(Collection::Notes, owner)),
            Self::FilterStacks | Self::CreationStacks => category.map(|category_id| {
                DocQuery::owned(Collection::Stacks, owner)
                    .where_eq(RefField::CategoryId, category_id)
            }),
        }
    }
}

impl Display for QueryKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an `open` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// A handle with identical scope was already live.
    AlreadyOpen(ListenerId),
    /// A new handle was opened, replacing `replaced` if any.
    Opened {
        listener: ListenerId,
        replaced: Option<ListenerId>,
    },
}

#[derive(Debug, Clone)]
struct ActiveHandle {
    listener: ListenerId,
    query: DocQuery,
}

/// Registry of live handles keyed by logical query.
pub struct SubscriptionManager {
    sink: Sender<FeedEvent>,
    active: BTreeMap<QueryKey, ActiveHandle>,
}

impl SubscriptionManager {
    /// Creates an empty registry whose handles deliver into `sink`.
    pub fn new(sink: Sender<FeedEvent>) -> Self {
        Self {
            sink,
            active: BTreeMap::new(),
        }
    }

    /// Opens `key` with `query`, closing a differently scoped handle first.
    pub fn open<S: DocumentStore + ?Sized>(
        &mut self,
        store: &S,
        key: QueryKey,
        query: DocQuery,
    ) -> StoreResult<OpenOutcome> {
        if let Some(active) = self.active.get(&key) {
            if active.query == query {
                debug!(
                    "event=subscription_open module=sync status=noop key={} listener={}",
                    key, active.listener
                );
                return Ok(OpenOutcome::AlreadyOpen(active.listener));
            }
        }

        let replaced = self.close(store, key);
        let listener = store.listen(&query, self.sink.clone())?;
        self.active.insert(key, ActiveHandle { listener, query });
        info!(
            "event=subscription_open module=sync status=ok key={} listener={}",
            key, listener
        );
        Ok(OpenOutcome::Opened { listener, replaced })
    }

    /// Closes the handle for `key`, returning its listener id if one was live.
    pub fn close<S: DocumentStore + ?Sized>(
        &mut self,
        store: &S,
        key: QueryKey,
    ) -> Option<ListenerId> {
        let handle = self.active.remove(&key)?;
        store.unlisten(handle.listener);
        info!(
            "event=subscription_close module=sync status=ok key={} listener={}",
            key, handle.listener
        );
        Some(handle.listener)
    }

    /// Closes every live handle. Returns how many were closed.
    pub fn close_all<S: DocumentStore + ?Sized>(&mut self, store: &S) -> usize {
        let keys: Vec<QueryKey> = self.active.keys().copied().collect();
        keys.into_iter()
            .filter(|key| self.close(store, *key).is_some())
            .count()
    }

    /// Returns the key currently owning `listener`, if it is still live.
    pub fn route(&self, listener: ListenerId) -> Option<QueryKey> {
        self.active
            .iter()
            .find(|(_, handle)| handle.listener == listener)
            .map(|(key, _)| *key)
    }

    pub fn is_open(&self, key: QueryKey) -> bool {
        self.active.contains_key(&key)
    }

    /// Scope of the live handle for `key`.
    pub fn query(&self, key: QueryKey) -> Option<&DocQuery> {
        self.active.get(&key).map(|handle| &handle.query)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}
