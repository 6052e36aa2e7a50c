//! Notes session: the composition root of the sync engine.
//!
//! # Responsibility
//! - Gate every query and mutation on a full principal.
//! - Keep the four logical queries scoped to the current filter and creation
//!   category, and fold their snapshots into held state.
//! - Route user intents to the mutation engine and apply their local effects
//!   on selection memory and UI state.
//!
//! # Invariants
//! - No subscription is open while access is not granted.
//! - Deliveries from closed or replaced handles are discarded.
//! - Held state only changes from snapshots; mutations never patch it.
//! - Identity changes reset every piece of session state.

pub mod selection;
pub mod ui_state;

use crate::identity::IdentityProvider;
use crate::model::entity::{
    Category, CategoryFilter, CategoryId, Note, NoteColor, NoteId, OwnerId, Stack, StackId,
};
use crate::model::principal::Principal;
use crate::service::mutations::{
    CascadeOutcome, ConfirmationPrompt, MutationEngine, MutationError, NoteDraft,
};
use crate::store::{Collection, DocQuery, DocumentStore, FeedEvent, RawDocument, RefField};
use crate::sync::normalize::{
    normalize_categories, normalize_notes, normalize_stacks, Normalized, SkippedDocument,
};
use crate::sync::subscriptions::{QueryKey, SubscriptionManager};
use crate::view::{build_view, DerivedView};
use log::{debug, info, warn};
use selection::SelectionMemory;
use std::collections::HashSet;
use std::sync::mpsc::{channel, Receiver, Sender};
use ui_state::{NoteMenu, UiState};

/// Identity gate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// No principal has been observed yet.
    Pending,
    /// Absent or guest principal. Nothing is subscribed.
    NoAccess,
    Granted(OwnerId),
}

impl Access {
    pub fn owner(self) -> Option<OwnerId> {
        match self {
            Self::Granted(owner) => Some(owner),
            Self::Pending | Self::NoAccess => None,
        }
    }
}

/// Non-fatal conditions surfaced to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    /// The session has no full principal; a sign-in prompt should be shown.
    SignInRequired,
    /// A live query failed. Its slice was cleared and its handle closed.
    SubscriptionFailed { key: QueryKey, message: String },
    /// Documents of a snapshot could not be decoded and were left out.
    DocumentsSkipped {
        key: QueryKey,
        skipped: Vec<SkippedDocument>,
    },
}

/// Latest normalized snapshot of one logical query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSlice<T> {
    items: Vec<T>,
    loading: bool,
}

impl<T> Default for LiveSlice<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            loading: false,
        }
    }
}

impl<T> LiveSlice<T> {
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// True between opening a handle and its first delivery.
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn begin_loading(&mut self) {
        self.items.clear();
        self.loading = true;
    }

    fn clear(&mut self) {
        self.items.clear();
        self.loading = false;
    }

    fn replace(&mut self, items: Vec<T>) {
        self.items = items;
        self.loading = false;
    }
}

/// Single-threaded session over one document store.
pub struct NotesSession<S: DocumentStore> {
    store: S,
    principal: Principal,
    access: Access,
    subscriptions: SubscriptionManager,
    feed: Receiver<FeedEvent>,
    identity_sink: Sender<Principal>,
    identity_events: Receiver<Principal>,
    categories: LiveSlice<Category>,
    notes: LiveSlice<Note>,
    filter_stacks: LiveSlice<Stack>,
    creation_stacks: LiveSlice<Stack>,
    filter: CategoryFilter,
    creation_category: Option<CategoryId>,
    selected_stack: Option<StackId>,
    selection: SelectionMemory,
    ui: UiState,
    notices: Vec<SessionNotice>,
}

impl<S: DocumentStore> NotesSession<S> {
    /// Creates a session in `Pending` state. Nothing is subscribed until a
    /// principal is applied.
    pub fn new(store: S) -> Self {
        let (feed_sink, feed) = channel();
        let (identity_sink, identity_events) = channel();
        Self {
            store,
            principal: Principal::Absent,
            access: Access::Pending,
            subscriptions: SubscriptionManager::new(feed_sink),
            feed,
            identity_sink,
            identity_events,
            categories: LiveSlice::default(),
            notes: LiveSlice::default(),
            filter_stacks: LiveSlice::default(),
            creation_stacks: LiveSlice::default(),
            filter: CategoryFilter::All,
            creation_category: None,
            selected_stack: None,
            selection: SelectionMemory::new(),
            ui: UiState::default(),
            notices: Vec::new(),
        }
    }

    /// Creates a session that follows `identity` and applies its current
    /// principal right away.
    pub fn start(store: S, identity: &dyn IdentityProvider) -> Self {
        let mut session = Self::new(store);
        identity.watch(session.identity_sink.clone());
        session.apply_principal(identity.current());
        session
    }

    /// Sender that feeds identity transitions into `pump`.
    pub fn identity_sink(&self) -> Sender<Principal> {
        self.identity_sink.clone()
    }

    /// Identity gate transition.
    ///
    /// Re-announcing the same full owner keeps the session as is.
    pub fn apply_principal(&mut self, principal: Principal) {
        let next_owner = principal.full_owner();
        if next_owner.is_some() && next_owner == self.access.owner() {
            debug!("event=identity_gate module=session status=noop");
            self.principal = principal;
            return;
        }

        self.subscriptions.close_all(&self.store);
        self.reset_state();
        self.principal = principal;

        match next_owner {
            None => {
                self.access = Access::NoAccess;
                self.notices.push(SessionNotice::SignInRequired);
                info!(
                    "event=identity_gate module=session status=no_access principal={}",
                    self.principal.kind()
                );
            }
            Some(owner) => {
                self.access = Access::Granted(owner);
                info!("event=identity_gate module=session status=granted");
                self.rescope(QueryKey::Categories);
                self.rescope(QueryKey::Notes);
            }
        }
    }

    /// Drains identity transitions, then feed events, until both are empty.
    ///
    /// Returns the number of processed messages.
    pub fn pump(&mut self) -> usize {
        let mut processed = 0;
        loop {
            while let Ok(principal) = self.identity_events.try_recv() {
                self.apply_principal(principal);
                processed += 1;
            }
            match self.feed.try_recv() {
                Ok(event) => {
                    self.apply_feed(event);
                    processed += 1;
                }
                Err(_) => break,
            }
        }
        processed
    }

    /// Closes every subscription. The session stays usable for a later
    /// `apply_principal`.
    pub fn close(&mut self) {
        let closed = self.subscriptions.close_all(&self.store);
        self.reset_state();
        self.access = Access::Pending;
        self.principal = Principal::Absent;
        info!(
            "event=session_close module=session status=ok closed={}",
            closed
        );
    }

    /// Sets the category filter. A specific category also becomes the
    /// creation category; `All` clears it.
    ///
    /// Returns false and changes nothing when the category is not in the
    /// categories snapshot.
    pub fn select_filter(&mut self, filter: CategoryFilter) -> bool {
        if !self.is_known_category(filter.category_id()) {
            warn!("event=select_filter module=session status=rejected reason=unknown_category");
            return false;
        }
        self.filter = filter;
        self.switch_creation_category(filter.category_id());
        self.rescope(QueryKey::FilterStacks);
        true
    }

    /// Sets the category new notes are created in. The remembered stack is
    /// applied once that category's stack snapshot arrives.
    ///
    /// Returns false and changes nothing when the category is not in the
    /// categories snapshot.
    pub fn set_creation_category(&mut self, category_id: Option<CategoryId>) -> bool {
        if !self.is_known_category(category_id) {
            warn!(
                "event=set_creation_category module=session status=rejected reason=unknown_category"
            );
            return false;
        }
        self.switch_creation_category(category_id);
        true
    }

    /// Picks the stack for new notes and remembers it for the creation
    /// category. Returns false if the stack is not offered.
    pub fn pick_stack_for_new(&mut self, stack_id: Option<StackId>) -> bool {
        let Some(category_id) = self.creation_category else {
            return stack_id.is_none();
        };
        if let Some(id) = stack_id {
            if !self.creation_stacks.items().iter().any(|stack| stack.id == id) {
                return false;
            }
        }
        self.selected_stack = stack_id;
        self.selection.remember(category_id, stack_id);
        true
    }

    pub fn create_category(&mut self, name: &str) -> Result<CategoryId, MutationError> {
        let sibling_count = self.categories.len();
        self.engine()?.create_category(name, sibling_count)
    }

    pub fn create_stack(
        &mut self,
        category_id: CategoryId,
        title: &str,
    ) -> Result<StackId, MutationError> {
        let sibling_count = self.sibling_stack_count(category_id)?;
        self.engine()?.create_stack(category_id, title, sibling_count)
    }

    /// Creates a note in the creation category and selected stack.
    pub fn create_note(&mut self, text: &str, color: NoteColor) -> Result<NoteId, MutationError> {
        let draft = NoteDraft {
            text: text.to_string(),
            color,
            category_id: self.creation_category,
            stack_id: self.selected_stack,
        };
        let note_id = self.engine()?.create_note(&draft)?;
        if let Some(category_id) = draft.category_id {
            self.selection.remember(category_id, draft.stack_id);
        }
        Ok(note_id)
    }

    /// Saves note text and leaves edit mode on success.
    pub fn update_note_text(&mut self, note_id: NoteId, text: &str) -> Result<(), MutationError> {
        self.engine()?.update_note_text(note_id, text)?;
        self.ui.stop_editing(note_id);
        Ok(())
    }

    pub fn update_note_color(
        &mut self,
        note_id: NoteId,
        color: NoteColor,
    ) -> Result<(), MutationError> {
        self.engine()?.update_note_color(note_id, color)?;
        self.ui.close_menu(note_id, NoteMenu::Color);
        Ok(())
    }

    /// Moves a note to another category (or none) and clears its stack.
    pub fn update_note_category(
        &mut self,
        note_id: NoteId,
        category_id: Option<CategoryId>,
    ) -> Result<(), MutationError> {
        self.engine()?.update_note_category(note_id, category_id)?;
        self.ui.close_menu(note_id, NoteMenu::Category);
        Ok(())
    }

    pub fn update_note_stack(
        &mut self,
        note_id: NoteId,
        stack_id: Option<StackId>,
    ) -> Result<(), MutationError> {
        self.engine()?.update_note_stack(note_id, stack_id)?;
        self.ui.close_menu(note_id, NoteMenu::Stack);
        Ok(())
    }

    pub fn delete_note(&mut self, note_id: NoteId) -> Result<(), MutationError> {
        self.engine()?.delete_note(note_id)?;
        self.ui.forget_note(note_id);
        Ok(())
    }

    /// Cascading category delete behind a confirmation prompt.
    pub fn delete_category(
        &mut self,
        category_id: CategoryId,
        prompt: &mut dyn ConfirmationPrompt,
    ) -> Result<CascadeOutcome, MutationError> {
        let outcome = self.engine()?.delete_category(category_id, prompt)?;
        if let CascadeOutcome::Committed(_) = outcome {
            self.selection.forget_category(category_id);
            if self.filter == CategoryFilter::Category(category_id) {
                self.select_filter(CategoryFilter::All);
            } else if self.creation_category == Some(category_id) {
                self.switch_creation_category(None);
            }
        }
        Ok(outcome)
    }

    /// Cascading stack delete behind a confirmation prompt.
    pub fn delete_stack(
        &mut self,
        stack_id: StackId,
        prompt: &mut dyn ConfirmationPrompt,
    ) -> Result<CascadeOutcome, MutationError> {
        let outcome = self.engine()?.delete_stack(stack_id, prompt)?;
        if let CascadeOutcome::Committed(_) = outcome {
            self.selection.forget_stack(stack_id);
            if self.selected_stack == Some(stack_id) {
                self.selected_stack = None;
            }
            self.ui.close_stack_header(stack_id);
        }
        Ok(outcome)
    }

    /// Filtered and grouped projection of the held state.
    pub fn view(&self) -> DerivedView {
        build_view(
            self.notes.items(),
            self.filter_stacks.items(),
            self.filter,
        )
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn categories(&self) -> &LiveSlice<Category> {
        &self.categories
    }

    pub fn notes(&self) -> &LiveSlice<Note> {
        &self.notes
    }

    /// Stacks of the filter category.
    pub fn filter_stacks(&self) -> &LiveSlice<Stack> {
        &self.filter_stacks
    }

    /// Stacks offered when creating a note.
    pub fn creation_stacks(&self) -> &LiveSlice<Stack> {
        &self.creation_stacks
    }

    pub fn filter(&self) -> CategoryFilter {
        self.filter
    }

    pub fn creation_category(&self) -> Option<CategoryId> {
        self.creation_category
    }

    pub fn selected_stack(&self) -> Option<StackId> {
        self.selected_stack
    }

    pub fn selection(&self) -> &SelectionMemory {
        &self.selection
    }

    pub fn ui(&self) -> &UiState {
        &self.ui
    }

    pub fn ui_mut(&mut self) -> &mut UiState {
        &mut self.ui
    }

    pub fn is_subscribed(&self, key: QueryKey) -> bool {
        self.subscriptions.is_open(key)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Takes every queued notice.
    pub fn drain_notices(&mut self) -> Vec<SessionNotice> {
        std::mem::take(&mut self.notices)
    }

    fn engine(&self) -> Result<MutationEngine<'_, S>, MutationError> {
        let owner = self.access.owner().ok_or(MutationError::NoAccess)?;
        Ok(MutationEngine::new(&self.store, owner))
    }

    fn sibling_stack_count(&self, category_id: CategoryId) -> Result<usize, MutationError> {
        if self.filter.category_id() == Some(category_id) {
            return Ok(self.filter_stacks.len());
        }
        if self.creation_category == Some(category_id) {
            return Ok(self.creation_stacks.len());
        }
        let owner = self.access.owner().ok_or(MutationError::NoAccess)?;
        let stacks = self.store.read(
            &DocQuery::owned(Collection::Stacks, owner).where_eq(RefField::CategoryId, category_id),
        )?;
        Ok(stacks.len())
    }

    fn is_known_category(&self, category_id: Option<CategoryId>) -> bool {
        category_id.map_or(true, |id| {
            self.categories.items().iter().any(|category| category.id == id)
        })
    }

    fn switch_creation_category(&mut self, category_id: Option<CategoryId>) {
        if self.creation_category != category_id {
            self.creation_category = category_id;
            // Filled from selection memory by the next CreationStacks snapshot.
            self.selected_stack = None;
        }
        self.rescope(QueryKey::CreationStacks);
    }

    /// Opens, re-scopes or closes the handle for `key` to match current state.
    fn rescope(&mut self, key: QueryKey) {
        let Some(owner) = self.access.owner() else {
            return;
        };
        let scope = match key {
            QueryKey::FilterStacks => self.filter.category_id(),
            QueryKey::CreationStacks => self.creation_category,
            QueryKey::Categories | QueryKey::Notes => None,
        };
        let Some(query) = key.scoped_query(owner, scope) else {
            self.subscriptions.close(&self.store, key);
            self.clear_slice(key);
            return;
        };
        if self.subscriptions.query(key) == Some(&query) {
            return;
        }

        self.begin_loading(key);
        if let Err(err) = self.subscriptions.open(&self.store, key, query) {
            self.fail_subscription(key, err.to_string());
        }
    }

    fn apply_feed(&mut self, event: FeedEvent) {
        let Some(key) = self.subscriptions.route(event.listener) else {
            debug!(
                "event=feed_delivery module=session status=discarded listener={}",
                event.listener
            );
            return;
        };

        match event.payload {
            Err(err) => {
                self.subscriptions.close(&self.store, key);
                self.fail_subscription(key, err.to_string());
            }
            Ok(docs) => self.apply_snapshot(key, &docs),
        }
    }

    fn apply_snapshot(&mut self, key: QueryKey, docs: &[RawDocument]) {
        match key {
            QueryKey::Categories => {
                let categories = self.take_normalized(key, normalize_categories(docs));
                self.categories.replace(categories);
                self.reconcile_categories();
            }
            QueryKey::Notes => {
                let notes = self.take_normalized(key, normalize_notes(docs));
                let present: HashSet<NoteId> = notes.iter().map(|note| note.id).collect();
                self.ui.retain_notes(&present);
                self.notes.replace(notes);
            }
            QueryKey::FilterStacks => {
                let stacks = self.take_normalized(key, normalize_stacks(docs));
                self.filter_stacks.replace(stacks);
            }
            QueryKey::CreationStacks => {
                let stacks = self.take_normalized(key, normalize_stacks(docs));
                self.selected_stack = self
                    .creation_category
                    .and_then(|category_id| self.selection.resolve(category_id, &stacks));
                self.creation_stacks.replace(stacks);
            }
        }
        debug!(
            "event=snapshot_applied module=session status=ok key={} docs={}",
            key,
            docs.len()
        );
    }

    /// Drops scopes that name categories missing from the latest snapshot.
    fn reconcile_categories(&mut self) {
        let known = |id: CategoryId, categories: &[Category]| {
            categories.iter().any(|category| category.id == id)
        };
        if let Some(category_id) = self.filter.category_id() {
            if !known(category_id, self.categories.items()) {
                info!("event=filter_reset module=session status=ok reason=category_missing");
                self.select_filter(CategoryFilter::All);
            }
        }
        if let Some(category_id) = self.creation_category {
            if !known(category_id, self.categories.items()) {
                self.switch_creation_category(None);
            }
        }
    }

    fn take_normalized<T>(&mut self, key: QueryKey, normalized: Normalized<T>) -> Vec<T> {
        if !normalized.skipped.is_empty() {
            warn!(
                "event=snapshot_normalize module=session status=skipped key={} count={}",
                key,
                normalized.skipped.len()
            );
            self.notices.push(SessionNotice::DocumentsSkipped {
                key,
                skipped: normalized.skipped,
            });
        }
        normalized.items
    }

    fn fail_subscription(&mut self, key: QueryKey, message: String) {
        warn!(
            "event=subscription_error module=session status=error key={} error={}",
            key, message
        );
        self.clear_slice(key);
        if key == QueryKey::CreationStacks {
            self.selected_stack = None;
        }
        self.notices
            .push(SessionNotice::SubscriptionFailed { key, message });
    }

    fn begin_loading(&mut self, key: QueryKey) {
        match key {
            QueryKey::Categories => self.categories.begin_loading(),
            QueryKey::Notes => self.notes.begin_loading(),
            QueryKey::FilterStacks => self.filter_stacks.begin_loading(),
            QueryKey::CreationStacks => self.creation_stacks.begin_loading(),
        }
    }

    fn clear_slice(&mut self, key: QueryKey) {
        match key {
            QueryKey::Categories => self.categories.clear(),
            QueryKey::Notes => self.notes.clear(),
            QueryKey::FilterStacks => self.filter_stacks.clear(),
            QueryKey::CreationStacks => self.creation_stacks.clear(),
        }
    }

    fn reset_state(&mut self) {
        self.categories.clear();
        self.notes.clear();
        self.filter_stacks.clear();
        self.creation_stacks.clear();
        self.filter = CategoryFilter::All;
        self.creation_category = None;
        self.selected_stack = None;
        self.selection.clear();
        self.ui.clear();
    }
}

impl<S: DocumentStore> Drop for NotesSession<S> {
    fn drop(&mut self) {
        self.subscriptions.close_all(&self.store);
    }
}
